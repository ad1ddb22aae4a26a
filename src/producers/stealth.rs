//! Stealth producer: low-profile enumeration from user attribute paths.
//!
//! Instead of touching every computer object, stealth mode derives its
//! target set from the UNC paths on user accounts (home directories, logon
//! scripts, roaming profiles) plus the domain controllers. The set is built
//! exactly once per process and shared across loop passes.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::OnceCell;

use crate::constants::NT_AUTHORITY_SID_PREFIX;
use crate::ldap::{DirectoryObject, LdapClient, LdapQueryData, NamingContext};
use crate::models::EnumerationDomain;
use crate::producers::{emit, stream_config_nc, ObjectProducer, ProducerContext};

const STEALTH_USER_FILTER: &str =
    "(&(samaccounttype=805306368)(|(homedirectory=*)(scriptpath=*)(profilepath=*)))";
const PATH_ATTRIBUTES: &[&str] = &["homedirectory", "scriptpath", "profilepath"];

/// The stealth target set, keyed by computer SID. Built on first use and
/// reused for the rest of the process, including loop passes.
#[derive(Default)]
pub struct StealthTargets {
    cell: OnceCell<HashMap<String, DirectoryObject>>,
}

impl StealthTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the target set on first call; later calls (and later loop
    /// passes) await the same build and share its result.
    pub async fn get_or_build(
        &self,
        client: &dyn LdapClient,
        domains: &[EnumerationDomain],
        attributes: &[&str],
        exclude_dcs: bool,
    ) -> Result<&HashMap<String, DirectoryObject>> {
        self.cell
            .get_or_try_init(|| build_targets(client, domains, attributes, exclude_dcs))
            .await
    }
}

async fn build_targets(
    client: &dyn LdapClient,
    domains: &[EnumerationDomain],
    attributes: &[&str],
    exclude_dcs: bool,
) -> Result<HashMap<String, DirectoryObject>> {
    let query = LdapQueryData {
        filter: STEALTH_USER_FILTER.to_string(),
        attributes: PATH_ATTRIBUTES.to_vec(),
    };
    let mut targets: HashMap<String, DirectoryObject> = HashMap::new();

    for domain in domains {
        // Step one: hosts referenced from user attribute paths.
        let mut hosts: HashSet<String> = HashSet::new();
        let mut stream = match client
            .paged_search(&domain.name, NamingContext::Default, None, &query)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Stealth user query failed for {}: {}", domain.name, e);
                continue;
            }
        };
        while let Some(item) = stream.next().await {
            match item {
                Ok(object) => {
                    for &attr in PATH_ATTRIBUTES {
                        if let Some(host) = object.get(attr).and_then(extract_unc_host) {
                            hosts.insert(host.to_uppercase());
                        }
                    }
                }
                Err(e) => {
                    warn!("Result failure during stealth build for {}: {}", domain.name, e);
                    break;
                }
            }
        }
        debug!("{} candidate hosts from {}", hosts.len(), domain.name);

        // Step two: resolve hosts to SIDs and fetch their entries.
        for host in hosts {
            let sid = match client.resolve_host_sid(&domain.name, &host).await {
                Ok(Some(sid)) => sid,
                Ok(None) => {
                    debug!("Host {} did not resolve to a SID", host);
                    continue;
                }
                Err(e) => {
                    warn!("Host resolution failed for {}: {}", host, e);
                    continue;
                }
            };
            if !sid.starts_with(NT_AUTHORITY_SID_PREFIX) {
                continue;
            }
            match client.entry_by_sid(&domain.name, &sid, attributes).await {
                Ok(Some(object)) => {
                    targets.insert(sid.to_uppercase(), object);
                }
                Ok(None) => debug!("No directory entry for {}", sid),
                Err(e) => warn!("Entry fetch failed for {}: {}", sid, e),
            }
        }

        // Step three: the domain controllers, unless excluded.
        if !exclude_dcs {
            match client.domain_controllers(&domain.name).await {
                Ok(dcs) => {
                    for dc in dcs {
                        if let Some(sid) = dc.security_identifier().map(str::to_uppercase) {
                            targets.insert(sid, dc);
                        }
                    }
                }
                Err(e) => warn!(
                    "Domain controller query failed for {}: {}",
                    domain.name, e
                ),
            }
        }
    }

    info!("Stealth target set built: {} computers", targets.len());
    Ok(targets)
}

/// Extract the host component of a UNC path: `\\host\share\dir` → `host`.
pub fn extract_unc_host(path: &str) -> Option<String> {
    let rest = path
        .strip_prefix("\\\\")
        .or_else(|| path.strip_prefix("//"))?;
    let host: String = rest
        .chars()
        .take_while(|c| *c != '\\' && *c != '/')
        .collect();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

pub struct StealthProducer {
    ctx: ProducerContext,
    targets: std::sync::Arc<StealthTargets>,
    exclude_dcs: bool,
}

impl StealthProducer {
    pub fn new(
        ctx: ProducerContext,
        targets: std::sync::Arc<StealthTargets>,
        exclude_dcs: bool,
    ) -> Self {
        Self {
            ctx,
            targets,
            exclude_dcs,
        }
    }
}

#[async_trait]
impl ObjectProducer for StealthProducer {
    async fn produce(&self) -> Result<()> {
        let targets = self
            .targets
            .get_or_build(
                self.ctx.client.as_ref(),
                &self.ctx.domains,
                &self.ctx.default_nc.attributes,
                self.exclude_dcs,
            )
            .await?;
        for object in targets.values() {
            if !emit(&self.ctx, object.clone()).await {
                break;
            }
        }
        Ok(())
    }

    async fn produce_config_nc(&self) -> Result<()> {
        stream_config_nc(&self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::default_nc_data;
    use crate::methods::CollectionMethods;
    use crate::test_utils::{computer_object, user_object, MockDirectory};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_extract_unc_host() {
        assert_eq!(
            extract_unc_host("\\\\fs01.example.local\\home\\jdoe"),
            Some("fs01.example.local".to_string())
        );
        assert_eq!(
            extract_unc_host("//fs01/profiles/jdoe"),
            Some("fs01".to_string())
        );
        assert_eq!(extract_unc_host("C:\\local\\path"), None);
        assert_eq!(extract_unc_host("\\\\"), None);
    }

    fn stealth_mock() -> MockDirectory {
        let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        let user = user_object("jdoe", "S-1-5-21-1-1-1-1105", "example.local")
            .with_attribute("homeDirectory", vec!["\\\\fs01\\home\\jdoe".into()]);
        mock.add_stealth_user("example.local", user);
        mock.add_host("example.local", "fs01", "S-1-5-21-1-1-1-2000");
        mock.add_entry(computer_object("FS01$", "S-1-5-21-1-1-1-2000", "example.local"));
        mock.add_domain_controller(
            "example.local",
            computer_object("DC01$", "S-1-5-21-1-1-1-1000", "example.local"),
        );
        mock
    }

    #[tokio::test]
    async fn test_build_includes_path_hosts_and_dcs() {
        let mock = stealth_mock();
        let targets = StealthTargets::new();
        let domains = vec![EnumerationDomain::new("example.local", "S-1-5-21-1-1-1")];
        let built = targets
            .get_or_build(&mock, &domains, &["objectsid"], false)
            .await
            .unwrap();
        assert_eq!(built.len(), 2);
        assert!(built.contains_key("S-1-5-21-1-1-1-2000"));
        assert!(built.contains_key("S-1-5-21-1-1-1-1000"));
    }

    #[tokio::test]
    async fn test_exclude_dcs_drops_controllers() {
        let mock = stealth_mock();
        let targets = StealthTargets::new();
        let domains = vec![EnumerationDomain::new("example.local", "S-1-5-21-1-1-1")];
        let built = targets
            .get_or_build(&mock, &domains, &["objectsid"], true)
            .await
            .unwrap();
        assert_eq!(built.len(), 1);
        assert!(built.contains_key("S-1-5-21-1-1-1-2000"));
    }

    #[tokio::test]
    async fn test_target_set_is_built_once() {
        let mock = stealth_mock();
        let targets = StealthTargets::new();
        let domains = vec![EnumerationDomain::new("example.local", "S-1-5-21-1-1-1")];
        targets
            .get_or_build(&mock, &domains, &["objectsid"], false)
            .await
            .unwrap();
        targets
            .get_or_build(&mock, &domains, &["objectsid"], false)
            .await
            .unwrap();
        assert_eq!(mock.stealth_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_streams_target_set() {
        let mock = stealth_mock();
        let (tx, mut rx) = mpsc::channel(16);
        let ctx = ProducerContext {
            client: Arc::new(mock),
            domains: vec![EnumerationDomain::new("example.local", "S-1-5-21-1-1-1")],
            sender: tx,
            cancel: CancellationToken::new(),
            flags: Arc::new(crate::context::RunFlags::default()),
            search_base: None,
            default_nc: default_nc_data(CollectionMethods::SESSION, None, false),
            config_nc: Default::default(),
        };
        let producer = StealthProducer::new(ctx, Arc::new(StealthTargets::new()), true);
        producer.produce().await.unwrap();
        drop(producer);

        let mut sids = Vec::new();
        while let Some(object) = rx.recv().await {
            sids.push(object.security_identifier().unwrap().to_string());
        }
        assert_eq!(sids, vec!["S-1-5-21-1-1-1-2000".to_string()]);
    }
}

//! Production transport backed by the `ldap3` crate.
//!
//! One connection is opened per target domain and shared through a pool;
//! `ldap3`'s handles multiplex, so cloned handles reuse the underlying
//! connection. Binary attributes are stringified here so the rest of the
//! pipeline only ever sees text.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::exop::{WhoAmI, WhoAmIResp};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::constants::{LDAPS_PORT, LDAP_PAGE_SIZE, LDAP_PORT, UNKNOWN_SID};
use crate::ldap::client::{LdapClient, LdapConnectionOptions, NamingContext, ObjectStream};
use crate::ldap::directory_object::DirectoryObject;
use crate::ldap::queries::LdapQueryData;
use crate::models::{EnumerationDomain, TrustDirection, TrustRecord};

const ROOT_DSE_ATTRS: &[&str] = &["defaultNamingContext", "configurationNamingContext"];
const COMPUTER_ATTRS: &[&str] = &[
    "objectsid",
    "objectguid",
    "distinguishedname",
    "samaccountname",
    "samaccounttype",
    "objectclass",
    "dnshostname",
    "operatingsystem",
    "useraccountcontrol",
];

#[derive(Clone)]
struct DomainConnection {
    ldap: Ldap,
    default_nc: String,
    config_nc: String,
}

/// [`LdapClient`] implementation speaking to real domain controllers.
pub struct Ldap3Client {
    options: LdapConnectionOptions,
    pool: Mutex<HashMap<String, DomainConnection>>,
}

impl Ldap3Client {
    pub fn new(options: LdapConnectionOptions) -> Self {
        Self {
            options,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or establish the pooled connection for a domain.
    async fn connection(&self, domain: &str) -> Result<DomainConnection> {
        let key = domain.to_uppercase();
        let mut pool = self.pool.lock().await;
        if let Some(conn) = pool.get(&key) {
            return Ok(conn.clone());
        }
        let conn = self.open(domain).await?;
        pool.insert(key, conn.clone());
        Ok(conn)
    }

    async fn open(&self, domain: &str) -> Result<DomainConnection> {
        let host = self
            .options
            .domain_controller
            .clone()
            .unwrap_or_else(|| domain.to_string());
        let port = match self.options.port {
            0 if self.options.secure => LDAPS_PORT,
            0 => LDAP_PORT,
            p => p,
        };

        if !self.options.skip_port_check {
            check_port(&host, port, self.options.port_check_timeout_ms)
                .await
                .context(format!("Port check failed for {}:{}", host, port))?;
        }

        let scheme = if self.options.secure { "ldaps" } else { "ldap" };
        let url = format!("{}://{}:{}", scheme, host, port);
        debug!("Connecting to {}", url);
        if self.options.disable_signing {
            debug!("LDAP signing requirement disabled by configuration");
        }

        let settings =
            LdapConnSettings::new().set_no_tls_verify(self.options.disable_cert_verification);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .context(format!("Failed to connect to {}", url))?;
        ldap3::drive!(conn);

        if let (Some(user), Some(pass)) = (&self.options.username, &self.options.password) {
            let bind_name = if user.contains('@') || user.contains('\\') {
                user.clone()
            } else {
                format!("{}@{}", user, domain)
            };
            ldap.simple_bind(&bind_name, pass)
                .await
                .context("Bind request failed")?
                .success()
                .context(format!("Bind rejected for {}", bind_name))?;
        }

        let (default_nc, config_nc) = read_root_dse(&mut ldap, domain).await?;
        Ok(DomainConnection {
            ldap,
            default_nc,
            config_nc,
        })
    }

    async fn simple_search(
        &self,
        domain: &str,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryObject>> {
        let mut conn = self.connection(domain).await?;
        let (entries, _res) = conn
            .ldap
            .search(base, scope, filter, attrs.to_vec())
            .await
            .context("Search request failed")?
            .success()
            .context(format!("Search failed under {}", base))?;
        Ok(entries
            .into_iter()
            .map(|e| entry_to_object(SearchEntry::construct(e)))
            .collect())
    }
}

#[async_trait]
impl LdapClient for Ldap3Client {
    async fn test_connection(&self, domain: &str) -> Result<()> {
        let conn = self.connection(domain).await?;
        debug!(
            "Connected to {} (default NC {})",
            domain, conn.default_nc
        );
        if self.options.username.is_some() && !self.options.skip_password_check {
            // The bind in open() already validated the credentials; a pooled
            // hit means they were validated earlier in this run.
            debug!("Credentials verified for {}", domain);
        }
        Ok(())
    }

    async fn current_domain(&self) -> Result<Option<String>> {
        // Without a Windows machine context the only reliable source is an
        // explicitly configured domain controller.
        let Some(host) = self.options.domain_controller.clone() else {
            return Ok(None);
        };
        let conn = self.connection(&host).await?;
        let domain = crate::ldap::directory_object::dn_to_domain(&conn.default_nc);
        Ok(if domain.is_empty() { None } else { Some(domain) })
    }

    async fn current_user(&self, domain: &str) -> Result<String> {
        let mut conn = self.connection(domain).await?;
        let (exop, _res) = conn
            .ldap
            .extended(WhoAmI)
            .await
            .context("WhoAmI request failed")?
            .success()
            .context("WhoAmI rejected")?;
        let resp: WhoAmIResp = exop.parse();
        // AD answers "u:DOMAIN\user"; keep the bare account name.
        let authzid = resp.authzid;
        let name = authzid
            .rsplit(['\\', ':'])
            .next()
            .unwrap_or(&authzid)
            .to_string();
        if name.is_empty() {
            bail!("WhoAmI returned an empty identity");
        }
        Ok(name)
    }

    async fn domain_sid(&self, domain: &str) -> Result<Option<String>> {
        let conn = self.connection(domain).await?;
        let base = conn.default_nc.clone();
        let objects = self
            .simple_search(domain, &base, Scope::Base, "(objectclass=*)", &["objectsid"])
            .await?;
        Ok(objects
            .first()
            .and_then(|o| o.security_identifier())
            .map(str::to_string))
    }

    async fn forest_domains(&self, domain: &str) -> Result<Vec<EnumerationDomain>> {
        let conn = self.connection(domain).await?;
        let base = format!("CN=Partitions,{}", conn.config_nc);
        let crossrefs = self
            .simple_search(
                domain,
                &base,
                Scope::OneLevel,
                "(&(objectclass=crossref)(systemflags:1.2.840.113556.1.4.803:=2))",
                &["dnsroot", "ncname"],
            )
            .await?;

        let mut domains = Vec::new();
        for crossref in crossrefs {
            let Some(dns_root) = crossref.get("dnsroot") else {
                continue;
            };
            let dns_root = dns_root.to_string();
            let sid = match self.domain_sid(&dns_root).await {
                Ok(Some(sid)) => sid,
                Ok(None) => UNKNOWN_SID.to_string(),
                Err(e) => {
                    warn!("Could not resolve SID for forest domain {}: {}", dns_root, e);
                    UNKNOWN_SID.to_string()
                }
            };
            domains.push(EnumerationDomain::new(&dns_root, &sid));
        }
        Ok(domains)
    }

    async fn domain_trusts(&self, domain: &str) -> Result<Vec<TrustRecord>> {
        let conn = self.connection(domain).await?;
        let base = conn.default_nc.clone();
        let entries = self
            .simple_search(
                domain,
                &base,
                Scope::Subtree,
                "(objectclass=trusteddomain)",
                &["trustpartner", "securityidentifier", "trustdirection"],
            )
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let partner = entry.get("trustpartner")?.to_string();
                let direction = entry
                    .get("trustdirection")
                    .and_then(|v| v.parse::<u32>().ok())
                    .map(TrustDirection::from_attribute)
                    .unwrap_or(TrustDirection::Disabled);
                let sid = entry
                    .get("securityidentifier")
                    .map(str::to_string)
                    .unwrap_or_else(|| UNKNOWN_SID.to_string());
                Some(TrustRecord {
                    target_name: partner.to_uppercase(),
                    target_sid: sid.to_uppercase(),
                    direction,
                })
            })
            .collect())
    }

    async fn paged_search(
        &self,
        domain: &str,
        nc: NamingContext,
        search_base: Option<&str>,
        query: &LdapQueryData,
    ) -> Result<ObjectStream> {
        let conn = self.connection(domain).await?;
        let base = match (nc, search_base) {
            (NamingContext::Default, Some(base)) => base.to_string(),
            (NamingContext::Default, None) => conn.default_nc.clone(),
            (NamingContext::Configuration, _) => conn.config_nc.clone(),
        };
        let filter = query.filter.clone();
        let attrs: Vec<String> = query.attributes.iter().map(|a| a.to_string()).collect();
        let mut ldap = conn.ldap.clone();
        let domain = domain.to_string();

        let (tx, rx) = mpsc::channel::<Result<DirectoryObject>>(LDAP_PAGE_SIZE as usize);
        tokio::spawn(async move {
            let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
                Box::new(EntriesOnly::new()),
                Box::new(PagedResults::new(LDAP_PAGE_SIZE)),
            ];
            let mut search = match ldap
                .streaming_search_with(adapters, &base, Scope::Subtree, &filter, attrs)
                .await
            {
                Ok(search) => search,
                Err(e) => {
                    let _ = tx
                        .send(Err(anyhow!(e).context(format!(
                            "Paged search could not start for {}",
                            domain
                        ))))
                        .await;
                    return;
                }
            };
            loop {
                match search.next().await {
                    Ok(Some(entry)) => {
                        let object = entry_to_object(SearchEntry::construct(entry));
                        if tx.send(Ok(object)).await.is_err() {
                            // Receiver dropped: the run was cancelled.
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow!(e)
                                .context(format!("Paged search failed for {}", domain))))
                            .await;
                        break;
                    }
                }
            }
            let _ = search.finish().await;
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn entry_by_sid(
        &self,
        domain: &str,
        sid: &str,
        attributes: &[&str],
    ) -> Result<Option<DirectoryObject>> {
        let conn = self.connection(domain).await?;
        let base = conn.default_nc.clone();
        let filter = format!("(objectsid={})", ldap_escape(sid));
        let mut objects = self
            .simple_search(domain, &base, Scope::Subtree, &filter, attributes)
            .await?;
        Ok(if objects.is_empty() {
            None
        } else {
            Some(objects.swap_remove(0))
        })
    }

    async fn resolve_host_sid(&self, domain: &str, host: &str) -> Result<Option<String>> {
        let conn = self.connection(domain).await?;
        let base = conn.default_nc.clone();
        let short = host.split('.').next().unwrap_or(host);
        let filter = format!(
            "(&(samaccounttype=805306369)(|(dnshostname={})(samaccountname={}$)))",
            ldap_escape(host),
            ldap_escape(short)
        );
        let objects = self
            .simple_search(domain, &base, Scope::Subtree, &filter, &["objectsid"])
            .await?;
        Ok(objects
            .first()
            .and_then(|o| o.security_identifier())
            .map(str::to_string))
    }

    async fn domain_controllers(&self, domain: &str) -> Result<Vec<DirectoryObject>> {
        let conn = self.connection(domain).await?;
        let base = conn.default_nc.clone();
        self.simple_search(
            domain,
            &base,
            Scope::Subtree,
            "(&(samaccounttype=805306369)(useraccountcontrol:1.2.840.113556.1.4.803:=8192))",
            COMPUTER_ATTRS,
        )
        .await
    }
}

/// TCP reachability probe run before the LDAP handshake.
async fn check_port(host: &str, port: u16, timeout_ms: u64) -> Result<()> {
    let target = format!("{}:{}", host, port);
    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        TcpStream::connect(target.as_str()),
    )
    .await
    {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(anyhow!(e).context(format!("{} unreachable", target))),
        Err(_) => bail!("{} did not answer within {}ms", target, timeout_ms),
    }
}

async fn read_root_dse(ldap: &mut Ldap, domain: &str) -> Result<(String, String)> {
    let (entries, _res) = ldap
        .search("", Scope::Base, "(objectclass=*)", ROOT_DSE_ATTRS.to_vec())
        .await
        .context("rootDSE request failed")?
        .success()
        .context("rootDSE read failed")?;
    let entry = entries
        .into_iter()
        .next()
        .map(SearchEntry::construct)
        .context(format!("Empty rootDSE response from {}", domain))?;

    let default_nc = entry
        .attrs
        .get("defaultNamingContext")
        .and_then(|v| v.first())
        .cloned()
        .context("rootDSE missing defaultNamingContext")?;
    let config_nc = entry
        .attrs
        .get("configurationNamingContext")
        .and_then(|v| v.first())
        .cloned()
        .unwrap_or_else(|| format!("CN=Configuration,{}", default_nc));
    Ok((default_nc, config_nc))
}

/// Convert a raw search entry, stringifying the binary attributes the
/// pipeline cares about.
fn entry_to_object(entry: SearchEntry) -> DirectoryObject {
    let mut object = DirectoryObject::new();
    object.set("distinguishedname", vec![entry.dn.clone()]);
    for (name, values) in entry.attrs {
        object.set(&name, values);
    }
    for (name, values) in entry.bin_attrs {
        let decoded: Vec<String> = values
            .iter()
            .map(|raw| match name.to_lowercase().as_str() {
                "objectsid" | "securityidentifier" => {
                    decode_sid(raw).unwrap_or_else(|| BASE64.encode(raw))
                }
                "objectguid" => decode_guid(raw).unwrap_or_else(|| BASE64.encode(raw)),
                _ => BASE64.encode(raw),
            })
            .collect();
        object.set(&name, decoded);
    }
    object
}

/// Decode a binary security descriptor owner SID blob to S-1-... form.
fn decode_sid(raw: &[u8]) -> Option<String> {
    if raw.len() < 8 {
        return None;
    }
    let revision = raw[0];
    let sub_count = raw[1] as usize;
    if raw.len() != 8 + sub_count * 4 {
        return None;
    }
    let authority = raw[2..8]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    let mut sid = format!("S-{}-{}", revision, authority);
    for i in 0..sub_count {
        let offset = 8 + i * 4;
        let sub = u32::from_le_bytes([
            raw[offset],
            raw[offset + 1],
            raw[offset + 2],
            raw[offset + 3],
        ]);
        sid.push_str(&format!("-{}", sub));
    }
    Some(sid)
}

/// Decode the mixed-endian binary GUID format used by AD.
fn decode_guid(raw: &[u8]) -> Option<String> {
    if raw.len() != 16 {
        return None;
    }
    let d1 = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let d2 = u16::from_le_bytes([raw[4], raw[5]]);
    let d3 = u16::from_le_bytes([raw[6], raw[7]]);
    Some(format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        d1, d2, d3, raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15]
    ))
}

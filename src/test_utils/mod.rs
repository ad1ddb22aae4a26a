//! Test support: an in-memory directory implementing [`LdapClient`].
//!
//! Used by the unit tests in this crate and by the integration tests under
//! `tests/`; it is not part of the public collection API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::StreamExt;

use crate::ldap::{
    DirectoryObject, LdapClient, LdapQueryData, NamingContext, ObjectStream,
};
use crate::models::{EnumerationDomain, TrustDirection, TrustRecord};

/// One mocked domain's content.
#[derive(Debug, Default, Clone)]
pub struct MockDomain {
    pub sid: String,
    pub trusts: Vec<TrustRecord>,
    pub forest: Vec<EnumerationDomain>,
    pub objects: Vec<DirectoryObject>,
    pub config_objects: Vec<DirectoryObject>,
    pub stealth_users: Vec<DirectoryObject>,
    pub domain_controllers: Vec<DirectoryObject>,
    pub hosts: HashMap<String, String>,
    /// When set, the default-NC stream yields this many objects and then a
    /// per-result error.
    pub error_after: Option<usize>,
    /// When set, forest enumeration fails for this domain.
    pub fail_forest: bool,
}

/// In-memory [`LdapClient`] for exercising the pipeline without a network.
#[derive(Debug, Default)]
pub struct MockDirectory {
    pub current_domain: Option<String>,
    pub current_user: String,
    pub fail_connections: bool,
    /// Number of stealth target queries served, for build-once assertions.
    pub stealth_queries: AtomicUsize,
    domains: HashMap<String, MockDomain>,
    entries: HashMap<String, DirectoryObject>,
}

impl MockDirectory {
    pub fn new(domain: &str, sid: &str) -> Self {
        let mut mock = Self {
            current_domain: Some(domain.to_uppercase()),
            current_user: "MOCKADMIN".to_string(),
            ..Self::default()
        };
        mock.add_domain(domain, sid);
        mock
    }

    pub fn add_domain(&mut self, name: &str, sid: &str) {
        self.domains.insert(
            name.to_uppercase(),
            MockDomain {
                sid: sid.to_uppercase(),
                ..MockDomain::default()
            },
        );
    }

    fn domain_mut(&mut self, name: &str) -> &mut MockDomain {
        self.domains
            .entry(name.to_uppercase())
            .or_insert_with(MockDomain::default)
    }

    fn domain(&self, name: &str) -> Result<&MockDomain> {
        self.domains
            .get(&name.to_uppercase())
            .ok_or_else(|| anyhow!("unknown domain {}", name))
    }

    pub fn set_forest(&mut self, name: &str, forest: Vec<EnumerationDomain>) {
        self.domain_mut(name).forest = forest;
    }

    pub fn add_trust(
        &mut self,
        name: &str,
        target_name: &str,
        target_sid: &str,
        direction: TrustDirection,
    ) {
        self.domain_mut(name).trusts.push(TrustRecord {
            target_name: target_name.to_uppercase(),
            target_sid: target_sid.to_uppercase(),
            direction,
        });
    }

    /// Add a default-NC object, indexing it by SID for entry lookups.
    pub fn add_object(&mut self, name: &str, object: DirectoryObject) {
        self.index_entry(&object);
        self.domain_mut(name).objects.push(object);
    }

    pub fn add_config_object(&mut self, name: &str, object: DirectoryObject) {
        self.domain_mut(name).config_objects.push(object);
    }

    pub fn add_stealth_user(&mut self, name: &str, object: DirectoryObject) {
        self.domain_mut(name).stealth_users.push(object);
    }

    pub fn add_domain_controller(&mut self, name: &str, object: DirectoryObject) {
        self.index_entry(&object);
        self.domain_mut(name).domain_controllers.push(object);
    }

    pub fn add_host(&mut self, name: &str, host: &str, sid: &str) {
        self.domain_mut(name)
            .hosts
            .insert(host.to_uppercase(), sid.to_uppercase());
    }

    /// Register an entry reachable only by SID lookup.
    pub fn add_entry(&mut self, object: DirectoryObject) {
        self.index_entry(&object);
    }

    pub fn set_error_after(&mut self, name: &str, after: usize) {
        self.domain_mut(name).error_after = Some(after);
    }

    pub fn set_fail_forest(&mut self, name: &str) {
        self.domain_mut(name).fail_forest = true;
    }

    fn index_entry(&mut self, object: &DirectoryObject) {
        if let Some(sid) = object.security_identifier() {
            self.entries.insert(sid.to_uppercase(), object.clone());
        }
    }
}

#[async_trait]
impl LdapClient for MockDirectory {
    async fn test_connection(&self, domain: &str) -> Result<()> {
        if self.fail_connections {
            bail!("connection refused");
        }
        self.domain(domain).map(|_| ())
    }

    async fn current_domain(&self) -> Result<Option<String>> {
        Ok(self.current_domain.clone())
    }

    async fn current_user(&self, _domain: &str) -> Result<String> {
        Ok(self.current_user.clone())
    }

    async fn domain_sid(&self, domain: &str) -> Result<Option<String>> {
        match self.domains.get(&domain.to_uppercase()) {
            Some(d) if !d.sid.is_empty() => Ok(Some(d.sid.clone())),
            Some(_) => Ok(None),
            None => bail!("unknown domain {}", domain),
        }
    }

    async fn forest_domains(&self, domain: &str) -> Result<Vec<EnumerationDomain>> {
        let mock = self.domain(domain)?;
        if mock.fail_forest {
            bail!("forest enumeration refused");
        }
        Ok(mock.forest.clone())
    }

    async fn domain_trusts(&self, domain: &str) -> Result<Vec<TrustRecord>> {
        Ok(self.domain(domain)?.trusts.clone())
    }

    async fn paged_search(
        &self,
        domain: &str,
        nc: NamingContext,
        _search_base: Option<&str>,
        query: &LdapQueryData,
    ) -> Result<ObjectStream> {
        let mock = self.domain(domain)?;
        let objects = match nc {
            NamingContext::Configuration => mock.config_objects.clone(),
            NamingContext::Default if query.filter.contains("homedirectory") => {
                self.stealth_queries.fetch_add(1, Ordering::SeqCst);
                mock.stealth_users.clone()
            }
            NamingContext::Default => mock.objects.clone(),
        };

        let mut items: Vec<Result<DirectoryObject>> = Vec::new();
        match (nc, mock.error_after) {
            (NamingContext::Default, Some(after)) => {
                for object in objects.into_iter().take(after) {
                    items.push(Ok(object));
                }
                items.push(Err(anyhow!("simulated result failure")));
            }
            _ => items.extend(objects.into_iter().map(Ok)),
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn entry_by_sid(
        &self,
        _domain: &str,
        sid: &str,
        _attributes: &[&str],
    ) -> Result<Option<DirectoryObject>> {
        Ok(self.entries.get(&sid.to_uppercase()).cloned())
    }

    async fn resolve_host_sid(&self, domain: &str, host: &str) -> Result<Option<String>> {
        Ok(self
            .domain(domain)?
            .hosts
            .get(&host.to_uppercase())
            .cloned())
    }

    async fn domain_controllers(&self, domain: &str) -> Result<Vec<DirectoryObject>> {
        Ok(self.domain(domain)?.domain_controllers.clone())
    }
}

/// Build a user object with the attributes the pipeline inspects.
pub fn user_object(sam: &str, sid: &str, domain: &str) -> DirectoryObject {
    DirectoryObject::new()
        .with_attribute("objectClass", vec!["top".into(), "person".into(), "user".into()])
        .with_attribute("sAMAccountName", vec![sam.to_string()])
        .with_attribute("sAMAccountType", vec!["805306368".into()])
        .with_attribute("objectSid", vec![sid.to_string()])
        .with_attribute(
            "distinguishedName",
            vec![format!("CN={},CN=Users,{}", sam, domain_dn(domain))],
        )
}

/// Build a computer object.
pub fn computer_object(sam: &str, sid: &str, domain: &str) -> DirectoryObject {
    let host = sam.trim_end_matches('$');
    DirectoryObject::new()
        .with_attribute(
            "objectClass",
            vec!["top".into(), "person".into(), "user".into(), "computer".into()],
        )
        .with_attribute("sAMAccountName", vec![sam.to_string()])
        .with_attribute("sAMAccountType", vec!["805306369".into()])
        .with_attribute("objectSid", vec![sid.to_string()])
        .with_attribute(
            "dNSHostName",
            vec![format!("{}.{}", host.to_lowercase(), domain.to_lowercase())],
        )
        .with_attribute(
            "distinguishedName",
            vec![format!("CN={},CN=Computers,{}", host, domain_dn(domain))],
        )
}

/// Build a group object.
pub fn group_object(sam: &str, sid: &str, domain: &str) -> DirectoryObject {
    DirectoryObject::new()
        .with_attribute("objectClass", vec!["top".into(), "group".into()])
        .with_attribute("sAMAccountName", vec![sam.to_string()])
        .with_attribute("sAMAccountType", vec!["268435456".into()])
        .with_attribute("objectSid", vec![sid.to_string()])
        .with_attribute(
            "distinguishedName",
            vec![format!("CN={},CN=Users,{}", sam, domain_dn(domain))],
        )
}

/// Build a domain head object.
pub fn domain_object(domain: &str, sid: &str) -> DirectoryObject {
    DirectoryObject::new()
        .with_attribute("objectClass", vec!["top".into(), "domain".into(), "domainDNS".into()])
        .with_attribute("objectSid", vec![sid.to_string()])
        .with_attribute("distinguishedName", vec![domain_dn(domain)])
}

fn domain_dn(domain: &str) -> String {
    domain
        .split('.')
        .map(|part| format!("DC={}", part.to_lowercase()))
        .collect::<Vec<_>>()
        .join(",")
}

//! The directory transport seam.
//!
//! Everything the pipeline needs from LDAP is behind [`LdapClient`], so the
//! orchestration engine can be exercised against an in-memory directory in
//! tests and against a real domain controller in production.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::constants::DEFAULT_PORT_CHECK_TIMEOUT_MS;
use crate::ldap::directory_object::DirectoryObject;
use crate::ldap::queries::LdapQueryData;
use crate::models::{EnumerationDomain, TrustRecord};

/// Which directory partition a search targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingContext {
    /// The domain partition.
    Default,
    /// The forest-wide configuration partition.
    Configuration,
}

/// Connection settings resolved from the CLI.
#[derive(Debug, Clone)]
pub struct LdapConnectionOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Explicit domain controller to pin every connection to.
    pub domain_controller: Option<String>,
    /// Explicit port; 0 selects 389/636 based on `secure`.
    pub port: u16,
    pub secure: bool,
    pub disable_cert_verification: bool,
    pub disable_signing: bool,
    pub skip_port_check: bool,
    pub port_check_timeout_ms: u64,
    pub skip_password_check: bool,
}

impl Default for LdapConnectionOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            domain_controller: None,
            port: 0,
            secure: false,
            disable_cert_verification: false,
            disable_signing: false,
            skip_port_check: false,
            port_check_timeout_ms: DEFAULT_PORT_CHECK_TIMEOUT_MS,
            skip_password_check: false,
        }
    }
}

/// A stream of directory entries from a paged search. Individual items may
/// fail without tearing down the stream's transport.
pub type ObjectStream = BoxStream<'static, Result<DirectoryObject>>;

/// Async directory operations used by the collection pipeline.
#[async_trait]
pub trait LdapClient: Send + Sync {
    /// Probe connectivity against a domain before enumeration starts.
    async fn test_connection(&self, domain: &str) -> Result<()>;

    /// The DNS name of the domain this host (or these credentials) belongs
    /// to, when one can be determined.
    async fn current_domain(&self) -> Result<Option<String>>;

    /// The authenticated user's account name, for session attribution.
    async fn current_user(&self, domain: &str) -> Result<String>;

    /// The SID of a domain, when resolvable.
    async fn domain_sid(&self, domain: &str) -> Result<Option<String>>;

    /// All domains of the forest the given domain belongs to.
    async fn forest_domains(&self, domain: &str) -> Result<Vec<EnumerationDomain>>;

    /// Trust relationships recorded on a domain.
    async fn domain_trusts(&self, domain: &str) -> Result<Vec<TrustRecord>>;

    /// Issue one paged search and stream its results.
    async fn paged_search(
        &self,
        domain: &str,
        nc: NamingContext,
        search_base: Option<&str>,
        query: &LdapQueryData,
    ) -> Result<ObjectStream>;

    /// Fetch a single entry by SID.
    async fn entry_by_sid(
        &self,
        domain: &str,
        sid: &str,
        attributes: &[&str],
    ) -> Result<Option<DirectoryObject>>;

    /// Resolve a hostname to the SID of its computer account.
    async fn resolve_host_sid(&self, domain: &str, host: &str) -> Result<Option<String>>;

    /// The domain controller computer objects of a domain.
    async fn domain_controllers(&self, domain: &str) -> Result<Vec<DirectoryObject>>;
}

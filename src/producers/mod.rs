//! Producer strategies feeding the object channel.
//!
//! Every producer exposes two operations: `produce` streams the domain
//! partition and `produce_config_nc` streams the configuration partition
//! (a no-op for strategies without one). Producers check the cancellation
//! token before each emission and abandon partial streams when it fires.

mod computer_file;
mod ldap;
mod stealth;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::RunFlags;
use crate::ldap::{DirectoryObject, LdapClient, LdapQueryData, NamingContext};
use crate::models::EnumerationDomain;

pub use computer_file::ComputerFileProducer;
pub use ldap::LdapProducer;
pub use stealth::{extract_unc_host, StealthProducer, StealthTargets};

/// Everything a producer needs: the transport, the targets, the channel
/// and the prepared queries for both naming contexts.
pub struct ProducerContext {
    pub client: Arc<dyn LdapClient>,
    pub domains: Vec<EnumerationDomain>,
    pub sender: mpsc::Sender<DirectoryObject>,
    pub cancel: CancellationToken,
    pub flags: Arc<RunFlags>,
    pub search_base: Option<String>,
    pub default_nc: LdapQueryData,
    pub config_nc: LdapQueryData,
}

impl ProducerContext {
    /// True when either cancellation signal asks producers to stop: the
    /// hard token or the deferred next-safe-point request.
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .flags
                .needs_cancellation
                .load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// A strategy for producing directory objects into the pipeline.
#[async_trait]
pub trait ObjectProducer: Send + Sync {
    /// Stream the default naming context.
    async fn produce(&self) -> Result<()>;

    /// Stream the configuration naming context, when the strategy has one.
    async fn produce_config_nc(&self) -> Result<()>;
}

/// Send one object, giving up when the run is cancelled (hard or deferred)
/// or the pipeline has shut down. Returns false when the producer should
/// stop.
pub(crate) async fn emit(ctx: &ProducerContext, object: DirectoryObject) -> bool {
    if ctx.should_stop() {
        return false;
    }
    tokio::select! {
        _ = ctx.cancel.cancelled() => false,
        sent = ctx.sender.send(object) => sent.is_ok(),
    }
}

/// Shared configuration-partition pass used by the LDAP and stealth
/// strategies: one paged query per target domain with the config-NC filter
/// and attribute projection.
pub(crate) async fn stream_config_nc(ctx: &ProducerContext) -> Result<()> {
    if ctx.config_nc.is_empty() {
        debug!("No configuration naming context query for this method set");
        return Ok(());
    }
    for domain in &ctx.domains {
        if ctx.should_stop() {
            break;
        }
        stream_domain(ctx, domain, NamingContext::Configuration, &ctx.config_nc).await;
    }
    Ok(())
}

/// Stream one paged query into the channel. A hard query failure or a
/// per-result failure breaks this stream only; other domains proceed.
pub(crate) async fn stream_domain(
    ctx: &ProducerContext,
    domain: &EnumerationDomain,
    nc: NamingContext,
    query: &LdapQueryData,
) {
    let mut stream = match ctx
        .client
        .paged_search(&domain.name, nc, ctx.search_base.as_deref(), query)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Search could not start for {}: {}", domain.name, e);
            return;
        }
    };

    let mut produced = 0u64;
    while let Some(item) = stream.next().await {
        match item {
            Ok(object) => {
                if !emit(ctx, object).await {
                    debug!("Emission stopped for {} after {} objects", domain.name, produced);
                    return;
                }
                produced += 1;
            }
            Err(e) => {
                warn!("Result failure for {}, breaking stream: {}", domain.name, e);
                break;
            }
        }
    }
    debug!("Produced {} objects from {}", produced, domain.name);
}

//! The fixed orchestration chain.
//!
//! A run is a linear sequence of named links executed over one mutable
//! [`RunContext`]. A link failure never propagates: it is logged, the
//! context is marked faulted, and the remaining links are skipped — except
//! that the cache is still persisted and the run still finishes cleanly
//! once `InitCommonLib` has succeeded.

pub mod enumeration;
pub mod init;
pub mod looping;

use anyhow::{anyhow, Result};
use log::debug;

use crate::context::RunContext;

/// One step of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Initialize,
    TestConnection,
    SetSessionUserName,
    InitCommonLib,
    GetDomainsForEnumeration,
    StartBaseCollectionTask,
    AwaitBaseRunCompletion,
    StartLoopTimer,
    StartLoop,
    AwaitLoopCompletion,
    DisposeTimer,
    SaveCacheFile,
    Finish,
}

/// The chain, in execution order.
pub const CHAIN: &[Link] = &[
    Link::Initialize,
    Link::TestConnection,
    Link::SetSessionUserName,
    Link::InitCommonLib,
    Link::GetDomainsForEnumeration,
    Link::StartBaseCollectionTask,
    Link::AwaitBaseRunCompletion,
    Link::StartLoopTimer,
    Link::StartLoop,
    Link::AwaitLoopCompletion,
    Link::DisposeTimer,
    Link::SaveCacheFile,
    Link::Finish,
];

impl Link {
    pub fn name(self) -> &'static str {
        match self {
            Link::Initialize => "Initialize",
            Link::TestConnection => "TestConnection",
            Link::SetSessionUserName => "SetSessionUserName",
            Link::InitCommonLib => "InitCommonLib",
            Link::GetDomainsForEnumeration => "GetDomainsForEnumeration",
            Link::StartBaseCollectionTask => "StartBaseCollectionTask",
            Link::AwaitBaseRunCompletion => "AwaitBaseRunCompletion",
            Link::StartLoopTimer => "StartLoopTimer",
            Link::StartLoop => "StartLoop",
            Link::AwaitLoopCompletion => "AwaitLoopCompletion",
            Link::DisposeTimer => "DisposeTimer",
            Link::SaveCacheFile => "SaveCacheFile",
            Link::Finish => "Finish",
        }
    }

    async fn execute(self, ctx: &mut RunContext) -> Result<()> {
        match self {
            Link::Initialize => init::initialize(ctx).await,
            Link::TestConnection => init::test_connection(ctx).await,
            Link::SetSessionUserName => init::set_session_username(ctx).await,
            Link::InitCommonLib => init::init_common_lib(ctx).await,
            Link::GetDomainsForEnumeration => enumeration::get_domains(ctx).await,
            Link::StartBaseCollectionTask => enumeration::start_base_collection_task(ctx).await,
            Link::AwaitBaseRunCompletion => enumeration::await_base_run_completion(ctx).await,
            Link::StartLoopTimer => looping::start_loop_timer(ctx).await,
            Link::StartLoop => looping::start_loop(ctx).await,
            Link::AwaitLoopCompletion => looping::await_loop_completion(ctx).await,
            Link::DisposeTimer => {
                ctx.dispose_timer();
                Ok(())
            }
            Link::SaveCacheFile => enumeration::save_cache_file(ctx).await,
            Link::Finish => enumeration::finish(ctx).await,
        }
    }
}

/// Execute the chain over the context. The timer is released on every exit
/// path, including fault short-circuits.
pub async fn run_chain(ctx: &mut RunContext) {
    for &link in CHAIN {
        if ctx.is_faulted && !runs_after_fault(link, ctx) {
            debug!("Skipping link {}", link.name());
            continue;
        }
        debug!("Executing link {}", link.name());
        if let Err(e) = link.execute(ctx).await {
            ctx.fault(&format!("Link {} failed: {:#}", link.name(), e));
        }
    }
    ctx.dispose_timer();
}

/// Links that still run after a fault: cache persistence and the closing
/// summary, but only once the common library came up and may hold state
/// worth keeping.
fn runs_after_fault(link: Link, ctx: &RunContext) -> bool {
    matches!(link, Link::SaveCacheFile | Link::Finish) && ctx.common_lib_initialized
}

/// Await whatever task handle was most recently assigned to the context.
pub(crate) async fn await_current_task(ctx: &mut RunContext) -> Result<()> {
    let Some(handle) = ctx.current_task.take() else {
        return Ok(());
    };
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(anyhow!(e).context("Collection task aborted")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::test_utils::MockDirectory;
    use clap::Parser;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context_for(extra: &[&str], mock: MockDirectory, dir: &TempDir) -> RunContext {
        let out = dir.path().to_string_lossy().to_string();
        let mut argv = vec!["adhound", "--output-directory", out.as_str()];
        argv.extend_from_slice(extra);
        let args = Args::parse_from(argv);
        RunContext::new(&args, Arc::new(mock)).unwrap()
    }

    #[tokio::test]
    async fn test_half_credentials_fault_before_any_enumeration() {
        let dir = TempDir::new().unwrap();
        let mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        let mut ctx = context_for(
            &["--domain", "example.local", "--ldap-username", "svc"],
            mock,
            &dir,
        );
        run_chain(&mut ctx).await;
        assert!(ctx.is_faulted);
        assert!(ctx.domain_list.is_empty());
        assert!(!ctx.common_lib_initialized);
        // No cache was written for a pre-init fault.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pre_init_fault_skips_cache_save() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        mock.fail_connections = true;
        let mut ctx = context_for(&["--domain", "example.local"], mock, &dir);
        run_chain(&mut ctx).await;
        assert!(ctx.is_faulted);
        // TestConnection faults before InitCommonLib, so nothing persists.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_discovery_fault_still_saves_cache() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        mock.set_fail_forest("example.local");
        let mut ctx = context_for(
            &["--domain", "example.local", "--search-forest"],
            mock,
            &dir,
        );
        run_chain(&mut ctx).await;
        assert!(ctx.is_faulted);
        assert!(ctx.common_lib_initialized);
        // The fault hit after InitCommonLib, so the cache was persisted.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_unset_domain_resolves_current() {
        let dir = TempDir::new().unwrap();
        let mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        let mut ctx = context_for(&[], mock, &dir);
        run_chain(&mut ctx).await;
        assert!(!ctx.is_faulted);
        assert_eq!(ctx.domain.as_deref(), Some("EXAMPLE.LOCAL"));
    }
}

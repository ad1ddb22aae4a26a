//! Chain links that validate configuration and bring the run up.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use crate::cache::{cache_file_path, ResolverCache};
use crate::constants::{DEFAULT_LOOP_DURATION_SECS, DEFAULT_LOOP_INTERVAL_SECS};
use crate::context::RunContext;

/// Validate flags, resolve the target domain, and normalize loop timing.
pub async fn initialize(ctx: &mut RunContext) -> Result<()> {
    if ctx.ldap_options.username.is_some() != ctx.ldap_options.password.is_some() {
        bail!("LDAP username and password must be provided together");
    }

    if ctx.domain.is_none() {
        match ctx.client.current_domain().await {
            Ok(Some(domain)) => {
                info!("Resolved current domain to {}", domain);
                ctx.domain = Some(domain);
            }
            Ok(None) => bail!("No domain specified and the current domain could not be resolved"),
            Err(e) => return Err(e.context("Current domain resolution failed")),
        }
    }
    ctx.domain = ctx.domain.take().map(|d| d.to_uppercase());

    if ctx.loop_enabled {
        if ctx.loop_duration.is_zero() {
            ctx.loop_duration = Duration::from_secs(DEFAULT_LOOP_DURATION_SECS);
            debug!("Loop duration defaulted to 2 hours");
        }
        if ctx.loop_interval.is_zero() {
            ctx.loop_interval = Duration::from_secs(DEFAULT_LOOP_INTERVAL_SECS);
            debug!("Loop interval defaulted to 30 seconds");
        }
    }

    if !ctx.output.no_output {
        verify_output_directory(&ctx.output.directory)?;
    }
    Ok(())
}

/// Probe the output directory by creating and deleting a marker file.
fn verify_output_directory(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".adhound_probe_{}", std::process::id()));
    fs::write(&probe, b"probe").context(format!(
        "Output directory {} is not writable",
        dir.display()
    ))?;
    fs::remove_file(&probe).context(format!(
        "Could not remove probe file in {}",
        dir.display()
    ))?;
    Ok(())
}

/// One connectivity probe against the initial domain.
pub async fn test_connection(ctx: &mut RunContext) -> Result<()> {
    let domain = ctx
        .domain
        .as_deref()
        .context("No domain resolved before TestConnection")?;
    ctx.client
        .test_connection(domain)
        .await
        .context(format!("LDAP connection test failed for {}", domain))?;
    info!("LDAP connection test passed for {}", domain);
    Ok(())
}

/// Resolve the account sessions are attributed to.
pub async fn set_session_username(ctx: &mut RunContext) -> Result<()> {
    if let Some(user) = &ctx.override_username {
        ctx.session_user_name = Some(user.to_uppercase());
        debug!("Session user overridden to {}", user);
        return Ok(());
    }
    let domain = ctx
        .domain
        .as_deref()
        .context("No domain resolved before SetSessionUserName")?;
    match ctx.client.current_user(domain).await {
        Ok(user) => {
            debug!("Session user resolved to {}", user);
            ctx.session_user_name = Some(user.to_uppercase());
        }
        Err(e) => warn!("Could not resolve the session user: {}", e),
    }
    Ok(())
}

/// Load the resolver cache and mark the common state as initialized.
pub async fn init_common_lib(ctx: &mut RunContext) -> Result<()> {
    let path = cache_file_path(
        &ctx.output.directory,
        ctx.cache_name.as_deref(),
        ctx.real_dns_name.as_deref(),
    );
    let cache = ResolverCache::load(&path, ctx.invalidate_cache);
    ctx.cache = std::sync::Arc::new(cache);
    ctx.common_lib_initialized = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::test_utils::MockDirectory;
    use clap::Parser;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context_for(extra: &[&str], dir: &TempDir) -> RunContext {
        let out = dir.path().to_string_lossy().to_string();
        let mut argv = vec!["adhound", "--output-directory", out.as_str()];
        argv.extend_from_slice(extra);
        let args = Args::parse_from(argv);
        let mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        RunContext::new(&args, Arc::new(mock)).unwrap()
    }

    #[tokio::test]
    async fn test_half_credentials_rejected() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context_for(&["--ldap-username", "svc"], &dir);
        assert!(initialize(&mut ctx).await.is_err());

        let mut ctx = context_for(&["--ldap-password", "hunter2"], &dir);
        assert!(initialize(&mut ctx).await.is_err());

        let mut ctx = context_for(
            &["--ldap-username", "svc", "--ldap-password", "hunter2"],
            &dir,
        );
        assert!(initialize(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_loop_defaults_applied_when_zero() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context_for(&["--loop"], &dir);
        initialize(&mut ctx).await.unwrap();
        assert_eq!(ctx.loop_duration, Duration::from_secs(7200));
        assert_eq!(ctx.loop_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_explicit_loop_timing_kept() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context_for(
            &["--loop", "--loop-duration", "00:00:03", "--loop-interval", "1"],
            &dir,
        );
        initialize(&mut ctx).await.unwrap();
        assert_eq!(ctx.loop_duration, Duration::from_secs(3));
        assert_eq!(ctx.loop_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unwritable_output_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does/not/exist");
        let missing_str = missing.to_string_lossy().to_string();
        let args = Args::parse_from(["adhound", "--output-directory", missing_str.as_str()]);
        let mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        let mut ctx = RunContext::new(&args, Arc::new(mock)).unwrap();
        assert!(initialize(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_domain_uppercased() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context_for(&["--domain", "example.local"], &dir);
        initialize(&mut ctx).await.unwrap();
        assert_eq!(ctx.domain.as_deref(), Some("EXAMPLE.LOCAL"));
    }
}

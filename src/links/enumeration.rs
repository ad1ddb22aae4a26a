//! Chain links that run the base enumeration and close the run out.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{debug, info, warn};

use crate::cache::cache_file_path;
use crate::context::RunContext;
use crate::discovery::{domains_for_enumeration, DiscoveryMode};
use crate::links::await_current_task;

/// Resolve the target domain list.
pub async fn get_domains(ctx: &mut RunContext) -> Result<()> {
    let domain = ctx
        .domain
        .as_deref()
        .context("No domain resolved before enumeration")?;
    let mode = DiscoveryMode::from_flags(ctx.search_forest, ctx.recurse_domains);
    let domains = domains_for_enumeration(ctx.client.as_ref(), domain, mode).await?;
    if domains.is_empty() {
        bail!("Domain discovery produced no targets");
    }
    ctx.domain_list = domains;
    Ok(())
}

/// Spawn the base collection pass and hold its handle on the context.
pub async fn start_base_collection_task(ctx: &mut RunContext) -> Result<()> {
    let task = ctx.collection_task(ctx.methods, false);
    let handle = tokio::spawn(async move { task.run().await.map(|_| ()) });
    ctx.current_task = Some(handle);
    info!("Started the base collection task");
    Ok(())
}

/// Wait for the base pass; completion arms the loop timer's hard-cancel
/// behavior.
pub async fn await_base_run_completion(ctx: &mut RunContext) -> Result<()> {
    await_current_task(ctx).await?;
    ctx.flags
        .initial_completed
        .store(true, std::sync::atomic::Ordering::SeqCst);
    info!("Initial collection pass completed");
    Ok(())
}

/// Persist the resolver cache unless it is memory-only.
pub async fn save_cache_file(ctx: &mut RunContext) -> Result<()> {
    if ctx.mem_cache {
        debug!("Memory-only cache, skipping save");
        return Ok(());
    }
    let path = cache_file_path(
        &ctx.output.directory,
        ctx.cache_name.as_deref(),
        ctx.real_dns_name.as_deref(),
    );
    ctx.cache.save(&path)
}

/// Closing summary.
pub async fn finish(ctx: &mut RunContext) -> Result<()> {
    let elapsed = Utc::now().signed_duration_since(ctx.start_time);
    let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
    if ctx.is_faulted {
        warn!("Collection finished with faults after {:.2}s", seconds);
    } else {
        info!("Collection finished in {:.2}s", seconds);
    }
    Ok(())
}

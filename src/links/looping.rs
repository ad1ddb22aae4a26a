//! Loop manager: timed re-collection of session-flavored methods.
//!
//! Two distinct cancellation intents exist here. The one-shot timer firing
//! after the loop duration either cancels the run token immediately (the
//! initial pass already finished) or raises `needs_cancellation`, which the
//! loop body observes between iterations. The timer itself is released on
//! every exit path: dropping [`LoopTimer`] aborts its task.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{RunContext, RunFlags};
use crate::links::await_current_task;
use crate::pipeline::CollectionTask;

/// Scoped one-shot timer. The task is aborted when the timer is dropped,
/// so release is guaranteed on every exit path of a looped run.
pub struct LoopTimer {
    handle: JoinHandle<()>,
}

impl LoopTimer {
    pub fn start(duration: Duration, flags: Arc<RunFlags>, cancel: CancellationToken) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if flags.initial_completed.load(Ordering::SeqCst) {
                info!("Loop duration reached, cancelling the run");
                cancel.cancel();
            } else {
                info!("Loop duration reached during the initial pass, deferring cancellation");
                flags.needs_cancellation.store(true, Ordering::SeqCst);
            }
        });
        Self { handle }
    }
}

impl Drop for LoopTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Arm the loop deadline and start the one-shot timer.
pub async fn start_loop_timer(ctx: &mut RunContext) -> Result<()> {
    if !ctx.loop_enabled {
        return Ok(());
    }
    let duration =
        chrono::Duration::from_std(ctx.loop_duration).context("Loop duration out of range")?;
    ctx.loop_end = Some(Utc::now() + duration);
    ctx.loop_timer = Some(LoopTimer::start(
        ctx.loop_duration,
        Arc::clone(&ctx.flags),
        ctx.cancel.clone(),
    ));
    info!(
        "Looping enabled for {:?} at {:?} intervals",
        ctx.loop_duration, ctx.loop_interval
    );
    Ok(())
}

/// Spawn the loop driver. The handle replaces the base-run handle on the
/// context, so the await link waits on whatever was assigned last.
pub async fn start_loop(ctx: &mut RunContext) -> Result<()> {
    if !ctx.loop_enabled {
        return Ok(());
    }
    if ctx.cancel.is_cancelled() {
        info!("Cancellation already requested, skipping the loop");
        return Ok(());
    }
    let loop_end = match ctx.loop_end {
        Some(end) => end,
        None => {
            Utc::now()
                + chrono::Duration::from_std(ctx.loop_duration)
                    .context("Loop duration out of range")?
        }
    };
    let task = ctx.collection_task(ctx.methods.loop_set(), true);
    let flags = Arc::clone(&ctx.flags);
    let cancel = ctx.cancel.clone();
    let interval = ctx.loop_interval;
    let handle =
        tokio::spawn(async move { run_loop(task, flags, cancel, interval, loop_end).await });
    ctx.current_task = Some(handle);
    Ok(())
}

async fn run_loop(
    task: CollectionTask,
    flags: Arc<RunFlags>,
    cancel: CancellationToken,
    interval: Duration,
    loop_end: DateTime<Utc>,
) -> Result<()> {
    let mut passes = 0u32;
    loop {
        if flags.needs_cancellation.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }
        if Utc::now() >= loop_end {
            break;
        }
        passes += 1;
        info!("Starting loop pass {}", passes);
        if let Err(e) = task.run().await {
            warn!("Loop pass {} failed: {:#}", passes, e);
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Looping finished after {} pass(es)", passes);
    Ok(())
}

/// Wait for the most recently assigned task handle (the loop driver when
/// looping, otherwise a no-op).
pub async fn await_loop_completion(ctx: &mut RunContext) -> Result<()> {
    await_current_task(ctx).await
}

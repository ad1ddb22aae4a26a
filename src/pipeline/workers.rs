//! The worker pool between producers and writers.
//!
//! Workers share one receiver behind a mutex; each dequeues an object,
//! applies the optional jittered throttle, runs the processor set and
//! forwards the records. The pool is a `JoinSet`, so the output side can
//! only close after every worker has returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::ldap::DirectoryObject;
use crate::models::OutputRecord;
use crate::processors::{ProcessorContext, ProcessorSet};

pub struct WorkerPool {
    pub count: usize,
    pub throttle_ms: u64,
    pub jitter_percent: u8,
    pub processors: Arc<ProcessorSet>,
    pub processor_ctx: Arc<ProcessorContext>,
    pub cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn the workers. The returned set completes when every worker has
    /// drained out or observed cancellation.
    pub fn spawn(
        &self,
        rx: mpsc::Receiver<DirectoryObject>,
        tx: mpsc::Sender<OutputRecord>,
        processed: Arc<AtomicU64>,
    ) -> JoinSet<()> {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for id in 0..self.count.max(1) {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&rx),
                tx.clone(),
                Arc::clone(&self.processors),
                Arc::clone(&self.processor_ctx),
                self.cancel.clone(),
                self.throttle_ms,
                self.jitter_percent,
                Arc::clone(&processed),
            ));
        }
        workers
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<DirectoryObject>>>,
    tx: mpsc::Sender<OutputRecord>,
    processors: Arc<ProcessorSet>,
    ctx: Arc<ProcessorContext>,
    cancel: CancellationToken,
    throttle_ms: u64,
    jitter_percent: u8,
    processed: Arc<AtomicU64>,
) {
    loop {
        let object = tokio::select! {
            _ = cancel.cancelled() => break,
            object = recv_shared(&rx) => match object {
                Some(object) => object,
                None => break,
            },
        };

        if let Some(delay) = jittered_delay(throttle_ms, jitter_percent) {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        for record in processors.process_object(&object, &ctx).await {
            if tx.send(record).await.is_err() {
                debug!("Worker {} stopping, output channel closed", id);
                return;
            }
        }
        processed.fetch_add(1, Ordering::Relaxed);
    }
    debug!("Worker {} finished", id);
}

async fn recv_shared(
    rx: &Arc<Mutex<mpsc::Receiver<DirectoryObject>>>,
) -> Option<DirectoryObject> {
    rx.lock().await.recv().await
}

/// The per-object delay: `throttle ± throttle*jitter/100` ms. No throttle
/// means no sleep, jitter or not.
fn jittered_delay(throttle_ms: u64, jitter_percent: u8) -> Option<Duration> {
    if throttle_ms == 0 {
        return None;
    }
    if jitter_percent == 0 {
        return Some(Duration::from_millis(throttle_ms));
    }
    let spread = (throttle_ms as i64 * jitter_percent as i64) / 100;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Some(Duration::from_millis(
        (throttle_ms as i64 + offset).max(0) as u64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResolverCache;
    use crate::methods::CollectionMethods;
    use crate::test_utils::user_object;

    fn pool(count: usize, cancel: CancellationToken) -> WorkerPool {
        WorkerPool {
            count,
            throttle_ms: 0,
            jitter_percent: 0,
            processors: Arc::new(ProcessorSet::with_defaults()),
            processor_ctx: Arc::new(ProcessorContext {
                cache: Arc::new(ResolverCache::default()),
                methods: CollectionMethods::default_set(),
                dc_only: false,
                collect_all_properties: false,
                skip_registry_logged_on: false,
                track_computer_calls: false,
                session_user: None,
            }),
            cancel,
        }
    }

    #[test]
    fn test_no_delay_without_throttle() {
        assert_eq!(jittered_delay(0, 0), None);
        assert_eq!(jittered_delay(0, 50), None);
    }

    #[test]
    fn test_fixed_delay_without_jitter() {
        assert_eq!(jittered_delay(100, 0), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_jittered_delay_stays_in_bounds() {
        for _ in 0..100 {
            let delay = jittered_delay(100, 30).unwrap().as_millis() as i64;
            assert!((70..=130).contains(&delay), "delay {} out of bounds", delay);
        }
    }

    #[tokio::test]
    async fn test_single_worker_drains_pipeline() {
        let (obj_tx, obj_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let processed = Arc::new(AtomicU64::new(0));

        let mut workers =
            pool(1, CancellationToken::new()).spawn(obj_rx, out_tx, processed.clone());
        for i in 0..20 {
            obj_tx
                .send(user_object(
                    &format!("user{}", i),
                    &format!("S-1-5-21-1-1-1-{}", 1000 + i),
                    "example.local",
                ))
                .await
                .unwrap();
        }
        drop(obj_tx);
        while workers.join_next().await.is_some() {}

        let mut records = 0;
        while out_rx.recv().await.is_some() {
            records += 1;
        }
        assert_eq!(records, 20);
        assert_eq!(processed.load(Ordering::Relaxed), 20);
    }

    #[tokio::test]
    async fn test_cancellation_stops_workers() {
        let (obj_tx, obj_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let mut workers = pool(4, cancel.clone()).spawn(obj_rx, out_tx, Arc::default());

        cancel.cancel();
        // Workers must exit even though the object channel stays open.
        while workers.join_next().await.is_some() {}
        drop(obj_tx);
    }
}

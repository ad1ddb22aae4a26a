//! One collection pass: producers → workers → writers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::{error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::ResolverCache;
use crate::constants::{
    DEFAULT_ZIP_NAME, LOOP_ZIP_NAME, OBJECT_CHANNEL_PER_WORKER, OUTPUT_CHANNEL_CAPACITY,
};
use crate::context::{OutputSettings, RunFlags};
use crate::ldap::{config_nc_data, default_nc_data, LdapClient};
use crate::methods::CollectionMethods;
use crate::models::{EnumerationDomain, PassSummary};
use crate::output::{zip_output_files, FileNamePolicy, OutputRouter};
use crate::pipeline::workers::WorkerPool;
use crate::processors::{ProcessorContext, ProcessorSet};
use crate::producers::{
    ComputerFileProducer, LdapProducer, ObjectProducer, ProducerContext, StealthProducer,
    StealthTargets,
};

/// Settings snapshot for one pass.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub domains: Vec<EnumerationDomain>,
    pub methods: CollectionMethods,
    pub dc_only: bool,
    pub threads: usize,
    pub throttle_ms: u64,
    pub jitter_percent: u8,
    pub status_interval_ms: u64,
    pub search_base: Option<String>,
    pub ldap_filter: Option<String>,
    pub computer_file: Option<PathBuf>,
    pub stealth: bool,
    pub exclude_dcs: bool,
    pub collect_all_properties: bool,
    pub skip_registry_logged_on: bool,
    pub track_computer_calls: bool,
    pub session_user: Option<String>,
    pub output: OutputSettings,
    pub loop_pass: bool,
}

/// Orchestrates one enumeration pass over the shared components.
pub struct CollectionTask {
    pub client: Arc<dyn LdapClient>,
    pub cache: Arc<ResolverCache>,
    pub processors: Arc<ProcessorSet>,
    pub stealth_targets: Arc<StealthTargets>,
    pub cancel: CancellationToken,
    pub flags: Arc<RunFlags>,
    pub config: TaskConfig,
}

impl CollectionTask {
    /// Run the pass to completion. Producer stream failures are reported as
    /// an error after the pipeline has drained and the writers flushed, so
    /// partial results always land on disk.
    pub async fn run(&self) -> Result<PassSummary> {
        let started = Instant::now();
        let config = &self.config;
        let policy = FileNamePolicy::new(
            config.output.directory.clone(),
            config.output.prefix.clone(),
            config.output.randomize_filenames,
            Utc::now(),
        );

        let worker_count = config.threads.max(1);
        let (object_tx, object_rx) =
            mpsc::channel(worker_count * OBJECT_CHANNEL_PER_WORKER);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let producer_ctx = ProducerContext {
            client: Arc::clone(&self.client),
            domains: config.domains.clone(),
            sender: object_tx.clone(),
            cancel: self.cancel.clone(),
            flags: Arc::clone(&self.flags),
            search_base: config.search_base.clone(),
            default_nc: default_nc_data(
                config.methods,
                config.ldap_filter.as_deref(),
                config.collect_all_properties,
            ),
            config_nc: config_nc_data(config.methods),
        };
        // Strategy precedence: explicit host list, then stealth, then the
        // full LDAP walk.
        let producer: Arc<dyn ObjectProducer> = if let Some(path) = &config.computer_file {
            Arc::new(ComputerFileProducer::new(producer_ctx, path.clone()))
        } else if config.stealth {
            Arc::new(StealthProducer::new(
                producer_ctx,
                Arc::clone(&self.stealth_targets),
                config.exclude_dcs,
            ))
        } else {
            Arc::new(LdapProducer::new(producer_ctx))
        };

        let default_handle = {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move { producer.produce().await })
        };
        let config_handle = {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move { producer.produce_config_nc().await })
        };

        let processed = Arc::new(AtomicU64::new(0));
        let pool = WorkerPool {
            count: worker_count,
            throttle_ms: config.throttle_ms,
            jitter_percent: config.jitter_percent,
            processors: Arc::clone(&self.processors),
            processor_ctx: Arc::new(ProcessorContext {
                cache: Arc::clone(&self.cache),
                methods: config.methods,
                dc_only: config.dc_only,
                collect_all_properties: config.collect_all_properties,
                skip_registry_logged_on: config.skip_registry_logged_on,
                track_computer_calls: config.track_computer_calls,
                session_user: config.session_user.clone(),
            }),
            cancel: self.cancel.clone(),
        };
        let mut workers = pool.spawn(object_rx, output_tx.clone(), Arc::clone(&processed));

        let router = OutputRouter::new(
            policy.clone(),
            config.methods.bits(),
            config.output.pretty_print,
            config.output.no_output,
        );
        let router_handle = tokio::spawn(router.run(output_rx));
        let status_handle = spawn_status_reporter(
            Arc::clone(&processed),
            config.status_interval_ms,
            self.cancel.clone(),
        );

        // Join in pipeline order so each channel closes exactly once, from
        // the producing side.
        let mut producer_failed = false;
        for handle in [default_handle, config_handle] {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Producer failed: {:#}", e);
                    producer_failed = true;
                }
                Err(e) => {
                    error!("Producer task aborted: {}", e);
                    producer_failed = true;
                }
            }
        }
        drop(producer);
        drop(object_tx);

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task aborted: {}", e);
            }
        }
        drop(output_tx);

        let router_result = match router_handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!(e).context("Writer task aborted")),
        };
        status_handle.abort();
        let router_summary = router_result?;

        let mut files = router_summary.files.clone();
        if !files.is_empty() && !config.output.no_zip && !config.output.no_output {
            let zip_name = config.output.zip_filename.clone().unwrap_or_else(|| {
                if config.loop_pass {
                    LOOP_ZIP_NAME.to_string()
                } else {
                    DEFAULT_ZIP_NAME.to_string()
                }
            });
            let destination = policy.resolve_raw(&zip_name);
            zip_output_files(&files, &destination, config.output.zip_password.as_deref())?;
            files = vec![destination];
        }

        let objects = processed.load(Ordering::Relaxed);
        info!(
            "Enumeration finished in {:?}: {} objects, {} records",
            started.elapsed(),
            objects,
            router_summary.records_written
        );

        if producer_failed {
            bail!("a producer stream failed; partial results were written");
        }
        Ok(PassSummary {
            objects_processed: objects,
            records_written: router_summary.records_written,
            files,
        })
    }
}

/// Periodic progress logging, stopped by abort or cancellation.
fn spawn_status_reporter(
    processed: Arc<AtomicU64>,
    interval_ms: u64,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let count = processed.load(Ordering::Relaxed);
                    let elapsed = start.elapsed().as_secs().max(1);
                    info!(
                        "Status: {} objects finished ({} objects/s)",
                        count,
                        count / elapsed
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{group_object, user_object, MockDirectory};
    use tempfile::TempDir;

    fn task_for(mock: MockDirectory, dir: &TempDir, threads: usize) -> CollectionTask {
        CollectionTask {
            client: Arc::new(mock),
            cache: Arc::new(ResolverCache::default()),
            processors: Arc::new(ProcessorSet::with_defaults()),
            stealth_targets: Arc::new(StealthTargets::new()),
            cancel: CancellationToken::new(),
            flags: Arc::new(RunFlags::default()),
            config: TaskConfig {
                domains: vec![EnumerationDomain::new("example.local", "S-1-5-21-1-1-1")],
                methods: CollectionMethods::default_set(),
                dc_only: false,
                threads,
                throttle_ms: 0,
                jitter_percent: 0,
                status_interval_ms: 30_000,
                search_base: None,
                ldap_filter: None,
                computer_file: None,
                stealth: false,
                exclude_dcs: false,
                collect_all_properties: false,
                skip_registry_logged_on: false,
                track_computer_calls: false,
                session_user: None,
                output: OutputSettings {
                    directory: dir.path().to_path_buf(),
                    prefix: None,
                    randomize_filenames: false,
                    pretty_print: false,
                    no_output: false,
                    no_zip: true,
                    zip_filename: None,
                    zip_password: None,
                },
                loop_pass: false,
            },
        }
    }

    #[tokio::test]
    async fn test_single_thread_drains_full_pipeline() {
        let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        for i in 0..10 {
            mock.add_object(
                "example.local",
                user_object(&format!("u{}", i), &format!("S-1-5-21-1-1-1-{}", 1100 + i), "example.local"),
            );
        }
        mock.add_object(
            "example.local",
            group_object("ops", "S-1-5-21-1-1-1-2200", "example.local"),
        );

        let dir = TempDir::new().unwrap();
        let summary = task_for(mock, &dir, 1).run().await.unwrap();
        assert_eq!(summary.objects_processed, 11);
        assert_eq!(summary.records_written, 11);
        assert_eq!(summary.files.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_domain_breaks_its_stream_only() {
        let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
        for i in 0..6 {
            mock.add_object(
                "example.local",
                user_object(&format!("u{}", i), &format!("S-1-5-21-1-1-1-{}", 1100 + i), "example.local"),
            );
        }
        let dir = TempDir::new().unwrap();
        let mut task = task_for(mock, &dir, 2);
        task.config
            .domains
            .push(EnumerationDomain::new("ghost.local", "S-1-5-21-9-9-9"));

        let summary = task.run().await.unwrap();
        assert_eq!(summary.objects_processed, 6);
    }
}

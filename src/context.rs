//! The mutable context one run threads through the link chain.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::ResolverCache;
use crate::cli::Args;
use crate::ldap::{LdapClient, LdapConnectionOptions};
use crate::links::looping::LoopTimer;
use crate::methods::{resolve_methods, CollectionMethods};
use crate::models::EnumerationDomain;
use crate::pipeline::{CollectionTask, TaskConfig};
use crate::processors::ProcessorSet;
use crate::producers::StealthTargets;

/// Resolve the transport settings from the parsed arguments.
pub fn connection_options(args: &Args) -> LdapConnectionOptions {
    LdapConnectionOptions {
        username: args.ldap_username.clone(),
        password: args.ldap_password.clone(),
        domain_controller: args.domain_controller.clone(),
        port: args.ldap_port,
        secure: args.secure_ldap,
        disable_cert_verification: args.disable_cert_verification,
        disable_signing: args.disable_signing,
        skip_port_check: args.skip_port_check,
        port_check_timeout_ms: args.port_check_timeout,
        skip_password_check: args.skip_password_check,
    }
}

/// Signals shared with the loop timer task. The token on the context is the
/// hard "cancel now"; `needs_cancellation` asks the active pass to stop at
/// its next safe point instead.
#[derive(Debug, Default)]
pub struct RunFlags {
    pub initial_completed: AtomicBool,
    pub needs_cancellation: AtomicBool,
}

/// Output-side settings shared by every pass of a run.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub prefix: Option<String>,
    pub randomize_filenames: bool,
    pub pretty_print: bool,
    pub no_output: bool,
    pub no_zip: bool,
    pub zip_filename: Option<String>,
    pub zip_password: Option<String>,
}

/// State owned by the link runner and mutated linearly by each link.
/// Concurrent stages receive clones or `Arc` handles, never the context.
pub struct RunContext {
    // Targeting
    pub domain: Option<String>,
    pub domain_list: Vec<EnumerationDomain>,
    pub methods: CollectionMethods,
    pub dc_only: bool,
    pub stealth: bool,
    pub search_forest: bool,
    pub recurse_domains: bool,
    pub ldap_filter: Option<String>,
    pub search_base: Option<String>,
    pub computer_file: Option<PathBuf>,
    pub exclude_dcs: bool,
    pub collect_all_properties: bool,
    pub skip_registry_logged_on: bool,
    pub track_computer_calls: bool,

    // Output and cache
    pub output: OutputSettings,
    pub cache_name: Option<String>,
    pub real_dns_name: Option<String>,
    pub mem_cache: bool,
    pub invalidate_cache: bool,

    // Credentials and session
    pub ldap_options: LdapConnectionOptions,
    pub override_username: Option<String>,
    pub session_user_name: Option<String>,

    // Timing
    pub threads: usize,
    pub jitter_percent: u8,
    pub throttle_ms: u64,
    pub status_interval_ms: u64,
    pub loop_enabled: bool,
    pub loop_duration: Duration,
    pub loop_interval: Duration,
    pub loop_end: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,

    // Concurrency handles
    pub cancel: CancellationToken,
    pub flags: Arc<RunFlags>,
    pub current_task: Option<JoinHandle<Result<()>>>,
    pub loop_timer: Option<LoopTimer>,

    // Run state
    pub is_faulted: bool,
    pub common_lib_initialized: bool,

    // Shared components
    pub client: Arc<dyn LdapClient>,
    pub cache: Arc<ResolverCache>,
    pub processors: Arc<ProcessorSet>,
    pub stealth_targets: Arc<StealthTargets>,
}

impl RunContext {
    /// Build a run context from parsed arguments and an injected transport.
    /// Fails on unresolvable method tokens; everything else is validated by
    /// the Initialize link.
    pub fn new(args: &Args, client: Arc<dyn LdapClient>) -> Result<Self> {
        let resolved = resolve_methods(&args.collection_methods)?;
        Ok(Self {
            domain: args.domain.clone(),
            domain_list: Vec::new(),
            methods: resolved.methods,
            dc_only: resolved.dc_only,
            stealth: args.stealth,
            search_forest: args.search_forest,
            recurse_domains: args.recurse_domains,
            ldap_filter: args.ldap_filter.clone(),
            search_base: args.distinguished_name.clone(),
            computer_file: args.computer_file.clone(),
            exclude_dcs: args.exclude_dcs,
            collect_all_properties: args.collect_all_properties,
            skip_registry_logged_on: args.skip_registry_logged_on,
            track_computer_calls: args.track_computer_calls,
            output: OutputSettings {
                directory: args.output_directory.clone(),
                prefix: args.output_prefix.clone(),
                randomize_filenames: args.random_filenames,
                pretty_print: args.pretty_print,
                no_output: false,
                no_zip: args.no_zip,
                zip_filename: args.zip_filename.clone(),
                zip_password: args.zip_password.clone(),
            },
            cache_name: args.cache_name.clone(),
            real_dns_name: args.real_dns_name.clone(),
            mem_cache: args.mem_cache,
            invalidate_cache: args.rebuild_cache,
            ldap_options: connection_options(args),
            override_username: args.override_username.clone(),
            session_user_name: None,
            threads: args.threads.unwrap_or_else(num_cpus::get),
            jitter_percent: args.jitter,
            throttle_ms: args.throttle,
            status_interval_ms: args.status_interval,
            loop_enabled: args.loop_enabled,
            loop_duration: args.loop_duration,
            loop_interval: args.loop_interval,
            loop_end: None,
            start_time: Utc::now(),
            cancel: CancellationToken::new(),
            flags: Arc::new(RunFlags::default()),
            current_task: None,
            loop_timer: None,
            is_faulted: false,
            common_lib_initialized: false,
            client,
            cache: Arc::new(ResolverCache::default()),
            processors: Arc::new(ProcessorSet::with_defaults()),
            stealth_targets: Arc::new(StealthTargets::new()),
        })
    }

    /// Record a fault: the reason is logged and the chain short-circuits.
    pub fn fault(&mut self, reason: &str) {
        error!("{}", reason);
        self.is_faulted = true;
    }

    /// Snapshot the settings one collection pass needs.
    pub fn task_config(&self, methods: CollectionMethods, loop_pass: bool) -> TaskConfig {
        TaskConfig {
            domains: self.domain_list.clone(),
            methods,
            dc_only: self.dc_only,
            threads: self.threads,
            throttle_ms: self.throttle_ms,
            jitter_percent: self.jitter_percent,
            status_interval_ms: self.status_interval_ms,
            search_base: self.search_base.clone(),
            ldap_filter: self.ldap_filter.clone(),
            computer_file: self.computer_file.clone(),
            stealth: self.stealth,
            exclude_dcs: self.exclude_dcs,
            collect_all_properties: self.collect_all_properties,
            skip_registry_logged_on: self.skip_registry_logged_on,
            track_computer_calls: self.track_computer_calls,
            session_user: self.session_user_name.clone(),
            output: self.output.clone(),
            loop_pass,
        }
    }

    /// Assemble a collection task for one pass.
    pub fn collection_task(&self, methods: CollectionMethods, loop_pass: bool) -> CollectionTask {
        CollectionTask {
            client: Arc::clone(&self.client),
            cache: Arc::clone(&self.cache),
            processors: Arc::clone(&self.processors),
            stealth_targets: Arc::clone(&self.stealth_targets),
            cancel: self.cancel.clone(),
            flags: Arc::clone(&self.flags),
            config: self.task_config(methods, loop_pass),
        }
    }

    /// Release the loop timer. Safe to call on every exit path; the timer
    /// task is aborted on drop.
    pub fn dispose_timer(&mut self) {
        if self.loop_timer.take().is_some() {
            log::debug!("Loop timer disposed");
        }
    }
}

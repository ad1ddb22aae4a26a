//! Global constants for the adhound collector.
//!
//! This module centralizes hardcoded values so the data contract and
//! pipeline tuning knobs live in one place.

/// Version of the per-file output envelope expected by the downstream ingestor.
pub const DATA_VERSION: u32 = 6;

/// Collector version stamped into every meta tag.
pub const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

// Loop defaults
/// Loop duration applied when `--loop` is set without an explicit duration (2 hours).
pub const DEFAULT_LOOP_DURATION_SECS: u64 = 2 * 60 * 60;

/// Delay between loop passes when none is configured (30 seconds).
pub const DEFAULT_LOOP_INTERVAL_SECS: u64 = 30;

// Pipeline tuning
/// Object channel capacity contributed by each worker.
pub const OBJECT_CHANNEL_PER_WORKER: usize = 32;

/// Output channel capacity between workers and the writer router.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 512;

/// Records a writer queues before writing them through to its file.
pub const WRITER_FLUSH_THRESHOLD: usize = 100;

/// Page size requested from the directory for paged searches.
pub const LDAP_PAGE_SIZE: i32 = 500;

/// Default status report interval in milliseconds.
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 30_000;

// Output naming
/// Extension used by every per-kind output file.
pub const OUTPUT_EXTENSION: &str = "json";

/// Default archive name for a base collection pass.
pub const DEFAULT_ZIP_NAME: &str = "BloodHound.zip";

/// Archive name used for looped collection passes.
pub const LOOP_ZIP_NAME: &str = "BloodHoundLoopResults.zip";

/// Extension of the persisted resolver cache file.
pub const CACHE_EXTENSION: &str = "cache";

/// Length of randomized output file names.
pub const RANDOM_FILENAME_LEN: usize = 12;

/// Timestamp format prefixed to every output file of one pass.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

// Directory identifiers
/// SID prefix shared by all domain principals.
pub const DOMAIN_SID_PREFIX: &str = "S-1-5-21";

/// SID authority prefix accepted from stealth host resolution.
pub const NT_AUTHORITY_SID_PREFIX: &str = "S-1-5";

/// Placeholder recorded for domains whose SID could not be resolved.
pub const UNKNOWN_SID: &str = "Unknown";

// LDAP defaults
/// Plaintext LDAP port.
pub const LDAP_PORT: u16 = 389;

/// LDAP over TLS port.
pub const LDAPS_PORT: u16 = 636;

/// Default timeout for the pre-connect port probe in milliseconds.
pub const DEFAULT_PORT_CHECK_TIMEOUT_MS: u64 = 500;

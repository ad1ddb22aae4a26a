//! Command-line interface for the collector.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[clap(
    name = "adhound",
    about = "Active Directory enumeration tool producing BloodHound-compatible JSON",
    version
)]
pub struct Args {
    /// Collection methods to run (comma-separated), e.g. Default, All,
    /// DCOnly, Session, Group, ACL, ObjectProps, CertServices
    #[clap(
        short = 'c',
        long,
        value_delimiter = ',',
        default_value = "Default"
    )]
    pub collection_methods: Vec<String>,

    /// Domain to enumerate (defaults to the current domain)
    #[clap(short, long)]
    pub domain: Option<String>,

    /// Enumerate every domain of the forest
    #[clap(long)]
    pub search_forest: bool,

    /// Follow outbound and bidirectional trusts into other domains
    #[clap(long)]
    pub recurse_domains: bool,

    /// Stealth collection: derive targets from user attribute paths
    #[clap(long)]
    pub stealth: bool,

    /// Extra LDAP filter AND-ed onto the generated filter
    #[clap(long)]
    pub ldap_filter: Option<String>,

    /// Search base distinguished name
    #[clap(long)]
    pub distinguished_name: Option<String>,

    /// File with one computer (hostname or SID) per line
    #[clap(long)]
    pub computer_file: Option<PathBuf>,

    /// Directory output files are written to
    #[clap(long, default_value = ".")]
    pub output_directory: PathBuf,

    /// Prefix inserted into every output file name
    #[clap(long)]
    pub output_prefix: Option<String>,

    /// Explicit cache file name (defaults to a machine-derived name)
    #[clap(long)]
    pub cache_name: Option<String>,

    /// Keep the resolver cache in memory only, never writing it to disk
    #[clap(long)]
    pub mem_cache: bool,

    /// Ignore any existing cache file and rebuild from scratch
    #[clap(long)]
    pub rebuild_cache: bool,

    /// Randomize output file names
    #[clap(long)]
    pub random_filenames: bool,

    /// Name of the zip archive
    #[clap(long)]
    pub zip_filename: Option<String>,

    /// Leave the output files unzipped
    #[clap(long)]
    pub no_zip: bool,

    /// Password-protect the zip archive
    #[clap(long)]
    pub zip_password: Option<String>,

    /// Record computers that could not be contacted
    #[clap(long)]
    pub track_computer_calls: bool,

    /// Pretty-print output JSON
    #[clap(long)]
    pub pretty_print: bool,

    /// Username for LDAP authentication
    #[clap(long)]
    pub ldap_username: Option<String>,

    /// Password for LDAP authentication
    #[clap(long)]
    pub ldap_password: Option<String>,

    /// Domain controller to pin every connection to
    #[clap(long)]
    pub domain_controller: Option<String>,

    /// Override the LDAP port (0 selects 389/636)
    #[clap(long, default_value = "0")]
    pub ldap_port: u16,

    /// Connect over LDAPS
    #[clap(long)]
    pub secure_ldap: bool,

    /// Skip TLS certificate verification
    #[clap(long)]
    pub disable_cert_verification: bool,

    /// Do not request LDAP signing
    #[clap(long)]
    pub disable_signing: bool,

    /// Skip the TCP reachability probe before connecting
    #[clap(long)]
    pub skip_port_check: bool,

    /// Reachability probe timeout in milliseconds
    #[clap(long, default_value = "500", value_parser = clap::value_parser!(u64).range(50..=5000))]
    pub port_check_timeout: u64,

    /// Skip credential verification during the connection test
    #[clap(long)]
    pub skip_password_check: bool,

    /// Exclude domain controllers from the stealth target set
    #[clap(long)]
    pub exclude_dcs: bool,

    /// Delay between object requests in milliseconds
    #[clap(long, default_value = "0")]
    pub throttle: u64,

    /// Percentage jitter applied to the throttle delay
    #[clap(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub jitter: u8,

    /// Number of enumeration workers (defaults to the CPU count)
    #[clap(long)]
    pub threads: Option<usize>,

    /// Skip registry-based logged-on collection
    #[clap(long)]
    pub skip_registry_logged_on: bool,

    /// Attribute sessions to this account instead of the connected user
    #[clap(long)]
    pub override_username: Option<String>,

    /// DNS name of this host, used for the cache file name
    #[clap(long)]
    pub real_dns_name: Option<String>,

    /// Project every LDAP attribute instead of the per-method projection
    #[clap(long)]
    pub collect_all_properties: bool,

    /// Re-run session collection on a timer after the initial pass
    #[clap(long = "loop")]
    pub loop_enabled: bool,

    /// Total looping duration, hh:mm:ss or seconds (default 2h)
    #[clap(long, value_parser = parse_duration, default_value = "0")]
    pub loop_duration: Duration,

    /// Delay between loop passes, hh:mm:ss or seconds (default 30s)
    #[clap(long, value_parser = parse_duration, default_value = "0")]
    pub loop_interval: Duration,

    /// Interval between progress reports in milliseconds
    #[clap(long, default_value = "30000", value_parser = clap::value_parser!(u64).range(500..=60000))]
    pub status_interval: u64,

    /// Logging verbosity (0 = errors only, 5 = trace)
    #[clap(short, long, default_value = "2", value_parser = clap::value_parser!(u8).range(0..=5))]
    pub verbosity: u8,
}

impl Args {
    /// Map the numeric verbosity to a log level.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Parse a duration given as `hh:mm:ss`, `mm:ss`, plain seconds, or
/// suffixed components like `1h30m` / `45s`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_string());
    }

    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() > 3 {
            return Err(format!("invalid duration: {}", value));
        }
        let mut seconds: u64 = 0;
        for part in &parts {
            let n: u64 = part
                .parse()
                .map_err(|_| format!("invalid duration component: {}", part))?;
            seconds = seconds * 60 + n;
        }
        return Ok(Duration::from_secs(seconds));
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut seconds: u64 = 0;
    let mut digits = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {}", value))?;
        digits.clear();
        seconds += match c.to_ascii_lowercase() {
            'h' => n * 3600,
            'm' => n * 60,
            's' => n,
            _ => return Err(format!("invalid duration unit: {}", c)),
        };
    }
    if !digits.is_empty() {
        return Err(format!("trailing number without unit: {}", value));
    }
    Ok(Duration::from_secs(seconds))
}

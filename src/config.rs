//! Provides the CLI option parser
//!
//! Used to parse the argv, the environment and an optional config file into
//! the structs the agent and the collector consume. Sources are layered:
//! environment variables beat command-line flags, flags beat the config file
//! and the config file beats the built-in defaults.

use crate::constants;
use crate::util::Subnet;
use clap::{App, Arg, ArgMatches};
use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn default_version() -> String {
    VERSION.unwrap_or("unknown").to_string()
}

/// Setting name to raw value, one map per configuration source.
pub type Settings = BTreeMap<String, String>;

/// Which wire protocol carries batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// JSON over HTTP POST.
    Http,
    /// Length-prefixed protobuf frames over TCP.
    Rpc,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<TransportKind, String> {
        match s.trim().to_lowercase().as_str() {
            "http" | "" => Ok(TransportKind::Http),
            "rpc" | "grpc" => Ok(TransportKind::Rpc),
            other => Err(format!("unknown transport {:?}, expected http or rpc", other)),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector `host:port`.
    pub address: String,
    /// How often a report cycle runs.
    pub report_interval: Duration,
    /// How often the samplers tick.
    pub poll_interval: Duration,
    /// HMAC signing key, empty disables signing.
    pub key: String,
    /// PEM public key of the collector, enables encryption.
    pub crypto_key: Option<PathBuf>,
    /// Wire protocol for deliveries.
    pub transport: TransportKind,
    /// Wire metrics per delivered batch.
    pub batch_size: usize,
    /// Value for `X-Real-IP`; discovered from the route to the collector when
    /// unset.
    pub ip_address: Option<String>,
    /// The verbosity setting. The higher the value the chattier the agent.
    pub verbose: u64,
    /// Version string. This is set automatically.
    pub version: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            address: constants::DEFAULT_ADDRESS.to_string(),
            report_interval: Duration::from_secs(constants::DEFAULT_REPORT_INTERVAL),
            poll_interval: Duration::from_secs(constants::DEFAULT_POLL_INTERVAL),
            key: String::new(),
            crypto_key: None,
            transport: TransportKind::Http,
            batch_size: constants::BATCH_SIZE,
            ip_address: None,
            verbose: 0,
            version: default_version(),
        }
    }
}

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// `host:port` to listen on.
    pub address: String,
    /// How often the backup loop runs. Zero disables the loop; write-through
    /// and the shutdown backup still happen.
    pub store_interval: Duration,
    /// Snapshot file, `None` disables the file backend.
    pub store_file: Option<PathBuf>,
    /// Replay persisted snapshots at startup.
    pub restore: bool,
    /// HMAC key incoming hashes are checked against.
    pub key: String,
    /// Postgres connection string, enables the database backend.
    pub database_dsn: Option<String>,
    /// PEM private key, enables decryption.
    pub crypto_key: Option<PathBuf>,
    /// Callers outside this network are refused.
    pub trusted_subnet: Option<Subnet>,
    /// Front end to serve.
    pub transport: TransportKind,
    /// Threads serving HTTP requests.
    pub workers: usize,
    /// The verbosity setting.
    pub verbose: u64,
    /// Version string. This is set automatically.
    pub version: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            address: constants::DEFAULT_ADDRESS.to_string(),
            store_interval: Duration::from_secs(constants::DEFAULT_STORE_INTERVAL),
            store_file: Some(PathBuf::from(constants::DEFAULT_STORE_FILE)),
            restore: true,
            key: String::new(),
            database_dsn: None,
            crypto_key: None,
            trusted_subnet: None,
            transport: TransportKind::Http,
            workers: 4,
            verbose: 0,
            version: default_version(),
        }
    }
}

/// Parse a duration given as bare seconds or with a `ms`, `s`, `m` or `h`
/// suffix.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or_else(|| raw.len());
    let (digits, unit) = raw.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {:?}", raw))?;
    let duration = match unit.trim() {
        "" | "s" => Some(Duration::from_secs(n)),
        "ms" => Some(Duration::from_millis(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs),
        "h" => n.checked_mul(3600).map(Duration::from_secs),
        other => return Err(format!("invalid duration unit {:?} in {:?}", other, raw)),
    };
    match duration {
        Some(d) if d <= Duration::from_secs(constants::MAX_INTERVAL_SECS) => Ok(d),
        _ => Err(format!(
            "duration {:?} exceeds {}s",
            raw,
            constants::MAX_INTERVAL_SECS
        )),
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("invalid boolean {:?}", other)),
    }
}

fn optional<T, F>(raw: &str, f: F) -> Option<T>
where
    F: FnOnce(&str) -> T,
{
    if raw.trim().is_empty() {
        None
    } else {
        Some(f(raw.trim()))
    }
}

/// Flatten the top-level table of a TOML document into `Settings`.
pub fn file_settings(buffer: &str) -> Result<Settings, String> {
    let value: toml::Value =
        toml::from_str(buffer).map_err(|e| format!("could not parse config file: {}", e))?;
    let table = match value.as_table() {
        Some(table) => table,
        None => return Err("config file must be a table".to_string()),
    };
    let mut settings = Settings::new();
    for (key, val) in table {
        let raw = match *val {
            toml::Value::String(ref s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Float(f) => f.to_string(),
            _ => return Err(format!("config key {} must be a scalar", key)),
        };
        settings.insert(key.replace('_', "-"), raw);
    }
    Ok(settings)
}

fn read_file_settings(path: &str) -> Result<Settings, String> {
    let mut fp = File::open(path).map_err(|e| format!("could not open {}: {}", path, e))?;
    let mut buffer = String::new();
    fp.read_to_string(&mut buffer)
        .map_err(|e| format!("could not read {}: {}", path, e))?;
    file_settings(&buffer)
}

/// Collect settings from the environment, `vars` mapping variable to key.
pub fn env_settings(vars: &[(&str, &str)]) -> Settings {
    let mut settings = Settings::new();
    for &(var, key) in vars {
        if let Ok(val) = env::var(var) {
            settings.insert(key.to_string(), val);
        }
    }
    settings
}

fn flag_settings(matches: &ArgMatches, keys: &[&str]) -> Settings {
    let mut settings = Settings::new();
    for key in keys {
        if let Some(val) = matches.value_of(key) {
            settings.insert((*key).to_string(), val.to_string());
        }
    }
    settings
}

/// Merge sources, later ones winning.
fn layer(sources: Vec<Settings>) -> Settings {
    let mut merged = Settings::new();
    for source in sources {
        merged.extend(source);
    }
    merged
}

const AGENT_ENV: &[(&str, &str)] = &[
    ("ADDRESS", "address"),
    ("REPORT_INTERVAL", "report-interval"),
    ("POLL_INTERVAL", "poll-interval"),
    ("KEY", "key"),
    ("CRYPTO_KEY", "crypto-key"),
    ("CONFIG", "config"),
    ("TYPE_SRV", "transport"),
];

const AGENT_KEYS: &[&str] = &[
    "address",
    "report-interval",
    "poll-interval",
    "key",
    "crypto-key",
    "config",
    "transport",
    "batch-size",
    "ip-address",
];

const COLLECTOR_ENV: &[(&str, &str)] = &[
    ("ADDRESS", "address"),
    ("STORE_INTERVAL", "store-interval"),
    ("STORE_FILE", "store-file"),
    ("RESTORE", "restore"),
    ("KEY", "key"),
    ("DATABASE_DSN", "database-dsn"),
    ("CRYPTO_KEY", "crypto-key"),
    ("TRUSTED_SUBNET", "trusted-subnet"),
    ("CONFIG", "config"),
    ("TYPE_SRV", "transport"),
];

const COLLECTOR_KEYS: &[&str] = &[
    "address",
    "store-interval",
    "store-file",
    "restore",
    "key",
    "database-dsn",
    "crypto-key",
    "trusted-subnet",
    "config",
    "transport",
    "workers",
];

/// Build an `AgentConfig` from merged settings.
pub fn agent_config(settings: &Settings, verbose: u64) -> Result<AgentConfig, String> {
    let mut cfg = AgentConfig::default();
    cfg.verbose = verbose;
    for (key, raw) in settings {
        match key.as_str() {
            "address" => cfg.address = raw.trim().to_string(),
            "report-interval" => cfg.report_interval = parse_duration(raw)?,
            "poll-interval" => cfg.poll_interval = parse_duration(raw)?,
            "key" => cfg.key = raw.clone(),
            "crypto-key" => cfg.crypto_key = optional(raw, |p| PathBuf::from(p)),
            "transport" => cfg.transport = raw.parse()?,
            "batch-size" => {
                cfg.batch_size = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid batch-size {:?}", raw))?
            }
            "ip-address" => cfg.ip_address = optional(raw, str::to_string),
            "config" => {}
            other => warn!("ignoring unknown agent setting {}", other),
        }
    }
    if cfg.batch_size == 0 {
        return Err("batch-size must be positive".to_string());
    }
    if cfg.poll_interval == Duration::from_secs(0) || cfg.report_interval == Duration::from_secs(0) {
        return Err("poll and report intervals must be positive".to_string());
    }
    Ok(cfg)
}

/// Build a `CollectorConfig` from merged settings.
pub fn collector_config(settings: &Settings, verbose: u64) -> Result<CollectorConfig, String> {
    let mut cfg = CollectorConfig::default();
    cfg.verbose = verbose;
    for (key, raw) in settings {
        match key.as_str() {
            "address" => cfg.address = raw.trim().to_string(),
            "store-interval" => cfg.store_interval = parse_duration(raw)?,
            "store-file" => cfg.store_file = optional(raw, |p| PathBuf::from(p)),
            "restore" => cfg.restore = parse_bool(raw)?,
            "key" => cfg.key = raw.clone(),
            "database-dsn" => cfg.database_dsn = optional(raw, str::to_string),
            "crypto-key" => cfg.crypto_key = optional(raw, |p| PathBuf::from(p)),
            "trusted-subnet" => {
                cfg.trusted_subnet = match optional(raw, Subnet::from_str) {
                    Some(parsed) => Some(parsed?),
                    None => None,
                }
            }
            "transport" => cfg.transport = raw.parse()?,
            "workers" => {
                cfg.workers = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid workers {:?}", raw))?
            }
            "config" => {}
            other => warn!("ignoring unknown collector setting {}", other),
        }
    }
    Ok(cfg)
}

/// Parse an agent config file on its own, no flags or environment.
pub fn parse_agent_config_file(buffer: &str, verbosity: u64) -> Result<AgentConfig, String> {
    agent_config(&file_settings(buffer)?, verbosity)
}

/// Parse a collector config file on its own, no flags or environment.
pub fn parse_collector_config_file(
    buffer: &str,
    verbosity: u64,
) -> Result<CollectorConfig, String> {
    collector_config(&file_settings(buffer)?, verbosity)
}

fn common_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.version(VERSION.unwrap_or("unknown"))
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("FILE")
                .help("TOML config file to read.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("address")
                .long("address")
                .short("a")
                .value_name("HOST:PORT")
                .help("Collector address.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("key")
                .long("key")
                .short("k")
                .value_name("KEY")
                .help("HMAC signing key; empty disables signing.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("crypto-key")
                .long("crypto-key")
                .value_name("PEM")
                .help("Path to the RSA key used for the envelope.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("transport")
                .long("transport")
                .short("t")
                .value_name("http|rpc")
                .help("Wire protocol.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Turn on verbose output."),
        )
}

fn layered(matches: &ArgMatches, keys: &[&str], env_vars: &[(&str, &str)]) -> Result<Settings, String> {
    let flags = flag_settings(matches, keys);
    let env = env_settings(env_vars);
    let config_path = env.get("config").or_else(|| flags.get("config")).cloned();
    let file = match config_path {
        Some(ref path) if !path.trim().is_empty() => read_file_settings(path)?,
        _ => Settings::new(),
    };
    Ok(layer(vec![file, flags, env]))
}

/// Parse the agent's argv, environment and config file.
pub fn parse_agent_args() -> Result<AgentConfig, String> {
    let app = common_args(App::new("telemeter-agent"))
        .about("samples process and host metrics and reports them to a collector")
        .arg(
            Arg::with_name("report-interval")
                .long("report-interval")
                .short("r")
                .value_name("DURATION")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("poll-interval")
                .long("poll-interval")
                .short("p")
                .value_name("DURATION")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("batch-size")
                .long("batch-size")
                .value_name("N")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("ip-address")
                .long("ip-address")
                .value_name("IP[;IP]")
                .takes_value(true),
        );
    let matches = app.get_matches();
    let settings = layered(&matches, AGENT_KEYS, AGENT_ENV)?;
    agent_config(&settings, matches.occurrences_of("verbose"))
}

/// Parse the collector's argv, environment and config file.
pub fn parse_collector_args() -> Result<CollectorConfig, String> {
    let app = common_args(App::new("telemeter-collector"))
        .about("ingests metrics from agents and persists them")
        .arg(
            Arg::with_name("store-interval")
                .long("store-interval")
                .short("i")
                .value_name("DURATION")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("store-file")
                .long("store-file")
                .short("f")
                .value_name("PATH")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("restore")
                .long("restore")
                .short("r")
                .value_name("BOOL")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("database-dsn")
                .long("database-dsn")
                .short("d")
                .value_name("DSN")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("trusted-subnet")
                .long("trusted-subnet")
                .value_name("CIDR")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("workers")
                .long("workers")
                .value_name("N")
                .takes_value(true),
        );
    let matches = app.get_matches();
    let settings = layered(&matches, COLLECTOR_KEYS, COLLECTOR_ENV)?;
    collector_config(&settings, matches.occurrences_of("verbose"))
}

//! Library level constants

/// Address both the agent and the collector default to.
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Seconds between agent report cycles.
pub const DEFAULT_REPORT_INTERVAL: u64 = 10;

/// Seconds between agent sampler ticks.
pub const DEFAULT_POLL_INTERVAL: u64 = 2;

/// Seconds between collector backups.
pub const DEFAULT_STORE_INTERVAL: u64 = 300;

/// Snapshot file the collector writes to when nothing else is configured.
pub const DEFAULT_STORE_FILE: &str = "/tmp/telemeter-metrics.json";

/// Number of wire metrics per delivered batch.
pub const BATCH_SIZE: usize = 10;

/// Scheme named in the `Content-Encryption` header.
pub const ENCRYPTION_SCHEME: &str = "sha512";

/// Separator between addresses in the `X-Real-IP` header.
pub const IP_SEPARATOR: char = ';';

/// Path the HTTP transport posts batches to.
pub const UPDATES_PATH: &str = "/updates";

/// Granularity at which sleeping workers check the stop flag, in
/// milliseconds.
pub const STOP_CHECK_MILLIS: u64 = 50;

/// Longest configurable interval, in seconds. One year.
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 3600;

/// Largest request body the HTTP server reads, in bytes.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Idle time after which the RPC server drops a connection.
pub const RPC_IDLE_SECS: u64 = 60;

/// Header names, lowercased, shared by both transports.
pub mod header {
    /// `Content-Type`
    pub const CONTENT_TYPE: &str = "content-type";
    /// `Content-Encoding`
    pub const CONTENT_ENCODING: &str = "content-encoding";
    /// `Content-Encryption`
    pub const CONTENT_ENCRYPTION: &str = "content-encryption";
    /// `Accept-Encoding`
    pub const ACCEPT_ENCODING: &str = "accept-encoding";
    /// `X-Real-IP`
    pub const REAL_IP: &str = "x-real-ip";
    /// Marker header set on the HTML listing.
    pub const METRICS_VAL: &str = "metrics-val";
}

//! Log setup shared by both binaries.

use chrono::Utc;
use log::LevelFilter;

/// Map a `-v` count onto a level filter.
pub fn level(verbose: u64) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger, writing to stdout.
///
/// Fails only if a logger is already installed.
pub fn setup(verbose: u64) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][{}] {}",
                record.module_path().unwrap_or("?"),
                record.line().unwrap_or(0),
                Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(level(verbose))
        .chain(std::io::stdout())
        .apply()
}

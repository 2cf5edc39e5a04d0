//! Persistence backends for collector snapshots.
//!
//! A backend is anything that can store and return a full snapshot, answer a
//! readiness probe and prepare its own schema. The collector writes the same
//! snapshot to every configured backend.

mod file;
mod database;

pub use self::file::FileBackend;
pub use self::database::PostgresBackend;

use crate::config::CollectorConfig;
use crate::error::Error;
use crate::metric::WireMetric;
use std::sync::{Mutex, MutexGuard};

/// The four operations every backend provides.
pub trait Backend: Send {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Is this a database? Readiness probes only count databases.
    fn is_database(&self) -> bool;

    /// Create whatever tables or directories the backend needs.
    fn ensure_schema(&mut self) -> Result<(), Error>;

    /// Persist `metrics` as the complete current state.
    fn write_snapshot(&mut self, metrics: &[WireMetric]) -> Result<(), Error>;

    /// Return the last persisted snapshot, empty if none exists.
    fn read_snapshot(&mut self) -> Result<Vec<WireMetric>, Error>;

    /// Check the backend is reachable.
    fn probe(&mut self) -> Result<(), Error>;
}

/// Every configured backend behind one lock.
///
/// The lock is taken before the snapshot is produced, so two concurrent
/// persist calls can never write an older snapshot over a newer one.
pub struct Persistence {
    backends: Mutex<Vec<Box<dyn Backend>>>,
}

impl Persistence {
    /// Wrap the given backends.
    pub fn new(backends: Vec<Box<dyn Backend>>) -> Persistence {
        Persistence {
            backends: Mutex::new(backends),
        }
    }

    /// Build the backends named by `config`: the database when a DSN is
    /// given, then the file when a store file is given.
    pub fn from_config(config: &CollectorConfig) -> Persistence {
        let mut backends: Vec<Box<dyn Backend>> = Vec::new();
        if let Some(ref dsn) = config.database_dsn {
            backends.push(Box::new(PostgresBackend::new(dsn)));
        }
        if let Some(ref path) = config.store_file {
            backends.push(Box::new(FileBackend::new(path)));
        }
        Persistence::new(backends)
    }

    fn lock(&self) -> MutexGuard<Vec<Box<dyn Backend>>> {
        match self.backends.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of configured backends.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prepare every backend, logging failures.
    pub fn ensure_schema(&self) {
        for backend in self.lock().iter_mut() {
            match backend.ensure_schema() {
                Ok(()) => debug!("{} schema ready", backend.name()),
                Err(e) => error!("unable to prepare {}: {}", backend.name(), e),
            }
        }
    }

    /// Write the snapshot `produce` returns to every backend.
    ///
    /// `produce` runs with the persistence lock held. Every backend is
    /// attempted; the first failure is returned.
    pub fn persist<F>(&self, produce: F) -> Result<usize, Error>
    where
        F: FnOnce() -> Vec<WireMetric>,
    {
        let mut backends = self.lock();
        if backends.is_empty() {
            return Ok(0);
        }
        let snapshot = produce();
        let mut first_err = None;
        for backend in backends.iter_mut() {
            if let Err(e) = backend.write_snapshot(&snapshot) {
                error!("unable to write snapshot to {}: {}", backend.name(), e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(snapshot.len()),
        }
    }

    /// The first non-empty persisted snapshot, databases first.
    ///
    /// Backends hold the same data, so replaying more than one would count
    /// every counter twice.
    pub fn restore(&self) -> Vec<WireMetric> {
        for backend in self.lock().iter_mut() {
            match backend.read_snapshot() {
                Ok(ref snapshot) if snapshot.is_empty() => {
                    debug!("{} holds no snapshot", backend.name())
                }
                Ok(snapshot) => {
                    info!(
                        "restoring {} metrics from {}",
                        snapshot.len(),
                        backend.name()
                    );
                    return snapshot;
                }
                Err(e) => warn!("unable to read snapshot from {}: {}", backend.name(), e),
            }
        }
        Vec::new()
    }

    /// Succeeds only if a database backend is configured and reachable.
    pub fn probe(&self) -> Result<(), Error> {
        let mut probed = false;
        for backend in self.lock().iter_mut().filter(|b| b.is_database()) {
            backend.probe()?;
            probed = true;
        }
        if probed {
            Ok(())
        } else {
            Err(Error::Internal("no database configured".to_string()))
        }
    }
}

//! The concurrent metric store.
//!
//! One `MetricStore` lives in each process. Every read and every write takes
//! the single store lock for its whole read-modify-write span, and a batch
//! holds it once for all of its elements so concurrent batches never
//! interleave.

use crate::envelope::Signer;
use crate::error::Error;
use crate::metric::{Kind, Value, WireMetric};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Whether incoming hashes are checked on upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verify {
    /// Check every non-empty hash against the signer.
    Check,
    /// Trust the source, as when restoring our own snapshot.
    Skip,
}

/// Mapping of metric name to value.
#[derive(Debug, Default)]
pub struct MetricStore {
    inner: Mutex<HashMap<String, Value>>,
}

/// Metric names end up in response headers and HTML, so control characters
/// are refused outright.
fn check_name(name: &str) -> Result<(), Error> {
    if name.chars().any(char::is_control) {
        Err(Error::BadRequest(format!("metric name {:?} contains control characters", name)))
    } else {
        Ok(())
    }
}

fn apply(
    map: &mut HashMap<String, Value>,
    wire: &WireMetric,
    signer: &Signer,
    verify: Verify,
) -> Result<(), Error> {
    let kind = wire.kind()?;
    check_name(&wire.id)?;
    if verify == Verify::Check {
        wire.verify(signer)?;
    }
    match map.get_mut(&wire.id) {
        Some(existing) => existing.set(wire),
        None => {
            let mut value = Value::zero(kind);
            value.set(wire)?;
            map.insert(wire.id.clone(), value);
            Ok(())
        }
    }
}

impl MetricStore {
    /// An empty store.
    pub fn new() -> MetricStore {
        MetricStore::default()
    }

    fn lock(&self) -> MutexGuard<HashMap<String, Value>> {
        // A panic while holding the lock leaves the map itself intact, every
        // mutation being a single assignment.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create-if-absent, verify and apply one wire metric.
    pub fn upsert_from_wire(
        &self,
        wire: &WireMetric,
        signer: &Signer,
        verify: Verify,
    ) -> Result<(), Error> {
        let mut map = self.lock();
        apply(&mut map, wire, signer, verify)
    }

    /// Apply a batch under one lock.
    ///
    /// Elements apply in order. The first failure stops the batch and is
    /// returned; the elements before it stay applied.
    pub fn upsert_batch(
        &self,
        batch: &[WireMetric],
        signer: &Signer,
        verify: Verify,
    ) -> Result<usize, Error> {
        let mut map = self.lock();
        for (applied, wire) in batch.iter().enumerate() {
            if let Err(e) = apply(&mut map, wire, signer, verify) {
                debug!(
                    "batch stopped after {} of {} metrics: {}",
                    applied,
                    batch.len(),
                    e
                );
                return Err(e);
            }
        }
        Ok(batch.len())
    }

    /// Apply a textual value as carried by a URL path.
    pub fn upsert_from_text(&self, kind: &str, name: &str, text: &str) -> Result<(), Error> {
        let kind: Kind = kind.parse()?;
        check_name(name)?;
        let mut map = self.lock();
        let applied = match map.get_mut(name) {
            Some(existing) if existing.kind() == kind => existing.set_from_text(text),
            Some(existing) => {
                return Err(Error::BadRequest(format!(
                    "metric {} is a {}, not a {}",
                    name,
                    existing.kind(),
                    kind
                )))
            }
            None => {
                let mut value = Value::zero(kind);
                let ok = value.set_from_text(text);
                if ok {
                    map.insert(name.to_string(), value);
                }
                ok
            }
        };
        if applied {
            Ok(())
        } else {
            Err(Error::BadRequest(format!(
                "unparsable {} value {:?} for {}",
                kind, text, name
            )))
        }
    }

    /// Replace a gauge, creating it if absent.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.lock().insert(name.to_string(), Value::Gauge(value));
    }

    /// Replace many gauges under one lock.
    pub fn set_gauges<I, S>(&self, gauges: I)
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut map = self.lock();
        for (name, value) in gauges {
            map.insert(name.into(), Value::Gauge(value));
        }
    }

    /// Add to a counter, creating it if absent.
    pub fn increment(&self, name: &str, delta: i64) {
        let mut map = self.lock();
        let entry = map
            .entry(name.to_string())
            .or_insert_with(|| Value::zero(Kind::Counter));
        match *entry {
            Value::Counter(ref mut total) => *total = total.saturating_add(delta),
            Value::Gauge(_) => *entry = Value::Counter(delta),
        }
    }

    /// Signed projection of every entry, in no particular order.
    pub fn snapshot(&self, signer: &Signer) -> Vec<WireMetric> {
        let map = self.lock();
        map.iter()
            .map(|(name, value)| value.to_wire(name, signer))
            .collect()
    }

    /// Every entry as `(name, text)`, sorted by name.
    pub fn listing(&self) -> Vec<(String, String)> {
        let map = self.lock();
        let mut entries: Vec<(String, String)> = map
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        entries.sort();
        entries
    }

    /// Look up a value.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    /// Look up a value rendered as text.
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.to_string())
    }

    /// Number of distinct names held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

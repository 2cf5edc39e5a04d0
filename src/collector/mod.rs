//! The collector: one shared core behind two thin front ends.
//!
//! `Collector` holds the configuration, key material, metric store and
//! persistence backends. The HTTP and RPC front ends only translate their
//! framing into calls on it and its results back into their status codes, so
//! both transports behave identically.

pub mod http;
pub mod rpc;

use crate::backend::Persistence;
use crate::config::CollectorConfig;
use crate::constants::header;
use crate::envelope::{self, compression, KeyMaterial, Signer};
use crate::error::Error;
use crate::metric::{Kind, WireMetric};
use crate::store::{MetricStore, Verify};
use crate::thread::{self, Stop, ThreadHandle};
use crate::util::{check_real_ip, header_contains, Headers};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

lazy_static! {
    /// Metrics applied to the store.
    pub static ref COLLECTOR_METRICS_ACCEPTED: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    /// Ingest requests refused, whole or in part.
    pub static ref COLLECTOR_INGEST_REJECTED: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    /// Backups that reached every backend.
    pub static ref COLLECTOR_BACKUP_SUCCESS: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    /// Backups that failed on at least one backend.
    pub static ref COLLECTOR_BACKUP_ERROR: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
}

/// Shared state of a running collector.
pub struct Collector {
    config: CollectorConfig,
    signer: Signer,
    keys: KeyMaterial,
    store: MetricStore,
    persistence: Persistence,
}

fn tally<T>(result: Result<T, Error>, accepted: usize) -> Result<T, Error> {
    match result {
        Ok(v) => {
            COLLECTOR_METRICS_ACCEPTED.fetch_add(accepted, Ordering::Relaxed);
            Ok(v)
        }
        Err(e) => {
            COLLECTOR_INGEST_REJECTED.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}

fn wants_gzip(headers: &Headers) -> bool {
    header_contains(headers, header::ACCEPT_ENCODING, "gzip")
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl Collector {
    /// A collector with explicit key material and backends.
    pub fn new(config: CollectorConfig, keys: KeyMaterial, persistence: Persistence) -> Collector {
        Collector {
            signer: Signer::new(&config.key),
            config,
            keys,
            store: MetricStore::new(),
            persistence,
        }
    }

    /// A collector whose keys and backends come from `config`.
    pub fn from_config(config: CollectorConfig) -> Collector {
        let keys = match config.crypto_key {
            Some(ref path) => KeyMaterial::load_private(path),
            None => KeyMaterial::none(),
        };
        let persistence = Persistence::from_config(&config);
        Collector::new(config, keys, persistence)
    }

    /// The configuration this collector runs with.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// The collector's store.
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    fn admit(&self, headers: &Headers) -> Result<(), Error> {
        check_real_ip(self.config.trusted_subnet.as_ref(), headers)
    }

    /// Decode a sealed batch and apply it under one store lock.
    ///
    /// Decoding is all-or-nothing. Application stops at the first bad
    /// element, leaving the elements before it applied.
    pub fn ingest_batch(&self, headers: &Headers, body: &[u8]) -> Result<usize, Error> {
        let result = self.admit(headers).and_then(|()| {
            let batch = envelope::decode_batch(headers, body, &self.keys)?;
            let applied = self.store.upsert_batch(&batch, &self.signer, Verify::Check)?;
            Ok(applied)
        });
        let accepted = result.as_ref().map(|n| *n).unwrap_or(0);
        tally(result, accepted)
    }

    /// Apply one JSON metric, then write the full snapshot through to every
    /// backend. Returns the post-update value.
    pub fn ingest_single_json(&self, headers: &Headers, body: &[u8]) -> Result<WireMetric, Error> {
        let result = self.admit(headers).and_then(|()| {
            let wire: WireMetric = envelope::decode(headers, body, &self.keys)?;
            self.store
                .upsert_from_wire(&wire, &self.signer, Verify::Check)?;
            let current = match self.store.get(&wire.id) {
                Some(value) => value.to_wire(&wire.id, &self.signer),
                None => return Err(Error::Internal(format!("{} vanished", wire.id))),
            };
            self.backup()?;
            Ok(current)
        });
        tally(result, 1)
    }

    /// Apply one metric given as path text.
    pub fn ingest_single_text(
        &self,
        headers: &Headers,
        kind: &str,
        name: &str,
        text: &str,
    ) -> Result<(), Error> {
        let result = self
            .admit(headers)
            .and_then(|()| self.store.upsert_from_text(kind, name, text));
        tally(result, 1)
    }

    /// Fails unless a database backend is configured and reachable.
    pub fn readiness_probe(&self, headers: &Headers) -> Result<(), Error> {
        self.admit(headers)?;
        self.persistence.probe()
    }

    /// Look up the metric named in a JSON query. The answer is gzipped if the
    /// caller accepts it.
    pub fn read_value_json(&self, headers: &Headers, body: &[u8]) -> Result<(Headers, Vec<u8>), Error> {
        let query: WireMetric = envelope::decode(headers, body, &self.keys)?;
        let kind = query.kind()?;
        let found = match self.store.get(&query.id) {
            Some(value) if value.kind() == kind => value.to_wire(&query.id, &self.signer),
            _ => return Err(Error::NotFound(query.id)),
        };
        let json = serde_json::to_vec(&found)
            .map_err(|e| Error::Internal(format!("encode: {}", e)))?;

        let mut out = Headers::new();
        out.insert(header::CONTENT_TYPE.to_string(), "application/json".to_string());
        if wants_gzip(headers) {
            out.insert(header::CONTENT_ENCODING.to_string(), "gzip".to_string());
            Ok((out, compression::compress(&json)?))
        } else {
            Ok((out, json))
        }
    }

    /// Look up one metric as text.
    pub fn read_value_text(&self, kind: &str, name: &str) -> Result<String, Error> {
        let kind: Kind = kind.parse()?;
        match self.store.get(name) {
            Some(value) if value.kind() == kind => Ok(value.to_string()),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Render every metric as an HTML list. The body is gzipped if the caller
    /// accepts it.
    pub fn read_all_html(&self, headers: &Headers) -> Result<(Headers, Vec<u8>), Error> {
        let listing = self.store.listing();
        let mut html = String::from(
            "<html>\n<head><title>Metrics</title></head>\n<body>\n<h1>Metrics</h1>\n<ul>\n",
        );
        let mut summary = Vec::with_capacity(listing.len());
        for (name, value) in &listing {
            let line = format!("{} = {}", name, value);
            html.push_str(&format!("<li><b>{}</b></li>\n", escape_html(&line)));
            summary.push(line.chars().filter(|c| !c.is_control()).collect::<String>());
        }
        html.push_str("</ul>\n</body>\n</html>\n");

        let mut out = Headers::new();
        out.insert(header::CONTENT_TYPE.to_string(), "text/html".to_string());
        out.insert(header::METRICS_VAL.to_string(), summary.join(";"));
        if wants_gzip(headers) {
            out.insert(header::CONTENT_ENCODING.to_string(), "gzip".to_string());
            Ok((out, compression::compress(html.as_bytes())?))
        } else {
            Ok((out, html.into_bytes()))
        }
    }

    /// Prepare backends and replay the persisted snapshot, if restoring is
    /// enabled. Signatures are not checked: the snapshot is our own.
    pub fn restore_at_startup(&self) -> usize {
        self.persistence.ensure_schema();
        if !self.config.restore {
            return 0;
        }
        let snapshot = self.persistence.restore();
        let mut restored = 0;
        for wire in &snapshot {
            match self.store.upsert_from_wire(wire, &self.signer, Verify::Skip) {
                Ok(()) => restored += 1,
                Err(e) => warn!("skipping persisted metric {}: {}", wire.id, e),
            }
        }
        restored
    }

    /// Write the current snapshot to every backend.
    pub fn backup(&self) -> Result<usize, Error> {
        let result = self.persistence.persist(|| self.store.snapshot(&self.signer));
        match result {
            Ok(n) => {
                COLLECTOR_BACKUP_SUCCESS.fetch_add(1, Ordering::Relaxed);
                trace!("backed up {} metrics", n);
            }
            Err(_) => {
                COLLECTOR_BACKUP_ERROR.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Run `backup` every store interval until `stop` is raised. No thread is
    /// started when the interval is zero or nothing is configured to write
    /// to.
    pub fn spawn_backup_loop(collector: &Arc<Collector>, stop: Stop) -> io::Result<Option<ThreadHandle>> {
        let interval = collector.config.store_interval;
        if interval == Duration::from_secs(0) || collector.persistence.is_empty() {
            return Ok(None);
        }
        let collector = Arc::clone(collector);
        thread::spawn_periodic("backup", interval, stop, move || {
            if let Err(e) = collector.backup() {
                error!("periodic backup failed: {}", e);
            }
        })
        .map(Some)
    }
}

/// One line summarizing the collector's lifetime counters.
pub fn counters_summary() -> String {
    format!(
        "accepted={} rejected={} backups={} backup_errors={}",
        COLLECTOR_METRICS_ACCEPTED.load(Ordering::Relaxed),
        COLLECTOR_INGEST_REJECTED.load(Ordering::Relaxed),
        COLLECTOR_BACKUP_SUCCESS.load(Ordering::Relaxed),
        COLLECTOR_BACKUP_ERROR.load(Ordering::Relaxed),
    )
}

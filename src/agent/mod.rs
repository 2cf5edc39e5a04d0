//! The agent pipeline.
//!
//! Three periodic tasks share the agent's store. The fast sampler records
//! process gauges and bumps `PollCount`. The slow sampler records host memory
//! and CPU figures. The reporter snapshots the store, signs every metric,
//! cuts the snapshot into batches and delivers them one by one; the first
//! failed delivery abandons the rest of that cycle.

pub mod sampler;

use self::sampler::{HostSampler, RuntimeSampler};
use crate::config::AgentConfig;
use crate::constants::IP_SEPARATOR;
use crate::envelope::{self, KeyMaterial, Signer};
use crate::error::Error;
use crate::metric::WireMetric;
use crate::store::MetricStore;
use crate::thread::{self, Stop, ThreadHandle};
use crate::transport::{Transport, Transports};
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

lazy_static! {
    /// Report cycles that delivered every batch.
    pub static ref AGENT_REPORT_SUCCESS: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    /// Report cycles abandoned after a failed delivery.
    pub static ref AGENT_REPORT_ERROR: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    /// Batches the collector accepted.
    pub static ref AGENT_BATCHES_DELIVERED: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
}

/// Counter bumped once per fast sample.
pub const POLL_COUNT: &str = "PollCount";

/// How long the slow sampler measures CPU utilization for.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// A running agent.
pub struct Agent {
    config: AgentConfig,
    signer: Signer,
    keys: KeyMaterial,
    real_ip: String,
    store: MetricStore,
    transports: Mutex<Transports>,
}

/// The local address used to reach `address`, found by routing a UDP socket.
fn route_ip(address: &str) -> Option<String> {
    let target = address.to_socket_addrs().ok()?.next()?;
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|a| a.ip().to_string())
}

impl Agent {
    /// An agent with explicit key material.
    pub fn new(config: AgentConfig, keys: KeyMaterial) -> Result<Agent, Error> {
        let transports = Transports::new(&config.address)?;
        let separator = IP_SEPARATOR.to_string();
        let real_ip = match config.ip_address {
            Some(ref ips) => ips
                .split(|c: char| c == IP_SEPARATOR || c == ',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(separator.as_str()),
            None => route_ip(&config.address).unwrap_or_default(),
        };
        Ok(Agent {
            signer: Signer::new(&config.key),
            config,
            keys,
            real_ip,
            store: MetricStore::new(),
            transports: Mutex::new(transports),
        })
    }

    /// An agent whose key material comes from `config`.
    pub fn from_config(config: AgentConfig) -> Result<Agent, Error> {
        let keys = match config.crypto_key {
            Some(ref path) => KeyMaterial::load_public(path),
            None => KeyMaterial::none(),
        };
        Agent::new(config, keys)
    }

    /// The agent's local store.
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// The `X-Real-IP` value sent with every batch.
    pub fn real_ip(&self) -> &str {
        &self.real_ip
    }

    /// Record one fast sample.
    pub fn record_runtime(&self, sampler: &mut RuntimeSampler) {
        let gauges = sampler.sample();
        self.store.set_gauges(gauges);
        self.store.increment(POLL_COUNT, 1);
    }

    /// Record one slow sample.
    pub fn record_host(&self, sampler: &mut HostSampler) {
        let gauges = sampler.sample();
        self.store.set_gauges(gauges);
    }

    /// The signed snapshot cut into batches, ordered by name.
    pub fn batches(&self) -> Vec<Vec<WireMetric>> {
        let mut snapshot = self.store.snapshot(&self.signer);
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Run one report cycle over `transport`.
    ///
    /// Returns the number of batches delivered. The first failure stops the
    /// cycle; nothing is retried.
    pub fn report_with(&self, transport: &mut dyn Transport) -> Result<usize, Error> {
        let batches = self.batches();
        let total = batches.len();
        for (idx, batch) in batches.iter().enumerate() {
            let sealed = envelope::seal(batch, &self.keys, &self.real_ip)?;
            if let Err(e) = transport.deliver(&sealed) {
                AGENT_REPORT_ERROR.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Delivery(format!(
                    "batch {} of {}: {}",
                    idx + 1,
                    total,
                    e
                )));
            }
            AGENT_BATCHES_DELIVERED.fetch_add(1, Ordering::Relaxed);
        }
        AGENT_REPORT_SUCCESS.fetch_add(1, Ordering::Relaxed);
        Ok(total)
    }

    /// Run one report cycle over the configured transport.
    pub fn report(&self) -> Result<usize, Error> {
        let mut transports = match self.transports.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let transport = transports.select(self.config.transport);
        self.report_with(transport)
    }

    /// Start the two samplers and the reporter.
    pub fn spawn(agent: &Arc<Agent>, stop: &Stop) -> io::Result<Vec<ThreadHandle>> {
        let poll = agent.config.poll_interval;
        let mut handles = Vec::with_capacity(3);

        let fast = Arc::clone(agent);
        let mut runtime = RuntimeSampler::new();
        handles.push(thread::spawn_periodic("fast-sampler", poll, stop.clone(), move || {
            fast.record_runtime(&mut runtime)
        })?);

        let slow = Arc::clone(agent);
        let mut host = HostSampler::new(CPU_SAMPLE_WINDOW);
        handles.push(thread::spawn_periodic("slow-sampler", poll, stop.clone(), move || {
            slow.record_host(&mut host)
        })?);

        let reporter = Arc::clone(agent);
        handles.push(thread::spawn_periodic(
            "reporter",
            agent.config.report_interval,
            stop.clone(),
            move || match reporter.report() {
                Ok(n) => debug!("report cycle delivered {} batches", n),
                Err(e) => error!("report cycle aborted: {}", e),
            },
        )?);

        Ok(handles)
    }
}

/// One line summarizing the agent's lifetime counters.
pub fn counters_summary() -> String {
    format!(
        "reports={} failed_reports={} batches={}",
        AGENT_REPORT_SUCCESS.load(Ordering::Relaxed),
        AGENT_REPORT_ERROR.load(Ordering::Relaxed),
        AGENT_BATCHES_DELIVERED.load(Ordering::Relaxed),
    )
}

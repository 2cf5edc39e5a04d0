use std::sync::Arc;
use telemeter::collector::rpc::{RpcFrontEnd, RpcServer};
use telemeter::collector::Collector;
use telemeter::config::CollectorConfig;
use telemeter::envelope::{self, KeyMaterial, Signer};
use telemeter::metric::Value;
use telemeter::protocols::rpc::{method, Code, Request};
use telemeter::store::{MetricStore, Verify};
use telemeter::thread::Stop;
use telemeter::transport::{RpcTransport, Transport};
use telemeter::util::Headers;
use tempdir::TempDir;

fn agent_store() -> MetricStore {
    let store = MetricStore::new();
    store.set_gauges(vec![("Alloc", 12.25), ("RandomValue", 0.5)]);
    store.increment("PollCount", 3);
    store
}

#[test]
fn snapshot_survives_the_envelope() {
    let signer = Signer::new("k");
    let snapshot = agent_store().snapshot(&signer);
    let sealed = envelope::seal(&snapshot, &KeyMaterial::none(), "10.1.1.1").unwrap();

    let decoded = envelope::decode_batch(&sealed.headers, &sealed.body, &KeyMaterial::none())
        .unwrap();
    let target = MetricStore::new();
    assert_eq!(target.upsert_batch(&decoded, &signer, Verify::Check).unwrap(), 3);
    assert_eq!(target.get("Alloc"), Some(Value::Gauge(12.25)));
    assert_eq!(target.get("PollCount"), Some(Value::Counter(3)));

    let wrong = Signer::new("not-k");
    assert!(MetricStore::new()
        .upsert_batch(&decoded, &wrong, Verify::Check)
        .is_err());
}

fn file_config(dir: &TempDir) -> CollectorConfig {
    let mut config = CollectorConfig::default();
    config.key = "k".to_string();
    config.store_file = Some(dir.path().join("metrics.json"));
    config.restore = true;
    config
}

#[test]
fn backup_then_restore_is_stable() {
    let dir = TempDir::new("telemeter").unwrap();
    let first = Collector::from_config(file_config(&dir));
    let headers = Headers::new();
    first
        .ingest_single_text(&headers, "counter", "PollCount", "4")
        .unwrap();
    first
        .ingest_single_text(&headers, "gauge", "Alloc", "2.5")
        .unwrap();
    assert_eq!(first.backup().unwrap(), 2);

    for _ in 0..2 {
        let next = Collector::from_config(file_config(&dir));
        assert_eq!(next.restore_at_startup(), 2);
        assert_eq!(next.store().get("PollCount"), Some(Value::Counter(4)));
        assert_eq!(next.store().get("Alloc"), Some(Value::Gauge(2.5)));
        assert_eq!(next.backup().unwrap(), 2);
    }

    let mut skip = file_config(&dir);
    skip.restore = false;
    let fresh = Collector::from_config(skip);
    assert_eq!(fresh.restore_at_startup(), 0);
    assert!(fresh.store().is_empty());
}

#[test]
fn rpc_loopback() {
    let mut config = CollectorConfig::default();
    config.key = "k".to_string();
    config.store_file = None;
    let collector = Arc::new(Collector::from_config(config));

    let stop = Stop::new();
    let server = RpcServer::new(
        "127.0.0.1:0",
        RpcFrontEnd::new(Arc::clone(&collector)),
        stop.clone(),
    )
    .unwrap();

    let mut transport = RpcTransport::new(&server.local_addr().to_string());
    let snapshot = agent_store().snapshot(&Signer::new("k"));
    let sealed = envelope::seal(&snapshot, &KeyMaterial::none(), "").unwrap();
    transport.deliver(&sealed).unwrap();
    transport.deliver(&sealed).unwrap();

    let lookup = Request {
        method: method::VALUE_TEXT.to_string(),
        args: vec!["counter".to_string(), "PollCount".to_string()],
        ..Request::default()
    };
    let response = transport.call(&lookup).unwrap();
    assert_eq!(response.code, Code::Ok);
    assert_eq!(response.payload, b"6".to_vec());

    let forged = agent_store().snapshot(&Signer::new("nope"));
    let sealed = envelope::seal(&forged, &KeyMaterial::none(), "").unwrap();
    assert!(transport.deliver(&sealed).is_err());

    drop(transport);
    stop.raise();
    server.join();
    assert_eq!(collector.store().get("Alloc"), Some(Value::Gauge(12.25)));
}

use rsa::RsaPrivateKey;
use std::sync::Arc;
use telemeter::backend::Persistence;
use telemeter::collector::http::HttpFrontEnd;
use telemeter::collector::Collector;
use telemeter::config::CollectorConfig;
use telemeter::envelope::{self, KeyMaterial, Signer};
use telemeter::http::{Reply, Request, Server};
use telemeter::metric::{Value, WireMetric};
use telemeter::thread::Stop;
use telemeter::transport::{HttpTransport, Transport};
use telemeter::util::{self, Headers};

fn collector(key: &str, keys: KeyMaterial) -> Arc<Collector> {
    let mut config = CollectorConfig::default();
    config.key = key.to_string();
    config.store_file = None;
    Arc::new(Collector::new(config, keys, Persistence::new(Vec::new())))
}

fn call(front: &HttpFrontEnd, method: &str, url: &str) -> Reply {
    front.route(Request::new(method, url, Headers::new(), Vec::new()))
}

fn body(reply: &Reply) -> &str {
    std::str::from_utf8(&reply.body).unwrap()
}

#[test]
fn gauge_update_then_lookup() {
    let front = HttpFrontEnd::new(collector("", KeyMaterial::none()));
    assert_eq!(call(&front, "POST", "/update/gauge/Alloc/0.1").status, 200);
    let reply = call(&front, "GET", "/value/gauge/Alloc");
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply), "0.1");
}

#[test]
fn counter_updates_accumulate() {
    let front = HttpFrontEnd::new(collector("", KeyMaterial::none()));
    assert_eq!(call(&front, "POST", "/update/counter/PollCount/5").status, 200);
    assert_eq!(call(&front, "POST", "/update/counter/PollCount/5").status, 200);
    let reply = call(&front, "GET", "/value/counter/PollCount");
    assert_eq!(reply.status, 200);
    assert_eq!(body(&reply), "10");
}

#[test]
fn unknown_kind_is_not_implemented() {
    let front = HttpFrontEnd::new(collector("", KeyMaterial::none()));
    assert_eq!(call(&front, "POST", "/update/notcounter/x/1").status, 501);
}

#[test]
fn unparsable_value_is_bad_request() {
    let front = HttpFrontEnd::new(collector("", KeyMaterial::none()));
    assert_eq!(call(&front, "POST", "/update/counter/x/abc").status, 400);
    assert_eq!(call(&front, "GET", "/value/counter/x").status, 404);
}

#[test]
fn json_update_echoes_current_value() {
    let front = HttpFrontEnd::new(collector("", KeyMaterial::none()));
    let payload = serde_json::to_vec(&WireMetric::counter("PollCount", 4)).unwrap();
    let req = |payload: Vec<u8>| {
        Request::new(
            "POST",
            "/update",
            util::headers(vec![("Content-Type", "application/json")]),
            payload,
        )
    };
    front.route(req(payload.clone()));
    let reply = front.route(req(payload));
    assert_eq!(reply.status, 200);
    let echoed: WireMetric = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(echoed.delta, Some(8));
}

#[test]
fn names_with_line_breaks_are_refused() {
    let c = collector("", KeyMaterial::none());
    let front = HttpFrontEnd::new(Arc::clone(&c));
    let split = WireMetric::gauge("x\r\nSet-Cookie: session=evil", 1.0);
    let reply = front.route(Request::new(
        "POST",
        "/update",
        util::headers(vec![("Content-Type", "application/json")]),
        serde_json::to_vec(&split).unwrap(),
    ));
    assert_eq!(reply.status, 400);
    let batch = serde_json::to_vec(&vec![split]).unwrap();
    let reply = front.route(Request::new("POST", "/updates", Headers::new(), batch));
    assert_eq!(reply.status, 400);
    assert!(c.store().is_empty());

    call(&front, "POST", "/update/gauge/Alloc/1");
    let listing = call(&front, "GET", "/");
    assert_eq!(
        listing.headers.get("metrics-val").map(|s| s.as_str()),
        Some("Alloc = 1")
    );
}

#[test]
fn listing_shows_every_metric() {
    let front = HttpFrontEnd::new(collector("", KeyMaterial::none()));
    call(&front, "POST", "/update/gauge/Alloc/1.5");
    call(&front, "POST", "/update/counter/PollCount/3");
    let reply = call(&front, "GET", "/");
    assert_eq!(reply.status, 200);
    let html = body(&reply);
    assert!(html.contains("Alloc"));
    assert!(html.contains("PollCount"));
    assert_eq!(
        reply.headers.get("metrics-val").map(|s| s.as_str()),
        Some("Alloc = 1.5;PollCount = 3")
    );
}

#[test]
fn encrypted_batch_over_http() {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = private.to_public_key();
    let c = collector("shared", KeyMaterial::with_private(private));

    let stop = Stop::new();
    let server = Server::new(
        "127.0.0.1:0",
        2,
        HttpFrontEnd::new(Arc::clone(&c)),
        stop.clone(),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();

    let signer = Signer::new("shared");
    let mut batch: Vec<WireMetric> = (0..10)
        .map(|i| WireMetric::gauge(format!("CPUutilization{}", i + 1), f64::from(i)))
        .collect();
    batch.push(WireMetric::counter("PollCount", 7));
    for m in &mut batch {
        m.sign(&signer);
    }

    let sealed =
        envelope::seal(&batch, &KeyMaterial::with_public(public), "127.0.0.1").unwrap();
    let mut transport = HttpTransport::new(&addr.to_string()).unwrap();
    transport.deliver(&sealed).unwrap();

    let mut forged = vec![WireMetric::gauge("Alloc", 1.0)];
    forged[0].sign(&Signer::new("other"));
    let sealed = envelope::seal(&forged, &KeyMaterial::none(), "").unwrap();
    assert!(transport.deliver(&sealed).is_err());

    stop.raise();
    server.join();

    assert_eq!(c.store().get("PollCount"), Some(Value::Counter(7)));
    assert_eq!(c.store().get("CPUutilization10"), Some(Value::Gauge(9.0)));
    assert_eq!(c.store().get("Alloc"), None);
}

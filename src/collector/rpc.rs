//! RPC front end for the collector.
//!
//! Accepts TCP connections and answers length-prefixed request frames, one
//! thread per connection. Connection threads live until their peer hangs up
//! or stays idle past the read timeout; only the acceptor watches the stop
//! flag. Call metadata stands in for HTTP
//! headers, so the shared `Collector` sees the same inputs from either front
//! end.

use super::Collector;
use crate::constants::RPC_IDLE_SECS;
use crate::error::Error;
use crate::protocols::rpc::{self, method, Request, Response};
use crate::thread::{self, Stop, ThreadHandle};
use crate::util::Headers;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Dispatches RPC calls onto a shared `Collector`.
pub struct RpcFrontEnd {
    collector: Arc<Collector>,
}

fn arg<'a>(req: &'a Request, idx: usize, what: &str) -> Result<&'a str, Error> {
    req.args
        .get(idx)
        .map(|s| s.as_str())
        .ok_or_else(|| Error::BadRequest(format!("{} requires argument {}", req.method, what)))
}

fn text_payload(text: &str) -> Response {
    Response::ok(Headers::new(), text.as_bytes().to_vec())
}

impl RpcFrontEnd {
    /// A front end for `collector`.
    pub fn new(collector: Arc<Collector>) -> RpcFrontEnd {
        RpcFrontEnd { collector }
    }

    fn dispatch(&self, req: &Request) -> Result<Response, Error> {
        let c = &self.collector;
        let md = &req.metadata;
        match req.method.as_str() {
            method::UPDATES => {
                c.ingest_batch(md, &req.payload)?;
                Ok(text_payload("OK"))
            }
            method::UPDATE_JSON => {
                let current = c.ingest_single_json(md, &req.payload)?;
                let body = serde_json::to_vec(&current)
                    .map_err(|e| Error::Internal(format!("encode: {}", e)))?;
                Ok(Response::ok(Headers::new(), body))
            }
            method::UPDATE_TEXT => {
                c.ingest_single_text(
                    md,
                    arg(req, 0, "type")?,
                    arg(req, 1, "name")?,
                    arg(req, 2, "value")?,
                )?;
                Ok(text_payload("OK"))
            }
            method::PING => {
                c.readiness_probe(md)?;
                Ok(text_payload("OK"))
            }
            method::VALUE_JSON => {
                let (headers, body) = c.read_value_json(md, &req.payload)?;
                Ok(Response::ok(headers, body))
            }
            method::VALUE_TEXT => {
                let text = c.read_value_text(arg(req, 0, "type")?, arg(req, 1, "name")?)?;
                Ok(text_payload(&text))
            }
            method::LIST => {
                let (headers, body) = c.read_all_html(md)?;
                Ok(Response::ok(headers, body))
            }
            other => Err(Error::NotImplemented(format!("method {}", other))),
        }
    }

    /// Answer one call.
    pub fn call(&self, req: &Request) -> Response {
        match self.dispatch(req) {
            Ok(resp) => resp,
            Err(e) => {
                match e.http_status() {
                    500 => error!("rpc {}: {}", req.method, e),
                    _ => warn!("rpc {}: {}", req.method, e),
                }
                Response::from_error(&e)
            }
        }
    }

    /// Answer frames on `stream` until the peer hangs up.
    fn serve_connection(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        loop {
            let frame = match rpc::read_frame(&mut stream) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!("dropping connection from {}: {}", peer, e);
                    break;
                }
            };
            let response = match Request::decode(&frame) {
                Ok(req) => self.call(&req),
                Err(e) => Response::from_error(&e),
            };
            let written = response
                .encode()
                .and_then(|bytes| rpc::write_frame(&mut stream, &bytes));
            if let Err(e) = written {
                debug!("unable to answer {}: {}", peer, e);
                break;
            }
        }
    }
}

/// Listening RPC server.
pub struct RpcServer {
    local_addr: SocketAddr,
    acceptor: ThreadHandle,
}

impl RpcServer {
    /// Bind `host_port` and serve `front` until `stop` is raised.
    pub fn new(host_port: &str, front: RpcFrontEnd, stop: Stop) -> Result<RpcServer, Error> {
        RpcServer::with_idle_timeout(host_port, front, stop, Duration::from_secs(RPC_IDLE_SECS))
    }

    /// As `new`, dropping connections that stay silent for `idle`.
    pub fn with_idle_timeout(
        host_port: &str,
        front: RpcFrontEnd,
        stop: Stop,
        idle: Duration,
    ) -> Result<RpcServer, Error> {
        let listener = TcpListener::bind(host_port)
            .map_err(|e| Error::Internal(format!("unable to bind {}: {}", host_port, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let front = Arc::new(front);
        let acceptor = thread::spawn("rpc-accept", move || {
            while !stop.is_raised() {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        trace!("rpc connection from {}", peer);
                        let configured = stream
                            .set_nonblocking(false)
                            .and_then(|()| stream.set_read_timeout(Some(idle)));
                        if let Err(e) = configured {
                            warn!("unable to configure stream from {}: {}", peer, e);
                            continue;
                        }
                        let front = Arc::clone(&front);
                        let spawned =
                            thread::spawn("rpc-conn", move || front.serve_connection(stream));
                        if let Err(e) = spawned {
                            error!("unable to serve {}: {}", peer, e);
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_BACKOFF)
                    }
                    Err(e) => error!("rpc accept failed: {}", e),
                }
            }
        })?;
        info!("rpc server listening on {}", local_addr);
        Ok(RpcServer {
            local_addr,
            acceptor,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the acceptor to observe the stop flag.
    pub fn join(self) {
        self.acceptor.join();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Persistence;
    use crate::config::CollectorConfig;
    use crate::envelope::KeyMaterial;
    use crate::protocols::rpc::Code;

    fn front() -> RpcFrontEnd {
        let mut config = CollectorConfig::default();
        config.store_file = None;
        RpcFrontEnd::new(Arc::new(Collector::new(
            config,
            KeyMaterial::none(),
            Persistence::new(Vec::new()),
        )))
    }

    fn request(method: &str, args: &[&str]) -> Request {
        Request {
            method: method.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Request::default()
        }
    }

    #[test]
    fn text_update_and_lookup() {
        let f = front();
        assert_eq!(
            f.call(&request(method::UPDATE_TEXT, &["counter", "PollCount", "5"])).code,
            Code::Ok
        );
        f.call(&request(method::UPDATE_TEXT, &["counter", "PollCount", "5"]));
        let resp = f.call(&request(method::VALUE_TEXT, &["counter", "PollCount"]));
        assert_eq!(resp.code, Code::Ok);
        assert_eq!(resp.payload, b"10".to_vec());
    }

    #[test]
    fn status_codes() {
        let f = front();
        let bad = f.call(&request(method::UPDATE_TEXT, &["counter", "x", "abc"]));
        assert_eq!(bad.code, Code::PermissionDenied);
        assert!(!bad.error.is_empty());

        let unknown_kind = f.call(&request(method::UPDATE_TEXT, &["notcounter", "x", "1"]));
        assert_eq!(unknown_kind.code, Code::Unimplemented);

        let missing = f.call(&request(method::VALUE_TEXT, &["gauge", "nope"]));
        assert_eq!(missing.code, Code::NotFound);

        let short = f.call(&request(method::VALUE_TEXT, &["gauge"]));
        assert_eq!(short.code, Code::PermissionDenied);

        let no_such = f.call(&request("Reticulate", &[]));
        assert_eq!(no_such.code, Code::Unimplemented);
    }

    #[test]
    fn idle_connections_are_dropped() {
        use std::io::Read;
        use std::time::Instant;

        let stop = Stop::new();
        let server = RpcServer::with_idle_timeout(
            "127.0.0.1:0",
            front(),
            stop.clone(),
            Duration::from_millis(100),
        )
        .unwrap();
        let mut idle = TcpStream::connect(server.local_addr()).unwrap();
        idle.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let start = Instant::now();
        let mut buf = [0u8; 1];
        assert_eq!(idle.read(&mut buf).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(4));
        stop.raise();
        server.join();
    }
}

//! Tiny, unassuming HTTP server.
//!
//! A pool of threads pulls requests off one `tiny_http` listener, converts
//! each into a transport-neutral `Request`, hands it to the `Handler` and
//! writes back the `Reply`.

use crate::constants::MAX_BODY_BYTES;
use crate::error::Error;
use crate::thread::{self, Stop, ThreadHandle};
use crate::util::{self, Headers};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// An inbound request with its body read in full.
#[derive(Debug, Clone)]
pub struct Request {
    /// Upper-case method, `GET` or `POST`.
    pub method: String,
    /// Path and query.
    pub url: String,
    /// Headers, keys lowercased.
    pub headers: Headers,
    /// Request body.
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request by hand, for tests and tooling.
    pub fn new(method: &str, url: &str, headers: Headers, body: Vec<u8>) -> Request {
        Request {
            method: method.to_uppercase(),
            url: url.to_string(),
            headers,
            body,
        }
    }
}

/// The answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body.
    pub body: Vec<u8>,
}

impl Reply {
    /// A reply with `text/plain` content.
    pub fn text<S: Into<String>>(status: u16, text: S) -> Reply {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain; charset=utf-8".to_string());
        Reply {
            status,
            headers,
            body: text.into().into_bytes(),
        }
    }

    /// A reply built from an error.
    pub fn error(err: &Error) -> Reply {
        Reply::text(err.http_status(), err.body())
    }
}

/// Request handler shared by every server thread.
pub trait Handler: Sync + Send {
    /// Answer one request.
    fn handle(&self, request: Request) -> Reply;
}

/// Multi-threaded HTTP server.
pub struct Server {
    local_addr: Option<SocketAddr>,
    threads: Vec<ThreadHandle>,
}

fn convert(request: &mut tiny_http::Request) -> Result<Request, Error> {
    let headers = util::headers(
        request
            .headers()
            .iter()
            .map(|h| (h.field.as_str().as_str().to_string(), h.value.as_str().to_string())),
    );
    let body = read_body(request.as_reader(), MAX_BODY_BYTES)?;
    Ok(Request {
        method: request.method().as_str().to_uppercase(),
        url: request.url().to_string(),
        headers,
        body,
    })
}

/// Read at most `limit` bytes of body, refusing anything longer.
fn read_body<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(Error::BadRequest(format!("request body exceeds {} bytes", limit)));
    }
    Ok(body)
}

/// tiny_http writes header bytes verbatim, so line breaks would split the
/// response.
fn header_safe(key: &str, value: &str) -> bool {
    !key.bytes().chain(value.bytes()).any(|b| b == b'\r' || b == b'\n')
}

fn respond(request: tiny_http::Request, reply: Reply) {
    let mut response = tiny_http::Response::from_data(reply.body).with_status_code(reply.status);
    for (key, value) in &reply.headers {
        if !header_safe(key, value) {
            warn!("dropping header {:?} containing a line break", key);
            continue;
        }
        match tiny_http::Header::from_bytes(key.as_bytes(), value.as_bytes()) {
            Ok(header) => response = response.with_header(header),
            Err(_) => warn!("dropping unrepresentable header {}", key),
        }
    }
    if let Err(e) = request.respond(response) {
        debug!("failed writing response: {}", e);
    }
}

fn serve<H: Handler>(server: &tiny_http::Server, handler: &H, stop: &Stop) {
    while !stop.is_raised() {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(mut request)) => {
                let reply = match convert(&mut request) {
                    Ok(req) => {
                        trace!("{} {}", req.method, req.url);
                        handler.handle(req)
                    }
                    Err(e) => Reply::error(&e),
                };
                respond(request, reply);
            }
            Ok(None) => {}
            Err(e) => {
                error!("failed receiving request: {}", e);
            }
        }
    }
}

impl Server {
    /// Bind `host_port` and start `workers` threads serving `handler`.
    pub fn new<H>(host_port: &str, workers: usize, handler: H, stop: Stop) -> Result<Server, Error>
    where
        H: Handler + 'static,
    {
        let listener = tiny_http::Server::http(host_port)
            .map_err(|e| Error::Internal(format!("unable to bind {}: {}", host_port, e)))?;
        let local_addr = listener.server_addr().to_ip();
        let listener = Arc::new(listener);
        let handler = Arc::new(handler);
        let mut threads = Vec::with_capacity(workers.max(1));
        for idx in 0..workers.max(1) {
            let listener = Arc::clone(&listener);
            let handler = Arc::clone(&handler);
            let stop = stop.clone();
            threads.push(thread::spawn(&format!("http-{}", idx), move || {
                serve(&listener, &*handler, &stop)
            })?);
        }
        info!("http server listening on {}", host_port);
        Ok(Server {
            local_addr,
            threads,
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Wait for every server thread to observe the stop flag.
    pub fn join(self) {
        for t in self.threads {
            t.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Cursor, Write};
    use std::net::TcpStream;

    struct Fixed;

    impl Handler for Fixed {
        fn handle(&self, request: Request) -> Reply {
            let mut reply = Reply::text(200, request.url);
            reply
                .headers
                .insert("metrics-val".to_string(), "x\r\nSet-Cookie: session=evil".to_string());
            reply.headers.insert("x-plain".to_string(), "fine".to_string());
            reply
        }
    }

    #[test]
    fn bodies_are_capped() {
        assert_eq!(read_body(Cursor::new(vec![7u8; 8]), 8).unwrap().len(), 8);
        match read_body(Cursor::new(vec![7u8; 9]), 8) {
            Err(Error::BadRequest(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn line_breaks_never_reach_the_wire() {
        assert!(header_safe("metrics-val", "a = 1;b = 2"));
        assert!(!header_safe("metrics-val", "x\r\nSet-Cookie: y"));
        assert!(!header_safe("bad\nkey", "v"));

        let stop = Stop::new();
        let server = Server::new("127.0.0.1:0", 1, Fixed, stop.clone()).unwrap();
        let addr = server.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).unwrap();
        stop.raise();
        server.join();

        let head = raw.split("\r\n\r\n").next().unwrap().to_lowercase();
        assert!(head.starts_with("http/1.1 200"));
        assert!(head.contains("x-plain: fine"));
        assert!(!head.contains("set-cookie"));
        assert!(!head.contains("metrics-val"));
    }
}

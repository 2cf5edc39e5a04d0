//! HTTP front end for the collector.

use super::Collector;
use crate::error::Error;
use crate::http::{Handler, Reply, Request};
use crate::util::Headers;
use std::sync::Arc;

/// Routes HTTP requests onto a shared `Collector`.
pub struct HttpFrontEnd {
    collector: Arc<Collector>,
}

fn ok_text(text: &str) -> Reply {
    Reply::text(200, text)
}

fn ok_body(headers: Headers, body: Vec<u8>) -> Reply {
    Reply {
        status: 200,
        headers,
        body,
    }
}

fn json_reply<T: serde::Serialize>(value: &T) -> Result<Reply, Error> {
    let body =
        serde_json::to_vec(value).map_err(|e| Error::Internal(format!("encode: {}", e)))?;
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Ok(ok_body(headers, body))
}

impl HttpFrontEnd {
    /// A front end for `collector`.
    pub fn new(collector: Arc<Collector>) -> HttpFrontEnd {
        HttpFrontEnd { collector }
    }

    fn dispatch(&self, req: &Request) -> Result<Reply, Error> {
        let path = req.url.split('?').next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let c = &self.collector;
        match (req.method.as_str(), segments.as_slice()) {
            ("GET", []) => {
                let (headers, body) = c.read_all_html(&req.headers)?;
                Ok(ok_body(headers, body))
            }
            ("GET", ["value", kind, name]) => Ok(ok_text(&c.read_value_text(kind, name)?)),
            ("POST", ["value"]) => {
                let (headers, body) = c.read_value_json(&req.headers, &req.body)?;
                Ok(ok_body(headers, body))
            }
            ("GET", ["ping"]) => {
                c.readiness_probe(&req.headers)?;
                Ok(ok_text("OK"))
            }
            ("POST", ["update", kind, name, value]) => {
                c.ingest_single_text(&req.headers, kind, name, value)?;
                Ok(ok_text("OK"))
            }
            ("POST", ["update"]) => json_reply(&c.ingest_single_json(&req.headers, &req.body)?),
            ("POST", ["updates"]) => {
                c.ingest_batch(&req.headers, &req.body)?;
                Ok(ok_text("OK"))
            }
            (_, [root, ..]) if ["value", "ping", "update", "updates"].contains(root) => {
                match (req.method.as_str(), *root) {
                    ("GET", "value") | ("POST", "update") => Ok(Reply::text(404, "not found")),
                    _ => Ok(Reply::text(405, "method not allowed")),
                }
            }
            _ => Ok(Reply::text(404, "not found")),
        }
    }

    /// Answer one request.
    pub fn route(&self, req: Request) -> Reply {
        match self.dispatch(&req) {
            Ok(reply) => reply,
            Err(e) => {
                match e.http_status() {
                    500 => error!("{} {}: {}", req.method, req.url, e),
                    _ => warn!("{} {}: {}", req.method, req.url, e),
                }
                Reply::error(&e)
            }
        }
    }
}

impl Handler for HttpFrontEnd {
    fn handle(&self, request: Request) -> Reply {
        self.route(request)
    }
}

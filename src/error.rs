//! Crate-wide error type.
//!
//! Every failure an ingestion boundary can observe is folded into `Error` so
//! the HTTP and RPC front ends translate it into a status the same way.

use crate::protocols::rpc::Code;
use std::error;
use std::fmt;
use std::io;

/// The stage of the inbound envelope that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The body could not be decrypted with the configured private key.
    Decrypt,
    /// The body claimed gzip encoding but did not inflate.
    Decompress,
    /// The body was not a valid JSON wire metric (or array of them).
    Malformed,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecodeStage::Decrypt => write!(f, "decrypt"),
            DecodeStage::Decompress => write!(f, "decompress"),
            DecodeStage::Malformed => write!(f, "malformed input"),
        }
    }
}

/// Errors raised by the agent and the collector.
#[derive(Debug)]
pub enum Error {
    /// Envelope decoding failed at the given stage.
    Decode(DecodeStage, String),
    /// A metric carried a hash that does not match the configured key.
    Authentication {
        /// Name of the rejected metric.
        id: String,
    },
    /// Lookup of an unknown metric name.
    NotFound(String),
    /// The value of a metric could not be parsed or was missing.
    BadRequest(String),
    /// The metric type is neither gauge nor counter.
    NotImplemented(String),
    /// The caller address is outside the trusted subnet.
    Forbidden(String),
    /// Backend or otherwise unexpected failure.
    Internal(String),
    /// Agent-side transport failure.
    Delivery(String),
}

impl Error {
    /// HTTP status code this error is surfaced as.
    pub fn http_status(&self) -> u16 {
        match *self {
            Error::Decode(..) | Error::Internal(_) | Error::Delivery(_) => 500,
            Error::Authentication { .. } | Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::NotImplemented(_) => 501,
            Error::Forbidden(_) => 403,
        }
    }

    /// RPC status code this error is surfaced as.
    pub fn rpc_code(&self) -> Code {
        match *self {
            Error::Decode(..) | Error::Internal(_) | Error::Delivery(_) => Code::Internal,
            Error::Authentication { .. } | Error::BadRequest(_) | Error::Forbidden(_) => {
                Code::PermissionDenied
            }
            Error::NotFound(_) => Code::NotFound,
            Error::NotImplemented(_) => Code::Unimplemented,
        }
    }

    /// Short text body sent back to HTTP clients.
    pub fn body(&self) -> String {
        match *self {
            Error::Forbidden(_) => "Not IP address allowed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Decode(stage, ref detail) => write!(f, "{} error: {}", stage, detail),
            Error::Authentication { ref id } => {
                write!(f, "hash mismatch for metric {}", id)
            }
            Error::NotFound(ref name) => write!(f, "metric {} not found", name),
            Error::BadRequest(ref detail) => write!(f, "bad request: {}", detail),
            Error::NotImplemented(ref kind) => {
                write!(f, "metric type {} not implemented", kind)
            }
            Error::Forbidden(ref ip) => write!(f, "address {} not allowed", ip),
            Error::Internal(ref detail) => write!(f, "internal error: {}", detail),
            Error::Delivery(ref detail) => write!(f, "delivery failed: {}", detail),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Decode(DecodeStage::Malformed, e.to_string())
    }
}

impl From<postgres::Error> for Error {
    fn from(e: postgres::Error) -> Error {
        match e.as_db_error() {
            Some(db) => Error::Internal(format!("{}: {}", db.code().code(), db.message())),
            None => Error::Internal(e.to_string()),
        }
    }
}

impl From<protobuf::ProtobufError> for Error {
    fn from(e: protobuf::ProtobufError) -> Error {
        Error::Internal(format!("rpc framing: {}", e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::NotImplemented("x".into()).http_status(), 501);
        assert_eq!(Error::BadRequest("x".into()).http_status(), 400);
        assert_eq!(Error::NotFound("x".into()).http_status(), 404);
        assert_eq!(Error::Internal("x".into()).http_status(), 500);
        assert_eq!(Error::Forbidden("x".into()).http_status(), 403);

        assert_eq!(Error::BadRequest("x".into()).rpc_code(), Code::PermissionDenied);
        assert_eq!(Error::NotImplemented("x".into()).rpc_code(), Code::Unimplemented);
        assert_eq!(Error::NotFound("x".into()).rpc_code(), Code::NotFound);
    }

    #[test]
    fn forbidden_body_is_fixed() {
        assert_eq!(
            Error::Forbidden("10.0.0.1".into()).body(),
            "Not IP address allowed"
        );
    }
}

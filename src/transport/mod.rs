//! Delivery of sealed batches to the collector.
//!
//! Both transports carry the same envelope and the same headers; only the
//! framing differs. The agent picks one per delivery from its configuration.

mod http;
mod rpc;

pub use self::http::HttpTransport;
pub use self::rpc::RpcTransport;

use crate::config::TransportKind;
use crate::envelope::Sealed;
use crate::error::Error;

/// Something that can carry a sealed batch to the collector.
pub trait Transport: Send {
    /// Deliver one sealed batch. Any failure, transport or remote, is a
    /// delivery error.
    fn deliver(&mut self, sealed: &Sealed) -> Result<(), Error>;
}

/// One transport of each kind, aimed at the same collector.
pub struct Transports {
    http: HttpTransport,
    rpc: RpcTransport,
}

impl Transports {
    /// Transports for the collector at `address`.
    pub fn new(address: &str) -> Result<Transports, Error> {
        Ok(Transports {
            http: HttpTransport::new(address)?,
            rpc: RpcTransport::new(address),
        })
    }

    /// The transport for `kind`.
    pub fn select(&mut self, kind: TransportKind) -> &mut dyn Transport {
        match kind {
            TransportKind::Http => &mut self.http,
            TransportKind::Rpc => &mut self.rpc,
        }
    }
}

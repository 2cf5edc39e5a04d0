use super::Transport;
use crate::envelope::Sealed;
use crate::error::Error;
use crate::protocols::rpc::{self, Code, Request, Response};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls the collector's RPC front end over a reused TCP stream.
pub struct RpcTransport {
    address: String,
    stream: Option<TcpStream>,
}

fn connect(address: &str) -> Result<TcpStream, Error> {
    let addrs = address
        .to_socket_addrs()
        .map_err(|e| Error::Delivery(format!("unable to resolve {}: {}", address, e)))?;
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, IO_TIMEOUT) {
            Ok(stream) => {
                stream.set_read_timeout(Some(IO_TIMEOUT))?;
                stream.set_write_timeout(Some(IO_TIMEOUT))?;
                return Ok(stream);
            }
            Err(e) => {
                info!("unable to connect to {} using addr {}: {}", address, addr, e);
                last = Some(e);
            }
        }
    }
    Err(Error::Delivery(match last {
        Some(e) => format!("unable to connect to {}: {}", address, e),
        None => format!("{} resolved to no addresses", address),
    }))
}

impl RpcTransport {
    /// A transport for the collector at `address`. Connects lazily.
    pub fn new(address: &str) -> RpcTransport {
        RpcTransport {
            address: address.to_string(),
            stream: None,
        }
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, Error> {
        if self.stream.is_none() {
            self.stream = Some(connect(&self.address)?);
        }
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::Delivery("not connected".to_string())),
        };
        rpc::write_frame(stream, &request.encode()?)?;
        match rpc::read_frame(stream)? {
            Some(frame) => Response::decode(&frame),
            None => Err(Error::Delivery("collector closed the connection".to_string())),
        }
    }

    /// Make one call, reconnecting on the next call if this one fails in
    /// transit.
    pub fn call(&mut self, request: &Request) -> Result<Response, Error> {
        let result = self.exchange(request);
        if result.is_err() {
            self.stream = None;
        }
        result.map_err(|e| match e {
            Error::Delivery(_) => e,
            other => Error::Delivery(other.to_string()),
        })
    }
}

impl Transport for RpcTransport {
    fn deliver(&mut self, sealed: &Sealed) -> Result<(), Error> {
        let request = Request {
            method: rpc::method::UPDATES.to_string(),
            metadata: sealed.headers.clone(),
            payload: sealed.body.clone(),
            args: Vec::new(),
        };
        let response = self.call(&request)?;
        if response.error.is_empty() && response.code == Code::Ok {
            Ok(())
        } else {
            Err(Error::Delivery(format!(
                "{} answered {:?}: {}",
                self.address, response.code, response.error
            )))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::Headers;

    #[test]
    fn unreachable_collector_is_a_delivery_error() {
        let mut transport = RpcTransport::new("127.0.0.1:1");
        let sealed = Sealed {
            body: vec![1, 2, 3],
            headers: Headers::new(),
        };
        match transport.deliver(&sealed) {
            Err(Error::Delivery(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(transport.stream.is_none());
    }
}

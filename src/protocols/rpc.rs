//! Remote-procedure framing shared by the agent's RPC transport and the
//! collector's RPC front end.
//!
//! Each call is a single request frame answered by a single response frame
//! over a TCP stream which may carry many calls in sequence. A frame is a
//! four byte big-endian length followed by that many bytes of protobuf:
//!
//! ```text
//! Request  { 1: method string, 2: repeated Entry metadata, 3: bytes payload,
//!            4: repeated string args }
//! Response { 1: uint32 code, 2: string error, 3: repeated Entry metadata,
//!            4: bytes payload }
//! Entry    { 1: string key, 2: string value }
//! ```

use crate::error::Error;
use crate::util::Headers;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use protobuf::wire_format::{WireType, WireTypeLengthDelimited, WireTypeVarint};
use protobuf::{CodedInputStream, CodedOutputStream, ProtobufResult, UnknownFields};
use std::io::{self, Read, Write};

/// Largest frame either side accepts.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Method names understood by the collector.
pub mod method {
    /// Ingest a batch of wire metrics.
    pub const UPDATES: &str = "UpdatesAllMetricsJSON";
    /// Ingest one JSON wire metric, with write-through.
    pub const UPDATE_JSON: &str = "UpdateOneMetricsJSON";
    /// Ingest one metric given as `[type, name, value]` args.
    pub const UPDATE_TEXT: &str = "UpdateOneMetrics";
    /// Database readiness probe.
    pub const PING: &str = "PingDataBases";
    /// Look up one metric given as a JSON query.
    pub const VALUE_JSON: &str = "GetValueJSON";
    /// Look up one metric given as `[type, name]` args.
    pub const VALUE_TEXT: &str = "GetValue";
    /// Render every metric as HTML.
    pub const LIST: &str = "GetListMetrics";
}

/// Status codes carried in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// Success.
    Ok,
    /// The request itself could not be understood.
    InvalidArgument,
    /// Unknown metric name.
    NotFound,
    /// Bad value, bad signature or disallowed caller.
    PermissionDenied,
    /// Unknown metric type or method.
    Unimplemented,
    /// Everything else.
    Internal,
    /// The service could not be reached.
    Unavailable,
}

impl Code {
    /// Numeric form on the wire.
    pub fn as_u32(&self) -> u32 {
        match *self {
            Code::Ok => 0,
            Code::InvalidArgument => 3,
            Code::NotFound => 5,
            Code::PermissionDenied => 7,
            Code::Unimplemented => 12,
            Code::Internal => 13,
            Code::Unavailable => 14,
        }
    }

    /// Parse the numeric form; unknown values are treated as internal.
    pub fn from_u32(raw: u32) -> Code {
        match raw {
            0 => Code::Ok,
            3 => Code::InvalidArgument,
            5 => Code::NotFound,
            7 => Code::PermissionDenied,
            12 => Code::Unimplemented,
            14 => Code::Unavailable,
            _ => Code::Internal,
        }
    }
}

/// A call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    /// One of the `method` constants.
    pub method: String,
    /// Call metadata, the RPC rendition of HTTP headers.
    pub metadata: Headers,
    /// Opaque body, typically a sealed envelope.
    pub payload: Vec<u8>,
    /// Positional arguments for the text variants.
    pub args: Vec<String>,
}

/// The answer to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Outcome of the call.
    pub code: Code,
    /// Error text, empty on success.
    pub error: String,
    /// Response metadata.
    pub metadata: Headers,
    /// Opaque body.
    pub payload: Vec<u8>,
}

impl Response {
    /// A successful response.
    pub fn ok(metadata: Headers, payload: Vec<u8>) -> Response {
        Response {
            code: Code::Ok,
            error: String::new(),
            metadata,
            payload,
        }
    }

    /// A failed response echoing `err`.
    pub fn from_error(err: &Error) -> Response {
        Response {
            code: err.rpc_code(),
            error: err.to_string(),
            metadata: Headers::new(),
            payload: Vec::new(),
        }
    }
}

fn write_metadata(os: &mut CodedOutputStream, field: u32, metadata: &Headers) -> ProtobufResult<()> {
    for (key, value) in metadata {
        let mut entry = Vec::new();
        {
            let mut eos = CodedOutputStream::new(&mut entry);
            eos.write_string(1, key)?;
            eos.write_string(2, value)?;
            eos.flush()?;
        }
        os.write_bytes(field, &entry)?;
    }
    Ok(())
}

fn read_entry(bytes: &[u8], metadata: &mut Headers) -> ProtobufResult<()> {
    let mut is = CodedInputStream::from_bytes(bytes);
    let mut unknown = UnknownFields::new();
    let mut key = String::new();
    let mut value = String::new();
    while !is.eof()? {
        let (field_number, wire_type) = is.read_tag_unpack()?;
        match field_number {
            1 => {
                expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                key = is.read_string()?;
            }
            2 => {
                expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                value = is.read_string()?;
            }
            _ => {
                protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, &mut is, &mut unknown)?;
            }
        }
    }
    metadata.insert(key.to_lowercase(), value);
    Ok(())
}

fn expect_wire_type(actual: WireType, expected: WireType) -> ProtobufResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(protobuf::rt::unexpected_wire_type(actual))
    }
}

impl Request {
    /// Serialize into protobuf bytes, without the length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(self.payload.len() + 64);
        {
            let mut os = CodedOutputStream::new(&mut buf);
            os.write_string(1, &self.method)?;
            write_metadata(&mut os, 2, &self.metadata)?;
            os.write_bytes(3, &self.payload)?;
            for arg in &self.args {
                os.write_string(4, arg)?;
            }
            os.flush()?;
        }
        Ok(buf)
    }

    /// Parse protobuf bytes.
    pub fn decode(bytes: &[u8]) -> Result<Request, Error> {
        let mut req = Request::default();
        let mut is = CodedInputStream::from_bytes(bytes);
        let mut unknown = UnknownFields::new();
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    req.method = is.read_string()?;
                }
                2 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    let entry = is.read_bytes()?;
                    read_entry(&entry, &mut req.metadata)?;
                }
                3 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    req.payload = is.read_bytes()?;
                }
                4 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    req.args.push(is.read_string()?);
                }
                _ => {
                    protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, &mut is, &mut unknown)?;
                }
            }
        }
        Ok(req)
    }
}

impl Response {
    /// Serialize into protobuf bytes, without the length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(self.payload.len() + 64);
        {
            let mut os = CodedOutputStream::new(&mut buf);
            os.write_uint32(1, self.code.as_u32())?;
            os.write_string(2, &self.error)?;
            write_metadata(&mut os, 3, &self.metadata)?;
            os.write_bytes(4, &self.payload)?;
            os.flush()?;
        }
        Ok(buf)
    }

    /// Parse protobuf bytes.
    pub fn decode(bytes: &[u8]) -> Result<Response, Error> {
        let mut resp = Response::ok(Headers::new(), Vec::new());
        let mut is = CodedInputStream::from_bytes(bytes);
        let mut unknown = UnknownFields::new();
        while !is.eof()? {
            let (field_number, wire_type) = is.read_tag_unpack()?;
            match field_number {
                1 => {
                    expect_wire_type(wire_type, WireTypeVarint)?;
                    resp.code = Code::from_u32(is.read_uint32()?);
                }
                2 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    resp.error = is.read_string()?;
                }
                3 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    let entry = is.read_bytes()?;
                    read_entry(&entry, &mut resp.metadata)?;
                }
                4 => {
                    expect_wire_type(wire_type, WireTypeLengthDelimited)?;
                    resp.payload = is.read_bytes()?;
                }
                _ => {
                    protobuf::rt::read_unknown_or_skip_group(field_number, wire_type, &mut is, &mut unknown)?;
                }
            }
        }
        Ok(resp)
    }
}

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, message: &[u8]) -> Result<(), Error> {
    if message.len() > MAX_FRAME_BYTES as usize {
        return Err(Error::Internal(format!(
            "frame of {} bytes exceeds {}",
            message.len(),
            MAX_FRAME_BYTES
        )));
    }
    writer.write_u32::<BigEndian>(message.len() as u32)?;
    writer.write_all(message)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. `None` when the peer closed the stream
/// between frames.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, Error> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len,
        Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_BYTES {
        return Err(Error::Internal(format!(
            "peer announced {} byte frame, limit {}",
            len, MAX_FRAME_BYTES
        )));
    }
    let mut buf = vec![0; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util;
    use std::io::Cursor;

    #[test]
    fn request_survives_framing() {
        let req = Request {
            method: method::UPDATES.to_string(),
            metadata: util::headers(vec![("Content-Encoding", "gzip"), ("X-Real-IP", "10.0.0.1")]),
            payload: vec![1, 2, 3, 0, 255],
            args: vec!["counter".to_string(), "PollCount".to_string()],
        };
        let mut wire = Vec::new();
        write_frame(&mut wire, &req.encode().unwrap()).unwrap();
        let mut cursor = Cursor::new(wire);
        let frame = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(Request::decode(&frame).unwrap(), req);
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn error_response_carries_text() {
        let resp = Response::from_error(&Error::NotFound("Alloc".to_string()));
        let decoded = Response::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded.code, Code::NotFound);
        assert_eq!(decoded.error, "metric Alloc not found");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn oversized_frames_are_refused() {
        let mut wire = Vec::new();
        wire.write_u32::<BigEndian>(MAX_FRAME_BYTES + 1).unwrap();
        assert!(read_frame(&mut Cursor::new(wire)).is_err());
    }

    #[test]
    fn codes_round_trip() {
        for code in &[
            Code::Ok,
            Code::InvalidArgument,
            Code::NotFound,
            Code::PermissionDenied,
            Code::Unimplemented,
            Code::Internal,
            Code::Unavailable,
        ] {
            assert_eq!(Code::from_u32(code.as_u32()), *code);
        }
    }
}

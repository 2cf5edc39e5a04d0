//! gzip framing for envelope bodies.

use crate::error::{DecodeStage, Error};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// Gzip `payload` at the default level.
pub fn compress(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip body.
pub fn decompress(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::with_capacity(body.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Decode(DecodeStage::Decompress, e.to_string()))?;
    Ok(out)
}

//! The integrity envelope wrapped around every batch.
//!
//! Outbound, a batch is JSON encoded, gzipped and, when a public key is
//! configured, RSA-OAEP encrypted. Inbound runs the inverse, each stage gated
//! by the header announcing it: `Content-Encryption` must name our scheme
//! before we decrypt, and `Content-Encoding` must say gzip before we inflate.
//! Per-metric signatures live on the metrics themselves, see
//! `metric::WireMetric::sign`.

pub mod compression;
pub mod encryption;
pub mod hash;

pub use self::encryption::KeyMaterial;
pub use self::hash::Signer;

use crate::constants::{header, ENCRYPTION_SCHEME};
use crate::error::Error;
use crate::metric::WireMetric;
use crate::util::{header_contains, Headers};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A body ready for transport along with the headers describing it.
#[derive(Debug, Clone)]
pub struct Sealed {
    /// Compressed and possibly encrypted payload.
    pub body: Vec<u8>,
    /// Headers both transports forward verbatim.
    pub headers: Headers,
}

/// Encode, compress and optionally encrypt `payload`.
///
/// `real_ip` is forwarded as `X-Real-IP` when non-empty.
pub fn seal<T: Serialize + ?Sized>(
    payload: &T,
    keys: &KeyMaterial,
    real_ip: &str,
) -> Result<Sealed, Error> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| Error::Internal(format!("encode: {}", e)))?;
    let mut body = compression::compress(&json)?;

    let mut headers = Headers::new();
    headers.insert(header::CONTENT_TYPE.to_string(), "application/json".to_string());
    headers.insert(header::CONTENT_ENCODING.to_string(), "gzip".to_string());
    if keys.can_encrypt() {
        body = keys.encrypt(&body)?;
        headers.insert(
            header::CONTENT_ENCRYPTION.to_string(),
            ENCRYPTION_SCHEME.to_string(),
        );
    }
    if !real_ip.is_empty() {
        headers.insert(header::REAL_IP.to_string(), real_ip.to_string());
    }
    Ok(Sealed { body, headers })
}

/// Undo whichever stages `headers` announce, returning the raw JSON bytes.
pub fn open(headers: &Headers, body: &[u8], keys: &KeyMaterial) -> Result<Vec<u8>, Error> {
    let mut plain = if header_contains(headers, header::CONTENT_ENCRYPTION, ENCRYPTION_SCHEME) {
        keys.decrypt(body)?
    } else {
        body.to_vec()
    };
    if header_contains(headers, header::CONTENT_ENCODING, "gzip") {
        plain = compression::decompress(&plain)?;
    }
    Ok(plain)
}

/// Open and decode a JSON body of any shape.
pub fn decode<T: DeserializeOwned>(
    headers: &Headers,
    body: &[u8],
    keys: &KeyMaterial,
) -> Result<T, Error> {
    let plain = open(headers, body, keys)?;
    Ok(serde_json::from_slice(&plain)?)
}

/// Open and decode a batch of wire metrics.
pub fn decode_batch(
    headers: &Headers,
    body: &[u8],
    keys: &KeyMaterial,
) -> Result<Vec<WireMetric>, Error> {
    decode(headers, body, keys)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::DecodeStage;
    use crate::util;
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn batch() -> Vec<WireMetric> {
        vec![WireMetric::gauge("Alloc", 12.5), WireMetric::counter("PollCount", 4)]
    }

    #[test]
    fn compress_only_round_trip() {
        let sealed = seal(&batch(), &KeyMaterial::none(), "10.0.0.2").unwrap();
        assert_eq!(sealed.headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert!(sealed.headers.get(header::CONTENT_ENCRYPTION).is_none());
        assert_eq!(sealed.headers.get(header::REAL_IP).unwrap(), "10.0.0.2");

        let opened = decode_batch(&sealed.headers, &sealed.body, &KeyMaterial::none()).unwrap();
        assert_eq!(opened, batch());
    }

    #[test]
    fn encrypted_round_trip() {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        let sealed = seal(&batch(), &KeyMaterial::with_public(public), "").unwrap();
        assert_eq!(
            sealed.headers.get(header::CONTENT_ENCRYPTION).unwrap(),
            ENCRYPTION_SCHEME
        );
        let opened =
            decode_batch(&sealed.headers, &sealed.body, &KeyMaterial::with_private(private))
                .unwrap();
        assert_eq!(opened, batch());
    }

    #[test]
    fn plain_body_passes_through() {
        let body = serde_json::to_vec(&batch()).unwrap();
        let opened = decode_batch(&Headers::new(), &body, &KeyMaterial::none()).unwrap();
        assert_eq!(opened, batch());
    }

    #[test]
    fn stage_errors_are_distinct() {
        let gz = util::headers(vec![("Content-Encoding", "gzip")]);
        match decode_batch(&gz, b"not gzip", &KeyMaterial::none()) {
            Err(Error::Decode(DecodeStage::Decompress, _)) => {}
            other => panic!("unexpected {:?}", other),
        }

        match decode_batch(&Headers::new(), b"{not json", &KeyMaterial::none()) {
            Err(Error::Decode(DecodeStage::Malformed, _)) => {}
            other => panic!("unexpected {:?}", other),
        }

        let enc = util::headers(vec![("Content-Encryption", "sha512")]);
        match decode_batch(&enc, b"opaque", &KeyMaterial::none()) {
            Err(Error::Decode(DecodeStage::Decrypt, _)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}

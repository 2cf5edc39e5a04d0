//! Keyed signing of canonical metric strings.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer. An empty key disables signing.
#[derive(Clone, Default)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    /// Create a signer over `key`.
    pub fn new<K: AsRef<[u8]>>(key: K) -> Signer {
        Signer {
            key: key.as_ref().to_vec(),
        }
    }

    /// Whether a key is configured.
    pub fn enabled(&self) -> bool {
        !self.key.is_empty()
    }

    fn mac(&self, canonical: &str) -> Option<HmacSha256> {
        if !self.enabled() {
            return None;
        }
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(canonical.as_bytes());
        Some(mac)
    }

    /// Hex HMAC of `canonical`, empty when signing is disabled.
    pub fn sign(&self, canonical: &str) -> String {
        match self.mac(canonical) {
            Some(mac) => hex::encode(mac.finalize().into_bytes()),
            None => String::new(),
        }
    }

    /// Constant-time comparison of `hash` against the HMAC of `canonical`.
    pub fn verify(&self, canonical: &str, hash: &str) -> bool {
        let expected = match hex::decode(hash) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        match self.mac(canonical) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => true,
        }
    }
}

//! RSA-OAEP encryption of envelope bodies.
//!
//! The agent encrypts with the collector's public key, the collector decrypts
//! with the matching private key. OAEP can only seal a bounded number of bytes
//! per operation, so longer payloads are cut into blocks and each block is
//! sealed separately. Every ciphertext block is exactly the modulus size,
//! which is how the receiving side splits them apart again.

use crate::error::{DecodeStage, Error};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512_256;
use std::fs;
use std::path::Path;

// Output size of SHA-512/256 in bytes.
const DIGEST_LEN: usize = 32;

/// Asymmetric key material loaded at startup.
///
/// Either side may be absent; an absent key disables the stage it drives.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    public: Option<RsaPublicKey>,
    private: Option<RsaPrivateKey>,
}

fn padding() -> Oaep {
    Oaep::new::<Sha512_256>()
}

impl KeyMaterial {
    /// No keys: compress-only outbound, pass-through inbound.
    pub fn none() -> KeyMaterial {
        KeyMaterial::default()
    }

    /// Key material able to encrypt.
    pub fn with_public(key: RsaPublicKey) -> KeyMaterial {
        KeyMaterial {
            public: Some(key),
            private: None,
        }
    }

    /// Key material able to decrypt.
    pub fn with_private(key: RsaPrivateKey) -> KeyMaterial {
        KeyMaterial {
            public: None,
            private: Some(key),
        }
    }

    /// Load a PEM public key (SPKI or PKCS#1).
    ///
    /// Failures are logged and yield key material that does not encrypt.
    pub fn load_public(path: &Path) -> KeyMaterial {
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|pem| {
                RsaPublicKey::from_public_key_pem(&pem)
                    .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok(key) => {
                info!("loaded public key from {}", path.display());
                KeyMaterial::with_public(key)
            }
            Err(e) => {
                warn!(
                    "unable to load public key {}, encryption disabled: {}",
                    path.display(),
                    e
                );
                KeyMaterial::none()
            }
        }
    }

    /// Load a PEM private key (PKCS#1 or PKCS#8).
    ///
    /// Failures are logged and yield key material that does not decrypt.
    pub fn load_private(path: &Path) -> KeyMaterial {
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|pem| {
                RsaPrivateKey::from_pkcs1_pem(&pem)
                    .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok(key) => {
                info!("loaded private key from {}", path.display());
                KeyMaterial::with_private(key)
            }
            Err(e) => {
                warn!(
                    "unable to load private key {}, decryption disabled: {}",
                    path.display(),
                    e
                );
                KeyMaterial::none()
            }
        }
    }

    /// Whether a public key is present.
    pub fn can_encrypt(&self) -> bool {
        self.public.is_some()
    }

    /// Seal `plain` with the public key.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, Error> {
        let key = match self.public {
            Some(ref key) => key,
            None => return Err(Error::Internal("no public key configured".to_string())),
        };
        let block = key.size().saturating_sub(2 * DIGEST_LEN + 2);
        if block == 0 {
            return Err(Error::Internal("public key too small for OAEP".to_string()));
        }
        let mut rng = rand::thread_rng();
        let mut sealed = Vec::with_capacity((plain.len() / block + 1) * key.size());
        for chunk in plain.chunks(block) {
            let ct = key
                .encrypt(&mut rng, padding(), chunk)
                .map_err(|e| Error::Internal(format!("encrypt: {}", e)))?;
            sealed.extend_from_slice(&ct);
        }
        Ok(sealed)
    }

    /// Open a body sealed by `encrypt`.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        let key = match self.private {
            Some(ref key) => key,
            None => {
                return Err(Error::Decode(
                    DecodeStage::Decrypt,
                    "no private key configured".to_string(),
                ))
            }
        };
        let size = key.size();
        if sealed.is_empty() || sealed.len() % size != 0 {
            return Err(Error::Decode(
                DecodeStage::Decrypt,
                format!("ciphertext length {} is not a multiple of {}", sealed.len(), size),
            ));
        }
        let mut plain = Vec::with_capacity(sealed.len());
        for chunk in sealed.chunks(size) {
            let pt = key
                .decrypt(padding(), chunk)
                .map_err(|e| Error::Decode(DecodeStage::Decrypt, e.to_string()))?;
            plain.extend_from_slice(&pt);
        }
        Ok(plain)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use tempdir::TempDir;

    fn pair() -> (KeyMaterial, KeyMaterial) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (KeyMaterial::with_public(public), KeyMaterial::with_private(private))
    }

    #[test]
    fn multi_block_payload() {
        let (public, private) = pair();
        let payload: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let sealed = public.encrypt(&payload).unwrap();
        assert_eq!(sealed.len() % 128, 0);
        assert_eq!(private.decrypt(&sealed).unwrap(), payload);
    }

    #[test]
    fn wrong_key_is_a_decrypt_error() {
        let (public, _) = pair();
        let (_, other_private) = pair();
        let sealed = public.encrypt(b"hello").unwrap();
        match other_private.decrypt(&sealed) {
            Err(Error::Decode(DecodeStage::Decrypt, _)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match KeyMaterial::none().decrypt(&sealed) {
            Err(Error::Decode(DecodeStage::Decrypt, _)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn loads_pem_files() {
        let dir = TempDir::new("telemeter-keys").unwrap();
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        let priv_path = dir.path().join("private.pem");
        let pub_path = dir.path().join("public.pem");
        fs::write(&priv_path, private.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes())
            .unwrap();
        fs::write(&pub_path, public.to_public_key_pem(LineEnding::LF).unwrap()).unwrap();

        let sealer = KeyMaterial::load_public(&pub_path);
        let opener = KeyMaterial::load_private(&priv_path);
        assert!(sealer.can_encrypt());
        let sealed = sealer.encrypt(b"metrics").unwrap();
        assert_eq!(opener.decrypt(&sealed).unwrap(), b"metrics".to_vec());
    }

    #[test]
    fn missing_key_file_disables() {
        let km = KeyMaterial::load_public(Path::new("/nonexistent/telemeter.pem"));
        assert!(!km.can_encrypt());
    }
}

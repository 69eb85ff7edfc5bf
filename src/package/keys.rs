//! Trusted package-signing keys
//!
//! Keys come from a PEM bundle holding `PUBLIC KEY` (SubjectPublicKeyInfo)
//! and/or `CERTIFICATE` (X.509) blocks. Only P-256 keys are accepted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::DecodePublicKey;
use thiserror::Error;

const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";
const CERTIFICATE_TAG: &str = "CERTIFICATE";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("can't read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed PEM in {path}: {reason}")]
    Pem { path: PathBuf, reason: String },

    #[error("key #{index} in {path} is unusable: {reason}")]
    BadKey {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("no usable keys in {0}")]
    NoKeys(PathBuf),
}

/// One trusted signer.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    /// Position of the block in the bundle, for log messages
    pub index: usize,
    pub key: VerifyingKey,
}

/// Ordered set of keys loaded once per install attempt.
#[derive(Debug, Clone)]
pub struct TrustedKeySet {
    keys: Vec<TrustedKey>,
}

impl TrustedKeySet {
    pub fn new(keys: Vec<VerifyingKey>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .enumerate()
                .map(|(index, key)| TrustedKey { index, key })
                .collect(),
        }
    }

    /// Load every usable key from the PEM bundle at `path`.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let text = fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&text, path)
    }

    fn from_pem(text: &str, path: &Path) -> Result<Self, KeyError> {
        let blocks = pem::parse_many(text).map_err(|e| KeyError::Pem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut keys = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            let spki = match block.tag() {
                PUBLIC_KEY_TAG => block.contents().to_vec(),
                CERTIFICATE_TAG => certificate_spki(block.contents()).map_err(|reason| {
                    KeyError::BadKey {
                        path: path.to_path_buf(),
                        index,
                        reason,
                    }
                })?,
                other => {
                    warn!("skipping PEM block #{index} ({other}) in {}", path.display());
                    continue;
                }
            };

            let key = VerifyingKey::from_public_key_der(&spki).map_err(|e| KeyError::BadKey {
                path: path.to_path_buf(),
                index,
                reason: e.to_string(),
            })?;
            debug!("loaded key #{index} from {}", path.display());
            keys.push(TrustedKey { index, key });
        }

        if keys.is_empty() {
            return Err(KeyError::NoKeys(path.to_path_buf()));
        }
        Ok(Self { keys })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustedKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Raw SubjectPublicKeyInfo of a DER certificate.
fn certificate_spki(der: &[u8]) -> Result<Vec<u8>, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| e.to_string())?;
    Ok(cert.public_key().raw.to_vec())
}

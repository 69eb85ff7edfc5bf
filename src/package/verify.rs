//! Whole-package signature verification
//!
//! A signed package is a zip archive whose comment ends with a 6-byte footer:
//!
//! ```text
//! [signature_start: u16 LE][0xFF 0xFF][comment_size: u16 LE]
//! ```
//!
//! The signature occupies `[len - signature_start, len - 6)`. It covers every
//! byte of the file up to, but excluding, the comment-length field of the
//! end-of-central-directory record, i.e. `[0, len - comment_size - 2)`.

use log::{debug, info};
use p256::ecdsa::Signature;
use p256::ecdsa::signature::Verifier;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::keys::TrustedKeySet;

const FOOTER_SIZE: usize = 6;
const EOCD_HEADER_SIZE: usize = 22;
const EOCD_MAGIC: [u8; 4] = *b"PK\x05\x06";
const RAW_SIGNATURE_SIZE: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("package too short ({0} bytes)")]
    TooShort(usize),

    #[error("no signature footer")]
    NoFooter,

    #[error("signature start {signature_start} outside comment of {comment_size} bytes")]
    BadFooter {
        signature_start: usize,
        comment_size: usize,
    },

    #[error("end-of-central-directory record not found where the footer says")]
    BadEocd,

    #[error("end-of-central-directory marker repeated inside the comment")]
    AmbiguousEocd,

    #[error("malformed signature: {0}")]
    BadSignature(String),

    #[error("signature matches none of the trusted keys")]
    NoMatchingKey,
}

/// Signature footer decoded from the tail of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFooter {
    pub signature_start: usize,
    pub comment_size: usize,
}

impl SignatureFooter {
    pub fn parse(package: &[u8]) -> Result<Self, VerifyError> {
        let len = package.len();
        if len < FOOTER_SIZE + EOCD_HEADER_SIZE {
            return Err(VerifyError::TooShort(len));
        }

        let footer = &package[len - FOOTER_SIZE..];
        if footer[2] != 0xff || footer[3] != 0xff {
            return Err(VerifyError::NoFooter);
        }

        let signature_start = usize::from(u16::from_le_bytes([footer[0], footer[1]]));
        let comment_size = usize::from(u16::from_le_bytes([footer[4], footer[5]]));
        if signature_start > comment_size || signature_start <= FOOTER_SIZE {
            return Err(VerifyError::BadFooter {
                signature_start,
                comment_size,
            });
        }

        Ok(Self {
            signature_start,
            comment_size,
        })
    }

    /// Length of the prefix covered by the signature.
    pub fn signed_len(&self, package_len: usize) -> usize {
        package_len - self.comment_size - 2
    }
}

/// Check `package` against every trusted key.
///
/// Returns the index of the key that verified the package.
pub fn verify_package(package: &[u8], keys: &TrustedKeySet) -> Result<usize, VerifyError> {
    let footer = SignatureFooter::parse(package)?;
    let len = package.len();

    let eocd_size = footer.comment_size + EOCD_HEADER_SIZE;
    if eocd_size > len {
        return Err(VerifyError::BadEocd);
    }
    let eocd = &package[len - eocd_size..];
    if eocd[..4] != EOCD_MAGIC {
        return Err(VerifyError::BadEocd);
    }
    // A second marker in the comment would let a zip reader pick a different
    // directory than the one covered by the signature.
    if eocd[4..].windows(EOCD_MAGIC.len()).any(|w| w == EOCD_MAGIC) {
        return Err(VerifyError::AmbiguousEocd);
    }

    let signed = &package[..footer.signed_len(len)];
    let signature_bytes = &package[len - footer.signature_start..len - FOOTER_SIZE];
    let signature = decode_signature(signature_bytes)?;

    info!("package sha256 {}", hex::encode(Sha256::digest(signed)));

    for trusted in keys.iter() {
        if trusted.key.verify(signed, &signature).is_ok() {
            info!("whole-file signature verified against key #{}", trusted.index);
            return Ok(trusted.index);
        }
        debug!("failed to verify against key #{}", trusted.index);
    }
    Err(VerifyError::NoMatchingKey)
}

fn decode_signature(bytes: &[u8]) -> Result<Signature, VerifyError> {
    let decoded = if bytes.len() == RAW_SIGNATURE_SIZE {
        Signature::from_slice(bytes)
    } else {
        Signature::from_der(bytes)
    };
    decoded.map_err(|e| VerifyError::BadSignature(e.to_string()))
}

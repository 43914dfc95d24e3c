//! Public-key fingerprints for the operator accept prompt.
//!
//! A fingerprint is the 32-byte BLAKE2b digest of a raw public key, rendered
//! as URL-safe base64 without padding (43 characters).  That is the same
//! string the input device displays, so an operator can compare the two.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::crypto::CryptoError;

type Blake2b256 = Blake2b<U32>;

/// Digest length in bytes.
pub const FINGERPRINT_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Hashes a raw public key.
    pub fn of(public_key: &[u8]) -> Self {
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&Blake2b256::digest(public_key));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s.trim())
            .map_err(|e| CryptoError::InvalidFingerprint(e.to_string()))?;
        let digest: [u8; FINGERPRINT_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidFingerprint(format!(
                "expected {FINGERPRINT_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(digest))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

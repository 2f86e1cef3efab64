//! Container integrity digests
//!
//! Two modes, chosen per trust domain by configuration and never inferred from
//! the claim:
//!
//! - **Keyed**: HMAC-SHA256. Tamper-evident against anyone without the key.
//! - **Unkeyed**: plain SHA-256. Detects corruption only; any holder of the
//!   claim can recompute it after editing the container.
//!
//! A digest produced in one mode never verifies in the other.

use crate::error::KeyError;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Shortest HMAC key accepted, in bytes
pub const MIN_INTEGRITY_KEY_LEN: usize = 32;

#[derive(Clone)]
pub enum IntegrityMode {
    Unkeyed,
    Keyed(HmacSha256),
}

impl IntegrityMode {
    /// Keyed mode from raw key bytes
    pub fn keyed(key: &[u8]) -> Result<Self, KeyError> {
        if key.len() < MIN_INTEGRITY_KEY_LEN {
            return Err(KeyError::IntegrityKeyTooShort {
                min: MIN_INTEGRITY_KEY_LEN,
                got: key.len(),
            });
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|e| KeyError::Invalid(e.to_string()))?;
        Ok(IntegrityMode::Keyed(mac))
    }

    pub fn name(&self) -> &'static str {
        match self {
            IntegrityMode::Unkeyed => "unkeyed",
            IntegrityMode::Keyed(_) => "keyed",
        }
    }

    /// Digest over the exact transmitted bytes
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            IntegrityMode::Unkeyed => Sha256::digest(data).to_vec(),
            IntegrityMode::Keyed(mac) => {
                let mut mac = mac.clone();
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Constant-time comparison of `expected` against the recomputed digest
    pub fn verify(&self, data: &[u8], expected: &[u8]) -> bool {
        match self {
            IntegrityMode::Unkeyed => {
                let actual = Sha256::digest(data);
                actual.as_slice().ct_eq(expected).into()
            }
            IntegrityMode::Keyed(mac) => {
                let mut mac = mac.clone();
                mac.update(data);
                mac.verify_slice(expected).is_ok()
            }
        }
    }
}

impl fmt::Debug for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityMode::Unkeyed => f.write_str("Unkeyed"),
            IntegrityMode::Keyed(_) => f.write_str("Keyed(<redacted>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_unkeyed_matches_sha256() {
        let digest = IntegrityMode::Unkeyed.digest(b"hello world");
        assert_eq!(
            hex::encode(&digest),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_verify_round_trip_both_modes() {
        let keyed = IntegrityMode::keyed(KEY).unwrap();
        for mode in [IntegrityMode::Unkeyed, keyed] {
            let digest = mode.digest(b"container");
            assert!(mode.verify(b"container", &digest), "{}", mode.name());
            assert!(!mode.verify(b"containeR", &digest), "{}", mode.name());
        }
    }

    #[test]
    fn test_modes_are_not_interchangeable() {
        let keyed = IntegrityMode::keyed(KEY).unwrap();
        let plain = IntegrityMode::Unkeyed.digest(b"container");
        let mac = keyed.digest(b"container");

        assert_ne!(plain, mac);
        assert!(!keyed.verify(b"container", &plain));
        assert!(!IntegrityMode::Unkeyed.verify(b"container", &mac));
    }

    #[test]
    fn test_different_keys_disagree() {
        let a = IntegrityMode::keyed(KEY).unwrap();
        let b = IntegrityMode::keyed(&[7u8; 32]).unwrap();
        assert!(!b.verify(b"container", &a.digest(b"container")));
    }

    #[test]
    fn test_truncated_digest_fails() {
        let digest = IntegrityMode::Unkeyed.digest(b"container");
        assert!(!IntegrityMode::Unkeyed.verify(b"container", &digest[..16]));
        assert!(!IntegrityMode::Unkeyed.verify(b"container", &[]));
    }

    #[test]
    fn test_short_key_rejected() {
        let err = IntegrityMode::keyed(b"short").unwrap_err();
        assert!(matches!(err, KeyError::IntegrityKeyTooShort { min: 32, got: 5 }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let keyed = IntegrityMode::keyed(KEY).unwrap();
        assert_eq!(format!("{keyed:?}"), "Keyed(<redacted>)");
    }
}

//! Container Unwrapper
//!
//! Turns one `auth_stack` claim back into the previous layer's token bytes:
//!
//! 1. Recompute the integrity digest over `container` exactly as received
//! 2. Compare in constant time; a mismatch stops here, before any decoding
//! 3. If `cmp` is set, base64-decode and run the registered decompressor
//! 4. Hand back the token bytes untouched
//!
//! [`seal`] is the issuing side of the same format.

use crate::claim::{AuthStackClaim, Compression, IntegrityHash, TokenFormat};
use crate::codec::CodecRegistry;
use crate::error::{CodecError, UnwrapError};
use crate::integrity::IntegrityMode;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on a decoded container, in bytes
pub const DEFAULT_MAX_CONTAINER_BYTES: usize = 1024 * 1024;

/// Largest container cap configuration may ask for
pub const MAX_CONTAINER_BYTES_CEILING: usize = 64 * 1024 * 1024;

/// URL-safe alphabet; padding is never written and optional on read
const CONTAINER_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Previous layer's token, exactly as it was issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken(Vec<u8>);

impl RawToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Verifies and decodes containers for one trust domain
///
/// Cheap to clone: the registry is shared.
#[derive(Debug, Clone)]
pub struct ContainerUnwrapper {
    codecs: Arc<CodecRegistry>,
    integrity: IntegrityMode,
    max_container_bytes: usize,
}

impl ContainerUnwrapper {
    pub fn new(codecs: Arc<CodecRegistry>, integrity: IntegrityMode) -> Self {
        Self {
            codecs,
            integrity,
            max_container_bytes: DEFAULT_MAX_CONTAINER_BYTES,
        }
    }

    pub fn with_max_container_bytes(mut self, limit: usize) -> Self {
        self.max_container_bytes = limit;
        self
    }

    pub fn integrity(&self) -> &IntegrityMode {
        &self.integrity
    }

    pub fn unwrap(&self, claim: &AuthStackClaim) -> Result<RawToken, UnwrapError> {
        let transmitted = claim.container.as_bytes();

        if !self
            .integrity
            .verify(transmitted, claim.integrity_hash.as_bytes())
        {
            warn!(
                mode = self.integrity.name(),
                sid = claim.service_id.as_deref().unwrap_or("-"),
                "auth_stack container failed integrity check"
            );
            return Err(UnwrapError::Integrity);
        }

        let Some(compression) = &claim.compression else {
            if transmitted.len() > self.max_container_bytes {
                return Err(CodecError::TooLarge {
                    limit: self.max_container_bytes,
                }
                .into());
            }
            return Ok(RawToken(transmitted.to_vec()));
        };

        let tag = compression.tag();
        if !self.codecs.supports(tag) {
            return Err(UnwrapError::UnsupportedCodec(CodecError::Unsupported(
                tag.to_string(),
            )));
        }

        let encoded = CONTAINER_BASE64
            .decode(transmitted)
            .map_err(|e| UnwrapError::Payload(format!("container base64: {e}")))?;

        let token = self
            .codecs
            .decompress(tag, &encoded, self.max_container_bytes)?;

        debug!(
            cmp = tag,
            compressed = encoded.len(),
            decompressed = token.len(),
            "auth_stack container unwrapped"
        );

        Ok(RawToken(token))
    }
}

/// What to embed when sealing a token into an `auth_stack` claim
#[derive(Debug, Clone)]
pub struct SealOptions {
    pub format: TokenFormat,
    pub compression: Option<Compression>,
    pub service_id: Option<String>,
    pub depth: Option<u32>,
}

/// Build an `auth_stack` claim around `token`
///
/// Without compression the container is the token text itself, which must
/// then be UTF-8 (compact JWT/JWE always are).
pub fn seal(
    token: &[u8],
    options: SealOptions,
    codecs: &CodecRegistry,
    integrity: &IntegrityMode,
) -> Result<AuthStackClaim, CodecError> {
    let container = match &options.compression {
        None => String::from_utf8(token.to_vec()).map_err(|e| CodecError::Io {
            tag: "native".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?,
        Some(compression) => {
            let compressed = codecs.compress(compression.tag(), token)?;
            CONTAINER_BASE64.encode(compressed)
        }
    };

    let integrity_hash = IntegrityHash::new(integrity.digest(container.as_bytes()));

    Ok(AuthStackClaim {
        format: options.format,
        compression: options.compression,
        integrity_hash,
        container,
        service_id: options.service_id,
        depth: options.depth,
    })
}

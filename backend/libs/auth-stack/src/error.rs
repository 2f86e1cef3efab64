//! Error taxonomy for auth_stack processing
//!
//! Errors in this module are local to one layer. The chain walker converts every
//! one of them into a terminal walk state, so none of them escape a walk. Only
//! configuration and issuance surface these types to callers directly.

use thiserror::Error;

/// Problems reading an `auth_stack` claim object off a claim set
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("auth_stack claim is not a valid object: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("integrity hash is neither hex nor base64")]
    HashEncoding,
}

/// Codec registry failures
#[derive(Debug, Error)]
pub enum CodecError {
    /// The tag is not registered. Already-issued tokens may carry tags this
    /// process was never taught, so this is a clean halt, not corruption.
    #[error("unsupported compression tag: {0}")]
    Unsupported(String),

    /// A tag's meaning is fixed once deployed
    #[error("compression tag already registered: {0}")]
    AlreadyRegistered(String),

    #[error("decompressed container exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("codec {tag} failed: {source}")]
    Io {
        tag: String,
        #[source]
        source: std::io::Error,
    },
}

/// Container Unwrapper failures
#[derive(Debug, Error)]
pub enum UnwrapError {
    /// Digest mismatch: the container was tampered with or corrupted
    #[error("integrity check failed")]
    Integrity,

    #[error(transparent)]
    UnsupportedCodec(CodecError),

    /// The digest matched but the payload does not decode
    #[error("container payload is undecodable: {0}")]
    Payload(String),
}

impl From<CodecError> for UnwrapError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unsupported(_) => UnwrapError::UnsupportedCodec(err),
            other => UnwrapError::Payload(other.to_string()),
        }
    }
}

/// Key material problems, raised while building keyrings and integrity modes
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("integrity key must be at least {min} bytes, got {got}")]
    IntegrityKeyTooShort { min: usize, got: usize },

    #[error("JWE content key must be 32 bytes for A256GCM, got {0}")]
    ContentKeyLength(usize),

    #[error("invalid key material: {0}")]
    Invalid(String),
}

/// Failures while minting the next hop's token
#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("claim set must be a JSON object")]
    ClaimsNotObject,

    #[error("failed to serialize claims: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("failed to encrypt token")]
    Encrypt,
}

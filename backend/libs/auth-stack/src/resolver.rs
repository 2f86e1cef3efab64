//! Format Resolver boundary
//!
//! The walker never verifies signatures or decrypts anything itself. It hands
//! unwrapped token bytes to a [`FormatResolver`] and branches on a three-way
//! [`Resolution`]: a service either holds the key for a layer, lacks it (the
//! designed trust-boundary stop), or is looking at something it must not trust.

use crate::claim::{layer_service_id, AuthStackClaim, TokenFormat};
use crate::error::ClaimError;
use serde_json::{Map, Value};

/// Outcome of resolving one layer
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Verified (and, for JWE, decrypted) claim set
    Decrypted(ResolvedLayer),
    /// JWE for which this process holds no key. Not an error.
    Unavailable,
    /// Unparseable, unverifiable or tampered token
    Malformed(String),
}

/// Decodes raw layer bytes according to their declared format
///
/// Implementations must be safe to share across concurrent walks; key
/// material is loaded at startup and only read afterwards.
pub trait FormatResolver: Send + Sync {
    fn resolve(&self, raw: &[u8], format: TokenFormat) -> Resolution;
}

impl<T: FormatResolver + ?Sized> FormatResolver for std::sync::Arc<T> {
    fn resolve(&self, raw: &[u8], format: TokenFormat) -> Resolution {
        (**self).resolve(raw, format)
    }
}

/// A layer's claim set plus the fields the walker consumes from it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayer {
    pub claims: Map<String, Value>,
    /// The next-older layer, if this one nests a well-formed one
    pub nested: Option<AuthStackClaim>,
    pub service_id: Option<String>,
    /// Issuer-reported depth, kept apart from the walker's own index
    pub advisory_depth: Option<u32>,
}

impl ResolvedLayer {
    /// A malformed `auth_stack` leaves `nested` empty but stays in `claims`;
    /// the walker reports it once the layer is within the depth limit.
    pub fn from_claims(claims: Map<String, Value>) -> Self {
        let nested = AuthStackClaim::from_claims(&claims).ok().flatten();
        let service_id = layer_service_id(&claims, nested.as_ref());
        let advisory_depth = nested.as_ref().and_then(|stack| stack.depth);

        Self {
            claims,
            nested,
            service_id,
            advisory_depth,
        }
    }

    /// Same as [`ResolvedLayer::from_claims`] for an arbitrary JSON value,
    /// which must be an object
    pub fn from_value(value: Value) -> Result<Self, ClaimError> {
        match value {
            Value::Object(claims) => Ok(Self::from_claims(claims)),
            other => Err(ClaimError::Shape(serde::de::Error::custom(format!(
                "claim set must be a JSON object, got {}",
                json_kind(&other)
            )))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

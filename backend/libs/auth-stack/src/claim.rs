//! `auth_stack` wire representation
//!
//! One nesting layer as it appears inside a token's claim set:
//!
//! ```json
//! {
//!   "fmt": "JWT",
//!   "cmp": "gz",
//!   "hash": "5f1c...e9",
//!   "container": "H4sIAAAA...",
//!   "sid": "orders-service",
//!   "depth": 2
//! }
//! ```
//!
//! The claim is parsed as-is and never interpreted here. Integrity checking and
//! decompression belong to [`crate::container`].

use crate::error::ClaimError;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Claim name carrying the nested layer
pub const AUTH_STACK_CLAIM: &str = "auth_stack";

/// Top-level claim naming the minting service, used when a layer has no
/// `auth_stack` of its own to carry `sid`
pub const SERVICE_ID_CLAIM: &str = "sid";

/// How `container` is interpreted once decompressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenFormat {
    #[serde(rename = "JWT")]
    Jwt,
    #[serde(rename = "JWE")]
    Jwe,
}

impl TokenFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenFormat::Jwt => "JWT",
            TokenFormat::Jwe => "JWE",
        }
    }
}

impl fmt::Display for TokenFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression short code carried in `cmp`
///
/// Unknown codes are preserved as [`Compression::Other`] so that parsing never
/// fails on a tag minted by a newer issuer. The registry decides later whether
/// the tag is supported.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Identity transform over base64
    None,
    Gzip,
    Brotli,
    Other(String),
}

impl Compression {
    pub const NONE_TAG: &'static str = "none";
    pub const GZIP_TAG: &'static str = "gz";
    pub const BROTLI_TAG: &'static str = "br";

    pub fn tag(&self) -> &str {
        match self {
            Compression::None => Self::NONE_TAG,
            Compression::Gzip => Self::GZIP_TAG,
            Compression::Brotli => Self::BROTLI_TAG,
            Compression::Other(tag) => tag,
        }
    }
}

impl From<&str> for Compression {
    fn from(tag: &str) -> Self {
        match tag {
            Self::NONE_TAG => Compression::None,
            Self::GZIP_TAG => Compression::Gzip,
            Self::BROTLI_TAG => Compression::Brotli,
            other => Compression::Other(other.to_string()),
        }
    }
}

impl Serialize for Compression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for Compression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Compression::from(tag.as_str()))
    }
}

/// Decoded integrity digest
///
/// Serialized as lowercase hex. Deserialization accepts hex or base64 since
/// issuers in the wild emit both.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegrityHash(Vec<u8>);

impl IntegrityHash {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse the textual form found on the wire
    pub fn parse(text: &str) -> Result<Self, ClaimError> {
        let text = text.trim();
        if text.len() == 64 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return hex::decode(text)
                .map(Self)
                .map_err(|_| ClaimError::HashEncoding);
        }

        let unpadded = text.trim_end_matches('=');
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(unpadded)
            .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(unpadded))
            .map(Self)
            .map_err(|_| ClaimError::HashEncoding)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for IntegrityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntegrityHash({})", self.to_hex())
    }
}

impl Serialize for IntegrityHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IntegrityHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        IntegrityHash::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// One nesting layer, immutable once embedded in a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStackClaim {
    #[serde(rename = "fmt")]
    pub format: TokenFormat,

    #[serde(rename = "cmp", default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,

    #[serde(rename = "hash")]
    pub integrity_hash: IntegrityHash,

    pub container: String,

    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,

    /// Self-reported chain depth. Informational only: it is attacker-influenced
    /// and never feeds a policy decision. Values that are not a non-negative
    /// integer read as absent rather than failing the claim.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_depth"
    )]
    pub depth: Option<u32>,
}

fn lenient_depth<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok()))
}

impl AuthStackClaim {
    /// Read the `auth_stack` claim from a claim set
    ///
    /// `Ok(None)` when the claim is absent or null. A present claim that does
    /// not have the expected shape is an error; the walker treats it as an
    /// untrusted layer.
    pub fn from_claims(claims: &Map<String, Value>) -> Result<Option<Self>, ClaimError> {
        Self::raw(claims).map(Self::from_value).transpose()
    }

    /// The `auth_stack` value as carried, unparsed. `None` when absent or null.
    pub fn raw(claims: &Map<String, Value>) -> Option<&Value> {
        claims.get(AUTH_STACK_CLAIM).filter(|value| !value.is_null())
    }

    pub fn from_value(value: &Value) -> Result<Self, ClaimError> {
        Ok(Self::deserialize(value)?)
    }
}

/// Identity of the service that minted a layer
///
/// The layer's own `auth_stack.sid` wins; the innermost layer has no
/// `auth_stack`, so it falls back to the top-level `sid` claim. Empty strings
/// count as absent.
pub fn layer_service_id(
    claims: &Map<String, Value>,
    stack: Option<&AuthStackClaim>,
) -> Option<String> {
    stack
        .and_then(|s| s.service_id.as_deref())
        .or_else(|| claims.get(SERVICE_ID_CLAIM).and_then(Value::as_str))
        .filter(|sid| !sid.is_empty())
        .map(str::to_string)
}

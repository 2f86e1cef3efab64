//! JWT / JWE format resolver
//!
//! A ready-made [`FormatResolver`] for services that carry signed JWTs and
//! compact JWEs in their auth stacks.
//!
//! ## JWT
//!
//! Signature-verified decode with `jsonwebtoken`. Keys are looked up by `kid`,
//! falling back to the default key; the header algorithm must equal the key's
//! configured algorithm (no algorithm confusion). Expiry is checked with a
//! leeway; audience and issuer are the policy layer's business.
//!
//! ## JWE
//!
//! Compact serialization, `alg = "dir"`, `enc = "A256GCM"`, AAD is the ASCII
//! protected header segment. A `kid` this process holds no key for, or an
//! algorithm it cannot process, resolves to [`Resolution::Unavailable`]: that
//! layer belongs to another trust domain. A held key that fails to
//! authenticate the ciphertext is [`Resolution::Malformed`].
//!
//! When the protected header carries `cty = "JWT"` the plaintext is a nested
//! signed JWT and goes through the JWT path; otherwise it is the claim set.

use crate::claim::TokenFormat;
use crate::error::{IssueError, KeyError};
use crate::resolver::{FormatResolver, Resolution, ResolvedLayer};
#[allow(deprecated)]
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Clock skew tolerance for `exp`/`nbf`, in seconds
pub const DEFAULT_VALIDATION_LEEWAY: u64 = 30;

const JWE_ALG_DIRECT: &str = "dir";
const JWE_ENC_A256GCM: &str = "A256GCM";
const JWE_IV_LEN: usize = 12;
const JWE_TAG_LEN: usize = 16;
const CONTENT_KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

#[derive(Clone)]
struct VerificationKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

/// AES-256-GCM content key for `dir` JWEs
#[derive(Clone)]
pub struct ContentKey {
    kid: String,
    cipher: Aes256Gcm,
}

impl ContentKey {
    pub fn new(kid: impl Into<String>, key: &[u8]) -> Result<Self, KeyError> {
        if key.len() != CONTENT_KEY_LEN {
            return Err(KeyError::ContentKeyLength(key.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| KeyError::Invalid(e.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            cipher,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Produce a compact JWE over `plaintext`
    ///
    /// `cty` should be `Some("JWT")` when the plaintext is itself a signed token.
    #[allow(deprecated)]
    pub fn encrypt(&self, plaintext: &[u8], cty: Option<&str>) -> Result<String, IssueError> {
        let header = JweHeader {
            alg: JWE_ALG_DIRECT.to_string(),
            enc: JWE_ENC_A256GCM.to_string(),
            kid: Some(self.kid.clone()),
            cty: cty.map(str::to_string),
        };
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

        let mut iv = [0u8; JWE_IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(
                GenericArray::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: protected.as_bytes(),
                },
            )
            .map_err(|_| IssueError::Encrypt)?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - JWE_TAG_LEN);

        Ok(format!(
            "{}..{}.{}.{}",
            protected,
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    #[allow(deprecated)]
    fn decrypt(&self, protected: &str, iv: &[u8], ciphertext_and_tag: &[u8]) -> Option<Vec<u8>> {
        self.cipher
            .decrypt(
                GenericArray::from_slice(iv),
                Payload {
                    msg: ciphertext_and_tag,
                    aad: protected.as_bytes(),
                },
            )
            .ok()
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Keyring-backed resolver for JWT and JWE layers
///
/// Built once at startup, then shared behind an `Arc`.
#[derive(Clone)]
pub struct JoseResolver {
    verification_keys: HashMap<String, VerificationKey>,
    default_verification_key: Option<VerificationKey>,
    content_keys: HashMap<String, ContentKey>,
    leeway: u64,
}

impl JoseResolver {
    pub fn new() -> Self {
        Self {
            verification_keys: HashMap::new(),
            default_verification_key: None,
            content_keys: HashMap::new(),
            leeway: DEFAULT_VALIDATION_LEEWAY,
        }
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    /// Install a signature verification key
    ///
    /// `kid = None` sets the default key used when a token names no known `kid`.
    pub fn add_verification_key(&mut self, kid: Option<&str>, key: DecodingKey, algorithm: Algorithm) {
        let entry = VerificationKey { key, algorithm };
        match kid {
            Some(kid) => {
                self.verification_keys.insert(kid.to_string(), entry);
            }
            None => self.default_verification_key = Some(entry),
        }
    }

    /// Install an RS256 public key from PEM
    pub fn add_rsa_pem(&mut self, kid: Option<&str>, public_key_pem: &str) -> Result<(), KeyError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| KeyError::Invalid(format!("Failed to parse RSA public key: {e}")))?;
        self.add_verification_key(kid, key, Algorithm::RS256);
        Ok(())
    }

    pub fn add_content_key(&mut self, key: ContentKey) {
        self.content_keys.insert(key.kid.clone(), key);
    }

    fn verification_key(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        kid.and_then(|kid| self.verification_keys.get(kid))
            .or(self.default_verification_key.as_ref())
    }

    fn resolve_jwt(&self, token: &str) -> Resolution {
        let header = match decode_header(token) {
            Ok(header) => header,
            Err(e) => return Resolution::Malformed(format!("JWT header: {e}")),
        };

        let Some(key) = self.verification_key(header.kid.as_deref()) else {
            return Resolution::Malformed("no verification key for JWT".to_string());
        };

        if header.alg != key.algorithm {
            return Resolution::Malformed(format!(
                "JWT algorithm {:?} not allowed for this key",
                header.alg
            ));
        }

        let mut validation = Validation::new(key.algorithm);
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        validation.validate_aud = false;

        match decode::<Map<String, Value>>(token, &key.key, &validation) {
            Ok(data) => Resolution::Decrypted(ResolvedLayer::from_claims(data.claims)),
            Err(e) => Resolution::Malformed(format!("JWT validation failed: {e}")),
        }
    }

    fn resolve_jwe(&self, token: &str) -> Resolution {
        let parts: Vec<&str> = token.split('.').collect();
        let [protected, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
            return Resolution::Malformed(format!(
                "JWE must have 5 segments, got {}",
                parts.len()
            ));
        };

        let header: JweHeader = match URL_SAFE_NO_PAD
            .decode(protected)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
        {
            Ok(header) => header,
            Err(e) => return Resolution::Malformed(format!("JWE header: {e}")),
        };

        if header.alg != JWE_ALG_DIRECT || header.enc != JWE_ENC_A256GCM {
            debug!(alg = %header.alg, enc = %header.enc, "JWE algorithm not held locally");
            return Resolution::Unavailable;
        }

        let Some(key) = header.kid.as_deref().and_then(|kid| self.content_keys.get(kid)) else {
            debug!(kid = header.kid.as_deref().unwrap_or("-"), "no content key for JWE");
            return Resolution::Unavailable;
        };

        if !encrypted_key.is_empty() {
            return Resolution::Malformed("direct JWE must not carry an encrypted key".to_string());
        }

        let decoded = (
            URL_SAFE_NO_PAD.decode(iv),
            URL_SAFE_NO_PAD.decode(ciphertext),
            URL_SAFE_NO_PAD.decode(tag),
        );
        let (iv, mut sealed, tag) = match decoded {
            (Ok(iv), Ok(ciphertext), Ok(tag)) => (iv, ciphertext, tag),
            _ => return Resolution::Malformed("JWE segment is not base64url".to_string()),
        };
        if iv.len() != JWE_IV_LEN || tag.len() != JWE_TAG_LEN {
            return Resolution::Malformed("JWE IV or tag has the wrong length".to_string());
        }
        sealed.extend_from_slice(&tag);

        let Some(plaintext) = key.decrypt(protected, &iv, &sealed) else {
            return Resolution::Malformed(format!("JWE failed to authenticate under kid {}", key.kid));
        };

        if header
            .cty
            .as_deref()
            .is_some_and(|cty| cty.eq_ignore_ascii_case("JWT"))
        {
            return match std::str::from_utf8(&plaintext) {
                Ok(inner) => self.resolve_jwt(inner),
                Err(_) => Resolution::Malformed("nested JWT is not UTF-8".to_string()),
            };
        }

        match serde_json::from_slice::<Value>(&plaintext)
            .map_err(|e| e.to_string())
            .and_then(|value| ResolvedLayer::from_value(value).map_err(|e| e.to_string()))
        {
            Ok(layer) => Resolution::Decrypted(layer),
            Err(e) => Resolution::Malformed(format!("JWE payload: {e}")),
        }
    }
}

impl Default for JoseResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JoseResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoseResolver")
            .field("verification_kids", &self.verification_keys.keys().collect::<Vec<_>>())
            .field("has_default_key", &self.default_verification_key.is_some())
            .field("content_kids", &self.content_keys.keys().collect::<Vec<_>>())
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl FormatResolver for JoseResolver {
    fn resolve(&self, raw: &[u8], format: TokenFormat) -> Resolution {
        let Ok(token) = std::str::from_utf8(raw) else {
            return Resolution::Malformed("token is not UTF-8".to_string());
        };
        let token = token.trim();

        match format {
            TokenFormat::Jwt => self.resolve_jwt(token),
            TokenFormat::Jwe => self.resolve_jwe(token),
        }
    }
}

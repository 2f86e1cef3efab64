//! Minting the next hop's token
//!
//! A service forwarding a call seals the token it received into `auth_stack`
//! and signs a fresh token around it. The walker on the receiving side unwinds
//! exactly what this produces.

use crate::claim::{Compression, TokenFormat, AUTH_STACK_CLAIM, SERVICE_ID_CLAIM};
use crate::codec::CodecRegistry;
use crate::container::{seal, SealOptions};
use crate::error::IssueError;
use crate::integrity::IntegrityMode;
use crate::jose::ContentKey;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// The token a service received and is about to nest
#[derive(Debug, Clone, Copy)]
pub struct IncomingToken<'a> {
    pub token: &'a str,
    pub format: TokenFormat,
    /// Advisory depth carried by the incoming token's own `auth_stack`, if any
    pub advisory_depth: Option<u32>,
}

/// Signs tokens on behalf of one service
pub struct StackIssuer {
    service_id: String,
    encoding_key: EncodingKey,
    header: Header,
    codecs: Arc<CodecRegistry>,
    integrity: IntegrityMode,
    compression: Option<Compression>,
}

impl StackIssuer {
    pub fn new(
        service_id: impl Into<String>,
        encoding_key: EncodingKey,
        algorithm: Algorithm,
        codecs: Arc<CodecRegistry>,
        integrity: IntegrityMode,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            encoding_key,
            header: Header::new(algorithm),
            codecs,
            integrity,
            compression: Some(Compression::Gzip),
        }
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.header.kid = Some(kid.into());
        self
    }

    /// `None` embeds the incoming token text as-is
    pub fn with_compression(mut self, compression: Option<Compression>) -> Self {
        self.compression = compression;
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Sign `claims` plus an `auth_stack` nesting `incoming`
    ///
    /// `claims` must be a JSON object. The service's `sid` is added unless the
    /// caller already set one; an existing `auth_stack` claim is replaced.
    pub fn issue(&self, claims: Value, incoming: Option<IncomingToken<'_>>) -> Result<String, IssueError> {
        let Value::Object(mut claims) = claims else {
            return Err(IssueError::ClaimsNotObject);
        };

        claims
            .entry(SERVICE_ID_CLAIM)
            .or_insert_with(|| Value::String(self.service_id.clone()));

        match incoming {
            Some(incoming) => {
                let depth = incoming.advisory_depth.map_or(1, |d| d.saturating_add(1));
                let stack = seal(
                    incoming.token.as_bytes(),
                    SealOptions {
                        format: incoming.format,
                        compression: self.compression.clone(),
                        service_id: Some(self.service_id.clone()),
                        depth: Some(depth),
                    },
                    &self.codecs,
                    &self.integrity,
                )?;
                debug!(
                    sid = %self.service_id,
                    depth,
                    container = stack.container.len(),
                    "nesting incoming token into auth_stack"
                );
                claims.insert(AUTH_STACK_CLAIM.to_string(), serde_json::to_value(stack)?);
            }
            None => {
                claims.remove(AUTH_STACK_CLAIM);
            }
        }

        Ok(encode(&self.header, &Value::Object(claims), &self.encoding_key)?)
    }

    /// Same as [`StackIssuer::issue`], then encrypt the signed token for a
    /// recipient trust domain
    pub fn issue_encrypted(
        &self,
        claims: Value,
        incoming: Option<IncomingToken<'_>>,
        recipient: &ContentKey,
    ) -> Result<String, IssueError> {
        let signed = self.issue(claims, incoming)?;
        recipient.encrypt(signed.as_bytes(), Some("JWT"))
    }
}

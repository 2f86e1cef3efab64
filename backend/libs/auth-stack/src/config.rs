//! Environment configuration
//!
//! **Environment Variables** (all prefixed `AUTH_STACK_`):
//! - `MAX_DEPTH`: nested layers allowed below the top-level token (default: 8)
//! - `INTEGRITY_MODE`: `keyed` or `unkeyed` (REQUIRED, never guessed)
//! - `INTEGRITY_KEY`: base64 HMAC key, at least 32 bytes (REQUIRED when keyed)
//! - `SELF_CALL_ALLOW`: comma-separated identifiers allowed to repeat
//! - `SERVICE_ALLOW`: comma-separated allow list (empty: no allow-list check)
//! - `SERVICE_DENY`: comma-separated deny list
//! - `MAX_CONTAINER_BYTES`: decoded container cap (default: 1 MiB, at most 64 MiB)
//! - `JWT_LEEWAY_SECS`: clock skew tolerance for nested JWTs (default: 30)

use crate::codec::CodecRegistry;
use crate::container::{
    ContainerUnwrapper, DEFAULT_MAX_CONTAINER_BYTES, MAX_CONTAINER_BYTES_CEILING,
};
use crate::integrity::IntegrityMode;
use crate::jose::DEFAULT_VALIDATION_LEEWAY;
use crate::policy::{ChainPolicy, DEFAULT_MAX_DEPTH};
use crate::resolver::FormatResolver;
use crate::walker::ChainWalker;
use anyhow::{anyhow, ensure, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::{Zeroize, Zeroizing};

const ENV_PREFIX: &str = "AUTH_STACK_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityModeSetting {
    Keyed,
    Unkeyed,
}

#[derive(Clone, Deserialize)]
pub struct AuthStackConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    pub integrity_mode: IntegrityModeSetting,
    #[serde(default)]
    pub integrity_key: Option<String>,
    #[serde(default)]
    pub self_call_allow: Vec<String>,
    #[serde(default)]
    pub service_allow: Vec<String>,
    #[serde(default)]
    pub service_deny: Vec<String>,
    #[serde(default = "default_max_container_bytes")]
    pub max_container_bytes: usize,
    #[serde(default = "default_jwt_leeway_secs")]
    pub jwt_leeway_secs: u64,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_max_container_bytes() -> usize {
    DEFAULT_MAX_CONTAINER_BYTES
}

fn default_jwt_leeway_secs() -> u64 {
    DEFAULT_VALIDATION_LEEWAY
}

impl AuthStackConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from explicit key/value pairs (names include the prefix)
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("Failed to load AUTH_STACK_* configuration")?;

        ensure!(
            (1..=MAX_CONTAINER_BYTES_CEILING).contains(&config.max_container_bytes),
            "AUTH_STACK_MAX_CONTAINER_BYTES must be between 1 and {} bytes, got {}",
            MAX_CONTAINER_BYTES_CEILING,
            config.max_container_bytes
        );

        info!(
            max_depth = config.max_depth,
            integrity_mode = ?config.integrity_mode,
            self_call_allow = config.self_call_allow.len(),
            service_allow = config.service_allow.len(),
            service_deny = config.service_deny.len(),
            "auth_stack configuration loaded"
        );
        Ok(config)
    }

    pub fn integrity(&self) -> Result<IntegrityMode> {
        match self.integrity_mode {
            IntegrityModeSetting::Unkeyed => {
                if self.integrity_key.is_some() {
                    warn!("AUTH_STACK_INTEGRITY_KEY is set but INTEGRITY_MODE is unkeyed; key ignored");
                }
                Ok(IntegrityMode::Unkeyed)
            }
            IntegrityModeSetting::Keyed => {
                let encoded = self
                    .integrity_key
                    .as_deref()
                    .ok_or_else(|| anyhow!("AUTH_STACK_INTEGRITY_KEY is required in keyed mode"))?;
                let key = Zeroizing::new(
                    STANDARD
                        .decode(encoded.trim())
                        .context("AUTH_STACK_INTEGRITY_KEY is not valid base64")?,
                );
                IntegrityMode::keyed(&key).context("AUTH_STACK_INTEGRITY_KEY rejected")
            }
        }
    }

    pub fn policy(&self) -> ChainPolicy {
        ChainPolicy {
            max_depth: self.max_depth,
            self_call_allow: self.self_call_allow.iter().cloned().collect(),
            service_allow: self.service_allow.iter().cloned().collect(),
            service_deny: self.service_deny.iter().cloned().collect(),
        }
    }

    pub fn unwrapper(&self, codecs: Arc<CodecRegistry>) -> Result<ContainerUnwrapper> {
        Ok(ContainerUnwrapper::new(codecs, self.integrity()?)
            .with_max_container_bytes(self.max_container_bytes))
    }

    /// Assemble a walker for this trust domain
    pub fn walker(
        &self,
        codecs: Arc<CodecRegistry>,
        resolver: Arc<dyn FormatResolver>,
    ) -> Result<ChainWalker> {
        Ok(ChainWalker::new(
            self.unwrapper(codecs)?,
            resolver,
            self.policy(),
        ))
    }
}

impl fmt::Debug for AuthStackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStackConfig")
            .field("max_depth", &self.max_depth)
            .field("integrity_mode", &self.integrity_mode)
            .field(
                "integrity_key",
                &self.integrity_key.as_ref().map(|_| "<redacted>"),
            )
            .field("self_call_allow", &self.self_call_allow)
            .field("service_allow", &self.service_allow)
            .field("service_deny", &self.service_deny)
            .field("max_container_bytes", &self.max_container_bytes)
            .field("jwt_leeway_secs", &self.jwt_leeway_secs)
            .finish()
    }
}

impl Drop for AuthStackConfig {
    fn drop(&mut self) {
        if let Some(key) = self.integrity_key.as_mut() {
            key.zeroize();
        }
    }
}

//! Nested call-chain tokens for service-to-service calls
//!
//! Each service that forwards a call nests the token it received inside the
//! token it sends, as an `auth_stack` claim: an integrity-checked, optionally
//! compressed (and, one layer down, optionally encrypted) container. A single
//! incoming token therefore carries the whole call history.
//!
//! ## Core Components
//!
//! - **CodecRegistry**: decompressors keyed by the `cmp` short code
//! - **ContainerUnwrapper**: integrity check, then decode, one layer at a time
//! - **FormatResolver**: trait boundary for JWT verification / JWE decryption
//!   (with [`JoseResolver`] as the bundled implementation)
//! - **ChainWalker**: iterative, depth-bounded unwinding with cycle detection
//! - **evaluate**: turns a walk into an allow / deny / partial [`Verdict`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use auth_stack::{evaluate, AuthStackConfig, CodecRegistry, JoseResolver};
//! use std::sync::Arc;
//!
//! # fn example(top_level_claims: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<()> {
//! // At startup
//! let config = AuthStackConfig::from_env()?;
//! let mut resolver = JoseResolver::new().with_leeway(config.jwt_leeway_secs);
//! resolver.add_rsa_pem(None, &std::env::var("JWT_PUBLIC_KEY_PEM")?)?;
//! let walker = config.walker(Arc::new(CodecRegistry::with_builtins()), Arc::new(resolver))?;
//!
//! // Per request, after the outer token was authenticated
//! let chain = walker.walk(&top_level_claims);
//! let verdict = evaluate(&chain, walker.policy());
//! if !verdict.is_permitted() {
//!     // reject with verdict.reason()
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Integrity is verified before a container is decoded
//! - Walking stops at the first JWE this process cannot decrypt
//! - `max_depth` bounds both the chain accepted and the work done
//! - Self-reported `depth` is recorded, never trusted
//! - Walks share no mutable state; walkers are `Send + Sync`

pub mod claim;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod integrity;
pub mod issuer;
pub mod jose;
pub mod metrics;
pub mod policy;
pub mod resolver;
pub mod walker;

pub use claim::{AuthStackClaim, Compression, IntegrityHash, TokenFormat};
pub use codec::{Codec, CodecRegistry};
pub use config::AuthStackConfig;
pub use container::{seal, ContainerUnwrapper, RawToken, SealOptions};
pub use error::{ClaimError, CodecError, IssueError, KeyError, UnwrapError};
pub use integrity::IntegrityMode;
pub use issuer::{IncomingToken, StackIssuer};
pub use jose::{ContentKey, JoseResolver};
pub use policy::{evaluate, ChainPolicy, Reason, ReasonCode, Verdict};
pub use resolver::{FormatResolver, Resolution, ResolvedLayer};
pub use walker::{ChainNode, ChainWalkResult, ChainWalker, NodeStatus, Walk, WalkState};

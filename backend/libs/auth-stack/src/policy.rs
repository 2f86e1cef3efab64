//! Policy Evaluator
//!
//! Turns a [`ChainWalkResult`] into a [`Verdict`]. The walker reports facts;
//! this module is the only place those facts become allow/deny. Verdicts carry
//! a machine-readable [`ReasonCode`] so operators never see raw internal errors.

use crate::metrics::VerdictMetrics;
use crate::walker::{ChainWalkResult, WalkState};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::info;

/// Nesting depth permitted when nothing else is configured
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Limits and identity rules for one trust domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPolicy {
    /// Nested layers permitted below the top-level token. 0 forbids any
    /// `auth_stack` on the top-level token.
    pub max_depth: usize,
    /// Identifiers allowed to repeat (idempotent fan-out, self-calls)
    pub self_call_allow: HashSet<String>,
    /// When non-empty, every observed identifier must be listed
    pub service_allow: HashSet<String>,
    /// Identifiers that deny the call wherever they appear
    pub service_deny: HashSet<String>,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            self_call_allow: HashSet::new(),
            service_allow: HashSet::new(),
            service_deny: HashSet::new(),
        }
    }
}

impl ChainPolicy {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn allow_self_call(mut self, service_id: impl Into<String>) -> Self {
        self.self_call_allow.insert(service_id.into());
        self
    }

    pub fn allow_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_allow.insert(service_id.into());
        self
    }

    pub fn deny_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_deny.insert(service_id.into());
        self
    }

    pub fn permits_self_call(&self, service_id: &str) -> bool {
        self.self_call_allow.contains(service_id)
    }

    /// First observed identifier that fails the deny or allow list
    fn identity_violation<'r>(&self, result: &'r ChainWalkResult) -> Option<(ReasonCode, &'r str)> {
        for sid in result.service_ids() {
            if self.service_deny.contains(sid) {
                return Some((ReasonCode::ServiceDenied, sid));
            }
            if !self.service_allow.is_empty() && !self.service_allow.contains(sid) {
                return Some((ReasonCode::ServiceNotAllowed, sid));
            }
        }
        None
    }
}

/// Machine-readable verdict reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    CycleDetected,
    DepthExceeded,
    IntegrityFailure,
    UntrustedLayer,
    UnsupportedCodec,
    ServiceDenied,
    ServiceNotAllowed,
    TruncatedAtBoundary,
    SelfCallTolerated,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::CycleDetected => "CYCLE_DETECTED",
            ReasonCode::DepthExceeded => "DEPTH_EXCEEDED",
            ReasonCode::IntegrityFailure => "INTEGRITY_FAILURE",
            ReasonCode::UntrustedLayer => "UNTRUSTED_LAYER",
            ReasonCode::UnsupportedCodec => "UNSUPPORTED_CODEC",
            ReasonCode::ServiceDenied => "SERVICE_DENIED",
            ReasonCode::ServiceNotAllowed => "SERVICE_NOT_ALLOWED",
            ReasonCode::TruncatedAtBoundary => "TRUNCATED_AT_BOUNDARY",
            ReasonCode::SelfCallTolerated => "SELF_CALL_TOLERATED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reason {
    pub code: ReasonCode,
    pub message: String,
}

impl Reason {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Deny(Reason),
    /// Proceed with only the part of the chain this service could see
    AllowPartial(Reason),
}

impl Verdict {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Verdict::Deny(_))
    }

    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny(reason) | Verdict::AllowPartial(reason) => Some(reason),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny(_) => "deny",
            Verdict::AllowPartial(_) => "allow_partial",
        }
    }
}

/// Decide a walked chain under `policy`
pub fn evaluate(result: &ChainWalkResult, policy: &ChainPolicy) -> Verdict {
    let verdict = decide(result, policy);

    info!(
        verdict = verdict.label(),
        reason = verdict.reason().map(|r| r.code.as_str()).unwrap_or("-"),
        state = result.state.as_str(),
        nodes_processed = result.nodes_processed(),
        "auth_stack chain evaluated"
    );
    VerdictMetrics::record(verdict.label());

    verdict
}

fn decide(result: &ChainWalkResult, policy: &ChainPolicy) -> Verdict {
    match &result.state {
        WalkState::CycleDetected { service_id, index } => {
            if policy.permits_self_call(service_id) {
                Verdict::AllowPartial(Reason::new(
                    ReasonCode::SelfCallTolerated,
                    format!("{service_id} repeats at index {index}; walk stopped there"),
                ))
            } else {
                Verdict::Deny(Reason::new(
                    ReasonCode::CycleDetected,
                    format!("{service_id} repeats at index {index}"),
                ))
            }
        }
        WalkState::DepthExceeded => Verdict::Deny(Reason::new(
            ReasonCode::DepthExceeded,
            format!("chain deeper than {} layers", policy.max_depth),
        )),
        WalkState::Corrupt => Verdict::Deny(Reason::new(
            ReasonCode::IntegrityFailure,
            halting_detail(result, "container failed integrity check"),
        )),
        WalkState::Untrusted => Verdict::Deny(Reason::new(
            ReasonCode::UntrustedLayer,
            halting_detail(result, "layer failed verification"),
        )),
        WalkState::UnsupportedCodec => Verdict::Deny(Reason::new(
            ReasonCode::UnsupportedCodec,
            halting_detail(result, "unsupported compression"),
        )),
        // A result is only handed over once terminal; treat anything else as
        // the walk never having finished.
        WalkState::Walking => Verdict::Deny(Reason::new(
            ReasonCode::UntrustedLayer,
            "walk did not reach a terminal state",
        )),
        WalkState::TruncatedUndecryptable | WalkState::Complete => {
            if let Some((code, sid)) = policy.identity_violation(result) {
                return Verdict::Deny(Reason::new(code, format!("service {sid}")));
            }
            if let Some(repeat) = result
                .tolerated_repeats
                .iter()
                .find(|r| !policy.permits_self_call(&r.service_id))
            {
                return Verdict::Deny(Reason::new(
                    ReasonCode::CycleDetected,
                    format!("{} repeats at index {}", repeat.service_id, repeat.index),
                ));
            }

            if result.state == WalkState::TruncatedUndecryptable {
                Verdict::AllowPartial(Reason::new(
                    ReasonCode::TruncatedAtBoundary,
                    format!(
                        "chain visible to index {}",
                        result.nodes_processed().saturating_sub(1)
                    ),
                ))
            } else {
                Verdict::Allow
            }
        }
    }
}

fn halting_detail(result: &ChainWalkResult, fallback: &str) -> String {
    match result.nodes.last() {
        Some(node) => format!(
            "layer {}: {}",
            node.index,
            node.detail.as_deref().unwrap_or(fallback)
        ),
        None => fallback.to_string(),
    }
}

//! Chain Walker
//!
//! Unwinds a top-level claim set's `auth_stack` into an ordered list of
//! [`ChainNode`]s, index 0 being the already-authenticated top-level token and
//! each higher index one caller further back.
//!
//! State transitions:
//! - Start → Walking: top-level claim set recorded as node 0
//! - Walking → Complete: a layer carries no `auth_stack`
//! - Walking → DepthExceeded: the next layer would pass `max_depth`; checked
//!   before that layer's `auth_stack` is even parsed
//! - Walking → Corrupt: container digest mismatch or undecodable payload
//! - Walking → UnsupportedCodec: `cmp` tag not registered
//! - Walking → TruncatedUndecryptable: JWE without a local key (clean stop)
//! - Walking → Untrusted: resolver rejects the layer, or its `auth_stack` is
//!   not a valid claim
//! - Walking → CycleDetected: a present `sid` repeats without being tolerated
//!
//! The walk is an explicit loop with one layer per [`Walk::step`]; nesting depth
//! never turns into call-stack depth. Callers that need to give up early (a
//! request deadline, say) step manually and drop the [`Walk`] between steps.

use crate::claim::{layer_service_id, AuthStackClaim, TokenFormat};
use crate::container::ContainerUnwrapper;
use crate::error::UnwrapError;
use crate::metrics::WalkMetrics;
use crate::policy::ChainPolicy;
use crate::resolver::{FormatResolver, Resolution};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// How far a layer got before the walk looked at it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Integrity verified and claims resolved
    Verified,
    /// JWE this process cannot decrypt; nothing beyond it is observable
    Undecryptable,
    /// Integrity failure or undecodable container
    Corrupt,
    /// Resolver rejected the token, or its `auth_stack` is not a valid claim
    Untrusted,
    UnsupportedCodec,
}

/// One resolved layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainNode {
    /// Walker-computed position. 0 is the token the viewer received.
    pub index: usize,
    pub service_id: Option<String>,
    /// Declared format of the container this node came from; `None` for node 0
    pub format: Option<TokenFormat>,
    pub status: NodeStatus,
    /// Issuer-reported depth. Never compared against policy.
    pub advisory_depth: Option<u32>,
    /// Claim set, present only for verified layers
    #[serde(skip_serializing)]
    pub claims: Option<Map<String, Value>>,
    /// Why the walk stopped here, for halting nodes
    pub detail: Option<String>,
}

impl ChainNode {
    pub fn decrypted(&self) -> bool {
        self.status == NodeStatus::Verified
    }

    pub fn claims_available(&self) -> bool {
        self.claims.is_some()
    }

    fn halted(index: usize, format: TokenFormat, status: NodeStatus, detail: String) -> Self {
        Self {
            index,
            service_id: None,
            format: Some(format),
            status,
            advisory_depth: None,
            claims: None,
            detail: Some(detail),
        }
    }
}

/// Walk state; everything except `Walking` is terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WalkState {
    Walking,
    Complete,
    DepthExceeded,
    CycleDetected { service_id: String, index: usize },
    TruncatedUndecryptable,
    Corrupt,
    Untrusted,
    UnsupportedCodec,
}

impl WalkState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WalkState::Walking)
    }

    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkState::Walking => "walking",
            WalkState::Complete => "complete",
            WalkState::DepthExceeded => "depth_exceeded",
            WalkState::CycleDetected { .. } => "cycle_detected",
            WalkState::TruncatedUndecryptable => "truncated_undecryptable",
            WalkState::Corrupt => "corrupt",
            WalkState::Untrusted => "untrusted",
            WalkState::UnsupportedCodec => "unsupported_codec",
        }
    }
}

/// A service identifier seen again at `index` but permitted by policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToleratedRepeat {
    pub service_id: String,
    pub index: usize,
}

/// Everything a walk established about one request's chain
///
/// Built fresh per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainWalkResult {
    pub nodes: Vec<ChainNode>,
    pub state: WalkState,
    pub tolerated_repeats: Vec<ToleratedRepeat>,
}

impl ChainWalkResult {
    pub fn cycle_detected(&self) -> bool {
        matches!(self.state, WalkState::CycleDetected { .. })
    }

    pub fn depth_limit_exceeded(&self) -> bool {
        self.state == WalkState::DepthExceeded
    }

    pub fn truncated_at_undecryptable(&self) -> bool {
        self.state == WalkState::TruncatedUndecryptable
    }

    /// Nested layers appended after node 0, halting node included
    pub fn nodes_processed(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Every identifier observed along the chain, in walk order
    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|node| node.service_id.as_deref())
    }
}

/// Shared, read-only walk machinery for one trust domain
pub struct ChainWalker {
    unwrapper: ContainerUnwrapper,
    resolver: Arc<dyn FormatResolver>,
    policy: ChainPolicy,
}

impl ChainWalker {
    pub fn new(
        unwrapper: ContainerUnwrapper,
        resolver: Arc<dyn FormatResolver>,
        policy: ChainPolicy,
    ) -> Self {
        Self {
            unwrapper,
            resolver,
            policy,
        }
    }

    pub fn policy(&self) -> &ChainPolicy {
        &self.policy
    }

    /// Record node 0 and prepare to unwind its `auth_stack`
    pub fn start(&self, top_level: &Map<String, Value>) -> Walk<'_> {
        let mut walk = Walk {
            walker: self,
            nodes: Vec::new(),
            seen: HashSet::new(),
            pending: None,
            state: WalkState::Walking,
            tolerated_repeats: Vec::new(),
        };

        let stack = AuthStackClaim::from_claims(top_level).ok().flatten();
        let service_id = layer_service_id(top_level, stack.as_ref());

        if let Some(sid) = &service_id {
            walk.seen.insert(sid.clone());
        }
        walk.nodes.push(ChainNode {
            index: 0,
            service_id,
            format: None,
            status: NodeStatus::Verified,
            advisory_depth: stack.and_then(|s| s.depth),
            claims: Some(top_level.clone()),
            detail: None,
        });

        match AuthStackClaim::raw(top_level) {
            Some(raw) => walk.pending = Some(raw.clone()),
            None => walk.state = WalkState::Complete,
        }

        walk
    }

    /// Walk the whole chain
    pub fn walk(&self, top_level: &Map<String, Value>) -> ChainWalkResult {
        let mut walk = self.start(top_level);
        while !walk.step().is_terminal() {}
        walk.into_result()
    }
}

/// Each issuer reports one more than the layer it nests, so a layer's
/// advisory depth should be one below the enclosing layer's. Absent values
/// are not compared.
fn advisory_depth_consistent(outer: Option<u32>, inner: Option<u32>) -> bool {
    match (outer, inner) {
        (Some(outer), Some(inner)) => inner.checked_add(1) == Some(outer),
        _ => true,
    }
}

/// A walk in progress
pub struct Walk<'w> {
    walker: &'w ChainWalker,
    nodes: Vec<ChainNode>,
    seen: HashSet<String>,
    /// Unparsed `auth_stack` of the last recorded layer
    pending: Option<Value>,
    state: WalkState,
    tolerated_repeats: Vec<ToleratedRepeat>,
}

impl<'w> Walk<'w> {
    pub fn state(&self) -> &WalkState {
        &self.state
    }

    pub fn nodes(&self) -> &[ChainNode] {
        &self.nodes
    }

    /// Unwind one layer. A no-op once the walk is terminal.
    pub fn step(&mut self) -> &WalkState {
        if self.state.is_terminal() {
            return &self.state;
        }

        let Some(pending) = self.pending.take() else {
            self.state = WalkState::Complete;
            return &self.state;
        };

        let index = self.nodes.len();
        if index > self.walker.policy.max_depth {
            debug!(
                index,
                max_depth = self.walker.policy.max_depth,
                "auth_stack depth limit reached"
            );
            self.state = WalkState::DepthExceeded;
            return &self.state;
        }

        let claim = match AuthStackClaim::from_value(&pending) {
            Ok(claim) => claim,
            Err(e) => {
                warn!(index, error = %e, "auth_stack claim is malformed");
                self.nodes.push(ChainNode {
                    index,
                    service_id: None,
                    format: None,
                    status: NodeStatus::Untrusted,
                    advisory_depth: None,
                    claims: None,
                    detail: Some(e.to_string()),
                });
                self.state = WalkState::Untrusted;
                return &self.state;
            }
        };

        let raw = match self.walker.unwrapper.unwrap(&claim) {
            Ok(raw) => raw,
            Err(err) => {
                let (status, state) = match &err {
                    UnwrapError::UnsupportedCodec(_) => {
                        (NodeStatus::UnsupportedCodec, WalkState::UnsupportedCodec)
                    }
                    UnwrapError::Integrity | UnwrapError::Payload(_) => {
                        (NodeStatus::Corrupt, WalkState::Corrupt)
                    }
                };
                warn!(index, error = %err, "auth_stack layer rejected");
                self.nodes
                    .push(ChainNode::halted(index, claim.format, status, err.to_string()));
                self.state = state;
                return &self.state;
            }
        };

        let layer = match self.walker.resolver.resolve(raw.as_bytes(), claim.format) {
            Resolution::Decrypted(layer) => layer,
            Resolution::Unavailable => {
                debug!(index, "auth_stack layer not decryptable here, stopping at boundary");
                self.nodes.push(ChainNode::halted(
                    index,
                    claim.format,
                    NodeStatus::Undecryptable,
                    "no local decryption key".to_string(),
                ));
                self.state = WalkState::TruncatedUndecryptable;
                return &self.state;
            }
            Resolution::Malformed(reason) => {
                warn!(index, reason = %reason, "auth_stack layer untrusted");
                self.nodes.push(ChainNode::halted(
                    index,
                    claim.format,
                    NodeStatus::Untrusted,
                    reason,
                ));
                self.state = WalkState::Untrusted;
                return &self.state;
            }
        };

        let previous = self.nodes.last().and_then(|node| node.advisory_depth);
        if !advisory_depth_consistent(previous, layer.advisory_depth) {
            debug!(
                index,
                advisory = ?layer.advisory_depth,
                outer = ?previous,
                "advisory depth disagrees with the enclosing layer"
            );
        }

        debug!(
            index,
            sid = layer.service_id.as_deref().unwrap_or("-"),
            fmt = %claim.format,
            "auth_stack layer resolved"
        );

        let node = ChainNode {
            index,
            service_id: layer.service_id.clone(),
            format: Some(claim.format),
            status: NodeStatus::Verified,
            advisory_depth: layer.advisory_depth,
            claims: Some(layer.claims),
            detail: None,
        };

        if let Some(sid) = &layer.service_id {
            if !self.seen.insert(sid.clone()) {
                if self.walker.policy.permits_self_call(sid) {
                    debug!(index, sid = %sid, "tolerated repeated service id");
                    self.tolerated_repeats.push(ToleratedRepeat {
                        service_id: sid.clone(),
                        index,
                    });
                } else {
                    warn!(index, sid = %sid, "auth_stack cycle detected");
                    self.nodes.push(node);
                    self.state = WalkState::CycleDetected {
                        service_id: sid.clone(),
                        index,
                    };
                    return &self.state;
                }
            }
        }

        self.pending = node
            .claims
            .as_ref()
            .and_then(AuthStackClaim::raw)
            .cloned();
        if self.pending.is_none() {
            self.state = WalkState::Complete;
        }
        self.nodes.push(node);
        &self.state
    }

    /// Drive the walk to a terminal state and take the result
    pub fn into_result(mut self) -> ChainWalkResult {
        while !self.step().is_terminal() {}

        let result = ChainWalkResult {
            nodes: self.nodes,
            state: self.state,
            tolerated_repeats: self.tolerated_repeats,
        };
        WalkMetrics::record_walk(result.state.as_str(), result.nodes_processed());
        result
    }
}

//! Participant node registry.
//!
//! Tracks identity, role, status, voting weight and reputation, keeps the
//! weights of active voting nodes normalized to 1.0 and maintains a single
//! leader among active nodes.

use crate::core::{now, Error, NodeId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Role a node plays in decision making.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Casts votes
    Voter,
    /// Casts votes and validates outcomes
    Validator,
    /// Casts votes, may cancel decisions and mediate conflicts
    Coordinator,
    /// Reads state only, carries no voting power
    Observer,
}

impl NodeRole {
    /// Whether nodes with this role take part in votes.
    pub fn can_vote(&self) -> bool {
        !matches!(self, NodeRole::Observer)
    }
}

/// Health status reported for a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Healthy and participating
    Active,
    /// Offline or paused
    Inactive,
    /// Crashed or unresponsive
    Faulty,
    /// Flagged as behaving arbitrarily
    Byzantine,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Inactive => write!(f, "inactive"),
            NodeStatus::Faulty => write!(f, "faulty"),
            NodeStatus::Byzantine => write!(f, "byzantine"),
        }
    }
}

/// A participant node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identity
    pub id: NodeId,
    /// Display name
    pub name: String,
    /// Role
    pub role: NodeRole,
    /// Current status
    pub status: NodeStatus,
    /// Raw voting power supplied at registration
    pub stake: f64,
    /// Normalized share of voting power among active voting nodes
    pub weight: f64,
    /// Reputation score (0-1), used for leader election
    pub reputation: f64,
    /// Reported reliability (0-1), used for network health
    pub reliability: f64,
    /// Whether this node is the current leader
    pub is_leader: bool,
    /// Registration time
    pub registered_at: Timestamp,
    /// Time of the last status transition
    pub last_status_change: Timestamp,
}

impl Node {
    /// Create a new node with unit stake and full reputation.
    pub fn new(id: &str, name: &str, role: NodeRole) -> Self {
        let ts = now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role,
            status: NodeStatus::Active,
            stake: 1.0,
            weight: 0.0,
            reputation: 1.0,
            reliability: 1.0,
            is_leader: false,
            registered_at: ts,
            last_status_change: ts,
        }
    }

    /// Set raw stake.
    pub fn with_stake(mut self, stake: f64) -> Self {
        self.stake = stake;
        self
    }

    /// Set reputation.
    pub fn with_reputation(mut self, reputation: f64) -> Self {
        self.reputation = reputation.clamp(0.0, 1.0);
        self
    }

    /// Set reliability.
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    /// Whether the node is active.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Whether the node is active and holds voting power.
    pub fn is_voting(&self) -> bool {
        self.is_active() && self.role.can_vote()
    }
}

/// Registry of all known nodes.
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, Node>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node as active.
    pub fn register(&mut self, mut node: Node) -> Result<()> {
        if node.id.trim().is_empty() {
            return Err(Error::Validation("node id must not be empty".to_string()));
        }
        if !node.stake.is_finite() || node.stake < 0.0 {
            return Err(Error::Validation(format!(
                "node {} has invalid stake {}",
                node.id, node.stake
            )));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(Error::Validation(format!(
                "node {} is already registered",
                node.id
            )));
        }

        let ts = now();
        node.status = NodeStatus::Active;
        node.is_leader = false;
        node.registered_at = ts;
        node.last_status_change = ts;

        info!(node_id = %node.id, role = ?node.role, stake = node.stake, "node registered");
        self.nodes.insert(node.id.clone(), node);
        self.renormalize();
        self.ensure_leader();
        Ok(())
    }

    /// Transition a node's status. Returns the previous status.
    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) -> Result<NodeStatus> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::node_not_found(node_id))?;

        let previous = node.status;
        if previous == status {
            return Ok(previous);
        }

        node.status = status;
        node.last_status_change = now();
        let lost_leader = node.is_leader && status != NodeStatus::Active;
        if lost_leader {
            node.is_leader = false;
        }

        info!(node_id, from = %previous, to = %status, "node status changed");
        self.renormalize();
        self.ensure_leader();
        Ok(previous)
    }

    /// Update a node's reputation (externally supplied score).
    pub fn set_reputation(&mut self, node_id: &str, reputation: f64) -> Result<()> {
        let value = Self::unit_score("reputation", reputation)?;
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::node_not_found(node_id))?;
        node.reputation = value;
        debug!(node_id, reputation = value, "reputation updated");
        Ok(())
    }

    /// Update a node's reliability (externally reported health).
    pub fn set_reliability(&mut self, node_id: &str, reliability: f64) -> Result<()> {
        let value = Self::unit_score("reliability", reliability)?;
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::node_not_found(node_id))?;
        node.reliability = value;
        debug!(node_id, reliability = value, "reliability updated");
        Ok(())
    }

    fn unit_score(field: &str, value: f64) -> Result<f64> {
        if value.is_finite() {
            Ok(value.clamp(0.0, 1.0))
        } else {
            Err(Error::Validation(format!("{} must be a finite number", field)))
        }
    }

    /// Recompute weights so active voting nodes sum to 1.0.
    fn renormalize(&mut self) {
        let voting: Vec<f64> = self
            .nodes
            .values()
            .filter(|n| n.is_voting())
            .map(|n| n.stake)
            .collect();
        let total: f64 = voting.iter().sum();
        let count = voting.len();

        for node in self.nodes.values_mut() {
            node.weight = if !node.is_voting() {
                0.0
            } else if total > 0.0 {
                node.stake / total
            } else {
                // All stakes are zero: fall back to equal shares
                1.0 / count as f64
            };
        }
    }

    /// Elect the highest-reputation active node if no active leader exists.
    fn ensure_leader(&mut self) {
        if self.nodes.values().any(|n| n.is_leader && n.is_active()) {
            return;
        }

        let candidate = self
            .nodes
            .values()
            .filter(|n| n.is_voting())
            .max_by(|a, b| {
                a.reputation
                    .total_cmp(&b.reputation)
                    // Lower id wins ties
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|n| n.id.clone());

        for node in self.nodes.values_mut() {
            node.is_leader = false;
        }
        if let Some(id) = candidate {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.is_leader = true;
                info!(node_id = %id, reputation = node.reputation, "leader elected");
            }
        }
    }

    /// Get a node by ID.
    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Get a node by ID or fail with NotFound.
    pub fn require(&self, node_id: &str) -> Result<&Node> {
        self.get(node_id).ok_or_else(|| Error::node_not_found(node_id))
    }

    /// All nodes, ordered by id.
    pub fn list(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    /// Active voting nodes with their current weight.
    pub fn voting_participants(&self) -> Vec<(NodeId, f64)> {
        self.nodes
            .values()
            .filter(|n| n.is_voting())
            .map(|n| (n.id.clone(), n.weight))
            .collect()
    }

    /// The current leader, if any.
    pub fn leader(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.is_leader)
    }

    /// Highest-reputation active coordinator.
    pub fn best_coordinator(&self) -> Option<&Node> {
        self.nodes
            .values()
            .filter(|n| n.is_active() && n.role == NodeRole::Coordinator)
            .max_by(|a, b| {
                a.reputation
                    .total_cmp(&b.reputation)
                    .then_with(|| b.id.cmp(&a.id))
            })
    }

    /// Number of active nodes.
    pub fn active_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_active()).count()
    }

    /// Total registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes are registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

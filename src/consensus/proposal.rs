//! Decision records and the proposal service.
//!
//! A decision captures an immutable snapshot of the voting participants at
//! proposal time together with requirements derived from its priority.

use crate::consensus::algorithm::ConsensusAlgorithm;
use crate::consensus::conflict::ConflictResolution;
use crate::consensus::voting::{Tally, Vote};
use crate::core::{new_id, now, DecisionId, Error, NodeId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Kind of decision being proposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Parameter,
    Upgrade,
    Policy,
    Emergency,
    ResourceAllocation,
}

/// Urgency of a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// Lifecycle status. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Proposed,
    Voting,
    Consensus,
    Executed,
    Failed,
    Cancelled,
}

impl DecisionStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: DecisionStatus) -> bool {
        use DecisionStatus::*;
        matches!(
            (self, next),
            (Proposed, Voting)
                | (Proposed, Cancelled)
                | (Voting, Consensus)
                | (Voting, Failed)
                | (Voting, Cancelled)
                | (Consensus, Executed)
        )
    }

    /// Whether voting has ended for good.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, DecisionStatus::Proposed | DecisionStatus::Voting)
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionStatus::Proposed => "proposed",
            DecisionStatus::Voting => "voting",
            DecisionStatus::Consensus => "consensus",
            DecisionStatus::Executed => "executed",
            DecisionStatus::Failed => "failed",
            DecisionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Rules a decision is evaluated under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Minimum distinct voters before a non-final outcome may resolve
    pub min_participants: usize,
    /// Approval threshold in (0.5, 1]
    pub consensus_threshold: f64,
    /// Voting window
    pub timeout_minutes: u32,
    /// Every participant must vote yes
    pub require_unanimity: bool,
    /// A single veto rejects
    pub allow_veto: bool,
    /// Score by weight instead of head count
    pub weighted_voting: bool,
    /// Byzantine nodes tolerated by the participant set
    pub byzantine_tolerance: usize,
}

/// Caller-supplied overrides of derived requirements.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementOverrides {
    pub min_participants: Option<usize>,
    pub consensus_threshold: Option<f64>,
    pub timeout_minutes: Option<u32>,
    pub require_unanimity: Option<bool>,
    pub allow_veto: Option<bool>,
    pub weighted_voting: Option<bool>,
}

/// Lifecycle timestamps, each set at most once.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub proposed: Option<Timestamp>,
    pub voting_started: Option<Timestamp>,
    pub voting_ended: Option<Timestamp>,
    pub consensus_reached: Option<Timestamp>,
    pub executed: Option<Timestamp>,
    pub cancelled: Option<Timestamp>,
}

fn stamp(slot: &mut Option<Timestamp>, ts: Timestamp) {
    if slot.is_none() {
        *slot = Some(ts);
    }
}

/// How voting ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Approved,
    Rejected,
    Timeout,
}

/// Frozen result of a resolved decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub result: OutcomeResult,
    /// Yes share of committed (yes + no) votes
    pub final_score: f64,
    /// Distinct voters over participants
    pub participation: f64,
    /// Winning side's share of all cast votes
    pub consensus_strength: f64,
}

impl DecisionOutcome {
    /// Freeze an outcome from a tally.
    pub fn from_tally(result: OutcomeResult, tally: &Tally) -> Self {
        Self {
            result,
            final_score: tally.yes_score(),
            participation: tally.participation(),
            consensus_strength: tally.consensus_strength(),
        }
    }
}

/// A decision record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub title: String,
    pub description: String,
    pub decision_type: DecisionType,
    pub priority: Priority,
    pub status: DecisionStatus,
    pub proposer: NodeId,
    /// Voting nodes active at proposal time
    pub participants: Vec<NodeId>,
    /// Weight of each participant at proposal time
    pub participant_weights: BTreeMap<NodeId, f64>,
    /// One vote per participant
    pub votes: BTreeMap<NodeId, Vote>,
    pub requirements: Requirements,
    pub timeline: Timeline,
    pub outcome: Option<DecisionOutcome>,
    pub conflict_resolution: Option<ConflictResolution>,
    /// Algorithm governing this decision
    pub algorithm_id: String,
}

impl Decision {
    /// Whether a node belongs to the participant snapshot.
    pub fn is_participant(&self, node_id: &str) -> bool {
        self.participant_weights.contains_key(node_id)
    }

    /// Move to `next`, stamping the matching timeline entries.
    pub fn transition(&mut self, next: DecisionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::state(
                &self.id,
                format!("cannot move from {} to {}", self.status, next),
            ));
        }

        let ts = now();
        match next {
            DecisionStatus::Voting => stamp(&mut self.timeline.voting_started, ts),
            DecisionStatus::Consensus => {
                stamp(&mut self.timeline.voting_ended, ts);
                stamp(&mut self.timeline.consensus_reached, ts);
            }
            DecisionStatus::Failed => stamp(&mut self.timeline.voting_ended, ts),
            DecisionStatus::Cancelled => {
                if self.status == DecisionStatus::Voting {
                    stamp(&mut self.timeline.voting_ended, ts);
                }
                stamp(&mut self.timeline.cancelled, ts);
            }
            DecisionStatus::Executed => stamp(&mut self.timeline.executed, ts),
            DecisionStatus::Proposed => {}
        }

        self.status = next;
        Ok(())
    }
}

/// Proposal defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    pub critical_timeout_minutes: u32,
    pub high_timeout_minutes: u32,
    pub medium_timeout_minutes: u32,
    pub low_timeout_minutes: u32,
    /// Lower bound on the quorum size
    pub min_participants_floor: usize,
    /// Fraction of participants forming a quorum
    pub quorum_ratio: f64,
    pub weighted_voting: bool,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            critical_timeout_minutes: 15,
            high_timeout_minutes: 30,
            medium_timeout_minutes: 60,
            low_timeout_minutes: 60,
            min_participants_floor: 3,
            quorum_ratio: 0.6,
            weighted_voting: true,
        }
    }
}

impl ProposalConfig {
    /// Voting window for a priority.
    pub fn timeout_for(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Critical => self.critical_timeout_minutes,
            Priority::High => self.high_timeout_minutes,
            Priority::Medium => self.medium_timeout_minutes,
            Priority::Low => self.low_timeout_minutes,
        }
    }

    /// Check configuration invariants.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            self.critical_timeout_minutes,
            self.high_timeout_minutes,
            self.medium_timeout_minutes,
            self.low_timeout_minutes,
        ];
        if timeouts.contains(&0) {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        if !(self.quorum_ratio > 0.0 && self.quorum_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "quorum_ratio {} outside (0, 1]",
                self.quorum_ratio
            )));
        }
        Ok(())
    }
}

/// Input for a new proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub title: String,
    pub description: String,
    pub decision_type: DecisionType,
    pub priority: Priority,
    pub proposer: NodeId,
    #[serde(default)]
    pub overrides: RequirementOverrides,
}

impl ProposalRequest {
    /// Create a request with derived requirements.
    pub fn new(
        title: &str,
        description: &str,
        decision_type: DecisionType,
        priority: Priority,
        proposer: &str,
    ) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            decision_type,
            priority,
            proposer: proposer.to_string(),
            overrides: RequirementOverrides::default(),
        }
    }

    /// Override derived requirements.
    pub fn with_overrides(mut self, overrides: RequirementOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Creates decision records and opens their voting window.
#[derive(Clone, Debug, Default)]
pub struct DecisionProposalService {
    config: ProposalConfig,
}

impl DecisionProposalService {
    /// Create a new service.
    pub fn new(config: ProposalConfig) -> Self {
        Self { config }
    }

    /// Derive requirements for `participants` voters.
    pub fn derive_requirements(
        &self,
        request: &ProposalRequest,
        participants: usize,
        algorithm: &ConsensusAlgorithm,
    ) -> Result<Requirements> {
        let quorum = (self.config.quorum_ratio * participants as f64).ceil() as usize;
        let overrides = &request.overrides;

        let requirements = Requirements {
            min_participants: overrides
                .min_participants
                .unwrap_or_else(|| quorum.max(self.config.min_participants_floor)),
            consensus_threshold: overrides
                .consensus_threshold
                .unwrap_or(algorithm.default_threshold),
            timeout_minutes: overrides
                .timeout_minutes
                .unwrap_or_else(|| self.config.timeout_for(request.priority)),
            require_unanimity: overrides.require_unanimity.unwrap_or(false),
            allow_veto: overrides
                .allow_veto
                .unwrap_or(request.decision_type != DecisionType::Emergency),
            weighted_voting: overrides
                .weighted_voting
                .unwrap_or(self.config.weighted_voting),
            byzantine_tolerance: participants.saturating_sub(1) / 3,
        };

        if !(requirements.consensus_threshold > 0.5 && requirements.consensus_threshold <= 1.0) {
            return Err(Error::Validation(format!(
                "consensus threshold {} outside (0.5, 1]",
                requirements.consensus_threshold
            )));
        }
        if requirements.timeout_minutes == 0 {
            return Err(Error::Validation("timeout must be positive".to_string()));
        }
        if requirements.min_participants == 0 {
            return Err(Error::Validation(
                "minimum participants must be positive".to_string(),
            ));
        }
        Ok(requirements)
    }

    /// Build a decision in status `proposed`.
    ///
    /// `participants` is the snapshot of active voting nodes and their weights.
    pub fn propose(
        &self,
        request: ProposalRequest,
        participants: Vec<(NodeId, f64)>,
        algorithm: &ConsensusAlgorithm,
    ) -> Result<Decision> {
        if request.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".to_string()));
        }
        if request.description.trim().is_empty() {
            return Err(Error::Validation("description must not be empty".to_string()));
        }
        if participants.is_empty() {
            return Err(Error::Validation(
                "no active voting nodes to take part".to_string(),
            ));
        }

        let requirements = self.derive_requirements(&request, participants.len(), algorithm)?;
        let decision = Decision {
            id: new_id(),
            title: request.title,
            description: request.description,
            decision_type: request.decision_type,
            priority: request.priority,
            status: DecisionStatus::Proposed,
            proposer: request.proposer,
            participants: participants.iter().map(|(id, _)| id.clone()).collect(),
            participant_weights: participants.into_iter().collect(),
            votes: BTreeMap::new(),
            requirements,
            timeline: Timeline {
                proposed: Some(now()),
                ..Default::default()
            },
            outcome: None,
            conflict_resolution: None,
            algorithm_id: algorithm.id.clone(),
        };

        info!(
            decision_id = %decision.id,
            proposer = %decision.proposer,
            participants = decision.participants.len(),
            algorithm = %decision.algorithm_id,
            "decision proposed"
        );
        Ok(decision)
    }

    /// Open the voting window: `proposed -> voting`.
    pub fn start_voting(&self, decision: &mut Decision) -> Result<()> {
        if decision.status != DecisionStatus::Proposed {
            return Err(Error::state(
                &decision.id,
                format!("voting can only start from proposed, not {}", decision.status),
            ));
        }
        decision.transition(DecisionStatus::Voting)?;
        info!(
            decision_id = %decision.id,
            timeout_minutes = decision.requirements.timeout_minutes,
            "voting started"
        );
        Ok(())
    }
}

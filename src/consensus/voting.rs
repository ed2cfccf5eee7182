//! Vote collection and outcome evaluation.
//!
//! Evaluation is a pure function of a decision's vote set, its requirements,
//! its algorithm and whether the voting window has expired, so evaluating an
//! unchanged vote set twice always yields the same verdict.

use crate::consensus::algorithm::ConsensusAlgorithm;
use crate::consensus::proposal::{Decision, DecisionStatus};
use crate::core::{now, sha3_256_multi, Error, Hash256, NodeId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Choice carried by a vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    /// Approve the proposal
    Yes,
    /// Reject the proposal
    No,
    /// Counted as a voter but not as a committed vote
    Abstain,
    /// Reject unilaterally when the decision allows vetoes
    Veto,
}

impl VoteChoice {
    fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::Yes => "yes",
            VoteChoice::No => "no",
            VoteChoice::Abstain => "abstain",
            VoteChoice::Veto => "veto",
        }
    }
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single vote from a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Voting node
    pub node_id: NodeId,
    /// Choice
    pub choice: VoteChoice,
    /// Node weight at cast time
    pub weight: f64,
    /// Voter confidence (0-1)
    pub confidence: f64,
    /// Optional justification
    pub reasoning: Option<String>,
    /// Supporting references
    pub evidence: Vec<String>,
    /// Cast time
    pub timestamp: Timestamp,
    /// Opaque signature token
    pub signature: Option<String>,
}

impl Vote {
    /// Create a new vote with full confidence.
    pub fn new(node_id: &str, choice: VoteChoice) -> Self {
        Self {
            node_id: node_id.to_string(),
            choice,
            weight: 0.0,
            confidence: 1.0,
            reasoning: None,
            evidence: Vec::new(),
            timestamp: now(),
            signature: None,
        }
    }

    /// Set confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Add justification.
    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = Some(reasoning.to_string());
        self
    }

    /// Attach an evidence reference.
    pub fn with_evidence(mut self, evidence: &str) -> Self {
        self.evidence.push(evidence.to_string());
        self
    }

    /// Digest of the canonical vote payload for `decision_id`.
    pub fn digest(&self, decision_id: &str) -> Hash256 {
        sha3_256_multi(&[
            decision_id.as_bytes(),
            b":",
            self.node_id.as_bytes(),
            b":",
            self.choice.as_str().as_bytes(),
            b":",
            &self.confidence.to_be_bytes(),
        ])
    }

    /// Sign the vote. The signature is stored as an opaque token.
    pub fn sign(mut self, decision_id: &str, sign_fn: impl FnOnce(&Hash256) -> String) -> Self {
        let digest = self.digest(decision_id);
        self.signature = Some(sign_fn(&digest));
        self
    }
}

/// Voting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// A locked rejection closer than this to the threshold is held open
    /// and escalated at timeout instead of rejected outright
    pub near_threshold_margin: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            near_threshold_margin: 0.05,
        }
    }
}

/// Vote counts for a decision.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub participants: usize,
    pub voters: usize,
    pub yes_count: usize,
    pub no_count: usize,
    pub abstain_count: usize,
    pub veto_count: usize,
    pub yes_weight: f64,
    pub no_weight: f64,
    pub abstain_weight: f64,
    /// Weight of participants that have not voted, rescaled from the
    /// proposal snapshot onto the cast-time basis of the committed votes
    pub remaining_weight: f64,
    /// Whether scores use weights rather than head counts
    pub weighted: bool,
}

impl Tally {
    /// Count the votes of a decision.
    ///
    /// Vetoes are counted as `no` when the decision does not allow them.
    pub fn compute(decision: &Decision) -> Self {
        let mut tally = Tally {
            participants: decision.participants.len(),
            voters: decision.votes.len(),
            weighted: decision.requirements.weighted_voting,
            ..Default::default()
        };

        for vote in decision.votes.values() {
            match vote.choice {
                VoteChoice::Yes => {
                    tally.yes_count += 1;
                    tally.yes_weight += vote.weight;
                }
                VoteChoice::No => {
                    tally.no_count += 1;
                    tally.no_weight += vote.weight;
                }
                VoteChoice::Abstain => {
                    tally.abstain_count += 1;
                    tally.abstain_weight += vote.weight;
                }
                VoteChoice::Veto => {
                    tally.veto_count += 1;
                    tally.no_count += 1;
                    tally.no_weight += vote.weight;
                }
            }
        }

        let (mut snapshot_voted, mut snapshot_remaining) = (0.0, 0.0);
        for (id, weight) in &decision.participant_weights {
            if decision.votes.contains_key(id) {
                snapshot_voted += weight;
            } else {
                snapshot_remaining += weight;
            }
        }
        // Registry renormalization between proposal and cast shifts the basis
        let cast_total = tally.yes_weight + tally.no_weight + tally.abstain_weight;
        let scale = if snapshot_voted > 0.0 && cast_total > 0.0 {
            cast_total / snapshot_voted
        } else {
            1.0
        };
        tally.remaining_weight = snapshot_remaining * scale;

        tally
    }

    /// (yes, no, abstain, remaining) in scoring units.
    fn units(&self) -> (f64, f64, f64, f64) {
        if self.weighted {
            (
                self.yes_weight,
                self.no_weight,
                self.abstain_weight,
                self.remaining_weight,
            )
        } else {
            (
                self.yes_count as f64,
                self.no_count as f64,
                self.abstain_count as f64,
                self.participants.saturating_sub(self.voters) as f64,
            )
        }
    }

    fn ratio(numerator: f64, denominator: f64) -> f64 {
        if denominator > 0.0 {
            numerator / denominator
        } else {
            0.0
        }
    }

    /// Yes share of committed votes; abstentions are excluded.
    pub fn yes_score(&self) -> f64 {
        let (yes, no, _, _) = self.units();
        Self::ratio(yes, yes + no)
    }

    /// Yes score if every remaining participant voted no.
    pub fn worst_case_score(&self) -> f64 {
        let (yes, no, _, remaining) = self.units();
        Self::ratio(yes, yes + no + remaining)
    }

    /// Yes score if every remaining participant voted yes.
    pub fn best_case_score(&self) -> f64 {
        let (yes, no, _, remaining) = self.units();
        Self::ratio(yes + remaining, yes + no + remaining)
    }

    /// Distinct voters over participants.
    pub fn participation(&self) -> f64 {
        Self::ratio(self.voters as f64, self.participants as f64)
    }

    /// Winning side's share of all cast votes.
    pub fn consensus_strength(&self) -> f64 {
        let (yes, no, abstain, _) = self.units();
        Self::ratio(yes.max(no), yes + no + abstain)
    }

    /// Whether every participant has voted.
    pub fn all_voted(&self) -> bool {
        self.voters >= self.participants
    }
}

/// Why a decision was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Veto,
    /// The threshold cannot be reached by the remaining votes
    Unreachable,
    /// A participant voted other than yes under unanimity
    UnanimityBroken,
}

/// Result of evaluating a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No outcome yet
    Pending,
    Approved,
    Rejected(RejectReason),
    /// Window expired without an outcome
    Timeout {
        quorum_met: bool,
        /// Ended as a near-threshold split
        split: bool,
    },
}

/// Verdict together with the tally it was derived from.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub tally: Tally,
}

/// Records votes and evaluates decisions.
#[derive(Clone, Debug, Default)]
pub struct VotingCoordinator {
    config: VotingConfig,
}

impl VotingCoordinator {
    /// Create a new coordinator.
    pub fn new(config: VotingConfig) -> Self {
        Self { config }
    }

    /// Record a vote, replacing any earlier vote from the same node.
    ///
    /// `weight` is the node's weight at cast time.
    pub fn cast(&self, decision: &mut Decision, mut vote: Vote, weight: f64) -> Result<()> {
        if decision.status != DecisionStatus::Voting {
            return Err(Error::state(
                &decision.id,
                format!("votes are not accepted while {}", decision.status),
            ));
        }
        if !decision.is_participant(&vote.node_id) {
            return Err(Error::Validation(format!(
                "node {} is not a participant of decision {}",
                vote.node_id, decision.id
            )));
        }
        if !(0.0..=1.0).contains(&vote.confidence) {
            return Err(Error::Validation(format!(
                "confidence {} outside [0, 1]",
                vote.confidence
            )));
        }

        vote.weight = weight;
        vote.timestamp = now();
        debug!(
            decision_id = %decision.id,
            node_id = %vote.node_id,
            choice = %vote.choice,
            weight,
            "vote recorded"
        );
        decision.votes.insert(vote.node_id.clone(), vote);
        Ok(())
    }

    /// Evaluate a decision under its algorithm.
    pub fn evaluate(
        &self,
        decision: &Decision,
        algorithm: &ConsensusAlgorithm,
        timed_out: bool,
    ) -> Evaluation {
        let tally = Tally::compute(decision);
        let verdict = self.verdict(decision, algorithm, &tally, timed_out);
        debug!(
            decision_id = %decision.id,
            voters = tally.voters,
            yes_score = tally.yes_score(),
            timed_out,
            ?verdict,
            "decision evaluated"
        );
        Evaluation { verdict, tally }
    }

    /// Order of checks: veto, unanimity, locked approval, crossed threshold,
    /// unreachable threshold, timeout.
    ///
    /// A locked approval ignores `min_participants`: once the remaining
    /// participants cannot pull the score below the threshold, the decision
    /// approves even if a single heavy voter is the only one to have voted.
    fn verdict(
        &self,
        decision: &Decision,
        algorithm: &ConsensusAlgorithm,
        tally: &Tally,
        timed_out: bool,
    ) -> Verdict {
        let req = &decision.requirements;

        if req.allow_veto && tally.veto_count > 0 {
            return Verdict::Rejected(RejectReason::Veto);
        }

        let quorum_met = tally.voters >= req.min_participants;

        if req.require_unanimity {
            if tally.yes_count == tally.participants {
                return Verdict::Approved;
            }
            if !timed_out {
                return Verdict::Pending;
            }
            return if tally.voters > tally.yes_count {
                Verdict::Rejected(RejectReason::UnanimityBroken)
            } else {
                Verdict::Timeout {
                    quorum_met,
                    split: false,
                }
            };
        }

        let threshold = req.consensus_threshold;

        // Approval that holds even if every remaining participant votes no
        let locked = tally.yes_count > 0 && tally.worst_case_score() >= threshold;
        if locked {
            return Verdict::Approved;
        }

        let settled = tally.all_voted() || timed_out;
        let crossed = quorum_met && tally.yes_score() >= threshold;
        if crossed && (settled || !algorithm.requires_settled_approval()) {
            return Verdict::Approved;
        }

        let best = tally.best_case_score();
        if best < threshold {
            if threshold - best > self.config.near_threshold_margin {
                return Verdict::Rejected(RejectReason::Unreachable);
            }
            if timed_out {
                return Verdict::Timeout {
                    quorum_met,
                    split: true,
                };
            }
            return Verdict::Pending;
        }

        if timed_out {
            return Verdict::Timeout {
                quorum_met,
                split: false,
            };
        }
        Verdict::Pending
    }
}

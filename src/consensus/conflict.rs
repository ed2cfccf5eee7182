//! Conflict resolution for decisions that time out without a clean outcome.
//!
//! Supports majority recounts, weighted recounts with a margin, mediation by
//! a coordinator node and arbitration by a designated outsider.

use crate::consensus::proposal::Decision;
use crate::consensus::voting::{Tally, VoteChoice};
use crate::core::{now, Error, NodeId, Result, Timestamp};
use crate::node::NodeRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Resolution policy applied at timeout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Unweighted recount; a strict yes majority approves
    Majority,
    /// Weighted recount approved at `threshold - margin`
    Weighted { margin: f64 },
    /// The best active coordinator casts a deciding vote
    Mediation,
    /// A designated node outside the voter set decides
    Arbitration { arbitrator: NodeId },
}

/// Kind of a recorded resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Majority,
    Weighted,
    Mediation,
    Arbitration,
}

impl ResolutionPolicy {
    /// Kind recorded for this policy.
    pub fn kind(&self) -> ResolutionKind {
        match self {
            ResolutionPolicy::Majority => ResolutionKind::Majority,
            ResolutionPolicy::Weighted { .. } => ResolutionKind::Weighted,
            ResolutionPolicy::Mediation => ResolutionKind::Mediation,
            ResolutionPolicy::Arbitration { .. } => ResolutionKind::Arbitration,
        }
    }
}

/// Record of how a conflict was resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub kind: ResolutionKind,
    pub mediator: Option<NodeId>,
    pub arbitrator: Option<NodeId>,
    /// Deciding vote cast by a mediator or arbitrator
    pub deciding_vote: Option<VoteChoice>,
    /// Whether the resolution approved the decision
    pub approved: bool,
    pub resolution_text: String,
    pub timestamp: Timestamp,
}

/// Conflict resolution configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Policy applied at timeout; `None` fails timed-out decisions directly
    pub policy: Option<ResolutionPolicy>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            policy: Some(ResolutionPolicy::Majority),
        }
    }
}

impl ConflictConfig {
    /// Check configuration invariants.
    pub fn validate(&self) -> Result<()> {
        match &self.policy {
            Some(ResolutionPolicy::Weighted { margin }) if !(0.0..0.5).contains(margin) => Err(
                Error::Config(format!("weighted margin {} outside [0, 0.5)", margin)),
            ),
            Some(ResolutionPolicy::Arbitration { arbitrator }) if arbitrator.trim().is_empty() => {
                Err(Error::Config("arbitrator id must not be empty".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Chooses the deciding vote for mediation and arbitration.
pub trait ConflictArbiter: Send + Sync {
    /// Decide on behalf of `decider`.
    fn decide(&self, decider: &str, decision: &Decision, tally: &Tally) -> VoteChoice;
}

/// Sides with the heavier committed side; a tie keeps the status quo.
#[derive(Clone, Debug, Default)]
pub struct LeaningArbiter;

impl ConflictArbiter for LeaningArbiter {
    fn decide(&self, _decider: &str, _decision: &Decision, tally: &Tally) -> VoteChoice {
        if tally.yes_weight > tally.no_weight {
            VoteChoice::Yes
        } else {
            VoteChoice::No
        }
    }
}

/// Applies the configured policy to timed-out decisions.
#[derive(Clone)]
pub struct ConflictResolver {
    config: ConflictConfig,
    arbiter: Arc<dyn ConflictArbiter>,
}

impl ConflictResolver {
    /// Create a resolver using the default arbiter.
    pub fn new(config: ConflictConfig) -> Self {
        Self {
            config,
            arbiter: Arc::new(LeaningArbiter),
        }
    }

    /// Use a custom arbiter.
    pub fn with_arbiter(mut self, arbiter: Arc<dyn ConflictArbiter>) -> Self {
        self.arbiter = arbiter;
        self
    }

    /// Whether a policy is configured.
    pub fn is_enabled(&self) -> bool {
        self.config.policy.is_some()
    }

    /// Resolve a conflict, or `None` when no policy is configured.
    pub fn resolve(
        &self,
        decision: &Decision,
        tally: &Tally,
        nodes: &NodeRegistry,
    ) -> Option<ConflictResolution> {
        let policy = self.config.policy.as_ref()?;
        let threshold = decision.requirements.consensus_threshold;

        let mut resolution = ConflictResolution {
            kind: policy.kind(),
            mediator: None,
            arbitrator: None,
            deciding_vote: None,
            approved: false,
            resolution_text: String::new(),
            timestamp: now(),
        };

        match policy {
            ResolutionPolicy::Majority => {
                resolution.approved = tally.yes_count > tally.no_count;
                resolution.resolution_text = format!(
                    "Majority recount: {} yes / {} no",
                    tally.yes_count, tally.no_count
                );
            }
            ResolutionPolicy::Weighted { margin } => {
                let committed = tally.yes_weight + tally.no_weight;
                let score = if committed > 0.0 {
                    tally.yes_weight / committed
                } else {
                    0.0
                };
                resolution.approved = score >= threshold - margin;
                resolution.resolution_text = format!(
                    "Weighted recount: {:.1}% yes against {:.1}% required",
                    score * 100.0,
                    (threshold - margin) * 100.0
                );
            }
            ResolutionPolicy::Mediation => match nodes.best_coordinator() {
                Some(mediator) => {
                    let choice = self.arbiter.decide(&mediator.id, decision, tally);
                    resolution.approved = choice == VoteChoice::Yes;
                    resolution.deciding_vote = Some(choice);
                    resolution.mediator = Some(mediator.id.clone());
                    resolution.resolution_text =
                        format!("Mediator {} cast deciding vote {}", mediator.id, choice);
                }
                None => {
                    warn!(decision_id = %decision.id, "no active coordinator available to mediate");
                    resolution.resolution_text =
                        "Mediation unavailable: no active coordinator".to_string();
                }
            },
            ResolutionPolicy::Arbitration { arbitrator } => {
                resolution.arbitrator = Some(arbitrator.clone());
                if decision.is_participant(arbitrator) {
                    warn!(decision_id = %decision.id, arbitrator = %arbitrator, "arbitrator is a participant");
                    resolution.resolution_text = format!(
                        "Arbitration unavailable: {} is a participant",
                        arbitrator
                    );
                } else {
                    let choice = self.arbiter.decide(arbitrator, decision, tally);
                    resolution.approved = choice == VoteChoice::Yes;
                    resolution.deciding_vote = Some(choice);
                    resolution.resolution_text =
                        format!("Arbitrator {} ruled {}", arbitrator, choice);
                }
            }
        }

        info!(
            decision_id = %decision.id,
            kind = ?resolution.kind,
            approved = resolution.approved,
            "conflict resolved"
        );
        Some(resolution)
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::algorithm::AlgorithmRegistry;
    use crate::consensus::proposal::{
        DecisionProposalService, DecisionType, Priority, ProposalRequest,
    };
    use crate::consensus::voting::{Vote, VotingCoordinator};
    use crate::node::{Node, NodeRole};

    struct AlwaysYes;

    impl ConflictArbiter for AlwaysYes {
        fn decide(&self, _decider: &str, _decision: &Decision, _tally: &Tally) -> VoteChoice {
            VoteChoice::Yes
        }
    }

    fn split_decision() -> (Decision, Tally) {
        let algorithms = AlgorithmRegistry::default();
        let service = DecisionProposalService::default();
        let participants = vec![
            ("n0".to_string(), 0.5),
            ("n1".to_string(), 0.3),
            ("n2".to_string(), 0.2),
        ];
        let request = ProposalRequest::new(
            "Fee change",
            "Lower fees by 10%",
            DecisionType::Policy,
            Priority::Medium,
            "n0",
        );
        let mut decision = service
            .propose(request, participants, algorithms.active())
            .unwrap();
        service.start_voting(&mut decision).unwrap();

        let coordinator = VotingCoordinator::default();
        coordinator.cast(&mut decision, Vote::new("n0", VoteChoice::Yes), 0.5).unwrap();
        coordinator.cast(&mut decision, Vote::new("n1", VoteChoice::No), 0.3).unwrap();
        coordinator.cast(&mut decision, Vote::new("n2", VoteChoice::Abstain), 0.2).unwrap();
        let tally = Tally::compute(&decision);
        (decision, tally)
    }

    fn registry_with_coordinator() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Node::new("n0", "n0", NodeRole::Voter)).unwrap();
        registry
            .register(Node::new("c1", "Coordinator", NodeRole::Coordinator).with_reputation(0.8))
            .unwrap();
        registry
            .register(Node::new("c2", "Senior", NodeRole::Coordinator).with_reputation(0.95))
            .unwrap();
        registry
    }

    #[test]
    fn test_majority_tie_fails() {
        let (decision, tally) = split_decision();
        let resolver = ConflictResolver::default();
        let resolution = resolver
            .resolve(&decision, &tally, &NodeRegistry::new())
            .unwrap();
        assert_eq!(resolution.kind, ResolutionKind::Majority);
        assert!(!resolution.approved);
    }

    #[test]
    fn test_weighted_margin() {
        let (decision, tally) = split_decision();
        let lenient = ConflictResolver::new(ConflictConfig {
            policy: Some(ResolutionPolicy::Weighted { margin: 0.05 }),
        });
        assert!(lenient.resolve(&decision, &tally, &NodeRegistry::new()).unwrap().approved);

        let strict = ConflictResolver::new(ConflictConfig {
            policy: Some(ResolutionPolicy::Weighted { margin: 0.01 }),
        });
        assert!(!strict.resolve(&decision, &tally, &NodeRegistry::new()).unwrap().approved);
    }

    #[test]
    fn test_mediation_picks_best_coordinator() {
        let (decision, tally) = split_decision();
        let resolver = ConflictResolver::new(ConflictConfig {
            policy: Some(ResolutionPolicy::Mediation),
        });
        let resolution = resolver
            .resolve(&decision, &tally, &registry_with_coordinator())
            .unwrap();
        assert_eq!(resolution.mediator.as_deref(), Some("c2"));
        // Yes side carries more weight
        assert_eq!(resolution.deciding_vote, Some(VoteChoice::Yes));
        assert!(resolution.approved);
    }

    #[test]
    fn test_mediation_without_coordinator() {
        let (decision, tally) = split_decision();
        let resolver = ConflictResolver::new(ConflictConfig {
            policy: Some(ResolutionPolicy::Mediation),
        });
        let resolution = resolver
            .resolve(&decision, &tally, &NodeRegistry::new())
            .unwrap();
        assert!(resolution.mediator.is_none());
        assert!(!resolution.approved);
    }

    #[test]
    fn test_arbitration() {
        let (decision, tally) = split_decision();
        let resolver = ConflictResolver::new(ConflictConfig {
            policy: Some(ResolutionPolicy::Arbitration {
                arbitrator: "court".to_string(),
            }),
        })
        .with_arbiter(Arc::new(AlwaysYes));
        let resolution = resolver
            .resolve(&decision, &tally, &NodeRegistry::new())
            .unwrap();
        assert_eq!(resolution.arbitrator.as_deref(), Some("court"));
        assert!(resolution.approved);

        let insider = ConflictResolver::new(ConflictConfig {
            policy: Some(ResolutionPolicy::Arbitration {
                arbitrator: "n1".to_string(),
            }),
        })
        .with_arbiter(Arc::new(AlwaysYes));
        let resolution = insider
            .resolve(&decision, &tally, &NodeRegistry::new())
            .unwrap();
        assert!(!resolution.approved);
        assert!(resolution.deciding_vote.is_none());
    }

    #[test]
    fn test_disabled_policy() {
        let (decision, tally) = split_decision();
        let resolver = ConflictResolver::new(ConflictConfig { policy: None });
        assert!(!resolver.is_enabled());
        assert!(resolver
            .resolve(&decision, &tally, &NodeRegistry::new())
            .is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(ConflictConfig::default().validate().is_ok());
        assert!(ConflictConfig {
            policy: Some(ResolutionPolicy::Weighted { margin: 0.7 })
        }
        .validate()
        .is_err());

        let config: ConflictConfig =
            serde_json::from_str(r#"{"policy":{"type":"arbitration","arbitrator":"court"}}"#)
                .unwrap();
        assert_eq!(
            config.policy,
            Some(ResolutionPolicy::Arbitration {
                arbitrator: "court".to_string()
            })
        );
    }
}

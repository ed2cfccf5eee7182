//! Consensus Module
//!
//! Provides weighted, Byzantine-aware decision making:
//! - Algorithm presets with finality and fault tolerance
//! - Decision proposals with priority-derived requirements
//! - Vote collection and threshold evaluation
//! - Conflict resolution for timed-out decisions
//! - Network metrics
//! - Decision engine orchestration

pub mod algorithm;
pub mod conflict;
pub mod engine;
pub mod metrics;
pub mod proposal;
pub mod voting;

pub use algorithm::{AlgorithmKind, AlgorithmRegistry, ConsensusAlgorithm, Finality};
pub use conflict::{
    ConflictArbiter, ConflictConfig, ConflictResolution, ConflictResolver, ResolutionKind,
    ResolutionPolicy,
};
pub use engine::{DecisionEngine, DecisionEvent, EngineConfig, EventConfig};
pub use metrics::{MetricsAggregator, NetworkMetrics};
pub use proposal::{
    Decision, DecisionOutcome, DecisionProposalService, DecisionStatus, DecisionType,
    OutcomeResult, Priority, ProposalConfig, ProposalRequest, RequirementOverrides, Requirements,
};
pub use voting::{Tally, Verdict, Vote, VoteChoice, VotingConfig, VotingCoordinator};

//! Consensus algorithm descriptors.
//!
//! Algorithms are named parameter presets: each supplies the default
//! approval threshold for new proposals, a Byzantine-tolerance ceiling and a
//! finality mode. Exactly one algorithm is active at a time; decisions record
//! the id of the algorithm active when they were proposed.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Id of the algorithm active after construction.
pub const DEFAULT_ALGORITHM: &str = "pbft";

/// Family an algorithm belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Pbft,
    Tendermint,
    HotStuff,
    ProofOfStake,
}

/// How final an approved outcome is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    /// Approval is final as soon as the threshold is crossed.
    Absolute,
    /// Approval is only accepted once later votes can no longer overturn it.
    Probabilistic,
}

/// A consensus algorithm descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusAlgorithm {
    /// Algorithm id
    pub id: String,
    /// Display name
    pub name: String,
    /// Family
    pub kind: AlgorithmKind,
    /// Maximum fraction of adversarial nodes tolerated
    pub byzantine_tolerance: f64,
    /// Finality mode
    pub finality: Finality,
    /// Approval threshold inherited by new proposals
    pub default_threshold: f64,
}

impl ConsensusAlgorithm {
    /// Create a new descriptor.
    pub fn new(id: &str, name: &str, kind: AlgorithmKind, finality: Finality) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            byzantine_tolerance: 0.33,
            finality,
            default_threshold: 0.67,
        }
    }

    /// Set the tolerance ceiling.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.byzantine_tolerance = tolerance;
        self
    }

    /// Set the default threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Check descriptor invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("algorithm id must not be empty".to_string()));
        }
        if !(self.default_threshold > 0.5 && self.default_threshold <= 1.0) {
            return Err(Error::Validation(format!(
                "algorithm {} threshold {} outside (0.5, 1]",
                self.id, self.default_threshold
            )));
        }
        if !(0.0..0.5).contains(&self.byzantine_tolerance) {
            return Err(Error::Validation(format!(
                "algorithm {} tolerance {} outside [0, 0.5)",
                self.id, self.byzantine_tolerance
            )));
        }
        Ok(())
    }

    /// Whether approval must wait until it can no longer be overturned.
    pub fn requires_settled_approval(&self) -> bool {
        self.finality == Finality::Probabilistic
    }

    /// Built-in presets.
    pub fn presets() -> Vec<ConsensusAlgorithm> {
        vec![
            ConsensusAlgorithm::new(
                "pbft",
                "Practical Byzantine Fault Tolerance",
                AlgorithmKind::Pbft,
                Finality::Absolute,
            ),
            ConsensusAlgorithm::new(
                "tendermint",
                "Tendermint BFT",
                AlgorithmKind::Tendermint,
                Finality::Absolute,
            ),
            ConsensusAlgorithm::new(
                "hotstuff",
                "HotStuff",
                AlgorithmKind::HotStuff,
                Finality::Absolute,
            )
            .with_threshold(0.7),
            ConsensusAlgorithm::new(
                "proof-of-stake",
                "Stake-weighted Proof of Stake",
                AlgorithmKind::ProofOfStake,
                Finality::Probabilistic,
            )
            .with_tolerance(0.49)
            .with_threshold(0.51),
        ]
    }
}

/// Holds all known algorithms and the active one.
#[derive(Clone, Debug)]
pub struct AlgorithmRegistry {
    algorithms: BTreeMap<String, ConsensusAlgorithm>,
    active: String,
}

impl AlgorithmRegistry {
    /// Create a registry holding the built-in presets with `pbft` active.
    pub fn with_presets() -> Self {
        let algorithms = ConsensusAlgorithm::presets()
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        Self {
            algorithms,
            active: DEFAULT_ALGORITHM.to_string(),
        }
    }

    /// Register a new descriptor. Existing ids cannot be replaced because
    /// in-flight decisions reference them.
    pub fn register(&mut self, algorithm: ConsensusAlgorithm) -> Result<()> {
        algorithm.validate()?;
        if self.algorithms.contains_key(&algorithm.id) {
            return Err(Error::Validation(format!(
                "algorithm {} is already registered",
                algorithm.id
            )));
        }
        info!(algorithm_id = %algorithm.id, kind = ?algorithm.kind, "consensus algorithm registered");
        self.algorithms.insert(algorithm.id.clone(), algorithm);
        Ok(())
    }

    /// Make another algorithm the default for future proposals.
    /// Returns the previously active id.
    pub fn switch_active(&mut self, algorithm_id: &str) -> Result<String> {
        if !self.algorithms.contains_key(algorithm_id) {
            return Err(Error::algorithm_not_found(algorithm_id));
        }
        let previous = std::mem::replace(&mut self.active, algorithm_id.to_string());
        info!(from = %previous, to = algorithm_id, "active consensus algorithm switched");
        Ok(previous)
    }

    /// The active algorithm.
    pub fn active(&self) -> &ConsensusAlgorithm {
        // `active` always names a registered algorithm
        &self.algorithms[&self.active]
    }

    /// Look up an algorithm.
    pub fn get(&self, algorithm_id: &str) -> Option<&ConsensusAlgorithm> {
        self.algorithms.get(algorithm_id)
    }

    /// All registered algorithms.
    pub fn list(&self) -> Vec<ConsensusAlgorithm> {
        self.algorithms.values().cloned().collect()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_presets()
    }
}

/// Number of Byzantine nodes `n` nodes tolerate, where n >= 3f + 1.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Tolerated Byzantine share of `n` nodes as a percentage.
pub fn byzantine_tolerance_percent(n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    max_faulty(n) as f64 / n as f64 * 100.0
}

//! Decision engine orchestrating proposals, voting and conflict resolution.
//!
//! The engine owns the node and algorithm registries, every decision record
//! and one timeout timer per decision in `voting`. Each decision sits behind
//! its own mutex so evaluations of one decision are serialized while distinct
//! decisions proceed concurrently. Status transitions are published on a
//! broadcast channel as immutable snapshots.

use crate::consensus::algorithm::{AlgorithmRegistry, ConsensusAlgorithm};
use crate::consensus::conflict::{ConflictArbiter, ConflictConfig, ConflictResolver};
use crate::consensus::metrics::{MetricsAggregator, NetworkMetrics};
use crate::consensus::proposal::{
    Decision, DecisionOutcome, DecisionProposalService, DecisionStatus, DecisionType,
    OutcomeResult, Priority, ProposalConfig, ProposalRequest,
};
use crate::consensus::voting::{Evaluation, Verdict, Vote, VoteChoice, VotingConfig, VotingCoordinator};
use crate::core::{init_logging, DecisionId, Error, LoggingConfig, Result};
use crate::node::{Node, NodeRegistry, NodeRole, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the decision engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Requirement derivation
    pub proposal: ProposalConfig,
    /// Evaluation tuning
    pub voting: VotingConfig,
    /// Timeout escalation
    pub conflict: ConflictConfig,
    /// Event channel sizing
    pub events: EventConfig,
    /// Log output, installed at construction unless the host already set
    /// a global subscriber
    pub logging: LoggingConfig,
}

/// Event channel configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Events buffered per subscriber before lagging
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check configuration invariants.
    pub fn validate(&self) -> Result<()> {
        self.proposal.validate()?;
        self.conflict.validate()?;
        if !(0.0..0.5).contains(&self.voting.near_threshold_margin) {
            return Err(Error::Config(format!(
                "near_threshold_margin {} outside [0, 0.5)",
                self.voting.near_threshold_margin
            )));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("event capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Change notifications published to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DecisionEvent {
    Proposed { decision: Decision },
    VotingStarted { decision: Decision },
    VoteCast { decision_id: DecisionId, vote: Vote },
    Resolved { decision: Decision },
    Cancelled { decision: Decision },
    Executed { decision: Decision },
    NodeRegistered { node: Node },
    NodeStatusChanged { node: Node, previous: NodeStatus },
    AlgorithmSwitched { from: String, to: String },
}

struct EngineInner {
    nodes: RwLock<NodeRegistry>,
    algorithms: RwLock<AlgorithmRegistry>,
    decisions: RwLock<HashMap<DecisionId, Arc<Mutex<Decision>>>>,
    timers: Mutex<HashMap<DecisionId, JoinHandle<()>>>,
    proposals: DecisionProposalService,
    voting: VotingCoordinator,
    resolver: ConflictResolver,
    events: broadcast::Sender<DecisionEvent>,
}

/// The decision coordination service.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct DecisionEngine {
    inner: Arc<EngineInner>,
}

impl DecisionEngine {
    /// Create a new engine.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let resolver = ConflictResolver::new(config.conflict.clone());
        Self::build(config, resolver)
    }

    /// Create an engine whose mediators and arbitrators decide through `arbiter`.
    pub fn with_arbiter(config: EngineConfig, arbiter: Arc<dyn ConflictArbiter>) -> Result<Self> {
        let resolver = ConflictResolver::new(config.conflict.clone()).with_arbiter(arbiter);
        Self::build(config, resolver)
    }

    fn build(config: EngineConfig, resolver: ConflictResolver) -> Result<Self> {
        config.validate()?;
        if !init_logging(&config.logging) {
            debug!("global subscriber already installed");
        }
        let (events, _) = broadcast::channel(config.events.capacity);

        info!(
            algorithm = crate::consensus::algorithm::DEFAULT_ALGORITHM,
            "decision engine started"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                nodes: RwLock::new(NodeRegistry::new()),
                algorithms: RwLock::new(AlgorithmRegistry::with_presets()),
                decisions: RwLock::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                proposals: DecisionProposalService::new(config.proposal),
                voting: VotingCoordinator::new(config.voting),
                resolver,
                events,
            }),
        })
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DecisionEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: DecisionEvent) {
        // No subscribers is not an error
        let _ = self.inner.events.send(event);
    }

    // ----- lock helpers -----

    fn read_nodes(&self) -> Result<RwLockReadGuard<'_, NodeRegistry>> {
        self.inner
            .nodes
            .read()
            .map_err(|_| Error::Internal("node registry lock poisoned".to_string()))
    }

    fn write_nodes(&self) -> Result<RwLockWriteGuard<'_, NodeRegistry>> {
        self.inner
            .nodes
            .write()
            .map_err(|_| Error::Internal("node registry lock poisoned".to_string()))
    }

    fn read_algorithms(&self) -> Result<RwLockReadGuard<'_, AlgorithmRegistry>> {
        self.inner
            .algorithms
            .read()
            .map_err(|_| Error::Internal("algorithm registry lock poisoned".to_string()))
    }

    fn write_algorithms(&self) -> Result<RwLockWriteGuard<'_, AlgorithmRegistry>> {
        self.inner
            .algorithms
            .write()
            .map_err(|_| Error::Internal("algorithm registry lock poisoned".to_string()))
    }

    fn slot(&self, decision_id: &str) -> Result<Arc<Mutex<Decision>>> {
        self.inner
            .decisions
            .read()
            .map_err(|_| Error::Internal("decision table lock poisoned".to_string()))?
            .get(decision_id)
            .cloned()
            .ok_or_else(|| Error::decision_not_found(decision_id))
    }

    fn lock<'a>(decision_id: &str, slot: &'a Mutex<Decision>) -> Result<MutexGuard<'a, Decision>> {
        slot.lock().map_err(|_| {
            error!(decision_id, "decision lock poisoned; handling must be restarted");
            Error::Concurrency(decision_id.to_string())
        })
    }

    // ----- nodes -----

    /// Register a participant node.
    pub fn register_node(&self, node: Node) -> Result<()> {
        let id = node.id.clone();
        let snapshot = {
            let mut nodes = self.write_nodes()?;
            nodes.register(node)?;
            nodes.require(&id)?.clone()
        };
        self.publish(DecisionEvent::NodeRegistered { node: snapshot });
        Ok(())
    }

    /// Apply an externally reported status change.
    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        let (previous, snapshot) = {
            let mut nodes = self.write_nodes()?;
            let previous = nodes.set_status(node_id, status)?;
            (previous, nodes.require(node_id)?.clone())
        };
        if previous != status {
            self.publish(DecisionEvent::NodeStatusChanged {
                node: snapshot,
                previous,
            });
        }
        Ok(())
    }

    /// Update a node's externally supplied reputation.
    pub fn set_node_reputation(&self, node_id: &str, reputation: f64) -> Result<()> {
        self.write_nodes()?.set_reputation(node_id, reputation)
    }

    /// Update a node's externally reported reliability.
    pub fn set_node_reliability(&self, node_id: &str, reliability: f64) -> Result<()> {
        self.write_nodes()?.set_reliability(node_id, reliability)
    }

    /// Snapshot of a node.
    pub fn node(&self, node_id: &str) -> Result<Node> {
        Ok(self.read_nodes()?.require(node_id)?.clone())
    }

    /// Snapshot of all nodes.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        Ok(self.read_nodes()?.list())
    }

    // ----- algorithms -----

    /// Register an additional algorithm preset.
    pub fn register_algorithm(&self, algorithm: ConsensusAlgorithm) -> Result<()> {
        self.write_algorithms()?.register(algorithm)
    }

    /// Change the algorithm used by future proposals.
    pub fn switch_active_algorithm(&self, algorithm_id: &str) -> Result<()> {
        let previous = self.write_algorithms()?.switch_active(algorithm_id)?;
        self.publish(DecisionEvent::AlgorithmSwitched {
            from: previous,
            to: algorithm_id.to_string(),
        });
        Ok(())
    }

    /// The currently active algorithm.
    pub fn active_algorithm(&self) -> Result<ConsensusAlgorithm> {
        Ok(self.read_algorithms()?.active().clone())
    }

    /// All registered algorithms.
    pub fn algorithms(&self) -> Result<Vec<ConsensusAlgorithm>> {
        Ok(self.read_algorithms()?.list())
    }

    // ----- proposals -----

    /// Propose a decision with requirements derived from its priority.
    pub fn propose_decision(
        &self,
        title: &str,
        description: &str,
        decision_type: DecisionType,
        priority: Priority,
        proposer: &str,
    ) -> Result<DecisionId> {
        self.propose(ProposalRequest::new(
            title,
            description,
            decision_type,
            priority,
            proposer,
        ))
    }

    /// Propose a decision, honoring any requirement overrides.
    pub fn propose(&self, request: ProposalRequest) -> Result<DecisionId> {
        let participants = {
            let nodes = self.read_nodes()?;
            nodes.require(&request.proposer)?;
            nodes.voting_participants()
        };
        let algorithm = self.active_algorithm()?;
        let decision = self
            .inner
            .proposals
            .propose(request, participants, &algorithm)?;

        let id = decision.id.clone();
        self.inner
            .decisions
            .write()
            .map_err(|_| Error::Internal("decision table lock poisoned".to_string()))?
            .insert(id.clone(), Arc::new(Mutex::new(decision.clone())));

        self.publish(DecisionEvent::Proposed { decision });
        Ok(id)
    }

    /// Open voting and schedule the decision's timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_voting(&self, decision_id: &str) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("start_voting requires a tokio runtime".to_string()))?;

        let slot = self.slot(decision_id)?;
        let mut decision = Self::lock(decision_id, &slot)?;
        self.inner.proposals.start_voting(&mut decision)?;

        let timeout = Duration::from_secs(u64::from(decision.requirements.timeout_minutes) * 60);
        self.schedule_timeout(&runtime, decision_id, timeout)?;

        let snapshot = decision.clone();
        drop(decision);
        self.publish(DecisionEvent::VotingStarted { decision: snapshot });
        Ok(())
    }

    fn schedule_timeout(
        &self,
        runtime: &tokio::runtime::Handle,
        decision_id: &str,
        timeout: Duration,
    ) -> Result<()> {
        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let id = decision_id.to_string();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            // Engine dropped: nothing to expire
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let engine = DecisionEngine { inner };
            if let Err(err) = engine.fire_timeout(&id) {
                error!(decision_id = %id, %err, "timeout handling failed");
            }
        });

        let mut timers = self
            .inner
            .timers
            .lock()
            .map_err(|_| Error::Internal("timer table lock poisoned".to_string()))?;
        if let Some(previous) = timers.insert(decision_id.to_string(), handle) {
            previous.abort();
        }
        Ok(())
    }

    fn fire_timeout(&self, decision_id: &str) -> Result<DecisionStatus> {
        // The firing task must not abort itself
        if let Ok(mut timers) = self.inner.timers.lock() {
            timers.remove(decision_id);
        }
        self.expire_voting(decision_id)
    }

    fn cancel_timer(&self, decision_id: &str) {
        if let Ok(mut timers) = self.inner.timers.lock() {
            if let Some(handle) = timers.remove(decision_id) {
                handle.abort();
                debug!(decision_id, "timeout timer cancelled");
            }
        }
    }

    // ----- voting -----

    /// Cast a vote and evaluate the decision.
    /// Returns the status after evaluation.
    pub fn cast_vote(
        &self,
        decision_id: &str,
        node_id: &str,
        choice: VoteChoice,
        confidence: f64,
        reasoning: Option<&str>,
    ) -> Result<DecisionStatus> {
        let mut vote = Vote::new(node_id, choice).with_confidence(confidence);
        if let Some(reasoning) = reasoning {
            vote = vote.with_reasoning(reasoning);
        }
        self.submit_vote(decision_id, vote)
    }

    /// Record a fully formed vote (evidence, signature) and evaluate.
    pub fn submit_vote(&self, decision_id: &str, vote: Vote) -> Result<DecisionStatus> {
        let slot = self.slot(decision_id)?;
        let mut decision = Self::lock(decision_id, &slot)?;

        let weight = self
            .read_nodes()?
            .get(&vote.node_id)
            .map(|n| n.weight)
            .unwrap_or(0.0);

        let node_id = vote.node_id.clone();
        if let Err(err) = self.inner.voting.cast(&mut decision, vote, weight) {
            warn!(decision_id, %err, "vote rejected");
            return Err(err);
        }

        if let Some(recorded) = decision.votes.get(&node_id).cloned() {
            self.publish(DecisionEvent::VoteCast {
                decision_id: decision_id.to_string(),
                vote: recorded,
            });
        }

        self.evaluate_locked(&mut decision, false)
    }

    /// Re-evaluate a decision without new input.
    pub fn evaluate(&self, decision_id: &str) -> Result<DecisionStatus> {
        let slot = self.slot(decision_id)?;
        let mut decision = Self::lock(decision_id, &slot)?;
        if decision.status != DecisionStatus::Voting {
            return Ok(decision.status);
        }
        self.evaluate_locked(&mut decision, false)
    }

    /// Handle expiry of the voting window.
    ///
    /// A no-op for decisions that already left `voting`.
    pub fn expire_voting(&self, decision_id: &str) -> Result<DecisionStatus> {
        let slot = self.slot(decision_id)?;
        let mut decision = Self::lock(decision_id, &slot)?;
        if decision.status != DecisionStatus::Voting {
            debug!(decision_id, status = %decision.status, "late timeout ignored");
            return Ok(decision.status);
        }
        info!(decision_id, "voting window expired");
        self.evaluate_locked(&mut decision, true)
    }

    /// Restart the handling path of a decision whose lock was poisoned by a
    /// panic mid-evaluation. The outcome is recomputed from the recorded votes.
    pub fn recover_decision(&self, decision_id: &str) -> Result<DecisionStatus> {
        let slot = self.slot(decision_id)?;
        if slot.is_poisoned() {
            warn!(decision_id, "recovering decision after poisoned evaluation");
            slot.clear_poison();
        }
        self.evaluate(decision_id)
    }

    fn evaluate_locked(&self, decision: &mut Decision, timed_out: bool) -> Result<DecisionStatus> {
        let algorithm = self
            .read_algorithms()?
            .get(&decision.algorithm_id)
            .cloned()
            .ok_or_else(|| Error::algorithm_not_found(&decision.algorithm_id))?;

        let evaluation = self.inner.voting.evaluate(decision, &algorithm, timed_out);
        self.settle(decision, evaluation)?;
        Ok(decision.status)
    }

    fn settle(&self, decision: &mut Decision, evaluation: Evaluation) -> Result<()> {
        let Evaluation { verdict, tally } = evaluation;

        let (result, status) = match verdict {
            Verdict::Pending => return Ok(()),
            Verdict::Approved => (OutcomeResult::Approved, DecisionStatus::Consensus),
            Verdict::Rejected(reason) => {
                info!(decision_id = %decision.id, ?reason, "decision rejected");
                (OutcomeResult::Rejected, DecisionStatus::Failed)
            }
            Verdict::Timeout { quorum_met, split } => {
                // Unanimity is never overridden by a recount or deciding vote
                let escalate = quorum_met
                    && !decision.requirements.require_unanimity
                    && self.inner.resolver.is_enabled();
                let resolution = if escalate {
                    let nodes = self.read_nodes()?;
                    self.inner.resolver.resolve(decision, &tally, &nodes)
                } else {
                    None
                };
                info!(
                    decision_id = %decision.id,
                    quorum_met,
                    split,
                    escalated = resolution.is_some(),
                    "decision timed out"
                );
                let approved = resolution.as_ref().map(|r| r.approved).unwrap_or(false);
                decision.conflict_resolution = resolution;
                if approved {
                    (OutcomeResult::Approved, DecisionStatus::Consensus)
                } else {
                    (OutcomeResult::Timeout, DecisionStatus::Failed)
                }
            }
        };

        decision.transition(status)?;
        decision.outcome = Some(DecisionOutcome::from_tally(result, &tally));
        self.cancel_timer(&decision.id);

        info!(
            decision_id = %decision.id,
            ?result,
            status = %decision.status,
            final_score = tally.yes_score(),
            participation = tally.participation(),
            "decision resolved"
        );
        self.publish(DecisionEvent::Resolved {
            decision: decision.clone(),
        });
        Ok(())
    }

    // ----- lifecycle -----

    /// Cancel a decision in `proposed` or `voting`.
    ///
    /// Only the proposer or an active coordinator may cancel. Recorded
    /// votes are discarded.
    pub fn cancel_decision(&self, decision_id: &str, actor: &str) -> Result<()> {
        let slot = self.slot(decision_id)?;
        let mut decision = Self::lock(decision_id, &slot)?;

        if actor != decision.proposer {
            let nodes = self.read_nodes()?;
            let node = nodes.require(actor)?;
            if !(node.is_active() && node.role == NodeRole::Coordinator) {
                warn!(decision_id, actor, "cancellation refused");
                return Err(Error::Validation(format!(
                    "{} is not authorized to cancel decision {}",
                    actor, decision_id
                )));
            }
        }

        decision.transition(DecisionStatus::Cancelled)?;
        decision.votes.clear();
        self.cancel_timer(decision_id);

        info!(decision_id, actor, "decision cancelled");
        let snapshot = decision.clone();
        drop(decision);
        self.publish(DecisionEvent::Cancelled { decision: snapshot });
        Ok(())
    }

    /// Mark an approved decision as executed.
    pub fn execute_decision(&self, decision_id: &str) -> Result<()> {
        let slot = self.slot(decision_id)?;
        let mut decision = Self::lock(decision_id, &slot)?;
        decision.transition(DecisionStatus::Executed)?;

        info!(decision_id, "decision executed");
        let snapshot = decision.clone();
        drop(decision);
        self.publish(DecisionEvent::Executed { decision: snapshot });
        Ok(())
    }

    // ----- queries -----

    /// Snapshot of a decision.
    pub fn decision(&self, decision_id: &str) -> Result<Decision> {
        let slot = self.slot(decision_id)?;
        let decision = Self::lock(decision_id, &slot)?;
        Ok(decision.clone())
    }

    /// Snapshots of all decisions, oldest first.
    pub fn decisions(&self) -> Result<Vec<Decision>> {
        let slots: Vec<(DecisionId, Arc<Mutex<Decision>>)> = self
            .inner
            .decisions
            .read()
            .map_err(|_| Error::Internal("decision table lock poisoned".to_string()))?
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut decisions = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            decisions.push(Self::lock(&id, &slot)?.clone());
        }
        decisions.sort_by_key(|d| d.timeline.proposed);
        Ok(decisions)
    }

    /// Aggregated metrics over current state.
    pub fn metrics(&self) -> Result<NetworkMetrics> {
        let nodes = self.nodes()?;
        let decisions = self.decisions()?;
        Ok(MetricsAggregator::snapshot(&nodes, &decisions))
    }

    /// Number of armed timeout timers.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Abort every timer. Decisions keep their current status.
    pub fn shutdown(&self) {
        if let Ok(mut timers) = self.inner.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
        info!("decision engine stopped");
    }
}

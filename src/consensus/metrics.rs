//! Read-only rollups over node and decision state.
//!
//! Nothing here is stored; every figure is recomputed from the snapshots
//! passed in.

use crate::consensus::algorithm::{byzantine_tolerance_percent, max_faulty};
use crate::consensus::proposal::{Decision, DecisionStatus};
use crate::core::{now, NodeId, Timestamp};
use crate::node::Node;
use serde::{Deserialize, Serialize};

/// Aggregated view of the network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub total_decisions: usize,
    pub proposed: usize,
    pub voting: usize,
    pub consensus: usize,
    pub executed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// (consensus + executed) / total
    pub consensus_rate: f64,
    /// Mean seconds from voting start to consensus
    pub average_decision_time_secs: Option<f64>,
    pub active_nodes: usize,
    pub total_nodes: usize,
    /// Byzantine nodes the active set tolerates
    pub max_faulty_nodes: usize,
    /// Tolerated Byzantine share of active nodes (percent)
    pub byzantine_tolerance: f64,
    /// Mean reliability of active nodes
    pub network_health: f64,
    pub leader: Option<NodeId>,
    pub computed_at: Timestamp,
}

/// Pure metric functions.
pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Share of decisions that reached consensus (including executed ones).
    pub fn consensus_rate(decisions: &[Decision]) -> f64 {
        if decisions.is_empty() {
            return 0.0;
        }
        let reached = decisions
            .iter()
            .filter(|d| {
                matches!(
                    d.status,
                    DecisionStatus::Consensus | DecisionStatus::Executed
                )
            })
            .count();
        reached as f64 / decisions.len() as f64
    }

    /// Mean time from voting start to consensus.
    pub fn average_decision_time(decisions: &[Decision]) -> Option<chrono::Duration> {
        let durations: Vec<chrono::Duration> = decisions
            .iter()
            .filter_map(|d| match (d.timeline.voting_started, d.timeline.consensus_reached) {
                (Some(start), Some(end)) => Some(end - start),
                _ => None,
            })
            .collect();
        if durations.is_empty() {
            return None;
        }
        let total = durations
            .iter()
            .fold(chrono::Duration::zero(), |acc, d| acc + *d);
        Some(total / durations.len() as i32)
    }

    /// Tolerated Byzantine share of active nodes, in percent.
    pub fn byzantine_tolerance(nodes: &[Node]) -> f64 {
        byzantine_tolerance_percent(Self::active_count(nodes))
    }

    /// Mean reliability over active nodes.
    pub fn network_health(nodes: &[Node]) -> f64 {
        let active: Vec<f64> = nodes
            .iter()
            .filter(|n| n.is_active())
            .map(|n| n.reliability)
            .collect();
        if active.is_empty() {
            return 0.0;
        }
        active.iter().sum::<f64>() / active.len() as f64
    }

    fn active_count(nodes: &[Node]) -> usize {
        nodes.iter().filter(|n| n.is_active()).count()
    }

    /// Compute all metrics.
    pub fn snapshot(nodes: &[Node], decisions: &[Decision]) -> NetworkMetrics {
        let count = |status: DecisionStatus| decisions.iter().filter(|d| d.status == status).count();
        let active_nodes = Self::active_count(nodes);

        NetworkMetrics {
            total_decisions: decisions.len(),
            proposed: count(DecisionStatus::Proposed),
            voting: count(DecisionStatus::Voting),
            consensus: count(DecisionStatus::Consensus),
            executed: count(DecisionStatus::Executed),
            failed: count(DecisionStatus::Failed),
            cancelled: count(DecisionStatus::Cancelled),
            consensus_rate: Self::consensus_rate(decisions),
            average_decision_time_secs: Self::average_decision_time(decisions)
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
            active_nodes,
            total_nodes: nodes.len(),
            max_faulty_nodes: max_faulty(active_nodes),
            byzantine_tolerance: Self::byzantine_tolerance(nodes),
            network_health: Self::network_health(nodes),
            leader: nodes.iter().find(|n| n.is_leader).map(|n| n.id.clone()),
            computed_at: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::algorithm::AlgorithmRegistry;
    use crate::consensus::proposal::{
        DecisionProposalService, DecisionType, Priority, ProposalRequest,
    };
    use crate::node::{NodeRegistry, NodeRole, NodeStatus};

    fn nodes(n: usize) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        for i in 0..n {
            registry
                .register(Node::new(&format!("n{}", i), "node", NodeRole::Validator))
                .unwrap();
        }
        registry
    }

    fn decision(status: DecisionStatus) -> Decision {
        let algorithms = AlgorithmRegistry::default();
        let service = DecisionProposalService::default();
        let request = ProposalRequest::new(
            "Title",
            "Description",
            DecisionType::Policy,
            Priority::Low,
            "n0",
        );
        let mut d = service
            .propose(request, vec![("n0".to_string(), 1.0)], algorithms.active())
            .unwrap();
        d.status = status;
        d
    }

    #[test]
    fn test_byzantine_tolerance() {
        assert_eq!(MetricsAggregator::byzantine_tolerance(&nodes(4).list()), 25.0);
        assert_eq!(MetricsAggregator::byzantine_tolerance(&nodes(10).list()), 30.0);

        let mut registry = nodes(5);
        registry.set_status("n4", NodeStatus::Faulty).unwrap();
        assert_eq!(MetricsAggregator::byzantine_tolerance(&registry.list()), 25.0);
    }

    #[test]
    fn test_consensus_rate() {
        let decisions = vec![
            decision(DecisionStatus::Consensus),
            decision(DecisionStatus::Executed),
            decision(DecisionStatus::Failed),
            decision(DecisionStatus::Voting),
        ];
        assert_eq!(MetricsAggregator::consensus_rate(&decisions), 0.5);
        assert_eq!(MetricsAggregator::consensus_rate(&[]), 0.0);
    }

    #[test]
    fn test_average_decision_time() {
        let start = now();
        let mut fast = decision(DecisionStatus::Consensus);
        fast.timeline.voting_started = Some(start);
        fast.timeline.consensus_reached = Some(start + chrono::Duration::seconds(10));
        let mut slow = decision(DecisionStatus::Executed);
        slow.timeline.voting_started = Some(start);
        slow.timeline.consensus_reached = Some(start + chrono::Duration::seconds(30));
        let failed = decision(DecisionStatus::Failed);

        let avg = MetricsAggregator::average_decision_time(&[fast, slow, failed]).unwrap();
        assert_eq!(avg.num_seconds(), 20);
        assert!(MetricsAggregator::average_decision_time(&[]).is_none());
    }

    #[test]
    fn test_network_health() {
        let mut registry = nodes(3);
        registry.set_reliability("n0", 0.5).unwrap();
        registry.set_reliability("n1", 1.0).unwrap();
        registry.set_reliability("n2", 0.0).unwrap();
        registry.set_status("n2", NodeStatus::Inactive).unwrap();
        assert_eq!(MetricsAggregator::network_health(&registry.list()), 0.75);
    }

    #[test]
    fn test_snapshot() {
        let registry = nodes(4);
        let decisions = vec![decision(DecisionStatus::Consensus), decision(DecisionStatus::Failed)];
        let metrics = MetricsAggregator::snapshot(&registry.list(), &decisions);

        assert_eq!(metrics.total_decisions, 2);
        assert_eq!(metrics.consensus, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.active_nodes, 4);
        assert_eq!(metrics.max_faulty_nodes, 1);
        assert_eq!(metrics.leader.as_deref(), Some("n0"));
        assert!(serde_json::to_string(&metrics).unwrap().contains("network_health"));
    }
}

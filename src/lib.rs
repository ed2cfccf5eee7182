//! # Concord - Decision Coordination Core
//!
//! Coordinates collective decisions among a set of participant nodes:
//! - **Nodes**: registry with stake-derived voting weights and leader election
//! - **Consensus**: proposals, weighted voting, timeouts and conflict resolution
//! - **Metrics**: consensus rate, decision latency and Byzantine tolerance
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use concord::consensus::{DecisionEngine, DecisionType, EngineConfig, Priority, VoteChoice};
//! use concord::node::{Node, NodeRole};
//!
//! #[tokio::main]
//! async fn main() -> concord::Result<()> {
//!     let engine = DecisionEngine::new(EngineConfig::default())?;
//!     engine.register_node(Node::new("alice", "Alice", NodeRole::Validator).with_stake(5.0))?;
//!     engine.register_node(Node::new("bob", "Bob", NodeRole::Voter).with_stake(3.0))?;
//!     engine.register_node(Node::new("carol", "Carol", NodeRole::Voter).with_stake(2.0))?;
//!
//!     let id = engine.propose_decision(
//!         "Lower fees",
//!         "Reduce transaction fees by 10%",
//!         DecisionType::Parameter,
//!         Priority::High,
//!         "alice",
//!     )?;
//!     engine.start_voting(&id)?;
//!     engine.cast_vote(&id, "alice", VoteChoice::Yes, 0.9, None)?;
//!     let status = engine.cast_vote(&id, "bob", VoteChoice::Yes, 0.8, None)?;
//!     println!("Decision {}: {}", id, status);
//!     Ok(())
//! }
//! ```

pub mod consensus;
pub mod core;
pub mod node;

pub use core::error::{Error, Result};

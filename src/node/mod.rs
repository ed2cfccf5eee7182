//! Node Module
//!
//! Participant identity, roles, health status and voting weight.

pub mod registry;

pub use registry::{Node, NodeRegistry, NodeRole, NodeStatus};

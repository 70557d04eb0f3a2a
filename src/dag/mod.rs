// src/dag/mod.rs

//! The workflow graph: nodes, edges, readiness, throttles, and shape checks.

pub mod cycle;
pub mod graph;
pub mod node;
pub mod ready_queue;
pub mod throttle;

pub use cycle::GraphShape;
pub use graph::Dag;
pub use node::{Node, NodeId, NodeStatus};
pub use ready_queue::ReadyQueue;
pub use throttle::ThrottleByCategory;

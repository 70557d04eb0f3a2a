// src/dag/ready_queue.rs

//! Queue of nodes whose dependencies are satisfied, awaiting submission.
//!
//! Ordered primarily by effective priority (higher first). Within a priority,
//! insertion order is kept; `pop` takes the front of the best priority band,
//! so `push_front` gives LIFO behaviour (depth-first / retries-first) and
//! `push_back` FIFO.

use std::collections::VecDeque;

use crate::dag::node::NodeId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    node: NodeId,
    priority: i32,
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: VecDeque<Entry>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.iter().any(|e| e.node == node)
    }

    /// Prepend within the node's priority band.
    pub fn push_front(&mut self, node: NodeId, priority: i32) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority <= priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { node, priority });
    }

    /// Append within the node's priority band.
    pub fn push_back(&mut self, node: NodeId, priority: i32) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { node, priority });
    }

    /// Remove and return the highest-priority node.
    pub fn pop(&mut self) -> Option<NodeId> {
        self.entries.pop_front().map(|e| e.node)
    }

    /// Keep only entries satisfying the predicate, preserving order of the
    /// remainder. Returns the evicted nodes. Used when switching into
    /// final-node-only mode.
    pub fn retain(&mut self, mut keep: impl FnMut(NodeId) -> bool) -> Vec<NodeId> {
        let mut evicted = Vec::new();
        self.entries.retain(|e| {
            if keep(e.node) {
                true
            } else {
                evicted.push(e.node);
                false
            }
        });
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|e| e.node)
    }
}

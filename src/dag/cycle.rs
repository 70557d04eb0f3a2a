// src/dag/cycle.rs

//! Cycle detection and graph shape reporting.
//!
//! A DFS assigns each node a post-order number once all of its descendants
//! have been visited. An edge whose child has a post-order number >= its
//! parent's is a back edge, i.e. a cycle. The same traversal yields the
//! graph's height (longest root-to-leaf path) and width (widest level) for
//! reporting.
//!
//! The DFS is seeded from all parentless nodes first, then from any node
//! still unvisited, so a cycle with no reachable root is still found.

use crate::dag::node::{Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphShape {
    pub has_cycle: bool,
    /// Longest path length in nodes; 0 for an empty graph.
    pub height: usize,
    /// Maximum number of nodes at any single depth.
    pub width: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

pub fn analyze(nodes: &[Node]) -> GraphShape {
    let n = nodes.len();
    let mut order: Vec<Option<usize>> = vec![None; n];
    let mut state = vec![Visit::Unvisited; n];
    let mut next_order = 0usize;

    // Iterative DFS assigning post-order numbers; the bool marks whether a
    // node's children have been expanded yet.
    let mut seed = |start: usize,
                    order: &mut Vec<Option<usize>>,
                    state: &mut Vec<Visit>,
                    next_order: &mut usize| {
        if state[start] != Visit::Unvisited {
            return;
        }
        let mut stack: Vec<(usize, bool)> = vec![(start, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                state[idx] = Visit::Done;
                order[idx] = Some(*next_order);
                *next_order += 1;
                continue;
            }
            if state[idx] != Visit::Unvisited {
                continue;
            }
            state[idx] = Visit::InProgress;
            stack.push((idx, true));
            for &NodeId(child) in nodes[idx].children.iter() {
                if state[child] == Visit::Unvisited {
                    stack.push((child, false));
                }
            }
        }
    };

    for (idx, node) in nodes.iter().enumerate() {
        if node.parents.is_empty() {
            seed(idx, &mut order, &mut state, &mut next_order);
        }
    }
    // Second pass: anything unreachable from a root (rootless components,
    // possibly cyclic).
    for idx in 0..n {
        seed(idx, &mut order, &mut state, &mut next_order);
    }

    let mut has_cycle = false;
    for (idx, node) in nodes.iter().enumerate() {
        let my_order = order[idx].unwrap_or(0);
        for &NodeId(child) in node.children.iter() {
            if order[child].unwrap_or(0) >= my_order {
                has_cycle = true;
            }
        }
    }

    if has_cycle {
        return GraphShape { has_cycle, height: 0, width: 0 };
    }

    // Acyclic: longest-path depths via topological order (decreasing
    // post-order number).
    let mut topo: Vec<usize> = (0..n).collect();
    topo.sort_by_key(|&i| std::cmp::Reverse(order[i].unwrap_or(0)));

    let mut depth = vec![0usize; n];
    for &idx in topo.iter() {
        for &NodeId(child) in nodes[idx].children.iter() {
            depth[child] = depth[child].max(depth[idx] + 1);
        }
    }

    let height = depth.iter().copied().max().map_or(0, |d| d + 1);
    let mut level_counts = vec![0usize; height.max(1)];
    for &d in depth.iter() {
        level_counts[d] += 1;
    }
    let width = level_counts.iter().copied().max().unwrap_or(0);

    GraphShape {
        has_cycle: false,
        height: if n == 0 { 0 } else { height },
        width: if n == 0 { 0 } else { width },
    }
}

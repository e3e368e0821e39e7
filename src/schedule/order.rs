//! The leaves-to-root visitation order used by distribution.

use std::{cmp::Reverse, collections::HashMap};

use crate::addr::NodeAddr;

/// Orders `nodes` so that every node appears exactly once and strictly
/// before any of its ancestors in the parent graph.
///
/// A node's depth is its distance from the root along parent links; sorting
/// by descending depth puts leaves first. Ties are broken by address so the
/// order is deterministic. Nodes absent from the graph (the root among them)
/// have depth 0 and come last.
pub fn leaves_to_root(graph: &HashMap<NodeAddr, NodeAddr>, nodes: &[NodeAddr]) -> Vec<NodeAddr> {
    let mut ordered = nodes.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered.sort_by_key(|node| (Reverse(depth(graph, *node)), *node));

    ordered
}

/// Walks parent links counting hops; capped at the graph size so malformed
/// (cyclic) input terminates.
fn depth(graph: &HashMap<NodeAddr, NodeAddr>, node: NodeAddr) -> usize {
    let mut depth = 0;
    let mut current = node;

    while let Some(parent) = graph.get(&current) {
        depth += 1;
        current = *parent;

        if depth > graph.len() {
            break;
        }
    }

    depth
}

use std::collections::HashSet;

use crate::graph::{Graph, NodeId};

/// Terminal nodes reachable from any generator, in first-reached order.
/// Intermediate nodes are walked through, never listed.
pub fn resolve_visible_set(graph: &Graph) -> Vec<NodeId> {
    let mut visible = Vec::new();
    let mut visited = HashSet::new();

    for generator in graph.generators() {
        let mut stack = vec![generator.id];
        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id) {
                continue;
            }
            let successors = graph.successors(node_id);
            if successors.is_empty() {
                visible.push(node_id);
            } else {
                stack.extend(successors.into_iter().rev());
            }
        }
    }

    visible
}

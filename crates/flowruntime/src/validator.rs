use crate::graph::GraphIndex;
use crate::registry::NodeRegistry;
use flowcore::{FlowGraph, ValidationError, Violation};
use std::collections::HashSet;
use std::sync::Arc;

/// Structural checks over a graph. Pure: reads nothing but the graph.
///
/// Violations are reported in check order: dangling edges, cycles,
/// unreachable nodes, duplicate ids.
pub fn validate_structure(graph: &FlowGraph) -> Vec<Violation> {
    if graph.nodes.is_empty() {
        return vec![Violation::EmptyGraph];
    }

    let mut violations = Vec::new();
    let known: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !known.contains(endpoint.as_str()) {
                violations.push(Violation::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    let index = GraphIndex::build(graph);

    for path in index.find_cycles() {
        violations.push(Violation::CycleDetected { path });
    }

    let reachable = index.reachable_from_triggers();
    let mut reported = HashSet::new();
    for node in &graph.nodes {
        if !reachable.contains(&node.id) && reported.insert(node.id.as_str()) {
            violations.push(Violation::UnreachableNode {
                node_id: node.id.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            violations.push(Violation::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    violations
}

/// Validator run before every publish and every execution start.
///
/// Adds registry checks on top of [`validate_structure`] so that a node
/// type with no executor fails here rather than mid-run.
pub struct GraphValidator {
    registry: Arc<NodeRegistry>,
}

impl GraphValidator {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, graph: &FlowGraph) -> Result<(), ValidationError> {
        let mut violations = validate_structure(graph);

        for node in &graph.nodes {
            match self.registry.get(&node.node_type) {
                None => violations.push(Violation::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                }),
                Some(executor) => {
                    if let Err(e) = executor.validate_config(&node.data) {
                        violations.push(Violation::InvalidNodeConfig {
                            node_id: node.id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }
}

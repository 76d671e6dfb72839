use flowcore::{EdgeSpec, FlowGraph, NodeId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Adjacency index over a flow graph, built once per validation or run.
///
/// Edge weights are positions in `FlowGraph::edges`. Dangling edges and
/// repeated node ids (after the first) are left out; the validator reports
/// them separately.
pub struct GraphIndex {
    dag: DiGraph<NodeId, usize>,
    index: HashMap<NodeId, NodeIndex>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl GraphIndex {
    pub fn build(graph: &FlowGraph) -> Self {
        let mut dag = DiGraph::new();
        let mut index = HashMap::new();

        for node in &graph.nodes {
            if !index.contains_key(&node.id) {
                let idx = dag.add_node(node.id.clone());
                index.insert(node.id.clone(), idx);
            }
        }

        for (position, edge) in graph.edges.iter().enumerate() {
            if let (Some(from), Some(to)) = (index.get(&edge.source), index.get(&edge.target)) {
                dag.add_edge(*from, *to, position);
            }
        }

        Self { dag, index }
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// Nodes without incoming edges, in declaration order.
    pub fn triggers(&self) -> Vec<NodeId> {
        self.externals(Direction::Incoming)
    }

    /// Nodes without outgoing edges, in declaration order.
    pub fn terminals(&self) -> Vec<NodeId> {
        self.externals(Direction::Outgoing)
    }

    fn externals(&self, direction: Direction) -> Vec<NodeId> {
        let mut found: Vec<NodeIndex> = self.dag.externals(direction).collect();
        found.sort();
        found.into_iter().map(|idx| self.dag[idx].clone()).collect()
    }

    /// Number of incoming edges per node.
    pub fn in_degrees(&self) -> HashMap<NodeId, usize> {
        self.dag
            .node_indices()
            .map(|idx| {
                let degree = self.dag.edges_directed(idx, Direction::Incoming).count();
                (self.dag[idx].clone(), degree)
            })
            .collect()
    }

    /// Positions of edges entering `node_id`, in declaration order.
    pub fn incoming_edges(&self, node_id: &str) -> Vec<usize> {
        self.edge_positions(node_id, Direction::Incoming)
    }

    /// Positions of edges leaving `node_id`, in declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<usize> {
        self.edge_positions(node_id, Direction::Outgoing)
    }

    fn edge_positions(&self, node_id: &str, direction: Direction) -> Vec<usize> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .dag
            .edges_directed(*idx, direction)
            .map(|e| *e.weight())
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Every node reachable from `node_id`, excluding itself.
    pub fn descendants(&self, node_id: &str) -> Vec<NodeId> {
        let Some(start) = self.index.get(node_id).copied() else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.dag, start);
        let mut found = Vec::new();
        while let Some(idx) = dfs.next(&self.dag) {
            if idx != start {
                found.push(idx);
            }
        }
        found.sort();
        found.into_iter().map(|idx| self.dag[idx].clone()).collect()
    }

    /// Nodes reachable from at least one trigger, triggers included.
    pub fn reachable_from_triggers(&self) -> HashSet<NodeId> {
        let mut dfs = Dfs::empty(&self.dag);
        let mut seen = HashSet::new();
        for trigger in self.dag.externals(Direction::Incoming) {
            dfs.move_to(trigger);
            while let Some(idx) = dfs.next(&self.dag) {
                seen.insert(self.dag[idx].clone());
            }
        }
        seen
    }

    /// Depth-first search with an explicit recursion stack. Each back edge
    /// yields the cycle it closes, starting and ending on the same node.
    pub fn find_cycles(&self) -> Vec<Vec<NodeId>> {
        let successors: Vec<Vec<NodeIndex>> = self
            .dag
            .node_indices()
            .map(|idx| {
                let mut next: Vec<NodeIndex> =
                    self.dag.neighbors_directed(idx, Direction::Outgoing).collect();
                next.sort();
                next.dedup();
                next
            })
            .collect();

        let mut marks = vec![Mark::Unvisited; self.dag.node_count()];
        let mut cycles = Vec::new();

        for root in self.dag.node_indices() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            marks[root.index()] = Mark::OnStack;
            let mut stack: Vec<(NodeIndex, usize)> = vec![(root, 0)];

            while let Some(&(node, cursor)) = stack.last() {
                let Some(&next) = successors[node.index()].get(cursor) else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                match marks[next.index()] {
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::OnStack;
                        stack.push((next, 0));
                    }
                    Mark::OnStack => {
                        if let Some(start) = stack.iter().position(|(n, _)| *n == next) {
                            let mut path: Vec<NodeId> = stack[start..]
                                .iter()
                                .map(|(n, _)| self.dag[*n].clone())
                                .collect();
                            path.push(self.dag[next].clone());
                            cycles.push(path);
                        }
                    }
                    Mark::Done => {}
                }
            }
        }

        cycles
    }
}

/// Source output routed along an edge: the field named by `sourceHandle`
/// when the output is an object carrying it, otherwise the whole output.
pub fn route_output(edge: &EdgeSpec, output: &serde_json::Value) -> serde_json::Value {
    match (&edge.source_handle, output) {
        (Some(handle), serde_json::Value::Object(fields)) if fields.contains_key(handle) => {
            fields[handle].clone()
        }
        _ => output.clone(),
    }
}

//! Graph algorithms: strongly connected components and topological sorting.
//!
//! These are the two algorithms the interprocedural analysis needs from the
//! call graph: Tarjan SCCs to group mutually recursive functions, and a
//! topological order to process callees before callers.

use crate::utils::graph::{DirectedGraph, NodeId};

/// Computes the strongly connected components of a directed graph.
///
/// Uses Tarjan's algorithm with a single DFS pass. The SCCs are returned in
/// **reverse topological order**: if there is an edge from SCC A to SCC B,
/// then B appears before A in the result. With call edges pointing from
/// caller to callee, that is exactly bottom-up order (callees first).
///
/// # Complexity
///
/// O(V + E) time, O(V) space.
#[must_use]
pub fn strongly_connected_components<N, E>(graph: &DirectedGraph<N, E>) -> Vec<Vec<NodeId>> {
    let node_count = graph.node_count();
    if node_count == 0 {
        return Vec::new();
    }

    let mut state = TarjanState::new(node_count);
    for i in 0..node_count {
        if state.index[i].is_none() {
            state.strongconnect(graph, NodeId::new(i));
        }
    }
    state.sccs
}

/// Internal state for Tarjan's algorithm.
struct TarjanState {
    /// Discovery index for each node (None if not yet visited).
    index: Vec<Option<usize>>,
    /// Lowlink value for each node.
    lowlink: Vec<usize>,
    /// Whether a node is currently on the stack.
    on_stack: Vec<bool>,
    /// The SCC candidate stack.
    stack: Vec<NodeId>,
    /// Current discovery counter.
    current_index: usize,
    /// Collected SCCs.
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn strongconnect<N, E>(&mut self, graph: &DirectedGraph<N, E>, v: NodeId) {
        let v_idx = v.index();

        self.index[v_idx] = Some(self.current_index);
        self.lowlink[v_idx] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v_idx] = true;

        for w in graph.successors(v) {
            let w_idx = w.index();
            if self.index[w_idx].is_none() {
                self.strongconnect(graph, w);
                self.lowlink[v_idx] = self.lowlink[v_idx].min(self.lowlink[w_idx]);
            } else if self.on_stack[w_idx] {
                // index[w] is set because w has been visited.
                self.lowlink[v_idx] = self.lowlink[v_idx].min(self.index[w_idx].unwrap());
            }
        }

        // v is the root of an SCC: pop the stack down to v.
        if self.lowlink[v_idx] == self.index[v_idx].unwrap() {
            let mut scc = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack[w.index()] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            self.sccs.push(scc);
        }
    }
}

/// Computes a topological ordering of the graph.
///
/// Returns `Some(order)` with every node appearing after all of its
/// predecessors, or `None` if the graph contains a cycle. Uses Kahn's
/// algorithm.
#[must_use]
pub fn topological_sort<N, E>(graph: &DirectedGraph<N, E>) -> Option<Vec<NodeId>> {
    let mut in_degree: Vec<usize> = graph
        .node_ids()
        .map(|id| graph.predecessors(id).count())
        .collect();

    let mut ready: Vec<NodeId> = graph
        .node_ids()
        .filter(|id| in_degree[id.index()] == 0)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(node) = ready.pop() {
        order.push(node);
        for succ in graph.successors(node) {
            in_degree[succ.index()] -= 1;
            if in_degree[succ.index()] == 0 {
                ready.push(succ);
            }
        }
    }

    if order.len() == graph.node_count() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (DirectedGraph<(), ()>, [NodeId; 4]) {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        let d = graph.add_node(());
        graph.add_edge(a, b, ());
        graph.add_edge(a, c, ());
        graph.add_edge(b, d, ());
        graph.add_edge(c, d, ());
        (graph, [a, b, c, d])
    }

    #[test]
    fn test_scc_acyclic() {
        let (graph, _) = diamond();
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 4);
        assert!(sccs.iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn test_scc_cycle() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        graph.add_edge(a, b, ());
        graph.add_edge(b, c, ());
        graph.add_edge(c, a, ());

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 3);
    }

    #[test]
    fn test_scc_reverse_topological_order() {
        // a -> {b <-> c} -> d: the sink SCC {d} must come first, {a} last.
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        let d = graph.add_node(());
        graph.add_edge(a, b, ());
        graph.add_edge(b, c, ());
        graph.add_edge(c, b, ());
        graph.add_edge(c, d, ());

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 3);

        let pos = |node: NodeId| sccs.iter().position(|scc| scc.contains(&node)).unwrap();
        assert!(pos(d) < pos(b), "sink SCC must precede the cycle");
        assert!(pos(b) < pos(a), "cycle must precede the source");
        assert_eq!(pos(b), pos(c), "mutually recursive nodes share an SCC");
    }

    #[test]
    fn test_topological_sort_dag() {
        let (graph, [a, b, c, d]) = diamond();
        let order = topological_sort(&graph).unwrap();
        assert_eq!(order.len(), 4);

        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_topological_sort_rejects_cycle() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        graph.add_edge(a, b, ());
        graph.add_edge(b, a, ());

        assert!(topological_sort(&graph).is_none());
    }

    #[test]
    fn test_empty_graph() {
        let graph: DirectedGraph<(), ()> = DirectedGraph::new();
        assert!(strongly_connected_components(&graph).is_empty());
        assert_eq!(topological_sort(&graph), Some(Vec::new()));
    }
}

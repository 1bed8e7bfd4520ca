//! Call graph construction and queries.
//!
//! The call graph records which functions call which, built by scanning
//! every function body once for call instructions. It is the ordering
//! collaborator of the interprocedural escape analysis: Tarjan SCCs give
//! the bottom-up (callees first) processing order, and the reverse edges
//! answer "whose results become stale when this summary changes".
//!
//! The implementation builds on the generic [`DirectedGraph`]
//! infrastructure from [`crate::utils::graph`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::analysis::callgraph::{CallSite, CallTarget};
use crate::ir::{Callee, FunctionId, Instruction, Module};
use crate::utils::dot::dot_header;
use crate::utils::escape_dot;
use crate::utils::graph::{algorithms::strongly_connected_components, DirectedGraph, NodeId};

/// A function node in the call graph.
#[derive(Debug, Clone)]
pub struct CallGraphNode {
    /// The function this node represents.
    pub function: FunctionId,
    /// The function name.
    pub name: String,
    /// The function is external or has no body; it cannot have call sites
    /// and its callees are unknown.
    pub is_external: bool,
    /// All call sites in the function body, resolved or not.
    pub call_sites: Vec<CallSite>,
}

/// The direct-call graph of a module.
///
/// Edges point from caller to callee. Only statically resolved calls to
/// defined functions produce edges; external, undefined, and indirect
/// targets appear in the per-node [`CallGraphNode::call_sites`] list but
/// not as edges.
#[derive(Debug)]
pub struct CallGraph {
    /// The underlying directed graph.
    graph: DirectedGraph<CallGraphNode, ()>,
    /// Function id to node id, for O(1) lookup.
    function_to_node: HashMap<FunctionId, NodeId>,
    /// Strongly connected components, lazily computed.
    sccs: OnceLock<Vec<Vec<NodeId>>>,
    /// Bottom-up function order, lazily computed.
    bottom_up: OnceLock<Vec<FunctionId>>,
}

impl CallGraph {
    /// Builds the call graph of a module.
    ///
    /// Two passes: first a node per function (external and undefined ones
    /// included - they can still be call targets), then the call sites and
    /// edges from scanning every defined body.
    #[must_use]
    pub fn build(module: &Module) -> Self {
        let mut graph: DirectedGraph<CallGraphNode, ()> =
            DirectedGraph::with_capacity(module.function_count(), module.function_count() * 2);
        let mut function_to_node = HashMap::with_capacity(module.function_count());

        for (id, function) in module.functions() {
            let node = CallGraphNode {
                function: id,
                name: function.name().to_string(),
                is_external: function.is_external() || !function.is_defined(),
                call_sites: Vec::new(),
            };
            function_to_node.insert(id, graph.add_node(node));
        }

        for (id, function) in module.functions() {
            if function.is_external() || !function.is_defined() {
                continue;
            }
            let caller_node = function_to_node[&id];
            let mut call_sites = Vec::new();
            for (inst_id, inst) in function.instructions() {
                let Instruction::Call { callee, .. } = inst else {
                    continue;
                };
                let target = match callee {
                    Callee::Direct(target) => match module.function(*target) {
                        Some(f) if !f.is_external() && f.is_defined() => {
                            CallTarget::Resolved(*target)
                        }
                        _ => CallTarget::External,
                    },
                    Callee::Indirect(_) => CallTarget::Indirect,
                    Callee::External(_) => CallTarget::External,
                };
                if let CallTarget::Resolved(target) = target {
                    let callee_node = function_to_node[&target];
                    if !graph.has_edge(caller_node, callee_node) {
                        graph.add_edge(caller_node, callee_node, ());
                    }
                }
                call_sites.push(CallSite::new(inst_id, target));
            }
            if let Some(node) = graph.node_mut(caller_node) {
                node.call_sites = call_sites;
            }
        }

        Self {
            graph,
            function_to_node,
            sccs: OnceLock::new(),
            bottom_up: OnceLock::new(),
        }
    }

    /// Returns the number of functions in the graph.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of call edges. Multiple calls from the same
    /// caller to the same callee are one edge.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the node of a function, if present.
    #[must_use]
    pub fn node(&self, function: FunctionId) -> Option<&CallGraphNode> {
        self.function_to_node
            .get(&function)
            .and_then(|&id| self.graph.node(id))
    }

    /// Returns the call sites within a function.
    #[must_use]
    pub fn call_sites(&self, function: FunctionId) -> &[CallSite] {
        self.node(function).map_or(&[], |n| n.call_sites.as_slice())
    }

    /// Returns the functions directly called by `caller`.
    #[must_use]
    pub fn callees(&self, caller: FunctionId) -> Vec<FunctionId> {
        let Some(&node) = self.function_to_node.get(&caller) else {
            return Vec::new();
        };
        self.graph
            .successors(node)
            .filter_map(|id| self.graph.node(id).map(|n| n.function))
            .collect()
    }

    /// Returns the functions that directly call `callee`.
    #[must_use]
    pub fn callers(&self, callee: FunctionId) -> Vec<FunctionId> {
        let Some(&node) = self.function_to_node.get(&callee) else {
            return Vec::new();
        };
        self.graph
            .predecessors(node)
            .filter_map(|id| self.graph.node(id).map(|n| n.function))
            .collect()
    }

    /// Returns the functions nobody in the module calls.
    #[must_use]
    pub fn entry_points(&self) -> Vec<FunctionId> {
        self.graph
            .entry_nodes()
            .filter_map(|id| self.graph.node(id).map(|n| n.function))
            .collect()
    }

    /// Returns the strongly connected components, lazily computed.
    ///
    /// Each SCC is a set of mutually recursive functions. SCCs come out in
    /// reverse topological order: callees before callers.
    #[must_use]
    pub fn sccs(&self) -> &[Vec<NodeId>] {
        self.sccs
            .get_or_init(|| strongly_connected_components(&self.graph))
    }

    /// Returns all functions in bottom-up order: every callee before its
    /// callers, mutually recursive functions adjacent. Lazily computed.
    #[must_use]
    pub fn bottom_up_order(&self) -> &[FunctionId] {
        self.bottom_up.get_or_init(|| {
            self.sccs()
                .iter()
                .flatten()
                .filter_map(|&id| self.graph.node(id).map(|n| n.function))
                .collect()
        })
    }

    /// Returns `true` if any function is directly or mutually recursive.
    #[must_use]
    pub fn has_recursion(&self) -> bool {
        self.sccs().iter().any(|scc| scc.len() > 1)
            || self
                .graph
                .node_ids()
                .any(|id| self.graph.successors(id).any(|succ| succ == id))
    }

    /// Returns all functions involved in direct or mutual recursion,
    /// sorted and deduplicated.
    #[must_use]
    pub fn recursive_functions(&self) -> Vec<FunctionId> {
        let mut recursive = Vec::new();
        for id in self.graph.node_ids() {
            if self.graph.successors(id).any(|succ| succ == id) {
                if let Some(node) = self.graph.node(id) {
                    recursive.push(node.function);
                }
            }
        }
        for scc in self.sccs() {
            if scc.len() > 1 {
                for &id in scc {
                    if let Some(node) = self.graph.node(id) {
                        recursive.push(node.function);
                    }
                }
            }
        }
        recursive.sort();
        recursive.dedup();
        recursive
    }

    /// Returns aggregate statistics about the graph.
    #[must_use]
    pub fn stats(&self) -> CallGraphStats {
        let nodes = || self.graph.nodes().map(|(_, n)| n);
        let total_call_sites: usize = nodes().map(|n| n.call_sites.len()).sum();
        let resolved_calls = nodes()
            .flat_map(|n| &n.call_sites)
            .filter(|s| s.is_resolved())
            .count();
        let indirect_calls = nodes()
            .flat_map(|n| &n.call_sites)
            .filter(|s| s.target == CallTarget::Indirect)
            .count();

        CallGraphStats {
            function_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            total_call_sites,
            resolved_calls,
            indirect_calls,
            entry_points: self.entry_points().len(),
            scc_count: self.sccs().len(),
            recursive_functions: self.recursive_functions().len(),
        }
    }

    /// Generates a DOT representation of the call graph.
    ///
    /// External targets are yellow, entry points green.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();
        dot_header(&mut dot, "CallGraph", title.unwrap_or("Call Graph"));

        let entries = self.entry_points();
        for (_, node) in self.graph.nodes() {
            let style = if node.is_external {
                ", style=filled, fillcolor=lightyellow"
            } else if entries.contains(&node.function) {
                ", style=filled, fillcolor=lightgreen"
            } else {
                ""
            };
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\"{style}];",
                node.function,
                escape_dot(&node.name),
            );
        }
        dot.push('\n');
        for (id, node) in self.graph.nodes() {
            for succ in self.graph.successors(id) {
                if let Some(callee) = self.graph.node(succ) {
                    let _ = writeln!(dot, "    \"{}\" -> \"{}\";", node.function, callee.function);
                }
            }
        }
        dot.push_str("}\n");
        dot
    }
}

/// Aggregate statistics about a call graph.
#[derive(Debug, Clone, Default)]
pub struct CallGraphStats {
    /// Number of functions (nodes) in the graph.
    pub function_count: usize,
    /// Number of call edges between functions.
    pub edge_count: usize,
    /// Total number of call sites across all bodies.
    pub total_call_sites: usize,
    /// Call sites with a resolved, defined target.
    pub resolved_calls: usize,
    /// Call sites through function values.
    pub indirect_calls: usize,
    /// Functions with no callers in the module.
    pub entry_points: usize,
    /// Number of strongly connected components.
    pub scc_count: usize,
    /// Functions involved in direct or mutual recursion.
    pub recursive_functions: usize,
}

impl CallGraphStats {
    /// Returns the share of call sites with a resolved target, as a
    /// percentage. 100.0 for a graph without call sites.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn resolution_rate(&self) -> f64 {
        if self.total_call_sites == 0 {
            100.0
        } else {
            (self.resolved_calls as f64 / self.total_call_sites as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, FunctionFlags, Type};

    /// Builds a module with `main -> helper -> leaf` and a self-recursive
    /// `looper`.
    fn sample_module() -> (Module, [FunctionId; 4]) {
        let mut module = Module::new();
        let leaf = module
            .declare_function("leaf", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let helper = module
            .declare_function("helper", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let main = module
            .declare_function("main", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let looper = module
            .declare_function("looper", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();

        let mut b = FunctionBuilder::new(vec![]);
        b.ret(None);
        module.define_function(leaf, b.finish()).unwrap();

        let mut b = FunctionBuilder::new(vec![]);
        b.call(Callee::Direct(leaf), vec![], Type::Void);
        b.ret(None);
        module.define_function(helper, b.finish()).unwrap();

        let mut b = FunctionBuilder::new(vec![]);
        b.call(Callee::Direct(helper), vec![], Type::Void);
        b.ret(None);
        module.define_function(main, b.finish()).unwrap();

        let mut b = FunctionBuilder::new(vec![]);
        b.call(Callee::Direct(looper), vec![], Type::Void);
        b.ret(None);
        module.define_function(looper, b.finish()).unwrap();

        (module, [leaf, helper, main, looper])
    }

    #[test]
    fn test_build_edges_and_lookups() {
        let (module, [leaf, helper, main, looper]) = sample_module();
        let cg = CallGraph::build(&module);

        assert_eq!(cg.function_count(), 4);
        assert_eq!(cg.edge_count(), 3);
        assert_eq!(cg.callees(main), vec![helper]);
        assert_eq!(cg.callees(helper), vec![leaf]);
        assert_eq!(cg.callers(leaf), vec![helper]);
        assert_eq!(cg.callers(looper), vec![looper]);
        assert!(cg.callees(leaf).is_empty());
    }

    #[test]
    fn test_bottom_up_order_puts_callees_first() {
        let (module, [leaf, helper, main, _]) = sample_module();
        let cg = CallGraph::build(&module);

        let order = cg.bottom_up_order();
        let pos = |f: FunctionId| order.iter().position(|&x| x == f).unwrap();
        assert!(pos(leaf) < pos(helper));
        assert!(pos(helper) < pos(main));
    }

    #[test]
    fn test_recursion_detection() {
        let (module, [leaf, _, _, looper]) = sample_module();
        let cg = CallGraph::build(&module);

        assert!(cg.has_recursion());
        assert_eq!(cg.recursive_functions(), vec![looper]);
        assert!(!cg.recursive_functions().contains(&leaf));
    }

    #[test]
    fn test_unresolved_targets_have_no_edges() {
        let mut module = Module::new();
        let ext = module
            .declare_function("ext", vec![], Type::Void, FunctionFlags::EXTERNAL)
            .unwrap();
        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        b.call(Callee::Direct(ext), vec![], Type::Void);
        b.call(Callee::External("printf".into()), vec![], Type::Void);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let cg = CallGraph::build(&module);
        assert_eq!(cg.edge_count(), 0);
        assert_eq!(cg.call_sites(f).len(), 2);
        assert!(cg.call_sites(f).iter().all(|s| !s.is_resolved()));
        assert!(cg.node(ext).unwrap().is_external);
    }

    #[test]
    fn test_stats() {
        let (module, _) = sample_module();
        let cg = CallGraph::build(&module);
        let stats = cg.stats();

        assert_eq!(stats.function_count, 4);
        assert_eq!(stats.total_call_sites, 3);
        assert_eq!(stats.resolved_calls, 3);
        assert_eq!(stats.indirect_calls, 0);
        assert!((stats.resolution_rate() - 100.0).abs() < f64::EPSILON);
        assert_eq!(stats.recursive_functions, 1);
    }

    #[test]
    fn test_to_dot() {
        let (module, _) = sample_module();
        let cg = CallGraph::build(&module);
        let dot = cg.to_dot(Some("sample"));

        assert!(dot.starts_with("digraph CallGraph {"));
        assert!(dot.contains("\"main\""));
        assert!(dot.contains("->"));
    }
}

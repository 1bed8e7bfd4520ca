//! Interprocedural escape analysis.
//!
//! The analysis answers, for every pointer-like IR value, whether the
//! storage it references outlives its function - and if so, whether it is
//! visible only to callers (through arguments and return values) or to the
//! whole program (global memory, unknown callees). It follows the
//! connection graph model of Choi et al., "Escape analysis for Java"
//! (OOPSLA '99): a per-function graph of pointer and content nodes, merged
//! bottom-up over the call graph.
//!
//! # Architecture
//!
//! ```text
//! EscapeAnalysis                  the analysis context (per module)
//! ├── FunctionInfo                per-function cached state
//! │   ├── graph: ConnectionGraph  what clients query
//! │   ├── summary: ConnectionGraph  argument/return structure for callers
//! │   └── known_callees           call sites deferred to recompute()
//! ├── builder                     one-pass intraprocedural construction
//! └── merge engine                invariant-restoring node folding
//! ```
//!
//! [`EscapeAnalysis::connection_graph`] builds a function's graph on
//! demand, intraprocedurally: calls to statically known callees are
//! recorded but not applied. [`EscapeAnalysis::recompute`] then folds
//! callee summaries into callers bottom-up over call graph SCCs until
//! nothing changes. Recursive cycles are bounded by a merge budget per
//! function ([`EscapeAnalysis::MAX_GRAPH_MERGES`]); exhausting it trades
//! precision for termination by forcing the function's arguments and
//! return to `Global`.
//!
//! # Example
//!
//! ```rust,ignore
//! use refscope::prelude::*;
//!
//! let mut analysis = EscapeAnalysis::new();
//! analysis.recompute(&module);
//!
//! let graph = analysis.connection_graph(&module, f).unwrap();
//! if let Some(node) = graph.node_for(value) {
//!     match graph.escape_state(node) {
//!         EscapeState::None => { /* safe to stack-promote */ }
//!         EscapeState::Arguments => { /* caller-visible */ }
//!         EscapeState::Global => { /* anything may observe it */ }
//!     }
//! }
//! ```

mod builder;
mod graph;
mod merge;
mod node;

pub use graph::ConnectionGraph;
pub use merge::NodeMap;
pub use node::{CgNodeId, EscapeState, NodeKind};

use std::collections::HashMap;

use rayon::prelude::*;

use crate::analysis::callgraph::{CallGraph, CallSite};
use crate::ir::{FunctionId, InstId, Instruction, Module, ValueId};

/// The lifecycle state of a function's cached analysis result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    /// The function has never been analyzed.
    Uncomputed,
    /// The cached connection graph reflects the current IR.
    Valid,
    /// The IR changed since the graph was built; the next query or
    /// `recompute()` rebuilds it.
    Invalidated,
}

/// Everything the analysis keeps per function.
#[derive(Debug)]
struct FunctionInfo {
    /// The connection graph clients see. Rebuilt after invalidation.
    graph: ConnectionGraph,
    /// The reduced graph callers merge at their call sites. Not dropped by
    /// per-function invalidation; refreshed during `recompute()`.
    summary: ConnectionGraph,
    /// Call sites with a statically known, defined callee. Their effect is
    /// applied by `recompute()`.
    known_callees: Vec<CallSite>,
    /// At least one callee summary changed; the callee graphs have to be
    /// merged again.
    need_merge_callees: bool,
    /// The summary changed since callers were last notified.
    summary_dirty: bool,
    /// Lifecycle state of `graph`.
    state: AnalysisState,
    /// Callee merges performed in the current recompute cycle.
    num_merges: u32,
    /// The merge budget was exhausted; `graph` and `summary` hold the
    /// conservative fallback until the next rebuild.
    conservative: bool,
}

impl FunctionInfo {
    fn new(function: FunctionId, name: &str) -> Self {
        Self {
            graph: ConnectionGraph::new(function, name),
            summary: ConnectionGraph::new(function, name),
            known_callees: Vec::new(),
            need_merge_callees: false,
            summary_dirty: false,
            state: AnalysisState::Uncomputed,
            num_merges: 0,
            conservative: false,
        }
    }
}

/// The escape analysis context for one module.
///
/// Owns every cached per-function result. The only mutating entry points
/// are [`connection_graph`](Self::connection_graph) (on-demand build),
/// [`recompute`](Self::recompute), and the invalidation hooks - there is
/// no hidden global state, and a single writer drives all cache updates.
#[derive(Debug)]
pub struct EscapeAnalysis {
    /// Cached per-function state.
    infos: HashMap<FunctionId, FunctionInfo>,
    /// Set by invalidation and on-demand builds; cleared by `recompute()`.
    should_recompute: bool,
}

impl Default for EscapeAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeAnalysis {
    /// Bound on callee-summary merges per function and recompute cycle.
    ///
    /// Recursive and mutually recursive call cycles never reach a natural
    /// fixpoint of summary growth; after this many re-merges the function
    /// falls back to a conservative summary. Deterministic, in place of
    /// any timeout.
    pub const MAX_GRAPH_MERGES: u32 = 4;

    /// Creates an empty analysis context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            infos: HashMap::new(),
            should_recompute: true,
        }
    }

    /// Returns the lifecycle state of a function's cached result.
    #[must_use]
    pub fn state(&self, function: FunctionId) -> AnalysisState {
        self.infos
            .get(&function)
            .map_or(AnalysisState::Uncomputed, |info| info.state)
    }

    /// Returns the connection graph for a function, building it on demand.
    ///
    /// The on-demand build is intraprocedural: effects of calls to known
    /// callees are missing until [`recompute`](Self::recompute) has run.
    /// Returns `None` for external or undefined functions - they have no
    /// body to analyze.
    pub fn connection_graph(
        &mut self,
        module: &Module,
        function: FunctionId,
    ) -> Option<&ConnectionGraph> {
        let f = module.function(function)?;
        if f.is_external() || !f.is_defined() {
            return None;
        }
        self.ensure_built(module, function);
        self.infos.get(&function).map(|info| &info.graph)
    }

    /// Returns the summary graph used when merging this function into its
    /// callers, if one has been computed.
    #[must_use]
    pub fn summary_graph(&self, function: FunctionId) -> Option<&ConnectionGraph> {
        self.infos.get(&function).map(|info| &info.summary)
    }

    /// Returns the instructions using `value` within `function`, computing
    /// use points lazily on first query.
    pub fn use_points(
        &mut self,
        module: &Module,
        function: FunctionId,
        value: ValueId,
    ) -> Vec<InstId> {
        let Some(f) = module.function(function) else {
            return Vec::new();
        };
        if f.is_external() || !f.is_defined() {
            return Vec::new();
        }
        self.ensure_built(module, function);
        let info = self.infos.get_mut(&function).expect("built above");
        info.graph.compute_use_points(f);
        match info.graph.node_for(value) {
            Some(node) => info.graph.use_points(node),
            None => Vec::new(),
        }
    }

    /// Drops a function's cached graph after its IR changed.
    ///
    /// The summary graph is kept until the next `recompute()`: callers may
    /// still hold its effects merged into their graphs, and refreshing
    /// those is `recompute()`'s job. Invalidation is deliberately coarse -
    /// there is no partial repair of downstream results.
    pub fn invalidate(&mut self, function: FunctionId) {
        if let Some(info) = self.infos.get_mut(&function) {
            let id = info.graph.function();
            let name = info.graph.name().to_string();
            info.graph = ConnectionGraph::new(id, &name);
            info.known_callees.clear();
            info.need_merge_callees = false;
            info.state = AnalysisState::Invalidated;
            info.conservative = false;
            self.should_recompute = true;
        }
    }

    /// Drops every cached result.
    pub fn invalidate_all(&mut self) {
        self.infos.clear();
        self.should_recompute = true;
    }

    /// Recomputes the analysis for the whole module.
    ///
    /// Rebuilds missing or invalidated graphs (in parallel - per-function
    /// construction has no cross-function dependencies), then merges callee
    /// summaries into callers bottom-up over the call graph SCCs until no
    /// summary changes. A no-op when nothing was invalidated or newly
    /// built since the last run.
    pub fn recompute(&mut self, module: &Module) {
        let pending: Vec<FunctionId> = module
            .functions()
            .filter(|(id, f)| {
                f.is_defined()
                    && !f.is_external()
                    && !self
                        .infos
                        .get(id)
                        .is_some_and(|info| info.state == AnalysisState::Valid)
            })
            .map(|(id, _)| id)
            .collect();
        if !self.should_recompute && pending.is_empty() {
            return;
        }

        let built: Vec<(FunctionId, ConnectionGraph, Vec<CallSite>)> = pending
            .par_iter()
            .map(|&f| {
                let (graph, sites) = builder::build_connection_graph(module, f);
                (f, graph, sites)
            })
            .collect();
        for (f, graph, sites) in built {
            let name = module.function(f).expect("built from module").name();
            let info = self
                .infos
                .entry(f)
                .or_insert_with(|| FunctionInfo::new(f, name));
            info.graph = graph;
            info.known_callees = sites;
            info.state = AnalysisState::Valid;
            info.conservative = false;
            info.need_merge_callees = !info.known_callees.is_empty();
            info.summary_dirty |= Self::refresh_summary(info);
        }

        let callgraph = CallGraph::build(module);

        let dirty: Vec<FunctionId> = self
            .infos
            .iter()
            .filter(|(_, info)| info.summary_dirty)
            .map(|(&f, _)| f)
            .collect();
        for f in dirty {
            self.infos.get_mut(&f).expect("listed above").summary_dirty = false;
            self.dirty_callers(&callgraph, f);
        }

        for info in self.infos.values_mut() {
            info.num_merges = 0;
        }

        let order = callgraph.bottom_up_order();
        let mut merges = 0usize;
        let mut fallbacks = 0usize;
        loop {
            let mut progressed = false;
            for &f in &order[..] {
                let (conservative, exhausted) = match self.infos.get_mut(&f) {
                    Some(info) if info.need_merge_callees => {
                        info.need_merge_callees = false;
                        (info.conservative, info.num_merges >= Self::MAX_GRAPH_MERGES)
                    }
                    _ => continue,
                };
                if conservative {
                    continue;
                }
                if exhausted {
                    self.finalize_conservatively(module, f);
                    fallbacks += 1;
                    self.dirty_callers(&callgraph, f);
                    progressed = true;
                    continue;
                }
                self.infos.get_mut(&f).expect("checked above").num_merges += 1;
                merges += 1;
                if self.merge_all_callees(module, f) {
                    let info = self.infos.get_mut(&f).expect("checked above");
                    if Self::refresh_summary(info) {
                        self.dirty_callers(&callgraph, f);
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        self.should_recompute = false;
        log::debug!(
            "escape analysis recompute: {} functions, {merges} callee merges, {fallbacks} conservative fallbacks",
            order.len()
        );
    }

    /// Checks every cached graph's invariants. Compiled to a no-op in
    /// release builds.
    pub fn verify(&self) {
        #[cfg(debug_assertions)]
        for info in self.infos.values() {
            info.graph.verify();
            info.summary.verify();
        }
    }

    // ---- internals ----------------------------------------------------

    fn ensure_built(&mut self, module: &Module, function: FunctionId) {
        let valid = self
            .infos
            .get(&function)
            .is_some_and(|info| info.state == AnalysisState::Valid);
        if valid {
            return;
        }
        let name = module.function(function).expect("caller checked").name();
        let (graph, sites) = builder::build_connection_graph(module, function);
        let info = self
            .infos
            .entry(function)
            .or_insert_with(|| FunctionInfo::new(function, name));
        info.graph = graph;
        info.known_callees = sites;
        info.state = AnalysisState::Valid;
        info.conservative = false;
        info.need_merge_callees = !info.known_callees.is_empty();
        info.summary_dirty |= Self::refresh_summary(info);
        self.should_recompute = true;
    }

    /// Rebuilds the function's summary from its graph: the argument and
    /// return structure, reduced through the cross-graph merge. Returns
    /// whether the summary differs from the cached one.
    ///
    /// Construction is deterministic, so an unchanged graph reproduces the
    /// summary bit for bit and the comparison is exact.
    fn refresh_summary(info: &mut FunctionInfo) -> bool {
        let mut fresh = ConnectionGraph::new(info.graph.function(), info.graph.name());
        let mut map = NodeMap::new();
        for (index, node) in info.graph.argument_nodes() {
            let summary_node = fresh.argument_node(index);
            map.add(node, summary_node);
        }
        if let Some(ret) = info.graph.return_node_ref() {
            let summary_ret = fresh.return_node();
            map.add(ret, summary_ret);
        }
        fresh.merge_from(&info.graph, &mut map);
        fresh.propagate_escape_states();

        let changed = !fresh.equivalent(&info.summary);
        if changed {
            info.summary = fresh;
        }
        changed
    }

    fn dirty_callers(&mut self, callgraph: &CallGraph, callee: FunctionId) {
        for caller in callgraph.callers(callee) {
            if let Some(info) = self.infos.get_mut(&caller) {
                info.need_merge_callees = true;
            }
        }
    }

    /// Merges every known callee's summary into `function`'s graph at the
    /// corresponding call sites. Returns whether the graph changed.
    fn merge_all_callees(&mut self, module: &Module, function: FunctionId) -> bool {
        let Some(mut info) = self.infos.remove(&function) else {
            return false;
        };
        let f = module.function(function).expect("function exists");
        let mut changed = false;

        for site in info.known_callees.clone() {
            let Some(callee) = site.resolved() else {
                continue;
            };
            let Some(Instruction::Call { result, args, .. }) = f.instruction(site.inst) else {
                continue;
            };
            if callee == function {
                // A self-recursive site merges the function's own summary.
                let FunctionInfo { graph, summary, .. } = &mut info;
                changed |= Self::merge_summary_at_site(graph, summary, *result, args);
            } else if let Some(callee_info) = self.infos.get(&callee) {
                changed |=
                    Self::merge_summary_at_site(&mut info.graph, &callee_info.summary, *result, args);
            }
        }

        if changed {
            info.graph.propagate_escape_states();
        }
        self.infos.insert(function, info);
        changed
    }

    /// Binds a callee summary's argument/return nodes to the caller's
    /// actual-argument/result nodes and merges.
    fn merge_summary_at_site(
        graph: &mut ConnectionGraph,
        summary: &ConnectionGraph,
        result: Option<ValueId>,
        args: &[ValueId],
    ) -> bool {
        let mut map = NodeMap::new();
        for (index, &arg) in args.iter().enumerate() {
            if let (Some(source), Some(dest)) =
                (summary.argument_node_ref(index), graph.node_for(arg))
            {
                map.add(source, dest);
            }
        }
        if let (Some(source), Some(result)) = (summary.return_node_ref(), result) {
            if let Some(dest) = graph.node_for(result) {
                map.add(source, dest);
            }
        }
        if map.is_empty() {
            return false;
        }
        graph.merge_from(summary, &mut map)
    }

    /// The merge budget ran out: stop trusting callee summaries and go
    /// conservative. Precision is lost, soundness is not.
    ///
    /// Every pointer-like actual argument and result at the recorded call
    /// sites is forced to `Global` - exactly the treatment calls to
    /// unknown functions get - and so are the function's own arguments and
    /// return value, which is what callers will see in the summary.
    fn finalize_conservatively(&mut self, module: &Module, function: FunctionId) {
        let Some(f) = module.function(function) else {
            return;
        };
        let Some(info) = self.infos.get_mut(&function) else {
            return;
        };
        info.conservative = true;
        info.summary_dirty = false;

        let mut site_values: Vec<ValueId> = Vec::new();
        for site in &info.known_callees {
            if let Some(Instruction::Call { result, args, .. }) = f.instruction(site.inst) {
                site_values.extend(args.iter().copied());
                site_values.extend(result.iter().copied());
            }
        }
        for value in site_values {
            if let Some(node) = info.graph.node_for(value) {
                info.graph.set_escapes_global(node);
            }
        }
        let own: Vec<CgNodeId> = info
            .graph
            .argument_nodes()
            .map(|(_, node)| node)
            .chain(info.graph.return_node_ref())
            .collect();
        for node in own {
            info.graph.set_escapes_global(node);
        }
        info.graph.propagate_escape_states();
        let _ = Self::refresh_summary(info);
        info.summary_dirty = false;

        log::warn!(
            "escape analysis: merge limit reached for `{}`, falling back to a conservative summary",
            f.name()
        );
    }
}

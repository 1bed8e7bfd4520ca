//! The per-function connection graph.
//!
//! A connection graph relates the pointer values of one function to the
//! memory content they may reference. Two edge kinds exist:
//!
//! - **Points-to** edges go from a pointer node to the `Content` node
//!   summarizing the storage it may reference. For a pointer `p` there is a
//!   points-to edge `p -> c`, where `c` is the content node for `p`.
//! - **Defer** edges represent assignments: `a = b` creates a defer edge
//!   `a -> b`. A load `a = *p` is a defer edge from `a` to `p`'s content
//!   node, a store `*p = b` a defer edge from the content node to `b`.
//!
//! Escape information is propagated along edges: for an edge `a -> b`, if
//! `a` escapes then `b` escapes.
//!
//! # Invariants
//!
//! 1. A defer edge never forms a self cycle.
//! 2. A node has at most one outgoing points-to edge.
//! 3. The target of a points-to edge is always a `Content` node.
//! 4. For any node N, all paths starting at N that consist of defer edges
//!    and a single trailing points-to edge lead to the *same* content node.
//!
//! Invariant 4 is the load-bearing one: it is what lets a single content
//! node stand for everything reachable through an alias set. Edge insertion
//! restores it eagerly - [`ConnectionGraph::defer`] updates the collapsed
//! points-to target across the whole defer web and schedules content nodes
//! for merging whenever two webs with different targets become connected.
//! The merge engine (see [`merge`](super::merge)) then folds them to a
//! fixpoint.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use crate::analysis::escape::node::{CgNode, CgNodeId, EdgeKind, EscapeState, NodeKind};
use crate::ir::{Function, FunctionId, InstId, Instruction, ValueId};
use crate::utils::dot::dot_header;
use crate::utils::escape_dot;

/// The connection graph for one function.
///
/// Nodes live in an append-only arena addressed by [`CgNodeId`]. Merged
/// nodes stay in the arena as tombstones; a union-find structure maps any
/// id (live or dead) to its surviving representative, and every stored node
/// id is resolved through it on read.
#[derive(Debug, Clone)]
pub struct ConnectionGraph {
    /// The function this graph describes.
    function: FunctionId,
    /// The function name, for diagnostics and DOT output.
    name: String,
    /// The node arena. Merged nodes remain as unlinked tombstones.
    pub(crate) nodes: Vec<CgNode>,
    /// Union-find parent array: `merge_target[i] == i` iff node i is live.
    pub(crate) merge_target: Vec<u32>,
    /// Mapping from pointer IR values to their nodes. Multiple values can
    /// map to the same node (projections alias their base).
    values: HashMap<ValueId, CgNodeId>,
    /// Argument nodes by parameter index.
    arg_nodes: Vec<Option<CgNodeId>>,
    /// The pseudo node for the function return value.
    return_node: Option<CgNodeId>,
    /// Content nodes scheduled for merging; drained by
    /// [`merge_all_scheduled`](Self::merge_all_scheduled).
    pub(crate) to_merge: Vec<CgNodeId>,
    /// Use-point table: bit i of a node's use-point set refers to
    /// `use_point_table[i]`.
    use_point_table: Vec<InstId>,
    /// True once use points have been computed.
    use_points_computed: bool,
    /// Monotone change counter: bumped on node allocation, edge insertion,
    /// state raises, and merges. Used for cross-graph change detection.
    pub(crate) version: u64,
}

impl ConnectionGraph {
    /// Creates an empty connection graph for a function.
    #[must_use]
    pub fn new(function: FunctionId, name: &str) -> Self {
        Self {
            function,
            name: name.to_string(),
            nodes: Vec::new(),
            merge_target: Vec::new(),
            values: HashMap::new(),
            arg_nodes: Vec::new(),
            return_node: None,
            to_merge: Vec::new(),
            use_point_table: Vec::new(),
            use_points_computed: false,
            version: 0,
        }
    }

    /// Returns the function this graph belongs to.
    #[must_use]
    pub const fn function(&self) -> FunctionId {
        self.function
    }

    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the change counter. It only ever increases; a stable value
    /// across an operation means the graph did not change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the total number of arena slots, including tombstones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of live (unmerged) nodes.
    #[must_use]
    pub fn live_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.merged).count()
    }

    // ---- node allocation and resolution -------------------------------

    pub(crate) fn alloc_node(&mut self, kind: NodeKind, value: Option<ValueId>) -> CgNodeId {
        let id = CgNodeId::new(self.nodes.len() as u32);
        self.nodes.push(CgNode::new(kind, value));
        self.merge_target.push(id.0);
        self.version += 1;
        id
    }

    /// Resolves a possibly-merged node to its live representative.
    ///
    /// Stored node ids are never invalidated by merging; this follows the
    /// full merge chain (a node may have been merged several times).
    #[must_use]
    pub fn resolve(&self, id: CgNodeId) -> CgNodeId {
        let mut current = id;
        while self.merge_target[current.index()] != current.0 {
            current = CgNodeId::new(self.merge_target[current.index()]);
        }
        current
    }

    /// Resolves with path compression.
    pub(crate) fn resolve_mut(&mut self, id: CgNodeId) -> CgNodeId {
        let root = self.resolve(id);
        let mut current = id;
        while current != root {
            let next = CgNodeId::new(self.merge_target[current.index()]);
            self.merge_target[current.index()] = root.0;
            current = next;
        }
        root
    }

    /// Returns `true` if the node is live (not merged away).
    #[must_use]
    pub fn is_live(&self, id: CgNodeId) -> bool {
        !self.nodes[id.index()].merged
    }

    /// Returns the kind of a node (after resolution).
    #[must_use]
    pub fn node_kind(&self, id: CgNodeId) -> NodeKind {
        self.nodes[self.resolve(id).index()].kind
    }

    /// Returns the escape state of a node (after resolution).
    #[must_use]
    pub fn escape_state(&self, id: CgNodeId) -> EscapeState {
        self.nodes[self.resolve(id).index()].state
    }

    /// Returns `true` if the node's value escapes its function.
    #[must_use]
    pub fn escapes(&self, id: CgNodeId) -> bool {
        self.escape_state(id) != EscapeState::None
    }

    /// Returns the content node summarizing the storage `id` may reference,
    /// if the graph knows of any.
    #[must_use]
    pub fn points_to(&self, id: CgNodeId) -> Option<CgNodeId> {
        self.points_to_of(id)
    }

    /// Returns the collapsed points-to target of a node, fully resolved.
    #[must_use]
    pub(crate) fn points_to_of(&self, id: CgNodeId) -> Option<CgNodeId> {
        self.nodes[self.resolve(id).index()]
            .points_to
            .map(|c| self.resolve(c))
    }

    /// Raises a node's escape state; returns `true` on change.
    pub(crate) fn raise_state(&mut self, id: CgNodeId, state: EscapeState) -> bool {
        let id = self.resolve(id);
        let changed = self.nodes[id.index()].merge_escape_state(state);
        if changed {
            self.version += 1;
        }
        changed
    }

    // ---- value mapping ------------------------------------------------

    /// Returns the node of an IR value, if one exists.
    #[must_use]
    pub fn node_for(&self, value: ValueId) -> Option<CgNodeId> {
        self.values.get(&value).map(|&n| self.resolve(n))
    }

    /// Gets or creates the `Value` node for an IR value.
    pub(crate) fn value_node(&mut self, value: ValueId) -> CgNodeId {
        if let Some(&n) = self.values.get(&value) {
            return self.resolve_mut(n);
        }
        let n = self.alloc_node(NodeKind::Value, Some(value));
        self.values.insert(value, n);
        n
    }

    /// Re-uses an existing node for another IR value (projection aliasing).
    pub(crate) fn map_value(&mut self, value: ValueId, node: CgNodeId) {
        debug_assert!(!self.values.contains_key(&value));
        self.values.insert(value, node);
    }

    /// Creates the `Argument` node for parameter `index`, mapped to the
    /// argument's IR value. Argument nodes start escaping at `Arguments`:
    /// their content is visible to every caller.
    pub(crate) fn make_argument(&mut self, index: usize, value: ValueId) -> CgNodeId {
        let n = self.alloc_node(NodeKind::Argument, Some(value));
        self.nodes[n.index()].state = EscapeState::Arguments;
        if index >= self.arg_nodes.len() {
            self.arg_nodes.resize(index + 1, None);
        }
        self.arg_nodes[index] = Some(n);
        self.values.insert(value, n);
        n
    }

    /// Gets or creates the `Argument` node for parameter `index` without an
    /// IR value binding. Used when building summary graphs.
    pub(crate) fn argument_node(&mut self, index: usize) -> CgNodeId {
        if let Some(Some(n)) = self.arg_nodes.get(index) {
            return self.resolve_mut(*n);
        }
        let n = self.alloc_node(NodeKind::Argument, None);
        self.nodes[n.index()].state = EscapeState::Arguments;
        if index >= self.arg_nodes.len() {
            self.arg_nodes.resize(index + 1, None);
        }
        self.arg_nodes[index] = Some(n);
        n
    }

    /// Returns the `Argument` node for parameter `index`, if present.
    #[must_use]
    pub fn argument_node_ref(&self, index: usize) -> Option<CgNodeId> {
        self.arg_nodes
            .get(index)
            .copied()
            .flatten()
            .map(|n| self.resolve(n))
    }

    /// Returns `(index, node)` for every parameter that has a node.
    pub(crate) fn argument_nodes(&self) -> impl Iterator<Item = (usize, CgNodeId)> + '_ {
        self.arg_nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.map(|n| (i, self.resolve(n))))
    }

    /// Gets or creates the pseudo node for the function return value.
    ///
    /// The return node starts escaping at `Arguments`: returned values are
    /// observed by the caller by definition.
    pub fn return_node(&mut self) -> CgNodeId {
        if let Some(r) = self.return_node {
            return self.resolve_mut(r);
        }
        let r = self.alloc_node(NodeKind::Return, None);
        self.nodes[r.index()].state = EscapeState::Arguments;
        self.return_node = Some(r);
        r
    }

    /// Returns the return node if the function has one.
    #[must_use]
    pub fn return_node_ref(&self) -> Option<CgNodeId> {
        self.return_node.map(|r| self.resolve(r))
    }

    // ---- edges --------------------------------------------------------

    /// Gets or creates the content node `addr` points to.
    ///
    /// If the node carries only a cached (edge-less) points-to target, the
    /// target is materialized as a real edge first.
    pub fn content_node(&mut self, addr: CgNodeId) -> CgNodeId {
        let addr = self.resolve_mut(addr);
        if let Some(pt) = self.nodes[addr.index()].points_to {
            let pt = self.resolve_mut(pt);
            if !self.nodes[addr.index()].points_to_is_edge {
                self.nodes[addr.index()].points_to = Some(pt);
                self.nodes[addr.index()].points_to_is_edge = true;
                self.nodes[pt.index()].preds.push((addr, EdgeKind::PointsTo));
                self.version += 1;
            }
            return pt;
        }
        let value = self.nodes[addr.index()].value;
        let content = self.alloc_node(NodeKind::Content, value);
        self.update_points_to(addr, content);
        self.merge_all_scheduled();
        self.resolve_mut(content)
    }

    /// Establishes a points-to relation from `node` to the content node
    /// `target`, updating the whole defer web.
    pub(crate) fn point_to(&mut self, node: CgNodeId, target: CgNodeId) {
        self.update_points_to(node, target);
        self.merge_all_scheduled();
        self.verify();
    }

    /// Creates a defer edge `from -> to` and restores invariant 4.
    ///
    /// Returns whether a new edge was actually added; self edges and
    /// duplicates are no-ops.
    pub fn defer(&mut self, from: CgNodeId, to: CgNodeId) -> bool {
        let added = self.add_defer_edge(from, to);
        self.merge_all_scheduled();
        self.verify();
        added
    }

    /// Adds the defer edge and reconciles the collapsed points-to targets
    /// of the two webs that just became connected. May schedule merges; the
    /// caller drains them.
    pub(crate) fn add_defer_edge(&mut self, from: CgNodeId, to: CgNodeId) -> bool {
        let from = self.resolve_mut(from);
        let to = self.resolve_mut(to);
        if from == to || self.nodes[from.index()].defers_to.contains(&to) {
            return false;
        }
        self.nodes[from.index()].defers_to.push(to);
        self.nodes[to.index()].preds.push((from, EdgeKind::Defer));
        self.version += 1;

        match (self.points_to_of(from), self.points_to_of(to)) {
            (None, None) => {}
            (Some(fp), None) => self.update_points_to(to, fp),
            (None, Some(tp)) => self.update_points_to(from, tp),
            (Some(fp), Some(tp)) if fp != tp => self.schedule_to_merge(fp, tp),
            (Some(_), Some(_)) => {}
        }
        true
    }

    /// Transitively updates the collapsed points-to target of every node in
    /// the defer web containing `initial`.
    ///
    /// Nodes already pointing to a different content node are scheduled for
    /// merging with `target`. Interior nodes receive the target as a cached
    /// pointer; a node at the end of a defer path gets a real edge.
    pub(crate) fn update_points_to(&mut self, initial: CgNodeId, target: CgNodeId) {
        let initial = self.resolve_mut(initial);
        let target = self.resolve_mut(target);
        debug_assert_eq!(self.nodes[target.index()].kind, NodeKind::Content);

        let mut worklist = vec![initial];
        self.nodes[initial.index()].in_worklist = true;
        let mut idx = 0;
        while idx < worklist.len() {
            let id = worklist[idx];
            idx += 1;

            let current = self.nodes[id.index()].points_to.map(|c| self.resolve(c));
            if current == Some(target) {
                continue;
            }
            if let Some(current) = current {
                self.schedule_to_merge(current, target);
            }
            // A node that already has a points-to edge keeps it; the
            // scheduled merge will unify the targets. Otherwise the target
            // is cached, or materialized as an edge at a defer-path end.
            if !self.nodes[id.index()].points_to_is_edge {
                if self.nodes[id.index()].defers_to.is_empty() {
                    self.nodes[id.index()].points_to = Some(target);
                    self.nodes[id.index()].points_to_is_edge = true;
                    self.nodes[target.index()].preds.push((id, EdgeKind::PointsTo));
                } else {
                    self.nodes[id.index()].points_to = Some(target);
                }
                self.version += 1;
            }

            // The web extends through defer edges in both directions.
            for j in 0..self.nodes[id.index()].defers_to.len() {
                let succ = self.nodes[id.index()].defers_to[j];
                if !self.nodes[succ.index()].in_worklist {
                    self.nodes[succ.index()].in_worklist = true;
                    worklist.push(succ);
                }
            }
            for j in 0..self.nodes[id.index()].preds.len() {
                let (pred, kind) = self.nodes[id.index()].preds[j];
                if kind == EdgeKind::Defer && !self.nodes[pred.index()].in_worklist {
                    self.nodes[pred.index()].in_worklist = true;
                    worklist.push(pred);
                }
            }
        }
        for id in worklist {
            self.nodes[id.index()].in_worklist = false;
        }
    }

    /// Marks a node as escaping to global or unidentified memory.
    ///
    /// The node is guaranteed to have a content node afterwards: only
    /// content structure survives cross-function merging, so a global
    /// escape must be discoverable through one.
    pub fn set_escapes_global(&mut self, node: CgNodeId) {
        let node = self.resolve_mut(node);
        self.raise_state(node, EscapeState::Global);
        if self.nodes[node.index()].kind != NodeKind::Content {
            self.content_node(node);
        }
    }

    // ---- escape propagation -------------------------------------------

    /// Propagates escape states along all edges to a fixpoint.
    ///
    /// For an edge `a -> b` (defer or points-to), `b`'s state is raised to
    /// at least `a`'s. Terminates because the lattice has finite height and
    /// states never decrease; a second call directly after a first is
    /// always a no-op.
    pub fn propagate_escape_states(&mut self) {
        loop {
            let mut changed = false;
            for i in 0..self.nodes.len() {
                if self.nodes[i].merged {
                    continue;
                }
                let state = self.nodes[i].state;
                if state == EscapeState::None {
                    continue;
                }
                if let Some(pt) = self.nodes[i].points_to {
                    changed |= self.raise_state(pt, state);
                }
                for j in 0..self.nodes[i].defers_to.len() {
                    let succ = self.nodes[i].defers_to[j];
                    changed |= self.raise_state(succ, state);
                }
            }
            if !changed {
                break;
            }
        }
    }

    // ---- use points ---------------------------------------------------

    /// Records that `inst` uses `node`'s value. Returns the use-point index,
    /// or `None` if the node already escapes globally - clients must treat
    /// globally escaping values as used everywhere, so recording more use
    /// points cannot add precision.
    pub fn add_use_point(&mut self, node: CgNodeId, inst: InstId) -> Option<usize> {
        let node = self.resolve_mut(node);
        if self.nodes[node.index()].state >= EscapeState::Global {
            return None;
        }
        let idx = self.use_point_table.len();
        self.use_point_table.push(inst);
        self.nodes[node.index()].use_points.insert(idx);
        Some(idx)
    }

    /// Computes use points for every node, walking the function once.
    ///
    /// Use points are the instructions relevant for liveness: calls,
    /// lifetime ends, and returns. After seeding, the bits propagate along
    /// all edges to a fixpoint so that a node's set covers the uses of
    /// every alias.
    pub fn compute_use_points(&mut self, function: &Function) {
        if self.use_points_computed {
            return;
        }
        self.use_points_computed = true;

        let mut operands = Vec::new();
        for (inst_id, inst) in function.instructions() {
            if !matches!(
                inst,
                Instruction::Call { .. } | Instruction::Drop { .. } | Instruction::Return { .. }
            ) {
                continue;
            }
            operands.clear();
            inst.operands(&mut operands);
            for &value in &operands {
                if let Some(node) = self.node_for(value) {
                    self.add_use_point(node, inst_id);
                }
            }
        }

        loop {
            let mut changed = false;
            for i in 0..self.nodes.len() {
                if self.nodes[i].merged || self.nodes[i].use_points.is_empty() {
                    continue;
                }
                let bits = self.nodes[i].use_points.clone();
                let mut push = |graph: &mut Self, succ: CgNodeId| {
                    let succ = graph.resolve(succ);
                    if succ.index() != i {
                        graph.nodes[succ.index()].use_points.union_with(&bits)
                    } else {
                        false
                    }
                };
                if let Some(pt) = self.nodes[i].points_to {
                    changed |= push(self, pt);
                }
                for j in 0..self.nodes[i].defers_to.len() {
                    let succ = self.nodes[i].defers_to[j];
                    changed |= push(self, succ);
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Returns `true` if use points have been computed.
    #[must_use]
    pub const fn use_points_computed(&self) -> bool {
        self.use_points_computed
    }

    /// Returns the instructions using `node`'s value, in instruction order.
    ///
    /// Only meaningful after [`ConnectionGraph::compute_use_points`].
    #[must_use]
    pub fn use_points(&self, node: CgNodeId) -> Vec<InstId> {
        let node = self.resolve(node);
        let mut uses: Vec<InstId> = self.nodes[node.index()]
            .use_points
            .iter()
            .map(|idx| self.use_point_table[idx])
            .collect();
        uses.sort_unstable();
        uses.dedup();
        uses
    }

    // ---- verification -------------------------------------------------

    /// Checks all graph invariants. Compiled to a no-op in release builds.
    pub fn verify(&self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.to_merge.is_empty(),
                "verify called with pending merges in `{}`",
                self.name
            );
            self.verify_structure();
            for (id, node) in self.live_nodes() {
                let pt = self.points_to_of(id);
                for &d in &node.defers_to {
                    assert_eq!(
                        self.points_to_of(d),
                        pt,
                        "defer successors of {id} disagree on the points-to target in `{}`",
                        self.name
                    );
                }
                assert!(
                    !(node.points_to.is_some()
                        && !node.points_to_is_edge
                        && node.defers_to.is_empty()),
                    "{id} ends a defer path without a points-to edge in `{}`",
                    self.name
                );
            }
        }
    }

    /// Checks edge/backlink consistency only. Safe to call while merges are
    /// pending. Compiled to a no-op in release builds.
    pub fn verify_structure(&self) {
        #[cfg(debug_assertions)]
        for (id, node) in self.live_nodes() {
            assert!(
                !node.defers_to.contains(&id),
                "defer self cycle on {id} in `{}`",
                self.name
            );
            if let Some(pt) = node.points_to_edge() {
                let target = &self.nodes[pt.index()];
                assert!(!target.merged, "points-to edge of {id} targets a dead node");
                assert_eq!(
                    target.kind,
                    NodeKind::Content,
                    "points-to edge of {id} targets a non-content node"
                );
                assert!(
                    target.preds.contains(&(id, EdgeKind::PointsTo)),
                    "points-to edge of {id} has no backlink"
                );
            }
            for &d in &node.defers_to {
                assert!(!self.nodes[d.index()].merged, "defer edge targets a dead node");
                assert!(
                    self.nodes[d.index()].preds.contains(&(id, EdgeKind::Defer)),
                    "defer edge {id} -> {d} has no backlink"
                );
            }
            for &(p, kind) in &node.preds {
                assert!(!self.nodes[p.index()].merged, "pred entry references a dead node");
                match kind {
                    EdgeKind::Defer => assert!(
                        self.nodes[p.index()].defers_to.contains(&id),
                        "defer pred entry of {id} has no forward edge"
                    ),
                    EdgeKind::PointsTo => assert!(
                        self.nodes[p.index()].points_to_edge() == Some(id),
                        "points-to pred entry of {id} has no forward edge"
                    ),
                }
            }
        }
    }

    /// Returns `(id, node)` for every live node.
    pub(crate) fn live_nodes(&self) -> impl Iterator<Item = (CgNodeId, &CgNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.merged)
            .map(|(i, n)| (CgNodeId::new(i as u32), n))
    }

    /// Structural comparison, ignoring use points and the change counter.
    ///
    /// Both graphs must have been produced by deterministic construction
    /// from the same inputs for this to be meaningful; it is used to detect
    /// whether a freshly rebuilt summary differs from the cached one.
    pub(crate) fn equivalent(&self, other: &ConnectionGraph) -> bool {
        if self.nodes.len() != other.nodes.len()
            || self.arg_nodes.len() != other.arg_nodes.len()
            || self.return_node.is_some() != other.return_node.is_some()
        {
            return false;
        }
        for i in 0..self.nodes.len() {
            let (a, b) = (&self.nodes[i], &other.nodes[i]);
            if a.merged != b.merged {
                return false;
            }
            if a.merged {
                continue;
            }
            let id = CgNodeId::new(i as u32);
            if a.kind != b.kind
                || a.state != b.state
                || self.points_to_of(id) != other.points_to_of(id)
            {
                return false;
            }
            let mut da: Vec<CgNodeId> = a.defers_to.iter().map(|&d| self.resolve(d)).collect();
            let mut db: Vec<CgNodeId> = b.defers_to.iter().map(|&d| other.resolve(d)).collect();
            da.sort_unstable();
            db.sort_unstable();
            if da != db {
                return false;
            }
        }
        true
    }

    // ---- output -------------------------------------------------------

    /// Generates a DOT representation of this graph.
    ///
    /// Defer edges are dashed and grey, points-to edges solid and black.
    /// Content nodes are rounded, argument and return nodes bold. Globally
    /// escaping nodes are red, argument-escaping nodes blue.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();
        let title = title.map_or_else(|| format!("CG of {}", self.name), str::to_string);
        dot_header(&mut dot, "ConnectionGraph", &title);

        for (id, node) in self.live_nodes() {
            let label = self.node_label(id, node);
            let mut style = Vec::new();
            if node.kind == NodeKind::Content {
                style.push("style=\"rounded,filled\"");
            } else {
                style.push("style=filled");
            }
            if matches!(node.kind, NodeKind::Argument | NodeKind::Return) {
                style.push("penwidth=2");
            }
            let fill = match node.state {
                EscapeState::Global => "fillcolor=lightcoral",
                EscapeState::Arguments => "fillcolor=lightblue",
                EscapeState::None => "fillcolor=white",
            };
            style.push(fill);
            let _ = writeln!(
                dot,
                "    \"{id}\" [label=\"{}\", {}];",
                escape_dot(&label),
                style.join(", ")
            );
        }
        dot.push('\n');
        for (id, node) in self.live_nodes() {
            if let Some(pt) = node.points_to_edge() {
                let _ = writeln!(dot, "    \"{id}\" -> \"{pt}\";");
            }
            for &d in &node.defers_to {
                let _ = writeln!(dot, "    \"{id}\" -> \"{d}\" [color=gray, style=dashed];");
            }
        }
        dot.push_str("}\n");
        dot
    }

    fn node_label(&self, id: CgNodeId, node: &CgNode) -> String {
        let index = self
            .arg_nodes
            .iter()
            .position(|&a| a.map(|a| self.resolve(a)) == Some(id));
        match (node.kind, index) {
            (NodeKind::Argument, Some(i)) => format!("arg{i}"),
            (NodeKind::Return, _) => "return".to_string(),
            (kind, _) => match node.value {
                Some(v) => format!("{} {v}", kind.label()),
                None => format!("{} {id}", kind.label()),
            },
        }
    }
}

impl fmt::Display for ConnectionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CG of {}:", self.name)?;
        for (id, node) in self.live_nodes() {
            write!(f, "  {id}: {} [{:?}]", self.node_label(id, node), node.state)?;
            if let Some(pt) = self.points_to_of(id) {
                let marker = if node.points_to_is_edge { "->" } else { "~>" };
                write!(f, " {marker} {pt}")?;
            }
            if !node.defers_to.is_empty() {
                write!(f, " defers")?;
                for &d in &node.defers_to {
                    write!(f, " {d}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionId;
    use strum::IntoEnumIterator;

    fn graph() -> ConnectionGraph {
        ConnectionGraph::new(FunctionId::new(0), "test")
    }

    /// Asserts invariant 4 by exhaustively walking defer paths from every
    /// live node and collecting the trailing points-to targets.
    fn assert_points_to_closure(g: &ConnectionGraph) {
        for (start, _) in g.live_nodes() {
            let mut reachable = vec![start];
            let mut visited = std::collections::HashSet::new();
            visited.insert(start);
            let mut targets = std::collections::HashSet::new();
            while let Some(n) = reachable.pop() {
                if let Some(pt) = g.points_to_of(n) {
                    targets.insert(pt);
                }
                for &d in &g.nodes[n.index()].defers_to {
                    let d = g.resolve(d);
                    if visited.insert(d) {
                        reachable.push(d);
                    }
                }
            }
            assert!(
                targets.len() <= 1,
                "{start} reaches {} different content nodes",
                targets.len()
            );
        }
    }

    #[test]
    fn test_defer_rejects_self_and_duplicate_edges() {
        let mut g = graph();
        let a = g.value_node(crate::ir::ValueId::new(0));
        let b = g.value_node(crate::ir::ValueId::new(1));

        assert!(!g.defer(a, a), "self edge must be a no-op");
        assert!(g.defer(a, b));
        assert!(!g.defer(a, b), "duplicate edge must be a no-op");
    }

    #[test]
    fn test_content_node_is_unique_per_pointer() {
        let mut g = graph();
        let p = g.value_node(crate::ir::ValueId::new(0));
        let c1 = g.content_node(p);
        let c2 = g.content_node(p);
        assert_eq!(c1, c2);
        assert_eq!(g.node_kind(c1), NodeKind::Content);
    }

    #[test]
    fn test_defer_propagates_points_to_through_web() {
        let mut g = graph();
        let a = g.value_node(crate::ir::ValueId::new(0));
        let b = g.value_node(crate::ir::ValueId::new(1));
        let c = g.content_node(b);

        // a = b: a's collapsed points-to must become b's content.
        g.defer(a, b);
        assert_eq!(g.points_to_of(a), Some(g.resolve(c)));
        g.verify();
    }

    #[test]
    fn test_conflicting_contents_are_merged() {
        let mut g = graph();
        let a = g.value_node(crate::ir::ValueId::new(0));
        let b = g.value_node(crate::ir::ValueId::new(1));
        let v = g.value_node(crate::ir::ValueId::new(2));
        let ca = g.content_node(a);
        let cb = g.content_node(b);
        assert_ne!(g.resolve(ca), g.resolve(cb));

        // v aliases both a and b, so their contents must collapse.
        g.defer(v, a);
        g.defer(v, b);
        assert_eq!(g.resolve(ca), g.resolve(cb));
        assert_eq!(g.points_to_of(v), Some(g.resolve(ca)));
        assert_points_to_closure(&g);
    }

    #[test]
    fn test_set_escapes_global_creates_content() {
        let mut g = graph();
        let p = g.value_node(crate::ir::ValueId::new(0));
        g.set_escapes_global(p);

        assert_eq!(g.escape_state(p), EscapeState::Global);
        assert!(g.points_to_of(p).is_some(), "global node must have content");
    }

    #[test]
    fn test_propagation_pushes_states_forward() {
        let mut g = graph();
        let a = g.value_node(crate::ir::ValueId::new(0));
        let b = g.value_node(crate::ir::ValueId::new(1));
        let c = g.content_node(b);
        g.defer(a, b);

        g.raise_state(a, EscapeState::Global);
        g.propagate_escape_states();

        assert_eq!(g.escape_state(b), EscapeState::Global);
        assert_eq!(g.escape_state(c), EscapeState::Global);
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let mut g = graph();
        let a = g.value_node(crate::ir::ValueId::new(0));
        let b = g.value_node(crate::ir::ValueId::new(1));
        g.defer(a, b);
        g.raise_state(a, EscapeState::Arguments);

        g.propagate_escape_states();
        let version = g.version();
        g.propagate_escape_states();
        assert_eq!(g.version(), version, "second propagation must change nothing");
    }

    #[test]
    fn test_use_points_skip_global_nodes() {
        let mut g = graph();
        let p = g.value_node(crate::ir::ValueId::new(0));
        assert!(g.add_use_point(p, InstId::new(0)).is_some());

        g.set_escapes_global(p);
        assert!(g.add_use_point(p, InstId::new(1)).is_none());

        let uses = g.use_points(p);
        assert_eq!(uses, vec![InstId::new(0)]);
    }

    #[test]
    fn test_states_never_decrease() {
        let mut g = graph();
        let p = g.value_node(crate::ir::ValueId::new(0));
        for state in EscapeState::iter() {
            g.raise_state(p, state);
        }
        assert_eq!(g.escape_state(p), EscapeState::Global);
        assert!(!g.raise_state(p, EscapeState::None));
        assert_eq!(g.escape_state(p), EscapeState::Global);
    }

    #[test]
    fn test_to_dot_contains_nodes_and_edges() {
        let mut g = graph();
        let a = g.value_node(crate::ir::ValueId::new(0));
        let b = g.value_node(crate::ir::ValueId::new(1));
        g.defer(a, b);
        g.content_node(b);

        let dot = g.to_dot(Some("test"));
        assert!(dot.starts_with("digraph ConnectionGraph {"));
        assert!(dot.contains("style=dashed"), "defer edges are dashed");
        assert!(dot.contains("content"));
    }

    /// Deterministic xorshift generator; no external crates needed for the
    /// randomized closure test.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, bound: usize) -> usize {
            (self.next() % bound as u64) as usize
        }
    }

    #[test]
    fn test_random_operations_preserve_invariants() {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        for round in 0..24 {
            let mut g = graph();
            let nodes: Vec<_> = (0..10)
                .map(|i| g.value_node(crate::ir::ValueId::new(i)))
                .collect();
            let mut states: Vec<EscapeState> = Vec::new();

            for _ in 0..60 {
                match rng.below(4) {
                    0 | 1 => {
                        let a = nodes[rng.below(nodes.len())];
                        let b = nodes[rng.below(nodes.len())];
                        g.defer(a, b);
                    }
                    2 => {
                        let a = nodes[rng.below(nodes.len())];
                        g.content_node(a);
                    }
                    _ => {
                        let a = nodes[rng.below(nodes.len())];
                        g.set_escapes_global(a);
                        g.propagate_escape_states();
                    }
                }
                g.verify();
                assert_points_to_closure(&g);

                // Lattice monotonicity across the whole op sequence.
                let new_states: Vec<_> =
                    nodes.iter().map(|&n| g.escape_state(n)).collect();
                if !states.is_empty() {
                    for (old, new) in states.iter().zip(new_states.iter()) {
                        assert!(new >= old, "state decreased in round {round}");
                    }
                }
                states = new_states;
            }
        }
    }
}

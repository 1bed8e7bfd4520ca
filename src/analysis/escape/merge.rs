//! The merge engine: folding content nodes until the graph invariants hold.
//!
//! Inserting a defer edge can connect two defer webs that point to
//! different content nodes. The only way to restore the collapsed
//! points-to invariant is to treat those content nodes as one: they are
//! *scheduled* for merging, and [`ConnectionGraph::merge_all_scheduled`]
//! folds them pairwise until the schedule is empty. Merging two nodes can
//! itself reveal that their points-to targets must merge, so the pass is a
//! closure computation, not a single sweep.
//!
//! Merge targets are tracked in a union-find structure with path
//! compression; a merged node is permanently dead and every stored id is
//! resolved to its live representative on read.
//!
//! This module also hosts [`NodeMap`] and
//! [`ConnectionGraph::merge_from`], the cross-graph merge used both to
//! reduce a function graph into its summary and to inline callee summaries
//! into callers during the interprocedural pass.

use std::collections::{HashMap, HashSet};

use crate::analysis::escape::graph::ConnectionGraph;
use crate::analysis::escape::node::{CgNodeId, EdgeKind, EscapeState, NodeKind};

/// A transient mapping from nodes of a source graph to nodes of a
/// destination graph, used during a single cross-graph merge.
///
/// The insertion-ordered key list doubles as the worklist driving the
/// merge to a fixpoint: every node that gets mapped is eventually
/// processed, and processing a node may map further nodes.
#[derive(Debug, Default)]
pub struct NodeMap {
    /// Source node to destination node.
    map: HashMap<CgNodeId, CgNodeId>,
    /// Source keys in insertion order; the merge worklist.
    mapped: Vec<CgNodeId>,
}

impl NodeMap {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping from a source node to a destination node and pushes
    /// the source node onto the worklist. The first mapping for a source
    /// node wins.
    pub fn add(&mut self, from: CgNodeId, to: CgNodeId) {
        debug_assert!(!self.map.contains_key(&from), "source node {from} mapped twice");
        if let std::collections::hash_map::Entry::Vacant(entry) = self.map.entry(from) {
            entry.insert(to);
            self.mapped.push(from);
        }
    }

    /// Looks up the destination of a source node.
    ///
    /// The returned id may itself have been merged in the destination
    /// graph; callers resolve it there.
    #[must_use]
    pub fn get(&self, from: CgNodeId) -> Option<CgNodeId> {
        self.map.get(&from).copied()
    }

    /// Returns `true` if the source node is mapped.
    #[must_use]
    pub fn contains(&self, from: CgNodeId) -> bool {
        self.map.contains_key(&from)
    }

    /// Returns the number of mapped nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    /// Returns `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }

    fn at(&self, idx: usize) -> CgNodeId {
        self.mapped[idx]
    }
}

impl ConnectionGraph {
    /// Schedules `from` to be merged into `to`. Both must be content
    /// nodes. A no-op when they already share a representative.
    ///
    /// The actual merging happens in
    /// [`ConnectionGraph::merge_all_scheduled`].
    pub(crate) fn schedule_to_merge(&mut self, from: CgNodeId, to: CgNodeId) {
        let from = self.resolve_mut(from);
        let to = self.resolve_mut(to);
        debug_assert_eq!(self.nodes[from.index()].kind, NodeKind::Content);
        debug_assert_eq!(self.nodes[to.index()].kind, NodeKind::Content);
        if from != to {
            self.merge_target[from.index()] = to.0;
            self.to_merge.push(from);
        }
    }

    /// Merges all scheduled nodes, following up on merge obligations
    /// discovered mid-pass, until the schedule is empty.
    ///
    /// Afterwards the collapsed points-to invariant holds for every live
    /// node. This is the central correctness property of the analysis: a
    /// violation would let two aliases disagree about the storage they
    /// reach, and an escaping object could be judged non-escaping.
    pub(crate) fn merge_all_scheduled(&mut self) {
        while let Some(from) = self.to_merge.pop() {
            debug_assert!(!self.nodes[from.index()].merged);
            let to = self.resolve_mut(from);
            debug_assert_ne!(to, from, "scheduled node has no merge target");
            self.merge_nodes(from, to);
        }
    }

    /// Physically merges `from` into `to`: unions edge sets, redirects
    /// every predecessor edge to `to`, folds use points and escape state,
    /// and marks `from` permanently dead.
    fn merge_nodes(&mut self, from: CgNodeId, to: CgNodeId) {
        let preds = std::mem::take(&mut self.nodes[from.index()].preds);
        let defers = std::mem::take(&mut self.nodes[from.index()].defers_to);
        let from_pt = self.nodes[from.index()].points_to.take();
        let from_pt_is_edge = self.nodes[from.index()].points_to_is_edge;
        self.nodes[from.index()].points_to_is_edge = false;
        let from_state = self.nodes[from.index()].state;
        let from_bits = std::mem::take(&mut self.nodes[from.index()].use_points);
        self.nodes[from.index()].merged = true;
        self.version += 1;

        // Redirect incoming edges to the survivor.
        for (p, kind) in preds {
            if p == from {
                // A self points-to edge; re-created from `from_pt` below.
                continue;
            }
            match kind {
                EdgeKind::PointsTo => {
                    debug_assert_eq!(self.nodes[p.index()].points_to, Some(from));
                    self.nodes[p.index()].points_to = Some(to);
                    self.nodes[to.index()].preds.push((p, EdgeKind::PointsTo));
                }
                EdgeKind::Defer => {
                    let list = &mut self.nodes[p.index()].defers_to;
                    if let Some(pos) = list.iter().position(|&d| d == from) {
                        list.remove(pos);
                    }
                    // Dropped entirely when it would form a self cycle.
                    if p != to && !self.nodes[p.index()].defers_to.contains(&to) {
                        self.nodes[p.index()].defers_to.push(to);
                        self.nodes[to.index()].preds.push((p, EdgeKind::Defer));
                    }
                }
            }
        }

        // Redirect outgoing defer edges.
        for d in defers {
            let list = &mut self.nodes[d.index()].preds;
            if let Some(pos) = list.iter().position(|&e| e == (from, EdgeKind::Defer)) {
                list.remove(pos);
            }
            if d != to && !self.nodes[to.index()].defers_to.contains(&d) {
                self.nodes[to.index()].defers_to.push(d);
                self.nodes[d.index()].preds.push((to, EdgeKind::Defer));
            }
        }

        // Reconcile the points-to targets of the joined webs.
        if let Some(fp) = from_pt {
            // If `from` pointed to itself, the survivor points to itself.
            let fp = self.resolve_mut(fp);
            if from_pt_is_edge {
                let list = &mut self.nodes[fp.index()].preds;
                if let Some(pos) = list.iter().position(|&e| e == (from, EdgeKind::PointsTo)) {
                    list.remove(pos);
                }
            }
            match self.points_to_of(to) {
                None => self.update_points_to(to, fp),
                Some(tp) if tp != fp => self.schedule_to_merge(fp, tp),
                _ => {}
            }
        } else if let Some(tp) = self.points_to_of(to) {
            // Nodes that deferred to `from` may not know `to`'s target yet.
            self.update_points_to(to, tp);
        }

        // Dropping a self-cycle defer edge can leave the survivor at the
        // end of a defer path with only a cached target; materialize it.
        if !self.nodes[to.index()].points_to_is_edge
            && self.nodes[to.index()].defers_to.is_empty()
        {
            if let Some(pt) = self.nodes[to.index()].points_to {
                let pt = self.resolve_mut(pt);
                self.nodes[to.index()].points_to = Some(pt);
                self.nodes[to.index()].points_to_is_edge = true;
                self.nodes[pt.index()].preds.push((to, EdgeKind::PointsTo));
            }
        }

        if self.nodes[to.index()].merge_escape_state(from_state) {
            self.version += 1;
        }
        self.nodes[to.index()].use_points.union_with(&from_bits);
        self.verify_structure();
    }

    /// Merges `source` into this graph, starting from the node mapping in
    /// `mapping` and closing over points-to and defer edges.
    ///
    /// The mapping typically binds a callee summary's argument and return
    /// nodes to the caller's actual-argument and result nodes; everything
    /// reachable from them in `source` is then reflected here. Content
    /// structure is mapped on demand (reusing this graph's content nodes
    /// where they exist), defer chains through unmapped value nodes are
    /// flattened, and a globally escaping source node simply forces its
    /// destination to `Global` - nothing below it needs to be copied.
    ///
    /// Returns `true` if this graph changed.
    pub(crate) fn merge_from(&mut self, source: &ConnectionGraph, mapping: &mut NodeMap) -> bool {
        let initial_version = self.version;
        let mut anchors = Vec::new();
        let mut idx = 0;
        while idx < mapping.len() {
            let src = mapping.at(idx);
            idx += 1;
            let dst = mapping.get(src).expect("worklist entry without mapping");
            let dst = self.resolve_mut(dst);
            let src_node = &source.nodes[source.resolve(src).index()];

            if src_node.state >= EscapeState::Global {
                self.set_escapes_global(dst);
                continue;
            }

            if let Some(src_content) = source.points_to_of(src) {
                let content = self.content_node(dst);
                match mapping.get(src_content) {
                    None => mapping.add(src_content, content),
                    Some(existing) => {
                        let existing = self.resolve_mut(existing);
                        let content = self.resolve_mut(content);
                        if existing != content {
                            self.schedule_to_merge(existing, content);
                            self.merge_all_scheduled();
                        }
                    }
                }
            }

            anchors.clear();
            source.flatten_defer_targets(src, mapping, &mut anchors);
            for &anchor in &anchors {
                let dest = match mapping.get(anchor) {
                    Some(d) => self.resolve_mut(d),
                    None => {
                        debug_assert_eq!(source.nodes[anchor.index()].kind, NodeKind::Content);
                        let d = self.alloc_node(NodeKind::Content, None);
                        mapping.add(anchor, d);
                        d
                    }
                };
                let dst = self.resolve_mut(dst);
                self.defer(dst, dest);
            }
        }
        self.verify();
        self.version != initial_version
    }

    /// Collects the mapped-or-content nodes reachable from `from` through
    /// defer edges, skipping over unmapped value nodes.
    ///
    /// Pass-through locals carry no information of their own: defer is
    /// transitive for escape propagation, and their collapsed points-to
    /// target is shared with `from` by the graph invariant, so the content
    /// closure picks it up separately.
    fn flatten_defer_targets(&self, from: CgNodeId, mapping: &NodeMap, out: &mut Vec<CgNodeId>) {
        let from = self.resolve(from);
        let mut visited = HashSet::new();
        let mut stack: Vec<CgNodeId> = self.nodes[from.index()]
            .defers_to
            .iter()
            .map(|&d| self.resolve(d))
            .collect();
        while let Some(target) = stack.pop() {
            if !visited.insert(target) {
                continue;
            }
            if mapping.contains(target) || self.nodes[target.index()].kind == NodeKind::Content {
                out.push(target);
                continue;
            }
            for &d in &self.nodes[target.index()].defers_to {
                stack.push(self.resolve(d));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, ValueId};

    fn graph() -> ConnectionGraph {
        ConnectionGraph::new(FunctionId::new(0), "test")
    }

    /// Builds a graph with three pointers, each with its own content node.
    fn three_pointers() -> (ConnectionGraph, [CgNodeId; 3], [CgNodeId; 3]) {
        let mut g = graph();
        let p: Vec<_> = (0..3).map(|i| g.value_node(ValueId::new(i))).collect();
        let c: Vec<_> = p.iter().map(|&p| g.content_node(p)).collect();
        (g, [p[0], p[1], p[2]], [c[0], c[1], c[2]])
    }

    #[test]
    fn test_schedule_to_merge_is_idempotent() {
        let (mut g, _, [c0, c1, _]) = three_pointers();
        g.schedule_to_merge(c0, c1);
        g.schedule_to_merge(c0, c1);
        assert_eq!(g.to_merge.len(), 1, "already-shared representatives are not rescheduled");
        g.merge_all_scheduled();
        g.verify();
        assert_eq!(g.resolve(c0), g.resolve(c1));
    }

    #[test]
    fn test_merge_redirects_edges_to_survivor() {
        let (mut g, [p0, p1, _], [c0, c1, _]) = three_pointers();
        g.schedule_to_merge(c0, c1);
        g.merge_all_scheduled();
        g.verify();

        let survivor = g.resolve(c0);
        assert_eq!(g.resolve(c1), survivor);
        assert_eq!(g.points_to_of(p0), Some(survivor));
        assert_eq!(g.points_to_of(p1), Some(survivor));
        assert!(!g.is_live(if survivor == c0 { c1 } else { c0 }));
    }

    #[test]
    fn test_merge_takes_state_maximum() {
        let (mut g, _, [c0, c1, _]) = three_pointers();
        g.raise_state(c0, EscapeState::Global);
        g.schedule_to_merge(c0, c1);
        g.merge_all_scheduled();
        assert_eq!(g.escape_state(c1), EscapeState::Global);
    }

    #[test]
    fn test_merge_unions_use_points() {
        let (mut g, _, [c0, c1, _]) = three_pointers();
        g.add_use_point(c0, crate::ir::InstId::new(0));
        g.add_use_point(c1, crate::ir::InstId::new(1));
        g.schedule_to_merge(c0, c1);
        g.merge_all_scheduled();

        let uses = g.use_points(c0);
        assert_eq!(uses.len(), 2);
    }

    #[test]
    fn test_merge_discovers_transitive_obligations() {
        // p0 -> c0 -> cc0 and p1 -> c1 -> cc1: merging c0 and c1 must also
        // merge cc0 and cc1 (their points-to targets).
        let (mut g, _, [c0, c1, _]) = three_pointers();
        let cc0 = g.content_node(c0);
        let cc1 = g.content_node(c1);
        assert_ne!(g.resolve(cc0), g.resolve(cc1));

        g.schedule_to_merge(c0, c1);
        g.merge_all_scheduled();
        g.verify();

        assert_eq!(g.resolve(c0), g.resolve(c1));
        assert_eq!(g.resolve(cc0), g.resolve(cc1), "content-of-content must fold too");
    }

    #[test]
    fn test_merge_chain_resolution_is_transitive() {
        let (mut g, _, [c0, c1, c2]) = three_pointers();
        g.schedule_to_merge(c0, c1);
        g.merge_all_scheduled();
        g.schedule_to_merge(c1, c2);
        g.merge_all_scheduled();

        // c0 was merged twice; full chain resolution must reach c2's
        // representative in one query.
        let root = g.resolve(c0);
        assert_eq!(root, g.resolve(c1));
        assert_eq!(root, g.resolve(c2));
        assert!(g.is_live(root));
    }

    /// Returns the partition of the given nodes into equivalence classes
    /// together with each class's state.
    fn partition(g: &ConnectionGraph, nodes: &[CgNodeId]) -> Vec<(Vec<usize>, EscapeState)> {
        let mut classes: Vec<(CgNodeId, Vec<usize>)> = Vec::new();
        for (i, &n) in nodes.iter().enumerate() {
            let root = g.resolve(n);
            if let Some(entry) = classes.iter_mut().find(|(r, _)| *r == root) {
                entry.1.push(i);
            } else {
                classes.push((root, vec![i]));
            }
        }
        let mut out: Vec<(Vec<usize>, EscapeState)> = classes
            .into_iter()
            .map(|(r, members)| (members, g.escape_state(r)))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        // Merging (c0,c1) then (result,c2) must yield the same partition
        // and states as (c1,c2) then (result,c0).
        let build = |order: &[(usize, usize)]| {
            let (mut g, _, contents) = three_pointers();
            g.raise_state(contents[1], EscapeState::Arguments);
            for &(a, b) in order {
                g.schedule_to_merge(contents[a], contents[b]);
                g.merge_all_scheduled();
            }
            g.verify();
            partition(&g, &contents)
        };

        let left = build(&[(0, 1), (0, 2)]);
        let right = build(&[(1, 2), (1, 0)]);
        assert_eq!(left, right);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].1, EscapeState::Arguments);

        let swapped = build(&[(1, 0), (2, 1)]);
        assert_eq!(left, swapped, "merge direction must not change the partition");
    }

    #[test]
    fn test_node_map_insertion_order_is_worklist_order() {
        let mut map = NodeMap::new();
        map.add(CgNodeId::new(4), CgNodeId::new(0));
        map.add(CgNodeId::new(2), CgNodeId::new(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.at(0), CgNodeId::new(4));
        assert_eq!(map.at(1), CgNodeId::new(2));
        assert_eq!(map.get(CgNodeId::new(4)), Some(CgNodeId::new(0)));
        assert!(map.contains(CgNodeId::new(2)));
        assert!(!map.contains(CgNodeId::new(9)));
    }

    #[test]
    fn test_merge_from_copies_argument_structure() {
        // Source: arg0 points to content which defers to arg1 (a callee
        // that stores arg1 into arg0's storage).
        let mut source = graph();
        let a0 = source.argument_node(0);
        let a1 = source.argument_node(1);
        let c = source.content_node(a0);
        source.defer(c, a1);

        // Destination: two locals passed as the actuals.
        let mut dest = graph();
        let x = dest.value_node(ValueId::new(0));
        let y = dest.value_node(ValueId::new(1));

        let mut map = NodeMap::new();
        map.add(a0, x);
        map.add(a1, y);
        let changed = dest.merge_from(&source, &mut map);
        assert!(changed);

        // x's content now defers to y.
        let cx = dest.content_node(x);
        dest.propagate_escape_states();
        dest.raise_state(x, EscapeState::Global);
        dest.propagate_escape_states();
        assert_eq!(dest.escape_state(cx), EscapeState::Global);
        assert_eq!(dest.escape_state(y), EscapeState::Global, "store target must escape with the storage");
    }

    #[test]
    fn test_merge_from_global_source_forces_global() {
        let mut source = graph();
        let a0 = source.argument_node(0);
        source.set_escapes_global(a0);
        source.propagate_escape_states();

        let mut dest = graph();
        let x = dest.value_node(ValueId::new(0));

        let mut map = NodeMap::new();
        map.add(a0, x);
        assert!(dest.merge_from(&source, &mut map));
        assert_eq!(dest.escape_state(x), EscapeState::Global);
    }

    #[test]
    fn test_merge_from_is_idempotent_with_same_mapping() {
        let mut source = graph();
        let a0 = source.argument_node(0);
        let c = source.content_node(a0);
        let cc = source.content_node(c);
        let _ = cc;

        let mut dest = graph();
        let x = dest.value_node(ValueId::new(0));

        let mut map = NodeMap::new();
        map.add(a0, x);
        assert!(dest.merge_from(&source, &mut map));
        let version = dest.version();

        // Re-merging with the established mapping must not grow the graph.
        let mut again = NodeMap::new();
        again.add(a0, x);
        for idx in 0..map.len() {
            let src = map.at(idx);
            if src != a0 {
                again.add(src, map.get(src).unwrap());
            }
        }
        assert!(!dest.merge_from(&source, &mut again));
        assert_eq!(dest.version(), version);
    }

    #[test]
    fn test_merge_from_flattens_pass_through_values() {
        // Source: ret defers to an unmapped local which defers to arg0.
        let mut source = graph();
        let a0 = source.argument_node(0);
        let local = source.value_node(ValueId::new(5));
        let ret = source.return_node();
        source.defer(ret, local);
        source.defer(local, a0);

        let mut dest = graph();
        let x = dest.value_node(ValueId::new(0));
        let r = dest.value_node(ValueId::new(1));

        let mut map = NodeMap::new();
        map.add(a0, x);
        map.add(ret, r);
        dest.merge_from(&source, &mut map);

        // The result value must defer directly to the actual argument.
        dest.raise_state(r, EscapeState::Global);
        dest.propagate_escape_states();
        assert_eq!(dest.escape_state(x), EscapeState::Global);
    }
}

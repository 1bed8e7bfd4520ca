//! Connection graph nodes and the escape state lattice.
//!
//! A node represents one of four things: a pointer-typed value, the memory
//! content a pointer may reference, a function argument, or the function's
//! return position. Nodes live in an arena owned by their
//! [`ConnectionGraph`](crate::analysis::escape::ConnectionGraph) and are
//! addressed by stable [`CgNodeId`] indices; merged (dead) nodes stay in the
//! arena and are resolved to their surviving representative through the
//! graph's merge chain.

use std::fmt;

use strum::{EnumCount, EnumIter};

use crate::ir::ValueId;
use crate::utils::BitSet;

/// A stable index addressing a node within one connection graph.
///
/// Ids are never invalidated: a node that has been merged away still has an
/// id, which resolves to the live representative via
/// [`ConnectionGraph::resolve`](crate::analysis::escape::ConnectionGraph::resolve).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CgNodeId(pub(crate) u32);

impl CgNodeId {
    /// Creates a `CgNodeId` from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: u32) -> Self {
        CgNodeId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CgNodeId({})", self.0)
    }
}

impl fmt::Display for CgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The role a node plays in the connection graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum NodeKind {
    /// A pointer value: an address, an object reference, or an aggregate
    /// containing references. An aggregate with several references is still
    /// one node - it may point to any of the referenced objects.
    Value,
    /// The memory content a pointer points to. All stored fields and
    /// elements of the referenced object collapse into this single node.
    Content,
    /// A function argument; a `Value` with caller-visible identity.
    Argument,
    /// The function's return position; also a special `Value`.
    Return,
}

impl NodeKind {
    /// Returns a short lowercase label, used in DOT output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            NodeKind::Value => "value",
            NodeKind::Content => "content",
            NodeKind::Argument => "arg",
            NodeKind::Return => "return",
        }
    }
}

/// Where a value escapes to. The order of variants is load-bearing: states
/// only ever increase, and combining two states takes the maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, EnumIter, EnumCount,
)]
pub enum EscapeState {
    /// The node's value does not escape its function.
    #[default]
    None,
    /// The node's value escapes through a function argument or the return
    /// value; callers can observe it, arbitrary code cannot.
    Arguments,
    /// The node's value escapes to global or unidentified memory.
    Global,
}

/// Which kind of edge a predecessor entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The predecessor has a points-to edge to this node.
    PointsTo,
    /// The predecessor has a defer edge to this node.
    Defer,
}

/// A node in the connection graph.
///
/// The `points_to` field is the *collapsed* points-to target: it is kept
/// consistent across the whole defer web a node belongs to, whether or not
/// a real edge exists. `points_to_is_edge` records whether it is also an
/// edge in the graph (with a matching entry in the target's predecessor
/// list); interior nodes of a defer web carry only the cached target.
#[derive(Debug, Clone)]
pub(crate) struct CgNode {
    /// The node kind.
    pub(crate) kind: NodeKind,
    /// The IR value this node was created for, if any. Only used for
    /// diagnostics and DOT labels; content nodes share the value of the
    /// pointer they were created under.
    pub(crate) value: Option<ValueId>,
    /// The collapsed points-to target. Always a `Content` node. May be a
    /// stale (merged) id; readers resolve it through the merge chain.
    pub(crate) points_to: Option<CgNodeId>,
    /// Whether `points_to` is materialized as a real edge.
    pub(crate) points_to_is_edge: bool,
    /// Outgoing defer edges.
    pub(crate) defers_to: Vec<CgNodeId>,
    /// Incoming edges of both kinds.
    pub(crate) preds: Vec<(CgNodeId, EdgeKind)>,
    /// The escape state; never decreases.
    pub(crate) state: EscapeState,
    /// Bits indexed into the graph's use-point table.
    pub(crate) use_points: BitSet,
    /// Transient marker for worklist algorithms.
    pub(crate) in_worklist: bool,
    /// Set once the node has been merged into another node. A merged node
    /// is permanently dead: it is unlinked from the graph and all access
    /// must go through the merge chain.
    pub(crate) merged: bool,
}

impl CgNode {
    pub(crate) fn new(kind: NodeKind, value: Option<ValueId>) -> Self {
        Self {
            kind,
            value,
            points_to: None,
            points_to_is_edge: false,
            defers_to: Vec::new(),
            preds: Vec::new(),
            state: EscapeState::None,
            use_points: BitSet::new(),
            in_worklist: false,
            merged: false,
        }
    }

    /// Raises the escape state to at least `other`. Returns `true` if the
    /// state changed.
    pub(crate) fn merge_escape_state(&mut self, other: EscapeState) -> bool {
        if other > self.state {
            self.state = other;
            true
        } else {
            false
        }
    }

    /// Returns the points-to target if it is materialized as an edge.
    pub(crate) fn points_to_edge(&self) -> Option<CgNodeId> {
        if self.points_to_is_edge {
            self.points_to
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_escape_state_order() {
        assert!(EscapeState::None < EscapeState::Arguments);
        assert!(EscapeState::Arguments < EscapeState::Global);
        assert_eq!(EscapeState::default(), EscapeState::None);
    }

    #[test]
    fn test_merge_escape_state_is_monotone() {
        // For every pair of states, merging never decreases the state and
        // reports a change exactly when the state increased.
        for initial in EscapeState::iter() {
            for incoming in EscapeState::iter() {
                let mut node = CgNode::new(NodeKind::Value, None);
                node.state = initial;
                let changed = node.merge_escape_state(incoming);
                assert!(node.state >= initial);
                assert!(node.state >= incoming);
                assert_eq!(changed, incoming > initial);
            }
        }
    }

    #[test]
    fn test_points_to_edge_requires_flag() {
        let mut node = CgNode::new(NodeKind::Value, None);
        node.points_to = Some(CgNodeId::new(3));
        assert_eq!(node.points_to_edge(), None);

        node.points_to_is_edge = true;
        assert_eq!(node.points_to_edge(), Some(CgNodeId::new(3)));
    }

    #[test]
    fn test_node_kind_labels() {
        for kind in NodeKind::iter() {
            assert!(!kind.label().is_empty());
        }
    }
}

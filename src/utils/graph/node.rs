//! Node identifier for directed graphs.

use std::fmt;

/// A strongly-typed identifier for nodes within a [`DirectedGraph`].
///
/// `NodeId` wraps a `usize` index. Ids are assigned sequentially starting
/// from 0 as nodes are added to a graph, so they can be used directly to
/// index per-node side tables.
///
/// [`DirectedGraph`]: crate::utils::graph::DirectedGraph
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_roundtrip() {
        let node = NodeId::new(42);
        assert_eq!(node.index(), 42);
        assert_eq!(usize::from(node), 42);
        assert_eq!(NodeId::from(42usize), node);
    }

    #[test]
    fn test_node_id_ordering_and_hash() {
        let mut nodes = vec![NodeId::new(3), NodeId::new(1), NodeId::new(2)];
        nodes.sort();
        assert_eq!(nodes, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]);

        let set: HashSet<NodeId> = nodes.into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_node_id_formatting() {
        let node = NodeId::new(7);
        assert_eq!(format!("{node:?}"), "NodeId(7)");
        assert_eq!(format!("{node}"), "n7");
    }
}

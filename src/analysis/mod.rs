//! Program analyses over the IR.
//!
//! Two analyses live here, one consuming the other:
//!
//! - [`callgraph`] - the direct-call graph with SCCs and bottom-up
//!   ordering
//! - [`escape`] - the interprocedural escape analysis: per-function
//!   connection graphs composed over the call graph
//!
//! # Usage
//!
//! ```rust,ignore
//! use refscope::analysis::escape::EscapeAnalysis;
//!
//! let mut analysis = EscapeAnalysis::new();
//! analysis.recompute(&module);
//!
//! let graph = analysis.connection_graph(&module, function).unwrap();
//! let node = graph.node_for(value).unwrap();
//! if !graph.escapes(node) {
//!     // the referent never outlives `function`
//! }
//! ```

pub mod callgraph;
pub mod escape;

pub use callgraph::{CallGraph, CallSite, CallTarget};
pub use escape::{CgNodeId, ConnectionGraph, EscapeAnalysis, EscapeState, NodeKind};

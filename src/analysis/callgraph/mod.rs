//! Direct-call graph of a module.
//!
//! The call graph is the ordering collaborator of the interprocedural
//! escape analysis: its SCCs define the bottom-up processing order
//! (callees summarized before callers), and its reverse edges identify the
//! callers to refresh when a summary changes.
//!
//! # Key Types
//!
//! - [`CallGraph`] - the graph, with SCC and bottom-up order queries
//! - [`CallSite`] / [`CallTarget`] - call instructions and their
//!   resolution state
//! - [`CallGraphStats`] - aggregate metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use refscope::analysis::callgraph::CallGraph;
//!
//! let callgraph = CallGraph::build(&module);
//! for &f in callgraph.bottom_up_order() {
//!     // callees come before callers here
//! }
//! ```

mod graph;
mod site;

pub use graph::{CallGraph, CallGraphNode, CallGraphStats};
pub use site::{CallSite, CallTarget};

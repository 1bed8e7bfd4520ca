//! Convenient re-exports of the most commonly used types and traits.
//!
//! This module provides a curated selection of the most frequently used
//! types from across the library, allowing for convenient glob imports.
//!
//! # Example
//!
//! ```rust,no_run
//! use refscope::prelude::*;
//!
//! let mut module = Module::new();
//! let f = module.declare_function("f", vec![], Type::Void, FunctionFlags::empty())?;
//! let mut b = FunctionBuilder::new(vec![]);
//! b.ret(None);
//! module.define_function(f, b.finish())?;
//!
//! let mut analysis = EscapeAnalysis::new();
//! analysis.recompute(&module);
//! # Ok::<(), refscope::Error>(())
//! ```

// Core error handling
pub use crate::{Error, Result};

// IR construction
pub use crate::ir::{
    Callee, Function, FunctionBuilder, FunctionFlags, FunctionId, GlobalId, InstId, Instruction,
    Module, Type, ValueId,
};

// Call graph
pub use crate::analysis::callgraph::{CallGraph, CallGraphStats, CallSite, CallTarget};

// Escape analysis
pub use crate::analysis::escape::{
    AnalysisState, CgNodeId, ConnectionGraph, EscapeAnalysis, EscapeState, NodeKind,
};

// Utilities
pub use crate::utils::{escape_dot, BitSet};

// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # refscope
//!
//! [![Crates.io](https://img.shields.io/crates/v/refscope.svg)](https://crates.io/crates/refscope)
//! [![Documentation](https://docs.rs/refscope/badge.svg)](https://docs.rs/refscope)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/refscope/blob/main/LICENSE-APACHE)
//!
//! An interprocedural escape analysis for a compact pointer IR, built in pure Rust.
//! `refscope` determines, for every IR value that behaves like a pointer, whether the
//! storage it references can be observed outside the function that created it - and if
//! so, whether it leaks only through arguments and return values or escapes to global
//! memory. Reference-count elimination, stack promotion, and alias-based scheduling all
//! hang off this answer.
//!
//! ## Features
//!
//! - **🔗 Connection graphs** - Per-function points-to/defer graphs with an
//!   invariant-preserving merge engine (Choi et al.'s escape analysis model)
//! - **🌐 Interprocedural composition** - Callee summaries folded bottom-up over the
//!   call graph SCCs, bounded by a deterministic merge budget
//! - **🧮 Three-point escape lattice** - `None < Arguments < Global`, monotone by
//!   construction
//! - **📦 Compact IR collaborator** - A closed, value-based instruction set with a
//!   builder API for constructing modules programmatically
//! - **♻️ Invalidation-aware caching** - Per-function results rebuilt on demand after
//!   IR mutation
//! - **📊 DOT export** - Connection graphs and call graphs render to Graphviz for
//!   inspection
//!
//! ## Quick Start
//!
//! Add `refscope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! refscope = "0.2"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust,no_run
//! use refscope::prelude::*;
//!
//! let mut module = Module::new();
//! let f = module.declare_function("make", vec![], Type::Ref, FunctionFlags::empty())?;
//!
//! let mut b = FunctionBuilder::new(vec![]);
//! let obj = b.alloc();
//! b.ret(Some(obj));
//! module.define_function(f, b.finish())?;
//!
//! let mut analysis = EscapeAnalysis::new();
//! analysis.recompute(&module);
//!
//! let graph = analysis.connection_graph(&module, f).unwrap();
//! let node = graph.node_for(obj).unwrap();
//! assert!(graph.escapes(node)); // returned, so visible to the caller
//! # Ok::<(), refscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `refscope` is organized into three layers:
//!
//! - [`ir`] - The intermediate representation: typed values, a closed instruction
//!   catalog, functions, and modules. The analysis only ever asks it for operands,
//!   instruction kinds, and statically resolvable callees.
//! - [`analysis`] - The analyses proper: [`analysis::callgraph`] builds direct-call
//!   graphs with SCC and bottom-up ordering; [`analysis::escape`] is the connection
//!   graph engine and the interprocedural driver.
//! - [`utils`] - Generic infrastructure: growable bit sets, a directed graph with
//!   Tarjan SCCs, DOT helpers.
//!
//! ### The Analysis Model
//!
//! Each function gets a *connection graph* relating pointer values, the memory
//! content they may reference, arguments, and the return position. Assignments add
//! *defer* edges; dereferences add *points-to* edges into per-object *content* nodes
//! (one per object - fields are not distinguished). The central invariant: every
//! defer path out of a node reaches the same content node; the merge engine restores
//! it after every mutation by folding content nodes together. Escape states then
//! propagate along all edges to a fixpoint.
//!
//! For calls with statically known callees, the callee's *summary graph* (its
//! argument/return structure) is merged into the caller at the call site, bottom-up
//! over call graph SCCs. Calls that cannot be resolved mark their pointer operands
//! as globally escaping instead. Recursion is handled with a fixed merge budget per
//! function; exhausting it falls back to a conservative summary.
//!
//! ## Error Handling
//!
//! All IR construction returns [`Result<T, Error>`](Result). The analyses never
//! fail: unknown callees and exhausted merge budgets produce conservative results,
//! not errors.
//!
//! ```rust,no_run
//! use refscope::{Error, ir::{Module, Type, FunctionFlags}};
//!
//! let mut module = Module::new();
//! match module.declare_function("f", vec![], Type::Void, FunctionFlags::empty()) {
//!     Ok(id) => println!("declared {id}"),
//!     Err(Error::DuplicateFunction(name)) => println!("`{name}` already declared"),
//!     Err(e) => println!("error: {e}"),
//! }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! cargo bench  # criterion benchmarks over synthetic modules
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use refscope::prelude::*;
///
/// let module = Module::new();
/// let mut analysis = EscapeAnalysis::new();
/// analysis.recompute(&module);
/// ```
pub mod prelude;

/// The intermediate representation: types, values, instructions, functions,
/// and modules.
///
/// See the [`ir`] module documentation for the construction workflow.
pub mod ir;

/// Program analyses: the call graph collaborator and the escape analysis
/// engine.
///
/// # Key Types
///
/// - [`analysis::escape::EscapeAnalysis`] - the analysis context (cache,
///   recompute, invalidation)
/// - [`analysis::escape::ConnectionGraph`] - per-function escape graph
/// - [`analysis::callgraph::CallGraph`] - direct-call graph with SCCs
pub mod analysis;

/// Shared utility infrastructure: bit sets, generic graphs, DOT helpers.
pub mod utils;

/// `refscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. Used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `refscope` Error type
///
/// The main error type for all operations in this crate. Errors only arise during IR
/// construction and validation; the analyses are total.
pub use error::Error;

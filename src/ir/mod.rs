//! The intermediate representation consumed by the analyses.
//!
//! This IR is the minimal collaborator an escape analysis needs: typed
//! values, a closed instruction catalog, and a module container. It is
//! value-based and flow-insensitive - functions are flat instruction lists,
//! control-flow joins appear as [`Instruction::Select`] - because the
//! analysis itself is flow-insensitive and never inspects block structure.
//!
//! # Construction
//!
//! ```rust,ignore
//! use refscope::ir::{FunctionBuilder, FunctionFlags, Module, Type};
//!
//! let mut module = Module::new();
//! let f = module.declare_function(
//!     "make",
//!     vec![],
//!     Type::Ref,
//!     FunctionFlags::empty(),
//! )?;
//!
//! let mut b = FunctionBuilder::new(vec![]);
//! let obj = b.alloc();
//! b.ret(Some(obj));
//! module.define_function(f, b.finish())?;
//! # Ok::<(), refscope::Error>(())
//! ```
//!
//! # Key Types
//!
//! - [`Module`] - the unit of analysis, owning functions and globals
//! - [`Function`] / [`FunctionBuilder`] - declare/define function bodies
//! - [`Instruction`] - the closed instruction sum type
//! - [`Type`] - value types with pointer-likeness classification
//! - [`ValueId`], [`InstId`], [`FunctionId`], [`GlobalId`] - identifiers

mod function;
mod instruction;
mod module;
mod types;
mod value;

pub use function::{Function, FunctionBody, FunctionBuilder, FunctionFlags};
pub use instruction::{Callee, Instruction};
pub use module::{FunctionId, Global, GlobalId, Module};
pub use types::Type;
pub use value::{InstId, ValueDef, ValueId, ValueInfo};

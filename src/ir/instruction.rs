//! The IR instruction set.
//!
//! A single closed sum type covers every operation the analysis can see.
//! The catalog is deliberately small: it is the minimal set of shapes an
//! escape analysis distinguishes - allocation, aliasing, projection, memory
//! access, calls, returns, lifetime ends, and a black box for everything
//! else. A front end lowering a richer instruction set maps each of its
//! operations onto one of these shapes (most of them onto `Unknown` or
//! `Copy`).
//!
//! The IR is value-based and flow-insensitive: instructions form a flat
//! list per function, with no basic blocks. Control-flow joins are
//! expressed with [`Instruction::Select`], which the analysis reads as a
//! set of simultaneous assignments.

use std::fmt;

use crate::ir::{FunctionId, GlobalId, ValueId};

/// The callee of a [`Instruction::Call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// A statically resolved call to a function in the same module.
    Direct(FunctionId),
    /// A call through a function value; the target is unknown.
    Indirect(ValueId),
    /// A call to a function outside the module, identified by name.
    External(String),
}

/// An IR instruction.
///
/// Every variant that produces a value names its `result` explicitly; the
/// result's type is recorded in the enclosing function's value table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Allocates a new object; `result` is a reference to it.
    Alloc {
        /// The reference to the freshly allocated object.
        result: ValueId,
    },

    /// Assigns `source` to `result` (`result = source`).
    Copy {
        /// The copy of the value.
        result: ValueId,
        /// The value being copied.
        source: ValueId,
    },

    /// Extracts a member out of an aggregate *value*.
    ///
    /// The result aliases the containing value: the analysis resolves it to
    /// the node of the outermost value `base` projects from. No field-level
    /// nodes exist.
    Project {
        /// The projected member.
        result: ValueId,
        /// The aggregate value being projected.
        base: ValueId,
    },

    /// Takes the address of a field or element of a referenced *object*.
    ///
    /// Unlike `Project`, this introduces an indirection: the result is a
    /// pointer into the object's storage, so it points to the object's
    /// content rather than aliasing the reference itself.
    FieldAddr {
        /// The interior pointer.
        result: ValueId,
        /// The object reference whose storage is addressed.
        object: ValueId,
    },

    /// Loads from a storage location (`result = *address`).
    Load {
        /// The loaded value.
        result: ValueId,
        /// The address or reference loaded through.
        address: ValueId,
    },

    /// Stores into a storage location (`*address = value`).
    Store {
        /// The address or reference stored through.
        address: ValueId,
        /// The value being stored.
        value: ValueId,
    },

    /// A phi-like join of several values (`result = one of operands`).
    Select {
        /// The joined value.
        result: ValueId,
        /// The values flowing into the join.
        operands: Vec<ValueId>,
    },

    /// Produces the address of a module-global variable.
    ///
    /// Anything reachable through a global is observable by the whole
    /// program, so the result escapes globally by definition.
    GlobalAddr {
        /// The address of the global.
        result: ValueId,
        /// The global variable.
        global: GlobalId,
    },

    /// Calls a function.
    Call {
        /// The returned value, if the callee returns one.
        result: Option<ValueId>,
        /// The call target.
        callee: Callee,
        /// The actual arguments.
        args: Vec<ValueId>,
    },

    /// Returns from the function.
    Return {
        /// The returned value, if any.
        value: Option<ValueId>,
    },

    /// Ends the lifetime of a value (a release in a reference-counted IR).
    ///
    /// No escape effect, but recorded as a use point for liveness clients.
    Drop {
        /// The value whose lifetime ends.
        value: ValueId,
    },

    /// An operation the analysis knows nothing about.
    ///
    /// Every pointer-like operand and the result are treated as escaping
    /// globally.
    Unknown {
        /// The produced value, if any.
        result: Option<ValueId>,
        /// The consumed values.
        operands: Vec<ValueId>,
    },
}

impl Instruction {
    /// Appends every operand value of this instruction to `out`.
    ///
    /// For calls this includes the arguments and, for indirect calls, the
    /// callee value.
    pub fn operands(&self, out: &mut Vec<ValueId>) {
        match self {
            Instruction::Alloc { .. } => {}
            Instruction::Copy { source, .. } => out.push(*source),
            Instruction::Project { base, .. } => out.push(*base),
            Instruction::FieldAddr { object, .. } => out.push(*object),
            Instruction::Load { address, .. } => out.push(*address),
            Instruction::Store { address, value } => {
                out.push(*address);
                out.push(*value);
            }
            Instruction::Select { operands, .. } => out.extend_from_slice(operands),
            Instruction::GlobalAddr { .. } => {}
            Instruction::Call { callee, args, .. } => {
                out.extend_from_slice(args);
                if let Callee::Indirect(value) = callee {
                    out.push(*value);
                }
            }
            Instruction::Return { value } => out.extend(value.iter().copied()),
            Instruction::Drop { value } => out.push(*value),
            Instruction::Unknown { operands, .. } => out.extend_from_slice(operands),
        }
    }

    /// Returns the value this instruction defines, if any.
    #[must_use]
    pub fn result(&self) -> Option<ValueId> {
        match self {
            Instruction::Alloc { result }
            | Instruction::Copy { result, .. }
            | Instruction::Project { result, .. }
            | Instruction::FieldAddr { result, .. }
            | Instruction::Load { result, .. }
            | Instruction::Select { result, .. }
            | Instruction::GlobalAddr { result, .. } => Some(*result),
            Instruction::Call { result, .. } | Instruction::Unknown { result, .. } => *result,
            Instruction::Store { .. } | Instruction::Return { .. } | Instruction::Drop { .. } => {
                None
            }
        }
    }

    /// Returns the statically resolved callee, if this is a direct call.
    #[must_use]
    pub fn direct_callee(&self) -> Option<FunctionId> {
        match self {
            Instruction::Call {
                callee: Callee::Direct(f),
                ..
            } => Some(*f),
            _ => None,
        }
    }

    /// Returns a short mnemonic for the instruction kind.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Alloc { .. } => "alloc",
            Instruction::Copy { .. } => "copy",
            Instruction::Project { .. } => "project",
            Instruction::FieldAddr { .. } => "field_addr",
            Instruction::Load { .. } => "load",
            Instruction::Store { .. } => "store",
            Instruction::Select { .. } => "select",
            Instruction::GlobalAddr { .. } => "global_addr",
            Instruction::Call { .. } => "call",
            Instruction::Return { .. } => "return",
            Instruction::Drop { .. } => "drop",
            Instruction::Unknown { .. } => "unknown",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result() {
            write!(f, "{result} = ")?;
        }
        write!(f, "{}", self.mnemonic())?;
        let mut operands = Vec::new();
        self.operands(&mut operands);
        for (i, op) in operands.iter().enumerate() {
            write!(f, "{}{op}", if i == 0 { " " } else { ", " })?;
        }
        Ok(())
    }
}

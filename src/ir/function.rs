//! Functions and the builder used to construct their bodies.
//!
//! A [`Function`] is a flat list of instructions plus a value table. Bodies
//! are constructed through [`FunctionBuilder`], which hands out [`ValueId`]s
//! as instructions are emitted and keeps the value table consistent with
//! the instruction list by construction. Cross-function properties (callee
//! existence, arity) are checked later by
//! [`Module::define_function`](crate::ir::Module::define_function).

use bitflags::bitflags;

use crate::ir::{Callee, GlobalId, InstId, Instruction, Type, ValueDef, ValueId, ValueInfo};

bitflags! {
    /// Attributes of a function declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctionFlags: u8 {
        /// The function is defined outside the module. It never has a body
        /// and calls to it are treated as black boxes by the analysis.
        const EXTERNAL = 1 << 0;
    }
}

/// A function: signature, attributes, and (once defined) a body.
#[derive(Debug, Clone)]
pub struct Function {
    /// The function name, unique within its module.
    pub(crate) name: String,
    /// Parameter types, in order.
    pub(crate) params: Vec<Type>,
    /// The return type (`Type::Void` for procedures).
    pub(crate) return_type: Type,
    /// Declaration attributes.
    pub(crate) flags: FunctionFlags,
    /// Per-value metadata; empty until the function is defined.
    pub(crate) values: Vec<ValueInfo>,
    /// The instruction list; empty until the function is defined.
    pub(crate) insts: Vec<Instruction>,
}

impl Function {
    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parameter types.
    #[must_use]
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Returns the return type.
    #[must_use]
    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    /// Returns `true` if the function is external to the module.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.flags.contains(FunctionFlags::EXTERNAL)
    }

    /// Returns `true` if a body has been defined.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !self.values.is_empty() || !self.insts.is_empty()
    }

    /// Returns `true` if the returned value may hold a reference.
    #[must_use]
    pub fn returns_pointer_like(&self) -> bool {
        self.return_type.is_pointer_like()
    }

    /// Returns the metadata of a value.
    ///
    /// # Panics
    ///
    /// Panics if the value id does not belong to this function.
    #[must_use]
    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.index()]
    }

    /// Returns the number of values in the function.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the `ValueId` of the n-th argument, or `None` if out of
    /// range.
    #[must_use]
    pub fn argument(&self, index: usize) -> Option<ValueId> {
        if index < self.params.len() && self.is_defined() {
            Some(ValueId::new(index as u32))
        } else {
            None
        }
    }

    /// Returns an iterator over the instructions with their ids.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.insts
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstId::new(i as u32), inst))
    }

    /// Returns the instruction with the given id, if any.
    #[must_use]
    pub fn instruction(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index())
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }
}

/// A finished function body, produced by [`FunctionBuilder::finish`] and
/// consumed by [`Module::define_function`](crate::ir::Module::define_function).
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub(crate) values: Vec<ValueInfo>,
    pub(crate) insts: Vec<Instruction>,
}

/// Builds a function body instruction by instruction.
///
/// The builder is infallible: every emission method appends and returns the
/// defined value. Validation against the module (callee arity, value
/// ranges) happens when the body is installed.
///
/// # Example
///
/// ```rust,ignore
/// use refscope::ir::{FunctionBuilder, Type};
///
/// // fn leak(p: Ref) -> Ref { return p; }
/// let mut b = FunctionBuilder::new(vec![Type::Ref], Type::Ref);
/// let p = b.arg(0);
/// b.ret(Some(p));
/// let body = b.finish();
/// ```
#[derive(Debug)]
pub struct FunctionBuilder {
    params: Vec<Type>,
    values: Vec<ValueInfo>,
    insts: Vec<Instruction>,
}

impl FunctionBuilder {
    /// Creates a builder for a function with the given parameter types.
    ///
    /// Argument values are materialized immediately and can be fetched with
    /// [`FunctionBuilder::arg`].
    #[must_use]
    pub fn new(params: Vec<Type>) -> Self {
        let values = params
            .iter()
            .enumerate()
            .map(|(i, ty)| ValueInfo {
                ty: ty.clone(),
                def: ValueDef::Argument(i as u16),
            })
            .collect();
        Self {
            params,
            values,
            insts: Vec::new(),
        }
    }

    /// Returns the value of the n-th argument.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn arg(&self, index: usize) -> ValueId {
        assert!(index < self.params.len(), "argument index out of range");
        ValueId::new(index as u32)
    }

    fn push_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId::new(self.values.len() as u32);
        self.values.push(ValueInfo {
            ty,
            def: ValueDef::Inst(InstId::new(self.insts.len() as u32)),
        });
        id
    }

    /// Emits `alloc`: allocates a new object and returns the reference.
    pub fn alloc(&mut self) -> ValueId {
        let result = self.push_value(Type::Ref);
        self.insts.push(Instruction::Alloc { result });
        result
    }

    /// Emits `copy`: the result has the same type as the source.
    pub fn copy(&mut self, source: ValueId) -> ValueId {
        let ty = self.values[source.index()].ty.clone();
        let result = self.push_value(ty);
        self.insts.push(Instruction::Copy { result, source });
        result
    }

    /// Emits `project`: extracts a member of type `ty` out of an aggregate
    /// value.
    pub fn project(&mut self, base: ValueId, ty: Type) -> ValueId {
        let result = self.push_value(ty);
        self.insts.push(Instruction::Project { result, base });
        result
    }

    /// Emits `field_addr`: an interior pointer into a referenced object.
    pub fn field_addr(&mut self, object: ValueId) -> ValueId {
        let result = self.push_value(Type::Ptr);
        self.insts.push(Instruction::FieldAddr { result, object });
        result
    }

    /// Emits `load`: reads a value of type `ty` through an address.
    pub fn load(&mut self, address: ValueId, ty: Type) -> ValueId {
        let result = self.push_value(ty);
        self.insts.push(Instruction::Load { result, address });
        result
    }

    /// Emits `store`: writes `value` through `address`.
    pub fn store(&mut self, address: ValueId, value: ValueId) {
        self.insts.push(Instruction::Store { address, value });
    }

    /// Emits `select`: joins several values of the same type.
    ///
    /// # Panics
    ///
    /// Panics if `operands` is empty.
    pub fn select(&mut self, operands: Vec<ValueId>) -> ValueId {
        assert!(!operands.is_empty(), "select needs at least one operand");
        let ty = self.values[operands[0].index()].ty.clone();
        let result = self.push_value(ty);
        self.insts.push(Instruction::Select { result, operands });
        result
    }

    /// Emits `global_addr`: the address of a module global.
    pub fn global_addr(&mut self, global: GlobalId) -> ValueId {
        let result = self.push_value(Type::Ptr);
        self.insts.push(Instruction::GlobalAddr { result, global });
        result
    }

    /// Emits `call`. Returns the result value, or `None` for a `Void`
    /// result type.
    pub fn call(&mut self, callee: Callee, args: Vec<ValueId>, result_type: Type) -> Option<ValueId> {
        let result = if result_type.is_void() {
            None
        } else {
            Some(self.push_value(result_type))
        };
        self.insts.push(Instruction::Call {
            result,
            callee,
            args,
        });
        result
    }

    /// Emits `return`.
    pub fn ret(&mut self, value: Option<ValueId>) {
        self.insts.push(Instruction::Return { value });
    }

    /// Emits `drop`: ends the lifetime of a value.
    pub fn drop_value(&mut self, value: ValueId) {
        self.insts.push(Instruction::Drop { value });
    }

    /// Emits `unknown`: a black-box operation. Returns the result value if
    /// a result type is given.
    pub fn unknown(&mut self, operands: Vec<ValueId>, result_type: Option<Type>) -> Option<ValueId> {
        let result = result_type.map(|ty| self.push_value(ty));
        self.insts.push(Instruction::Unknown { result, operands });
        result
    }

    /// Finishes the body.
    #[must_use]
    pub fn finish(self) -> FunctionBody {
        FunctionBody {
            values: self.values,
            insts: self.insts,
        }
    }
}

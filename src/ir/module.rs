//! The module: the unit of analysis.
//!
//! A [`Module`] owns functions and globals. Construction is two-phase:
//! functions are *declared* first (establishing their [`FunctionId`]s, so
//! call instructions can reference functions declared later, including
//! mutually recursive ones), then *defined* by installing a body built with
//! [`FunctionBuilder`](crate::ir::FunctionBuilder). Definition is where IR
//! validation happens: value ranges, callee existence, arity, and
//! pointer-likeness agreement across call boundaries.

use std::collections::HashMap;
use std::fmt;

use crate::ir::{Callee, Function, FunctionBody, FunctionFlags, Instruction, Type};
use crate::{Error, Result};

/// A module-level identifier for a function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    /// Creates a `FunctionId` from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: u32) -> Self {
        FunctionId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionId({})", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// A module-level identifier for a global variable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub(crate) u32);

impl GlobalId {
    /// Creates a `GlobalId` from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: u32) -> Self {
        GlobalId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalId({})", self.0)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A module-global variable.
#[derive(Debug, Clone)]
pub struct Global {
    /// The global's name, unique within the module.
    pub name: String,
    /// The type of the stored value.
    pub ty: Type,
}

/// A collection of functions and globals.
#[derive(Debug, Default)]
pub struct Module {
    functions: Vec<Function>,
    globals: Vec<Global>,
    function_names: HashMap<String, FunctionId>,
    global_names: HashMap<String, GlobalId>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a function and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateFunction`] if the name is already taken.
    pub fn declare_function(
        &mut self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        flags: FunctionFlags,
    ) -> Result<FunctionId> {
        if self.function_names.contains_key(name) {
            return Err(Error::DuplicateFunction(name.to_string()));
        }
        let id = FunctionId::new(self.functions.len() as u32);
        self.functions.push(Function {
            name: name.to_string(),
            params,
            return_type,
            flags,
            values: Vec::new(),
            insts: Vec::new(),
        });
        self.function_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declares a global variable and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateGlobal`] if the name is already taken.
    pub fn declare_global(&mut self, name: &str, ty: Type) -> Result<GlobalId> {
        if self.global_names.contains_key(name) {
            return Err(Error::DuplicateGlobal(name.to_string()));
        }
        let id = GlobalId::new(self.globals.len() as u32);
        self.globals.push(Global {
            name: name.to_string(),
            ty,
        });
        self.global_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Installs (or replaces) the body of a declared function.
    ///
    /// Validates the body against the module: every value reference must be
    /// in range, call targets must exist with matching arity, and values
    /// crossing call and return boundaries must agree on pointer-likeness.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown or external, or if the body
    /// fails validation. On error the function is left unchanged.
    pub fn define_function(&mut self, id: FunctionId, body: FunctionBody) -> Result<()> {
        let Some(function) = self.functions.get(id.index()) else {
            return Err(invalid_ir!("unknown function id {}", id));
        };
        if function.is_external() {
            return Err(invalid_ir!(
                "cannot define body of external function `{}`",
                function.name
            ));
        }
        self.validate_body(function, &body)?;

        let function = &mut self.functions[id.index()];
        function.values = body.values;
        function.insts = body.insts;
        Ok(())
    }

    fn validate_body(&self, function: &Function, body: &FunctionBody) -> Result<()> {
        if body.values.len() < function.params.len() {
            return Err(invalid_ir!(
                "body of `{}` is missing argument values",
                function.name
            ));
        }

        let mut operands = Vec::new();
        for (idx, inst) in body.insts.iter().enumerate() {
            operands.clear();
            inst.operands(&mut operands);
            for op in operands.iter().chain(inst.result().iter()) {
                if op.index() >= body.values.len() {
                    return Err(invalid_ir!(
                        "instruction {idx} of `{}` references value {op} out of range",
                        function.name
                    ));
                }
            }

            match inst {
                Instruction::Call {
                    result,
                    callee: Callee::Direct(target),
                    args,
                } => {
                    let Some(callee) = self.functions.get(target.index()) else {
                        return Err(invalid_ir!(
                            "call in `{}` targets unknown function {target}",
                            function.name
                        ));
                    };
                    if args.len() != callee.params.len() {
                        return Err(Error::ArityMismatch {
                            caller: function.name.clone(),
                            callee: callee.name.clone(),
                            expected: callee.params.len(),
                            found: args.len(),
                        });
                    }
                    for (arg, param) in args.iter().zip(callee.params.iter()) {
                        if body.values[arg.index()].ty.is_pointer_like() != param.is_pointer_like()
                        {
                            return Err(invalid_ir!(
                                "call from `{}` to `{}` passes {arg} with mismatched pointer-likeness",
                                function.name,
                                callee.name
                            ));
                        }
                    }
                    if let Some(result) = result {
                        if body.values[result.index()].ty.is_pointer_like()
                            != callee.return_type.is_pointer_like()
                        {
                            return Err(invalid_ir!(
                                "call from `{}` to `{}` binds a result with mismatched pointer-likeness",
                                function.name,
                                callee.name
                            ));
                        }
                    }
                }
                Instruction::GlobalAddr { global, .. } => {
                    if global.index() >= self.globals.len() {
                        return Err(invalid_ir!(
                            "global_addr in `{}` references unknown global {global}",
                            function.name
                        ));
                    }
                }
                Instruction::Return { value } => {
                    if value.is_some() == function.return_type.is_void() {
                        return Err(invalid_ir!(
                            "return in `{}` disagrees with the declared return type",
                            function.name
                        ));
                    }
                    if let Some(value) = value {
                        if body.values[value.index()].ty.is_pointer_like()
                            != function.return_type.is_pointer_like()
                        {
                            return Err(invalid_ir!(
                                "return in `{}` has mismatched pointer-likeness",
                                function.name
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns a function by id, or `None` if out of range.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Looks a function up by name.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.function_names.get(name).copied()
    }

    /// Returns a global by id, or `None` if out of range.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.index())
    }

    /// Returns the number of functions (declared or defined).
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Returns an iterator over `(id, function)` pairs.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId::new(i as u32), f))
    }

    /// Returns an iterator over the ids of all functions.
    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        (0..self.functions.len() as u32).map(FunctionId::new)
    }
}

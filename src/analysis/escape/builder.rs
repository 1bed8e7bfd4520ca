//! Intraprocedural connection graph construction.
//!
//! The builder walks every instruction of a function exactly once and
//! translates it into graph structure:
//!
//! - `copy`/`select` become defer edges between value nodes,
//! - `load`/`store` become defer edges through the address's content node,
//! - `field_addr` introduces a points-to edge into the object's content,
//! - `project` aliases the projected value to its base node,
//! - `global_addr` and calls without a statically visible callee mark
//!   everything pointer-like as globally escaping,
//! - calls with a resolved, defined callee are only *recorded*; their
//!   effect is applied later by the interprocedural driver, which merges
//!   the callee's summary graph at the site.
//!
//! Values whose type cannot hold a reference never get a node.

use crate::analysis::callgraph::{CallSite, CallTarget};
use crate::analysis::escape::graph::ConnectionGraph;
use crate::ir::{Callee, Function, FunctionId, Instruction, Module, ValueId};

/// Builds the connection graph for one function, returning the graph and
/// the call sites whose effect was deferred to the interprocedural pass.
pub(crate) fn build_connection_graph(
    module: &Module,
    id: FunctionId,
) -> (ConnectionGraph, Vec<CallSite>) {
    let function = module
        .function(id)
        .expect("building a graph for an unknown function");
    let mut graph = ConnectionGraph::new(id, function.name());
    let mut known_callees = Vec::new();

    if !function.is_defined() {
        return (graph, known_callees);
    }

    for (index, ty) in function.params().iter().enumerate() {
        if ty.is_pointer_like() {
            let value = function.argument(index).expect("argument value exists");
            graph.make_argument(index, value);
        }
    }
    if function.returns_pointer_like() {
        graph.return_node();
    }

    let mut b = Builder {
        graph: &mut graph,
        function,
        module,
    };
    for (inst_id, inst) in function.instructions() {
        match inst {
            Instruction::Alloc { result } => {
                b.graph.value_node(*result);
            }
            Instruction::Copy { result, source } => {
                if b.pointer_like(*result) {
                    let result = b.node(*result);
                    let source = b.node(*source);
                    b.graph.defer(result, source);
                }
            }
            Instruction::Project { result, base } => {
                if b.pointer_like(*result) {
                    let base = b.node(*base);
                    b.graph.map_value(*result, base);
                }
            }
            Instruction::FieldAddr { result, object } => {
                if b.pointer_like(*object) {
                    let object = b.node(*object);
                    let content = b.graph.content_node(object);
                    let result = b.node(*result);
                    b.graph.point_to(result, content);
                } else {
                    b.escape_value(*result);
                }
            }
            Instruction::Load { result, address } => {
                if b.pointer_like(*result) {
                    if b.pointer_like(*address) {
                        let address = b.node(*address);
                        let content = b.graph.content_node(address);
                        let result = b.node(*result);
                        b.graph.defer(result, content);
                    } else {
                        b.escape_value(*result);
                    }
                }
            }
            Instruction::Store { address, value } => {
                if b.pointer_like(*value) {
                    if b.pointer_like(*address) {
                        let address = b.node(*address);
                        let content = b.graph.content_node(address);
                        let value = b.node(*value);
                        b.graph.defer(content, value);
                    } else {
                        b.escape_value(*value);
                    }
                }
            }
            Instruction::Select { result, operands } => {
                if b.pointer_like(*result) {
                    let result_node = b.node(*result);
                    for &op in operands {
                        if b.pointer_like(op) {
                            let op = b.node(op);
                            b.graph.defer(result_node, op);
                        }
                    }
                }
            }
            Instruction::GlobalAddr { result, .. } => {
                b.escape_value(*result);
            }
            Instruction::Call {
                result,
                callee,
                args,
            } => {
                let target = b.resolve_callee(callee);
                if let CallTarget::Resolved(_) = target {
                    // The callee's effect is merged in later; make sure the
                    // nodes the merge will bind to exist now.
                    for &arg in args {
                        if b.pointer_like(arg) {
                            b.node(arg);
                        }
                    }
                    if let Some(result) = result {
                        if b.pointer_like(*result) {
                            b.node(*result);
                        }
                    }
                    known_callees.push(CallSite::new(inst_id, target));
                } else {
                    b.escape_all(inst);
                }
            }
            Instruction::Return { value } => {
                if let Some(value) = value {
                    if b.pointer_like(*value) {
                        let ret = b.graph.return_node();
                        let value = b.node(*value);
                        b.graph.defer(ret, value);
                    }
                }
            }
            Instruction::Drop { .. } => {}
            Instruction::Unknown { .. } => {
                b.escape_all(inst);
            }
        }
    }

    graph.propagate_escape_states();
    graph.verify();
    (graph, known_callees)
}

/// Per-function build state: the graph under construction plus the lookups
/// the instruction walk needs.
struct Builder<'a> {
    graph: &'a mut ConnectionGraph,
    function: &'a Function,
    module: &'a Module,
}

impl Builder<'_> {
    fn pointer_like(&self, value: ValueId) -> bool {
        self.function.value(value).is_pointer_like()
    }

    fn node(&mut self, value: ValueId) -> crate::analysis::escape::CgNodeId {
        self.graph.value_node(value)
    }

    /// Marks a pointer-like value as escaping to global memory.
    fn escape_value(&mut self, value: ValueId) {
        if self.pointer_like(value) {
            let node = self.node(value);
            self.graph.set_escapes_global(node);
        }
    }

    /// Conservatively marks every pointer-like operand and result of a
    /// black-box instruction as globally escaping.
    fn escape_all(&mut self, inst: &Instruction) {
        let mut operands = Vec::new();
        inst.operands(&mut operands);
        for value in operands {
            self.escape_value(value);
        }
        if let Some(result) = inst.result() {
            self.escape_value(result);
        }
    }

    /// Classifies a call target. A callee is only usable for summary
    /// merging when it is a defined, non-external function of the module.
    fn resolve_callee(&self, callee: &Callee) -> CallTarget {
        match callee {
            Callee::Direct(id) => match self.module.function(*id) {
                Some(f) if !f.is_external() && f.is_defined() => CallTarget::Resolved(*id),
                _ => CallTarget::External,
            },
            Callee::Indirect(_) => CallTarget::Indirect,
            Callee::External(_) => CallTarget::External,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::escape::EscapeState;
    use crate::ir::{FunctionBuilder, FunctionFlags, Type};

    fn build(module: &Module, f: FunctionId) -> (ConnectionGraph, Vec<CallSite>) {
        build_connection_graph(module, f)
    }

    #[test]
    fn test_local_object_does_not_escape() {
        // fn f() { let o = alloc; let a = &o.field; *a = 1; }  (scalar store)
        let mut module = Module::new();
        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o = b.alloc();
        let a = b.field_addr(o);
        let _ = b.load(a, Type::Int);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (graph, sites) = build(&module, f);
        assert!(sites.is_empty());
        let node = graph.node_for(o).unwrap();
        assert_eq!(graph.escape_state(node), EscapeState::None);
        assert!(!graph.escapes(node));
    }

    #[test]
    fn test_returned_object_escapes_through_return() {
        let mut module = Module::new();
        let f = module
            .declare_function("f", vec![], Type::Ref, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o = b.alloc();
        b.ret(Some(o));
        module.define_function(f, b.finish()).unwrap();

        let (graph, _) = build(&module, f);
        let node = graph.node_for(o).unwrap();
        assert!(graph.escapes(node));
        assert_eq!(graph.escape_state(node), EscapeState::Arguments);
    }

    #[test]
    fn test_store_to_global_escapes_globally() {
        let mut module = Module::new();
        let g = module.declare_global("cache", Type::Ref).unwrap();
        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o = b.alloc();
        let addr = b.global_addr(g);
        b.store(addr, o);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (graph, _) = build(&module, f);
        let node = graph.node_for(o).unwrap();
        assert_eq!(graph.escape_state(node), EscapeState::Global);
    }

    #[test]
    fn test_unknown_callee_escapes_arguments() {
        let mut module = Module::new();
        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o = b.alloc();
        b.call(Callee::External("mystery".into()), vec![o], Type::Void);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (graph, sites) = build(&module, f);
        assert!(sites.is_empty(), "external calls are not known callees");
        let node = graph.node_for(o).unwrap();
        assert_eq!(graph.escape_state(node), EscapeState::Global);
    }

    #[test]
    fn test_known_callee_is_recorded_not_applied() {
        let mut module = Module::new();
        let callee = module
            .declare_function("callee", vec![Type::Ref], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut cb = FunctionBuilder::new(vec![Type::Ref]);
        cb.ret(None);
        module.define_function(callee, cb.finish()).unwrap();

        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o = b.alloc();
        b.call(Callee::Direct(callee), vec![o], Type::Void);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (graph, sites) = build(&module, f);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].resolved(), Some(callee));
        // Optimistic until the summaries are merged.
        let node = graph.node_for(o).unwrap();
        assert_eq!(graph.escape_state(node), EscapeState::None);
    }

    #[test]
    fn test_undefined_internal_callee_is_treated_as_external() {
        let mut module = Module::new();
        let callee = module
            .declare_function("declared_only", vec![Type::Ref], Type::Void, FunctionFlags::empty())
            .unwrap();
        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o = b.alloc();
        b.call(Callee::Direct(callee), vec![o], Type::Void);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (graph, sites) = build(&module, f);
        assert!(sites.is_empty());
        let node = graph.node_for(o).unwrap();
        assert_eq!(graph.escape_state(node), EscapeState::Global);
    }

    #[test]
    fn test_phi_join_collapses_contents() {
        // Two objects stored through the same joined variable share one
        // content node afterwards.
        let mut module = Module::new();
        let f = module
            .declare_function("f", vec![], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![]);
        let o1 = b.alloc();
        let a1 = b.field_addr(o1);
        let _ = b.load(a1, Type::Int); // force o1's content into existence
        let o2 = b.alloc();
        let a2 = b.field_addr(o2);
        let _ = b.load(a2, Type::Int);
        let joined = b.select(vec![o1, o2]);
        b.drop_value(joined);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (mut graph, _) = build(&module, f);
        let n1 = graph.node_for(o1).unwrap();
        let n2 = graph.node_for(o2).unwrap();
        let c1 = graph.content_node(n1);
        let c2 = graph.content_node(n2);
        assert_eq!(c1, c2, "both branches' objects must share one content node");

        let joined_node = graph.node_for(joined).unwrap();
        assert_eq!(graph.content_node(joined_node), c1);
    }

    #[test]
    fn test_projection_aliases_base() {
        let pair = Type::Struct(vec![Type::Ref, Type::Int]);
        let mut module = Module::new();
        let f = module
            .declare_function("f", vec![pair.clone()], Type::Void, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![pair]);
        let p = b.arg(0);
        let field = b.project(p, Type::Ref);
        b.drop_value(field);
        b.ret(None);
        module.define_function(f, b.finish()).unwrap();

        let (graph, _) = build(&module, f);
        assert_eq!(
            graph.node_for(field),
            graph.node_for(p),
            "projection must resolve to the outermost containing value"
        );
    }

    #[test]
    fn test_load_through_pointer_aliases_content() {
        // fn f(p: Ptr) { let x = *p; return x; }
        let mut module = Module::new();
        let f = module
            .declare_function("f", vec![Type::Ptr], Type::Ref, FunctionFlags::empty())
            .unwrap();
        let mut b = FunctionBuilder::new(vec![Type::Ptr]);
        let p = b.arg(0);
        let x = b.load(p, Type::Ref);
        b.ret(Some(x));
        module.define_function(f, b.finish()).unwrap();

        let (graph, _) = build(&module, f);
        let x_node = graph.node_for(x).unwrap();
        // Loaded from an argument's content: escapes at least via arguments.
        assert_eq!(graph.escape_state(x_node), EscapeState::Arguments);
    }
}

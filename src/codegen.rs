//! Code generator: CPS-form [`Node`] trees to a [`CompiledUnit`].
//!
//! Scopes live in an arena so that a nested lambda can add upvalue descriptors to
//! every enclosing scope between the capture site and the variable's owner. Lambda
//! bodies are queued and compiled after their enclosing scope is finished, against
//! its complete local map. Protos are only assembled once every scope is done,
//! because compiling a nested lambda can still append upvalues to its ancestors.
//!
//! Upvalues are copies, so a variable that must be shared between closures lives
//! in a cell: a pair built by the lambda's prologue whose car holds the value.
//! Reads go through `CAR`, assignments through `SETCAR`, and every closure that
//! captures the variable captures the same pair.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::debug;

use crate::ast::{DefineScope, Lambda, Node};
use crate::code::{Assembler, CompiledUnit, Continuation, Proto, ProtoTable, UpvalueDescriptor};
use crate::module::Module;
use crate::opcode::Opcode;
use crate::value::{Symbol, Value};
use crate::{Error, Result};

/// Locals, upvalues, constants and protos are all addressed by one operand byte
const MAX_INDEX: usize = u8::MAX as usize + 1;

const ENTRY_NAME: &str = "toplevel";

/// How a variable reference resolves in a given scope. `cell` is set when the
/// slot holds the variable's cell rather than its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Local { slot: u8, cell: bool },
    Upvalue { index: u8, cell: bool },
    Global,
}

impl Binding {
    fn is_cell(self) -> bool {
        matches!(
            self,
            Binding::Local { cell: true, .. } | Binding::Upvalue { cell: true, .. }
        )
    }
}

struct Scope {
    parent: Option<usize>,
    name: String,
    arg_count: usize,
    locals: HashMap<Symbol, u8>,
    /// Locals holding a cell
    cells: HashSet<Symbol>,
    upvalues: Vec<(Symbol, UpvalueDescriptor, bool)>,
    constants: Vec<Value>,
    code: Assembler,
    /// Anonymous continuations compiled inside this scope, for naming
    children: usize,
}

impl Scope {
    fn new(parent: Option<usize>, name: String, formals: &[Symbol]) -> Result<Self> {
        if formals.len() > MAX_INDEX {
            return Err(Error::Compile(format!("{name}: too many parameters")));
        }
        let locals = formals
            .iter()
            .enumerate()
            .map(|(slot, formal)| (*formal, slot as u8))
            .collect();
        Ok(Scope {
            parent,
            name,
            arg_count: formals.len(),
            locals,
            cells: HashSet::new(),
            upvalues: Vec::new(),
            constants: Vec::new(),
            code: Assembler::new(),
            children: 0,
        })
    }

    fn local_slot(&self, name: Symbol) -> Option<u8> {
        self.locals.get(&name).copied()
    }

    fn declare_local(&mut self, name: Symbol) -> Result<u8> {
        if let Some(slot) = self.local_slot(name) {
            return Ok(slot);
        }
        let slot = self.locals.len();
        if slot >= MAX_INDEX {
            return Err(Error::Compile(format!("{}: too many local variables", self.name)));
        }
        self.locals.insert(name, slot as u8);
        Ok(slot as u8)
    }

    fn declare_cell(&mut self, name: Symbol) -> Result<u8> {
        let slot = self.declare_local(name)?;
        self.cells.insert(name);
        Ok(slot)
    }

    fn local(&self, name: Symbol) -> Option<Binding> {
        self.local_slot(name).map(|slot| Binding::Local {
            slot,
            cell: self.cells.contains(&name),
        })
    }

    fn upvalue(&self, name: Symbol) -> Option<Binding> {
        self.upvalues
            .iter()
            .position(|(upvalue, _, _)| *upvalue == name)
            .map(|index| Binding::Upvalue {
                index: index as u8,
                cell: self.upvalues[index].2,
            })
    }

    fn add_upvalue(&mut self, name: Symbol, descriptor: UpvalueDescriptor, cell: bool) -> Result<Binding> {
        let index = self.upvalues.len();
        if index >= MAX_INDEX {
            return Err(Error::Compile(format!("{}: too many captured variables", self.name)));
        }
        self.upvalues.push((name, descriptor, cell));
        Ok(Binding::Upvalue {
            index: index as u8,
            cell,
        })
    }

    fn constant(&mut self, value: &Value) -> Result<u8> {
        if let Some(index) = self.constants.iter().position(|c| c.is_identical(value)) {
            return Ok(index as u8);
        }
        let index = self.constants.len();
        if index >= MAX_INDEX {
            return Err(Error::Compile(format!("{}: constant pool overflow", self.name)));
        }
        self.constants.push(value.clone());
        Ok(index as u8)
    }
}

/// A lambda waiting to be compiled into proto `index`
struct PendingLambda {
    index: usize,
    lambda: Lambda,
}

pub struct CodeGenerator {
    module: Module,
    /// Arena indexed by proto index: scope `i` becomes `protos[i]`
    scopes: Vec<Scope>,
    pending: VecDeque<PendingLambda>,
}

/// Compile a CPS-form program into a unit whose protos share `module`
pub fn compile(program: &Node, module: &Module) -> Result<CompiledUnit> {
    CodeGenerator::new(module.clone()).compile_program(program)
}

impl CodeGenerator {
    pub fn new(module: Module) -> Self {
        CodeGenerator {
            module,
            scopes: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn compile_program(mut self, program: &Node) -> Result<CompiledUnit> {
        self.scopes.push(Scope::new(None, ENTRY_NAME.into(), &[])?);
        self.compile_tail(0, program)?;

        while let Some(PendingLambda { index, lambda }) = self.pending.pop_front() {
            let [body] = lambda.body.as_slice() else {
                return Err(Error::Compile(format!(
                    "{}: lambda body is not a single tail form",
                    self.scopes[index].name
                )));
            };
            self.emit_cell_prologue(index, &lambda)?;
            self.compile_tail(index, body)?;
        }

        let protos: ProtoTable = self
            .scopes
            .into_iter()
            .map(|scope| {
                Rc::new(Proto {
                    code: scope.code.into_code(),
                    arg_count: scope.arg_count,
                    local_count: scope.locals.len(),
                    upvalues: scope.upvalues.into_iter().map(|(_, d, _)| d).collect(),
                    constants: scope.constants,
                    module: Some(self.module.clone()),
                    name: Some(scope.name),
                })
            })
            .collect();

        debug!(protos = protos.len(), "compiled unit");
        let entry = Rc::new(Continuation::new(
            Rc::clone(&protos[0]),
            SmallVec::new(),
            Rc::clone(&protos),
        ));
        Ok(CompiledUnit { entry, protos })
    }

    /// Register a lambda's scope now, compile its body later
    fn queue_lambda(&mut self, parent: usize, lambda: &Lambda) -> Result<u8> {
        let index = self.scopes.len();
        if index >= MAX_INDEX {
            return Err(Error::Compile("too many procedures in one unit".into()));
        }
        let name = match lambda.name {
            Some(name) => name.name(),
            None => {
                let scope = &mut self.scopes[parent];
                scope.children += 1;
                format!("{}-k{}", scope.name, scope.children - 1)
            }
        };
        let mut scope = Scope::new(Some(parent), name, &lambda.formals)?;
        for cell in &lambda.cells {
            scope.declare_cell(*cell)?;
        }
        self.scopes.push(scope);
        self.pending.push_back(PendingLambda {
            index,
            lambda: lambda.clone(),
        });
        Ok(index as u8)
    }

    fn resolve(&mut self, scope: usize, name: Symbol) -> Result<Binding> {
        if let Some(local) = self.scopes[scope].local(name) {
            return Ok(local);
        }
        Ok(self.resolve_upvalue(scope, name)?.unwrap_or(Binding::Global))
    }

    /// Find or create an upvalue for `name` in `scope`, exporting it through every
    /// enclosing scope up to the one that owns it as a local
    fn resolve_upvalue(&mut self, scope: usize, name: Symbol) -> Result<Option<Binding>> {
        if let Some(upvalue) = self.scopes[scope].upvalue(name) {
            return Ok(Some(upvalue));
        }
        let Some(parent) = self.scopes[scope].parent else {
            return Ok(None);
        };
        let (descriptor, cell) = match self.scopes[parent].local(name) {
            Some(Binding::Local { slot, cell }) => (UpvalueDescriptor::local(slot), cell),
            _ => match self.resolve_upvalue(parent, name)? {
                Some(Binding::Upvalue { index, cell }) => (UpvalueDescriptor::inherited(index), cell),
                _ => return Ok(None),
            },
        };
        self.scopes[scope].add_upvalue(name, descriptor, cell).map(Some)
    }

    /// Give every cell variable of the lambda compiled into `index` a fresh cell.
    /// A parameter's cell starts out holding the argument.
    fn emit_cell_prologue(&mut self, index: usize, lambda: &Lambda) -> Result<()> {
        let scope = &mut self.scopes[index];
        for name in &lambda.cells {
            let slot = scope.local_slot(*name).ok_or_else(|| {
                Error::Compile(format!("{}: cell '{name}' has no slot", scope.name))
            })?;
            if lambda.formals.contains(name) {
                scope.code.op_u8(Opcode::Load, slot);
            } else {
                scope.code.op(Opcode::Unspec);
            }
            scope.code.op(Opcode::Nil).op(Opcode::Cons).op_u8(Opcode::Store, slot);
        }
        Ok(())
    }

    /// Push the contents of `binding`: the value, or the cell for cell variables
    fn emit_load(&mut self, scope: usize, name: Symbol, binding: Binding) -> Result<()> {
        match binding {
            Binding::Local { slot, .. } => {
                self.scopes[scope].code.op_u8(Opcode::Load, slot);
            }
            Binding::Upvalue { index, .. } => {
                self.scopes[scope].code.op_u8(Opcode::GetUpval, index);
            }
            Binding::Global => {
                let index = self.scopes[scope].constant(&Value::Symbol(name))?;
                self.scopes[scope].code.op_u8(Opcode::GetGlobal, index);
            }
        }
        Ok(())
    }

    /// Store `value` through the cell of a cell variable
    fn emit_cell_store(&mut self, scope: usize, name: Symbol, cell: Binding, value: &Node) -> Result<()> {
        self.emit_load(scope, name, cell)?;
        self.compile_value(scope, value)?;
        self.scopes[scope].code.op(Opcode::SetCar);
        Ok(())
    }

    /// Emit code leaving the value of an operand on the stack
    fn compile_value(&mut self, scope: usize, node: &Node) -> Result<()> {
        match node {
            Node::Const(value) => self.compile_const(scope, value),
            Node::Var(name) => {
                let binding = self.resolve(scope, *name)?;
                self.emit_load(scope, *name, binding)?;
                if binding.is_cell() {
                    self.scopes[scope].code.op(Opcode::Car);
                }
                Ok(())
            }
            Node::Lambda(lambda) => {
                let index = self.queue_lambda(scope, lambda)?;
                self.scopes[scope].code.op_u8(Opcode::BuildCont, index);
                Ok(())
            }
            Node::Define {
                name,
                value,
                scope: define_scope,
            } => {
                match define_scope {
                    DefineScope::Global => {
                        self.compile_value(scope, value)?;
                        self.emit_global_store(scope, *name)?;
                    }
                    // Internal definitions resolve to the enclosing lambda's cell.
                    // Compiler temporaries get a plain local of this scope.
                    DefineScope::Local => match self.resolve(scope, *name)? {
                        cell if cell.is_cell() => self.emit_cell_store(scope, *name, cell, value)?,
                        _ => {
                            self.compile_value(scope, value)?;
                            let slot = self.scopes[scope].declare_local(*name)?;
                            self.scopes[scope].code.op_u8(Opcode::Store, slot);
                        }
                    },
                }
                self.scopes[scope].code.op(Opcode::Unspec);
                Ok(())
            }
            Node::Set { name, value } => {
                match self.resolve(scope, *name)? {
                    cell if cell.is_cell() => self.emit_cell_store(scope, *name, cell, value)?,
                    binding => {
                        self.compile_value(scope, value)?;
                        match binding {
                            Binding::Local { slot, .. } => {
                                self.scopes[scope].code.op_u8(Opcode::Store, slot);
                            }
                            Binding::Upvalue { index, .. } => {
                                self.scopes[scope].code.op_u8(Opcode::SetUpval, index);
                            }
                            Binding::Global => self.emit_global_store(scope, *name)?,
                        }
                    }
                }
                self.scopes[scope].code.op(Opcode::Unspec);
                Ok(())
            }
            other => Err(Error::Compile(format!(
                "{}: expected an operand, found {}: {other}",
                self.scopes[scope].name,
                other.kind()
            ))),
        }
    }

    fn compile_const(&mut self, scope: usize, value: &Value) -> Result<()> {
        let code = &mut self.scopes[scope].code;
        match value {
            Value::Integer(n) => {
                if let Ok(small) = i16::try_from(*n) {
                    code.op_i16(Opcode::Int, small);
                    return Ok(());
                }
            }
            Value::Boolean(true) => {
                code.op(Opcode::True);
                return Ok(());
            }
            Value::Boolean(false) => {
                code.op(Opcode::False);
                return Ok(());
            }
            Value::Nil => {
                code.op(Opcode::Nil);
                return Ok(());
            }
            Value::Unspecified => {
                code.op(Opcode::Unspec);
                return Ok(());
            }
            Value::Symbol(_)
            | Value::Pair(_)
            | Value::Proto(_)
            | Value::Continuation(_)
            | Value::Error(_) => {}
        }
        let index = self.scopes[scope].constant(value)?;
        self.scopes[scope].code.op_u8(Opcode::LoadConst, index);
        Ok(())
    }

    fn emit_global_store(&mut self, scope: usize, name: Symbol) -> Result<()> {
        let index = self.scopes[scope].constant(&Value::Symbol(name))?;
        self.scopes[scope].code.op_u8(Opcode::SetGlobal, index);
        Ok(())
    }

    /// Emit a tail form; every path through it ends in `CONT`
    fn compile_tail(&mut self, scope: usize, node: &Node) -> Result<()> {
        match node {
            Node::Apply { proc, args } => {
                for arg in args {
                    self.compile_value(scope, arg)?;
                }
                self.compile_value(scope, proc)?;
                self.scopes[scope].code.op(Opcode::Cont);
                Ok(())
            }
            Node::If {
                test,
                then,
                otherwise,
            } => {
                self.compile_value(scope, test)?;
                let patch = self.scopes[scope].code.branch(Opcode::BranchIfNot);
                self.compile_tail(scope, then)?;
                self.scopes[scope].code.patch(patch).map_err(|err| match err {
                    Error::Compile(msg) => Error::Compile(format!("{}: {msg}", self.scopes[scope].name)),
                    other => other,
                })?;
                self.compile_tail(scope, otherwise)
            }
            Node::Seq(nodes) => {
                let Some((last, init)) = nodes.split_last() else {
                    return Err(Error::Compile(format!(
                        "{}: empty sequence in tail position",
                        self.scopes[scope].name
                    )));
                };
                for node in init {
                    self.compile_value(scope, node)?;
                    self.scopes[scope].code.op(Opcode::Pop);
                }
                self.compile_tail(scope, last)
            }
            other => Err(Error::Compile(format!(
                "{}: expected a tail call, found {}: {other}",
                self.scopes[scope].name,
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::cps::Rewriter;
    use crate::disasm::disassemble;

    fn int(n: i64) -> Node {
        Node::Const(Value::Integer(n))
    }

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    fn compile_direct(forms: &[Node]) -> CompiledUnit {
        let program = Rewriter::new().rewrite_program(forms).unwrap();
        compile(&program, &Module::new()).unwrap()
    }

    fn proto_named<'a>(unit: &'a CompiledUnit, name: &str) -> &'a Rc<Proto> {
        unit.protos
            .iter()
            .find(|p| p.display_name() == name)
            .unwrap_or_else(|| panic!("no proto named {name}"))
    }

    #[test]
    fn test_toplevel_call() {
        // (halt 1)
        let unit = compile_direct(&[int(1)]);
        assert_eq!(unit.protos.len(), 1);
        assert_eq!(
            disassemble(&unit.protos[0]),
            vec!["0:INT(1)", "3:GETGLOBAL(0)", "5:CONT()"]
        );
        assert_eq!(unit.protos[0].constants, vec![Value::Symbol(sym("halt"))]);
        assert!(unit.protos[0].module.is_some());
    }

    #[test]
    fn test_constant_pool_is_deduplicated() {
        // (f 'a 'a 100000 100000)
        let big = Node::Const(Value::Integer(100_000));
        let quoted = Node::Const(Value::Symbol(sym("a")));
        let unit = compile_direct(&[Node::apply(
            Node::var("f"),
            vec![quoted.clone(), quoted, big.clone(), big],
        )]);
        let constants = &unit.protos[0].constants;
        assert_eq!(
            constants,
            &vec![
                Value::Symbol(sym("a")),
                Value::Integer(100_000),
                Value::Symbol(sym("halt")),
                Value::Symbol(sym("f")),
            ]
        );
    }

    #[test]
    fn test_lambda_becomes_proto_with_continuation_argument() {
        // (define (id x) x)
        let define = Node::Define {
            name: sym("id"),
            value: Box::new(Node::Lambda(Lambda {
                name: Some(sym("id")),
                ..Lambda::new(vec![sym("x")], vec![Node::var("x")])
            })),
            scope: DefineScope::Global,
        };
        let unit = compile_direct(&[define]);
        let id = proto_named(&unit, "id");
        assert_eq!(id.arg_count, 2);
        assert_eq!(id.local_count, 2);
        assert!(id.upvalues.is_empty());
        // (k x)
        assert_eq!(disassemble(id), vec!["0:LOAD(0)", "2:LOAD(1)", "4:CONT()"]);
        assert_eq!(id.code.last(), Some(&Opcode::Cont.as_byte()));
    }

    #[test]
    fn test_upvalue_chain_through_intermediate_scope() {
        // (lambda (a) (lambda (b) (lambda (c) a)))
        let innermost = Node::lambda(vec![sym("c")], vec![Node::var("a")]);
        let middle = Node::lambda(vec![sym("b")], vec![innermost]);
        let outer = Node::lambda(vec![sym("a")], vec![middle]);
        let unit = compile_direct(&[outer]);

        // toplevel, outer, middle, innermost
        assert_eq!(unit.protos.len(), 4);
        let outer = &unit.protos[1];
        let middle = &unit.protos[2];
        let innermost = &unit.protos[3];
        assert!(outer.upvalues.is_empty());
        // middle captures `a` from outer's local slot 0
        assert_eq!(middle.upvalues[0], UpvalueDescriptor::local(0));
        // innermost captures `a` through middle's upvalue 0
        assert_eq!(innermost.upvalues[0], UpvalueDescriptor::inherited(0));
        assert!(disassemble(innermost).contains(&"0:GETUPVAL(0)".to_owned()));
    }

    #[test]
    fn test_if_branches_end_in_cont() {
        // (if t 1 2) with halt as continuation
        let unit = compile_direct(&[Node::if_(Node::var("t"), int(1), int(2))]);
        let lines = disassemble(&unit.protos[0]);
        assert_eq!(
            lines,
            vec![
                "0:GETGLOBAL(0)",
                "2:BRANCHIFNOT(6)",
                "4:INT(1)",
                "7:GETGLOBAL(1)",
                "9:CONT()",
                "10:INT(2)",
                "13:GETGLOBAL(1)",
                "15:CONT()",
            ]
        );
    }

    #[test]
    fn test_general_continuation_is_stored_in_a_local() {
        // (f (if t 1 2)) binds the continuation of the if to a local once
        let unit = compile_direct(&[Node::apply(
            Node::var("f"),
            vec![Node::if_(Node::var("t"), int(1), int(2))],
        )]);
        let entry = &unit.protos[0];
        assert_eq!(entry.local_count, 1);
        let lines = disassemble(entry);
        assert_eq!(&lines[..4], &["0:BUILDCONT(1)", "2:STORE(0)", "4:UNSPEC()", "5:POP()"]);
        assert_eq!(lines.iter().filter(|l| l.contains("BUILDCONT")).count(), 1);
    }

    #[test]
    fn test_set_on_captured_variable_uses_setupval() {
        // Already in CPS form and without cells: (halt (lambda (x k) (k (lambda (k2) (k2 (set! x 1))))))
        let inner = Node::lambda(
            vec![sym("k2")],
            vec![Node::apply(
                Node::var("k2"),
                vec![Node::Set {
                    name: sym("x"),
                    value: Box::new(int(1)),
                }],
            )],
        );
        let outer = Node::lambda(
            vec![sym("x"), sym("k")],
            vec![Node::apply(Node::var("k"), vec![inner])],
        );
        let unit = compile(&Node::apply(Node::var("halt"), vec![outer]), &Module::new()).unwrap();
        assert_eq!(
            disassemble(&unit.protos[2]),
            vec!["0:INT(1)", "3:SETUPVAL(0)", "5:UNSPEC()", "6:LOAD(0)", "8:CONT()"]
        );
    }

    #[test]
    fn test_assigned_parameter_lives_in_a_cell() {
        // (lambda (x) (lambda () (set! x 1)))
        let inner = Node::lambda(
            vec![],
            vec![Node::Set {
                name: sym("x"),
                value: Box::new(int(1)),
            }],
        );
        let unit = compile_direct(&[Node::lambda(vec![sym("x")], vec![inner])]);
        let outer = &unit.protos[1];
        assert_eq!(outer.local_count, 2);
        assert_eq!(
            &disassemble(outer)[..4],
            &["0:LOAD(0)", "2:NIL()", "3:CONS()", "4:STORE(0)"]
        );
        assert_eq!(
            disassemble(&unit.protos[2]),
            vec![
                "0:GETUPVAL(0)",
                "2:INT(1)",
                "5:SETCAR()",
                "6:UNSPEC()",
                "7:LOAD(0)",
                "9:CONT()"
            ]
        );
    }

    #[test]
    fn test_internal_define_is_visible_to_its_own_body() {
        // (define (f n) (define (walk i) (walk i)) (walk n))
        let walk = Node::Define {
            name: sym("walk"),
            value: Box::new(Node::Lambda(Lambda {
                name: Some(sym("walk")),
                ..Lambda::new(
                    vec![sym("i")],
                    vec![Node::apply(Node::var("walk"), vec![Node::var("i")])],
                )
            })),
            scope: DefineScope::Local,
        };
        let f = Node::Define {
            name: sym("f"),
            value: Box::new(Node::Lambda(Lambda {
                name: Some(sym("f")),
                ..Lambda::new(
                    vec![sym("n")],
                    vec![walk, Node::apply(Node::var("walk"), vec![Node::var("n")])],
                )
            })),
            scope: DefineScope::Global,
        };
        let unit = compile_direct(&[f]);

        // n, the continuation, then the cell for walk
        let f = proto_named(&unit, "f");
        assert_eq!(f.local_count, 3);
        assert_eq!(
            &disassemble(f)[..4],
            &["0:UNSPEC()", "1:NIL()", "2:CONS()", "3:STORE(2)"]
        );

        // walk reaches itself through the captured cell, not the global table
        let walk = proto_named(&unit, "walk");
        assert_eq!(walk.upvalues.as_slice(), &[UpvalueDescriptor::local(2)]);
        assert_eq!(
            disassemble(walk),
            vec!["0:LOAD(0)", "2:LOAD(1)", "4:GETUPVAL(0)", "6:CAR()", "7:CONT()"]
        );
        assert!(walk.constants.is_empty());
        let all: Vec<String> = unit.protos.iter().flat_map(|p| disassemble(p)).collect();
        assert!(all.iter().any(|l| l.ends_with("SETCAR()")), "{all:?}");
    }

    #[test]
    fn test_non_cps_input_is_rejected() {
        let err = compile(&int(1), &Module::new()).unwrap_err();
        assert!(err.to_string().contains("expected a tail call"), "{err}");

        let nested = Node::apply(Node::var("f"), vec![Node::apply(Node::var("g"), vec![])]);
        let err = compile(&nested, &Module::new()).unwrap_err();
        assert!(err.to_string().contains("expected an operand"), "{err}");
    }

    #[test]
    fn test_branch_too_long_is_a_compile_error() {
        let many_args: Vec<Node> = (0..60).map(|n| int(1000 + n)).collect();
        let then = Node::apply(Node::var("k"), many_args);
        let program = Node::if_(Node::var("t"), then, Node::apply(Node::var("k"), vec![]));
        let err = compile(&program, &Module::new()).unwrap_err();
        assert!(matches!(err, Error::Compile(_)), "{err}");
    }

    #[test]
    fn test_too_many_constants() {
        let symbols: Vec<Node> = (0..300)
            .map(|n| Node::Const(Value::Symbol(sym(&format!("c{n}")))))
            .collect();
        let program = Node::apply(Node::var("k"), symbols);
        let err = compile(&program, &Module::new()).unwrap_err();
        assert!(err.to_string().contains("constant pool overflow"), "{err}");
    }
}

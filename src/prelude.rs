//! Builtin procedures.
//!
//! Every builtin is a hand-assembled proto wrapped in a continuation with no
//! upvalues. Like compiled procedures, a builtin receives its ordinary arguments
//! followed by the continuation that gets the result, and finishes by invoking it
//! with `CONT`.

use std::rc::Rc;

use smallvec::smallvec;
use tracing::debug;

use crate::code::{Assembler, Continuation, Proto, UpvalueDescriptor, empty_proto_table};
use crate::module::Module;
use crate::opcode::Opcode::{self, *};
use crate::value::{Symbol, Value};

const REIFIED_NAME: &str = "reified-continuation";

/// Body shape of a builtin
enum Shape {
    /// `(op a b k)`: apply a binary opcode to the two operands in order
    Binary(&'static [Opcode]),
    /// `(op b a k)`: same, operands swapped
    Swapped(&'static [Opcode]),
    /// `(op x k)`
    Unary(Opcode),
    /// `(op pair value k)`: mutate, then pass unspecified
    Mutator(Opcode),
    Custom(usize, fn(&mut Assembler)),
}

const BUILTINS: &[(&str, Shape)] = &[
    ("+", Shape::Binary(&[IAdd])),
    ("-", Shape::Binary(&[ISub])),
    ("*", Shape::Binary(&[IMul])),
    ("/", Shape::Binary(&[IDiv])),
    ("<", Shape::Binary(&[Lt])),
    (">", Shape::Swapped(&[Lt])),
    ("<=", Shape::Swapped(&[Lt, Not])),
    (">=", Shape::Binary(&[Lt, Not])),
    ("=", Shape::Binary(&[Equal])),
    ("eq?", Shape::Binary(&[Is])),
    ("equal?", Shape::Binary(&[Equal])),
    ("cons", Shape::Binary(&[Cons])),
    ("not", Shape::Unary(Not)),
    ("null?", Shape::Unary(NullP)),
    ("pair?", Shape::Unary(PairP)),
    ("integer?", Shape::Unary(IntegerP)),
    ("car", Shape::Unary(Car)),
    ("cdr", Shape::Unary(Cdr)),
    ("set-car!", Shape::Mutator(SetCar)),
    ("set-cdr!", Shape::Mutator(SetCdr)),
    ("display", Shape::Custom(2, display_body)),
    ("newline", Shape::Custom(1, newline_body)),
    ("call/cc", Shape::Custom(2, call_cc_body)),
    ("halt", Shape::Custom(1, halt_body)),
];

fn display_body(asm: &mut Assembler) {
    asm.op_u8(Load, 0).op(Print).op(Unspec).op_u8(Load, 1).op(Cont);
}

fn newline_body(asm: &mut Assembler) {
    asm.op(Newline).op(Unspec).op_u8(Load, 0).op(Cont);
}

/// `(call/cc f k)` is `(f <reified k> k)`
fn call_cc_body(asm: &mut Assembler) {
    asm.op_u8(Load, 1)
        .op(ReifyCc)
        .op_u8(Load, 1)
        .op_u8(Load, 0)
        .op(Cont);
}

fn halt_body(asm: &mut Assembler) {
    asm.op_u8(Load, 0).op(Halt);
}

fn assemble(name: &str, shape: &Shape) -> Proto {
    let mut asm = Assembler::new();
    let arg_count = match shape {
        Shape::Binary(ops) | Shape::Swapped(ops) => {
            let (first, second) = if matches!(shape, Shape::Binary(_)) { (0, 1) } else { (1, 0) };
            asm.op_u8(Load, first).op_u8(Load, second);
            for op in *ops {
                asm.op(*op);
            }
            asm.op_u8(Load, 2).op(Cont);
            3
        }
        Shape::Unary(op) => {
            asm.op_u8(Load, 0).op(*op).op_u8(Load, 1).op(Cont);
            2
        }
        Shape::Mutator(op) => {
            asm.op_u8(Load, 0)
                .op_u8(Load, 1)
                .op(*op)
                .op(Unspec)
                .op_u8(Load, 2)
                .op(Cont);
            3
        }
        Shape::Custom(arg_count, body) => {
            body(&mut asm);
            *arg_count
        }
    };
    Proto::new(name, arg_count, asm.into_code())
}

/// Bind every builtin in `module`, replacing existing bindings of the same names
pub fn install(module: &Module) {
    for (name, shape) in BUILTINS {
        let cont = Continuation::standalone(assemble(name, shape));
        module.set(Symbol::intern(name), Value::Continuation(Rc::new(cont)));
    }
    debug!(count = BUILTINS.len(), "installed prelude");
}

/// Names of all builtins, in installation order
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

thread_local! {
    // (v k') => (captured v); the continuation argument of the call site is dropped
    static REIFIED: Rc<Proto> = Rc::new(
        Proto::new(
            REIFIED_NAME,
            2,
            Assembler::new().op_u8(Load, 0).op_u8(GetUpval, 0).op(Cont).to_code(),
        )
        .with_upvalues(vec![UpvalueDescriptor::local(0)]),
    );
}

/// Wrap `cont` as a first-class procedure of one argument plus an ignored continuation
pub fn reify_continuation(cont: Rc<Continuation>) -> Rc<Continuation> {
    let proto = REIFIED.with(Rc::clone);
    Rc::new(Continuation::new(
        proto,
        smallvec![Value::Continuation(cont)],
        empty_proto_table(),
    ))
}

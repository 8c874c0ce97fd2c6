//! The virtual machine.
//!
//! A program runs inside exactly one [`Frame`]. The frame's stack is a fixed-size
//! array split into three regions:
//!
//! ```text
//! [0, local_count)                         locals of the active proto
//! [local_count, local_count + upvalues)    copy of the active continuation's upvalues
//! [local_count + upvalues, top)            temporaries / outgoing arguments
//! ```
//!
//! There is no return instruction. `CONT` pops a continuation, moves the values
//! pushed above the upvalue region down into the locals, and installs the target
//! proto in place. Logical call depth is therefore unbounded while the host stack
//! and the frame stay the same size.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, error, trace};

use crate::code::{Continuation, Proto, ProtoTable};
use crate::module::Module;
use crate::opcode::Opcode;
use crate::prelude;
use crate::value::{Symbol, Value};
use crate::{Error, Result};

/// Destination of `PRINT` and `NEWLINE`
pub type OutputSink = Rc<RefCell<dyn Write>>;

pub fn stdout_sink() -> OutputSink {
    Rc::new(RefCell::new(io::stdout()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameState {
    Running,
    Halted(Value),
    Faulted(Error),
}

pub struct Frame {
    stack: Vec<Option<Value>>,
    top: usize,
    pc: usize,
    proto: Rc<Proto>,
    protos: ProtoTable,
    state: FrameState,
    output: OutputSink,
    /// Highest `top` reached so far
    high_water: usize,
}

impl Frame {
    /// Create a frame with `capacity` stack slots, positioned at the start of `entry`
    pub fn new(entry: &Continuation, capacity: usize) -> Result<Self> {
        let mut frame = Frame {
            stack: vec![None; capacity],
            top: 0,
            pc: 0,
            proto: Rc::clone(&entry.proto),
            protos: Rc::clone(&entry.protos),
            state: FrameState::Running,
            output: stdout_sink(),
            high_water: 0,
        };
        frame.install(entry, "entry")?;
        Ok(frame)
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn capacity(&self) -> usize {
        self.stack.len()
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn proto(&self) -> &Rc<Proto> {
        &self.proto
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Run until the frame halts or faults
    pub fn run(&mut self) -> Result<Value> {
        loop {
            match &self.state {
                FrameState::Running => {}
                FrameState::Halted(value) => return Ok(value.clone()),
                FrameState::Faulted(err) => return Err(err.clone()),
            }
            if let Err(err) = self.step() {
                error!(proto = self.proto.display_name(), pc = self.pc, %err, "execution faulted");
                self.state = FrameState::Faulted(err);
            }
        }
    }

    /// Execute one instruction
    pub fn step(&mut self) -> Result<()> {
        if self.state != FrameState::Running {
            return Ok(());
        }
        let at = self.pc;
        let (op, operand) = self.fetch()?;
        self.execute(op, operand)
            .map_err(|err| self.annotate(err, op, operand, at))
    }

    fn fetch(&mut self) -> Result<(Opcode, i32)> {
        let at = self.pc;
        let code = &self.proto.code;
        let location = || format!("{}:{at}", self.proto.display_name());

        let byte = *code
            .get(at)
            .ok_or_else(|| Error::execution("program counter past end of code", location()))?;
        let op = Opcode::from_byte(byte)
            .ok_or_else(|| Error::execution(format!("unknown opcode {byte}"), location()))?;
        let width = op.operand_width();
        let bytes = code
            .get(at + 1..at + 1 + width)
            .ok_or_else(|| Error::execution("truncated operand", location()))?;
        let operand = match bytes {
            [] => 0,
            [b] if op.is_branch() => i32::from(i8::from_le_bytes([*b])),
            [b] => i32::from(*b),
            [lo, hi] => i32::from(i16::from_le_bytes([*lo, *hi])),
            _ => return Err(Error::execution("bad operand width", location())),
        };
        self.pc = at + 1 + width;
        Ok((op, operand))
    }

    /// Attach the faulting instruction and its location to a runtime error
    fn annotate(&self, err: Error, op: Opcode, operand: i32, at: usize) -> Error {
        let operand = if op.operand_width() == 0 {
            String::new()
        } else {
            operand.to_string()
        };
        let operation = format!(
            "{}({operand}) at {}:{at}",
            op.name(),
            self.proto.display_name()
        );
        match err {
            Error::Type { expected, got, .. } => Error::Type {
                expected,
                got,
                operation,
            },
            Error::Value { reason, got, .. } => Error::Value {
                reason,
                got,
                operation,
            },
            Error::Name { name, .. } => Error::Name { name, operation },
            Error::Execution { message, .. } => Error::Execution { message, operation },
            other => other,
        }
    }

    fn execute(&mut self, op: Opcode, operand: i32) -> Result<()> {
        let name = op.name();
        let index = operand as usize;
        match op {
            Opcode::Int => self.push(Value::Integer(i64::from(operand))),
            Opcode::LoadConst => {
                let value = self.constant(index)?;
                self.push(value)
            }
            Opcode::GetGlobal => {
                let symbol = self.global_name(index, name)?;
                let value = self.module(name)?.lookup(symbol)?;
                self.push(value)
            }
            Opcode::SetGlobal => {
                let symbol = self.global_name(index, name)?;
                let value = self.pop(name)?;
                self.module(name)?.set(symbol, value);
                Ok(())
            }
            Opcode::Load => {
                if index >= self.proto.local_count {
                    return Err(Error::execution("local slot out of range", name));
                }
                let value = self.stack[index]
                    .clone()
                    .ok_or_else(|| Error::execution("unbound local variable", name))?;
                self.push(value)
            }
            Opcode::Store => {
                if index >= self.proto.local_count {
                    return Err(Error::execution("local slot out of range", name));
                }
                let value = self.pop(name)?;
                self.stack[index] = Some(value);
                Ok(())
            }
            Opcode::GetUpval => {
                let slot = self.upvalue_slot(index, name)?;
                let value = self.stack[slot]
                    .clone()
                    .ok_or_else(|| Error::execution("unbound upvalue", name))?;
                self.push(value)
            }
            Opcode::SetUpval => {
                let slot = self.upvalue_slot(index, name)?;
                let value = self.pop(name)?;
                self.stack[slot] = Some(value);
                Ok(())
            }
            Opcode::BuildCont => self.build_continuation(index),
            Opcode::Cont => self.invoke(),
            Opcode::Halt => {
                let value = self.pop(name)?;
                debug!(proto = self.proto.display_name(), %value, "halted");
                self.state = FrameState::Halted(value);
                Ok(())
            }
            Opcode::BranchIf | Opcode::BranchIfNot => {
                let condition = self.pop(name)?.is_true();
                if condition == (op == Opcode::BranchIf) {
                    self.jump(operand)?;
                }
                Ok(())
            }
            Opcode::Pop => self.pop(name).map(drop),
            Opcode::Dup => {
                let value = self.peek(name)?;
                self.push(value)
            }
            Opcode::Rot => {
                let x = self.pop(name)?;
                let y = self.peek(name)?;
                self.settop(x);
                self.push(y)
            }
            Opcode::Nil => self.push(Value::Nil),
            Opcode::True => self.push(Value::Boolean(true)),
            Opcode::False => self.push(Value::Boolean(false)),
            Opcode::Unspec => self.push(Value::Unspecified),
            Opcode::IAdd | Opcode::ISub | Opcode::IMul | Opcode::IDiv => self.arithmetic(op),
            Opcode::Is => {
                let x = self.pop(name)?;
                let y = self.peek(name)?;
                self.settop(Value::Boolean(x.is_identical(&y)));
                Ok(())
            }
            Opcode::Equal => {
                let x = self.pop(name)?;
                let y = self.peek(name)?;
                self.settop(Value::Boolean(x.is_equal(&y)));
                Ok(())
            }
            Opcode::Lt => {
                let y = self.pop(name)?.to_int(name)?;
                let x = self.peek(name)?.to_int(name)?;
                self.settop(Value::Boolean(x < y));
                Ok(())
            }
            Opcode::Not => {
                let x = self.peek(name)?;
                self.settop(Value::Boolean(!x.is_true()));
                Ok(())
            }
            Opcode::Or | Opcode::And => {
                let y = self.pop(name)?.is_true();
                let x = self.peek(name)?.is_true();
                let result = if op == Opcode::Or { x || y } else { x && y };
                self.settop(Value::Boolean(result));
                Ok(())
            }
            Opcode::Car => {
                let pair = self.peek(name)?;
                self.settop(pair.car(name)?);
                Ok(())
            }
            Opcode::Cdr => {
                let pair = self.peek(name)?;
                self.settop(pair.cdr(name)?);
                Ok(())
            }
            Opcode::Cons => {
                let cdr = self.pop(name)?;
                let car = self.peek(name)?;
                self.settop(Value::cons(car, cdr));
                Ok(())
            }
            Opcode::SetCar => {
                let value = self.pop(name)?;
                self.pop(name)?.set_car(value, name)
            }
            Opcode::SetCdr => {
                let value = self.pop(name)?;
                self.pop(name)?.set_cdr(value, name)
            }
            Opcode::NullP => {
                let x = self.peek(name)?;
                self.settop(Value::Boolean(matches!(x, Value::Nil)));
                Ok(())
            }
            Opcode::PairP => {
                let x = self.peek(name)?;
                self.settop(Value::Boolean(matches!(x, Value::Pair(_))));
                Ok(())
            }
            Opcode::IntegerP => {
                let x = self.peek(name)?;
                self.settop(Value::Boolean(matches!(x, Value::Integer(_))));
                Ok(())
            }
            Opcode::ReifyCc => match self.peek(name)? {
                Value::Continuation(cont) => {
                    self.settop(Value::Continuation(prelude::reify_continuation(cont)));
                    Ok(())
                }
                other => Err(Error::type_error("continuation", &other, name)),
            },
            Opcode::Print => {
                let value = self.pop(name)?;
                write!(self.output.borrow_mut(), "{value}")
                    .map_err(|e| Error::execution(format!("output failed: {e}"), name))
            }
            Opcode::Newline => {
                let mut output = self.output.borrow_mut();
                writeln!(output)
                    .and_then(|()| output.flush())
                    .map_err(|e| Error::execution(format!("output failed: {e}"), name))
            }
            Opcode::Try | Opcode::Throw | Opcode::Catch => Err(Error::execution(
                "exception handling is not implemented",
                name,
            )),
        }
    }

    fn arithmetic(&mut self, op: Opcode) -> Result<()> {
        let name = op.name();
        let y = self.pop(name)?.to_int(name)?;
        let lhs = self.peek(name)?;
        let x = lhs.to_int(name)?;
        let result = match op {
            Opcode::IAdd => x.checked_add(y),
            Opcode::ISub => x.checked_sub(y),
            Opcode::IMul => x.checked_mul(y),
            _ => {
                if y == 0 {
                    return Err(Error::value_error("divide by zero", &lhs, name));
                }
                x.checked_div(y)
            }
        };
        let result = result.ok_or_else(|| Error::value_error("integer overflow", &lhs, name))?;
        self.settop(Value::Integer(result));
        Ok(())
    }

    /// The `CONT` protocol: pop the target, check arity, move the outgoing
    /// arguments down into the target's locals and install it in place
    fn invoke(&mut self) -> Result<()> {
        let name = Opcode::Cont.name();
        let target = match self.pop(name)? {
            Value::Continuation(cont) => cont,
            other => return Err(Error::type_error("continuation", &other, name)),
        };

        let base = self.base();
        let nb_args = self.top - base;
        let proto = &target.proto;
        if nb_args != proto.arg_count {
            return Err(Error::Arity {
                name: proto.display_name().to_owned(),
                expected: proto.arg_count,
                got: nb_args,
            });
        }
        if proto.local_count + proto.upvalue_count() > self.stack.len() {
            return Err(Error::execution("stack overflow", name));
        }

        for i in 0..nb_args {
            let arg = self.stack[base + i].take();
            self.stack[i] = arg;
        }
        let stale_end = self.top.max(proto.local_count);
        for slot in &mut self.stack[nb_args..stale_end] {
            *slot = None;
        }
        self.top = nb_args;

        trace!(target = proto.display_name(), args = nb_args, "continue");
        self.install(&target, name)
    }

    /// Make `cont` the active continuation: reset pc, place the top of stack just
    /// past the locals and push the captured upvalues
    fn install(&mut self, cont: &Continuation, operation: &str) -> Result<()> {
        let proto = &cont.proto;
        if proto.local_count < proto.arg_count {
            return Err(Error::execution(
                format!(
                    "{} has {} locals for {} arguments",
                    proto.display_name(),
                    proto.local_count,
                    proto.arg_count
                ),
                operation,
            ));
        }
        if cont.upvalues.len() != proto.upvalue_count() {
            return Err(Error::execution(
                format!(
                    "continuation {} carries {} upvalues, its proto declares {}",
                    proto.display_name(),
                    cont.upvalues.len(),
                    proto.upvalue_count()
                ),
                operation,
            ));
        }
        let new_top = proto.local_count + cont.upvalues.len();
        if new_top > self.stack.len() {
            return Err(Error::execution("stack overflow", operation));
        }

        let old_top = self.top;
        self.proto = Rc::clone(proto);
        self.protos = Rc::clone(&cont.protos);
        self.pc = 0;
        for (slot, upvalue) in self.stack[proto.local_count..new_top]
            .iter_mut()
            .zip(&cont.upvalues)
        {
            *slot = Some(upvalue.clone());
        }
        if old_top > new_top {
            for slot in &mut self.stack[new_top..old_top] {
                *slot = None;
            }
        }
        self.top = new_top;
        self.high_water = self.high_water.max(new_top);
        Ok(())
    }

    fn build_continuation(&mut self, index: usize) -> Result<()> {
        let name = Opcode::BuildCont.name();
        let target = self
            .protos
            .get(index)
            .cloned()
            .ok_or_else(|| Error::execution(format!("no proto at index {index}"), name))?;

        let mut upvalues = SmallVec::with_capacity(target.upvalue_count());
        for descriptor in &target.upvalues {
            let slot = usize::from(descriptor.index);
            let slot = if descriptor.from_local {
                if slot >= self.proto.local_count {
                    return Err(Error::execution("captured local out of range", name));
                }
                slot
            } else {
                self.upvalue_slot(slot, name)?
            };
            let value = self.stack[slot]
                .clone()
                .ok_or_else(|| Error::execution("unbound local variable", name))?;
            upvalues.push(value);
        }

        trace!(proto = target.display_name(), upvalues = upvalues.len(), "built continuation");
        let cont = Continuation::new(target, upvalues, Rc::clone(&self.protos));
        self.push(Value::Continuation(Rc::new(cont)))
    }

    fn jump(&mut self, offset: i32) -> Result<()> {
        let target = self.pc as i64 + i64::from(offset);
        match usize::try_from(target) {
            Ok(target) if target < self.proto.code.len() => {
                self.pc = target;
                Ok(())
            }
            _ => Err(Error::execution(
                format!("branch target {target} out of range"),
                "BRANCH",
            )),
        }
    }

    fn constant(&self, index: usize) -> Result<Value> {
        self.proto
            .constants
            .get(index)
            .cloned()
            .ok_or_else(|| Error::execution(format!("no constant at index {index}"), "LOADCONST"))
    }

    fn global_name(&self, index: usize, operation: &str) -> Result<Symbol> {
        match self.constant(index)? {
            Value::Symbol(symbol) => Ok(symbol),
            other => Err(Error::type_error("symbol", &other, operation)),
        }
    }

    fn module(&self, operation: &str) -> Result<&Module> {
        self.proto
            .module
            .as_ref()
            .ok_or_else(|| Error::execution("proto has no module", operation))
    }

    fn upvalue_slot(&self, index: usize, operation: &str) -> Result<usize> {
        if index >= self.proto.upvalue_count() {
            return Err(Error::execution("upvalue index out of range", operation));
        }
        Ok(self.proto.local_count + index)
    }

    /// First slot above the locals and upvalues
    fn base(&self) -> usize {
        self.proto.local_count + self.proto.upvalue_count()
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.top >= self.stack.len() {
            return Err(Error::execution("stack overflow", "push"));
        }
        self.stack[self.top] = Some(value);
        self.top += 1;
        self.high_water = self.high_water.max(self.top);
        Ok(())
    }

    fn pop(&mut self, operation: &str) -> Result<Value> {
        if self.top <= self.base() {
            return Err(Error::execution("stack underflow", operation));
        }
        self.top -= 1;
        self.stack[self.top]
            .take()
            .ok_or_else(|| Error::execution("empty stack slot", operation))
    }

    fn peek(&self, operation: &str) -> Result<Value> {
        if self.top <= self.base() {
            return Err(Error::execution("stack underflow", operation));
        }
        self.stack[self.top - 1]
            .clone()
            .ok_or_else(|| Error::execution("empty stack slot", operation))
    }

    /// Replace the top of stack; only called after a successful `peek`
    fn settop(&mut self, value: Value) {
        self.stack[self.top - 1] = Some(value);
    }
}

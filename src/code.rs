//! Compiled code: prototypes, continuations and the compiled-unit artifact.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::module::Module;
use crate::opcode::Opcode;
use crate::value::Value;
use crate::{Error, Result};

/// Where a closure's captured variable lives in the frame that builds the closure.
///
/// With `from_local` set, `index` is a local slot of the defining scope. Otherwise
/// it is one of the defining scope's own upvalues, which chains the capture through
/// an enclosing closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    pub index: u8,
    pub from_local: bool,
}

impl UpvalueDescriptor {
    pub fn local(index: u8) -> Self {
        UpvalueDescriptor {
            index,
            from_local: true,
        }
    }

    pub fn inherited(index: u8) -> Self {
        UpvalueDescriptor {
            index,
            from_local: false,
        }
    }
}

/// Immutable function template shared by every continuation built from it
pub struct Proto {
    pub code: Vec<u8>,
    pub arg_count: usize,
    pub local_count: usize,
    pub upvalues: Vec<UpvalueDescriptor>,
    pub constants: Vec<Value>,
    pub module: Option<Module>,
    pub name: Option<String>,
}

impl Proto {
    /// A proto with no upvalues, constants or module; `local_count` starts at `arg_count`
    pub fn new(name: impl Into<String>, arg_count: usize, code: Vec<u8>) -> Self {
        Proto {
            code,
            arg_count,
            local_count: arg_count,
            upvalues: Vec::new(),
            constants: Vec::new(),
            module: None,
            name: Some(name.into()),
        }
    }

    pub fn with_locals(mut self, local_count: usize) -> Self {
        self.local_count = local_count;
        self
    }

    pub fn with_upvalues(mut self, upvalues: Vec<UpvalueDescriptor>) -> Self {
        self.upvalues = upvalues;
        self
    }

    pub fn with_constants(mut self, constants: Vec<Value>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.module = Some(module);
        self
    }

    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

impl fmt::Debug for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proto")
            .field("name", &self.display_name())
            .field("arg_count", &self.arg_count)
            .field("local_count", &self.local_count)
            .field("upvalues", &self.upvalues)
            .field("constants", &self.constants)
            .field("code_len", &self.code.len())
            .finish()
    }
}

/// The prototypes of one compiled unit, indexed by `BUILDCONT`
pub type ProtoTable = Rc<[Rc<Proto>]>;

pub fn empty_proto_table() -> ProtoTable {
    Rc::from(Vec::new())
}

/// A runtime closure: a proto plus the values it captured when it was built
pub struct Continuation {
    pub proto: Rc<Proto>,
    pub upvalues: SmallVec<[Value; 4]>,
    /// Table that `BUILDCONT` resolves against while this continuation runs
    pub protos: ProtoTable,
}

impl Continuation {
    pub fn new(proto: Rc<Proto>, upvalues: SmallVec<[Value; 4]>, protos: ProtoTable) -> Self {
        Continuation {
            proto,
            upvalues,
            protos,
        }
    }

    /// A continuation with no captures that cannot build closures
    pub fn standalone(proto: Proto) -> Self {
        Self::new(Rc::new(proto), SmallVec::new(), empty_proto_table())
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Continuation({}, {} upvalues)",
            self.proto.display_name(),
            self.upvalues.len()
        )
    }
}

/// Output of the code generator: an entry continuation and its prototype table.
/// The entry proto is always `protos[0]`.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub entry: Rc<Continuation>,
    pub protos: ProtoTable,
}

impl CompiledUnit {
    /// Wrap a hand-assembled table; the entry continuation is built over `protos[0]`
    pub fn from_protos(protos: Vec<Proto>) -> Result<Self> {
        if let Some(proto) = protos.iter().find(|p| p.local_count < p.arg_count) {
            return Err(Error::Compile(format!(
                "{}: {} locals cannot hold {} arguments",
                proto.display_name(),
                proto.local_count,
                proto.arg_count
            )));
        }
        let protos: ProtoTable = protos.into_iter().map(Rc::new).collect();
        let entry_proto = protos
            .first()
            .cloned()
            .ok_or_else(|| Error::Compile("compiled unit has no entry proto".into()))?;
        if entry_proto.upvalue_count() != 0 {
            return Err(Error::Compile(format!(
                "entry proto {} cannot capture upvalues",
                entry_proto.display_name()
            )));
        }
        let entry = Rc::new(Continuation::new(entry_proto, SmallVec::new(), protos.clone()));
        Ok(CompiledUnit { entry, protos })
    }
}

/// Position of a branch operand waiting for its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchPatch(usize);

/// Bytecode emitter shared by the code generator and hand-built protos
#[derive(Debug, Default, Clone)]
pub struct Assembler {
    code: Vec<u8>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        debug_assert_eq!(op.operand_width(), 0, "{} takes an operand", op.name());
        self.code.push(op.as_byte());
        self
    }

    pub fn op_u8(&mut self, op: Opcode, operand: u8) -> &mut Self {
        debug_assert_eq!(op.operand_width(), 1, "{} is not a 1-byte op", op.name());
        self.code.push(op.as_byte());
        self.code.push(operand);
        self
    }

    pub fn op_i16(&mut self, op: Opcode, operand: i16) -> &mut Self {
        debug_assert_eq!(op.operand_width(), 2, "{} is not a 2-byte op", op.name());
        self.code.push(op.as_byte());
        self.code.extend_from_slice(&operand.to_le_bytes());
        self
    }

    /// Emit a branch with a placeholder offset, to be fixed by [`Assembler::patch`]
    pub fn branch(&mut self, op: Opcode) -> BranchPatch {
        debug_assert!(op.is_branch(), "{} is not a branch", op.name());
        self.code.push(op.as_byte());
        self.code.push(0);
        BranchPatch(self.code.len() - 1)
    }

    /// Point a pending branch at the current end of code.
    /// Offsets are relative to the byte following the operand.
    pub fn patch(&mut self, patch: BranchPatch) -> Result<()> {
        let BranchPatch(at) = patch;
        let offset = self.code.len() - (at + 1);
        let offset = i8::try_from(offset)
            .map_err(|_| Error::Compile(format!("branch offset {offset} does not fit in a byte")))?;
        self.code[at] = offset.to_le_bytes()[0];
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn to_code(&self) -> Vec<u8> {
        self.code.clone()
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }
}

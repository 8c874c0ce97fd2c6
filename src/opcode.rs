//! The instruction set.
//!
//! Each instruction is one opcode byte followed by an immediate operand whose width
//! (0, 1 or 2 bytes, little-endian) depends only on the opcode. The width table
//! below is the single source of truth for the code generator, the VM decoder and
//! the disassembler.

macro_rules! define_opcodes {
    ($($variant:ident = $byte:literal, $name:literal, $width:literal;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $byte,)*
        }

        impl Opcode {
            /// Every opcode, in encoding order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// Number of immediate operand bytes following the opcode
            pub fn operand_width(self) -> usize {
                match self {
                    $(Opcode::$variant => $width,)*
                }
            }
        }
    };
}

define_opcodes! {
    Int = 0, "INT", 2;
    LoadConst = 1, "LOADCONST", 1;
    GetGlobal = 2, "GETGLOBAL", 1;
    SetGlobal = 3, "SETGLOBAL", 1;
    Load = 4, "LOAD", 1;
    Store = 5, "STORE", 1;
    GetUpval = 6, "GETUPVAL", 1;
    SetUpval = 7, "SETUPVAL", 1;
    BuildCont = 8, "BUILDCONT", 1;
    BranchIf = 9, "BRANCHIF", 1;
    BranchIfNot = 10, "BRANCHIFNOT", 1;
    Try = 11, "TRY", 2;
    Throw = 12, "THROW", 2;
    Catch = 13, "CATCH", 2;
    Cont = 14, "CONT", 0;
    Halt = 15, "HALT", 0;
    Pop = 16, "POP", 0;
    Dup = 17, "DUP", 0;
    Rot = 18, "ROT", 0;
    Nil = 19, "NIL", 0;
    True = 20, "TRUE", 0;
    False = 21, "FALSE", 0;
    Unspec = 22, "UNSPEC", 0;
    IAdd = 23, "IADD", 0;
    ISub = 24, "ISUB", 0;
    IMul = 25, "IMUL", 0;
    IDiv = 26, "IDIV", 0;
    Is = 27, "IS", 0;
    Equal = 28, "EQUAL", 0;
    Lt = 29, "LT", 0;
    Not = 30, "NOT", 0;
    Or = 31, "OR", 0;
    And = 32, "AND", 0;
    Car = 33, "CAR", 0;
    Cdr = 34, "CDR", 0;
    Cons = 35, "CONS", 0;
    SetCar = 36, "SETCAR", 0;
    SetCdr = 37, "SETCDR", 0;
    NullP = 38, "NULLP", 0;
    PairP = 39, "PAIRP", 0;
    IntegerP = 40, "INTEGERP", 0;
    ReifyCc = 41, "REIFYCC", 0;
    Print = 42, "PRINT", 0;
    Newline = 43, "NEWLINE", 0;
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Branch operands are signed offsets; every other 1-byte operand is an index
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::BranchIf | Opcode::BranchIfNot)
    }
}

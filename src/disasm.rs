//! Human-readable bytecode listings.

use std::fmt::Write;

use crate::code::{CompiledUnit, Proto};
use crate::opcode::Opcode;

/// One line per instruction, `offset:NAME(operand)`.
/// Branch offsets print signed; undecodable bytes end the listing.
pub fn disassemble(proto: &Proto) -> Vec<String> {
    let code = &proto.code;
    let mut lines = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let byte = code[pc];
        let Some(op) = Opcode::from_byte(byte) else {
            lines.push(format!("{pc}:<unknown {byte}>"));
            break;
        };
        let width = op.operand_width();
        let Some(bytes) = code.get(pc + 1..pc + 1 + width) else {
            lines.push(format!("{pc}:{}(<truncated>)", op.name()));
            break;
        };
        let operand = match bytes {
            [] => String::new(),
            [b] if op.is_branch() => i8::from_le_bytes([*b]).to_string(),
            [b] => b.to_string(),
            [lo, hi] => i16::from_le_bytes([*lo, *hi]).to_string(),
            _ => String::new(),
        };
        lines.push(format!("{pc}:{}({operand})", op.name()));
        pc += 1 + width;
    }
    lines
}

/// Listing of every proto in the unit, entry first
pub fn disassemble_unit(unit: &CompiledUnit) -> String {
    let mut out = String::new();
    for (index, proto) in unit.protos.iter().enumerate() {
        let upvalues: Vec<String> = proto
            .upvalues
            .iter()
            .map(|d| {
                if d.from_local {
                    format!("local {}", d.index)
                } else {
                    format!("upvalue {}", d.index)
                }
            })
            .collect();
        let constants: Vec<String> = proto.constants.iter().map(|c| c.to_string()).collect();

        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "proto {index} {} args={} locals={}",
            proto.display_name(),
            proto.arg_count,
            proto.local_count
        );
        if !upvalues.is_empty() {
            let _ = writeln!(out, "  upvalues: [{}]", upvalues.join(", "));
        }
        if !constants.is_empty() {
            let _ = writeln!(out, "  constants: [{}]", constants.join(", "));
        }
        for line in disassemble(proto) {
            let _ = writeln!(out, "    {line}");
        }
    }
    out
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::code::{Assembler, UpvalueDescriptor};
    use crate::value::sym;

    #[test]
    fn test_listing_format() {
        let mut asm = Assembler::new();
        asm.op_i16(Opcode::Int, -300).op(Opcode::True);
        let patch = asm.branch(Opcode::BranchIf);
        asm.op_u8(Opcode::Load, 2);
        asm.patch(patch).unwrap();
        asm.op(Opcode::Halt);
        let proto = Proto::new("p", 0, asm.into_code());
        assert_eq!(
            disassemble(&proto),
            vec!["0:INT(-300)", "3:TRUE()", "4:BRANCHIF(2)", "6:LOAD(2)", "8:HALT()"]
        );
    }

    #[test]
    fn test_bad_bytes_end_listing() {
        let proto = Proto::new("p", 0, vec![Opcode::Nil.as_byte(), 255, Opcode::Nil.as_byte()]);
        assert_eq!(disassemble(&proto), vec!["0:NIL()", "1:<unknown 255>"]);

        let proto = Proto::new("p", 0, vec![Opcode::Int.as_byte(), 1]);
        assert_eq!(disassemble(&proto), vec!["0:INT(<truncated>)"]);
    }

    #[test]
    fn test_unit_listing_has_headers() {
        let main = Proto::new(
            "main",
            0,
            Assembler::new().op_u8(Opcode::BuildCont, 1).op(Opcode::Cont).to_code(),
        )
        .with_locals(1);
        let inner = Proto::new(
            "inner",
            0,
            Assembler::new().op_u8(Opcode::GetGlobal, 0).op(Opcode::Halt).to_code(),
        )
        .with_upvalues(vec![UpvalueDescriptor::local(0)])
        .with_constants(vec![sym("x")]);
        let unit = CompiledUnit::from_protos(vec![main, inner]).unwrap();
        let text = disassemble_unit(&unit);
        assert_eq!(
            text,
            "proto 0 main args=0 locals=1\n\
             \x20   0:BUILDCONT(1)\n\
             \x20   2:CONT()\n\
             proto 1 inner args=0 locals=0\n\
             \x20 upvalues: [local 0]\n\
             \x20 constants: [x]\n\
             \x20   0:GETGLOBAL(0)\n\
             \x20   2:HALT()\n"
        );
    }
}

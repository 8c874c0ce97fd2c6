//! JSON export of compiled units for external tooling.

use serde_json::{Value as JsonValue, json};

use crate::code::{CompiledUnit, Proto};
use crate::disasm::disassemble;

fn proto_to_json(index: usize, proto: &Proto) -> JsonValue {
    let upvalues: Vec<JsonValue> = proto
        .upvalues
        .iter()
        .map(|d| json!({ "index": d.index, "from_local": d.from_local }))
        .collect();
    let constants: Vec<String> = proto.constants.iter().map(|c| c.to_string()).collect();
    json!({
        "index": index,
        "name": proto.display_name(),
        "arg_count": proto.arg_count,
        "local_count": proto.local_count,
        "upvalues": upvalues,
        "constants": constants,
        "code": proto.code,
        "listing": disassemble(proto),
    })
}

/// The whole unit: entry name plus every proto with raw code and its listing
pub fn unit_to_json(unit: &CompiledUnit) -> JsonValue {
    let protos: Vec<JsonValue> = unit
        .protos
        .iter()
        .enumerate()
        .map(|(index, proto)| proto_to_json(index, proto))
        .collect();
    json!({
        "entry": unit.entry.proto.display_name(),
        "protos": protos,
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::code::Assembler;
    use crate::opcode::Opcode;
    use crate::value::val;

    #[test]
    fn test_unit_json_shape() {
        let main = Proto::new(
            "main",
            0,
            Assembler::new().op_u8(Opcode::LoadConst, 0).op(Opcode::Halt).to_code(),
        )
        .with_constants(vec![val(100_000)]);
        let unit = CompiledUnit::from_protos(vec![main]).unwrap();
        let exported = unit_to_json(&unit);

        assert_eq!(exported["entry"], "main");
        let proto = &exported["protos"][0];
        assert_eq!(proto["name"], "main");
        assert_eq!(proto["arg_count"], 0);
        assert_eq!(proto["constants"], json!(["100000"]));
        assert_eq!(
            proto["code"],
            json!([Opcode::LoadConst.as_byte(), 0, Opcode::Halt.as_byte()])
        );
        assert_eq!(proto["listing"], json!(["0:LOADCONST(0)", "2:HALT()"]));
    }
}

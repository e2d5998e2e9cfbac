//! Chunk disassembler.

use claw_runtime::bytecode::{Chunk, OpCode};
use claw_runtime::objects::function;
use claw_runtime::value::{self, Value};

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub offset: usize,
    pub op: OpCode,
    pub operands: Vec<u8>,
}

/// Decode a chunk into its instruction sequence. `Closure` consumes two
/// extra bytes per upvalue of the referenced function.
pub fn instructions(chunk: &Chunk) -> Vec<Instr> {
    let code = chunk.code();
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let Ok(op) = OpCode::try_from(code[offset]) else {
            // Not an opcode boundary; bail rather than misread the rest.
            break;
        };
        let mut len = op.operand_len();
        if op == OpCode::Closure {
            let idx = code[offset + 1] as usize;
            let fn_const = chunk.constants()[idx];
            if fn_const.is_vm_function() {
                len += 2 * function::as_function(fn_const.as_object()).upvalue_count;
            }
        }
        let operands = code[offset + 1..offset + 1 + len].to_vec();
        out.push(Instr {
            offset,
            op,
            operands,
        });
        offset += 1 + len;
    }
    out
}

/// Render one instruction as text.
fn format_instr(chunk: &Chunk, instr: &Instr) -> String {
    let li = chunk.line_info(instr.offset);
    let head = format!("{:04} {:>4} {:?}", instr.offset, li.line, instr.op);
    match instr.op {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty => {
            let idx = instr.operands[0] as usize;
            format!(
                "{} {} '{}'",
                head,
                idx,
                constant_name(chunk.constants()[idx])
            )
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue
        | OpCode::Call | OpCode::EnsureIndexDefault => {
            format!("{} {}", head, instr.operands[0])
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let offset = ((instr.operands[0] as u16) << 8) | instr.operands[1] as u16;
            let from = instr.offset + 3;
            let target = if instr.op == OpCode::Loop {
                from - offset as usize
            } else {
                from + offset as usize
            };
            format!("{} {} -> {:04}", head, offset, target)
        }
        OpCode::Closure => {
            let idx = instr.operands[0] as usize;
            let mut s = format!(
                "{} {} '{}'",
                head,
                idx,
                constant_name(chunk.constants()[idx])
            );
            for pair in instr.operands[1..].chunks(2) {
                let kind = if pair[0] == 1 { "local" } else { "upvalue" };
                s.push_str(&format!(" | {} {}", kind, pair[1]));
            }
            s
        }
        OpCode::EnsurePropertyDefault => {
            let idx = instr.operands[0] as usize;
            format!(
                "{} {} '{}' op {}",
                head,
                idx,
                constant_name(chunk.constants()[idx]),
                instr.operands[1]
            )
        }
        _ => head,
    }
}

fn constant_name(v: Value) -> String {
    if v.is_vm_function() {
        format!("<fn {}>", function::as_function(v.as_object()).name)
    } else {
        value::to_display_string(v)
    }
}

/// Disassemble a whole chunk.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {} ==\n", name);
    for instr in instructions(chunk) {
        out.push_str(&format_instr(chunk, &instr));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_runtime::bytecode::LineInfo;
    use claw_runtime::string_pool::intern;

    #[test]
    fn test_decode_simple_sequence() {
        let li = LineInfo::new(1, 1);
        let mut chunk = Chunk::new();
        let c = chunk.add_constant(Value::number(1.0)) as u8;
        chunk.write_op(OpCode::Constant, li);
        chunk.write(c, li);
        chunk.write_op(OpCode::Nil, li);
        chunk.write_op(OpCode::Print, li);

        let instrs = instructions(&chunk);
        assert_eq!(instrs.len(), 3);
        assert_eq!(instrs[0].op, OpCode::Constant);
        assert_eq!(instrs[0].operands, vec![c]);
        assert_eq!(instrs[1].op, OpCode::Nil);
        assert_eq!(instrs[2].op, OpCode::Print);
        assert_eq!(instrs[2].offset, 3);
    }

    #[test]
    fn test_jump_target_rendering() {
        let li = LineInfo::new(1, 1);
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, li);
        chunk.write(0x00, li);
        chunk.write(0x02, li);
        chunk.write_op(OpCode::Nil, li);
        chunk.write_op(OpCode::Nil, li);

        let text = disassemble(&chunk, "jump");
        assert!(text.contains("Jump 2 -> 0005"), "got: {}", text);
    }

    #[test]
    fn test_global_name_rendering() {
        let li = LineInfo::new(3, 1);
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::string(intern("answer"))) as u8;
        chunk.write_op(OpCode::GetGlobal, li);
        chunk.write(idx, li);
        let text = disassemble(&chunk, "globals");
        assert!(text.contains("GetGlobal 0 'answer'"), "got: {}", text);
    }
}

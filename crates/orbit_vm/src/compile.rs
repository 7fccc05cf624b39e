//! Lowers a validated program into typed ops with jump targets resolved to
//! absolute indices. No text is ever generated or evaluated; the interpreter
//! in `exec` runs this form directly, charging fuel before and re-checking
//! the stack invariant after every op.

use crate::opcode::{parse_program, Instr, Opcode, Operand, ProgramError};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Push(Literal),
    Pop,
    Dup,
    Swap,
    Hide,
    Call(String),
    Invoke(String),
    Reset,
    Jmp(usize),
    JmpIf(usize),
    JmpNif(usize),
    Report,
    Add,
    Sub,
    HltChk,
    HltNChk,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    pub ops: Vec<Op>,
}

/// Compile a decoded, validated instruction sequence.
pub fn compile(program: &[Instr]) -> CompiledProgram {
    let ops = program
        .iter()
        .enumerate()
        .map(|(index, instr)| lower(instr, index))
        .collect();
    CompiledProgram { ops }
}

/// Decode, validate and compile a wire program in one step.
pub fn compile_wire(raw: &[serde_json::Value]) -> Result<CompiledProgram, ProgramError> {
    Ok(compile(&parse_program(raw)?))
}

fn lower(instr: &Instr, index: usize) -> Op {
    // Validation already ran: operand shapes and jump ranges hold here.
    match (instr.op, &instr.operand) {
        (Opcode::Push, Operand::Int(v)) => Op::Push(Literal::Int(*v)),
        (Opcode::Push, Operand::Str(s)) => Op::Push(Literal::Str(s.clone())),
        (Opcode::Pop, _) => Op::Pop,
        (Opcode::Dup, _) => Op::Dup,
        (Opcode::Swap, _) => Op::Swap,
        (Opcode::Hide, _) => Op::Hide,
        (Opcode::Call, Operand::Str(name)) => Op::Call(name.clone()),
        (Opcode::Invoke, Operand::Str(name)) => Op::Invoke(name.clone()),
        (Opcode::Reset, _) => Op::Reset,
        (Opcode::Jmp, Operand::Int(off)) => Op::Jmp(index - *off as usize),
        (Opcode::JmpIf, Operand::Int(off)) => Op::JmpIf(index - *off as usize),
        (Opcode::JmpNif, Operand::Int(off)) => Op::JmpNif(index - *off as usize),
        (Opcode::Report, _) => Op::Report,
        (Opcode::Add, _) => Op::Add,
        (Opcode::Sub, _) => Op::Sub,
        (Opcode::HltChk, _) => Op::HltChk,
        (Opcode::HltNChk, _) => Op::HltNChk,
        // `parse_program` pins the operand shape per opcode before lowering
        // ever runs.
        _ => unreachable!("operand shape validated before lowering"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_backward_jump_targets() {
        let raw = json!([["OP_PUSH", 0], ["OP_PUSH", 1], ["OP_JMP", 1], ["OP_JMPIF", 3]]);
        let prog = compile_wire(raw.as_array().unwrap()).unwrap();
        assert_eq!(prog.ops[2], Op::Jmp(1));
        assert_eq!(prog.ops[3], Op::JmpIf(0));
    }

    #[test]
    fn rejects_invalid_programs_whole() {
        let raw = json!([["OP_PUSH", 1], ["OP_PUSH", 9999]]);
        assert!(compile_wire(raw.as_array().unwrap()).is_err());
    }

    #[test]
    fn lowers_operands() {
        let raw = json!([["OP_PUSH", "abc"], ["OP_CALL", "context_Map_constructor"]]);
        let prog = compile_wire(raw.as_array().unwrap()).unwrap();
        assert_eq!(prog.ops[0], Op::Push(Literal::Str("abc".into())));
        assert_eq!(prog.ops[1], Op::Call("context_Map_constructor".into()));
    }
}

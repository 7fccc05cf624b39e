//! Instruction model: wire-shape parsing and per-opcode policy validation.
//!
//! A program arrives as a JSON array of `[tag]` / `[tag, operand]` pairs.
//! Shape errors and policy violations both reject the whole program before
//! anything executes; nothing is ever partially run.

use serde_json::Value as Json;

/// Operand bounds shared by PUSH numbers and jump offsets.
pub const NUM_MIN: i64 = -1024;
pub const NUM_MAX: i64 = 1024; // exclusive
/// Maximum length for string operands, stack strings and reports.
pub const STR_MAX: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Push,
    Pop,
    Dup,
    Swap,
    Hide,
    Call,
    Invoke,
    Reset,
    Jmp,
    JmpIf,
    JmpNif,
    Report,
    Add,
    Sub,
    HltChk,
    HltNChk,
}

impl Opcode {
    pub fn from_tag(tag: &str) -> Option<Self> {
        use Opcode::*;
        Some(match tag {
            "OP_PUSH" => Push,
            "OP_POP" => Pop,
            "OP_DUP" => Dup,
            "OP_SWAP" => Swap,
            "OP_HIDE" => Hide,
            "OP_CALL" => Call,
            "OP_INVOKE" => Invoke,
            "OP_RESET" => Reset,
            "OP_JMP" => Jmp,
            "OP_JMPIF" => JmpIf,
            "OP_JMPNIF" => JmpNif,
            "OP_REPORT" => Report,
            "OP_ADD" => Add,
            "OP_SUB" => Sub,
            "OP_HLTCHK" => HltChk,
            "OP_HLTNCHK" => HltNChk,
            _ => return None,
        })
    }

    /// Opcodes whose wire form carries a second element.
    pub fn takes_operand(self) -> bool {
        use Opcode::*;
        matches!(self, Push | Call | Invoke | Jmp | JmpIf | JmpNif)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    pub operand: Operand,
}

#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("invalid opcode")]
    Malformed,
    #[error("operand out of range at instruction {0}")]
    OperandRange(usize),
    #[error("bad string operand at instruction {0}")]
    BadString(usize),
    #[error("disallowed call target at instruction {0}")]
    BadCallName(usize),
    #[error("disallowed method name at instruction {0}")]
    BadMethodName(usize),
    #[error("jump out of range at instruction {0}")]
    BadJump(usize),
}

impl Instr {
    /// Shape-level decode of one wire element. Arity and operand type must
    /// match the tag exactly; anything else is `invalid opcode`.
    pub fn from_wire(raw: &Json) -> Result<Self, ProgramError> {
        let parts = raw.as_array().ok_or(ProgramError::Malformed)?;
        let tag = parts
            .first()
            .and_then(Json::as_str)
            .ok_or(ProgramError::Malformed)?;
        let op = Opcode::from_tag(tag).ok_or(ProgramError::Malformed)?;
        let operand = match (op.takes_operand(), parts.len()) {
            (false, 1) => Operand::None,
            (true, 2) => match &parts[1] {
                Json::Number(n) => Operand::Int(n.as_i64().ok_or(ProgramError::Malformed)?),
                Json::String(s) => Operand::Str(s.clone()),
                _ => return Err(ProgramError::Malformed),
            },
            _ => return Err(ProgramError::Malformed),
        };
        Ok(Instr { op, operand })
    }
}

/// Decode and validate a whole wire program. First violation rejects the
/// program with a single reason.
pub fn parse_program(raw: &[Json]) -> Result<Vec<Instr>, ProgramError> {
    let mut program = Vec::with_capacity(raw.len());
    for (index, elem) in raw.iter().enumerate() {
        let instr = Instr::from_wire(elem)?;
        validate_instr(&instr, index)?;
        program.push(instr);
    }
    Ok(program)
}

fn int_in_range(v: i64) -> bool {
    (NUM_MIN..NUM_MAX).contains(&v)
}

fn push_string_ok(s: &str) -> bool {
    s.len() <= STR_MAX
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'=' || b == b'_')
}

/// CALL targets must live in the capability namespace and may never name the
/// outbound-request primitive: that one is host-wired only.
fn call_name_ok(s: &str) -> bool {
    let body = match s.strip_prefix("context_") {
        Some(body) if !body.is_empty() => body,
        _ => return false,
    };
    s.len() <= STR_MAX
        && body.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        && !s.contains("http")
}

/// INVOKE names are plain alphanumerics with anything hinting at prototype,
/// global, eval, function, constructor or definition access refused outright.
fn invoke_name_ok(s: &str) -> bool {
    const REFUSED: [&str; 8] = ["prot", "glob", "eval", "Func", "func", "cons", "def", "__"];
    !s.is_empty()
        && s.len() <= STR_MAX
        && s.bytes().all(|b| b.is_ascii_alphanumeric())
        && !REFUSED.iter().any(|frag| s.contains(frag))
}

fn validate_instr(instr: &Instr, index: usize) -> Result<(), ProgramError> {
    use Opcode::*;
    match (instr.op, &instr.operand) {
        (Push, Operand::Int(v)) if int_in_range(*v) => Ok(()),
        (Push, Operand::Int(_)) => Err(ProgramError::OperandRange(index)),
        (Push, Operand::Str(s)) if push_string_ok(s) => Ok(()),
        (Push, Operand::Str(_)) => Err(ProgramError::BadString(index)),
        (Call, Operand::Str(s)) if call_name_ok(s) => Ok(()),
        (Call, Operand::Str(_)) => Err(ProgramError::BadCallName(index)),
        (Invoke, Operand::Str(s)) if invoke_name_ok(s) => Ok(()),
        (Invoke, Operand::Str(_)) => Err(ProgramError::BadMethodName(index)),
        (Jmp | JmpIf | JmpNif, Operand::Int(off)) => {
            // Backward-only: the target `index - off` must be a real index at
            // or before this instruction.
            if int_in_range(*off) && *off >= 0 && index as i64 - off >= 0 {
                Ok(())
            } else {
                Err(ProgramError::BadJump(index))
            }
        }
        (Call | Invoke | Jmp | JmpIf | JmpNif, _) => Err(ProgramError::Malformed),
        (_, Operand::None) => Ok(()),
        _ => Err(ProgramError::Malformed),
    }
}

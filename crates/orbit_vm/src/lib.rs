//! Orbit VM - metered stack VM for untrusted opcode sequences
//!
//! Goals:
//! - No-IO by construction (except the report channel provider)
//! - Deterministic execution with fuel metering and a bounded stack
//! - Typed compilation of wire opcodes, backward-only jumps
//! - Every reachable host capability counted in per-run telemetry

pub mod compile;
pub mod exec;
pub mod opcode;
pub mod runtime;
pub mod sandbox;
pub mod value;

pub use compile::{compile, compile_wire, CompiledProgram, Op};
pub use exec::{ExecError, Fuel, Machine};
pub use opcode::{parse_program, Instr, Opcode, Operand, ProgramError};
pub use runtime::{run, ChannelError, ReportChannel, RunConfig, RunError, RunOutcome, DEFAULT_FUEL};
pub use sandbox::{ExecutionContext, Sandbox};
pub use value::{Object, Value};

//! The interpreter: a fuel-metered machine over a compiled program.
//!
//! Per executed instruction (including every re-entry from a jump) the
//! machine charges one unit of fuel up front, then re-checks the full stack
//! invariant afterwards. Any violation is a typed failure; the run state
//! machine in `runtime` resolves every failure path through self-report.

use crate::compile::{CompiledProgram, Literal, Op};
use crate::opcode::STR_MAX;
use crate::runtime::ReportChannel;
use crate::sandbox::{Sandbox, HTTP_REQUEST, JSON_STRINGIFY};
use crate::value::{Object, Scalar, Value, STACK_MAX};
use serde_json::json;

pub type Fuel = u64;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("not enough gas left")]
    FuelExhausted,
    #[error("stack size too small")]
    StackUnderflow,
    #[error("stack size too big")]
    StackOverflow,
    #[error("invalid value on stack")]
    InvalidStackValue,
    #[error("argument count is not a non-negative number")]
    BadArgCount,
    #[error("unknown capability {0}")]
    UnknownCapability(String),
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),
    #[error("trying to report bad value")]
    BadReportValue,
    #[error("trying to report long string")]
    ReportTooLong,
}

pub struct Machine<'a> {
    stack: Vec<Value>,
    fuel: Fuel,
    reported: bool,
    sandbox: Sandbox,
    channel: &'a dyn ReportChannel,
}

impl<'a> Machine<'a> {
    pub fn new(channel: &'a dyn ReportChannel, fuel: Fuel) -> Self {
        Self {
            stack: Vec::new(),
            fuel,
            reported: false,
            sandbox: Sandbox::new(),
            channel,
        }
    }

    pub fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    pub fn into_context(self) -> crate::sandbox::ExecutionContext {
        self.sandbox.into_context()
    }

    /// Seed the stack (used for the prior report fetched before the run).
    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, ExecError> {
        self.stack.pop().ok_or(ExecError::StackUnderflow)
    }

    fn need(&self, depth: usize) -> Result<(), ExecError> {
        if self.stack.len() < depth {
            return Err(ExecError::StackUnderflow);
        }
        Ok(())
    }

    fn charge(&mut self) -> Result<(), ExecError> {
        if self.fuel == 0 {
            return Err(ExecError::FuelExhausted);
        }
        self.fuel -= 1;
        Ok(())
    }

    fn check_stack(&self) -> Result<(), ExecError> {
        if self.stack.len() > STACK_MAX {
            return Err(ExecError::StackOverflow);
        }
        if !self.stack.iter().all(Value::in_bounds) {
            return Err(ExecError::InvalidStackValue);
        }
        Ok(())
    }

    /// Pop the argument count (top of stack, non-negative number), then that
    /// many arguments in pop order.
    fn pop_args(&mut self) -> Result<Vec<Value>, ExecError> {
        let n = match self.pop()? {
            Value::Num(n) if n >= 0 => n as usize,
            _ => return Err(ExecError::BadArgCount),
        };
        self.need(n)?;
        let mut args = Vec::with_capacity(n);
        for _ in 0..n {
            args.push(self.pop()?);
        }
        Ok(args)
    }

    /// Self-report: at most once per run. Serializes through the counted
    /// serialize capability and issues one counted outbound submit; a failed
    /// submit is swallowed so the run still completes locally.
    pub fn report(&mut self, value: &Value) -> Result<(), ExecError> {
        if self.reported {
            return Ok(());
        }
        if matches!(value, Value::Null) {
            return Err(ExecError::BadReportValue);
        }
        let text = value.display();
        if text.len() > STR_MAX {
            return Err(ExecError::ReportTooLong);
        }
        self.reported = true;
        self.sandbox.count(JSON_STRINGIFY);
        let body = json!({ "value": text }).to_string();
        self.sandbox.count(HTTP_REQUEST);
        if let Err(e) = self.channel.submit_report(&body) {
            tracing::debug!("report submit failed: {e}");
        }
        Ok(())
    }

    pub fn has_reported(&self) -> bool {
        self.reported
    }

    /// Execute the compiled program to fall-through, halt, or failure.
    pub fn run(&mut self, program: &CompiledProgram) -> Result<(), ExecError> {
        let mut pc = 0usize;
        while pc < program.ops.len() {
            self.charge()?;
            let mut next = pc + 1;
            match &program.ops[pc] {
                Op::Push(Literal::Int(v)) => self.stack.push(Value::Num(*v)),
                Op::Push(Literal::Str(s)) => self.stack.push(Value::Str(s.clone())),
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    self.need(1)?;
                    let top = self.stack[self.stack.len() - 1].clone();
                    self.stack.push(top);
                }
                Op::Swap => {
                    self.need(2)?;
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
                Op::Hide => {
                    // [a, b, c] with c on top becomes [c, a, b].
                    self.need(3)?;
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                    self.stack.swap(len - 2, len - 3);
                }
                Op::Call(name) => {
                    self.need(1)?;
                    let args = self.pop_args()?;
                    let result = self.sandbox.invoke(name, args)?;
                    self.stack.push(result);
                }
                Op::Invoke(name) => {
                    self.need(2)?;
                    let receiver = self.pop()?;
                    let args = self.pop_args()?;
                    let result = invoke_method(&receiver, name, args)?;
                    self.stack.push(result);
                }
                Op::Reset => self.stack.clear(),
                Op::Jmp(target) => next = *target,
                Op::JmpIf(target) => {
                    if !self.pop()?.is_truthy() {
                        next = *target;
                    }
                }
                Op::JmpNif(target) => {
                    if self.pop()?.is_truthy() {
                        next = *target;
                    }
                }
                Op::Report => {
                    let v = self.pop()?;
                    self.report(&v)?;
                }
                Op::Add => {
                    self.need(2)?;
                    let a = self.pop()?;
                    let b = self.pop()?;
                    let sum = match (&a, &b) {
                        (Value::Num(x), Value::Num(y)) => Value::Num(x + y),
                        _ => Value::Str(a.display() + &b.display()),
                    };
                    self.stack.push(sum);
                }
                Op::Sub => {
                    self.need(2)?;
                    let a = self.pop()?.as_num().ok_or(ExecError::TypeMismatch("SUB operand"))?;
                    let b = self.pop()?.as_num().ok_or(ExecError::TypeMismatch("SUB operand"))?;
                    self.stack.push(Value::Num(a - b));
                }
                Op::HltChk => {
                    self.need(2)?;
                    if !self.pop()?.is_truthy() {
                        let v = self.pop()?;
                        self.report(&v)?;
                        return Ok(());
                    }
                }
                Op::HltNChk => {
                    self.need(2)?;
                    if self.pop()?.is_truthy() {
                        let v = self.pop()?;
                        self.report(&v)?;
                        return Ok(());
                    }
                }
            }
            self.check_stack()?;
            pc = next;
        }
        Ok(())
    }
}

/// Range resolution for `slice`-style methods: negative indices count from
/// the end, everything clamps to the length.
fn slice_range(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let resolve = |i: i64| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs() as usize)
        } else {
            (i as usize).min(len)
        }
    };
    let lo = resolve(start.unwrap_or(0));
    let hi = resolve(end.unwrap_or(len as i64));
    (lo, hi.max(lo))
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> i64 {
    if needle.is_empty() {
        return 0;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map_or(-1, |i| i as i64)
}

/// Instance-method dispatch for INVOKE. These sit outside the counted
/// capability surface, mirroring the source split between wrapped statics
/// and plain instance methods.
fn invoke_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
    if name == "toString" {
        return to_string_method(receiver, &args);
    }
    match receiver {
        Value::Str(s) => str_method(s, name, &args),
        Value::Obj(o) => {
            match &mut *o.borrow_mut() {
                Object::Bytes(data) => bytes_method(data, name, &args),
                Object::IntArray { width, data } => {
                    let width = *width;
                    int_array_method(width, data, name, &args)
                }
                Object::Set(items) => set_method(items, name, &args),
                Object::Map(entries) => map_method(entries, name, &args),
            }
            .map(|r| r.unwrap_or_else(|| receiver.clone()))
        }
        _ => Err(ExecError::UnknownMethod(name.to_string())),
    }
}

fn to_string_method(receiver: &Value, args: &[Value]) -> Result<Value, ExecError> {
    if let (Value::Obj(o), Some(enc)) = (receiver, args.first().and_then(|v| v.as_str())) {
        if let Object::Bytes(data) = &*o.borrow() {
            use base64::Engine;
            let text = match enc {
                "utf8" | "utf-8" => String::from_utf8_lossy(data).into_owned(),
                "ascii" => data.iter().map(|&b| (b & 0x7f) as char).collect(),
                "latin1" | "binary" => data.iter().map(|&b| b as char).collect(),
                "base64" => base64::engine::general_purpose::STANDARD.encode(data),
                "hex" => hex::encode(data),
                _ => return Err(ExecError::TypeMismatch("buffer encoding")),
            };
            return Ok(Value::Str(text));
        }
    }
    Ok(Value::Str(receiver.display()))
}

fn str_method(s: &str, name: &str, args: &[Value]) -> Result<Value, ExecError> {
    let arg_str = args.first().and_then(|v| v.as_str());
    match name {
        "includes" => {
            let sub = arg_str.ok_or(ExecError::TypeMismatch("string argument"))?;
            Ok(Value::Bool(s.contains(sub)))
        }
        "indexOf" => {
            let sub = arg_str.ok_or(ExecError::TypeMismatch("string argument"))?;
            Ok(Value::Num(find_sub(s.as_bytes(), sub.as_bytes())))
        }
        "slice" => {
            let (lo, hi) = slice_range(
                s.len(),
                args.first().and_then(Value::as_num),
                args.get(1).and_then(Value::as_num),
            );
            let sliced = s
                .get(lo..hi)
                .ok_or(ExecError::TypeMismatch("string slice bounds"))?;
            Ok(Value::Str(sliced.to_string()))
        }
        _ => Err(ExecError::UnknownMethod(name.to_string())),
    }
}

/// `Ok(None)` means "return the receiver" (fluent methods like add/set/fill).
fn bytes_method(data: &[u8], name: &str, args: &[Value]) -> Result<Option<Value>, ExecError> {
    match name {
        "equals" => {
            let equal = match args.first() {
                Some(Value::Obj(o)) => match o.try_borrow() {
                    Ok(guard) => match &*guard {
                        Object::Bytes(b) => data == b.as_slice(),
                        _ => return Err(ExecError::TypeMismatch("buffer argument")),
                    },
                    // Already mutably borrowed: the argument is the receiver.
                    Err(_) => true,
                },
                _ => return Err(ExecError::TypeMismatch("buffer argument")),
            };
            Ok(Some(Value::Bool(equal)))
        }
        "indexOf" => {
            let pos = match args.first() {
                Some(Value::Str(s)) => find_sub(data, s.as_bytes()),
                Some(Value::Num(n)) => find_sub(data, &[*n as u8]),
                _ => return Err(ExecError::TypeMismatch("indexOf argument")),
            };
            Ok(Some(Value::Num(pos)))
        }
        "slice" => {
            let (lo, hi) = slice_range(
                data.len(),
                args.first().and_then(Value::as_num),
                args.get(1).and_then(Value::as_num),
            );
            Ok(Some(Value::obj(Object::Bytes(data[lo..hi].to_vec()))))
        }
        _ => Err(ExecError::UnknownMethod(name.to_string())),
    }
}

fn int_array_method(
    width: crate::value::IntWidth,
    data: &mut Vec<i64>,
    name: &str,
    args: &[Value],
) -> Result<Option<Value>, ExecError> {
    match name {
        "at" => {
            let i = args
                .first()
                .and_then(Value::as_num)
                .ok_or(ExecError::TypeMismatch("index argument"))?;
            let idx = if i < 0 {
                data.len() as i64 + i
            } else {
                i
            };
            let v = usize::try_from(idx)
                .ok()
                .and_then(|idx| data.get(idx))
                .map_or(Value::Null, |v| Value::Num(*v));
            Ok(Some(v))
        }
        "fill" => {
            let v = args
                .first()
                .and_then(Value::as_num)
                .ok_or(ExecError::TypeMismatch("fill argument"))?;
            let wrapped = width.wrap(v);
            data.iter_mut().for_each(|slot| *slot = wrapped);
            Ok(None)
        }
        "indexOf" => {
            let v = args
                .first()
                .and_then(Value::as_num)
                .ok_or(ExecError::TypeMismatch("indexOf argument"))?;
            let pos = data.iter().position(|&x| x == v).map_or(-1, |i| i as i64);
            Ok(Some(Value::Num(pos)))
        }
        _ => Err(ExecError::UnknownMethod(name.to_string())),
    }
}

fn set_method(
    items: &mut Vec<Scalar>,
    name: &str,
    args: &[Value],
) -> Result<Option<Value>, ExecError> {
    let key = || -> Result<Scalar, ExecError> {
        Scalar::from_value(args.first().ok_or(ExecError::TypeMismatch("set argument"))?)
    };
    match name {
        "add" => {
            let k = key()?;
            if !items.contains(&k) {
                items.push(k);
            }
            Ok(None)
        }
        "has" => Ok(Some(Value::Bool(items.contains(&key()?)))),
        "delete" => {
            let k = key()?;
            let found = items.iter().position(|x| *x == k);
            if let Some(i) = found {
                items.remove(i);
            }
            Ok(Some(Value::Bool(found.is_some())))
        }
        "clear" => {
            items.clear();
            Ok(Some(Value::Null))
        }
        _ => Err(ExecError::UnknownMethod(name.to_string())),
    }
}

fn map_method(
    entries: &mut Vec<(Scalar, Value)>,
    name: &str,
    args: &[Value],
) -> Result<Option<Value>, ExecError> {
    let key = || -> Result<Scalar, ExecError> {
        Scalar::from_value(args.first().ok_or(ExecError::TypeMismatch("map key"))?)
    };
    match name {
        "set" => {
            let k = key()?;
            let v = args.get(1).cloned().unwrap_or(Value::Null);
            match entries.iter_mut().find(|(ek, _)| *ek == k) {
                Some(entry) => entry.1 = v,
                None => entries.push((k, v)),
            }
            Ok(None)
        }
        "get" => {
            let k = key()?;
            Ok(Some(
                entries
                    .iter()
                    .find(|(ek, _)| *ek == k)
                    .map_or(Value::Null, |(_, v)| v.clone()),
            ))
        }
        "has" => {
            let k = key()?;
            Ok(Some(Value::Bool(entries.iter().any(|(ek, _)| *ek == k))))
        }
        "delete" => {
            let k = key()?;
            let found = entries.iter().position(|(ek, _)| *ek == k);
            if let Some(i) = found {
                entries.remove(i);
            }
            Ok(Some(Value::Bool(found.is_some())))
        }
        "clear" => {
            entries.clear();
            Ok(Some(Value::Null))
        }
        _ => Err(ExecError::UnknownMethod(name.to_string())),
    }
}

//! Capability sandbox: the fixed table of host functions a run may reach,
//! each counted in the run's telemetry before it does anything.
//!
//! The table is explicit and statically enumerated. Entries pair the CALL
//! name with the fully-qualified telemetry key and a handler; `invoke`
//! increments the counter first, then delegates. The outbound-request
//! primitive is deliberately absent from the table: it is host-wired into
//! the run state machine (and CALL name validation refuses anything
//! containing `http` anyway), but its uses are counted under the same
//! scheme via [`Sandbox::count`].

use crate::exec::ExecError;
use crate::value::{IntWidth, Object, Scalar, Value};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Telemetry key for the host-wired outbound-request primitive.
pub const HTTP_REQUEST: &str = "http.request";
/// Telemetry key for the serialize capability (also used by self-report).
pub const JSON_STRINGIFY: &str = "JSON.stringify";

/// Per-run telemetry: capability name to invocation count. The only
/// externally observable signal of a run's behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(rename = "CALLS")]
    pub calls: BTreeMap<String, u64>,
}

impl ExecutionContext {
    pub fn count(&mut self, name: &str) {
        *self.calls.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn calls_to(&self, name: &str) -> u64 {
        self.calls.get(name).copied().unwrap_or(0)
    }
}

struct Capability {
    call_name: &'static str,
    counted_as: &'static str,
    run: fn(Vec<Value>) -> Result<Value, ExecError>,
}

/// One entry per reachable capability; nothing else exists inside a run.
const TABLE: &[Capability] = &[
    cap("context_console_log", "console.log", cap_console_log),
    cap("context_JSON_parse", "JSON.parse", cap_json_parse),
    cap("context_JSON_stringify", JSON_STRINGIFY, cap_json_stringify),
    cap("context_Buffer_from", "Buffer.from", cap_buffer_from),
    cap("context_Buffer_alloc", "Buffer.alloc", cap_buffer_alloc),
    cap("context_Buffer_allocUnsafe", "Buffer.allocUnsafe", cap_buffer_alloc),
    cap("context_Buffer_byteLength", "Buffer.byteLength", cap_buffer_byte_length),
    cap("context_Buffer_isBuffer", "Buffer.isBuffer", cap_buffer_is_buffer),
    cap("context_Buffer_compare", "Buffer.compare", cap_buffer_compare),
    cap("context_Buffer_constructor", "Buffer.constructor", cap_buffer_from),
    cap("context_Set_constructor", "Set.constructor", cap_set_constructor),
    cap("context_Map_constructor", "Map.constructor", cap_map_constructor),
    cap("context_Int8Array_constructor", "Int8Array.constructor", cap_i8_array),
    cap("context_Uint8Array_constructor", "Uint8Array.constructor", cap_u8_array),
    cap("context_Int16Array_constructor", "Int16Array.constructor", cap_i16_array),
    cap("context_Uint16Array_constructor", "Uint16Array.constructor", cap_u16_array),
    cap("context_Int32Array_constructor", "Int32Array.constructor", cap_i32_array),
    cap("context_Uint32Array_constructor", "Uint32Array.constructor", cap_u32_array),
];

const fn cap(
    call_name: &'static str,
    counted_as: &'static str,
    run: fn(Vec<Value>) -> Result<Value, ExecError>,
) -> Capability {
    Capability {
        call_name,
        counted_as,
        run,
    }
}

/// Built once per run; owns that run's telemetry.
#[derive(Default)]
pub struct Sandbox {
    ctx: ExecutionContext,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch a CALL by capability name. Counting happens before the
    /// handler runs, so failed calls are telemetry too.
    pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let entry = TABLE
            .iter()
            .find(|c| c.call_name == name)
            .ok_or_else(|| ExecError::UnknownCapability(name.to_string()))?;
        self.ctx.count(entry.counted_as);
        (entry.run)(args)
    }

    /// Count a host-wired capability use (outbound request, self-report
    /// serialization) under the same telemetry scheme as the table.
    pub fn count(&mut self, name: &str) {
        self.ctx.count(name);
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn into_context(self) -> ExecutionContext {
        self.ctx
    }
}

// ── capability handlers ─────────────────────────────────────────────

fn cap_console_log(args: Vec<Value>) -> Result<Value, ExecError> {
    let line = args
        .iter()
        .map(Value::display)
        .collect::<Vec<_>>()
        .join(" ");
    tracing::debug!(target: "orbit_vm::sandbox", "console.log: {line}");
    Ok(Value::Null)
}

fn cap_json_parse(args: Vec<Value>) -> Result<Value, ExecError> {
    let text = args
        .first()
        .and_then(|v| v.as_str())
        .ok_or(ExecError::TypeMismatch("JSON.parse input"))?;
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ExecError::TypeMismatch("JSON.parse input"))?;
    match parsed {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Num)
            .ok_or(ExecError::TypeMismatch("JSON.parse number")),
        serde_json::Value::String(s) => Ok(Value::Str(s)),
        _ => Err(ExecError::TypeMismatch("JSON.parse value")),
    }
}

fn cap_json_stringify(args: Vec<Value>) -> Result<Value, ExecError> {
    let v = args.first().ok_or(ExecError::TypeMismatch("JSON.stringify input"))?;
    let text = serde_json::to_string(&v.to_json())
        .map_err(|_| ExecError::TypeMismatch("JSON.stringify input"))?;
    Ok(Value::Str(text))
}

fn decode_str(s: &str, encoding: &str) -> Result<Vec<u8>, ExecError> {
    match encoding {
        "utf8" | "utf-8" => Ok(s.as_bytes().to_vec()),
        "ascii" | "latin1" | "binary" => Ok(s.chars().map(|c| c as u32 as u8).collect()),
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| ExecError::TypeMismatch("base64 input")),
        "hex" => hex::decode(s).map_err(|_| ExecError::TypeMismatch("hex input")),
        _ => Err(ExecError::TypeMismatch("buffer encoding")),
    }
}

fn as_byte_source(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::Obj(o) => match &*o.borrow() {
            Object::Bytes(b) => Some(b.clone()),
            Object::IntArray { data, .. } => Some(data.iter().map(|&v| v as u8).collect()),
            _ => None,
        },
        _ => None,
    }
}

fn cap_buffer_from(mut args: Vec<Value>) -> Result<Value, ExecError> {
    let encoding = if args.len() >= 2 {
        let enc = args.remove(1);
        Some(
            enc.as_str()
                .ok_or(ExecError::TypeMismatch("buffer encoding"))?
                .to_string(),
        )
    } else {
        None
    };
    let src = args.first().ok_or(ExecError::TypeMismatch("Buffer.from input"))?;
    let bytes = match src {
        Value::Str(s) => decode_str(s, encoding.as_deref().unwrap_or("utf8"))?,
        other => as_byte_source(other).ok_or(ExecError::TypeMismatch("Buffer.from input"))?,
    };
    Ok(Value::obj(Object::Bytes(bytes)))
}

fn cap_buffer_alloc(args: Vec<Value>) -> Result<Value, ExecError> {
    let n = args
        .first()
        .and_then(Value::as_num)
        .filter(|n| *n >= 0)
        .ok_or(ExecError::TypeMismatch("buffer length"))?;
    Ok(Value::obj(Object::Bytes(vec![0; n as usize])))
}

fn cap_buffer_byte_length(args: Vec<Value>) -> Result<Value, ExecError> {
    let s = args
        .first()
        .and_then(|v| v.as_str())
        .ok_or(ExecError::TypeMismatch("Buffer.byteLength input"))?;
    Ok(Value::Num(s.len() as i64))
}

fn cap_buffer_is_buffer(args: Vec<Value>) -> Result<Value, ExecError> {
    let is = matches!(
        args.first(),
        Some(Value::Obj(o)) if matches!(&*o.borrow(), Object::Bytes(_))
    );
    Ok(Value::Bool(is))
}

fn cap_buffer_compare(args: Vec<Value>) -> Result<Value, ExecError> {
    let a = args
        .first()
        .and_then(as_byte_source)
        .ok_or(ExecError::TypeMismatch("Buffer.compare input"))?;
    let b = args
        .get(1)
        .and_then(as_byte_source)
        .ok_or(ExecError::TypeMismatch("Buffer.compare input"))?;
    Ok(Value::Num(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

fn cap_set_constructor(args: Vec<Value>) -> Result<Value, ExecError> {
    let items = match args.first() {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Str(s)) => s.chars().map(|c| Scalar::Str(c.to_string())).collect(),
        Some(other) => iter_elements(other)?
            .into_iter()
            .map(|v| Scalar::from_value(&v))
            .collect::<Result<_, _>>()?,
    };
    Ok(Value::obj(Object::set_from_elems(items)))
}

fn cap_map_constructor(_args: Vec<Value>) -> Result<Value, ExecError> {
    Ok(Value::obj(Object::Map(Vec::new())))
}

/// Elements of an iterable object, in iteration order.
fn iter_elements(v: &Value) -> Result<Vec<Value>, ExecError> {
    match v {
        Value::Obj(o) => Ok(match &*o.borrow() {
            Object::Bytes(b) => b.iter().map(|&b| Value::Num(i64::from(b))).collect(),
            Object::IntArray { data, .. } => data.iter().copied().map(Value::Num).collect(),
            Object::Set(items) => items
                .iter()
                .map(|s| match s {
                    Scalar::Null => Value::Null,
                    Scalar::Bool(b) => Value::Bool(*b),
                    Scalar::Num(n) => Value::Num(*n),
                    Scalar::Str(st) => Value::Str(st.clone()),
                })
                .collect(),
            Object::Map(_) => return Err(ExecError::TypeMismatch("iterable")),
        }),
        _ => Err(ExecError::TypeMismatch("iterable")),
    }
}

fn int_array(width: IntWidth, args: Vec<Value>) -> Result<Value, ExecError> {
    let data = match args.first() {
        None => Vec::new(),
        Some(Value::Num(n)) if *n >= 0 => vec![0; *n as usize],
        Some(Value::Num(_)) => return Err(ExecError::TypeMismatch("array length")),
        Some(other) => iter_elements(other)?
            .into_iter()
            .map(|v| {
                v.as_num()
                    .map(|n| width.wrap(n))
                    .ok_or(ExecError::TypeMismatch("array element"))
            })
            .collect::<Result<_, _>>()?,
    };
    Ok(Value::obj(Object::IntArray { width, data }))
}

fn cap_i8_array(args: Vec<Value>) -> Result<Value, ExecError> {
    int_array(IntWidth::I8, args)
}
fn cap_u8_array(args: Vec<Value>) -> Result<Value, ExecError> {
    int_array(IntWidth::U8, args)
}
fn cap_i16_array(args: Vec<Value>) -> Result<Value, ExecError> {
    int_array(IntWidth::I16, args)
}
fn cap_u16_array(args: Vec<Value>) -> Result<Value, ExecError> {
    int_array(IntWidth::U16, args)
}
fn cap_i32_array(args: Vec<Value>) -> Result<Value, ExecError> {
    int_array(IntWidth::I32, args)
}
fn cap_u32_array(args: Vec<Value>) -> Result<Value, ExecError> {
    int_array(IntWidth::U32, args)
}

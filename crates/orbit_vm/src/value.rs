//! Runtime values and sandbox-constructed objects.
//!
//! Objects live behind `Rc<RefCell<_>>` so DUP copies the reference, not the
//! object: mutating a duplicated set is visible through both stack slots.

use crate::exec::ExecError;
use crate::opcode::{NUM_MAX, NUM_MIN, STR_MAX};
use std::cell::RefCell;
use std::rc::Rc;

/// Hard cap on stack depth, re-checked after every instruction.
pub const STACK_MAX: usize = 256;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Num(i64),
    Str(String),
    Obj(Rc<RefCell<Object>>),
}

#[derive(Debug)]
pub enum Object {
    Bytes(Vec<u8>),
    IntArray { width: IntWidth, data: Vec<i64> },
    /// Insertion-ordered set of scalar elements.
    Set(Vec<Scalar>),
    /// Insertion-ordered map with scalar keys.
    Map(Vec<(Scalar, Value)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl IntWidth {
    /// Wrap to the element width, the way a fixed-width array stores writes.
    pub fn wrap(self, v: i64) -> i64 {
        match self {
            IntWidth::I8 => v as i8 as i64,
            IntWidth::U8 => v as u8 as i64,
            IntWidth::I16 => v as i16 as i64,
            IntWidth::U16 => v as u16 as i64,
            IntWidth::I32 => v as i32 as i64,
            IntWidth::U32 => v as u32 as i64,
        }
    }
}

/// Set elements and map keys: values with equality semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Num(i64),
    Str(String),
}

impl Scalar {
    pub fn from_value(v: &Value) -> Result<Self, ExecError> {
        Ok(match v {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Num(n) => Scalar::Num(*n),
            Value::Str(s) => Scalar::Str(s.clone()),
            Value::Obj(_) => return Err(ExecError::TypeMismatch("collection element")),
        })
    }
}

impl Value {
    pub fn obj(o: Object) -> Self {
        Value::Obj(Rc::new(RefCell::new(o)))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Obj(_) => true,
        }
    }

    /// String coercion, matching each object's `toString`.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Obj(o) => match &*o.borrow() {
                Object::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                Object::IntArray { data, .. } => data
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                Object::Set(_) => "[object Set]".into(),
                Object::Map(_) => "[object Map]".into(),
            },
        }
    }

    /// Per-value shape bound, part of the stack invariant: numbers stay in
    /// operand range, everything sized stays at or under 1024.
    pub fn in_bounds(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) => true,
            Value::Num(n) => (NUM_MIN..NUM_MAX).contains(n),
            Value::Str(s) => s.len() <= STR_MAX,
            Value::Obj(o) => {
                let len = match &*o.borrow() {
                    Object::Bytes(b) => b.len(),
                    Object::IntArray { data, .. } => data.len(),
                    Object::Set(items) => items.len(),
                    Object::Map(entries) => entries.len(),
                };
                len <= STR_MAX
            }
        }
    }

    pub fn as_num(&self) -> Option<i64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// JSON view used by the serialize capability.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value as Json};
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => json!(b),
            Value::Num(n) => json!(n),
            Value::Str(s) => json!(s),
            Value::Obj(o) => match &*o.borrow() {
                Object::Bytes(b) => json!({ "type": "Buffer", "data": b }),
                Object::IntArray { data, .. } => {
                    let mut map = Map::new();
                    for (i, v) in data.iter().enumerate() {
                        map.insert(i.to_string(), json!(v));
                    }
                    Json::Object(map)
                }
                // Sets and maps serialize as empty objects, as the source
                // environment did.
                Object::Set(_) | Object::Map(_) => Json::Object(Map::new()),
            },
        }
    }
}

impl Object {
    pub fn set_from_elems(elems: Vec<Scalar>) -> Object {
        let mut items: Vec<Scalar> = Vec::new();
        for e in elems {
            if !items.contains(&e) {
                items.push(e);
            }
        }
        Object::Set(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Num(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Num(-1).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(Value::obj(Object::Set(vec![])).is_truthy());
    }

    #[test]
    fn display_joins_int_arrays() {
        let arr = Value::obj(Object::IntArray {
            width: IntWidth::U8,
            data: vec![0, 1, 2],
        });
        assert_eq!(arr.display(), "0,1,2");
        assert_eq!(Value::obj(Object::Set(vec![])).display(), "[object Set]");
    }

    #[test]
    fn bounds_cover_numbers_and_sizes() {
        assert!(Value::Num(1023).in_bounds());
        assert!(!Value::Num(1024).in_bounds());
        assert!(!Value::Num(-1025).in_bounds());
        assert!(Value::Str("a".repeat(1024)).in_bounds());
        assert!(!Value::Str("a".repeat(1025)).in_bounds());
        assert!(!Value::obj(Object::Bytes(vec![0; 1025])).in_bounds());
    }

    #[test]
    fn width_wrapping() {
        assert_eq!(IntWidth::U8.wrap(256), 0);
        assert_eq!(IntWidth::U8.wrap(-1), 255);
        assert_eq!(IntWidth::I8.wrap(200), -56);
        assert_eq!(IntWidth::U16.wrap(70000), 4464);
        assert_eq!(IntWidth::I32.wrap(i64::from(i32::MIN) - 1), i64::from(i32::MAX));
    }

    #[test]
    fn dup_shares_object_identity() {
        let set = Value::obj(Object::Set(vec![]));
        let dup = set.clone();
        if let (Value::Obj(a), Value::Obj(b)) = (&set, &dup) {
            a.borrow_mut();
            assert!(Rc::ptr_eq(a, b));
        } else {
            unreachable!();
        }
    }
}

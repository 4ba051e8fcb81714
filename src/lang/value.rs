use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::exception::{ExcKind, Exception};
use super::function::FunctionWrapper;
use crate::runtime::builtins::Builtin;
use crate::runtime::formatting::format_static;

/// Entry of a code object's constant table.
///
/// Constants are the only values that appear in serialized bytecode, so they
/// are kept apart from the richer runtime [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for Const {
    fn from(n: i64) -> Self {
        Const::Int(n)
    }
}

impl From<i32> for Const {
    fn from(n: i32) -> Self {
        Const::Int(n as i64)
    }
}

impl From<f64> for Const {
    fn from(n: f64) -> Self {
        Const::Float(n)
    }
}

impl From<bool> for Const {
    fn from(b: bool) -> Self {
        Const::Bool(b)
    }
}

impl From<&str> for Const {
    fn from(s: &str) -> Self {
        Const::Str(s.to_string())
    }
}

/// Runtime value seen by the interpreter.
///
/// Heap-like values are shared through `Rc`; the interpreter never copies an
/// exception or a function, it only clones the handle.
#[derive(Debug, Clone)]
pub enum Value {
    None,

    Bool(bool),

    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating-point number.
    Float(f64),

    Str(Rc<str>),

    /// A user function, translated on first call.
    Function(Rc<FunctionWrapper>),

    Builtin(Builtin),

    /// An exception class; calling it constructs an [`Exception`].
    ExcType(ExcKind),

    Exception(Rc<Exception>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::ExcType(_) => "type",
            Value::Exception(e) => e.kind.name(),
        }
    }

    /// Host truth convention: None, False, zero and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Function(_) | Value::Builtin(_) | Value::ExcType(_) | Value::Exception(_) => {
                true
            }
        }
    }

    /// Source-like rendering: strings are quoted, floats keep their point.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            Value::Float(x) => format_static("%r", self, 32).unwrap_or_else(|_| format!("{:?}", x)),
            other => other.to_string(),
        }
    }
}

impl From<Const> for Value {
    fn from(c: Const) -> Self {
        match c {
            Const::None => Value::None,
            Const::Bool(b) => Value::Bool(b),
            Const::Int(n) => Value::Int(n),
            Const::Float(n) => Value::Float(n),
            Const::Str(s) => Value::Str(s.into()),
        }
    }
}

impl From<&Const> for Value {
    fn from(c: &Const) -> Self {
        Value::from(c.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

/// Structural equality used by tests and constant folding; identity for
/// functions and exceptions. Host `==` semantics live in `runtime::ops`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::ExcType(a), Value::ExcType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => match format_static("%d", self, 24) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{}", n),
            },
            Value::Float(x) => match format_static("%g", self, 32) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{:?}", x),
            },
            Value::Str(s) => write!(f, "{}", s),
            Value::Function(w) => write!(f, "<function {}>", w.name()),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::ExcType(k) => write!(f, "<class '{}'>", k.name()),
            Value::Exception(e) => write!(f, "{}", e),
        }
    }
}

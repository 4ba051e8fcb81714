//! Operator semantics of the interpreted language.
//!
//! Faults are returned as interpreted-program [`Exception`]s so the
//! interpreter can dispatch them through handler regions.

use std::cmp::Ordering;

use crate::bytecode::op::{BinOp, CmpOp, UnaryOp};
use crate::lang::exception::{ExcKind, Exception};
use crate::lang::value::Value;

pub type OpResult = Result<Value, Exception>;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

pub fn type_error(msg: impl Into<String>) -> Exception {
    Exception::with_message(ExcKind::TypeError, msg)
}

fn overflow() -> Exception {
    Exception::with_message(ExcKind::OverflowError, "integer overflow")
}

fn zero_division(msg: &str) -> Exception {
    Exception::with_message(ExcKind::ZeroDivisionError, msg)
}

fn unsupported(op: &str, a: &Value, b: &Value) -> Exception {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

// =============================================================================
// Binary
// =============================================================================

pub fn binary(op: BinOp, a: &Value, b: &Value) -> OpResult {
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            return Ok(Value::Str(format!("{}{}", x, y).into()));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) => {
            if let Some(Num::Int(n)) = num(n) {
                return repeat(s, n);
            }
        }
        _ => {}
    }

    match (num(a), num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => int_binary(op, x, y),
        (Some(x), Some(y)) => float_binary(op, as_f64(x), as_f64(y)),
        _ => Err(unsupported(op.symbol(), a, b)),
    }
}

/// Longest string a repetition may build.
const MAX_REPEAT_LEN: usize = 1 << 30;

fn repeat(s: &str, times: i64) -> OpResult {
    let times = usize::try_from(times).unwrap_or(0);
    match s.len().checked_mul(times) {
        Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::Str(s.repeat(times).into())),
        _ => Err(Exception::with_message(
            ExcKind::OverflowError,
            "repeated string is too long",
        )),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> OpResult {
    let r = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            a.checked_div(b).map(|q| {
                if a % b != 0 && ((a < 0) != (b < 0)) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
    };
    r.map(Value::Int).ok_or_else(overflow)
}

fn float_binary(op: BinOp, a: f64, b: f64) -> OpResult {
    let r = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float divmod()"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
    };
    Ok(Value::Float(r))
}

// =============================================================================
// Unary
// =============================================================================

pub fn unary(op: UnaryOp, a: &Value) -> OpResult {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!a.is_truthy())),
        UnaryOp::Neg => match num(a) {
            Some(Num::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(type_error(format!(
                "bad operand type for unary -: '{}'",
                a.type_name()
            ))),
        },
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// `==` across all values: numbers compare by value, everything else
/// structurally (identity for functions and exceptions).
pub fn equals(a: &Value, b: &Value) -> bool {
    match (num(a), num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
        (Some(x), Some(y)) => as_f64(x) == as_f64(y),
        _ => a == b,
    }
}

fn ordering(op: CmpOp, a: &Value, b: &Value) -> Result<Option<Ordering>, Exception> {
    match (num(a), num(b), a, b) {
        (Some(Num::Int(x)), Some(Num::Int(y)), _, _) => Ok(Some(x.cmp(&y))),
        (Some(x), Some(y), _, _) => Ok(as_f64(x).partial_cmp(&as_f64(y))),
        (_, _, Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        _ => Err(type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> OpResult {
    let r = match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::Ne => !equals(a, b),
        CmpOp::Lt => ordering(op, a, b)? == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering(op, a, b)?, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering(op, a, b)? == Some(Ordering::Greater),
        CmpOp::Ge => matches!(
            ordering(op, a, b)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
    };
    Ok(Value::Bool(r))
}

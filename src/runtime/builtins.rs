use crate::lang::exception::{ExcKind, Exception};
use crate::lang::value::Value;
use crate::runtime::ops::{type_error, OpResult};

/// Builtin functions resolvable as globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Only meaningful as a `for` iterable; the translator lowers it.
    Range,
    Str,
    Abs,
    Len,
}

impl Builtin {
    pub const ALL: [Builtin; 4] = [Builtin::Range, Builtin::Str, Builtin::Abs, Builtin::Len];

    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Abs => "abs",
            Builtin::Len => "len",
        }
    }

    pub fn call(self, args: &[Value]) -> OpResult {
        let [x] = args else {
            return Err(type_error(format!(
                "{}() takes exactly 1 argument ({} given)",
                self.name(),
                args.len()
            )));
        };

        match self {
            Builtin::Range => Err(type_error(
                "range() is only supported as a for-loop iterable",
            )),
            Builtin::Str => match x {
                Value::Str(_) => Ok(x.clone()),
                other => Ok(Value::Str(other.to_string().into())),
            },
            Builtin::Abs => match x {
                Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(|| {
                    Exception::with_message(ExcKind::OverflowError, "integer overflow")
                }),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            },
            Builtin::Len => match x {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(b));
        }
        assert_eq!(Builtin::from_name("print"), None);
    }

    #[test]
    fn test_str_uses_value_rendering() {
        assert_eq!(Builtin::Str.call(&[Value::Int(42)]).unwrap(), Value::from("42"));
        assert_eq!(Builtin::Str.call(&[Value::Float(2.5)]).unwrap(), Value::from("2.5"));
        assert_eq!(Builtin::Str.call(&[Value::None]).unwrap(), Value::from("None"));
    }

    #[test]
    fn test_abs_and_len() {
        assert_eq!(Builtin::Abs.call(&[Value::Int(-4)]).unwrap(), Value::Int(4));
        assert_eq!(Builtin::Abs.call(&[Value::Float(-0.5)]).unwrap(), Value::Float(0.5));
        assert_eq!(Builtin::Len.call(&[Value::from("héllo")]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_faults_are_type_errors() {
        let err = Builtin::Len.call(&[Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);
        let err = Builtin::Abs.call(&[]).unwrap_err();
        assert!(err.to_string().contains("takes exactly 1 argument (0 given)"));
        let err = Builtin::Range.call(&[Value::Int(3)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);
        let err = Builtin::Abs.call(&[Value::Int(i64::MIN)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
    }
}

use super::value::Value;

/// Built-in exception classes known to the runtime.
///
/// The hierarchy mirrors the host language's builtin exception tree; only
/// single inheritance is modelled, so `is-instance-of` is a walk up the
/// parent chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    NameError,
    UnboundLocalError,
    RuntimeError,
    TypeError,
    ValueError,
    StopIteration,
}

impl ExcKind {
    pub const ALL: [ExcKind; 14] = [
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::LookupError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::RuntimeError,
        ExcKind::TypeError,
        ExcKind::ValueError,
        ExcKind::StopIteration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::StopIteration => "StopIteration",
        }
    }

    pub fn from_name(name: &str) -> Option<ExcKind> {
        ExcKind::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn parent(self) -> Option<ExcKind> {
        match self {
            ExcKind::BaseException => None,
            ExcKind::Exception => Some(ExcKind::BaseException),
            ExcKind::ArithmeticError
            | ExcKind::LookupError
            | ExcKind::NameError
            | ExcKind::RuntimeError
            | ExcKind::TypeError
            | ExcKind::ValueError
            | ExcKind::StopIteration => Some(ExcKind::Exception),
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => Some(ExcKind::ArithmeticError),
            ExcKind::IndexError | ExcKind::KeyError => Some(ExcKind::LookupError),
            ExcKind::UnboundLocalError => Some(ExcKind::NameError),
        }
    }

    /// True when `self` is `other` or derives from it.
    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut cur = Some(self);
        while let Some(kind) = cur {
            if kind == other {
                return true;
            }
            cur = kind.parent();
        }
        false
    }
}

impl std::fmt::Display for ExcKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An interpreted-program exception: a class tag plus the constructor
/// arguments it was raised with.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExcKind,
    pub args: Vec<Value>,
}

impl Exception {
    pub fn new(kind: ExcKind, args: Vec<Value>) -> Self {
        Exception { kind, args }
    }

    /// Exception carrying a single message string, as raised by the runtime
    /// itself for faults such as type errors.
    pub fn with_message(kind: ExcKind, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Exception {
            kind,
            args: vec![Value::Str(message.into())],
        }
    }

    pub fn is_instance(&self, kind: ExcKind) -> bool {
        self.kind.is_subclass_of(kind)
    }

    /// First constructor argument, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.args.first()
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.args.as_slice() {
            [] => write!(f, "{}", self.kind),
            [Value::Str(s)] => write!(f, "{}: {}", self.kind, s),
            [single] => write!(f, "{}: {}", self.kind, single),
            many => {
                write!(f, "{}: (", self.kind)?;
                for (i, arg) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg.repr())?;
                }
                write!(f, ")")
            }
        }
    }
}

use std::rc::Rc;

use crate::bytecode::decode_error::DecodeError;
use crate::cfa::cfg_error::MalformedCfgError;
use crate::lang::exception::Exception;
use crate::translate::translate_error::TranslateError;

/// Why an interpretation stopped without a return value.
#[derive(Debug)]
pub enum InterpError {
    /// An interpreted-program exception no handler caught. `exception` is the
    /// object that was raised, not a copy.
    Uncaught {
        exception: Rc<Exception>,
        /// Function names from the raising frame outward.
        traceback: Vec<String>,
    },
    StackDepthExceeded { limit: usize, function: String },
    StepLimitExceeded { limit: usize },
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
    Decode(DecodeError),
    Translate(TranslateError),
    Cfg(MalformedCfgError),
    /// Malformed code reached the interpreter.
    Internal(String),
}

impl std::fmt::Display for InterpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpError::Uncaught {
                exception,
                traceback,
            } => {
                write!(f, "runtime error: uncaught {}", exception)?;
                if !traceback.is_empty() {
                    write!(f, "\n  call stack:")?;
                    for (i, frame) in traceback.iter().rev().enumerate() {
                        write!(f, "\n    {}: {}", i, frame)?;
                    }
                }
                Ok(())
            }
            InterpError::StackDepthExceeded { limit, function } => write!(
                f,
                "runtime error: maximum call depth {} exceeded calling '{}'",
                limit, function
            ),
            InterpError::StepLimitExceeded { limit } => {
                write!(f, "runtime error: step limit {} exceeded", limit)
            }
            InterpError::Arity {
                function,
                expected,
                got,
            } => write!(
                f,
                "runtime error: {}() takes {} arguments ({} given)",
                function, expected, got
            ),
            InterpError::Decode(e) => write!(f, "{}", e),
            InterpError::Translate(e) => write!(f, "{}", e),
            InterpError::Cfg(e) => write!(f, "{}", e),
            InterpError::Internal(msg) => write!(f, "runtime error: internal: {}", msg),
        }
    }
}

impl std::error::Error for InterpError {}

impl InterpError {
    pub fn internal(msg: impl Into<String>) -> Self {
        InterpError::Internal(msg.into())
    }

    /// The uncaught exception object, if that is why execution stopped.
    pub fn uncaught_exception(&self) -> Option<&Rc<Exception>> {
        match self {
            InterpError::Uncaught { exception, .. } => Some(exception),
            _ => None,
        }
    }
}

/// Pipeline failures met while preparing a callee are fatal to the run.
impl From<crate::error::Error> for InterpError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::Decode(e) => InterpError::Decode(e),
            crate::error::Error::Translate(e) => InterpError::Translate(e),
            crate::error::Error::Cfg(e) => InterpError::Cfg(e),
            crate::error::Error::Interp(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::exception::ExcKind;
    use crate::lang::value::Value;

    #[test]
    fn test_uncaught_display_lists_call_stack() {
        let err = InterpError::Uncaught {
            exception: Rc::new(Exception::new(ExcKind::ValueError, vec![Value::Int(15)])),
            traceback: vec!["inner".to_string(), "outer".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("runtime error: uncaught ValueError: 15"));
        assert!(msg.contains("0: outer"));
        assert!(msg.contains("1: inner"));
    }

    #[test]
    fn test_uncaught_exception_keeps_identity() {
        let exc = Rc::new(Exception::new(ExcKind::TypeError, vec![]));
        let err = InterpError::Uncaught {
            exception: exc.clone(),
            traceback: vec![],
        };
        assert!(Rc::ptr_eq(err.uncaught_exception().unwrap(), &exc));
        assert!(InterpError::internal("x").uncaught_exception().is_none());
    }

    #[test]
    fn test_from_pipeline_error() {
        let e: InterpError = crate::error::Error::Translate(TranslateError::unresolved("g", 3)).into();
        assert!(matches!(e, InterpError::Translate(_)));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranslateError {
    /// A global the module namespace and builtins don't define
    UnresolvedGlobal { name: String, offset: usize },
    /// A decoded operation in a position this lowering doesn't handle
    Unsupported {
        offset: usize,
        what: String,
        hint: Option<String>,
    },
    /// Two paths reach the same block with different stack depths
    StackMismatch {
        offset: usize,
        expected: usize,
        found: usize,
    },
    /// An operation pops more than the stack holds
    StackUnderflow { offset: usize },
    /// Control runs past the last instruction
    FallsOffEnd { offset: usize },
    /// The function's module namespace was dropped
    DetachedFunction { name: String },
}

impl TranslateError {
    pub fn unsupported(offset: usize, what: impl Into<String>) -> Self {
        TranslateError::Unsupported {
            offset,
            what: what.into(),
            hint: None,
        }
    }

    pub fn unsupported_with_hint(
        offset: usize,
        what: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        TranslateError::Unsupported {
            offset,
            what: what.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn unresolved(name: &str, offset: usize) -> Self {
        TranslateError::UnresolvedGlobal {
            name: name.to_string(),
            offset,
        }
    }
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::UnresolvedGlobal { name, offset } => write!(
                f,
                "translate error at {}: global '{}' is not defined",
                offset, name
            ),
            TranslateError::Unsupported { offset, what, hint } => {
                write!(f, "translate error at {}: {}", offset, what)?;
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            TranslateError::StackMismatch {
                offset,
                expected,
                found,
            } => write!(
                f,
                "translate error at {}: stack depth {} does not match {} from an earlier path",
                offset, found, expected
            ),
            TranslateError::StackUnderflow { offset } => {
                write!(f, "translate error at {}: stack underflow", offset)
            }
            TranslateError::FallsOffEnd { offset } => write!(
                f,
                "translate error at {}: control falls off the end of the code",
                offset
            ),
            TranslateError::DetachedFunction { name } => write!(
                f,
                "translate error: function '{}' has no module namespace",
                name
            ),
        }
    }
}

impl std::error::Error for TranslateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_display() {
        let msg = TranslateError::unresolved("frob", 7).to_string();
        assert!(msg.contains("'frob'"));
        assert!(msg.contains("at 7"));
    }

    #[test]
    fn test_unsupported_with_hint() {
        let err = TranslateError::unsupported_with_hint(3, "GET_ITER on a non-range", "iterate over range()");
        let msg = err.to_string();
        assert!(msg.contains("GET_ITER"));
        assert!(msg.contains("hint: iterate over range()"));
    }

    #[test]
    fn test_stack_mismatch_display() {
        let err = TranslateError::StackMismatch {
            offset: 12,
            expected: 1,
            found: 2,
        };
        assert!(err.to_string().contains("stack depth 2 does not match 1"));
    }
}

use crate::bytecode::opcode::opname;

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// An opcode byte the decoder doesn't know how to handle
    UnknownOpcode {
        offset: usize,
        opcode: u8,
        hint: Option<String>,
    },
    /// The stream ends inside an instruction's argument
    Truncated { offset: usize, opcode: u8 },
    /// An argument indexes past the end of one of the code object's tables
    BadIndex {
        offset: usize,
        table: &'static str,
        index: usize,
        len: usize,
    },
    /// A `COMPARE_OP` argument outside the supported comparisons
    BadCompare { offset: usize, arg: u16 },
    /// A jump whose resolved target is not the start of an instruction
    BadTarget { offset: usize, target: usize },
    /// A recognized opcode used with an argument this pipeline doesn't lower
    UnsupportedArg {
        offset: usize,
        opcode: u8,
        arg: u16,
        hint: Option<String>,
    },
}

impl DecodeError {
    pub fn unknown_opcode(offset: usize, opcode: u8) -> Self {
        DecodeError::UnknownOpcode {
            offset,
            opcode,
            hint: Some(
                "this may be a host language feature not yet supported by the translator"
                    .to_string(),
            ),
        }
    }

    pub fn truncated(offset: usize, opcode: u8) -> Self {
        DecodeError::Truncated { offset, opcode }
    }

    pub fn bad_index(offset: usize, table: &'static str, index: usize, len: usize) -> Self {
        DecodeError::BadIndex {
            offset,
            table,
            index,
            len,
        }
    }

    pub fn unsupported_arg(offset: usize, opcode: u8, arg: u16, hint: impl Into<String>) -> Self {
        DecodeError::UnsupportedArg {
            offset,
            opcode,
            arg,
            hint: Some(hint.into()),
        }
    }

    /// Byte offset of the offending instruction.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::Truncated { offset, .. }
            | DecodeError::BadIndex { offset, .. }
            | DecodeError::BadCompare { offset, .. }
            | DecodeError::BadTarget { offset, .. }
            | DecodeError::UnsupportedArg { offset, .. } => *offset,
        }
    }
}

fn describe(opcode: u8) -> String {
    match opname(opcode) {
        Some(name) => name.to_string(),
        None => format!("opcode {}", opcode),
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnknownOpcode {
                offset,
                opcode,
                hint,
            } => {
                write!(f, "decode error at {}: unknown opcode {}", offset, opcode)?;
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            DecodeError::Truncated { offset, opcode } => write!(
                f,
                "decode error at {}: {} is missing its argument",
                offset,
                describe(*opcode)
            ),
            DecodeError::BadIndex {
                offset,
                table,
                index,
                len,
            } => write!(
                f,
                "decode error at {}: index {} out of range for {} (len {})",
                offset, index, table, len
            ),
            DecodeError::BadCompare { offset, arg } => write!(
                f,
                "decode error at {}: unsupported comparison {}",
                offset, arg
            ),
            DecodeError::BadTarget { offset, target } => write!(
                f,
                "decode error at {}: jump target {} is not an instruction boundary",
                offset, target
            ),
            DecodeError::UnsupportedArg {
                offset,
                opcode,
                arg,
                hint,
            } => {
                write!(
                    f,
                    "decode error at {}: {} with argument {} is not supported",
                    offset,
                    describe(*opcode),
                    arg
                )?;
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::{LOAD_CONST, RAISE_VARARGS};

    #[test]
    fn test_unknown_opcode_display() {
        let err = DecodeError::unknown_opcode(12, 3);

        let msg = err.to_string();
        assert!(msg.contains("at 12"));
        assert!(msg.contains("unknown opcode 3"));
        assert!(msg.contains("hint"));
    }

    #[test]
    fn test_truncated_names_opcode() {
        let msg = DecodeError::truncated(4, LOAD_CONST).to_string();
        assert!(msg.contains("LOAD_CONST"));
        assert!(msg.contains("missing its argument"));
    }

    #[test]
    fn test_bad_index_display() {
        let msg = DecodeError::bad_index(0, "consts", 7, 2).to_string();
        assert!(msg.contains("index 7"));
        assert!(msg.contains("consts"));
        assert!(msg.contains("len 2"));
    }

    #[test]
    fn test_unsupported_arg_display() {
        let err = DecodeError::unsupported_arg(9, RAISE_VARARGS, 3, "only raise and raise x");
        let msg = err.to_string();
        assert!(msg.contains("RAISE_VARARGS"));
        assert!(msg.contains("argument 3"));
        assert!(msg.contains("only raise and raise x"));
    }

    #[test]
    fn test_offset_accessor() {
        assert_eq!(DecodeError::BadTarget { offset: 5, target: 2 }.offset(), 5);
        assert_eq!(DecodeError::BadCompare { offset: 8, arg: 9 }.offset(), 8);
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = DecodeError::truncated(0, LOAD_CONST);
        let _: &dyn std::error::Error = &err;
    }
}

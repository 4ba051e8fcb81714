use serde::{Deserialize, Serialize};

use crate::lang::value::Const;

/// A host code object, as produced by the host compiler's function
/// introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCode {
    pub name: String,

    /// Number of leading `varnames` that are formal parameters.
    pub argcount: u16,

    /// Local variable names; `LOAD_FAST`/`STORE_FAST` index into this.
    pub varnames: Vec<String>,

    /// Global names; `LOAD_GLOBAL` indexes into this.
    pub names: Vec<String>,

    pub consts: Vec<Const>,

    /// Instruction stream.
    pub code: Vec<u8>,
}

impl RawCode {
    pub fn params(&self) -> &[String] {
        let n = (self.argcount as usize).min(self.varnames.len());
        &self.varnames[..n]
    }

    /// Serialize into the compact on-disk cache format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<RawCode, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::{LOAD_FAST, RETURN_VALUE};

    fn sample() -> RawCode {
        RawCode {
            name: "f".to_string(),
            argcount: 1,
            varnames: vec!["x".to_string(), "tmp".to_string()],
            names: vec!["g".to_string()],
            consts: vec![Const::None, Const::Int(7), Const::Str("s".to_string())],
            code: vec![LOAD_FAST, 0, 0, RETURN_VALUE],
        }
    }

    #[test]
    fn test_params_are_leading_varnames() {
        assert_eq!(sample().params(), &["x".to_string()]);
    }

    #[test]
    fn test_params_clamped_to_varnames() {
        let mut raw = sample();
        raw.argcount = 5;
        assert_eq!(raw.params().len(), 2);
    }

    #[test]
    fn test_cache_format_restores_code_object() {
        let raw = sample();
        let bytes = raw.to_bytes().unwrap();
        assert_eq!(RawCode::from_bytes(&bytes).unwrap(), raw);
    }

    #[test]
    fn test_cache_format_rejects_garbage() {
        assert!(RawCode::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}

use crate::bytecode::op::{BinOp, CmpOp, UnaryOp};
use crate::bytecode::opcode::*;
use crate::bytecode::raw::RawCode;
use crate::lang::value::Const;

#[derive(Debug)]
pub struct AsmError {
    pub message: String,
}

impl std::fmt::Display for AsmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assembler error: {}", self.message)
    }
}

impl std::error::Error for AsmError {}

impl AsmError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A forward-referencable position in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct Fixup {
    /// Byte position of the 16-bit argument to patch.
    at: usize,
    label: Label,
    relative: bool,
}

/// Label-based builder for host code objects.
///
/// Produces the byte layout a conforming host compiler would: one opcode
/// byte, plus a little-endian `u16` argument for opcodes at or above
/// `HAVE_ARGUMENT`. Relative jump arguments count from the next instruction.
pub struct Assembler {
    name: String,
    argcount: u16,
    varnames: Vec<String>,
    names: Vec<String>,
    consts: Vec<Const>,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    pub fn new(name: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            argcount: params.len() as u16,
            varnames: params.iter().map(|p| p.to_string()).collect(),
            names: Vec::new(),
            consts: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    // =========================================================================
    // Raw emission
    // =========================================================================

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    pub fn op_arg(&mut self, opcode: u8, arg: u16) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    /// Emit a jump-carrying opcode whose target is resolved in [`finish`].
    ///
    /// [`finish`]: Assembler::finish
    pub fn jump_op(&mut self, opcode: u8, label: Label) -> &mut Self {
        self.code.push(opcode);
        let at = self.code.len();
        self.code.extend_from_slice(&[0, 0]);
        self.fixups.push(Fixup {
            at,
            label,
            relative: is_relative_jump(opcode),
        });
        self
    }

    // =========================================================================
    // Table-aware helpers
    // =========================================================================

    pub fn load_const(&mut self, c: impl Into<Const>) -> &mut Self {
        let c = c.into();
        let index = match self.consts.iter().position(|k| *k == c) {
            Some(i) => i,
            None => {
                self.consts.push(c);
                self.consts.len() - 1
            }
        };
        self.op_arg(LOAD_CONST, index as u16)
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Const::None)
    }

    fn var_index(&mut self, name: &str) -> u16 {
        match self.varnames.iter().position(|v| v == name) {
            Some(i) => i as u16,
            None => {
                self.varnames.push(name.to_string());
                (self.varnames.len() - 1) as u16
            }
        }
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.var_index(name);
        self.op_arg(LOAD_FAST, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.var_index(name);
        self.op_arg(STORE_FAST, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = match self.names.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        };
        self.op_arg(LOAD_GLOBAL, index as u16)
    }

    pub fn binary(&mut self, op: BinOp) -> &mut Self {
        self.op(match op {
            BinOp::Add => BINARY_ADD,
            BinOp::Sub => BINARY_SUBTRACT,
            BinOp::Mul => BINARY_MULTIPLY,
            BinOp::Div => BINARY_DIVIDE,
            BinOp::FloorDiv => BINARY_FLOOR_DIVIDE,
            BinOp::Mod => BINARY_MODULO,
        })
    }

    /// In-place form (`x += y`); only add, sub and mul have one.
    pub fn inplace(&mut self, op: BinOp) -> &mut Self {
        match op {
            BinOp::Add => self.op(INPLACE_ADD),
            BinOp::Sub => self.op(INPLACE_SUBTRACT),
            BinOp::Mul => self.op(INPLACE_MULTIPLY),
            other => self.binary(other),
        }
    }

    pub fn unary(&mut self, op: UnaryOp) -> &mut Self {
        self.op(match op {
            UnaryOp::Neg => UNARY_NEGATIVE,
            UnaryOp::Not => UNARY_NOT,
        })
    }

    pub fn compare(&mut self, op: CmpOp) -> &mut Self {
        self.op_arg(COMPARE_OP, op.arg())
    }

    pub fn exception_match(&mut self) -> &mut Self {
        self.op_arg(COMPARE_OP, CMP_EXCEPTION_MATCH)
    }

    pub fn call(&mut self, argc: u16) -> &mut Self {
        self.op_arg(CALL_FUNCTION, argc)
    }

    pub fn raise(&mut self, argc: u16) -> &mut Self {
        self.op_arg(RAISE_VARARGS, argc)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(RETURN_VALUE)
    }

    /// Emit a typed `except <exc_type>:` clause test; control continues at
    /// `next` when the in-flight exception does not match.
    pub fn except_clause(&mut self, exc_type: &str, next: Label) -> &mut Self {
        self.op(DUP_TOP)
            .load_global(exc_type)
            .exception_match()
            .jump_op(POP_JUMP_IF_FALSE, next)
    }

    // =========================================================================
    // Finish
    // =========================================================================

    pub fn finish(&mut self) -> Result<RawCode, AsmError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0]
                .ok_or_else(|| AsmError::new(format!("label {} was never bound", fixup.label.0)))?;

            let arg = if fixup.relative {
                let next = fixup.at + 2;
                target.checked_sub(next).ok_or_else(|| {
                    AsmError::new(format!(
                        "relative jump at {} cannot reach backward target {}",
                        fixup.at - 1,
                        target
                    ))
                })?
            } else {
                target
            };

            let arg = u16::try_from(arg)
                .map_err(|_| AsmError::new(format!("jump argument {} exceeds 16 bits", arg)))?;
            self.code[fixup.at..fixup.at + 2].copy_from_slice(&arg.to_le_bytes());
        }

        Ok(RawCode {
            name: self.name.clone(),
            argcount: self.argcount,
            varnames: self.varnames.clone(),
            names: self.names.clone(),
            consts: self.consts.clone(),
            code: self.code.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_layout() {
        let mut asm = Assembler::new("f", &["a", "b"]);
        asm.load_fast("a").load_fast("b").binary(BinOp::Add).ret();
        let raw = asm.finish().unwrap();

        assert_eq!(
            raw.code,
            vec![LOAD_FAST, 0, 0, LOAD_FAST, 1, 0, BINARY_ADD, RETURN_VALUE]
        );
        assert_eq!(raw.argcount, 2);
    }

    #[test]
    fn test_constants_are_interned() {
        let mut asm = Assembler::new("f", &[]);
        asm.load_const(1).load_const(2).load_const(1);
        let raw = asm.finish().unwrap();
        assert_eq!(raw.consts, vec![Const::Int(1), Const::Int(2)]);
    }

    #[test]
    fn test_locals_extend_varnames() {
        let mut asm = Assembler::new("f", &["a"]);
        asm.load_const(0).store_fast("sum").load_fast("a");
        let raw = asm.finish().unwrap();
        assert_eq!(raw.varnames, vec!["a".to_string(), "sum".to_string()]);
        assert_eq!(raw.params(), &["a".to_string()]);
    }

    #[test]
    fn test_relative_jump_counts_from_next_instruction() {
        let mut asm = Assembler::new("f", &[]);
        let end = asm.label();
        asm.jump_op(JUMP_FORWARD, end); // 0..3
        asm.load_none(); // 3..6
        asm.bind(end);
        asm.load_none().ret();
        let raw = asm.finish().unwrap();
        assert_eq!(&raw.code[0..3], &[JUMP_FORWARD, 3, 0]);
    }

    #[test]
    fn test_absolute_jump_uses_offset() {
        let mut asm = Assembler::new("f", &[]);
        let top = asm.label();
        asm.load_none();
        asm.bind(top);
        asm.jump_op(JUMP_ABSOLUTE, top);
        let raw = asm.finish().unwrap();
        assert_eq!(&raw.code[3..6], &[JUMP_ABSOLUTE, 3, 0]);
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut asm = Assembler::new("f", &[]);
        let nowhere = asm.label();
        asm.jump_op(JUMP_ABSOLUTE, nowhere);
        let err = asm.finish().unwrap_err();
        assert!(err.message.contains("never bound"));
    }

    #[test]
    fn test_backward_relative_jump_is_an_error() {
        let mut asm = Assembler::new("f", &[]);
        let top = asm.label();
        asm.bind(top);
        asm.jump_op(JUMP_FORWARD, top);
        assert!(asm.finish().is_err());
    }
}

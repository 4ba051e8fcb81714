use crate::lang::value::Const;

// =============================================================================
// Operator kinds shared by decoded ops and IR instructions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Classic `/`: floor division on integers, true division on floats.
    Div,
    FloorDiv,
    Mod,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::FloorDiv => "floordiv",
            BinOp::Mod => "mod",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CmpOp {
    /// Decode a `COMPARE_OP` argument (exception matching excluded).
    pub fn from_arg(arg: u16) -> Option<CmpOp> {
        Some(match arg {
            0 => CmpOp::Lt,
            1 => CmpOp::Le,
            2 => CmpOp::Eq,
            3 => CmpOp::Ne,
            4 => CmpOp::Gt,
            5 => CmpOp::Ge,
            _ => return None,
        })
    }

    pub fn arg(self) -> u16 {
        match self {
            CmpOp::Lt => 0,
            CmpOp::Le => 1,
            CmpOp::Eq => 2,
            CmpOp::Ne => 3,
            CmpOp::Gt => 4,
            CmpOp::Ge => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

// =============================================================================
// OP - Decoded abstract operations
// =============================================================================

/// One decoded operation. Table indices are already resolved to constants
/// and names; every jump target is an absolute byte offset.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // stack ops
    Pop,
    Dup,
    RotTwo,

    // names
    LoadConst(Const),
    LoadVar(String),
    StoreVar(String),
    LoadGlobal(String),

    // arithmetic & comparison
    Binary(BinOp),
    Unary(UnaryOp),
    Compare(CmpOp),
    /// `COMPARE_OP exception-match`: is TOS1 an instance of the class at TOS?
    ExceptionMatch,

    /// Call with `argc` positional arguments above the callee.
    Call(usize),

    // ==========================================================================
    // Control flow
    // ==========================================================================
    Jump(usize),
    PopJumpIfFalse(usize),
    PopJumpIfTrue(usize),
    /// Jump keeping TOS if it is falsy, otherwise pop it and fall through.
    JumpIfFalseOrPop(usize),
    JumpIfTrueOrPop(usize),

    // loops
    SetupLoop(usize),
    GetIter,
    /// Advance the iterator at TOS or, once exhausted, pop it and jump.
    ForIter(usize),
    BreakLoop,
    ContinueLoop(usize),

    // exceptions
    /// Protect the following range; the handler section starts at the target.
    SetupExcept(usize),
    PopBlock,
    /// End of a handler chain: re-raise the exception at TOS.
    EndFinally,
    /// `raise` (0) or `raise x` (1).
    Raise(u8),

    Return,
}

impl Op {
    /// Byte offsets this op may transfer control to, other than the next op.
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Op::Jump(t)
            | Op::PopJumpIfFalse(t)
            | Op::PopJumpIfTrue(t)
            | Op::JumpIfFalseOrPop(t)
            | Op::JumpIfTrueOrPop(t)
            | Op::ForIter(t)
            | Op::ContinueLoop(t)
            | Op::SetupLoop(t)
            | Op::SetupExcept(t) => Some(*t),
            _ => None,
        }
    }

    /// Ops after which control never falls through to the next op.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Op::Jump(_)
                | Op::ContinueLoop(_)
                | Op::BreakLoop
                | Op::Raise(_)
                | Op::EndFinally
                | Op::Return
        )
    }

    /// Conditional transfers: both the target and the next op are reachable.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Op::PopJumpIfFalse(_)
                | Op::PopJumpIfTrue(_)
                | Op::JumpIfFalseOrPop(_)
                | Op::JumpIfTrueOrPop(_)
                | Op::ForIter(_)
        )
    }
}

/// A decoded op together with its position in the raw stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub offset: usize,
    pub size: usize,
    pub op: Op,
}

impl Instr {
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_arg_round_trip() {
        for op in [CmpOp::Lt, CmpOp::Le, CmpOp::Eq, CmpOp::Ne, CmpOp::Gt, CmpOp::Ge] {
            assert_eq!(CmpOp::from_arg(op.arg()), Some(op));
        }
        assert_eq!(CmpOp::from_arg(10), None);
    }

    #[test]
    fn test_flow_classification() {
        assert!(Op::Return.ends_flow());
        assert!(Op::Jump(4).ends_flow());
        assert!(!Op::PopJumpIfFalse(4).ends_flow());
        assert!(Op::PopJumpIfFalse(4).is_branch());
        assert!(Op::ForIter(9).is_branch());
        assert_eq!(Op::SetupExcept(12).jump_target(), Some(12));
        assert_eq!(Op::Binary(BinOp::Add).jump_target(), None);
    }
}

use std::fmt;

use super::code::{Block, BlockId, Code, HandlerRegion, Inst, InstKind, Operand, Terminator};

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for super::code::ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for super::code::RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(v) => f.write_str(&v.repr()),
            Operand::Value(v) => write!(f, "{}", v),
            Operand::Undef => f.write_str("undef"),
        }
    }
}

fn join(ops: &[Operand]) -> String {
    ops.iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(r) = self.result {
            write!(f, "{} = ", r)?;
        }
        match &self.kind {
            InstKind::Param(i) => write!(f, "param {}", i),
            InstKind::Load(var) => write!(f, "load {}", var),
            InstKind::Store(var, v) => write!(f, "store {}, {}", var, v),
            InstKind::Binary(op, a, b) => write!(f, "{} {}, {}", op.name(), a, b),
            InstKind::Unary(op, a) => write!(f, "{} {}", op.name(), a),
            InstKind::Compare(op, a, b) => write!(f, "cmp.{} {}, {}", op.name(), a, b),
            InstKind::Call(callee, args) => write!(f, "call {}({})", callee, join(args)),
            InstKind::Caught => f.write_str("caught"),
            InstKind::Phi(var, incoming) => {
                write!(f, "phi {} [", var)?;
                for (i, (pred, v)) in incoming.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", pred, v)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(t) => write!(f, "jump {}", t),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "branch {}, {}, {}", cond, then_block, else_block),
            Terminator::Return(v) => write!(f, "return {}", v),
            Terminator::Raise(v) => write!(f, "raise {}", v),
            Terminator::Reraise(v) => write!(f, "reraise {}", v),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(offset) = self.offset {
            write!(f, " (@{})", offset)?;
        }
        if let Some(r) = self.region {
            write!(f, " [{}]", r)?;
        }
        writeln!(f, ":")?;
        for inst in &self.insts {
            writeln!(f, "    {}", inst)?;
        }
        writeln!(f, "    {}", self.term)
    }
}

impl fmt::Display for HandlerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region {} (handler @{}", self.id, self.handler_offset)?;
        if let Some(p) = self.parent {
            write!(f, ", parent {}", p)?;
        }
        writeln!(f, "):")?;
        for clause in &self.clauses {
            match clause.exc_type {
                Some(kind) => write!(f, "    except {} -> {}", kind, clause.target)?,
                None => write!(f, "    except * -> {}", clause.target)?,
            }
            if let Some(name) = &clause.binding {
                write!(f, " as {}", name)?;
            }
            writeln!(f)?;
        }
        if let Some(e) = self.else_target {
            writeln!(f, "    else -> {}", e)?;
        }
        Ok(())
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}({})", self.name, self.params.join(", "))?;
        if self.is_ssa {
            write!(f, " ssa")?;
        }
        writeln!(f)?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        for region in &self.regions {
            write!(f, "{}", region)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::BinOp;
    use crate::ir::code::ValueId;
    use crate::lang::value::Value;

    #[test]
    fn test_block_listing() {
        let mut code = Code::new("add", vec!["a".to_string(), "b".to_string()]);
        let b = code.add_block(Some(0));
        let v = code.new_value();
        code.block_mut(b).insts.push(Inst {
            result: Some(v),
            kind: InstKind::Binary(
                BinOp::Add,
                Operand::Const(Value::Int(1)),
                Operand::Const(Value::from("x")),
            ),
        });
        code.block_mut(b).term = Terminator::Return(Operand::Value(ValueId(0)));

        let text = code.to_string();
        assert!(text.starts_with("code add(a, b)\n"));
        assert!(text.contains("bb0 (@0):"));
        assert!(text.contains("%0 = add 1, 'x'"));
        assert!(text.contains("return %0"));
    }

    #[test]
    fn test_phi_listing() {
        let inst = Inst {
            result: Some(ValueId(4)),
            kind: InstKind::Phi(
                "i".to_string(),
                vec![
                    (BlockId(1), Operand::Value(ValueId(1))),
                    (BlockId(3), Operand::Undef),
                ],
            ),
        };
        assert_eq!(inst.to_string(), "%4 = phi i [bb1: %1, bb3: undef]");
    }
}

use std::collections::{BTreeSet, HashMap};

use crate::bytecode::op::{Instr, Op};
use crate::lang::function::Function;
use crate::lang::value::{Const, Value};

/// Return the disassembly of a decoded function, with a header
pub fn disassemble_function(func: &Function) -> String {
    let mut output = String::new();
    output.push_str("════════════════════════════════════════\n");
    output.push_str(&format!(" {}({})\n", func.name, func.params.join(", ")));
    output.push_str(&format!(" {} instructions\n", func.ops.len()));
    output.push_str("════════════════════════════════════════\n");
    output.push_str(&disassemble_to_string(&func.ops));
    output
}

/// Return disassembly as a String
pub fn disassemble_to_string(instrs: &[Instr]) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(instrs);

    for instr in instrs {
        let is_target = jump_targets.contains(&instr.offset);
        if is_target {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        output.push_str(&format!("{:04} ", instr.offset));
        output.push_str(if is_target { "► " } else { "  " });
        output.push_str(&format_op(&instr.op, instr.offset));
        output.push('\n');
    }

    output
}

fn collect_jump_targets(instrs: &[Instr]) -> BTreeSet<usize> {
    instrs.iter().filter_map(|i| i.op.jump_target()).collect()
}

fn jump(name: &str, target: usize, at: usize) -> String {
    let direction = if target <= at { "↑" } else { "↓" };
    format!("{:<12}{} (→ {:04})", name, direction, target)
}

fn format_op(op: &Op, at: usize) -> String {
    match op {
        Op::Pop => "POP".to_string(),
        Op::Dup => "DUP".to_string(),
        Op::RotTwo => "ROT_TWO".to_string(),

        Op::LoadConst(c) => format!("LOAD_CONST  {}", format_const(c)),
        Op::LoadVar(name) => format!("LOAD_VAR    {}", name),
        Op::StoreVar(name) => format!("STORE_VAR   {}", name),
        Op::LoadGlobal(name) => format!("LOAD_GLOBAL {}", name),

        Op::Binary(b) => format!("BINARY      {}", b.symbol()),
        Op::Unary(u) => format!("UNARY       {}", u.name()),
        Op::Compare(c) => format!("COMPARE     {}", c.symbol()),
        Op::ExceptionMatch => "EXC_MATCH   ; ( exc type -- exc bool )".to_string(),
        Op::Call(argc) => format!("CALL        {}", argc),

        Op::Jump(t) => jump("JUMP", *t, at),
        Op::PopJumpIfFalse(t) => jump("JUMP_FALSE", *t, at),
        Op::PopJumpIfTrue(t) => jump("JUMP_TRUE", *t, at),
        Op::JumpIfFalseOrPop(t) => jump("FALSE_OR_POP", *t, at),
        Op::JumpIfTrueOrPop(t) => jump("TRUE_OR_POP", *t, at),

        Op::SetupLoop(t) => format!("SETUP_LOOP  (end {:04})", t),
        Op::GetIter => "GET_ITER".to_string(),
        Op::ForIter(t) => jump("FOR_ITER", *t, at),
        Op::BreakLoop => "BREAK".to_string(),
        Op::ContinueLoop(t) => jump("CONTINUE", *t, at),

        Op::SetupExcept(t) => format!("SETUP_EXCEPT (handler {:04})", t),
        Op::PopBlock => "POP_BLOCK".to_string(),
        Op::EndFinally => "END_FINALLY ; ( exc -- ) re-raise".to_string(),
        Op::Raise(0) => "RAISE       ; re-raise current".to_string(),
        Op::Raise(n) => format!("RAISE       {}", n),

        Op::Return => "RETURN".to_string(),
    }
}

fn format_const(c: &Const) -> String {
    Value::from(c).repr()
}

// =============================================================================
// Statistics
// =============================================================================

/// Op frequency, most common first (ties by name)
pub fn op_counts(instrs: &[Instr]) -> Vec<(&'static str, usize)> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for instr in instrs {
        *counts.entry(op_name(&instr.op)).or_insert(0) += 1;
    }

    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    counts
}

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::Pop => "POP",
        Op::Dup => "DUP",
        Op::RotTwo => "ROT_TWO",
        Op::LoadConst(_) => "LOAD_CONST",
        Op::LoadVar(_) => "LOAD_VAR",
        Op::StoreVar(_) => "STORE_VAR",
        Op::LoadGlobal(_) => "LOAD_GLOBAL",
        Op::Binary(_) => "BINARY",
        Op::Unary(_) => "UNARY",
        Op::Compare(_) => "COMPARE",
        Op::ExceptionMatch => "EXC_MATCH",
        Op::Call(_) => "CALL",
        Op::Jump(_) => "JUMP",
        Op::PopJumpIfFalse(_) => "JUMP_FALSE",
        Op::PopJumpIfTrue(_) => "JUMP_TRUE",
        Op::JumpIfFalseOrPop(_) => "FALSE_OR_POP",
        Op::JumpIfTrueOrPop(_) => "TRUE_OR_POP",
        Op::SetupLoop(_) => "SETUP_LOOP",
        Op::GetIter => "GET_ITER",
        Op::ForIter(_) => "FOR_ITER",
        Op::BreakLoop => "BREAK",
        Op::ContinueLoop(_) => "CONTINUE",
        Op::SetupExcept(_) => "SETUP_EXCEPT",
        Op::PopBlock => "POP_BLOCK",
        Op::EndFinally => "END_FINALLY",
        Op::Raise(_) => "RAISE",
        Op::Return => "RETURN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::BinOp;

    fn instr(offset: usize, op: Op) -> Instr {
        Instr { offset, size: 3, op }
    }

    #[test]
    fn test_listing_marks_jump_targets() {
        let instrs = vec![
            instr(0, Op::LoadVar("a".to_string())),
            instr(3, Op::PopJumpIfFalse(9)),
            instr(6, Op::Jump(0)),
            instr(9, Op::Return),
        ];

        let output = disassemble_to_string(&instrs);
        assert!(output.contains("0000 ► LOAD_VAR    a"));
        assert!(output.contains("0009 ► RETURN"));
        assert!(output.contains("↑ (→ 0000)"));
        assert!(output.contains("↓ (→ 0009)"));
    }

    #[test]
    fn test_constants_use_repr() {
        let instrs = vec![
            instr(0, Op::LoadConst(Const::Str("x".to_string()))),
            instr(3, Op::LoadConst(Const::Float(1.0))),
        ];
        let output = disassemble_to_string(&instrs);
        assert!(output.contains("LOAD_CONST  'x'"));
        assert!(output.contains("LOAD_CONST  1.0"));
    }

    #[test]
    fn test_op_counts() {
        let instrs = vec![
            instr(0, Op::LoadVar("a".to_string())),
            instr(3, Op::LoadVar("b".to_string())),
            instr(6, Op::Binary(BinOp::Add)),
            instr(7, Op::Return),
        ];

        let counts = op_counts(&instrs);
        assert_eq!(counts[0], ("LOAD_VAR", 2));
        assert!(counts.contains(&("BINARY", 1)));
        assert!(counts.contains(&("RETURN", 1)));
    }
}

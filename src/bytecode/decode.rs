use std::collections::BTreeSet;

use tracing::trace;

use crate::bytecode::decode_error::DecodeError;
use crate::bytecode::op::{BinOp, CmpOp, Instr, Op, UnaryOp};
use crate::bytecode::opcode::*;
use crate::bytecode::raw::RawCode;

fn table<'a, T>(
    items: &'a [T],
    name: &'static str,
    offset: usize,
    index: u16,
) -> Result<&'a T, DecodeError> {
    items
        .get(index as usize)
        .ok_or_else(|| DecodeError::bad_index(offset, name, index as usize, items.len()))
}

/// Decode a raw instruction stream into abstract operations.
///
/// Table indices are resolved against the code object, relative jumps are
/// turned into absolute byte offsets, and every target is checked to land on
/// an instruction boundary.
pub fn decode(raw: &RawCode) -> Result<Vec<Instr>, DecodeError> {
    let code = &raw.code;
    let mut instrs = Vec::new();
    let mut pc = 0;

    while pc < code.len() {
        let offset = pc;
        let opcode = code[pc];

        let (arg, size) = if has_arg(opcode) {
            if pc + 3 > code.len() {
                return Err(DecodeError::truncated(offset, opcode));
            }
            (u16::from_le_bytes([code[pc + 1], code[pc + 2]]), 3)
        } else {
            (0, 1)
        };
        let next = offset + size;

        let op = match opcode {
            POP_TOP => Op::Pop,
            ROT_TWO => Op::RotTwo,
            DUP_TOP => Op::Dup,

            UNARY_NEGATIVE => Op::Unary(UnaryOp::Neg),
            UNARY_NOT => Op::Unary(UnaryOp::Not),

            BINARY_MULTIPLY | INPLACE_MULTIPLY => Op::Binary(BinOp::Mul),
            BINARY_DIVIDE => Op::Binary(BinOp::Div),
            BINARY_MODULO => Op::Binary(BinOp::Mod),
            BINARY_ADD | INPLACE_ADD => Op::Binary(BinOp::Add),
            BINARY_SUBTRACT | INPLACE_SUBTRACT => Op::Binary(BinOp::Sub),
            BINARY_FLOOR_DIVIDE => Op::Binary(BinOp::FloorDiv),

            GET_ITER => Op::GetIter,
            BREAK_LOOP => Op::BreakLoop,
            RETURN_VALUE => Op::Return,
            POP_BLOCK => Op::PopBlock,
            END_FINALLY => Op::EndFinally,

            FOR_ITER => Op::ForIter(next + arg as usize),
            JUMP_FORWARD => Op::Jump(next + arg as usize),
            SETUP_LOOP => Op::SetupLoop(next + arg as usize),
            SETUP_EXCEPT => Op::SetupExcept(next + arg as usize),

            JUMP_ABSOLUTE => Op::Jump(arg as usize),
            POP_JUMP_IF_FALSE => Op::PopJumpIfFalse(arg as usize),
            POP_JUMP_IF_TRUE => Op::PopJumpIfTrue(arg as usize),
            JUMP_IF_FALSE_OR_POP => Op::JumpIfFalseOrPop(arg as usize),
            JUMP_IF_TRUE_OR_POP => Op::JumpIfTrueOrPop(arg as usize),
            CONTINUE_LOOP => Op::ContinueLoop(arg as usize),

            LOAD_CONST => Op::LoadConst(table(&raw.consts, "consts", offset, arg)?.clone()),
            LOAD_FAST => Op::LoadVar(table(&raw.varnames, "varnames", offset, arg)?.clone()),
            STORE_FAST => Op::StoreVar(table(&raw.varnames, "varnames", offset, arg)?.clone()),
            LOAD_GLOBAL => Op::LoadGlobal(table(&raw.names, "names", offset, arg)?.clone()),

            COMPARE_OP if arg == CMP_EXCEPTION_MATCH => Op::ExceptionMatch,
            COMPARE_OP => match CmpOp::from_arg(arg) {
                Some(cmp) => Op::Compare(cmp),
                None => return Err(DecodeError::BadCompare { offset, arg }),
            },

            CALL_FUNCTION => {
                // high byte counts keyword arguments
                if arg > 0xff {
                    return Err(DecodeError::unsupported_arg(
                        offset,
                        opcode,
                        arg,
                        "keyword arguments are not supported",
                    ));
                }
                Op::Call(arg as usize)
            }

            RAISE_VARARGS => {
                if arg > 1 {
                    return Err(DecodeError::unsupported_arg(
                        offset,
                        opcode,
                        arg,
                        "only `raise` and `raise x` are supported",
                    ));
                }
                Op::Raise(arg as u8)
            }

            _ => return Err(DecodeError::unknown_opcode(offset, opcode)),
        };

        trace!(offset, op = ?op, "decoded");
        instrs.push(Instr { offset, size, op });
        pc = next;
    }

    check_targets(&instrs, code.len())?;
    Ok(instrs)
}

fn check_targets(instrs: &[Instr], end: usize) -> Result<(), DecodeError> {
    let starts: BTreeSet<usize> = instrs.iter().map(|i| i.offset).collect();

    for instr in instrs {
        if let Some(target) = instr.op.jump_target() {
            // loop/except setups may point just past the last instruction
            let at_end = target == end
                && matches!(instr.op, Op::SetupLoop(_) | Op::SetupExcept(_));
            if !starts.contains(&target) && !at_end {
                return Err(DecodeError::BadTarget {
                    offset: instr.offset,
                    target,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Assembler;
    use crate::lang::value::Const;

    fn raw(code: Vec<u8>) -> RawCode {
        RawCode {
            name: "f".to_string(),
            argcount: 1,
            varnames: vec!["x".to_string()],
            names: vec!["g".to_string()],
            consts: vec![Const::Int(1)],
            code,
        }
    }

    fn ops(code: Vec<u8>) -> Vec<Op> {
        decode(&raw(code)).unwrap().into_iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_straight_line() {
        let ops = ops(vec![LOAD_FAST, 0, 0, LOAD_CONST, 0, 0, BINARY_ADD, RETURN_VALUE]);
        assert_eq!(
            ops,
            vec![
                Op::LoadVar("x".to_string()),
                Op::LoadConst(Const::Int(1)),
                Op::Binary(BinOp::Add),
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_offsets_and_sizes() {
        let instrs = decode(&raw(vec![LOAD_FAST, 0, 0, RETURN_VALUE])).unwrap();
        assert_eq!(instrs[0].offset, 0);
        assert_eq!(instrs[0].size, 3);
        assert_eq!(instrs[1].offset, 3);
        assert_eq!(instrs[1].next_offset(), 4);
    }

    #[test]
    fn test_inplace_lowers_like_binary() {
        let ops = ops(vec![INPLACE_ADD, INPLACE_SUBTRACT, INPLACE_MULTIPLY]);
        assert_eq!(
            ops,
            vec![
                Op::Binary(BinOp::Add),
                Op::Binary(BinOp::Sub),
                Op::Binary(BinOp::Mul)
            ]
        );
    }

    #[test]
    fn test_relative_jump_resolved() {
        // JUMP_FORWARD +1 at 0 -> 4; POP_TOP at 3; RETURN at 4
        let ops = ops(vec![JUMP_FORWARD, 1, 0, POP_TOP, RETURN_VALUE]);
        assert_eq!(ops[0], Op::Jump(4));
    }

    #[test]
    fn test_exception_match_compare() {
        let ops = ops(vec![COMPARE_OP, 10, 0, COMPARE_OP, 4, 0]);
        assert_eq!(ops, vec![Op::ExceptionMatch, Op::Compare(CmpOp::Gt)]);
    }

    #[test]
    fn test_unknown_opcode() {
        let err = decode(&raw(vec![LOAD_FAST, 0, 0, 3])).unwrap_err();
        assert_eq!(err, DecodeError::unknown_opcode(3, 3));
    }

    #[test]
    fn test_truncated_argument() {
        let err = decode(&raw(vec![LOAD_CONST, 0])).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { offset: 0, .. }));
    }

    #[test]
    fn test_bad_const_index() {
        let err = decode(&raw(vec![LOAD_CONST, 5, 0])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadIndex {
                table: "consts",
                index: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_jump_into_instruction_rejected() {
        let err = decode(&raw(vec![JUMP_ABSOLUTE, 1, 0, RETURN_VALUE])).unwrap_err();
        assert_eq!(err, DecodeError::BadTarget { offset: 0, target: 1 });
    }

    #[test]
    fn test_keyword_call_rejected() {
        let err = decode(&raw(vec![CALL_FUNCTION, 0, 1])).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedArg { .. }));
    }

    #[test]
    fn test_assembled_loop_decodes() {
        let mut asm = Assembler::new("f", &["x"]);
        let top = asm.label();
        let done = asm.label();
        asm.bind(top);
        asm.load_fast("x").jump_op(POP_JUMP_IF_FALSE, done);
        asm.jump_op(JUMP_ABSOLUTE, top);
        asm.bind(done);
        asm.load_none().ret();

        let instrs = decode(&asm.finish().unwrap()).unwrap();
        assert_eq!(instrs[1].op, Op::PopJumpIfFalse(9));
        assert_eq!(instrs[2].op, Op::Jump(0));
    }
}

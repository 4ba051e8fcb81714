// =============================================================================
// Raw opcode numbers (CPython 2.7 numbering)
// =============================================================================

pub const POP_TOP: u8 = 1;
pub const ROT_TWO: u8 = 2;
pub const DUP_TOP: u8 = 4;

pub const UNARY_NEGATIVE: u8 = 11;
pub const UNARY_NOT: u8 = 12;

pub const BINARY_MULTIPLY: u8 = 20;
pub const BINARY_DIVIDE: u8 = 21;
pub const BINARY_MODULO: u8 = 22;
pub const BINARY_ADD: u8 = 23;
pub const BINARY_SUBTRACT: u8 = 24;
pub const BINARY_FLOOR_DIVIDE: u8 = 26;

pub const INPLACE_ADD: u8 = 55;
pub const INPLACE_SUBTRACT: u8 = 56;
pub const INPLACE_MULTIPLY: u8 = 57;

pub const GET_ITER: u8 = 68;
pub const BREAK_LOOP: u8 = 80;
pub const RETURN_VALUE: u8 = 83;
pub const POP_BLOCK: u8 = 87;
pub const END_FINALLY: u8 = 88;

/// Opcodes at or above this value carry a 16-bit little-endian argument.
pub const HAVE_ARGUMENT: u8 = 90;

pub const FOR_ITER: u8 = 93;
pub const LOAD_CONST: u8 = 100;
pub const COMPARE_OP: u8 = 107;
pub const JUMP_FORWARD: u8 = 110;
pub const JUMP_IF_FALSE_OR_POP: u8 = 111;
pub const JUMP_IF_TRUE_OR_POP: u8 = 112;
pub const JUMP_ABSOLUTE: u8 = 113;
pub const POP_JUMP_IF_FALSE: u8 = 114;
pub const POP_JUMP_IF_TRUE: u8 = 115;
pub const LOAD_GLOBAL: u8 = 116;
pub const CONTINUE_LOOP: u8 = 119;
pub const SETUP_LOOP: u8 = 120;
pub const SETUP_EXCEPT: u8 = 121;
pub const LOAD_FAST: u8 = 124;
pub const STORE_FAST: u8 = 125;
pub const RAISE_VARARGS: u8 = 130;
pub const CALL_FUNCTION: u8 = 131;

/// `COMPARE_OP` argument selecting exception matching.
pub const CMP_EXCEPTION_MATCH: u16 = 10;

pub fn has_arg(opcode: u8) -> bool {
    opcode >= HAVE_ARGUMENT
}

/// Jumps whose argument is relative to the next instruction.
pub fn is_relative_jump(opcode: u8) -> bool {
    matches!(opcode, FOR_ITER | JUMP_FORWARD | SETUP_LOOP | SETUP_EXCEPT)
}

/// Jumps whose argument is an absolute byte offset.
pub fn is_absolute_jump(opcode: u8) -> bool {
    matches!(
        opcode,
        JUMP_IF_FALSE_OR_POP
            | JUMP_IF_TRUE_OR_POP
            | JUMP_ABSOLUTE
            | POP_JUMP_IF_FALSE
            | POP_JUMP_IF_TRUE
            | CONTINUE_LOOP
    )
}

pub fn opname(opcode: u8) -> Option<&'static str> {
    Some(match opcode {
        POP_TOP => "POP_TOP",
        ROT_TWO => "ROT_TWO",
        DUP_TOP => "DUP_TOP",
        UNARY_NEGATIVE => "UNARY_NEGATIVE",
        UNARY_NOT => "UNARY_NOT",
        BINARY_MULTIPLY => "BINARY_MULTIPLY",
        BINARY_DIVIDE => "BINARY_DIVIDE",
        BINARY_MODULO => "BINARY_MODULO",
        BINARY_ADD => "BINARY_ADD",
        BINARY_SUBTRACT => "BINARY_SUBTRACT",
        BINARY_FLOOR_DIVIDE => "BINARY_FLOOR_DIVIDE",
        INPLACE_ADD => "INPLACE_ADD",
        INPLACE_SUBTRACT => "INPLACE_SUBTRACT",
        INPLACE_MULTIPLY => "INPLACE_MULTIPLY",
        GET_ITER => "GET_ITER",
        BREAK_LOOP => "BREAK_LOOP",
        RETURN_VALUE => "RETURN_VALUE",
        POP_BLOCK => "POP_BLOCK",
        END_FINALLY => "END_FINALLY",
        FOR_ITER => "FOR_ITER",
        LOAD_CONST => "LOAD_CONST",
        COMPARE_OP => "COMPARE_OP",
        JUMP_FORWARD => "JUMP_FORWARD",
        JUMP_IF_FALSE_OR_POP => "JUMP_IF_FALSE_OR_POP",
        JUMP_IF_TRUE_OR_POP => "JUMP_IF_TRUE_OR_POP",
        JUMP_ABSOLUTE => "JUMP_ABSOLUTE",
        POP_JUMP_IF_FALSE => "POP_JUMP_IF_FALSE",
        POP_JUMP_IF_TRUE => "POP_JUMP_IF_TRUE",
        LOAD_GLOBAL => "LOAD_GLOBAL",
        CONTINUE_LOOP => "CONTINUE_LOOP",
        SETUP_LOOP => "SETUP_LOOP",
        SETUP_EXCEPT => "SETUP_EXCEPT",
        LOAD_FAST => "LOAD_FAST",
        STORE_FAST => "STORE_FAST",
        RAISE_VARARGS => "RAISE_VARARGS",
        CALL_FUNCTION => "CALL_FUNCTION",
        _ => return None,
    })
}

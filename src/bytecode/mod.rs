pub mod asm;
pub mod decode;
pub mod decode_error;
pub mod disasm;
pub mod op;
pub mod opcode;
pub mod raw;

pub use decode::decode;
pub use op::{BinOp, CmpOp, Instr, Op, UnaryOp};
pub use raw::RawCode;

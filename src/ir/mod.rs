//! # Intermediate representation
//!
//! A translated function is a [`Code`]: basic blocks of [`Inst`]s, each closed
//! by one [`Terminator`], plus the [`HandlerRegion`]s that route exceptions.
//! The translator produces it in slot form (`load`/`store` on named slots);
//! the SSA builder rewrites it in place.

pub mod code;
pub mod display;

pub use code::{
    Block, BlockId, CatchClause, Code, HandlerRegion, Inst, InstKind, Operand, RegionId,
    Terminator, ValueId,
};

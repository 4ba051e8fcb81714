//! # Runtime
//!
//! The interpreter plus the services it leans on: operator semantics,
//! builtins and printf-style formatting.

pub mod builtins;
pub mod formatting;
pub mod frame;
pub mod interp;
pub mod ops;
pub mod runtime_error;

pub use interp::{interpret, InterpConfig, Interpreter};
pub use runtime_error::InterpError;

//! # cinder
//!
//! Runs host bytecode through a small compiler pipeline:
//!
//! ```text
//! RawCode ──decode──► Function ──translate──► Code (slots) ──cfa──► Code (SSA)
//!                                                    │                  │
//!                                                    └────interpret─────┘
//! ```
//!
//! - [`bytecode`]: host code objects, opcode decoding, disassembly
//! - [`translate`]: decoded ops to a control-flow graph of basic blocks
//! - [`cfa`]: dominators and SSA construction
//! - [`runtime`]: the interpreter, operator semantics, builtins
//! - [`env`]: fresh names, aliases and the translated-code cache

pub mod bytecode;
pub mod cfa;
pub mod env;
pub mod error;
pub mod ir;
pub mod lang;
pub mod runtime;
pub mod translate;

pub use env::{fresh_env, Env};
pub use error::{Error, Result};
pub use runtime::{interpret, InterpConfig, InterpError, Interpreter};
pub use translate::translate;

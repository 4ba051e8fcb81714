//! # Runtime value model
//!
//! Values, exceptions and callables as the interpreter sees them. These
//! types stand in for the hosting runtime's object model: the pipeline only
//! needs to call, compare, combine and raise them.

pub mod exception;
pub mod function;
pub mod value;

//! Crate-level errors

use thiserror::Error;

use crate::bytecode::decode_error::DecodeError;
use crate::cfa::cfg_error::MalformedCfgError;
use crate::runtime::runtime_error::InterpError;
use crate::translate::translate_error::TranslateError;

/// Pipeline result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of any pipeline stage
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Cfg(#[from] MalformedCfgError),

    #[error(transparent)]
    Interp(#[from] InterpError),
}

use crate::ir::BlockId;

/// An invariant violation in a CFG handed to the SSA builder.
///
/// Always a translator defect, never a property of the input program.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedCfgError {
    pub message: String,
    pub block: Option<BlockId>,
}

impl std::fmt::Display for MalformedCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.block {
            Some(b) => write!(f, "malformed CFG at {}: {}", b, self.message),
            None => write!(f, "malformed CFG: {}", self.message),
        }
    }
}

impl std::error::Error for MalformedCfgError {}

impl MalformedCfgError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            block: None,
        }
    }

    pub fn at(block: BlockId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            block: Some(block),
        }
    }
}

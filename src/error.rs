use std::io;
use thiserror::Error;

use crate::schema::{DecodeError, SchemaError};
use crate::tree::Level;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Invalid bundle format: {0}")]
    Format(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{level} index {index} out of range ({len} available)")]
    Index { level: Level, index: usize, len: usize },
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Bundle has no '{0}' item")]
    MissingItem(String),
    #[error("No loader registered for '{0}' items")]
    NoLoader(String),
    #[error("Item '{ext}' does not hold {expected}")]
    ItemType { ext: String, expected: &'static str },
}

impl BundleError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        BundleError::Format(msg.into())
    }
}

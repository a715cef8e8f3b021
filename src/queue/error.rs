//! Queue engine error types.
//!
//! A plain hand-rolled error enum, in the style of a broker's own
//! persistence-layer errors: durable-store I/O and corruption errors
//! propagate here.
//! Programming errors (null identifiers, wrong shard thread) are not part
//! of this enum; they fail fast via `assert!`/`panic!` and are never
//! caught. Capacity-exceeded conditions are handled locally by the engine
//! and never surface as an error at all.

use std::fmt;

#[derive(Debug)]
pub enum ClientQueueError {
    /// The underlying ordered key-value store reported an error.
    Storage(String),
    /// A durable entry's bytes could not be decoded.
    Corruption(String),
}

impl fmt::Display for ClientQueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "durable store error: {}", e),
            Self::Corruption(e) => write!(f, "queue entry corruption: {}", e),
        }
    }
}

impl std::error::Error for ClientQueueError {}

impl From<fjall::Error> for ClientQueueError {
    fn from(err: fjall::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientQueueError>;

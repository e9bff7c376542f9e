use std::path::PathBuf;

use thiserror::Error;

use crate::edge::EdgeType;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("edge (0x{from:x}, 0x{to:x}) was recorded as {recorded} but is now observed as {observed}")]
    EdgeTypeConflict {
        from: u64,
        to: u64,
        recorded: EdgeType,
        observed: EdgeType,
    },

    #[error("memory operand at 0x{address:x} has different access sizes ({recorded} and {observed} bytes)")]
    MemorySizeMismatch {
        address: u64,
        recorded: u32,
        observed: u32,
    },

    #[error("disassembly is empty for 0x{address:x}")]
    EmptyDisassembly { address: u64 },

    #[error("trace was aborted after a consistency violation at 0x{address:x}")]
    Aborted { address: u64 },

    #[error("trace has already been written")]
    AlreadyFinished,

    #[error("output directory {0:?} does not exist")]
    MissingOutputDir(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("event log line {line}: {source}")]
    Event {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    /// Address of the instruction that broke an invariant, if this error is a
    /// consistency violation.
    pub fn offending_address(&self) -> Option<u64> {
        match self {
            TraceError::EdgeTypeConflict { from, .. } => Some(*from),
            TraceError::MemorySizeMismatch { address, .. }
            | TraceError::EmptyDisassembly { address }
            | TraceError::Aborted { address } => Some(*address),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("no program found after scanning {scanned_bytes} bytes")]
    ProgramNotFound { scanned_bytes: u64 },

    #[error("total stream length is unknown")]
    UnknownLength,

    #[error("no usable PCR found from offset {offset}")]
    NoPcr { offset: u64 },

    #[error("last PCR {last:?} precedes initial PCR {initial:?} (wrap-around is not compensated)")]
    PcrRegression { initial: Duration, last: Duration },

    #[error("duration scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("duration scan cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DemuxError>;

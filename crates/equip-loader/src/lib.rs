use equip_core::HeaderError;
use equip_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

mod loader;
mod source;
mod summary;

pub use loader::{LoadFailure, LoadPhase, LoadRequest, Loader};
pub use source::{CsvSource, RawRows, SourceEncoding, SourceOptions};
pub use summary::{LoadSummary, SourceInfo, WipeSummary};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot decode {} at byte {offset}: {detail}", path.display())]
    DecodeError {
        path: PathBuf,
        offset: u64,
        detail: String,
    },
    #[error("invalid header in {}: {reason}", path.display())]
    HeaderInvalid {
        path: PathBuf,
        #[source]
        reason: HeaderError,
    },
    #[error("no valid rows in {} ({rejected} rejected)", path.display())]
    EmptyBatch { path: PathBuf, rejected: usize },
    #[error("store write failed: {0}")]
    StoreWriteFailure(#[from] StorageError),
}

impl LoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::SourceUnavailable { .. } => "source_unavailable",
            LoadError::DecodeError { .. } => "decode_error",
            LoadError::HeaderInvalid { .. } => "header_invalid",
            LoadError::EmptyBatch { .. } => "empty_batch",
            LoadError::StoreWriteFailure(_) => "store_write_failure",
        }
    }

    /// Process exit status for this failure. 1 stays free for errors raised
    /// outside the loader, such as failing to open the database.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::SourceUnavailable { .. } => 2,
            LoadError::DecodeError { .. } => 3,
            LoadError::HeaderInvalid { .. } => 4,
            LoadError::EmptyBatch { .. } => 5,
            LoadError::StoreWriteFailure(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_non_zero() {
        let errors = [
            LoadError::SourceUnavailable {
                path: PathBuf::from("missing.csv"),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
            LoadError::DecodeError {
                path: PathBuf::from("bad.csv"),
                offset: 12,
                detail: "malformed utf-8 sequence".to_string(),
            },
            LoadError::HeaderInvalid {
                path: PathBuf::from("bad.csv"),
                reason: HeaderError::Empty,
            },
            LoadError::EmptyBatch {
                path: PathBuf::from("empty.csv"),
                rejected: 3,
            },
        ];

        let mut codes = errors.iter().map(LoadError::exit_code).collect::<Vec<_>>();
        assert!(codes.iter().all(|code| *code > 1));
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(
            errors[1].to_string(),
            "cannot decode bad.csv at byte 12: malformed utf-8 sequence"
        );
    }
}

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CollectionName, DeviceId};

/// Error type for input, parsing, decoding, and store failures that abort a pass.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput { line: u64, reason: String },
    #[error("input must contain an 'IMEI' column (found: {})", .found.join(", "))]
    MissingRequiredColumn { found: Vec<String> },
    #[error("no valid IMEI values found in input")]
    NoValidRecords,
    #[error("input could not be decoded at line {line}: {reason}")]
    Decode { line: u64, reason: String },
    #[error("input could not be decoded as '{primary}' or '{fallback}'")]
    EncodingFallbackExhausted { primary: String, fallback: String },
    #[error("unsupported input '{name}': expected a .csv file or a .zip archive containing one")]
    UnsupportedInput { name: String },
    #[error("zip archive '{name}' does not contain a .csv entry")]
    ArchiveWithoutCsv { name: String },
    #[error("zip archive failure: {0}")]
    Archive(String),
    #[error("cluster store failure: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure reported by the external lookup collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no upstream record for '{id}'")]
    NotFound { id: DeviceId },
    #[error("upstream rejected the query (status {status})")]
    Rejected { status: u16 },
    #[error("lookup transport failure: {0}")]
    Transport(String),
    #[error("lookup service unavailable: {0}")]
    Unavailable(String),
}

/// Per-record insertion failure, collected instead of aborting the batch.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertError {
    #[error("duplicate key '{id}' in collection '{collection}'")]
    DuplicateKey {
        id: DeviceId,
        collection: CollectionName,
    },
    #[error("failed to store '{id}': {reason}")]
    Store { id: DeviceId, reason: String },
}

impl InsertError {
    /// Domain id of the record that failed.
    pub fn id(&self) -> &str {
        match self {
            Self::DuplicateKey { id, .. } | Self::Store { id, .. } => id,
        }
    }
}

/// Failure inside a payload detail tier; the encoder substitutes a fallback payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("detail tier '{tier}' failed: {reason}")]
    Tier { tier: String, reason: String },
}

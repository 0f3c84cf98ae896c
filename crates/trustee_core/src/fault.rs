use thiserror::Error;

use crate::{ElectionStatus, StatusCode};

/// Why a parser rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFaultKind {
    Malformed,
    EmptyFile,
    ZeroLengthKey,
    TruncatedFile,
    EmptyToken,
    InvalidToken,
    TooLongToken,
    UnexpectedEof,
    MalformedTotal,
}

/// Task-boundary fault classification. Each variant maps to exactly one [`StatusCode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("election already exists")]
    ElectionAlreadyExists,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("storage is full")]
    StorageFull,
    #[error("parse error ({kind:?}): {detail}")]
    Parse { kind: ParseFaultKind, detail: String },
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("socket timeout: {0}")]
    SocketTimeout(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
    #[error("election is in state {0}, which does not allow this operation")]
    InvalidState(ElectionStatus),
}

impl Fault {
    pub fn parse(kind: ParseFaultKind, detail: impl Into<String>) -> Self {
        Fault::Parse {
            kind,
            detail: detail.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Fault::ElectionAlreadyExists => StatusCode::ElectionExists,
            Fault::Storage(_) => StatusCode::StorageError,
            Fault::StorageFull => StatusCode::StorageFullError,
            Fault::Parse { .. } => StatusCode::ParseError,
            Fault::FileNotFound(_) => StatusCode::FileNotFound,
            Fault::InvalidUrl(_) => StatusCode::InvalidUrl,
            Fault::SocketTimeout(_) => StatusCode::SocketTimeout,
            Fault::Io(_) => StatusCode::IoError,
            Fault::Cancelled => StatusCode::CancelledOperation,
            Fault::InvalidState(_) => StatusCode::InvalidState,
        }
    }

    /// Short user-facing reason used in error notifications.
    pub fn reason(&self) -> &'static str {
        match self {
            Fault::ElectionAlreadyExists => "The election already exists.",
            Fault::Storage(_) => "A storage error occurred.",
            Fault::StorageFull => "The device storage is full.",
            Fault::Parse { .. } => "The data could not be parsed.",
            Fault::FileNotFound(_) => "The data file was not found.",
            Fault::InvalidUrl(_) => "The bulletin board URL is invalid.",
            Fault::SocketTimeout(_) => "The bulletin board did not respond in time.",
            Fault::Io(_) => "An I/O error occurred.",
            Fault::Cancelled => "The operation was cancelled.",
            Fault::InvalidState(_) => "The election is not in a valid state for this operation.",
        }
    }
}

use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

use crate::entity::EntityKey;

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Incompatible operation: {0}")]
    IncompatibleOperation(String),

    #[error("Unpersistable graph: {0}")]
    UnpersistableGraph(String),

    #[error("Cannot encode value: {0}")]
    UnencodableType(String),

    #[error(transparent)]
    Batch(#[from] BatchRequestError),

    #[error("Cloud error {code} (status {status:?}): {message}")]
    Cloud {
        status: Option<u16>,
        code: i64,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown entity {0:?}")]
    UnknownEntity(EntityKey),
}

pub type Result<T> = std::result::Result<T, ObjectError>;

impl ObjectError {
    /// Backend error code, when the failure came from the backend.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Cloud { code, .. } => Some(*code),
            Self::Batch(batch) => batch.first().map(|failure| failure.code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ObjectError {
    fn from(err: serde_json::Error) -> Self {
        ObjectError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for ObjectError {
    fn from(err: reqwest::Error) -> Self {
        ObjectError::Transport(err.to_string())
    }
}

/// One failed item of a batch request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    /// Position of the item in the batch.
    pub index: usize,
    pub code: i64,
    pub message: String,
    /// The sub-request that produced this failure.
    pub request: JsonValue,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.code, self.message, self.request)
    }
}

/// Aggregates every per-item failure of a batch request.
///
/// Items that succeeded in the same batch are not rolled back; the
/// aggregated error only describes what failed.
#[derive(Error, Debug, Clone, Default, PartialEq)]
pub struct BatchRequestError {
    failures: Vec<BatchFailure>,
}

impl BatchRequestError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: BatchFailure) {
        self.failures.push(failure);
    }

    pub fn first(&self) -> Option<&BatchFailure> {
        self.failures.first()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchFailure> {
        self.failures.iter()
    }
}

impl fmt::Display for BatchRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch request error: {} failed", self.failures.len())?;
        if let Some(first) = self.first() {
            write!(f, ", first: {}", first)?;
        }
        Ok(())
    }
}

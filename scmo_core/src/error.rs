use std::fmt::{self, Display};

use thiserror::Error;

/// Plain return codes, one per error kind plus `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScmoRc {
    Ok,
    NullValue,
    NotFound,
    IndexOutOfBound,
    NotSameOrigin,
    InvalidParameter,
    TypeMismatch,
    WrongType,
    NotAnArray,
    IsAnArray,
    AlreadyExists,
    InvalidChunk,
}

impl ScmoRc {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScmoRc::Ok => "SCMO_OK",
            ScmoRc::NullValue => "SCMO_NULL_VALUE",
            ScmoRc::NotFound => "SCMO_NOT_FOUND",
            ScmoRc::IndexOutOfBound => "SCMO_INDEX_OUT_OF_BOUND",
            ScmoRc::NotSameOrigin => "SCMO_NOT_SAME_ORIGIN",
            ScmoRc::InvalidParameter => "SCMO_INVALID_PARAMETER",
            ScmoRc::TypeMismatch => "SCMO_TYPE_MISSMATCH",
            ScmoRc::WrongType => "SCMO_WRONG_TYPE",
            ScmoRc::NotAnArray => "SCMO_NOT_AN_ARRAY",
            ScmoRc::IsAnArray => "SCMO_IS_AN_ARRAY",
            ScmoRc::AlreadyExists => "SCMO_ALREADY_EXISTS",
            ScmoRc::InvalidChunk => "SCMO_INVALID_CHUNK",
        }
    }
}

impl Display for ScmoRc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stable, machine-readable string code for an error.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScmoError {
    /// An unset or null cell was read through a typed accessor.
    #[error("value of '{name}' is null")]
    NullValue { name: String },

    #[error("'{name}' not found")]
    NotFound { name: String },

    #[error("index {index} out of bound (count {count})")]
    IndexOutOfBound { index: usize, count: usize },

    #[error("'{name}' does not originate from class '{origin}'")]
    NotSameOrigin { name: String, origin: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Supplied CIM type conflicts with the declared one.
    #[error("type mismatch for '{name}': declared {declared}, supplied {supplied}")]
    TypeMismatch {
        name: String,
        declared: String,
        supplied: String,
    },

    #[error("wrong type for '{name}': expected {expected}")]
    WrongType { name: String, expected: String },

    #[error("'{name}' is not an array")]
    NotAnArray { name: String },

    #[error("'{name}' is an array")]
    IsAnArray { name: String },

    #[error("'{name}' already exists")]
    AlreadyExists { name: String },

    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },
}

impl ScmoError {
    pub fn rc(&self) -> ScmoRc {
        match self {
            ScmoError::NullValue { .. } => ScmoRc::NullValue,
            ScmoError::NotFound { .. } => ScmoRc::NotFound,
            ScmoError::IndexOutOfBound { .. } => ScmoRc::IndexOutOfBound,
            ScmoError::NotSameOrigin { .. } => ScmoRc::NotSameOrigin,
            ScmoError::InvalidParameter { .. } => ScmoRc::InvalidParameter,
            ScmoError::TypeMismatch { .. } => ScmoRc::TypeMismatch,
            ScmoError::WrongType { .. } => ScmoRc::WrongType,
            ScmoError::NotAnArray { .. } => ScmoRc::NotAnArray,
            ScmoError::IsAnArray { .. } => ScmoRc::IsAnArray,
            ScmoError::AlreadyExists { .. } => ScmoRc::AlreadyExists,
            ScmoError::InvalidChunk { .. } => ScmoRc::InvalidChunk,
        }
    }

    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        ScmoError::NotFound { name: name.into() }
    }

    pub(crate) fn invalid_chunk(reason: impl Into<String>) -> Self {
        ScmoError::InvalidChunk {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ScmoError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorCode for ScmoError {
    fn code(&self) -> &'static str {
        self.rc().as_str()
    }
}

pub type Result<T> = std::result::Result<T, ScmoError>;

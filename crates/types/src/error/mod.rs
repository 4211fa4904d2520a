// Path: crates/types/src/error/mod.rs
//! Core error types shared by every crate in the workspace.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised while decoding or validating hash-like values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The value did not have the expected byte length.
    #[error("Invalid hash length: {0} bytes")]
    InvalidLength(usize),
    /// The value could not be decoded from its declared encoding.
    #[error("Hash decode error: {0}")]
    Decode(String),
}

impl ErrorCode for HashError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidLength(_) => "HASH_INVALID_LENGTH",
            Self::Decode(_) => "HASH_DECODE_ERROR",
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// The path that was read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration could not be parsed as TOML.
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// The configuration parsed but holds an invalid combination of values.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "CONFIG_IO_ERROR",
            Self::Parse(_) => "CONFIG_PARSE_ERROR",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

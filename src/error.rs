//! Error handling for rowflow
//!
//! This module defines the crate-level error type and a Result alias used
//! by configuration, topology loading and the convenience entry points.
//! Errors raised while a pipeline runs live in [`crate::pipeline::error`].

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for rowflow operations
#[derive(Error, Debug)]
pub enum RowflowError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to Rhai script compilation
    #[error("Script error: {0}")]
    Script(String),

    /// Errors raised by the pipeline engine
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RowflowError>,
    },
}

impl RowflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RowflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<toml::de::Error> for RowflowError {
    fn from(err: toml::de::Error) -> Self {
        RowflowError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for RowflowError {
    fn from(err: toml::ser::Error) -> Self {
        RowflowError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RowflowError {
    fn from(err: serde_json::Error) -> Self {
        RowflowError::Serialization(err.to_string())
    }
}

/// Result type alias for rowflow operations
pub type Result<T> = std::result::Result<T, RowflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<RowflowError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

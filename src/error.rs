use std::sync::Arc;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, encoding, or sending events.
///
/// Note that an unsuccessful upload is not an error: [`EventUploader::upload`] always returns an
/// [`UploadOutcome`] so callers can decide whether to keep the batch.
///
/// [`EventUploader::upload`]: crate::EventUploader::upload
/// [`UploadOutcome`]: crate::UploadOutcome
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A JSON token that is none of string, boolean, integer, float, or object was found where a
    /// [`ConfidenceValue`](crate::ConfidenceValue) was expected.
    #[error("unknown value type: {found}")]
    UnknownValueType {
        /// Kind of JSON token that was found (e.g., "null" or "array").
        found: &'static str,
    },

    /// NaN and infinite doubles have no JSON representation.
    #[error("cannot encode non-finite double: {0}")]
    NonFiniteDouble(f64),

    /// Event definition must be a non-empty string.
    #[error("event definition must not be empty")]
    InvalidEventDefinition,

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Transport could not complete the request (DNS, connection, timeout).
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Event batch could not be encoded or decoded.
    #[error("event serialization failed")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// The event sender engine has been shut down (or its task panicked).
    #[error("event sender engine is stopped")]
    EngineStopped,

    /// The event producer has been stopped and accepts no more events.
    #[error("event producer is stopped")]
    ProducerStopped,

    /// The event sender engine must be started from within a tokio runtime.
    #[error("no tokio runtime available to start the event sender engine")]
    MissingRuntime,
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(value))
    }
}

//! Errors raised by bus operations.

use thiserror::Error;

/// Failure of a publish or subscribe call against the message bus.
///
/// These errors are scoped to the operation that raised them; a connection
/// logs them and carries on.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker could not be reached or refused the request.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The consumer session has already been closed.
    #[error("consumer session closed")]
    Closed,

    /// A wildcard filter is not a valid regular expression.
    #[error("invalid topic pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The topic does not exist and the backend does not create topics on
    /// demand.
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for BusError {
    fn from(value: rdkafka::error::KafkaError) -> Self { Self::Unavailable(value.to_string()) }
}

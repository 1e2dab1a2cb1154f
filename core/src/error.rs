use thiserror::Error;

/// A payload or frame which does not fit the accepted vocabulary.
///
/// These never leave the bridge, they are logged and dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("invalid state: {0:?}")]
    InvalidState(String),
    #[error("invalid value: {0:?}")]
    InvalidValue(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

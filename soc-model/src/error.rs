/*!
Errors raised while accepting or interpreting event records
*/

use thiserror::Error;

/// A malformed input event, rejected before it reaches the store or engine.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("event field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("event could not be decoded: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The timestamp on an otherwise valid event could not be interpreted.
#[derive(Debug, Error)]
#[error("unparseable timestamp {value:?}")]
pub struct ParseError {
    pub value: String,
}

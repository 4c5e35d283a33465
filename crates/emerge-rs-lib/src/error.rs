//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("parsing error: {0}")]
	Parse(#[from] crate::package::ParseError),
	#[error("queue error: {0}")]
	Queue(#[from] crate::operation_tree::QueueError),
	#[error("commit failed: {0}")]
	Commit(#[from] crate::overlay::CommitError),
	#[error("package not found: {0}")]
	NotFound(String),
	#[error("session has shut down")]
	SessionClosed,
}

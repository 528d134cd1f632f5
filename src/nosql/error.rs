//! Store errors
//!
//! [`NoSQLError`] is what a [`DocumentStore`](super::traits::DocumentStore)
//! backend reports when a read, update or collection command fails. Actions
//! pass it on as `MigrationError::Store`, and the migration runner wraps that
//! in `MigrationError::UnitFailed` naming the unit that was running.

use std::fmt;

pub type Result<T> = std::result::Result<T, NoSQLError>;

/// Failure of a store call, carrying the backend's message
#[derive(Debug)]
pub enum NoSQLError {
	/// The server could not be reached
	ConnectionError(String),

	/// A query, update or command was rejected while running
	ExecutionError(String),

	/// Renamed collection or dropped index does not exist
	NotFound(String),

	/// A stored record or index option has an unexpected shape
	SerializationError(String),

	/// The call is not supported, e.g. an unknown query operator or a
	/// conflicting index definition
	InvalidOperation(String),

	AuthenticationError(String),

	/// The connected user may not run the command (server code 13)
	PermissionDenied(String),

	/// Any other driver error
	DatabaseError(String),
}

impl fmt::Display for NoSQLError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NoSQLError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
			NoSQLError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
			NoSQLError::NotFound(msg) => write!(f, "Not found: {}", msg),
			NoSQLError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
			NoSQLError::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
			NoSQLError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
			NoSQLError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
			NoSQLError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
		}
	}
}

impl std::error::Error for NoSQLError {}

impl From<serde_json::Error> for NoSQLError {
	fn from(err: serde_json::Error) -> Self {
		NoSQLError::SerializationError(err.to_string())
	}
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for NoSQLError {
	fn from(err: mongodb::error::Error) -> Self {
		use mongodb::error::ErrorKind;

		match *err.kind {
			ErrorKind::Authentication { .. } => NoSQLError::AuthenticationError(err.to_string()),
			ErrorKind::Command(ref command) if command.code == 13 => {
				NoSQLError::PermissionDenied(err.to_string())
			}
			ErrorKind::InvalidArgument { .. } => NoSQLError::InvalidOperation(err.to_string()),
			ErrorKind::Io(_) => NoSQLError::ConnectionError(err.to_string()),
			_ => NoSQLError::DatabaseError(err.to_string()),
		}
	}
}

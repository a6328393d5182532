pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
}
impl From<kb_storage::Error> for Error {
	fn from(err: kb_storage::Error) -> Self {
		match err {
			kb_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			kb_storage::Error::NotFound(message) => Self::NotFound { message },
			kb_storage::Error::Qdrant(err) => Self::Qdrant { message: err.to_string() },
			err => Self::Storage { message: err.to_string() },
		}
	}
}
impl From<kb_providers::Error> for Error {
	fn from(err: kb_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

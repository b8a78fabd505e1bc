//! Error types for the graph RAG crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Empty response from endpoint: {0}")]
    EmptyResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = Error::Config("POSTGRES_PORT is not a number".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("POSTGRES_PORT"));
    }

    #[test]
    fn error_display_api_includes_status_and_message() {
        let err = Error::Api {
            status: 429,
            message: "rate limited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn error_display_empty_response() {
        let err = Error::EmptyResponse("completion".to_string());
        assert!(err.to_string().contains("Empty response"));
        assert!(err.to_string().contains("completion"));
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn error_display_database() {
        let err = Error::Database("connection refused".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Database error"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn error_debug_impl() {
        let err = Error::Http("timeout".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Http"));
        assert!(debug_str.contains("timeout"));
    }
}

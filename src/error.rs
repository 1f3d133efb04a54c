//! Error types and handling for beacond

use thiserror::Error;

/// Result type alias for beacond operations
pub type Result<T> = std::result::Result<T, Error>;

/// beacond error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tracker is already running")]
    AlreadyTracking,

    #[error("Device is already scanning")]
    AlreadyScanning,

    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("Advertisement is not a supported beacon frame")]
    UnsupportedAdvertisement,

    #[error("Invalid unique key: {0}")]
    InvalidUniqueKey(String),

    #[error("Unsupported event name: {0}")]
    UnsupportedEventName(String),

    #[error("Unsupported http method: {0}")]
    UnsupportedHttpMethod(String),

    #[error("Endpoint has an empty url: {0}")]
    EmptyEndpointUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for Error {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(format!("HTTP request error: {}", err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::Network(format!("Invalid header value: {}", err))
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Error::Network(format!("Invalid header name: {}", err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Network(format!("Invalid url: {}", err))
    }
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Bluetooth(err.to_string())
    }
}

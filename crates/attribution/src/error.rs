use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("attribution store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("attribution store has no key '{0}'")]
    MissingKey(String),
    #[error("shape error: {0}")]
    Shape(String),
    #[error("attribution store holds no records")]
    EmptyStore,
}

impl From<toml::de::Error> for AttributionError {
    fn from(value: toml::de::Error) -> Self {
        AttributionError::Config(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AttributionError>;

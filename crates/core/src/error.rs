use thiserror::Error;

pub type AffiliateResult<T> = Result<T, AffiliateError>;

#[derive(Error, Debug)]
pub enum AffiliateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event store connection error: {0}")]
    Connection(String),

    #[error("Event store query `{query}` failed: {message}")]
    Query {
        query: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AffiliateError {
    pub fn query(query: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Query {
            query,
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AffiliateError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

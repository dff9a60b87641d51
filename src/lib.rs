//! Tributary: a configuration-driven data-ingestion pipeline
//!
//! This crate crawls paginated/cursor-based HTTP APIs, stages raw responses,
//! deduplicates and normalizes them into typed relational tables with an
//! evolving schema, and incrementally syncs the result to destination
//! backends.

pub mod client;
pub mod config;
pub mod extract;
pub mod infer;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod transfer;
pub mod transform;

use thiserror::Error;

/// Main error type for Tributary operations
#[derive(Debug, Error)]
pub enum TributaryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP {status} for {url}")]
    ClientStatus { url: String, status: u16 },

    #[error("Retry budget exhausted after {attempts} attempts for {url}")]
    RetryExhausted { url: String, attempts: u32 },

    #[error("Too many requests for entity '{entity}' (iteration cap {limit})")]
    IterationCap { entity: String, limit: u32 },

    #[error("Missing field '{path}' in response for entity '{entity}'")]
    MissingField { entity: String, path: String },

    #[error("Schema drift retries exhausted for table '{table}' after {attempts} attempts")]
    SchemaDriftExhausted { table: String, attempts: u32 },

    #[error("No loader supports destination: {0}")]
    UnsupportedDestination(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("State store error: {0}")]
    State(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl TributaryError {
    /// Whether re-queueing the whole stage later could succeed.
    ///
    /// Transient transport errors are retried inside the HTTP client; what
    /// escapes a stage is either exhaustion of that retry budget (worth
    /// re-queueing) or a genuinely fatal condition. Soft pagination ends are
    /// not errors and never reach this classification.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TributaryError::Http { .. }
                | TributaryError::Reqwest(_)
                | TributaryError::RetryExhausted { .. }
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown cursor function: {0}")]
    UnknownCursorFn(String),
}

/// Result type alias for Tributary operations
pub type Result<T> = std::result::Result<T, TributaryError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{EntitySpec, SourceConfig, StrategyKind};
pub use extract::{run_extraction, ItemSink};
pub use storage::StagingDb;
pub use transfer::run_transfer;
pub use transform::run_normalization;

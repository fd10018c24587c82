//! Shelf-Crawler: an e-commerce catalog crawler
//!
//! This crate discovers a storefront's navigation, expands its category tree,
//! paginates through listing pages and extracts product records. The control
//! plane lives in three cooperating components:
//!
//! - [`throttle::DomainThrottle`] decides *when* the next request may go out
//! - [`pagination::PaginationController`] decides *how* to reach the next page
//! - [`checkpoint::CheckpointManager`] makes a job resumable after a crash
//!
//! [`crawler::CrawlOrchestrator`] composes them into a four-stage pipeline.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod output;
pub mod page;
pub mod pagination;
pub mod robots;
pub mod storage;
pub mod throttle;
pub mod url;

use thiserror::Error;

/// Main error type for Shelf-Crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("Checkpoint validation failed: {0}")]
    Validation(#[from] checkpoint::ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Throttle error: {0}")]
    Throttle(#[from] throttle::ThrottleError),

    #[error("Page error: {0}")]
    Page(#[from] page::PageError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Short machine-readable code recorded in checkpoint error details
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Checkpoint(_) => "checkpoint",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "persistence",
            Self::Throttle(_) => "throttle",
            Self::Page(e) => e.code(),
            Self::Extraction(_) => "extraction",
            Self::UrlError(_) | Self::UrlParse(_) => "url",
            Self::Reqwest(_) => "http",
            Self::Io(_) => "io",
            Self::Json(_) => "serialization",
            Self::Cancelled => "cancelled",
        }
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

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Shelf-Crawler operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use checkpoint::{CheckpointManager, CheckpointRecord};
pub use config::Config;
pub use crawler::{CrawlJob, CrawlOrchestrator};
pub use pagination::{PaginationController, PaginationSession, PaginationType};
pub use throttle::DomainThrottle;
pub use url::{canonicalize_url, extract_domain};

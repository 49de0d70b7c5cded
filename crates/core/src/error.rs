use std::path::PathBuf;

use crate::provider::ProviderId;

/// Top-level error type for a search session and everything a provider
/// adapter may report back to it.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("No network connection available")]
    NetworkUnavailable,

    #[error("Provider {provider} requires credentials that are not configured")]
    CredentialsRequired { provider: ProviderId },

    #[error("Provider {provider} search failed: {message}")]
    ProviderSearchFailure { provider: ProviderId, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("At least one of ISBN, external id, author or title is required")]
    MissingCriteria,

    #[error("A search is already running")]
    ConcurrentSearchAlreadyRunning,

    #[error("No adapter registered for provider {0}")]
    UnknownProvider(ProviderId),
}

impl SearchError {
    /// Convenience constructor for adapter implementations.
    pub fn failure(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::ProviderSearchFailure {
            provider,
            message: message.into(),
        }
    }
}

/// Problems writing, probing, or deleting cover image files.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Could not delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read image dimensions of {path}: {message}")]
    Image { path: PathBuf, message: String },

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reading or writing persisted site preferences.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Could not parse site state: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize site state: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

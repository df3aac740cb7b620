use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by caller-supplied fetch functions and data sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shareable form of a source error, so one failed fetch can be handed to every coalesced waiter.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "namespace.ttl", "detector.window")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "memory_store", "redis_store", "namespace_config")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache and detection engine.
///
/// Only a few of these ever reach callers of the read path: backing store
/// outages are absorbed there and turned into direct source fetches.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Backing store unavailable: {message}{}", format_context(.context))]
    BackingStoreUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Source fetch failed for key '{key}': {source}")]
    SourceFetchFailed {
        key: String,
        #[source]
        source: SharedError,
    },

    #[error("Source write failed for key '{key}': {source}")]
    SourceWriteFailed {
        key: String,
        #[source]
        source: SharedError,
    },

    #[error("Source fetch for key '{key}' timed out after {timeout:?}")]
    FetchTimeout { key: String, timeout: Duration },

    #[error("Lock for key '{key}' not acquired after {attempts} attempts")]
    LockAcquisitionExhausted { key: String, attempts: u32 },

    #[error("Invalid configuration: {message}{}", format_context(.context))]
    InvalidConfiguration {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a backing store error with structured context
    pub fn store_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::BackingStoreUnavailable {
            message: msg.into(),
            context,
        }
    }

    /// Create a configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidConfiguration {
            message: msg.into(),
            context,
        }
    }

    /// Shorthand for a configuration error pointing at one field.
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new().with_field_path(field))
    }

    pub(crate) fn source_fetch(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::SourceFetchFailed {
            key: key.into(),
            source: Arc::from(source.into()),
        }
    }

    /// True for failures of the backing store itself, the ones the engine degrades around.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::BackingStoreUnavailable { .. })
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::BackingStoreUnavailable { context, .. }
            | Error::InvalidConfiguration { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_rendered_in_display() {
        let err = Error::invalid_field("namespace.ttl", "ttl must be positive");
        let text = err.to_string();
        assert!(text.contains("ttl must be positive"));
        assert!(text.contains("field: namespace.ttl"));
    }

    #[test]
    fn test_store_errors_are_classified() {
        let err = Error::store_with_context(
            "connection refused",
            ErrorContext::new().with_source("redis_store"),
        );
        assert!(err.is_store_unavailable());
        assert_eq!(
            err.context().and_then(|c| c.source.as_deref()),
            Some("redis_store")
        );
        assert!(!Error::source_fetch("k", "boom").is_store_unavailable());
    }
}

use thiserror::Error;

/// Broad classification used by retry loops and the job queue.
/// Transient errors are retried with backoff; terminal errors are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Terminal,
}

#[derive(Debug, Error)]
pub enum JaridaError {
    /// Portal credentials rejected or session could not be established.
    /// Fatal to the current run.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limit, timeout, or other retryable upstream condition.
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Provider rejected the request itself (bad auth, malformed input).
    /// Never retried; the extraction chain falls through to the next stage.
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    /// Extraction ran but the output failed the quality bar.
    #[error("Quality failure: {0}")]
    Quality(String),

    /// A field is out of plausible range and could not be corrected.
    /// The record is still persisted, flagged as an anomaly.
    #[error("Validation anomaly: {0}")]
    Validation(String),

    /// Store-level failure. In-progress work for the item is discarded.
    #[error("Persist error: {0}")]
    Persist(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Domain not in allowlist: {0}")]
    DomainBlocked(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JaridaError {
    /// Classify for retry purposes. Connect/timeout reqwest errors count as
    /// transient; everything else not explicitly transient is terminal.
    pub fn class(&self) -> ErrorClass {
        match self {
            JaridaError::TransientProvider(_) => ErrorClass::Transient,
            JaridaError::Http(e) if e.is_timeout() || e.is_connect() => ErrorClass::Transient,
            _ => ErrorClass::Terminal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Short stable label recorded on failed jobs.
    pub fn class_label(&self) -> &'static str {
        match self {
            JaridaError::Auth(_) => "auth",
            JaridaError::TransientProvider(_) => "transient",
            JaridaError::ProviderRejected(_) => "rejected",
            JaridaError::Quality(_) => "quality",
            JaridaError::Validation(_) => "validation",
            JaridaError::Persist(_) => "persist",
            JaridaError::Http(_) => "http",
            JaridaError::Serialization(_) => "serialization",
            JaridaError::DomainBlocked(_) => "domain_blocked",
            JaridaError::Config(_) => "config",
            JaridaError::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, JaridaError>;

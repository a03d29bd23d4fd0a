//! Error types for the agenda notifier.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while processing a run.
///
/// Per-event errors (`MalformedRow`, `StoreUnavailable`, `ChannelSend`) are
/// contained within that event's pipeline; `SourceUnavailable` drops one
/// source; only `Config` is fatal for the whole run.
#[derive(Error, Debug)]
pub enum Error {
    /// A data source could not be fetched
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A source row is missing required fields or has an unparseable date
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// The tracking store rejected or failed a call
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A notification channel failed to deliver
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Missing credential, environment variable, or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable label used to aggregate error counts in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SourceUnavailable(_) => "source_unavailable",
            Error::MalformedRow(_) => "malformed_row",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::ChannelSend(_) => "channel_send",
            Error::Config(_) => "configuration",
            Error::Serialization(_) => "serialization",
        }
    }
}

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Errors raised on a symbol's feed path.
///
/// `SequenceGap` is not fatal: the feed client reacts by discarding the book
/// and resynchronizing from a fresh snapshot. `RetriesExhausted` is the fatal
/// escalation to the supervisor.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("sequence gap: book at update {last_update_id}, delta covers ({delta_prev}, {delta_last}]")]
    SequenceGap {
        last_update_id: u64,
        delta_prev: u64,
        delta_last: u64,
    },

    #[error("retries exhausted after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocket(Box::new(err))
    }
}

/// Notifier delivery errors, split by whether a retry can help.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("transient notifier error: {0}")]
    Transient(String),

    #[error("permanent notifier error: {0}")]
    Permanent(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("all symbol pipelines failed fatally")]
    AllPipelinesFailed,
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SniffError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open capture on {interface}: {reason}")]
    CaptureOpen { interface: String, reason: String },

    #[error("Failed to open log file {path}: {source}")]
    SinkOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sink write error: {0}")]
    SinkWrite(String),

    #[error("Trace file error: {0}")]
    TraceFormat(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid signature pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, SniffError>;

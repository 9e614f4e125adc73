use thiserror::Error;

pub type Result<T> = std::result::Result<T, FilterError>;

/// Conditions the filter cannot continue past.
///
/// Everything else (unknown sessions, short event records, write failures)
/// is logged as an anomaly and never surfaces here.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed parsing: '{0}'")]
    MalformedRecord(String),

    #[error("unexpected config line: '{0}'")]
    MalformedConfig(String),

    #[error("unexpected EOF before config ready")]
    HandshakeEof,

    #[error("invalid header config: {0}")]
    InvalidHeader(String),

    #[error("at least one header must be provided")]
    NoHeaders,

    #[error("invalid config file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

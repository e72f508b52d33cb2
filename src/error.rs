use std::path::PathBuf;
use thiserror::Error;

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Errors raised by the transport stack (dialing, the timeout reader, the
/// telnet data reader).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The per-read timer elapsed before the source produced bytes.
    /// Callers with time left on their wall-clock deadline just poll again.
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// Invalid TELNET escape sequence on the wire.
    #[error("corrupted telnet stream: IAC followed by {0:#04x}")]
    Corrupted(u8),

    #[error("transport is closed")]
    Closed,

    /// The operation was cancelled from outside (signal, shutdown).
    #[error("interrupted")]
    Interrupted,

    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh authentication rejected for user {0}")]
    SshAuthRejected(String),

    #[error("no dummy scenario file configured")]
    NoScenario,

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the prompt reader and the console session.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("invalid prompt pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The wall-clock deadline elapsed, or the stream ended, before the
    /// prompt pattern matched. Terminal for the current turn.
    #[error("no prompt found")]
    NoPromptFound,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("console is closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Sticky re-report of a transport failure latched by the prompt reader.
    #[error("upstream read failed: {0}")]
    Upstream(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no account defined")]
    NoAccount,

    #[error("commands cannot be empty for host: {0}")]
    NoCommands(String),

    #[error("cannot parse uri: {0}")]
    BadUri(String),

    #[error("unknown scheme: {0}")]
    UnknownScheme(String),
}

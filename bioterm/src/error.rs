//! High-level error types

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core protocol error: {0}")]
    Core(#[from] bioterm_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] bioterm_transport::Error),

    #[error("Record error: {0}")]
    Types(#[from] bioterm_types::Error),

    #[error("Device not connected")]
    NotConnected,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation refused: {0}")]
    Operation(String),
}

impl Error {
    /// True for receive/connect deadline expiries. A timed-out session is
    /// undefined and must be re-established before further commands.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

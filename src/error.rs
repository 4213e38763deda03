//! Error types for quiz-lobby

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Start not permitted: {0}")]
    StartNotPermitted(String),

    #[error("Another action is already in flight")]
    ActionInFlight,

    #[error("Lobby session has ended")]
    SessionEnded,

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("QR code error: {0}")]
    Qr(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LobbyError {
    /// Whether retrying the same request could succeed.
    ///
    /// Transport and HTTP failures are retriable; authorization and
    /// terminal-session errors are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            LobbyError::Transport(_) | LobbyError::Http(_) => true,
            LobbyError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LobbyError>;

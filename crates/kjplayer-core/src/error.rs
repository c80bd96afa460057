//! Error types for KJ Player Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
///
/// These are the typed failures a host command can resolve to. Engine faults
/// raised during playback are not returned from commands; they travel to the
/// host as `onError` events carrying an [`ErrorKind`].
#[derive(Error, Debug)]
pub enum Error {
    // Command errors
    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },

    // Session errors
    #[error("Session has been disposed")]
    SessionDisposed,

    #[error("Failed to generate thumbnail: {0}")]
    Thumbnail(String),

    // Engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to create player instance: {0}")]
    EngineCreation(String),

    // Channel errors
    #[error("Host channel closed")]
    ChannelClosed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid-arguments error for a method
    pub fn invalid_args(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same command later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Thumbnail(_) | Error::ChannelClosed | Error::EngineCreation(_)
        ) || matches!(self, Error::Engine(e) if e.kind() == ErrorKind::Network)
    }

    /// Returns the wire code sent back to the host
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Error::SessionDisposed => "SESSION_DISPOSED",
            Error::Thumbnail(_) => "THUMBNAIL_ERROR",
            Error::Engine(_) => "ENGINE",
            Error::EngineCreation(_) => "ENGINE_CREATION",
            Error::ChannelClosed => "CHANNEL_CLOSED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}

/// Classification of playback faults reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Source could not be opened
    LoadFailed,
    Network,
    FileNotFound,
    Decoding,
    AudioInit,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::LoadFailed => write!(f, "loadFailed"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::FileNotFound => write!(f, "fileNotFound"),
            ErrorKind::Decoding => write!(f, "decoding"),
            ErrorKind::AudioInit => write!(f, "audioInit"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Fault raised by a media engine instance
///
/// Codes follow the engine's numbering: 2xxx I/O, 3xxx parsing,
/// 4xxx decoding, 5xxx audio output.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub const UNSPECIFIED: i32 = 1000;
    pub const IO_UNSPECIFIED: i32 = 2000;
    pub const IO_NETWORK_CONNECTION_FAILED: i32 = 2001;
    pub const IO_NETWORK_CONNECTION_TIMEOUT: i32 = 2002;
    pub const IO_BAD_HTTP_STATUS: i32 = 2004;
    pub const IO_FILE_NOT_FOUND: i32 = 2005;
    pub const PARSING_CONTAINER_MALFORMED: i32 = 3001;
    pub const DECODER_INIT_FAILED: i32 = 4001;
    pub const DECODING_FAILED: i32 = 4003;
    pub const AUDIO_TRACK_INIT_FAILED: i32 = 5001;
    pub const AUDIO_TRACK_WRITE_FAILED: i32 = 5002;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Classify the fault for the host
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            Self::IO_FILE_NOT_FOUND => ErrorKind::FileNotFound,
            2000..=2999 => ErrorKind::Network,
            3000..=4999 => ErrorKind::Decoding,
            5000..=5999 => ErrorKind::AudioInit,
            _ => ErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_classification() {
        assert_eq!(
            EngineError::new(EngineError::IO_FILE_NOT_FOUND, "gone").kind(),
            ErrorKind::FileNotFound
        );
        assert_eq!(
            EngineError::new(EngineError::IO_NETWORK_CONNECTION_TIMEOUT, "slow").kind(),
            ErrorKind::Network
        );
        assert_eq!(
            EngineError::new(EngineError::PARSING_CONTAINER_MALFORMED, "bad box").kind(),
            ErrorKind::Decoding
        );
        assert_eq!(
            EngineError::new(EngineError::DECODING_FAILED, "bad frame").kind(),
            ErrorKind::Decoding
        );
        assert_eq!(
            EngineError::new(EngineError::AUDIO_TRACK_INIT_FAILED, "no sink").kind(),
            ErrorKind::AudioInit
        );
        assert_eq!(EngineError::new(EngineError::UNSPECIFIED, "?").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotImplemented("fly".into()).error_code(), "NOT_IMPLEMENTED");
        assert_eq!(
            Error::invalid_args("seekToMediaItem", "index cannot be null").error_code(),
            "INVALID_ARGUMENTS"
        );
        assert!(Error::Engine(EngineError::new(2001, "offline")).is_recoverable());
        assert!(!Error::SessionDisposed.is_recoverable());
    }
}

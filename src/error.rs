//! Error types for adbblitz

use thiserror::Error;

/// Result type alias for adbblitz operations
pub type Result<T> = std::result::Result<T, Error>;

/// adbblitz error type
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid capture state: {0}")]
    InvalidState(String),

    // Process errors
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupt delivery failed: {0}")]
    Interrupt(String),

    #[error("Reader thread error: {0}")]
    Thread(String),

    // Decoder errors
    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("Codec not supported: {0}")]
    CodecNotSupported(String),

    #[error("Bitstream parse error: {0}")]
    Parse(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Frame conversion error: {0}")]
    Conversion(String),

    // General errors
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error only affects a single unit of the stream
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Parse(_) | Error::Decode(_) | Error::Conversion(_) | Error::FFmpeg(_)
        )
    }
}

pub mod config;
pub mod extract;
pub mod playback;
pub mod reader;
pub mod speech;
pub mod text;
pub mod voice;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RodokuError {
    #[error("Content extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("No speech backend available")]
    NoBackendAvailable,

    #[error("Voice catalog error: {0}")]
    CatalogError(String),

    #[error("Audio playout error: {0}")]
    PlayoutError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RodokuError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // A failed extraction can be retried with another URL
            RodokuError::ExtractionFailed(_) => true,
            // Per-sentence failures are absorbed by the backend fallback
            RodokuError::SynthesisFailed(_) => true,
            // Requires the shell to provide a backend
            RodokuError::NoBackendAvailable => false,
            // Catalog absence only disables the remote backend
            RodokuError::CatalogError(_) => true,
            RodokuError::PlayoutError(_) => true,
            RodokuError::ChannelError(_) => false,
            RodokuError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            RodokuError::ExtractionFailed(_) => {
                "Could not extract readable text from that page.".to_string()
            }
            RodokuError::SynthesisFailed(_) => {
                "Speech synthesis failed. Please try again.".to_string()
            }
            RodokuError::NoBackendAvailable => {
                "No speech engine is available for playback.".to_string()
            }
            RodokuError::CatalogError(_) => "Voice list could not be loaded.".to_string(),
            RodokuError::PlayoutError(_) => {
                "Audio playback error. Please check your speakers.".to_string()
            }
            RodokuError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            RodokuError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RodokuError>;

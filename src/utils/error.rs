use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to open serial port '{path}': {reason}")]
    OpenError { path: String, reason: String },

    #[error("Serial port is not open")]
    NotOpenError,

    #[error("Serial port I/O error: {0}")]
    IoError(#[source] std::io::Error),

    #[error("Serial write failed: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("Listing serial ports failed: {message}")]
    EnumerationError { message: String },

    #[error("Translation failed: {message}")]
    TranslationError { message: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    TransportError(#[source] std::io::Error),

    #[error("Device session task has stopped")]
    SessionClosed,

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

impl RelayError {
    /// Errors after which the device session has torn itself down.
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, RelayError::IoError(_))
    }

    /// Whether a command batch must stop after this error.
    pub fn halts_batch(&self) -> bool {
        matches!(
            self,
            RelayError::NotOpenError | RelayError::IoError(_) | RelayError::SessionClosed
        )
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            RelayError::NotOpenError => "Serial port not open".to_string(),
            RelayError::IoError(_) => "Serial port I/O error. Please reconnect.".to_string(),
            RelayError::OpenError { reason, .. } => reason.clone(),
            RelayError::TranslationError { .. } | RelayError::HttpError(_) => {
                "Error processing command. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

//! Error types for the inspector

use thiserror::Error;

/// Result type for inspector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the inspector
#[derive(Debug, Error)]
pub enum Error {
    /// Frame selection produced no candidate
    #[error("Unable to locate frame to inspect")]
    NoTarget,

    /// Script injection into a frame failed
    #[error("Injection into frame {frame_id} failed: {message}")]
    Injection { frame_id: String, message: String },

    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Screen capture failed
    #[error("Capture error: {0}")]
    Capture(String),

    /// Inbound payload could not be interpreted
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decode error (e.g., base64)
    #[error("Decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Diagnostics sink could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an injection error for a frame
    pub fn injection(frame_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Injection {
            frame_id: frame_id.into(),
            message: message.into(),
        }
    }

    /// True when the frame behind a CDP call no longer exists
    ///
    /// Chrome reports these as "Cannot find context" / "No frame with given id".
    pub fn is_frame_gone(&self) -> bool {
        match self {
            Error::Cdp { message, .. } => {
                message.contains("Cannot find context")
                    || message.contains("No frame")
                    || message.contains("Execution context was destroyed")
            }
            _ => false,
        }
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure category a binding attempt can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Wallet,
    Timeout,
    Network,
    Server,
    Parse,
    StateConflict,
    Internal,
}

/// Serializable record of a failure, kept on the session as `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Wallet error - {message}")]
    Wallet {
        code: Option<String>,
        message: String,
    },

    #[error("No wallet callback within {waited:?}")]
    Timeout { waited: Duration },

    #[error("Network error - {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server rejected request ({status}) - {message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Parse error - {0}")]
    Parse(String),

    #[error("State conflict - {0}")]
    StateConflict(String),

    #[error("Invalid params - {0}")]
    InvalidParams(String),

    #[error("Invalid URI - {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("IO error - {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error - {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TryInitError - {0}")]
    TryInitError(#[from] tracing_subscriber::util::TryInitError),
}

impl AppError {
    pub fn wallet(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Wallet {
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Wallet { .. } => ErrorKind::Wallet,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::Parse(_) | Self::InvalidUri(_) | Self::SerializationError(_) => ErrorKind::Parse,
            Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::InvalidParams(_) | Self::IoError(_) | Self::TryInitError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Human-readable reason suitable for the binding screen.
    pub fn user_message(&self) -> String {
        match self {
            Self::Wallet { code, message } => {
                tracing::debug!(code = ?code, message = %message, "Wallet reported failure");

                match code.as_deref() {
                    Some("4001") => "Wallet request was cancelled.".to_string(),
                    _ => format!("Wallet could not complete the request: {message}"),
                }
            }
            Self::Timeout { .. } => {
                "The wallet did not respond in time. Please try again.".to_string()
            }
            Self::Network(error) => {
                tracing::error!(error = %error, "Network error");

                "Network error. Check your connection and try again.".to_string()
            }
            Self::Server { code, message, .. } => match code.as_deref() {
                Some(code) if code.contains("nonce") => {
                    "Sign-in challenge expired. Please start again.".to_string()
                }
                Some(code) if code.contains("signature") => {
                    "Wallet signature verification failed. Please try signing again.".to_string()
                }
                _ => format!("Server rejected the request: {message}"),
            },
            Self::Parse(error) => {
                tracing::error!(error = %error, "Parse error");

                "Unexpected response from server.".to_string()
            }
            Self::StateConflict(_) => {
                "A wallet request is already in progress.".to_string()
            }
            Self::InvalidUri(error) => {
                tracing::error!(error = %error, "Invalid URI");

                "Unexpected response from wallet.".to_string()
            }
            Self::SerializationError(error) => {
                tracing::error!(error = %error, "Serialization error");

                "Unexpected response from server.".to_string()
            }
            _ => {
                tracing::error!(error = %self, "Internal error");

                "Something went wrong. Please try again.".to_string()
            }
        }
    }

    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            kind: self.kind(),
            message: self.user_message(),
        }
    }
}

impl From<&AppError> for ErrorDescriptor {
    fn from(error: &AppError) -> Self {
        error.descriptor()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(AppError::wallet(None, "x").kind(), ErrorKind::Wallet);
        assert_eq!(
            AppError::Timeout {
                waited: Duration::from_secs(30)
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(AppError::Parse("x".into()).kind(), ErrorKind::Parse);
        assert_eq!(
            AppError::StateConflict("x".into()).kind(),
            ErrorKind::StateConflict
        );
    }

    #[test]
    fn server_nonce_code_maps_to_expiry_message() {
        let error = AppError::Server {
            status: 400,
            code: Some("nonce_expired".into()),
            message: "nonce expired".into(),
        };

        let descriptor = error.descriptor();
        assert_eq!(descriptor.kind, ErrorKind::Server);
        assert!(descriptor.message.contains("expired"));
    }

    #[test]
    fn cancelled_wallet_request_is_reported_as_cancel() {
        let error = AppError::wallet(Some("4001".into()), "User rejected the request.");
        assert_eq!(error.user_message(), "Wallet request was cancelled.");
    }
}

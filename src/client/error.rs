//! Client error taxonomy / 客户端错误分类

use super::response::RemoteException;

/// Result type for client operations / 客户端操作结果类型
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error types / 客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No available name node: probed {probed} endpoint(s), none reported active")]
    Unavailable { probed: usize },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("{0}")]
    Remote(RemoteException),

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Server returned status {status} for {target}")]
    Status { status: u16, target: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },
}

/// Coarse error classification / 粗粒度错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Unavailable,
    UnsupportedOperation,
    Remote,
    MalformedResponse,
    Transport,
    Authentication,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Configuration { .. } => ErrorKind::Configuration,
            ClientError::Unavailable { .. } => ErrorKind::Unavailable,
            ClientError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            ClientError::Remote(_) => ErrorKind::Remote,
            ClientError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            ClientError::Http(_) | ClientError::Decode(_) | ClientError::Status { .. } => {
                ErrorKind::Transport
            }
            ClientError::Authentication { .. } => ErrorKind::Authentication,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ClientError::MalformedResponse {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ClientError::Configuration {
            message: message.into(),
        }
    }

    /// Remote exception carried by this error, if any / 获取远程异常
    pub fn remote_exception(&self) -> Option<&RemoteException> {
        match self {
            ClientError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::Configuration {
            message: format!("invalid endpoint url: {}", e),
        }
    }
}

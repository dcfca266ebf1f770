//! Request signing boundary / 请求签名边界
//!
//! The authentication handshake itself (SPNEGO/Kerberos or similar) lives
//! behind [`RequestSigner`]. The client only asks it to sign a request.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

use super::error::{ClientError, ClientResult};

/// Signs outgoing requests / 为请求签名
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn sign(&self, request: reqwest::Request) -> ClientResult<reqwest::Request>;
}

/// Injects one pre-negotiated header, e.g. `Authorization: Negotiate ...`
/// 注入一个预先协商好的请求头
#[derive(Debug, Clone)]
pub struct HeaderSigner {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderSigner {
    pub fn new(name: &str, value: &str) -> ClientResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            ClientError::Authentication {
                message: format!("invalid header name {}: {}", name, e),
            }
        })?;
        let mut value = HeaderValue::from_str(value).map_err(|e| ClientError::Authentication {
            message: format!("invalid header value: {}", e),
        })?;
        value.set_sensitive(true);
        Ok(Self { name, value })
    }

    /// `Authorization: Negotiate <token>` / SPNEGO协商头
    pub fn negotiate(token: &str) -> ClientResult<Self> {
        Self::new("authorization", &format!("Negotiate {}", token))
    }
}

#[async_trait]
impl RequestSigner for HeaderSigner {
    async fn sign(&self, mut request: reqwest::Request) -> ClientResult<reqwest::Request> {
        request
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        Ok(request)
    }
}

//! Client configuration / 客户端配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ClientError, ClientResult};
use super::token::RefreshPolicy;

/// Gateway client configuration / 网关客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Name node addresses (`host:port`) in priority order / 按优先级排列的名称节点地址
    pub namenodes: Vec<String>,
    /// `http` or `https` / 协议
    pub scheme: String,
    /// Plain user name for simple auth / 简单认证用户名
    pub user: Option<String>,
    /// Renewer requested for new delegation tokens, `user` when unset
    /// 委托令牌的续期者（未设置时使用user）
    pub renewer: Option<String>,
    /// Pre-issued delegation token / 预先签发的委托令牌
    pub delegation_token: Option<String>,
    /// Acquire a token at startup and keep it renewed (requires a signer)
    /// 启动时获取令牌并自动续期（需要签名器）
    pub auto_renew_token: bool,
    pub transport: TransportConfig,
    pub token_refresh: TokenRefreshConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namenodes: Vec::new(),
            scheme: "http".to_string(),
            user: None,
            renewer: None,
            delegation_token: None,
            auto_renew_token: false,
            transport: TransportConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_namenodes<I, S>(namenodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namenodes: namenodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.namenodes.iter().all(|n| n.trim().is_empty()) {
            return Err(ClientError::configuration("no name node configured"));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(ClientError::configuration(format!(
                "unsupported scheme: {}",
                self.scheme
            )));
        }
        if self.token_refresh.max_renew_attempts == 0 {
            return Err(ClientError::configuration(
                "token_refresh.max_renew_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// HTTP transport settings / HTTP传输设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    /// 0 disables the per-request timeout / 0表示不设置请求超时
    pub request_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            request_timeout_ms: 0,
            pool_max_idle_per_host: 16,
            pool_idle_timeout_ms: 90_000,
        }
    }
}

impl TransportConfig {
    pub fn build_http_client(&self) -> ClientResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_millis(self.pool_idle_timeout_ms));
        if self.request_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(self.request_timeout_ms));
        }
        Ok(builder.build()?)
    }
}

/// Token refresh schedule / 令牌刷新计划
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenRefreshConfig {
    pub safety_margin_secs: u64,
    pub max_jitter_secs: u64,
    pub backoff_step_secs: u64,
    pub max_renew_attempts: u32,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        let policy = RefreshPolicy::default();
        Self {
            safety_margin_secs: policy.safety_margin.as_secs(),
            max_jitter_secs: policy.max_jitter.as_secs(),
            backoff_step_secs: policy.backoff_step.as_secs(),
            max_renew_attempts: policy.max_renew_attempts,
        }
    }
}

impl TokenRefreshConfig {
    pub fn to_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            safety_margin: Duration::from_secs(self.safety_margin_secs),
            max_jitter: Duration::from_secs(self.max_jitter_secs),
            backoff_step: Duration::from_secs(self.backoff_step_secs),
            max_renew_attempts: self.max_renew_attempts,
        }
    }
}

//! HA-aware gateway client / 支持HA的网关客户端
//!
//! Control flow per call: resolve the active name node, build the target
//! with the current auth material, send, interpret the reply. Delegation
//! tokens are kept fresh by a background task owned by [`TokenManager`].

pub mod auth;
pub mod config;
pub mod error;
pub mod request;
pub mod resolver;
pub mod response;
pub mod token;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

pub use auth::{HeaderSigner, RequestSigner};
pub use config::{ClientConfig, TokenRefreshConfig, TransportConfig};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use request::{AuthPolicy, OpCode, OperationRequest, RequestBuilder, RequestTarget};
pub use resolver::{Endpoint, HaState, HttpLivenessProbe, LivenessProbe, NameNodeResolver};
pub use response::{
    interpret, ContentSummary, FileChecksum, FileStatus, FileStatuses, RemoteException, Response,
};
pub use token::{DelegationToken, RefreshPolicy, TokenCell, TokenManager, TokenSource};

use request::{redact, template_of};
use response::remote_exception_in;

/// Shared request pipeline / 共享请求管线
struct Gateway {
    http: reqwest::Client,
    resolver: NameNodeResolver,
    builder: RequestBuilder,
    signer: Option<Arc<dyn RequestSigner>>,
    renewer: Option<String>,
}

impl Gateway {
    /// Resolve and build; unsupported operations fail before any I/O
    /// 解析并构建；不支持的操作在任何I/O之前失败
    async fn prepare(&self, req: &OperationRequest) -> ClientResult<RequestTarget> {
        template_of(req)?;
        let endpoint = self.resolver.resolve().await?;
        self.builder.build(req, &endpoint)
    }

    async fn send(&self, target: &RequestTarget) -> ClientResult<reqwest::Response> {
        let mut request = self
            .http
            .request(target.method.clone(), target.url.clone())
            .build()?;
        if target.sign {
            if let Some(signer) = &self.signer {
                request = signer.sign(request).await?;
            }
        }
        debug!(op = %target.op, target = %redact(&target.url), "sending request");
        Ok(self.http.execute(request).await?)
    }

    async fn call(&self, req: &OperationRequest) -> ClientResult<Response> {
        let target = self.prepare(req).await?;
        let resp = self.send(&target).await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(status_error(status, &target, &body));
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Response::Empty);
        }
        response::interpret(&body)
    }
}

fn status_error(status: reqwest::StatusCode, target: &RequestTarget, body: &[u8]) -> ClientError {
    match remote_exception_in(body) {
        Some(remote) => ClientError::Remote(remote),
        None => ClientError::Status {
            status: status.as_u16(),
            target: redact(&target.url),
        },
    }
}

fn unexpected(expected: &str, got: &Response) -> ClientError {
    ClientError::malformed(format!(
        "expected {} in response, got {}",
        expected,
        got.variant_name()
    ))
}

#[async_trait]
impl TokenSource for Gateway {
    async fn acquire(&self) -> ClientResult<DelegationToken> {
        let mut req = OperationRequest::root(OpCode::GetDelegationToken);
        req.renewer = self.renewer.clone();
        match self.call(&req).await? {
            Response::Token(t) if !t.url_string.is_empty() => Ok(DelegationToken::new(t.url_string)),
            other => Err(unexpected("Token", &other)),
        }
    }

    async fn renew(&self, token: &DelegationToken) -> ClientResult<DateTime<Utc>> {
        let mut req = OperationRequest::root(OpCode::RenewDelegationToken);
        req.token = Some(token.value.clone());
        match self.call(&req).await? {
            Response::Long(ms) => token::expiration_from_millis(ms),
            other => Err(unexpected("long", &other)),
        }
    }
}

/// Live body of an OPEN call, streamed without buffering
/// 以流式方式返回的OPEN响应体（不做缓冲）
#[derive(Debug)]
pub struct FileReader {
    response: reqwest::Response,
}

impl FileReader {
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Next chunk, `None` at end of body / 下一个数据块
    pub async fn chunk(&mut self) -> ClientResult<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }

    pub fn into_stream(self) -> impl Stream<Item = ClientResult<Bytes>> + Send {
        self.response.bytes_stream().map_err(ClientError::from)
    }

    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        let stream = self
            .response
            .bytes_stream()
            .map_err(std::io::Error::other);
        StreamReader::new(Box::pin(stream))
    }

    /// Drain the whole body into memory / 读取全部内容
    pub async fn read_all(self) -> ClientResult<Bytes> {
        Ok(self.response.bytes().await?)
    }
}

/// Builder for [`Client`] / 客户端构建器
pub struct ClientBuilder {
    config: ClientConfig,
    signer: Option<Arc<dyn RequestSigner>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            signer: None,
            probe: None,
            http: None,
        }
    }

    /// Enables token-based auth / 启用基于令牌的认证
    pub fn signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Resolve the active name node and set up auth / 解析活跃节点并初始化认证
    pub async fn connect(self) -> ClientResult<Client> {
        let config = self.config;
        config.validate()?;

        if config.auto_renew_token && self.signer.is_none() {
            return Err(ClientError::configuration(
                "auto_renew_token requires a request signer",
            ));
        }

        let http = match self.http {
            Some(http) => http,
            None => config.transport.build_http_client()?,
        };
        let endpoints = config
            .namenodes
            .iter()
            .filter(|n| !n.trim().is_empty())
            .map(|n| Endpoint::new(n, &config.scheme))
            .collect::<ClientResult<Vec<_>>>()?;
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpLivenessProbe::new(http.clone())));
        let resolver = NameNodeResolver::new(endpoints, probe)?;
        if !resolver.is_single() {
            let active = resolver.resolve().await?;
            info!(endpoint = %active, "resolved active name node");
        }

        let cell = Arc::new(TokenCell::new(
            config
                .delegation_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(DelegationToken::new),
        ));
        let auth = if self.signer.is_some() || cell.get().is_some() {
            AuthPolicy::Token(cell.clone())
        } else if let Some(user) = config.user.clone().filter(|u| !u.is_empty()) {
            AuthPolicy::User(user)
        } else {
            AuthPolicy::Anonymous
        };
        debug!(auth = ?auth, "auth policy selected");

        let gateway = Arc::new(Gateway {
            http,
            resolver,
            builder: RequestBuilder::new(auth),
            signer: self.signer,
            renewer: [&config.renewer, &config.user]
                .into_iter()
                .flatten()
                .find(|r| !r.is_empty())
                .cloned(),
        });
        let tokens = Arc::new(TokenManager::new(
            gateway.clone(),
            cell,
            config.token_refresh.to_policy(),
        ));

        if config.auto_renew_token {
            if tokens.current().is_none() {
                tokens.acquire().await?;
            }
            tokens.start_refresh();
        }

        Ok(Client { gateway, tokens })
    }
}

/// Gateway client, cheap to clone and safe to share across tasks
/// 网关客户端，可廉价克隆并在任务间共享
///
/// Dropping the last clone stops the token refresh task.
#[derive(Clone)]
pub struct Client {
    gateway: Arc<Gateway>,
    tokens: Arc<TokenManager>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Connect without a signer / 不带签名器连接
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        ClientBuilder::new(config).connect().await
    }

    /// Endpoint selected by the latest resolution / 最近一次解析的端点
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        self.gateway.resolver.current()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        self.gateway.resolver.endpoints()
    }

    /// Re-run HA resolution / 重新执行HA解析
    pub async fn resolve(&self) -> ClientResult<Endpoint> {
        self.gateway.resolver.resolve().await
    }

    /// Resolve and build the target for `req` without sending it
    /// 解析并构建请求目标但不发送
    pub async fn build_target(&self, req: &OperationRequest) -> ClientResult<RequestTarget> {
        self.gateway.prepare(req).await
    }

    /// Run any supported JSON operation / 执行任意受支持的JSON操作
    pub async fn execute(&self, req: &OperationRequest) -> ClientResult<Response> {
        self.gateway.call(req).await
    }

    /// Open a file for streaming read / 打开文件进行流式读取
    ///
    /// Zero `offset`, `length` or `buffer_size` are left to server defaults.
    pub async fn open(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        buffer_size: u32,
    ) -> ClientResult<FileReader> {
        let mut req = OperationRequest::new(OpCode::Open, path);
        req.offset = offset;
        req.length = length;
        req.buffer_size = buffer_size;

        let target = self.gateway.prepare(&req).await?;
        let response = self.gateway.send(&target).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await?;
            warn!(path, status = status.as_u16(), "open failed");
            return Err(status_error(status, &target, &body));
        }
        Ok(FileReader { response })
    }

    /// List a directory / 列出目录
    pub async fn list_status(&self, path: &str) -> ClientResult<Vec<FileStatus>> {
        let req = OperationRequest::new(OpCode::ListStatus, path);
        match self.gateway.call(&req).await? {
            Response::FileStatuses(list) => Ok(list.file_status),
            other => Err(unexpected("FileStatuses", &other)),
        }
    }

    pub async fn get_file_status(&self, path: &str) -> ClientResult<FileStatus> {
        let req = OperationRequest::new(OpCode::GetFileStatus, path);
        match self.gateway.call(&req).await? {
            Response::FileStatus(status) => Ok(status),
            other => Err(unexpected("FileStatus", &other)),
        }
    }

    pub async fn get_file_checksum(&self, path: &str) -> ClientResult<FileChecksum> {
        let req = OperationRequest::new(OpCode::GetFileChecksum, path);
        match self.gateway.call(&req).await? {
            Response::FileChecksum(checksum) => Ok(checksum),
            other => Err(unexpected("FileChecksum", &other)),
        }
    }

    pub async fn get_content_summary(&self, path: &str) -> ClientResult<ContentSummary> {
        let req = OperationRequest::new(OpCode::GetContentSummary, path);
        match self.gateway.call(&req).await? {
            Response::ContentSummary(summary) => Ok(summary),
            other => Err(unexpected("ContentSummary", &other)),
        }
    }

    /// Create a directory and its parents / 创建目录（含父目录）
    pub async fn mkdirs(&self, path: &str, permission: Option<&str>) -> ClientResult<bool> {
        let mut req = OperationRequest::new(OpCode::Mkdirs, path);
        req.permission = permission.map(str::to_string);
        self.boolean(&req).await
    }

    pub async fn rename(&self, src: &str, dst: &str) -> ClientResult<bool> {
        let mut req = OperationRequest::new(OpCode::Rename, src);
        req.destination = Some(dst.to_string());
        self.boolean(&req).await
    }

    pub async fn delete(&self, path: &str, recursive: bool) -> ClientResult<bool> {
        let mut req = OperationRequest::new(OpCode::Delete, path);
        req.recursive = recursive;
        self.boolean(&req).await
    }

    async fn boolean(&self, req: &OperationRequest) -> ClientResult<bool> {
        match self.gateway.call(req).await? {
            Response::Boolean(v) => Ok(v),
            other => Err(unexpected("boolean", &other)),
        }
    }

    /// Acquire a new delegation token and start using it / 获取新的委托令牌并启用
    pub async fn get_delegation_token(&self) -> ClientResult<DelegationToken> {
        self.tokens.acquire().await
    }

    /// Renew the held token, returning its new expiration / 续期当前令牌
    pub async fn renew_delegation_token(&self) -> ClientResult<DateTime<Utc>> {
        self.tokens.renew().await
    }

    /// Cancel the held token and stop refreshing it / 取消当前令牌并停止刷新
    pub async fn cancel_delegation_token(&self) -> ClientResult<()> {
        let token = self
            .tokens
            .current()
            .ok_or_else(|| ClientError::configuration("no delegation token held"))?;
        let mut req = OperationRequest::root(OpCode::CancelDelegationToken);
        req.token = Some(token.value);
        self.gateway.call(&req).await?;
        self.tokens.shutdown();
        self.tokens.cell().clear();
        info!("cancelled delegation token");
        Ok(())
    }

    /// Token currently held, if any / 当前持有的令牌
    pub fn delegation_token(&self) -> Option<DelegationToken> {
        self.tokens.current()
    }

    pub fn is_refreshing(&self) -> bool {
        self.tokens.is_refreshing()
    }

    /// Stop the token refresh task / 停止令牌刷新任务
    pub fn shutdown(&self) {
        self.tokens.shutdown();
    }
}

//! Operation request construction / 操作请求构建
//!
//! Each supported opcode maps to one declarative template: an HTTP method,
//! whether the target is addressed under a file path or the gateway root,
//! and the ordered list of query fields it may carry. Optional fields are
//! emitted only when present and non-zero.

use std::str::FromStr;
use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use super::error::{ClientError, ClientResult};
use super::resolver::Endpoint;
use super::token::TokenCell;

/// Gateway opcodes / 网关操作码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Open,
    Create,
    Append,
    Concat,
    Rename,
    Delete,
    SetPermission,
    SetOwner,
    SetReplication,
    SetTimes,
    Mkdirs,
    CreateSymlink,
    ListStatus,
    GetFileStatus,
    GetContentSummary,
    GetFileChecksum,
    GetDelegationToken,
    GetDelegationTokens,
    RenewDelegationToken,
    CancelDelegationToken,
}

impl OpCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::Open => "OPEN",
            OpCode::Create => "CREATE",
            OpCode::Append => "APPEND",
            OpCode::Concat => "CONCAT",
            OpCode::Rename => "RENAME",
            OpCode::Delete => "DELETE",
            OpCode::SetPermission => "SETPERMISSION",
            OpCode::SetOwner => "SETOWNER",
            OpCode::SetReplication => "SETREPLICATION",
            OpCode::SetTimes => "SETTIMES",
            OpCode::Mkdirs => "MKDIRS",
            OpCode::CreateSymlink => "CREATESYMLINK",
            OpCode::ListStatus => "LISTSTATUS",
            OpCode::GetFileStatus => "GETFILESTATUS",
            OpCode::GetContentSummary => "GETCONTENTSUMMARY",
            OpCode::GetFileChecksum => "GETFILECHECKSUM",
            OpCode::GetDelegationToken => "GETDELEGATIONTOKEN",
            OpCode::GetDelegationTokens => "GETDELEGATIONTOKENS",
            OpCode::RenewDelegationToken => "RENEWDELEGATIONTOKEN",
            OpCode::CancelDelegationToken => "CANCELDELEGATIONTOKEN",
        }
    }

    /// Token operations are authenticated by the signer, not by a delegation
    /// parameter / 令牌操作由签名器认证
    pub fn is_token_op(&self) -> bool {
        matches!(
            self,
            OpCode::GetDelegationToken
                | OpCode::GetDelegationTokens
                | OpCode::RenewDelegationToken
                | OpCode::CancelDelegationToken
        )
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpCode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => OpCode::Open,
            "CREATE" => OpCode::Create,
            "APPEND" => OpCode::Append,
            "CONCAT" => OpCode::Concat,
            "RENAME" => OpCode::Rename,
            "DELETE" => OpCode::Delete,
            "SETPERMISSION" => OpCode::SetPermission,
            "SETOWNER" => OpCode::SetOwner,
            "SETREPLICATION" => OpCode::SetReplication,
            "SETTIMES" => OpCode::SetTimes,
            "MKDIRS" => OpCode::Mkdirs,
            "CREATESYMLINK" => OpCode::CreateSymlink,
            "LISTSTATUS" => OpCode::ListStatus,
            "GETFILESTATUS" => OpCode::GetFileStatus,
            "GETCONTENTSUMMARY" => OpCode::GetContentSummary,
            "GETFILECHECKSUM" => OpCode::GetFileChecksum,
            "GETDELEGATIONTOKEN" => OpCode::GetDelegationToken,
            "GETDELEGATIONTOKENS" => OpCode::GetDelegationTokens,
            "RENEWDELEGATIONTOKEN" => OpCode::RenewDelegationToken,
            "CANCELDELEGATIONTOKEN" => OpCode::CancelDelegationToken,
            _ => {
                return Err(ClientError::UnsupportedOperation {
                    operation: s.to_string(),
                })
            }
        };
        Ok(op)
    }
}

/// Parameters of one gateway call / 单次网关调用的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationRequest {
    pub op: Option<OpCode>,
    pub path: String,
    pub offset: u64,
    pub length: u64,
    pub buffer_size: u32,
    pub permission: Option<String>,
    pub destination: Option<String>,
    pub recursive: bool,
    pub renewer: Option<String>,
    /// Token being renewed or cancelled / 被续期或取消的令牌
    pub token: Option<String>,
    /// Filled by auth injection / 由认证注入填充
    pub delegation: Option<String>,
    /// Filled by auth injection / 由认证注入填充
    pub user_name: Option<String>,
}

impl OperationRequest {
    pub fn new(op: OpCode, path: impl Into<String>) -> Self {
        Self {
            op: Some(op),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Root-scoped request with no file path / 无路径的根请求
    pub fn root(op: OpCode) -> Self {
        Self::new(op, "")
    }
}

/// Where the operation is addressed / 请求目标范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Path,
    Root,
}

/// Query fields known to the templates / 模板可用的查询字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Offset,
    Length,
    BufferSize,
    Permission,
    Destination,
    Recursive,
    Renewer,
    Token,
    Delegation,
    UserName,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::Offset => "offset",
            Field::Length => "length",
            Field::BufferSize => "buffersize",
            Field::Permission => "permission",
            Field::Destination => "destination",
            Field::Recursive => "recursive",
            Field::Renewer => "renewer",
            Field::Token => "token",
            Field::Delegation => "delegation",
            Field::UserName => "user.name",
        }
    }

    /// Value to emit, `None` when the field is absent / 字段值，缺省为None
    pub fn value(&self, req: &OperationRequest) -> Option<String> {
        fn text(v: &Option<String>) -> Option<String> {
            v.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
        }
        match self {
            Field::Offset => (req.offset != 0).then(|| req.offset.to_string()),
            Field::Length => (req.length != 0).then(|| req.length.to_string()),
            Field::BufferSize => (req.buffer_size != 0).then(|| req.buffer_size.to_string()),
            Field::Permission => text(&req.permission),
            Field::Destination => text(&req.destination),
            Field::Recursive => req.recursive.then(|| "true".to_string()),
            Field::Renewer => text(&req.renewer),
            Field::Token => text(&req.token),
            Field::Delegation => text(&req.delegation),
            Field::UserName => text(&req.user_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Optional,
    /// Emitted even when empty / 即使为空也会输出
    Required,
}

/// Declarative per-operation request shape / 声明式操作模板
#[derive(Debug)]
pub struct Template {
    pub method: Method,
    pub scope: Scope,
    pub fields: &'static [(Field, Presence)],
}

use Field::*;
use Presence::*;

const AUTH: [(Field, Presence); 2] = [(Delegation, Optional), (UserName, Optional)];

static OPEN: Template = Template {
    method: Method::GET,
    scope: Scope::Path,
    fields: &[
        (Offset, Optional),
        (Length, Optional),
        (BufferSize, Optional),
        AUTH[0],
        AUTH[1],
    ],
};

static PATH_QUERY: Template = Template {
    method: Method::GET,
    scope: Scope::Path,
    fields: &AUTH,
};

static MKDIRS: Template = Template {
    method: Method::PUT,
    scope: Scope::Path,
    fields: &[(Permission, Optional), AUTH[0], AUTH[1]],
};

static RENAME: Template = Template {
    method: Method::PUT,
    scope: Scope::Path,
    fields: &[(Destination, Required), AUTH[0], AUTH[1]],
};

static DELETE: Template = Template {
    method: Method::DELETE,
    scope: Scope::Path,
    fields: &[(Recursive, Optional), AUTH[0], AUTH[1]],
};

static GET_TOKEN: Template = Template {
    method: Method::GET,
    scope: Scope::Root,
    fields: &[(Renewer, Optional)],
};

static TOKEN_UPDATE: Template = Template {
    method: Method::PUT,
    scope: Scope::Root,
    fields: &[(Token, Required)],
};

/// Template for an opcode / 操作码对应的模板
pub fn template_for(op: OpCode) -> ClientResult<&'static Template> {
    let template = match op {
        OpCode::Open => &OPEN,
        OpCode::GetFileStatus
        | OpCode::ListStatus
        | OpCode::GetFileChecksum
        | OpCode::GetContentSummary => &PATH_QUERY,
        OpCode::Mkdirs => &MKDIRS,
        OpCode::Rename => &RENAME,
        OpCode::Delete => &DELETE,
        OpCode::GetDelegationToken => &GET_TOKEN,
        OpCode::RenewDelegationToken | OpCode::CancelDelegationToken => &TOKEN_UPDATE,
        OpCode::Create
        | OpCode::Append
        | OpCode::Concat
        | OpCode::SetPermission
        | OpCode::SetOwner
        | OpCode::SetReplication
        | OpCode::SetTimes
        | OpCode::CreateSymlink
        | OpCode::GetDelegationTokens => {
            return Err(ClientError::UnsupportedOperation {
                operation: op.as_str().to_string(),
            })
        }
    };
    Ok(template)
}

/// Template for a request, rejecting an absent opcode / 获取请求模板
pub fn template_of(req: &OperationRequest) -> ClientResult<(OpCode, &'static Template)> {
    let op = req.op.ok_or_else(|| ClientError::UnsupportedOperation {
        operation: "<none>".to_string(),
    })?;
    Ok((op, template_for(op)?))
}

/// Built request target / 构建完成的请求目标
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTarget {
    pub op: OpCode,
    pub method: Method,
    pub url: Url,
    /// Set when the request should go through the signer / 是否需要签名
    pub sign: bool,
}

/// Auth material policy / 认证材料策略
#[derive(Clone)]
pub enum AuthPolicy {
    /// Attach the current delegation token / 附加当前委托令牌
    Token(Arc<TokenCell>),
    /// Attach a plain user name / 附加用户名
    User(String),
    Anonymous,
}

impl std::fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthPolicy::Token(_) => f.write_str("Token"),
            AuthPolicy::User(u) => f.debug_tuple("User").field(u).finish(),
            AuthPolicy::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Builds request targets / 请求目标构建器
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    auth: AuthPolicy,
}

impl RequestBuilder {
    pub fn new(auth: AuthPolicy) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    /// Build the target for `req` against `endpoint` / 构建请求目标
    ///
    /// Auth material is selected here, right before use, so a token swapped
    /// in by the refresh task is seen by the next build.
    pub fn build(&self, req: &OperationRequest, endpoint: &Endpoint) -> ClientResult<RequestTarget> {
        let (op, template) = template_of(req)?;

        let mut req = req.clone();
        let mut sign = op.is_token_op();
        match &self.auth {
            AuthPolicy::Token(cell) => match cell.usable() {
                Some(token) => req.delegation = Some(token.value),
                None => {
                    if !op.is_token_op() {
                        warn!(op = %op, "no usable delegation token, falling back to signer");
                    }
                    sign = true;
                }
            },
            AuthPolicy::User(user) => req.user_name = Some(user.clone()),
            AuthPolicy::Anonymous => {}
        }

        let mut url = endpoint.base_url().clone();
        if template.scope == Scope::Path {
            let segments: Vec<&str> = req.path.split('/').filter(|s| !s.is_empty()).collect();
            if !segments.is_empty() {
                url.path_segments_mut()
                    .map_err(|_| ClientError::configuration("endpoint url cannot carry a path"))?
                    .pop_if_empty()
                    .extend(segments)
                    .push("");
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", op.as_str());
            for (field, presence) in template.fields {
                match (field.value(&req), presence) {
                    (Some(v), _) => {
                        query.append_pair(field.key(), &v);
                    }
                    (None, Presence::Required) => {
                        query.append_pair(field.key(), "");
                    }
                    (None, Presence::Optional) => {}
                }
            }
        }

        debug!(op = %op, method = %template.method, target = %redact(&url), "built request target");
        Ok(RequestTarget {
            op,
            method: template.method.clone(),
            url,
            sign,
        })
    }
}

/// Target with credential values masked, for logs / 日志用的脱敏地址
pub(crate) fn redact(url: &Url) -> String {
    let mut out = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "delegation" || k == "token" {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out.to_string()
}

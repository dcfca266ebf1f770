//! Gateway response envelope and interpretation / 网关响应信封与解析
//!
//! Every JSON reply from the gateway is an object with at most one populated
//! top-level field. A populated `RemoteException` always wins over anything
//! else in the same envelope.

use serde::{Deserialize, Serialize};

use super::error::{ClientError, ClientResult};

/// File or directory status record / 文件状态记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileStatus {
    pub access_time: i64,
    pub block_size: i64,
    pub group: String,
    pub length: i64,
    pub modification_time: i64,
    pub owner: String,
    pub path_suffix: String,
    pub permission: String,
    pub replication: i64,
    #[serde(rename = "type")]
    pub file_type: String,
}

impl FileStatus {
    pub fn is_dir(&self) -> bool {
        self.file_type == "DIRECTORY"
    }
}

/// Directory listing container / 目录列表容器
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStatuses {
    #[serde(rename = "FileStatus", default)]
    pub file_status: Vec<FileStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileChecksum {
    pub algorithm: String,
    pub bytes: String,
    pub length: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentSummary {
    pub directory_count: i64,
    pub file_count: i64,
    pub length: i64,
    pub quota: i64,
    pub space_consumed: i64,
    pub space_quota: i64,
}

/// Delegation token record as returned by the gateway / 网关返回的委托令牌记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenRecord {
    pub url_string: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRecords {
    #[serde(rename = "Token", default)]
    pub token: Vec<TokenRecord>,
}

/// Server-reported application failure / 服务端报告的应用异常
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteException {
    pub exception: String,
    pub java_class_name: String,
    pub message: String,
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RemoteException: {} [{}]: {}",
            self.exception, self.java_class_name, self.message
        )
    }
}

/// Wire shape of the envelope / 信封的线上格式
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(rename = "boolean")]
    boolean: Option<bool>,
    #[serde(rename = "long")]
    long: Option<i64>,
    #[serde(rename = "FileStatus")]
    file_status: Option<FileStatus>,
    #[serde(rename = "FileStatuses")]
    file_statuses: Option<FileStatuses>,
    #[serde(rename = "FileChecksum")]
    file_checksum: Option<FileChecksum>,
    #[serde(rename = "ContentSummary")]
    content_summary: Option<ContentSummary>,
    #[serde(rename = "Token")]
    token: Option<TokenRecord>,
    #[serde(rename = "Tokens")]
    tokens: Option<TokenRecords>,
    #[serde(rename = "RemoteException")]
    remote_exception: Option<RemoteException>,
}

/// Interpreted gateway response / 解析后的网关响应
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Boolean(bool),
    Long(i64),
    FileStatus(FileStatus),
    FileStatuses(FileStatuses),
    FileChecksum(FileChecksum),
    ContentSummary(ContentSummary),
    Token(TokenRecord),
    Tokens(TokenRecords),
    /// Nothing recognised was populated / 未填充任何已知字段
    Empty,
}

impl Response {
    /// Variant name used in malformed-response messages / 变体名称
    pub fn variant_name(&self) -> &'static str {
        match self {
            Response::Boolean(_) => "boolean",
            Response::Long(_) => "long",
            Response::FileStatus(_) => "FileStatus",
            Response::FileStatuses(_) => "FileStatuses",
            Response::FileChecksum(_) => "FileChecksum",
            Response::ContentSummary(_) => "ContentSummary",
            Response::Token(_) => "Token",
            Response::Tokens(_) => "Tokens",
            Response::Empty => "empty",
        }
    }
}

/// Decode a response payload / 解码响应负载
///
/// Decode failures surface as [`ClientError::Decode`]; a populated remote
/// exception surfaces as [`ClientError::Remote`] regardless of any other
/// populated field.
pub fn interpret(body: &[u8]) -> ClientResult<Response> {
    let envelope: Envelope = serde_json::from_slice(body)?;

    if let Some(remote) = envelope.remote_exception {
        return Err(ClientError::Remote(remote));
    }

    let response = if let Some(v) = envelope.boolean {
        Response::Boolean(v)
    } else if let Some(v) = envelope.long {
        Response::Long(v)
    } else if let Some(v) = envelope.file_status {
        Response::FileStatus(v)
    } else if let Some(v) = envelope.file_statuses {
        Response::FileStatuses(v)
    } else if let Some(v) = envelope.file_checksum {
        Response::FileChecksum(v)
    } else if let Some(v) = envelope.content_summary {
        Response::ContentSummary(v)
    } else if let Some(v) = envelope.token {
        Response::Token(v)
    } else if let Some(v) = envelope.tokens {
        Response::Tokens(v)
    } else {
        Response::Empty
    };
    Ok(response)
}

/// Extract the structured remote exception from an error body, if present
/// 从错误响应体中提取远程异常
pub(crate) fn remote_exception_in(body: &[u8]) -> Option<RemoteException> {
    match interpret(body) {
        Err(ClientError::Remote(e)) => Some(e),
        _ => None,
    }
}

//! Mock WebHDFS name node for integration tests / 集成测试用的模拟名称节点

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;

pub const FILE_CONTENT: &[u8] = b"hello webhdfs world";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
}

impl Recorded {
    pub fn op(&self) -> Option<&str> {
        self.query.get("op").map(String::as_str)
    }
}

#[derive(Clone)]
struct NodeState {
    ha_state: Arc<Mutex<String>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    tokens_issued: Arc<AtomicUsize>,
}

/// One mock name node / 单个模拟名称节点
pub struct MockNameNode {
    pub addr: String,
    state: NodeState,
}

impl MockNameNode {
    pub async fn start(ha_state: &str) -> Self {
        let state = NodeState {
            ha_state: Arc::new(Mutex::new(ha_state.to_string())),
            requests: Arc::new(Mutex::new(Vec::new())),
            tokens_issued: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/jmx", get(jmx))
            .fallback(webhdfs)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr: addr.to_string(),
            state,
        }
    }

    pub fn set_ha_state(&self, ha_state: &str) {
        *self.state.ha_state.lock() = ha_state.to_string();
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    pub fn probes(&self) -> usize {
        self.requests().iter().filter(|r| r.path == "/jmx").count()
    }

    /// Gateway calls, excluding liveness probes / 网关调用（不含探测）
    pub fn calls(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path != "/jmx")
            .collect()
    }

    pub fn calls_for(&self, op: &str) -> Vec<Recorded> {
        self.calls()
            .into_iter()
            .filter(|r| r.op() == Some(op))
            .collect()
    }
}

fn record(state: &NodeState, method: &Method, uri: &Uri, headers: &HeaderMap) -> Recorded {
    let query: HashMap<String, String> =
        url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
            .into_owned()
            .collect();
    let rec = Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    state.requests.lock().push(rec.clone());
    rec
}

async fn jmx(
    State(state): State<NodeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &method, &uri, &headers);
    let ha_state = state.ha_state.lock().clone();
    match ha_state.as_str() {
        "down" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        "garbage" => "not json".into_response(),
        "nobeans" => Json(json!({"beans": []})).into_response(),
        s => Json(json!({"beans": [{"tag.HAState": s}]})).into_response(),
    }
}

fn remote(status: StatusCode, exception: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "RemoteException": {
                "exception": exception,
                "javaClassName": format!("java.io.{}", exception),
                "message": message,
            }
        })),
    )
        .into_response()
}

fn file_status(name: &str, kind: &str, length: i64) -> serde_json::Value {
    json!({
        "pathSuffix": name,
        "type": kind,
        "length": length,
        "owner": "hdfs",
        "group": "supergroup",
        "permission": "644",
        "replication": 3,
        "blockSize": 134217728,
        "accessTime": 1320171722771i64,
        "modificationTime": 1320171722771i64
    })
}

async fn webhdfs(
    State(state): State<NodeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let rec = record(&state, &method, &uri, &headers);
    let path = rec
        .path
        .strip_prefix("/webhdfs/v1")
        .unwrap_or(&rec.path)
        .trim_end_matches('/')
        .to_string();
    let num = |k: &str| rec.query.get(k).and_then(|v| v.parse::<usize>().ok());

    if path == "/missing" {
        return remote(
            StatusCode::NOT_FOUND,
            "FileNotFoundException",
            "File does not exist: /missing",
        );
    }

    match rec.op().unwrap_or("") {
        "OPEN" => {
            if path == "/teapot" {
                return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
            }
            let start = num("offset").unwrap_or(0).min(FILE_CONTENT.len());
            let end = match num("length") {
                Some(n) => (start + n).min(FILE_CONTENT.len()),
                None => FILE_CONTENT.len(),
            };
            Response::new(Body::from(FILE_CONTENT[start..end].to_vec()))
        }
        "LISTSTATUS" => match path.as_str() {
            "/empty" => Json(json!({"FileStatuses": {"FileStatus": []}})).into_response(),
            "/broken" => Json(json!({})).into_response(),
            _ => Json(json!({"FileStatuses": {"FileStatus": [
                file_status("b.txt", "FILE", 24930),
                file_status("a", "DIRECTORY", 0),
            ]}}))
            .into_response(),
        },
        "GETFILESTATUS" => {
            Json(json!({"FileStatus": file_status("", "FILE", 24930)})).into_response()
        }
        "GETFILECHECKSUM" => Json(json!({"FileChecksum": {
            "algorithm": "MD5-of-1MD5-of-512CRC32",
            "bytes": "eadb10de24aa315748930df6e185c0d",
            "length": 28
        }}))
        .into_response(),
        "GETCONTENTSUMMARY" => Json(json!({"ContentSummary": {
            "directoryCount": 2, "fileCount": 1, "length": 24930,
            "quota": -1, "spaceConsumed": 24930, "spaceQuota": -1
        }}))
        .into_response(),
        "MKDIRS" | "RENAME" | "DELETE" => Json(json!({"boolean": true})).into_response(),
        "GETDELEGATIONTOKEN" => {
            let n = state.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
            Json(json!({"Token": {"urlString": format!("tok-{}", n)}})).into_response()
        }
        "RENEWDELEGATIONTOKEN" => {
            let exp = chrono::Utc::now().timestamp_millis() + 24 * 3600 * 1000;
            Json(json!({"long": exp})).into_response()
        }
        "CANCELDELEGATIONTOKEN" => StatusCode::OK.into_response(),
        other => remote(
            StatusCode::BAD_REQUEST,
            "IllegalArgumentException",
            &format!("Invalid value for webhdfs parameter \"op\": {}", other),
        ),
    }
}

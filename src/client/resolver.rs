//! HA name node resolution / HA名称节点解析
//!
//! Picks the first configured endpoint whose JMX liveness tag reads `active`.
//! Resolution is not cached for multi-endpoint configurations: it runs
//! before every operation that needs a target.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{ClientError, ClientResult};

const JMX_HA_STATE_QUERY: &str = "Hadoop:service=NameNode,name=FSNamesystem::tag.HAState";

/// A configured gateway address / 已配置的网关地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    addr: String,
    base: Url,
}

impl Endpoint {
    /// Parse `host:port` under the given scheme / 按指定协议解析地址
    pub fn new(addr: &str, scheme: &str) -> ClientResult<Self> {
        let addr = addr.trim().trim_end_matches('/');
        if addr.is_empty() {
            return Err(ClientError::configuration("empty name node address"));
        }
        let base = Url::parse(&format!("{}://{}/webhdfs/v1/", scheme, addr))?;
        if base.host_str().is_none() {
            return Err(ClientError::configuration(format!(
                "name node address has no host: {}",
                addr
            )));
        }
        Ok(Self {
            addr: addr.to_string(),
            base,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Base url `<scheme>://<addr>/webhdfs/v1/` / 基础URL
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// JMX liveness probe target / JMX存活探测地址
    pub fn probe_url(&self) -> Url {
        let mut url = self.base.clone();
        url.set_path("/jmx");
        url.query_pairs_mut().append_pair("get", JMX_HA_STATE_QUERY);
        url
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.addr)
    }
}

/// Observed HA state of an endpoint / 端点的HA状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaState {
    Unknown,
    Active,
    Standby,
}

impl HaState {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "active" => HaState::Active,
            "standby" => HaState::Standby,
            _ => HaState::Unknown,
        }
    }
}

/// Liveness probe seam / 存活探测接口
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> ClientResult<HaState>;
}

#[derive(Debug, Deserialize)]
struct JmxResponse {
    #[serde(default)]
    beans: Vec<JmxBean>,
}

#[derive(Debug, Deserialize)]
struct JmxBean {
    #[serde(rename = "tag.HAState", default)]
    ha_state: String,
}

/// Probe over HTTP against the JMX servlet / 基于HTTP的JMX探测
pub struct HttpLivenessProbe {
    http: reqwest::Client,
}

impl HttpLivenessProbe {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn probe(&self, endpoint: &Endpoint) -> ClientResult<HaState> {
        let resp = self.http.get(endpoint.probe_url()).send().await?;
        let body = resp.bytes().await?;
        let parsed: JmxResponse = serde_json::from_slice(&body)?;
        let bean = parsed
            .beans
            .first()
            .ok_or_else(|| ClientError::malformed("jmx response carries no beans"))?;
        Ok(HaState::from_tag(&bean.ha_state))
    }
}

#[derive(Debug)]
struct ResolverState {
    current: Option<usize>,
    observed: Vec<HaState>,
}

/// Resolves the authoritative endpoint / 解析权威端点
pub struct NameNodeResolver {
    endpoints: Vec<Endpoint>,
    probe: Arc<dyn LivenessProbe>,
    state: RwLock<ResolverState>,
}

impl NameNodeResolver {
    pub fn new(endpoints: Vec<Endpoint>, probe: Arc<dyn LivenessProbe>) -> ClientResult<Self> {
        if endpoints.is_empty() {
            return Err(ClientError::configuration("no name node configured"));
        }
        let single = endpoints.len() == 1;
        let state = ResolverState {
            current: single.then_some(0),
            observed: vec![HaState::Unknown; endpoints.len()],
        };
        Ok(Self {
            endpoints,
            probe,
            state: RwLock::new(state),
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_single(&self) -> bool {
        self.endpoints.len() == 1
    }

    /// Endpoint selected by the most recent resolution / 最近一次解析选中的端点
    pub fn current(&self) -> Option<Endpoint> {
        let state = self.state.read();
        state.current.map(|i| self.endpoints[i].clone())
    }

    /// Last observed HA state per endpoint, in configured order / 各端点最近观测状态
    pub fn observed(&self) -> Vec<(Endpoint, HaState)> {
        let state = self.state.read();
        self.endpoints
            .iter()
            .cloned()
            .zip(state.observed.iter().copied())
            .collect()
    }

    /// Determine the active endpoint / 确定活跃端点
    ///
    /// Single-endpoint configurations skip probing. Otherwise endpoints are
    /// probed sequentially in configured order and the first `active` wins.
    /// Concurrent callers race on the shared "current" slot with
    /// last-writer-wins; each caller uses the endpoint its own pass selected.
    pub async fn resolve(&self) -> ClientResult<Endpoint> {
        if self.is_single() {
            return Ok(self.endpoints[0].clone());
        }

        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            let observed = match self.probe.probe(endpoint).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "liveness probe failed");
                    HaState::Unknown
                }
            };
            debug!(endpoint = %endpoint, state = ?observed, "liveness probe");

            let mut state = self.state.write();
            state.observed[idx] = observed;
            if observed == HaState::Active {
                if state.current != Some(idx) {
                    info!(endpoint = %endpoint, "selected active name node");
                }
                state.current = Some(idx);
                return Ok(endpoint.clone());
            }
        }

        self.state.write().current = None;
        Err(ClientError::Unavailable {
            probed: self.endpoints.len(),
        })
    }
}

//! Configuration management / 配置管理
//!
//! Layered loading shared by the binaries:
//! - Default values / 默认值
//! - Configuration file (TOML) / 配置文件（TOML）
//! - Environment variables / 环境变量
//! - Command line overrides / 命令行覆盖

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;

/// Base configuration shared by all applications / 所有应用程序共享的基础配置
pub mod base;
pub use base::*;

/// Base configuration trait / 基础配置特征
pub trait AppConfig:
    for<'de> Deserialize<'de> + Serialize + Default + Clone + std::fmt::Debug
{
    /// Environment prefix, nested keys separated by `__` / 环境变量前缀
    const ENV_PREFIX: &'static str;
    /// File read when no explicit path is given / 默认配置文件
    const DEFAULT_FILE: &'static str;

    /// Layered figment without CLI overrides / 不含命令行覆盖的分层配置
    ///
    /// Precedence order (lowest to highest): defaults, file, environment.
    fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(Self::DEFAULT_FILE));
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    /// Load with CLI overrides on top / 加载并应用命令行覆盖
    fn load_with<P: Provider>(path: Option<&Path>, overrides: P) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                anyhow::bail!("config file not found: {}", p.display());
            }
        }
        let config: Self = Self::figment(path)
            .merge(overrides)
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, Figment::new())
    }

    /// Validate the configuration / 验证配置
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Configuration of the `wfs` command line tool / wfs命令行工具配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WfsConfig {
    pub client: ClientConfig,
    pub logging: LogConfig,
}

impl AppConfig for WfsConfig {
    const ENV_PREFIX: &'static str = "WFS_";
    const DEFAULT_FILE: &'static str = "wfs.toml";

    fn validate(&self) -> Result<()> {
        self.client
            .validate()
            .context("invalid [client] configuration")
    }
}

static FILE_LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialize tracing based on logging configuration
/// 基于日志配置初始化跟踪
///
/// Logs go to stderr so command output on stdout stays clean. `RUST_LOG`
/// overrides the configured level.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let file_layer = match config.file.as_ref() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir: {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = FILE_LOG_GUARD.set(guard);
            Some(fmt_layer(&config.format, writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(&config.format, std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

fn fmt_layer<S, W>(
    format: &str,
    writer: W,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync + 'static>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::Layer;

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(writer);
    match format {
        "json" => layer.json().boxed(),
        "compact" => layer.compact().boxed(),
        _ => layer.pretty().boxed(),
    }
}

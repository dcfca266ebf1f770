//! wfs command line arguments / wfs命令行参数

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use figment::{providers::Serialized, Figment};

/// wfs command line arguments / wfs命令行参数
#[derive(Parser, Debug, Clone)]
#[command(
    name = "wfs",
    version = "0.1.0",
    about = "wfs - WebHDFS client with HA name node resolution\nwfs - 支持HA名称节点解析的WebHDFS客户端"
)]
pub struct CliArgs {
    /// Configuration file path / 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name node address, repeat for HA / 名称节点地址（HA时可重复）
    #[arg(short = 'n', long = "namenode", value_name = "HOST:PORT")]
    pub namenodes: Vec<String>,

    /// Scheme used to reach the gateway / 访问网关使用的协议
    #[arg(long, value_name = "SCHEME")]
    pub scheme: Option<String>,

    /// User name for simple auth / 简单认证用户名
    #[arg(short, long, value_name = "NAME")]
    pub user: Option<String>,

    /// Pre-issued delegation token / 预先签发的委托令牌
    #[arg(long, value_name = "TOKEN")]
    pub delegation: Option<String>,

    /// SPNEGO token sent as `Authorization: Negotiate` / 作为Negotiate头发送的SPNEGO令牌
    #[arg(long, value_name = "TOKEN")]
    pub negotiate: Option<String>,

    /// Keep a delegation token renewed while running / 运行期间自动续期委托令牌
    #[arg(long)]
    pub auto_renew: bool,

    /// Log level (trace, debug, info, warn, error) / 日志级别
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the active name node / 打印活跃的名称节点
    Active,
    /// List a directory / 列出目录
    Ls { path: String },
    /// Show file status / 显示文件状态
    Stat { path: String },
    /// Show file checksum / 显示文件校验和
    Checksum { path: String },
    /// Show content summary / 显示内容汇总
    Du { path: String },
    /// Stream a file to stdout / 将文件输出到标准输出
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 0)]
        length: u64,
        #[arg(long, default_value_t = 0)]
        buffer_size: u32,
    },
    /// Create a directory / 创建目录
    Mkdir {
        path: String,
        #[arg(long, value_name = "OCTAL")]
        permission: Option<String>,
    },
    /// Rename a path / 重命名
    Mv { src: String, dst: String },
    /// Delete a path / 删除
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Delegation token operations / 委托令牌操作
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TokenAction {
    Get,
    Renew,
    Cancel,
}

impl CliArgs {
    /// CLI values layered over file and environment / 覆盖文件与环境变量的命令行值
    pub fn overrides(&self) -> Figment {
        let mut figment = Figment::new();
        if !self.namenodes.is_empty() {
            figment = figment.merge(Serialized::default("client.namenodes", &self.namenodes));
        }
        if let Some(v) = &self.scheme {
            figment = figment.merge(Serialized::default("client.scheme", v));
        }
        if let Some(v) = &self.user {
            figment = figment.merge(Serialized::default("client.user", v));
        }
        if let Some(v) = &self.delegation {
            figment = figment.merge(Serialized::default("client.delegation_token", v));
        }
        if self.auto_renew {
            figment = figment.merge(Serialized::default("client.auto_renew_token", true));
        }
        if let Some(v) = &self.log_level {
            figment = figment.merge(Serialized::default("logging.level", v));
        }
        figment
    }
}

//! webhdfs-ha: HA-aware client for the WebHDFS gateway protocol
//! webhdfs-ha：支持HA的WebHDFS网关协议客户端

// Shared modules / 共享模块
pub mod config;

// Gateway client / 网关客户端
pub mod client;

// Re-exports / 重新导出
pub use client::{
    Client, ClientBuilder, ClientConfig, ClientError, ClientResult, DelegationToken, ErrorKind,
    FileReader, FileStatus,
};

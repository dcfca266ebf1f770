//! Base configuration structures / 基础配置结构

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Logging configuration / 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or env-filter directive / 日志级别
    pub level: String,
    /// Log format (pretty, compact, json) / 日志格式
    pub format: String,
    /// Optional log file, appended to / 可选日志文件（追加写入）
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
            file: None,
        }
    }
}

impl LogConfig {
    /// Effective filter directive / 实际生效的过滤指令
    pub fn filter_directive(&self) -> &str {
        let level = self.level.trim();
        if level.is_empty() {
            "info"
        } else {
            level
        }
    }
}

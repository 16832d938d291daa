//! 错误类型
//!
//! `SpawnFailure` / `SyncError` 是内部错误，带有底层原因；
//! `OperationError` 是可 Clone 的可观察错误，写入进度状态并发往错误展示通道。

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// 无法启动外部进程
#[derive(Debug, Error)]
#[error("无法启动 {program}: {source}")]
pub struct SpawnFailure {
    pub program: String,
    #[source]
    pub source: io::Error,
}

/// 列表子命令失败或其输出无法解析
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Spawn(#[from] SpawnFailure),

    #[error("`{command}` 执行失败 ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("无法解析 `{command}` 的输出: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("读取 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 操作失败的可观察原因，终态
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("无法启动 brew: {0}")]
    SpawnFailure(String),

    #[error("无法同步已安装包: {0}")]
    CouldNotSynchronizePackages(String),

    #[error("无法同步服务: {0}")]
    CouldNotSynchronizeServices(String),

    #[error("无法同步下载缓存: {0}")]
    CouldNotSynchronizeCachedDownloads(String),

    #[error("无法删除下载缓存: {0}")]
    CouldNotDeleteDownloads(String),
}

/// 发往错误展示通道的告警
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrewAlert {
    /// 失败的操作名，如 "卸载"
    pub label: &'static str,
    pub target: String,
    pub error: OperationError,
}

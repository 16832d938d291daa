//! Homebrew 相关数据类型定义

use std::fmt;
use std::path::PathBuf;

/// 子进程输出的一行，按到达顺序产生
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    StandardOutput(String),
    StandardError(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::StandardOutput(text) | OutputLine::StandardError(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutputLine::StandardError(_))
    }
}

/// 包类型：formula 或 cask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    Formula,
    Cask,
}

impl PackageKind {
    /// 对应 brew 命令行中的类型开关
    pub fn flag(self) -> &'static str {
        match self {
            PackageKind::Formula => "--formula",
            PackageKind::Cask => "--cask",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageKind::Formula => f.write_str("formula"),
            PackageKind::Cask => f.write_str("cask"),
        }
    }
}

/// 已安装包
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRecord {
    pub name: String,
    pub kind: PackageKind,
    pub version: String,
    pub description: String,
    /// 用户主动安装，而非作为依赖被拉入
    pub installed_intentionally: bool,
    pub outdated: bool,
    pub pinned: bool,
}

/// 服务运行状态，对应 `brew services list --json` 的 status 字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Started,
    Stopped,
    Scheduled,
    Error,
    None,
    Unknown(String),
}

impl ServiceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "started" => ServiceStatus::Started,
            "stopped" => ServiceStatus::Stopped,
            "scheduled" => ServiceStatus::Scheduled,
            "error" => ServiceStatus::Error,
            "none" => ServiceStatus::None,
            other => ServiceStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Started | ServiceStatus::Scheduled)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Started => f.write_str("started"),
            ServiceStatus::Stopped => f.write_str("stopped"),
            ServiceStatus::Scheduled => f.write_str("scheduled"),
            ServiceStatus::Error => f.write_str("error"),
            ServiceStatus::None => f.write_str("none"),
            ServiceStatus::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// brew 管理的后台服务
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub name: String,
    pub status: ServiceStatus,
    pub user: Option<String>,
    pub file: Option<PathBuf>,
    pub exit_code: Option<i64>,
}

/// 下载缓存中的一个文件
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDownload {
    pub file_name: String,
    pub package_name: String,
    pub size_bytes: u64,
}

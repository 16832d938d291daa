//! Homebrew 封装：子命令编排、目录同步与维护流程

pub mod catalog;
pub mod error;
pub mod maintenance;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod streaming;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出常用类型
pub use catalog::{BrewState, CatalogSnapshot, Tracked};
pub use error::{BrewAlert, OperationError};
pub use maintenance::{MaintenanceConfig, MaintenancePipeline, MaintenanceResult};
pub use orchestrator::Orchestrator;
pub use progress::{OperationPhase, ProgressSnapshot, ProgressTracker, ProgressWatch};
pub use types::{CachedDownload, PackageKind, PackageRecord, ServiceRecord, ServiceStatus};

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// 常见的 brew 安装位置（Apple Silicon / Intel / Linuxbrew）
const BREW_CANDIDATES: &[&str] = &[
    "/opt/homebrew/bin/brew",
    "/usr/local/bin/brew",
    "/home/linuxbrew/.linuxbrew/bin/brew",
];

#[derive(Debug, Clone)]
pub struct Brew {
    executable: PathBuf,
    allow_auto_update: bool,
}

impl Brew {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            allow_auto_update: false,
        }
    }

    pub fn with_auto_update(mut self, allow: bool) -> Self {
        self.allow_auto_update = allow;
        self
    }

    /// 按固定位置查找 brew，最后退回到 `which brew`
    pub fn detect() -> Result<Self> {
        for candidate in BREW_CANDIDATES {
            if Path::new(candidate).is_file() {
                return Ok(Brew::new(*candidate));
            }
        }
        let output = Command::new("which").arg("brew").output();
        if let Ok(o) = output {
            if o.status.success() {
                let path = String::from_utf8_lossy(&o.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(Brew::new(path));
                }
            }
        }
        Err(anyhow!("未找到 brew 可执行文件"))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// 构造一次 brew 调用
    pub fn operation<I, S>(&self, family: OperationFamily, args: I) -> ExternalOperation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut env = vec![("HOMEBREW_NO_COLOR".to_string(), "1".to_string())];
        if !self.allow_auto_update {
            env.push(("HOMEBREW_NO_AUTO_UPDATE".to_string(), "1".to_string()));
        }
        ExternalOperation {
            program: self.executable.clone(),
            args: args.into_iter().map(Into::into).collect(),
            env,
            family,
        }
    }
}

/// 子命令所属的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFamily {
    Install,
    Remove,
    ServiceControl,
    Cache,
    HealthCheck,
    /// 只读列表命令，供目录同步使用
    Listing,
}

/// 一次外部调用：可执行文件 + 参数，构造后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOperation {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    family: OperationFamily,
}

impl ExternalOperation {
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn family(&self) -> OperationFamily {
        self.family
    }

    /// 用于日志和状态展示的命令行
    pub fn command_line(&self) -> String {
        let program = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string());
        if self.args.is_empty() {
            program
        } else {
            format!("{} {}", program, self.args.join(" "))
        }
    }
}

/// 用户可发起的变更操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Install(PackageKind),
    Uninstall(PackageKind),
    Upgrade,
    Pin,
    Unpin,
    StartService,
    StopService,
    RestartService,
    KillService,
    RemoveOrphans,
    PurgeCache,
    HealthCheck,
}

/// 操作结束后需要重新同步的目录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Packages,
    Services,
    PackagesAndCachedDownloads,
    Nothing,
}

impl OperationKind {
    pub fn family(self) -> OperationFamily {
        match self {
            OperationKind::Install(_)
            | OperationKind::Upgrade
            | OperationKind::Pin
            | OperationKind::Unpin => OperationFamily::Install,
            OperationKind::Uninstall(_) | OperationKind::RemoveOrphans => OperationFamily::Remove,
            OperationKind::StartService
            | OperationKind::StopService
            | OperationKind::RestartService
            | OperationKind::KillService => OperationFamily::ServiceControl,
            OperationKind::PurgeCache => OperationFamily::Cache,
            OperationKind::HealthCheck => OperationFamily::HealthCheck,
        }
    }

    pub fn sync_scope(self) -> SyncScope {
        match self.family() {
            OperationFamily::Install | OperationFamily::Remove => SyncScope::Packages,
            OperationFamily::ServiceControl => SyncScope::Services,
            OperationFamily::Cache => SyncScope::PackagesAndCachedDownloads,
            OperationFamily::HealthCheck | OperationFamily::Listing => SyncScope::Nothing,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Install(_) => "安装",
            OperationKind::Uninstall(_) => "卸载",
            OperationKind::Upgrade => "升级",
            OperationKind::Pin => "锁定版本",
            OperationKind::Unpin => "解除锁定",
            OperationKind::StartService => "启动服务",
            OperationKind::StopService => "停止服务",
            OperationKind::RestartService => "重启服务",
            OperationKind::KillService => "强制终止服务",
            OperationKind::RemoveOrphans => "移除孤立依赖",
            OperationKind::PurgeCache => "清理缓存",
            OperationKind::HealthCheck => "健康检查",
        }
    }
}

/// 表示层提交的请求：(目标名, 操作类型)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub target: String,
    pub kind: OperationKind,
}

impl OperationRequest {
    pub fn new(target: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }

    /// 作用于整个 brew 环境的操作使用固定目标名，保证彼此串行
    pub fn environment(kind: OperationKind) -> Self {
        Self::new(ENVIRONMENT_TARGET, kind)
    }

    pub fn to_operation(&self, brew: &Brew) -> ExternalOperation {
        let name = self.target.as_str();
        let family = self.kind.family();
        match self.kind {
            OperationKind::Install(kind) => brew.operation(family, ["install", kind.flag(), name]),
            OperationKind::Uninstall(kind) => {
                brew.operation(family, ["uninstall", kind.flag(), name])
            }
            OperationKind::Upgrade => brew.operation(family, ["upgrade", name]),
            OperationKind::Pin => brew.operation(family, ["pin", name]),
            OperationKind::Unpin => brew.operation(family, ["unpin", name]),
            OperationKind::StartService => brew.operation(family, ["services", "start", name]),
            OperationKind::StopService => brew.operation(family, ["services", "stop", name]),
            OperationKind::RestartService => brew.operation(family, ["services", "restart", name]),
            OperationKind::KillService => brew.operation(family, ["services", "kill", name]),
            OperationKind::RemoveOrphans => brew.operation(family, ["autoremove"]),
            OperationKind::PurgeCache => brew.operation(family, ["cleanup"]),
            OperationKind::HealthCheck => brew.operation(family, ["doctor"]),
        }
    }
}

/// 环境级操作共用的目标名
pub const ENVIRONMENT_TARGET: &str = "@brew";

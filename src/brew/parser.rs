//! 输出解析函数

use super::types::{CachedDownload, PackageKind, PackageRecord, ServiceRecord, ServiceStatus};
use serde::Deserialize;
use std::path::PathBuf;

/// 清理终端输出中的 ANSI 转义序列和控制字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }

    result.trim_end().to_string()
}

/// `==> Pouring foo--1.0.arm64_sonoma.bottle.tar.gz` 这类标题行作为人类可读状态
pub fn status_from_line(line: &str) -> Option<String> {
    let heading = line.trim().strip_prefix("==>")?.trim();
    if heading.is_empty() {
        None
    } else {
        Some(heading.to_string())
    }
}

// ========== brew info --json=v2 --installed ==========

#[derive(Debug, Deserialize)]
struct InfoListing {
    #[serde(default)]
    formulae: Vec<FormulaInfo>,
    #[serde(default)]
    casks: Vec<CaskInfo>,
}

#[derive(Debug, Deserialize)]
struct FormulaInfo {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    installed: Vec<FormulaInstall>,
    #[serde(default)]
    outdated: bool,
    #[serde(default)]
    pinned: bool,
}

#[derive(Debug, Deserialize)]
struct FormulaInstall {
    version: String,
    #[serde(default)]
    installed_on_request: bool,
}

#[derive(Debug, Deserialize)]
struct CaskInfo {
    token: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    installed: Option<String>,
    #[serde(default)]
    outdated: bool,
}

/// 已安装包列表：(formulae, casks)
pub fn parse_installed_packages(
    json: &str,
) -> Result<(Vec<PackageRecord>, Vec<PackageRecord>), serde_json::Error> {
    let listing: InfoListing = serde_json::from_str(json)?;

    let formulae = listing
        .formulae
        .into_iter()
        .filter_map(|formula| {
            // 最后一项是当前链接的版本
            let install = formula.installed.last()?;
            Some(PackageRecord {
                version: install.version.clone(),
                installed_intentionally: install.installed_on_request,
                name: formula.name,
                kind: PackageKind::Formula,
                description: formula.desc.unwrap_or_default(),
                outdated: formula.outdated,
                pinned: formula.pinned,
            })
        })
        .collect();

    // cask 只能被主动安装
    let casks = listing
        .casks
        .into_iter()
        .map(|cask| PackageRecord {
            name: cask.token,
            kind: PackageKind::Cask,
            version: cask.installed.unwrap_or_default(),
            description: cask.desc.unwrap_or_default(),
            installed_intentionally: true,
            outdated: cask.outdated,
            pinned: false,
        })
        .collect();

    Ok((formulae, casks))
}

// ========== brew services list --json ==========

#[derive(Debug, Deserialize)]
struct ServiceInfo {
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    exit_code: Option<i64>,
}

pub fn parse_services(json: &str) -> Result<Vec<ServiceRecord>, serde_json::Error> {
    let trimmed = json.trim();
    // 没有任何服务时 brew 不输出内容
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let services: Vec<ServiceInfo> = serde_json::from_str(trimmed)?;
    Ok(services
        .into_iter()
        .map(|s| ServiceRecord {
            name: s.name,
            status: s
                .status
                .as_deref()
                .map(ServiceStatus::parse)
                .unwrap_or(ServiceStatus::None),
            user: s.user.filter(|u| !u.is_empty()),
            file: s.file.filter(|f| !f.is_empty()).map(PathBuf::from),
            exit_code: s.exit_code,
        })
        .collect())
}

// ========== 下载缓存 ==========

/// `brew --cache` 的输出：缓存根目录
pub fn parse_cache_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(PathBuf::from)
}

/// 缓存文件名形如 `<sha256>--<package>--<version>.<ext>`
pub fn parse_cached_download(file_name: &str, size_bytes: u64) -> CachedDownload {
    let package_name = file_name
        .split("--")
        .nth(1)
        .filter(|s| !s.is_empty())
        .unwrap_or(file_name)
        .to_string();
    CachedDownload {
        file_name: file_name.to_string(),
        package_name,
        size_bytes,
    }
}

// ========== 维护输出 ==========

/// 从 `brew autoremove` 的输出行中统计被移除的孤立依赖
#[derive(Debug, Default)]
pub struct AutoremoveTally {
    announced: Option<usize>,
    uninstalled: usize,
}

impl AutoremoveTally {
    pub fn observe(&mut self, line: &str) {
        let trimmed = line.trim();
        // ==> Autoremoving 2 unneeded formulae:
        if let Some(rest) = trimmed.strip_prefix("==> Autoremoving ") {
            if let Some(count) = rest.split_whitespace().next().and_then(|n| n.parse().ok()) {
                self.announced = Some(count);
            }
        } else if trimmed.starts_with("Uninstalling ") {
            self.uninstalled += 1;
        }
    }

    pub fn removed(&self) -> usize {
        self.announced.unwrap_or(self.uninstalled)
    }
}

/// `brew doctor` 的结论
#[derive(Debug, Default)]
pub struct DoctorReport {
    ready: bool,
    warnings: usize,
}

impl DoctorReport {
    pub fn observe(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.contains("Your system is ready to brew") {
            self.ready = true;
        } else if trimmed.starts_with("Warning:") {
            self.warnings += 1;
        }
    }

    pub fn found_no_problems(&self) -> bool {
        self.ready && self.warnings == 0
    }
}

//! 目录同步：运行只读列表命令，解析后整体替换内存中的目录
//!
//! 解析全部成功之后才替换，失败时目录保持上一次的正确状态。

use super::catalog::BrewState;
use super::error::SyncError;
use super::parser::{parse_cache_path, parse_cached_download, parse_installed_packages, parse_services};
use super::streaming::spawn_streaming;
use super::types::{CachedDownload, OutputLine};
use super::{Brew, OperationFamily};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CatalogSynchronizer {
    brew: Brew,
    state: Arc<BrewState>,
}

impl CatalogSynchronizer {
    pub fn new(brew: Brew, state: Arc<BrewState>) -> Self {
        Self { brew, state }
    }

    pub fn state(&self) -> &Arc<BrewState> {
        &self.state
    }

    pub fn brew(&self) -> &Brew {
        &self.brew
    }

    /// 同步已安装的 formulae 和 casks
    ///
    /// 两个目录来自同一次列表输出，但分别换入：两次换入之间的读者
    /// 可能看到新的 formulae 和旧的 casks。两个目录的版本号总是一起前进，
    /// 需要一致视图的读者可以比较 `generation()`。
    pub async fn synchronize_packages(&self, preserve_ids: bool) -> Result<(), SyncError> {
        let stdout = self.run_listing(&["info", "--json=v2", "--installed"]).await?;
        let (formulae, casks) =
            parse_installed_packages(&stdout).map_err(|source| SyncError::Parse {
                command: "brew info --json=v2 --installed".to_string(),
                source,
            })?;
        log::info!("已同步 {} 个 formula、{} 个 cask", formulae.len(), casks.len());
        let formulae = self.state.formulae.replace(formulae, preserve_ids);
        let casks = self.state.casks.replace(casks, preserve_ids);
        log::debug!(
            "formula 目录第 {} 版，cask 目录第 {} 版",
            formulae.generation(),
            casks.generation()
        );
        Ok(())
    }

    /// 同步服务列表
    pub async fn synchronize_services(&self, preserve_ids: bool) -> Result<(), SyncError> {
        let stdout = self.run_listing(&["services", "list", "--json"]).await?;
        let services = parse_services(&stdout).map_err(|source| SyncError::Parse {
            command: "brew services list --json".to_string(),
            source,
        })?;
        let snapshot = self.state.services.replace(services, preserve_ids);
        log::info!(
            "已同步 {} 个服务: {}",
            snapshot.len(),
            snapshot.names().collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }

    /// 同步下载缓存目录中的文件
    pub async fn synchronize_cached_downloads(&self, preserve_ids: bool) -> Result<(), SyncError> {
        let dir = self.cached_downloads_dir().await?;
        let downloads = tokio::task::spawn_blocking(move || list_cached_downloads(&dir))
            .await
            .map_err(|e| SyncError::Io {
                path: PathBuf::from("downloads"),
                source: io::Error::new(io::ErrorKind::Other, e),
            })??;
        log::info!("已同步 {} 个缓存文件", downloads.len());
        self.state.cached_downloads.replace(downloads, preserve_ids);
        Ok(())
    }

    /// 依次同步全部目录；某一项失败不影响其余项，返回第一个错误
    pub async fn synchronize_all(&self, preserve_ids: bool) -> Result<(), SyncError> {
        let packages = self.synchronize_packages(preserve_ids).await;
        let services = self.synchronize_services(preserve_ids).await;
        let downloads = self.synchronize_cached_downloads(preserve_ids).await;
        for result in [&packages, &services, &downloads] {
            if let Err(e) = result {
                log::error!("同步失败: {}", e);
            }
        }
        packages.and(services).and(downloads)
    }

    /// `<brew --cache>/downloads`
    pub async fn cached_downloads_dir(&self) -> Result<PathBuf, SyncError> {
        let stdout = self.run_listing(&["--cache"]).await?;
        let root = parse_cache_path(&stdout).ok_or_else(|| SyncError::Io {
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::NotFound, "brew --cache 没有输出路径"),
        })?;
        Ok(root.join("downloads"))
    }

    /// 运行列表命令并收集 stdout；非零退出视为失败
    async fn run_listing(&self, args: &[&str]) -> Result<String, SyncError> {
        let operation = self
            .brew
            .operation(OperationFamily::Listing, args.iter().copied());
        let mut stream = spawn_streaming(&operation)?;

        let mut stdout = String::new();
        let mut stderr = Vec::new();
        while let Some(line) = stream.next_line().await {
            match line {
                OutputLine::StandardOutput(text) => {
                    stdout.push_str(&text);
                    stdout.push('\n');
                }
                OutputLine::StandardError(text) => {
                    log::warn!("`{}`: {}", operation.command_line(), text);
                    stderr.push(text);
                }
            }
        }

        let status = stream.finish().await.map_err(|source| SyncError::Io {
            path: operation.program().to_path_buf(),
            source,
        })?;
        if !status.success() {
            return Err(SyncError::CommandFailed {
                command: operation.command_line(),
                status,
                stderr: stderr.join("\n"),
            });
        }
        Ok(stdout)
    }
}

fn list_cached_downloads(dir: &Path) -> Result<Vec<CachedDownload>, SyncError> {
    let io_error = |source| SyncError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        // 从未下载过任何东西时目录不存在
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(e)),
    };

    let mut downloads = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_error)?;
        let metadata = entry.metadata().map_err(io_error)?;
        if !metadata.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        downloads.push(parse_cached_download(&file_name, metadata.len()));
    }
    Ok(downloads)
}

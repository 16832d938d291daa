//! 维护流程：移除孤立依赖 → 清理缓存 → 删除下载 → 健康检查
//!
//! 各步骤按顺序执行（后面的步骤依赖前面步骤更新过的目录）。
//! 某一步失败只记录在结果里，后续步骤照常运行。

use super::catalog::CatalogSnapshot;
use super::orchestrator::Orchestrator;
use super::parser::{AutoremoveTally, DoctorReport};
use super::progress::ProgressTracker;
use super::types::{PackageKind, PackageRecord};
use super::{OperationKind, OperationRequest};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 用户勾选的维护步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub remove_orphans: bool,
    pub purge_cache: bool,
    pub delete_downloads: bool,
    pub run_health_check: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            remove_orphans: true,
            purge_cache: true,
            delete_downloads: true,
            run_health_check: false,
        }
    }
}

impl MaintenanceConfig {
    fn enabled_steps(&self) -> usize {
        [
            self.remove_orphans,
            self.purge_cache,
            self.delete_downloads,
            self.run_health_check,
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceStep {
    RemoveOrphans,
    PurgeCache,
    DeleteDownloads,
    HealthCheck,
    Resynchronize,
}

impl fmt::Display for MaintenanceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MaintenanceStep::RemoveOrphans => "移除孤立依赖",
            MaintenanceStep::PurgeCache => "清理缓存",
            MaintenanceStep::DeleteDownloads => "删除下载缓存",
            MaintenanceStep::HealthCheck => "健康检查",
            MaintenanceStep::Resynchronize => "同步已安装包",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step}失败: {reason}")]
pub struct MaintenanceStepFailure {
    pub step: MaintenanceStep,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePurgeOutcome {
    /// 未经过滤的完整列表，展示时再按需筛选
    pub packages_holding_back_cache_purge: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadsOutcome {
    pub reclaimed_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckOutcome {
    pub found_no_problems: bool,
}

/// 一次维护的汇总结果；未勾选或失败的步骤为 None
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceResult {
    pub orphans_removed: Option<usize>,
    pub cache_purge: Option<CachePurgeOutcome>,
    pub downloads_deleted: Option<DownloadsOutcome>,
    pub health_check: Option<HealthCheckOutcome>,
    pub failures: Vec<MaintenanceStepFailure>,
    pub finished_at: DateTime<Local>,
}

impl MaintenanceResult {
    pub fn found_no_problems(&self) -> bool {
        self.failures.is_empty()
            && self
                .health_check
                .map_or(true, |outcome| outcome.found_no_problems)
    }

    /// 展示用的阻止清理列表
    ///
    /// `show_only_intentional` 为真时只保留用户主动安装的包，避免依赖包突然出现在列表里。
    pub fn displayable_packages_holding_back_cache_purge(
        &self,
        formulae: &CatalogSnapshot<PackageRecord>,
        show_only_intentional: bool,
    ) -> Vec<String> {
        let Some(purge) = &self.cache_purge else {
            return Vec::new();
        };
        purge
            .packages_holding_back_cache_purge
            .iter()
            .filter(|name| {
                !show_only_intentional
                    || formulae
                        .get(name)
                        .map_or(false, |p| p.installed_intentionally)
            })
            .cloned()
            .collect()
    }
}

/// 阻止缓存清理的包：已过期的 formula
///
/// 只看 formula，不看 cask。这是有意保留的收窄：只有过期的 formula 会让
/// `brew cleanup` 跳过旧版本，遍历 cask 得不到额外结果。
pub fn packages_holding_back_cache_purge(formulae: &CatalogSnapshot<PackageRecord>) -> Vec<String> {
    formulae
        .iter()
        .filter(|p| p.kind == PackageKind::Formula && p.outdated)
        .map(|p| p.name.clone())
        .collect()
}

/// 把名字列表压缩成一行，超过 `limit` 个时只显示前几个
pub fn summarize_names(names: &[String], limit: usize) -> String {
    if names.len() > limit {
        format!(
            "{} 以及其他 {} 个",
            names[..limit].join("、"),
            names.len() - limit
        )
    } else {
        names.join("、")
    }
}

pub struct MaintenancePipeline {
    orchestrator: Arc<Orchestrator>,
}

impl MaintenancePipeline {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// 按顺序执行勾选的步骤，最后重新同步已安装包
    pub async fn run(&self, config: &MaintenanceConfig, progress: &ProgressTracker) -> MaintenanceResult {
        let total = config.enabled_steps() + 1;
        let mut completed = 0;
        let mut failures = Vec::new();
        let mut result = MaintenanceResult {
            orphans_removed: None,
            cache_purge: None,
            downloads_deleted: None,
            health_check: None,
            failures: Vec::new(),
            finished_at: Local::now(),
        };
        progress.start("维护");

        let mut step_done = |step: MaintenanceStep, failure: Option<MaintenanceStepFailure>| {
            if let Some(failure) = failure {
                log::error!("{}", failure);
                failures.push(failure);
            } else {
                log::info!("{}完成", step);
            }
            completed += 1;
            progress.advance_to(completed as f64 / total as f64 * 100.0);
        };

        if config.remove_orphans {
            progress.set_status(&MaintenanceStep::RemoveOrphans.to_string());
            let step = MaintenanceStep::RemoveOrphans;
            let mut tally = AutoremoveTally::default();
            let outcome = self
                .orchestrator
                .perform_with(
                    &OperationRequest::environment(OperationKind::RemoveOrphans),
                    &ProgressTracker::new(),
                    |line| {
                        if !line.is_error() {
                            tally.observe(line.text());
                        }
                    },
                )
                .await;
            match outcome {
                Ok(()) => {
                    result.orphans_removed = Some(tally.removed());
                    step_done(step, None);
                }
                Err(e) => step_done(step, Some(failure(step, e))),
            }
        }

        if config.purge_cache {
            progress.set_status(&MaintenanceStep::PurgeCache.to_string());
            let step = MaintenanceStep::PurgeCache;
            let outcome = self
                .orchestrator
                .perform(
                    &OperationRequest::environment(OperationKind::PurgeCache),
                    &ProgressTracker::new(),
                )
                .await;
            match outcome {
                Ok(()) => {
                    let formulae = self.orchestrator.state().formulae.snapshot();
                    result.cache_purge = Some(CachePurgeOutcome {
                        packages_holding_back_cache_purge: packages_holding_back_cache_purge(
                            &formulae,
                        ),
                    });
                    step_done(step, None);
                }
                Err(e) => step_done(step, Some(failure(step, e))),
            }
        }

        if config.delete_downloads {
            progress.set_status(&MaintenanceStep::DeleteDownloads.to_string());
            let step = MaintenanceStep::DeleteDownloads;
            match self
                .orchestrator
                .delete_cached_downloads(&ProgressTracker::new())
                .await
            {
                Ok(reclaimed_bytes) => {
                    result.downloads_deleted = Some(DownloadsOutcome { reclaimed_bytes });
                    step_done(step, None);
                }
                Err(e) => step_done(step, Some(failure(step, e))),
            }
        }

        if config.run_health_check {
            progress.set_status(&MaintenanceStep::HealthCheck.to_string());
            let step = MaintenanceStep::HealthCheck;
            // doctor 的警告写在 stderr，两个流都要看
            let mut report = DoctorReport::default();
            let outcome = self
                .orchestrator
                .perform_with(
                    &OperationRequest::environment(OperationKind::HealthCheck),
                    &ProgressTracker::new(),
                    |line| report.observe(line.text()),
                )
                .await;
            match outcome {
                Ok(()) => {
                    result.health_check = Some(HealthCheckOutcome {
                        found_no_problems: report.found_no_problems(),
                    });
                    step_done(step, None);
                }
                Err(e) => step_done(step, Some(failure(step, e))),
            }
        }

        progress.set_status(&MaintenanceStep::Resynchronize.to_string());
        let step = MaintenanceStep::Resynchronize;
        match self
            .orchestrator
            .synchronizer()
            .synchronize_packages(true)
            .await
        {
            Ok(()) => step_done(step, None),
            Err(e) => step_done(step, Some(failure(step, e))),
        }

        result.failures = failures;
        result.finished_at = Local::now();
        if result.failures.is_empty() {
            progress.set_status("维护完成");
        } else {
            progress.set_status(&format!("维护完成，{} 个步骤失败", result.failures.len()));
        }
        progress.succeed();
        result
    }
}

fn failure(step: MaintenanceStep, error: impl fmt::Display) -> MaintenanceStepFailure {
    MaintenanceStepFailure {
        step,
        reason: error.to_string(),
    }
}

//! 操作编排：运行 brew 子命令 → 读完输出 → 重新同步目录 → 更新进度
//!
//! 失败不会越过这一层：每条失败路径都以一条日志、一次进度终态写入
//! 和一条告警结束，调用方拿到的是 `Result`，不会有 panic。

use super::catalog::BrewState;
use super::error::{BrewAlert, OperationError};
use super::parser::status_from_line;
use super::progress::{ProgressTracker, ProgressWatch};
use super::streaming::spawn_streaming;
use super::sync::CatalogSynchronizer;
use super::types::OutputLine;
use super::{Brew, OperationRequest, SyncScope, ENVIRONMENT_TARGET};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// 删除下载缓存这一步在日志和告警中的名字
pub const DELETE_DOWNLOADS_LABEL: &str = "删除下载缓存";

type TargetLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// 操作结束时的回调
pub type CompletionObserver = Box<dyn FnOnce(&Result<(), OperationError>) + Send + 'static>;

pub struct Orchestrator {
    synchronizer: CatalogSynchronizer,
    /// 每个目标名一把锁，同一目标的变更操作串行执行；没有任务持有或等待时移除
    target_locks: TargetLocks,
    alerts: Option<mpsc::UnboundedSender<BrewAlert>>,
}

impl Orchestrator {
    pub fn new(brew: Brew, state: Arc<BrewState>) -> Self {
        Self {
            synchronizer: CatalogSynchronizer::new(brew, state),
            target_locks: Mutex::new(HashMap::new()),
            alerts: None,
        }
    }

    /// 设置错误展示通道
    pub fn with_alerts(mut self, alerts: mpsc::UnboundedSender<BrewAlert>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn synchronizer(&self) -> &CatalogSynchronizer {
        &self.synchronizer
    }

    pub fn state(&self) -> &Arc<BrewState> {
        self.synchronizer.state()
    }

    pub async fn perform(
        &self,
        request: &OperationRequest,
        progress: &ProgressTracker,
    ) -> Result<(), OperationError> {
        self.perform_with(request, progress, |_| {}).await
    }

    /// 执行一次变更操作，`on_line` 按顺序收到每一行输出
    pub async fn perform_with(
        &self,
        request: &OperationRequest,
        progress: &ProgressTracker,
        mut on_line: impl FnMut(&OutputLine),
    ) -> Result<(), OperationError> {
        let lease = self.target_lock(&request.target);
        let _guard = lease.lock.lock().await;
        let label = request.kind.label();

        let operation = request.to_operation(self.synchronizer.brew());
        let command = operation.command_line();
        log::info!("{} {}: `{}`", request.kind.label(), request.target, command);
        progress.start(&command);

        let mut stream = match spawn_streaming(&operation) {
            Ok(stream) => stream,
            Err(e) => {
                let error = OperationError::SpawnFailure(e.to_string());
                return self.fail(label, &request.target, progress, error);
            }
        };

        // 必须读完全部输出：brew 的退出行为只有在输出结束后才可信
        while let Some(line) = stream.next_line().await {
            match &line {
                OutputLine::StandardOutput(text) => {
                    log::info!("{} 输出: {}", request.kind.label(), text);
                    if let Some(status) = status_from_line(text) {
                        progress.set_status(&status);
                    }
                }
                OutputLine::StandardError(text) => {
                    log::error!("{} 错误: {}", request.kind.label(), text);
                }
            }
            on_line(&line);
        }
        match stream.finish().await {
            Ok(status) if !status.success() => {
                log::warn!("`{}` 以 {} 退出", command, status);
            }
            Ok(_) => {}
            Err(e) => log::warn!("等待 `{}` 退出失败: {}", command, e),
        }

        progress.resynchronizing();
        progress.set_status("正在同步...");

        if let Err(error) = self.resynchronize(request.kind.sync_scope()).await {
            return self.fail(label, &request.target, progress, error);
        }

        progress.succeed();
        log::info!("{} {} 完成", label, request.target);
        Ok(())
    }

    /// 删除 `<brew --cache>/downloads` 下的文件，返回回收的字节数
    ///
    /// 这一步直接操作文件系统而不调用 brew，但与其它环境级操作共用同一把锁。
    pub async fn delete_cached_downloads(
        &self,
        progress: &ProgressTracker,
    ) -> Result<u64, OperationError> {
        let lease = self.target_lock(ENVIRONMENT_TARGET);
        let _guard = lease.lock.lock().await;
        let fail = |error: OperationError| {
            self.fail(DELETE_DOWNLOADS_LABEL, ENVIRONMENT_TARGET, progress, error)
        };
        progress.start(DELETE_DOWNLOADS_LABEL);

        let dir = match self.synchronizer.cached_downloads_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                let error = OperationError::CouldNotSynchronizeCachedDownloads(e.to_string());
                return fail(error).map(|_| 0);
            }
        };

        let deleted = tokio::task::spawn_blocking(move || remove_directory_contents(&dir))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .and_then(|r| r);
        let reclaimed = match deleted {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = OperationError::CouldNotDeleteDownloads(e.to_string());
                return fail(error).map(|_| 0);
            }
        };
        log::info!("已删除下载缓存，回收 {} 字节", reclaimed);

        progress.resynchronizing();
        if let Err(e) = self.synchronizer.synchronize_cached_downloads(true).await {
            let error = OperationError::CouldNotSynchronizeCachedDownloads(e.to_string());
            return fail(error).map(|_| 0);
        }
        progress.succeed();
        Ok(reclaimed)
    }

    /// 在独立任务中执行操作，返回进度的只读视图
    pub fn spawn(
        self: &Arc<Self>,
        request: OperationRequest,
        on_complete: Option<CompletionObserver>,
    ) -> ProgressWatch {
        let tracker = ProgressTracker::new();
        let watch = tracker.watch();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = orchestrator.perform(&request, &tracker).await;
            if let Some(observer) = on_complete {
                observer(&outcome);
            }
        });
        watch
    }

    async fn resynchronize(&self, scope: SyncScope) -> Result<(), OperationError> {
        let sync = &self.synchronizer;
        match scope {
            SyncScope::Packages => sync
                .synchronize_packages(true)
                .await
                .map_err(|e| OperationError::CouldNotSynchronizePackages(e.to_string())),
            SyncScope::Services => sync
                .synchronize_services(true)
                .await
                .map_err(|e| OperationError::CouldNotSynchronizeServices(e.to_string())),
            SyncScope::PackagesAndCachedDownloads => {
                sync.synchronize_packages(true)
                    .await
                    .map_err(|e| OperationError::CouldNotSynchronizePackages(e.to_string()))?;
                sync.synchronize_cached_downloads(true)
                    .await
                    .map_err(|e| OperationError::CouldNotSynchronizeCachedDownloads(e.to_string()))
            }
            SyncScope::Nothing => Ok(()),
        }
    }

    fn fail(
        &self,
        label: &'static str,
        target: &str,
        progress: &ProgressTracker,
        error: OperationError,
    ) -> Result<(), OperationError> {
        log::error!("{} {} 失败: {}", label, target, error);
        progress.fail(error.clone());
        if let Some(alerts) = &self.alerts {
            let _ = alerts.send(BrewAlert {
                label,
                target: target.to_string(),
                error: error.clone(),
            });
        }
        Err(error)
    }

    fn target_lock(&self, target: &str) -> TargetLease<'_> {
        let mut locks = self
            .target_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(target.to_string()).or_default());
        TargetLease {
            locks: &self.target_locks,
            target: target.to_string(),
            lock,
        }
    }
}

/// 对某个目标锁的引用；释放时若再无其它任务引用这把锁，就从表中移除
struct TargetLease<'a> {
    locks: &'a TargetLocks,
    target: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for TargetLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 表里一份加自己一份
        let idle = locks.get(&self.target).is_some_and(|entry| {
            Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2
        });
        if idle {
            locks.remove(&self.target);
        }
    }
}

/// 删除目录下的文件（不递归），返回删除的总字节数；目录不存在视为空
fn remove_directory_contents(dir: &Path) -> io::Result<u64> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut reclaimed = 0;
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            fs::remove_file(entry.path())?;
            reclaimed += metadata.len();
        }
    }
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brew::progress::{OperationPhase, RESYNC_CHECKPOINT};
    use crate::brew::testing::{FakeBrew, PACKAGES_JSON, SERVICES_JSON};
    use crate::brew::{OperationKind, PackageKind};
    use std::time::Duration;

    fn orchestrator(fake: &FakeBrew) -> Orchestrator {
        Orchestrator::new(fake.brew.clone(), Arc::new(BrewState::new()))
    }

    #[tokio::test]
    async fn kill_service_resynchronizes_and_succeeds() {
        let fake = FakeBrew::new(
            r#"
"services kill redis") echo "==> Successfully killed redis" ;;
"services list --json") cat "$FAKE_DIR/services.json" ;;
"#,
        );
        fake.write("services.json", SERVICES_JSON);
        let orchestrator = orchestrator(&fake);
        let tracker = ProgressTracker::new();

        let request = OperationRequest::new("redis", OperationKind::KillService);
        orchestrator.perform(&request, &tracker).await.unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.percent_complete, 100.0);
        assert_eq!(snapshot.phase, OperationPhase::Succeeded);
        assert!(snapshot.error_state.is_none());
        assert_eq!(fake.invocations(), ["services kill redis", "services list --json"]);
        assert_eq!(orchestrator.state().services.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn failed_resync_after_kill_is_not_success() {
        let fake = FakeBrew::new(
            r#"
"services kill redis") echo "==> Successfully killed redis" ;;
"services list --json") echo "Error: launchctl failed" >&2; exit 1 ;;
"#,
        );
        let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
        let orchestrator = orchestrator(&fake).with_alerts(alert_tx);
        let tracker = ProgressTracker::new();

        let request = OperationRequest::new("redis", OperationKind::KillService);
        let err = orchestrator.perform(&request, &tracker).await.unwrap_err();

        assert!(matches!(err, OperationError::CouldNotSynchronizeServices(_)));
        let snapshot = tracker.snapshot();
        assert!(matches!(
            snapshot.error_state,
            Some(OperationError::CouldNotSynchronizeServices(_))
        ));
        assert_eq!(snapshot.percent_complete, RESYNC_CHECKPOINT);
        assert!(matches!(snapshot.phase, OperationPhase::Failed { .. }));

        let alert = alert_rx.try_recv().unwrap();
        assert_eq!(alert.label, "强制终止服务");
        assert_eq!(alert.target, "redis");
        assert_eq!(alert.error, err);
        assert!(orchestrator.target_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn target_lock_outlives_finished_holder_while_others_wait() {
        let orchestrator = Orchestrator::new(Brew::new("brew"), Arc::new(BrewState::new()));
        let first = orchestrator.target_lock("wget");
        let second = orchestrator.target_lock("wget");
        assert!(Arc::ptr_eq(&first.lock, &second.lock));

        drop(first);
        assert_eq!(orchestrator.target_locks.lock().unwrap().len(), 1);
        drop(second);
        assert!(orchestrator.target_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_download_deletion_is_reported_under_its_own_name() {
        // 没有 `--cache` 分支，找不到下载目录
        let fake = FakeBrew::new("");
        let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
        let orchestrator = orchestrator(&fake).with_alerts(alert_tx);
        let tracker = ProgressTracker::new();

        let err = orchestrator.delete_cached_downloads(&tracker).await.unwrap_err();

        assert!(matches!(err, OperationError::CouldNotSynchronizeCachedDownloads(_)));
        let alert = alert_rx.try_recv().unwrap();
        assert_eq!(alert.label, DELETE_DOWNLOADS_LABEL);
        assert_eq!(alert.target, ENVIRONMENT_TARGET);
        assert!(tracker.is_terminal());
    }

    #[tokio::test]
    async fn spawn_failure_ends_in_terminal_error() {
        let orchestrator = Orchestrator::new(
            Brew::new("/nonexistent/lian-brew/brew"),
            Arc::new(BrewState::new()),
        );
        let tracker = ProgressTracker::new();
        let request = OperationRequest::new("wget", OperationKind::Install(PackageKind::Formula));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.perform(&request, &tracker),
        )
        .await
        .expect("spawn failure must resolve promptly");

        assert!(matches!(result, Err(OperationError::SpawnFailure(_))));
        assert!(tracker.is_terminal());
        assert!(matches!(
            tracker.snapshot().error_state,
            Some(OperationError::SpawnFailure(_))
        ));
    }

    #[tokio::test]
    async fn resync_checkpoint_only_after_stream_is_drained() {
        let fake = FakeBrew::new(
            r#"
"install --formula wget")
    for i in 1 2 3 4 5 6 7 8; do echo "==> Step $i"; echo "Warning: step $i" >&2; done ;;
"info --json=v2 --installed") cat "$FAKE_DIR/packages.json" ;;
"#,
        );
        fake.write("packages.json", PACKAGES_JSON);
        let orchestrator = orchestrator(&fake);
        let tracker = ProgressTracker::new();
        let mut seen = Vec::new();

        let request = OperationRequest::new("wget", OperationKind::Install(PackageKind::Formula));
        orchestrator
            .perform_with(&request, &tracker, |line| {
                let snapshot = tracker.snapshot();
                seen.push((line.clone(), snapshot.percent_complete, snapshot.phase));
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 16);
        for (_, percent, phase) in &seen {
            assert!(*percent < RESYNC_CHECKPOINT);
            assert!(matches!(phase, OperationPhase::Running { .. }));
        }
        let stdout: Vec<&str> = seen
            .iter()
            .filter(|(l, _, _)| !l.is_error())
            .map(|(l, _, _)| l.text())
            .collect();
        assert_eq!(stdout.first(), Some(&"==> Step 1"));
        assert_eq!(stdout.last(), Some(&"==> Step 8"));
        assert_eq!(tracker.snapshot().percent_complete, 100.0);
    }

    #[tokio::test]
    async fn same_target_operations_never_overlap() {
        let fake = FakeBrew::new(
            r#"
"install --formula foo"|"uninstall --formula foo")
    if [ -e "$FAKE_DIR/busy" ]; then echo overlap >> "$FAKE_DIR/overlaps"; fi
    touch "$FAKE_DIR/busy"; sleep 0.3; rm -f "$FAKE_DIR/busy" ;;
"info --json=v2 --installed") cat "$FAKE_DIR/packages.json" ;;
"#,
        );
        fake.write("packages.json", PACKAGES_JSON);
        let orchestrator = orchestrator(&fake);
        let (remove_tracker, install_tracker) = (ProgressTracker::new(), ProgressTracker::new());

        let remove = OperationRequest::new("foo", OperationKind::Uninstall(PackageKind::Formula));
        let install = OperationRequest::new("foo", OperationKind::Install(PackageKind::Formula));
        let (a, b) = tokio::join!(
            orchestrator.perform(&remove, &remove_tracker),
            orchestrator.perform(&install, &install_tracker),
        );
        a.unwrap();
        b.unwrap();

        assert!(!fake.path("overlaps").exists());
        let mutations = fake
            .invocations()
            .into_iter()
            .filter(|i| i.ends_with("--formula foo"))
            .count();
        assert_eq!(mutations, 2);
        assert!(orchestrator.target_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_check_does_not_resynchronize() {
        let fake = FakeBrew::new(
            r#"
"doctor") echo "Your system is ready to brew." ;;
"#,
        );
        let orchestrator = orchestrator(&fake);
        let tracker = ProgressTracker::new();
        orchestrator
            .perform(&OperationRequest::environment(OperationKind::HealthCheck), &tracker)
            .await
            .unwrap();
        assert_eq!(fake.invocations(), ["doctor"]);
        assert_eq!(tracker.snapshot().phase, OperationPhase::Succeeded);
    }

    #[tokio::test]
    async fn spawned_operation_reports_through_watch_and_observer() {
        let fake = FakeBrew::new(
            r#"
"services start redis") echo "==> Successfully started redis" ;;
"services list --json") cat "$FAKE_DIR/services.json" ;;
"#,
        );
        fake.write("services.json", SERVICES_JSON);
        let orchestrator = Arc::new(orchestrator(&fake));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let mut watch = orchestrator.spawn(
            OperationRequest::new("redis", OperationKind::StartService),
            Some(Box::new(move |outcome| {
                let _ = done_tx.send(outcome.is_ok());
            })),
        );

        let last = watch.finished().await;
        assert_eq!(last.phase, OperationPhase::Succeeded);
        assert!(done_rx.await.unwrap());
    }
}

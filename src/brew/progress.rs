//! 单次操作的进度状态
//!
//! 写端 `ProgressTracker` 只有一个，由驱动该操作的编排器持有；
//! 读端 `ProgressWatch` 可任意克隆，每次读取得到完整快照。

use super::error::OperationError;
use tokio::sync::watch;

/// 外部命令输出已读完、开始重新同步时的进度
pub const RESYNC_CHECKPOINT: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub enum OperationPhase {
    Idle,
    Running { command: String },
    Resynchronizing,
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub percent_complete: f64,
    pub phase: OperationPhase,
    pub status: String,
    pub error_state: Option<OperationError>,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, OperationPhase::Succeeded | OperationPhase::Failed { .. })
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            percent_complete: 0.0,
            phase: OperationPhase::Idle,
            status: String::new(),
            error_state: None,
        }
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx }
    }

    /// 订阅只读视图
    pub fn watch(&self) -> ProgressWatch {
        ProgressWatch {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    /// 进入 Running 阶段
    pub fn start(&self, command: &str) {
        self.update(|s| {
            s.phase = OperationPhase::Running {
                command: command.to_string(),
            };
            s.status = command.to_string();
        });
    }

    /// 更新人类可读的状态文本，不影响百分比
    pub fn set_status(&self, status: &str) {
        self.update(|s| s.status = status.to_string());
    }

    /// 推进到某个检查点；进度只增不减
    pub fn advance_to(&self, percent: f64) {
        self.update(|s| {
            let clamped = percent.clamp(0.0, 100.0);
            if clamped > s.percent_complete {
                s.percent_complete = clamped;
            }
        });
    }

    pub fn resynchronizing(&self) {
        self.advance_to(RESYNC_CHECKPOINT);
        self.update(|s| s.phase = OperationPhase::Resynchronizing);
    }

    pub fn succeed(&self) {
        self.advance_to(100.0);
        self.update(|s| s.phase = OperationPhase::Succeeded);
    }

    /// 记录错误；此后的任何写入都被忽略
    pub fn fail(&self, error: OperationError) {
        self.update(|s| {
            s.phase = OperationPhase::Failed {
                reason: error.to_string(),
            };
            s.status = error.to_string();
            s.error_state = Some(error);
        });
    }

    fn update(&self, modify: impl FnOnce(&mut ProgressSnapshot)) {
        self.tx.send_if_modified(|s| {
            if s.is_terminal() {
                log::debug!("忽略对已结束操作的进度写入");
                return false;
            }
            modify(s);
            true
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 表示层持有的只读视图
#[derive(Debug, Clone)]
pub struct ProgressWatch {
    rx: watch::Receiver<ProgressSnapshot>,
}

impl ProgressWatch {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.rx.borrow().clone()
    }

    /// 等待下一次变化；写端已释放时返回 false
    #[allow(dead_code)]
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// 等待操作进入终态并返回最终快照
    pub async fn finished(&mut self) -> ProgressSnapshot {
        let result = self
            .rx
            .wait_for(ProgressSnapshot::is_terminal)
            .await
            .map(|snapshot| snapshot.clone());
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot(),
        }
    }
}

use super::input::InputBox;
use crate::brew::maintenance::MaintenanceStep;
use crate::brew::{
    BrewAlert, BrewState, MaintenanceResult, OperationKind, PackageKind, PackageRecord,
    ProgressWatch, ServiceRecord, Tracked,
};
use crate::config::Config;
use std::sync::Arc;

// ========== 枚举 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Packages,    // Shift+P
    Services,    // Shift+S
    Maintenance, // Shift+M
}

impl AppMode {
    pub const ALL: [AppMode; 3] = [AppMode::Packages, AppMode::Services, AppMode::Maintenance];

    pub fn title(self) -> &'static str {
        match self {
            AppMode::Packages => "已安装包",
            AppMode::Services => "服务",
            AppMode::Maintenance => "维护",
        }
    }

    pub fn hotkey(self) -> char {
        match self {
            AppMode::Packages => 'P',
            AppMode::Services => 'S',
            AppMode::Maintenance => 'M',
        }
    }
}

/// 维护页可勾选的步骤，顺序即执行顺序
pub const MAINTENANCE_STEPS: [MaintenanceStep; 4] = [
    MaintenanceStep::RemoveOrphans,
    MaintenanceStep::PurgeCache,
    MaintenanceStep::DeleteDownloads,
    MaintenanceStep::HealthCheck,
];

// ========== 事件 ==========

#[derive(Debug)]
pub enum AppEvent {
    Synchronized(Result<(), String>),
    OperationFinished {
        label: &'static str,
        target: String,
        succeeded: bool,
    },
    MaintenanceFinished(MaintenanceResult),
}

/// 正在进行的单个操作
pub struct ActiveOperation {
    pub kind: OperationKind,
    pub target: String,
    pub progress: ProgressWatch,
}

// ========== App ==========

pub struct App {
    pub mode: AppMode,
    pub should_quit: bool,
    pub config: Config,
    pub state: Arc<BrewState>,
    pub syncing: bool,

    // Packages
    pub package_kind: PackageKind,
    pub package_selected: usize,
    pub install_input: Option<InputBox>,

    // Services
    pub service_selected: usize,

    // Maintenance
    pub maintenance_selected: usize,
    pub maintenance_progress: Option<ProgressWatch>,
    pub maintenance_result: Option<MaintenanceResult>,
    pub maintenance_scroll: usize,

    pub active: Vec<ActiveOperation>,
    /// 最近一次操作的结果提示
    pub message: Option<String>,
    /// 最近一次失败告警
    pub alert: Option<String>,
}

impl App {
    pub fn new(config: Config, state: Arc<BrewState>) -> Self {
        Self {
            mode: AppMode::Packages,
            should_quit: false,
            config,
            state,
            syncing: false,
            package_kind: PackageKind::Formula,
            package_selected: 0,
            install_input: None,
            service_selected: 0,
            maintenance_selected: 0,
            maintenance_progress: None,
            maintenance_result: None,
            maintenance_scroll: 0,
            active: Vec::new(),
            message: None,
            alert: None,
        }
    }

    pub fn packages(&self) -> Vec<Tracked<PackageRecord>> {
        self.state
            .packages(self.package_kind)
            .snapshot()
            .iter()
            .cloned()
            .collect()
    }

    pub fn selected_package(&self) -> Option<Tracked<PackageRecord>> {
        self.packages().into_iter().nth(self.package_selected)
    }

    pub fn services(&self) -> Vec<Tracked<ServiceRecord>> {
        self.state.services.snapshot().iter().cloned().collect()
    }

    pub fn selected_service(&self) -> Option<Tracked<ServiceRecord>> {
        self.services().into_iter().nth(self.service_selected)
    }

    /// 在 formula / cask 之间切换
    pub fn toggle_package_kind(&mut self) {
        self.package_kind = match self.package_kind {
            PackageKind::Formula => PackageKind::Cask,
            PackageKind::Cask => PackageKind::Formula,
        };
        self.package_selected = 0;
    }

    /// 目录重新同步后，选中项可能越界
    pub fn clamp_selection(&mut self) {
        let packages = self.state.packages(self.package_kind).snapshot().len();
        self.package_selected = self.package_selected.min(packages.saturating_sub(1));
        let services = self.state.services.snapshot().len();
        self.service_selected = self.service_selected.min(services.saturating_sub(1));
    }

    pub fn is_step_enabled(&self, step: MaintenanceStep) -> bool {
        let m = &self.config.maintenance;
        match step {
            MaintenanceStep::RemoveOrphans => m.remove_orphans,
            MaintenanceStep::PurgeCache => m.purge_cache,
            MaintenanceStep::DeleteDownloads => m.delete_downloads,
            MaintenanceStep::HealthCheck => m.run_health_check,
            MaintenanceStep::Resynchronize => true,
        }
    }

    pub fn toggle_maintenance_step(&mut self, step: MaintenanceStep) {
        let m = &mut self.config.maintenance;
        match step {
            MaintenanceStep::RemoveOrphans => m.remove_orphans = !m.remove_orphans,
            MaintenanceStep::PurgeCache => m.purge_cache = !m.purge_cache,
            MaintenanceStep::DeleteDownloads => m.delete_downloads = !m.delete_downloads,
            MaintenanceStep::HealthCheck => m.run_health_check = !m.run_health_check,
            MaintenanceStep::Resynchronize => {}
        }
    }

    pub fn maintenance_running(&self) -> bool {
        self.maintenance_progress
            .as_ref()
            .map_or(false, |p| !p.snapshot().is_terminal())
    }

    /// 同一目标已有操作在进行
    pub fn is_busy(&self, target: &str) -> bool {
        self.active.iter().any(|op| op.target == target)
    }

    /// 移除已进入终态的操作
    pub fn prune_finished(&mut self) {
        self.active.retain(|op| !op.progress.snapshot().is_terminal());
    }

    pub fn record_alert(&mut self, alert: BrewAlert) {
        self.alert = Some(format!("{} {}: {}", alert.label, alert.target, alert.error));
    }

    pub fn move_selection(selected: &mut usize, len: usize, down: bool) {
        if down {
            if *selected + 1 < len {
                *selected += 1;
            }
        } else {
            *selected = selected.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brew::parser::parse_installed_packages;
    use crate::brew::OperationError;

    fn app_with_packages() -> App {
        let state = Arc::new(BrewState::new());
        let (formulae, casks) = parse_installed_packages(
            r#"{"formulae": [
                {"name": "jq", "installed": [{"version": "1.7", "installed_on_request": true}]},
                {"name": "oniguruma", "installed": [{"version": "6.9", "installed_on_request": false}]}
            ], "casks": [{"token": "iterm2", "installed": "3.5"}]}"#,
        )
        .unwrap();
        state.formulae.replace(formulae, false);
        state.casks.replace(casks, false);
        App::new(Config::default(), state)
    }

    #[test]
    fn selection_follows_package_kind() {
        let mut app = app_with_packages();
        let len = app.packages().len();
        App::move_selection(&mut app.package_selected, len, true);
        assert_eq!(app.selected_package().unwrap().name, "oniguruma");

        app.toggle_package_kind();
        assert_eq!(app.package_selected, 0);
        assert_eq!(app.selected_package().unwrap().name, "iterm2");
    }

    #[test]
    fn selection_is_clamped_after_resync() {
        let mut app = app_with_packages();
        app.package_selected = 1;
        app.state.formulae.remove("oniguruma");
        app.clamp_selection();
        assert_eq!(app.package_selected, 0);
        assert_eq!(app.service_selected, 0);
    }

    #[test]
    fn maintenance_steps_toggle_config() {
        let mut app = app_with_packages();
        assert!(!app.is_step_enabled(MaintenanceStep::HealthCheck));
        app.toggle_maintenance_step(MaintenanceStep::HealthCheck);
        app.toggle_maintenance_step(MaintenanceStep::PurgeCache);
        assert!(app.config.maintenance.run_health_check);
        assert!(!app.config.maintenance.purge_cache);
    }

    #[test]
    fn alerts_name_their_target() {
        let mut app = app_with_packages();
        app.record_alert(BrewAlert {
            label: "停止服务",
            target: "redis".to_string(),
            error: OperationError::CouldNotSynchronizeServices("exit 1".to_string()),
        });
        assert_eq!(app.alert.as_deref(), Some("停止服务 redis: 无法同步服务: exit 1"));
    }
}

use super::layout;
use super::state::{App, AppEvent, MAINTENANCE_STEPS};
use super::theme::{BLUE, BRIGHT_WHITE, DIM, OK_GREEN, PINK, WARN_RED};
use crate::brew::maintenance::summarize_names;
use crate::brew::{
    CachedDownload, CatalogSnapshot, MaintenancePipeline, MaintenanceResult, Orchestrator,
    PackageRecord, ProgressTracker,
};
use crate::config::Config;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    Frame,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 阻止缓存清理的包名最多显示几个
const SUMMARY_LIMIT: usize = 3;

pub fn handle_maintenance_key(
    key: KeyEvent,
    app: &mut App,
    orchestrator: &Arc<Orchestrator>,
    tx: &mpsc::Sender<AppEvent>,
    term_height: u16,
) -> bool {
    match key.code {
        KeyCode::Up | KeyCode::Down => {
            App::move_selection(
                &mut app.maintenance_selected,
                MAINTENANCE_STEPS.len(),
                key.code == KeyCode::Down,
            );
            true
        }
        KeyCode::Char(' ') => {
            if let Some(step) = MAINTENANCE_STEPS.get(app.maintenance_selected) {
                app.toggle_maintenance_step(*step);
            }
            true
        }
        KeyCode::Enter => {
            start_maintenance(app, orchestrator, tx);
            true
        }
        KeyCode::PageUp => {
            let page = layout::visible_content_height(term_height) / 2;
            app.maintenance_scroll = app.maintenance_scroll.saturating_sub(page.max(1));
            true
        }
        KeyCode::PageDown => {
            let page = layout::visible_content_height(term_height) / 2;
            app.maintenance_scroll += page.max(1);
            true
        }
        _ => false,
    }
}

fn start_maintenance(app: &mut App, orchestrator: &Arc<Orchestrator>, tx: &mpsc::Sender<AppEvent>) {
    if app.maintenance_running() {
        app.message = Some("维护正在进行中".to_string());
        return;
    }
    // 勾选状态写回配置，下次启动沿用
    if let Err(e) = app.config.save_to(&Config::config_path()) {
        log::warn!("保存维护设置失败: {:#}", e);
    }

    let tracker = ProgressTracker::new();
    app.maintenance_progress = Some(tracker.watch());
    app.maintenance_result = None;
    app.maintenance_scroll = 0;

    let pipeline = MaintenancePipeline::new(Arc::clone(orchestrator));
    let config = app.config.maintenance;
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        let result = pipeline.run(&config, &tracker).await;
        let _ = tx_clone.send(AppEvent::MaintenanceFinished(result)).await;
    });
}

/// 人类可读的字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// 下载缓存概况，缓存为空时返回 None
pub fn cache_overview(downloads: &CatalogSnapshot<CachedDownload>) -> Option<String> {
    if downloads.is_empty() {
        return None;
    }
    let total: u64 = downloads.iter().map(|d| d.size_bytes).sum();
    // 文件名以 URL 哈希开头，同一个包的文件不一定相邻
    let mut seen = HashSet::new();
    let packages: Vec<String> = downloads
        .iter()
        .map(|d| d.package_name.as_str())
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect();
    Some(format!(
        "下载缓存 {} 个文件，共 {}: {}",
        downloads.len(),
        format_bytes(total),
        summarize_names(&packages, SUMMARY_LIMIT)
    ))
}

/// 维护结果的展示文本
pub fn result_lines(
    result: &MaintenanceResult,
    formulae: &CatalogSnapshot<PackageRecord>,
    show_only_intentional: bool,
) -> Vec<Line<'static>> {
    let ok = Style::default().fg(OK_GREEN);
    let warn = Style::default().fg(WARN_RED);
    let mut lines = vec![
        Line::from(Span::styled(
            format!("完成于 {}", result.finished_at.format("%Y-%m-%d %H:%M:%S")),
            Style::default().fg(DIM),
        )),
        Line::from(""),
    ];

    if let Some(removed) = result.orphans_removed {
        let text = if removed == 0 {
            "没有需要移除的孤立依赖".to_string()
        } else {
            format!("已移除 {removed} 个孤立依赖")
        };
        lines.push(Line::from(Span::styled(text, ok)));
    }

    if result.cache_purge.is_some() {
        let blocking =
            result.displayable_packages_holding_back_cache_purge(formulae, show_only_intentional);
        if blocking.is_empty() {
            lines.push(Line::from(Span::styled("缓存已清理", ok)));
        } else {
            lines.push(Line::from(Span::styled(
                format!(
                    "以下包有可用更新，其旧版本缓存未被清理: {}",
                    summarize_names(&blocking, SUMMARY_LIMIT)
                ),
                warn,
            )));
        }
    }

    if let Some(downloads) = result.downloads_deleted {
        lines.push(Line::from(Span::styled(
            format!("已删除下载缓存，回收 {}", format_bytes(downloads.reclaimed_bytes)),
            ok,
        )));
    }

    if let Some(health) = result.health_check {
        if health.found_no_problems {
            lines.push(Line::from(Span::styled("brew doctor 未发现问题", ok)));
        } else {
            lines.push(Line::from(Span::styled(
                "brew doctor 报告了问题，详见日志",
                warn,
            )));
        }
    }

    if !result.failures.is_empty() {
        lines.push(Line::from(""));
        for failure in &result.failures {
            lines.push(Line::from(Span::styled(format!("✗ {failure}"), warn)));
        }
    }
    lines
}

pub fn render_maintenance(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(MAINTENANCE_STEPS.len() as u16 + 2),
            Constraint::Min(0),
        ])
        .split(area);

    let rows: Vec<Line<'static>> = MAINTENANCE_STEPS
        .iter()
        .map(|step| {
            let (mark, style) = if app.is_step_enabled(*step) {
                ("[x]", Style::default().fg(PINK).add_modifier(Modifier::BOLD))
            } else {
                ("[ ]", Style::default().fg(DIM))
            };
            Line::from(vec![
                Span::styled(format!(" {mark} "), style),
                Span::styled(step.to_string(), Style::default().fg(BRIGHT_WHITE)),
            ])
        })
        .collect();
    layout::render_selectable_list(f, "维护步骤", rows, app.maintenance_selected, chunks[0]);

    let lines = match &app.maintenance_result {
        Some(result) => result_lines(
            result,
            &app.state.formulae.snapshot(),
            app.config.show_only_intentionally_installed,
        ),
        None if app.maintenance_running() => vec![Line::from(Span::styled(
            "维护进行中...",
            Style::default().fg(BLUE),
        ))],
        None => {
            let mut lines = vec![Line::from(Span::styled(
                "按 Enter 开始维护",
                Style::default().fg(DIM),
            ))];
            if let Some(overview) = cache_overview(&app.state.cached_downloads.snapshot()) {
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(overview, Style::default().fg(BLUE))));
            }
            lines
        }
    };
    layout::render_scrollable_content(f, "结果", &lines, app.maintenance_scroll, chunks[1]);
}

pub fn footer_hint() -> &'static str {
    "↑↓ 选择 | Space 勾选 | Enter 开始维护 | PgUp/PgDn 滚动 | q 退出"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brew::maintenance::{CachePurgeOutcome, DownloadsOutcome, HealthCheckOutcome};
    use crate::brew::parser::{parse_cached_download, parse_installed_packages};
    use crate::brew::BrewState;
    use chrono::Local;

    fn text(lines: &[Line<'static>]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn cache_overview_sums_file_sizes() {
        let state = BrewState::new();
        assert_eq!(cache_overview(&state.cached_downloads.snapshot()), None);

        state.cached_downloads.replace(
            vec![
                parse_cached_download("a1--wget--1.24.5.tar.gz", 1024),
                parse_cached_download("b2--wget--1.24.4.tar.gz", 1024),
                parse_cached_download("c3--jq--1.7.1.tar.gz", 1024),
            ],
            false,
        );
        assert_eq!(
            cache_overview(&state.cached_downloads.snapshot()).as_deref(),
            Some("下载缓存 3 个文件，共 3.0 KB: wget、jq")
        );
    }

    #[test]
    fn cache_overview_lists_each_package_once() {
        let state = BrewState::new();
        state.cached_downloads.replace(
            vec![
                parse_cached_download("0a--wget--1.24.5.tar.gz", 1),
                parse_cached_download("5f--jq--1.7.1.tar.gz", 1),
                parse_cached_download("c3--wget--1.24.4.tar.gz", 1),
            ],
            false,
        );
        assert_eq!(
            cache_overview(&state.cached_downloads.snapshot()).as_deref(),
            Some("下载缓存 3 个文件，共 3 B: wget、jq")
        );
    }

    #[test]
    fn result_summary_hides_dependencies_when_filtered() {
        let state = BrewState::new();
        let (formulae, _) = parse_installed_packages(
            r#"{"formulae": [
                {"name": "node", "installed": [{"version": "22", "installed_on_request": true}], "outdated": true},
                {"name": "icu4c", "installed": [{"version": "74", "installed_on_request": false}], "outdated": true}
            ]}"#,
        )
        .unwrap();
        state.formulae.replace(formulae, false);
        let result = MaintenanceResult {
            orphans_removed: Some(0),
            cache_purge: Some(CachePurgeOutcome {
                packages_holding_back_cache_purge: vec!["icu4c".to_string(), "node".to_string()],
            }),
            downloads_deleted: Some(DownloadsOutcome { reclaimed_bytes: 2048 }),
            health_check: Some(HealthCheckOutcome { found_no_problems: true }),
            failures: Vec::new(),
            finished_at: Local::now(),
        };

        let filtered = text(&result_lines(&result, &state.formulae.snapshot(), true));
        assert!(filtered.contains(&"没有需要移除的孤立依赖".to_string()));
        assert!(filtered.contains(&"以下包有可用更新，其旧版本缓存未被清理: node".to_string()));
        assert!(filtered.contains(&"已删除下载缓存，回收 2.0 KB".to_string()));

        let all = text(&result_lines(&result, &state.formulae.snapshot(), false));
        assert!(all.contains(&"以下包有可用更新，其旧版本缓存未被清理: icu4c、node".to_string()));
    }
}

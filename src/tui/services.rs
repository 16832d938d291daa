use super::layout;
use super::state::{App, AppEvent};
use super::submit_operation;
use super::theme::{BRIGHT_WHITE, DIM, OK_GREEN, WARN_RED};
use crate::brew::{OperationKind, OperationRequest, Orchestrator, ServiceStatus};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    Frame,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 处理服务页按键
pub fn handle_services_key(
    key: KeyEvent,
    app: &mut App,
    orchestrator: &Arc<Orchestrator>,
    tx: &mpsc::Sender<AppEvent>,
) -> bool {
    let kind = match key.code {
        KeyCode::Up | KeyCode::Down => {
            let len = app.services().len();
            App::move_selection(&mut app.service_selected, len, key.code == KeyCode::Down);
            return true;
        }
        KeyCode::Char('s') => OperationKind::StartService,
        KeyCode::Char('x') => OperationKind::StopService,
        KeyCode::Char('r') => OperationKind::RestartService,
        KeyCode::Char('k') => OperationKind::KillService,
        _ => return false,
    };
    if let Some(service) = app.selected_service() {
        submit_operation(app, orchestrator, tx, OperationRequest::new(&service.name, kind));
    }
    true
}

fn status_style(status: &ServiceStatus) -> Style {
    match status {
        ServiceStatus::Started | ServiceStatus::Scheduled => Style::default().fg(OK_GREEN),
        ServiceStatus::Error => Style::default().fg(WARN_RED),
        _ => Style::default().fg(DIM),
    }
}

pub fn render_services(f: &mut Frame, app: &App, area: Rect) {
    let services = app.services();
    let rows: Vec<Line<'static>> = services
        .iter()
        .map(|s| {
            let mut spans = vec![
                Span::styled(
                    format!(" {:<28}", s.name),
                    Style::default().fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("{:<12}", s.status.to_string()), status_style(&s.status)),
                Span::styled(
                    format!("{:<10}", s.user.as_deref().unwrap_or("-")),
                    Style::default().fg(DIM),
                ),
            ];
            if let Some(code) = s.exit_code.filter(|c| *c != 0) {
                spans.push(Span::styled(format!("退出码 {code} "), Style::default().fg(WARN_RED)));
            }
            if let Some(file) = &s.file {
                spans.push(Span::styled(file.display().to_string(), Style::default().fg(DIM)));
            }
            Line::from(spans)
        })
        .collect();

    let running = services.iter().filter(|s| s.status.is_running()).count();
    let title = format!("服务 ({} 个，{} 个运行中)", services.len(), running);
    layout::render_selectable_list(f, &title, rows, app.service_selected, area);
}

pub fn footer_hint() -> &'static str {
    "↑↓ 选择 | s 启动 | x 停止 | r 重启 | k 强制终止 | q 退出"
}

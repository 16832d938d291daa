use super::input::{render_input_box, InputBox};
use super::layout;
use super::state::{App, AppEvent};
use super::submit_operation;
use super::theme::{BRIGHT_WHITE, DIM, PINK, WARN_RED};
use crate::brew::{OperationKind, OperationRequest, Orchestrator, PackageKind};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    Frame,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 处理包列表页按键
pub fn handle_packages_key(
    key: KeyEvent,
    app: &mut App,
    orchestrator: &Arc<Orchestrator>,
    tx: &mpsc::Sender<AppEvent>,
) -> bool {
    if app.install_input.is_some() {
        return handle_install_input_key(key, app, orchestrator, tx);
    }

    match key.code {
        KeyCode::Up | KeyCode::Down => {
            let len = app.packages().len();
            App::move_selection(&mut app.package_selected, len, key.code == KeyCode::Down);
            true
        }
        KeyCode::Tab => {
            app.toggle_package_kind();
            true
        }
        KeyCode::Char('i') => {
            app.install_input = Some(InputBox::new());
            true
        }
        KeyCode::Char('u') => {
            if let Some(package) = app.selected_package() {
                let request =
                    OperationRequest::new(&package.name, OperationKind::Uninstall(package.kind));
                submit_operation(app, orchestrator, tx, request);
            }
            true
        }
        KeyCode::Char('g') => {
            if let Some(package) = app.selected_package() {
                if package.outdated {
                    submit_operation(
                        app,
                        orchestrator,
                        tx,
                        OperationRequest::new(&package.name, OperationKind::Upgrade),
                    );
                } else {
                    app.message = Some(format!("{} 已是最新版本", package.name));
                }
            }
            true
        }
        KeyCode::Char('p') => {
            if let Some(package) = app.selected_package() {
                if package.kind == PackageKind::Cask {
                    app.message = Some("cask 不支持锁定版本".to_string());
                } else {
                    let kind = if package.pinned {
                        OperationKind::Unpin
                    } else {
                        OperationKind::Pin
                    };
                    submit_operation(app, orchestrator, tx, OperationRequest::new(&package.name, kind));
                }
            }
            true
        }
        _ => false,
    }
}

/// 安装输入框按键：Enter 安装当前类型的包，Esc 取消
fn handle_install_input_key(
    key: KeyEvent,
    app: &mut App,
    orchestrator: &Arc<Orchestrator>,
    tx: &mpsc::Sender<AppEvent>,
) -> bool {
    let Some(input) = app.install_input.as_mut() else {
        return false;
    };
    match key.code {
        KeyCode::Esc => {
            app.install_input = None;
        }
        KeyCode::Enter => {
            if let Some(name) = input.submitted() {
                app.install_input = None;
                if app.state.packages(app.package_kind).snapshot().contains(&name) {
                    app.message = Some(format!("{name} 已安装"));
                } else {
                    let kind = OperationKind::Install(app.package_kind);
                    submit_operation(app, orchestrator, tx, OperationRequest::new(name, kind));
                }
            }
        }
        KeyCode::Backspace => input.delete_back(),
        KeyCode::Left => input.move_left(),
        KeyCode::Right => input.move_right(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => input.insert(c),
        _ => return false,
    }
    true
}

pub fn render_packages(f: &mut Frame, app: &App, area: Rect) {
    let packages = app.packages();
    let rows: Vec<Line<'static>> = packages
        .iter()
        .map(|p| {
            let mut spans = vec![
                Span::styled(
                    format!(" {:<28}", p.name),
                    Style::default().fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("{:<14}", p.version), Style::default().fg(PINK)),
            ];
            if p.outdated {
                spans.push(Span::styled("[可升级] ", Style::default().fg(WARN_RED)));
            }
            if p.pinned {
                spans.push(Span::styled("[已锁定] ", Style::default().fg(PINK)));
            }
            if !p.installed_intentionally {
                spans.push(Span::styled("[依赖] ", Style::default().fg(DIM)));
            }
            spans.push(Span::styled(p.description.clone(), Style::default().fg(DIM)));
            Line::from(spans)
        })
        .collect();

    let title = match app.package_kind {
        PackageKind::Formula => format!("Formulae ({})", packages.len()),
        PackageKind::Cask => format!("Casks ({})", packages.len()),
    };
    let title = if app.syncing {
        format!("{title} 同步中...")
    } else {
        title
    };

    match &app.install_input {
        Some(input) => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(3)])
                .split(area);
            layout::render_selectable_list(f, &title, rows, app.package_selected, chunks[0]);
            let label = format!("安装 {}:", app.package_kind);
            render_input_box(f, input, &label, chunks[1]);
        }
        None => layout::render_selectable_list(f, &title, rows, app.package_selected, area),
    }
}

pub fn footer_hint(app: &App) -> &'static str {
    if app.install_input.is_some() {
        "Enter 安装 | Esc 取消"
    } else {
        "↑↓ 选择 | Tab formula/cask | i 安装 | u 卸载 | g 升级 | p 锁定/解锁 | q 退出"
    }
}

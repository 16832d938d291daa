pub mod input;
mod layout;
mod maintenance;
mod packages;
mod services;
pub mod state;
mod theme;

use crate::brew::orchestrator::CompletionObserver;
use crate::brew::{
    BrewAlert, OperationError, OperationPhase, OperationRequest, Orchestrator, ProgressSnapshot,
};
use crate::config::Config;
use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use state::{ActiveOperation, App, AppEvent, AppMode};
use std::io;
use std::sync::Arc;
use theme::{BLUE, DIM, WARN_RED};
use tokio::sync::mpsc;

pub async fn run(
    orchestrator: Arc<Orchestrator>,
    mut alerts: mpsc::UnboundedReceiver<BrewAlert>,
    config: Config,
) -> Result<()> {
    // 终端初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, Arc::clone(orchestrator.state()));

    let (tx, mut rx) = mpsc::channel(32);

    // 启动时同步全部目录
    app.syncing = true;
    let synchronizer = orchestrator.synchronizer().clone();
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        let result = synchronizer
            .synchronize_all(false)
            .await
            .map_err(|e| e.to_string());
        let _ = tx_clone.send(AppEvent::Synchronized(result)).await;
    });

    // 主循环
    loop {
        app.prune_finished();
        app.clamp_selection();

        terminal.draw(|f| ui(f, &app))?;

        // 处理事件
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                let term_size = terminal.size()?;
                let typing = app.install_input.is_some();

                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.should_quit = true;
                    }
                    KeyCode::Char('q') if !typing => {
                        app.should_quit = true;
                    }
                    KeyCode::Esc if !typing => {
                        app.alert = None;
                        app.message = None;
                    }
                    // 页面切换 (Shift + 字母)，输入状态下作为普通字符
                    KeyCode::Char('P') if !typing => app.mode = AppMode::Packages,
                    KeyCode::Char('S') if !typing => app.mode = AppMode::Services,
                    KeyCode::Char('M') if !typing => app.mode = AppMode::Maintenance,
                    _ => {
                        match app.mode {
                            AppMode::Packages => {
                                packages::handle_packages_key(key, &mut app, &orchestrator, &tx);
                            }
                            AppMode::Services => {
                                services::handle_services_key(key, &mut app, &orchestrator, &tx);
                            }
                            AppMode::Maintenance => {
                                maintenance::handle_maintenance_key(
                                    key,
                                    &mut app,
                                    &orchestrator,
                                    &tx,
                                    term_size.height,
                                );
                            }
                        }
                    }
                }
            }
        }

        // 处理异步事件
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::Synchronized(result) => {
                    app.syncing = false;
                    if let Err(e) = result {
                        app.alert = Some(format!("同步失败: {}", e));
                    }
                }
                AppEvent::OperationFinished {
                    label,
                    target,
                    succeeded,
                } => {
                    app.message = Some(if succeeded {
                        format!("{} {} 完成", label, target)
                    } else {
                        format!("{} {} 失败", label, target)
                    });
                }
                AppEvent::MaintenanceFinished(result) => {
                    app.message = Some(if result.found_no_problems() {
                        "维护完成，未发现问题".to_string()
                    } else if result.failures.is_empty() {
                        "维护完成".to_string()
                    } else {
                        format!("维护完成，{} 个步骤失败", result.failures.len())
                    });
                    app.maintenance_result = Some(result);
                }
            }
        }
        // 失败告警由编排器直接发出
        while let Ok(alert) = alerts.try_recv() {
            app.record_alert(alert);
        }

        if app.should_quit {
            break;
        }
    }

    // 恢复终端
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

/// 提交一次操作；同一目标已有操作在进行时只提示，不重复提交
fn submit_operation(
    app: &mut App,
    orchestrator: &Arc<Orchestrator>,
    tx: &mpsc::Sender<AppEvent>,
    request: OperationRequest,
) {
    if app.is_busy(&request.target) {
        app.message = Some(format!("{} 正在处理中", request.target));
        return;
    }
    let label = request.kind.label();
    let target = request.target.clone();
    let tx_clone = tx.clone();
    let observer: CompletionObserver = Box::new(move |outcome: &Result<(), OperationError>| {
        let _ = tx_clone.try_send(AppEvent::OperationFinished {
            label,
            target,
            succeeded: outcome.is_ok(),
        });
    });

    let kind = request.kind;
    let target = request.target.clone();
    let progress = orchestrator.spawn(request, Some(observer));
    app.message = None;
    app.active.push(ActiveOperation {
        kind,
        target,
        progress,
    });
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());
    layout::render_header(f, app.mode, chunks[0]);
    match app.mode {
        AppMode::Packages => packages::render_packages(f, app, chunks[1]),
        AppMode::Services => services::render_services(f, app, chunks[1]),
        AppMode::Maintenance => maintenance::render_maintenance(f, app, chunks[1]),
    }
    render_progress(f, app, chunks[2]);
    let hint = match app.mode {
        AppMode::Packages => packages::footer_hint(app),
        AppMode::Services => services::footer_hint(),
        AppMode::Maintenance => maintenance::footer_hint(),
    };
    layout::render_footer(f, hint, chunks[3]);
}

/// 进度区：维护页显示维护进度，其余页面显示最近的操作
fn render_progress(f: &mut Frame, app: &App, area: Rect) {
    let current: Option<(String, ProgressSnapshot)> = if app.mode == AppMode::Maintenance {
        app.maintenance_progress
            .as_ref()
            .map(|p| ("维护".to_string(), p.snapshot()))
    } else {
        app.active
            .last()
            .map(|op| (format!("{} {}", op.kind.label(), op.target), op.progress.snapshot()))
    };

    if let Some((title, snapshot)) = current.filter(|(_, s)| !s.is_terminal()) {
        let label = match &snapshot.phase {
            OperationPhase::Resynchronizing => "正在同步...".to_string(),
            _ if !snapshot.status.is_empty() => snapshot.status.clone(),
            _ => title.clone(),
        };
        let more = app.active.len().saturating_sub(1);
        let title = if more > 0 && app.mode != AppMode::Maintenance {
            format!(" {title} (另有 {more} 个操作) ")
        } else {
            format!(" {title} ")
        };
        let gauge = Gauge::default()
            .block(Block::default().title(title).borders(Borders::ALL))
            .gauge_style(Style::default().fg(BLUE))
            .ratio((snapshot.percent_complete / 100.0).clamp(0.0, 1.0))
            .label(label);
        f.render_widget(gauge, area);
        return;
    }

    let line = match (&app.alert, &app.message) {
        (Some(alert), _) => Line::from(vec![
            Span::styled(" ✗ ", Style::default().fg(WARN_RED)),
            Span::styled(alert.clone(), Style::default().fg(WARN_RED)),
            Span::styled("  (Esc 清除)", Style::default().fg(DIM)),
        ]),
        (None, Some(message)) => Line::from(Span::styled(
            format!(" {message}"),
            Style::default().fg(Color::Green),
        )),
        (None, None) => Line::from(Span::styled(" 空闲", Style::default().fg(DIM))),
    };
    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

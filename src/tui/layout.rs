use super::state::AppMode;
use super::theme::{BLUE, DIM, PINK, SEL_BG};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};

/// 四段式布局：Header(3) + Content(弹性) + 进度(3) + Footer(3)
pub fn main_layout(area: Rect) -> Vec<Rect> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area)
        .to_vec()
}

/// 顶部标签栏，高亮当前页面
pub fn render_header(f: &mut Frame, current: AppMode, area: Rect) {
    let mut spans = Vec::new();
    for mode in AppMode::ALL {
        let style = if mode == current {
            Style::default()
                .fg(Color::Black)
                .bg(PINK)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(DIM)
        };
        spans.push(Span::styled(format!(" {} {} ", mode.hotkey(), mode.title()), style));
        spans.push(Span::raw("  "));
    }
    let header = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .title(format!(" lian-brew v{} ", env!("CARGO_PKG_VERSION")))
                .borders(Borders::ALL),
        )
        .alignment(Alignment::Center);
    f.render_widget(header, area);
}

/// 底部快捷键提示
pub fn render_footer(f: &mut Frame, text: &str, area: Rect) {
    let footer = Paragraph::new(format!(" {}", text))
        .style(Style::default().fg(Color::Green))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left);
    f.render_widget(footer, area);
}

/// 可选中的列表，选中行始终可见
pub fn render_selectable_list(
    f: &mut Frame,
    title: &str,
    rows: Vec<Line<'static>>,
    selected: usize,
    area: Rect,
) {
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BLUE));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let visible_height = inner.height as usize;
    if rows.is_empty() || visible_height == 0 {
        return;
    }
    let total = rows.len();
    let offset = selected.saturating_sub(visible_height.saturating_sub(1));

    let visible: Vec<Line> = rows
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(visible_height)
        .map(|(i, line)| {
            if i == selected {
                line.style(Style::default().bg(SEL_BG).add_modifier(Modifier::BOLD))
            } else {
                line
            }
        })
        .collect();
    f.render_widget(Paragraph::new(visible), inner);

    if total > visible_height {
        render_scrollbar(f, total, offset, area);
    }
}

/// 渲染带滚动条的文本区域
pub fn render_scrollable_content(
    f: &mut Frame,
    title: &str,
    lines: &[Line<'static>],
    scroll_offset: usize,
    area: Rect,
) {
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let inner = block.inner(area);
    f.render_widget(block, area);

    // 内部水平边距
    let padded = inner.inner(Margin {
        horizontal: 1,
        vertical: 0,
    });

    let total_lines = lines.len();
    let visible_height = padded.height as usize;
    let actual_scroll = scroll_offset.min(total_lines.saturating_sub(visible_height));

    let visible_content: Vec<Line> = lines
        .iter()
        .skip(actual_scroll)
        .take(visible_height)
        .cloned()
        .collect();
    let paragraph = Paragraph::new(visible_content).wrap(ratatui::widgets::Wrap { trim: false });
    f.render_widget(paragraph, padded);

    if total_lines > visible_height {
        render_scrollbar(f, total_lines, actual_scroll, area);
    }
}

fn render_scrollbar(f: &mut Frame, total: usize, position: usize, area: Rect) {
    let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
        .begin_symbol(Some("↑"))
        .end_symbol(Some("↓"));
    let mut scrollbar_state = ScrollbarState::new(total).position(position);
    f.render_stateful_widget(
        scrollbar,
        area.inner(Margin {
            horizontal: 0,
            vertical: 1,
        }),
        &mut scrollbar_state,
    );
}

/// 估算内容区域可见行数（总高度减去 header/进度/footer/边框）
pub fn visible_content_height(term_height: u16) -> usize {
    term_height.saturating_sub(11) as usize
}

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// 单行文本输入框，光标按字符计数，支持中英文混输
#[derive(Debug, Clone, Default)]
pub struct InputBox {
    content: String,
    cursor: usize,
}

impl InputBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在光标处插入字符
    pub fn insert(&mut self, c: char) {
        let byte_pos = self.char_to_byte_pos(self.cursor);
        self.content.insert(byte_pos, c);
        self.cursor += 1;
    }

    /// Backspace: 删除光标前的字符
    pub fn delete_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let start = self.char_to_byte_pos(self.cursor);
        let end = self.char_to_byte_pos(self.cursor + 1);
        self.content.drain(start..end);
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor < self.content.chars().count() {
            self.cursor += 1;
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// 去掉首尾空白后的内容，为空时返回 None
    pub fn submitted(&self) -> Option<String> {
        let trimmed = self.content.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn char_to_byte_pos(&self, char_pos: usize) -> usize {
        self.content
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len())
    }
}

/// 渲染输入框，光标处反色
pub fn render_input_box(f: &mut Frame, input: &InputBox, label: &str, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let chars: Vec<char> = input.content.chars().collect();
    let cursor = input.cursor.min(chars.len());
    let before: String = chars[..cursor].iter().collect();
    let cursor_char = chars.get(cursor).map_or(" ".to_string(), |c| c.to_string());
    let after: String = chars.iter().skip(cursor + 1).collect();

    let spans = vec![
        Span::styled(
            format!("{label} "),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(before, Style::default().fg(Color::White)),
        Span::styled(cursor_char, Style::default().fg(Color::Black).bg(Color::White)),
        Span::styled(after, Style::default().fg(Color::White)),
    ];
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editing_is_utf8_safe() {
        let mut input = InputBox::new();
        for c in "包wget".chars() {
            input.insert(c);
        }
        input.move_left();
        input.delete_back();
        assert_eq!(input.content(), "包wgt");
        input.move_right();
        input.move_right();
        input.move_right();
        input.insert('2');
        assert_eq!(input.content(), "包wgt2");
    }

    #[test]
    fn blank_input_is_not_submitted() {
        let mut input = InputBox::new();
        input.insert(' ');
        assert_eq!(input.submitted(), None);
        input.insert('j');
        input.insert('q');
        assert_eq!(input.submitted().as_deref(), Some("jq"));
    }
}

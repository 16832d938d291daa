//! 全局配色

use ratatui::style::Color;

/// 强调色（标题、选中项前缀）
pub const PINK: Color = Color::Rgb(245, 169, 184);
/// 次强调色（快捷键、进度条）
pub const BLUE: Color = Color::Rgb(91, 206, 250);
/// 选中行背景色
pub const SEL_BG: Color = Color::Rgb(45, 35, 55);
pub const BRIGHT_WHITE: Color = Color::Rgb(255, 255, 255);
/// 次要信息
pub const DIM: Color = Color::Rgb(130, 130, 140);
/// 运行中的服务、成功的步骤
pub const OK_GREEN: Color = Color::Rgb(120, 220, 140);
/// 过期包、失败的步骤
pub const WARN_RED: Color = Color::Rgb(240, 110, 110);

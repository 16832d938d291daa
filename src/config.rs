use crate::brew::MaintenanceConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// brew 可执行文件路径，未设置时自动检测
    pub brew_path: Option<PathBuf>,
    /// 允许 brew 在执行命令前自动更新
    pub allow_auto_update: bool,
    /// 维护结果中只显示主动安装的包
    pub show_only_intentionally_installed: bool,
    pub log_file: PathBuf,
    pub maintenance: MaintenanceConfig,
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            brew_path: None,
            allow_auto_update: false,
            show_only_intentionally_installed: true,
            log_file: home_dir().join(".cache/lian-brew/lian-brew.log"),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        home_dir().join(".config/lian-brew/config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件 {} 失败", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("配置文件 {} 格式错误", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// 保存配置（维护页勾选的步骤会写回这里）
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

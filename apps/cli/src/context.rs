//! CLI 配置与探测器连接
//!
//! CLI 自身的配置保存在 `<config_dir>/sls/cli.toml`，只记录默认安装文件等少量偏好。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sls_sdk::{DetectorSetup, ModuleGroup, ModuleGroupBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?;
    path.push("sls");
    path.push("cli.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// 默认探测器安装文件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_setup: Option<PathBuf>,

    /// 采集摘要的默认输出目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_dir: Option<PathBuf>,
}

impl CliConfig {
    /// 加载配置（文件不存在时返回默认值）
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid CLI config {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file()?)
    }
}

/// 确定要使用的安装文件：命令行参数优先，其次是 CLI 配置
pub fn resolve_setup_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    CliConfig::load()?.default_setup.ok_or_else(|| {
        anyhow::anyhow!("No detector setup given (use --setup or `sls-cli config set-default`)")
    })
}

pub fn load_setup(explicit: Option<&Path>) -> Result<DetectorSetup> {
    let path = resolve_setup_path(explicit)?;
    debug!("Using setup {}", path.display());
    DetectorSetup::load(&path).with_context(|| format!("Cannot load setup {}", path.display()))
}

/// 按安装文件建立模块组（获取会话锁）
pub fn open_group(setup: &DetectorSetup) -> Result<ModuleGroup> {
    ModuleGroupBuilder::from_setup(setup)
        .build()
        .with_context(|| format!("Cannot open detector {}", setup.detector_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cli.toml");

        assert_eq!(CliConfig::load_from(&path).unwrap(), CliConfig::default());

        let config = CliConfig {
            default_setup: Some(PathBuf::from("/etc/sls/eiger.toml")),
            summary_dir: None,
        };
        config.save_to(&path).unwrap();
        assert_eq!(CliConfig::load_from(&path).unwrap(), config);

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("summary_dir"));
    }

    #[test]
    fn test_invalid_cli_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        fs::write(&path, "default_setup = 42").unwrap();
        assert!(CliConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_explicit_setup_wins() {
        let path = resolve_setup_path(Some(Path::new("a.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("a.toml"));
    }
}

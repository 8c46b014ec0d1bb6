//! 配置管理命令
//!
//! - 加载参数文件到探测器
//! - 管理 CLI 默认安装文件
//! - 列出当前型号可用的参数

use crate::context::{CliConfig, config_file, load_setup, open_group, resolve_setup_path};
use anyhow::{Context, Result};
use clap::Subcommand;
use sls_sdk::ControlError;
use sls_sdk::driver::schema;
use std::path::{Path, PathBuf};

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 按文件顺序加载 `key value` 参数文件
    Load {
        /// 参数文件路径
        file: PathBuf,
    },

    /// 设置默认安装文件
    SetDefault {
        /// 安装文件路径
        setup: PathBuf,
    },

    /// 显示 CLI 配置和当前安装文件
    Show,

    /// 列出当前型号可用的参数
    Params,
}

impl ConfigCommand {
    pub fn execute(self, setup: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Load { file } => Self::load_(setup, &file),
            ConfigCommand::SetDefault { setup } => Self::set_default_(setup),
            ConfigCommand::Show => Self::show_(setup),
            ConfigCommand::Params => Self::params_(setup),
        }
    }

    fn load_(setup: Option<&Path>, file: &Path) -> Result<()> {
        let setup = load_setup(setup)?;
        let group = open_group(&setup)?;

        match group.load_config_file(file) {
            Ok(applied) => {
                println!("Applied {} parameters from {}", applied, file.display());
                Ok(())
            },
            Err(ControlError::Config {
                applied,
                unknown,
                rejected,
            }) => {
                println!("Applied {} parameters from {}", applied, file.display());
                for key in &unknown {
                    println!("  unknown key: {key}");
                }
                for entry in &rejected {
                    println!("  rejected: {entry}");
                }
                anyhow::bail!(
                    "{} unknown and {} rejected entries in {}",
                    unknown.len(),
                    rejected.len(),
                    file.display()
                )
            },
            Err(e) => Err(e).with_context(|| format!("Cannot load {}", file.display())),
        }
    }

    fn set_default_(setup: PathBuf) -> Result<()> {
        // 先确认文件可用
        let parsed = sls_sdk::DetectorSetup::load(&setup)
            .with_context(|| format!("Cannot load setup {}", setup.display()))?;
        let setup = setup.canonicalize().unwrap_or(setup);

        let mut config = CliConfig::load()?;
        config.default_setup = Some(setup.clone());
        config.save()?;
        println!(
            "Default setup: {} ({} {} modules)",
            setup.display(),
            parsed.modules.len(),
            parsed.kind
        );
        Ok(())
    }

    fn show_(setup: Option<&Path>) -> Result<()> {
        let config = CliConfig::load()?;
        println!("CLI config: {}", config_file()?.display());
        match &config.default_setup {
            Some(path) => println!("  default setup: {}", path.display()),
            None => println!("  default setup: (not set)"),
        }

        let Ok(path) = resolve_setup_path(setup) else {
            return Ok(());
        };
        let setup = load_setup(Some(&path))?;
        println!("Detector {} ({})", setup.detector_id, path.display());
        println!(
            "  {} x {} {} modules, request timeout {} ms",
            setup.geometry.rows, setup.geometry.cols, setup.kind, setup.request_timeout_ms
        );
        for (index, module) in setup.modules.iter().enumerate() {
            println!(
                "  [{}] {}{} -> {}{}",
                index,
                module.hostname,
                module.port.map(|p| format!(":{p}")).unwrap_or_default(),
                module.receiver.hostname,
                module.receiver.port.map(|p| format!(":{p}")).unwrap_or_default()
            );
        }
        Ok(())
    }

    fn params_(setup: Option<&Path>) -> Result<()> {
        let setup = load_setup(setup)?;
        println!("Parameters for {}:", setup.kind);
        for spec in schema::parameters_for(setup.kind) {
            let target = if spec.is_receiver() { "rx" } else { "module" };
            println!("  {:<20} {:<7} {}", spec.name, target, spec.description);
        }
        let dacs: Vec<&str> = setup.kind.dacs().iter().map(|dac| dac.name).collect();
        println!("  DACs: {}", dacs.join(", "));
        Ok(())
    }
}

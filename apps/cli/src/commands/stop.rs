//! 停止命令
//!
//! 不经过采集状态机，直接停止所有模块和接收器。用于清理其他进程遗留的运行。

use crate::context::{load_setup, open_group};
use anyhow::Result;
use clap::Args;
use sls_sdk::{ModuleEndpoint, ReceiverEndpoint};
use std::path::Path;

/// 停止命令参数
#[derive(Args, Debug)]
pub struct StopCommand {
    /// 同时清除错误掩码
    #[arg(long)]
    pub clear_errors: bool,
}

impl StopCommand {
    pub fn execute(&self, setup: Option<&Path>) -> Result<()> {
        let setup = load_setup(setup)?;
        let group = open_group(&setup)?;

        println!("Stopping {} modules...", group.len());
        let modules = group.apply_to_all(ModuleEndpoint::stop);
        let receivers = group.apply_to_receivers(ReceiverEndpoint::stop);

        let mut failed = modules.failed_indices();
        failed.extend(receivers.failed_indices());
        failed.sort_unstable();
        failed.dedup();

        if self.clear_errors {
            group.clear_error_masks()?;
        }

        if failed.is_empty() {
            println!("Stopped");
            Ok(())
        } else {
            anyhow::bail!("Stop failed on modules {:?}", failed)
        }
    }
}

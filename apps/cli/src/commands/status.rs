//! 状态命令

use crate::context::{load_setup, open_group};
use anyhow::Result;
use clap::Args;
use sls_sdk::DetectorReport;
use sls_sdk::client::{ClientId, HealthMonitor};
use std::path::Path;

/// 状态命令参数
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// 同时执行就绪检查（锁、可达性、错误掩码）
    #[arg(long)]
    pub check: bool,
}

impl StatusCommand {
    pub fn execute(&self, setup: Option<&Path>) -> Result<()> {
        let setup = load_setup(setup)?;
        let group = open_group(&setup)?;

        let report = DetectorReport::collect(&group);
        print!("{report}");

        if self.check {
            let monitor = HealthMonitor::new(ClientId::current(), setup.health);
            let readiness = monitor.check_ready(&group);
            for warning in readiness.warnings() {
                println!("warning: {warning}");
            }
            if !readiness.is_ready() {
                anyhow::bail!("Detector not ready: {readiness}");
            }
            println!("ready");
        }
        Ok(())
    }
}

//! 温度命令

use crate::context::{load_setup, open_group};
use anyhow::Result;
use clap::Args;
use sls_sdk::client::{ClientId, HealthMonitor};
use sls_sdk::{HealthEvent, ModuleGroup};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// 温度命令参数
#[derive(Args, Debug)]
pub struct TempsCommand {
    /// 持续监视的采样间隔（秒），不设置则只读取一次
    #[arg(short, long)]
    pub watch: Option<u64>,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl TempsCommand {
    pub fn execute(&self, setup: Option<&Path>) -> Result<()> {
        let setup = load_setup(setup)?;
        let group = open_group(&setup)?;
        let monitor = HealthMonitor::new(ClientId::current(), setup.health);

        let Some(interval) = self.watch else {
            return self.sample(&group, &monitor);
        };

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

        while running.load(Ordering::SeqCst) {
            self.sample(&group, &monitor)?;
            // 分段休眠，Ctrl-C 后尽快退出
            for _ in 0..interval.max(1) * 10 {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        Ok(())
    }

    fn sample(&self, group: &ModuleGroup, monitor: &HealthMonitor) -> Result<()> {
        let readings = group.temperatures().into_options(group.len());
        let events = monitor.sample_temperatures(group);

        if self.json {
            let modules: Vec<serde_json::Value> = readings
                .iter()
                .enumerate()
                .map(|(index, reading)| {
                    let sensors: serde_json::Map<String, serde_json::Value> = reading
                        .iter()
                        .flatten()
                        .map(|(sensor, celsius)| (sensor.to_string(), (*celsius).into()))
                        .collect();
                    serde_json::json!({ "index": index, "temperatures": sensors })
                })
                .collect();
            println!("{}", serde_json::to_string(&modules)?);
            return Ok(());
        }

        for (index, reading) in readings.iter().enumerate() {
            match reading {
                Some(values) => {
                    let text = values
                        .iter()
                        .map(|(sensor, celsius)| format!("{sensor}={celsius:.1}C"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    let flag = events
                        .iter()
                        .filter(|e| e.index() == index)
                        .map(|e| match e {
                            HealthEvent::TemperatureCritical { .. } => " CRITICAL",
                            HealthEvent::TemperatureWarning { .. } => " WARNING",
                            HealthEvent::Unreachable { .. } => "",
                        })
                        .next()
                        .unwrap_or("");
                    println!("[{index}] {text}{flag}");
                },
                None => println!("[{index}] unreachable"),
            }
        }
        Ok(())
    }
}

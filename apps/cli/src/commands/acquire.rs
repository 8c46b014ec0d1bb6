//! 采集命令
//!
//! configure → start → wait → collect，Ctrl-C 触发 abort。
//! 结束后可以把采集摘要写成 JSON。

use crate::context::{CliConfig, load_setup, open_group};
use anyhow::{Context, Result};
use clap::Args;
use sls_sdk::protocol::util::parse_duration;
use sls_sdk::{
    AcquisitionController, AcquisitionParams, ControllerConfig, DynamicRange, HealthEvent,
    RunSummary, TimingMode,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// 采集命令参数
#[derive(Args, Debug)]
pub struct AcquireCommand {
    /// 帧数
    #[arg(short = 'n', long, default_value_t = 1)]
    pub frames: u64,

    /// 曝光时间（如 `1ms`、`500us`，无单位按秒）
    #[arg(short, long, value_parser = parse_duration)]
    pub exposure: Duration,

    /// 帧周期（0 表示尽可能快）
    #[arg(short, long, value_parser = parse_duration, default_value = "0")]
    pub period: Duration,

    /// 触发模式：auto / trigger / gating / burst_trigger
    #[arg(long, default_value = "auto")]
    pub timing: TimingMode,

    /// 动态范围（位）
    #[arg(long)]
    pub dr: Option<DynamicRange>,

    /// 子曝光时间（仅 Eiger）
    #[arg(long, value_parser = parse_duration)]
    pub sub_exposure: Option<Duration>,

    /// 超时后强制结束
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// 接收器输出目录
    #[arg(long)]
    pub file_path: Option<PathBuf>,

    /// 接收器文件名前缀
    #[arg(long)]
    pub file_name: Option<String>,

    /// 采集摘要输出路径（JSON）
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// 在标准输出打印 JSON 摘要
    #[arg(long)]
    pub json: bool,
}

impl AcquireCommand {
    pub fn params(&self) -> AcquisitionParams {
        let mut params = AcquisitionParams::new(self.frames, self.exposure)
            .period(self.period)
            .timing_mode(self.timing);
        if let Some(dr) = self.dr {
            params = params.dynamic_range(dr);
        }
        if let Some(sub_exposure) = self.sub_exposure {
            params = params.sub_exposure(sub_exposure);
        }
        if let Some(timeout) = self.timeout {
            params = params.timeout(timeout);
        }
        params
    }

    /// 摘要输出路径：命令行参数优先，其次是 CLI 配置中的目录
    fn summary_path(&self, summary: &RunSummary) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.summary {
            return Ok(Some(path.clone()));
        }
        Ok(CliConfig::load()?.summary_dir.map(|dir| {
            dir.join(format!("{}-{}.json", summary.detector_id, summary.finished_at))
        }))
    }

    pub fn execute(&self, setup: Option<&Path>) -> Result<()> {
        let setup = load_setup(setup)?;
        let group = open_group(&setup)?;
        let params = self.params();
        params.validate(group.kind())?;

        if let Some(path) = &self.file_path {
            group.set_file_path(path).context("Cannot set receiver file path")?;
        }
        if let Some(name) = &self.file_name {
            group.set_file_name(name).context("Cannot set receiver file name")?;
        }

        let controller = Arc::new(AcquisitionController::new(
            group,
            ControllerConfig::from_setup(&setup),
        ));

        // Ctrl-C → abort（可以在 wait 期间并发调用）
        let handler_controller = Arc::clone(&controller);
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, aborting acquisition...");
            handler_controller.abort();
        })
        .context("Cannot install Ctrl-C handler")?;

        let events = controller.subscribe();
        thread::spawn(move || {
            for event in events {
                match event {
                    HealthEvent::TemperatureCritical {
                        index,
                        sensor,
                        celsius,
                    } => warn!("Module {} {} critical: {:.1} C", index, sensor, celsius),
                    HealthEvent::TemperatureWarning {
                        index,
                        sensor,
                        celsius,
                    } => warn!("Module {} {} high: {:.1} C", index, sensor, celsius),
                    HealthEvent::Unreachable { index } => warn!("Module {} not responding", index),
                }
            }
        });

        info!(
            "Acquiring {} frames on {} modules (expected {:?})",
            params.frames,
            controller.group().len(),
            params.expected_duration()
        );
        let run = controller.acquire(params)?;
        println!("{run}");
        for issue in &run.issues {
            println!("  {issue}");
        }

        let summary = RunSummary::from(&run);
        if self.json {
            println!("{}", summary.to_json_pretty()?);
        }
        if let Some(path) = self.summary_path(&summary)? {
            summary
                .write_json(&path)
                .with_context(|| format!("Cannot write summary {}", path.display()))?;
            info!("Summary written to {}", path.display());
        }

        if !run.outcome.is_success() {
            anyhow::bail!("Acquisition finished with {}", run.outcome);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: AcquireCommand,
    }

    #[test]
    fn test_parse_acquire_arguments() {
        let cli = Wrapper::parse_from([
            "acquire",
            "-n",
            "100",
            "--exposure",
            "1.5ms",
            "--period",
            "2ms",
            "--timing",
            "trigger",
            "--dr",
            "16",
            "--timeout",
            "10s",
        ]);
        let params = cli.args.params();
        assert_eq!(params.frames, 100);
        assert_eq!(params.exposure, Duration::from_micros(1500));
        assert_eq!(params.period, Duration::from_millis(2));
        assert_eq!(params.timing_mode, TimingMode::Trigger);
        assert_eq!(params.dynamic_range, Some(DynamicRange::Bit16));
        assert_eq!(params.timeout, Some(Duration::from_secs(10)));
        assert!(params.sub_exposure.is_none());
    }

    #[test]
    fn test_defaults() {
        let cli = Wrapper::parse_from(["acquire", "--exposure", "0.01"]);
        let params = cli.args.params();
        assert_eq!(params.frames, 1);
        assert_eq!(params.exposure, Duration::from_millis(10));
        assert_eq!(params.period, Duration::ZERO);
        assert_eq!(params.timing_mode, TimingMode::Auto);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        assert!(Wrapper::try_parse_from(["acquire", "--exposure", "fast"]).is_err());
    }
}

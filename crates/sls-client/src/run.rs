//! 采集参数与采集结果

use crate::error::{ControlError, Result};
use sls_protocol::util::format_duration;
use sls_protocol::{DynamicRange, ModuleKind, RunStatus, TimingMode};
use sls_tools::RunSummary;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 一次采集的参数
///
/// 所有模块写入相同的值。
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionParams {
    /// 帧数（至少 1）
    pub frames: u64,
    /// 曝光时间（大于 0）
    pub exposure: Duration,
    /// 帧周期（0 表示尽可能快）
    pub period: Duration,
    pub timing_mode: TimingMode,
    /// 不设置则保持模块当前值
    pub dynamic_range: Option<DynamicRange>,
    /// 仅 Eiger
    pub sub_exposure: Option<Duration>,
    /// 调用方超时：运行超过该时间后强制进入 Draining
    pub timeout: Option<Duration>,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            frames: 1,
            exposure: Duration::from_millis(1),
            period: Duration::ZERO,
            timing_mode: TimingMode::Auto,
            dynamic_range: None,
            sub_exposure: None,
            timeout: None,
        }
    }
}

impl AcquisitionParams {
    pub fn new(frames: u64, exposure: Duration) -> Self {
        Self {
            frames,
            exposure,
            ..Self::default()
        }
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn timing_mode(mut self, mode: TimingMode) -> Self {
        self.timing_mode = mode;
        self
    }

    pub fn dynamic_range(mut self, dr: DynamicRange) -> Self {
        self.dynamic_range = Some(dr);
        self
    }

    pub fn sub_exposure(mut self, sub_exposure: Duration) -> Self {
        self.sub_exposure = Some(sub_exposure);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 发送前的本地校验
    pub fn validate(&self, kind: ModuleKind) -> Result<()> {
        if self.frames == 0 {
            return Err(ControlError::InvalidParameter {
                name: "frames",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.exposure.is_zero() {
            return Err(ControlError::InvalidParameter {
                name: "exposure",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(dr) = self.dynamic_range
            && !kind.supports_dynamic_range(dr)
        {
            return Err(ControlError::InvalidParameter {
                name: "dynamic_range",
                reason: format!("{dr} bit is not supported by {kind}"),
            });
        }
        if self.sub_exposure.is_some() && !kind.supports_sub_exposure() {
            return Err(ControlError::InvalidParameter {
                name: "sub_exposure",
                reason: format!("not supported by {kind}"),
            });
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ControlError::InvalidParameter {
                name: "timeout",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// 自动触发模式下的预期采集时长
    pub fn expected_duration(&self) -> Duration {
        let frame_time = self.exposure.max(self.period);
        frame_time.saturating_mul(u32::try_from(self.frames).unwrap_or(u32::MAX))
    }
}

/// 采集结果分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// 帧数不足、设备报错、不可达或停止后仍卡在运行态的模块（升序）
    PartialFailure(Vec<usize>),
    Aborted,
    /// 调用方超时强制结束
    Timeout,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialFailure(_) => "partial_failure",
            RunOutcome::Aborted => "aborted",
            RunOutcome::Timeout => "timeout",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::PartialFailure(failed) => write!(f, "partial failure (modules {failed:?})"),
            other => f.write_str(other.name()),
        }
    }
}

/// 进入 Draining 的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// 所有模块回到空闲
    Completed,
    /// 调用方超时
    Timeout,
    Aborted,
}

/// `poll()` / `wait()` 的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running { status: RunStatus, elapsed: Duration },
    Draining(DrainReason),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

/// 一次采集的最终记录
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRun {
    pub detector_id: String,
    pub params: AcquisitionParams,
    /// 每个接收器收到的帧数（无法读取为 `None`）
    pub frames_caught: Vec<Option<u64>>,
    /// 从启动模块到进入 Draining 的时间
    pub elapsed: Duration,
    pub outcome: RunOutcome,
    pub file_paths: Vec<Option<PathBuf>>,
    /// 采集过程中记录的问题（abort/collect 失败、卡住的模块等）
    pub issues: Vec<String>,
}

impl AcquisitionRun {
    pub fn total_frames(&self) -> u64 {
        self.frames_caught.iter().flatten().sum()
    }
}

impl From<&AcquisitionRun> for RunSummary {
    fn from(run: &AcquisitionRun) -> Self {
        let nanos = |d: Duration| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        RunSummary {
            detector_id: run.detector_id.clone(),
            finished_at: RunSummary::now(),
            frames_requested: run.params.frames,
            exposure_ns: nanos(run.params.exposure),
            period_ns: nanos(run.params.period),
            timing_mode: run.params.timing_mode.to_string(),
            outcome: run.outcome.name().to_string(),
            failed_modules: match &run.outcome {
                RunOutcome::PartialFailure(failed) => failed.clone(),
                _ => Vec::new(),
            },
            frames_caught: run.frames_caught.clone(),
            elapsed_ms: u64::try_from(run.elapsed.as_millis()).unwrap_or(u64::MAX),
            file_paths: run
                .file_paths
                .iter()
                .map(|path| path.as_ref().map(|p| p.display().to_string()).unwrap_or_default())
                .collect(),
            issues: run.issues.clone(),
        }
    }
}

impl fmt::Display for AcquisitionRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} frames x {} in {} ({} caught)",
            self.outcome,
            self.params.frames,
            format_duration(self.params.exposure),
            format_duration(self.elapsed),
            self.total_frames()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let params = AcquisitionParams::new(10, Duration::from_millis(1));
        assert!(params.validate(ModuleKind::Eiger).is_ok());

        let params = AcquisitionParams::new(0, Duration::from_millis(1));
        assert!(matches!(
            params.validate(ModuleKind::Eiger),
            Err(ControlError::InvalidParameter { name: "frames", .. })
        ));

        let params = AcquisitionParams::new(1, Duration::from_millis(1))
            .sub_exposure(Duration::from_micros(100));
        assert!(params.validate(ModuleKind::Eiger).is_ok());
        assert!(matches!(
            params.validate(ModuleKind::Jungfrau),
            Err(ControlError::InvalidParameter { name: "sub_exposure", .. })
        ));

        let params = AcquisitionParams::new(1, Duration::from_millis(1))
            .dynamic_range(DynamicRange::Bit4);
        assert!(params.validate(ModuleKind::Jungfrau).is_err());
    }

    #[test]
    fn test_expected_duration() {
        let params = AcquisitionParams::new(10, Duration::from_millis(2))
            .period(Duration::from_millis(5));
        assert_eq!(params.expected_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_summary_from_run() {
        let run = AcquisitionRun {
            detector_id: "eiger-500k".into(),
            params: AcquisitionParams::new(10, Duration::from_millis(1)),
            frames_caught: vec![Some(10), None],
            elapsed: Duration::from_millis(15),
            outcome: RunOutcome::PartialFailure(vec![1]),
            file_paths: vec![Some(PathBuf::from("/data")), None],
            issues: vec!["module 1 unreachable".into()],
        };
        let summary = RunSummary::from(&run);
        assert_eq!(summary.outcome, "partial_failure");
        assert_eq!(summary.failed_modules, vec![1]);
        assert_eq!(summary.exposure_ns, 1_000_000);
        assert_eq!(summary.total_frames(), 10);
        assert!(!summary.is_success());
        assert_eq!(
            run.to_string(),
            "partial failure (modules [1]): 10 frames x 1ms in 15ms (10 caught)"
        );
    }
}

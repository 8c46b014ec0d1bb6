//! 探测器模块端点

use crate::error::DriverError;
use crate::link::Link;
use crate::metrics::MetricsSnapshot;
use crate::schema;
use arc_swap::ArcSwap;
use sls_protocol::kind::{HIGH_VOLTAGE_DAC, THRESHOLD_DAC};
use sls_protocol::util::{duration_to_ns, millidegrees_to_celsius, ns_to_duration};
use sls_protocol::{
    DacSpec, DetectorSettings, DynamicRange, ErrorMask, ModuleKind, Opcode, Payload, ReadoutSpeed,
    RunStatus, TemperatureSensor, TimerKind, TimingMode,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 模块最后一次已知状态
///
/// 每次成功读取状态、错误掩码或温度后更新；`start()`/`stop()` 会直接改写缓存的运行状态。
#[derive(Debug, Clone)]
pub struct ModuleSnapshot {
    pub status: RunStatus,
    pub error_mask: ErrorMask,
    pub lock_owner: Option<String>,
    pub temperatures: Vec<(TemperatureSensor, f64)>,
    pub updated_at: Option<Instant>,
}

impl Default for ModuleSnapshot {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            error_mask: ErrorMask::NONE,
            lock_owner: None,
            temperatures: Vec::new(),
            updated_at: None,
        }
    }
}

/// 单个探测器模块
///
/// 所有操作都是同步请求/响应；同一模块上的并发调用会被串行化。
pub struct ModuleEndpoint {
    link: Link,
    kind: ModuleKind,
    snapshot: ArcSwap<ModuleSnapshot>,
}

impl ModuleEndpoint {
    pub(crate) fn new(link: Link, kind: ModuleKind) -> Self {
        Self {
            link,
            kind,
            snapshot: ArcSwap::from_pointee(ModuleSnapshot::default()),
        }
    }

    // ------------------------------------------------------------------
    // 标识与本地状态
    // ------------------------------------------------------------------

    /// 端点地址（主机名:端口）
    pub fn hostname(&self) -> &str {
        self.link.endpoint()
    }

    /// 在探测器中的编号
    pub fn index(&self) -> usize {
        self.link.module_index() as usize
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn timeout(&self) -> Duration {
        self.link.timeout()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.link.metrics().snapshot()
    }

    /// 最近一次请求是否得到了响应
    pub fn is_connected(&self) -> bool {
        self.link.monitor().is_alive()
    }

    /// 最后一次已知状态（无锁读取）
    pub fn snapshot(&self) -> Arc<ModuleSnapshot> {
        self.snapshot.load_full()
    }

    /// 缓存的运行状态（不访问硬件）
    pub fn cached_status(&self) -> RunStatus {
        self.snapshot.load().status
    }

    fn update(&self, f: impl Fn(&mut ModuleSnapshot)) {
        self.snapshot.rcu(|current| {
            let mut next = ModuleSnapshot::clone(current);
            f(&mut next);
            next.updated_at = Some(Instant::now());
            next
        });
    }

    // ------------------------------------------------------------------
    // 状态与采集控制
    // ------------------------------------------------------------------

    /// 连通性探测
    pub fn ping(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::Ping, Payload::Empty).map(|_| ())
    }

    /// 读取运行状态
    pub fn status(&self) -> Result<RunStatus, DriverError> {
        let raw = self.link.call_int(Opcode::GetStatus, Payload::Empty)?;
        let status = RunStatus::from_wire(raw)?;
        self.update(|s| s.status = status);
        Ok(status)
    }

    /// 启动采集
    ///
    /// 成功后缓存状态置为 `Running`。
    pub fn start(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::StartAcquisition, Payload::Empty)?;
        self.update(|s| s.status = RunStatus::Running);
        debug!("{}: started", self.hostname());
        Ok(())
    }

    /// 停止采集
    ///
    /// 无论硬件是否确认，缓存状态都会被置为 `Idle`；
    /// 调用方需要在宽限期后重新读取 [`status`](Self::status) 以发现卡住的模块。
    pub fn stop(&self) -> Result<(), DriverError> {
        let result = self.link.call(Opcode::StopAcquisition, Payload::Empty);
        self.update(|s| s.status = RunStatus::Idle);
        if let Err(e) = &result {
            warn!("{}: stop not acknowledged: {}", self.hostname(), e);
        }
        result.map(|_| ())
    }

    pub fn error_mask(&self) -> Result<ErrorMask, DriverError> {
        let raw = self.link.call_int(Opcode::GetErrorMask, Payload::Empty)?;
        let mask = ErrorMask(raw as u64);
        self.update(|s| s.error_mask = mask);
        Ok(mask)
    }

    pub fn clear_error_mask(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::ClearErrorMask, Payload::Empty)?;
        self.update(|s| s.error_mask = ErrorMask::NONE);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 寄存器 / DAC / ADC
    // ------------------------------------------------------------------

    pub fn register(&self, addr: u32) -> Result<u32, DriverError> {
        let value = self
            .link
            .call_int(Opcode::GetRegister, Payload::Int(addr as i64))?;
        u32::try_from(value).map_err(|_| self.unexpected(format!("register value {value}")))
    }

    /// 写寄存器，返回回读值
    pub fn set_register(&self, addr: u32, value: u32) -> Result<u32, DriverError> {
        let readback = self.link.call_int(
            Opcode::SetRegister,
            Payload::Pair(addr as i64, value as i64),
        )?;
        u32::try_from(readback).map_err(|_| self.unexpected(format!("register value {readback}")))
    }

    fn dac_spec(&self, name: &str) -> Result<(u16, &'static DacSpec), DriverError> {
        self.kind.dac(name).ok_or_else(|| DriverError::Unsupported {
            kind: self.kind,
            what: format!("DAC '{name}'"),
        })
    }

    /// 读取 DAC
    pub fn dac(&self, name: &str) -> Result<i32, DriverError> {
        let (index, _) = self.dac_spec(name)?;
        let value = self.link.call_int(Opcode::GetDac, Payload::Int(index as i64))?;
        Ok(value as i32)
    }

    /// 设置 DAC，返回回读值
    pub fn set_dac(&self, name: &str, value: i32) -> Result<i32, DriverError> {
        let (index, spec) = self.dac_spec(name)?;
        if !spec.contains(value) {
            return Err(DriverError::invalid(
                name,
                format!("{value} outside {}..={}", spec.min, spec.max),
            ));
        }
        let readback = self
            .link
            .call_int(Opcode::SetDac, Payload::Pair(index as i64, value as i64))?;
        Ok(readback as i32)
    }

    /// 所有 DAC 的当前值（按型号 DAC 表顺序）
    pub fn dacs(&self) -> Result<Vec<(&'static str, i32)>, DriverError> {
        self.kind
            .dacs()
            .iter()
            .map(|spec| Ok((spec.name, self.dac(spec.name)?)))
            .collect()
    }

    /// 把所有 DAC 恢复为型号默认值（高压除外），返回写入的个数
    pub fn set_default_dacs(&self) -> Result<usize, DriverError> {
        let mut written = 0;
        for spec in self.kind.dacs() {
            if spec.name == HIGH_VOLTAGE_DAC {
                continue;
            }
            self.set_dac(spec.name, spec.default)?;
            written += 1;
        }
        info!("{}: {} DACs reset to defaults", self.hostname(), written);
        Ok(written)
    }

    /// 读取温度（摄氏度）
    pub fn temperature(&self, sensor: TemperatureSensor) -> Result<f64, DriverError> {
        if !self.kind.temperature_sensors().contains(&sensor) {
            return Err(DriverError::Unsupported {
                kind: self.kind,
                what: sensor.name().to_string(),
            });
        }
        let raw = self
            .link
            .call_int(Opcode::GetAdc, Payload::Int(u8::from(sensor) as i64))?;
        Ok(millidegrees_to_celsius(raw))
    }

    /// 读取该型号所有温度传感器
    pub fn temperatures(&self) -> Result<Vec<(TemperatureSensor, f64)>, DriverError> {
        let readings = self
            .kind
            .temperature_sensors()
            .iter()
            .map(|sensor| Ok((*sensor, self.temperature(*sensor)?)))
            .collect::<Result<Vec<_>, DriverError>>()?;
        let cached = readings.clone();
        self.update(move |s| s.temperatures = cached.clone());
        Ok(readings)
    }

    // ------------------------------------------------------------------
    // 采集参数
    // ------------------------------------------------------------------

    pub fn dynamic_range(&self) -> Result<DynamicRange, DriverError> {
        let raw = self
            .link
            .call_int(Opcode::GetDynamicRange, Payload::Empty)?;
        Ok(DynamicRange::try_from(raw)?)
    }

    pub fn set_dynamic_range(&self, dr: DynamicRange) -> Result<(), DriverError> {
        if !self.kind.supports_dynamic_range(dr) {
            return Err(DriverError::Unsupported {
                kind: self.kind,
                what: format!("dynamic range {dr}"),
            });
        }
        self.link
            .call(Opcode::SetDynamicRange, Payload::Int(dr.into()))?;
        Ok(())
    }

    fn timer(&self, timer: TimerKind) -> Result<i64, DriverError> {
        self.link
            .call_int(Opcode::GetTimer, Payload::Int(u8::from(timer) as i64))
    }

    fn set_timer(&self, timer: TimerKind, value: i64) -> Result<i64, DriverError> {
        self.link.call_int(
            Opcode::SetTimer,
            Payload::Pair(u8::from(timer) as i64, value),
        )
    }

    pub fn exposure_time(&self) -> Result<Duration, DriverError> {
        Ok(ns_to_duration(self.timer(TimerKind::Exposure)?)?)
    }

    /// 设置曝光时间（必须大于 0）
    pub fn set_exposure_time(&self, exposure: Duration) -> Result<(), DriverError> {
        if exposure.is_zero() {
            return Err(DriverError::invalid("exposure_time", "must be > 0"));
        }
        self.set_timer(TimerKind::Exposure, duration_to_ns(exposure))?;
        Ok(())
    }

    pub fn period(&self) -> Result<Duration, DriverError> {
        Ok(ns_to_duration(self.timer(TimerKind::Period)?)?)
    }

    /// 设置帧周期（0 表示尽可能快）
    pub fn set_period(&self, period: Duration) -> Result<(), DriverError> {
        self.set_timer(TimerKind::Period, duration_to_ns(period))?;
        Ok(())
    }

    pub fn frames(&self) -> Result<u64, DriverError> {
        let frames = self.timer(TimerKind::Frames)?;
        u64::try_from(frames).map_err(|_| self.unexpected(format!("frame count {frames}")))
    }

    /// 设置帧数（至少 1）
    pub fn set_frames(&self, frames: u64) -> Result<(), DriverError> {
        if frames == 0 {
            return Err(DriverError::invalid("frames", "must be >= 1"));
        }
        let frames = i64::try_from(frames)
            .map_err(|_| DriverError::invalid("frames", "too large"))?;
        self.set_timer(TimerKind::Frames, frames)?;
        Ok(())
    }

    fn require(&self, supported: bool, what: &str) -> Result<(), DriverError> {
        if supported {
            Ok(())
        } else {
            Err(DriverError::Unsupported {
                kind: self.kind,
                what: what.to_string(),
            })
        }
    }

    pub fn sub_exposure_time(&self) -> Result<Duration, DriverError> {
        self.require(self.kind.supports_sub_exposure(), "sub exposure time")?;
        Ok(ns_to_duration(self.timer(TimerKind::SubExposure)?)?)
    }

    pub fn set_sub_exposure_time(&self, sub_exposure: Duration) -> Result<(), DriverError> {
        self.require(self.kind.supports_sub_exposure(), "sub exposure time")?;
        if sub_exposure.is_zero() {
            return Err(DriverError::invalid("sub_exposure_time", "must be > 0"));
        }
        self.set_timer(TimerKind::SubExposure, duration_to_ns(sub_exposure))?;
        Ok(())
    }

    pub fn timing_mode(&self) -> Result<TimingMode, DriverError> {
        let raw = self.link.call_int(Opcode::GetTimingMode, Payload::Empty)?;
        Ok(TimingMode::from_wire(raw)?)
    }

    pub fn set_timing_mode(&self, mode: TimingMode) -> Result<(), DriverError> {
        self.link
            .call(Opcode::SetTimingMode, Payload::Int(u8::from(mode) as i64))?;
        Ok(())
    }

    pub fn readout_speed(&self) -> Result<ReadoutSpeed, DriverError> {
        self.require(self.kind.supports_readout_speed(), "readout speed")?;
        let raw = self
            .link
            .call_int(Opcode::GetReadoutSpeed, Payload::Empty)?;
        Ok(ReadoutSpeed::from_wire(raw)?)
    }

    pub fn set_readout_speed(&self, speed: ReadoutSpeed) -> Result<(), DriverError> {
        self.require(self.kind.supports_readout_speed(), "readout speed")?;
        self.link
            .call(Opcode::SetReadoutSpeed, Payload::Int(u8::from(speed) as i64))?;
        Ok(())
    }

    pub fn settings(&self) -> Result<DetectorSettings, DriverError> {
        let raw = self.link.call_int(Opcode::GetSettings, Payload::Empty)?;
        Ok(DetectorSettings::from_wire(raw)?)
    }

    pub fn set_settings(&self, settings: DetectorSettings) -> Result<(), DriverError> {
        self.link
            .call(Opcode::SetSettings, Payload::Int(u8::from(settings) as i64))?;
        Ok(())
    }

    /// 所有像素的 trimbit 值（不一致时设备返回 -1）
    pub fn trimbits(&self) -> Result<i32, DriverError> {
        self.require(self.kind.supports_trimbits(), "trimbits")?;
        Ok(self.link.call_int(Opcode::GetAllTrimbits, Payload::Empty)? as i32)
    }

    /// 把所有像素的 trimbit 设为同一值（0..=63）
    pub fn set_all_trimbits(&self, value: i32) -> Result<(), DriverError> {
        self.require(self.kind.supports_trimbits(), "trimbits")?;
        if !(0..=63).contains(&value) {
            return Err(DriverError::invalid("trimbits", format!("{value} outside 0..=63")));
        }
        self.link
            .call(Opcode::SetAllTrimbits, Payload::Int(value as i64))?;
        Ok(())
    }

    /// 读出后是否复位计数器矩阵
    pub fn counter_bit(&self) -> Result<bool, DriverError> {
        self.require(self.kind.supports_counter_bit(), "counter bit")?;
        Ok(self.link.call_int(Opcode::GetCounterBit, Payload::Empty)? != 0)
    }

    pub fn set_counter_bit(&self, enabled: bool) -> Result<(), DriverError> {
        self.require(self.kind.supports_counter_bit(), "counter bit")?;
        self.link
            .call(Opcode::SetCounterBit, Payload::Int(enabled as i64))?;
        Ok(())
    }

    pub fn power_chip(&self) -> Result<bool, DriverError> {
        self.require(self.kind.supports_power_chip(), "chip power")?;
        Ok(self.link.call_int(Opcode::GetPowerChip, Payload::Empty)? != 0)
    }

    pub fn set_power_chip(&self, on: bool) -> Result<(), DriverError> {
        self.require(self.kind.supports_power_chip(), "chip power")?;
        self.link.call(Opcode::SetPowerChip, Payload::Int(on as i64))?;
        Ok(())
    }

    /// 高压（伏特）
    pub fn high_voltage(&self) -> Result<i32, DriverError> {
        self.dac(HIGH_VOLTAGE_DAC)
    }

    pub fn set_high_voltage(&self, volts: i32) -> Result<(), DriverError> {
        self.set_dac(HIGH_VOLTAGE_DAC, volts)?;
        info!("{}: high voltage set to {} V", self.hostname(), volts);
        Ok(())
    }

    /// 阈值 DAC
    pub fn threshold(&self) -> Result<i32, DriverError> {
        self.dac(THRESHOLD_DAC)
    }

    pub fn set_threshold(&self, value: i32) -> Result<(), DriverError> {
        self.set_dac(THRESHOLD_DAC, value)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // 标识
    // ------------------------------------------------------------------

    pub fn firmware_version(&self) -> Result<i64, DriverError> {
        self.link
            .call_int(Opcode::GetFirmwareVersion, Payload::Empty)
    }

    pub fn software_version(&self) -> Result<i64, DriverError> {
        self.link
            .call_int(Opcode::GetSoftwareVersion, Payload::Empty)
    }

    /// 设备报告的型号
    pub fn detector_type(&self) -> Result<ModuleKind, DriverError> {
        let raw = self
            .link
            .call_int(Opcode::GetDetectorType, Payload::Empty)?;
        Ok(ModuleKind::from_wire(raw)?)
    }

    /// 单模块图像尺寸 (rows, cols)
    pub fn image_size(&self) -> Result<(u32, u32), DriverError> {
        let (rows, cols) = self
            .link
            .call(Opcode::GetImageSize, Payload::Empty)?
            .as_pair()?;
        match (u32::try_from(rows), u32::try_from(cols)) {
            (Ok(rows), Ok(cols)) => Ok((rows, cols)),
            _ => Err(self.unexpected(format!("image size {rows}x{cols}"))),
        }
    }

    // ------------------------------------------------------------------
    // 锁
    // ------------------------------------------------------------------

    /// 当前锁持有者
    pub fn lock_owner(&self) -> Result<Option<String>, DriverError> {
        let owner = self.link.call_text(Opcode::GetLockOwner, Payload::Empty)?;
        let owner = (!owner.is_empty()).then_some(owner);
        let cached = owner.clone();
        self.update(move |s| s.lock_owner = cached.clone());
        Ok(owner)
    }

    /// 以 `owner` 身份锁定模块（被他人锁定时设备返回 `LOCKED`）
    pub fn lock(&self, owner: &str) -> Result<(), DriverError> {
        self.link
            .call(Opcode::SetLock, Payload::Text(owner.to_string()))?;
        let cached = owner.to_string();
        self.update(move |s| s.lock_owner = Some(cached.clone()));
        Ok(())
    }

    /// 释放锁
    pub fn unlock(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::SetLock, Payload::Empty)?;
        self.update(|s| s.lock_owner = None);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 配置
    // ------------------------------------------------------------------

    /// 按顺序应用一组 `key value` 参数，返回应用成功的个数
    ///
    /// 未知参数和被拒绝的值不会中断后续参数；只要有任何一项未生效，
    /// 就返回 [`DriverError::Config`]，其中 `applied` 为已生效的个数。
    /// 端点不可达时立即返回。
    ///
    /// 接收器参数（如 `fpath`）对单个模块而言属于未知参数。
    pub fn load_configuration<'a, I>(&self, entries: I) -> Result<usize, DriverError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut applied = 0;
        let mut unknown = Vec::new();
        let mut rejected = Vec::new();

        for (key, value) in entries {
            let result = match schema::resolve(self.kind, key) {
                Some(schema::Resolved::Module(apply)) => apply(self, value),
                Some(schema::Resolved::Dac(name)) => value
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| DriverError::invalid(name, format!("'{value}' is not an integer")))
                    .and_then(|v| self.set_dac(name, v).map(|_| ())),
                Some(schema::Resolved::Receiver) | None => {
                    unknown.push(key.to_string());
                    continue;
                },
            };

            match result {
                Ok(()) => applied += 1,
                Err(e) if e.is_unreachable() => return Err(e),
                Err(e) => rejected.push(format!("{key}: {e}")),
            }
        }

        if unknown.is_empty() && rejected.is_empty() {
            debug!("{}: {} parameters applied", self.hostname(), applied);
            Ok(applied)
        } else {
            warn!(
                "{}: configuration incomplete ({} applied, {} unknown, {} rejected)",
                self.hostname(),
                applied,
                unknown.len(),
                rejected.len()
            );
            Err(DriverError::Config {
                applied,
                unknown,
                rejected,
            })
        }
    }

    fn unexpected(&self, detail: String) -> DriverError {
        DriverError::UnexpectedResponse {
            endpoint: self.hostname().to_string(),
            detail,
        }
    }
}

impl std::fmt::Debug for ModuleEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEndpoint")
            .field("hostname", &self.hostname())
            .field("index", &self.index())
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointBuilder;
    use sls_protocol::fault;
    use sls_transport::VirtualDetector;

    fn endpoint(detector: &VirtualDetector, index: usize) -> ModuleEndpoint {
        EndpointBuilder::new(format!("sim-module-{index}"))
            .index(index as u16)
            .kind(detector.kind())
            .timeout(Duration::from_millis(50))
            .transport(detector.module_transport(index))
            .build_module()
            .unwrap()
    }

    #[test]
    fn test_timer_round_trip() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);

        module.set_exposure_time(Duration::from_micros(500)).unwrap();
        module.set_period(Duration::from_millis(2)).unwrap();
        module.set_frames(42).unwrap();
        module.set_sub_exposure_time(Duration::from_micros(100)).unwrap();

        assert_eq!(module.exposure_time().unwrap(), Duration::from_micros(500));
        assert_eq!(module.period().unwrap(), Duration::from_millis(2));
        assert_eq!(module.frames().unwrap(), 42);
        assert_eq!(module.sub_exposure_time().unwrap(), Duration::from_micros(100));
    }

    #[test]
    fn test_local_validation_sends_nothing() {
        let detector = VirtualDetector::new(ModuleKind::Jungfrau, 1);
        let module = endpoint(&detector, 0);

        assert!(matches!(
            module.set_exposure_time(Duration::ZERO),
            Err(DriverError::InvalidValue { .. })
        ));
        assert!(matches!(
            module.set_frames(0),
            Err(DriverError::InvalidValue { .. })
        ));
        assert!(matches!(
            module.set_dynamic_range(DynamicRange::Bit32),
            Err(DriverError::Unsupported { .. })
        ));
        assert!(matches!(
            module.set_sub_exposure_time(Duration::from_millis(1)),
            Err(DriverError::Unsupported { .. })
        ));
        assert!(matches!(
            module.set_dac("vrf", 100),
            Err(DriverError::Unsupported { .. })
        ));
        assert!(detector.events().is_empty());
    }

    #[test]
    fn test_stop_forces_cached_idle() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);
        module.set_frames(1_000).unwrap();
        detector.module(0).set_stuck_running(true);

        module.start().unwrap();
        assert_eq!(module.cached_status(), RunStatus::Running);

        module.stop().unwrap();
        assert_eq!(module.cached_status(), RunStatus::Idle);
        // 硬件仍然报告运行
        assert_eq!(module.status().unwrap(), RunStatus::Running);
        assert_eq!(module.cached_status(), RunStatus::Running);
    }

    #[test]
    fn test_stop_unreachable_still_forces_idle() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);
        module.start().unwrap();
        detector.module(0).set_unreachable(true);

        assert!(module.stop().unwrap_err().is_unreachable());
        assert_eq!(module.cached_status(), RunStatus::Idle);
    }

    #[test]
    fn test_dacs_and_defaults() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);

        assert_eq!(module.set_dac("vrf", 3000).unwrap(), 3000);
        assert_eq!(module.dac("vrf").unwrap(), 3000);
        module.set_high_voltage(150).unwrap();

        let written = module.set_default_dacs().unwrap();
        assert_eq!(written, ModuleKind::Eiger.dacs().len() - 1);
        assert_eq!(module.dac("vrf").unwrap(), 3300);
        // 高压不受默认值恢复影响
        assert_eq!(module.high_voltage().unwrap(), 150);

        assert!(matches!(
            module.set_high_voltage(500),
            Err(DriverError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_temperatures_cached() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        detector
            .module(0)
            .set_temperature(TemperatureSensor::Fpga, 61_500);
        let module = endpoint(&detector, 0);

        assert_eq!(module.temperature(TemperatureSensor::Fpga).unwrap(), 61.5);
        let readings = module.temperatures().unwrap();
        assert_eq!(readings.len(), 8);
        assert_eq!(module.snapshot().temperatures, readings);
    }

    #[test]
    fn test_lock_and_unlock() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);

        assert_eq!(module.lock_owner().unwrap(), None);
        module.lock("me:1").unwrap();
        assert_eq!(module.lock_owner().unwrap().as_deref(), Some("me:1"));

        detector.module(0).set_lock_owner(Some("other:2"));
        assert_eq!(
            module.lock("me:1").unwrap_err().device_code(),
            Some(fault::LOCKED)
        );
        module.unlock().unwrap();
        assert_eq!(module.lock_owner().unwrap(), None);
    }

    #[test]
    fn test_identity_queries() {
        let detector = VirtualDetector::new(ModuleKind::Jungfrau, 1);
        let module = endpoint(&detector, 0);
        assert_eq!(module.detector_type().unwrap(), ModuleKind::Jungfrau);
        assert_eq!(module.image_size().unwrap(), (512, 1024));
        assert!(module.firmware_version().unwrap() > 0);
        module.set_power_chip(true).unwrap();
        assert!(module.power_chip().unwrap());
        assert_eq!(module.set_register(0x5e, 7).unwrap(), 7);
        assert_eq!(module.register(0x5e).unwrap(), 7);
    }

    #[test]
    fn test_load_configuration_reports_unknown_after_applying() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);

        let entries = [
            ("exptime", "1ms"),
            ("bogus", "1"),
            ("frames", "7"),
            ("vrf", "2800"),
            ("dr", "12"),
        ];
        match module.load_configuration(entries) {
            Err(DriverError::Config {
                applied,
                unknown,
                rejected,
            }) => {
                assert_eq!(applied, 3);
                assert_eq!(unknown, vec!["bogus".to_string()]);
                assert_eq!(rejected.len(), 1);
                assert!(rejected[0].starts_with("dr"));
            },
            other => panic!("expected Config error, got {other:?}"),
        }
        assert_eq!(module.frames().unwrap(), 7);
        assert_eq!(module.dac("vrf").unwrap(), 2800);
        assert_eq!(module.exposure_time().unwrap(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_configuration_all_known() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        let module = endpoint(&detector, 0);
        let applied = module
            .load_configuration([("dr", "32"), ("timing", "trigger"), ("period", "0.01")])
            .unwrap();
        assert_eq!(applied, 3);
        assert_eq!(module.dynamic_range().unwrap(), DynamicRange::Bit32);
        assert_eq!(module.timing_mode().unwrap(), TimingMode::Trigger);
        assert_eq!(module.period().unwrap(), Duration::from_millis(10));
    }
}

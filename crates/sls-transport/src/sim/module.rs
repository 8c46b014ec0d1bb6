//! 虚拟探测器模块

use super::SimDevice;
use parking_lot::Mutex;
use rand::Rng;
use sls_protocol::{
    DetectorSettings, DynamicRange, ErrorMask, Frame, ModuleKind, Opcode, Payload, ReadoutSpeed,
    RunStatus, TemperatureSensor, TimerKind, TimingMode, fault,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const FIRMWARE_VERSION: i64 = 0x23_10_30;
const SOFTWARE_VERSION: i64 = 0x07_00_01;
/// 默认板载温度（千分之一摄氏度）
const DEFAULT_TEMPERATURE: i64 = 42_000;

/// 一次采集的进度
#[derive(Debug, Clone, Copy)]
struct Run {
    started: Instant,
    frame_time: Duration,
    frames: u64,
    stopped_at: Option<Instant>,
}

impl Run {
    fn total(&self) -> Duration {
        self.frame_time.saturating_mul(self.frames.min(u32::MAX as u64) as u32)
    }

    fn frames_sent(&self, at: Instant) -> u64 {
        let end = match self.stopped_at {
            Some(stopped) => stopped.min(at),
            None => at,
        };
        let elapsed = end.saturating_duration_since(self.started);
        if self.frame_time.is_zero() {
            return self.frames;
        }
        let sent = elapsed.as_nanos() / self.frame_time.as_nanos();
        (sent.min(self.frames as u128)) as u64
    }

    fn finished(&self, at: Instant) -> bool {
        self.stopped_at.is_some() || at.saturating_duration_since(self.started) >= self.total()
    }
}

#[derive(Debug, Default)]
struct Faults {
    stuck_running: bool,
    start_failure: Option<i32>,
    reported_dynamic_range: Option<DynamicRange>,
    failing_opcodes: HashMap<Opcode, i32>,
}

#[derive(Debug)]
struct ModuleState {
    dynamic_range: DynamicRange,
    exposure_ns: i64,
    period_ns: i64,
    frames: i64,
    sub_exposure_ns: i64,
    timing_mode: TimingMode,
    readout_speed: ReadoutSpeed,
    settings: DetectorSettings,
    trimbits: i64,
    counter_bit: bool,
    power_chip: bool,
    registers: HashMap<u32, u32>,
    dacs: Vec<i32>,
    temperatures: HashMap<TemperatureSensor, i64>,
    temperature_jitter: i64,
    error_mask: ErrorMask,
    lock_owner: Option<String>,
    run: Option<Run>,
    end_marked: bool,
    time_scale: f64,
    faults: Faults,
}

/// 虚拟探测器模块
///
/// 状态在内部互斥锁保护下更新，可以同时被多个传输共享。
pub struct SimModule {
    name: String,
    kind: ModuleKind,
    reachable: AtomicBool,
    state: Mutex<ModuleState>,
}

impl SimModule {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        let dynamic_range = if kind.supports_dynamic_range(DynamicRange::Bit16) {
            DynamicRange::Bit16
        } else {
            kind.dynamic_ranges()[0]
        };
        let temperatures = kind
            .temperature_sensors()
            .iter()
            .map(|sensor| (*sensor, DEFAULT_TEMPERATURE))
            .collect();

        Self {
            name: name.into(),
            kind,
            reachable: AtomicBool::new(true),
            state: Mutex::new(ModuleState {
                dynamic_range,
                exposure_ns: 1_000_000,
                period_ns: 0,
                frames: 1,
                sub_exposure_ns: 2_621_440,
                timing_mode: TimingMode::Auto,
                readout_speed: ReadoutSpeed::Full,
                settings: DetectorSettings::Standard,
                trimbits: 0,
                counter_bit: true,
                power_chip: false,
                registers: HashMap::new(),
                dacs: kind.dacs().iter().map(|spec| spec.default).collect(),
                temperatures,
                temperature_jitter: 0,
                error_mask: ErrorMask::NONE,
                lock_owner: None,
                run: None,
                end_marked: false,
                time_scale: 1.0,
                faults: Faults::default(),
            }),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    // ------------------------------------------------------------------
    // 故障注入
    // ------------------------------------------------------------------

    /// 模拟网络中断（请求不再得到响应）
    pub fn set_unreachable(&self, unreachable: bool) {
        self.reachable.store(!unreachable, Ordering::SeqCst);
    }

    /// 模拟卡死：状态始终为运行，停止命令不生效
    pub fn set_stuck_running(&self, stuck: bool) {
        self.state.lock().faults.stuck_running = stuck;
    }

    /// 下一次及之后的启动命令返回故障码
    pub fn set_start_failure(&self, code: Option<i32>) {
        self.state.lock().faults.start_failure = code;
    }

    /// 读取动态范围时报告一个与实际写入值不同的值
    pub fn set_reported_dynamic_range(&self, dr: Option<DynamicRange>) {
        self.state.lock().faults.reported_dynamic_range = dr;
    }

    /// 指定操作码总是返回故障码
    pub fn fail_opcode(&self, opcode: Opcode, code: i32) {
        self.state.lock().faults.failing_opcodes.insert(opcode, code);
    }

    /// 设置某个传感器的温度（千分之一摄氏度）
    pub fn set_temperature(&self, sensor: TemperatureSensor, millidegrees: i64) {
        self.state.lock().temperatures.insert(sensor, millidegrees);
    }

    /// 温度读数随机抖动幅度（千分之一摄氏度）
    pub fn set_temperature_jitter(&self, millidegrees: i64) {
        self.state.lock().temperature_jitter = millidegrees.abs();
    }

    /// 在错误掩码上追加故障位
    pub fn inject_error_mask(&self, mask: ErrorMask) {
        self.state.lock().error_mask |= mask;
    }

    /// 以其他客户端的身份锁定模块
    pub fn set_lock_owner(&self, owner: Option<&str>) {
        self.state.lock().lock_owner = owner.map(str::to_string);
    }

    /// 时间流速倍数（> 1 时采集更快结束）
    pub fn set_time_scale(&self, scale: f64) {
        if scale.is_finite() && scale > 0.0 {
            self.state.lock().time_scale = scale;
        }
    }

    // ------------------------------------------------------------------
    // 供接收器和测试查询
    // ------------------------------------------------------------------

    /// 当前错误掩码
    pub fn error_mask(&self) -> ErrorMask {
        let mut state = self.state.lock();
        Self::refresh(&mut state, Instant::now());
        state.error_mask
    }

    /// 当前运行状态
    pub fn run_status(&self) -> RunStatus {
        let mut state = self.state.lock();
        let now = Instant::now();
        Self::refresh(&mut state, now);
        Self::status_at(&state, now)
    }

    /// 当前是否在采集
    pub fn is_running(&self) -> bool {
        self.run_status().is_active()
    }

    /// 在 `since` 之后开始的采集中，截至 `at` 已发出的帧数
    pub(crate) fn frames_sent_since(&self, since: Instant, at: Instant) -> u64 {
        let state = self.state.lock();
        match state.run {
            Some(run) if run.started >= since => run.frames_sent(at),
            _ => 0,
        }
    }

    /// 实际写入的动态范围（不受静默偏离开关影响）
    pub fn actual_dynamic_range(&self) -> DynamicRange {
        self.state.lock().dynamic_range
    }

    // ------------------------------------------------------------------
    // 内部实现
    // ------------------------------------------------------------------

    fn refresh(state: &mut ModuleState, now: Instant) {
        if let Some(run) = state.run
            && !state.end_marked
            && !state.faults.stuck_running
            && run.finished(now)
        {
            state.error_mask |= ErrorMask::END_OF_RUN;
            state.end_marked = true;
        }
    }

    fn status_at(state: &ModuleState, now: Instant) -> RunStatus {
        match state.run {
            _ if state.faults.stuck_running && state.run.is_some() => RunStatus::Running,
            Some(run) if !run.finished(now) => {
                if state.timing_mode.is_external() && run.frames_sent(now) == 0 {
                    RunStatus::Waiting
                } else {
                    RunStatus::Running
                }
            },
            _ => RunStatus::Idle,
        }
    }

    fn frame_time(state: &ModuleState) -> Duration {
        let ns = state.exposure_ns.max(state.period_ns).max(0) as f64 / state.time_scale;
        Duration::from_nanos(ns as u64)
    }

    fn start(&self, state: &mut ModuleState, now: Instant) -> Result<Payload, i32> {
        if let Some(code) = state.faults.start_failure {
            return Err(code);
        }
        if Self::status_at(state, now).is_active() {
            return Err(fault::BUSY);
        }
        state.run = Some(Run {
            started: now,
            frame_time: Self::frame_time(state),
            frames: state.frames.max(0) as u64,
            stopped_at: None,
        });
        state.end_marked = false;
        state.error_mask = state.error_mask.persistent();
        debug!("{}: acquisition started ({} frames)", self.name, state.frames);
        Ok(Payload::Empty)
    }

    fn stop(&self, state: &mut ModuleState, now: Instant) -> Payload {
        if state.faults.stuck_running {
            debug!("{}: stop ignored (stuck)", self.name);
            return Payload::Empty;
        }
        if let Some(run) = state.run.as_mut()
            && run.stopped_at.is_none()
            && !run.finished(now)
        {
            run.stopped_at = Some(now);
        }
        Self::refresh(state, now);
        Payload::Empty
    }

    fn temperature(&self, state: &ModuleState, sensor: TemperatureSensor) -> i64 {
        let base = state
            .temperatures
            .get(&sensor)
            .copied()
            .unwrap_or(DEFAULT_TEMPERATURE);
        if state.temperature_jitter == 0 {
            base
        } else {
            let jitter = state.temperature_jitter;
            base + rand::thread_rng().gen_range(-jitter..=jitter)
        }
    }

    fn set_timer(&self, state: &mut ModuleState, timer: TimerKind, value: i64) -> Result<(), i32> {
        match timer {
            TimerKind::Exposure if value > 0 => state.exposure_ns = value,
            TimerKind::Period if value >= 0 => state.period_ns = value,
            TimerKind::Frames if value >= 1 => state.frames = value,
            TimerKind::SubExposure if !self.kind.supports_sub_exposure() => {
                return Err(fault::UNSUPPORTED);
            },
            TimerKind::SubExposure if value > 0 => state.sub_exposure_ns = value,
            _ => return Err(fault::INVALID_ARGUMENT),
        }
        Ok(())
    }

    fn get_timer(&self, state: &ModuleState, timer: TimerKind) -> Result<i64, i32> {
        match timer {
            TimerKind::Exposure => Ok(state.exposure_ns),
            TimerKind::Period => Ok(state.period_ns),
            TimerKind::Frames => Ok(state.frames),
            TimerKind::SubExposure if self.kind.supports_sub_exposure() => {
                Ok(state.sub_exposure_ns)
            },
            TimerKind::SubExposure => Err(fault::UNSUPPORTED),
        }
    }

    fn dispatch(&self, state: &mut ModuleState, request: &Frame) -> Result<Payload, i32> {
        let now = Instant::now();
        Self::refresh(state, now);

        if let Some(code) = state.faults.failing_opcodes.get(&request.opcode) {
            return Err(*code);
        }
        if request.opcode.is_write() && Self::status_at(state, now).is_active() {
            return Err(fault::BUSY);
        }

        let kind = self.kind;
        let int = || request.payload.as_int().map_err(|_| fault::INVALID_ARGUMENT);
        let pair = || request.payload.as_pair().map_err(|_| fault::INVALID_ARGUMENT);

        match request.opcode {
            Opcode::Ping => Ok(Payload::Empty),
            Opcode::GetStatus => Ok(Payload::Int(u8::from(Self::status_at(state, now)) as i64)),
            Opcode::GetDetectorType => Ok(Payload::Int(u8::from(kind) as i64)),
            Opcode::GetFirmwareVersion => Ok(Payload::Int(FIRMWARE_VERSION)),
            Opcode::GetSoftwareVersion => Ok(Payload::Int(SOFTWARE_VERSION)),
            Opcode::GetImageSize => {
                let (rows, cols) = kind.module_image_size();
                Ok(Payload::Pair(rows as i64, cols as i64))
            },
            Opcode::GetErrorMask => Ok(Payload::Int(state.error_mask.bits() as i64)),
            Opcode::ClearErrorMask => {
                state.error_mask = ErrorMask::NONE;
                Ok(Payload::Empty)
            },
            Opcode::StartAcquisition => self.start(state, now),
            Opcode::StopAcquisition => Ok(self.stop(state, now)),

            Opcode::GetRegister => {
                let addr = u32::try_from(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                Ok(Payload::Int(
                    state.registers.get(&addr).copied().unwrap_or(0) as i64
                ))
            },
            Opcode::SetRegister => {
                let (addr, value) = pair()?;
                let addr = u32::try_from(addr).map_err(|_| fault::INVALID_ARGUMENT)?;
                let value = u32::try_from(value).map_err(|_| fault::INVALID_ARGUMENT)?;
                state.registers.insert(addr, value);
                Ok(Payload::Int(value as i64))
            },
            Opcode::GetDac => {
                let index = usize::try_from(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                state
                    .dacs
                    .get(index)
                    .map(|v| Payload::Int(*v as i64))
                    .ok_or(fault::INVALID_ARGUMENT)
            },
            Opcode::SetDac => {
                let (index, value) = pair()?;
                let index = usize::try_from(index).map_err(|_| fault::INVALID_ARGUMENT)?;
                let spec = kind.dacs().get(index).ok_or(fault::INVALID_ARGUMENT)?;
                let value = i32::try_from(value).map_err(|_| fault::INVALID_ARGUMENT)?;
                if !spec.contains(value) {
                    return Err(fault::INVALID_ARGUMENT);
                }
                state.dacs[index] = value;
                Ok(Payload::Int(value as i64))
            },
            Opcode::GetAdc => {
                let sensor =
                    TemperatureSensor::from_wire(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                if !kind.temperature_sensors().contains(&sensor) {
                    return Err(fault::UNSUPPORTED);
                }
                Ok(Payload::Int(self.temperature(state, sensor)))
            },

            Opcode::GetDynamicRange => {
                let dr = state
                    .faults
                    .reported_dynamic_range
                    .unwrap_or(state.dynamic_range);
                Ok(Payload::Int(dr.into()))
            },
            Opcode::SetDynamicRange => {
                let dr = DynamicRange::try_from(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                if !kind.supports_dynamic_range(dr) {
                    return Err(fault::INVALID_ARGUMENT);
                }
                state.dynamic_range = dr;
                Ok(Payload::Int(dr.into()))
            },
            Opcode::GetTimer => {
                let timer = TimerKind::from_wire(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                self.get_timer(state, timer).map(Payload::Int)
            },
            Opcode::SetTimer => {
                let (timer, value) = pair()?;
                let timer = TimerKind::from_wire(timer).map_err(|_| fault::INVALID_ARGUMENT)?;
                self.set_timer(state, timer, value)?;
                self.get_timer(state, timer).map(Payload::Int)
            },
            Opcode::GetTimingMode => Ok(Payload::Int(u8::from(state.timing_mode) as i64)),
            Opcode::SetTimingMode => {
                state.timing_mode =
                    TimingMode::from_wire(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                Ok(Payload::Int(u8::from(state.timing_mode) as i64))
            },
            Opcode::GetReadoutSpeed | Opcode::SetReadoutSpeed
                if !kind.supports_readout_speed() =>
            {
                Err(fault::UNSUPPORTED)
            },
            Opcode::GetReadoutSpeed => Ok(Payload::Int(u8::from(state.readout_speed) as i64)),
            Opcode::SetReadoutSpeed => {
                state.readout_speed =
                    ReadoutSpeed::from_wire(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                Ok(Payload::Int(u8::from(state.readout_speed) as i64))
            },
            Opcode::GetSettings => Ok(Payload::Int(u8::from(state.settings) as i64)),
            Opcode::SetSettings => {
                state.settings =
                    DetectorSettings::from_wire(int()?).map_err(|_| fault::INVALID_ARGUMENT)?;
                Ok(Payload::Int(u8::from(state.settings) as i64))
            },
            Opcode::GetAllTrimbits | Opcode::SetAllTrimbits if !kind.supports_trimbits() => {
                Err(fault::UNSUPPORTED)
            },
            Opcode::GetAllTrimbits => Ok(Payload::Int(state.trimbits)),
            Opcode::SetAllTrimbits => {
                let value = int()?;
                if !(0..=63).contains(&value) {
                    return Err(fault::INVALID_ARGUMENT);
                }
                state.trimbits = value;
                Ok(Payload::Int(value))
            },
            Opcode::GetCounterBit | Opcode::SetCounterBit if !kind.supports_counter_bit() => {
                Err(fault::UNSUPPORTED)
            },
            Opcode::GetCounterBit => Ok(Payload::Int(state.counter_bit as i64)),
            Opcode::SetCounterBit => {
                state.counter_bit = int()? != 0;
                Ok(Payload::Int(state.counter_bit as i64))
            },
            Opcode::GetPowerChip | Opcode::SetPowerChip if !kind.supports_power_chip() => {
                Err(fault::UNSUPPORTED)
            },
            Opcode::GetPowerChip => Ok(Payload::Int(state.power_chip as i64)),
            Opcode::SetPowerChip => {
                state.power_chip = int()? != 0;
                Ok(Payload::Int(state.power_chip as i64))
            },

            Opcode::GetLockOwner => Ok(Payload::Text(state.lock_owner.clone().unwrap_or_default())),
            Opcode::SetLock => match &request.payload {
                Payload::Empty => {
                    state.lock_owner = None;
                    Ok(Payload::Text(String::new()))
                },
                Payload::Text(owner) => match &state.lock_owner {
                    Some(current) if current != owner => Err(fault::LOCKED),
                    _ => {
                        state.lock_owner = Some(owner.clone());
                        Ok(Payload::Text(owner.clone()))
                    },
                },
                _ => Err(fault::INVALID_ARGUMENT),
            },

            _ => Err(fault::UNSUPPORTED),
        }
    }
}

impl SimDevice for SimModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn handle(&self, request: &Frame) -> Frame {
        let mut state = self.state.lock();
        match self.dispatch(&mut state, request) {
            Ok(payload) => Frame::ok(request, payload),
            Err(code) => {
                debug!("{}: {:?} rejected with code {}", self.name, request.opcode, code);
                Frame::device_error(request, code)
            },
        }
    }
}

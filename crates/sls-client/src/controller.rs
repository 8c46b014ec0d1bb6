//! 采集状态机
//!
//! ```text
//! Idle ──configure──▶ Configuring ──▶ Armed ──start──▶ Running ──poll──▶ Draining ──collect──▶ Idle
//!                          │            │                 │                  ▲
//!                          └────────────┴──── Error ◀─────┘                  │
//!                                               └────────── abort ───────────┘
//! ```
//!
//! - 控制器是唯一可以改变运行状态的组件；同一时刻只有一个状态转换（转换锁）
//! - `wait()` 每个轮询周期只持有一次转换锁，`abort()` 可以在任意线程调用，
//!   会立即唤醒 `wait()` 的休眠
//! - 接收器先于模块启动；任何一步失败都会回滚已经启动的部分

use crate::error::{ControlError, Result, StartPhase};
use crate::group::ModuleGroup;
use crate::health::{HealthEvent, HealthMonitor};
use crate::outcome::GroupOutcome;
use crate::run::{AcquisitionParams, AcquisitionRun, DrainReason, RunOutcome, RunState};
use crate::session::ClientId;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use sls_driver::{DriverError, ModuleEndpoint, ReceiverEndpoint};
use sls_protocol::{ReceiverStatus, RunStatus};
use sls_tools::{DetectorSetup, HealthThresholds};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Idle,
    Configuring,
    Armed,
    Running,
    Draining,
    Error,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Configuring => "configuring",
            ControllerState::Armed => "armed",
            ControllerState::Running => "running",
            ControllerState::Draining => "draining",
            ControllerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// 控制器配置
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// 运行状态轮询间隔
    pub poll_interval: Duration,
    /// 等待所有接收器进入监听的上限
    pub receiver_ready_timeout: Duration,
    /// 停止命令之后、重新检查卡住模块之前的宽限期
    pub stop_grace: Duration,
    /// 运行期间的温度采样间隔（`None` 不采样）
    pub temperature_interval: Option<Duration>,
    /// 设备锁使用的客户端身份
    pub client: ClientId,
    pub thresholds: HealthThresholds,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            receiver_ready_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_millis(500),
            temperature_interval: Some(Duration::from_secs(5)),
            client: ClientId::current(),
            thresholds: HealthThresholds::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_setup(setup: &DetectorSetup) -> Self {
        Self {
            poll_interval: setup.acquisition.poll_interval(),
            receiver_ready_timeout: setup.acquisition.receiver_ready_timeout(),
            stop_grace: setup.acquisition.stop_grace(),
            thresholds: setup.health,
            ..Self::default()
        }
    }
}

/// 当前这次采集的记录
#[derive(Debug)]
struct RunTracking {
    params: AcquisitionParams,
    started: Option<Instant>,
    deadline: Option<Instant>,
    finished: Option<Instant>,
    reason: Option<DrainReason>,
    modules_stopped: bool,
    receivers_stopped: bool,
    failed: BTreeSet<usize>,
    issues: Vec<String>,
    last_temperature_sample: Option<Instant>,
}

impl RunTracking {
    fn new(params: AcquisitionParams) -> Self {
        Self {
            params,
            started: None,
            deadline: None,
            finished: None,
            reason: None,
            modules_stopped: false,
            receivers_stopped: false,
            failed: BTreeSet::new(),
            issues: Vec::new(),
            last_temperature_sample: None,
        }
    }

    /// 记录一个问题（同样的描述只记录一次）
    fn note(&mut self, issue: String) {
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }

    /// 记录模块失败
    fn fail(&mut self, index: usize, issue: String) {
        if self.failed.insert(index) {
            warn!("Module {}: {}", index, issue);
        }
        self.note(format!("module {index}: {issue}"));
    }
}

struct Inner {
    state: ControllerState,
    run: RunTracking,
}

/// 采集控制器
///
/// 所有方法都接受 `&self`，可以放进 `Arc` 在多个线程之间共享
/// （例如在信号处理线程中调用 [`abort`](Self::abort)）。
pub struct AcquisitionController {
    group: ModuleGroup,
    config: ControllerConfig,
    health: HealthMonitor,
    inner: Mutex<Inner>,
    abort_requested: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl AcquisitionController {
    pub fn new(group: ModuleGroup, config: ControllerConfig) -> Self {
        let health = HealthMonitor::new(config.client.clone(), config.thresholds);
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            group,
            config,
            health,
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                run: RunTracking::new(AcquisitionParams::default()),
            }),
            abort_requested: AtomicBool::new(false),
            wake_tx,
            wake_rx,
        }
    }

    pub fn group(&self) -> &ModuleGroup {
        &self.group
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// 订阅运行期间的健康事件
    pub fn subscribe(&self) -> Receiver<HealthEvent> {
        self.health.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    fn transition(inner: &mut Inner, next: ControllerState) {
        if inner.state != next {
            info!("Controller: {} -> {}", inner.state, next);
            inner.state = next;
        }
    }

    fn require(inner: &Inner, expected: ControllerState, action: &'static str) -> Result<()> {
        if inner.state == expected {
            Ok(())
        } else {
            Err(ControlError::InvalidTransition {
                state: inner.state,
                action,
            })
        }
    }

    // ------------------------------------------------------------------
    // Idle → Configuring → Armed
    // ------------------------------------------------------------------

    /// 健康检查后把采集参数写入所有模块
    ///
    /// - 未就绪：回到 `Idle`，返回 `NotReady`
    /// - 部分模块失败：进入 `Error`，返回 `PartialFailure`
    /// - 成功：进入 `Armed`
    pub fn configure(&self, params: AcquisitionParams) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require(&inner, ControllerState::Idle, "configure")?;
        params.validate(self.group.kind())?;

        Self::transition(&mut inner, ControllerState::Configuring);
        let report = self.health.check_ready(&self.group);
        if !report.is_ready() {
            Self::transition(&mut inner, ControllerState::Idle);
            return Err(ControlError::NotReady(report));
        }

        let mut run = RunTracking::new(params);
        let params = &run.params;
        let mut failed = match self.group.apply_to_all(|m| apply_params(m, params)) {
            GroupOutcome::AllOk(_) => BTreeMap::new(),
            GroupOutcome::PartialFailure { failed, .. } => failed,
        };
        if let Err(ControlError::PartialFailure { failed: receivers }) =
            self.group.configure_streams()
        {
            for (index, error) in receivers {
                failed.entry(index).or_insert(error);
            }
        }

        if !failed.is_empty() {
            for (index, error) in &failed {
                run.fail(*index, format!("configure failed: {error}"));
            }
            inner.run = run;
            Self::transition(&mut inner, ControllerState::Error);
            return Err(ControlError::PartialFailure { failed });
        }

        debug!(
            "Configured {} frames, exposure {:?}, period {:?}, {}",
            run.params.frames, run.params.exposure, run.params.period, run.params.timing_mode
        );
        inner.run = run;
        Self::transition(&mut inner, ControllerState::Armed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Armed → Running
    // ------------------------------------------------------------------

    /// 启动采集：接收器 → 等待监听 → 模块
    ///
    /// 健康检查未通过时保持 `Armed` 且不启动任何设备。
    /// 其他失败会停止已经启动的接收器/模块并进入 `Error`。
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require(&inner, ControllerState::Armed, "start")?;

        let report = self.health.check_ready(&self.group);
        if !report.is_ready() {
            return Err(ControlError::NotReady(report));
        }

        // 接收器必须先确认
        if let GroupOutcome::PartialFailure { ok, failed } =
            self.group.apply_to_receivers(ReceiverEndpoint::start)
        {
            let started: Vec<usize> = ok.keys().copied().collect();
            self.stop_receivers(&mut inner.run, &started);
            return Self::fail_start(&mut inner, StartPhase::Receivers, failed);
        }

        let (timeout, interval) = (self.config.receiver_ready_timeout, self.config.poll_interval);
        let listening = self
            .group
            .apply_to_receivers(|r| r.wait_listening(timeout, interval));
        let not_listening: BTreeMap<usize, String> = match listening {
            GroupOutcome::AllOk(ready) => ready
                .into_iter()
                .enumerate()
                .filter(|(_, ready)| !ready)
                .map(|(index, _)| (index, format!("receiver not listening after {timeout:?}")))
                .collect(),
            GroupOutcome::PartialFailure { ok, failed } => ok
                .into_iter()
                .filter(|(_, ready)| !ready)
                .map(|(index, _)| (index, format!("receiver not listening after {timeout:?}")))
                .chain(failed.into_iter().map(|(index, e)| (index, e.to_string())))
                .collect(),
        };
        if !not_listening.is_empty() {
            let all: Vec<usize> = (0..self.group.len()).collect();
            self.stop_receivers(&mut inner.run, &all);
            for (index, issue) in &not_listening {
                inner.run.fail(*index, issue.clone());
            }
            let failed: Vec<usize> = not_listening.into_keys().collect();
            Self::transition(&mut inner, ControllerState::Error);
            return Err(ControlError::Start {
                phase: StartPhase::ReceiverReadiness,
                failed,
            });
        }

        if let GroupOutcome::PartialFailure { ok, failed } =
            self.group.apply_to_all(ModuleEndpoint::start)
        {
            let started: Vec<usize> = ok.keys().copied().collect();
            self.stop_modules(&mut inner.run, &started);
            let all: Vec<usize> = (0..self.group.len()).collect();
            self.stop_receivers(&mut inner.run, &all);
            return Self::fail_start(&mut inner, StartPhase::Modules, failed);
        }

        let now = Instant::now();
        inner.run.started = Some(now);
        inner.run.deadline = inner.run.params.timeout.map(|timeout| now + timeout);
        Self::transition(&mut inner, ControllerState::Running);
        Ok(())
    }

    fn fail_start(
        inner: &mut Inner,
        phase: StartPhase,
        failed: BTreeMap<usize, DriverError>,
    ) -> Result<()> {
        for (index, error) in &failed {
            inner.run.fail(*index, format!("{phase} failed: {error}"));
        }
        Self::transition(inner, ControllerState::Error);
        Err(ControlError::Start {
            phase,
            failed: failed.into_keys().collect(),
        })
    }

    /// 停止指定的接收器（尽力而为，失败只记录）
    fn stop_receivers(&self, run: &mut RunTracking, indices: &[usize]) {
        for (index, result) in self.group.apply_to_receivers_at(indices, ReceiverEndpoint::stop) {
            if let Err(e) = result {
                run.note(format!("receiver {index}: stop failed: {e}"));
            }
        }
        if indices.len() == self.group.len() {
            run.receivers_stopped = true;
        }
    }

    /// 停止指定的模块（尽力而为，失败只记录）
    fn stop_modules(&self, run: &mut RunTracking, indices: &[usize]) {
        for (index, result) in self.group.apply_to_modules(indices, ModuleEndpoint::stop) {
            if let Err(e) = result {
                run.note(format!("module {index}: stop failed: {e}"));
            }
        }
        if indices.len() == self.group.len() {
            run.modules_stopped = true;
        }
    }

    // ------------------------------------------------------------------
    // Running → Draining
    // ------------------------------------------------------------------

    /// 轮询一次运行状态
    ///
    /// 所有（可达的）模块回到空闲，或者超过调用方超时，进入 `Draining`。
    pub fn poll(&self) -> Result<RunState> {
        let mut inner = self.inner.lock();
        match inner.state {
            ControllerState::Running => {},
            ControllerState::Draining => {
                return Ok(RunState::Draining(
                    inner.run.reason.unwrap_or(DrainReason::Completed),
                ));
            },
            state => {
                return Err(ControlError::InvalidTransition {
                    state,
                    action: "poll",
                });
            },
        }

        if self.abort_requested.load(Ordering::SeqCst) {
            self.abort_locked(&mut inner);
            return Ok(RunState::Draining(DrainReason::Aborted));
        }

        let mut statuses = Vec::with_capacity(self.group.len());
        for (index, result) in self
            .group
            .apply_to_each(ModuleEndpoint::status)
            .into_iter()
            .enumerate()
        {
            match result {
                Ok(RunStatus::Error) => {
                    inner.run.fail(index, "module reported error status".to_string());
                    statuses.push(RunStatus::Error);
                },
                Ok(status) => statuses.push(status),
                Err(e) => inner.run.fail(index, e.to_string()),
            }
        }
        let modules = RunStatus::join(statuses.iter().copied());

        // 接收器在 collect 之前一直处于监听状态，只参与报告的状态，不决定何时排空
        let all: Vec<usize> = (0..self.group.len()).collect();
        for (index, result) in self
            .group
            .apply_to_receivers_at(&all, ReceiverEndpoint::status)
        {
            match result {
                Ok(ReceiverStatus::Listening) => statuses.push(RunStatus::Running),
                Ok(ReceiverStatus::Idle) => {
                    if modules.is_active() {
                        inner.run.fail(index, "receiver stopped listening".to_string());
                    }
                    statuses.push(RunStatus::Idle);
                },
                Ok(ReceiverStatus::Error) => {
                    inner.run.fail(index, "receiver reported error status".to_string());
                    statuses.push(RunStatus::Error);
                },
                Err(e) => inner.run.fail(index, format!("receiver: {e}")),
            }
        }
        let status = RunStatus::join(statuses);

        let now = Instant::now();
        let elapsed = inner
            .run
            .started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();

        if !modules.is_active() {
            return Ok(Self::drain(&mut inner, DrainReason::Completed, now));
        }
        if inner.run.deadline.is_some_and(|deadline| now >= deadline) {
            warn!("Acquisition timed out after {:?}", elapsed);
            return Ok(Self::drain(&mut inner, DrainReason::Timeout, now));
        }

        let sample_due = self.config.temperature_interval.is_some_and(|interval| {
            inner
                .run
                .last_temperature_sample
                .is_none_or(|last| now.saturating_duration_since(last) >= interval)
        });
        if sample_due {
            inner.run.last_temperature_sample = Some(now);
        }
        drop(inner);

        // 温度读取不持有转换锁，abort() 不必等待
        if sample_due {
            self.health.sample_temperatures(&self.group);
        }

        Ok(RunState::Running { status, elapsed })
    }

    fn drain(inner: &mut Inner, reason: DrainReason, now: Instant) -> RunState {
        inner.run.reason = Some(reason);
        inner.run.finished.get_or_insert(now);
        Self::transition(inner, ControllerState::Draining);
        RunState::Draining(reason)
    }

    /// 轮询直到进入 `Draining`
    ///
    /// 在两次轮询之间休眠 `poll_interval`，`abort()` 会立即唤醒。
    pub fn wait(&self) -> Result<RunState> {
        loop {
            let state = self.poll()?;
            if !state.is_running() {
                return Ok(state);
            }
            let _ = self.wake_rx.recv_timeout(self.config.poll_interval);
        }
    }

    // ------------------------------------------------------------------
    // abort
    // ------------------------------------------------------------------

    /// 中止当前采集（从不失败）
    ///
    /// 在 `Armed`、`Running`、`Configuring`、`Error` 下停止所有模块和接收器并进入 `Draining`；
    /// 失败只记录在本次采集的问题列表中。`Idle` 或已经 `Draining` 时什么都不做。
    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
        let mut inner = self.inner.lock();
        self.abort_locked(&mut inner);
    }

    fn abort_locked(&self, inner: &mut Inner) {
        match inner.state {
            ControllerState::Idle => {
                debug!("Abort ignored: controller idle");
                self.clear_abort();
                return;
            },
            ControllerState::Draining => {
                debug!("Abort ignored: already draining");
                return;
            },
            _ => {},
        }

        warn!("Aborting acquisition (state {})", inner.state);
        let all: Vec<usize> = (0..self.group.len()).collect();
        self.stop_modules(&mut inner.run, &all);
        self.stop_receivers(&mut inner.run, &all);
        Self::drain(inner, DrainReason::Aborted, Instant::now());
    }

    fn clear_abort(&self) {
        self.abort_requested.store(false, Ordering::SeqCst);
        while self.wake_rx.try_recv().is_ok() {}
    }

    // ------------------------------------------------------------------
    // Draining → Idle
    // ------------------------------------------------------------------

    /// 收尾并返回采集记录
    ///
    /// 1. 超时或中止时停止模块，宽限期后重新检查卡住的模块
    /// 2. 停止接收器，读取最终帧数
    /// 3. 清除只含瞬态位的错误掩码
    pub fn collect(&self) -> Result<AcquisitionRun> {
        let mut inner = self.inner.lock();
        Self::require(&inner, ControllerState::Draining, "collect")?;
        let all: Vec<usize> = (0..self.group.len()).collect();
        let reason = inner.run.reason.unwrap_or(DrainReason::Completed);
        let run = &mut inner.run;

        if reason != DrainReason::Completed {
            if !run.modules_stopped {
                self.stop_modules(run, &all);
            }
            thread::sleep(self.config.stop_grace);
            for (index, result) in self
                .group
                .apply_to_each(ModuleEndpoint::status)
                .into_iter()
                .enumerate()
            {
                match result {
                    Ok(status) if status.is_active() => {
                        run.fail(index, format!("still {status} after stop"));
                    },
                    Ok(_) => {},
                    Err(e) => run.fail(index, e.to_string()),
                }
            }
        }

        if !run.receivers_stopped {
            self.stop_receivers(run, &all);
        }

        let frames_caught: Vec<Option<u64>> = self
            .group
            .apply_to_receivers_at(&all, ReceiverEndpoint::frames_caught)
            .into_iter()
            .map(|(index, result)| match result {
                Ok(caught) => {
                    if caught < run.params.frames {
                        run.fail(
                            index,
                            format!("caught {} of {} frames", caught, run.params.frames),
                        );
                    }
                    Some(caught)
                },
                Err(e) => {
                    run.fail(index, format!("frame count unavailable: {e}"));
                    None
                },
            })
            .collect();

        for (index, result) in self
            .group
            .apply_to_each(ModuleEndpoint::error_mask)
            .into_iter()
            .enumerate()
        {
            match result {
                Ok(mask) if mask.is_transient_only() => {
                    if let Err(e) = self.group.modules()[index].clear_error_mask() {
                        run.note(format!("module {index}: clear error mask failed: {e}"));
                    }
                },
                Ok(mask) if !mask.is_empty() => run.fail(index, format!("error mask {mask}")),
                Ok(_) => {},
                Err(e) => run.fail(index, e.to_string()),
            }
        }

        let outcome = match reason {
            DrainReason::Aborted => RunOutcome::Aborted,
            DrainReason::Timeout => RunOutcome::Timeout,
            DrainReason::Completed if !run.failed.is_empty() => {
                RunOutcome::PartialFailure(run.failed.iter().copied().collect())
            },
            DrainReason::Completed => RunOutcome::Success,
        };
        let elapsed = match (run.started, run.finished) {
            (Some(started), Some(finished)) => finished.saturating_duration_since(started),
            _ => Duration::ZERO,
        };

        let finished = std::mem::replace(run, RunTracking::new(AcquisitionParams::default()));
        let result = AcquisitionRun {
            detector_id: self.group.detector_id().to_string(),
            params: finished.params,
            frames_caught,
            elapsed,
            outcome,
            file_paths: self.group.file_paths(),
            issues: finished.issues,
        };

        self.clear_abort();
        Self::transition(&mut inner, ControllerState::Idle);
        info!("Acquisition finished: {}", result);
        Ok(result)
    }

    /// configure → start → wait → collect
    ///
    /// 失败时先中止并收尾，控制器回到 `Idle` 后再返回错误。
    pub fn acquire(&self, params: AcquisitionParams) -> Result<AcquisitionRun> {
        let result = self
            .configure(params)
            .and_then(|_| self.start())
            .and_then(|_| self.wait());
        match result {
            Ok(_) => self.collect(),
            Err(e) => {
                self.abort();
                if self.state() == ControllerState::Draining {
                    let _ = self.collect();
                }
                Err(e)
            },
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        let state = self.inner.get_mut().state;
        if matches!(state, ControllerState::Armed | ControllerState::Running) {
            warn!("Controller dropped while {}, stopping detector", state);
            let all: Vec<usize> = (0..self.group.len()).collect();
            for (index, result) in self.group.apply_to_modules(&all, ModuleEndpoint::stop) {
                if let Err(e) = result {
                    warn!("Module {}: stop failed: {}", index, e);
                }
            }
            for (index, result) in self.group.apply_to_receivers_at(&all, ReceiverEndpoint::stop) {
                if let Err(e) = result {
                    warn!("Receiver {}: stop failed: {}", index, e);
                }
            }
        }
    }
}

fn apply_params(
    module: &ModuleEndpoint,
    params: &AcquisitionParams,
) -> std::result::Result<(), DriverError> {
    module.set_timing_mode(params.timing_mode)?;
    if let Some(dr) = params.dynamic_range {
        module.set_dynamic_range(dr)?;
    }
    module.set_exposure_time(params.exposure)?;
    module.set_period(params.period)?;
    module.set_frames(params.frames)?;
    if let Some(sub_exposure) = params.sub_exposure {
        module.set_sub_exposure_time(sub_exposure)?;
    }
    Ok(())
}

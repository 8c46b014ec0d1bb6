//! 模块组
//!
//! 一组模块（及各自配对的接收器）组成一台逻辑探测器。
//! 组内操作并行分发到每个成员，所有成员完成后（屏障）汇总为一个 [`GroupOutcome`]。
//!
//! 模块编号是所有 API 中唯一稳定的身份标识；组的大小和拓扑在构造后不可变。

use crate::error::{ControlError, Result};
use crate::geometry::Geometry;
use crate::outcome::GroupOutcome;
use crate::session::SessionLock;
use sls_driver::{
    DriverError, EndpointBuilder, MetricsSnapshot, ModuleEndpoint, ReceiverEndpoint, schema,
};
use sls_protocol::{
    DetectorSettings, DynamicRange, ErrorMask, ModuleKind, ReadoutSpeed, ReceiverStatus, RunStatus,
    StreamDestination, TemperatureSensor, TimingMode,
};
use sls_tools::{DetectorSetup, ParamEntry, read_params};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 在 `indices` 指定的成员上并行执行 `op`，按给出的顺序返回结果
fn fan_out<E, R, F>(endpoints: &[E], indices: &[usize], op: F) -> Vec<(usize, R)>
where
    E: Sync,
    R: Send,
    F: Fn(&E) -> R + Sync,
{
    let op = &op;
    thread::scope(|scope| {
        let handles: Vec<_> = indices
            .iter()
            .filter_map(|&index| endpoints.get(index).map(|endpoint| (index, endpoint)))
            .map(|(index, endpoint)| (index, scope.spawn(move || op(endpoint))))
            .collect();
        handles
            .into_iter()
            .map(|(index, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
                (index, result)
            })
            .collect()
    })
}

/// 一台逻辑探测器
pub struct ModuleGroup {
    detector_id: String,
    kind: ModuleKind,
    geometry: Geometry,
    modules: Vec<ModuleEndpoint>,
    receivers: Vec<ReceiverEndpoint>,
    streams: Vec<Option<StreamDestination>>,
    // 组存在期间独占探测器
    _session: Option<SessionLock>,
}

impl ModuleGroup {
    pub fn builder(kind: ModuleKind) -> ModuleGroupBuilder {
        ModuleGroupBuilder::new(kind)
    }

    pub fn detector_id(&self) -> &str {
        &self.detector_id
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module(&self, index: usize) -> Option<&ModuleEndpoint> {
        self.modules.get(index)
    }

    pub fn receiver(&self, index: usize) -> Option<&ReceiverEndpoint> {
        self.receivers.get(index)
    }

    pub fn modules(&self) -> &[ModuleEndpoint] {
        &self.modules
    }

    pub fn receivers(&self) -> &[ReceiverEndpoint] {
        &self.receivers
    }

    /// 按编号排列的模块地址
    pub fn hostnames(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.hostname().to_string()).collect()
    }

    /// 整个探测器的图像尺寸 (rows, cols)
    pub fn image_size(&self) -> (u32, u32) {
        self.geometry.image_size(self.kind)
    }

    /// 每个模块端点的请求指标
    pub fn metrics(&self) -> Vec<MetricsSnapshot> {
        self.modules.iter().map(ModuleEndpoint::metrics).collect()
    }

    /// 会话锁文件（构造时未加锁则为 `None`）
    pub fn session_path(&self) -> Option<&Path> {
        self._session.as_ref().map(SessionLock::path)
    }

    // ------------------------------------------------------------------
    // 扇出
    // ------------------------------------------------------------------

    /// 在每个模块上并行执行 `op`，按编号返回原始结果
    pub fn apply_to_each<R, F>(&self, op: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&ModuleEndpoint) -> R + Sync,
    {
        let indices: Vec<usize> = (0..self.modules.len()).collect();
        fan_out(&self.modules, &indices, op)
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    /// 在每个模块上执行 `op`（不短路）
    pub fn apply_to_all<T, F>(&self, op: F) -> GroupOutcome<T>
    where
        T: Send,
        F: Fn(&ModuleEndpoint) -> std::result::Result<T, DriverError> + Sync,
    {
        GroupOutcome::collect(self.apply_to_each(op))
    }

    /// 只在指定的模块上执行 `op`
    pub fn apply_to_modules<R, F>(&self, indices: &[usize], op: F) -> Vec<(usize, R)>
    where
        R: Send,
        F: Fn(&ModuleEndpoint) -> R + Sync,
    {
        fan_out(&self.modules, indices, op)
    }

    /// 在每个接收器上执行 `op`（不短路）
    pub fn apply_to_receivers<T, F>(&self, op: F) -> GroupOutcome<T>
    where
        T: Send,
        F: Fn(&ReceiverEndpoint) -> std::result::Result<T, DriverError> + Sync,
    {
        let indices: Vec<usize> = (0..self.receivers.len()).collect();
        GroupOutcome::collect(
            fan_out(&self.receivers, &indices, op)
                .into_iter()
                .map(|(_, result)| result),
        )
    }

    /// 只在指定的接收器上执行 `op`
    pub fn apply_to_receivers_at<R, F>(&self, indices: &[usize], op: F) -> Vec<(usize, R)>
    where
        R: Send,
        F: Fn(&ReceiverEndpoint) -> R + Sync,
    {
        fan_out(&self.receivers, indices, op)
    }

    fn apply_unit<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&ModuleEndpoint) -> std::result::Result<(), DriverError> + Sync,
    {
        self.apply_to_all(op).into_result().map(|_| ())
    }

    fn apply_receivers_unit<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&ReceiverEndpoint) -> std::result::Result<(), DriverError> + Sync,
    {
        self.apply_to_receivers(op).into_result().map(|_| ())
    }

    /// 读取每个模块并要求结果一致
    fn homogeneous<T, F>(&self, parameter: &'static str, op: F) -> Result<T>
    where
        T: PartialEq + fmt::Display + Send,
        F: Fn(&ModuleEndpoint) -> std::result::Result<T, DriverError> + Sync,
    {
        let values = self.apply_to_all(op).into_result()?;
        let consistent = values.windows(2).all(|pair| pair[0] == pair[1]);
        if !consistent {
            let values: Vec<(usize, String)> = values
                .iter()
                .enumerate()
                .map(|(index, value)| (index, value.to_string()))
                .collect();
            warn!("Inconsistent {} across modules: {:?}", parameter, values);
            return Err(ControlError::InconsistentState { parameter, values });
        }
        values
            .into_iter()
            .next()
            .ok_or_else(|| ControlError::Setup("empty module group".to_string()))
    }

    // ------------------------------------------------------------------
    // 状态
    // ------------------------------------------------------------------

    /// 每个模块的运行状态
    pub fn statuses(&self) -> GroupOutcome<RunStatus> {
        self.apply_to_all(ModuleEndpoint::status)
    }

    /// 所有模块运行状态的合并结果
    pub fn run_status(&self) -> Result<RunStatus> {
        Ok(RunStatus::join(self.statuses().into_result()?))
    }

    /// 探测器的逻辑状态：模块状态与接收器状态合并
    ///
    /// 只有所有模块和所有接收器都空闲时才是 `Idle`。
    pub fn detector_status(&self) -> Result<RunStatus> {
        let modules = self.statuses().into_result()?;
        let receivers = self.apply_to_receivers(ReceiverEndpoint::status).into_result()?;
        let receivers = receivers.into_iter().map(|status| match status {
            ReceiverStatus::Idle => RunStatus::Idle,
            ReceiverStatus::Listening => RunStatus::Running,
            ReceiverStatus::Error => RunStatus::Error,
        });
        Ok(RunStatus::join(modules.into_iter().chain(receivers)))
    }

    pub fn error_masks(&self) -> GroupOutcome<ErrorMask> {
        self.apply_to_all(ModuleEndpoint::error_mask)
    }

    pub fn clear_error_masks(&self) -> Result<()> {
        self.apply_unit(ModuleEndpoint::clear_error_mask)
    }

    /// 每个模块的温度读数
    pub fn temperatures(&self) -> GroupOutcome<Vec<(TemperatureSensor, f64)>> {
        self.apply_to_all(ModuleEndpoint::temperatures)
    }

    /// 每个接收器的帧计数（失败为 `None`）
    pub fn frames_caught(&self) -> Vec<Option<u64>> {
        self.apply_to_receivers(ReceiverEndpoint::frames_caught)
            .into_options(self.len())
    }

    // ------------------------------------------------------------------
    // 必须一致的采集参数
    // ------------------------------------------------------------------

    pub fn dynamic_range(&self) -> Result<DynamicRange> {
        self.homogeneous("dynamic_range", ModuleEndpoint::dynamic_range)
    }

    pub fn set_dynamic_range(&self, dr: DynamicRange) -> Result<()> {
        self.apply_unit(|m| m.set_dynamic_range(dr))
    }

    pub fn exposure_time(&self) -> Result<Duration> {
        self.homogeneous("exposure_time", |m| {
            m.exposure_time().map(DisplayDuration)
        })
        .map(|d| d.0)
    }

    pub fn set_exposure_time(&self, exposure: Duration) -> Result<()> {
        self.apply_unit(|m| m.set_exposure_time(exposure))
    }

    pub fn period(&self) -> Result<Duration> {
        self.homogeneous("period", |m| m.period().map(DisplayDuration))
            .map(|d| d.0)
    }

    pub fn set_period(&self, period: Duration) -> Result<()> {
        self.apply_unit(|m| m.set_period(period))
    }

    pub fn frames(&self) -> Result<u64> {
        self.homogeneous("frames", ModuleEndpoint::frames)
    }

    pub fn set_frames(&self, frames: u64) -> Result<()> {
        self.apply_unit(|m| m.set_frames(frames))
    }

    pub fn timing_mode(&self) -> Result<TimingMode> {
        self.homogeneous("timing_mode", ModuleEndpoint::timing_mode)
    }

    pub fn set_timing_mode(&self, mode: TimingMode) -> Result<()> {
        self.apply_unit(|m| m.set_timing_mode(mode))
    }

    pub fn sub_exposure_time(&self) -> Result<Duration> {
        self.homogeneous("sub_exposure_time", |m| {
            m.sub_exposure_time().map(DisplayDuration)
        })
        .map(|d| d.0)
    }

    pub fn set_sub_exposure_time(&self, sub_exposure: Duration) -> Result<()> {
        self.apply_unit(|m| m.set_sub_exposure_time(sub_exposure))
    }

    pub fn set_readout_speed(&self, speed: ReadoutSpeed) -> Result<()> {
        self.apply_unit(|m| m.set_readout_speed(speed))
    }

    pub fn set_settings(&self, settings: DetectorSettings) -> Result<()> {
        self.apply_unit(|m| m.set_settings(settings))
    }

    pub fn set_high_voltage(&self, volts: i32) -> Result<()> {
        self.apply_unit(|m| m.set_high_voltage(volts))
    }

    pub fn set_threshold(&self, value: i32) -> Result<()> {
        self.apply_unit(|m| m.set_threshold(value))
    }

    pub fn set_all_trimbits(&self, value: i32) -> Result<()> {
        self.apply_unit(|m| m.set_all_trimbits(value))
    }

    // ------------------------------------------------------------------
    // DAC
    // ------------------------------------------------------------------

    /// 每个模块的 DAC 值（不要求一致）
    pub fn dac(&self, name: &str) -> Result<Vec<i32>> {
        self.apply_to_all(|m| m.dac(name)).into_result()
    }

    pub fn set_dac_all(&self, name: &str, value: i32) -> Result<()> {
        self.apply_unit(|m| m.set_dac(name, value).map(|_| ()))
    }

    /// 所有模块的 DAC 恢复为型号默认值
    pub fn set_default_dacs(&self) -> Result<()> {
        self.apply_unit(|m| m.set_default_dacs().map(|_| ()))
    }

    // ------------------------------------------------------------------
    // 接收器
    // ------------------------------------------------------------------

    /// 把安装文件中的数据流目的地下发给接收器
    pub fn configure_streams(&self) -> Result<()> {
        if self.streams.iter().all(Option::is_none) {
            return Ok(());
        }
        self.apply_receivers_unit(|r| match self.streams.get(r.index()).copied().flatten() {
            Some(dest) => r.configure_destination(dest.ip, dest.mac, dest.port),
            None => Ok(()),
        })
    }

    pub fn set_file_path(&self, path: &Path) -> Result<()> {
        self.apply_receivers_unit(|r| r.set_file_path(path))
    }

    pub fn file_paths(&self) -> Vec<Option<PathBuf>> {
        self.apply_to_receivers(ReceiverEndpoint::file_path)
            .into_options(self.len())
    }

    pub fn set_file_name(&self, name: &str) -> Result<()> {
        self.apply_receivers_unit(|r| r.set_file_name(name))
    }

    pub fn set_file_index(&self, index: u64) -> Result<()> {
        self.apply_receivers_unit(|r| r.set_file_index(index))
    }

    pub fn set_file_write(&self, enabled: bool) -> Result<()> {
        self.apply_receivers_unit(|r| r.set_file_write(enabled))
    }

    pub fn set_streaming(&self, enabled: bool) -> Result<()> {
        self.apply_receivers_unit(|r| r.set_streaming(enabled))
    }

    // ------------------------------------------------------------------
    // 设备锁
    // ------------------------------------------------------------------

    pub fn lock_all(&self, owner: &str) -> Result<()> {
        self.apply_unit(|m| m.lock(owner))
    }

    pub fn unlock_all(&self) -> Result<()> {
        self.apply_unit(ModuleEndpoint::unlock)
    }

    // ------------------------------------------------------------------
    // 配置
    // ------------------------------------------------------------------

    /// 按文件顺序应用参数
    ///
    /// 每个条目并行下发到它适用的模块（或接收器）后才处理下一条。
    /// 某个成员不可达或返回设备错误后，后续条目不再发给它。
    /// 已生效的参数不会回滚。
    ///
    /// # 返回
    /// 在所有目标上都生效的条目数。
    ///
    /// # 错误
    /// - `PartialFailure`：有成员失败
    /// - `Config`：存在未知键或被拒绝的值（其余条目已应用）
    pub fn load_configuration(&self, entries: &[ParamEntry]) -> Result<usize> {
        let mut applied = 0;
        let mut unknown: Vec<String> = Vec::new();
        let mut rejected = Vec::new();
        let mut failed: BTreeMap<usize, DriverError> = BTreeMap::new();

        for entry in entries {
            if let Some(index) = entry.module
                && index >= self.len()
            {
                rejected.push(format!("line {}: no module {}", entry.line, index));
                continue;
            }

            let key = entry.key.as_str();
            let receiver_key = schema::is_receiver_parameter(key);
            if !receiver_key && schema::lookup(key).is_none() && self.kind.dac(key).is_none() {
                if !unknown.contains(&entry.key) {
                    unknown.push(entry.key.clone());
                }
                continue;
            }

            let targets: Vec<usize> = (0..self.len())
                .filter(|index| entry.applies_to(*index) && !failed.contains_key(index))
                .collect();
            if targets.is_empty() {
                continue;
            }

            let pair = [(key, entry.value.as_str())];
            let results = if receiver_key {
                self.apply_to_receivers_at(&targets, |r| r.load_configuration(pair))
            } else {
                self.apply_to_modules(&targets, |m| m.load_configuration(pair))
            };

            let mut entry_ok = true;
            for (index, result) in results {
                match result {
                    Ok(_) => {},
                    Err(DriverError::Config {
                        unknown: keys,
                        rejected: reasons,
                        ..
                    }) => {
                        entry_ok = false;
                        // 某型号不支持的键
                        for key in keys {
                            rejected.push(format!("line {} module {}: {} unsupported", entry.line, index, key));
                        }
                        for reason in reasons {
                            rejected.push(format!("line {} module {}: {}", entry.line, index, reason));
                        }
                    },
                    Err(e) => {
                        entry_ok = false;
                        warn!("Module {}: {} failed: {}", index, entry.key, e);
                        failed.insert(index, e);
                    },
                }
            }
            if entry_ok {
                applied += 1;
            }
        }

        info!(
            "Configuration: {} applied, {} unknown, {} rejected, {} modules failed",
            applied,
            unknown.len(),
            rejected.len(),
            failed.len()
        );
        if !unknown.is_empty() {
            warn!("Unknown configuration keys: {:?}", unknown);
        }
        for reason in &rejected {
            warn!("Rejected: {}", reason);
        }

        if !failed.is_empty() {
            return Err(ControlError::PartialFailure { failed });
        }
        if unknown.is_empty() && rejected.is_empty() {
            Ok(applied)
        } else {
            Err(ControlError::Config {
                applied,
                unknown,
                rejected,
            })
        }
    }

    /// 读取参数文件并应用
    pub fn load_config_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let entries = read_params(path.as_ref())?;
        debug!("Loaded {} entries from {}", entries.len(), path.as_ref().display());
        self.load_configuration(&entries)
    }
}

impl fmt::Debug for ModuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleGroup")
            .field("detector_id", &self.detector_id)
            .field("kind", &self.kind)
            .field("geometry", &self.geometry)
            .field("modules", &self.hostnames())
            .finish()
    }
}

/// 以 `format_duration` 输出的 `Duration`
#[derive(PartialEq)]
struct DisplayDuration(Duration);

impl fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sls_protocol::util::format_duration(self.0))
    }
}

enum Member {
    Address {
        module: String,
        receiver: String,
        stream: Option<StreamDestination>,
    },
    Endpoints {
        module: Box<ModuleEndpoint>,
        receiver: Box<ReceiverEndpoint>,
        stream: Option<StreamDestination>,
    },
}

/// [`ModuleGroup`] 构建器
///
/// ```rust,no_run
/// # use sls_client::ModuleGroupBuilder;
/// # use sls_protocol::ModuleKind;
/// let group = ModuleGroupBuilder::new(ModuleKind::Eiger)
///     .detector_id("eiger-500k")
///     .geometry(1, 2)
///     .add_module("beb031", "pc1875:1954")
///     .add_module("beb032", "pc1875:1955")
///     .build()?;
/// # Ok::<(), sls_client::ControlError>(())
/// ```
pub struct ModuleGroupBuilder {
    kind: ModuleKind,
    detector_id: String,
    geometry: Option<(usize, usize)>,
    timeout: Duration,
    session_dir: Option<PathBuf>,
    lock_session: bool,
    members: Vec<Member>,
}

impl ModuleGroupBuilder {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            detector_id: "0".to_string(),
            geometry: None,
            timeout: sls_driver::DEFAULT_TIMEOUT,
            session_dir: None,
            lock_session: true,
            members: Vec::new(),
        }
    }

    /// 从安装文件创建
    pub fn from_setup(setup: &DetectorSetup) -> Self {
        let mut builder = Self::new(setup.kind)
            .detector_id(&setup.detector_id)
            .geometry(setup.geometry.rows, setup.geometry.cols)
            .timeout(setup.request_timeout());
        if let Some(dir) = &setup.session_dir {
            builder = builder.session_dir(dir);
        }
        for module in &setup.modules {
            let address = |host: &str, port: Option<u16>| match port {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            let stream = module
                .receiver
                .stream
                .map(|s| StreamDestination::new(s.ip, s.mac, s.port));
            builder.members.push(Member::Address {
                module: address(&module.hostname, module.port),
                receiver: address(&module.receiver.hostname, module.receiver.port),
                stream,
            });
        }
        builder
    }

    /// 会话锁使用的探测器编号（默认 "0"）
    pub fn detector_id(mut self, id: impl Into<String>) -> Self {
        self.detector_id = id.into();
        self
    }

    /// 模块排布（默认单行）
    pub fn geometry(mut self, rows: usize, cols: usize) -> Self {
        self.geometry = Some((rows, cols));
        self
    }

    /// 单个请求的超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 会话锁文件目录（默认系统临时目录）
    pub fn session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }

    /// 不获取会话锁
    pub fn without_session_lock(mut self) -> Self {
        self.lock_session = false;
        self
    }

    /// 添加模块及其接收器（`host` 或 `host:port`）
    pub fn add_module(mut self, module: impl Into<String>, receiver: impl Into<String>) -> Self {
        self.members.push(Member::Address {
            module: module.into(),
            receiver: receiver.into(),
            stream: None,
        });
        self
    }

    /// 添加已经构建好的端点
    ///
    /// 端点编号必须等于它在组内的位置。
    pub fn add_endpoints(mut self, module: ModuleEndpoint, receiver: ReceiverEndpoint) -> Self {
        self.members.push(Member::Endpoints {
            module: Box::new(module),
            receiver: Box::new(receiver),
            stream: None,
        });
        self
    }

    /// 为最后添加的模块设置数据流目的地
    pub fn stream(mut self, destination: StreamDestination) -> Self {
        if let Some(member) = self.members.last_mut() {
            match member {
                Member::Address { stream, .. } | Member::Endpoints { stream, .. } => {
                    *stream = Some(destination)
                },
            }
        }
        self
    }

    pub fn build(self) -> Result<ModuleGroup> {
        let count = self.members.len();
        if count == 0 {
            return Err(ControlError::Setup("no modules".to_string()));
        }
        let geometry = match self.geometry {
            Some((rows, cols)) => Geometry::new(rows, cols, count)?,
            None => Geometry::row(count)?,
        };

        let session = if self.lock_session {
            let dir = self.session_dir.clone().unwrap_or_else(std::env::temp_dir);
            Some(SessionLock::acquire(&dir, &self.detector_id)?)
        } else {
            None
        };

        let mut modules = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        let mut streams = Vec::with_capacity(count);
        for (index, member) in self.members.into_iter().enumerate() {
            let wire_index = u16::try_from(index)
                .map_err(|_| ControlError::Setup(format!("too many modules ({count})")))?;
            let (module, receiver, stream) = match member {
                Member::Address {
                    module,
                    receiver,
                    stream,
                } => {
                    let module = EndpointBuilder::new(module)
                        .index(wire_index)
                        .kind(self.kind)
                        .timeout(self.timeout)
                        .build_module()
                        .map_err(|e| ControlError::from_driver(index, e))?;
                    let receiver = EndpointBuilder::new(receiver)
                        .index(wire_index)
                        .timeout(self.timeout)
                        .build_receiver()
                        .map_err(|e| ControlError::from_driver(index, e))?;
                    (module, receiver, stream)
                },
                Member::Endpoints {
                    module,
                    receiver,
                    stream,
                } => (*module, *receiver, stream),
            };

            if module.index() != index || receiver.index() != index {
                return Err(ControlError::Setup(format!(
                    "endpoint at position {} has index {}/{}",
                    index,
                    module.index(),
                    receiver.index()
                )));
            }
            if module.kind() != self.kind {
                return Err(ControlError::Setup(format!(
                    "module {} is {}, expected {}",
                    index,
                    module.kind(),
                    self.kind
                )));
            }
            modules.push(module);
            receivers.push(receiver);
            streams.push(stream);
        }

        info!(
            "Module group {} ready: {} {} modules ({})",
            self.detector_id, count, self.kind, geometry
        );
        Ok(ModuleGroup {
            detector_id: self.detector_id,
            kind: self.kind,
            geometry,
            modules,
            receivers,
            streams,
            _session: session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{virtual_group, virtual_group_builder};
    use sls_transport::VirtualDetector;
    use sls_transport::sim::SimDevice;
    use std::io::Write;

    #[test]
    fn test_apply_to_all_never_short_circuits() {
        let (detector, group) = virtual_group(ModuleKind::Eiger, 4);
        detector.module(1).set_unreachable(true);
        detector.module(3).set_unreachable(true);

        let outcome = group.apply_to_all(|m| m.set_frames(5));
        assert_eq!(outcome.failed_indices(), vec![1, 3]);
        assert_eq!(outcome.unreachable_indices(), vec![1, 3]);
        // 可达的模块都执行了
        assert_eq!(group.module(0).unwrap().frames().unwrap(), 5);
        assert_eq!(group.module(2).unwrap().frames().unwrap(), 5);
    }

    #[test]
    fn test_homogeneous_getters() {
        let (detector, group) = virtual_group(ModuleKind::Eiger, 3);
        group.set_dynamic_range(DynamicRange::Bit32).unwrap();
        group.set_exposure_time(Duration::from_millis(2)).unwrap();
        assert_eq!(group.dynamic_range().unwrap(), DynamicRange::Bit32);
        assert_eq!(group.exposure_time().unwrap(), Duration::from_millis(2));

        detector.module(2).set_reported_dynamic_range(Some(DynamicRange::Bit8));
        match group.dynamic_range() {
            Err(ControlError::InconsistentState { parameter, values }) => {
                assert_eq!(parameter, "dynamic_range");
                assert_eq!(values[2], (2, DynamicRange::Bit8.to_string()));
            },
            other => panic!("expected InconsistentState, got {other:?}"),
        }
    }

    #[test]
    fn test_detector_status_includes_receivers() {
        let (_detector, group) = virtual_group(ModuleKind::Jungfrau, 2);
        assert_eq!(group.detector_status().unwrap(), RunStatus::Idle);

        group.receiver(1).unwrap().start().unwrap();
        assert_eq!(group.run_status().unwrap(), RunStatus::Idle);
        assert_eq!(group.detector_status().unwrap(), RunStatus::Running);
        group.receiver(1).unwrap().stop().unwrap();
    }

    #[test]
    fn test_dac_values_per_module() {
        let (_detector, group) = virtual_group(ModuleKind::Eiger, 2);
        group.set_dac_all("vrf", 3000).unwrap();
        assert_eq!(group.dac("vrf").unwrap(), vec![3000, 3000]);
        group.set_default_dacs().unwrap();
        assert_eq!(group.dac("vrf").unwrap(), vec![3300, 3300]);
    }

    #[test]
    fn test_load_configuration_order_and_targets() {
        let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "# beamtime\nexptime 0.005\nframes 10\n1:vrf 3000\nfpath {}\nbogus 1\ndr 12\n",
            dir.path().display()
        );
        let entries = sls_tools::parse_params(&text).unwrap();

        match group.load_configuration(&entries) {
            Err(ControlError::Config {
                applied,
                unknown,
                rejected,
            }) => {
                assert_eq!(applied, 4);
                assert_eq!(unknown, vec!["bogus".to_string()]);
                assert_eq!(rejected.len(), 2);
            },
            other => panic!("expected Config error, got {other:?}"),
        }

        assert_eq!(group.frames().unwrap(), 10);
        assert_eq!(group.exposure_time().unwrap(), Duration::from_millis(5));
        assert_eq!(group.dac("vrf").unwrap(), vec![3300, 3000]);
        assert_eq!(
            group.file_paths(),
            vec![Some(dir.path().to_path_buf()), Some(dir.path().to_path_buf())]
        );
        assert_eq!(
            detector.events().count_requests(sls_protocol::Opcode::SetDynamicRange),
            0
        );
    }

    #[test]
    fn test_load_configuration_skips_failed_modules() {
        let (detector, group) = virtual_group(ModuleKind::Eiger, 3);
        detector.module(1).set_unreachable(true);
        let entries = sls_tools::parse_params("frames 3\nexptime 0.002\n").unwrap();

        match group.load_configuration(&entries) {
            Err(ControlError::PartialFailure { failed }) => {
                assert_eq!(failed.keys().copied().collect::<Vec<_>>(), vec![1]);
            },
            other => panic!("expected PartialFailure, got {other:?}"),
        }
        // 第一次失败之后不再发请求给模块 1
        assert_eq!(
            detector.events().count_requests(sls_protocol::Opcode::SetTimer),
            5
        );
    }

    #[test]
    fn test_load_config_file() {
        let (_detector, group) = virtual_group(ModuleKind::Jungfrau, 2);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exptime 10us\nperiod 0.001\nframes 100\n0:powerchip 1").unwrap();
        assert_eq!(group.load_config_file(file.path()).unwrap(), 4);
        assert_eq!(group.frames().unwrap(), 100);
        assert!(group.module(0).unwrap().power_chip().unwrap());
        assert!(!group.module(1).unwrap().power_chip().unwrap());

        assert!(matches!(
            group.load_config_file("/nonexistent/params.txt"),
            Err(ControlError::Params(_))
        ));
    }

    #[test]
    fn test_builder_checks() {
        assert!(matches!(
            ModuleGroupBuilder::new(ModuleKind::Eiger)
                .without_session_lock()
                .build(),
            Err(ControlError::Setup(_))
        ));

        let detector = VirtualDetector::new(ModuleKind::Eiger, 3);
        assert!(matches!(
            virtual_group_builder(&detector).geometry(2, 2).build(),
            Err(ControlError::Geometry { modules: 3, .. })
        ));

        let group = virtual_group_builder(&detector).geometry(3, 1).build().unwrap();
        assert_eq!(group.geometry().to_string(), "3x1");
        assert_eq!(group.image_size(), (768, 1024));
        assert_eq!(
            group.hostnames(),
            vec!["sim-module-0:1952", "sim-module-1:1952", "sim-module-2:1952"]
        );
        assert_eq!(detector.module(0).name(), "sim-module-0");
    }

    #[test]
    fn test_session_lock_refuses_second_group() {
        let dir = tempfile::tempdir().unwrap();
        let build = || {
            ModuleGroupBuilder::new(ModuleKind::Eiger)
                .session_dir(dir.path())
                .detector_id("3")
                .add_module("localhost:1", "localhost:2")
                .build()
        };
        let first = build().unwrap();
        assert!(first.session_path().unwrap().ends_with("sls-detector-3.lock"));
        assert!(matches!(build(), Err(ControlError::SessionBusy { .. })));
        drop(first);
        assert!(build().is_ok());
    }

    #[test]
    fn test_from_setup() {
        let setup = DetectorSetup::from_toml_str(
            r#"
detector_id = "j1m"
kind = "jungfrau"
request_timeout_ms = 250

[geometry]
rows = 2
cols = 1

[[modules]]
hostname = "bchip071"
receiver = { hostname = "pc1", port = 2000, stream = { ip = "10.0.0.1", mac = "00:11:22:33:44:55", port = 30001 } }

[[modules]]
hostname = "bchip072"
port = 1960
receiver = { hostname = "pc1", port = 2002 }
"#,
        )
        .unwrap();

        let group = ModuleGroupBuilder::from_setup(&setup)
            .without_session_lock()
            .build()
            .unwrap();
        assert_eq!(group.detector_id(), "j1m");
        assert_eq!(group.hostnames(), vec!["bchip071:1952", "bchip072:1960"]);
        assert_eq!(group.receiver(0).unwrap().hostname(), "pc1:2000");
        assert_eq!(group.module(1).unwrap().timeout(), Duration::from_millis(250));
        assert!(group.streams[0].is_some());
        assert!(group.streams[1].is_none());
    }
}

//! 设备枚举与通用值类型
//!
//! 线上传输时，所有枚举都以 `Payload::Int` 承载其判别值。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// 把线上的整数转换为 `u8` 判别值枚举
fn from_wire<T>(field: &'static str, value: i64) -> Result<T, ProtocolError>
where
    T: TryFromPrimitive<Primitive = u8>,
{
    u8::try_from(value)
        .ok()
        .and_then(|v| T::try_from_primitive(v).ok())
        .ok_or_else(|| ProtocolError::invalid(field, value))
}

// ============================================================================
// Dynamic Range
// ============================================================================

/// 动态范围（每像素位数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "i64", into = "i64")
)]
pub enum DynamicRange {
    Bit4,
    Bit8,
    Bit16,
    Bit32,
}

impl DynamicRange {
    pub const ALL: [DynamicRange; 4] = [Self::Bit4, Self::Bit8, Self::Bit16, Self::Bit32];

    /// 每像素位数
    pub fn bits(self) -> u32 {
        match self {
            DynamicRange::Bit4 => 4,
            DynamicRange::Bit8 => 8,
            DynamicRange::Bit16 => 16,
            DynamicRange::Bit32 => 32,
        }
    }
}

impl TryFrom<i64> for DynamicRange {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(DynamicRange::Bit4),
            8 => Ok(DynamicRange::Bit8),
            16 => Ok(DynamicRange::Bit16),
            32 => Ok(DynamicRange::Bit32),
            other => Err(ProtocolError::invalid("dynamic_range", other)),
        }
    }
}

impl From<DynamicRange> for i64 {
    fn from(dr: DynamicRange) -> Self {
        dr.bits() as i64
    }
}

impl FromStr for DynamicRange {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits: i64 = s
            .trim()
            .parse()
            .map_err(|_| ProtocolError::invalid("dynamic_range", s))?;
        DynamicRange::try_from(bits)
    }
}

impl fmt::Display for DynamicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

// ============================================================================
// Run Status
// ============================================================================

/// 模块运行状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum RunStatus {
    Idle = 0,
    Error = 1,
    Waiting = 2,
    Running = 3,
    Transmitting = 4,
}

impl RunStatus {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        from_wire("run_status", value)
    }

    /// 是否仍处于采集过程中（运行、等待触发或发送数据）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunStatus::Running | RunStatus::Waiting | RunStatus::Transmitting
        )
    }

    /// 合并多个模块的状态为整个探测器的逻辑状态
    ///
    /// - 任一成员在曝光或等待触发 → `Running`
    /// - 否则任一成员在发送数据 → `Transmitting`
    /// - 否则任一成员报错 → `Error`
    /// - 全部空闲 → `Idle`
    pub fn join(statuses: impl IntoIterator<Item = RunStatus>) -> RunStatus {
        let mut any_running = false;
        let mut any_transmitting = false;
        let mut any_error = false;
        for status in statuses {
            match status {
                RunStatus::Running | RunStatus::Waiting => any_running = true,
                RunStatus::Transmitting => any_transmitting = true,
                RunStatus::Error => any_error = true,
                RunStatus::Idle => {},
            }
        }
        if any_running {
            RunStatus::Running
        } else if any_transmitting {
            RunStatus::Transmitting
        } else if any_error {
            RunStatus::Error
        } else {
            RunStatus::Idle
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Idle => "idle",
            RunStatus::Error => "error",
            RunStatus::Waiting => "waiting",
            RunStatus::Running => "running",
            RunStatus::Transmitting => "transmitting",
        };
        f.write_str(name)
    }
}

/// 接收器状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ReceiverStatus {
    Idle = 0,
    Listening = 1,
    Error = 2,
}

impl ReceiverStatus {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        from_wire("receiver_status", value)
    }
}

impl fmt::Display for ReceiverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiverStatus::Idle => "idle",
            ReceiverStatus::Listening => "listening",
            ReceiverStatus::Error => "error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Timing / Timers / Readout
// ============================================================================

/// 触发模式
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum TimingMode {
    /// 内部定时，按周期自动采集
    #[default]
    Auto = 0,
    /// 外部触发，每个触发采集一帧序列
    Trigger = 1,
    /// 外部门控
    Gating = 2,
    /// 外部触发，每个触发采集一组
    BurstTrigger = 3,
}

impl TimingMode {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        from_wire("timing_mode", value)
    }

    /// 是否依赖外部信号
    pub fn is_external(self) -> bool {
        !matches!(self, TimingMode::Auto)
    }
}

impl FromStr for TimingMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TimingMode::Auto),
            "trigger" => Ok(TimingMode::Trigger),
            "gating" | "gated" => Ok(TimingMode::Gating),
            "burst_trigger" | "burst" => Ok(TimingMode::BurstTrigger),
            _ => Err(ProtocolError::invalid("timing_mode", s)),
        }
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimingMode::Auto => "auto",
            TimingMode::Trigger => "trigger",
            TimingMode::Gating => "gating",
            TimingMode::BurstTrigger => "burst_trigger",
        };
        f.write_str(name)
    }
}

/// 定时器种类
///
/// 时间类定时器以纳秒为单位，`Frames` 为帧数。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum TimerKind {
    Exposure = 0,
    Period = 1,
    Frames = 2,
    SubExposure = 3,
}

impl TimerKind {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        from_wire("timer", value)
    }

    pub fn name(self) -> &'static str {
        match self {
            TimerKind::Exposure => "exposure_time",
            TimerKind::Period => "period",
            TimerKind::Frames => "frames",
            TimerKind::SubExposure => "sub_exposure_time",
        }
    }
}

/// 读出速度（时钟分频）
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ReadoutSpeed {
    #[default]
    Full = 0,
    Half = 1,
    Quarter = 2,
    SuperSlow = 3,
}

impl ReadoutSpeed {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        from_wire("readout_speed", value)
    }
}

impl FromStr for ReadoutSpeed {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "0" | "full" | "full_speed" => Ok(ReadoutSpeed::Full),
            "1" | "half" | "half_speed" => Ok(ReadoutSpeed::Half),
            "2" | "quarter" | "quarter_speed" => Ok(ReadoutSpeed::Quarter),
            "3" | "super_slow" | "super_slow_speed" => Ok(ReadoutSpeed::SuperSlow),
            _ => Err(ProtocolError::invalid("readout_speed", s)),
        }
    }
}

impl fmt::Display for ReadoutSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadoutSpeed::Full => "Full Speed",
            ReadoutSpeed::Half => "Half Speed",
            ReadoutSpeed::Quarter => "Quarter Speed",
            ReadoutSpeed::SuperSlow => "Super Slow Speed",
        };
        f.write_str(name)
    }
}

/// 增益/校准设置
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum DetectorSettings {
    #[default]
    Standard = 0,
    Fast = 1,
    HighGain = 2,
    DynamicGain = 3,
    LowGain = 4,
    MediumGain = 5,
    VeryHighGain = 6,
}

impl DetectorSettings {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        from_wire("settings", value)
    }
}

impl FromStr for DetectorSettings {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(DetectorSettings::Standard),
            "fast" => Ok(DetectorSettings::Fast),
            "highgain" => Ok(DetectorSettings::HighGain),
            "dynamicgain" => Ok(DetectorSettings::DynamicGain),
            "lowgain" => Ok(DetectorSettings::LowGain),
            "mediumgain" => Ok(DetectorSettings::MediumGain),
            "veryhighgain" => Ok(DetectorSettings::VeryHighGain),
            _ => Err(ProtocolError::invalid("settings", s)),
        }
    }
}

impl fmt::Display for DetectorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorSettings::Standard => "standard",
            DetectorSettings::Fast => "fast",
            DetectorSettings::HighGain => "highgain",
            DetectorSettings::DynamicGain => "dynamicgain",
            DetectorSettings::LowGain => "lowgain",
            DetectorSettings::MediumGain => "mediumgain",
            DetectorSettings::VeryHighGain => "veryhighgain",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Network identity
// ============================================================================

/// 以太网 MAC 地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ProtocolError::invalid("mac", s))?;
            if part.len() != 2 {
                return Err(ProtocolError::invalid("mac", s));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ProtocolError::invalid("mac", s))?;
        }
        if parts.next().is_some() {
            return Err(ProtocolError::invalid("mac", s));
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// 接收器数据流目的地（UDP 源地址 + 发布端口）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamDestination {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: u16,
}

impl StreamDestination {
    pub fn new(ip: Ipv4Addr, mac: MacAddr, port: u16) -> Self {
        Self { ip, mac, port }
    }
}

impl fmt::Display for StreamDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.ip, self.port, self.mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_range_parse() {
        assert_eq!("16".parse::<DynamicRange>().unwrap(), DynamicRange::Bit16);
        assert_eq!(DynamicRange::try_from(4).unwrap().bits(), 4);
        assert!(DynamicRange::try_from(12).is_err());
        assert!("sixteen".parse::<DynamicRange>().is_err());
    }

    #[test]
    fn test_run_status_join() {
        use RunStatus::*;
        assert_eq!(RunStatus::join([Idle, Idle]), Idle);
        assert_eq!(RunStatus::join([Idle, Running]), Running);
        assert_eq!(RunStatus::join([Transmitting, Idle]), Transmitting);
        assert_eq!(RunStatus::join([Transmitting, Waiting]), Running);
        assert_eq!(RunStatus::join([Error, Idle]), Error);
        assert_eq!(RunStatus::join([Error, Running]), Running);
        assert_eq!(RunStatus::join([]), Idle);
    }

    #[test]
    fn test_run_status_from_wire() {
        assert_eq!(RunStatus::from_wire(3).unwrap(), RunStatus::Running);
        assert!(RunStatus::from_wire(-1).is_err());
        assert!(RunStatus::from_wire(300).is_err());
    }

    #[test]
    fn test_timing_mode_parse() {
        assert_eq!("auto".parse::<TimingMode>().unwrap(), TimingMode::Auto);
        assert_eq!("Gated".parse::<TimingMode>().unwrap(), TimingMode::Gating);
        assert!(TimingMode::Trigger.is_external());
        assert!("sometimes".parse::<TimingMode>().is_err());
    }

    #[test]
    fn test_readout_speed_names() {
        assert_eq!(
            "Quarter Speed".parse::<ReadoutSpeed>().unwrap(),
            ReadoutSpeed::Quarter
        );
        assert_eq!("3".parse::<ReadoutSpeed>().unwrap(), ReadoutSpeed::SuperSlow);
        assert_eq!(ReadoutSpeed::Half.to_string(), "Half Speed");
    }

    #[test]
    fn test_mac_addr_parse_and_display() {
        let mac: MacAddr = "00:1B:44:11:3a:b7".parse().unwrap();
        assert_eq!(mac.0, [0x00, 0x1b, 0x44, 0x11, 0x3a, 0xb7]);
        assert_eq!(mac.to_string(), "00:1b:44:11:3a:b7");

        assert!("00:1b:44:11:3a".parse::<MacAddr>().is_err());
        assert!("00:1b:44:11:3a:b7:ff".parse::<MacAddr>().is_err());
        assert!("zz:1b:44:11:3a:b7".parse::<MacAddr>().is_err());
    }
}

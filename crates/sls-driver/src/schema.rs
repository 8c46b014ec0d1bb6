//! 配置参数表
//!
//! 配置文件中的每个 `key value` 行都通过这里映射到端点上的 setter。
//! 除下表之外，当前型号 DAC 表中的任何 DAC 名称也可以直接作为参数名。

use crate::error::DriverError;
use crate::module::ModuleEndpoint;
use crate::receiver::ReceiverEndpoint;
use sls_protocol::util::parse_duration;
use sls_protocol::{DetectorSettings, DynamicRange, ModuleKind, ReadoutSpeed, TimingMode};
use std::path::Path;
use std::str::FromStr;

pub(crate) type ModuleSetter = fn(&ModuleEndpoint, &str) -> Result<(), DriverError>;
pub(crate) type ReceiverSetter = fn(&ReceiverEndpoint, &str) -> Result<(), DriverError>;

/// 参数值的格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// 整数
    Integer,
    /// 带单位的时间（`ns`/`us`/`ms`/`s`，无单位按秒）
    Duration,
    /// `1/0/true/false/on/off`
    Bool,
    /// 枚举名称
    Choice(&'static [&'static str]),
    /// 文件系统路径
    Path,
    Text,
    /// `地址 值`，支持 `0x` 前缀
    RegisterWrite,
}

#[derive(Clone, Copy)]
pub(crate) enum Target {
    Module(ModuleSetter),
    Receiver(ReceiverSetter),
}

/// 一个可配置参数
#[derive(Clone, Copy)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub value: ValueKind,
    /// 仅这些型号支持（`None` 表示所有型号）
    pub kinds: Option<&'static [ModuleKind]>,
    pub description: &'static str,
    target: Target,
}

impl ParameterSpec {
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.aliases.contains(&key)
    }

    /// 是否作用于接收器
    pub fn is_receiver(&self) -> bool {
        matches!(self.target, Target::Receiver(_))
    }

    pub fn supports(&self, kind: ModuleKind) -> bool {
        self.kinds.is_none_or(|kinds| kinds.contains(&kind))
    }
}

impl std::fmt::Debug for ParameterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSpec")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("receiver", &self.is_receiver())
            .finish()
    }
}

pub(crate) enum Resolved {
    Module(ModuleSetter),
    Dac(&'static str),
    Receiver,
}

// ============================================================================
// 值解析
// ============================================================================

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, DriverError> {
    value
        .trim()
        .parse()
        .map_err(|_| DriverError::invalid(name, format!("'{value}'")))
}

/// 解析开关值
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn bool_value(name: &str, value: &str) -> Result<bool, DriverError> {
    parse_bool(value).ok_or_else(|| DriverError::invalid(name, format!("'{value}' is not a switch")))
}

fn duration_value(name: &str, value: &str) -> Result<std::time::Duration, DriverError> {
    parse_duration(value).map_err(|_| DriverError::invalid(name, format!("'{value}'")))
}

/// 解析整数，支持 `0x` 前缀
fn parse_u32(name: &str, value: &str) -> Result<u32, DriverError> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| DriverError::invalid(name, format!("'{value}'")))
}

// ============================================================================
// 参数表
// ============================================================================

const EIGER_ONLY: &[ModuleKind] = &[ModuleKind::Eiger];
const JUNGFRAU_ONLY: &[ModuleKind] = &[ModuleKind::Jungfrau];
const WITH_TRIMBITS: &[ModuleKind] = &[ModuleKind::Eiger, ModuleKind::Mythen];
const WITH_READOUT_SPEED: &[ModuleKind] = &[ModuleKind::Eiger, ModuleKind::Jungfrau];

/// 所有已知参数
pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec {
        name: "dr",
        aliases: &["dynamic_range"],
        value: ValueKind::Choice(&["4", "8", "16", "32"]),
        kinds: None,
        description: "dynamic range in bits per pixel",
        target: Target::Module(|m, v| m.set_dynamic_range(parse::<DynamicRange>("dr", v)?)),
    },
    ParameterSpec {
        name: "exptime",
        aliases: &["exposure_time"],
        value: ValueKind::Duration,
        kinds: None,
        description: "exposure time",
        target: Target::Module(|m, v| m.set_exposure_time(duration_value("exptime", v)?)),
    },
    ParameterSpec {
        name: "period",
        aliases: &[],
        value: ValueKind::Duration,
        kinds: None,
        description: "frame period (0 = as fast as possible)",
        target: Target::Module(|m, v| m.set_period(duration_value("period", v)?)),
    },
    ParameterSpec {
        name: "frames",
        aliases: &[],
        value: ValueKind::Integer,
        kinds: None,
        description: "number of frames per acquisition",
        target: Target::Module(|m, v| m.set_frames(parse("frames", v)?)),
    },
    ParameterSpec {
        name: "subexptime",
        aliases: &["sub_exposure_time"],
        value: ValueKind::Duration,
        kinds: Some(EIGER_ONLY),
        description: "sub frame exposure time in 32 bit mode",
        target: Target::Module(|m, v| m.set_sub_exposure_time(duration_value("subexptime", v)?)),
    },
    ParameterSpec {
        name: "timing",
        aliases: &["timing_mode"],
        value: ValueKind::Choice(&["auto", "trigger", "gating", "burst_trigger"]),
        kinds: None,
        description: "timing mode",
        target: Target::Module(|m, v| m.set_timing_mode(parse::<TimingMode>("timing", v)?)),
    },
    ParameterSpec {
        name: "readoutspeed",
        aliases: &["clkdivider"],
        value: ValueKind::Choice(&["full_speed", "half_speed", "quarter_speed", "super_slow_speed"]),
        kinds: Some(WITH_READOUT_SPEED),
        description: "readout clock speed",
        target: Target::Module(|m, v| {
            m.set_readout_speed(parse::<ReadoutSpeed>("readoutspeed", v)?)
        }),
    },
    ParameterSpec {
        name: "settings",
        aliases: &[],
        value: ValueKind::Choice(&[
            "standard",
            "fast",
            "highgain",
            "dynamicgain",
            "lowgain",
            "mediumgain",
            "veryhighgain",
        ]),
        kinds: None,
        description: "gain settings",
        target: Target::Module(|m, v| m.set_settings(parse::<DetectorSettings>("settings", v)?)),
    },
    ParameterSpec {
        name: "trimval",
        aliases: &["trimbits"],
        value: ValueKind::Integer,
        kinds: Some(WITH_TRIMBITS),
        description: "set all trimbits to one value (0-63)",
        target: Target::Module(|m, v| m.set_all_trimbits(parse("trimval", v)?)),
    },
    ParameterSpec {
        name: "matrixreset",
        aliases: &["counterbit"],
        value: ValueKind::Bool,
        kinds: Some(EIGER_ONLY),
        description: "reset counter matrix after readout",
        target: Target::Module(|m, v| m.set_counter_bit(bool_value("matrixreset", v)?)),
    },
    ParameterSpec {
        name: "powerchip",
        aliases: &[],
        value: ValueKind::Bool,
        kinds: Some(JUNGFRAU_ONLY),
        description: "chip power",
        target: Target::Module(|m, v| m.set_power_chip(bool_value("powerchip", v)?)),
    },
    ParameterSpec {
        name: "highvoltage",
        aliases: &["hv"],
        value: ValueKind::Integer,
        kinds: None,
        description: "high voltage in volts",
        target: Target::Module(|m, v| m.set_high_voltage(parse("highvoltage", v)?)),
    },
    ParameterSpec {
        name: "threshold",
        aliases: &[],
        value: ValueKind::Integer,
        kinds: Some(WITH_TRIMBITS),
        description: "threshold DAC",
        target: Target::Module(|m, v| m.set_threshold(parse("threshold", v)?)),
    },
    ParameterSpec {
        name: "reg",
        aliases: &["register"],
        value: ValueKind::RegisterWrite,
        kinds: None,
        description: "write a register: <addr> <value>",
        target: Target::Module(|m, v| {
            let mut parts = v.split_whitespace();
            let (Some(addr), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(DriverError::invalid("reg", format!("expected '<addr> <value>', got '{v}'")));
            };
            m.set_register(parse_u32("reg", addr)?, parse_u32("reg", value)?)
                .map(|_| ())
        }),
    },
    ParameterSpec {
        name: "fpath",
        aliases: &["file_path"],
        value: ValueKind::Path,
        kinds: None,
        description: "receiver output directory",
        target: Target::Receiver(|r, v| r.set_file_path(Path::new(v.trim()))),
    },
    ParameterSpec {
        name: "fname",
        aliases: &["file_name"],
        value: ValueKind::Text,
        kinds: None,
        description: "receiver output file name prefix",
        target: Target::Receiver(|r, v| r.set_file_name(v.trim())),
    },
    ParameterSpec {
        name: "findex",
        aliases: &["file_index"],
        value: ValueKind::Integer,
        kinds: None,
        description: "receiver output file index",
        target: Target::Receiver(|r, v| r.set_file_index(parse("findex", v)?)),
    },
    ParameterSpec {
        name: "fwrite",
        aliases: &["file_write"],
        value: ValueKind::Bool,
        kinds: None,
        description: "write frames to disk",
        target: Target::Receiver(|r, v| r.set_file_write(bool_value("fwrite", v)?)),
    },
    ParameterSpec {
        name: "rx_datastream",
        aliases: &["streaming"],
        value: ValueKind::Bool,
        kinds: None,
        description: "publish frames downstream",
        target: Target::Receiver(|r, v| r.set_streaming(bool_value("rx_datastream", v)?)),
    },
];

/// 按名称或别名查找参数
pub fn lookup(key: &str) -> Option<&'static ParameterSpec> {
    PARAMETERS.iter().find(|spec| spec.matches(key))
}

/// 该型号可用的参数
pub fn parameters_for(kind: ModuleKind) -> impl Iterator<Item = &'static ParameterSpec> {
    PARAMETERS.iter().filter(move |spec| spec.supports(kind))
}

/// 参数是否作用于接收器
pub fn is_receiver_parameter(key: &str) -> bool {
    lookup(key).is_some_and(ParameterSpec::is_receiver)
}

pub(crate) fn resolve(kind: ModuleKind, key: &str) -> Option<Resolved> {
    if let Some(spec) = lookup(key) {
        return Some(match spec.target {
            Target::Module(apply) => Resolved::Module(apply),
            Target::Receiver(_) => Resolved::Receiver,
        });
    }
    kind.dac(key).map(|(_, spec)| Resolved::Dac(spec.name))
}

pub(crate) fn receiver_setter(key: &str) -> Option<ReceiverSetter> {
    match lookup(key)?.target {
        Target::Receiver(apply) => Some(apply),
        Target::Module(_) => None,
    }
}

//! 探测器型号相关的静态表
//!
//! 每种型号支持的动态范围、DAC 列表（含取值范围和默认值）、
//! 温度传感器以及单模块图像尺寸都在这里集中定义。

use crate::ProtocolError;
use crate::types::DynamicRange;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

/// 探测器型号
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ModuleKind {
    Eiger = 0,
    Jungfrau = 1,
    Mythen = 2,
    Gotthard = 3,
}

/// DAC 定义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacSpec {
    pub name: &'static str,
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

impl DacSpec {
    const fn new(name: &'static str, min: i32, max: i32, default: i32) -> Self {
        Self {
            name,
            min,
            max,
            default,
        }
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// 高压 DAC 名称（单位：伏特）
pub const HIGH_VOLTAGE_DAC: &str = "vhighvoltage";
/// 阈值 DAC 名称
pub const THRESHOLD_DAC: &str = "vthreshold";

const EIGER_DACS: &[DacSpec] = &[
    DacSpec::new("vsvp", 0, 4000, 0),
    DacSpec::new("vtr", 0, 4000, 2500),
    DacSpec::new("vrf", 0, 4000, 3300),
    DacSpec::new("vrs", 0, 4000, 1400),
    DacSpec::new("vsvn", 0, 4000, 4000),
    DacSpec::new("vtgstv", 0, 4000, 2556),
    DacSpec::new("vcmp_ll", 0, 4000, 1500),
    DacSpec::new("vcmp_lr", 0, 4000, 1500),
    DacSpec::new("vcall", 0, 4000, 4000),
    DacSpec::new("vcmp_rl", 0, 4000, 1500),
    DacSpec::new("rxb_rb", 0, 4000, 1100),
    DacSpec::new("rxb_lb", 0, 4000, 1100),
    DacSpec::new("vcmp_rr", 0, 4000, 1500),
    DacSpec::new("vcp", 0, 4000, 200),
    DacSpec::new("vcn", 0, 4000, 2000),
    DacSpec::new("vis", 0, 4000, 1550),
    DacSpec::new("iodelay", 0, 4000, 660),
    DacSpec::new(THRESHOLD_DAC, 0, 4000, 1500),
    DacSpec::new(HIGH_VOLTAGE_DAC, 0, 200, 0),
];

const JUNGFRAU_DACS: &[DacSpec] = &[
    DacSpec::new("vb_comp", 0, 4000, 1220),
    DacSpec::new("vdd_prot", 0, 4000, 3000),
    DacSpec::new("vin_com", 0, 4000, 1053),
    DacSpec::new("vref_prech", 0, 4000, 1450),
    DacSpec::new("vb_pixbuff", 0, 4000, 750),
    DacSpec::new("vb_ds", 0, 4000, 1000),
    DacSpec::new("vref_ds", 0, 4000, 480),
    DacSpec::new("vref_comp", 0, 4000, 420),
    DacSpec::new(HIGH_VOLTAGE_DAC, 0, 200, 0),
];

const MYTHEN_DACS: &[DacSpec] = &[
    DacSpec::new("vcassh", 0, 4000, 1200),
    DacSpec::new("vth1", 0, 4000, 2800),
    DacSpec::new("vth2", 0, 4000, 2800),
    DacSpec::new("vth3", 0, 4000, 2800),
    DacSpec::new("vrpreamp", 0, 4000, 1100),
    DacSpec::new("vrshaper", 0, 4000, 1280),
    DacSpec::new("vicin", 0, 4000, 1708),
    DacSpec::new(THRESHOLD_DAC, 0, 4000, 2800),
    DacSpec::new(HIGH_VOLTAGE_DAC, 0, 200, 0),
];

const GOTTHARD_DACS: &[DacSpec] = &[
    DacSpec::new("vref_ds", 0, 4000, 660),
    DacSpec::new("vcascn_pb", 0, 4000, 650),
    DacSpec::new("vcascp_pb", 0, 4000, 1480),
    DacSpec::new("vout_cm", 0, 4000, 1520),
    DacSpec::new("vcasc_out", 0, 4000, 1320),
    DacSpec::new("vin_cm", 0, 4000, 1350),
    DacSpec::new("vref_comp", 0, 4000, 350),
    DacSpec::new("ib_test_c", 0, 4000, 2001),
    DacSpec::new(HIGH_VOLTAGE_DAC, 0, 200, 0),
];

/// 温度传感器（ADC 通道）
///
/// 设备返回千分之一摄氏度。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TemperatureSensor {
    Fpga = 0,
    FpgaExt = 1,
    TenGe = 2,
    Dcdc = 3,
    Sodl = 4,
    Sodr = 5,
    FpgaFl = 6,
    FpgaFr = 7,
}

impl TemperatureSensor {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        u8::try_from(value)
            .ok()
            .and_then(|v| TemperatureSensor::try_from(v).ok())
            .ok_or_else(|| ProtocolError::invalid("temperature_sensor", value))
    }

    pub fn name(self) -> &'static str {
        match self {
            TemperatureSensor::Fpga => "temp_fpga",
            TemperatureSensor::FpgaExt => "temp_fpgaext",
            TemperatureSensor::TenGe => "temp_10ge",
            TemperatureSensor::Dcdc => "temp_dcdc",
            TemperatureSensor::Sodl => "temp_sodl",
            TemperatureSensor::Sodr => "temp_sodr",
            TemperatureSensor::FpgaFl => "temp_fpgafl",
            TemperatureSensor::FpgaFr => "temp_fpgafr",
        }
    }
}

impl fmt::Display for TemperatureSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const EIGER_SENSORS: &[TemperatureSensor] = &[
    TemperatureSensor::Fpga,
    TemperatureSensor::FpgaExt,
    TemperatureSensor::TenGe,
    TemperatureSensor::Dcdc,
    TemperatureSensor::Sodl,
    TemperatureSensor::Sodr,
    TemperatureSensor::FpgaFl,
    TemperatureSensor::FpgaFr,
];
const FPGA_ONLY: &[TemperatureSensor] = &[TemperatureSensor::Fpga];
const GOTTHARD_SENSORS: &[TemperatureSensor] =
    &[TemperatureSensor::Fpga, TemperatureSensor::FpgaExt];

const ALL_RANGES: &[DynamicRange] = &DynamicRange::ALL;
const SIXTEEN_ONLY: &[DynamicRange] = &[DynamicRange::Bit16];

impl ModuleKind {
    pub fn from_wire(value: i64) -> Result<Self, ProtocolError> {
        u8::try_from(value)
            .ok()
            .and_then(|v| ModuleKind::try_from(v).ok())
            .ok_or_else(|| ProtocolError::invalid("detector_type", value))
    }

    /// 该型号支持的动态范围
    pub fn dynamic_ranges(self) -> &'static [DynamicRange] {
        match self {
            ModuleKind::Eiger | ModuleKind::Mythen => ALL_RANGES,
            ModuleKind::Jungfrau | ModuleKind::Gotthard => SIXTEEN_ONLY,
        }
    }

    pub fn supports_dynamic_range(self, dr: DynamicRange) -> bool {
        self.dynamic_ranges().contains(&dr)
    }

    /// DAC 表（索引即线上的 DAC 编号）
    pub fn dacs(self) -> &'static [DacSpec] {
        match self {
            ModuleKind::Eiger => EIGER_DACS,
            ModuleKind::Jungfrau => JUNGFRAU_DACS,
            ModuleKind::Mythen => MYTHEN_DACS,
            ModuleKind::Gotthard => GOTTHARD_DACS,
        }
    }

    /// 按名称查找 DAC，返回 (线上编号, 定义)
    pub fn dac(self, name: &str) -> Option<(u16, &'static DacSpec)> {
        self.dacs()
            .iter()
            .enumerate()
            .find(|(_, spec)| spec.name == name)
            .map(|(index, spec)| (index as u16, spec))
    }

    pub fn temperature_sensors(self) -> &'static [TemperatureSensor] {
        match self {
            ModuleKind::Eiger => EIGER_SENSORS,
            ModuleKind::Gotthard => GOTTHARD_SENSORS,
            ModuleKind::Jungfrau | ModuleKind::Mythen => FPGA_ONLY,
        }
    }

    /// 单个模块的图像尺寸 (rows, cols)
    pub fn module_image_size(self) -> (u32, u32) {
        match self {
            ModuleKind::Eiger => (256, 1024),
            ModuleKind::Jungfrau => (512, 1024),
            ModuleKind::Mythen | ModuleKind::Gotthard => (1, 1280),
        }
    }

    /// 子曝光时间（仅 32 位模式下的 Eiger）
    pub fn supports_sub_exposure(self) -> bool {
        matches!(self, ModuleKind::Eiger)
    }

    /// 计数器矩阵复位位
    pub fn supports_counter_bit(self) -> bool {
        matches!(self, ModuleKind::Eiger)
    }

    pub fn supports_trimbits(self) -> bool {
        matches!(self, ModuleKind::Eiger | ModuleKind::Mythen)
    }

    pub fn supports_power_chip(self) -> bool {
        matches!(self, ModuleKind::Jungfrau)
    }

    pub fn supports_readout_speed(self) -> bool {
        matches!(self, ModuleKind::Eiger | ModuleKind::Jungfrau)
    }
}

impl FromStr for ModuleKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eiger" => Ok(ModuleKind::Eiger),
            "jungfrau" => Ok(ModuleKind::Jungfrau),
            "mythen" | "mythen3" => Ok(ModuleKind::Mythen),
            "gotthard" | "gotthard2" => Ok(ModuleKind::Gotthard),
            _ => Err(ProtocolError::invalid("detector_type", s)),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::Eiger => "Eiger",
            ModuleKind::Jungfrau => "Jungfrau",
            ModuleKind::Mythen => "Mythen",
            ModuleKind::Gotthard => "Gotthard",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eiger_dac_lookup() {
        let (index, spec) = ModuleKind::Eiger.dac("vrf").unwrap();
        assert_eq!(index, 2);
        assert_eq!(spec.default, 3300);
        assert!(ModuleKind::Eiger.dac("vb_comp").is_none());
    }

    #[test]
    fn test_every_kind_has_high_voltage() {
        for kind in [
            ModuleKind::Eiger,
            ModuleKind::Jungfrau,
            ModuleKind::Mythen,
            ModuleKind::Gotthard,
        ] {
            assert!(kind.dac(HIGH_VOLTAGE_DAC).is_some(), "{kind}");
            for spec in kind.dacs() {
                assert!(spec.contains(spec.default), "{kind} {}", spec.name);
            }
        }
    }

    #[test]
    fn test_dynamic_range_support() {
        assert!(ModuleKind::Eiger.supports_dynamic_range(DynamicRange::Bit4));
        assert!(!ModuleKind::Jungfrau.supports_dynamic_range(DynamicRange::Bit32));
        assert!(ModuleKind::Jungfrau.supports_dynamic_range(DynamicRange::Bit16));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("EIGER".parse::<ModuleKind>().unwrap(), ModuleKind::Eiger);
        assert_eq!("mythen3".parse::<ModuleKind>().unwrap(), ModuleKind::Mythen);
        assert!("pilatus".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn test_sensor_names() {
        assert_eq!(TemperatureSensor::TenGe.name(), "temp_10ge");
        assert_eq!(ModuleKind::Eiger.temperature_sensors().len(), 8);
        assert_eq!(
            TemperatureSensor::from_wire(7).unwrap(),
            TemperatureSensor::FpgaFr
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_kind_serde_is_lowercase() {
        let text = serde_json::to_string(&ModuleKind::Jungfrau).unwrap();
        assert_eq!(text, "\"jungfrau\"");
        let kind: ModuleKind = serde_json::from_str("\"eiger\"").unwrap();
        assert_eq!(kind, ModuleKind::Eiger);
    }
}

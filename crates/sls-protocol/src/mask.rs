//! 模块错误掩码
//!
//! 每个模块维护一个 64 位故障位集合，直到显式清除前一直保留。
//! `END_OF_RUN` 是唯一的瞬态位：每次采集结束时由固件置位，
//! 采集结果收集完成后应当清除。

use std::fmt;

/// 模块错误掩码（位集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorMask(pub u64);

impl ErrorMask {
    pub const NONE: ErrorMask = ErrorMask(0);
    pub const COMMUNICATION: ErrorMask = ErrorMask(1 << 0);
    pub const NETWORK_PARAMETER: ErrorMask = ErrorMask(1 << 1);
    pub const TIMER: ErrorMask = ErrorMask(1 << 2);
    pub const DYNAMIC_RANGE: ErrorMask = ErrorMask(1 << 3);
    pub const SETTINGS: ErrorMask = ErrorMask(1 << 4);
    pub const DAC: ErrorMask = ErrorMask(1 << 5);
    pub const ADC: ErrorMask = ErrorMask(1 << 6);
    pub const FIRMWARE: ErrorMask = ErrorMask(1 << 7);
    pub const RECEIVER: ErrorMask = ErrorMask(1 << 8);
    pub const FILE: ErrorMask = ErrorMask(1 << 9);
    pub const OVER_TEMPERATURE: ErrorMask = ErrorMask(1 << 10);
    /// 采集结束标记（瞬态）
    pub const END_OF_RUN: ErrorMask = ErrorMask(1 << 63);

    const NAMES: [(ErrorMask, &'static str); 12] = [
        (Self::COMMUNICATION, "communication"),
        (Self::NETWORK_PARAMETER, "network_parameter"),
        (Self::TIMER, "timer"),
        (Self::DYNAMIC_RANGE, "dynamic_range"),
        (Self::SETTINGS, "settings"),
        (Self::DAC, "dac"),
        (Self::ADC, "adc"),
        (Self::FIRMWARE, "firmware"),
        (Self::RECEIVER, "receiver"),
        (Self::FILE, "file"),
        (Self::OVER_TEMPERATURE, "over_temperature"),
        (Self::END_OF_RUN, "end_of_run"),
    ];

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ErrorMask) -> bool {
        self.0 & other.0 == other.0 && !other.is_empty()
    }

    /// 去掉瞬态位后的掩码
    pub fn persistent(self) -> ErrorMask {
        ErrorMask(self.0 & !Self::END_OF_RUN.0)
    }

    /// 掩码非空且只含瞬态位
    pub fn is_transient_only(self) -> bool {
        !self.is_empty() && self.persistent().is_empty()
    }

    /// 已置位的故障类别名称（未知位以十六进制输出）
    pub fn categories(self) -> Vec<String> {
        let mut names = Vec::new();
        let mut known = 0u64;
        for (flag, name) in Self::NAMES {
            known |= flag.0;
            if self.contains(flag) {
                names.push(name.to_string());
            }
        }
        let unknown = self.0 & !known;
        if unknown != 0 {
            names.push(format!("0x{unknown:x}"));
        }
        names
    }
}

impl std::ops::BitOr for ErrorMask {
    type Output = ErrorMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ErrorMask(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ErrorMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ErrorMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.categories().join("|"))
    }
}

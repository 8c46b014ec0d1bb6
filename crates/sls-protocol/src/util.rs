//! 换算工具函数

use crate::ProtocolError;
use std::time::Duration;

/// Eiger 定时寄存器的时钟频率（Hz）
pub const EIGER_TIMER_CLOCK_HZ: f64 = 100e6;

/// 把 Eiger 定时寄存器值转换为秒
///
/// 寄存器低 3 位是十进制指数，其余位是尾数：
/// `time = (reg >> 3) * 10^(reg & 0b111) / 100 MHz`
pub fn eiger_register_to_time(register: u32) -> f64 {
    let mantissa = (register >> 3) as f64;
    let exponent = (register & 0b111) as i32;
    mantissa * 10f64.powi(exponent) / EIGER_TIMER_CLOCK_HZ
}

/// ADC 读数（千分之一摄氏度）转摄氏度
pub fn millidegrees_to_celsius(raw: i64) -> f64 {
    raw as f64 / 1000.0
}

/// `Duration` 转线上纳秒值
pub fn duration_to_ns(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// 线上纳秒值转 `Duration`（负值视为非法）
pub fn ns_to_duration(ns: i64) -> Result<Duration, ProtocolError> {
    u64::try_from(ns)
        .map(Duration::from_nanos)
        .map_err(|_| ProtocolError::invalid("duration_ns", ns))
}

/// 解析带单位的时间字符串
///
/// 支持 `ns`/`us`/`ms`/`s` 后缀；无单位时按秒处理（可带小数）。
///
/// # 示例
///
/// ```
/// use sls_protocol::util::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1.5ms").unwrap(), Duration::from_micros(1500));
/// assert_eq!(parse_duration("0.1").unwrap(), Duration::from_millis(100));
/// ```
pub fn parse_duration(text: &str) -> Result<Duration, ProtocolError> {
    let text = text.trim();
    let (number, scale_ns) = if let Some(v) = text.strip_suffix("ns") {
        (v, 1.0)
    } else if let Some(v) = text.strip_suffix("us") {
        (v, 1e3)
    } else if let Some(v) = text.strip_suffix("ms") {
        (v, 1e6)
    } else if let Some(v) = text.strip_suffix('s') {
        (v, 1e9)
    } else {
        (text, 1e9)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ProtocolError::invalid("duration", text))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ProtocolError::invalid("duration", text));
    }
    let ns = (value * scale_ns).round();
    if ns > u64::MAX as f64 {
        return Err(ProtocolError::invalid("duration", text));
    }
    Ok(Duration::from_nanos(ns as u64))
}

/// 以最合适的单位格式化时间
pub fn format_duration(duration: Duration) -> String {
    let ns = duration.as_nanos();
    if ns == 0 {
        "0s".to_string()
    } else if ns % 1_000_000_000 == 0 {
        format!("{}s", ns / 1_000_000_000)
    } else if ns % 1_000_000 == 0 {
        format!("{}ms", ns / 1_000_000)
    } else if ns % 1_000 == 0 {
        format!("{}us", ns / 1_000)
    } else {
        format!("{ns}ns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eiger_register_to_time() {
        // 尾数 1000，指数 0 → 10 us
        assert!((eiger_register_to_time(1000 << 3) - 10e-6).abs() < 1e-12);
        // 尾数 1，指数 6 → 10 ms
        assert!((eiger_register_to_time((1 << 3) | 6) - 10e-3).abs() < 1e-12);
        assert_eq!(eiger_register_to_time(0), 0.0);
    }

    #[test]
    fn test_millidegrees() {
        assert_eq!(millidegrees_to_celsius(45_500), 45.5);
        assert_eq!(millidegrees_to_celsius(-2_000), -2.0);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ns").unwrap(), Duration::from_nanos(250));
        assert_eq!(parse_duration("100us").unwrap(), Duration::from_micros(100));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 1 ").unwrap(), Duration::from_secs(1));
        assert!(parse_duration("-1ms").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(5)), "5ms");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1500ns");
        assert_eq!(format_duration(Duration::from_secs(3)), "3s");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_ns_conversion() {
        assert_eq!(ns_to_duration(1_000).unwrap(), Duration::from_micros(1));
        assert!(ns_to_duration(-5).is_err());
        assert_eq!(duration_to_ns(Duration::from_millis(2)), 2_000_000);
    }
}

//! # 采集结果记录
//!
//! 一次采集的可持久化摘要（JSON），由 CLI 在 `collect()` 之后写出。

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// 采集摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub detector_id: String,
    /// 结束时间（Unix 秒）
    pub finished_at: u64,
    pub frames_requested: u64,
    pub exposure_ns: u64,
    pub period_ns: u64,
    pub timing_mode: String,
    /// `success` / `partial_failure` / `aborted` / `timeout`
    pub outcome: String,
    /// 部分失败时的模块编号（升序）
    #[serde(default)]
    pub failed_modules: Vec<usize>,
    /// 每个模块的收帧数（读取失败为 `null`）
    pub frames_caught: Vec<Option<u64>>,
    pub elapsed_ms: u64,
    /// 接收器输出目录（未知时为空）
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl RunSummary {
    /// 当前时间（Unix 秒）
    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == "success"
    }

    /// 收到的总帧数
    pub fn total_frames(&self) -> u64 {
        self.frames_caught.iter().flatten().sum()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 写出 JSON 文件
    pub fn write_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let text = self.to_json_pretty().map_err(io::Error::other)?;
        fs::write(path, text)
    }

    pub fn read_json(path: impl AsRef<Path>) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunSummary {
        RunSummary {
            detector_id: "0".into(),
            finished_at: 1_700_000_000,
            frames_requested: 10,
            exposure_ns: 1_000_000,
            period_ns: 0,
            timing_mode: "auto".into(),
            outcome: "partial_failure".into(),
            failed_modules: vec![1],
            frames_caught: vec![Some(10), None],
            elapsed_ms: 25,
            file_paths: vec!["/data".into(), String::new()],
            issues: vec!["module 1: unreachable".into()],
        }
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["outcome"], "partial_failure");
        assert_eq!(json["frames_caught"][0], 10);
        assert!(json["frames_caught"][1].is_null());
        assert_eq!(json["failed_modules"][0], 1);
    }

    #[test]
    fn test_totals() {
        let summary = sample();
        assert_eq!(summary.total_frames(), 10);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        sample().write_json(&path).unwrap();
        assert_eq!(RunSummary::read_json(&path).unwrap(), sample());
    }

    #[test]
    fn test_missing_optional_fields() {
        let text = r#"{
            "detector_id": "0", "finished_at": 0, "frames_requested": 1,
            "exposure_ns": 1, "period_ns": 0, "timing_mode": "auto",
            "outcome": "success", "frames_caught": [1], "elapsed_ms": 3
        }"#;
        let summary: RunSummary = serde_json::from_str(text).unwrap();
        assert!(summary.is_success());
        assert!(summary.issues.is_empty());
    }
}

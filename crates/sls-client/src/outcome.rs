//! 组操作的汇总结果

use crate::error::{ControlError, Result};
use sls_driver::DriverError;
use std::collections::BTreeMap;

/// 对组内每个成员执行同一操作后的汇总结果
///
/// 操作从不短路：每个成员都会执行，失败按模块编号收集。
#[derive(Debug)]
pub enum GroupOutcome<T> {
    /// 所有成员成功（按编号排列）
    AllOk(Vec<T>),
    /// 至少一个成员失败
    PartialFailure {
        ok: BTreeMap<usize, T>,
        failed: BTreeMap<usize, DriverError>,
    },
}

impl<T> GroupOutcome<T> {
    /// 从按编号排列的结果构造
    pub fn collect(results: impl IntoIterator<Item = std::result::Result<T, DriverError>>) -> Self {
        let mut ok = BTreeMap::new();
        let mut failed = BTreeMap::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => {
                    ok.insert(index, value);
                },
                Err(e) => {
                    failed.insert(index, e);
                },
            }
        }
        if failed.is_empty() {
            GroupOutcome::AllOk(ok.into_values().collect())
        } else {
            GroupOutcome::PartialFailure { ok, failed }
        }
    }

    pub fn is_all_ok(&self) -> bool {
        matches!(self, GroupOutcome::AllOk(_))
    }

    /// 失败的模块编号（升序）
    pub fn failed_indices(&self) -> Vec<usize> {
        match self {
            GroupOutcome::AllOk(_) => Vec::new(),
            GroupOutcome::PartialFailure { failed, .. } => failed.keys().copied().collect(),
        }
    }

    /// 不可达的模块编号（升序）
    pub fn unreachable_indices(&self) -> Vec<usize> {
        match self {
            GroupOutcome::AllOk(_) => Vec::new(),
            GroupOutcome::PartialFailure { failed, .. } => failed
                .iter()
                .filter(|(_, e)| e.is_unreachable())
                .map(|(index, _)| *index)
                .collect(),
        }
    }

    /// 全部成功时返回所有值，否则返回 `PartialFailure`
    pub fn into_result(self) -> Result<Vec<T>> {
        match self {
            GroupOutcome::AllOk(values) => Ok(values),
            GroupOutcome::PartialFailure { failed, .. } => {
                Err(ControlError::PartialFailure { failed })
            },
        }
    }

    /// 按编号给出每个成员的结果（失败为 `None`）
    pub fn into_options(self, len: usize) -> Vec<Option<T>> {
        match self {
            GroupOutcome::AllOk(values) => values.into_iter().map(Some).collect(),
            GroupOutcome::PartialFailure { mut ok, .. } => {
                (0..len).map(|index| ok.remove(&index)).collect()
            },
        }
    }
}

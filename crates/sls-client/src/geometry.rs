//! 模块拓扑

use crate::error::{ControlError, Result};
use sls_protocol::ModuleKind;
use std::fmt;

/// 模块排布（行 × 列）
///
/// 模块按行优先编号：编号 `i` 位于第 `i / cols` 行、第 `i % cols` 列。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    rows: usize,
    cols: usize,
}

impl Geometry {
    /// 创建拓扑，`rows × cols` 必须等于模块数
    pub fn new(rows: usize, cols: usize, modules: usize) -> Result<Self> {
        if rows == 0 || cols == 0 || rows * cols != modules {
            return Err(ControlError::Geometry {
                rows,
                cols,
                modules,
            });
        }
        Ok(Self { rows, cols })
    }

    /// 单行排布
    pub fn row(modules: usize) -> Result<Self> {
        Self::new(1, modules, modules)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn module_count(&self) -> usize {
        self.rows * self.cols
    }

    /// 编号对应的 (行, 列)
    pub fn position(&self, index: usize) -> Option<(usize, usize)> {
        (index < self.module_count()).then(|| (index / self.cols, index % self.cols))
    }

    /// 整个探测器的图像尺寸 (rows, cols)，不含模块间隙
    pub fn image_size(&self, kind: ModuleKind) -> (u32, u32) {
        let (rows, cols) = kind.module_image_size();
        (rows * self.rows as u32, cols * self.cols as u32)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

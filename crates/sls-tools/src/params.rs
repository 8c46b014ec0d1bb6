//! # 参数文件
//!
//! 每行一个 `key value`，`#` 之后为注释。`N:key value` 只作用于第 N 个模块。
//!
//! ```text
//! # 32 位模式，1000 帧
//! dr 32
//! frames 1000
//! exptime 1ms
//! 1:vrf 3100
//! reg 0x5e 0x7
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 参数文件中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEntry {
    /// 行号（从 1 开始）
    pub line: usize,
    /// 目标模块编号（`None` 表示所有模块）
    pub module: Option<usize>,
    pub key: String,
    /// 原样保留（去掉首尾空白），可以包含空格
    pub value: String,
}

impl ParamEntry {
    pub fn applies_to(&self, index: usize) -> bool {
        self.module.is_none_or(|module| module == index)
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

/// 解析参数文本
pub fn parse_params(text: &str) -> Result<Vec<ParamEntry>, ParseError> {
    let mut entries = Vec::new();

    for (number, raw) in text.lines().enumerate() {
        let line = number + 1;
        let content = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();
        if content.is_empty() {
            continue;
        }

        let (key, value) = match content.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (content, ""),
        };
        if value.is_empty() {
            return Err(ParseError::Syntax {
                line,
                reason: format!("missing value for '{key}'"),
            });
        }

        let (module, key) = match key.split_once(':') {
            Some((index, key)) => {
                let index = index.parse::<usize>().map_err(|_| ParseError::Syntax {
                    line,
                    reason: format!("invalid module index '{index}'"),
                })?;
                (Some(index), key)
            },
            None => (None, key),
        };
        if key.is_empty() {
            return Err(ParseError::Syntax {
                line,
                reason: "empty key".to_string(),
            });
        }

        entries.push(ParamEntry {
            line,
            module,
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    Ok(entries)
}

/// 读取并解析参数文件
pub fn read_params(path: impl AsRef<Path>) -> Result<Vec<ParamEntry>, ParseError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_params(&text)
}

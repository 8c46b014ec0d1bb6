//! 客户端身份与会话锁
//!
//! 同一台探测器同一时刻只允许一个 `ModuleGroup` 操作：
//! 构造时对 `<session_dir>/sls-detector-<id>.lock` 加排他文件锁，Drop 时释放。
//! 进程崩溃时操作系统会自动释放文件锁。

use crate::error::{ControlError, Result};
use fs4::fs_std::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 设备锁使用的客户端身份
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `<主机名>:<进程号>`
    pub fn current() -> Self {
        let host = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self(format!("{}:{}", host, std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 探测器会话锁
///
/// 持有期间其他进程（以及本进程中的其他 `SessionLock`）无法获得同一探测器的会话。
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
    detector_id: String,
}

impl SessionLock {
    /// 锁文件路径
    pub fn lock_path(session_dir: &Path, detector_id: &str) -> PathBuf {
        session_dir.join(format!("sls-detector-{detector_id}.lock"))
    }

    /// 尝试获取会话锁（非阻塞）
    pub fn acquire(session_dir: &Path, detector_id: &str) -> Result<Self> {
        let path = Self::lock_path(session_dir, detector_id);
        let io_error = |source| ControlError::Session {
            path: path.clone(),
            source,
        };

        // 拿到锁之前不截断
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&path)
            .map_err(io_error)?;

        if !file.try_lock_exclusive().map_err(io_error)? {
            return Err(ControlError::SessionBusy {
                id: detector_id.to_string(),
                path,
            });
        }

        file.set_len(0).map_err(io_error)?;
        file.seek(SeekFrom::Start(0)).map_err(io_error)?;
        writeln!(file, "{}", ClientId::current()).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;

        debug!("Session lock acquired: {}", path.display());
        Ok(Self {
            file,
            path,
            detector_id: detector_id.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn detector_id(&self) -> &str {
        &self.detector_id
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Session lock released: {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_session_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = SessionLock::acquire(dir.path(), "7").unwrap();
        assert!(first.path().ends_with("sls-detector-7.lock"));

        match SessionLock::acquire(dir.path(), "7") {
            Err(ControlError::SessionBusy { id, .. }) => assert_eq!(id, "7"),
            other => panic!("expected SessionBusy, got {other:?}"),
        }

        // 不同探测器互不影响
        let _other = SessionLock::acquire(dir.path(), "8").unwrap();
    }

    #[test]
    fn test_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let first = SessionLock::acquire(dir.path(), "0").unwrap();
        drop(first);
        let second = SessionLock::acquire(dir.path(), "0").unwrap();

        let content = std::fs::read_to_string(second.path()).unwrap();
        assert!(content.trim().ends_with(&format!(":{}", std::process::id())));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SessionLock::acquire(&missing, "0"),
            Err(ControlError::Session { .. })
        ));
    }

    #[test]
    fn test_client_id() {
        let id = ClientId::current();
        assert!(id.as_str().ends_with(&format!(":{}", std::process::id())));
        assert_eq!(ClientId::new("beamline:1").to_string(), "beamline:1");
    }
}

//! 虚拟接收器

use super::SimDevice;
use super::module::SimModule;
use parking_lot::Mutex;
use sls_protocol::{Frame, Opcode, Payload, ReceiverStatus, StreamDestination, fault};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct ReceiverFaults {
    never_listening: bool,
    start_failure: Option<i32>,
    dropped_frames: u64,
}

#[derive(Debug)]
struct ReceiverState {
    listening: bool,
    session_start: Option<Instant>,
    frozen_frames: Option<u64>,
    last_frame_index: i64,
    destination: Option<StreamDestination>,
    file_path: String,
    file_name: String,
    file_index: i64,
    file_write: bool,
    streaming: bool,
    lock_owner: Option<String>,
    faults: ReceiverFaults,
}

/// 虚拟接收器
///
/// 帧计数取自配对模块：只统计接收器开始监听之后启动的采集，
/// 停止监听时冻结计数。
pub struct SimReceiver {
    name: String,
    module: Arc<SimModule>,
    reachable: AtomicBool,
    state: Mutex<ReceiverState>,
}

impl SimReceiver {
    pub fn new(name: impl Into<String>, module: Arc<SimModule>) -> Self {
        Self {
            name: name.into(),
            module,
            reachable: AtomicBool::new(true),
            state: Mutex::new(ReceiverState {
                listening: false,
                session_start: None,
                frozen_frames: None,
                last_frame_index: -1,
                destination: None,
                file_path: "/tmp".to_string(),
                file_name: "run".to_string(),
                file_index: 0,
                file_write: false,
                streaming: true,
                lock_owner: None,
                faults: ReceiverFaults::default(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // 故障注入
    // ------------------------------------------------------------------

    pub fn set_unreachable(&self, unreachable: bool) {
        self.reachable.store(!unreachable, Ordering::SeqCst);
    }

    /// 启动命令得到确认，但状态始终不进入监听
    pub fn set_never_listening(&self, never: bool) {
        self.state.lock().faults.never_listening = never;
    }

    pub fn set_start_failure(&self, code: Option<i32>) {
        self.state.lock().faults.start_failure = code;
    }

    /// 每次采集丢失的帧数
    pub fn set_dropped_frames(&self, frames: u64) {
        self.state.lock().faults.dropped_frames = frames;
    }

    pub fn set_lock_owner(&self, owner: Option<&str>) {
        self.state.lock().lock_owner = owner.map(str::to_string);
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }

    pub fn file_index(&self) -> i64 {
        self.state.lock().file_index
    }

    // ------------------------------------------------------------------
    // 内部实现
    // ------------------------------------------------------------------

    fn frames_caught(&self, state: &ReceiverState, now: Instant) -> u64 {
        if let Some(frozen) = state.frozen_frames {
            return frozen;
        }
        match state.session_start {
            Some(since) => self
                .module
                .frames_sent_since(since, now)
                .saturating_sub(state.faults.dropped_frames),
            None => 0,
        }
    }

    fn dispatch(&self, state: &mut ReceiverState, request: &Frame) -> Result<Payload, i32> {
        let now = Instant::now();
        let text = || match &request.payload {
            Payload::Text(text) => Ok(text.clone()),
            _ => Err(fault::INVALID_ARGUMENT),
        };
        let int = || request.payload.as_int().map_err(|_| fault::INVALID_ARGUMENT);

        if request.opcode.is_write() && state.listening {
            return Err(fault::BUSY);
        }

        match request.opcode {
            Opcode::Ping => Ok(Payload::Empty),
            Opcode::RxGetStatus => {
                let status = if state.listening && !state.faults.never_listening {
                    ReceiverStatus::Listening
                } else {
                    ReceiverStatus::Idle
                };
                Ok(Payload::Int(u8::from(status) as i64))
            },
            Opcode::RxStart => {
                if let Some(code) = state.faults.start_failure {
                    return Err(code);
                }
                if !state.listening {
                    state.listening = true;
                    state.session_start = Some(now);
                    state.frozen_frames = None;
                    debug!("{}: listening", self.name);
                }
                Ok(Payload::Empty)
            },
            Opcode::RxStop => {
                if state.listening {
                    let caught = self.frames_caught(state, now);
                    state.frozen_frames = Some(caught);
                    state.listening = false;
                    if caught > 0 {
                        state.last_frame_index += caught as i64;
                        if state.file_write {
                            state.file_index += 1;
                        }
                    }
                    debug!("{}: stopped after {} frames", self.name, caught);
                }
                Ok(Payload::Empty)
            },
            Opcode::RxFramesCaught => Ok(Payload::Int(self.frames_caught(state, now) as i64)),
            Opcode::RxLastFrameIndex => Ok(Payload::Int(state.last_frame_index)),
            Opcode::RxSetDestination => {
                let dest = request
                    .payload
                    .as_destination()
                    .map_err(|_| fault::INVALID_ARGUMENT)?;
                state.destination = Some(dest);
                Ok(Payload::Destination(dest))
            },
            Opcode::RxGetDestination => state
                .destination
                .map(Payload::Destination)
                .ok_or(fault::INVALID_ARGUMENT),
            Opcode::RxSetFilePath => {
                let path = text()?;
                if !Path::new(&path).is_dir() {
                    return Err(fault::PATH_NOT_FOUND);
                }
                state.file_path = path;
                Ok(Payload::Text(state.file_path.clone()))
            },
            Opcode::RxGetFilePath => Ok(Payload::Text(state.file_path.clone())),
            Opcode::RxSetFileName => {
                let name = text()?;
                if name.is_empty() || name.contains('/') {
                    return Err(fault::INVALID_ARGUMENT);
                }
                state.file_name = name;
                Ok(Payload::Text(state.file_name.clone()))
            },
            Opcode::RxGetFileName => Ok(Payload::Text(state.file_name.clone())),
            Opcode::RxSetFileIndex => {
                let index = int()?;
                if index < 0 {
                    return Err(fault::INVALID_ARGUMENT);
                }
                state.file_index = index;
                Ok(Payload::Int(index))
            },
            Opcode::RxGetFileIndex => Ok(Payload::Int(state.file_index)),
            Opcode::RxSetFileWrite => {
                state.file_write = int()? != 0;
                Ok(Payload::Int(state.file_write as i64))
            },
            Opcode::RxGetFileWrite => Ok(Payload::Int(state.file_write as i64)),
            Opcode::RxSetStreaming => {
                state.streaming = int()? != 0;
                Ok(Payload::Int(state.streaming as i64))
            },
            Opcode::RxGetStreaming => Ok(Payload::Int(state.streaming as i64)),
            Opcode::RxGetLockOwner => Ok(Payload::Text(state.lock_owner.clone().unwrap_or_default())),
            Opcode::RxSetLock => match &request.payload {
                Payload::Empty => {
                    state.lock_owner = None;
                    Ok(Payload::Text(String::new()))
                },
                Payload::Text(owner) => match &state.lock_owner {
                    Some(current) if current != owner => Err(fault::LOCKED),
                    _ => {
                        state.lock_owner = Some(owner.clone());
                        Ok(Payload::Text(owner.clone()))
                    },
                },
                _ => Err(fault::INVALID_ARGUMENT),
            },
            _ => Err(fault::UNSUPPORTED),
        }
    }
}

impl SimDevice for SimReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn handle(&self, request: &Frame) -> Frame {
        let mut state = self.state.lock();
        match self.dispatch(&mut state, request) {
            Ok(payload) => Frame::ok(request, payload),
            Err(code) => {
                debug!("{}: {:?} rejected with code {}", self.name, request.opcode, code);
                Frame::device_error(request, code)
            },
        }
    }
}

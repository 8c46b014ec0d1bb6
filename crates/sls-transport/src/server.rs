//! 虚拟设备的 TCP 服务端
//!
//! 每个虚拟设备监听一个端口，使用与真实设备相同的线上格式。
//! 设备被设为不可达时，服务端读取请求但不回复，客户端会超时。

use crate::sim::SimDevice;
use crate::{TransportError, read_frame, write_frame};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// accept 轮询间隔
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 单个虚拟设备的 TCP 服务
pub struct SimServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl SimServer {
    /// 绑定地址并在后台线程中开始服务
    pub fn spawn(addr: impl ToSocketAddrs, device: Arc<dyn SimDevice>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        info!("{} listening on {}", device.name(), local_addr);
        let accept_shutdown = shutdown.clone();
        let accept_thread = thread::Builder::new()
            .name(format!("sim-accept-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, device, accept_shutdown))?;

        Ok(Self {
            local_addr,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止接受新连接
    ///
    /// 已建立的连接在客户端断开后自行结束。
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            warn!("Accept thread for {} panicked", self.local_addr);
        }
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, device: Arc<dyn SimDevice>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("{}: client connected from {}", device.name(), peer);
                let device = device.clone();
                let spawned = thread::Builder::new()
                    .name(format!("sim-conn-{peer}"))
                    .spawn(move || serve_connection(stream, device));
                if let Err(e) = spawned {
                    warn!("Failed to spawn connection thread: {}", e);
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            },
            Err(e) => {
                warn!("{}: accept failed: {}", device.name(), e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            },
        }
    }
}

fn serve_connection(mut stream: TcpStream, device: Arc<dyn SimDevice>) {
    if let Err(e) = stream.set_nonblocking(false).and_then(|_| stream.set_nodelay(true)) {
        warn!("{}: failed to configure socket: {}", device.name(), e);
        return;
    }

    loop {
        let request = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(TransportError::Disconnected) => break,
            Err(e) => {
                debug!("{}: closing connection: {}", device.name(), e);
                break;
            },
        };

        if !device.is_reachable() {
            continue;
        }

        let response = device.handle(&request);
        if let Err(e) = write_frame(&mut stream, &response) {
            debug!("{}: write failed: {}", device.name(), e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimModule;
    use crate::{TcpTransport, Transport};
    use sls_protocol::{Frame, ModuleKind, Opcode, Payload};

    #[test]
    fn test_server_round_trip_over_tcp() {
        let module = Arc::new(SimModule::new("tcp-module", ModuleKind::Jungfrau));
        let server = SimServer::spawn("127.0.0.1:0", module.clone()).unwrap();
        let mut transport = TcpTransport::new(server.local_addr().to_string());

        let request = Frame::request(5, 0, Opcode::GetDetectorType, Payload::Empty);
        let response = transport
            .exchange(&request, Duration::from_secs(1))
            .unwrap();
        assert_eq!(response.payload, Payload::Int(1));

        module.set_unreachable(true);
        let request = Frame::request(6, 0, Opcode::GetStatus, Payload::Empty);
        let err = transport
            .exchange(&request, Duration::from_millis(100))
            .unwrap_err();
        assert!(err.is_unreachable(), "{err}");

        // 恢复后重连成功
        module.set_unreachable(false);
        let request = Frame::request(7, 0, Opcode::GetStatus, Payload::Empty);
        assert!(transport.exchange(&request, Duration::from_secs(1)).is_ok());
    }
}

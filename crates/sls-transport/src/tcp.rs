//! TCP 传输
//!
//! 每个端点一条长连接，按需建立；任何 IO 错误或超时后丢弃连接，
//! 避免下一个请求读到上一个请求的迟到响应。

use crate::{Transport, TransportError};
use sls_protocol::{Frame, HEADER_LEN, Header};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// 默认连接超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// 从流中读取一条完整消息
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, TransportError> {
    let mut header_buf = [0u8; HEADER_LEN];
    read_exact(reader, &mut header_buf)?;
    let header = Header::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    read_exact(reader, &mut payload)?;
    Ok(Frame::from_parts(header, &payload)?)
}

/// 向流中写入一条完整消息
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), TransportError> {
    let bytes = frame.encode()?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io(e),
    })
}

/// TCP 传输
///
/// # Example
///
/// ```no_run
/// use sls_transport::{TcpTransport, Transport};
/// use sls_protocol::{Frame, Opcode, Payload};
/// use std::time::Duration;
///
/// let mut transport = TcpTransport::new("beb031:1952");
/// let request = Frame::request(1, 0, Opcode::GetStatus, Payload::Empty);
/// let response = transport.exchange(&request, Duration::from_secs(1)).unwrap();
/// ```
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> Result<&mut TcpStream, TransportError> {
        if self.stream.is_none() {
            let addrs = self
                .addr
                .to_socket_addrs()
                .map_err(|source| TransportError::Connect {
                    addr: self.addr.clone(),
                    source,
                })?;

            let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        debug!("Connected to {} ({})", self.addr, addr);
                        self.stream = Some(stream);
                        break;
                    },
                    Err(e) => last_err = e,
                }
            }
            if self.stream.is_none() {
                return Err(TransportError::Connect {
                    addr: self.addr.clone(),
                    source: last_err,
                });
            }
        }
        self.stream.as_mut().ok_or(TransportError::Disconnected)
    }
}

fn round_trip(
    stream: &mut TcpStream,
    request: &Frame,
    timeout: Duration,
) -> Result<Frame, TransportError> {
    // 零超时会被 std 拒绝，这里取最小 1ms
    let timeout = timeout.max(Duration::from_millis(1));
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    write_frame(stream, request)?;
    let response = read_frame(stream).map_err(|e| match e {
        TransportError::Io(io) if is_timeout(&io) => TransportError::Timeout(timeout),
        other => other,
    })?;

    if response.seq != request.seq {
        return Err(TransportError::SequenceMismatch {
            expected: request.seq,
            actual: response.seq,
        });
    }
    Ok(response)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl Transport for TcpTransport {
    fn exchange(&mut self, request: &Frame, timeout: Duration) -> Result<Frame, TransportError> {
        let stream = self.connect()?;
        let result = round_trip(stream, request, timeout);
        match &result {
            Ok(response) => trace!(
                "{} {:?} seq={} -> {:?}",
                self.addr, request.opcode, request.seq, response.status
            ),
            Err(e) => {
                debug!("{} {:?} failed: {}, dropping connection", self.addr, request.opcode, e);
                self.stream = None;
            },
        }
        result
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }

    fn reset(&mut self) {
        self.stream = None;
    }
}

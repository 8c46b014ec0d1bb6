//! 控制协议编解码
//!
//! 每条消息由固定 16 字节消息头和可变长负载组成：
//!
//! ```text
//! offset  size  field
//! 0       1     version        协议版本（当前为 1）
//! 1       1     direction      0 = 请求, 1 = 响应
//! 2       2     opcode         操作码
//! 4       2     module_index   目标模块在探测器中的编号
//! 6       1     status         响应状态（请求中恒为 0）
//! 7       1     payload_tag    负载类型
//! 8       4     seq            序列号（响应回显请求的序列号）
//! 12      4     payload_len    负载字节数
//! ```

use crate::ProtocolError;
use crate::opcode::Opcode;
use crate::types::{MacAddr, StreamDestination};
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::net::Ipv4Addr;

/// 当前协议版本
pub const PROTOCOL_VERSION: u8 = 1;
/// 消息头长度
pub const HEADER_LEN: usize = 16;
/// 负载长度上限
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// 消息方向
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Direction {
    Request = 0,
    Response = 1,
}

/// 响应状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Status {
    Ok = 0,
    /// 设备报告故障，负载为 `Payload::Int(code)`
    DeviceError = 1,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
enum PayloadTag {
    Empty = 0,
    Int = 1,
    Pair = 2,
    Text = 3,
    Destination = 4,
}

/// 消息负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Int(i64),
    Pair(i64, i64),
    Text(String),
    Destination(StreamDestination),
}

impl Payload {
    fn tag(&self) -> PayloadTag {
        match self {
            Payload::Empty => PayloadTag::Empty,
            Payload::Int(_) => PayloadTag::Int,
            Payload::Pair(_, _) => PayloadTag::Pair,
            Payload::Text(_) => PayloadTag::Text,
            Payload::Destination(_) => PayloadTag::Destination,
        }
    }

    /// 负载类型名称（用于错误信息）
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Int(_) => "int",
            Payload::Pair(_, _) => "pair",
            Payload::Text(_) => "text",
            Payload::Destination(_) => "destination",
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Int(_) => 8,
            Payload::Pair(_, _) => 16,
            Payload::Text(text) => text.len(),
            Payload::Destination(_) => 12,
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Payload::Empty => {},
            Payload::Int(v) => buf.put_i64_le(*v),
            Payload::Pair(a, b) => {
                buf.put_i64_le(*a);
                buf.put_i64_le(*b);
            },
            Payload::Text(text) => buf.put_slice(text.as_bytes()),
            Payload::Destination(dest) => {
                buf.put_slice(&dest.ip.octets());
                buf.put_slice(&dest.mac.0);
                buf.put_u16_le(dest.port);
            },
        }
    }

    /// 按消息头中的负载类型解码负载
    pub fn decode(tag: u8, mut data: &[u8]) -> Result<Self, ProtocolError> {
        let tag = PayloadTag::try_from(tag).map_err(|_| ProtocolError::InvalidPayloadTag(tag))?;
        let expect = |name: &'static str, expected: usize, data: &[u8]| {
            if data.len() == expected {
                Ok(())
            } else {
                Err(ProtocolError::PayloadLength {
                    tag: name,
                    expected,
                    actual: data.len(),
                })
            }
        };

        match tag {
            PayloadTag::Empty => {
                expect("empty", 0, data)?;
                Ok(Payload::Empty)
            },
            PayloadTag::Int => {
                expect("int", 8, data)?;
                Ok(Payload::Int(data.get_i64_le()))
            },
            PayloadTag::Pair => {
                expect("pair", 16, data)?;
                let a = data.get_i64_le();
                let b = data.get_i64_le();
                Ok(Payload::Pair(a, b))
            },
            PayloadTag::Text => {
                let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidText)?;
                Ok(Payload::Text(text.to_string()))
            },
            PayloadTag::Destination => {
                expect("destination", 12, data)?;
                let mut ip = [0u8; 4];
                data.copy_to_slice(&mut ip);
                let mut mac = [0u8; 6];
                data.copy_to_slice(&mut mac);
                let port = data.get_u16_le();
                Ok(Payload::Destination(StreamDestination::new(
                    Ipv4Addr::from(ip),
                    MacAddr(mac),
                    port,
                )))
            },
        }
    }

    pub fn as_int(&self) -> Result<i64, ProtocolError> {
        match self {
            Payload::Int(v) => Ok(*v),
            other => Err(ProtocolError::UnexpectedPayload {
                expected: "int",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_pair(&self) -> Result<(i64, i64), ProtocolError> {
        match self {
            Payload::Pair(a, b) => Ok((*a, *b)),
            other => Err(ProtocolError::UnexpectedPayload {
                expected: "pair",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn into_text(self) -> Result<String, ProtocolError> {
        match self {
            Payload::Text(text) => Ok(text),
            other => Err(ProtocolError::UnexpectedPayload {
                expected: "text",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_destination(&self) -> Result<StreamDestination, ProtocolError> {
        match self {
            Payload::Destination(dest) => Ok(*dest),
            other => Err(ProtocolError::UnexpectedPayload {
                expected: "destination",
                actual: other.kind_name(),
            }),
        }
    }
}

// ============================================================================
// Header
// ============================================================================

/// 消息头（16 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub direction: Direction,
    pub opcode: Opcode,
    pub module_index: u16,
    pub status: Status,
    pub payload_tag: u8,
    pub seq: u32,
    pub payload_len: u32,
}

impl Header {
    /// 编码消息头
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.direction.into());
        buf.put_u16_le(self.opcode.into());
        buf.put_u16_le(self.module_index);
        buf.put_u8(self.status.into());
        buf.put_u8(self.payload_tag);
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.payload_len);
    }

    /// 从缓冲区解码消息头
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let direction = buf.get_u8();
        let direction =
            Direction::try_from(direction).map_err(|_| ProtocolError::InvalidDirection(direction))?;
        let opcode = buf.get_u16_le();
        let opcode = Opcode::try_from(opcode).map_err(|_| ProtocolError::UnknownOpcode(opcode))?;
        let module_index = buf.get_u16_le();
        let status = buf.get_u8();
        let status = Status::try_from(status).map_err(|_| ProtocolError::InvalidStatus(status))?;
        let payload_tag = buf.get_u8();
        let seq = buf.get_u32_le();
        let payload_len = buf.get_u32_le();

        if payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload_len as usize,
                max: MAX_PAYLOAD_LEN,
            });
        }

        Ok(Self {
            direction,
            opcode,
            module_index,
            status,
            payload_tag,
            seq,
            payload_len,
        })
    }
}

// ============================================================================
// Frame
// ============================================================================

/// 完整消息（消息头 + 负载）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub direction: Direction,
    pub opcode: Opcode,
    pub module_index: u16,
    pub status: Status,
    pub seq: u32,
    pub payload: Payload,
}

impl Frame {
    /// 构造请求
    pub fn request(seq: u32, module_index: u16, opcode: Opcode, payload: Payload) -> Self {
        Self {
            direction: Direction::Request,
            opcode,
            module_index,
            status: Status::Ok,
            seq,
            payload,
        }
    }

    /// 构造成功响应（回显请求的序列号、操作码与模块编号）
    pub fn ok(request: &Frame, payload: Payload) -> Self {
        Self {
            direction: Direction::Response,
            opcode: request.opcode,
            module_index: request.module_index,
            status: Status::Ok,
            seq: request.seq,
            payload,
        }
    }

    /// 构造故障响应
    pub fn device_error(request: &Frame, code: i32) -> Self {
        Self {
            direction: Direction::Response,
            opcode: request.opcode,
            module_index: request.module_index,
            status: Status::DeviceError,
            seq: request.seq,
            payload: Payload::Int(code as i64),
        }
    }

    pub fn header(&self) -> Result<Header, ProtocolError> {
        let len = self.payload.encoded_len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Header {
            direction: self.direction,
            opcode: self.opcode,
            module_index: self.module_index,
            status: self.status,
            payload_tag: self.payload.tag().into(),
            seq: self.seq,
            payload_len: len as u32,
        })
    }

    /// 编码为字节序列
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + header.payload_len as usize);
        header.encode_into(&mut buf);
        self.payload.encode_into(&mut buf);
        Ok(buf.to_vec())
    }

    /// 由已解码的消息头和负载字节组装
    pub fn from_parts(header: Header, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::TooShort {
                expected: header.payload_len as usize,
                actual: payload.len(),
            });
        }
        Ok(Self {
            direction: header.direction,
            opcode: header.opcode,
            module_index: header.module_index,
            status: header.status,
            seq: header.seq,
            payload: Payload::decode(header.payload_tag, payload)?,
        })
    }

    /// 从完整字节序列解码
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = Header::decode(buf)?;
        let end = HEADER_LEN + header.payload_len as usize;
        if buf.len() < end {
            return Err(ProtocolError::TooShort {
                expected: end,
                actual: buf.len(),
            });
        }
        Self::from_parts(header, &buf[HEADER_LEN..end])
    }

    /// 响应中携带的设备故障码
    pub fn fault_code(&self) -> Option<i32> {
        match (self.status, &self.payload) {
            (Status::DeviceError, Payload::Int(code)) => Some(*code as i32),
            (Status::DeviceError, _) => Some(0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let frame = Frame::request(0x01020304, 3, Opcode::SetTimer, Payload::Pair(0, 1_000));
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 16);
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], 0); // request
        assert_eq!(&bytes[2..4], &0x0123u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &3u16.to_le_bytes());
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[7], 2); // pair
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[12..16], &16u32.to_le_bytes());
    }

    #[test]
    fn test_decode_destination() {
        let dest = StreamDestination::new(
            Ipv4Addr::new(10, 1, 2, 3),
            "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            30001,
        );
        let frame = Frame::request(7, 0, Opcode::RxSetDestination, Payload::Destination(dest));
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload.as_destination().unwrap(), dest);
    }

    #[test]
    fn test_device_error_response() {
        let request = Frame::request(9, 1, Opcode::StartAcquisition, Payload::Empty);
        let response = Frame::device_error(&request, crate::fault::START_FAILED);
        let decoded = Frame::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.direction, Direction::Response);
        assert_eq!(decoded.seq, 9);
        assert_eq!(decoded.fault_code(), Some(crate::fault::START_FAILED));
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            Frame::decode(&[1, 0, 0]),
            Err(ProtocolError::TooShort { .. })
        ));

        let mut bytes = Frame::request(1, 0, Opcode::Ping, Payload::Empty)
            .encode()
            .unwrap();
        bytes[0] = 9;
        assert_eq!(
            Frame::decode(&bytes),
            Err(ProtocolError::UnsupportedVersion(9))
        );

        let mut bytes = Frame::request(1, 0, Opcode::Ping, Payload::Empty)
            .encode()
            .unwrap();
        bytes[2] = 0xEE;
        bytes[3] = 0xEE;
        assert_eq!(
            Frame::decode(&bytes),
            Err(ProtocolError::UnknownOpcode(0xEEEE))
        );

        // 负载类型与长度不符
        let mut bytes = Frame::request(1, 0, Opcode::GetDac, Payload::Int(3))
            .encode()
            .unwrap();
        bytes[7] = 2;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::PayloadLength { tag: "pair", .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = Frame::request(1, 0, Opcode::SetLock, Payload::Text("client-a".into()))
            .encode()
            .unwrap();
        assert!(Frame::decode(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_payload_accessors() {
        assert_eq!(Payload::Int(5).as_int().unwrap(), 5);
        assert!(matches!(
            Payload::Empty.as_int(),
            Err(ProtocolError::UnexpectedPayload {
                expected: "int",
                actual: "empty"
            })
        ));
        assert_eq!(
            Payload::Text("x".into()).into_text().unwrap(),
            "x".to_string()
        );
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Frame::decode(&bytes);
        }

        #[test]
        fn prop_text_payload_survives(text in "[a-zA-Z0-9_./-]{0,64}", seq in any::<u32>()) {
            let frame = Frame::request(seq, 0, Opcode::RxSetFilePath, Payload::Text(text.clone()));
            let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded.payload, Payload::Text(text));
            prop_assert_eq!(decoded.seq, seq);
        }
    }
}

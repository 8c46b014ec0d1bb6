//! 请求操作码
//!
//! 编号规则：
//! - `0x00xx`：通用（两端都支持）
//! - `0x01xx`：探测器模块
//! - `0x02xx`：数据接收器

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 操作码
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Opcode {
    /// 连通性探测
    Ping = 0x0001,

    // ------------------------------------------------------------------
    // 模块：状态与标识
    // ------------------------------------------------------------------
    GetStatus = 0x0100,
    GetDetectorType = 0x0101,
    GetFirmwareVersion = 0x0102,
    GetSoftwareVersion = 0x0103,
    GetImageSize = 0x0104,
    GetErrorMask = 0x0105,
    ClearErrorMask = 0x0106,
    StartAcquisition = 0x0107,
    StopAcquisition = 0x0108,

    // ------------------------------------------------------------------
    // 模块：寄存器 / DAC / ADC
    // ------------------------------------------------------------------
    GetRegister = 0x0110,
    SetRegister = 0x0111,
    GetDac = 0x0112,
    SetDac = 0x0113,
    GetAdc = 0x0114,

    // ------------------------------------------------------------------
    // 模块：采集参数
    // ------------------------------------------------------------------
    GetDynamicRange = 0x0120,
    SetDynamicRange = 0x0121,
    GetTimer = 0x0122,
    SetTimer = 0x0123,
    GetTimingMode = 0x0124,
    SetTimingMode = 0x0125,
    GetReadoutSpeed = 0x0126,
    SetReadoutSpeed = 0x0127,
    GetSettings = 0x0128,
    SetSettings = 0x0129,
    GetAllTrimbits = 0x012A,
    SetAllTrimbits = 0x012B,
    GetCounterBit = 0x012C,
    SetCounterBit = 0x012D,
    GetPowerChip = 0x012E,
    SetPowerChip = 0x012F,

    // ------------------------------------------------------------------
    // 模块：锁
    // ------------------------------------------------------------------
    GetLockOwner = 0x0130,
    SetLock = 0x0131,

    // ------------------------------------------------------------------
    // 接收器
    // ------------------------------------------------------------------
    RxGetStatus = 0x0200,
    RxStart = 0x0201,
    RxStop = 0x0202,
    RxFramesCaught = 0x0203,
    RxLastFrameIndex = 0x0204,
    RxSetDestination = 0x0205,
    RxGetDestination = 0x0206,
    RxSetFilePath = 0x0207,
    RxGetFilePath = 0x0208,
    RxSetFileName = 0x0209,
    RxGetFileName = 0x020A,
    RxSetFileIndex = 0x020B,
    RxGetFileIndex = 0x020C,
    RxSetFileWrite = 0x020D,
    RxGetFileWrite = 0x020E,
    RxSetStreaming = 0x020F,
    RxGetStreaming = 0x0210,
    RxGetLockOwner = 0x0211,
    RxSetLock = 0x0212,
}

impl Opcode {
    /// 是否为接收器操作码
    pub fn is_receiver(self) -> bool {
        (u16::from(self) & 0xFF00) == 0x0200
    }

    /// 是否为模块操作码
    pub fn is_module(self) -> bool {
        (u16::from(self) & 0xFF00) == 0x0100
    }

    /// 是否会改变设备状态
    ///
    /// 采集进行中，模块会拒绝除 `StopAcquisition` 之外的写操作。
    pub fn is_write(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            ClearErrorMask
                | SetRegister
                | SetDac
                | SetDynamicRange
                | SetTimer
                | SetTimingMode
                | SetReadoutSpeed
                | SetSettings
                | SetAllTrimbits
                | SetCounterBit
                | SetPowerChip
                | RxSetDestination
                | RxSetFilePath
                | RxSetFileName
                | RxSetFileIndex
                | RxSetFileWrite
                | RxSetStreaming
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_u16() {
        assert_eq!(Opcode::try_from(0x0100u16).unwrap(), Opcode::GetStatus);
        assert_eq!(Opcode::try_from(0x0212u16).unwrap(), Opcode::RxSetLock);
        assert!(Opcode::try_from(0x0300u16).is_err());
    }

    #[test]
    fn test_opcode_groups() {
        assert!(Opcode::RxStart.is_receiver());
        assert!(!Opcode::RxStart.is_module());
        assert!(Opcode::StartAcquisition.is_module());
        assert!(!Opcode::Ping.is_module() && !Opcode::Ping.is_receiver());
    }

    #[test]
    fn test_stop_is_not_a_write() {
        // 运行中必须允许停止
        assert!(!Opcode::StopAcquisition.is_write());
        assert!(Opcode::SetTimer.is_write());
    }
}

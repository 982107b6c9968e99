//! 通道子系统错误类型
//!
//! 驱动只会看到一个封闭的结果集合，可通过 [`CioError::to_errno()`] 转换为系统调用错误码。

use core::fmt;

/// 通道子系统错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CioError {
    /// 子通道忙，或重试次数耗尽 (-EBUSY)
    Busy,
    /// 设备不可操作或没有可用路径 (-ENODEV)
    NoDevice,
    /// 子通道号处不存在子通道 (-ENXIO)
    NotPresent,
    /// 设备号在黑名单中 (-ENOENT)
    DeviceIgnored,
    /// 操作将阻塞（同步锁被其它子通道持有）(-EAGAIN)
    WouldBlock,
    /// 设备不支持该协议（路径组、扩展标识）(-EOPNOTSUPP)
    NotSupported,
    /// 子通道已被其它驱动绑定 (-EEXIST)
    AlreadyOwned,
    /// 句柄未绑定在该子通道上 (-EINVAL)
    NotOwned,
    /// 无效参数 (-EINVAL)
    InvalidArgument,
    /// 同步等待超时 (-ETIMEDOUT)
    Timeout,
    /// 停止/清除升级后仍失败 (-EIO)
    HardwareFailure,
}

impl CioError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            CioError::DeviceIgnored => -2,
            CioError::HardwareFailure => -5,
            CioError::NotPresent => -6,
            CioError::WouldBlock => -11,
            CioError::Busy => -16,
            CioError::AlreadyOwned => -17,
            CioError::NoDevice => -19,
            CioError::NotOwned | CioError::InvalidArgument => -22,
            CioError::NotSupported => -95,
            CioError::Timeout => -110,
        }
    }
}

impl fmt::Display for CioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CioError::Busy => "subchannel busy",
            CioError::NoDevice => "device not operational",
            CioError::NotPresent => "subchannel not present",
            CioError::DeviceIgnored => "device ignored",
            CioError::WouldBlock => "operation would block",
            CioError::NotSupported => "not supported by device",
            CioError::AlreadyOwned => "subchannel already owned",
            CioError::NotOwned => "subchannel not owned by caller",
            CioError::InvalidArgument => "invalid argument",
            CioError::Timeout => "timed out",
            CioError::HardwareFailure => "hardware failure",
        };
        f.write_str(msg)
    }
}

/// 通道子系统操作结果
pub type CioResult<T> = Result<T, CioError>;

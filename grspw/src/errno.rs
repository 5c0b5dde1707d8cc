//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 驱动错误代码定义
//!
//! 数值沿用 include/uapi/asm-generic/errno.h，方便 C 风格调用方
//! 直接拿到负数返回码

use core::fmt;

/// 驱动错误代码
///
/// "0 个包被处理" 不是错误，数据通路操作以 `Ok(0)` 返回；
/// 这里只包含调用顺序错误和资源错误。
///
/// 使用方法：
/// ```rust
/// use grspw::errno::SpwError;
///
/// let err = SpwError::NotStarted;
/// assert_eq!(err.as_neg_i32(), -(SpwError::NotStarted as i32));
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpwError {
    /// 设备或通道号不存在 (ENODEV, 19)
    NoDevice = 19,

    /// 设备或通道已被打开 (EBUSY, 16)
    AlreadyOpen = 16,

    /// 描述符表内存不足 (ENOMEM, 12)
    NoResources = 12,

    /// 通道已启动 (EALREADY, 114)
    AlreadyStarted = 114,

    /// 通道未启动 (ENOTCONN, 107)
    NotStarted = 107,

    /// 通道仍在运行，只能在停止状态下调用 (EINPROGRESS, 115)
    StillStarted = 115,

    /// 关闭前必须先停止通道 (EPERM, 1)
    NotStopped = 1,

    /// 通道或设备未打开 (EBADF, 9)
    NotOpen = 9,

    /// 设备上仍有打开的 DMA 通道 (ETXTBSY, 26)
    Busy = 26,

    /// 参数无效 (EINVAL, 22)
    InvalidArgument = 22,

    /// 中断注册失败 (EIO, 5)
    Isr = 5,
}

impl SpwError {
    /// 转换为系统调用风格的负数返回码
    pub const fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }

    /// 错误描述
    pub const fn as_str(self) -> &'static str {
        match self {
            SpwError::NoDevice => "no such device or DMA channel",
            SpwError::AlreadyOpen => "already open",
            SpwError::NoResources => "out of descriptor memory",
            SpwError::AlreadyStarted => "DMA channel already started",
            SpwError::NotStarted => "DMA channel not started",
            SpwError::StillStarted => "DMA channel still started",
            SpwError::NotStopped => "DMA channel must be stopped before close",
            SpwError::NotOpen => "not open",
            SpwError::Busy => "DMA channels still open",
            SpwError::InvalidArgument => "invalid argument",
            SpwError::Isr => "interrupt registration failed",
        }
    }
}

impl fmt::Display for SpwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.as_neg_i32())
    }
}

/// 驱动结果类型
pub type SpwResult<T> = Result<T, SpwError>;

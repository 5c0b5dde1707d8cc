//! grspw 驱动配置（自动生成）
//!
//! 此文件由 build.rs 根据 Grspw.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 驱动名称
pub const DRIVER_NAME: &str = "grspw";

/// 驱动版本
pub const DRIVER_VERSION: &str = "0.1.0";

// ============================================================
// DMA 配置
// ============================================================

/// 每个通道最多 TX 描述符数量
pub const TXBD_NR: usize = 64;

/// 每个通道最多 RX 描述符数量
pub const RXBD_NR: usize = 128;

/// 描述符表大小（字节）
pub const BDTAB_SIZE: usize = 1024;

/// 描述符表对齐要求（字节）
pub const BDTAB_ALIGN: usize = 1024;

/// 默认最大接收包长度（字节）
pub const DEFAULT_RXMAX: u32 = 4096;

/// 默认 DMA 通道标志
pub const DEFAULT_DMAFLAGS: u32 = 0;

/// 每个 GRSPW 核最多 DMA 通道数
pub const MAX_DMA_CHANS: usize = 4;

/// 调度计数最小水位的初始值
pub const SCHED_CNT_MIN_INIT: usize = 0x3fffffff;

// ============================================================
// 设备配置
// ============================================================

/// Registry 最多可注册的设备数
pub const MAX_DEVICES: usize = 8;

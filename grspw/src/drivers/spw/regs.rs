//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! GRSPW2 寄存器布局与位定义
//!
//! 参考 GRLIB IP Core User's Manual, GRSPW2 章节

use core::cell::UnsafeCell;
use bitflags::bitflags;

/// 32 位 MMIO 寄存器
///
/// 所有访问都是 volatile 的。宿主机测试时寄存器块就是一段普通内存。
#[repr(transparent)]
pub struct Reg(UnsafeCell<u32>);

// 寄存器的并发读改写由设备锁保护
unsafe impl Sync for Reg {}
unsafe impl Send for Reg {}

impl Reg {
    pub const fn new(value: u32) -> Self {
        Self(UnsafeCell::new(value))
    }

    #[inline]
    pub fn read(&self) -> u32 {
        unsafe { core::ptr::read_volatile(self.0.get()) }
    }

    #[inline]
    pub fn write(&self, value: u32) {
        unsafe { core::ptr::write_volatile(self.0.get(), value) }
    }

    /// 读-改-写：先清 `clear` 再置 `set`
    ///
    /// 调用者必须持有设备锁。
    #[inline]
    pub fn modify(&self, clear: u32, set: u32) -> u32 {
        let value = (self.read() & !clear) | set;
        self.write(value);
        value
    }

    /// 寄存器地址（写入描述符基址寄存器等场景）
    pub fn addr(&self) -> usize {
        self.0.get() as usize
    }
}

/// DMA 通道寄存器（每个通道 0x20 字节）
#[repr(C)]
pub struct GrspwDmaRegs {
    /// DMA 通道控制 (0x00)
    pub ctrl: Reg,
    /// 最大接收包长度 (0x04)
    pub rxmax: Reg,
    /// TX 描述符表基址/当前位置 (0x08)
    pub txdesc: Reg,
    /// RX 描述符表基址/当前位置 (0x0C)
    pub rxdesc: Reg,
    /// 通道节点地址 (0x10)
    pub addr: Reg,
    _resv: [Reg; 3],
}

/// GRSPW 核寄存器
#[repr(C)]
pub struct GrspwRegs {
    /// 控制寄存器 (0x00)
    pub ctrl: Reg,
    /// 状态寄存器 (0x04)
    pub status: Reg,
    /// 默认节点地址 (0x08)
    pub nodeaddr: Reg,
    /// 时钟分频 (0x0C)
    pub clkdiv: Reg,
    /// 目的密钥 (0x10)
    pub destkey: Reg,
    /// Time-code (0x14)
    pub time: Reg,
    /// 仅 GRSPW1 (0x18)
    pub timer: Reg,
    _resv1: Reg,
    /// DMA 通道寄存器 (0x20 + 0x20 * N)
    pub dma: [GrspwDmaRegs; 4],
}

impl GrspwDmaRegs {
    pub const fn zeroed() -> Self {
        Self {
            ctrl: Reg::new(0),
            rxmax: Reg::new(0),
            txdesc: Reg::new(0),
            rxdesc: Reg::new(0),
            addr: Reg::new(0),
            _resv: [Reg::new(0), Reg::new(0), Reg::new(0)],
        }
    }
}

impl GrspwRegs {
    /// 全零寄存器块（宿主机模拟和测试使用）
    pub const fn zeroed() -> Self {
        Self {
            ctrl: Reg::new(0),
            status: Reg::new(0),
            nodeaddr: Reg::new(0),
            clkdiv: Reg::new(0),
            destkey: Reg::new(0),
            time: Reg::new(0),
            timer: Reg::new(0),
            _resv1: Reg::new(0),
            dma: [
                GrspwDmaRegs::zeroed(),
                GrspwDmaRegs::zeroed(),
                GrspwDmaRegs::zeroed(),
                GrspwDmaRegs::zeroed(),
            ],
        }
    }

    /// 把 MMIO 基地址解释为寄存器块
    ///
    /// # Safety
    /// `base` 必须是 GRSPW 核的寄存器基地址，且在驱动生命周期内有效
    pub unsafe fn from_base(base: usize) -> &'static Self {
        &*(base as *const Self)
    }
}

bitflags! {
    /// 核控制寄存器位 (0x00)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ctrl: u32 {
        /// 硬件 RMAP 可用
        const RA = 1 << 31;
        /// RX 非对齐访问可用
        const RX = 1 << 30;
        /// RMAP CRC 可用
        const RC = 1 << 29;
        /// DMA 通道数 - 1
        const NCH = 0x3 << 27;
        /// 端口数 - 1
        const PO = 1 << 26;
        /// 分布式中断可用
        const ID = 1 << 24;
        /// 链路错误时禁用
        const LE = 1 << 22;
        /// 端口选择
        const PS = 1 << 21;
        /// 无端口强制（硬件自动选择）
        const NP = 1 << 20;
        /// RMAP 缓冲禁用
        const RD = 1 << 17;
        /// RMAP 使能
        const RE = 1 << 16;
        /// Time-code 接收使能
        const TR = 1 << 11;
        /// Time-code 发送使能
        const TT = 1 << 10;
        /// 链路错误中断
        const LI = 1 << 9;
        /// Tick-out 中断
        const TQ = 1 << 8;
        /// 复位
        const RS = 1 << 6;
        /// 混杂模式
        const PM = 1 << 5;
        /// Tick-in
        const TI = 1 << 4;
        /// 全局中断使能
        const IE = 1 << 3;
        /// 自动启动
        const AS = 1 << 2;
        /// 链路启动
        const LS = 1 << 1;
        /// 链路禁用
        const LD = 1 << 0;

        /// 链路配置位
        const LINK_CFG = Self::LI.bits() | Self::AS.bits() | Self::LS.bits() | Self::LD.bits();
        /// 核级中断源
        const IRQSRC = Self::LI.bits() | Self::TQ.bits();
        /// Time-code 配置位
        const TC_CFG = Self::TR.bits() | Self::TT.bits() | Self::TQ.bits();
        /// RMAP 选项
        const RMAP_OPTS = Self::RE.bits() | Self::RD.bits();
        /// 只读的硬件能力位
        const HW_CAPS = Self::RA.bits() | Self::RX.bits() | Self::RC.bits()
            | Self::NCH.bits() | Self::PO.bits() | Self::ID.bits();
        /// 关闭设备时保留的位（链路和 RMAP 可能仍在使用）
        const STOP_KEEP = Self::LD.bits() | Self::LS.bits() | Self::AS.bits()
            | Self::RE.bits() | Self::RD.bits() | Self::NP.bits() | Self::PS.bits();
    }
}

/// 控制寄存器中各字段的位偏移
pub mod ctrl_bit {
    pub const NCH: u32 = 27;
    pub const PS: u32 = 21;
    pub const PM: u32 = 5;
}

bitflags! {
    /// 核状态寄存器位 (0x04)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// 链路状态（3 位）
        const LS = 0x7 << 21;
        /// 当前活动端口
        const AP = 1 << 9;
        /// 提前 EOP/EEP
        const EE = 1 << 8;
        /// 无效地址
        const IA = 1 << 7;
        /// 写同步错误（仅 GRSPW1）
        const WE = 1 << 6;
        /// 奇偶校验错误
        const PE = 1 << 4;
        /// 断连错误
        const DE = 1 << 3;
        /// Escape 错误
        const ER = 1 << 2;
        /// Credit 错误
        const CE = 1 << 1;
        /// Tick-out
        const TO = 1 << 0;

        /// 会导致链路断开的错误
        const LINK_ERRORS = Self::PE.bits() | Self::DE.bits() | Self::ER.bits() | Self::CE.bits();
    }
}

/// 状态寄存器字段偏移
pub mod status_bit {
    pub const LS: u32 = 21;
    pub const AP: u32 = 9;
}

bitflags! {
    /// DMA 通道控制寄存器位 (0x20 * N)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaCtrl: u32 {
        /// 链路错误时禁用通道
        const LE = 1 << 16;
        /// 剥离 PID
        const SP = 1 << 15;
        /// 剥离地址
        const SA = 1 << 14;
        /// 通道独立节点地址使能
        const EN = 1 << 13;
        /// 无描述符时不丢包 (No spill)
        const NS = 1 << 12;
        /// RX 描述符可用
        const RD = 1 << 11;
        /// RX 活动
        const RX = 1 << 10;
        /// 中止发送
        const AT = 1 << 9;
        /// RX AHB 错误
        const RA = 1 << 8;
        /// TX AHB 错误
        const TA = 1 << 7;
        /// 已接收包
        const PR = 1 << 6;
        /// 已发送包
        const PS = 1 << 5;
        /// AHB 错误中断
        const AI = 1 << 4;
        /// 接收中断
        const RI = 1 << 3;
        /// 发送中断
        const TI = 1 << 2;
        /// 接收使能
        const RE = 1 << 1;
        /// 发送使能
        const TE = 1 << 0;

        /// AHB 错误（通道级致命错误）
        const STATUS_ERROR = Self::RA.bits() | Self::TA.bits();
        /// 写 1 清零的状态位
        const STATUS_MASK = Self::STATUS_ERROR.bits() | Self::PR.bits() | Self::PS.bits();
        /// 停止通道时保留的配置位
        const STOP_KEEP = Self::LE.bits() | Self::EN.bits() | Self::SP.bits()
            | Self::SA.bits() | Self::NS.bits();
    }
}

/// DMA 控制寄存器字段偏移
pub mod dmactrl_bit {
    pub const EN: u32 = 13;
    pub const NS: u32 = 12;
}

/// RX 描述符控制字位
pub mod rxbd {
    /// 接收长度
    pub const LEN: u32 = 0x1ff_ffff;
    /// 使能（硬件拥有）
    pub const EN: u32 = 1 << 25;
    /// 回绕到表头
    pub const WR: u32 = 1 << 26;
    /// 完成时产生中断
    pub const IE: u32 = 1 << 27;
    /// EEP 结尾
    pub const EP: u32 = 1 << 28;
    /// 头 CRC 错误
    pub const HC: u32 = 1 << 29;
    /// 数据 CRC 错误
    pub const DC: u32 = 1 << 30;
    /// 被截断
    pub const TR: u32 = 1 << 31;
    /// 状态位到包标志的移位
    pub const FLAGS_SHIFT: u32 = 20;
}

/// TX 描述符控制字位
pub mod txbd {
    /// 头长度
    pub const HLEN: u32 = 0xff;
    /// 不计算 CRC 的头部字节数
    pub const NCL: u32 = 0xf << 8;
    /// 使能（硬件拥有）
    pub const EN: u32 = 1 << 12;
    /// 回绕到表头
    pub const WR: u32 = 1 << 13;
    /// 完成时产生中断
    pub const IE: u32 = 1 << 14;
    /// 链路错误
    pub const LE: u32 = 1 << 15;
    /// 追加头 CRC
    pub const HC: u32 = 1 << 16;
    /// 追加数据 CRC
    pub const DC: u32 = 1 << 17;
    /// 包标志到控制字的移位
    pub const FLAGS_SHIFT: u32 = 8;
}

/// 时钟分频寄存器
pub mod clkdiv {
    pub const START: u32 = 0xff << 8;
    pub const RUN: u32 = 0xff;
    pub const MASK: u32 = START | RUN;
}

/// Time 寄存器
pub mod time {
    pub const TCTRL: u32 = 0x3 << 6;
    pub const TCNT: u32 = 0x3f;
}

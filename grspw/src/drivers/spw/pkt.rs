//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! SpaceWire 包描述与包池
//!
//! 包由应用创建并保存在 `PktPool` 中；驱动和应用之间通过
//! `PktList`（包句柄 FIFO）转移包的所有权。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::list::{LinkArena, List};

/// 硬件总线地址
///
/// 驱动原样写入描述符，地址转换由调用者完成。
pub type BusAddr = u32;

bitflags! {
    /// TX 包标志
    ///
    /// 低字节和 0x0300 是请求标志（提交前由调用者设置），
    /// 0xc000 是完成标志（回收时由驱动设置）。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxPktFlags: u16 {
        /// 头部开头不参与 CRC 计算的字节数（0..=15）
        const NOCRC_MASK = 0x000f;
        /// 完成时产生中断
        const IE = 0x0040;
        /// 追加头 CRC
        const HCRC = 0x0100;
        /// 追加数据 CRC
        const DCRC = 0x0200;
        /// 已发送
        const TX = 0x4000;
        /// 发送时遇到链路错误
        const LINKERR = 0x8000;

        const INPUT_MASK = Self::NOCRC_MASK.bits() | Self::IE.bits()
            | Self::HCRC.bits() | Self::DCRC.bits();
        const OUTPUT_MASK = Self::TX.bits() | Self::LINKERR.bits();
    }
}

impl TxPktFlags {
    /// 设置不参与 CRC 的头部字节数
    pub fn with_nocrc_len(self, len: u8) -> Self {
        (self - Self::NOCRC_MASK) | Self::from_bits_truncate(len as u16 & 0xf)
    }

    /// 不参与 CRC 的头部字节数
    pub fn nocrc_len(self) -> u8 {
        (self.bits() & Self::NOCRC_MASK.bits()) as u8
    }
}

bitflags! {
    /// RX 包标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxPktFlags: u16 {
        /// 接收完成时产生中断
        const IE = 0x0010;
        /// 包以 EEP 结尾
        const EEOP = 0x0100;
        /// 头 CRC 错误（仅在启用 RMAP CRC 时有效）
        const HCRC = 0x0200;
        /// 数据 CRC 错误（仅在启用 RMAP CRC 时有效）
        const DCRC = 0x0400;
        /// 包被截断
        const TRUNK = 0x0800;
        /// 已接收
        const RX = 0x8000;

        const INPUT_MASK = Self::IE.bits();
        /// 由描述符状态位映射过来的标志
        const ERROR_MASK = Self::EEOP.bits() | Self::HCRC.bits()
            | Self::DCRC.bits() | Self::TRUNK.bits();
        const OUTPUT_MASK = Self::ERROR_MASK.bits() | Self::RX.bits();
    }
}

/// 包句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PktId(u32);

impl PktId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// SpaceWire 包
///
/// - RX 时 `hdr`/`hlen` 不使用
/// - `flags` 的含义取决于方向，见 [`TxPktFlags`] 和 [`RxPktFlags`]
/// - RX 完成后 `dlen` 被改写为实际接收长度
#[derive(Debug, Clone, Default)]
pub struct Packet {
    next: Option<PktId>,
    /// 用户标签（驱动不修改）
    pub pkt_id: u32,
    /// 数据缓冲区总线地址
    pub data: BusAddr,
    /// 数据长度
    pub dlen: u32,
    /// 头缓冲区总线地址
    pub hdr: BusAddr,
    /// 头长度
    pub hlen: u8,
    /// 方向相关的包标志
    pub flags: u16,
}

impl Packet {
    /// 构造发送包
    pub fn tx(pkt_id: u32, hdr: BusAddr, hlen: u8, data: BusAddr, dlen: u32, flags: TxPktFlags) -> Self {
        Self {
            next: None,
            pkt_id,
            data,
            dlen,
            hdr,
            hlen,
            flags: flags.bits(),
        }
    }

    /// 构造接收缓冲区
    pub fn rx(pkt_id: u32, data: BusAddr, flags: RxPktFlags) -> Self {
        Self {
            next: None,
            pkt_id,
            data,
            dlen: 0,
            hdr: 0,
            hlen: 0,
            flags: flags.bits(),
        }
    }

    pub fn tx_flags(&self) -> TxPktFlags {
        TxPktFlags::from_bits_retain(self.flags)
    }

    pub fn rx_flags(&self) -> RxPktFlags {
        RxPktFlags::from_bits_retain(self.flags)
    }

    pub fn set_tx_flags(&mut self, flags: TxPktFlags) {
        self.flags = flags.bits();
    }

    pub fn set_rx_flags(&mut self, flags: RxPktFlags) {
        self.flags = flags.bits();
    }

    /// 是否已成功交给硬件发送
    pub fn was_sent(&self) -> bool {
        self.tx_flags().contains(TxPktFlags::TX)
    }

    /// 是否已由硬件填充
    pub fn was_received(&self) -> bool {
        self.rx_flags().contains(RxPktFlags::RX)
    }
}

static NEXT_POOL_TAG: AtomicU32 = AtomicU32::new(1);

/// 包池
///
/// 所有包都归包池所有，链表和描述符环只保存 [`PktId`]。
/// 一个 DMA 方向上仍在环上的包必须用同一个包池取回，
/// 每个包池有唯一的标签，通道用它拒绝混用的包池。
#[derive(Debug)]
pub struct PktPool {
    tag: u32,
    pkts: Vec<Packet>,
}

impl Default for PktPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PktPool {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tag: NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed),
            pkts: Vec::with_capacity(capacity),
        }
    }

    /// 包池标签
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// 把包放入池中并返回句柄
    pub fn insert(&mut self, mut pkt: Packet) -> PktId {
        pkt.next = None;
        let id = PktId(self.pkts.len() as u32);
        self.pkts.push(pkt);
        id
    }

    pub fn get(&self, id: PktId) -> &Packet {
        &self.pkts[id.index()]
    }

    pub fn get_mut(&mut self, id: PktId) -> &mut Packet {
        &mut self.pkts[id.index()]
    }

    pub fn len(&self) -> usize {
        self.pkts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkts.is_empty()
    }

    /// 插入一批包并返回按插入顺序排列的链表
    pub fn insert_list<T>(&mut self, pkts: T) -> PktList
    where
        T: IntoIterator<Item = Packet>,
    {
        let mut list = PktList::new();
        for pkt in pkts {
            let id = self.insert(pkt);
            list.append(self, id);
        }
        list
    }
}

impl core::ops::Index<PktId> for PktPool {
    type Output = Packet;

    fn index(&self, id: PktId) -> &Packet {
        self.get(id)
    }
}

impl core::ops::IndexMut<PktId> for PktPool {
    fn index_mut(&mut self, id: PktId) -> &mut Packet {
        self.get_mut(id)
    }
}

impl LinkArena for PktPool {
    type Id = PktId;

    fn next(&self, id: PktId) -> Option<PktId> {
        self.pkts[id.index()].next
    }

    fn set_next(&mut self, id: PktId, next: Option<PktId>) {
        self.pkts[id.index()].next = next;
    }
}

/// SpaceWire 包链表
pub type PktList = List<PktId>;

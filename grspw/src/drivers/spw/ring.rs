//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! GRSPW 描述符环
//!
//! 每个 DMA 通道有一个 TX 环和一个 RX 环。环由两部分组成：
//! - 硬件可见的描述符表（1 KiB 对齐，最多 64 个 TX / 128 个 RX 描述符）
//! - 软件侧的槽位表，记录每个描述符当前绑定的包
//!
//! 描述符控制字中的使能位 (EN) 是软件和 DMA 引擎之间唯一的同步点：
//! 软件置位时使用 Release，读取完成状态时使用 Acquire。
//!
//! ```text
//!     Free ──schedule()──> HardwareOwned ──DMA 完成──> SoftwareReady
//!       ▲                                                   │
//!       └──────────────────harvest()/flush()────────────────┘
//! ```
//!
//! 硬件拥有的槽位总是从 `tail` 开始的一段连续区间。

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::{BDTAB_ALIGN, BDTAB_SIZE, RXBD_NR, TXBD_NR};
use crate::list::LinkArena;
use super::pkt::{Packet, PktId, PktList, PktPool, RxPktFlags, TxPktFlags};
use super::regs::{rxbd, txbd};

/// 一次回收的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Harvest {
    /// 回收的包数量
    pub count: usize,
    /// 遇到链路错误的 TX 包
    pub link_err: usize,
    /// 被截断的 RX 包
    pub truncated: usize,
    /// 以 EEP 结尾的 RX 包
    pub bad_end: usize,
}

/// 槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 未绑定包
    Free,
    /// 已绑定，描述符仍由硬件拥有
    HardwareOwned,
    /// 已绑定，硬件已完成但尚未回收
    SoftwareReady,
}

/// 硬件描述符
pub trait Descriptor: Sync + Sized + 'static {
    /// 全零描述符
    const EMPTY: Self;

    /// 控制字使能位
    const EN: u32;

    /// 控制字
    fn ctrl(&self) -> &AtomicU32;

    /// 清空描述符（使能位清零）
    fn clear(&self);

    /// 清除包上一次残留的完成标志
    fn reset_output(pkt: &mut Packet);

    /// 按包内容填写描述符并交给硬件
    fn arm(&self, pkt: &Packet, wrap: bool);

    /// 把完成状态写回包，并累计错误计数
    fn complete(ctrl: u32, pkt: &mut Packet, report: &mut Harvest);
}

/// TX 描述符（16 字节）
#[repr(C)]
pub struct TxBd {
    pub ctrl: AtomicU32,
    pub haddr: AtomicU32,
    pub dlen: AtomicU32,
    pub daddr: AtomicU32,
}

/// RX 描述符（8 字节）
#[repr(C)]
pub struct RxBd {
    pub ctrl: AtomicU32,
    pub addr: AtomicU32,
}

impl Descriptor for TxBd {
    const EMPTY: Self = Self {
        ctrl: AtomicU32::new(0),
        haddr: AtomicU32::new(0),
        dlen: AtomicU32::new(0),
        daddr: AtomicU32::new(0),
    };

    const EN: u32 = txbd::EN;

    fn ctrl(&self) -> &AtomicU32 {
        &self.ctrl
    }

    fn clear(&self) {
        self.ctrl.store(0, Ordering::Release);
        self.haddr.store(0, Ordering::Relaxed);
        self.dlen.store(0, Ordering::Relaxed);
        self.daddr.store(0, Ordering::Relaxed);
    }

    fn reset_output(pkt: &mut Packet) {
        pkt.flags &= !TxPktFlags::OUTPUT_MASK.bits();
    }

    fn arm(&self, pkt: &Packet, wrap: bool) {
        let mut ctrl = txbd::EN;

        if pkt.hdr != 0 && pkt.hlen != 0 {
            self.haddr.store(pkt.hdr, Ordering::Relaxed);
            ctrl |= pkt.hlen as u32;
        } else {
            self.haddr.store(0, Ordering::Relaxed);
        }

        // IE/HCRC/DCRC/NOCRC 与控制字的 IE/HC/DC/NCL 相差 8 位
        ctrl |= ((pkt.flags & TxPktFlags::INPUT_MASK.bits()) as u32) << txbd::FLAGS_SHIFT;

        if wrap {
            ctrl |= txbd::WR;
        }

        if pkt.data != 0 && pkt.dlen != 0 {
            self.daddr.store(pkt.data, Ordering::Relaxed);
            self.dlen.store(pkt.dlen, Ordering::Relaxed);
        } else {
            self.daddr.store(0, Ordering::Relaxed);
            self.dlen.store(0, Ordering::Relaxed);
        }

        // 地址字段必须先于使能位对硬件可见
        self.ctrl.store(ctrl, Ordering::Release);
    }

    fn complete(ctrl: u32, pkt: &mut Packet, report: &mut Harvest) {
        let mut flags = pkt.tx_flags() - TxPktFlags::OUTPUT_MASK;
        flags |= TxPktFlags::TX;
        if ctrl & txbd::LE != 0 {
            flags |= TxPktFlags::LINKERR;
            report.link_err += 1;
        }
        pkt.set_tx_flags(flags);
    }
}

impl Descriptor for RxBd {
    const EMPTY: Self = Self {
        ctrl: AtomicU32::new(0),
        addr: AtomicU32::new(0),
    };

    const EN: u32 = rxbd::EN;

    fn ctrl(&self) -> &AtomicU32 {
        &self.ctrl
    }

    fn clear(&self) {
        self.ctrl.store(0, Ordering::Release);
        self.addr.store(0, Ordering::Relaxed);
    }

    fn reset_output(pkt: &mut Packet) {
        pkt.flags &= !RxPktFlags::OUTPUT_MASK.bits();
    }

    fn arm(&self, pkt: &Packet, wrap: bool) {
        self.addr.store(pkt.data, Ordering::Relaxed);

        let mut ctrl = rxbd::EN;
        if wrap {
            ctrl |= rxbd::WR;
        }
        if pkt.rx_flags().contains(RxPktFlags::IE) {
            ctrl |= rxbd::IE;
        }

        self.ctrl.store(ctrl, Ordering::Release);
    }

    fn complete(ctrl: u32, pkt: &mut Packet, report: &mut Harvest) {
        pkt.dlen = ctrl & rxbd::LEN;

        // TR/DC/HC/EP 右移 20 位正好落在 TRUNK/DCRC/HCRC/EEOP 上
        let status = RxPktFlags::from_bits_truncate((ctrl >> rxbd::FLAGS_SHIFT) as u16)
            & RxPktFlags::ERROR_MASK;
        let flags = (pkt.rx_flags() - RxPktFlags::OUTPUT_MASK) | status | RxPktFlags::RX;
        pkt.set_rx_flags(flags);

        if ctrl & rxbd::TR != 0 {
            report.truncated += 1;
        }
        if ctrl & rxbd::EP != 0 {
            report.bad_end += 1;
        }
    }
}

/// 硬件描述符表
#[repr(C, align(1024))]
pub struct BdTable<D, const N: usize>([D; N]);

impl<D: Descriptor, const N: usize> BdTable<D, N> {
    /// 创建全零描述符表（可用于 `static` 用户描述符表）
    pub const fn new() -> Self {
        Self([const { D::EMPTY }; N])
    }

    pub fn bds(&self) -> &[D] {
        &self.0
    }
}

impl<D: Descriptor, const N: usize> Default for BdTable<D, N> {
    fn default() -> Self {
        Self::new()
    }
}

pub type TxBdTable = BdTable<TxBd, TXBD_NR>;
pub type RxBdTable = BdTable<RxBd, RXBD_NR>;

const _: () = assert!(core::mem::align_of::<TxBdTable>() == BDTAB_ALIGN);
const _: () = assert!(core::mem::size_of::<TxBdTable>() <= BDTAB_SIZE);
const _: () = assert!(core::mem::size_of::<RxBdTable>() <= BDTAB_SIZE);

/// 描述符表存储
///
/// 由驱动分配（`dma_open`）或由用户提供（`dma_open_userbuf`）。
pub enum BdStorage<T: 'static> {
    /// 驱动从堆上分配，关闭通道时释放
    Owned(NonNull<T>),
    /// 用户提供的静态描述符表
    User(&'static T),
}

// 描述符表只包含原子字段
unsafe impl<T: Sync> Send for BdStorage<T> {}
unsafe impl<T: Sync> Sync for BdStorage<T> {}

impl<T: 'static> BdStorage<T> {
    /// 分配对齐的、全零的描述符表
    ///
    /// 全零对于只包含 `AtomicU32` 的描述符表是合法值。
    pub fn alloc() -> Option<Self> {
        let layout = Layout::new::<T>();
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) as *mut T };
        NonNull::new(ptr).map(BdStorage::Owned)
    }

    pub fn get(&self) -> &T {
        match self {
            BdStorage::Owned(ptr) => unsafe { ptr.as_ref() },
            BdStorage::User(table) => table,
        }
    }
}

impl<T: 'static> Drop for BdStorage<T> {
    fn drop(&mut self) {
        if let BdStorage::Owned(ptr) = self {
            unsafe {
                alloc::alloc::dealloc(ptr.as_ptr() as *mut u8, Layout::new::<T>());
            }
        }
    }
}

/// 描述符环
pub struct Ring<D: Descriptor, const N: usize> {
    table: BdStorage<BdTable<D, N>>,
    /// 每个槽位绑定的包
    slots: [Option<PktId>; N],
    /// 实际使用的描述符数量（最后一个带回绕位）
    size: usize,
    /// 下一个要交给硬件的槽位
    head: usize,
    /// 最早的尚未回收的槽位
    tail: usize,
    /// 当前绑定的包数量
    sched_cnt: usize,
    /// 环上的包所属包池的标签
    pool_tag: Option<u32>,
}

pub type TxRing = Ring<TxBd, TXBD_NR>;
pub type RxRing = Ring<RxBd, RXBD_NR>;

impl<D: Descriptor, const N: usize> Ring<D, N> {
    /// 在给定存储上创建环，`size` 必须在 `1..=N` 之间
    pub fn new(table: BdStorage<BdTable<D, N>>, size: usize) -> Self {
        debug_assert!(size >= 1 && size <= N);
        let mut ring = Self {
            table,
            slots: [None; N],
            size: size.clamp(1, N),
            head: 0,
            tail: 0,
            sched_cnt: 0,
            pool_tag: None,
        };
        ring.reset();
        ring
    }

    /// 清空环：解绑所有槽位并清零描述符
    ///
    /// 只能在通道停止时调用，绑定的包会被丢弃，调用前应先 flush。
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.sched_cnt = 0;
        self.pool_tag = None;
        self.slots = [None; N];
        for bd in self.table.get().bds() {
            bd.clear();
        }
    }

    /// 描述符表的总线地址（写入 txdesc/rxdesc 寄存器）
    pub fn base_addr(&self) -> u32 {
        self.table.get() as *const BdTable<D, N> as usize as u32
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// 当前绑定在环上的包数量
    pub fn sched_count(&self) -> usize {
        self.sched_cnt
    }

    /// 描述符（供测试模拟硬件使用）
    pub fn bd(&self, index: usize) -> &D {
        &self.table.get().bds()[index]
    }

    /// 槽位绑定的包
    pub fn slot(&self, index: usize) -> Option<PktId> {
        self.slots[index]
    }

    pub fn slot_state(&self, index: usize) -> SlotState {
        match self.slots[index] {
            None => SlotState::Free,
            Some(_) => {
                if self.bd(index).ctrl().load(Ordering::Acquire) & D::EN != 0 {
                    SlotState::HardwareOwned
                } else {
                    SlotState::SoftwareReady
                }
            }
        }
    }

    /// 检查 `pool` 是否就是环上的包所属的包池
    ///
    /// 环为空时改为绑定 `pool`。返回 false 表示包池不匹配。
    pub fn bind_pool(&mut self, pool: &PktPool) -> bool {
        match self.pool_tag {
            Some(tag) if self.sched_cnt > 0 && tag != pool.tag() => false,
            _ => {
                self.pool_tag = Some(pool.tag());
                true
            }
        }
    }

    #[inline]
    fn next_index(&self, index: usize) -> usize {
        if index + 1 == self.size {
            0
        } else {
            index + 1
        }
    }

    /// 把用户链表中尽可能多的包绑定到空闲描述符上 (USER -> SCHED)
    ///
    /// 返回绑定的包数量。环满或链表为空时返回 0。
    pub fn schedule(&mut self, pool: &mut PktPool, user: &mut PktList) -> usize {
        let Some(first) = user.head() else {
            return 0;
        };

        let table = self.table.get();
        let mut cnt = 0;
        let mut cur = self.head;
        let mut last = None;
        let mut pkt = Some(first);

        while let Some(id) = pkt {
            if self.slots[cur].is_some() {
                // 环已满
                break;
            }

            D::reset_output(&mut pool[id]);
            self.slots[cur] = Some(id);
            table.bds()[cur].arm(&pool[id], cur + 1 == self.size);

            #[cfg(feature = "debug_log")]
            log::trace!("grspw: ring: slot {} <- pkt {:?}", cur, id);

            last = Some(id);
            cur = self.next_index(cur);
            cnt += 1;

            if Some(id) == user.tail() {
                break;
            }
            pkt = pool.next(id);
        }

        if let Some(last) = last {
            user.remove_head_list(pool, &PktList::from_range(first, last));
            self.head = cur;
            self.sched_cnt += cnt;
        }

        cnt
    }

    /// 回收硬件已完成的描述符，按调度顺序追加到 `user` 尾部 (SCHED -> USER)
    pub fn harvest(&mut self, pool: &mut PktPool, user: &mut PktList) -> Harvest {
        let table = self.table.get();
        let mut report = Harvest::default();
        let mut done = PktList::new();
        let mut cur = self.tail;

        while let Some(id) = self.slots[cur] {
            let ctrl = table.bds()[cur].ctrl().load(Ordering::Acquire);
            if ctrl & D::EN != 0 {
                // 硬件仍在处理
                break;
            }

            D::complete(ctrl, &mut pool[id], &mut report);
            self.slots[cur] = None;
            done.append(pool, id);

            #[cfg(feature = "debug_log")]
            log::trace!("grspw: ring: slot {} -> pkt {:?} ctrl={:#x}", cur, id, ctrl);

            cur = self.next_index(cur);
            report.count += 1;
        }

        if report.count > 0 {
            self.tail = cur;
            self.sched_cnt -= report.count;
            user.append_list(pool, &done);
        }

        report
    }

    /// 强制回收所有仍绑定的包（通道必须已停止）
    ///
    /// 先正常回收已完成的描述符，再把剩余的包原样移到 `user`，
    /// 这些包的 TX/RX 完成标志保持为 0。
    pub fn flush(&mut self, pool: &mut PktPool, user: &mut PktList) -> (Harvest, usize) {
        let report = self.harvest(pool, user);

        let table = self.table.get();
        let mut flushed = 0;
        let mut cur = self.tail;

        while let Some(id) = self.slots[cur].take() {
            table.bds()[cur].clear();
            user.append(pool, id);
            cur = self.next_index(cur);
            flushed += 1;
        }

        self.head = cur;
        self.tail = cur;
        self.sched_cnt -= flushed;

        (report, flushed)
    }

    /// 统计硬件已完成但尚未回收的描述符数量
    pub fn done_count(&self) -> usize {
        let mut cnt = 0;
        let mut cur = self.tail;
        while self.slot_state(cur) == SlotState::SoftwareReady {
            cnt += 1;
            cur = self.next_index(cur);
            if cur == self.tail {
                break;
            }
        }
        cnt
    }

    /// 实际绑定的槽位数量（O(N)，用于校验计数）
    pub fn bound_count(&self) -> usize {
        self.slots[..self.size].iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::spw::pkt::Packet;
    use alloc::vec::Vec;

    fn tx_ring(size: usize) -> TxRing {
        TxRing::new(BdStorage::alloc().unwrap(), size)
    }

    fn tx_pkts(pool: &mut PktPool, n: u32) -> PktList {
        pool.insert_list((0..n).map(|i| {
            Packet::tx(i, 0, 0, 0x4000_0000 + i * 0x100, 64, TxPktFlags::empty())
        }))
    }

    /// 模拟 DMA 引擎完成 `index` 号描述符
    fn hw_complete(ring: &TxRing, index: usize, extra: u32) {
        let bd = ring.bd(index);
        let ctrl = bd.ctrl.load(Ordering::Relaxed);
        bd.ctrl.store((ctrl & !txbd::EN) | extra, Ordering::Release);
    }

    #[test]
    fn test_table_alignment() {
        let ring = tx_ring(4);
        assert_eq!(ring.base_addr() as usize % BDTAB_ALIGN, 0);
        let rx = RxRing::new(BdStorage::alloc().unwrap(), RXBD_NR);
        assert_eq!(rx.base_addr() as usize % BDTAB_ALIGN, 0);
    }

    #[test]
    fn test_schedule_sets_wrap_on_last() {
        let mut pool = PktPool::new();
        let mut user = tx_pkts(&mut pool, 3);
        let mut ring = tx_ring(3);

        assert_eq!(ring.schedule(&mut pool, &mut user), 3);
        assert!(user.is_empty());

        for i in 0..3 {
            let ctrl = ring.bd(i).ctrl.load(Ordering::Relaxed);
            assert_ne!(ctrl & txbd::EN, 0);
            assert_eq!(ctrl & txbd::WR != 0, i == 2);
            assert_eq!(ring.slot_state(i), SlotState::HardwareOwned);
        }
        assert_eq!(ring.bd(1).daddr.load(Ordering::Relaxed), 0x4000_0100);
        assert_eq!(ring.bd(1).dlen.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn test_schedule_tx_header_and_flags() {
        let mut pool = PktPool::new();
        let flags = TxPktFlags::IE | TxPktFlags::HCRC | TxPktFlags::DCRC;
        let id = pool.insert(Packet::tx(7, 0x5000_0000, 4, 0x6000_0000, 100, flags.with_nocrc_len(1)));
        let mut user = PktList::new();
        user.append(&mut pool, id);

        let mut ring = tx_ring(4);
        assert_eq!(ring.schedule(&mut pool, &mut user), 1);

        let bd = ring.bd(0);
        let ctrl = bd.ctrl.load(Ordering::Relaxed);
        assert_eq!(ctrl & txbd::HLEN, 4);
        assert_eq!((ctrl & txbd::NCL) >> 8, 1);
        assert_ne!(ctrl & txbd::IE, 0);
        assert_ne!(ctrl & txbd::HC, 0);
        assert_ne!(ctrl & txbd::DC, 0);
        assert_eq!(bd.haddr.load(Ordering::Relaxed), 0x5000_0000);
    }

    #[test]
    fn test_harvest_stops_at_hardware_owned() {
        let mut pool = PktPool::new();
        let mut user = tx_pkts(&mut pool, 4);
        let mut ring = tx_ring(4);
        ring.schedule(&mut pool, &mut user);

        hw_complete(&ring, 0, 0);
        hw_complete(&ring, 2, 0);

        let mut out = PktList::new();
        let report = ring.harvest(&mut pool, &mut out);
        assert_eq!(report.count, 1);
        assert_eq!(ring.sched_count(), 3);
        assert_eq!(ring.done_count(), 0);

        hw_complete(&ring, 1, 0);
        assert_eq!(ring.done_count(), 2);
        let report = ring.harvest(&mut pool, &mut out);
        assert_eq!(report.count, 2);

        let order: Vec<u32> = out.iter(&pool).map(|id| pool[id].pkt_id).collect();
        assert_eq!(order, [0, 1, 2]);
        assert_eq!(ring.sched_count(), ring.bound_count());
    }

    #[test]
    fn test_harvest_link_error() {
        let mut pool = PktPool::new();
        let mut user = tx_pkts(&mut pool, 1);
        let mut ring = tx_ring(2);
        ring.schedule(&mut pool, &mut user);
        hw_complete(&ring, 0, txbd::LE);

        let mut out = PktList::new();
        let report = ring.harvest(&mut pool, &mut out);
        assert_eq!(report.link_err, 1);

        let id = out.head().unwrap();
        assert!(pool[id].tx_flags().contains(TxPktFlags::LINKERR | TxPktFlags::TX));
    }

    #[test]
    fn test_flush_recovers_everything() {
        let mut pool = PktPool::new();
        let mut user = tx_pkts(&mut pool, 3);
        let mut ring = tx_ring(4);
        ring.schedule(&mut pool, &mut user);
        hw_complete(&ring, 0, 0);

        let mut out = PktList::new();
        let (report, flushed) = ring.flush(&mut pool, &mut out);
        assert_eq!(report.count, 1);
        assert_eq!(flushed, 2);
        assert_eq!(ring.sched_count(), 0);
        assert_eq!(ring.bound_count(), 0);

        let sent: Vec<bool> = out.iter(&pool).map(|id| pool[id].was_sent()).collect();
        assert_eq!(sent, [true, false, false]);
    }

    #[test]
    fn test_bind_pool() {
        let mut pool = PktPool::new();
        let other = PktPool::new();
        let mut user = tx_pkts(&mut pool, 1);
        let mut ring = tx_ring(2);

        assert!(ring.bind_pool(&pool));
        ring.schedule(&mut pool, &mut user);
        assert!(!ring.bind_pool(&other));
        assert!(ring.bind_pool(&pool));

        hw_complete(&ring, 0, 0);
        let mut out = PktList::new();
        ring.harvest(&mut pool, &mut out);
        // 环空了以后可以换包池
        assert!(ring.bind_pool(&other));
    }

    #[test]
    fn test_rx_complete_decodes_status() {
        let mut pool = PktPool::new();
        let id = pool.insert(Packet::rx(1, 0x4000_0000, RxPktFlags::IE));
        let mut user = PktList::new();
        user.append(&mut pool, id);

        let mut ring = RxRing::new(BdStorage::alloc().unwrap(), 2);
        assert_eq!(ring.schedule(&mut pool, &mut user), 1);
        assert_ne!(ring.bd(0).ctrl.load(Ordering::Relaxed) & rxbd::IE, 0);
        assert_eq!(ring.bd(0).addr.load(Ordering::Relaxed), 0x4000_0000);

        ring.bd(0).ctrl.store(rxbd::EP | rxbd::DC | 37, Ordering::Release);

        let mut out = PktList::new();
        let report = ring.harvest(&mut pool, &mut out);
        assert_eq!(report.bad_end, 1);
        assert_eq!(report.truncated, 0);

        let pkt = &pool[id];
        assert_eq!(pkt.dlen, 37);
        assert_eq!(
            pkt.rx_flags(),
            RxPktFlags::IE | RxPktFlags::EEOP | RxPktFlags::DCRC | RxPktFlags::RX
        );
    }
}

//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! GRSPW DMA 通道
//!
//! 每个通道有独立的 TX 环和 RX 环，各自由一把自旋锁保护，
//! 所以发送和接收可以在不同线程中驱动。设备锁只用于 DMA 控制
//! 寄存器的读-改-写以及 started 状态切换（与中断处理程序互斥）。
//!
//! 锁顺序：环锁 -> 设备锁 -> 统计锁。线程上下文在关中断状态下
//! 持有设备锁和统计锁（见 [`super::irq`]）。
//!
//! 每次打开通道时代数加一，句柄记住打开时的代数。通道关闭并被重新
//! 打开后，旧句柄上的操作返回 `NotOpen`，不会影响新的打开实例。
//!
//! 生命周期：
//! ```text
//! open ──> start ──> [tx_send / tx_reclaim / rx_prepare / rx_recv] ──> stop
//!   ▲                                                                   │
//!   │                      tx_flush / rx_flush <─────────────────────────┤
//!   └──────────────────────────────── close <────────────────────────────┘
//! ```

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, info, warn};
use spin::Mutex;

use crate::config::{DEFAULT_RXMAX, RXBD_NR, TXBD_NR};
use crate::errno::{SpwError, SpwResult};
use super::device::GrspwDevice;
use super::pkt::{PktList, PktPool};
use super::regs::{dmactrl_bit, rxbd, DmaCtrl, GrspwDmaRegs};
use super::ring::{BdStorage, Harvest, RxBdTable, RxRing, TxBdTable, TxRing};
use super::stats::{DmaConfig, DmaFlags, DmaStats};

/// 通道内部状态（属于设备）
pub(crate) struct DmaChan {
    dev_index: usize,
    chan_no: usize,
    regs: &'static GrspwDmaRegs,
    open: AtomicBool,
    started: AtomicBool,
    /// 打开次数，只在设备锁下修改
    gen: AtomicU32,
    cfg: Mutex<DmaConfig>,
    stats: Mutex<DmaStats>,
    tx: Mutex<Option<TxRing>>,
    rx: Mutex<Option<RxRing>>,
}

impl DmaChan {
    pub(crate) fn new(dev_index: usize, chan_no: usize, regs: &'static GrspwDmaRegs) -> Self {
        Self {
            dev_index,
            chan_no,
            regs,
            open: AtomicBool::new(false),
            started: AtomicBool::new(false),
            gen: AtomicU32::new(0),
            cfg: Mutex::new(DmaConfig::default()),
            stats: Mutex::new(DmaStats::new()),
            tx: Mutex::new(None),
            rx: Mutex::new(None),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// 中止当前发送并关闭收发，只保留地址和剥离配置
    ///
    /// 调用者必须持有设备锁。
    pub(crate) fn hw_stop(&self) {
        let ctrl = self.regs.ctrl.read() & DmaCtrl::STOP_KEEP.bits();
        self.regs.ctrl.write(ctrl | DmaCtrl::AT.bits());
    }

    /// 通道寄存器软复位（通道未打开时调用）
    pub(crate) fn hw_softreset(&self) {
        let ctrl = self.regs.ctrl.read() & (DmaCtrl::LE | DmaCtrl::EN).bits();
        self.regs.ctrl.write(ctrl);
        self.regs.rxmax.write(DEFAULT_RXMAX);
        self.regs.txdesc.write(0);
        self.regs.rxdesc.write(0);
    }

    /// 停止通道，返回通道之前是否在运行
    ///
    /// 调用者必须持有设备锁。
    pub(crate) fn stop_locked(&self) -> bool {
        if !self.started.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.hw_stop();
        true
    }

    /// 中断服务：统计中断，遇到致命错误时停止通道
    ///
    /// `link_err` 表示核状态寄存器报告了链路错误。调用者必须持有设备锁。
    pub(crate) fn handle_irq(&self, link_err: bool) {
        if !self.is_open() || !self.started.load(Ordering::Acquire) {
            return;
        }

        let ctrl = DmaCtrl::from_bits_retain(self.regs.ctrl.read());
        let events = ctrl & DmaCtrl::STATUS_MASK;
        let mut stats = self.stats.lock();

        if !events.is_empty() {
            stats.irq_cnt = stats.irq_cnt.wrapping_add(1);
        }

        if ctrl.intersects(DmaCtrl::STATUS_ERROR) {
            self.stop_locked();
            stats.err_ahb = stats.err_ahb.wrapping_add(1);
            warn!(
                "grspw{}: dma{}: AHB error (ctrl={:#x}), channel stopped",
                self.dev_index, self.chan_no, ctrl.bits()
            );
        } else if link_err && ctrl.contains(DmaCtrl::LE) {
            self.stop_locked();
            stats.err_link_fatal = stats.err_link_fatal.wrapping_add(1);
            warn!(
                "grspw{}: dma{}: link error, channel stopped",
                self.dev_index, self.chan_no
            );
        } else if !events.is_empty() {
            // 应答 PS/PR
            self.regs.ctrl.modify(DmaCtrl::STATUS_MASK.bits(), events.bits());
        }
    }
}

/// 打开的 DMA 通道句柄
///
/// 由 [`GrspwDevice::dma_open`] 返回。除 close 外所有操作只需要 `&self`：
/// 每个方向同一时刻只应有一个调用者，TX 和 RX 可以在不同线程中使用。
///
/// 每个方向上仍在环上的包必须用提交它们的同一个 [`PktPool`] 取回，
/// 否则返回 `InvalidArgument`。
pub struct DmaChannel<'d> {
    dev: &'d GrspwDevice,
    chan: &'d DmaChan,
    gen: u32,
}

impl fmt::Debug for DmaChannel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaChannel")
            .field("dev", &self.chan.dev_index)
            .field("chan_no", &self.chan.chan_no)
            .field("gen", &self.gen)
            .finish()
    }
}

/// 关闭失败时交还句柄
#[derive(Debug)]
pub struct CloseError<'d> {
    pub chan: DmaChannel<'d>,
    pub error: SpwError,
}

impl<'d> CloseError<'d> {
    pub fn into_inner(self) -> DmaChannel<'d> {
        self.chan
    }
}

impl fmt::Display for CloseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dma{}: close failed: {}", self.chan.chan_no(), self.error)
    }
}

impl<'d> DmaChannel<'d> {
    /// 打开通道
    ///
    /// - 通道号超出硬件通道数或描述符表分配失败时返回 `NoResources`
    /// - 设备未打开（或正在关闭）时返回 `NotOpen`
    /// - 通道已打开时返回 `AlreadyOpen`
    /// - `txbd_nr`/`rxbd_nr` 必须在 `1..=TXBD_NR` / `1..=RXBD_NR` 之间
    pub(crate) fn open(
        dev: &'d GrspwDevice,
        chan_no: usize,
        tables: Option<(&'static TxBdTable, &'static RxBdTable)>,
        txbd_nr: usize,
        rxbd_nr: usize,
    ) -> SpwResult<Self> {
        if !dev.is_open() {
            return Err(SpwError::NotOpen);
        }
        if chan_no >= dev.dma_count() {
            return Err(SpwError::NoResources);
        }
        if !(1..=TXBD_NR).contains(&txbd_nr) || !(1..=RXBD_NR).contains(&rxbd_nr) {
            return Err(SpwError::InvalidArgument);
        }

        let (tx_table, rx_table) = match tables {
            Some((tx, rx)) => (BdStorage::User(tx), BdStorage::User(rx)),
            None => {
                let tx = BdStorage::alloc().ok_or(SpwError::NoResources)?;
                let rx = BdStorage::alloc().ok_or(SpwError::NoResources)?;
                (tx, rx)
            }
        };

        let chan = dev.chan(chan_no);
        let mut tx = chan.tx.lock();
        let mut rx = chan.rx.lock();

        let gen = {
            let _guard = dev.lock_irqsave(&dev.devlock);
            // 设备关闭在设备锁下检查通道，这里重新检查设备状态
            if !dev.is_open() {
                return Err(SpwError::NotOpen);
            }
            if chan.open.load(Ordering::Acquire) {
                return Err(SpwError::AlreadyOpen);
            }

            chan.started.store(false, Ordering::Release);
            *chan.cfg.lock() = DmaConfig::default();
            chan.stats.lock().clear();
            *tx = Some(TxRing::new(tx_table, txbd_nr));
            *rx = Some(RxRing::new(rx_table, rxbd_nr));
            let gen = chan.gen.load(Ordering::Relaxed).wrapping_add(1);
            chan.gen.store(gen, Ordering::Release);
            chan.open.store(true, Ordering::Release);
            gen
        };

        info!(
            "grspw{}: dma{}: opened ({} TX / {} RX descriptors)",
            chan.dev_index, chan_no, txbd_nr, rxbd_nr
        );
        Ok(Self { dev, chan, gen })
    }

    /// 通道号
    pub fn chan_no(&self) -> usize {
        self.chan.chan_no
    }

    pub fn is_started(&self) -> bool {
        self.is_current() && self.chan.started.load(Ordering::Acquire)
    }

    /// 句柄属于通道当前的打开实例
    fn is_current(&self) -> bool {
        self.chan.is_open() && self.chan.gen.load(Ordering::Acquire) == self.gen
    }

    fn check_open(&self) -> SpwResult<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(SpwError::NotOpen)
        }
    }

    fn check_started(&self) -> SpwResult<()> {
        self.check_open()?;
        if self.is_started() {
            Ok(())
        } else {
            Err(SpwError::NotStarted)
        }
    }

    fn check_stopped(&self) -> SpwResult<()> {
        self.check_open()?;
        if self.is_started() {
            Err(SpwError::StillStarted)
        } else {
            Ok(())
        }
    }

    /// 启动通道
    ///
    /// 复位两个环和统计信息，写入描述符表基址、最大接收长度和控制字。
    /// 此时还没有可用描述符，收发要等到第一次 tx_send/rx_prepare 才真正开始。
    pub fn start(&self) -> SpwResult<()> {
        let mut tx_guard = self.chan.tx.lock();
        let mut rx_guard = self.chan.rx.lock();
        self.check_open()?;
        if self.is_started() {
            return Err(SpwError::AlreadyStarted);
        }
        let tx = tx_guard.as_mut().ok_or(SpwError::NotOpen)?;
        let rx = rx_guard.as_mut().ok_or(SpwError::NotOpen)?;

        if tx.sched_count() != 0 || rx.sched_count() != 0 {
            warn!(
                "grspw{}: dma{}: start drops {} TX / {} RX packets still scheduled",
                self.chan.dev_index,
                self.chan.chan_no,
                tx.sched_count(),
                rx.sched_count()
            );
        }
        tx.reset();
        rx.reset();
        self.dev.lock_irqsave(&self.chan.stats).clear();

        let cfg = *self.chan.cfg.lock();
        let regs = self.chan.regs;
        regs.txdesc.write(tx.base_addr());
        regs.rxdesc.write(rx.base_addr());
        regs.rxmax.write(cfg.rxmaxlen);

        let ctrl = DmaCtrl::TI
            | DmaCtrl::RI
            | DmaCtrl::AI
            | DmaCtrl::PS
            | DmaCtrl::PR
            | DmaCtrl::TA
            | DmaCtrl::RA
            | DmaCtrl::RE;
        let ctrl = ctrl.bits() | (cfg.flags.bits() << dmactrl_bit::NS);

        {
            let _guard = self.dev.lock_irqsave(&self.dev.devlock);
            // 节点地址使能位由 addr_ctrl 管理
            let ctrl = ctrl | (regs.ctrl.read() & DmaCtrl::EN.bits());
            regs.ctrl.write(ctrl);
            self.chan.started.store(true, Ordering::Release);
        }

        info!("grspw{}: dma{}: started", self.chan.dev_index, self.chan.chan_no);
        Ok(())
    }

    /// 停止通道
    ///
    /// 中止正在发送的包并关闭收发。已停止时是空操作。
    /// 停止后用 tx_flush/rx_flush 取回仍在环上的包。
    /// 通道已被关闭（或重新打开）时什么也不做。
    pub fn stop(&self) {
        let stopped = {
            let _guard = self.dev.lock_irqsave(&self.dev.devlock);
            self.is_current() && self.chan.stop_locked()
        };
        if stopped {
            info!("grspw{}: dma{}: stopped", self.chan.dev_index, self.chan.chan_no);
        }
    }

    /// 关闭通道并释放驱动分配的描述符表
    ///
    /// 通道必须已停止，否则返回 `NotStopped`，句柄随错误交还。
    pub fn close(self) -> Result<(), CloseError<'d>> {
        match self.close_rings() {
            Ok(()) => Ok(()),
            Err(error) => Err(CloseError { chan: self, error }),
        }
    }

    fn close_rings(&self) -> SpwResult<()> {
        let mut tx = self.chan.tx.lock();
        let mut rx = self.chan.rx.lock();
        {
            let _guard = self.dev.lock_irqsave(&self.dev.devlock);
            self.check_open()?;
            if self.chan.started.load(Ordering::Acquire) {
                return Err(SpwError::NotStopped);
            }
            self.chan.open.store(false, Ordering::Release);
        }

        let lost = tx.as_ref().map_or(0, |r| r.sched_count())
            + rx.as_ref().map_or(0, |r| r.sched_count());
        if lost != 0 {
            warn!(
                "grspw{}: dma{}: closed with {} packets not flushed",
                self.chan.dev_index, self.chan.chan_no, lost
            );
        }
        *tx = None;
        *rx = None;

        info!("grspw{}: dma{}: closed", self.chan.dev_index, self.chan.chan_no);
        Ok(())
    }

    /// 在设备锁下清除完成/错误状态并打开收发引擎
    ///
    /// 通道在此期间被中断处理程序停止时什么也不做。
    fn kick(&self, enable: DmaCtrl) {
        let _guard = self.dev.lock_irqsave(&self.dev.devlock);
        if !self.is_started() {
            return;
        }
        self.chan.regs.ctrl.modify(
            (DmaCtrl::PS | DmaCtrl::PR | DmaCtrl::STATUS_ERROR).bits(),
            enable.bits(),
        );
    }

    /// 把 `pkts` 中尽可能多的包交给硬件发送 (USER -> SCHED)
    ///
    /// 已调度的包从 `pkts` 头部移除，返回调度的包数量（环满时为 0）。
    pub fn tx_send(&self, pool: &mut PktPool, pkts: &mut PktList) -> SpwResult<usize> {
        let mut guard = self.chan.tx.lock();
        self.check_started()?;
        let ring = guard.as_mut().ok_or(SpwError::NotOpen)?;
        if !ring.bind_pool(pool) {
            return Err(SpwError::InvalidArgument);
        }
        let cnt = ring.schedule(pool, pkts);
        self.dev.lock_irqsave(&self.chan.stats).tx_account(&Harvest::default(), ring.sched_count());
        if cnt > 0 {
            self.kick(DmaCtrl::TE);
        }
        Ok(cnt)
    }

    /// 把已发送的包按发送顺序追加到 `pkts` 尾部 (SCHED -> USER)
    pub fn tx_reclaim(&self, pool: &mut PktPool, pkts: &mut PktList) -> SpwResult<usize> {
        let mut guard = self.chan.tx.lock();
        self.check_started()?;
        let ring = guard.as_mut().ok_or(SpwError::NotOpen)?;
        if !ring.bind_pool(pool) {
            return Err(SpwError::InvalidArgument);
        }
        let report = ring.harvest(pool, pkts);
        self.dev.lock_irqsave(&self.chan.stats).tx_account(&report, ring.sched_count());
        Ok(report.count)
    }

    /// 取回 TX 环上的全部包（通道必须已停止）
    ///
    /// 已发送的包带 TX 标志，未发送的包保持原样，顺序与提交顺序一致。
    pub fn tx_flush(&self, pool: &mut PktPool, pkts: &mut PktList) -> SpwResult<usize> {
        let mut guard = self.chan.tx.lock();
        self.check_stopped()?;
        let ring = guard.as_mut().ok_or(SpwError::NotOpen)?;
        if !ring.bind_pool(pool) {
            return Err(SpwError::InvalidArgument);
        }
        let (report, flushed) = ring.flush(pool, pkts);
        self.dev.lock_irqsave(&self.chan.stats).tx_account(&report, ring.sched_count());
        debug!(
            "grspw{}: dma{}: tx flush {} sent, {} unsent",
            self.chan.dev_index, self.chan.chan_no, report.count, flushed
        );
        Ok(report.count + flushed)
    }

    /// 把 `pkts` 中尽可能多的接收缓冲区交给硬件 (USER -> SCHED)
    pub fn rx_prepare(&self, pool: &mut PktPool, pkts: &mut PktList) -> SpwResult<usize> {
        let mut guard = self.chan.rx.lock();
        self.check_started()?;
        let ring = guard.as_mut().ok_or(SpwError::NotOpen)?;
        if !ring.bind_pool(pool) {
            return Err(SpwError::InvalidArgument);
        }
        let cnt = ring.schedule(pool, pkts);
        self.dev.lock_irqsave(&self.chan.stats).rx_account(&Harvest::default(), ring.sched_count());
        if cnt > 0 {
            self.kick(DmaCtrl::RE | DmaCtrl::RD);
        }
        Ok(cnt)
    }

    /// 把已接收的包按接收顺序追加到 `pkts` 尾部 (SCHED -> USER)
    pub fn rx_recv(&self, pool: &mut PktPool, pkts: &mut PktList) -> SpwResult<usize> {
        let mut guard = self.chan.rx.lock();
        self.check_started()?;
        let ring = guard.as_mut().ok_or(SpwError::NotOpen)?;
        if !ring.bind_pool(pool) {
            return Err(SpwError::InvalidArgument);
        }
        let report = ring.harvest(pool, pkts);
        self.dev.lock_irqsave(&self.chan.stats).rx_account(&report, ring.sched_count());
        Ok(report.count)
    }

    /// 取回 RX 环上的全部缓冲区（通道必须已停止）
    pub fn rx_flush(&self, pool: &mut PktPool, pkts: &mut PktList) -> SpwResult<usize> {
        let mut guard = self.chan.rx.lock();
        self.check_stopped()?;
        let ring = guard.as_mut().ok_or(SpwError::NotOpen)?;
        if !ring.bind_pool(pool) {
            return Err(SpwError::InvalidArgument);
        }
        let (report, flushed) = ring.flush(pool, pkts);
        self.dev.lock_irqsave(&self.chan.stats).rx_account(&report, ring.sched_count());
        debug!(
            "grspw{}: dma{}: rx flush {} received, {} empty",
            self.chan.dev_index, self.chan.chan_no, report.count, flushed
        );
        Ok(report.count + flushed)
    }

    /// 已发送但尚未回收的包数量
    pub fn tx_count(&self) -> SpwResult<usize> {
        let guard = self.chan.tx.lock();
        self.check_open()?;
        Ok(guard.as_ref().map_or(0, |r| r.done_count()))
    }

    /// 已接收但尚未取走的包数量
    pub fn rx_count(&self) -> SpwResult<usize> {
        let guard = self.chan.rx.lock();
        self.check_open()?;
        Ok(guard.as_ref().map_or(0, |r| r.done_count()))
    }

    /// TX 环上的包数量
    pub fn tx_sched_count(&self) -> usize {
        let guard = self.chan.tx.lock();
        match guard.as_ref() {
            Some(ring) if self.is_current() => ring.sched_count(),
            _ => 0,
        }
    }

    /// RX 环上的包数量
    pub fn rx_sched_count(&self) -> usize {
        let guard = self.chan.rx.lock();
        match guard.as_ref() {
            Some(ring) if self.is_current() => ring.sched_count(),
            _ => 0,
        }
    }

    /// 统计信息快照
    pub fn stats_read(&self) -> DmaStats {
        *self.dev.lock_irqsave(&self.chan.stats)
    }

    pub fn stats_clear(&self) {
        let mut stats = self.dev.lock_irqsave(&self.chan.stats);
        if self.is_current() {
            stats.clear();
        }
    }

    /// 修改通道配置（通道必须已停止，下次 start 时生效）
    pub fn config(&self, cfg: &DmaConfig) -> SpwResult<()> {
        self.check_stopped()?;
        if cfg.rxmaxlen == 0 || cfg.rxmaxlen > rxbd::LEN {
            return Err(SpwError::InvalidArgument);
        }

        let mut cur = self.chan.cfg.lock();
        cur.flags = cfg.flags & DmaFlags::all();
        cur.rxmaxlen = cfg.rxmaxlen;
        debug!(
            "grspw{}: dma{}: config flags={:#x} rxmaxlen={}",
            self.chan.dev_index,
            self.chan.chan_no,
            cur.flags.bits(),
            cur.rxmaxlen
        );
        Ok(())
    }

    pub fn config_read(&self) -> DmaConfig {
        *self.chan.cfg.lock()
    }

    #[cfg(test)]
    pub(crate) fn with_tx_ring<R>(&self, f: impl FnOnce(&TxRing) -> R) -> Option<R> {
        self.chan.tx.lock().as_ref().map(f)
    }

    #[cfg(test)]
    pub(crate) fn with_rx_ring<R>(&self, f: impl FnOnce(&RxRing) -> R) -> Option<R> {
        self.chan.rx.lock().as_ref().map(f)
    }

    /// DMA 状态位（PS/PR/TA/RA）
    pub fn get_status(&self) -> DmaCtrl {
        DmaCtrl::from_bits_retain(self.chan.regs.ctrl.read()) & DmaCtrl::STATUS_MASK
    }

    /// 清除指定的 DMA 状态位（写 1 清零）
    pub fn clear_status(&self, status: DmaCtrl) {
        let _guard = self.dev.lock_irqsave(&self.dev.devlock);
        if !self.is_current() {
            return;
        }
        let regs = self.chan.regs;
        let ctrl = regs.ctrl.read() & !DmaCtrl::STATUS_MASK.bits();
        regs.ctrl.write(ctrl | (status & DmaCtrl::STATUS_MASK).bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::spw::pkt::{Packet, TxPktFlags};
    use crate::drivers::spw::regs::txbd;
    use crate::tests::sim::SimDevice;

    #[test]
    fn test_open_checks() {
        let sim = SimDevice::new(2);
        let dev = sim.device();

        assert_eq!(dev.dma_open(2).err(), Some(SpwError::NoResources));
        assert_eq!(dev.dma_open_sized(0, 0, 8).err(), Some(SpwError::InvalidArgument));
        assert_eq!(dev.dma_open_sized(0, 8, RXBD_NR + 1).err(), Some(SpwError::InvalidArgument));

        let chan = dev.dma_open(0).unwrap();
        assert_eq!(dev.dma_open(0).err(), Some(SpwError::AlreadyOpen));
        chan.start().unwrap();
        let err = chan.close().unwrap_err();
        assert_eq!(err.error, SpwError::NotStopped);
        let chan = err.into_inner();
        chan.stop();
        chan.close().unwrap();
        assert!(dev.dma_open(0).is_ok());
    }

    #[test]
    fn test_stale_handle_after_reopen() {
        let sim = SimDevice::new(1);
        let dev = sim.device();
        let old = dev.dma_open_sized(0, 4, 4).unwrap();
        let old_gen = old.gen;
        old.close().unwrap();

        let chan = dev.dma_open_sized(0, 4, 4).unwrap();
        assert_ne!(chan.gen, old_gen);
        chan.start().unwrap();
        let mut pool = PktPool::new();
        let mut pkts = pool.insert_list(
            (0..1).map(|i| Packet::tx(i, 0, 0, 0x4000_0000, 16, TxPktFlags::empty())),
        );
        assert_eq!(chan.tx_send(&mut pool, &mut pkts), Ok(1));

        // 与已关闭的旧句柄相同的通道和代数
        let stale = DmaChannel { dev, chan: dev.chan(0), gen: old_gen };
        assert!(!stale.is_started());
        stale.stop();
        assert!(chan.is_started());
        assert_eq!(stale.tx_send(&mut pool, &mut pkts), Err(SpwError::NotOpen));
        assert_eq!(stale.tx_count(), Err(SpwError::NotOpen));
        assert_eq!(stale.tx_sched_count(), 0);
        stale.stats_clear();
        assert_eq!(chan.stats_read().tx_sched_cnt_max, 1);
        assert_eq!(stale.close().unwrap_err().error, SpwError::NotOpen);

        assert_eq!(chan.tx_sched_count(), 1);
        chan.stop();
        let mut out = PktList::new();
        assert_eq!(chan.tx_flush(&mut pool, &mut out), Ok(1));
        chan.close().unwrap();
    }

    #[test]
    fn test_open_after_device_close() {
        let sim = SimDevice::new(1);
        let dev = sim.device();
        sim.registry.close(dev).unwrap();
        assert_eq!(dev.dma_open(0).err(), Some(SpwError::NotOpen));
    }

    #[test]
    fn test_start_programs_registers() {
        let sim = SimDevice::new(1);
        let dev = sim.device();
        let chan = dev.dma_open(0).unwrap();

        sim.regs.dma[0].ctrl.write(DmaCtrl::EN.bits() | DmaCtrl::TE.bits());
        chan.config(&DmaConfig {
            flags: DmaFlags::NO_SPILL | DmaFlags::STRIP_PID,
            rxmaxlen: 1024,
        })
        .unwrap();
        chan.start().unwrap();

        let dregs = &sim.regs.dma[0];
        let ctrl = DmaCtrl::from_bits_retain(dregs.ctrl.read());
        assert!(ctrl.contains(DmaCtrl::EN | DmaCtrl::NS | DmaCtrl::SP | DmaCtrl::RE));
        assert!(ctrl.contains(DmaCtrl::TI | DmaCtrl::RI | DmaCtrl::AI));
        assert!(!ctrl.contains(DmaCtrl::TE));
        assert!(!ctrl.contains(DmaCtrl::SA));
        assert_eq!(dregs.rxmax.read(), 1024);
        assert_ne!(dregs.txdesc.read(), 0);
        assert_eq!(chan.start(), Err(SpwError::AlreadyStarted));
        assert_eq!(
            chan.config(&DmaConfig::default()),
            Err(SpwError::StillStarted)
        );
    }

    #[test]
    fn test_stop_keeps_config_bits() {
        let sim = SimDevice::new(1);
        let dev = sim.device();
        let chan = dev.dma_open(0).unwrap();
        chan.config(&DmaConfig { flags: DmaFlags::STRIP_ADR, rxmaxlen: 4096 }).unwrap();
        chan.start().unwrap();

        chan.stop();
        let ctrl = DmaCtrl::from_bits_retain(sim.regs.dma[0].ctrl.read());
        assert_eq!(ctrl, DmaCtrl::SA | DmaCtrl::AT);
        assert!(!chan.is_started());
    }

    #[test]
    fn test_send_enables_transmitter() {
        let sim = SimDevice::new(1);
        let dev = sim.device();
        let chan = dev.dma_open_sized(0, 4, 4).unwrap();
        chan.start().unwrap();

        let mut pool = PktPool::new();
        let mut pkts = pool.insert_list(
            (0..2).map(|i| Packet::tx(i, 0, 0, 0x4000_0000, 16, TxPktFlags::empty())),
        );
        assert_eq!(chan.tx_send(&mut pool, &mut pkts), Ok(2));

        let ctrl = DmaCtrl::from_bits_retain(sim.regs.dma[0].ctrl.read());
        assert!(ctrl.contains(DmaCtrl::TE));
        assert!(!ctrl.intersects(DmaCtrl::STATUS_MASK));
        assert_eq!(chan.tx_sched_count(), 2);
        assert_eq!(chan.tx_count(), Ok(0));

        sim.complete_tx(&chan, 0, 0);
        assert_eq!(chan.tx_count(), Ok(1));
        assert_ne!(sim.tx_ctrl(&chan, 1) & txbd::EN, 0);
    }

    #[test]
    fn test_clear_status() {
        let sim = SimDevice::new(1);
        let dev = sim.device();
        let chan = dev.dma_open(0).unwrap();

        sim.regs.dma[0].ctrl.write((DmaCtrl::PS | DmaCtrl::RA | DmaCtrl::RE).bits());
        assert_eq!(chan.get_status(), DmaCtrl::PS | DmaCtrl::RA);

        chan.clear_status(DmaCtrl::RA);
        // 只对 RA 写 1，其它状态位写 0
        assert_eq!(
            DmaCtrl::from_bits_retain(sim.regs.dma[0].ctrl.read()),
            DmaCtrl::RA | DmaCtrl::RE
        );
    }
}

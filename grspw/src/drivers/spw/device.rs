//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! GRSPW 设备（一个 SpaceWire 核）
//!
//! 设备管理核级寄存器：链路、端口、节点地址、RMAP、time-code，
//! 并持有最多 4 个 DMA 通道。设备锁保护控制寄存器和 DMA 控制
//! 寄存器的读-改-写，中断处理程序也在设备锁下运行。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use spin::Mutex;

use crate::config::{MAX_DMA_CHANS, RXBD_NR, TXBD_NR};
use crate::errno::{SpwError, SpwResult};
use super::dma::{DmaChan, DmaChannel};
use super::irq::{lock_irqsave, IrqController, IrqLockGuard};
use super::regs::{clkdiv, ctrl_bit, dmactrl_bit, status_bit, time, Ctrl, DmaCtrl, GrspwRegs, Status};
use super::ring::{RxBdTable, TxBdTable};

/// 硬件能力
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HwSupport {
    /// 硬件 RMAP 目标
    pub rmap: bool,
    /// RMAP CRC
    pub rmap_crc: bool,
    /// RX 允许非对齐（字节边界）缓冲区
    pub rx_unalign: bool,
    /// 端口数（1 或 2）
    pub nports: u8,
    /// DMA 通道数（1..=4）
    pub ndma_chans: u8,
    /// 设备 ID << 16 | 版本
    pub hw_version: u32,
    /// 分布式中断可用（驱动不使用）
    pub irq: bool,
}

/// 链路状态（状态寄存器 LS 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    ErrorReset = 0,
    ErrorWait = 1,
    Ready = 2,
    Started = 3,
    Connecting = 4,
    Run = 5,
}

impl LinkState {
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(LinkState::ErrorReset),
            1 => Some(LinkState::ErrorWait),
            2 => Some(LinkState::Ready),
            3 => Some(LinkState::Started),
            4 => Some(LinkState::Connecting),
            5 => Some(LinkState::Run),
            _ => None,
        }
    }
}

/// 端口选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Port0,
    Port1,
    /// 由硬件在两个端口之间自动选择
    Auto,
}

/// DMA 通道独立节点地址
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeAddr {
    /// 使能通道独立地址（否则使用默认节点地址）
    pub node_en: bool,
    pub node_addr: u8,
    pub node_mask: u8,
}

/// 节点地址配置
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AddrConfig {
    /// 忽略地址，所有包都交给第一个 DMA 通道
    pub promiscuous: bool,
    pub def_addr: u8,
    pub def_mask: u8,
    pub dma_nacfg: [NodeAddr; MAX_DMA_CHANS],
}

/// 用户中断回调，参数是进入中断时的核状态寄存器
pub type UserIsr = Arc<dyn Fn(&GrspwDevice, Status) + Send + Sync>;

/// GRSPW 设备
pub struct GrspwDevice {
    index: usize,
    regs: &'static GrspwRegs,
    irq: u32,
    hw_version: u32,
    open: AtomicBool,
    /// 保护 CTRL/DMACTRL 的读-改-写，与中断处理程序互斥
    pub(crate) devlock: Mutex<()>,
    hwsup: Mutex<HwSupport>,
    user_isr: Mutex<Option<UserIsr>>,
    irqc: Arc<dyn IrqController>,
    dma: [DmaChan; MAX_DMA_CHANS],
}

impl GrspwDevice {
    pub(crate) fn new(
        index: usize,
        regs: &'static GrspwRegs,
        irq: u32,
        hw_version: u32,
        irqc: Arc<dyn IrqController>,
    ) -> Self {
        Self {
            index,
            regs,
            irq,
            hw_version,
            open: AtomicBool::new(false),
            devlock: Mutex::new(()),
            hwsup: Mutex::new(HwSupport::default()),
            user_isr: Mutex::new(None),
            irqc,
            dma: core::array::from_fn(|i| DmaChan::new(index, i, &regs.dma[i])),
        }
    }

    /// 设备在注册表中的编号
    pub fn index(&self) -> usize {
        self.index
    }

    /// 中断号
    pub fn irq(&self) -> u32 {
        self.irq
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn chan(&self, chan_no: usize) -> &DmaChan {
        &self.dma[chan_no]
    }

    /// 关闭本核中断后获取 `lock`
    ///
    /// 线程上下文获取设备锁和统计锁时必须使用，中断处理程序直接加锁。
    pub(crate) fn lock_irqsave<'a, T>(&'a self, lock: &'a Mutex<T>) -> IrqLockGuard<'a, T> {
        lock_irqsave(&*self.irqc, lock)
    }

    fn probe_hwsup(&self) -> HwSupport {
        let ctrl = Ctrl::from_bits_retain(self.regs.ctrl.read());
        let nch = 1 + ((ctrl & Ctrl::NCH).bits() >> ctrl_bit::NCH) as usize;
        HwSupport {
            rmap: ctrl.contains(Ctrl::RA),
            rmap_crc: ctrl.contains(Ctrl::RC),
            rx_unalign: ctrl.contains(Ctrl::RX),
            nports: if ctrl.contains(Ctrl::PO) { 2 } else { 1 },
            ndma_chans: nch.min(MAX_DMA_CHANS) as u8,
            hw_version: self.hw_version,
            irq: ctrl.contains(Ctrl::ID),
        }
    }

    /// 停止所有 DMA 并关闭中断和 time-code，链路和 RMAP 保持不变
    ///
    /// 调用者必须持有设备锁。
    fn hw_stop(&self) {
        for chan in &self.dma[..self.dma_count()] {
            chan.hw_stop();
        }
        let ctrl = self.regs.ctrl.read();
        self.regs.ctrl.write(ctrl & (Ctrl::STOP_KEEP | Ctrl::HW_CAPS).bits());
    }

    /// 寄存器软复位（设备未被使用时调用）
    fn hw_softreset(&self) {
        for chan in &self.dma[..self.dma_count()] {
            chan.hw_softreset();
        }
        self.regs.status.write(0xffff_ffff);
        self.regs.time.write(0);
    }

    /// 占用设备并把硬件复位到初始状态
    pub(crate) fn open(&self) -> SpwResult<()> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(SpwError::AlreadyOpen);
        }

        let _guard = self.lock_irqsave(&self.devlock);
        *self.user_isr.lock() = None;
        *self.hwsup.lock() = self.probe_hwsup();
        self.hw_stop();
        self.hw_softreset();

        let hw = self.hw_support();
        info!(
            "grspw{}: opened, {} DMA channels, {} ports, rmap={}",
            self.index, hw.ndma_chans, hw.nports, hw.rmap
        );
        Ok(())
    }

    /// 中断注册失败时撤销 open
    pub(crate) fn abort_open(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// 检查 DMA 通道是否都已关闭，然后停止硬件并释放设备
    ///
    /// 检查和释放都在设备锁内完成，与 `dma_open` 互斥。
    pub(crate) fn close(&self) -> SpwResult<()> {
        {
            let _guard = self.lock_irqsave(&self.devlock);
            if !self.is_open() {
                return Err(SpwError::NotOpen);
            }
            if self.dma.iter().any(|chan| chan.is_open()) {
                return Err(SpwError::Busy);
            }
            self.hw_stop();
            self.open.store(false, Ordering::Release);
        }
        info!("grspw{}: closed", self.index);
        Ok(())
    }

    pub fn hw_support(&self) -> HwSupport {
        *self.hwsup.lock()
    }

    /// DMA 通道数
    pub fn dma_count(&self) -> usize {
        self.hwsup.lock().ndma_chans as usize
    }

    /// 当前链路配置（LD/LS/AS/LI）
    pub fn get_linkcfg(&self) -> Ctrl {
        Ctrl::from_bits_retain(self.regs.ctrl.read()) & Ctrl::LINK_CFG
    }

    /// 根据核级中断源开关全局中断使能位
    fn update_irq_enable(ctrl: u32) -> u32 {
        if ctrl & Ctrl::IRQSRC.bits() != 0 {
            ctrl | Ctrl::IE.bits()
        } else {
            ctrl & !Ctrl::IE.bits()
        }
    }

    /// 设置链路配置（LD/LS/AS/LI）
    ///
    /// 只有在某个核级中断源（LI/TQ）打开时才使能全局中断。
    pub fn set_linkcfg(&self, cfg: Ctrl) {
        let _guard = self.lock_irqsave(&self.devlock);
        let ctrl = self.regs.ctrl.read();
        let ctrl = (ctrl & !Ctrl::LINK_CFG.bits()) | (cfg & Ctrl::LINK_CFG).bits();
        self.regs.ctrl.write(Self::update_irq_enable(ctrl));
        debug!("grspw{}: link cfg {:#x}", self.index, cfg.bits());
    }

    pub fn get_clkdiv(&self) -> u32 {
        self.regs.clkdiv.read() & clkdiv::MASK
    }

    /// 设置时钟分频（高字节：启动速率，低字节：运行速率）
    pub fn set_clkdiv(&self, div: u32) -> SpwResult<()> {
        if div & !clkdiv::MASK != 0 {
            return Err(SpwError::InvalidArgument);
        }
        self.regs.clkdiv.write(div);
        Ok(())
    }

    /// 链路状态
    ///
    /// LS 字段出现未定义的值时按 ErrorReset 处理。
    pub fn link_state(&self) -> LinkState {
        let ls = (self.regs.status.read() & Status::LS.bits()) >> status_bit::LS;
        LinkState::from_raw(ls).unwrap_or(LinkState::ErrorReset)
    }

    /// 核状态寄存器
    pub fn get_status(&self) -> Status {
        Status::from_bits_retain(self.regs.status.read())
    }

    /// 清除状态位（写 1 清零）
    pub fn clear_status(&self, status: Status) {
        self.regs.status.write(status.bits());
    }

    /// 选择端口或查询当前端口
    ///
    /// `None` 只查询。只有一个端口时选择 Port1 返回 `InvalidArgument`。
    pub fn port_ctrl(&self, port: Option<Port>) -> SpwResult<Port> {
        let nports = self.hw_support().nports;

        match port {
            Some(Port::Port1) if nports < 2 => return Err(SpwError::InvalidArgument),
            Some(p @ (Port::Port0 | Port::Port1)) => {
                let _guard = self.lock_irqsave(&self.devlock);
                let sel = if p == Port::Port1 { 1 << ctrl_bit::PS } else { 0 };
                self.regs.ctrl.modify((Ctrl::NP | Ctrl::PS).bits(), sel);
            }
            Some(Port::Auto) => {
                let _guard = self.lock_irqsave(&self.devlock);
                self.regs.ctrl.modify(0, Ctrl::NP.bits());
            }
            None => {}
        }

        let ctrl = Ctrl::from_bits_retain(self.regs.ctrl.read());
        let cur = if ctrl.contains(Ctrl::NP) {
            if nports > 1 { Port::Auto } else { Port::Port0 }
        } else if ctrl.contains(Ctrl::PS) {
            Port::Port1
        } else {
            Port::Port0
        };
        Ok(cur)
    }

    pub fn port_count(&self) -> u8 {
        self.hw_support().nports
    }

    /// 当前活动端口
    pub fn port_active(&self) -> u8 {
        ((self.regs.status.read() & Status::AP.bits()) >> status_bit::AP) as u8
    }

    /// 设置节点地址
    ///
    /// 总是写入每个通道的地址寄存器，即使该通道不使用独立地址。
    pub fn addr_ctrl(&self, cfg: &AddrConfig) {
        let _guard = self.lock_irqsave(&self.devlock);

        let pm = (cfg.promiscuous as u32) << ctrl_bit::PM;
        self.regs.ctrl.modify(Ctrl::PM.bits(), pm);
        self.regs.nodeaddr.write(((cfg.def_mask as u32) << 8) | cfg.def_addr as u32);

        for (i, nacfg) in cfg.dma_nacfg.iter().enumerate().take(self.dma_count()) {
            let dregs = &self.regs.dma[i];
            let clear = DmaCtrl::PS | DmaCtrl::PR | DmaCtrl::STATUS_ERROR | DmaCtrl::EN;
            let ctrl = dregs.ctrl.read() & !clear.bits();
            dregs.addr.write(nacfg.node_addr as u32 | ((nacfg.node_mask as u32) << 8));
            dregs.ctrl.write(ctrl | ((nacfg.node_en as u32) << dmactrl_bit::EN));
        }
    }

    /// 设置 RMAP 选项（RE/RD）
    ///
    /// 硬件没有 RMAP 目标时不能使能 RMAP。
    pub fn rmap_set_ctrl(&self, opts: Ctrl) -> SpwResult<()> {
        let opts = opts & Ctrl::RMAP_OPTS;
        if opts.contains(Ctrl::RE) && !self.hw_support().rmap {
            return Err(SpwError::InvalidArgument);
        }
        let _guard = self.lock_irqsave(&self.devlock);
        self.regs.ctrl.modify(Ctrl::RMAP_OPTS.bits(), opts.bits());
        Ok(())
    }

    pub fn rmap_get_ctrl(&self) -> Ctrl {
        Ctrl::from_bits_retain(self.regs.ctrl.read()) & Ctrl::RMAP_OPTS
    }

    pub fn rmap_set_destkey(&self, destkey: u8) {
        self.regs.destkey.write(destkey as u32);
    }

    pub fn rmap_get_destkey(&self) -> u8 {
        (self.regs.destkey.read() & 0xff) as u8
    }

    /// Time-code 配置（TR/TT/TQ）
    pub fn get_tccfg(&self) -> Ctrl {
        Ctrl::from_bits_retain(self.regs.ctrl.read()) & Ctrl::TC_CFG
    }

    pub fn set_tccfg(&self, cfg: Ctrl) {
        let _guard = self.lock_irqsave(&self.devlock);
        let ctrl = self.regs.ctrl.read();
        let ctrl = (ctrl & !Ctrl::TC_CFG.bits()) | (cfg & Ctrl::TC_CFG).bits();
        self.regs.ctrl.write(Self::update_irq_enable(ctrl));
    }

    /// 最近一次收到的 time-code（控制位和计数）
    pub fn get_tc(&self) -> u32 {
        self.regs.time.read() & (time::TCTRL | time::TCNT)
    }

    /// 安装或移除用户中断回调
    pub fn set_isr(&self, isr: Option<UserIsr>) {
        let _guard = self.lock_irqsave(&self.devlock);
        *self.user_isr.lock() = isr;
    }

    /// 中断入口
    ///
    /// - 统计每个运行中通道的中断
    /// - AHB 错误或链路错误（通道设置了 LE）时停止对应通道
    /// - 应答 tick-out 和链路错误
    /// - 最后调用用户回调
    pub fn isr(&self) {
        let status = {
            let _guard = self.devlock.lock();
            let status = Status::from_bits_retain(self.regs.status.read());
            let link_err = status.intersects(Status::LINK_ERRORS);

            // 未打开的通道直接返回，不需要读取硬件能力
            for chan in &self.dma {
                chan.handle_irq(link_err);
            }

            let ack = status & (Status::LINK_ERRORS | Status::TO);
            if !ack.is_empty() {
                self.regs.status.write(ack.bits());
            }
            status
        };

        let user_isr = self.user_isr.lock().clone();
        if let Some(isr) = user_isr {
            isr(self, status);
        }
    }

    /// 打开 DMA 通道，使用完整大小的驱动分配描述符表
    pub fn dma_open(&self, chan_no: usize) -> SpwResult<DmaChannel<'_>> {
        DmaChannel::open(self, chan_no, None, TXBD_NR, RXBD_NR)
    }

    /// 打开 DMA 通道并指定环大小
    pub fn dma_open_sized(&self, chan_no: usize, txbd_nr: usize, rxbd_nr: usize) -> SpwResult<DmaChannel<'_>> {
        DmaChannel::open(self, chan_no, None, txbd_nr, rxbd_nr)
    }

    /// 使用调用者提供的描述符表打开 DMA 通道
    ///
    /// 描述符表在通道关闭后仍归调用者所有，同一组表不能同时给两个通道使用。
    pub fn dma_open_userbuf(
        &self,
        chan_no: usize,
        tx_table: &'static TxBdTable,
        rx_table: &'static RxBdTable,
        txbd_nr: usize,
        rxbd_nr: usize,
    ) -> SpwResult<DmaChannel<'_>> {
        DmaChannel::open(self, chan_no, Some((tx_table, rx_table)), txbd_nr, rxbd_nr)
    }
}

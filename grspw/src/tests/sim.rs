//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 模拟 GRSPW 核

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::drivers::spw::regs::{ctrl_bit, rxbd, txbd, Ctrl, DmaCtrl, GrspwRegs};
use crate::drivers::spw::{DmaChannel, GrspwDevCfg, GrspwDevice, IrqController, Registry};
use crate::errno::{SpwError, SpwResult};

/// 分配一个全零寄存器块并写入能力位（RMAP、2 个端口、`nchan` 个 DMA 通道）
pub fn leak_regs(nchan: usize) -> &'static GrspwRegs {
    let regs: &'static GrspwRegs = Box::leak(Box::new(GrspwRegs::zeroed()));
    let caps = (Ctrl::RA | Ctrl::RC | Ctrl::PO).bits();
    regs.ctrl.write(caps | (((nchan - 1) as u32) << ctrl_bit::NCH));
    regs
}

/// 记录注册情况的中断控制器
///
/// 关中断只计嵌套深度，所有线程共用。
#[derive(Default)]
pub struct TestIrq {
    handlers: Mutex<Vec<(u32, Arc<GrspwDevice>)>>,
    fail: AtomicBool,
    depth: AtomicUsize,
    saves: AtomicUsize,
}

impl TestIrq {
    /// 下一次注册失败
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// local_irq_save 的调用次数
    pub fn irq_saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn irqs_enabled(&self) -> bool {
        self.depth.load(Ordering::SeqCst) == 0
    }

    pub fn registered(&self) -> Vec<u32> {
        self.handlers.lock().iter().map(|(irq, _)| *irq).collect()
    }

    /// 触发中断
    pub fn raise(&self, irq: u32) {
        let devs: Vec<Arc<GrspwDevice>> = self
            .handlers
            .lock()
            .iter()
            .filter(|(i, _)| *i == irq)
            .map(|(_, dev)| dev.clone())
            .collect();
        for dev in devs {
            dev.isr();
        }
    }
}

impl IrqController for TestIrq {
    fn register(&self, irq: u32, dev: Arc<GrspwDevice>) -> SpwResult<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(SpwError::Isr);
        }
        self.handlers.lock().push((irq, dev));
        Ok(())
    }

    fn unregister(&self, irq: u32, dev: &GrspwDevice) -> SpwResult<()> {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(i, d)| !(*i == irq && d.index() == dev.index()));
        if handlers.len() == before {
            Err(SpwError::Isr)
        } else {
            Ok(())
        }
    }

    fn local_irq_save(&self) -> usize {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.depth.fetch_add(1, Ordering::SeqCst)
    }

    fn local_irq_restore(&self, _flags: usize) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

pub const SIM_IRQ: u32 = 7;

/// 已打开的模拟设备
pub struct SimDevice {
    pub regs: &'static GrspwRegs,
    pub irqc: Arc<TestIrq>,
    pub registry: Registry,
    dev: Arc<GrspwDevice>,
}

impl SimDevice {
    pub fn new(nchan: usize) -> Self {
        let regs = leak_regs(nchan);
        let irqc = Arc::new(TestIrq::default());
        let registry = Registry::new(irqc.clone());
        registry.register(GrspwDevCfg::new(regs, SIM_IRQ)).unwrap();
        let dev = registry.open(0).unwrap();
        // 软复位向状态寄存器写全 1（写 1 清零），模拟内存里要手动清掉
        regs.status.write(0);
        Self { regs, irqc, registry, dev }
    }

    pub fn device(&self) -> &GrspwDevice {
        &self.dev
    }

    /// 触发设备中断
    pub fn raise_irq(&self) {
        self.irqc.raise(SIM_IRQ);
    }

    /// 清掉 DMA 控制寄存器里的 PS/PR/TA/RA
    ///
    /// 硬件上这些位写 1 清零，start 写入后即为 0；模拟内存里要手动清掉。
    pub fn ack_dma_status(&self, chan_no: usize) {
        self.regs.dma[chan_no].ctrl.modify(DmaCtrl::STATUS_MASK.bits(), 0);
    }

    pub fn tx_ctrl(&self, chan: &DmaChannel<'_>, index: usize) -> u32 {
        chan.with_tx_ring(|r| r.bd(index).ctrl.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn rx_ctrl(&self, chan: &DmaChannel<'_>, index: usize) -> u32 {
        chan.with_rx_ring(|r| r.bd(index).ctrl.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// 完成 TX 描述符 `index`，`status` 是额外的状态位（如 LE）
    pub fn complete_tx(&self, chan: &DmaChannel<'_>, index: usize, status: u32) {
        chan.with_tx_ring(|r| {
            let bd = r.bd(index);
            let ctrl = bd.ctrl.load(Ordering::Relaxed);
            assert_ne!(ctrl & txbd::EN, 0, "TX descriptor {} not enabled", index);
            bd.ctrl.store((ctrl & !txbd::EN) | status, Ordering::Release);
        });
    }

    /// 按硬件顺序完成所有已使能的 TX 描述符
    pub fn complete_all_tx(&self, chan: &DmaChannel<'_>) -> usize {
        chan.with_tx_ring(|r| {
            let mut done = 0;
            let mut cur = r.tail();
            while r.bd(cur).ctrl.load(Ordering::Relaxed) & txbd::EN != 0 {
                let ctrl = r.bd(cur).ctrl.load(Ordering::Relaxed);
                r.bd(cur).ctrl.store(ctrl & !txbd::EN, Ordering::Release);
                done += 1;
                cur = (cur + 1) % r.size();
            }
            done
        })
        .unwrap_or(0)
    }

    /// 在 RX 描述符 `index` 上"接收"一个 `len` 字节的包
    pub fn complete_rx(&self, chan: &DmaChannel<'_>, index: usize, len: u32, status: u32) {
        chan.with_rx_ring(|r| {
            let bd = r.bd(index);
            let ctrl = bd.ctrl.load(Ordering::Relaxed);
            assert_ne!(ctrl & rxbd::EN, 0, "RX descriptor {} not enabled", index);
            let keep = ctrl & (rxbd::WR | rxbd::IE);
            bd.ctrl.store(keep | (len & rxbd::LEN) | status, Ordering::Release);
        });
    }
}

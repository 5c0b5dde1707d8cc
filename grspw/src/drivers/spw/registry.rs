//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! GRSPW 设备注册表
//!
//! 注册表由系统持有（而不是全局变量），保存所有注册过的 GRSPW 核。
//! 设备编号就是注册顺序。

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{info, warn};
use spin::Mutex;

use crate::config::MAX_DEVICES;
use crate::errno::{SpwError, SpwResult};
use super::device::GrspwDevice;
use super::irq::IrqController;
use super::regs::GrspwRegs;

/// GRSPW2 的 AMBA 设备 ID
pub const GAISLER_SPW2: u16 = 0x029;

/// 一个 GRSPW 核的注册信息
#[derive(Clone, Copy)]
pub struct GrspwDevCfg {
    /// 寄存器块
    pub regs: &'static GrspwRegs,
    /// 中断号
    pub irq: u32,
    /// AMBA 设备 ID
    pub device_id: u16,
    /// AMBA 版本号
    pub version: u8,
}

impl GrspwDevCfg {
    pub fn new(regs: &'static GrspwRegs, irq: u32) -> Self {
        Self {
            regs,
            irq,
            device_id: GAISLER_SPW2,
            version: 0,
        }
    }
}

/// GRSPW 设备注册表
pub struct Registry {
    devices: Mutex<Vec<Arc<GrspwDevice>>>,
    irqc: Arc<dyn IrqController>,
}

impl Registry {
    pub fn new(irqc: Arc<dyn IrqController>) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            irqc,
        }
    }

    /// 注册一个设备，返回设备编号
    pub fn register(&self, cfg: GrspwDevCfg) -> SpwResult<usize> {
        let mut devices = self.devices.lock();
        if devices.len() >= MAX_DEVICES {
            warn!("grspw: registry full, dropping device at {:#x}", cfg.regs as *const _ as usize);
            return Err(SpwError::NoResources);
        }

        let index = devices.len();
        let hw_version = (cfg.device_id as u32) << 16 | cfg.version as u32;
        devices.push(Arc::new(GrspwDevice::new(
            index,
            cfg.regs,
            cfg.irq,
            hw_version,
            self.irqc.clone(),
        )));
        Ok(index)
    }

    /// 依次注册一组设备，返回注册的数量
    pub fn init(&self, cfgs: &[GrspwDevCfg]) -> SpwResult<usize> {
        for cfg in cfgs {
            self.register(*cfg)?;
        }
        Ok(cfgs.len())
    }

    /// 注册总线扫描找到的所有核
    ///
    /// `found` 给出每个核的 `(寄存器基地址, 中断号)`，返回注册成功的数量。
    ///
    /// # Safety
    /// 每个基地址都必须是 GRSPW 核的寄存器块，且在注册表生命周期内有效
    pub unsafe fn autoinit<I>(&self, found: I) -> usize
    where
        I: IntoIterator<Item = (usize, u32)>,
    {
        let mut count = 0;
        for (base, irq) in found {
            let regs = GrspwRegs::from_base(base);
            if self.register(GrspwDevCfg::new(regs, irq)).is_err() {
                break;
            }
            count += 1;
        }
        info!("grspw: autoinit found {} devices", count);
        count
    }

    /// 已注册的设备数量
    pub fn dev_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// 打开设备
    ///
    /// 复位硬件并注册中断处理。编号不存在返回 `NoDevice`，
    /// 已打开返回 `AlreadyOpen`，中断注册失败返回 `Isr`。
    pub fn open(&self, dev_no: usize) -> SpwResult<Arc<GrspwDevice>> {
        let dev = self
            .devices
            .lock()
            .get(dev_no)
            .cloned()
            .ok_or(SpwError::NoDevice)?;

        dev.open()?;

        if let Err(err) = self.irqc.register(dev.irq(), dev.clone()) {
            warn!("grspw{}: irq {} register failed: {}", dev_no, dev.irq(), err);
            dev.abort_open();
            return Err(SpwError::Isr);
        }
        Ok(dev)
    }

    /// 关闭设备
    ///
    /// 仍有打开的 DMA 通道时返回 `Busy`。
    pub fn close(&self, dev: &GrspwDevice) -> SpwResult<()> {
        dev.close()?;
        self.irqc.unregister(dev.irq(), dev).map_err(|err| {
            warn!("grspw{}: irq {} unregister failed: {}", dev.index(), dev.irq(), err);
            SpwError::Isr
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sim::{leak_regs, TestIrq};

    fn registry() -> (Registry, Arc<TestIrq>) {
        let irqc = Arc::new(TestIrq::default());
        (Registry::new(irqc.clone()), irqc)
    }

    #[test]
    fn test_register_and_open() {
        let (reg, irqc) = registry();
        let cfgs = [GrspwDevCfg::new(leak_regs(1), 5), GrspwDevCfg::new(leak_regs(2), 6)];
        assert_eq!(reg.init(&cfgs), Ok(2));
        assert_eq!(reg.dev_count(), 2);

        assert_eq!(reg.open(2).err(), Some(SpwError::NoDevice));

        let dev = reg.open(1).unwrap();
        assert_eq!(dev.index(), 1);
        assert_eq!(dev.hw_support().ndma_chans, 2);
        assert_eq!(dev.hw_support().hw_version, 0x0029_0000);
        assert_eq!(irqc.registered(), [6]);
        assert_eq!(reg.open(1).err(), Some(SpwError::AlreadyOpen));
    }

    #[test]
    fn test_open_irq_failure_releases_device() {
        let (reg, irqc) = registry();
        reg.register(GrspwDevCfg::new(leak_regs(1), 3)).unwrap();

        irqc.fail_next();
        assert_eq!(reg.open(0).err(), Some(SpwError::Isr));
        assert!(reg.open(0).is_ok());
    }

    #[test]
    fn test_close_busy_with_open_channel() {
        let (reg, irqc) = registry();
        reg.register(GrspwDevCfg::new(leak_regs(1), 3)).unwrap();
        let dev = reg.open(0).unwrap();

        let chan = dev.dma_open(0).unwrap();
        assert_eq!(reg.close(&dev), Err(SpwError::Busy));

        chan.close().unwrap();
        assert_eq!(reg.close(&dev), Ok(()));
        assert!(irqc.registered().is_empty());
        assert_eq!(dev.dma_open(0).err(), Some(SpwError::NotOpen));

        // 可以重新打开
        assert!(reg.open(0).is_ok());
    }

    #[test]
    fn test_registry_limit() {
        let (reg, _) = registry();
        for i in 0..MAX_DEVICES {
            assert_eq!(reg.register(GrspwDevCfg::new(leak_regs(1), i as u32)), Ok(i));
        }
        assert_eq!(
            reg.register(GrspwDevCfg::new(leak_regs(1), 99)),
            Err(SpwError::NoResources)
        );
    }

    #[test]
    fn test_autoinit() {
        let (reg, _) = registry();
        let a = leak_regs(1) as *const GrspwRegs as usize;
        let b = leak_regs(4) as *const GrspwRegs as usize;

        let count = unsafe { reg.autoinit([(a, 10), (b, 11)]) };
        assert_eq!(count, 2);
        assert_eq!(reg.open(1).unwrap().dma_count(), 4);
    }
}

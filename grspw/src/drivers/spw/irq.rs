//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 中断控制器接口与关中断自旋锁
//!
//! 中断处理程序会获取设备锁和统计锁。线程上下文获取这两把锁之前
//! 必须先关闭本核中断，否则中断在锁被持有时到来会在同一个核上死锁。
//!
//! 对应 Linux 的 spin_lock_irqsave()/spin_unlock_irqrestore()。

use alloc::sync::Arc;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::errno::SpwResult;
use super::device::GrspwDevice;

/// 中断控制器接口
///
/// 控制器在中断到来时调用 [`GrspwDevice::isr`]。
pub trait IrqController: Send + Sync {
    /// 注册中断处理并使能中断源
    fn register(&self, irq: u32, dev: Arc<GrspwDevice>) -> SpwResult<()>;

    /// 注销中断处理
    fn unregister(&self, irq: u32, dev: &GrspwDevice) -> SpwResult<()>;

    /// 关闭本核中断，返回之前的中断状态（local_irq_save）
    fn local_irq_save(&self) -> usize;

    /// 恢复 `local_irq_save` 返回的中断状态
    fn local_irq_restore(&self, flags: usize);
}

/// 中断保护 RAII 守卫
///
/// 在作用域内禁用本核中断，离开时恢复之前的状态
pub struct IrqSave<'a> {
    irqc: &'a dyn IrqController,
    flags: usize,
}

impl<'a> IrqSave<'a> {
    pub fn new(irqc: &'a dyn IrqController) -> Self {
        let flags = irqc.local_irq_save();
        Self { irqc, flags }
    }
}

impl Drop for IrqSave<'_> {
    fn drop(&mut self) {
        self.irqc.local_irq_restore(self.flags);
    }
}

/// 关中断状态下持有的自旋锁
///
/// 字段按声明顺序析构：先解锁，再恢复中断。
pub struct IrqLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _irq: IrqSave<'a>,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// 先关中断再加锁
pub fn lock_irqsave<'a, T>(irqc: &'a dyn IrqController, lock: &'a Mutex<T>) -> IrqLockGuard<'a, T> {
    let irq = IrqSave::new(irqc);
    let guard = lock.lock();
    IrqLockGuard { guard, _irq: irq }
}

//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! DMA 通道统计与配置

use bitflags::bitflags;

use crate::config::{DEFAULT_DMAFLAGS, DEFAULT_RXMAX, SCHED_CNT_MIN_INIT};
use super::ring::Harvest;

/// DMA 通道统计信息
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaStats {
    /// 通道产生的中断数
    pub irq_cnt: u32,
    /// 已发送包数
    pub tx_pkts: u32,
    /// 发送时遇到链路错误的包数
    pub tx_err_link: u32,
    /// 已接收包数
    pub rx_pkts: u32,
    /// 被截断的接收包数
    pub rx_err_trunk: u32,
    /// 以 EEP 结尾的接收包数
    pub rx_err_endpkt: u32,

    /// TX 环上包数量的最小值
    pub tx_sched_cnt_min: usize,
    /// TX 环上包数量的最大值
    pub tx_sched_cnt_max: usize,
    /// RX 环上包数量的最小值
    pub rx_sched_cnt_min: usize,
    /// RX 环上包数量的最大值
    pub rx_sched_cnt_max: usize,

    /// AHB 错误导致通道停止的次数
    pub err_ahb: u32,
    /// 链路错误导致通道停止的次数
    pub err_link_fatal: u32,
}

impl Default for DmaStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaStats {
    /// 清零后的统计（最小值水位为哨兵值，第一次比较必然更新）
    pub const fn new() -> Self {
        Self {
            irq_cnt: 0,
            tx_pkts: 0,
            tx_err_link: 0,
            rx_pkts: 0,
            rx_err_trunk: 0,
            rx_err_endpkt: 0,
            tx_sched_cnt_min: SCHED_CNT_MIN_INIT,
            tx_sched_cnt_max: 0,
            rx_sched_cnt_min: SCHED_CNT_MIN_INIT,
            rx_sched_cnt_max: 0,
            err_ahb: 0,
            err_link_fatal: 0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn watermark(min: &mut usize, max: &mut usize, sched_cnt: usize) {
        *min = (*min).min(sched_cnt);
        *max = (*max).max(sched_cnt);
    }

    /// 记录一次 TX 调度/回收的结果和当前环上的包数量
    pub(crate) fn tx_account(&mut self, report: &Harvest, sched_cnt: usize) {
        self.tx_pkts = self.tx_pkts.wrapping_add(report.count as u32);
        self.tx_err_link = self.tx_err_link.wrapping_add(report.link_err as u32);
        Self::watermark(&mut self.tx_sched_cnt_min, &mut self.tx_sched_cnt_max, sched_cnt);
    }

    /// 记录一次 RX 调度/回收的结果和当前环上的包数量
    pub(crate) fn rx_account(&mut self, report: &Harvest, sched_cnt: usize) {
        self.rx_pkts = self.rx_pkts.wrapping_add(report.count as u32);
        self.rx_err_trunk = self.rx_err_trunk.wrapping_add(report.truncated as u32);
        self.rx_err_endpkt = self.rx_err_endpkt.wrapping_add(report.bad_end as u32);
        Self::watermark(&mut self.rx_sched_cnt_min, &mut self.rx_sched_cnt_max, sched_cnt);
    }
}

bitflags! {
    /// DMA 通道选项
    ///
    /// 左移 12 位后与 DMA 控制寄存器的 NS/SA/SP/LE 位对齐。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaFlags: u32 {
        /// 没有可用 RX 描述符时等待，而不是丢弃包
        const NO_SPILL = 0x0001;
        /// 剥离目的地址
        const STRIP_ADR = 0x0004;
        /// 剥离协议 ID
        const STRIP_PID = 0x0008;
        /// 链路错误时由中断处理程序停止通道
        const LINK_ERR_STOP = 0x0010;
    }
}

/// DMA 通道配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaConfig {
    pub flags: DmaFlags,
    /// 最大接收包长度，超出部分被截断
    pub rxmaxlen: u32,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            flags: DmaFlags::from_bits_truncate(DEFAULT_DMAFLAGS),
            rxmaxlen: DEFAULT_RXMAX,
        }
    }
}

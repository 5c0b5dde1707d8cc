//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! GRSPW2 SpaceWire 驱动
//!
//! 参考: GRLIB IP Core User's Manual, GRSPW2
//!
//! 分层（自底向上）：
//! - `pkt`: 包、包标志、包池
//! - `ring`: 硬件描述符环（调度/回收/冲刷）
//! - `dma`: DMA 通道生命周期和收发接口
//! - `irq`: 中断控制器接口、关中断自旋锁
//! - `device`: 核级控制（链路、端口、地址、RMAP、中断）
//! - `registry`: 设备注册表

pub mod regs;
pub mod pkt;
pub mod ring;
pub mod stats;
pub mod irq;
pub mod dma;
pub mod device;
pub mod registry;

pub use pkt::{
    BusAddr, Packet, PktId, PktList, PktPool,
    RxPktFlags, TxPktFlags,
};

pub use ring::{RxBdTable, SlotState, TxBdTable};

pub use stats::{DmaConfig, DmaFlags, DmaStats};

pub use dma::{CloseError, DmaChannel};

pub use device::{
    AddrConfig, GrspwDevice, HwSupport, LinkState, NodeAddr, Port, UserIsr,
};

pub use irq::{IrqController, IrqSave};

pub use registry::{GrspwDevCfg, Registry, GAISLER_SPW2};

pub use regs::{Ctrl, DmaCtrl, Status};

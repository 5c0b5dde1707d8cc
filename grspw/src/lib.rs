//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! GRSPW2 SpaceWire 包 DMA 驱动
//!
//! 应用把包放进 [`PktPool`]，通过 [`PktList`] 把包交给 DMA 通道，
//! 再从通道取回已完成的包：
//!
//! ```text
//! registry.open(n) -> GrspwDevice
//!     dev.dma_open(ch) -> DmaChannel
//!         start / tx_send / tx_reclaim / rx_prepare / rx_recv / stop / flush / close
//! ```
//!
//! [`PktPool`]: drivers::spw::PktPool
//! [`PktList`]: drivers::spw::PktList

#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate log;

pub mod config;
pub mod errno;
pub mod list;
pub mod drivers;

#[cfg(test)]
mod tests;

pub use drivers::spw;
pub use errno::{SpwError, SpwResult};

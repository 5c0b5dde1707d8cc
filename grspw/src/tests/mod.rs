//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 驱动级测试
//!
//! 寄存器块是一段普通内存，测试代码扮演 DMA 引擎：
//! 清除描述符的使能位并写入完成状态。
//!
//! 运行测试：
//! ```bash
//! cargo test -p grspw
//! ```

pub mod sim;

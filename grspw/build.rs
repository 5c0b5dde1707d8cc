//! grspw 驱动构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析 Grspw.toml（或 build/grspw.config 覆盖文件）
//! 2. 校验描述符数量等硬件约束
//! 3. 生成 src/config.rs

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

/// 描述符表大小（字节），硬件要求 1 KiB 对齐
const BDTAB_SIZE: i64 = 0x400;

/// 解析 `section_key=value` 格式的覆盖文件
fn parse_dot_config(content: &str) -> toml::Value {
    let mut sections: HashMap<String, toml::map::Map<String, toml::Value>> = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some((section, config_key)) = key.trim().split_once('_') else {
            continue;
        };

        let value = value.trim();
        let parsed = if value == "true" {
            toml::Value::Boolean(true)
        } else if value == "false" {
            toml::Value::Boolean(false)
        } else if let Ok(int_val) = value.parse::<i64>() {
            toml::Value::Integer(int_val)
        } else {
            toml::Value::String(value.to_string())
        };

        sections
            .entry(section.to_string())
            .or_default()
            .insert(config_key.to_string(), parsed);
    }

    let mut root = toml::map::Map::new();
    for (name, table) in sections {
        root.insert(name, toml::Value::Table(table));
    }
    toml::Value::Table(root)
}

fn get_int(config: &toml::Value, section: &str, key: &str, default: i64) -> i64 {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .unwrap_or(default)
}

fn get_str<'a>(config: &'a toml::Value, section: &str, key: &str, default: &'a str) -> &'a str {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

fn main() {
    println!("cargo:rerun-if-changed=../Grspw.toml");
    println!("cargo:rerun-if-changed=../build/grspw.config");

    let config = if let Ok(content) = fs::read_to_string("../build/grspw.config") {
        println!("cargo:warning=Using build/grspw.config configuration");
        parse_dot_config(&content)
    } else if let Ok(content) = fs::read_to_string("../Grspw.toml") {
        toml::from_str(&content).expect("Grspw.toml 解析失败")
    } else {
        // 没有配置文件时全部使用默认值
        toml::Value::Table(toml::map::Map::new())
    };

    let txbd_nr = get_int(&config, "dma", "txbd_nr", 64);
    let rxbd_nr = get_int(&config, "dma", "rxbd_nr", 128);

    // TX 描述符 16 字节，RX 描述符 8 字节，都必须放进一个 1 KiB 的表
    if txbd_nr < 1 || txbd_nr * 16 > BDTAB_SIZE {
        panic!("dma.txbd_nr 必须在 1..=64 之间，当前为 {}", txbd_nr);
    }
    if rxbd_nr < 1 || rxbd_nr * 8 > BDTAB_SIZE {
        panic!("dma.rxbd_nr 必须在 1..=128 之间，当前为 {}", rxbd_nr);
    }

    let max_channels = get_int(&config, "dma", "max_channels", 4);
    if !(1..=4).contains(&max_channels) {
        panic!("dma.max_channels 必须在 1..=4 之间，当前为 {}", max_channels);
    }

    let config_src = format!(
        r#"//! grspw 驱动配置（自动生成）
//!
//! 此文件由 build.rs 根据 Grspw.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 驱动名称
pub const DRIVER_NAME: &str = "{}";

/// 驱动版本
pub const DRIVER_VERSION: &str = "{}";

// ============================================================
// DMA 配置
// ============================================================

/// 每个通道最多 TX 描述符数量
pub const TXBD_NR: usize = {};

/// 每个通道最多 RX 描述符数量
pub const RXBD_NR: usize = {};

/// 描述符表大小（字节）
pub const BDTAB_SIZE: usize = {};

/// 描述符表对齐要求（字节）
pub const BDTAB_ALIGN: usize = {};

/// 默认最大接收包长度（字节）
pub const DEFAULT_RXMAX: u32 = {};

/// 默认 DMA 通道标志
pub const DEFAULT_DMAFLAGS: u32 = {};

/// 每个 GRSPW 核最多 DMA 通道数
pub const MAX_DMA_CHANS: usize = {};

/// 调度计数最小水位的初始值
pub const SCHED_CNT_MIN_INIT: usize = 0x3fffffff;

// ============================================================
// 设备配置
// ============================================================

/// Registry 最多可注册的设备数
pub const MAX_DEVICES: usize = {};
"#,
        get_str(&config, "general", "name", "grspw"),
        get_str(&config, "general", "version", "0.1.0"),
        txbd_nr,
        rxbd_nr,
        BDTAB_SIZE,
        BDTAB_SIZE,
        get_int(&config, "dma", "default_rxmax", 4096),
        get_int(&config, "dma", "default_flags", 0),
        max_channels,
        get_int(&config, "device", "max_devices", 8),
    );

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let config_file = manifest_dir.join("src").join("config.rs");

    // 只有内容变化时才写入，避免每次编译都更新文件时间戳
    let existing = fs::read_to_string(&config_file).unwrap_or_default();
    if existing != config_src {
        fs::write(&config_file, &config_src).expect("写入配置文件失败");
    }
}

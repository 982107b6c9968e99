//! 通道子系统配置
//!
//! 编译期常量和启动参数。启动参数来自内核命令行：
//!
//! - `cio_ignore=<范围列表>`：启动时的黑名单，例如 `cio_ignore=0x100-0x1ff,0.0.0300`
//! - `cio_msg=yes|no`：设备识别过程输出详细信息
//! - `cio_notoper_msg=yes|no`：设备变为不可操作时输出警告
//! - `cio_sync_timeout=<微秒>`：同步 I/O 的缺省超时

use alloc::vec::Vec;

use crate::blacklist::parse_ranges;
use crate::types::DevNo;

/// 瞬时条件的最大尝试次数
pub const MAX_RETRIES: usize = 5;

/// 判定设备不可访问前连续探测的次数
pub const NOT_OPER_CHECKS: usize = 3;

/// 普通 I/O 使用的中断子类
pub const IO_ISC: u8 = 3;

/// 同步 I/O 期间保留的中断子类
pub const SYNC_ISC: u8 = 7;

/// 内部 I/O（识别、路径组、检测）使用的中断参数
pub const INTERNAL_INTPARM: u32 = 0xC10_0000;

/// 同步 I/O 缺省超时（微秒）
pub const DEFAULT_SYNC_TIMEOUT_US: u64 = 5_000_000;

/// 注销时等待 halt 完成的超时（微秒）
pub const DEFAULT_HALT_TIMEOUT_US: u64 = 1_000_000;

/// 注销时等待 clear 完成的超时（微秒）；最后一次 clear 使用十倍
pub const DEFAULT_CLEAR_TIMEOUT_US: u64 = 3_000_000;

/// 运行时配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CioConfig {
    /// 启动时忽略的设备号范围
    pub ignore: Vec<(DevNo, DevNo)>,
    /// 设备识别信息输出到 info 级别
    pub verbose: bool,
    /// 设备不可操作时输出警告
    pub notoper_msg: bool,
    /// 同步 I/O 缺省超时
    pub sync_timeout_us: u64,
    /// 注销时的 halt 超时
    pub halt_timeout_us: u64,
    /// 注销时的 clear 超时
    pub clear_timeout_us: u64,
}

impl Default for CioConfig {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            verbose: false,
            notoper_msg: true,
            sync_timeout_us: DEFAULT_SYNC_TIMEOUT_US,
            halt_timeout_us: DEFAULT_HALT_TIMEOUT_US,
            clear_timeout_us: DEFAULT_CLEAR_TIMEOUT_US,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "yes" | "on" | "1" => Some(true),
        "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl CioConfig {
    /// 从内核命令行解析配置，无法识别的值保持缺省并记录警告
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();
        for arg in cmdline.split_ascii_whitespace() {
            let Some((key, value)) = arg.split_once('=') else {
                continue;
            };
            match key {
                "cio_ignore" => match parse_ranges(value) {
                    Ok(ranges) => config.ignore.extend(ranges),
                    Err(_) => log::warn!("cio: invalid cio_ignore value '{}'", value),
                },
                "cio_msg" => match parse_bool(value) {
                    Some(v) => config.verbose = v,
                    None => log::warn!("cio: invalid cio_msg value '{}'", value),
                },
                "cio_notoper_msg" => match parse_bool(value) {
                    Some(v) => config.notoper_msg = v,
                    None => log::warn!("cio: invalid cio_notoper_msg value '{}'", value),
                },
                "cio_sync_timeout" => match value.parse::<u64>() {
                    Ok(us) if us > 0 => config.sync_timeout_us = us,
                    _ => log::warn!("cio: invalid cio_sync_timeout value '{}'", value),
                },
                _ => {}
            }
        }
        config
    }
}

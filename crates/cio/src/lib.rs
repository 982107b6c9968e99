//! 通道 I/O 子系统
//!
//! 此 crate 管理通道连接的 I/O 设备，包括：
//!
//! - 子通道发现、黑名单与重新验证（[`registry`]、[`blacklist`]）
//! - 设备识别与路径组协议（[`sense_id`]、[`path_group`]）
//! - 请求生命周期：start / resume / halt / clear，异步与同步两种方式（[`request`]）
//! - 中断与完成处理（[`interrupt`]）
//! - 驱动注册与同步 I/O 锁（[`driver`]、[`sync_op`]）
//! - 热插拔（[`hotplug`]）
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与平台代码解耦：
//! - [`ChannelHw`]: 子通道 I/O 指令
//! - [`CioOps`]: CPU 标识、时钟、中断子类屏蔽
//!
//! 使用前必须调用 [`register_cio_ops`] 注册平台操作（锁依赖的
//! `sync::register_arch_ops` 同样需要注册），然后用 [`init_css`] 安装子系统。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod blacklist;
pub mod config;
pub mod css;
pub mod devstat;
pub mod driver;
pub mod error;
pub mod hotplug;
pub mod hw;
pub mod interrupt;
pub mod ops;
pub mod path_group;
pub mod registry;
pub mod request;
pub mod retry;
pub mod sense_id;
pub mod subchannel;
pub mod sync_op;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export ops
pub use ops::{CioOps, cio_ops, register_cio_ops};

// Re-export 主要接口
pub use config::CioConfig;
pub use css::{ChannelSubsystem, crw_notification, css, init_css, io_interrupt};
pub use devstat::{DevStat, DevStatFlags};
pub use driver::{EventKind, IoEvent, IoHandler, RegisterFlags, RegistrationHandle};
pub use error::{CioError, CioResult};
pub use hotplug::{ChangeEvent, DeviceNotifier};
pub use hw::{ChannelHw, TestResult};
pub use interrupt::{InterruptClass, IrqInfo};
pub use path_group::Pgid;
pub use request::{IoFlags, IoRequest, StartOutcome};
pub use sense_id::{Ciw, CiwType, SenseIdData};
pub use subchannel::{DeviceIdentity, IoState, Presence, SubchannelView};
pub use sync_op::SyncGuard;
pub use types::{Chpid, CondCode, DevNo, SubchannelId};

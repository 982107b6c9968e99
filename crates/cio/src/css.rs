//! 通道子系统实例
//!
//! [`ChannelSubsystem`] 把子通道表、黑名单、同步锁和硬件抽象组合在一起，
//! 各组件以 `impl ChannelSubsystem` 的形式分布在各自的模块中。
//!
//! 内核启动时调用 [`init_css`] 安装全局实例，之后中断入口通过
//! [`io_interrupt`] 和 [`crw_notification`] 进入子系统。

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use lazy_static::lazy_static;
use sync::{RwLock, SpinLock};

use crate::blacklist::Blacklist;
use crate::config::CioConfig;
use crate::error::{CioError, CioResult};
use crate::hotplug::{ChangeEvent, DeviceNotifier};
use crate::hw::ChannelHw;
use crate::interrupt::IrqInfo;
use crate::ops::cio_ops;
use crate::path_group::Pgid;
use crate::registry::Registry;
use crate::sync_op::SyncLock;
use crate::types::SubchannelId;

/// 通道子系统
pub struct ChannelSubsystem {
    pub(crate) hw: Arc<dyn ChannelHw>,
    pub(crate) registry: Registry,
    pub(crate) blacklist: RwLock<Blacklist>,
    pub(crate) sync_lock: SyncLock,
    pub(crate) config: CioConfig,
    pub(crate) pgid: Pgid,
    pub(crate) notifier: SpinLock<Option<Arc<dyn DeviceNotifier>>>,
    next_token: AtomicU64,
}

impl ChannelSubsystem {
    /// 创建子系统，不做任何硬件访问
    ///
    /// 启动参数中的 `cio_ignore` 区间在此写入黑名单。
    pub fn new(hw: Arc<dyn ChannelHw>, config: CioConfig) -> Self {
        let mut blacklist = Blacklist::new();
        for &(from, to) in &config.ignore {
            blacklist.add(from, to);
        }
        let ops = cio_ops();
        let pgid = Pgid::new(
            ops.cpu_address(),
            ops.cpu_id(),
            ops.cpu_model(),
            ops.tod_clock(),
        );
        Self {
            hw,
            registry: Registry::new(),
            blacklist: RwLock::new(blacklist),
            sync_lock: SyncLock::new(),
            config,
            pgid,
            notifier: SpinLock::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    /// 本系统的路径组标识
    pub fn pgid(&self) -> Pgid {
        self.pgid
    }

    /// 当前配置
    pub fn config(&self) -> &CioConfig {
        &self.config
    }

    pub(crate) fn alloc_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// 设备识别过程的信息，`cio_msg=yes` 时输出到 info 级别
    pub(crate) fn msg(&self, args: fmt::Arguments<'_>) {
        if self.config.verbose {
            log::info!("{}", args);
        } else {
            log::debug!("{}", args);
        }
    }

    pub(crate) fn notoper(&self, id: SubchannelId) {
        if self.config.notoper_msg {
            log::warn!("cio: {} is not operational", id);
        }
    }
}

lazy_static! {
    static ref CSS: RwLock<Option<Arc<ChannelSubsystem>>> = RwLock::new(None);
}

/// 安装全局通道子系统并执行初始枚举
pub fn init_css(hw: Arc<dyn ChannelHw>, config: CioConfig) -> CioResult<Arc<ChannelSubsystem>> {
    let css = Arc::new(ChannelSubsystem::new(hw, config));
    {
        let mut slot = CSS.write();
        if slot.is_some() {
            return Err(CioError::AlreadyOwned);
        }
        *slot = Some(css.clone());
    }
    let found = css.scan();
    log::info!("cio: channel subsystem initialized, {} subchannel(s)", found);
    Ok(css)
}

/// 全局通道子系统
pub fn css() -> CioResult<Arc<ChannelSubsystem>> {
    CSS.read().clone().ok_or(CioError::NoDevice)
}

/// I/O 中断入口
pub fn io_interrupt(info: IrqInfo) {
    match css() {
        Ok(css) => css.do_io_interrupt(info),
        Err(_) => log::warn!("cio: I/O interrupt before initialization"),
    }
}

/// 通道报告字（配置变化）入口
pub fn crw_notification(event: ChangeEvent) {
    match css() {
        Ok(css) => css.on_change_notification(event),
        Err(_) => log::warn!("cio: change notification before initialization"),
    }
}

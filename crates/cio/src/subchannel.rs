//! 子通道记录
//!
//! 每个已发现的子通道对应一个 [`Subchannel`]，由它自己的 [`sync::SpinLock`] 保护。
//! 生命周期状态拆成两个正交的枚举：
//!
//! - [`Presence`]：设备是否存在、是否可访问
//! - [`IoState`]：当前 I/O 处于哪个阶段
//!
//! 其余能力标志（路径组支持、急切模式、挂起等）作为独立的布尔字段。

use alloc::sync::Arc;

use crate::devstat::{DevStat, DevStatFlags};
use crate::driver::{IoHandler, RegisterFlags};
use crate::path_group::Pgid;
use crate::request::{IoFlags, IoRequest};
use crate::sense_id::SenseIdData;
use crate::types::{DevNo, IoBuffer, Schib, SubchannelId};

/// 设备的存在状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// 有可用路径
    Operational,
    /// 已知但当前没有可用路径
    NotOperational,
    /// 设备号在黑名单中
    Ignored,
    /// 子通道上没有有效设备
    Invalid,
}

impl Presence {
    /// 是否参与枚举
    pub fn is_valid(self) -> bool {
        matches!(self, Presence::Operational | Presence::NotOperational)
    }
}

/// I/O 状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    /// 没有进行中的请求
    Idle,
    /// 异步请求进行中
    BusyAsync,
    /// 同步请求进行中（调用者在轮询）
    BusySync,
    /// 停止功能进行中
    Halting,
    /// 清除功能进行中
    Clearing,
}

impl IoState {
    /// 是否有进行中的功能
    pub fn is_busy(self) -> bool {
        self != IoState::Idle
    }
}

/// 设备标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdentity {
    /// 尚未识别
    Unidentified,
    /// 设备拒绝了 Sense-ID，类型未知
    Unknown,
    /// 已识别
    Known(SenseIdData),
}

/// 子通道上绑定的驱动
#[derive(Clone)]
pub struct Binding {
    /// 事件回调
    pub handler: Arc<dyn IoHandler>,
    /// 注册令牌，用于校验注销请求
    pub token: u64,
    /// 注册标志
    pub flags: RegisterFlags,
}

/// 正在进行的功能
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRequest {
    /// 驱动给出的中断参数
    pub intparm: u32,
    /// 请求标志
    pub flags: IoFlags,
    /// 本次请求使用的路径
    pub lpm: u8,
    /// 已经为主状态发过早期通知
    pub primary_reported: bool,
}

/// 子通道记录
pub struct Subchannel {
    /// 子通道号
    pub id: SubchannelId,
    /// 最近一次读到的子通道信息块
    pub schib: Schib,
    /// 设备号
    pub devno: DevNo,
    /// 可操作路径掩码（pim ∧ pam ∧ pom，并去掉 I/O 中失败的路径）
    pub opm: u8,
    /// 存在状态
    pub presence: Presence,
    /// I/O 状态
    pub state: IoState,
    /// 设备支持路径组
    pub pgid_supported: bool,
    /// 已建立路径组时使用的 PGID
    pub pgid: Option<Pgid>,
    /// 设备标识
    pub identity: DeviceIdentity,
    /// 设备提供扩展 Sense-ID（CIW）
    pub extended_sense_id: bool,
    /// 急切模式：忙时允许排队一个请求
    pub eager: bool,
    /// 通道程序处于挂起状态
    pub suspended: bool,
    /// 下一次结束状态后禁用子通道
    pub disable_pending: bool,
    /// 注销正在排空子通道，期间不回调驱动
    pub draining: bool,
    /// 绑定的驱动
    pub binding: Option<Binding>,
    /// 排队的请求（最多一个）
    pub queued: Option<IoRequest>,
    /// 进行中的功能
    pub active: Option<ActiveRequest>,
    /// 自动基本检测进行中
    pub sense_pending: bool,
    pub(crate) sense_buf: Option<IoBuffer>,
    /// 当前请求的累积状态
    pub devstat: DevStat,
    /// 驱动可见的状态块（最近一次结束状态）
    pub status_block: DevStat,
}

impl Subchannel {
    /// 由 store-subchannel 的结果创建记录
    pub fn new(id: SubchannelId, schib: Schib) -> Self {
        let devno = schib.pmcw.dev;
        Self {
            id,
            schib,
            devno,
            opm: schib.pmcw.usable_mask(),
            presence: Presence::Invalid,
            state: IoState::Idle,
            pgid_supported: true,
            pgid: None,
            identity: DeviceIdentity::Unidentified,
            extended_sense_id: false,
            eager: false,
            suspended: false,
            disable_pending: false,
            draining: false,
            binding: None,
            queued: None,
            active: None,
            sense_pending: false,
            sense_buf: None,
            devstat: DevStat::new(devno),
            status_block: DevStat::new(devno),
        }
    }

    /// 更新信息块与设备号，重新计算路径掩码
    pub(crate) fn refresh(&mut self, schib: Schib) {
        self.schib = schib;
        self.devno = schib.pmcw.dev;
        self.devstat.devno = self.devno;
        self.status_block.devno = self.devno;
        self.opm = schib.pmcw.usable_mask();
    }

    /// 是否已绑定驱动
    pub fn is_owned(&self) -> bool {
        self.binding.is_some()
    }

    /// 将进行中的功能标记为结束：进入空闲，发布状态块
    pub(crate) fn finish(&mut self) {
        self.devstat.flags |= DevStatFlags::FINAL_STATUS;
        if let Some(active) = self.active.take() {
            self.devstat.intparm = active.intparm;
        }
        self.status_block = self.devstat;
        self.state = IoState::Idle;
        self.suspended = false;
        self.sense_pending = false;
        self.sense_buf = None;
    }

    /// 对外的只读快照
    pub fn view(&self) -> SubchannelView {
        SubchannelView {
            id: self.id,
            devno: self.devno,
            presence: self.presence,
            state: self.state,
            pim: self.schib.pmcw.pim,
            pam: self.schib.pmcw.pam,
            pom: self.schib.pmcw.pom,
            opm: self.opm,
            chpid: self.schib.pmcw.chpid,
            pgid_supported: self.pgid_supported,
            pgid: self.pgid,
            identity: self.identity.clone(),
            extended_sense_id: self.extended_sense_id,
            owned: self.is_owned(),
            queued: self.queued.is_some(),
        }
    }
}

/// 子通道快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubchannelView {
    /// 子通道号
    pub id: SubchannelId,
    /// 设备号
    pub devno: DevNo,
    /// 存在状态
    pub presence: Presence,
    /// I/O 状态
    pub state: IoState,
    /// 已安装路径
    pub pim: u8,
    /// 可用路径
    pub pam: u8,
    /// 可操作路径
    pub pom: u8,
    /// 当前使用的路径掩码
    pub opm: u8,
    /// 路径到 CHPID 的映射
    pub chpid: [u8; 8],
    /// 设备支持路径组
    pub pgid_supported: bool,
    /// 路径组标识
    pub pgid: Option<Pgid>,
    /// 设备标识
    pub identity: DeviceIdentity,
    /// 设备提供扩展 Sense-ID
    pub extended_sense_id: bool,
    /// 已绑定驱动
    pub owned: bool,
    /// 有排队的请求
    pub queued: bool,
}

//! 通道子系统硬件控制块
//!
//! 子通道信息块（[`Schib`]）、中断响应块（[`Irb`]）、操作请求块（[`Orb`]）
//! 以及通道程序（[`ChannelProgram`] / [`Ccw`]）。
//!
//! 这些结构只描述协议需要的字段，不追求与某一具体总线的寄存器布局逐字节一致。
//! 通道程序的数据区用 [`IoBuffer`] 表示，硬件（或模拟器）通过它读写数据。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use sync::SpinLock;

/// 子通道号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubchannelId(pub u16);

impl fmt::Display for SubchannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0.0.{:04x}", self.0)
    }
}

/// 设备号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DevNo(pub u16);

impl fmt::Display for DevNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// 通道路径号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Chpid(pub u8);

/// I/O 指令的条件码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    /// 0: 功能已接受
    Ok,
    /// 1: 子通道状态挂起
    StatusPending,
    /// 2: 子通道忙
    Busy,
    /// 3: 子通道不可操作
    NotOperational,
}

impl CondCode {
    /// 从指令返回的原始条件码转换
    pub fn from_raw(cc: u8) -> Self {
        match cc & 3 {
            0 => CondCode::Ok,
            1 => CondCode::StatusPending,
            2 => CondCode::Busy,
            _ => CondCode::NotOperational,
        }
    }
}

bitflags! {
    /// 功能控制（SCSW.fctl）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FunctionControl: u8 {
        /// 启动功能
        const START = 0x04;
        /// 停止功能
        const HALT = 0x02;
        /// 清除功能
        const CLEAR = 0x01;
    }
}

bitflags! {
    /// 活动控制（SCSW.actl）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ActivityControl: u8 {
        /// 恢复挂起
        const RESUME_PENDING = 0x40;
        /// 启动挂起
        const START_PENDING = 0x20;
        /// 停止挂起
        const HALT_PENDING = 0x10;
        /// 清除挂起
        const CLEAR_PENDING = 0x08;
        /// 子通道活动
        const SUBCHANNEL_ACTIVE = 0x04;
        /// 设备活动
        const DEVICE_ACTIVE = 0x02;
        /// 通道程序已挂起
        const SUSPENDED = 0x01;
    }
}

bitflags! {
    /// 状态控制（SCSW.stctl）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusControl: u8 {
        /// 警示状态
        const ALERT = 0x10;
        /// 中间状态
        const INTERMEDIATE = 0x08;
        /// 主状态
        const PRIMARY = 0x04;
        /// 次状态
        const SECONDARY = 0x02;
        /// 状态挂起
        const PENDING = 0x01;
    }
}

bitflags! {
    /// 设备状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceStatus: u8 {
        /// 注意
        const ATTENTION = 0x80;
        /// 状态修饰
        const STATUS_MODIFIER = 0x40;
        /// 控制单元结束
        const CONTROL_UNIT_END = 0x20;
        /// 忙
        const BUSY = 0x10;
        /// 通道结束
        const CHANNEL_END = 0x08;
        /// 设备结束
        const DEVICE_END = 0x04;
        /// 单元检查
        const UNIT_CHECK = 0x02;
        /// 单元异常
        const UNIT_EXCEPTION = 0x01;
    }
}

bitflags! {
    /// 子通道（通道）状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelStatus: u8 {
        /// 程序控制中断
        const PCI = 0x80;
        /// 长度错误
        const INCORRECT_LENGTH = 0x40;
        /// 程序检查
        const PROGRAM_CHECK = 0x20;
        /// 保护检查
        const PROTECTION_CHECK = 0x10;
        /// 通道数据检查
        const CHANNEL_DATA_CHECK = 0x08;
        /// 通道控制检查
        const CHANNEL_CONTROL_CHECK = 0x04;
        /// 接口控制检查
        const INTERFACE_CONTROL_CHECK = 0x02;
        /// 链接检查
        const CHAINING_CHECK = 0x01;
    }
}

/// 子通道状态字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scsw {
    /// 功能控制
    pub fctl: FunctionControl,
    /// 活动控制
    pub actl: ActivityControl,
    /// 状态控制
    pub stctl: StatusControl,
    /// 设备状态
    pub dstat: DeviceStatus,
    /// 通道状态
    pub cstat: ChannelStatus,
    /// 剩余字节数
    pub count: u16,
}

bitflags! {
    /// 扩展报告字（ESW.erw）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtendedReport: u8 {
        /// ECW 中携带并发检测数据
        const CONCURRENT_SENSE = 0x80;
        /// 检测数据不完整
        const SENSE_INCOMPLETE = 0x40;
    }
}

/// 扩展状态字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Esw {
    /// 最后使用的路径
    pub lpum: u8,
    /// 扩展报告字
    pub erw: ExtendedReport,
    /// 并发检测数据的字节数
    pub scnt: u8,
}

/// 检测数据的最大长度
pub const SENSE_MAX: usize = 32;

/// 中断响应块，由 test-subchannel 返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Irb {
    /// 子通道状态字
    pub scsw: Scsw,
    /// 扩展状态字
    pub esw: Esw,
    /// 扩展控制字（并发检测数据）
    pub ecw: [u8; SENSE_MAX],
}

/// 路径管理控制字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pmcw {
    /// 中断参数
    pub intparm: u32,
    /// I/O 中断子类
    pub isc: u8,
    /// 子通道已启用
    pub enabled: bool,
    /// 设备号有效
    pub dnv: bool,
    /// 设备号
    pub dev: DevNo,
    /// 逻辑路径掩码
    pub lpm: u8,
    /// 最后使用的路径
    pub lpum: u8,
    /// 已安装路径掩码
    pub pim: u8,
    /// 可用路径掩码
    pub pam: u8,
    /// 可操作路径掩码
    pub pom: u8,
    /// 多路径模式
    pub multipath: bool,
    /// 每个路径位对应的 CHPID（下标 0 对应掩码 0x80）
    pub chpid: [u8; 8],
}

impl Pmcw {
    /// 当前可用的路径：已安装 ∧ 可用 ∧ 可操作
    pub fn usable_mask(&self) -> u8 {
        self.pim & self.pam & self.pom
    }

    /// 使用指定 CHPID 的路径位，未使用时返回 0
    pub fn path_for_chpid(&self, chpid: Chpid) -> u8 {
        self.chpid
            .iter()
            .enumerate()
            .filter(|(i, c)| **c == chpid.0 && self.pim & (0x80 >> i) != 0)
            .fold(0, |mask, (i, _)| mask | (0x80 >> i))
    }
}

/// 子通道信息块，由 store-subchannel 返回、modify-subchannel 写入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schib {
    /// 路径管理控制字
    pub pmcw: Pmcw,
    /// 子通道状态字
    pub scsw: Scsw,
}

bitflags! {
    /// 操作请求块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OrbFlags: u8 {
        /// 允许通道程序挂起
        const SUSPEND_CONTROL = 0x08;
        /// 禁止预取
        const PREFETCH_DENY = 0x04;
        /// 抑制长度错误
        const SUPPRESS_LENGTH = 0x02;
    }
}

/// 操作请求块
#[derive(Debug, Clone)]
pub struct Orb {
    /// 中断参数
    pub intparm: u32,
    /// 标志
    pub flags: OrbFlags,
    /// 本次操作允许使用的路径
    pub lpm: u8,
    /// 通道程序
    pub program: Arc<ChannelProgram>,
}

/// 通道命令码
pub mod ccw_cmd {
    /// 基本检测
    pub const SENSE: u8 = 0x04;
    /// 空操作
    pub const NOOP: u8 = 0x03;
    /// 读设备标识
    pub const SENSE_ID: u8 = 0xE4;
    /// 设置路径组标识
    pub const SET_PGID: u8 = 0xAF;
    /// 检测路径组标识
    pub const SENSE_PGID: u8 = 0x34;
    /// 读配置数据（未提供 CIW 时的缺省命令码）
    pub const READ_CONF_DATA: u8 = 0xFA;
}

/// 检测数据第 0 字节
pub mod sense0 {
    /// 命令拒绝
    pub const CMD_REJECT: u8 = 0x80;
    /// 需要干预
    pub const INTERVENTION_REQUIRED: u8 = 0x40;
    /// 总线检查
    pub const BUS_OUT_CHECK: u8 = 0x20;
    /// 设备检查
    pub const EQUIPMENT_CHECK: u8 = 0x10;
}

bitflags! {
    /// 通道命令字标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CcwFlags: u8 {
        /// 数据链接
        const CD = 0x80;
        /// 命令链接
        const CC = 0x40;
        /// 抑制长度错误
        const SLI = 0x20;
        /// 跳过
        const SKIP = 0x10;
        /// 程序控制中断
        const PCI = 0x08;
        /// 挂起
        const SUSPEND = 0x02;
    }
}

/// 通道程序的数据区
///
/// 硬件以 DMA 方式读写；此处用共享缓冲区表示，
/// 使完成后的数据在请求者和硬件抽象之间都可见。
#[derive(Debug, Clone)]
pub struct IoBuffer(Arc<SpinLock<Vec<u8>>>);

impl IoBuffer {
    /// 创建长度为 `len` 的零填充缓冲区
    pub fn new(len: usize) -> Self {
        Self(Arc::new(SpinLock::new(vec![0u8; len])))
    }

    /// 从已有数据创建
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self(Arc::new(SpinLock::new(data)))
    }

    /// 缓冲区长度
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// 缓冲区是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 复制出全部内容
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// 从 `offset` 起写入数据，超出部分被截断，返回写入的字节数
    pub fn write_at(&self, offset: usize, data: &[u8]) -> usize {
        let mut buf = self.0.lock();
        if offset >= buf.len() {
            return 0;
        }
        let n = data.len().min(buf.len() - offset);
        buf[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    /// 复制前 `len` 个字节（不超过缓冲区长度）
    pub fn read_prefix(&self, len: usize) -> Vec<u8> {
        let buf = self.0.lock();
        buf[..len.min(buf.len())].to_vec()
    }
}

/// 通道命令字
#[derive(Debug, Clone)]
pub struct Ccw {
    /// 命令码
    pub cmd: u8,
    /// 标志
    pub flags: CcwFlags,
    /// 字节数
    pub count: u16,
    /// 数据区
    pub data: Option<IoBuffer>,
}

impl Ccw {
    /// 创建带数据区的 CCW，字节数取数据区长度
    pub fn with_data(cmd: u8, flags: CcwFlags, data: IoBuffer) -> Self {
        let count = data.len().min(u16::MAX as usize) as u16;
        Self {
            cmd,
            flags,
            count,
            data: Some(data),
        }
    }

    /// 创建不传输数据的控制 CCW
    pub fn control(cmd: u8) -> Self {
        Self {
            cmd,
            flags: CcwFlags::SLI,
            count: 0,
            data: None,
        }
    }
}

/// 通道程序：按顺序执行的 CCW 链
#[derive(Debug, Clone, Default)]
pub struct ChannelProgram {
    ccws: Vec<Ccw>,
}

impl ChannelProgram {
    /// 由 CCW 列表创建
    pub fn new(ccws: Vec<Ccw>) -> Arc<Self> {
        Arc::new(Self { ccws })
    }

    /// 只包含一个 CCW 的通道程序
    pub fn single(ccw: Ccw) -> Arc<Self> {
        Self::new(vec![ccw])
    }

    /// CCW 列表
    pub fn ccws(&self) -> &[Ccw] {
        &self.ccws
    }

    /// 第一个 CCW 的命令码
    pub fn first_cmd(&self) -> Option<u8> {
        self.ccws.first().map(|c| c.cmd)
    }
}

/// 逐个列出掩码中的路径位（从 0x80 开始）
pub fn paths(mask: u8) -> impl Iterator<Item = u8> {
    (0..8).map(|i| 0x80u8 >> i).filter(move |bit| mask & bit != 0)
}

/// I/O 中断子类在中断子类掩码中对应的位
pub const fn isc_bit(isc: u8) -> u8 {
    0x80 >> (isc & 7)
}

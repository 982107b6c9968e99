//! 设备状态记录
//!
//! 一次请求期间收到的多个中断被累积到同一个 [`DevStat`] 中：
//! 设备状态与通道状态按位或，剩余字节数和路径取最新值。
//! 结束状态到达时，累积结果被复制给驱动可见的状态块。

use bitflags::bitflags;

use crate::types::{
    ActivityControl, ChannelStatus, DevNo, DeviceStatus, ExtendedReport, FunctionControl, Irb,
    SENSE_MAX, StatusControl,
};

bitflags! {
    /// 状态记录标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DevStatFlags: u16 {
        /// 已收到结束状态
        const FINAL_STATUS = 1 << 0;
        /// 最近一次中断带有挂起状态
        const STATUS_PENDING = 1 << 1;
        /// 检测数据有效
        const SENSE_AVAILABLE = 1 << 2;
        /// 设备在请求期间变为不可操作
        const NOT_OPERATIONAL = 1 << 3;
        /// 通道程序已挂起
        const SUSPENDED = 1 << 4;
        /// 已收到主状态
        const PRIMARY_STATUS = 1 << 5;
        /// 请求由启动功能发起
        const START_FUNCTION = 1 << 6;
        /// 请求由停止功能发起
        const HALT_FUNCTION = 1 << 7;
        /// 请求由清除功能发起
        const CLEAR_FUNCTION = 1 << 8;
        /// 单元检查后的基本检测未能取得数据
        const SENSE_FAILED = 1 << 9;
    }
}

/// 设备状态记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevStat {
    /// 设备号
    pub devno: DevNo,
    /// 中断参数
    pub intparm: u32,
    /// 最后使用的路径
    pub lpum: u8,
    /// 累积的通道状态
    pub cstat: ChannelStatus,
    /// 累积的设备状态
    pub dstat: DeviceStatus,
    /// 剩余字节数
    pub rescnt: u16,
    /// 标志
    pub flags: DevStatFlags,
    /// 有效检测数据的字节数
    pub scnt: u8,
    /// 检测数据
    pub sense: [u8; SENSE_MAX],
}

impl DevStat {
    /// 为设备创建空记录
    pub fn new(devno: DevNo) -> Self {
        Self {
            devno,
            ..Self::default()
        }
    }

    /// 清空累积内容，保留设备号
    pub fn reset(&mut self) {
        *self = Self::new(self.devno);
    }

    /// 把一次中断的内容并入记录
    pub fn accumulate(&mut self, irb: &Irb) {
        let scsw = &irb.scsw;
        self.dstat |= scsw.dstat;
        self.cstat |= scsw.cstat;
        self.rescnt = scsw.count;
        if irb.esw.lpum != 0 {
            self.lpum = irb.esw.lpum;
        }
        self.flags.set(
            DevStatFlags::STATUS_PENDING,
            scsw.stctl.contains(StatusControl::PENDING),
        );
        if scsw.stctl.contains(StatusControl::PRIMARY) {
            self.flags |= DevStatFlags::PRIMARY_STATUS;
        }
        self.flags.set(
            DevStatFlags::SUSPENDED,
            scsw.actl.contains(ActivityControl::SUSPENDED),
        );
        if scsw.fctl.contains(FunctionControl::START) {
            self.flags |= DevStatFlags::START_FUNCTION;
        }
        if scsw.fctl.contains(FunctionControl::HALT) {
            self.flags |= DevStatFlags::HALT_FUNCTION;
        }
        if scsw.fctl.contains(FunctionControl::CLEAR) {
            self.flags |= DevStatFlags::CLEAR_FUNCTION;
        }
        if irb.esw.erw.contains(ExtendedReport::CONCURRENT_SENSE)
            && scsw.dstat.contains(DeviceStatus::UNIT_CHECK)
        {
            let n = (irb.esw.scnt as usize).min(SENSE_MAX);
            self.set_sense(&irb.ecw[..n]);
        }
    }

    /// 以一次中断的内容替换记录（空闲子通道上的中断）
    pub fn replace(&mut self, irb: &Irb) {
        self.reset();
        self.accumulate(irb);
    }

    /// 记录检测数据
    pub fn set_sense(&mut self, data: &[u8]) {
        let n = data.len().min(SENSE_MAX);
        self.sense = [0; SENSE_MAX];
        self.sense[..n].copy_from_slice(&data[..n]);
        self.scnt = n as u8;
        self.flags |= DevStatFlags::SENSE_AVAILABLE;
    }

    /// 有效的检测数据
    pub fn sense(&self) -> &[u8] {
        &self.sense[..self.scnt as usize]
    }

    /// 是否为结束状态
    pub fn is_final(&self) -> bool {
        self.flags.contains(DevStatFlags::FINAL_STATUS)
    }
}

//! 子通道硬件原语
//!
//! [`ChannelHw`] 抽象了通道子系统的 I/O 指令。
//! 真实实现在平台代码中用对应指令完成，测试中用模拟器完成。

use crate::interrupt::IrqInfo;
use crate::types::{CondCode, Irb, Orb, Schib, SubchannelId};

/// test-subchannel 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    /// cc0: 取出了挂起的状态
    Status(Irb),
    /// cc1: 子通道没有挂起的状态
    NoStatus,
    /// cc3: 子通道不可操作
    NotOperational,
}

/// 子通道 I/O 指令
pub trait ChannelHw: Send + Sync {
    /// store-subchannel：读取子通道信息块
    ///
    /// 子通道不存在时返回 `Err(CondCode::NotOperational)`
    fn stsch(&self, schid: SubchannelId) -> Result<Schib, CondCode>;

    /// modify-subchannel：写入路径管理控制字
    fn msch(&self, schid: SubchannelId, schib: &Schib) -> CondCode;

    /// start-subchannel：启动通道程序
    fn ssch(&self, schid: SubchannelId, orb: &Orb) -> CondCode;

    /// resume-subchannel：恢复挂起的通道程序
    fn rsch(&self, schid: SubchannelId) -> CondCode;

    /// halt-subchannel：停止当前操作
    fn hsch(&self, schid: SubchannelId) -> CondCode;

    /// clear-subchannel：清除子通道上的全部功能
    fn csch(&self, schid: SubchannelId) -> CondCode;

    /// test-subchannel：取出挂起的完成记录
    fn tsch(&self, schid: SubchannelId) -> TestResult;

    /// test-pending-interruption：取出一个挂起的 I/O 中断（不经过中断入口）
    fn tpi(&self) -> Option<IrqInfo>;
}

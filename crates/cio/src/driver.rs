//! 驱动注册
//!
//! 设备驱动通过 [`ChannelSubsystem::register`] 绑定到一个子通道，
//! 之后该子通道上的中断以 [`IoEvent`] 的形式交给驱动的 [`IoHandler`]。
//!
//! 注销时先排空子通道：停止、再次停止、清除、长时间清除，逐级升级。

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::css::ChannelSubsystem;
use crate::devstat::DevStat;
use crate::error::{CioError, CioResult};
use crate::interrupt::Notes;
use crate::request::IoFlags;
use crate::subchannel::{Binding, IoState, Presence};
use crate::types::SubchannelId;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// 请求的中断（结束状态、早期通知或挂起）
    Interrupt,
    /// 空闲时收到的带警示状态的中断
    Unsolicited,
    /// 设备在 I/O 过程中失去全部路径
    NotOperational,
    /// 热插拔发现设备已消失，驱动已被强制解绑
    DeviceGone,
    /// 设备号发生变化，驱动需要重新验证设备
    Revalidate,
    /// 排队的请求启动失败
    StartFailed(CioError),
}

/// 交给驱动的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEvent {
    /// 事件类型
    pub kind: EventKind,
    /// 请求的中断参数
    pub intparm: u32,
    /// 设备状态
    pub status: DevStat,
}

/// 驱动的事件回调
///
/// 回调在子通道锁释放后调用，可以在回调中发起新的请求。
/// 回调可能运行在中断上下文中，不能阻塞。
pub trait IoHandler: Send + Sync {
    /// 处理一个事件
    fn handle_event(&self, id: SubchannelId, event: &IoEvent);
}

impl<F> IoHandler for F
where
    F: Fn(SubchannelId, &IoEvent) + Send + Sync,
{
    fn handle_event(&self, id: SubchannelId, event: &IoEvent) {
        self(id, event)
    }
}

bitflags! {
    /// 注册标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegisterFlags: u8 {
        /// 注册时不做路径验证
        const NO_PATH_VERIFY = 1 << 0;
    }
}

/// 注册句柄，注销时交回
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationHandle {
    /// 子通道号
    pub schid: SubchannelId,
    token: u64,
}

#[derive(Clone, Copy)]
enum DrainStep {
    Halt,
    Clear,
}

impl ChannelSubsystem {
    /// 把驱动绑定到子通道
    ///
    /// 绑定后启用子通道，除非指定 [`RegisterFlags::NO_PATH_VERIFY`]，
    /// 还会重新识别设备并建立路径组。设备不支持路径组不算错误。
    pub fn register(
        &self,
        id: SubchannelId,
        handler: Arc<dyn IoHandler>,
        flags: RegisterFlags,
    ) -> CioResult<RegistrationHandle> {
        let sch = self.subchannel(id)?;
        let token = self.alloc_token();
        let mut notes = Notes::new();
        let r = {
            let blacklist = self.blacklist.read();
            let mut s = sch.lock();
            if s.presence != Presence::Operational {
                Err(CioError::NoDevice)
            } else if blacklist.contains(s.devno) {
                Err(CioError::DeviceIgnored)
            } else if s.is_owned() {
                Err(CioError::AlreadyOwned)
            } else {
                s.binding = Some(Binding {
                    handler,
                    token,
                    flags,
                });
                let r = self.enable_locked(&mut s, &mut notes);
                if r.is_err() {
                    s.binding = None;
                }
                r
            }
        };
        self.dispatch(notes);
        r?;

        if !flags.contains(RegisterFlags::NO_PATH_VERIFY) {
            match self.verify_paths(id, 0xFF) {
                Ok(()) | Err(CioError::NotSupported) => {}
                Err(e) => {
                    log::warn!("cio: {} path verification failed: {}", id, e);
                    self.unbind(id);
                    return Err(e);
                }
            }
        }
        self.msg(format_args!("cio: {} registered", id));
        Ok(RegistrationHandle { schid: id, token })
    }

    /// 解除驱动绑定
    ///
    /// 排空失败时返回 [`CioError::HardwareFailure`]，绑定保持不变。
    pub fn unregister(&self, handle: RegistrationHandle) -> CioResult<()> {
        let id = handle.schid;
        let sch = self.subchannel(id)?;
        {
            let mut s = sch.lock();
            match &s.binding {
                Some(b) if b.token == handle.token && !s.draining => {}
                _ => return Err(CioError::NotOwned),
            }
            s.draining = true;
        }

        if let Err(e) = self.drain(id) {
            sch.lock().draining = false;
            if e == CioError::WouldBlock {
                return Err(e);
            }
            log::error!("cio: {} could not be drained ({}), left as is", id, e);
            return Err(CioError::HardwareFailure);
        }
        self.unbind(id);
        Ok(())
    }

    /// 停止子通道上的全部活动，逐级升级
    fn drain(&self, id: SubchannelId) -> CioResult<()> {
        const STEPS: [(DrainStep, u64); 4] = [
            (DrainStep::Halt, 1),
            (DrainStep::Halt, 1),
            (DrainStep::Clear, 1),
            (DrainStep::Clear, 10),
        ];

        let sch = self.subchannel(id)?;
        let _guard = self.sync_acquire(id)?;
        for (step, scale) in STEPS {
            if !sch.lock().state.is_busy() {
                return Ok(());
            }
            let mut notes = Notes::new();
            let r = {
                let mut s = sch.lock();
                match step {
                    DrainStep::Halt => self.halt_locked(&mut s, 0, IoFlags::DONT_CALL_HANDLER, &mut notes),
                    DrainStep::Clear => self.clear_locked(&mut s, 0, IoFlags::DONT_CALL_HANDLER, &mut notes),
                }
            };
            self.dispatch(notes);
            match r {
                Ok(()) => {}
                Err(CioError::NoDevice) => {
                    // 设备已不可达，没有需要等待的功能
                    sch.lock().finish();
                    return Ok(());
                }
                Err(_) => continue,
            }
            let (awaited, timeout) = match step {
                DrainStep::Halt => (IoState::Halting, self.config.halt_timeout_us),
                DrainStep::Clear => (IoState::Clearing, self.config.clear_timeout_us),
            };
            let _ = self.wait_for(&sch, awaited, timeout.saturating_mul(scale));
        }
        if sch.lock().state.is_busy() {
            Err(CioError::Busy)
        } else {
            Ok(())
        }
    }

    /// 解绑并禁用子通道；子通道忙时推迟禁用
    pub(crate) fn unbind(&self, id: SubchannelId) {
        let Ok(sch) = self.subchannel(id) else {
            return;
        };
        let mut notes = Notes::new();
        {
            let mut s = sch.lock();
            s.binding = None;
            s.draining = false;
            s.eager = false;
            s.queued = None;
            if s.state.is_busy() {
                s.disable_pending = true;
            } else if let Err(e) = self.disable_locked(&mut s, &mut notes) {
                log::debug!("cio: {} disable deferred: {}", id, e);
                s.disable_pending = true;
            }
        }
        self.dispatch(notes);
    }
}

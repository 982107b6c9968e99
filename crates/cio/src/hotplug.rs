//! 热插拔与重新验证
//!
//! 通道子系统通过通道报告字通知配置变化，这里把它们抽象为 [`ChangeEvent`]：
//!
//! - 子通道事件：重新验证该子通道，并按前后状态的变化通知驱动
//! - 通道路径事件：重新验证所有经过该 CHPID 的子通道
//! - 配置警示：重新验证全部子通道

use alloc::sync::Arc;

use crate::css::ChannelSubsystem;
use crate::driver::EventKind;
use crate::interrupt::Notes;
use crate::subchannel::{IoState, Presence, SubchannelView};
use crate::types::{Chpid, DevNo, SubchannelId};

/// 配置变化事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// 某个子通道的状态发生变化
    Subchannel(SubchannelId),
    /// 某条通道路径的状态发生变化
    ChannelPath(Chpid),
    /// 配置警示，需要全面重新验证
    ConfigAlert,
}

/// 新设备出现时的通知对象（通常是总线层，用于匹配驱动）
pub trait DeviceNotifier: Send + Sync {
    /// 一个未绑定的设备变为可操作
    fn device_appeared(&self, view: &SubchannelView);
}

#[derive(Clone, Copy)]
struct Snapshot {
    presence: Presence,
    devno: DevNo,
    owned: bool,
}

impl ChannelSubsystem {
    /// 设置新设备通知对象
    pub fn set_device_notifier(&self, notifier: Arc<dyn DeviceNotifier>) {
        *self.notifier.lock() = Some(notifier);
    }

    /// 配置变化入口
    pub fn on_change_notification(&self, event: ChangeEvent) {
        log::debug!("cio: change notification {:?}", event);
        match event {
            ChangeEvent::Subchannel(id) => self.subchannel_event(id),
            ChangeEvent::ChannelPath(chpid) => {
                for (id, sch) in self.registry.entries() {
                    let uses = {
                        let s = sch.lock();
                        s.presence != Presence::Invalid && s.schib.pmcw.path_for_chpid(chpid) != 0
                    };
                    if uses {
                        self.subchannel_event(id);
                    }
                }
            }
            ChangeEvent::ConfigAlert => self.revalidate_all(),
        }
    }

    fn snapshot(&self, id: SubchannelId) -> Option<Snapshot> {
        let sch = self.registry.get(id)?;
        let s = sch.lock();
        Some(Snapshot {
            presence: s.presence,
            devno: s.devno,
            owned: s.is_owned(),
        })
    }

    /// 重新验证一个子通道，并按状态变化通知驱动
    pub(crate) fn subchannel_event(&self, id: SubchannelId) {
        let before = self.snapshot(id);
        let _ = self.revalidate(id);
        let Some(after) = self.snapshot(id) else {
            return;
        };
        let was_oper = before.is_some_and(|b| b.presence == Presence::Operational);
        let is_oper = after.presence == Presence::Operational;

        match before {
            Some(b) if !is_oper && b.owned => self.device_gone(id),
            _ if !was_oper && is_oper => self.device_appeared(id),
            Some(b) if is_oper && after.owned && b.devno != after.devno => {
                log::info!("cio: {} device number changed {} -> {}", id, b.devno, after.devno);
                self.notify_owner(id, EventKind::Revalidate);
            }
            _ => {}
        }
    }

    fn notify_owner(&self, id: SubchannelId, kind: EventKind) {
        let Ok(sch) = self.subchannel(id) else {
            return;
        };
        let mut notes = Notes::new();
        {
            let s = sch.lock();
            self.notify(&s, kind, 0, &mut notes);
        }
        self.dispatch(notes);
    }

    /// 设备消失：通知驱动一次，然后强制解绑
    fn device_gone(&self, id: SubchannelId) {
        let Ok(sch) = self.subchannel(id) else {
            return;
        };
        let mut notes = Notes::new();
        {
            let mut s = sch.lock();
            self.notify(&s, EventKind::DeviceGone, s.active.map_or(0, |a| a.intparm), &mut notes);
            s.binding = None;
            s.queued = None;
            s.active = None;
            s.eager = false;
            s.draining = false;
            s.disable_pending = false;
            s.state = IoState::Idle;
        }
        self.dispatch(notes);
        log::warn!("cio: {} device gone, driver unbound", id);
    }

    /// 设备出现：识别、建立路径组，然后通知总线层
    pub(crate) fn device_appeared(&self, id: SubchannelId) {
        let owned = self.snapshot(id).is_some_and(|s| s.owned);
        if !owned {
            self.recognize(id);
        }
        let Ok(sch) = self.subchannel(id) else {
            return;
        };
        let view = sch.lock().view();
        self.msg(format_args!("cio: {} devno {} appeared", id, view.devno));
        if owned {
            // 已绑定的设备恢复了路径，由驱动自己重新验证
            self.notify_owner(id, EventKind::Revalidate);
            return;
        }
        let notifier = self.notifier.lock().clone();
        if let Some(n) = notifier {
            n.device_appeared(&view);
        }
    }
}

//! 中断与完成处理
//!
//! [`ChannelSubsystem::process`] 是硬件中断和同步轮询共同的入口：
//! 取出完成记录、累积状态、判断结束状态、必要时自动发起基本检测，
//! 然后决定是否通知驱动并启动排队的请求。
//!
//! 驱动回调在子通道锁内被收集到 [`Notes`]，释放锁后统一调用，
//! 回调中可以直接发起下一个请求。

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::css::ChannelSubsystem;
use crate::devstat::DevStatFlags;
use crate::driver::{EventKind, IoEvent, IoHandler};
use crate::error::CioError;
use crate::hw::TestResult;
use crate::request::IoFlags;
use crate::subchannel::{IoState, Presence, Subchannel};
use crate::types::{
    Ccw, CcwFlags, ChannelProgram, CondCode, DeviceStatus, FunctionControl, IoBuffer, Irb, Orb, OrbFlags,
    SENSE_MAX, StatusControl, SubchannelId, ccw_cmd,
};

/// 中断类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptClass {
    /// 子通道 I/O 中断
    Io,
    /// 适配器中断（不由本子系统处理）
    Adapter,
}

/// 中断入口收到的中断信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqInfo {
    /// 子通道号
    pub schid: SubchannelId,
    /// 中断参数
    pub intparm: u32,
    /// 中断类型
    pub class: InterruptClass,
}

impl IrqInfo {
    /// 子通道 I/O 中断
    pub fn io(schid: SubchannelId) -> Self {
        Self {
            schid,
            intparm: schid.0 as u32,
            class: InterruptClass::Io,
        }
    }
}

/// 一次待发送的驱动回调
pub(crate) struct Notification {
    handler: Arc<dyn IoHandler>,
    id: SubchannelId,
    event: IoEvent,
}

/// 在锁内收集、锁外发送的回调列表
pub(crate) type Notes = Vec<Notification>;

/// 结束状态判定
fn is_ending(irb: &Irb) -> bool {
    let stctl = irb.scsw.stctl;
    stctl.contains(StatusControl::SECONDARY)
        || stctl == StatusControl::ALERT | StatusControl::PENDING
        || (irb
            .scsw
            .fctl
            .intersects(FunctionControl::HALT | FunctionControl::CLEAR)
            && stctl == StatusControl::PENDING)
}

impl ChannelSubsystem {
    /// 为绑定的驱动记录一次回调
    pub(crate) fn notify(&self, s: &Subchannel, kind: EventKind, intparm: u32, notes: &mut Notes) {
        if s.draining {
            return;
        }
        if let Some(binding) = &s.binding {
            notes.push(Notification {
                handler: binding.handler.clone(),
                id: s.id,
                event: IoEvent {
                    kind,
                    intparm,
                    status: s.devstat,
                },
            });
        }
    }

    /// 发送收集到的回调，调用时不得持有子通道锁
    pub(crate) fn dispatch(&self, notes: Notes) {
        for n in notes {
            n.handler.handle_event(n.id, &n.event);
        }
    }

    /// 处理一个子通道上的挂起状态，返回是否到达结束状态
    pub fn process(&self, id: SubchannelId) -> bool {
        let Ok(sch) = self.subchannel(id) else {
            return false;
        };
        let mut notes = Notes::new();
        let ending = self.process_locked(&mut sch.lock(), &mut notes);
        self.dispatch(notes);
        ending
    }

    /// I/O 中断入口
    pub fn do_io_interrupt(&self, info: IrqInfo) {
        if info.class == InterruptClass::Adapter {
            log::debug!("cio: adapter interrupt ignored");
            return;
        }
        if self.registry.get(info.schid).is_none() {
            // 未知子通道：取走状态，避免中断反复出现
            log::debug!("cio: interrupt for unknown subchannel {}", info.schid);
            let _ = self.hw.tsch(info.schid);
            return;
        }
        self.process(info.schid);
    }

    pub(crate) fn process_locked(&self, s: &mut Subchannel, notes: &mut Notes) -> bool {
        let irb = match self.hw.tsch(s.id) {
            TestResult::NoStatus => return false,
            TestResult::NotOperational => {
                self.not_oper_completion(s, notes);
                return true;
            }
            TestResult::Status(irb) => irb,
        };

        if s.state == IoState::Idle {
            self.unsolicited(s, &irb, notes);
            return true;
        }

        let sense_done = if s.sense_pending {
            if !is_ending(&irb) {
                return false;
            }
            self.collect_sense(s, &irb);
            true
        } else {
            s.devstat.accumulate(&irb);
            s.suspended = s.devstat.flags.contains(DevStatFlags::SUSPENDED);
            false
        };

        let ending = sense_done || is_ending(&irb);
        if ending
            && !sense_done
            && s.devstat.dstat.contains(DeviceStatus::UNIT_CHECK)
            && !s.devstat.flags.contains(DevStatFlags::SENSE_AVAILABLE)
            && s.state != IoState::Halting
            && s.state != IoState::Clearing
            && self.issue_sense(s, irb.esw.lpum)
        {
            return false;
        }

        let Some(active) = s.active else {
            return ending;
        };
        let flags = active.flags;
        let first_primary = !ending
            && flags.contains(IoFlags::EARLY_NOTIFICATION)
            && irb.scsw.stctl.contains(StatusControl::PRIMARY)
            && !active.primary_reported;
        if first_primary {
            if let Some(a) = s.active.as_mut() {
                a.primary_reported = true;
            }
            s.status_block = s.devstat;
        }
        let suspend_report = s.suspended && flags.contains(IoFlags::ALLOW_SUSPEND);

        if ending {
            s.finish();
            self.complete_disable(s, notes);
        }

        let wanted = ending || first_primary || suspend_report || flags.contains(IoFlags::REPORT_ALL);
        if wanted && !flags.contains(IoFlags::DONT_CALL_HANDLER) {
            self.notify(s, EventKind::Interrupt, active.intparm, notes);
        }

        if ending {
            self.start_queued(s, notes);
        }
        ending
    }

    /// 空闲子通道上的状态：有警示状态时作为主动中断交付，否则只记录
    fn unsolicited(&self, s: &mut Subchannel, irb: &Irb, notes: &mut Notes) {
        s.devstat.replace(irb);
        if irb.scsw.stctl.contains(StatusControl::ALERT) && s.is_owned() {
            self.notify(s, EventKind::Unsolicited, 0, notes);
        } else {
            log::debug!(
                "cio: {} unsolicited status dstat {:02x} cstat {:02x}",
                s.id,
                irb.scsw.dstat.bits(),
                irb.scsw.cstat.bits()
            );
        }
    }

    /// 单元检查且没有并发检测数据时发起基本检测
    fn issue_sense(&self, s: &mut Subchannel, lpum: u8) -> bool {
        let buf = IoBuffer::new(SENSE_MAX);
        let ccw = Ccw::with_data(ccw_cmd::SENSE, CcwFlags::SLI, buf.clone());
        let lpm = if lpum & s.opm != 0 { lpum } else { s.opm };
        let orb = Orb {
            intparm: s.id.0 as u32,
            flags: OrbFlags::empty(),
            lpm,
            program: ChannelProgram::single(ccw),
        };
        match self.hw.ssch(s.id, &orb) {
            CondCode::Ok => {
                s.sense_pending = true;
                s.sense_buf = Some(buf);
                true
            }
            cc => {
                log::debug!("cio: {} basic sense not started: {:?}", s.id, cc);
                s.devstat.flags |= DevStatFlags::SENSE_FAILED;
                false
            }
        }
    }

    /// 基本检测结束：把检测数据并入原请求的状态
    fn collect_sense(&self, s: &mut Subchannel, irb: &Irb) {
        s.sense_pending = false;
        let Some(buf) = s.sense_buf.take() else {
            return;
        };
        let failed = irb.scsw.dstat.contains(DeviceStatus::UNIT_CHECK) || !irb.scsw.cstat.is_empty();
        if failed {
            log::warn!("cio: {} basic sense failed", s.id);
            s.devstat.flags |= DevStatFlags::SENSE_FAILED;
            return;
        }
        let residual = (irb.scsw.count as usize).min(SENSE_MAX);
        s.devstat.set_sense(&buf.read_prefix(SENSE_MAX - residual));
    }

    /// 子通道在 I/O 过程中变为不可操作
    fn not_oper_completion(&self, s: &mut Subchannel, notes: &mut Notes) {
        let failed = if s.devstat.lpum != 0 {
            s.devstat.lpum
        } else {
            s.active.map_or(0, |a| a.lpm)
        };
        let usable = match self.hw.stsch(s.id) {
            Ok(schib) => {
                s.schib = schib;
                schib.pmcw.usable_mask()
            }
            Err(_) => 0,
        };
        s.opm &= usable & !failed;
        if s.opm == 0 && s.presence == Presence::Operational {
            self.notoper(s.id);
            s.presence = Presence::NotOperational;
        }

        let was_busy = s.state.is_busy();
        let active = s.active;
        s.devstat.flags |= DevStatFlags::NOT_OPERATIONAL;
        s.finish();

        let intparm = active.map_or(0, |a| a.intparm);
        if s.opm == 0 {
            self.notify(s, EventKind::NotOperational, intparm, notes);
            if let Some(req) = s.queued.take() {
                self.notify(s, EventKind::StartFailed(CioError::NoDevice), req.intparm, notes);
            }
            return;
        }
        if was_busy && !active.is_some_and(|a| a.flags.contains(IoFlags::DONT_CALL_HANDLER)) {
            self.notify(s, EventKind::Interrupt, intparm, notes);
        }
        self.start_queued(s, notes);
    }

    /// 结束状态后执行被推迟的禁用
    fn complete_disable(&self, s: &mut Subchannel, notes: &mut Notes) {
        if !s.disable_pending {
            return;
        }
        s.disable_pending = false;
        if let Err(e) = self.disable_locked(s, notes) {
            log::warn!("cio: {} deferred disable failed: {}", s.id, e);
        }
    }

    /// 结束状态后启动排队的请求，失败时通知驱动
    fn start_queued(&self, s: &mut Subchannel, notes: &mut Notes) {
        let Some(req) = s.queued.take() else {
            return;
        };
        let intparm = req.intparm;
        if let Err(e) = self.issue_start(s, req, false, notes) {
            log::debug!("cio: {} queued request {:#x} failed: {}", s.id, intparm, e);
            self.notify(s, EventKind::StartFailed(e), intparm, notes);
        }
    }
}

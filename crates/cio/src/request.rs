//! 请求生命周期
//!
//! start / resume / halt / clear 四种功能，以及同步等待。
//!
//! # 条件码处理
//!
//! | cc | start | halt | clear | resume |
//! |----|-------|------|-------|--------|
//! | 0  | 进入忙状态 | 进入 Halting | 进入 Clearing | 继续执行 |
//! | 1  | 排空挂起状态后重试 | 排空后重试 | 排空后重试 | `Busy` |
//! | 2  | `Busy` | `Busy` | `Busy` | `InvalidArgument` |
//! | 3  | 去掉失败路径，必要时在剩余路径上重试 | `NoDevice` | `NoDevice` | `NoDevice` |
//!
//! 同步请求（[`IoFlags::WAIT_FOR_INTERRUPT`]）在同步锁保护下发起，
//! 调用者轮询挂起中断直到子通道离开忙状态。

use alloc::sync::Arc;
use bitflags::bitflags;
use sync::SpinLock;

use crate::config::MAX_RETRIES;
use crate::css::ChannelSubsystem;
use crate::devstat::{DevStat, DevStatFlags};
use crate::error::{CioError, CioResult};
use crate::interrupt::Notes;
use crate::ops::cio_ops;
use crate::retry::retry;
use crate::subchannel::{ActiveRequest, IoState, Presence, Subchannel};
use crate::types::{ChannelProgram, CondCode, Orb, OrbFlags, Pmcw, SubchannelId};

bitflags! {
    /// 请求标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IoFlags: u16 {
        /// 同步等待完成
        const WAIT_FOR_INTERRUPT = 1 << 0;
        /// 收到主状态时即通知驱动
        const EARLY_NOTIFICATION = 1 << 1;
        /// 每个中断都通知驱动
        const REPORT_ALL = 1 << 2;
        /// `lpm` 字段有效
        const VALID_LPM = 1 << 3;
        /// 不调用驱动回调
        const DONT_CALL_HANDLER = 1 << 4;
        /// 同步等待超时后停止请求
        const CANCEL_ON_TIMEOUT = 1 << 5;
        /// 允许通道程序挂起
        const ALLOW_SUSPEND = 1 << 6;
        /// 禁止预取
        const DENY_PREFETCH = 1 << 7;
    }
}

/// 请求描述符
#[derive(Debug, Clone)]
pub struct IoRequest {
    /// 通道程序
    pub program: Arc<ChannelProgram>,
    /// 驱动选择的中断参数，完成时原样返回
    pub intparm: u32,
    /// 允许使用的路径（需同时设置 [`IoFlags::VALID_LPM`]）
    pub lpm: u8,
    /// 标志
    pub flags: IoFlags,
    /// 同步等待超时（微秒），`None` 使用配置的缺省值
    pub timeout_us: Option<u64>,
}

impl IoRequest {
    /// 创建请求，允许使用全部路径
    pub fn new(program: Arc<ChannelProgram>, intparm: u32) -> Self {
        Self {
            program,
            intparm,
            lpm: 0xFF,
            flags: IoFlags::empty(),
            timeout_us: None,
        }
    }

    /// 追加标志
    pub fn with_flags(mut self, flags: IoFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// 限制使用的路径
    pub fn with_lpm(mut self, lpm: u8) -> Self {
        self.lpm = lpm;
        self.flags |= IoFlags::VALID_LPM;
        self
    }

    /// 设置同步等待超时
    pub fn with_timeout(mut self, us: u64) -> Self {
        self.timeout_us = Some(us);
        self
    }

    fn orb_flags(&self) -> OrbFlags {
        let mut f = OrbFlags::empty();
        if self.flags.contains(IoFlags::ALLOW_SUSPEND) {
            f |= OrbFlags::SUSPEND_CONTROL;
        }
        if self.flags.contains(IoFlags::DENY_PREFETCH) {
            f |= OrbFlags::PREFETCH_DENY;
        }
        f
    }
}

/// `start` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// 请求已被硬件接受，完成将通过回调通知
    Started,
    /// 子通道忙，请求已放入排队槽
    Queued,
    /// 同步请求已完成
    Completed(DevStat),
}

/// 重试过程中的瞬时条件，耗尽后报告为忙
fn settle<T>(r: CioResult<T>) -> CioResult<T> {
    r.map_err(|e| if e == CioError::WouldBlock { CioError::Busy } else { e })
}

impl ChannelSubsystem {
    /// 发起一个请求
    ///
    /// 异步请求返回 [`StartOutcome::Started`] 或 [`StartOutcome::Queued`]；
    /// 同步请求等待结束状态并返回 [`StartOutcome::Completed`]。
    pub fn start(&self, id: SubchannelId, req: IoRequest) -> CioResult<StartOutcome> {
        let sch = self.subchannel(id)?;
        if !req.flags.contains(IoFlags::WAIT_FOR_INTERRUPT) {
            let mut notes = Notes::new();
            let r = self.start_locked(&mut sch.lock(), req, false, &mut notes);
            self.dispatch(notes);
            return r;
        }

        let _guard = self.sync_acquire(id)?;
        let timeout = req.timeout_us.unwrap_or(self.config.sync_timeout_us);
        let (intparm, flags) = (req.intparm, req.flags);
        let mut notes = Notes::new();
        let r = self.start_locked(&mut sch.lock(), req, true, &mut notes);
        self.dispatch(notes);
        r?;

        match self.wait_for(&sch, IoState::BusySync, timeout) {
            Ok(()) => Ok(StartOutcome::Completed(sch.lock().status_block)),
            Err(CioError::Timeout) => {
                self.sync_timed_out(&sch, intparm, flags);
                Err(CioError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// 在子通道锁内发起请求；忙时按急切模式规则排队
    pub(crate) fn start_locked(
        &self,
        s: &mut Subchannel,
        req: IoRequest,
        sync: bool,
        notes: &mut Notes,
    ) -> CioResult<StartOutcome> {
        if s.presence != Presence::Operational {
            return Err(CioError::NoDevice);
        }
        if s.state.is_busy() {
            if !sync && s.state == IoState::BusyAsync && s.eager && s.queued.is_none() {
                s.queued = Some(req);
                return Ok(StartOutcome::Queued);
            }
            return Err(CioError::Busy);
        }
        self.issue_start(s, req, sync, notes)?;
        Ok(StartOutcome::Started)
    }

    /// 执行 start-subchannel 并处理条件码
    pub(crate) fn issue_start(
        &self,
        s: &mut Subchannel,
        req: IoRequest,
        sync: bool,
        notes: &mut Notes,
    ) -> CioResult<()> {
        let wanted = if req.flags.contains(IoFlags::VALID_LPM) {
            req.lpm
        } else {
            0xFF
        };
        let r = retry(
            MAX_RETRIES,
            |e| *e == CioError::WouldBlock,
            |_| {
                let lpm = wanted & s.opm;
                if lpm == 0 {
                    return Err(CioError::NoDevice);
                }
                let orb = Orb {
                    intparm: s.id.0 as u32,
                    flags: req.orb_flags(),
                    lpm,
                    program: req.program.clone(),
                };
                match self.hw.ssch(s.id, &orb) {
                    CondCode::Ok => {
                        s.devstat.reset();
                        s.devstat.intparm = req.intparm;
                        s.devstat.flags |= DevStatFlags::START_FUNCTION;
                        s.state = if sync { IoState::BusySync } else { IoState::BusyAsync };
                        s.eager = req.flags.contains(IoFlags::EARLY_NOTIFICATION);
                        s.suspended = false;
                        s.sense_pending = false;
                        s.active = Some(ActiveRequest {
                            intparm: req.intparm,
                            flags: req.flags,
                            lpm,
                            primary_reported: false,
                        });
                        Ok(())
                    }
                    CondCode::StatusPending => {
                        self.process_locked(s, notes);
                        Err(CioError::WouldBlock)
                    }
                    CondCode::Busy => Err(CioError::Busy),
                    CondCode::NotOperational => self.start_not_oper(s, lpm, wanted),
                }
            },
        );
        settle(r)
    }

    /// start 返回 cc3：去掉失败的路径，还有路径可用时请求重试
    fn start_not_oper(&self, s: &mut Subchannel, tried: u8, wanted: u8) -> CioResult<()> {
        let usable = match self.hw.stsch(s.id) {
            Ok(schib) => {
                s.schib = schib;
                schib.pmcw.usable_mask()
            }
            Err(_) => 0,
        };
        let before = s.opm;
        s.opm &= usable;
        if s.opm == before {
            // 硬件仍报告这些路径可用，只能放弃本次尝试的路径
            s.opm &= !tried;
        }
        if s.opm == 0 {
            if s.presence == Presence::Operational {
                self.notoper(s.id);
            }
            s.presence = Presence::NotOperational;
            return Err(CioError::NoDevice);
        }
        if wanted & s.opm != 0 {
            log::debug!("cio: {} retrying on paths {:02x}", s.id, wanted & s.opm);
            return Err(CioError::WouldBlock);
        }
        Err(CioError::NoDevice)
    }

    /// 同步等待超时：按请求标志停止，或降级为异步请求
    fn sync_timed_out(&self, sch: &Arc<SpinLock<Subchannel>>, intparm: u32, flags: IoFlags) {
        let mut notes = Notes::new();
        let halted = {
            let mut s = sch.lock();
            if s.state != IoState::BusySync {
                return;
            }
            log::warn!("cio: {} synchronous request timed out", s.id);
            // 降级后迟到的结束状态仍按异步规则交付
            s.state = IoState::BusyAsync;
            flags.contains(IoFlags::CANCEL_ON_TIMEOUT)
                && self.halt_locked(&mut s, intparm, flags, &mut notes).is_ok()
        };
        self.dispatch(notes);
        if halted {
            let _ = self.wait_for(sch, IoState::Halting, self.config.halt_timeout_us);
        }
    }

    /// 轮询挂起中断，直到子通道离开 `awaited` 状态
    pub(crate) fn wait_for(
        &self,
        sch: &Arc<SpinLock<Subchannel>>,
        awaited: IoState,
        timeout_us: u64,
    ) -> CioResult<()> {
        let ops = cio_ops();
        let deadline = ops.now_us().saturating_add(timeout_us);
        loop {
            if sch.lock().state != awaited {
                return Ok(());
            }
            if let Some(info) = self.hw.tpi() {
                self.do_io_interrupt(info);
                continue;
            }
            if ops.now_us() >= deadline {
                return Err(CioError::Timeout);
            }
            ops.wait_for_interrupt();
        }
    }

    /// 恢复挂起的通道程序
    pub fn resume(&self, id: SubchannelId) -> CioResult<()> {
        let sch = self.subchannel(id)?;
        let mut s = sch.lock();
        if !s.suspended {
            return Err(CioError::InvalidArgument);
        }
        match self.hw.rsch(id) {
            CondCode::Ok => {
                s.suspended = false;
                s.devstat.flags.remove(DevStatFlags::SUSPENDED);
                Ok(())
            }
            CondCode::StatusPending => Err(CioError::Busy),
            CondCode::Busy => Err(CioError::InvalidArgument),
            CondCode::NotOperational => Err(CioError::NoDevice),
        }
    }

    /// 停止子通道上的当前操作
    ///
    /// `intparm` 替换进行中请求的中断参数，结束状态以它报告。
    pub fn halt(&self, id: SubchannelId, intparm: u32, flags: IoFlags) -> CioResult<()> {
        self.cancel(id, intparm, flags, IoState::Halting)
    }

    /// 清除子通道上的全部功能，同时丢弃排队的请求
    pub fn clear(&self, id: SubchannelId, intparm: u32, flags: IoFlags) -> CioResult<()> {
        self.cancel(id, intparm, flags, IoState::Clearing)
    }

    fn cancel(&self, id: SubchannelId, intparm: u32, flags: IoFlags, kind: IoState) -> CioResult<()> {
        let sch = self.subchannel(id)?;
        let wait = flags.contains(IoFlags::WAIT_FOR_INTERRUPT);
        let _guard = if wait { Some(self.sync_acquire(id)?) } else { None };

        let mut notes = Notes::new();
        let r = {
            let mut s = sch.lock();
            if kind == IoState::Halting {
                self.halt_locked(&mut s, intparm, flags, &mut notes)
            } else {
                self.clear_locked(&mut s, intparm, flags, &mut notes)
            }
        };
        self.dispatch(notes);
        r?;

        if wait {
            let timeout = if kind == IoState::Halting {
                self.config.halt_timeout_us
            } else {
                self.config.clear_timeout_us
            };
            self.wait_for(&sch, kind, timeout)?;
        }
        Ok(())
    }

    fn begin_cancel(s: &mut Subchannel, intparm: u32, flags: IoFlags, state: IoState, f: DevStatFlags) {
        if s.state == IoState::Idle {
            s.devstat.reset();
        }
        s.devstat.intparm = intparm;
        s.devstat.flags |= f;
        s.state = state;
        s.sense_pending = false;
        s.active = Some(ActiveRequest {
            intparm,
            flags,
            lpm: s.opm,
            primary_reported: false,
        });
    }

    pub(crate) fn halt_locked(
        &self,
        s: &mut Subchannel,
        intparm: u32,
        flags: IoFlags,
        notes: &mut Notes,
    ) -> CioResult<()> {
        if !s.presence.is_valid() {
            return Err(CioError::NoDevice);
        }
        let r = retry(
            MAX_RETRIES,
            |e| *e == CioError::WouldBlock,
            |_| match self.hw.hsch(s.id) {
                CondCode::Ok => {
                    Self::begin_cancel(s, intparm, flags, IoState::Halting, DevStatFlags::HALT_FUNCTION);
                    Ok(())
                }
                CondCode::StatusPending => {
                    self.process_locked(s, notes);
                    Err(CioError::WouldBlock)
                }
                CondCode::Busy => Err(CioError::Busy),
                CondCode::NotOperational => Err(CioError::NoDevice),
            },
        );
        settle(r)
    }

    pub(crate) fn clear_locked(
        &self,
        s: &mut Subchannel,
        intparm: u32,
        flags: IoFlags,
        notes: &mut Notes,
    ) -> CioResult<()> {
        if !s.presence.is_valid() {
            return Err(CioError::NoDevice);
        }
        let r = retry(
            MAX_RETRIES,
            |e| *e == CioError::WouldBlock,
            |_| match self.hw.csch(s.id) {
                CondCode::Ok => {
                    Self::begin_cancel(s, intparm, flags, IoState::Clearing, DevStatFlags::CLEAR_FUNCTION);
                    if let Some(dropped) = s.queued.take() {
                        log::debug!("cio: {} clear drops queued request {:#x}", s.id, dropped.intparm);
                    }
                    Ok(())
                }
                CondCode::StatusPending => {
                    self.process_locked(s, notes);
                    Err(CioError::WouldBlock)
                }
                CondCode::Busy => Err(CioError::Busy),
                CondCode::NotOperational => Err(CioError::NoDevice),
            },
        );
        settle(r)
    }

    /// store-subchannel、修改路径管理控制字、modify-subchannel
    pub(crate) fn modify(
        &self,
        s: &mut Subchannel,
        mut edit: impl FnMut(&mut Pmcw),
        notes: &mut Notes,
    ) -> CioResult<()> {
        let r = retry(
            MAX_RETRIES,
            |e| matches!(e, CioError::Busy | CioError::WouldBlock),
            |_| {
                let mut schib = self.hw.stsch(s.id).map_err(|_| CioError::NoDevice)?;
                edit(&mut schib.pmcw);
                match self.hw.msch(s.id, &schib) {
                    CondCode::Ok => {
                        s.schib = schib;
                        Ok(())
                    }
                    CondCode::StatusPending => {
                        self.process_locked(s, notes);
                        Err(CioError::WouldBlock)
                    }
                    CondCode::Busy => Err(CioError::Busy),
                    CondCode::NotOperational => Err(CioError::NoDevice),
                }
            },
        );
        settle(r)
    }

    /// 启用子通道，并设置 I/O 中断子类和中断参数
    pub(crate) fn enable_locked(&self, s: &mut Subchannel, notes: &mut Notes) -> CioResult<()> {
        let intparm = s.id.0 as u32;
        let in_sync = self.sync_lock.owner() == Some(s.id);
        self.modify(
            s,
            |pmcw| {
                pmcw.enabled = true;
                pmcw.intparm = intparm;
                if !in_sync {
                    pmcw.isc = crate::config::IO_ISC;
                }
            },
            notes,
        )
    }

    pub(crate) fn disable_locked(&self, s: &mut Subchannel, notes: &mut Notes) -> CioResult<()> {
        self.modify(s, |pmcw| pmcw.enabled = false, notes)
    }
}

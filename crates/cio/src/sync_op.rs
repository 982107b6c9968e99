//! 同步 I/O 锁
//!
//! 同一时刻只允许一个子通道进行同步 I/O。持锁期间：
//!
//! - 本 CPU 只接受 [`SYNC_ISC`] 子类的 I/O 中断
//! - 持锁的子通道被改到 [`SYNC_ISC`] 子类并启用
//!
//! [`SyncGuard`] 被释放时恢复原来的中断子类掩码和子通道设置，
//! 无论等待是正常结束、超时还是出错。同一子通道可以递归获取。
//!
//! 获取和释放都要在状态锁之外修改子通道，期间锁处于过渡阶段，
//! 任何调用者（包括同一子通道）都会得到 [`CioError::WouldBlock`]。

use sync::SpinLock;

use crate::config::SYNC_ISC;
use crate::css::ChannelSubsystem;
use crate::error::{CioError, CioResult};
use crate::interrupt::Notes;
use crate::ops::cio_ops;
use crate::types::{SubchannelId, isc_bit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Free,
    Acquiring,
    Held,
    Releasing,
}

#[derive(Default)]
struct SyncState {
    phase: Phase,
    owner: Option<SubchannelId>,
    depth: usize,
    saved_mask: u8,
    saved_isc: u8,
    saved_enabled: bool,
}

/// 全局同步锁
pub(crate) struct SyncLock {
    state: SpinLock<SyncState>,
}

impl SyncLock {
    pub(crate) fn new() -> Self {
        Self {
            state: SpinLock::new(SyncState::default()),
        }
    }

    /// 当前持锁的子通道
    pub(crate) fn owner(&self) -> Option<SubchannelId> {
        self.state.lock().owner
    }
}

/// 同步锁的作用域保护器
pub struct SyncGuard<'a> {
    css: &'a ChannelSubsystem,
    id: SubchannelId,
}

impl SyncGuard<'_> {
    /// 持锁的子通道
    pub fn subchannel(&self) -> SubchannelId {
        self.id
    }
}

impl ChannelSubsystem {
    /// 为 `id` 获取同步锁
    ///
    /// 锁被其它子通道持有，或正处于获取/释放的过渡阶段时，
    /// 不会等待而是立即返回 [`CioError::WouldBlock`]，由调用者决定何时重试。
    /// 同步请求的调用者因此不会在这里阻塞到锁空闲为止。
    pub fn sync_acquire(&self, id: SubchannelId) -> CioResult<SyncGuard<'_>> {
        let sch = self.subchannel(id)?;
        {
            let mut st = self.sync_lock.state.lock();
            match (st.phase, st.owner) {
                (Phase::Held, Some(owner)) if owner == id => {
                    st.depth += 1;
                    return Ok(SyncGuard { css: self, id });
                }
                (Phase::Free, _) => {
                    st.phase = Phase::Acquiring;
                    st.owner = Some(id);
                    st.depth = 1;
                }
                _ => return Err(CioError::WouldBlock),
            }
        }

        let saved_mask = cio_ops().set_isc_mask(isc_bit(SYNC_ISC));
        let mut notes = Notes::new();
        let (saved_isc, saved_enabled, r) = {
            let mut s = sch.lock();
            let pmcw = s.schib.pmcw;
            let r = self.modify(
                &mut s,
                |p| {
                    p.isc = SYNC_ISC;
                    p.enabled = true;
                },
                &mut notes,
            );
            (pmcw.isc, pmcw.enabled, r)
        };
        self.dispatch(notes);

        let mut st = self.sync_lock.state.lock();
        if let Err(e) = r {
            cio_ops().set_isc_mask(saved_mask);
            *st = SyncState::default();
            return Err(e);
        }
        st.saved_mask = saved_mask;
        st.saved_isc = saved_isc;
        st.saved_enabled = saved_enabled;
        st.phase = Phase::Held;
        Ok(SyncGuard { css: self, id })
    }

    fn sync_release(&self, id: SubchannelId) {
        let (isc, enabled, mask) = {
            let mut st = self.sync_lock.state.lock();
            st.depth -= 1;
            if st.depth > 0 {
                return;
            }
            st.phase = Phase::Releasing;
            (st.saved_isc, st.saved_enabled, st.saved_mask)
        };

        if let Ok(sch) = self.subchannel(id) {
            let mut notes = Notes::new();
            let r = {
                let mut s = sch.lock();
                self.modify(
                    &mut s,
                    |p| {
                        p.isc = isc;
                        p.enabled = enabled;
                    },
                    &mut notes,
                )
            };
            self.dispatch(notes);
            if let Err(e) = r {
                log::warn!("cio: {} failed to restore interruption subclass: {}", id, e);
            }
        }
        cio_ops().set_isc_mask(mask);
        *self.sync_lock.state.lock() = SyncState::default();
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.css.sync_release(self.id);
    }
}

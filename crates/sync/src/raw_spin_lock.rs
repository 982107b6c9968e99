//! 原始自旋锁
//!
//! 实现 `lock_api::RawMutex`，持锁期间屏蔽本地中断。
//! 中断处理程序与普通上下文会竞争同一把子通道锁，
//! 因此必须在获取锁之前屏蔽中断，否则同一 CPU 上会自锁。

use core::cell::UnsafeCell;
use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::intr_guard::IntrGuard;

/// 屏蔽中断的原始自旋锁，不可重入。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    /// 加锁时保存的中断状态，只由持锁者读写
    saved_flags: UnsafeCell<usize>,
}

// SAFETY: saved_flags 只在持锁期间被访问
unsafe impl Sync for RawSpinLock {}
unsafe impl Send for RawSpinLock {}

impl RawSpinLock {
    /// 创建一个未加锁的 RawSpinLock
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
            saved_flags: UnsafeCell::new(0),
        }
    }

    fn acquire(&self, guard: IntrGuard) {
        // SAFETY: 调用者已获得锁
        unsafe { *self.saved_flags.get() = guard.into_flags() };
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    // 中断状态属于当前 CPU，保护器不能跨线程移动
    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        let guard = IntrGuard::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        self.acquire(guard);
    }

    fn try_lock(&self) -> bool {
        let guard = IntrGuard::new();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.acquire(guard);
            true
        } else {
            // guard 在此处被 Drop，立即恢复中断
            false
        }
    }

    unsafe fn unlock(&self) {
        // SAFETY: 调用者持有锁，saved_flags 由 lock/try_lock 写入
        let flags = unsafe { *self.saved_flags.get() };
        self.locked.store(false, Ordering::Release);
        drop(unsafe { IntrGuard::from_flags(flags) });
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

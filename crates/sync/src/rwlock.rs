//! 自旋读写锁
//!
//! 写者屏蔽本地中断；读者不屏蔽，且读者优先，
//! 使中断上下文中的读者不会因为被打断的同 CPU 读者而死锁。

use core::cell::UnsafeCell;
use core::hint;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::intr_guard::IntrGuard;

const WRITER: usize = 1;
const READER: usize = 2;

/// 原始自旋读写锁
#[derive(Debug)]
pub struct RawSpinRwLock {
    state: AtomicUsize,
    saved_flags: UnsafeCell<usize>,
}

// SAFETY: saved_flags 只由写者在持锁期间访问
unsafe impl Sync for RawSpinRwLock {}
unsafe impl Send for RawSpinRwLock {}

impl RawSpinRwLock {
    /// 创建一个未加锁的读写锁
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            saved_flags: UnsafeCell::new(0),
        }
    }
}

impl Default for RawSpinRwLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawRwLock for RawSpinRwLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinRwLock::new();

    type GuardMarker = lock_api::GuardNoSend;

    fn lock_shared(&self) {
        loop {
            let cur = self.state.load(Ordering::Relaxed);
            if cur & WRITER == 0
                && self
                    .state
                    .compare_exchange_weak(cur, cur + READER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            hint::spin_loop();
        }
    }

    fn try_lock_shared(&self) -> bool {
        let mut cur = self.state.load(Ordering::Relaxed);
        while cur & WRITER == 0 {
            match self.state.compare_exchange(
                cur,
                cur + READER,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    unsafe fn unlock_shared(&self) {
        self.state.fetch_sub(READER, Ordering::Release);
    }

    fn lock_exclusive(&self) {
        let guard = IntrGuard::new();
        while self
            .state
            .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        // SAFETY: 已获得写锁
        unsafe { *self.saved_flags.get() = guard.into_flags() };
    }

    fn try_lock_exclusive(&self) -> bool {
        let guard = IntrGuard::new();
        if self
            .state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            unsafe { *self.saved_flags.get() = guard.into_flags() };
            true
        } else {
            false
        }
    }

    unsafe fn unlock_exclusive(&self) {
        let flags = unsafe { *self.saved_flags.get() };
        self.state.fetch_and(!WRITER, Ordering::Release);
        drop(unsafe { IntrGuard::from_flags(flags) });
    }

    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }
}

/// 自旋读写锁
pub type RwLock<T> = lock_api::RwLock<RawSpinRwLock, T>;
/// 读保护器
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawSpinRwLock, T>;
/// 写保护器
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawSpinRwLock, T>;

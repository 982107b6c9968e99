//! 自旋锁封装
//!
//! 基于 [`RawSpinLock`] 的 `lock_api::Mutex`。
//!
//! # 示例
//! ```ignore
//! let lock = SpinLock::new(0);
//! {
//!     let mut guard = lock.lock(); // 获取锁，屏蔽中断
//!     *guard += 1;
//! } // 离开作用域，释放锁并恢复中断
//! ```
//!
//! # 注意
//! SpinLock 不可重入，且持锁期间中断被屏蔽，应避免在持锁时做长时间操作
//! （例如调用驱动回调或同步等待 I/O 完成）。

use crate::raw_spin_lock::RawSpinLock;

/// 屏蔽中断的互斥自旋锁
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// [`SpinLock`] 的 RAII 保护器
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::test_mock::{irqs_enabled, serial};
    use std::sync::Arc;
    use std::vec::Vec;

    #[test]
    fn test_lock_masks_interrupts_while_held() {
        let _serial = serial();
        let lock = SpinLock::new(0u32);
        {
            let mut g = lock.lock();
            *g += 1;
            assert!(!irqs_enabled());
            assert!(lock.is_locked());
        }
        assert!(irqs_enabled());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_try_lock_fails_and_restores() {
        let _serial = serial();
        let lock = SpinLock::new(());
        let held = lock.lock();
        assert!(lock.try_lock().is_none());
        // 失败的 try_lock 不能泄漏中断屏蔽（外层持锁仍然屏蔽）
        assert!(!irqs_enabled());
        drop(held);
        assert!(irqs_enabled());
        assert!(lock.try_lock().is_some());
        assert!(irqs_enabled());
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let _serial = serial();
        let lock = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}

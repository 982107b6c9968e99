//! 同步原语
//!
//! 为通道子系统提供中断安全的锁：
//!
//! - [`SpinLock`] - 持锁期间屏蔽本地中断的互斥自旋锁（每个子通道一把）
//! - [`RwLock`] - 读多写少的自旋读写锁（子通道表、黑名单等）
//! - [`IntrGuard`] - 基于 RAII 的中断屏蔽保护器
//!
//! 锁的实现基于 `lock_api`，原始锁类型分别实现 `RawMutex` / `RawRwLock`。
//!
//! # 架构依赖
//!
//! 此 crate 通过 [`ArchOps`] trait 抽象中断屏蔽操作。
//! 使用前必须调用 [`register_arch_ops`] 注册实现。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod rwlock;
mod spin_lock;

pub use intr_guard::IntrGuard;
pub use raw_spin_lock::RawSpinLock;
pub use rwlock::{RawSpinRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由平台代码实现并注册，提供本地中断的屏蔽与恢复
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须确保在适当的上下文中调用
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);
}

static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 获取架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        #[cfg(test)]
        {
            extern crate test_support;
            return &test_support::mock::arch::MOCK_ARCH_OPS;
        }
        #[cfg(not(test))]
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

//! 架构相关操作的 Mock 实现
//!
//! `sync` crate 在 `cfg(test)` 下为 [`MockArchOps`] 实现 `ArchOps`。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock 架构操作：用一个全局标志模拟本地中断开关
pub struct MockArchOps {
    pub interrupt_state: AtomicBool,
    /// 累计的屏蔽次数
    pub disable_count: AtomicUsize,
}

impl MockArchOps {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            disable_count: AtomicUsize::new(0),
        }
    }

    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.disable_count.fetch_add(1, Ordering::Relaxed);
        self.interrupt_state.swap(false, Ordering::SeqCst) as usize
    }

    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state.store(flags != 0, Ordering::SeqCst);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt_state.load(Ordering::SeqCst)
    }

    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.interrupt_state.store(enabled, Ordering::SeqCst);
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();

//! 通道子系统平台操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `cio` crate（避免循环依赖）。
//! `cio` crate 在 `cfg(test)` 下为 [`MockCioOps`] 实现 `CioOps`。

use core::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Mock 平台操作
///
/// 时钟每读一次前进 1 微秒，使同步等待的超时在测试中可以确定地到达。
pub struct MockCioOps {
    pub cpu_addr: AtomicU16,
    pub cpu_id: AtomicU32,
    pub cpu_model: AtomicU16,
    pub tod: AtomicU64,
    pub clock_us: AtomicU64,
    /// 当前接受的 I/O 中断子类掩码（bit 7-n 对应子类 n）
    pub isc_mask: AtomicU8,
    pub waits: AtomicUsize,
}

impl MockCioOps {
    pub const fn new() -> Self {
        Self {
            cpu_addr: AtomicU16::new(0x0001),
            cpu_id: AtomicU32::new(0x0012_3456),
            cpu_model: AtomicU16::new(0x2964),
            tod: AtomicU64::new(0xD1CE_BEEF_0000_0000),
            clock_us: AtomicU64::new(0),
            isc_mask: AtomicU8::new(0xFF),
            waits: AtomicUsize::new(0),
        }
    }

    pub fn cpu_addr(&self) -> u16 {
        self.cpu_addr.load(Ordering::Relaxed)
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id.load(Ordering::Relaxed)
    }

    pub fn cpu_model(&self) -> u16 {
        self.cpu_model.load(Ordering::Relaxed)
    }

    pub fn tod_clock(&self) -> u64 {
        self.tod.load(Ordering::Relaxed)
    }

    pub fn now_us(&self) -> u64 {
        self.clock_us.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_isc_mask(&self, mask: u8) -> u8 {
        self.isc_mask.swap(mask, Ordering::SeqCst)
    }

    pub fn wait_for_interrupt(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        core::hint::spin_loop();
    }
}

/// 全局 Mock 实例
pub static MOCK_CIO_OPS: MockCioOps = MockCioOps::new();

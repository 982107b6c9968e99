//! 平台操作 trait 定义和注册
//!
//! 此模块定义了通道子系统需要的处理器侧操作（CPU 标识、时钟、
//! I/O 中断子类屏蔽、等待），通过 trait 抽象实现与平台代码的解耦。

use core::sync::atomic::{AtomicUsize, Ordering};

/// 平台操作
///
/// 平台代码需要实现此 trait 并在启动时注册。
pub trait CioOps: Send + Sync {
    /// 当前 CPU 地址
    fn cpu_address(&self) -> u16;

    /// CPU 标识（低 24 位有效）
    fn cpu_id(&self) -> u32;

    /// CPU 型号
    fn cpu_model(&self) -> u16;

    /// 启动时读取的 TOD 时钟
    fn tod_clock(&self) -> u64;

    /// 单调时钟（微秒），用于同步等待的超时
    fn now_us(&self) -> u64;

    /// 设置当前 CPU 接受的 I/O 中断子类掩码，返回之前的掩码
    ///
    /// 掩码第 `7 - n` 位对应子类 `n`（见 [`crate::types::isc_bit`]）。
    fn set_isc_mask(&self, mask: u8) -> u8;

    /// 等待下一个 I/O 中断（或短暂让出处理器）
    fn wait_for_interrupt(&self);
}

static CIO_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static CIO_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册平台操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_cio_ops(ops: &'static dyn CioOps) {
    let ptr = ops as *const dyn CioOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn CioOps, (usize, usize)>(ptr) };
    CIO_OPS_VTABLE.store(vtable, Ordering::Release);
    CIO_OPS_DATA.store(data, Ordering::Release);
}

/// 获取已注册的平台操作实现
///
/// # Panics
/// 如果尚未调用 [`register_cio_ops`] 注册实现，则 panic
#[inline]
pub fn cio_ops() -> &'static dyn CioOps {
    let data = CIO_OPS_DATA.load(Ordering::Acquire);
    let vtable = CIO_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        #[cfg(test)]
        {
            extern crate test_support;
            return &test_support::mock::cio::MOCK_CIO_OPS;
        }
        #[cfg(not(test))]
        panic!("cio: CioOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn CioOps>((data, vtable)) }
}

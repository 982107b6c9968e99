//! 中断保护器
//!
//! 基于 RAII 实现中断屏蔽，在创建时禁用中断，销毁时恢复。
//!
//! 锁实现需要把“恢复中断”推迟到解锁时刻，因此保护器可以被拆成
//! 原始 flags（[`IntrGuard::into_flags`]）并在之后重新组装（[`IntrGuard::from_flags`]）。

use crate::arch_ops;

/// 中断保护器
///
/// # 示例
/// ```ignore
/// {
///     let _guard = IntrGuard::new(); // 禁用中断
///     // 临界区代码
/// } // 离开作用域，自动恢复中断状态
/// ```
#[must_use]
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 原子地禁用中断并返回一个 IntrGuard 实例。
    pub fn new() -> Self {
        // SAFETY: 保存的 flags 在 Drop 时原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 拆出保存的中断状态，不恢复中断。
    ///
    /// 调用者负责之后通过 [`IntrGuard::from_flags`] 重新组装并释放。
    pub fn into_flags(self) -> usize {
        let flags = self.flags;
        core::mem::forget(self);
        flags
    }

    /// 用 [`IntrGuard::into_flags`] 拆出的状态重建保护器。
    ///
    /// # Safety
    /// flags 必须来自同一 CPU 上尚未恢复过的 [`IntrGuard::into_flags`]
    pub unsafe fn from_flags(flags: usize) -> Self {
        IntrGuard { flags }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 是在创建 IntrGuard 时保存的
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mock::{irqs_enabled, serial};

    #[test]
    fn test_guard_disables_and_restores() {
        let _serial = serial();
        assert!(irqs_enabled());
        {
            let _g = IntrGuard::new();
            assert!(!irqs_enabled());
            {
                let _inner = IntrGuard::new();
                assert!(!irqs_enabled());
            }
            // 内层恢复的是“已禁用”状态
            assert!(!irqs_enabled());
        }
        assert!(irqs_enabled());
    }

    #[test]
    fn test_split_and_rebuild() {
        let _serial = serial();
        let flags = IntrGuard::new().into_flags();
        assert!(!irqs_enabled());
        drop(unsafe { IntrGuard::from_flags(flags) });
        assert!(irqs_enabled());
    }
}

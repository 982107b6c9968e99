//! 测试支持 crate
//!
//! 提供架构与平台操作的 Mock 实现，供各 crate 的单元测试使用

#![no_std]

pub mod mock;

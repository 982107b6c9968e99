//! 子系统级测试
//!
//! 用 [`sim::SimChannel`] 模拟硬件，平台操作使用 `test_support` 的 Mock。
//! Mock 的时钟和中断子类掩码是全局的，测试通过 [`setup`] 串行执行。

mod hotplug;
mod sim;

use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::vec::Vec;

use test_support::mock::cio::MOCK_CIO_OPS;

use crate::config::CioConfig;
use crate::css::ChannelSubsystem;
use crate::driver::{EventKind, IoEvent, IoHandler};
use crate::hotplug::DeviceNotifier;
use crate::subchannel::SubchannelView;
use crate::types::{Ccw, ChannelProgram, SubchannelId};
use sim::SimChannel;

/// 锁依赖的架构操作：宿主机上没有需要屏蔽的中断
struct TestArchOps;

impl sync::ArchOps for TestArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        0
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}
}

static TEST_ARCH_OPS: TestArchOps = TestArchOps;
static REGISTER: Once = Once::new();
static SERIAL: Mutex<()> = Mutex::new(());

/// 注册架构操作并串行化测试
pub(crate) fn setup() -> MutexGuard<'static, ()> {
    REGISTER.call_once(|| {
        // SAFETY: 只在 Once 中注册一次
        unsafe { sync::register_arch_ops(&TEST_ARCH_OPS) };
    });
    let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    MOCK_CIO_OPS.set_isc_mask(0xFF);
    guard
}

/// 测试用配置：超时很短，Mock 时钟每次读取前进 1 微秒
pub(crate) fn test_config() -> CioConfig {
    CioConfig {
        sync_timeout_us: 200,
        halt_timeout_us: 100,
        clear_timeout_us: 50,
        ..CioConfig::default()
    }
}

pub(crate) fn new_css(sim: &Arc<SimChannel>) -> ChannelSubsystem {
    ChannelSubsystem::new(sim.clone(), test_config())
}

pub(crate) fn new_css_with(sim: &Arc<SimChannel>, config: CioConfig) -> ChannelSubsystem {
    ChannelSubsystem::new(sim.clone(), config)
}

pub(crate) fn schid(n: u16) -> SubchannelId {
    SubchannelId(n)
}

/// 一个读命令组成的驱动通道程序
pub(crate) fn read_program() -> Arc<ChannelProgram> {
    ChannelProgram::single(Ccw::control(0x02))
}

/// 处理全部挂起的中断，模拟中断入口
pub(crate) fn drain_irqs(css: &ChannelSubsystem, sim: &SimChannel) {
    use crate::hw::ChannelHw;
    while let Some(info) = sim.tpi() {
        css.do_io_interrupt(info);
    }
}

/// 记录收到的全部事件
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<(SubchannelId, IoEvent)>>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<IoEvent> {
        self.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|(_, e)| e.kind).collect()
    }

    pub(crate) fn ids(&self) -> Vec<SubchannelId> {
        self.lock().iter().map(|(id, _)| *id).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubchannelId, IoEvent)>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IoHandler for Recorder {
    fn handle_event(&self, id: SubchannelId, event: &IoEvent) {
        self.lock().push((id, event.clone()));
    }
}

/// 记录新出现的设备
#[derive(Default)]
pub(crate) struct Appeared {
    views: Mutex<Vec<SubchannelView>>,
}

impl Appeared {
    pub(crate) fn ids(&self) -> Vec<SubchannelId> {
        self.views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|v| v.id)
            .collect()
    }
}

impl DeviceNotifier for Appeared {
    fn device_appeared(&self, view: &SubchannelView) {
        self.views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(view.clone());
    }
}

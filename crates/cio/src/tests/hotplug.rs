use std::sync::Arc;

use super::sim::SimChannel;
use super::{Appeared, Recorder, new_css, read_program, schid, setup};
use crate::config::NOT_OPER_CHECKS;
use crate::driver::{EventKind, RegisterFlags};
use crate::hotplug::ChangeEvent;
use crate::request::IoRequest;
use crate::subchannel::{DeviceIdentity, Presence};
use crate::types::{Chpid, DevNo};

#[test]
fn test_owned_device_gone() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    css.scan();
    let rec = Recorder::new();
    css.register(schid(0), rec.clone(), RegisterFlags::NO_PATH_VERIFY).unwrap();
    css.start(schid(0), IoRequest::new(read_program(), 8)).unwrap();

    sim.with(0, |d| d.present = false);
    let probes = sim.with(0, |d| d.stsch_count);
    css.on_change_notification(ChangeEvent::Subchannel(schid(0)));

    assert_eq!(sim.with(0, |d| d.stsch_count) - probes, NOT_OPER_CHECKS);
    assert_eq!(rec.kinds(), [EventKind::DeviceGone]);
    assert_eq!(rec.events()[0].intparm, 8);
    let view = css.lookup(schid(0)).unwrap();
    assert_eq!(view.presence, Presence::NotOperational);
    assert!(!view.owned);

    // 再次通知不会重复回调
    css.on_change_notification(ChangeEvent::Subchannel(schid(0)));
    assert_eq!(rec.events().len(), 1);
}

#[test]
fn test_transient_pathless_probe_keeps_device() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    css.scan();
    let rec = Recorder::new();
    css.register(schid(0), rec.clone(), RegisterFlags::NO_PATH_VERIFY).unwrap();

    sim.with(0, |d| d.pathless_stsch = 1);
    let probes = sim.with(0, |d| d.stsch_count);
    css.on_change_notification(ChangeEvent::Subchannel(schid(0)));

    // 第二次探测恢复，第一次的结果不提交
    assert_eq!(sim.with(0, |d| d.stsch_count) - probes, 2);
    assert!(rec.events().is_empty());
    let view = css.lookup(schid(0)).unwrap();
    assert_eq!(view.presence, Presence::Operational);
    assert_eq!(view.opm, 0x80);
    assert!(view.owned);
    assert!(css.start(schid(0), IoRequest::new(read_program(), 1)).is_ok());
}

#[test]
fn test_unowned_device_gone() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    css.scan();

    sim.with(0, |d| d.present = false);
    css.on_change_notification(ChangeEvent::Subchannel(schid(0)));
    assert_eq!(css.lookup(schid(0)).unwrap().presence, Presence::NotOperational);
    assert_eq!(css.first(), Some(schid(0)));
}

#[test]
fn test_new_device_appears() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    let appeared = Arc::new(Appeared::default());
    css.set_device_notifier(appeared.clone());
    assert_eq!(css.scan(), 1);

    sim.add_device(1, 0x101, 0x80);
    css.on_change_notification(ChangeEvent::Subchannel(schid(1)));
    assert_eq!(appeared.ids(), [schid(1)]);
    let view = css.lookup(schid(1)).unwrap();
    assert_eq!(view.presence, Presence::Operational);
    assert!(matches!(view.identity, DeviceIdentity::Known(_)));
}

#[test]
fn test_config_alert_finds_new_devices() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    let appeared = Arc::new(Appeared::default());
    css.set_device_notifier(appeared.clone());
    css.scan();

    sim.add_device(1, 0x101, 0x80);
    sim.add_device(2, 0x102, 0x80);
    css.on_change_notification(ChangeEvent::ConfigAlert);
    assert_eq!(appeared.ids(), [schid(1), schid(2)]);
}

#[test]
fn test_channel_path_event_revalidates_users() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0xC0);
    sim.add_device(1, 0x101, 0x80);
    sim.with(1, |d| d.schib.pmcw.chpid[0] = 0x30);
    let css = new_css(&sim);
    css.scan();

    sim.with(0, |d| d.schib.pmcw.pam = 0x40);
    let probes = sim.with(1, |d| d.stsch_count);
    css.on_change_notification(ChangeEvent::ChannelPath(Chpid(0x10)));
    let view = css.lookup(schid(0)).unwrap();
    assert_eq!(view.opm, 0x40);
    assert_eq!(view.presence, Presence::Operational);
    // 不经过该路径的子通道不受影响
    assert_eq!(sim.with(1, |d| d.stsch_count), probes);

    sim.with(0, |d| d.schib.pmcw.pam = 0);
    css.on_change_notification(ChangeEvent::ChannelPath(Chpid(0x11)));
    assert_eq!(css.lookup(schid(0)).unwrap().presence, Presence::NotOperational);
}

#[test]
fn test_device_number_change_asks_driver_to_revalidate() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    css.scan();
    let rec = Recorder::new();
    css.register(schid(0), rec.clone(), RegisterFlags::NO_PATH_VERIFY).unwrap();

    sim.with(0, |d| d.schib.pmcw.dev = DevNo(0x200));
    css.on_change_notification(ChangeEvent::Subchannel(schid(0)));
    assert_eq!(rec.kinds(), [EventKind::Revalidate]);
    assert_eq!(css.lookup_devno(DevNo(0x200)), Some(schid(0)));
    assert!(css.lookup(schid(0)).unwrap().owned);
}

#[test]
fn test_owned_device_regains_paths() {
    let _g = setup();
    let sim = SimChannel::new();
    sim.add_device(0, 0x100, 0x80);
    let css = new_css(&sim);
    css.scan();
    let rec = Recorder::new();
    css.register(schid(0), rec.clone(), RegisterFlags::NO_PATH_VERIFY).unwrap();

    sim.with(0, |d| d.failing_paths = 0x80);
    assert!(css.start(schid(0), IoRequest::new(read_program(), 1)).is_err());
    assert_eq!(css.lookup(schid(0)).unwrap().presence, Presence::NotOperational);

    sim.with(0, |d| {
        d.failing_paths = 0;
        d.schib.pmcw.pom = 0x80;
    });
    css.on_change_notification(ChangeEvent::Subchannel(schid(0)));
    assert_eq!(rec.kinds(), [EventKind::Revalidate]);
    let view = css.lookup(schid(0)).unwrap();
    assert_eq!(view.presence, Presence::Operational);
    assert!(view.owned);
}

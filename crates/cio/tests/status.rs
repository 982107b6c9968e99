use cio::types::{
    ChannelStatus, DeviceStatus, Esw, ExtendedReport, FunctionControl, Irb, Scsw, StatusControl,
};
use cio::{CiwType, DevNo, DevStat, DevStatFlags, Pgid, SenseIdData};

fn irb(stctl: StatusControl, dstat: DeviceStatus) -> Irb {
    Irb {
        scsw: Scsw {
            fctl: FunctionControl::START,
            stctl,
            dstat,
            ..Scsw::default()
        },
        ..Irb::default()
    }
}

#[test]
fn test_sense_id_basic() {
    let data = SenseIdData::parse(&[0xFF, 0x38, 0x80, 0x01, 0x33, 0x90, 0x0A, 0x00]).unwrap();
    assert_eq!(data.cu_type, 0x3880);
    assert_eq!(data.cu_model, 0x01);
    assert_eq!(data.dev_type, 0x3390);
    assert_eq!(data.dev_model, 0x0A);
    assert!(!data.extended());
}

#[test]
fn test_sense_id_with_ciws() {
    let raw = [
        0xFF, 0x39, 0x90, 0xE9, 0x33, 0x90, 0x0C, 0x00, // 基本部分
        0x40, 0xFA, 0x00, 0x40, // 读配置数据
        0x42, 0xC4, 0x00, 0x80, // 读节点描述符
        0x00, 0x00, 0x00, 0x00, // 结束
        0x41, 0xAF, 0x00, 0x0C,
    ];
    let data = SenseIdData::parse(&raw).unwrap();
    assert!(data.extended());
    assert_eq!(data.ciws.len(), 2);
    let rnd = data.ciw(CiwType::ReadNodeDescriptor).unwrap();
    assert_eq!((rnd.command, rnd.count), (0xC4, 0x80));
    assert!(data.ciw(CiwType::SetInterfaceId).is_none());
}

#[test]
fn test_sense_id_rejects_bad_reply() {
    assert!(SenseIdData::parse(&[0x00, 0x39, 0x90, 0xE9, 0x33, 0x90, 0x0C]).is_none());
    assert!(SenseIdData::parse(&[0xFF, 0x39, 0x90]).is_none());
}

#[test]
fn test_pgid_layout() {
    let pgid = Pgid::new(0x0102, 0xAA03_0405, 0x0607, 0x0809_0A0B_FFFF_FFFF);
    assert_eq!(pgid.cpu_id, 0x03_0405);
    let bytes = pgid.to_bytes();
    assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]);
    assert_eq!(Pgid::from_bytes(&bytes), pgid);
}

#[test]
fn test_devstat_accumulates() {
    let mut st = DevStat::new(DevNo(0x100));
    let mut first = irb(StatusControl::PRIMARY | StatusControl::PENDING, DeviceStatus::CHANNEL_END);
    first.esw = Esw { lpum: 0x40, ..Esw::default() };
    first.scsw.count = 10;
    st.accumulate(&first);
    let mut second = irb(StatusControl::SECONDARY | StatusControl::PENDING, DeviceStatus::DEVICE_END);
    second.scsw.cstat = ChannelStatus::INCORRECT_LENGTH;
    second.scsw.count = 4;
    st.accumulate(&second);

    assert_eq!(st.dstat, DeviceStatus::CHANNEL_END | DeviceStatus::DEVICE_END);
    assert_eq!(st.cstat, ChannelStatus::INCORRECT_LENGTH);
    assert_eq!(st.rescnt, 4);
    assert_eq!(st.lpum, 0x40);
    assert!(st.flags.contains(DevStatFlags::PRIMARY_STATUS | DevStatFlags::START_FUNCTION));
    assert!(!st.is_final());

    st.reset();
    assert_eq!(st, DevStat::new(DevNo(0x100)));
}

#[test]
fn test_devstat_concurrent_sense() {
    let mut st = DevStat::new(DevNo(0x100));
    let mut uc = irb(
        StatusControl::PRIMARY | StatusControl::SECONDARY | StatusControl::PENDING,
        DeviceStatus::CHANNEL_END | DeviceStatus::DEVICE_END | DeviceStatus::UNIT_CHECK,
    );
    uc.esw.erw = ExtendedReport::CONCURRENT_SENSE;
    uc.esw.scnt = 3;
    uc.ecw[..3].copy_from_slice(&[0x80, 0x01, 0x02]);
    st.accumulate(&uc);

    assert!(st.flags.contains(DevStatFlags::SENSE_AVAILABLE));
    assert_eq!(st.sense(), &[0x80, 0x01, 0x02]);
}

#[test]
fn test_devstat_sense_is_clamped() {
    let mut st = DevStat::default();
    st.set_sense(&[0xEE; 40]);
    assert_eq!(st.sense().len(), 32);
    assert_eq!(st.scnt, 32);
}

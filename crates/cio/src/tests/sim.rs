//! 模拟的通道子系统
//!
//! 内部命令（Sense-ID、基本检测、路径组、读配置数据）立即按设备配置应答；
//! 驱动的通道程序默认保持活动，由测试用 [`SimChannel::push_irb`] 送入状态。

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec;
use std::vec::Vec;

use crate::hw::{ChannelHw, TestResult};
use crate::interrupt::IrqInfo;
use crate::path_group::SPID_MULTI_PATH;
use crate::types::{
    ActivityControl, ChannelStatus, CondCode, DevNo, DeviceStatus, FunctionControl, Irb, Orb,
    SENSE_MAX, Schib, StatusControl, SubchannelId, ccw_cmd, sense0,
};

/// 一个模拟设备
pub(crate) struct SimDevice {
    pub schib: Schib,
    /// `false` 时 store-subchannel 返回 cc3
    pub present: bool,
    /// `true` 时 I/O 指令和 test-subchannel 返回 cc3
    pub not_oper: bool,
    pub pending: VecDeque<Irb>,
    /// 接下来若干次 start 返回 cc2
    pub busy_ssch: usize,
    /// 接下来若干次 start 返回 cc1（同时挂起一个主动状态）
    pub pending_ssch: usize,
    /// 这些路径上的 start 返回 cc3
    pub failing_paths: u8,
    /// 驱动的通道程序立即完成
    pub auto_complete: bool,
    /// halt 被接受但不产生状态
    pub ignore_halt: bool,
    /// clear 被接受但不产生状态
    pub ignore_clear: bool,
    pub started: Vec<Orb>,
    pub halts: usize,
    pub clears: usize,
    pub stsch_count: usize,
    /// 接下来若干次 store-subchannel 报告没有可用路径
    pub pathless_stsch: usize,
    /// Sense-ID 应答
    pub sense_id: Vec<u8>,
    /// Sense-ID 以命令拒绝结束
    pub sense_id_reject: bool,
    /// 基本检测返回的数据
    pub sense_bytes: Vec<u8>,
    /// 基本检测本身以单元检查结束
    pub sense_fails: bool,
    /// 下一次基本检测返回的数据（优先于 `sense_bytes`）
    next_sense: Option<Vec<u8>>,
    pub spid_reject_multi: bool,
    pub spid_reject_single: bool,
    /// 最近一次被接受的 set-PGID 数据
    pub spid_data: Option<Vec<u8>>,
    pub snid_state: u8,
    pub rcd: Vec<u8>,
}

impl SimDevice {
    fn new(devno: u16, pim: u8) -> Self {
        let mut schib = Schib::default();
        schib.pmcw.dnv = true;
        schib.pmcw.dev = DevNo(devno);
        schib.pmcw.pim = pim;
        schib.pmcw.pam = pim;
        schib.pmcw.pom = pim;
        for i in 0..8 {
            schib.pmcw.chpid[i] = 0x10 + i as u8;
        }
        Self {
            schib,
            present: true,
            not_oper: false,
            pending: VecDeque::new(),
            busy_ssch: 0,
            pending_ssch: 0,
            failing_paths: 0,
            auto_complete: false,
            ignore_halt: false,
            ignore_clear: false,
            started: Vec::new(),
            halts: 0,
            clears: 0,
            stsch_count: 0,
            pathless_stsch: 0,
            sense_id: vec![0xFF, 0x39, 0x90, 0xE9, 0x33, 0x90, 0x0C, 0x00],
            sense_id_reject: false,
            sense_bytes: vec![0; SENSE_MAX],
            sense_fails: false,
            next_sense: None,
            spid_reject_multi: false,
            spid_reject_single: false,
            spid_data: None,
            snid_state: 0,
            rcd: Vec::new(),
        }
    }
}

#[derive(Default)]
struct SimState {
    devices: BTreeMap<u16, SimDevice>,
    irqs: VecDeque<u16>,
}

/// 模拟硬件
#[derive(Default)]
pub(crate) struct SimChannel {
    state: Mutex<SimState>,
}

/// 构造一个中断响应块
pub(crate) fn irb(fctl: FunctionControl, stctl: StatusControl, dstat: DeviceStatus) -> Irb {
    let mut irb = Irb::default();
    irb.scsw.fctl = fctl;
    irb.scsw.stctl = stctl;
    irb.scsw.dstat = dstat;
    irb
}

/// 正常结束：通道结束 + 设备结束
pub(crate) fn done() -> Irb {
    irb(
        FunctionControl::START,
        StatusControl::PRIMARY | StatusControl::SECONDARY | StatusControl::PENDING,
        DeviceStatus::CHANNEL_END | DeviceStatus::DEVICE_END,
    )
}

/// 以单元检查结束
pub(crate) fn unit_check() -> Irb {
    irb(
        FunctionControl::START,
        StatusControl::PRIMARY | StatusControl::SECONDARY | StatusControl::ALERT | StatusControl::PENDING,
        DeviceStatus::CHANNEL_END | DeviceStatus::DEVICE_END | DeviceStatus::UNIT_CHECK,
    )
}

fn first_path(lpm: u8) -> u8 {
    lpm & lpm.wrapping_neg()
}

impl SimChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 在子通道 `id` 上加入设备，全部 `pim` 路径可用
    pub(crate) fn add_device(&self, id: u16, devno: u16, pim: u8) {
        self.lock().devices.insert(id, SimDevice::new(devno, pim));
    }

    /// 修改设备配置
    pub(crate) fn with<R>(&self, id: u16, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        let mut st = self.lock();
        let dev = st.devices.get_mut(&id).expect("no such sim device");
        f(dev)
    }

    /// 送入一个状态并挂起中断
    pub(crate) fn push_irb(&self, id: u16, irb: Irb) {
        let mut st = self.lock();
        st.devices
            .get_mut(&id)
            .expect("no such sim device")
            .pending
            .push_back(irb);
        st.irqs.push_back(id);
    }

    /// 设备上执行过的命令码（每次 start 的第一个 CCW）
    pub(crate) fn commands(&self, id: u16) -> Vec<u8> {
        self.with(id, |d| {
            d.started
                .iter()
                .filter_map(|orb| orb.program.first_cmd())
                .collect()
        })
    }

    /// 驱动通道程序被启动的次数（排除内部命令）
    pub(crate) fn driver_starts(&self, id: u16) -> usize {
        self.commands(id)
            .into_iter()
            .filter(|c| {
                !matches!(
                    *c,
                    ccw_cmd::SENSE_ID | ccw_cmd::SENSE | ccw_cmd::SET_PGID | ccw_cmd::SENSE_PGID
                )
            })
            .count()
    }

    pub(crate) fn schib(&self, id: u16) -> Schib {
        self.with(id, |d| d.schib)
    }

    fn complete(st: &mut SimState, id: u16, mut irb: Irb, lpm: u8) {
        irb.esw.lpum = first_path(lpm);
        if let Some(dev) = st.devices.get_mut(&id) {
            dev.pending.push_back(irb);
            st.irqs.push_back(id);
        }
    }

    fn reject(dev: &mut SimDevice) -> Irb {
        let mut sense = vec![0u8; SENSE_MAX];
        sense[0] = sense0::CMD_REJECT;
        dev.next_sense = Some(sense);
        unit_check()
    }

    /// 把数据写入第一个 CCW 的数据区，返回剩余字节数
    fn transfer(orb: &Orb, data: &[u8]) -> u16 {
        let Some(ccw) = orb.program.ccws().first() else {
            return 0;
        };
        match &ccw.data {
            Some(buf) => (buf.len() - buf.write_at(0, data)) as u16,
            None => 0,
        }
    }

    fn respond(dev: &mut SimDevice, orb: &Orb) -> Option<Irb> {
        let cmd = orb.program.first_cmd()?;
        let mut status = done();
        match cmd {
            ccw_cmd::SENSE_ID => {
                if dev.sense_id_reject {
                    return Some(Self::reject(dev));
                }
                status.scsw.count = Self::transfer(orb, &dev.sense_id);
            }
            ccw_cmd::SENSE => {
                if dev.sense_fails {
                    return Some(unit_check());
                }
                let data = dev.next_sense.take().unwrap_or_else(|| dev.sense_bytes.clone());
                status.scsw.count = Self::transfer(orb, &data);
            }
            ccw_cmd::SET_PGID => {
                let data = orb.program.ccws()[0]
                    .data
                    .as_ref()
                    .map(|b| b.to_vec())
                    .unwrap_or_default();
                let multi = data.first().is_some_and(|f| f & SPID_MULTI_PATH != 0);
                if (multi && dev.spid_reject_multi) || (!multi && dev.spid_reject_single) {
                    return Some(Self::reject(dev));
                }
                dev.spid_data = Some(data);
            }
            ccw_cmd::SENSE_PGID => {
                let mut data = vec![dev.snid_state];
                data.extend_from_slice(&[0x00, 0x02, 0x99, 0x88, 0x77, 0x29, 0x64, 0, 0, 0, 1]);
                status.scsw.count = Self::transfer(orb, &data);
            }
            ccw_cmd::READ_CONF_DATA => {
                status.scsw.count = Self::transfer(orb, &dev.rcd);
            }
            _ if dev.auto_complete => {}
            _ => return None,
        }
        Some(status)
    }
}

impl ChannelHw for SimChannel {
    fn stsch(&self, schid: SubchannelId) -> Result<Schib, CondCode> {
        let mut st = self.lock();
        match st.devices.get_mut(&schid.0) {
            Some(dev) if dev.present => {
                dev.stsch_count += 1;
                let mut schib = dev.schib;
                if dev.pathless_stsch > 0 {
                    dev.pathless_stsch -= 1;
                    schib.pmcw.pam = 0;
                }
                Ok(schib)
            }
            Some(dev) => {
                dev.stsch_count += 1;
                Err(CondCode::NotOperational)
            }
            None => Err(CondCode::NotOperational),
        }
    }

    fn msch(&self, schid: SubchannelId, schib: &Schib) -> CondCode {
        let mut st = self.lock();
        let Some(dev) = st.devices.get_mut(&schid.0).filter(|d| d.present) else {
            return CondCode::NotOperational;
        };
        let pmcw = &mut dev.schib.pmcw;
        pmcw.intparm = schib.pmcw.intparm;
        pmcw.isc = schib.pmcw.isc;
        pmcw.enabled = schib.pmcw.enabled;
        pmcw.multipath = schib.pmcw.multipath;
        CondCode::Ok
    }

    fn ssch(&self, schid: SubchannelId, orb: &Orb) -> CondCode {
        let mut st = self.lock();
        let Some(dev) = st.devices.get_mut(&schid.0).filter(|d| d.present && !d.not_oper) else {
            return CondCode::NotOperational;
        };
        if !dev.pending.is_empty() {
            return CondCode::StatusPending;
        }
        if dev.busy_ssch > 0 {
            dev.busy_ssch -= 1;
            return CondCode::Busy;
        }
        if dev.pending_ssch > 0 {
            dev.pending_ssch -= 1;
            dev.pending.push_back(irb(
                FunctionControl::empty(),
                StatusControl::ALERT | StatusControl::PENDING,
                DeviceStatus::ATTENTION,
            ));
            return CondCode::StatusPending;
        }
        let lpm = orb.lpm & !dev.failing_paths;
        if lpm == 0 {
            dev.schib.pmcw.pom &= !dev.failing_paths;
            return CondCode::NotOperational;
        }
        dev.started.push(orb.clone());
        if let Some(status) = Self::respond(dev, orb) {
            Self::complete(&mut st, schid.0, status, lpm);
        }
        CondCode::Ok
    }

    fn rsch(&self, schid: SubchannelId) -> CondCode {
        let mut st = self.lock();
        match st.devices.get_mut(&schid.0) {
            Some(dev) if dev.present && !dev.not_oper => CondCode::Ok,
            _ => CondCode::NotOperational,
        }
    }

    fn hsch(&self, schid: SubchannelId) -> CondCode {
        let mut st = self.lock();
        let Some(dev) = st.devices.get_mut(&schid.0).filter(|d| d.present && !d.not_oper) else {
            return CondCode::NotOperational;
        };
        if !dev.pending.is_empty() {
            return CondCode::StatusPending;
        }
        dev.halts += 1;
        if !dev.ignore_halt {
            let status = irb(FunctionControl::HALT, StatusControl::PENDING, DeviceStatus::empty());
            Self::complete(&mut st, schid.0, status, 0);
        }
        CondCode::Ok
    }

    fn csch(&self, schid: SubchannelId) -> CondCode {
        let mut st = self.lock();
        let Some(dev) = st.devices.get_mut(&schid.0).filter(|d| d.present && !d.not_oper) else {
            return CondCode::NotOperational;
        };
        dev.clears += 1;
        dev.pending.clear();
        if !dev.ignore_clear {
            let status = irb(FunctionControl::CLEAR, StatusControl::PENDING, DeviceStatus::empty());
            Self::complete(&mut st, schid.0, status, 0);
        }
        CondCode::Ok
    }

    fn tsch(&self, schid: SubchannelId) -> TestResult {
        let mut st = self.lock();
        match st.devices.get_mut(&schid.0) {
            Some(dev) if dev.present && !dev.not_oper => match dev.pending.pop_front() {
                Some(irb) => TestResult::Status(irb),
                None => TestResult::NoStatus,
            },
            Some(_) => TestResult::NotOperational,
            None => TestResult::NoStatus,
        }
    }

    fn tpi(&self) -> Option<IrqInfo> {
        let mut st = self.lock();
        while let Some(id) = st.irqs.pop_front() {
            let pending = st
                .devices
                .get(&id)
                .is_some_and(|d| !d.pending.is_empty());
            if pending {
                return Some(IrqInfo::io(SubchannelId(id)));
            }
        }
        None
    }
}

/// 带挂起标志的中间状态
pub(crate) fn intermediate(dstat: DeviceStatus, cstat: ChannelStatus) -> Irb {
    let mut i = irb(
        FunctionControl::START,
        StatusControl::INTERMEDIATE | StatusControl::PENDING,
        dstat,
    );
    i.scsw.cstat = cstat;
    i
}

/// 通道程序挂起
pub(crate) fn suspended() -> Irb {
    let mut i = irb(
        FunctionControl::START,
        StatusControl::INTERMEDIATE | StatusControl::PENDING,
        DeviceStatus::empty(),
    );
    i.scsw.actl = ActivityControl::SUSPENDED;
    i
}

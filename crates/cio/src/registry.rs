//! 子通道表
//!
//! 按子通道号排序的稀疏表。记录只增不删：设备消失后记录被标记为
//! [`Presence::Invalid`] 或 [`Presence::NotOperational`]，并在热插拔时重新验证。

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::{RwLock, SpinLock};

use crate::blacklist::{AdminCommand, format_ranges};
use crate::config::{IO_ISC, NOT_OPER_CHECKS};
use crate::css::ChannelSubsystem;
use crate::error::{CioError, CioResult};
use crate::interrupt::Notes;
use crate::subchannel::{Presence, Subchannel, SubchannelView};
use crate::types::{CondCode, DevNo, Schib, SubchannelId};

/// 子通道号到记录的映射
pub(crate) struct Registry {
    table: RwLock<BTreeMap<SubchannelId, Arc<SpinLock<Subchannel>>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            table: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn get(&self, id: SubchannelId) -> Option<Arc<SpinLock<Subchannel>>> {
        self.table.read().get(&id).cloned()
    }

    /// 插入新记录；已存在时返回已有记录
    pub(crate) fn get_or_insert(&self, sch: Subchannel) -> Arc<SpinLock<Subchannel>> {
        self.table
            .write()
            .entry(sch.id)
            .or_insert_with(|| Arc::new(SpinLock::new(sch)))
            .clone()
    }

    pub(crate) fn entries(&self) -> Vec<(SubchannelId, Arc<SpinLock<Subchannel>>)> {
        self.table
            .read()
            .iter()
            .map(|(id, sch)| (*id, sch.clone()))
            .collect()
    }

    pub(crate) fn highest(&self) -> Option<SubchannelId> {
        self.table.read().keys().next_back().copied()
    }
}

/// 探测结果是否表明设备可以访问（无效的子通道不需要重复探测）
fn accessible(probe: &Result<Schib, CondCode>) -> bool {
    match probe {
        Ok(schib) => !schib.pmcw.dnv || schib.pmcw.usable_mask() != 0,
        Err(_) => false,
    }
}

impl ChannelSubsystem {
    pub(crate) fn subchannel(&self, id: SubchannelId) -> CioResult<Arc<SpinLock<Subchannel>>> {
        self.registry.get(id).ok_or(CioError::NoDevice)
    }

    /// 发现一个子通道
    ///
    /// 读取子通道信息块，创建或刷新记录，并为其设置中断子类和中断参数。
    pub fn discover(&self, id: SubchannelId) -> CioResult<SubchannelView> {
        self.apply_probe(id, self.hw.stsch(id))
    }

    /// 把一次 store-subchannel 的结果提交到记录
    fn apply_probe(
        &self,
        id: SubchannelId,
        probe: Result<Schib, CondCode>,
    ) -> CioResult<SubchannelView> {
        let schib = probe.map_err(|_| CioError::NotPresent)?;
        let known = self.registry.get(id);

        if !schib.pmcw.dnv {
            if let Some(sch) = known {
                let mut s = sch.lock();
                s.schib = schib;
                s.opm = 0;
                s.presence = Presence::Invalid;
            }
            return Err(CioError::NoDevice);
        }

        let devno = schib.pmcw.dev;
        if self.blacklist.read().contains(devno) {
            match &known {
                None => {
                    self.msg(format_args!("cio: {} device {} ignored", id, devno));
                    return Err(CioError::DeviceIgnored);
                }
                Some(sch) => {
                    let mut s = sch.lock();
                    if !s.is_owned() {
                        s.refresh(schib);
                        s.presence = Presence::Ignored;
                        return Err(CioError::DeviceIgnored);
                    }
                }
            }
        }

        let sch = match known {
            Some(sch) => sch,
            None => self.registry.get_or_insert(Subchannel::new(id, schib)),
        };
        let mut notes = Notes::new();
        let view = {
            let mut s = sch.lock();
            self.apply_schib(&mut s, schib, &mut notes);
            s.view()
        };
        self.dispatch(notes);

        self.msg(format_args!(
            "cio: {} devno {} pim {:02x} pam {:02x} pom {:02x} opm {:02x}",
            id, view.devno, view.pim, view.pam, view.pom, view.opm
        ));
        Ok(view)
    }

    fn apply_schib(&self, s: &mut Subchannel, schib: Schib, notes: &mut Notes) {
        s.refresh(schib);
        if s.opm != 0 {
            s.presence = Presence::Operational;
        } else {
            if s.presence == Presence::Operational {
                self.notoper(s.id);
            }
            s.presence = Presence::NotOperational;
        }

        // 同步 I/O 期间中断子类由同步锁管理
        if self.sync_lock.owner() == Some(s.id) {
            return;
        }
        let intparm = s.id.0 as u32;
        if schib.pmcw.isc != IO_ISC || schib.pmcw.intparm != intparm {
            let res = self.modify(
                s,
                |pmcw| {
                    pmcw.isc = IO_ISC;
                    pmcw.intparm = intparm;
                },
                notes,
            );
            if let Err(e) = res {
                log::warn!("cio: {} failed to set interruption subclass: {}", s.id, e);
            }
        }
    }

    /// 初始枚举：从 0 号开始向上探测，直到第一个不存在的子通道
    ///
    /// 返回有效子通道的数量。可操作的设备会立即被识别并建立路径组。
    pub fn scan(&self) -> usize {
        let mut found = 0;
        let mut id = 0u16;
        loop {
            match self.discover(SubchannelId(id)) {
                Ok(view) => {
                    found += 1;
                    if view.presence == Presence::Operational {
                        self.recognize(view.id);
                    }
                }
                Err(CioError::NotPresent) => break,
                Err(_) => {}
            }
            if id == u16::MAX {
                break;
            }
            id += 1;
        }
        found
    }

    /// 重新验证一个子通道
    ///
    /// 设备不可访问时连续探测 [`NOT_OPER_CHECKS`] 次才判定为不可操作；
    /// 中间的探测结果不提交，记录保持原状。
    /// 已绑定且仍可操作的设备保持绑定不变。
    pub fn revalidate(&self, id: SubchannelId) -> CioResult<SubchannelView> {
        let mut probe = self.hw.stsch(id);
        for _ in 1..NOT_OPER_CHECKS {
            if accessible(&probe) {
                break;
            }
            probe = self.hw.stsch(id);
        }
        let last = self.apply_probe(id, probe);
        if let (Err(CioError::NotPresent), Some(sch)) = (&last, self.registry.get(id)) {
            let mut s = sch.lock();
            if s.presence == Presence::Operational {
                self.notoper(id);
            }
            if s.presence.is_valid() {
                s.presence = Presence::NotOperational;
                s.opm = 0;
            }
        }
        last
    }

    /// 重新验证全部子通道，并探测新出现的子通道
    ///
    /// 已知记录逐一按热插拔规则处理；未知的子通道号一直探测到
    /// 最高已知号之后的第一个空位。
    pub fn revalidate_all(&self) {
        let highest = self.registry.highest().map_or(0, |h| h.0);
        let mut id = 0u16;
        loop {
            let schid = SubchannelId(id);
            if self.registry.get(schid).is_some() {
                self.subchannel_event(schid);
            } else {
                match self.discover(schid) {
                    Ok(view) if view.presence == Presence::Operational => self.device_appeared(schid),
                    Err(CioError::NotPresent) if id >= highest => break,
                    _ => {}
                }
            }
            if id == u16::MAX {
                break;
            }
            id += 1;
        }
    }

    fn valid_ids(&self) -> Vec<SubchannelId> {
        self.registry
            .entries()
            .into_iter()
            .filter(|(_, sch)| sch.lock().presence.is_valid())
            .map(|(id, _)| id)
            .collect()
    }

    /// 第一个有效子通道
    pub fn first(&self) -> Option<SubchannelId> {
        self.valid_ids().first().copied()
    }

    /// `id` 之后的下一个有效子通道
    pub fn next(&self, id: SubchannelId) -> Option<SubchannelId> {
        self.valid_ids().into_iter().find(|i| *i > id)
    }

    /// 按子通道号查找有效子通道
    pub fn lookup(&self, id: SubchannelId) -> Option<SubchannelView> {
        let sch = self.registry.get(id)?;
        let s = sch.lock();
        s.presence.is_valid().then(|| s.view())
    }

    /// 按设备号查找有效子通道
    pub fn lookup_devno(&self, devno: DevNo) -> Option<SubchannelId> {
        self.registry.entries().into_iter().find_map(|(id, sch)| {
            let s = sch.lock();
            (s.presence.is_valid() && s.devno == devno).then_some(id)
        })
    }

    /// 子通道的完整信息（包括无效和被忽略的记录）
    pub fn dev_info(&self, id: SubchannelId) -> CioResult<SubchannelView> {
        Ok(self.subchannel(id)?.lock().view())
    }

    /// 把 `[from, to]` 加入黑名单
    ///
    /// 区间内有已绑定驱动的设备时返回 [`CioError::Busy`]；
    /// 未绑定的有效设备被标记为 [`Presence::Ignored`]。
    ///
    /// 整个过程持有黑名单写锁，[`register`](Self::register) 持有读锁检查设备号，
    /// 两者不会交错。锁顺序总是先黑名单、后子通道。
    pub fn blacklist_add(&self, from: DevNo, to: DevNo) -> CioResult<()> {
        if from > to {
            return Err(CioError::InvalidArgument);
        }
        let mut blacklist = self.blacklist.write();
        let in_range: Vec<_> = self
            .registry
            .entries()
            .into_iter()
            .filter(|(_, sch)| {
                let s = sch.lock();
                s.presence.is_valid() && s.devno >= from && s.devno <= to
            })
            .collect();
        if let Some((id, _)) = in_range.iter().find(|(_, sch)| sch.lock().is_owned()) {
            log::warn!("cio: cannot ignore {}, device is in use", id);
            return Err(CioError::Busy);
        }
        blacklist.add(from, to);
        for (id, sch) in in_range {
            let mut s = sch.lock();
            if !s.is_owned() {
                s.presence = Presence::Ignored;
                self.msg(format_args!("cio: {} device {} ignored", id, s.devno));
            }
        }
        Ok(())
    }

    /// 从黑名单中移除 `[from, to]`
    pub fn blacklist_remove(&self, from: DevNo, to: DevNo) -> CioResult<()> {
        if from > to {
            return Err(CioError::InvalidArgument);
        }
        self.blacklist.write().remove(from, to);
        Ok(())
    }

    /// 清空黑名单
    pub fn blacklist_free_all(&self) {
        self.blacklist.write().clear();
    }

    /// 设备号是否在黑名单中
    pub fn blacklist_query(&self, devno: DevNo) -> bool {
        self.blacklist.read().contains(devno)
    }

    /// 黑名单中的全部区间
    pub fn blacklist_ranges(&self) -> Vec<(DevNo, DevNo)> {
        self.blacklist.read().ranges().collect()
    }

    /// 管理接口读出的黑名单文本
    pub fn blacklist_format(&self) -> String {
        format_ranges(&self.blacklist.read())
    }

    /// 执行一条管理命令
    ///
    /// `free` 之后立即重新验证全部子通道，使解除忽略的设备被发现。
    pub fn blacklist_command(&self, line: &str) -> CioResult<()> {
        match AdminCommand::parse(line)? {
            AdminCommand::Add(ranges) => {
                for (from, to) in ranges {
                    self.blacklist_add(from, to)?;
                }
            }
            AdminCommand::Free(ranges) => {
                for (from, to) in ranges {
                    self.blacklist_remove(from, to)?;
                }
                self.revalidate_all();
            }
            AdminCommand::FreeAll => {
                self.blacklist_free_all();
                self.revalidate_all();
            }
        }
        Ok(())
    }
}

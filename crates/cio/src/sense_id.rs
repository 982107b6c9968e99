//! 设备识别（Sense-ID）
//!
//! Sense-ID 的应答格式：
//!
//! ```text
//! 字节 0      0xFF
//! 字节 1..3   控制单元类型（2 字节）、控制单元型号
//! 字节 4..6   设备类型（2 字节）、设备型号
//! 字节 7      保留
//! 字节 8..    命令信息字（CIW），每个 4 字节
//! ```
//!
//! 带有 CIW 的应答称为扩展 Sense-ID，CIW 描述了设备支持的
//! 附加命令（例如读配置数据）的命令码和字节数。

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::{INTERNAL_INTPARM, MAX_RETRIES};
use crate::css::ChannelSubsystem;
use crate::devstat::{DevStat, DevStatFlags};
use crate::error::{CioError, CioResult};
use crate::request::{IoFlags, IoRequest, StartOutcome};
use crate::retry::retry;
use crate::subchannel::DeviceIdentity;
use crate::types::{
    Ccw, CcwFlags, ChannelProgram, ChannelStatus, DeviceStatus, IoBuffer, SubchannelId, ccw_cmd,
    paths, sense0,
};

/// Sense-ID 缓冲区长度（基本部分 8 字节 + 8 个 CIW）
pub const SENSE_ID_LEN: usize = 40;

const CIW_OFFSET: usize = 8;
const CIW_LEN: usize = 4;
const CIW_VALID: u8 = 0x40;

/// CIW 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiwType {
    /// 读配置数据
    ReadConfigurationData,
    /// 设置接口标识
    SetInterfaceId,
    /// 读节点描述符
    ReadNodeDescriptor,
    /// 其它类型
    Other(u8),
}

impl CiwType {
    fn from_raw(v: u8) -> Self {
        match v {
            0 => CiwType::ReadConfigurationData,
            1 => CiwType::SetInterfaceId,
            2 => CiwType::ReadNodeDescriptor,
            other => CiwType::Other(other),
        }
    }
}

/// 命令信息字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciw {
    /// 类型
    pub kind: CiwType,
    /// 命令码
    pub command: u8,
    /// 字节数
    pub count: u16,
}

/// Sense-ID 的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseIdData {
    /// 控制单元类型
    pub cu_type: u16,
    /// 控制单元型号
    pub cu_model: u8,
    /// 设备类型
    pub dev_type: u16,
    /// 设备型号
    pub dev_model: u8,
    /// 命令信息字
    pub ciws: Vec<Ciw>,
}

impl SenseIdData {
    /// 解析 Sense-ID 应答，第 0 字节不是 0xFF 或长度不足时返回 `None`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 7 || data[0] != 0xFF {
            return None;
        }
        let ciws = data
            .get(CIW_OFFSET..)
            .unwrap_or(&[])
            .chunks_exact(CIW_LEN)
            .take_while(|c| c[0] & 0xC0 == CIW_VALID)
            .map(|c| Ciw {
                kind: CiwType::from_raw(c[0] & 0x0F),
                command: c[1],
                count: u16::from_be_bytes([c[2], c[3]]),
            })
            .collect();
        Some(Self {
            cu_type: u16::from_be_bytes([data[1], data[2]]),
            cu_model: data[3],
            dev_type: u16::from_be_bytes([data[4], data[5]]),
            dev_model: data[6],
            ciws,
        })
    }

    /// 是否为扩展 Sense-ID
    pub fn extended(&self) -> bool {
        !self.ciws.is_empty()
    }

    /// 查找指定类型的 CIW
    pub fn ciw(&self, kind: CiwType) -> Option<&Ciw> {
        self.ciws.iter().find(|c| c.kind == kind)
    }
}

/// 一次内部 I/O 尝试的失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// 忙、状态挂起等，可以重试
    Transient,
    /// 设备拒绝了命令（命令拒绝或需要干预）
    Rejected,
    /// 不可恢复，或路径已失效（`NoDevice`）
    Fatal(CioError),
}

impl Attempt {
    pub(crate) fn from_error(e: CioError) -> Self {
        match e {
            CioError::Busy | CioError::Timeout => Attempt::Transient,
            e => Attempt::Fatal(e),
        }
    }

    /// 按结束状态对内部 I/O 分类
    pub(crate) fn check(st: &DevStat) -> Result<(), Attempt> {
        if st.flags.contains(DevStatFlags::NOT_OPERATIONAL) {
            return Err(Attempt::Fatal(CioError::NoDevice));
        }
        if st.dstat.contains(DeviceStatus::UNIT_CHECK) {
            let rejected = st.flags.contains(DevStatFlags::SENSE_AVAILABLE)
                && st.sense().first().is_some_and(|b| {
                    b & (sense0::CMD_REJECT | sense0::INTERVENTION_REQUIRED) != 0
                });
            return Err(if rejected { Attempt::Rejected } else { Attempt::Transient });
        }
        if st.dstat.contains(DeviceStatus::BUSY) || !(st.cstat - ChannelStatus::INCORRECT_LENGTH).is_empty() {
            return Err(Attempt::Transient);
        }
        Ok(())
    }
}

impl ChannelSubsystem {
    /// 以同步方式执行内部通道程序，不回调驱动
    pub(crate) fn internal_io(
        &self,
        id: SubchannelId,
        program: Arc<ChannelProgram>,
        lpm: u8,
    ) -> CioResult<DevStat> {
        let req = IoRequest::new(program, INTERNAL_INTPARM)
            .with_lpm(lpm)
            .with_flags(
                IoFlags::WAIT_FOR_INTERRUPT | IoFlags::DONT_CALL_HANDLER | IoFlags::CANCEL_ON_TIMEOUT,
            );
        match self.start(id, req)? {
            StartOutcome::Completed(st) => Ok(st),
            _ => Err(CioError::Busy),
        }
    }

    fn sense_id_once(&self, id: SubchannelId, path: u8) -> Result<SenseIdData, Attempt> {
        let buf = IoBuffer::new(SENSE_ID_LEN);
        let program = ChannelProgram::single(Ccw::with_data(ccw_cmd::SENSE_ID, CcwFlags::SLI, buf.clone()));
        let st = self.internal_io(id, program, path).map_err(Attempt::from_error)?;
        Attempt::check(&st)?;
        let len = SENSE_ID_LEN.saturating_sub(st.rescnt as usize);
        // 第 0 字节不是 0xFF：设备不支持 Sense-ID
        SenseIdData::parse(&buf.read_prefix(len)).ok_or(Attempt::Rejected)
    }

    /// 在每条路径上读取设备标识
    ///
    /// `pathmask` 为 `None` 时使用全部可用路径。每条路径最多尝试
    /// [`MAX_RETRIES`] 次，保留第一个成功的结果；所有尝试都被设备拒绝时
    /// 设备类型记为未知，设备仍可操作。
    pub fn identify(&self, id: SubchannelId, pathmask: Option<u8>) -> CioResult<DeviceIdentity> {
        let sch = self.subchannel(id)?;
        let _guard = self.sync_acquire(id)?;
        let opm = sch.lock().opm;
        let mask = pathmask.map_or(opm, |m| m & opm);
        if mask == 0 {
            return Err(CioError::NoDevice);
        }

        let mut found: Option<SenseIdData> = None;
        let mut tried = 0;
        let mut rejected = 0;
        let mut last_err = CioError::Busy;
        for path in paths(mask) {
            if sch.lock().opm & path == 0 {
                continue;
            }
            tried += 1;
            let r = retry(
                MAX_RETRIES,
                |a| *a == Attempt::Transient,
                |_| self.sense_id_once(id, path),
            );
            match r {
                Ok(data) => {
                    if found.is_none() {
                        found = Some(data);
                    }
                }
                Err(Attempt::Rejected) => rejected += 1,
                Err(Attempt::Transient) => last_err = CioError::Busy,
                Err(Attempt::Fatal(e)) => last_err = e,
            }
        }

        let mut s = sch.lock();
        match found {
            Some(data) => {
                self.msg(format_args!(
                    "cio: {} devno {} cu {:04x}/{:02x} dev {:04x}/{:02x}{}",
                    id,
                    s.devno,
                    data.cu_type,
                    data.cu_model,
                    data.dev_type,
                    data.dev_model,
                    if data.extended() { " (extended)" } else { "" }
                ));
                s.extended_sense_id = data.extended();
                s.identity = DeviceIdentity::Known(data);
                Ok(s.identity.clone())
            }
            None if tried > 0 && rejected == tried => {
                self.msg(format_args!("cio: {} devno {} unknown device type", id, s.devno));
                s.extended_sense_id = false;
                s.identity = DeviceIdentity::Unknown;
                Ok(DeviceIdentity::Unknown)
            }
            None if s.opm == 0 => Err(CioError::NoDevice),
            None => Err(last_err),
        }
    }

    /// 读取缓存的设备标识
    pub fn read_identification(&self, id: SubchannelId) -> CioResult<SenseIdData> {
        let sch = self.subchannel(id)?;
        let s = sch.lock();
        match &s.identity {
            DeviceIdentity::Known(data) => Ok(data.clone()),
            DeviceIdentity::Unknown => Err(CioError::NotSupported),
            DeviceIdentity::Unidentified => Err(CioError::NoDevice),
        }
    }

    /// 用设备提供的读配置数据命令读取配置记录
    pub fn read_configuration_data(&self, id: SubchannelId) -> CioResult<Vec<u8>> {
        let ciw = {
            let sch = self.subchannel(id)?;
            let s = sch.lock();
            match &s.identity {
                DeviceIdentity::Known(data) => data.ciw(CiwType::ReadConfigurationData).copied(),
                _ => None,
            }
        }
        .ok_or(CioError::NotSupported)?;
        if ciw.count == 0 {
            return Err(CioError::NotSupported);
        }

        let buf = IoBuffer::new(ciw.count as usize);
        let program = ChannelProgram::single(Ccw::with_data(ciw.command, CcwFlags::SLI, buf.clone()));
        let st = retry(
            MAX_RETRIES,
            |a| *a == Attempt::Transient,
            |_| {
                let st = self.internal_io(id, program.clone(), 0xFF).map_err(Attempt::from_error)?;
                Attempt::check(&st)?;
                Ok(st)
            },
        )
        .map_err(|a| match a {
            Attempt::Rejected => CioError::NotSupported,
            Attempt::Transient => CioError::Busy,
            Attempt::Fatal(e) => e,
        })?;
        let len = (ciw.count as usize).saturating_sub(st.rescnt as usize);
        Ok(buf.read_prefix(len))
    }
}

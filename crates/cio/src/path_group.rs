//! 路径组协议
//!
//! 同一设备的多条物理路径通过 set-PGID 加入同一个路径组，
//! 使设备把这些路径视为同一个主机。PGID 由本机的 CPU 地址、CPU 标识、
//! CPU 型号和启动时 TOD 时钟的高位组成，在子系统生命周期内不变。
//!
//! 建立路径组的顺序：
//!
//! 1. 在每条可用路径上发送多路径模式的 set-PGID
//! 2. 命令被拒绝时退回单路径模式一次
//! 3. 仍被拒绝时发送 sense-PGID，设备已处于分组状态则视为成功
//! 4. 否则设备不支持路径组，之后不再尝试

use crate::config::MAX_RETRIES;
use crate::css::ChannelSubsystem;
use crate::error::{CioError, CioResult};
use crate::interrupt::Notes;
use crate::retry::retry;
use crate::sense_id::Attempt;
use crate::types::{Ccw, CcwFlags, ChannelProgram, IoBuffer, SubchannelId, ccw_cmd, paths};

/// PGID 的字节数
pub const PGID_LEN: usize = 11;

/// set-PGID / sense-PGID 缓冲区长度（功能字节 + PGID）
pub const PGID_BUF_LEN: usize = 1 + PGID_LEN;

/// set-PGID 功能字节：多路径模式
pub const SPID_MULTI_PATH: u8 = 0x80;
/// set-PGID 功能字节：单路径模式
pub const SPID_SINGLE_PATH: u8 = 0x00;

const SNID_STATE_MASK: u8 = 0xC0;
/// sense-PGID 路径状态：已分组
pub const SNID_GROUPED: u8 = 0xC0;
/// sense-PGID 路径状态：未分组
pub const SNID_UNGROUPED: u8 = 0x80;

/// 路径组标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pgid {
    /// CPU 地址
    pub cpu_addr: u16,
    /// CPU 标识（低 24 位）
    pub cpu_id: u32,
    /// CPU 型号
    pub cpu_model: u16,
    /// 启动时 TOD 时钟的高 32 位
    pub tod_high: u32,
}

impl Pgid {
    /// 由处理器信息构造
    pub fn new(cpu_addr: u16, cpu_id: u32, cpu_model: u16, tod: u64) -> Self {
        Self {
            cpu_addr,
            cpu_id: cpu_id & 0x00FF_FFFF,
            cpu_model,
            tod_high: (tod >> 32) as u32,
        }
    }

    /// 编码为 11 字节
    pub fn to_bytes(&self) -> [u8; PGID_LEN] {
        let mut b = [0u8; PGID_LEN];
        b[0..2].copy_from_slice(&self.cpu_addr.to_be_bytes());
        b[2..5].copy_from_slice(&self.cpu_id.to_be_bytes()[1..]);
        b[5..7].copy_from_slice(&self.cpu_model.to_be_bytes());
        b[7..11].copy_from_slice(&self.tod_high.to_be_bytes());
        b
    }

    /// 从 11 字节解码
    pub fn from_bytes(b: &[u8; PGID_LEN]) -> Self {
        Self {
            cpu_addr: u16::from_be_bytes([b[0], b[1]]),
            cpu_id: u32::from_be_bytes([0, b[2], b[3], b[4]]),
            cpu_model: u16::from_be_bytes([b[5], b[6]]),
            tod_high: u32::from_be_bytes([b[7], b[8], b[9], b[10]]),
        }
    }
}

impl ChannelSubsystem {
    fn set_pgid(&self, id: SubchannelId, path: u8, function: u8) -> Result<(), Attempt> {
        let mut data = [0u8; PGID_BUF_LEN];
        data[0] = function;
        data[1..].copy_from_slice(&self.pgid.to_bytes());
        let buf = IoBuffer::from_vec(data.to_vec());
        let program = ChannelProgram::single(Ccw::with_data(ccw_cmd::SET_PGID, CcwFlags::SLI, buf));
        retry(
            MAX_RETRIES,
            |a| *a == Attempt::Transient,
            |_| {
                let st = self
                    .internal_io(id, program.clone(), path)
                    .map_err(Attempt::from_error)?;
                Attempt::check(&st)
            },
        )
    }

    /// sense-PGID：返回路径是否已处于分组状态
    fn sense_pgid(&self, id: SubchannelId, path: u8) -> Result<bool, Attempt> {
        let buf = IoBuffer::new(PGID_BUF_LEN);
        let program = ChannelProgram::single(Ccw::with_data(ccw_cmd::SENSE_PGID, CcwFlags::SLI, buf.clone()));
        retry(
            MAX_RETRIES,
            |a| *a == Attempt::Transient,
            |_| {
                let st = self
                    .internal_io(id, program.clone(), path)
                    .map_err(Attempt::from_error)?;
                Attempt::check(&st)?;
                let state = buf.read_prefix(1).first().copied().unwrap_or(0);
                Ok(state & SNID_STATE_MASK == SNID_GROUPED)
            },
        )
    }

    /// 在 `mask` 中的可用路径上建立路径组
    pub(crate) fn group_paths(&self, id: SubchannelId, mask: u8) -> CioResult<()> {
        let sch = self.subchannel(id)?;
        let _guard = self.sync_acquire(id)?;
        let mask = {
            let s = sch.lock();
            if !s.pgid_supported {
                return Err(CioError::NotSupported);
            }
            mask & s.opm
        };
        if mask == 0 {
            return Err(CioError::NoDevice);
        }

        let mut function = SPID_MULTI_PATH;
        let mut grouped = 0u8;
        let mut last_err = CioError::NoDevice;
        for path in paths(mask) {
            if sch.lock().opm & path == 0 {
                continue;
            }
            let mut r = self.set_pgid(id, path, function);
            if r == Err(Attempt::Rejected) && function == SPID_MULTI_PATH {
                log::debug!("cio: {} multipath grouping rejected, trying single path", id);
                function = SPID_SINGLE_PATH;
                r = self.set_pgid(id, path, function);
            }
            if r == Err(Attempt::Rejected) {
                r = match self.sense_pgid(id, path) {
                    Ok(true) => Ok(()),
                    Ok(false) | Err(Attempt::Rejected) => {
                        sch.lock().pgid_supported = false;
                        self.msg(format_args!("cio: {} path grouping not supported", id));
                        return Err(CioError::NotSupported);
                    }
                    Err(e) => Err(e),
                };
            }
            match r {
                Ok(()) => grouped |= path,
                // 路径失效只去掉这条路径
                Err(Attempt::Fatal(CioError::NoDevice)) => {}
                Err(Attempt::Fatal(e)) => last_err = e,
                Err(_) => last_err = CioError::Busy,
            }
        }
        if grouped == 0 {
            return Err(last_err);
        }

        let mut notes = Notes::new();
        {
            let mut s = sch.lock();
            if s.pgid.is_none() {
                s.pgid = Some(self.pgid);
            }
            let multipath = function == SPID_MULTI_PATH;
            if s.schib.pmcw.multipath != multipath {
                if let Err(e) = self.modify(&mut s, |p| p.multipath = multipath, &mut notes) {
                    log::debug!("cio: {} failed to set path mode: {}", id, e);
                }
            }
        }
        self.dispatch(notes);
        self.msg(format_args!("cio: {} grouped on paths {:02x}", id, grouped));
        Ok(())
    }

    /// 在全部可用路径上建立路径组
    ///
    /// 设备不支持路径组时返回 [`CioError::NotSupported`]，这不是错误，
    /// 只是之后不再尝试。
    pub fn establish_path_group(&self, id: SubchannelId) -> CioResult<()> {
        self.group_paths(id, 0xFF)
    }

    /// 路径验证：在 `mask` 中的路径上重新识别设备并建立路径组
    pub fn verify_paths(&self, id: SubchannelId, mask: u8) -> CioResult<()> {
        self.identify(id, Some(mask))?;
        if !self.subchannel(id)?.lock().pgid_supported {
            return Ok(());
        }
        self.group_paths(id, mask)
    }

    /// 识别新发现的设备并建立路径组，失败只记录日志
    pub(crate) fn recognize(&self, id: SubchannelId) {
        match self.verify_paths(id, 0xFF) {
            Ok(()) | Err(CioError::NotSupported) => {}
            Err(e) => log::warn!("cio: {} recognition failed: {}", id, e),
        }
    }
}

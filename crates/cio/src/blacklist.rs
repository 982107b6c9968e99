//! 设备号黑名单
//!
//! 被忽略的设备号以闭区间集合保存，重叠或相邻的区间会被合并。
//! 集合本身是纯数据结构，加锁与“哪些子通道受影响”的判断在
//! [`crate::registry`] 中完成。
//!
//! 文本接口支持以下格式：
//!
//! ```text
//! add 0x100-0x1ff,0x300,0.0.0400
//! free 0x100-0x10f
//! free all
//! ```

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::error::{CioError, CioResult};
use crate::types::DevNo;

/// 设备号区间集合
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Blacklist {
    /// from -> to（闭区间），区间互不重叠且不相邻
    ranges: BTreeMap<u16, u16>,
}

impl Blacklist {
    /// 创建空集合
    pub const fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// 加入区间 `[from, to]`
    pub fn add(&mut self, from: DevNo, to: DevNo) {
        let (mut lo, mut hi) = (from.0.min(to.0), from.0.max(to.0));

        // 与左侧区间重叠或相邻
        if let Some((&s, &e)) = self.ranges.range(..=lo).next_back() {
            if e as u32 + 1 >= lo as u32 {
                lo = s;
                hi = hi.max(e);
                self.ranges.remove(&s);
            }
        }
        // 吞并右侧所有起点落在 [lo, hi + 1] 内的区间
        loop {
            let bound = hi.saturating_add(1);
            let Some((&s, &e)) = self.ranges.range(lo..=bound).next() else {
                break;
            };
            hi = hi.max(e);
            self.ranges.remove(&s);
        }
        self.ranges.insert(lo, hi);
    }

    /// 移除区间 `[from, to]`，必要时拆分已有区间
    pub fn remove(&mut self, from: DevNo, to: DevNo) {
        let (lo, hi) = (from.0.min(to.0), from.0.max(to.0));
        let hit: Vec<(u16, u16)> = self
            .ranges
            .iter()
            .filter(|&(&s, &e)| s <= hi && e >= lo)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in hit {
            self.ranges.remove(&s);
            if s < lo {
                self.ranges.insert(s, lo - 1);
            }
            if e > hi {
                self.ranges.insert(hi + 1, e);
            }
        }
    }

    /// 设备号是否被忽略
    pub fn contains(&self, devno: DevNo) -> bool {
        self.ranges
            .range(..=devno.0)
            .next_back()
            .is_some_and(|(_, &e)| devno.0 <= e)
    }

    /// 区间 `[from, to]` 是否与集合有交集
    pub fn overlaps(&self, from: DevNo, to: DevNo) -> bool {
        self.ranges
            .iter()
            .any(|(&s, &e)| s <= to.0 && e >= from.0)
    }

    /// 清空
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// 集合是否为空
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 按升序列出所有区间
    pub fn ranges(&self) -> impl Iterator<Item = (DevNo, DevNo)> + '_ {
        self.ranges.iter().map(|(&s, &e)| (DevNo(s), DevNo(e)))
    }
}

/// 解析设备号
///
/// 接受 `0x1234`、`1234`（十六进制）和 `0.0.1234` 三种写法。
pub fn parse_devno(s: &str) -> CioResult<DevNo> {
    let s = s.trim();
    let hex = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        rest
    } else if let Some(rest) = s.strip_prefix("0.0.") {
        rest
    } else {
        s
    };
    if hex.is_empty() || hex.len() > 4 {
        return Err(CioError::InvalidArgument);
    }
    u16::from_str_radix(hex, 16)
        .map(DevNo)
        .map_err(|_| CioError::InvalidArgument)
}

/// 解析逗号分隔的区间列表，单个设备号视为长度为 1 的区间
pub fn parse_ranges(s: &str) -> CioResult<Vec<(DevNo, DevNo)>> {
    let mut out = Vec::new();
    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let range = match item.split_once('-') {
            Some((a, b)) => (parse_devno(a)?, parse_devno(b)?),
            None => {
                let d = parse_devno(item)?;
                (d, d)
            }
        };
        if range.0 > range.1 {
            return Err(CioError::InvalidArgument);
        }
        out.push(range);
    }
    if out.is_empty() {
        return Err(CioError::InvalidArgument);
    }
    Ok(out)
}

/// 按管理接口的格式输出区间列表，每行一个
pub fn format_ranges(list: &Blacklist) -> String {
    let mut out = String::new();
    for (from, to) in list.ranges() {
        // 写入 String 不会失败
        let _ = if from == to {
            writeln!(out, "0.0.{}", from)
        } else {
            writeln!(out, "0.0.{}-0.0.{}", from, to)
        };
    }
    out
}

/// 管理命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// 加入区间
    Add(Vec<(DevNo, DevNo)>),
    /// 移除区间
    Free(Vec<(DevNo, DevNo)>),
    /// 清空黑名单
    FreeAll,
}

impl AdminCommand {
    /// 解析一条管理命令
    pub fn parse(line: &str) -> CioResult<Self> {
        let line = line.trim();
        let (verb, args) = line
            .split_once(char::is_whitespace)
            .ok_or(CioError::InvalidArgument)?;
        let args = args.trim();
        match verb {
            "add" => Ok(AdminCommand::Add(parse_ranges(args)?)),
            "free" if args == "all" => Ok(AdminCommand::FreeAll),
            "free" => Ok(AdminCommand::Free(parse_ranges(args)?)),
            _ => Err(CioError::InvalidArgument),
        }
    }
}

//! 核心类型定义 - region 句柄、尺寸类别与标志位

use core::fmt;

/// 页大小量子，映射长度按此取整
pub const VM_PAGE_QUANTA_SIZE: usize = 4096;

/// 将长度向上取整到页量子
pub const fn round_page_quanta(size: usize) -> usize {
    (size + VM_PAGE_QUANTA_SIZE - 1) & !(VM_PAGE_QUANTA_SIZE - 1)
}

/// Region 句柄 - 以基地址标识的一段映射内存
///
/// 分配器从不拥有 region 的字节，只持有命名它的簿记记录。
/// 地址 `0` 与 `usize::MAX` 被哈希环保留为哨兵，不能作为 region。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Region(usize);

impl Region {
    /// 由基地址创建 region，哨兵地址返回 `None`
    pub const fn new(addr: usize) -> Option<Self> {
        if addr == 0 || addr == usize::MAX {
            None
        } else {
            Some(Self(addr))
        }
    }

    /// 基地址
    pub const fn addr(&self) -> usize {
        self.0
    }

    /// 基地址指针形式
    pub fn as_ptr(&self) -> *mut u8 {
        self.0 as *mut u8
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({:#x})", self.0)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 尺寸类别 - 每个 rack 只服务一个类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Tiny,
    Small,
    Medium,
}

impl SizeClass {
    /// region 对齐位数 (region 大小 = 1 << shift)
    pub const fn region_align_shift(&self) -> u32 {
        match self {
            Self::Tiny => 20,   // 1MB
            Self::Small => 23,  // 8MB
            Self::Medium => 27, // 128MB
        }
    }

    /// region 字节数
    pub const fn region_size(&self) -> usize {
        1usize << self.region_align_shift()
    }

    /// 由进程熵派生 cookie
    ///
    /// small 取 tiny 的按位取反，tiny 空闲单元被当作 small 单元复用时
    /// 一致性检查会失败。
    pub const fn derive_cookie(&self, entropy: usize) -> usize {
        match self {
            Self::Tiny => entropy,
            Self::Small => !entropy,
            Self::Medium => entropy.rotate_left(usize::BITS / 2),
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Region 释放标志位
///
/// 只能在持有 rack 的 region 锁时读写。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisposeFlags {
    pub bits: u32,
}

impl DisposeFlags {
    /// 压力线程正在遍历该 region，不能让它消失
    pub const DELAY: u32 = 0x1;

    /// 延迟释放挂起，安全后必须完成
    pub const NEEDED: u32 = 0x2;

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self { bits: bits & (Self::DELAY | Self::NEEDED) }
    }

    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub const fn contains(&self, flag: u32) -> bool {
        self.bits & flag == flag
    }

    pub fn insert(&mut self, flag: u32) {
        self.bits |= flag;
    }

    pub fn remove(&mut self, flag: u32) {
        self.bits &= !flag;
    }

    pub const fn is_delayed(&self) -> bool {
        self.contains(Self::DELAY)
    }

    pub const fn is_needed(&self) -> bool {
        self.contains(Self::NEEDED)
    }
}

/// Region 尾部元数据
///
/// 由分配 region 的代码持有；rack 仅在 remove/dispose 调用中读写释放标志。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionTrailer {
    pub dispose_flags: DisposeFlags,
}

impl RegionTrailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 压力线程开始检查该 region
    pub fn begin_pressure(&mut self) {
        self.dispose_flags.insert(DisposeFlags::DELAY);
    }
}

/// 调试/映射标志位
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub bits: u32,
}

impl DebugFlags {
    /// 在映射前加保护页
    pub const ADD_PRELUDE_GUARD_PAGE: u32 = 1 << 0;

    /// 在映射后加保护页
    pub const ADD_POSTLUDE_GUARD_PAGE: u32 = 1 << 1;

    pub const ADD_GUARD_PAGE_FLAGS: u32 =
        Self::ADD_PRELUDE_GUARD_PAGE | Self::ADD_POSTLUDE_GUARD_PAGE;

    /// 所有分配器都加保护页
    pub const GUARD_ALL: u32 = 1 << 2;

    pub const PURGEABLE: u32 = 1 << 3;

    pub const DISABLE_ASLR: u32 = 1 << 4;

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    pub const fn contains(&self, flag: u32) -> bool {
        self.bits & flag == flag
    }

    pub const fn with_flag(self, flag: u32) -> Self {
        Self { bits: self.bits | flag }
    }

    pub const fn without_flag(self, flag: u32) -> Self {
        Self { bits: self.bits & !flag }
    }

    /// region 级映射使用的保护页标志
    ///
    /// `GUARD_ALL` 时只保留后置保护页，否则去掉全部保护页。
    pub const fn fix_guard_page_flags(self) -> Self {
        if self.contains(Self::GUARD_ALL) {
            self.without_flag(Self::ADD_PRELUDE_GUARD_PAGE)
        } else {
            self.without_flag(Self::ADD_GUARD_PAGE_FLAGS)
        }
    }
}

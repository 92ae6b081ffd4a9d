// src/memory/magazine.rs
//! Magazine 池 - 一次映射容纳全部 magazine 记录及 depot

use crate::{
    error::RackError,
    memory::page::PageAllocator,
    types::{round_page_quanta, DebugFlags, Region},
};
use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use std::{
    fmt, mem,
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// 每个 rack 的 magazine 上限 (必须是 2 的幂)
pub const MAX_MAGAZINES: u32 = 64;

/// depot 的保留索引
pub const DEPOT_MAGAZINE_INDEX: i32 = -1;

/// 池映射按页对齐
const MAGAZINE_POOL_ALIGN_SHIFT: u32 = 12;

/// Magazine 引用
///
/// depot 与线程 magazine 映射到池中互不相交的逻辑位置，
/// 不依赖负偏移的指针运算。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagazineRef {
    Depot,
    Thread(u32),
}

impl MagazineRef {
    /// 由传统索引构造，`-1` 为 depot
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            DEPOT_MAGAZINE_INDEX => Some(Self::Depot),
            i if i >= 0 => Some(Self::Thread(i as u32)),
            _ => None,
        }
    }

    /// 传统索引
    pub fn index(&self) -> i32 {
        match self {
            Self::Depot => DEPOT_MAGAZINE_INDEX,
            Self::Thread(i) => *i as i32,
        }
    }

    /// 池中的记录位置：depot 在 0，线程 magazine i 在 i + 1
    fn record_index(&self) -> usize {
        match self {
            Self::Depot => 0,
            Self::Thread(i) => *i as usize + 1,
        }
    }

    pub fn is_depot(&self) -> bool {
        matches!(self, Self::Depot)
    }
}

impl fmt::Display for MagazineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depot => f.write_str("depot"),
            Self::Thread(i) => write!(f, "magazine[{}]", i),
        }
    }
}

/// Magazine 内容，由 magazine 锁保护
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MagazineState {
    /// 一项深的 "死囚区"，加速同尺寸的 free/malloc
    pub last_free: Option<usize>,
    pub last_free_msize: u16,
    pub last_free_region: Option<Region>,

    /// 最后一个 region 首尾的空闲字节不计入已用
    pub bytes_free_at_end: usize,
    pub bytes_free_at_start: usize,
    pub last_region: Option<Region>,

    pub num_bytes_in_objects: usize,
    pub num_bytes_in_magazine: usize,
    pub num_objects: u32,

    pub recirculation_entries: u32,
}

/// 单个 magazine 记录
pub struct Magazine {
    state: Mutex<MagazineState>,
    // 在 magazine 锁之外调用 allocate_pages 的临界区
    alloc_underway: AtomicBool,
}

impl Magazine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MagazineState::default()),
            alloc_underway: AtomicBool::new(false),
        }
    }

    /// 获取 magazine 锁
    pub fn lock(&self) -> MutexGuard<'_, MagazineState> {
        self.state.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, MagazineState>> {
        self.state.try_lock()
    }

    /// 标记开始在锁外分配 region，已有分配进行中时返回 `false`
    pub fn try_begin_alloc(&self) -> bool {
        self.alloc_underway
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_alloc(&self) {
        self.alloc_underway.store(false, Ordering::Release);
    }

    pub fn is_alloc_underway(&self) -> bool {
        self.alloc_underway.load(Ordering::Acquire)
    }
}

impl Default for Magazine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Magazine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Magazine")
            .field("alloc_underway", &self.is_alloc_underway())
            .finish_non_exhaustive()
    }
}

/// 计算 magazine 索引掩码
///
/// 返回 `(mask, shift)`，`mask + 1` 为覆盖 `num_magazines - 1` 的最小 2 的幂。
pub fn magazine_mask(num_magazines: u32) -> (u32, u32) {
    let highest = num_magazines.saturating_sub(1);
    let shift = u32::BITS - highest.leading_zeros();
    let mask = if shift == 0 { 0 } else { (1u32 << shift) - 1 };
    (mask, shift)
}

/// Magazine 池
///
/// 一次页映射容纳 `num_magazines + 1` 条记录，记录 0 为 depot。
/// 池结构在创建后固定，释放时一次解除映射。
pub struct MagazinePool {
    base: NonNull<CachePadded<Magazine>>,
    num_magazines: u32,
    mapping: Region,
    mapped_size: usize,
    pages: Arc<dyn PageAllocator>,
}

// SAFETY: 记录只通过 &Magazine 暴露，Magazine 自身是 Sync；映射由池独占
unsafe impl Send for MagazinePool {}
unsafe impl Sync for MagazinePool {}

impl MagazinePool {
    const MAPPING_FLAGS: DebugFlags = DebugFlags::from_bits(DebugFlags::ADD_GUARD_PAGE_FLAGS);

    /// 容纳 `num_magazines` 个 magazine 及 depot 的映射字节数
    pub fn paged_size(num_magazines: u32) -> usize {
        round_page_quanta(mem::size_of::<CachePadded<Magazine>>() * (num_magazines as usize + 1))
    }

    /// 向页分配器申请一次带保护页的映射并初始化全部记录
    pub fn allocate(num_magazines: u32, pages: Arc<dyn PageAllocator>) -> Result<Self, RackError> {
        let size = Self::paged_size(num_magazines);
        let mapping = pages
            .allocate_pages(size, MAGAZINE_POOL_ALIGN_SHIFT, Self::MAPPING_FLAGS)
            .ok_or(RackError::MagazinePoolMappingFailed { size })?;

        if mapping.addr() % mem::align_of::<CachePadded<Magazine>>() != 0 {
            log_error!("magazine pool mapping at {} is not aligned for magazine records", mapping);
            pages.deallocate_pages(mapping, size, Self::MAPPING_FLAGS);
            return Err(RackError::MagazinePoolMappingFailed { size });
        }

        let base = mapping.as_ptr() as *mut CachePadded<Magazine>;
        for i in 0..=num_magazines as usize {
            // SAFETY: 映射至少 size 字节且已按记录对齐，第 i 条记录完全落在映射内
            unsafe { base.add(i).write(CachePadded::new(Magazine::new())) };
        }

        log_debug!("magazine pool mapped at {} ({} bytes, {} records)", mapping, size, num_magazines + 1);
        Ok(Self {
            // SAFETY: Region 地址非零
            base: unsafe { NonNull::new_unchecked(base) },
            num_magazines,
            mapping,
            mapped_size: size,
            pages,
        })
    }

    fn records(&self) -> &[CachePadded<Magazine>] {
        // SAFETY: allocate 已初始化全部 num_magazines + 1 条记录，生命周期与池相同
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.num_magazines as usize + 1) }
    }

    /// 按引用获取 magazine，越界返回 `None`
    pub fn get(&self, magazine: MagazineRef) -> Option<&Magazine> {
        self.records().get(magazine.record_index()).map(|m| &**m)
    }

    pub fn depot(&self) -> &Magazine {
        &self.records()[0]
    }

    /// 线程 magazine 个数 (不含 depot)
    pub fn num_magazines(&self) -> u32 {
        self.num_magazines
    }

    pub fn mapped_size(&self) -> usize {
        self.mapped_size
    }

    pub fn mapping(&self) -> Region {
        self.mapping
    }

    /// 遍历 depot 与全部线程 magazine
    pub fn iter(&self) -> impl Iterator<Item = (MagazineRef, &Magazine)> + '_ {
        std::iter::once(MagazineRef::Depot)
            .chain((0..self.num_magazines).map(MagazineRef::Thread))
            .map(move |r| (r, &*self.records()[r.record_index()]))
    }
}

impl Drop for MagazinePool {
    fn drop(&mut self) {
        let records = ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.num_magazines as usize + 1);
        // SAFETY: 记录已初始化且此后不再访问
        unsafe { ptr::drop_in_place(records) };
        self.pages.deallocate_pages(self.mapping, self.mapped_size, Self::MAPPING_FLAGS);
        log_debug!("magazine pool at {} unmapped", self.mapping);
    }
}

impl fmt::Debug for MagazinePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MagazinePool")
            .field("num_magazines", &self.num_magazines)
            .field("mapping", &self.mapping)
            .field("mapped_size", &self.mapped_size)
            .finish()
    }
}

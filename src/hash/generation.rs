//! Region 代存储 - 槽位数组、容量与移位值

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// 初始代的容量位数
pub const INITIAL_NUM_REGIONS_SHIFT: u32 = 3;

/// 初始代的槽位数，使用内联缓冲
pub const INITIAL_NUM_REGIONS: usize = 1 << INITIAL_NUM_REGIONS_SHIFT;

/// 从未使用过的槽位
pub const HASHRING_OPEN_ENTRY: usize = 0;

/// 墓碑：region 已移除，探测链需继续向后
pub const HASHRING_REGION_DEALLOCATED: usize = usize::MAX;

/// 槽位存储
///
/// 初始代使用内联定长数组，扩容后使用堆上分配的切片。
pub enum SlotStorage {
    Inline([AtomicUsize; INITIAL_NUM_REGIONS]),
    Heap(Box<[AtomicUsize]>),
}

impl SlotStorage {
    pub fn inline() -> Self {
        Self::Inline(std::array::from_fn(|_| AtomicUsize::new(HASHRING_OPEN_ENTRY)))
    }

    pub fn heap(capacity: usize) -> Self {
        Self::Heap(
            (0..capacity)
                .map(|_| AtomicUsize::new(HASHRING_OPEN_ENTRY))
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[AtomicUsize] {
        match self {
            Self::Inline(slots) => slots,
            Self::Heap(slots) => slots,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// 一代哈希槽位
///
/// 发布后形状不再改变：容量与移位值固定，只有槽位内容由持锁的写者修改。
pub struct HashedRegions {
    storage: SlotStorage,
    shift: u32,
}

impl HashedRegions {
    /// 初始代 (内联缓冲)
    pub fn inline() -> Self {
        Self {
            storage: SlotStorage::inline(),
            shift: u64::BITS - INITIAL_NUM_REGIONS_SHIFT,
        }
    }

    /// 容量为 `1 << capacity_shift` 的堆上代
    pub fn heap(capacity_shift: u32) -> Self {
        debug_assert!(capacity_shift >= 1 && capacity_shift < usize::BITS);
        Self {
            storage: SlotStorage::heap(1usize << capacity_shift),
            shift: u64::BITS - capacity_shift,
        }
    }

    /// 按容量位数创建，能放进内联缓冲时优先使用内联缓冲
    pub fn with_capacity_shift(capacity_shift: u32) -> Self {
        if capacity_shift == INITIAL_NUM_REGIONS_SHIFT {
            Self::inline()
        } else {
            Self::heap(capacity_shift)
        }
    }

    pub fn slots(&self) -> &[AtomicUsize] {
        self.storage.as_slice()
    }

    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    /// 哈希值右移位数 (`64 - log2(capacity)`)
    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn capacity_shift(&self) -> u32 {
        u64::BITS - self.shift
    }

    pub fn is_inline(&self) -> bool {
        self.storage.is_inline()
    }

    /// 读取槽位原始值
    pub fn load(&self, index: usize) -> usize {
        self.slots()[index].load(Ordering::Acquire)
    }

    pub(crate) fn store(&self, index: usize, value: usize) {
        self.slots()[index].store(value, Ordering::Release);
    }
}

/// Rack 的代记录
///
/// 每个 rack 持有两条记录组成的乒乓对，`nextgen` 指向对中的另一条；
/// 扩容时新缓冲挂到 `nextgen` 上，再切换活动指针。
pub struct RegionGeneration {
    hashed_regions: AtomicPtr<HashedRegions>,
    nextgen: usize,
}

impl RegionGeneration {
    pub(crate) fn new(hashed_regions: *mut HashedRegions, nextgen: usize) -> Self {
        Self {
            hashed_regions: AtomicPtr::new(hashed_regions),
            nextgen,
        }
    }

    /// 乒乓对中另一条记录的下标
    pub fn nextgen(&self) -> usize {
        self.nextgen
    }

    pub(crate) fn hashed_regions_ptr(&self) -> *mut HashedRegions {
        self.hashed_regions.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, hashed_regions: *mut HashedRegions) {
        self.hashed_regions.store(hashed_regions, Ordering::Release);
    }
}

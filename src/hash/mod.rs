//! 哈希模块 - region 哈希环及其代 (generation) 存储

pub mod generation;
pub mod ring;

pub use generation::{
    HashedRegions, RegionGeneration, SlotStorage, HASHRING_OPEN_ENTRY,
    HASHRING_REGION_DEALLOCATED, INITIAL_NUM_REGIONS, INITIAL_NUM_REGIONS_SHIFT,
};
pub use ring::{InsertedSlot, RegionHashRing, FIBONACCI_MULTIPLIER};

/// 哈希环是否需要在下一次插入前重建
///
/// `occupied` 为存活条目与墓碑之和。插入后被占用的槽位必须仍不超过
/// 容量的一半，否则未命中的查找会退化为整环扫描。
pub fn needs_grow(capacity: usize, occupied: usize) -> bool {
    capacity < 2 * (occupied + 1)
}

/// 能容纳 `num_regions` 个 region 且保持半满以下的最小容量位数
pub fn capacity_shift_for(current_shift: u32, num_regions: usize) -> u32 {
    let mut shift = current_shift + 1;
    while (1usize << shift) < 2 * num_regions {
        shift += 1;
    }
    shift
}

/// 重建后的容量位数
///
/// 插入后存活条目不超过容量四分之一时按原容量重建，只清除墓碑；
/// 否则扩容。
pub fn rebuild_shift_for(current_shift: u32, num_regions: usize) -> u32 {
    if 4 * (num_regions + 1) <= 1usize << current_shift {
        current_shift
    } else {
        capacity_shift_for(current_shift, num_regions + 1)
    }
}

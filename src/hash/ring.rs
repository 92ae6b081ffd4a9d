//! Region 哈希环 - 开放寻址的插入、查找、墓碑删除与扩容重建

use crate::{
    hash::{
        rebuild_shift_for,
        generation::{HashedRegions, HASHRING_OPEN_ENTRY, HASHRING_REGION_DEALLOCATED},
    },
    types::Region,
};

/// 乘法哈希常数，约为 2^64 / φ
///
/// region 地址右移对齐位后近似为递增整数序列，乘法哈希能将其均匀打散。
pub const FIBONACCI_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// 一次插入落到的槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedSlot {
    pub index: usize,
    /// 覆盖的是墓碑而不是空槽
    pub reused_tombstone: bool,
}

/// 哈希环算法层
///
/// 本身不持有存储，作用于传入的某一代 [`HashedRegions`]。
/// 探测序列为线性探测并回绕，每个槽位在一轮内恰好访问一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHashRing {
    align_shift: u32,
}

impl RegionHashRing {
    /// `align_shift` 为 region 对齐位数，地址低位不参与哈希
    pub const fn new(align_shift: u32) -> Self {
        Self { align_shift }
    }

    pub const fn align_shift(&self) -> u32 {
        self.align_shift
    }

    /// 计算 region 在给定代中的起始桶
    pub fn hash_index(&self, hashed: &HashedRegions, region: Region) -> usize {
        let key = (region.addr() >> self.align_shift) as u64;
        (key.wrapping_mul(FIBONACCI_MULTIPLIER) >> hashed.shift()) as usize
    }

    /// 查找 region 所在槽位
    ///
    /// 不加锁、不修改；遇到空槽即停止，墓碑继续向后探测。
    pub fn lookup(&self, hashed: &HashedRegions, region: Region) -> Option<usize> {
        let capacity = hashed.capacity();
        let start = self.hash_index(hashed, region);
        let mut index = start;
        loop {
            let entry = hashed.load(index);
            if entry == HASHRING_OPEN_ENTRY {
                return None;
            }
            if entry == region.addr() {
                return Some(index);
            }
            index += 1;
            if index == capacity {
                index = 0;
            }
            if index == start {
                return None;
            }
        }
    }

    /// 将 region 存入探测序列上第一个空槽或墓碑
    ///
    /// 只能由持有 region 锁的唯一写者调用。环已满时返回 `None`。
    pub fn insert(&self, hashed: &HashedRegions, region: Region) -> Option<usize> {
        self.insert_entry(hashed, region).map(|slot| slot.index)
    }

    /// 同 [`insert`](Self::insert)，并报告是否复用了墓碑
    pub fn insert_entry(&self, hashed: &HashedRegions, region: Region) -> Option<InsertedSlot> {
        let capacity = hashed.capacity();
        let start = self.hash_index(hashed, region);
        let mut index = start;
        loop {
            let entry = hashed.load(index);
            if entry == HASHRING_OPEN_ENTRY || entry == HASHRING_REGION_DEALLOCATED {
                hashed.store(index, region.addr());
                return Some(InsertedSlot {
                    index,
                    reused_tombstone: entry == HASHRING_REGION_DEALLOCATED,
                });
            }
            index += 1;
            if index == capacity {
                index = 0;
            }
            if index == start {
                return None;
            }
        }
    }

    /// 将 region 的槽位改写为墓碑并返回槽位下标
    ///
    /// 不能写回空槽：之后插入、与之同链的条目会被截断而查不到。
    pub fn remove(&self, hashed: &HashedRegions, region: Region) -> Option<usize> {
        let slot = self.lookup(hashed, region)?;
        hashed.store(slot, HASHRING_REGION_DEALLOCATED);
        Some(slot)
    }

    /// 将旧代中所有存活条目重新哈希到新代，返回迁移条目数
    pub fn rehash_into(&self, old: &HashedRegions, new: &HashedRegions) -> usize {
        let mut moved = 0;
        for entry in Self::live_entries(old) {
            if self.insert(new, entry).is_some() {
                moved += 1;
            }
        }
        moved
    }

    /// 构建新代并完整迁移旧代存活条目，墓碑不迁移
    ///
    /// 存活条目较少时保持原容量，否则容量至少翻倍；都保证插入第
    /// `num_regions + 1` 个 region 后仍不超过半满。返回的新代尚未发布。
    pub fn grow(&self, old: &HashedRegions, num_regions: usize) -> (HashedRegions, usize) {
        let new_shift = rebuild_shift_for(old.capacity_shift(), num_regions);
        let new = HashedRegions::heap(new_shift);
        let moved = self.rehash_into(old, &new);
        (new, moved)
    }

    /// 槽位中的存活 region，空槽与墓碑返回 `None`
    pub fn live_entry_at(hashed: &HashedRegions, index: usize) -> Option<Region> {
        match hashed.load(index) {
            HASHRING_OPEN_ENTRY | HASHRING_REGION_DEALLOCATED => None,
            entry => Region::new(entry),
        }
    }

    /// 遍历一代中的存活 region
    pub fn live_entries(hashed: &HashedRegions) -> impl Iterator<Item = Region> + '_ {
        (0..hashed.capacity()).filter_map(move |i| Self::live_entry_at(hashed, i))
    }
}

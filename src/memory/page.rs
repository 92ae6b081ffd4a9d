// src/memory/page.rs
//! 页分配器接口 - 为 region 与 magazine 池提供原始地址区间

use crate::{
    types::{round_page_quanta, DebugFlags, Region, VM_PAGE_QUANTA_SIZE},
};
use ahash::AHashMap;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

/// 页级分配器特征
pub trait PageAllocator: Send + Sync {
    /// 映射 `size` 字节，按 `1 << align_shift` 对齐
    fn allocate_pages(&self, size: usize, align_shift: u32, flags: DebugFlags) -> Option<Region>;

    /// 解除映射
    fn deallocate_pages(&self, region: Region, size: usize, flags: DebugFlags);
}

/// 页分配统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageStats {
    pub mapped_bytes: usize,
    pub map_count: u64,
    pub unmap_count: u64,
}

/// 基于系统分配器的页分配器
///
/// 长度按页量子取整，对齐至少为一页。每个映射的布局被记录下来，
/// 解除映射时只需 `(region, size)`。保护页标志只被接受，不做实际保护。
#[derive(Default)]
pub struct SystemPageAllocator {
    mappings: Mutex<AHashMap<usize, Layout>>,
    mapped_bytes: AtomicUsize,
    map_count: AtomicU64,
    unmap_count: AtomicU64,
}

impl SystemPageAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout_for(size: usize, align_shift: u32) -> Option<Layout> {
        let align = (1usize.checked_shl(align_shift)?).max(VM_PAGE_QUANTA_SIZE);
        Layout::from_size_align(round_page_quanta(size.max(1)), align).ok()
    }

    /// 该地址是否为本分配器的现存映射
    pub fn is_mapped(&self, region: Region) -> bool {
        self.mappings.lock().contains_key(&region.addr())
    }

    pub fn stats(&self) -> PageStats {
        PageStats {
            mapped_bytes: self.mapped_bytes.load(Ordering::Relaxed),
            map_count: self.map_count.load(Ordering::Relaxed),
            unmap_count: self.unmap_count.load(Ordering::Relaxed),
        }
    }
}

impl PageAllocator for SystemPageAllocator {
    fn allocate_pages(&self, size: usize, align_shift: u32, _flags: DebugFlags) -> Option<Region> {
        let layout = Self::layout_for(size, align_shift)?;
        // SAFETY: layout 长度非零
        let ptr = unsafe { System.alloc_zeroed(layout) };
        let region = Region::new(ptr as usize)?;

        self.mappings.lock().insert(region.addr(), layout);
        self.mapped_bytes.fetch_add(layout.size(), Ordering::Relaxed);
        self.map_count.fetch_add(1, Ordering::Relaxed);
        Some(region)
    }

    fn deallocate_pages(&self, region: Region, size: usize, _flags: DebugFlags) {
        let Some(layout) = self.mappings.lock().remove(&region.addr()) else {
            log_warn!("deallocate_pages: {} ({} bytes) is not a mapping of this allocator", region, size);
            return;
        };
        if round_page_quanta(size.max(1)) != layout.size() {
            log_warn!("deallocate_pages: size {} does not match mapping of {} bytes", size, layout.size());
        }
        // SAFETY: 地址与布局来自 allocate_pages，且已从映射表移除，不会重复释放
        unsafe { System.dealloc(region.as_ptr(), layout) };
        self.mapped_bytes.fetch_sub(layout.size(), Ordering::Relaxed);
        self.unmap_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for SystemPageAllocator {
    fn drop(&mut self) {
        for (addr, layout) in self.mappings.get_mut().drain() {
            // SAFETY: 映射表中的每一项都是尚未释放的 allocate_pages 结果
            unsafe { System.dealloc(addr as *mut u8, layout) };
        }
    }
}

/// 记录每次解除映射的页分配器
///
/// 映射委托给内部分配器；解除映射先入队记录，再仅对内部分配器真实映射过
/// 的地址执行释放，因此可以对伪造的 region 地址调用。
pub struct TrackingPageAllocator {
    inner: SystemPageAllocator,
    unmaps: SegQueue<(Region, usize)>,
    unmap_count: AtomicUsize,
    fail_allocations: AtomicBool,
}

impl TrackingPageAllocator {
    pub fn new() -> Self {
        Self {
            inner: SystemPageAllocator::new(),
            unmaps: SegQueue::new(),
            unmap_count: AtomicUsize::new(0),
            fail_allocations: AtomicBool::new(false),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 之后的映射请求全部失败
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Release);
    }

    /// 累计解除映射次数
    pub fn unmap_count(&self) -> usize {
        self.unmap_count.load(Ordering::Acquire)
    }

    /// 取出目前为止记录的解除映射调用
    pub fn take_unmaps(&self) -> Vec<(Region, usize)> {
        std::iter::from_fn(|| self.unmaps.pop()).collect()
    }

    pub fn inner(&self) -> &SystemPageAllocator {
        &self.inner
    }
}

impl Default for TrackingPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for TrackingPageAllocator {
    fn allocate_pages(&self, size: usize, align_shift: u32, flags: DebugFlags) -> Option<Region> {
        if self.fail_allocations.load(Ordering::Acquire) {
            return None;
        }
        self.inner.allocate_pages(size, align_shift, flags)
    }

    fn deallocate_pages(&self, region: Region, size: usize, flags: DebugFlags) {
        self.unmaps.push((region, size));
        self.unmap_count.fetch_add(1, Ordering::AcqRel);
        if self.inner.is_mapped(region) {
            self.inner.deallocate_pages(region, size, flags);
        }
    }
}

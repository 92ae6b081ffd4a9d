//! Rack 核心实现 - 生命周期、region 插入与无锁查找

use crate::{
    error::{DiagnosticSink, LogSink, RackError},
    hash::{needs_grow, HashedRegions, RegionGeneration, RegionHashRing, HASHRING_REGION_DEALLOCATED},
    memory::{magazine_mask, Magazine, MagazinePool, MagazineRef, PageAllocator},
    rack::config::RackConfig,
    stats::RackStats,
    types::{DebugFlags, Region, SizeClass},
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    fmt,
    ptr::{self, NonNull},
    sync::{
        atomic::{fence, AtomicPtr, AtomicUsize, Ordering},
        Arc,
    },
};

/// 进程级熵，所有 rack 的 cookie 都由它派生
static MALLOC_ENTROPY: Lazy<usize> = Lazy::new(rand::random::<usize>);

/// 读取进程级熵
pub fn process_entropy() -> usize {
    *MALLOC_ENTROPY
}

/// 已发布过的代缓冲
///
/// 读者可能仍在旧缓冲上查找，因此旧缓冲在 rack 存活期间一直保留。
struct OwnedBuffer(NonNull<HashedRegions>);

// SAFETY: 缓冲只在 region 锁下登记，仅在 Drop 时回收
unsafe impl Send for OwnedBuffer {}

/// Region 锁保护的写者状态
pub(super) struct RegionBook {
    pub(super) num_regions: usize,
    /// 活动代中的墓碑数，重建时清零
    pub(super) num_tombstones: usize,
    buffers: Vec<OwnedBuffer>,
    generation_count: u64,
}

/// Rack - 单一尺寸类别的分配器协调者
///
/// 持有 region 锁、活动代指针 (乒乓对)、magazine 池、类型 cookie
/// 以及 region 计数。写者 (插入/删除/延迟释放) 由 region 锁串行化，
/// 查找不加锁。
pub struct Rack {
    size_class: SizeClass,
    pub(super) debug_flags: DebugFlags,
    cookie: usize,
    region_size: usize,
    pub(super) ring: RegionHashRing,

    generations: Box<[RegionGeneration; 2]>,
    region_generation: AtomicPtr<RegionGeneration>,
    pub(super) region_lock: Mutex<RegionBook>,
    pub(super) num_regions_dealloc: AtomicUsize,

    num_magazines: u32,
    num_magazines_mask: u32,
    num_magazines_mask_shift: u32,
    magazines: Option<MagazinePool>,

    pub(super) pages: Arc<dyn PageAllocator>,
    pub(super) sink: Arc<dyn DiagnosticSink>,
}

impl Rack {
    /// 按尺寸类别初始化 rack
    ///
    /// `num_magazines > 0` 时一次映射 `num_magazines + 1` 条 magazine 记录；
    /// 映射失败是致命错误，进程终止。
    pub fn init(
        size_class: SizeClass,
        num_magazines: u32,
        debug_flags: DebugFlags,
        pages: Arc<dyn PageAllocator>,
    ) -> Result<Self, RackError> {
        let config = RackConfig::for_size_class(size_class)
            .with_magazines(num_magazines)
            .with_debug_flags(debug_flags);
        Self::with_config(config, pages, Arc::new(LogSink))
    }

    /// 按完整配置初始化 rack
    pub fn with_config(
        config: RackConfig,
        pages: Arc<dyn PageAllocator>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, RackError> {
        config.validate()?;

        let magazines = if config.num_magazines > 0 {
            match MagazinePool::allocate(config.num_magazines, pages.clone()) {
                Ok(pool) => Some(pool),
                Err(err) => sink.fatal(&err),
            }
        } else {
            None
        };
        let (num_magazines_mask, num_magazines_mask_shift) = magazine_mask(config.num_magazines);

        let initial = NonNull::from(Box::leak(Box::new(HashedRegions::with_capacity_shift(
            config.initial_capacity_shift,
        ))));
        let generations = Box::new([
            RegionGeneration::new(initial.as_ptr(), 1),
            RegionGeneration::new(ptr::null_mut(), 0),
        ]);
        let region_generation = AtomicPtr::new(ptr::from_ref(&generations[0]).cast_mut());

        let cookie = config.size_class.derive_cookie(process_entropy());

        log_info!(
            "{} rack init: magazines={} mask={:#x} capacity={}",
            config.size_class,
            config.num_magazines,
            num_magazines_mask,
            1usize << config.initial_capacity_shift
        );

        Ok(Self {
            size_class: config.size_class,
            debug_flags: config.debug_flags,
            cookie,
            region_size: config.region_size(),
            ring: RegionHashRing::new(config.region_align_shift),
            generations,
            region_generation,
            region_lock: Mutex::new(RegionBook {
                num_regions: 0,
                num_tombstones: 0,
                buffers: vec![OwnedBuffer(initial)],
                generation_count: 0,
            }),
            num_regions_dealloc: AtomicUsize::new(0),
            num_magazines: config.num_magazines,
            num_magazines_mask,
            num_magazines_mask_shift,
            magazines,
            pages,
            sink,
        })
    }

    /// 当前活动代记录
    fn active_generation(&self) -> &RegionGeneration {
        // SAFETY: 活动指针始终指向 self.generations 中的一条记录
        unsafe { &*self.region_generation.load(Ordering::Acquire) }
    }

    /// 当前活动代的槽位
    ///
    /// 读者只读一次活动指针，之后始终针对它观察到的那一代操作。
    pub(super) fn hashed_regions(&self) -> &HashedRegions {
        // SAFETY: 已发布的缓冲在 rack 存活期间不会被释放
        unsafe { &*self.active_generation().hashed_regions_ptr() }
    }

    /// 无锁查找 region
    pub fn region_lookup(&self, region: Region) -> bool {
        self.ring.lookup(self.hashed_regions(), region).is_some()
    }

    /// 活动代中全部存活 region 的快照
    pub fn regions(&self) -> Vec<Region> {
        RegionHashRing::live_entries(self.hashed_regions()).collect()
    }

    /// 登记新 region
    ///
    /// 存活条目与墓碑合计超过半满时先重建，整个过程持有 region 锁。
    pub fn region_insert(&self, region: Region) {
        let mut book = self.region_lock.lock();

        let occupied = book.num_regions + book.num_tombstones;
        if needs_grow(self.hashed_regions().capacity(), occupied) {
            self.grow_locked(&mut book);
        }

        if let Some(slot) = self.ring.insert_entry(self.hashed_regions(), region) {
            book.num_regions += 1;
            if slot.reused_tombstone {
                book.num_tombstones -= 1;
            }
        } else {
            log_error!("{} rack: no free slot for {} despite density check", self.size_class, region);
        }
    }

    /// 映射一个对齐的新 region 并登记
    pub fn allocate_region(&self) -> Result<Region, RackError> {
        let flags = self.debug_flags.fix_guard_page_flags();
        let region = self
            .pages
            .allocate_pages(self.region_size, self.ring.align_shift(), flags)
            .ok_or(RackError::RegionAllocationFailed { size: self.region_size })?;
        self.region_insert(region);
        Ok(region)
    }

    /// 构建新代并切换活动指针
    ///
    /// 新代完整迁移后才挂到 `nextgen` 上发布；旧缓冲不释放。
    /// 新代不含墓碑。
    fn grow_locked(&self, book: &mut RegionBook) {
        let active = self.active_generation();
        let old = self.hashed_regions();
        let (new, moved) = self.ring.grow(old, book.num_regions);
        debug_assert_eq!(moved, book.num_regions);

        let old_capacity = old.capacity();
        let new_capacity = new.capacity();
        let new = NonNull::from(Box::leak(Box::new(new)));
        book.buffers.push(OwnedBuffer(new));

        let nextgen = &self.generations[active.nextgen()];
        nextgen.publish(new.as_ptr());
        fence(Ordering::SeqCst);
        self.region_generation
            .store(ptr::from_ref(nextgen).cast_mut(), Ordering::Release);
        book.generation_count += 1;
        let swept = book.num_tombstones;
        book.num_tombstones = 0;

        log_info!(
            "{} rack rebuilt hash ring {} -> {} ({} regions re-hashed, {} tombstones swept)",
            self.size_class,
            old_capacity,
            new_capacity,
            moved,
            swept
        );
    }

    /// 解除活动代中全部存活 region 的映射并写入墓碑
    ///
    /// 仅用于整体销毁，返回解除映射的 region 数。
    pub fn destroy_regions(&self, region_size: usize) -> usize {
        let mut book = self.region_lock.lock();
        let hashed = self.hashed_regions();
        let flags = self.debug_flags.fix_guard_page_flags();

        let live: Vec<(usize, Region)> = (0..hashed.capacity())
            .filter_map(|i| RegionHashRing::live_entry_at(hashed, i).map(|r| (i, r)))
            .collect();
        for (slot, region) in &live {
            self.pages.deallocate_pages(*region, region_size, flags);
            hashed.store(*slot, HASHRING_REGION_DEALLOCATED);
            book.num_regions = book.num_regions.saturating_sub(1);
            book.num_tombstones += 1;
        }

        log_info!("{} rack destroyed {} regions", self.size_class, live.len());
        live.len()
    }

    /// 销毁 rack，释放代缓冲与 magazine 池
    ///
    /// 调用前所有 region 应已释放，此处不做隐式清理。
    pub fn destroy(self) {
        let live = self.live_regions();
        if live > 0 {
            log_warn!("{} rack destroyed with {} live regions", self.size_class, live);
        }
        drop(self);
    }

    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// 类型 cookie，供空闲链表一致性检查使用
    pub fn cookie(&self) -> usize {
        self.cookie
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug_flags
    }

    /// 该尺寸类别的 region 字节数
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// 存活 region 数
    pub fn live_regions(&self) -> usize {
        self.region_lock.lock().num_regions
    }

    /// 累计释放的 region 数，无需 region 锁
    pub fn num_regions_dealloc(&self) -> usize {
        self.num_regions_dealloc.load(Ordering::Acquire)
    }

    /// 活动代容量
    pub fn capacity(&self) -> usize {
        self.hashed_regions().capacity()
    }

    pub fn num_magazines(&self) -> u32 {
        self.num_magazines
    }

    pub fn num_magazines_mask(&self) -> u32 {
        self.num_magazines_mask
    }

    pub fn num_magazines_mask_shift(&self) -> u32 {
        self.num_magazines_mask_shift
    }

    pub fn magazine_pool(&self) -> Option<&MagazinePool> {
        self.magazines.as_ref()
    }

    pub fn magazine(&self, magazine: MagazineRef) -> Option<&Magazine> {
        self.magazines.as_ref()?.get(magazine)
    }

    pub fn depot(&self) -> Option<&Magazine> {
        self.magazines.as_ref().map(MagazinePool::depot)
    }

    /// 按 CPU 编号选择线程 magazine
    pub fn magazine_index_for_cpu(&self, cpu: u32) -> Option<MagazineRef> {
        if self.num_magazines == 0 {
            return None;
        }
        let index = (cpu & self.num_magazines_mask) % self.num_magazines;
        Some(MagazineRef::Thread(index))
    }

    /// 统计快照
    pub fn stats(&self) -> RackStats {
        let book = self.region_lock.lock();
        let hashed = self.hashed_regions();
        RackStats {
            size_class: self.size_class,
            live_regions: book.num_regions,
            tombstones: book.num_tombstones,
            regions_dealloc: self.num_regions_dealloc(),
            capacity: hashed.capacity(),
            generation_count: book.generation_count,
            retired_buffers: book.buffers.len() - 1,
            num_magazines: self.num_magazines,
            magazine_pool_bytes: self.magazines.as_ref().map_or(0, MagazinePool::mapped_size),
        }
    }
}

impl Drop for Rack {
    fn drop(&mut self) {
        for OwnedBuffer(buffer) in self.region_lock.get_mut().buffers.drain(..) {
            // SAFETY: 由 Box::leak 得到；持有 &mut self 时不存在读者
            drop(unsafe { Box::from_raw(buffer.as_ptr()) });
        }
    }
}

impl fmt::Debug for Rack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rack")
            .field("size_class", &self.size_class)
            .field("capacity", &self.capacity())
            .field("num_regions_dealloc", &self.num_regions_dealloc())
            .field("num_magazines", &self.num_magazines)
            .finish_non_exhaustive()
    }
}

//! Rack 集成测试

use magazine_rack::{
    DebugFlags, DisposeFlags, MagazineRef, PageAllocator, Rack, Region, RegionTrailer, SizeClass,
    SystemPageAllocator, TrackingPageAllocator, INITIAL_NUM_REGIONS,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use test_log::test;

const SEED: u64 = 42;
const TINY_REGION_SIZE: usize = 1 << 20;

/// 生成互不相同、按 1MB 对齐的随机 region 地址
fn generate_regions(count: usize) -> Vec<Region> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let k: usize = rng.gen_range(1..(1 << 24));
        if seen.insert(k) {
            out.push(Region::new(k << 20).expect("非法地址"));
        }
    }
    out
}

fn tiny_rack(num_magazines: u32) -> (Rack, Arc<TrackingPageAllocator>) {
    let pages = TrackingPageAllocator::shared();
    let rack = Rack::init(SizeClass::Tiny, num_magazines, DebugFlags::empty(), pages.clone())
        .expect("初始化失败");
    (rack, pages)
}

#[test]
fn test_scenario_a_growth() {
    let (rack, _pages) = tiny_rack(4);
    let initial_capacity = rack.capacity();
    assert_eq!(initial_capacity, INITIAL_NUM_REGIONS);

    let regions: Vec<Region> = (1..=8).map(|k| Region::new(k * TINY_REGION_SIZE).unwrap()).collect();
    for r in &regions {
        rack.region_insert(*r);
    }

    for r in &regions {
        assert!(rack.region_lookup(*r), "{} 未找到", r);
    }
    assert_eq!(rack.live_regions(), 8);
    assert!(rack.capacity() >= initial_capacity * 2, "容量未翻倍");
    assert!(rack.stats().generation_count >= 1);
}

#[test]
fn test_scenario_b_delayed_disposal() {
    let (rack, pages) = tiny_rack(4);
    let r1 = Region::new(5 * TINY_REGION_SIZE).unwrap();
    rack.region_insert(r1);

    let mut trailer = RegionTrailer::default();
    trailer.dispose_flags = DisposeFlags::from_bits(DisposeFlags::DELAY);

    assert!(!rack.region_remove(r1, &mut trailer));
    assert!(trailer.dispose_flags.is_needed());
    assert!(!rack.region_lookup(r1));

    assert!(rack.region_maybe_dispose(r1, TINY_REGION_SIZE, &mut trailer));
    assert_eq!(pages.take_unmaps(), vec![(r1, TINY_REGION_SIZE)]);

    // 第二次调用不再解除映射
    assert!(!rack.region_maybe_dispose(r1, TINY_REGION_SIZE, &mut trailer));
    assert!(pages.take_unmaps().is_empty());
}

#[test]
fn test_scenario_c_immediate_removal() {
    let (rack, _pages) = tiny_rack(4);
    let r1 = Region::new(9 * TINY_REGION_SIZE).unwrap();
    rack.region_insert(r1);

    let mut trailer = RegionTrailer::default();
    assert!(rack.region_remove(r1, &mut trailer));
    assert_eq!(rack.num_regions_dealloc(), 1);
    assert!(!rack.region_lookup(r1));
}

#[test]
fn test_density_invariant_random_addresses() {
    let (rack, _pages) = tiny_rack(0);
    let regions = generate_regions(2_000);

    for (i, r) in regions.iter().enumerate() {
        let before = rack.live_regions();
        rack.region_insert(*r);
        assert_eq!(rack.live_regions(), before + 1);
        assert!(rack.region_lookup(*r), "插入后查找失败 (index {})", i);
        assert!(rack.live_regions() * 2 <= rack.capacity(), "超过半满 (index {})", i);
    }

    for r in &regions {
        assert!(rack.region_lookup(*r));
    }
    let snapshot: HashSet<Region> = rack.regions().into_iter().collect();
    assert_eq!(snapshot.len(), regions.len(), "扩容后有重复或丢失");
}

#[test]
fn test_growth_after_removals() {
    let (rack, _pages) = tiny_rack(0);
    let regions = generate_regions(300);
    let mut trailer = RegionTrailer::default();

    for r in &regions[..100] {
        rack.region_insert(*r);
    }
    for r in regions[..100].iter().step_by(2) {
        assert!(rack.region_remove(*r, &mut trailer));
    }
    for r in &regions[100..] {
        rack.region_insert(*r);
    }

    for (i, r) in regions.iter().enumerate() {
        let expect_live = i >= 100 || i % 2 == 1;
        assert_eq!(rack.region_lookup(*r), expect_live, "index {}", i);
    }
    assert_eq!(rack.live_regions(), 250);
    assert_eq!(rack.num_regions_dealloc(), 50);
}

#[test]
fn test_tombstones_trigger_rebuild() {
    let (rack, _pages) = tiny_rack(0);
    let regions = generate_regions(5_000);
    let mut trailer = RegionTrailer::default();
    for r in &regions[..10] {
        rack.region_insert(*r);
    }
    let initial_capacity = rack.capacity();

    let mut settled = 0;
    for (i, r) in regions[10..].iter().enumerate() {
        rack.region_insert(*r);
        assert!(rack.region_remove(*r, &mut trailer));
        assert!(rack.stats().occupancy() <= 0.5);
        if i == 1_000 {
            settled = rack.capacity();
        }
    }

    let stats = rack.stats();
    assert_eq!(stats.live_regions, 10);
    assert_eq!(stats.capacity, settled, "存活数不变时容量不应继续增长");
    assert!(stats.capacity <= initial_capacity * 2);
    assert!(stats.generation_count > 1, "墓碑从未被清除");
    assert!(regions[10..].iter().all(|r| !rack.region_lookup(*r)));
    assert!(regions[..10].iter().all(|r| rack.region_lookup(*r)));
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (rack, _pages) = tiny_rack(0);
    let rack = Arc::new(rack);
    let regions = generate_regions(4_000);
    let stable: Vec<Region> = regions[..16].to_vec();
    for r in &stable {
        rack.region_insert(*r);
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let rack = Arc::clone(&rack);
            let stable = stable.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    for r in &stable {
                        assert!(rack.region_lookup(*r), "并发扩容期间丢失 {}", r);
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = regions[16..]
        .chunks(1_000)
        .map(|chunk| {
            let rack = Arc::clone(&rack);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                let mut trailer = RegionTrailer::default();
                for (i, r) in chunk.iter().enumerate() {
                    rack.region_insert(*r);
                    if i % 3 == 0 {
                        assert!(rack.region_remove(*r, &mut trailer));
                    }
                }
            })
        })
        .collect();

    for handle in readers.into_iter().chain(writers) {
        handle.join().unwrap();
    }

    let removed = regions[16..]
        .chunks(1_000)
        .map(|c| (0..c.len()).filter(|i| i % 3 == 0).count())
        .sum::<usize>();
    assert_eq!(rack.num_regions_dealloc(), removed);
    assert_eq!(rack.live_regions(), regions.len() - removed);
    assert!(rack.live_regions() * 2 <= rack.capacity());
}

#[test]
fn test_pressure_actor_races_remove() {
    let (rack, pages) = tiny_rack(2);
    let rack = Arc::new(rack);
    let regions = generate_regions(512);
    for r in &regions {
        rack.region_insert(*r);
    }

    // 压力线程已开始遍历全部 region，remove 与 maybe_dispose 同时进行
    let trailers: Vec<Arc<parking_lot::Mutex<RegionTrailer>>> = regions
        .iter()
        .map(|_| {
            let mut t = RegionTrailer::default();
            t.begin_pressure();
            Arc::new(parking_lot::Mutex::new(t))
        })
        .collect();
    let start = Arc::new(Barrier::new(2));

    let remover = {
        let rack = Arc::clone(&rack);
        let pages = Arc::clone(&pages);
        let regions = regions.clone();
        let trailers = trailers.clone();
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            let mut unmapped = 0;
            for (r, t) in regions.iter().zip(&trailers) {
                if rack.region_remove(*r, &mut t.lock()) {
                    // 压力周期已结束，由删除方自己解除映射
                    pages.deallocate_pages(*r, TINY_REGION_SIZE, DebugFlags::empty());
                    unmapped += 1;
                }
            }
            unmapped
        })
    };

    let actor = {
        let rack = Arc::clone(&rack);
        let regions = regions.clone();
        let trailers = trailers.clone();
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            regions
                .iter()
                .zip(&trailers)
                .rev()
                .filter(|(r, t)| rack.region_maybe_dispose(**r, TINY_REGION_SIZE, &mut t.lock()))
                .count()
        })
    };

    let by_remover = remover.join().unwrap();
    let by_actor = actor.join().unwrap();
    assert_eq!(by_remover + by_actor, regions.len());

    // 无论先后，每个 region 恰好解除映射一次
    let mut unmapped: Vec<Region> = pages.take_unmaps().into_iter().map(|(r, _)| r).collect();
    unmapped.sort();
    let mut expected = regions.clone();
    expected.sort();
    assert_eq!(unmapped, expected);

    assert!(trailers.iter().all(|t| t.lock().dispose_flags.is_empty()));
    assert_eq!(rack.live_regions(), 0);
    assert_eq!(rack.num_regions_dealloc(), regions.len());
}

#[test]
fn test_full_lifecycle_with_system_pages() {
    let pages = Arc::new(SystemPageAllocator::new());
    let rack = Rack::init(SizeClass::Tiny, 4, DebugFlags::empty(), pages.clone()).expect("初始化失败");
    let region_size = rack.region_size();

    let regions: Vec<Region> = (0..12)
        .map(|_| {
            pages
                .allocate_pages(region_size, SizeClass::Tiny.region_align_shift(), DebugFlags::empty())
                .expect("映射失败")
        })
        .collect();
    for r in &regions {
        rack.region_insert(*r);
    }

    // 一半直接释放
    let mut trailer = RegionTrailer::default();
    for r in &regions[..6] {
        assert!(rack.region_remove(*r, &mut trailer));
        pages.deallocate_pages(*r, region_size, DebugFlags::empty());
    }

    // 其余在销毁时统一解除映射
    assert_eq!(rack.destroy_regions(region_size), 6);
    for r in &regions {
        assert!(!pages.is_mapped(*r));
    }

    let magazines = rack.magazine_pool().expect("缺少 magazine 池").mapped_size();
    assert_eq!(pages.stats().mapped_bytes, magazines);
    rack.destroy();
    assert_eq!(pages.stats().mapped_bytes, 0);
}

#[test]
fn test_magazines_usable_across_threads() {
    let (rack, _pages) = tiny_rack(4);
    let rack = Arc::new(rack);

    let handles: Vec<_> = (0..8u32)
        .map(|cpu| {
            let rack = Arc::clone(&rack);
            thread::spawn(move || {
                let index = rack.magazine_index_for_cpu(cpu).expect("缺少 magazine");
                let magazine = rack.magazine(index).expect("越界");
                for _ in 0..1_000 {
                    magazine.lock().num_objects += 1;
                }
                let depot = rack.depot().expect("缺少 depot");
                depot.lock().recirculation_entries += 1;
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total: u32 = (0..4)
        .map(|i| rack.magazine(MagazineRef::Thread(i)).unwrap().lock().num_objects)
        .sum();
    assert_eq!(total, 8_000);
    assert_eq!(rack.depot().unwrap().lock().recirculation_entries, 8);
}

#[test]
fn test_stats_export() {
    let (rack, _pages) = tiny_rack(2);
    for k in 1..=5 {
        rack.region_insert(Region::new(k * TINY_REGION_SIZE).unwrap());
    }
    let stats = rack.stats();
    assert_eq!(stats.live_regions, 5);
    assert_eq!(stats.num_magazines, 2);
    assert!(stats.magazine_pool_bytes > 0);
    let text = stats.export_prometheus();
    assert!(text.contains("rack_live_regions{size_class=\"tiny\"} 5"));
}

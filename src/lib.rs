//! Rust 多 magazine 分配器的 region 注册表
//!
//! 负责跟踪属于一个分配器实例的地址空间区间 (region)，并持有
//! 每线程分配 arena (magazine) 及共享溢出 arena (depot)。
//!
//! ## 主要特性
//! - 开放寻址 region 哈希环，查找完全无锁
//! - 双缓冲代 (generation) 扩容，扩容期间读者不受影响
//! - 墓碑删除，不破坏探测链
//! - 与外部内存压力线程协作的延迟释放协议 (DELAY/NEEDED)
//! - 连续映射的 magazine 池，depot 独占逻辑索引 -1
//!
//! ## 快速开始
//!
//! ```rust
//! use std::sync::Arc;
//! use magazine_rack::*;
//!
//! let pages = Arc::new(SystemPageAllocator::new());
//! let rack = Rack::init(SizeClass::Tiny, 4, DebugFlags::empty(), pages).expect("初始化失败");
//!
//! let region = Region::new(0x7f00_0010_0000).expect("非法地址");
//! rack.region_insert(region);
//! assert!(rack.region_lookup(region));
//!
//! let mut trailer = RegionTrailer::default();
//! assert!(rack.region_remove(region, &mut trailer));
//! assert!(!rack.region_lookup(region));
//! ```

#![warn(clippy::all)]

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

#[cfg(feature = "logging")]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

// 核心模块导出
pub mod error;
pub mod types;
pub mod hash;
pub mod memory;
pub mod rack;
pub mod stats;

// 公共接口导出
pub use crate::{
    error::{DiagnosticSink, LogSink, RackError},
    hash::{
        HashedRegions,
        RegionGeneration,
        RegionHashRing,
        SlotStorage,
        INITIAL_NUM_REGIONS,
        INITIAL_NUM_REGIONS_SHIFT,
    },
    memory::{
        Magazine,
        MagazinePool,
        MagazineRef,
        MagazineState,
        PageAllocator,
        SystemPageAllocator,
        TrackingPageAllocator,
        MAX_MAGAZINES,
    },
    rack::{Rack, RackConfig},
    stats::RackStats,
    types::{DebugFlags, DisposeFlags, Region, RegionTrailer, SizeClass},
};

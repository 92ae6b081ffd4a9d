//! 内存管理模块 - 页分配器接口与 magazine 池

pub mod magazine;
pub mod page;

pub use magazine::{
    magazine_mask, Magazine, MagazinePool, MagazineRef, MagazineState, DEPOT_MAGAZINE_INDEX,
    MAX_MAGAZINES,
};
pub use page::{PageAllocator, PageStats, SystemPageAllocator, TrackingPageAllocator};

//! Region 删除与延迟释放协议
//!
//! 外部内存压力线程遍历 region 时会在尾部置 `DELAY`。此时到来的删除
//! 仍将 region 从哈希环移除，但物理解除映射推迟：删除方置 `NEEDED`
//! 并返回 `false`，由压力线程结束时调用 `region_maybe_dispose` 完成。

use crate::{
    error::RackError,
    rack::rack::Rack,
    types::{DisposeFlags, Region, RegionTrailer},
};
use std::sync::atomic::Ordering;

impl Rack {
    /// 从哈希环移除 region
    ///
    /// 返回 `true` 表示调用方可以立即解除映射。返回 `false` 时要么释放已被
    /// 推迟 (尾部置 `NEEDED`)，要么 region 根本未登记 (已上报诊断)。
    pub fn region_remove(&self, region: Region, trailer: &mut RegionTrailer) -> bool {
        let mut book = self.region_lock.lock();
        let mut deallocate_now = true;

        if trailer.dispose_flags.is_delayed() {
            trailer.dispose_flags.insert(DisposeFlags::NEEDED);
            deallocate_now = false;
            log_debug!("{} rack: disposal of {} delayed", self.size_class(), region);
        }

        match self.ring.remove(self.hashed_regions(), region) {
            Some(_) => {
                book.num_regions = book.num_regions.saturating_sub(1);
                book.num_tombstones += 1;
            }
            None => {
                self.sink.zone_error(&RackError::RegionNotFound { region });
                deallocate_now = false;
            }
        }

        if deallocate_now {
            self.num_regions_dealloc.fetch_add(1, Ordering::AcqRel);
        }
        deallocate_now
    }

    /// 完成之前推迟的释放
    ///
    /// 尾部置有 `NEEDED` 时在此解除映射并返回 `true`；否则只清除 `DELAY`，
    /// 表示压力周期结束而期间没有删除发生。同一 region 至多解除映射一次。
    pub fn region_maybe_dispose(
        &self,
        region: Region,
        region_size: usize,
        trailer: &mut RegionTrailer,
    ) -> bool {
        let _book = self.region_lock.lock();

        if trailer.dispose_flags.is_needed() {
            self.pages
                .deallocate_pages(region, region_size, self.debug_flags.fix_guard_page_flags());
            trailer
                .dispose_flags
                .remove(DisposeFlags::DELAY | DisposeFlags::NEEDED);
            self.num_regions_dealloc.fetch_add(1, Ordering::AcqRel);
            log_debug!("{} rack: delayed disposal of {} completed", self.size_class(), region);
            true
        } else {
            trailer.dispose_flags.remove(DisposeFlags::DELAY);
            false
        }
    }
}

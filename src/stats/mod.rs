//! 统计模块 - rack 状态快照与 Prometheus 导出

use crate::types::SizeClass;
use std::fmt::Write;

/// Rack 统计快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RackStats {
    pub size_class: SizeClass,
    pub live_regions: usize,
    /// 活动代中的墓碑数
    pub tombstones: usize,
    pub regions_dealloc: usize,
    /// 活动代容量
    pub capacity: usize,
    /// 重建次数 (扩容或原尺寸清除墓碑)
    pub generation_count: u64,
    /// 已退役但未释放的代缓冲数
    pub retired_buffers: usize,
    pub num_magazines: u32,
    pub magazine_pool_bytes: usize,
}

impl RackStats {
    /// 被占用槽位 (存活 + 墓碑) 占容量的比例
    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.live_regions + self.tombstones) as f64 / self.capacity as f64
        }
    }

    /// 负载因子
    pub fn load_factor(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.live_regions as f64 / self.capacity as f64
        }
    }

    /// 导出Prometheus格式指标
    pub fn export_prometheus(&self) -> String {
        let class = self.size_class.name();
        let mut output = String::new();

        let gauges: [(&str, &str, String); 9] = [
            ("rack_live_regions", "Live regions tracked by the rack", self.live_regions.to_string()),
            ("rack_hash_tombstones", "Tombstoned slots in the active generation", self.tombstones.to_string()),
            ("rack_regions_dealloc_total", "Regions deallocated", self.regions_dealloc.to_string()),
            ("rack_hash_capacity", "Active generation capacity", self.capacity.to_string()),
            ("rack_hash_load_factor", "Active generation load factor", format!("{:.4}", self.load_factor())),
            ("rack_generations_total", "Hash ring rebuild events", self.generation_count.to_string()),
            ("rack_retired_buffers", "Retired generation buffers kept alive", self.retired_buffers.to_string()),
            ("rack_magazines", "Thread magazines (excluding depot)", self.num_magazines.to_string()),
            ("rack_magazine_pool_bytes", "Bytes mapped for the magazine pool", self.magazine_pool_bytes.to_string()),
        ];

        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} gauge", name);
            let _ = writeln!(output, "{}{{size_class=\"{}\"}} {}", name, class, value);
        }
        output
    }
}

//! Rack 配置

use crate::{
    error::RackError,
    hash::INITIAL_NUM_REGIONS_SHIFT,
    memory::MAX_MAGAZINES,
    types::{DebugFlags, SizeClass},
};

/// Rack 配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RackConfig {
    pub size_class: SizeClass,
    /// 线程 magazine 个数，0 表示不建 magazine 池
    pub num_magazines: u32,
    pub debug_flags: DebugFlags,
    /// 初始代容量位数
    pub initial_capacity_shift: u32,
    /// region 对齐位数，决定哈希时丢弃的地址低位
    pub region_align_shift: u32,
}

impl RackConfig {
    /// 初始容量位数上限
    pub const MAX_INITIAL_CAPACITY_SHIFT: u32 = 24;

    /// 指定尺寸类别的默认配置
    pub fn for_size_class(size_class: SizeClass) -> Self {
        Self {
            size_class,
            num_magazines: 0,
            debug_flags: DebugFlags::empty(),
            initial_capacity_shift: INITIAL_NUM_REGIONS_SHIFT,
            region_align_shift: size_class.region_align_shift(),
        }
    }

    pub fn with_magazines(mut self, num_magazines: u32) -> Self {
        self.num_magazines = num_magazines;
        self
    }

    pub fn with_debug_flags(mut self, debug_flags: DebugFlags) -> Self {
        self.debug_flags = debug_flags;
        self
    }

    pub fn with_initial_capacity_shift(mut self, shift: u32) -> Self {
        self.initial_capacity_shift = shift;
        self
    }

    pub fn region_size(&self) -> usize {
        1usize << self.region_align_shift
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), RackError> {
        if self.num_magazines > MAX_MAGAZINES {
            return Err(RackError::InvalidConfig {
                reason: format!(
                    "num_magazines {} 超过上限 {}",
                    self.num_magazines, MAX_MAGAZINES
                ),
            });
        }
        if self.initial_capacity_shift == 0
            || self.initial_capacity_shift > Self::MAX_INITIAL_CAPACITY_SHIFT
        {
            return Err(RackError::InvalidConfig {
                reason: format!(
                    "initial_capacity_shift {} 不在 1..={} 范围内",
                    self.initial_capacity_shift,
                    Self::MAX_INITIAL_CAPACITY_SHIFT
                ),
            });
        }
        if !(12..=32).contains(&self.region_align_shift)
            || self.region_align_shift >= usize::BITS
        {
            return Err(RackError::InvalidConfig {
                reason: format!("region_align_shift {} 不在 12..=32 范围内", self.region_align_shift),
            });
        }
        Ok(())
    }
}

impl Default for RackConfig {
    fn default() -> Self {
        Self::for_size_class(SizeClass::Tiny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RackConfig::default();
        assert_eq!(config.size_class, SizeClass::Tiny);
        assert_eq!(config.region_size(), 1 << 20);
        assert_eq!(config.initial_capacity_shift, INITIAL_NUM_REGIONS_SHIFT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_size_class_alignment() {
        let config = RackConfig::for_size_class(SizeClass::Small);
        assert_eq!(config.region_align_shift, 23);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let too_many = RackConfig::default().with_magazines(MAX_MAGAZINES + 1);
        assert!(matches!(too_many.validate(), Err(RackError::InvalidConfig { .. })));

        let zero_capacity = RackConfig::default().with_initial_capacity_shift(0);
        assert!(zero_capacity.validate().is_err());

        let huge_capacity = RackConfig::default().with_initial_capacity_shift(40);
        assert!(huge_capacity.validate().is_err());

        let mut bad_align = RackConfig::default();
        bad_align.region_align_shift = 4;
        assert!(bad_align.validate().is_err());
    }

    #[test]
    fn test_max_magazines_allowed() {
        let config = RackConfig::default().with_magazines(MAX_MAGAZINES);
        assert!(config.validate().is_ok());
    }
}

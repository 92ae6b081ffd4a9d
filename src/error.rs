//! 统一错误处理 - 错误类型与诊断上报

use crate::types::Region;

/// Rack 子系统可能发生的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RackError {
    #[error("无法为 magazine 池映射内存 (大小: {size})")]
    MagazinePoolMappingFailed {
        size: usize,
    },

    #[error("哈希环中找不到 region: {region}")]
    RegionNotFound {
        region: Region,
    },

    #[error("页分配器无法提供 region (大小: {size})")]
    RegionAllocationFailed {
        size: usize,
    },

    #[error("无效配置: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

impl RackError {
    /// 获取错误恢复建议
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MagazinePoolMappingFailed { .. } => None,
            Self::RegionNotFound { .. } => Some("检查调用方是否重复释放或从未注册该 region"),
            Self::RegionAllocationFailed { .. } => Some("检查系统内存或减小 region 大小"),
            Self::InvalidConfig { .. } => Some("检查配置参数"),
        }
    }

    /// 判断错误是否可恢复
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// 分配器无法为自身簿记取得内存时不可继续运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MagazinePoolMappingFailed { .. })
    }
}

/// 诊断上报接口
///
/// `zone_error` 记录后继续运行；`fatal` 上报后终止，不返回。
pub trait DiagnosticSink: Send + Sync {
    /// 可恢复诊断
    fn zone_error(&self, err: &RackError);

    /// 致命错误
    fn fatal(&self, err: &RackError) -> !;
}

/// 默认上报器：写日志，致命错误时中止进程
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn zone_error(&self, err: &RackError) {
        log_error!("malloc zone error: {}", err);
        let _ = err;
    }

    fn fatal(&self, err: &RackError) -> ! {
        log_error!("fatal: {}", err);
        eprintln!("magazine_rack: fatal: {}", err);
        std::process::abort()
    }
}

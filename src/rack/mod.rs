//! Rack 模块 - 单一尺寸类别的 region 注册表与 magazine 池协调者

pub mod config;
mod dispose;
#[allow(clippy::module_inception)]
pub mod rack;

pub use config::RackConfig;
pub use rack::{process_entropy, Rack};

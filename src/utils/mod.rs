//! # 常用接口模块
//!
//! 本模块提供日志初始化等与具体算法无关的操作接口

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};


/// 未设置`RUST_LOG`时的日志级别
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// 安装全局的`tracing`订阅者：按`RUST_LOG`过滤（缺省为`info`），输出到终端。
/// 已安装过时不做任何事并返回`false`
pub fn init_logging() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器（RUST_LOG 优先，默认 info）；已安装时忽略
pub fn init() {
    if let Err(e) = try_init("info") {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

/// 以给定的默认过滤规则安装订阅器；RUST_LOG 存在时以其为准
pub fn try_init(default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
}

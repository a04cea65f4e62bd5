//! 日志初始化
//!
//! 库本身只使用 `tracing` 宏，订阅者由二进制入口安装。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::env::{core, EnvVar};

/// 安装全局 tracing 订阅者
///
/// 优先使用 `RUST_LOG`，其次 `OCTORU_LOG_LEVEL`，最后回落到 `info`。
/// 重复调用时保留第一次安装的订阅者。
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = core::LogLevel::get().unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });
    let ansi = !core::NoColor::get().unwrap_or(false);

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter),
        )
        .try_init();

    if installed.is_ok() {
        tracing::debug!("日志系统已初始化");
    }
}

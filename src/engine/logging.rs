//! ### English
//! Logger installation for hosts that do not bring their own `log` backend.
//!
//! ### 中文
//! 为未自带 `log` 后端的宿主安装日志器。

use std::sync::Once;

/// ### English
/// Logger configuration. `env_filter` uses `env_logger` filter syntax
/// (e.g. `"info"`, `"mt_canvas_render=trace"`).
///
/// ### 中文
/// 日志配置。`env_filter` 使用 `env_logger` 过滤语法
/// （例如 `"info"`、`"mt_canvas_render=trace"`）。
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

static INIT: Once = Once::new();

/// ### English
/// Installs an `env_logger` backend once per process; later calls are ignored.
/// Filter precedence: `config.env_filter`, then `RUST_LOG`, then `info`.
///
/// ### 中文
/// 每个进程只安装一次 `env_logger` 后端；之后的调用被忽略。
/// 过滤优先级：`config.env_filter`，其次 `RUST_LOG`，最后 `info`。
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }
        builder.write_style(config.write_style);

        if builder.try_init().is_err() {
            // Host already installed a logger.
            return;
        }
        log::debug!("logging initialized");
    });
}

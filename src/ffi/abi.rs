//! ### English
//! C ABI bindings for process-wide setup.
//!
//! ### 中文
//! 进程级初始化相关的 C ABI 绑定。

use std::ffi::{CStr, c_char};

use crate::engine::global;
use crate::engine::logging::{LoggingConfig, init_logging};

#[unsafe(no_mangle)]
/// ### English
/// Returns the C ABI version.
///
/// ### 中文
/// 返回 C ABI 版本号。
pub extern "C" fn mtcr_abi_version() -> u32 {
    super::MTCR_ABI_VERSION
}

#[unsafe(no_mangle)]
/// ### English
/// Installs the built-in `env_logger` backend (once per process).
///
/// `filter` is an optional NUL-terminated UTF-8 string in `env_logger` syntax. NULL, empty or
/// invalid UTF-8 falls back to `RUST_LOG`, then `info`.
///
/// ### 中文
/// 安装内置的 `env_logger` 后端（每个进程一次）。
///
/// `filter` 为可选的 NUL 结尾 UTF-8 字符串，使用 `env_logger` 语法。
/// NULL、空字符串或非法 UTF-8 时回退到 `RUST_LOG`，再回退到 `info`。
pub unsafe extern "C" fn mtcr_init_logging(filter: *const c_char) {
    let env_filter = if filter.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(filter) }
            .to_str()
            .ok()
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    init_logging(LoggingConfig {
        env_filter,
        ..LoggingConfig::default()
    });
}

#[unsafe(no_mangle)]
/// ### English
/// Records the calling thread as the GL thread. Idempotent; `mtcr_init` calls it implicitly.
///
/// ### 中文
/// 将调用线程记录为 GL 线程。幂等；`mtcr_init` 会隐式调用它。
pub extern "C" fn mtcr_glob_init() {
    global::ensure_initialized();
}

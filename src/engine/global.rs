//! ### English
//! Process-wide state: which thread owns the presenting GL context.
//!
//! ### 中文
//! 进程级状态：记录持有呈现 GL 上下文的线程。

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

static GL_THREAD: OnceLock<ThreadId> = OnceLock::new();

/// ### English
/// Idempotent process initialization. The first caller's thread is recorded as the GL thread;
/// later calls (from any thread) are no-ops.
///
/// ### 中文
/// 幂等的进程初始化。首个调用者的线程被记录为 GL 线程；之后（任何线程的）调用均无操作。
pub fn ensure_initialized() {
    GL_THREAD.get_or_init(|| {
        let id = thread::current().id();
        log::debug!("mt-canvas-render initialized; GL thread {id:?}");
        id
    });
}

/// ### English
/// The recorded GL thread, if `ensure_initialized` has run.
///
/// ### 中文
/// 已记录的 GL 线程（若 `ensure_initialized` 已执行）。
pub fn gl_thread() -> Option<ThreadId> {
    GL_THREAD.get().copied()
}

/// ### English
/// `false` only when initialization happened and the caller is on a different thread.
///
/// ### 中文
/// 仅当已初始化且调用者位于其他线程时返回 `false`。
pub(crate) fn on_gl_thread() -> bool {
    gl_thread().is_none_or(|id| id == thread::current().id())
}

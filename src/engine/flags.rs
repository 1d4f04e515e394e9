//! ### English
//! Bitflags controlling optional renderer behaviors.
//!
//! These are passed through the C ABI as a `u32` bitmask.
//!
//! ### 中文
//! 控制渲染器可选行为的位标志（bitflags）。
//!
//! 通过 C ABI 以 `u32` 位掩码传入。

/// ### English
/// Run without a background thread: every frame request renders synchronously on the caller.
///
/// ### 中文
/// 不启动后台线程：每次出帧请求都在调用线程上同步渲染。
pub const MTCR_FLAG_FOREGROUND: u32 = 1 << 0;

/// ### English
/// Never use persistently mapped transfer buffers, even when the driver supports them.
///
/// ### 中文
/// 即使驱动支持，也不使用持久映射的传输缓冲。
pub const MTCR_FLAG_NO_COHERENT: u32 = 1 << 1;

/// ### English
/// Prefer persistently mapped transfer buffers. Ignored when `MTCR_FLAG_NO_COHERENT` is set or
/// the context lacks buffer storage support.
///
/// ### 中文
/// 优先使用持久映射的传输缓冲。若设置了 `MTCR_FLAG_NO_COHERENT` 或上下文不支持 buffer storage，
/// 则忽略该标志。
pub const MTCR_FLAG_FORCE_COHERENT: u32 = 1 << 2;

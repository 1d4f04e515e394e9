//! ### English
//! Spin, then yield, then sleep backoff for short bounded waits.
//!
//! - Spin briefly to cover gaps of a few hundred nanoseconds.
//! - Yield after the spin budget to avoid burning CPU on oversubscribed systems.
//! - Sleep once yielding has not helped (e.g. waiting on a GPU fence owned by another thread).
//!
//! ### 中文
//! “短自旋 + 让出调度 + 睡眠”的退避工具，用于短时有界等待。
//!
//! - 先短暂自旋，覆盖数百纳秒级的短间隙；
//! - 超过自旋预算后调用 `yield`，避免在 CPU 过载时空转占满；
//! - 让出调度仍无进展时改为睡眠（例如等待其他线程持有的 GPU fence）。

use std::thread;
use std::time::Duration;

/// ### English
/// Spin budget before switching to `yield_now()`.
///
/// ### 中文
/// 在切换到 `yield_now()` 之前允许的自旋次数预算。
const SPIN_LIMIT: u32 = 64;

/// ### English
/// Step count after which each snooze sleeps instead of yielding.
///
/// ### 中文
/// 超过该步数后，每次退避改为睡眠而非让出调度。
const YIELD_LIMIT: u32 = SPIN_LIMIT + 64;

const SLEEP: Duration = Duration::from_micros(100);

pub(crate) struct Backoff {
    steps: u32,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { steps: 0 }
    }

    /// ### English
    /// Performs one backoff step.
    ///
    /// ### 中文
    /// 执行一次退避步骤。
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.steps < SPIN_LIMIT {
            std::hint::spin_loop();
        } else if self.steps < YIELD_LIMIT {
            thread::yield_now();
        } else {
            thread::sleep(SLEEP);
        }
        self.steps = self.steps.saturating_add(1);
    }
}

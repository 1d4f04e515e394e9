//! ### English
//! Background render thread.
//!
//! ### 中文
//! 后台渲染线程。

use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::shared::RendererShared;

/// ### English
/// Spawns the render thread for `shared`.
///
/// ### 中文
/// 为 `shared` 启动渲染线程。
pub(super) fn spawn(shared: &Arc<RendererShared>) -> std::io::Result<thread::JoinHandle<()>> {
    let shared = shared.clone();
    thread::Builder::new()
        .name(format!("MtcrRender-{}", shared.id))
        .spawn(move || run(shared))
}

/// ### English
/// Worker main loop.
///
/// Sleeps until the next frame deadline (derived from the last frame and the current rate, so
/// slow frames do not accumulate drift and rate changes apply immediately), an on-demand
/// request, or shutdown. Shutdown is checked at the loop head, never mid-frame.
///
/// #### Parameters
/// - `shared`: State shared with the renderer handle and the uploader.
///
/// ### 中文
/// 工作线程主循环。
///
/// 睡眠直到下一帧截止时间（由上一帧时间与当前帧率推导，因此慢帧不会累积漂移，帧率变化立即生效）、
/// 按需请求或关闭信号。关闭只在循环开头检查，不会在帧中途退出。
///
/// #### 参数
/// - `shared`：与渲染器句柄和上传器共享的状态。
fn run(shared: Arc<RendererShared>) {
    log::debug!("render thread for renderer {} started", shared.id);
    let mut last_frame = Instant::now();
    let mut state = shared.state();

    loop {
        if state.shutdown {
            break;
        }

        let on_demand = state.requested || state.passes_started < state.demand_through;
        if !on_demand {
            if state.fps > 0.0 {
                let deadline = last_frame + Duration::from_secs_f64(1.0 / state.fps);
                let now = Instant::now();
                if now < deadline {
                    state = shared
                        .wake
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    continue;
                }
            } else {
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
        }

        state.requested = false;
        drop(state);

        last_frame = Instant::now();
        shared.produce_frame();

        state = shared.state();
    }

    drop(state);
    log::debug!("render thread for renderer {} stopped", shared.id);
}

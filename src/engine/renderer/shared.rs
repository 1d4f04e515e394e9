//! ### English
//! State shared between a renderer handle, its worker thread and the uploader thread.
//!
//! ### 中文
//! 渲染器句柄、其工作线程与上传线程之间共享的状态。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use dpi::PhysicalSize;

use crate::engine::renderable::{PreviousFrame, Renderable};
use crate::engine::ring::SurfaceRing;
use crate::engine::surface::{RenderSurface, TransferStrategy};
use crate::engine::uploader::Uploader;

static NEXT_RENDERER_ID: AtomicU64 = AtomicU64::new(1);

/// ### English
/// Everything guarded by the instance lock.
///
/// ### 中文
/// 由实例锁保护的全部状态。
pub(crate) struct WorkerState {
    /// ### English
    /// Target frames per second; `0.0` = on demand only.
    ///
    /// ### 中文
    /// 目标帧率；`0.0` 表示仅按需渲染。
    pub(crate) fps: f64,
    pub(crate) shutdown: bool,
    /// ### English
    /// A non-blocking `once` is pending.
    ///
    /// ### 中文
    /// 存在一个待处理的非阻塞 `once` 请求。
    pub(crate) requested: bool,
    /// ### English
    /// Render on demand until `passes_started` reaches this value (`once_wait` targets).
    ///
    /// ### 中文
    /// 按需渲染，直到 `passes_started` 达到该值（`once_wait` 的目标）。
    pub(crate) demand_through: u64,
    pub(crate) passes_started: u64,
    pub(crate) passes_completed: u64,
    /// ### English
    /// Bumped whenever the worker thread is stopped; releases `once_wait` callers whose pass
    /// will never run.
    ///
    /// ### 中文
    /// 每次停止工作线程时递增；用于释放其出帧永远不会执行的 `once_wait` 调用者。
    pub(crate) epoch: u64,
    pub(crate) ring: SurfaceRing,
    pub(crate) uploader: Option<Uploader>,
}

pub(crate) struct RendererShared {
    pub(crate) id: u64,
    pub(crate) size: PhysicalSize<u32>,
    strategy: Box<dyn TransferStrategy>,
    slots: Box<[Mutex<RenderSurface>]>,
    renderable: Mutex<Box<dyn Renderable>>,
    state: Mutex<WorkerState>,
    /// ### English
    /// Wakes the worker thread (frame request, rate change, shutdown).
    ///
    /// ### 中文
    /// 唤醒工作线程（出帧请求、帧率变化、关闭）。
    pub(crate) wake: Condvar,
    /// ### English
    /// Broadcast after every completed pass.
    ///
    /// ### 中文
    /// 每完成一次出帧后广播。
    pub(crate) render_done: Condvar,
}

impl RendererShared {
    pub(crate) fn new(
        size: PhysicalSize<u32>,
        fps: f64,
        strategy: Box<dyn TransferStrategy>,
        surfaces: Vec<RenderSurface>,
        renderable: Box<dyn Renderable>,
    ) -> Self {
        let ring = SurfaceRing::new(surfaces.len());
        Self {
            id: NEXT_RENDERER_ID.fetch_add(1, Ordering::Relaxed),
            size,
            strategy,
            slots: surfaces.into_iter().map(Mutex::new).collect(),
            renderable: Mutex::new(renderable),
            state: Mutex::new(WorkerState {
                fps,
                shutdown: false,
                requested: false,
                demand_through: 0,
                passes_started: 0,
                passes_completed: 0,
                epoch: 0,
                ring,
                uploader: None,
            }),
            wake: Condvar::new(),
            render_done: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn slot(&self, index: usize) -> MutexGuard<'_, RenderSurface> {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn slots(&self) -> &[Mutex<RenderSurface>] {
        &self.slots
    }

    pub(crate) fn strategy(&self) -> &dyn TransferStrategy {
        &*self.strategy
    }

    /// ### English
    /// The renderable lock doubles as the production lock: at most one pass runs at a time.
    ///
    /// ### 中文
    /// renderable 锁同时作为出帧锁：任意时刻最多只有一次出帧在执行。
    pub(crate) fn renderable(&self) -> MutexGuard<'_, Box<dyn Renderable>> {
        self.renderable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Runs one full pass: render into the producing slot, then either hand it to the uploader
    /// and wait for that transfer, or publish it directly.
    ///
    /// ### 中文
    /// 执行一次完整出帧：渲染到生产槽位，然后交给上传器并等待该次传输完成，或直接发布。
    pub(crate) fn produce_frame(self: &Arc<Self>) {
        let mut renderable = self.renderable();

        let (producing, previous, uploader) = {
            let mut state = self.state();
            state.passes_started += 1;
            (
                state.ring.producing(),
                state.ring.last_published(),
                state.uploader.clone(),
            )
        };
        let previous = PreviousFrame::new(self, previous);
        {
            let mut slot = self.slot(producing);
            renderable.render_with_previous(
                slot.canvas_mut(),
                &previous,
                self.size.width,
                self.size.height,
            );
            slot.mark_rendered();
        }
        drop(previous);
        log::trace!("renderer {} rendered slot {producing}", self.id);

        if let Some(uploader) = uploader {
            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            uploader.submit(self.clone(), done_tx);
            drop(uploader);
            if done_rx.recv().is_ok() {
                return;
            }
            log::debug!(
                "renderer {}: upload request dropped; publishing locally",
                self.id
            );
        }
        self.complete_production(producing);
    }

    /// ### English
    /// Publishes the producing slot and wakes every `once_wait` caller.
    ///
    /// ### 中文
    /// 发布生产槽位并唤醒所有 `once_wait` 调用者。
    pub(crate) fn complete_production(&self, slot: usize) {
        {
            let mut state = self.state();
            debug_assert_eq!(state.ring.producing(), slot);
            state.ring.advance_after_production();
            state.passes_completed += 1;
        }
        self.render_done.notify_all();
    }
}

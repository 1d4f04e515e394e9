//! ### English
//! Shared upload thread: stages dirty surfaces of any number of renderers through one GPU
//! context and publishes each frame once its fence signals.
//!
//! ### 中文
//! 共享上传线程：通过同一个 GPU 上下文为任意数量的渲染器暂存脏表面，
//! 并在各自的 fence 触发后发布帧。

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::error::RenderError;
use super::gpu::{FenceId, FenceStatus, GpuBackend};
use super::lockfree::Backoff;
use super::renderer::RendererShared;

/// ### English
/// Bounded wait on the oldest fence between queue checks.
///
/// ### 中文
/// 两次队列检查之间对最旧 fence 的有界等待时长。
const FENCE_POLL_TIMEOUT: Duration = Duration::from_micros(500);

/// ### English
/// One renderer asking for its producing surface to be transferred. `done` fires after the
/// renderer's ring has been advanced.
///
/// ### 中文
/// 某个渲染器请求传输其生产表面。`done` 在该渲染器的环推进之后触发。
struct UploadRequest {
    renderer: Arc<RendererShared>,
    done: Sender<()>,
}

struct InFlight {
    request: UploadRequest,
    slot: usize,
    fence: Option<FenceId>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<UploadRequest>,
    /// ### English
    /// Renderer ids taken off `pending` whose transfer has not completed yet.
    ///
    /// ### 中文
    /// 已从 `pending` 取出但传输尚未完成的渲染器 id。
    busy: Vec<u64>,
    shutdown: bool,
}

#[derive(Default)]
struct UploadQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl UploadQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct UploaderInner {
    queue: Arc<UploadQueue>,
    gpu: Arc<dyn GpuBackend>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for UploaderInner {
    /// ### English
    /// Last handle gone: stop the thread once its queue is empty and join it (unless dropped on
    /// the upload thread itself).
    ///
    /// ### 中文
    /// 最后一个句柄被释放：在队列清空后停止线程并 join（若在上传线程自身上 drop 则不 join）。
    fn drop(&mut self) {
        self.queue.lock().shutdown = true;
        self.queue.wake.notify_all();
        if let Some(join) = self.thread.take()
            && thread::current().id() != join.thread().id()
        {
            let _ = join.join();
        }
    }
}

/// ### English
/// Reference-counted handle to a shared upload thread. Clone it into every renderer that should
/// use it; the thread exits when the last clone is dropped.
///
/// ### 中文
/// 共享上传线程的引用计数句柄。将其克隆给每个需要使用它的渲染器；最后一个克隆被释放时线程退出。
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

impl Uploader {
    /// ### English
    /// Spawns the upload thread. `gpu` must be bound to a context sharing objects with every
    /// presenting context; its `make_current` runs first on the new thread.
    ///
    /// ### 中文
    /// 启动上传线程。`gpu` 必须绑定到与所有呈现上下文共享对象的上下文；其 `make_current`
    /// 会首先在新线程上执行。
    pub fn new(gpu: Arc<dyn GpuBackend>) -> Result<Self, RenderError> {
        let queue = Arc::new(UploadQueue::default());
        let queue_for_thread = queue.clone();
        let gpu_for_thread = gpu.clone();
        let thread = thread::Builder::new()
            .name("MtcrUploader".to_string())
            .spawn(move || run_uploader(queue_for_thread, gpu_for_thread))?;

        Ok(Self {
            inner: Arc::new(UploaderInner {
                queue,
                gpu,
                thread: Some(thread),
            }),
        })
    }

    pub fn ptr_eq(&self, other: &Uploader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// ### English
    /// Backend the upload thread creates surface objects with. Objects it created must be deleted
    /// through it.
    ///
    /// ### 中文
    /// 上传线程创建表面对象所用的后端。由它创建的对象必须通过它删除。
    pub(crate) fn gpu(&self) -> &Arc<dyn GpuBackend> {
        &self.inner.gpu
    }

    /// ### English
    /// Number of renderers whose request is queued or in flight.
    ///
    /// ### 中文
    /// 请求处于排队或传输中的渲染器数量。
    pub fn outstanding(&self) -> usize {
        let state = self.inner.queue.lock();
        state.pending.len() + state.busy.len()
    }

    /// ### English
    /// Queues `renderer`'s producing surface. Must not be called with the renderer lock held.
    ///
    /// ### 中文
    /// 将 `renderer` 的生产表面加入队列。调用时不得持有渲染器锁。
    pub(crate) fn submit(&self, renderer: Arc<RendererShared>, done: Sender<()>) {
        let queue = &self.inner.queue;
        {
            let mut state = queue.lock();
            debug_assert!(
                !state.pending.iter().any(|r| r.renderer.id == renderer.id),
                "renderer {} queued twice",
                renderer.id
            );
            state.pending.push_back(UploadRequest { renderer, done });
        }
        queue.wake.notify_one();
    }

    /// ### English
    /// Drops queued requests of renderer `renderer_id`, then waits until its in-flight transfer
    /// (if any) completes. Other renderers' work is not waited for.
    ///
    /// ### 中文
    /// 丢弃渲染器 `renderer_id` 排队中的请求，然后等待其正在进行的传输（若有）完成。
    /// 不会等待其他渲染器的工作。
    pub(crate) fn detach(&self, renderer_id: u64) {
        let dropped: Vec<UploadRequest> = {
            let mut state = self.inner.queue.lock();
            let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|request| request.renderer.id == renderer_id);
            state.pending = kept.into();
            dropped
        };
        if !dropped.is_empty() {
            log::debug!(
                "renderer {renderer_id}: dropped {} queued upload(s)",
                dropped.len()
            );
        }
        drop(dropped);

        let mut backoff = Backoff::new();
        while self.inner.queue.lock().busy.contains(&renderer_id) {
            backoff.snooze();
        }
    }
}

/// ### English
/// Upload thread main loop.
///
/// #### Parameters
/// - `queue`: Work queue shared with every `Uploader` handle.
/// - `gpu`: Backend of the upload context.
///
/// ### 中文
/// 上传线程主循环。
///
/// #### 参数
/// - `queue`：与所有 `Uploader` 句柄共享的工作队列。
/// - `gpu`：上传上下文的后端。
fn run_uploader(queue: Arc<UploadQueue>, gpu: Arc<dyn GpuBackend>) {
    gpu.make_current();
    log::debug!("upload thread started");

    let mut in_flight: VecDeque<InFlight> = VecDeque::new();
    loop {
        let incoming: Vec<UploadRequest> = {
            let mut state = queue.lock();
            while state.pending.is_empty() && in_flight.is_empty() && !state.shutdown {
                state = queue
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if state.shutdown && state.pending.is_empty() && in_flight.is_empty() {
                break;
            }
            let incoming: Vec<UploadRequest> = state.pending.drain(..).collect();
            state.busy.extend(incoming.iter().map(|request| request.renderer.id));
            incoming
        };

        for request in incoming {
            in_flight.push_back(stage_request(&*gpu, request));
        }

        let Some(oldest) = in_flight.front() else {
            continue;
        };
        let signaled = match oldest.fence {
            Some(fence) => gpu.wait_fence(fence, FENCE_POLL_TIMEOUT) == FenceStatus::Signaled,
            None => true,
        };
        if signaled && let Some(job) = in_flight.pop_front() {
            complete_request(&*gpu, &queue, job);
        }
    }

    log::debug!("upload thread stopped");
}

/// ### English
/// Allocates (if needed) and stages the renderer's producing surface, then fences the copy.
///
/// ### 中文
/// 按需分配并暂存渲染器的生产表面，然后为该拷贝插入 fence。
fn stage_request(gpu: &dyn GpuBackend, request: UploadRequest) -> InFlight {
    let renderer = &request.renderer;
    let slot_index = renderer.state().ring.producing();
    let mut slot = renderer.slot(slot_index);

    let fence = match slot.allocate_gpu_resources(gpu, renderer.strategy()) {
        Ok(()) => {
            slot.stage_transfer(gpu, renderer.strategy());
            match gpu.insert_fence() {
                Ok(fence) => Some(fence),
                Err(err) => {
                    log::debug!("{err}; publishing renderer {} unfenced", renderer.id);
                    None
                }
            }
        }
        Err(err) => {
            log::warn!(
                "renderer {}: cannot allocate surface {slot_index} for upload: {err}",
                renderer.id
            );
            None
        }
    };
    gpu.flush();
    slot.set_fence(fence);
    log::trace!("renderer {} slot {slot_index} staged", renderer.id);
    drop(slot);

    InFlight {
        request,
        slot: slot_index,
        fence,
    }
}

/// ### English
/// Publishes a finished transfer: clear dirty, advance the ring, wake waiters, free the renderer.
///
/// ### 中文
/// 发布已完成的传输：清除脏标记、推进环、唤醒等待者、释放渲染器占用。
fn complete_request(gpu: &dyn GpuBackend, queue: &UploadQueue, job: InFlight) {
    let renderer = &job.request.renderer;
    {
        let mut slot = renderer.slot(job.slot);
        if let Some(fence) = slot.take_fence() {
            gpu.delete_fence(fence);
        }
        slot.clear_dirty();
    }
    renderer.complete_production(job.slot);
    let _ = job.request.done.send(());

    let id = renderer.id;
    {
        let mut state = queue.lock();
        if let Some(position) = state.busy.iter().position(|&busy| busy == id) {
            state.busy.swap_remove(position);
        }
    }
    drop(job);
}

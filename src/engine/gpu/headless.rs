//! ### English
//! In-memory `GpuBackend` used without a GL context (tests, CI, headless hosts).
//!
//! ### 中文
//! 无需 GL 上下文的内存 `GpuBackend`（用于测试、CI 与无头宿主）。

use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::{
    BufferId, BufferMode, FenceId, FenceStatus, GpuBackend, GpuError, PixelLayout, QuadDraw,
    QuadId, QuadVertex, TextureId,
};

/// ### English
/// Snapshot of live objects and call counters.
///
/// ### 中文
/// 存活对象与调用计数的快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub live_textures: usize,
    pub live_buffers: usize,
    pub live_fences: usize,
    pub live_quads: usize,
    /// ### English
    /// Texture images specified from a transfer buffer.
    ///
    /// ### 中文
    /// 由传输缓冲指定的纹理图像次数。
    pub buffer_applies: usize,
    /// ### English
    /// Texture images specified straight from client memory.
    ///
    /// ### 中文
    /// 直接由客户端内存指定的纹理图像次数。
    pub direct_uploads: usize,
    pub quad_updates: usize,
    pub draws: usize,
}

#[derive(Default)]
struct HeadlessState {
    next_name: u32,
    next_fence: u64,
    coherent: bool,
    fail_mapping: bool,
    fail_coherent_mapping: bool,
    fence_latency: Duration,
    textures: HashMap<u32, Vec<u8>>,
    buffers: HashMap<u32, Vec<u8>>,
    fences: HashMap<u64, Instant>,
    quads: HashMap<u32, [QuadVertex; 4]>,
    last_draw: Option<(TextureId, QuadDraw)>,
    stats: HeadlessStats,
}

impl HeadlessState {
    fn name(&mut self) -> NonZeroU32 {
        self.next_name = self.next_name.wrapping_add(1).max(1);
        NonZeroU32::new(self.next_name).unwrap_or(NonZeroU32::MIN)
    }

    fn refresh_live_counts(&mut self) {
        self.stats.live_textures = self.textures.len();
        self.stats.live_buffers = self.buffers.len();
        self.stats.live_fences = self.fences.len();
        self.stats.live_quads = self.quads.len();
    }
}

/// ### English
/// Shared in-memory GPU. Clones observe the same objects, so a test can keep one handle for
/// inspection while the pipeline owns another.
///
/// Texture contents are stored tightly packed (stride padding removed).
///
/// ### 中文
/// 共享的内存 GPU。克隆体观察同一组对象，因此测试可以保留一个句柄用于检查，而流水线持有另一个。
///
/// 纹理内容以紧凑形式存储（去除跨度填充）。
#[derive(Clone, Default)]
pub struct HeadlessGpu {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Advertises persistently mapped transfer buffers.
    ///
    /// ### 中文
    /// 声明支持持久映射的传输缓冲。
    pub fn with_coherent_mapping(self, coherent: bool) -> Self {
        self.lock().coherent = coherent;
        self
    }

    /// ### English
    /// Fences signal only after `latency` has elapsed since insertion.
    ///
    /// ### 中文
    /// fence 在插入后经过 `latency` 才会变为已触发。
    pub fn with_fence_latency(self, latency: Duration) -> Self {
        self.lock().fence_latency = latency;
        self
    }

    /// ### English
    /// Makes every stream-buffer mapping fail, forcing the synchronous fallback.
    ///
    /// ### 中文
    /// 使所有流式缓冲映射失败，强制走同步回退路径。
    pub fn set_fail_mapping(&self, fail: bool) {
        self.lock().fail_mapping = fail;
    }

    /// ### English
    /// Makes creating a coherent buffer fail as if its persistent mapping were refused.
    ///
    /// ### 中文
    /// 使一致映射缓冲的创建失败，模拟持久映射被拒绝。
    pub fn set_fail_coherent_mapping(&self, fail: bool) {
        self.lock().fail_coherent_mapping = fail;
    }

    pub fn stats(&self) -> HeadlessStats {
        let mut state = self.lock();
        state.refresh_live_counts();
        state.stats
    }

    /// ### English
    /// Current texture contents, or `None` if the texture has no image yet.
    ///
    /// ### 中文
    /// 纹理当前内容；尚未指定图像时返回 `None`。
    pub fn texture_pixels(&self, texture: TextureId) -> Option<Vec<u8>> {
        self.lock()
            .textures
            .get(&texture.get())
            .filter(|pixels| !pixels.is_empty())
            .cloned()
    }

    pub fn quad_vertices(&self, quad: QuadId) -> Option<[QuadVertex; 4]> {
        self.lock().quads.get(&quad.0.get()).copied()
    }

    pub fn last_draw(&self) -> Option<(TextureId, QuadDraw)> {
        self.lock().last_draw
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pack(layout: &PixelLayout, bytes: &[u8]) -> Vec<u8> {
        let row = layout.size.width as usize * layout.format.bytes_per_pixel();
        bytes
            .chunks(layout.stride)
            .take(layout.size.height as usize)
            .flat_map(|line| &line[..row])
            .copied()
            .collect()
    }
}

impl GpuBackend for HeadlessGpu {
    fn supports_coherent_mapping(&self) -> bool {
        self.lock().coherent
    }

    fn create_texture(&self, _layout: &PixelLayout) -> Result<TextureId, GpuError> {
        let mut state = self.lock();
        let name = state.name();
        state.textures.insert(name.get(), Vec::new());
        Ok(TextureId(name))
    }

    fn delete_texture(&self, texture: TextureId) {
        self.lock().textures.remove(&texture.get());
    }

    fn create_transfer_buffer(&self, len: usize, mode: BufferMode) -> Result<BufferId, GpuError> {
        let mut state = self.lock();
        if mode == BufferMode::Coherent && state.fail_coherent_mapping {
            return Err(GpuError::MapFailed);
        }
        let name = state.name();
        state.buffers.insert(name.get(), vec![0; len]);
        Ok(BufferId(name))
    }

    fn delete_transfer_buffer(&self, buffer: BufferId, _mode: BufferMode) {
        self.lock().buffers.remove(&buffer.0.get());
    }

    fn write_transfer_buffer(
        &self,
        buffer: BufferId,
        mode: BufferMode,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        let mut state = self.lock();
        if mode == BufferMode::Stream && state.fail_mapping {
            return Err(GpuError::MapFailed);
        }
        let storage = state
            .buffers
            .get_mut(&buffer.0.get())
            .ok_or(GpuError::MapFailed)?;
        storage.clear();
        storage.extend_from_slice(bytes);
        Ok(())
    }

    fn texture_from_buffer(&self, texture: TextureId, buffer: BufferId, layout: &PixelLayout) {
        let mut state = self.lock();
        let Some(bytes) = state.buffers.get(&buffer.0.get()) else {
            return;
        };
        let packed = Self::pack(layout, bytes);
        state.textures.insert(texture.get(), packed);
        state.stats.buffer_applies += 1;
    }

    fn texture_from_bytes(&self, texture: TextureId, layout: &PixelLayout, bytes: &[u8]) {
        let packed = Self::pack(layout, bytes);
        let mut state = self.lock();
        state.textures.insert(texture.get(), packed);
        state.stats.direct_uploads += 1;
    }

    fn insert_fence(&self) -> Result<FenceId, GpuError> {
        let mut state = self.lock();
        state.next_fence += 1;
        let id = NonZeroU64::new(state.next_fence).ok_or(GpuError::FenceUnavailable)?;
        let ready_at = Instant::now() + state.fence_latency;
        state.fences.insert(id.get(), ready_at);
        Ok(FenceId(id))
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> FenceStatus {
        let Some(ready_at) = self.lock().fences.get(&fence.0.get()).copied() else {
            return FenceStatus::Signaled;
        };
        let remaining = ready_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return FenceStatus::Signaled;
        }
        if remaining <= timeout {
            thread::sleep(remaining);
            return FenceStatus::Signaled;
        }
        thread::sleep(timeout);
        FenceStatus::TimedOut
    }

    fn delete_fence(&self, fence: FenceId) {
        self.lock().fences.remove(&fence.0.get());
    }

    fn flush(&self) {}

    fn create_quad(&self) -> Result<QuadId, GpuError> {
        let mut state = self.lock();
        let name = state.name();
        state.quads.insert(name.get(), [QuadVertex::default(); 4]);
        Ok(QuadId(name))
    }

    fn update_quad(&self, quad: QuadId, vertices: &[QuadVertex; 4]) {
        let mut state = self.lock();
        if let Some(stored) = state.quads.get_mut(&quad.0.get()) {
            *stored = *vertices;
            state.stats.quad_updates += 1;
        }
    }

    fn delete_quad(&self, quad: QuadId) {
        self.lock().quads.remove(&quad.0.get());
    }

    fn draw_quad(&self, _quad: QuadId, texture: TextureId, draw: &QuadDraw) {
        let mut state = self.lock();
        state.last_draw = Some((texture, *draw));
        state.stats.draws += 1;
    }
}

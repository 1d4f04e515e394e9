//! ### English
//! One ring slot: a CPU canvas plus the GPU texture and transfer buffer mirroring it.
//!
//! ### 中文
//! 环中的一个槽位：CPU 画布及其对应的 GPU 纹理与传输缓冲。

mod transfer;

pub use transfer::{CoherentTransfer, OrphanedTransfer, TransferStrategy, select_strategy};

use dpi::PhysicalSize;

use super::canvas::{Canvas, CanvasFormat};
use super::gpu::{BufferId, FenceId, GpuBackend, GpuError, PixelLayout, TextureId};

/// ### English
/// How `stage_transfer` delivered the pixels.
///
/// ### 中文
/// `stage_transfer` 交付像素的方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagePath {
    /// ### English
    /// Bytes are in the transfer buffer; `apply_transfer` still has to run.
    ///
    /// ### 中文
    /// 字节已在传输缓冲中；仍需执行 `apply_transfer`。
    Staged,
    /// ### English
    /// Mapping failed; the texture was specified synchronously from the canvas.
    ///
    /// ### 中文
    /// 映射失败；纹理已由画布同步指定。
    Direct,
}

pub struct RenderSurface {
    canvas: Canvas,
    /// ### English
    /// The canvas holds pixels not yet handed to the GPU.
    ///
    /// ### 中文
    /// 画布中存在尚未交给 GPU 的像素。
    dirty: bool,
    /// ### English
    /// The texture image matches the last staged pixels.
    ///
    /// ### 中文
    /// 纹理图像与最近一次暂存的像素一致。
    gpu_ready: bool,
    /// ### English
    /// The transfer buffer holds a complete image that `apply_transfer` may consume.
    ///
    /// ### 中文
    /// 传输缓冲中存有可供 `apply_transfer` 使用的完整图像。
    staged: bool,
    /// ### English
    /// The transfer buffer could not be created; pixels go straight to the texture until the
    /// surface's GPU objects are released.
    ///
    /// ### 中文
    /// 无法创建传输缓冲；在释放该表面的 GPU 对象之前，像素直接上传到纹理。
    direct_only: bool,
    texture: Option<TextureId>,
    transfer_buffer: Option<BufferId>,
    fence: Option<FenceId>,
}

impl RenderSurface {
    pub fn new(format: CanvasFormat, size: PhysicalSize<u32>) -> Self {
        Self {
            canvas: Canvas::new(format, size),
            dirty: false,
            gpu_ready: false,
            staged: false,
            direct_only: false,
            texture: None,
            transfer_buffer: None,
            fence: None,
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn is_monochrome(&self) -> bool {
        self.canvas.format() == CanvasFormat::A8
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_gpu_ready(&self) -> bool {
        self.gpu_ready
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn has_gpu_resources(&self) -> bool {
        self.texture.is_some() || self.transfer_buffer.is_some()
    }

    /// ### English
    /// Called after the producer finished writing the canvas.
    ///
    /// ### 中文
    /// 生产者写完画布后调用。
    pub fn mark_rendered(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn set_fence(&mut self, fence: Option<FenceId>) {
        debug_assert!(self.fence.is_none() || fence.is_none());
        self.fence = fence;
    }

    pub fn take_fence(&mut self) -> Option<FenceId> {
        self.fence.take()
    }

    /// ### English
    /// Creates the texture and transfer buffer if missing. Idempotent.
    ///
    /// Only a texture failure is an error. A transfer buffer that cannot be created (or mapped,
    /// for coherent buffers) switches the surface to synchronous uploads.
    ///
    /// ### 中文
    /// 若纹理与传输缓冲不存在则创建。幂等。
    ///
    /// 只有纹理创建失败才返回错误。若传输缓冲无法创建（一致映射缓冲则为无法映射），
    /// 该表面改为同步上传。
    pub fn allocate_gpu_resources(
        &mut self,
        gpu: &dyn GpuBackend,
        strategy: &dyn TransferStrategy,
    ) -> Result<(), GpuError> {
        let layout = PixelLayout::of(&self.canvas);
        if self.texture.is_none() {
            self.texture = Some(gpu.create_texture(&layout)?);
            self.gpu_ready = false;
        }
        if self.transfer_buffer.is_none() && !self.direct_only {
            match gpu.create_transfer_buffer(layout.byte_len(), strategy.buffer_mode()) {
                Ok(buffer) => self.transfer_buffer = Some(buffer),
                Err(err) => {
                    log::warn!("transfer buffer unavailable ({err}); uploading textures synchronously");
                    self.direct_only = true;
                }
            }
            self.staged = false;
        }
        Ok(())
    }

    pub fn is_direct_only(&self) -> bool {
        self.direct_only
    }

    /// ### English
    /// Deletes every GPU object owned by this surface. The canvas keeps its pixels and is marked
    /// dirty so the next allocation re-uploads them.
    ///
    /// ### 中文
    /// 删除该表面持有的全部 GPU 对象。画布保留像素并标记为脏，以便下次分配后重新上传。
    pub fn release_gpu_resources(&mut self, gpu: &dyn GpuBackend, strategy: &dyn TransferStrategy) {
        if let Some(fence) = self.fence.take() {
            gpu.delete_fence(fence);
        }
        if let Some(texture) = self.texture.take() {
            gpu.delete_texture(texture);
        }
        if let Some(buffer) = self.transfer_buffer.take() {
            gpu.delete_transfer_buffer(buffer, strategy.buffer_mode());
        }
        self.gpu_ready = false;
        self.staged = false;
        self.direct_only = false;
        self.dirty = true;
    }

    /// ### English
    /// Copies the canvas into the transfer buffer. If there is no buffer or it cannot be written,
    /// the texture is specified directly from the canvas instead (degraded, synchronous).
    ///
    /// The texture must already exist.
    ///
    /// ### 中文
    /// 将画布复制到传输缓冲。若没有缓冲或缓冲无法写入，则改为直接由画布指定纹理（降级的同步路径）。
    ///
    /// 调用前纹理必须已存在。
    pub fn stage_transfer(
        &mut self,
        gpu: &dyn GpuBackend,
        strategy: &dyn TransferStrategy,
    ) -> StagePath {
        let Some(texture) = self.texture else {
            panic!("stage_transfer called before allocate_gpu_resources");
        };

        if let Some(buffer) = self.transfer_buffer {
            match strategy.stage(gpu, buffer, &self.canvas) {
                Ok(()) => {
                    self.staged = true;
                    self.gpu_ready = false;
                    return StagePath::Staged;
                }
                Err(err) => {
                    log::warn!("transfer buffer unavailable ({err}); uploading texture synchronously");
                }
            }
        }

        gpu.texture_from_bytes(texture, &PixelLayout::of(&self.canvas), self.canvas.data());
        self.staged = false;
        self.gpu_ready = true;
        StagePath::Direct
    }

    /// ### English
    /// Specifies the texture image from the staged transfer buffer. Must run on the thread that
    /// samples the texture. Returns whether the GPU call was issued; repeated calls without a new
    /// stage are no-ops unless `force` is set.
    ///
    /// ### 中文
    /// 由已暂存的传输缓冲指定纹理图像。必须在采样该纹理的线程上执行。
    /// 返回是否发出了 GPU 调用；若没有新的暂存，重复调用不做任何事，除非设置 `force`。
    pub fn apply_transfer(&mut self, gpu: &dyn GpuBackend, force: bool) -> bool {
        if self.gpu_ready && !force {
            return false;
        }
        let (Some(texture), Some(buffer)) = (self.texture, self.transfer_buffer) else {
            return false;
        };
        if !self.staged {
            return false;
        }

        gpu.texture_from_buffer(texture, buffer, &PixelLayout::of(&self.canvas));
        self.gpu_ready = true;
        true
    }
}

//! ### English
//! GPU binding seam used by surfaces, the uploader and the presenter.
//!
//! Every GL object crosses this boundary as a small non-zero handle so that slot bookkeeping
//! (`Option<TextureId>` etc.) never has to reason about "0 means absent".
//!
//! ### 中文
//! 表面、上传器与呈现器共用的 GPU 绑定接口。
//!
//! 所有 GL 对象都以非零小句柄的形式跨越该边界，使槽位簿记（如 `Option<TextureId>`）
//! 无需处理“0 表示不存在”的约定。
use std::num::{NonZeroU32, NonZeroU64};
use std::time::Duration;

use dpi::PhysicalSize;

use super::canvas::{Canvas, CanvasFormat};

mod glow_backend;
mod headless;

pub use glow_backend::GlowGpu;
pub use headless::{HeadlessGpu, HeadlessStats};

/// ### English
/// GPU texture handle.
///
/// ### 中文
/// GPU 纹理句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub NonZeroU32);

/// ### English
/// Pixel transfer buffer handle (PBO).
///
/// ### 中文
/// 像素传输缓冲句柄（PBO）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub NonZeroU32);

/// ### English
/// Opaque GPU completion token (`GLsync` cast to `u64` on the GL backend).
///
/// ### 中文
/// 不透明的 GPU 完成令牌（GL 后端中为 `GLsync` 转为 `u64`）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FenceId(pub NonZeroU64);

/// ### English
/// Quad geometry handle owned by a presenter.
///
/// ### 中文
/// 呈现器持有的四边形几何句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QuadId(pub NonZeroU32);

/// ### English
/// Caller-owned shader program replacing the built-in quad program. It receives the quad position
/// at attribute location 0, the texture coordinate at location 1, and the uniforms `pvm` and
/// `tex` (or `texture`) bound to unit 0, plus `monochrome`/`color` when it declares them.
///
/// ### 中文
/// 由调用方持有、用于替换内置四边形程序的着色器程序。它在属性位置 0 接收顶点位置、
/// 位置 1 接收纹理坐标，并接收 uniform `pvm` 与绑定到纹理单元 0 的 `tex`（或 `texture`），
/// 若声明了 `monochrome`/`color` 也会设置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub NonZeroU32);

impl TextureId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl ProgramId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// ### English
/// Sampling filter applied to the frame texture when it is drawn.
///
/// ### 中文
/// 绘制时应用于帧纹理的采样过滤方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

/// ### English
/// Transfer buffer lifetime model.
///
/// ### 中文
/// 传输缓冲的生命周期模型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferMode {
    /// ### English
    /// Re-specified (orphaned) and mapped for each write.
    ///
    /// ### 中文
    /// 每次写入前重新分配（orphan）并映射。
    Stream,
    /// ### English
    /// Persistently and coherently mapped for the buffer's whole lifetime.
    ///
    /// ### 中文
    /// 在缓冲整个生命周期内持久且一致地映射。
    Coherent,
}

/// ### English
/// Result of a bounded fence wait.
///
/// ### 中文
/// 有界 fence 等待的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// ### English
/// Geometry of the pixels handed to a texture-image call.
///
/// ### 中文
/// 传给纹理图像调用的像素几何信息。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelLayout {
    pub format: CanvasFormat,
    pub size: PhysicalSize<u32>,
    /// ### English
    /// Row stride in bytes.
    ///
    /// ### 中文
    /// 行跨度（字节）。
    pub stride: usize,
}

impl PixelLayout {
    pub fn of(canvas: &Canvas) -> Self {
        Self {
            format: canvas.format(),
            size: canvas.size(),
            stride: canvas.stride(),
        }
    }

    /// ### English
    /// Total byte length of one image with this layout.
    ///
    /// ### 中文
    /// 该布局下单张图像的总字节数。
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.stride * self.size.height as usize
    }
}

/// ### English
/// One vertex of the presenter quad (`pos.xyz`, `tex0.uv`).
///
/// ### 中文
/// 呈现四边形的单个顶点（`pos.xyz`、`tex0.uv`）。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub pos: [f32; 3],
    pub tex0: [f32; 2],
}

/// ### English
/// Per-draw state for the textured quad program.
///
/// ### 中文
/// 纹理四边形程序的单次绘制状态。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadDraw {
    /// ### English
    /// Column-major projection * view * model matrix.
    ///
    /// ### 中文
    /// 列主序的 projection * view * model 矩阵。
    pub pvm: [f32; 16],
    /// ### English
    /// Tint for single-channel surfaces; `None` samples the texture as-is.
    ///
    /// ### 中文
    /// 单通道表面的着色颜色；`None` 表示按原样采样纹理。
    pub tint: Option<[f32; 3]>,
    pub filter: TextureFilter,
    /// ### English
    /// `None` draws with the built-in program.
    ///
    /// ### 中文
    /// `None` 表示使用内置程序绘制。
    pub program: Option<ProgramId>,
}

/// ### English
/// Recoverable GPU failures. These never escape the public renderer API; they select a
/// fallback path and are logged.
///
/// ### 中文
/// 可恢复的 GPU 失败。它们不会穿出公开的渲染器 API，只会选择回退路径并记录日志。
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to allocate {0}")]
    Allocation(&'static str),

    #[error("mapping the transfer buffer returned NULL")]
    MapFailed,

    #[error("fence sync objects are unavailable")]
    FenceUnavailable,

    #[error("shader program error: {0}")]
    Shader(String),
}

/// ### English
/// Narrow GPU interface consumed by the pipeline.
///
/// Implementations are shared across threads (`Arc<dyn GpuBackend>`), but each call is issued
/// on the thread whose context the implementation is bound to: the presenter's thread for
/// renderer-owned backends, the uploader thread for an uploader's backend. Objects created by
/// one must be visible to the other (shared contexts).
///
/// ### 中文
/// 流水线使用的窄 GPU 接口。
///
/// 实现会跨线程共享（`Arc<dyn GpuBackend>`），但每次调用都发生在实现所绑定上下文的线程上：
/// 渲染器持有的后端在呈现线程，上传器的后端在上传线程。两者创建的对象必须互相可见（共享上下文）。
pub trait GpuBackend: Send + Sync {
    /// ### English
    /// Makes the backend's context current on the calling thread (uploader thread start-up).
    ///
    /// ### 中文
    /// 使后端上下文在调用线程上成为 current（上传线程启动时调用）。
    fn make_current(&self) {}

    /// ### English
    /// Whether persistently mapped transfer buffers are available.
    ///
    /// ### 中文
    /// 是否支持持久映射的传输缓冲。
    fn supports_coherent_mapping(&self) -> bool;

    fn create_texture(&self, layout: &PixelLayout) -> Result<TextureId, GpuError>;
    fn delete_texture(&self, texture: TextureId);

    fn create_transfer_buffer(&self, len: usize, mode: BufferMode) -> Result<BufferId, GpuError>;
    fn delete_transfer_buffer(&self, buffer: BufferId, mode: BufferMode);

    /// ### English
    /// Copies `bytes` into the transfer buffer. `MapFailed` asks the caller to fall back to a
    /// synchronous texture upload.
    ///
    /// ### 中文
    /// 将 `bytes` 复制到传输缓冲。返回 `MapFailed` 时调用方应回退到同步纹理上传。
    fn write_transfer_buffer(
        &self,
        buffer: BufferId,
        mode: BufferMode,
        bytes: &[u8],
    ) -> Result<(), GpuError>;

    /// ### English
    /// Specifies the texture image from a previously written transfer buffer.
    ///
    /// ### 中文
    /// 用之前写入的传输缓冲指定纹理图像。
    fn texture_from_buffer(&self, texture: TextureId, buffer: BufferId, layout: &PixelLayout);

    /// ### English
    /// Specifies the texture image directly from client memory (synchronous path).
    ///
    /// ### 中文
    /// 直接用客户端内存指定纹理图像（同步路径）。
    fn texture_from_bytes(&self, texture: TextureId, layout: &PixelLayout, bytes: &[u8]);

    fn insert_fence(&self) -> Result<FenceId, GpuError>;
    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> FenceStatus;
    fn delete_fence(&self, fence: FenceId);

    /// ### English
    /// Flushes queued commands so fences can make progress.
    ///
    /// ### 中文
    /// 提交已排队的命令，使 fence 能够推进。
    fn flush(&self);

    fn create_quad(&self) -> Result<QuadId, GpuError>;
    fn update_quad(&self, quad: QuadId, vertices: &[QuadVertex; 4]);
    fn delete_quad(&self, quad: QuadId);
    fn draw_quad(&self, quad: QuadId, texture: TextureId, draw: &QuadDraw);
}

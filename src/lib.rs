/// ### English
/// `mt_canvas_render` crate root.
/// Core implementation lives under `engine` and is re-exported here for Rust callers; `ffi`
/// exposes the C ABI.
///
/// ### 中文
/// `mt_canvas_render` 的 crate 根。
/// 核心实现位于 `engine` 模块，并在此为 Rust 调用方重新导出；`ffi` 导出 C ABI。
pub mod engine;
mod ffi;

pub use engine::canvas::{Canvas, CanvasFormat, PixelRect};
pub use engine::config::{RendererConfig, TransferMode};
pub use engine::error::RenderError;
pub use engine::flags::{MTCR_FLAG_FORCE_COHERENT, MTCR_FLAG_FOREGROUND, MTCR_FLAG_NO_COHERENT};
pub use engine::global::ensure_initialized;
pub use engine::gpu::{
    GlowGpu, GpuBackend, GpuError, HeadlessGpu, HeadlessStats, ProgramId, TextureFilter, TextureId,
};
pub use engine::logging::{LoggingConfig, init_logging};
pub use engine::renderable::{PreviousFrame, Renderable};
pub use engine::renderer::{Renderer, ortho};
pub use engine::uploader::Uploader;

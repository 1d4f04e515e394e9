//! ### English
//! Renderer construction parameters.
//!
//! ### 中文
//! 渲染器构造参数。

use dpi::PhysicalSize;

use super::flags::{MTCR_FLAG_FORCE_COHERENT, MTCR_FLAG_FOREGROUND, MTCR_FLAG_NO_COHERENT};

/// ### English
/// How canvas bytes reach the GPU.
///
/// ### 中文
/// 画布字节传到 GPU 的方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// ### English
    /// Coherent when the backend supports persistent mapping, orphaned otherwise.
    ///
    /// ### 中文
    /// 后端支持持久映射时使用一致映射，否则使用 orphan 模式。
    #[default]
    Auto,
    Orphaned,
    Coherent,
}

impl TransferMode {
    pub fn from_flags(flags: u32) -> Self {
        if flags & MTCR_FLAG_NO_COHERENT != 0 {
            Self::Orphaned
        } else if flags & MTCR_FLAG_FORCE_COHERENT != 0 {
            Self::Coherent
        } else {
            Self::Auto
        }
    }
}

/// ### English
/// Initialization parameters for `Renderer::new`.
///
/// ### 中文
/// `Renderer::new` 的初始化参数。
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// ### English
    /// Canvas size in pixels (both dimensions non-zero).
    ///
    /// ### 中文
    /// 画布像素尺寸（两个维度都必须非零）。
    pub size: PhysicalSize<u32>,
    /// ### English
    /// Target frames per second; `0.0` renders only on `once`/`once_wait`.
    ///
    /// ### 中文
    /// 目标帧率；`0.0` 表示仅在 `once`/`once_wait` 时渲染。
    pub fps: f64,
    /// ### English
    /// Render on the caller's thread instead of a background worker.
    ///
    /// ### 中文
    /// 在调用线程而非后台工作线程上渲染。
    pub foreground: bool,
    /// ### English
    /// `Some(rgb)` renders into an alpha-only canvas tinted with `rgb` at draw time.
    ///
    /// ### 中文
    /// `Some(rgb)` 表示渲染到仅 alpha 画布，并在绘制时以 `rgb` 着色。
    pub monochrome: Option<[f32; 3]>,
    pub transfer: TransferMode,
}

impl RendererConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: PhysicalSize::new(width, height),
            fps: 0.0,
            foreground: false,
            monochrome: None,
            transfer: TransferMode::Auto,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// ### English
    /// Applies `MTCR_FLAG_*` bits from the C ABI.
    ///
    /// ### 中文
    /// 应用来自 C ABI 的 `MTCR_FLAG_*` 位。
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.foreground = flags & MTCR_FLAG_FOREGROUND != 0;
        self.transfer = TransferMode::from_flags(flags);
        self
    }
}

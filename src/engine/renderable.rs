//! ### English
//! The user drawing callback interface.
//!
//! ### 中文
//! 用户绘制回调接口。

use std::sync::Arc;

use super::canvas::{Canvas, PixelRect};
use super::renderer::RendererShared;

/// ### English
/// Produces frames into a canvas. `render` runs once per produced frame on the render thread
/// (or the caller, in foreground mode). `init`/`fini` run once per surface whenever surfaces are
/// built or torn down, including format switches.
///
/// ### 中文
/// 向画布产出帧。`render` 每产出一帧在渲染线程（前台模式下为调用线程）上执行一次。
/// 每当表面被构建或销毁（包括格式切换）时，`init`/`fini` 对每个表面各执行一次。
pub trait Renderable: Send {
    fn render(&mut self, canvas: &mut Canvas, width: u32, height: u32);

    /// ### English
    /// Called by the pipeline instead of `render`. Override it to reuse regions of the previous
    /// frame through `previous`; the default ignores it.
    ///
    /// ### 中文
    /// 流水线实际调用的是此方法而非 `render`。重写它即可通过 `previous` 复用上一帧的区域；
    /// 默认实现忽略该参数。
    fn render_with_previous(
        &mut self,
        canvas: &mut Canvas,
        _previous: &PreviousFrame,
        width: u32,
        height: u32,
    ) {
        self.render(canvas, width, height)
    }

    /// ### English
    /// Returning `false` rejects the surface. Only honored during construction.
    ///
    /// ### 中文
    /// 返回 `false` 表示拒绝该表面。仅在构造期间生效。
    fn init(&mut self, _canvas: &mut Canvas) -> bool {
        true
    }

    fn fini(&mut self, _canvas: &mut Canvas) {}
}

impl<F> Renderable for F
where
    F: FnMut(&mut Canvas, u32, u32) + Send,
{
    fn render(&mut self, canvas: &mut Canvas, width: u32, height: u32) {
        self(canvas, width, height)
    }
}

/// ### English
/// The most recently published frame of the renderer that is currently producing. Surfaces
/// rotate, so the canvas handed to `render` usually holds an older frame; blitting unchanged
/// regions from here avoids redrawing them.
///
/// ### 中文
/// 当前正在出帧的渲染器最近一次发布的帧。表面是轮换的，交给 `render` 的画布通常保存的是更早的帧；
/// 从这里拷贝未变化的区域可以避免重绘它们。
pub struct PreviousFrame {
    source: Option<(Arc<RendererShared>, usize)>,
}

impl PreviousFrame {
    pub(crate) fn new(shared: &Arc<RendererShared>, slot: Option<usize>) -> Self {
        Self {
            source: slot.map(|slot| (shared.clone(), slot)),
        }
    }

    /// ### English
    /// `false` before the first frame and right after surfaces were rebuilt.
    ///
    /// ### 中文
    /// 首帧之前以及表面刚重建之后为 `false`。
    pub fn is_available(&self) -> bool {
        self.source.is_some()
    }

    /// ### English
    /// Copies `rects` of the previous frame into the same positions of `target`. Returns `false`
    /// and copies nothing when there is no previous frame, when `target` differs in format or
    /// size, or when a rectangle does not lie inside the canvas.
    ///
    /// #### Parameters
    /// - `target`: The canvas being rendered.
    /// - `rects`: Pixel rectangles to carry over.
    ///
    /// ### 中文
    /// 将上一帧中的 `rects` 复制到 `target` 的相同位置。若没有上一帧、`target` 的格式或尺寸不同，
    /// 或有矩形不在画布内，则返回 `false` 且不复制。
    ///
    /// #### 参数
    /// - `target`：正在渲染的画布。
    /// - `rects`：需要沿用的像素矩形。
    pub fn blit_into(&self, target: &mut Canvas, rects: &[PixelRect]) -> bool {
        let Some((shared, slot)) = &self.source else {
            return false;
        };
        let source = shared.slot(*slot);
        let source = source.canvas();
        if source.format() != target.format() || source.size() != target.size() {
            log::error!(
                "renderer {}: cannot blit a {:?} frame into a {:?} {:?} canvas",
                shared.id,
                source.format(),
                target.format(),
                target.size()
            );
            return false;
        }
        if let Some(rect) = rects.iter().find(|rect| !rect.lies_within(target.size())) {
            log::error!("renderer {}: blit rectangle {rect:?} outside the canvas", shared.id);
            return false;
        }
        target.copy_rects_from(source, rects);
        true
    }
}

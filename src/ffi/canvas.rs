//! ### English
//! C ABI accessors for the canvas passed to callbacks.
//!
//! ### 中文
//! 传给回调的画布的 C ABI 访问函数。

use std::cell::Cell;

use super::MtcrCanvas;
use crate::engine::canvas::PixelRect;
use crate::engine::renderable::PreviousFrame;

#[unsafe(no_mangle)]
/// ### English
/// First byte of the pixel rows (`stride * height` bytes). ARGB32 pixels are premultiplied
/// BGRA in memory; A8 pixels are one alpha byte.
///
/// ### 中文
/// 像素行的首字节（共 `stride * height` 字节）。ARGB32 像素在内存中为预乘 BGRA；
/// A8 像素为单个 alpha 字节。
pub unsafe extern "C" fn mtcr_canvas_data(canvas: *mut MtcrCanvas) -> *mut u8 {
    if canvas.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { (*canvas).data_mut().as_mut_ptr() }
}

#[unsafe(no_mangle)]
/// ### English
/// Bytes per row.
///
/// ### 中文
/// 每行字节数。
pub unsafe extern "C" fn mtcr_canvas_stride(canvas: *const MtcrCanvas) -> u32 {
    if canvas.is_null() {
        return 0;
    }
    unsafe { (*canvas).stride() as u32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mtcr_canvas_width(canvas: *const MtcrCanvas) -> u32 {
    if canvas.is_null() {
        return 0;
    }
    unsafe { (*canvas).width() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mtcr_canvas_height(canvas: *const MtcrCanvas) -> u32 {
    if canvas.is_null() {
        return 0;
    }
    unsafe { (*canvas).height() }
}

thread_local! {
    /// ### English
    /// Previous frame of the renderer whose render callback is running on this thread.
    ///
    /// ### 中文
    /// 当前线程上正在执行渲染回调的渲染器的上一帧。
    static PREVIOUS_FRAME: Cell<*const PreviousFrame> = const { Cell::new(std::ptr::null()) };
}

/// ### English
/// Restores the enclosing callback's previous frame (renderers may nest in foreground mode).
///
/// ### 中文
/// 恢复外层回调的上一帧（前台模式下渲染器可能嵌套）。
struct PreviousFrameScope(*const PreviousFrame);

impl Drop for PreviousFrameScope {
    fn drop(&mut self) {
        PREVIOUS_FRAME.with(|current| current.set(self.0));
    }
}

/// ### English
/// Runs `f` with `previous` reachable from `mtcr_blit_back2front`.
///
/// ### 中文
/// 在 `previous` 可被 `mtcr_blit_back2front` 访问的情况下执行 `f`。
pub(super) fn with_previous_frame<R>(previous: &PreviousFrame, f: impl FnOnce() -> R) -> R {
    let outer = PREVIOUS_FRAME.with(|current| current.replace(previous));
    let _scope = PreviousFrameScope(outer);
    f()
}

#[unsafe(no_mangle)]
/// ### English
/// Copies `num` rectangles of the previous frame into `canvas`. Only valid inside a render
/// callback, with the canvas it received. Returns `false` without copying when called elsewhere,
/// when there is no previous frame yet, or when a rectangle does not lie inside the canvas.
///
/// ### 中文
/// 将上一帧中的 `num` 个矩形复制到 `canvas`。仅可在渲染回调内部、针对其收到的画布调用。
/// 在回调之外调用、尚无上一帧，或有矩形不在画布内时，不复制并返回 `false`。
pub unsafe extern "C" fn mtcr_blit_back2front(
    canvas: *mut MtcrCanvas,
    rects: *const PixelRect,
    num: usize,
) -> bool {
    let previous = PREVIOUS_FRAME.with(Cell::get);
    let (Some(previous), Some(canvas)) = (unsafe { previous.as_ref() }, unsafe { canvas.as_mut() })
    else {
        log::debug!("mtcr_blit_back2front called outside a render callback");
        return false;
    };
    let rects = match (rects.is_null(), num) {
        (_, 0) => &[][..],
        (true, _) => return false,
        (false, num) => unsafe { std::slice::from_raw_parts(rects, num) },
    };
    previous.blit_into(canvas, rects)
}

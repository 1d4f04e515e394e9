//! ### English
//! C ABI bindings for renderer lifecycle, frame requests and drawing.
//!
//! ### 中文
//! 渲染器生命周期、出帧请求与绘制相关的 C ABI 绑定。

use std::ffi::c_void;

use std::num::NonZeroU32;

use super::canvas::with_previous_frame;
use super::{HostPtr, MtcrCanvas, MtcrGpu, MtcrRenderer, MtcrUploader};
use crate::engine::canvas::Canvas;
use crate::engine::config::RendererConfig;
use crate::engine::gpu::{ProgramId, TextureFilter};
use crate::engine::renderable::{PreviousFrame, Renderable};
use crate::engine::renderer::Renderer;

/// ### English
/// `GL_NEAREST` / `GL_LINEAR`, the filters accepted by `mtcr_set_texture_filter`.
///
/// ### 中文
/// `GL_NEAREST` / `GL_LINEAR`，即 `mtcr_set_texture_filter` 接受的过滤方式。
const GL_NEAREST: u32 = 0x2600;
const GL_LINEAR: u32 = 0x2601;

/// ### English
/// Optional per-surface setup. Returning `false` aborts `mtcr_init`; it must not return `false`
/// on later surface rebuilds (`mtcr_set_monochrome`, `mtcr_set_fg_mode`).
///
/// ### 中文
/// 可选的逐表面初始化。返回 `false` 会中止 `mtcr_init`；之后的表面重建
/// （`mtcr_set_monochrome`、`mtcr_set_fg_mode`）中不得返回 `false`。
pub type MtcrInitCb = extern "C" fn(canvas: *mut MtcrCanvas, userinfo: *mut c_void) -> bool;

/// ### English
/// Mandatory frame callback. The canvas is not cleared between frames.
///
/// ### 中文
/// 必需的出帧回调。帧与帧之间不会清空画布。
pub type MtcrRenderCb =
    extern "C" fn(canvas: *mut MtcrCanvas, width: u32, height: u32, userinfo: *mut c_void);

/// ### English
/// Optional per-surface teardown.
///
/// ### 中文
/// 可选的逐表面清理。
pub type MtcrFiniCb = extern "C" fn(canvas: *mut MtcrCanvas, userinfo: *mut c_void);

struct CallbackRenderable {
    init: Option<MtcrInitCb>,
    render: MtcrRenderCb,
    fini: Option<MtcrFiniCb>,
    userinfo: HostPtr,
}

impl Renderable for CallbackRenderable {
    fn render(&mut self, canvas: &mut Canvas, width: u32, height: u32) {
        (self.render)(canvas, width, height, self.userinfo.get());
    }

    fn render_with_previous(
        &mut self,
        canvas: &mut Canvas,
        previous: &PreviousFrame,
        width: u32,
        height: u32,
    ) {
        with_previous_frame(previous, || self.render(canvas, width, height));
    }

    fn init(&mut self, canvas: &mut Canvas) -> bool {
        self.init
            .is_none_or(|init| init(canvas, self.userinfo.get()))
    }

    fn fini(&mut self, canvas: &mut Canvas) {
        if let Some(fini) = self.fini {
            fini(canvas, self.userinfo.get());
        }
    }
}

/// ### English
/// Borrows the renderer behind a possibly NULL handle.
///
/// # Safety
/// `renderer` must be NULL or a live handle from `mtcr_init`.
///
/// ### 中文
/// 借用可能为空的句柄背后的渲染器。
///
/// # Safety
/// `renderer` 必须为 NULL 或由 `mtcr_init` 返回且仍存活的句柄。
unsafe fn renderer_ref<'a>(renderer: *const MtcrRenderer) -> Option<&'a Renderer> {
    unsafe { renderer.as_ref() }.map(|handle| &handle.renderer)
}

unsafe fn renderer_mut<'a>(renderer: *mut MtcrRenderer) -> Option<&'a mut Renderer> {
    unsafe { renderer.as_mut() }.map(|handle| &mut handle.renderer)
}

/// ### English
/// Reads the 4x4 column-major matrix behind `pvm`.
///
/// ### 中文
/// 读取 `pvm` 指向的 4x4 列主序矩阵。
unsafe fn read_pvm(pvm: *const f32) -> Option<[f32; 16]> {
    if pvm.is_null() {
        return None;
    }
    Some(unsafe { pvm.cast::<[f32; 16]>().read_unaligned() })
}

#[unsafe(no_mangle)]
/// ### English
/// Creates a renderer and starts it.
///
/// `fps = 0` renders only on `mtcr_once`/`mtcr_once_wait`; with `fps > 0` the first frame is
/// produced before this returns. `flags` takes `MTCR_FLAG_*` bits. `gpu` must be bound to the
/// context current on the calling (presenting) thread.
///
/// Returns NULL if `gpu`/`render_cb` is NULL, a dimension is zero, `fps` is negative or not
/// finite, `init_cb` rejects a surface, or the render thread cannot be spawned.
///
/// ### 中文
/// 创建并启动渲染器。
///
/// `fps = 0` 表示仅在 `mtcr_once`/`mtcr_once_wait` 时渲染；`fps > 0` 时会在返回前产出第一帧。
/// `flags` 接受 `MTCR_FLAG_*` 位。`gpu` 必须绑定到调用（呈现）线程上当前的上下文。
///
/// 若 `gpu`/`render_cb` 为 NULL、任一尺寸为零、`fps` 为负或非有限值、`init_cb` 拒绝了某个表面，
/// 或无法创建渲染线程，则返回 NULL。
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn mtcr_init(
    gpu: *const MtcrGpu,
    width: u32,
    height: u32,
    fps: f64,
    flags: u32,
    init_cb: Option<MtcrInitCb>,
    render_cb: Option<MtcrRenderCb>,
    fini_cb: Option<MtcrFiniCb>,
    userinfo: *mut c_void,
) -> *mut MtcrRenderer {
    let (Some(gpu), Some(render)) = (unsafe { gpu.as_ref() }, render_cb) else {
        return std::ptr::null_mut();
    };
    if width == 0 || height == 0 || !fps.is_finite() || fps < 0.0 {
        log::error!("mtcr_init: invalid parameters {width}x{height} @ {fps} fps");
        return std::ptr::null_mut();
    }

    let config = RendererConfig::new(width, height)
        .with_fps(fps)
        .with_flags(flags);
    let renderable = CallbackRenderable {
        init: init_cb,
        render,
        fini: fini_cb,
        userinfo: HostPtr(userinfo),
    };

    match Renderer::new(config, renderable, gpu.gpu.clone()) {
        Ok(renderer) => Box::into_raw(Box::new(MtcrRenderer { renderer })),
        Err(err) => {
            log::error!("mtcr_init: {err}");
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Stops and destroys a renderer created by `mtcr_init`. `fini_cb` runs once per surface. Call
/// on the presenting thread, since GPU objects are released here.
///
/// ### 中文
/// 停止并销毁由 `mtcr_init` 创建的渲染器。`fini_cb` 对每个表面各执行一次。
/// 请在呈现线程上调用，因为 GPU 对象在此释放。
pub unsafe extern "C" fn mtcr_fini(renderer: *mut MtcrRenderer) {
    if renderer.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(renderer));
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Changes the periodic rate. Negative or non-finite values are ignored.
///
/// ### 中文
/// 修改周期帧率。负数或非有限值会被忽略。
pub unsafe extern "C" fn mtcr_set_fps(renderer: *mut MtcrRenderer, fps: f64) {
    let Some(renderer) = (unsafe { renderer_ref(renderer) }) else {
        return;
    };
    if !fps.is_finite() || fps < 0.0 {
        log::warn!("mtcr_set_fps: ignoring invalid rate {fps}");
        return;
    }
    renderer.set_fps(fps);
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mtcr_get_fps(renderer: *const MtcrRenderer) -> f64 {
    unsafe { renderer_ref(renderer) }.map_or(0.0, Renderer::fps)
}

#[unsafe(no_mangle)]
/// ### English
/// Requests one frame without waiting.
///
/// ### 中文
/// 请求一帧但不等待。
pub unsafe extern "C" fn mtcr_once(renderer: *mut MtcrRenderer) {
    if let Some(renderer) = unsafe { renderer_ref(renderer) } {
        renderer.once();
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Renders one frame and returns once it is ready to be presented.
///
/// ### 中文
/// 渲染一帧，并在其可呈现后返回。
pub unsafe extern "C" fn mtcr_once_wait(renderer: *mut MtcrRenderer) {
    if let Some(renderer) = unsafe { renderer_ref(renderer) } {
        renderer.once_wait();
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Draws the whole canvas into the rectangle (`x`, `y`, `w`, `h`) under the column-major 4x4
/// matrix `pvm`. Does nothing if `pvm` is NULL or no frame is ready.
///
/// ### 中文
/// 在列主序 4x4 矩阵 `pvm` 变换下将整个画布绘制到矩形（`x`、`y`、`w`、`h`）。
/// 若 `pvm` 为 NULL 或没有就绪帧则不绘制。
pub unsafe extern "C" fn mtcr_draw(
    renderer: *mut MtcrRenderer,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    pvm: *const f32,
) {
    let (Some(renderer), Some(pvm)) = (unsafe { renderer_ref(renderer) }, unsafe { read_pvm(pvm) })
    else {
        return;
    };
    renderer.draw([x, y], [w, h], &pvm);
}

#[unsafe(no_mangle)]
/// ### English
/// Draws the canvas pixels (`src_x`, `src_y`, `src_w`, `src_h`) into the rectangle
/// (`x`, `y`, `w`, `h`) under `pvm`.
///
/// ### 中文
/// 在 `pvm` 变换下将画布像素区域（`src_x`、`src_y`、`src_w`、`src_h`）绘制到矩形
/// （`x`、`y`、`w`、`h`）。
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn mtcr_draw_subrect(
    renderer: *mut MtcrRenderer,
    src_x: f32,
    src_y: f32,
    src_w: f32,
    src_h: f32,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    pvm: *const f32,
) {
    let (Some(renderer), Some(pvm)) = (unsafe { renderer_ref(renderer) }, unsafe { read_pvm(pvm) })
    else {
        return;
    };
    renderer.draw_subrect([src_x, src_y], [src_w, src_h], [x, y], [w, h], &pvm);
}

#[unsafe(no_mangle)]
/// ### English
/// GL texture name of the most recent frame, or 0 if none is ready yet.
///
/// ### 中文
/// 最新一帧的 GL 纹理名；若尚无就绪帧则返回 0。
pub unsafe extern "C" fn mtcr_get_tex(renderer: *mut MtcrRenderer) -> u32 {
    unsafe { renderer_ref(renderer) }
        .and_then(Renderer::texture)
        .map_or(0, |texture| texture.get())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mtcr_get_width(renderer: *const MtcrRenderer) -> u32 {
    unsafe { renderer_ref(renderer) }.map_or(0, Renderer::width)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mtcr_get_height(renderer: *const MtcrRenderer) -> u32 {
    unsafe { renderer_ref(renderer) }.map_or(0, Renderer::height)
}

#[unsafe(no_mangle)]
/// ### English
/// `rgb` NULL selects full color; otherwise it points at three floats and selects an alpha-only
/// canvas tinted with that color. Switching mode rebuilds every surface.
///
/// ### 中文
/// `rgb` 为 NULL 表示全彩；否则指向三个浮点数，表示以该颜色着色的仅 alpha 画布。
/// 切换模式会重建所有表面。
pub unsafe extern "C" fn mtcr_set_monochrome(renderer: *mut MtcrRenderer, rgb: *const f32) {
    let Some(renderer) = (unsafe { renderer_mut(renderer) }) else {
        return;
    };
    let color = (!rgb.is_null()).then(|| unsafe { rgb.cast::<[f32; 3]>().read_unaligned() });
    if let Err(err) = renderer.set_monochrome(color) {
        log::error!("mtcr_set_monochrome: {err}");
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Switches between the background render thread (`foreground = false`) and rendering on the
/// caller of `mtcr_once`/`mtcr_once_wait`.
///
/// ### 中文
/// 在后台渲染线程（`foreground = false`）与在 `mtcr_once`/`mtcr_once_wait`
/// 调用线程上渲染之间切换。
pub unsafe extern "C" fn mtcr_set_fg_mode(renderer: *mut MtcrRenderer, foreground: bool) {
    let Some(renderer) = (unsafe { renderer_mut(renderer) }) else {
        return;
    };
    if let Err(err) = renderer.set_foreground(foreground) {
        log::error!("mtcr_set_fg_mode: {err}");
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Attaches `uploader` (NULL detaches). The renderer keeps its own reference, so the uploader
/// handle may be destroyed while renderers still use it.
///
/// ### 中文
/// 挂接 `uploader`（NULL 表示解除）。渲染器持有自己的引用，因此在渲染器仍在使用时
/// 也可以销毁上传器句柄。
pub unsafe extern "C" fn mtcr_set_uploader(
    renderer: *mut MtcrRenderer,
    uploader: *const MtcrUploader,
) {
    let Some(renderer) = (unsafe { renderer_mut(renderer) }) else {
        return;
    };
    let uploader = unsafe { uploader.as_ref() }.map(|handle| handle.uploader.clone());
    if let Err(err) = renderer.set_uploader(uploader) {
        log::error!("mtcr_set_uploader: {err}");
    }
}

#[unsafe(no_mangle)]
/// ### English
/// New reference to the attached uploader, or NULL if none is attached. Release it with
/// `mtcr_uploader_destroy`.
///
/// ### 中文
/// 指向当前挂接上传器的新引用；若未挂接则为 NULL。请使用 `mtcr_uploader_destroy` 释放。
pub unsafe extern "C" fn mtcr_get_uploader(renderer: *const MtcrRenderer) -> *mut MtcrUploader {
    match unsafe { renderer_ref(renderer) }.and_then(Renderer::uploader) {
        Some(uploader) => Box::into_raw(Box::new(MtcrUploader { uploader })),
        None => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Sampling filter for drawing: `GL_LINEAR` (default) or `GL_NEAREST`. Other values are ignored.
///
/// ### 中文
/// 绘制时的采样过滤方式：`GL_LINEAR`（默认）或 `GL_NEAREST`。其他值会被忽略。
pub unsafe extern "C" fn mtcr_set_texture_filter(renderer: *mut MtcrRenderer, gl_filter: u32) {
    let Some(renderer) = (unsafe { renderer_ref(renderer) }) else {
        return;
    };
    let filter = match gl_filter {
        GL_LINEAR => TextureFilter::Linear,
        GL_NEAREST => TextureFilter::Nearest,
        other => {
            log::warn!("mtcr_set_texture_filter: ignoring unsupported filter {other:#x}");
            return;
        }
    };
    renderer.set_texture_filter(filter);
}

#[unsafe(no_mangle)]
/// ### English
/// Draws with the caller's GL program `program` instead of the built-in one; 0 restores the
/// built-in program. The program is never deleted by the renderer.
///
/// ### 中文
/// 使用调用方的 GL 程序 `program` 代替内置程序绘制；0 恢复内置程序。渲染器从不删除该程序。
pub unsafe extern "C" fn mtcr_set_shader(renderer: *mut MtcrRenderer, program: u32) {
    if let Some(renderer) = unsafe { renderer_ref(renderer) } {
        renderer.set_shader(NonZeroU32::new(program).map(ProgramId));
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Program set by `mtcr_set_shader`, or 0 when drawing with the built-in program.
///
/// ### 中文
/// 由 `mtcr_set_shader` 设置的程序；使用内置程序绘制时返回 0。
pub unsafe extern "C" fn mtcr_get_shader(renderer: *const MtcrRenderer) -> u32 {
    unsafe { renderer_ref(renderer) }
        .and_then(Renderer::shader)
        .map_or(0, ProgramId::get)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mtcr_get_fg_mode(renderer: *const MtcrRenderer) -> bool {
    unsafe { renderer_ref(renderer) }.is_some_and(Renderer::is_foreground)
}

#[unsafe(no_mangle)]
/// ### English
/// Writes the monochrome color to `rgb` (three floats) and returns `true`; returns `false` and
/// leaves `rgb` untouched in full-color mode.
///
/// ### 中文
/// 将单色颜色写入 `rgb`（三个浮点数）并返回 `true`；全彩模式下返回 `false` 且不修改 `rgb`。
pub unsafe extern "C" fn mtcr_get_monochrome(renderer: *const MtcrRenderer, rgb: *mut f32) -> bool {
    let Some(color) = unsafe { renderer_ref(renderer) }.and_then(Renderer::monochrome) else {
        return false;
    };
    if !rgb.is_null() {
        unsafe { rgb.cast::<[f32; 3]>().write_unaligned(color) };
    }
    true
}

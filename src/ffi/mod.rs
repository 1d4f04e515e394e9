//! ### English
//! C ABI surface for `mt_canvas_render`.
//!
//! All exported symbols are `extern "C"` functions; handles are opaque `#[repr(C)]` structs owned
//! by Rust and released through their matching `*_destroy`/`mtcr_fini` call. NULL handles are
//! ignored (or yield NULL/0).
//!
//! Callbacks receive an opaque `MtcrCanvas *`; use the `mtcr_canvas_*` accessors to reach its
//! pixels. The `userinfo` pointer is passed back untouched and may be used from the render
//! thread, so whatever it points to must tolerate that.
//!
//! ### 中文
//! `mt_canvas_render` 的 C ABI 接口层。
//!
//! 所有导出符号均为 `extern "C"` 函数；句柄是由 Rust 持有的不透明 `#[repr(C)]` 结构体，
//! 需通过对应的 `*_destroy`/`mtcr_fini` 释放。空句柄会被忽略（或返回 NULL/0）。
//!
//! 回调接收不透明的 `MtcrCanvas *`；通过 `mtcr_canvas_*` 访问函数获取其像素。
//! `userinfo` 指针原样回传，且可能在渲染线程上使用，因此其指向的数据必须能承受这一点。
mod abi;
mod canvas;
mod gpu;
mod renderer;
mod uploader;

use std::ffi::c_void;
use std::sync::Arc;

use crate::engine::canvas::Canvas;
use crate::engine::gpu::GpuBackend;
use crate::engine::renderer::Renderer;
use crate::engine::uploader::Uploader;

/// ### English
/// Canvas handed to callbacks. Only valid for the duration of the callback.
///
/// ### 中文
/// 传给回调的画布。仅在回调执行期间有效。
pub type MtcrCanvas = Canvas;

#[repr(C)]
/// ### English
/// Opaque GPU backend handle bound to one host GL context.
///
/// ### 中文
/// 绑定到某个宿主 GL 上下文的不透明 GPU 后端句柄。
pub struct MtcrGpu {
    /// ### English
    /// Backend shared with every renderer/uploader created from this handle.
    ///
    /// ### 中文
    /// 与由该句柄创建的所有渲染器/上传器共享的后端。
    gpu: Arc<dyn GpuBackend>,
}

#[repr(C)]
/// ### English
/// Opaque renderer handle owning its render thread and surfaces.
///
/// ### 中文
/// 不透明渲染器句柄，持有其渲染线程与表面。
pub struct MtcrRenderer {
    renderer: Renderer,
}

#[repr(C)]
/// ### English
/// Opaque uploader handle. Renderers attached to it keep the upload thread alive after
/// `mtcr_uploader_destroy` until they detach or are destroyed.
///
/// ### 中文
/// 不透明上传器句柄。挂接到它的渲染器会在 `mtcr_uploader_destroy` 之后继续保持上传线程存活，
/// 直到它们解除挂接或被销毁。
pub struct MtcrUploader {
    uploader: Uploader,
}

/// ### English
/// C ABI version for `mt_canvas_render`.
///
/// ### 中文
/// `mt_canvas_render` 的 C ABI 版本号。
const MTCR_ABI_VERSION: u32 = 1;

/// ### English
/// Host pointer carried into other threads. The host guarantees it stays valid and tolerates
/// use from the render/upload thread.
///
/// ### 中文
/// 被带入其他线程的宿主指针。宿主保证其持续有效，并允许在渲染/上传线程上使用。
#[derive(Clone, Copy)]
struct HostPtr(*mut c_void);

unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

impl HostPtr {
    fn get(self) -> *mut c_void {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::abi::mtcr_abi_version;
    use super::canvas::{
        mtcr_blit_back2front, mtcr_canvas_data, mtcr_canvas_height, mtcr_canvas_stride,
        mtcr_canvas_width,
    };
    use super::renderer::*;
    use super::uploader::{mtcr_uploader_destroy, mtcr_uploader_new};
    use super::*;
    use crate::engine::canvas::{CanvasFormat, PixelRect};
    use crate::engine::gpu::{HeadlessGpu, ProgramId, TextureFilter, TextureId};

    extern "C" fn fill_with_frame(canvas: *mut MtcrCanvas, w: u32, h: u32, userinfo: *mut c_void) {
        let frames = unsafe { &*(userinfo as *const AtomicU32) };
        let frame = frames.fetch_add(1, Ordering::SeqCst) + 1;
        unsafe {
            assert_eq!(mtcr_canvas_width(canvas), w);
            assert_eq!(mtcr_canvas_height(canvas), h);
            let len = mtcr_canvas_stride(canvas) as usize * h as usize;
            std::slice::from_raw_parts_mut(mtcr_canvas_data(canvas), len).fill(frame as u8);
        }
    }

    extern "C" fn reject(_canvas: *mut MtcrCanvas, _userinfo: *mut c_void) -> bool {
        false
    }

    fn headless(gpu: &HeadlessGpu) -> *mut MtcrGpu {
        Box::into_raw(Box::new(MtcrGpu {
            gpu: Arc::new(gpu.clone()),
        }))
    }

    #[test]
    fn abi_version_is_stable() {
        assert_eq!(mtcr_abi_version(), MTCR_ABI_VERSION);
    }

    #[test]
    fn null_handles_are_ignored() {
        unsafe {
            mtcr_once(std::ptr::null_mut());
            mtcr_once_wait(std::ptr::null_mut());
            mtcr_fini(std::ptr::null_mut());
            assert_eq!(mtcr_get_tex(std::ptr::null_mut()), 0);
            assert_eq!(mtcr_get_width(std::ptr::null()), 0);
            assert_eq!(mtcr_get_fps(std::ptr::null()), 0.0);
            mtcr_uploader_destroy(std::ptr::null_mut());
            super::gpu::mtcr_gpu_destroy(std::ptr::null_mut());
        }
    }

    #[test]
    fn renderer_lifecycle_through_c_callbacks() {
        let gpu = HeadlessGpu::new();
        let frames = AtomicU32::new(0);
        let userinfo = &frames as *const AtomicU32 as *mut c_void;
        let gpu_handle = headless(&gpu);

        unsafe {
            let renderer = mtcr_init(
                gpu_handle,
                4,
                2,
                0.0,
                0,
                None,
                Some(fill_with_frame),
                None,
                userinfo,
            );
            assert!(!renderer.is_null());
            assert_eq!(mtcr_get_width(renderer), 4);
            assert_eq!(mtcr_get_height(renderer), 2);
            assert_eq!(mtcr_get_tex(renderer), 0);

            mtcr_once_wait(renderer);
            assert_eq!(frames.load(Ordering::SeqCst), 1);
            let texture = mtcr_get_tex(renderer);
            assert_ne!(texture, 0);

            let uploader = mtcr_uploader_new(gpu_handle);
            assert!(!uploader.is_null());
            mtcr_set_uploader(renderer, uploader);
            assert_eq!(frames.load(Ordering::SeqCst), 2);
            let attached = mtcr_get_uploader(renderer);
            assert!(!attached.is_null());
            assert!((*attached).uploader.ptr_eq(&(*uploader).uploader));
            mtcr_uploader_destroy(attached);
            mtcr_uploader_destroy(uploader);
            mtcr_once_wait(renderer);
            assert_eq!(frames.load(Ordering::SeqCst), 3);

            mtcr_fini(renderer);
            super::gpu::mtcr_gpu_destroy(gpu_handle);
        }
        assert_eq!(gpu.stats().live_textures, 0);
    }

    /// ### English
    /// Paints frame 1 with 7, then only carries the whole previous frame over.
    ///
    /// ### 中文
    /// 第 1 帧填充 7，之后只沿用整张上一帧。
    extern "C" fn paint_once_then_blit(
        canvas: *mut MtcrCanvas,
        w: u32,
        h: u32,
        userinfo: *mut c_void,
    ) {
        let blits = unsafe { &*(userinfo as *const AtomicU32) };
        let everything = PixelRect { x: 0, y: 0, w, h };
        unsafe {
            if mtcr_blit_back2front(canvas, &everything, 1) {
                blits.fetch_add(1, Ordering::SeqCst);
            } else {
                let len = mtcr_canvas_stride(canvas) as usize * h as usize;
                std::slice::from_raw_parts_mut(mtcr_canvas_data(canvas), len).fill(7);
            }
        }
    }

    #[test]
    fn render_callback_can_reuse_the_previous_frame() {
        let gpu = HeadlessGpu::new();
        let blits = AtomicU32::new(0);
        let gpu_handle = headless(&gpu);
        unsafe {
            let renderer = mtcr_init(
                gpu_handle,
                4,
                2,
                0.0,
                0,
                None,
                Some(paint_once_then_blit),
                None,
                &blits as *const AtomicU32 as *mut c_void,
            );
            assert!(!renderer.is_null());

            mtcr_once_wait(renderer);
            assert_eq!(blits.load(Ordering::SeqCst), 0);
            mtcr_once_wait(renderer);
            mtcr_once_wait(renderer);
            assert_eq!(blits.load(Ordering::SeqCst), 2);

            let texture = mtcr_get_tex(renderer);
            let texture = TextureId(std::num::NonZeroU32::new(texture).unwrap());
            assert_eq!(gpu.texture_pixels(texture), Some(vec![7; 32]));

            let mut outside = Canvas::new(CanvasFormat::Argb32, dpi::PhysicalSize::new(4, 2));
            assert!(!mtcr_blit_back2front(&mut outside, std::ptr::null(), 0));

            mtcr_fini(renderer);
            super::gpu::mtcr_gpu_destroy(gpu_handle);
        }
    }

    #[test]
    fn draw_settings_round_trip_through_the_abi() {
        let gpu = HeadlessGpu::new();
        let frames = AtomicU32::new(0);
        let gpu_handle = headless(&gpu);
        unsafe {
            let renderer = mtcr_init(
                gpu_handle,
                2,
                2,
                0.0,
                0,
                None,
                Some(fill_with_frame),
                None,
                &frames as *const AtomicU32 as *mut c_void,
            );
            assert!(!renderer.is_null());
            assert_eq!(mtcr_get_shader(renderer), 0);
            assert!(mtcr_get_uploader(renderer).is_null());
            assert!(!mtcr_get_fg_mode(renderer));

            mtcr_set_shader(renderer, 42);
            assert_eq!(mtcr_get_shader(renderer), 42);
            mtcr_set_texture_filter(renderer, 0x2600);
            mtcr_set_texture_filter(renderer, 0x1234);

            let mut rgb = [0.0f32; 3];
            assert!(!mtcr_get_monochrome(renderer, rgb.as_mut_ptr()));
            let red = [1.0f32, 0.0, 0.0];
            mtcr_set_monochrome(renderer, red.as_ptr());
            assert!(mtcr_get_monochrome(renderer, rgb.as_mut_ptr()));
            assert_eq!(rgb, red);

            mtcr_once_wait(renderer);
            let identity: [f32; 16] = std::array::from_fn(|i| if i % 5 == 0 { 1.0 } else { 0.0 });
            mtcr_draw(renderer, 0.0, 0.0, 2.0, 2.0, identity.as_ptr());
            let (_, draw) = gpu.last_draw().unwrap();
            assert_eq!(draw.program.map(ProgramId::get), Some(42));
            assert_eq!(draw.filter, TextureFilter::Nearest);
            assert_eq!(draw.tint, Some(red));

            mtcr_set_shader(renderer, 0);
            assert_eq!(mtcr_get_shader(renderer), 0);

            mtcr_fini(renderer);
            super::gpu::mtcr_gpu_destroy(gpu_handle);
        }
    }

    #[test]
    fn rejected_init_returns_null() {
        let gpu = HeadlessGpu::new();
        let frames = AtomicU32::new(0);
        let gpu_handle = headless(&gpu);
        unsafe {
            let renderer = mtcr_init(
                gpu_handle,
                4,
                4,
                0.0,
                0,
                Some(reject),
                Some(fill_with_frame),
                None,
                &frames as *const AtomicU32 as *mut c_void,
            );
            assert!(renderer.is_null());

            let missing_callback = mtcr_init(
                gpu_handle,
                4,
                4,
                0.0,
                0,
                None,
                None,
                None,
                std::ptr::null_mut(),
            );
            assert!(missing_callback.is_null());
            super::gpu::mtcr_gpu_destroy(gpu_handle);
        }
    }
}

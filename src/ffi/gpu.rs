//! ### English
//! C ABI bindings for GPU backend creation.
//!
//! ### 中文
//! GPU 后端创建相关的 C ABI 绑定。

use std::ffi::{c_char, c_void};
use std::sync::Arc;

use super::{HostPtr, MtcrGpu};
use crate::engine::gpu::GlowGpu;

/// ### English
/// Resolves a GL entry point by name for the context identified by `ctx`.
///
/// ### 中文
/// 为 `ctx` 标识的上下文按名称解析 GL 函数入口。
pub type MtcrGetProcAddress =
    unsafe extern "C" fn(name: *const c_char, ctx: *mut c_void) -> *const c_void;

/// ### English
/// Makes the context identified by `ctx` current on the calling thread.
///
/// ### 中文
/// 在调用线程上将 `ctx` 标识的上下文设为 current。
pub type MtcrMakeCurrent = unsafe extern "C" fn(ctx: *mut c_void);

#[unsafe(no_mangle)]
/// ### English
/// Creates a GL backend for the host context `ctx`, which must be current on the calling thread.
///
/// `make_current` is optional. It is required when the handle is passed to
/// `mtcr_uploader_new`, since the upload thread must bind its own shared context first.
///
/// Returns NULL if `get_proc_address` is NULL.
///
/// ### 中文
/// 为宿主上下文 `ctx` 创建 GL 后端；该上下文必须在调用线程上为 current。
///
/// `make_current` 可选。若该句柄会传给 `mtcr_uploader_new` 则必须提供，
/// 因为上传线程需要先绑定它自己的共享上下文。
///
/// 若 `get_proc_address` 为 NULL 则返回 NULL。
pub unsafe extern "C" fn mtcr_gpu_create(
    get_proc_address: Option<MtcrGetProcAddress>,
    make_current: Option<MtcrMakeCurrent>,
    ctx: *mut c_void,
) -> *mut MtcrGpu {
    let Some(get_proc_address) = get_proc_address else {
        return std::ptr::null_mut();
    };

    let ctx = HostPtr(ctx);
    let mut gpu = unsafe {
        GlowGpu::from_loader_function(|name| get_proc_address(name.as_ptr(), ctx.get()))
    };
    if let Some(make_current) = make_current {
        gpu = gpu.with_make_current(move || unsafe { make_current(ctx.get()) });
    }

    Box::into_raw(Box::new(MtcrGpu { gpu: Arc::new(gpu) }))
}

#[unsafe(no_mangle)]
/// ### English
/// Destroys a handle created by `mtcr_gpu_create`. Renderers and uploaders created from it keep
/// the backend alive until they are destroyed.
///
/// ### 中文
/// 销毁由 `mtcr_gpu_create` 创建的句柄。由它创建的渲染器与上传器会保持后端存活，直到它们被销毁。
pub unsafe extern "C" fn mtcr_gpu_destroy(gpu: *mut MtcrGpu) {
    if gpu.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(gpu));
    }
}

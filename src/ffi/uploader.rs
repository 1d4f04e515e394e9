//! ### English
//! C ABI bindings for the shared uploader.
//!
//! ### 中文
//! 共享上传器相关的 C ABI 绑定。

use super::{MtcrGpu, MtcrUploader};
use crate::engine::uploader::Uploader;

#[unsafe(no_mangle)]
/// ### English
/// Starts a shared upload thread on `gpu`'s context. `gpu` should carry a `make_current` hook
/// for a context that shares objects with every presenting context.
///
/// Returns NULL if `gpu` is NULL or the thread cannot be spawned.
///
/// ### 中文
/// 在 `gpu` 的上下文上启动共享上传线程。`gpu` 应带有 `make_current` 钩子，
/// 且其上下文需与所有呈现上下文共享对象。
///
/// 若 `gpu` 为 NULL 或无法创建线程则返回 NULL。
pub unsafe extern "C" fn mtcr_uploader_new(gpu: *const MtcrGpu) -> *mut MtcrUploader {
    if gpu.is_null() {
        return std::ptr::null_mut();
    }

    let gpu = unsafe { (*gpu).gpu.clone() };
    match Uploader::new(gpu) {
        Ok(uploader) => Box::into_raw(Box::new(MtcrUploader { uploader })),
        Err(err) => {
            log::error!("mtcr_uploader_new: {err}");
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Releases the host's reference. The thread stops once no renderer uses it either.
///
/// ### 中文
/// 释放宿主持有的引用。当也没有渲染器使用它时，线程停止。
pub unsafe extern "C" fn mtcr_uploader_destroy(uploader: *mut MtcrUploader) {
    if uploader.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(uploader));
    }
}

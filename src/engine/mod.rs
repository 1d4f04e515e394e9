/// ### English
/// Pipeline internals (surfaces, ring, render worker, uploader, presenter and GPU backends).
///
/// ### 中文
/// 管线内部模块（表面、环、渲染线程、上传器、呈现器与 GPU 后端）。
pub mod canvas;
pub mod config;
pub mod error;
pub mod flags;
pub mod global;
pub mod gpu;
pub(crate) mod lockfree;
pub mod logging;
pub mod renderable;
pub mod renderer;
pub mod ring;
pub mod surface;
pub mod uploader;

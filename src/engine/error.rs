//! ### English
//! Errors surfaced by renderer and uploader construction.
//!
//! ### 中文
//! 渲染器与上传器构造时返回的错误。

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// ### English
    /// The `init` callback rejected surface `surface`; every surface built so far was torn down.
    ///
    /// ### 中文
    /// `init` 回调拒绝了表面 `surface`；此前已构建的表面均已销毁。
    #[error("init callback rejected surface {surface}")]
    InitRejected { surface: usize },

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[from] io::Error),
}

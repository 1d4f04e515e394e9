//! ### English
//! The non-blocking draw path.
//!
//! ### 中文
//! 非阻塞的绘制路径。

use std::sync::TryLockError;

use crate::engine::global;
use crate::engine::gpu::{
    GpuBackend, ProgramId, QuadDraw, QuadId, QuadVertex, TextureFilter, TextureId,
};

use super::shared::RendererShared;

/// ### English
/// Destination rectangle plus normalized source rectangle (`x1, x2, y1, y2`).
///
/// ### 中文
/// 目标矩形以及归一化的源矩形（`x1, x2, y1, y2`）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct QuadGeometry {
    pub(crate) pos: [f32; 2],
    pub(crate) size: [f32; 2],
    pub(crate) tex: [f32; 4],
}

impl QuadGeometry {
    /// ### English
    /// Maps the pixel sub-rectangle `src_pos`/`src_size` of a `width` x `height` canvas onto the
    /// destination rectangle `pos`/`size`.
    ///
    /// ### 中文
    /// 将 `width` x `height` 画布中的像素子矩形 `src_pos`/`src_size` 映射到目标矩形 `pos`/`size`。
    pub(crate) fn new(
        width: u32,
        height: u32,
        src_pos: [f32; 2],
        src_size: [f32; 2],
        pos: [f32; 2],
        size: [f32; 2],
    ) -> Self {
        let (w, h) = (width as f32, height as f32);
        let geometry = Self {
            pos,
            size,
            tex: [
                src_pos[0] / w,
                (src_pos[0] + src_size[0]) / w,
                src_pos[1] / h,
                (src_pos[1] + src_size[1]) / h,
            ],
        };
        assert!(
            geometry.tex.iter().chain(&pos).chain(&size).all(|v| v.is_finite()),
            "non-finite draw geometry: {geometry:?}"
        );
        geometry
    }

    /// ### English
    /// Quad corners. Canvas rows run top-down, so the bottom edge samples `y2`.
    ///
    /// ### 中文
    /// 四边形顶点。画布行自上而下存储，因此底边采样 `y2`。
    pub(crate) fn vertices(&self) -> [QuadVertex; 4] {
        let [x, y] = self.pos;
        let [w, h] = self.size;
        let [x1, x2, y1, y2] = self.tex;
        [
            QuadVertex { pos: [x, y, 0.0], tex0: [x1, y2] },
            QuadVertex { pos: [x, y + h, 0.0], tex0: [x1, y1] },
            QuadVertex { pos: [x + w, y + h, 0.0], tex0: [x2, y1] },
            QuadVertex { pos: [x + w, y, 0.0], tex0: [x2, y2] },
        ]
    }
}

/// ### English
/// Column-major orthographic projection for a `[x, y, width, height]` viewport (near 0, far 1).
///
/// ### 中文
/// 针对 `[x, y, width, height]` 视口的列主序正交投影（near 0，far 1）。
pub fn ortho(viewport: [f32; 4]) -> [f32; 16] {
    let [x, y, w, h] = viewport;
    assert!(w != 0.0 && h != 0.0, "degenerate viewport {viewport:?}");
    let (left, right, bottom, top) = (x, x + w, y, y + h);
    let (near, far) = (0.0f32, 1.0f32);

    let mut m = [0.0f32; 16];
    m[0] = 2.0 / (right - left);
    m[5] = 2.0 / (top - bottom);
    m[10] = -2.0 / (far - near);
    m[12] = -(right + left) / (right - left);
    m[13] = -(top + bottom) / (top - bottom);
    m[14] = -(far + near) / (far - near);
    m[15] = 1.0;
    m
}

/// ### English
/// Presenter-thread state: the quad geometry cache plus the draw settings (tint, filter, program).
///
/// ### 中文
/// 呈现线程状态：四边形几何缓存以及绘制设置（着色、过滤方式、程序）。
pub(crate) struct Presenter {
    quad: Option<QuadId>,
    last: Option<QuadGeometry>,
    pub(crate) tint: Option<[f32; 3]>,
    pub(crate) filter: TextureFilter,
    pub(crate) program: Option<ProgramId>,
    warned_off_thread: bool,
}

impl Presenter {
    pub(crate) fn new(tint: Option<[f32; 3]>) -> Self {
        Self {
            quad: None,
            last: None,
            tint,
            filter: TextureFilter::default(),
            program: None,
            warned_off_thread: false,
        }
    }

    /// ### English
    /// Brings the most recent frame's texture up to date and returns it, or `None` if there is
    /// nothing to show yet. Never waits on the worker or the uploader.
    ///
    /// ### 中文
    /// 将最新一帧的纹理更新到位并返回；若暂无可显示内容则返回 `None`。从不等待工作线程或上传器。
    pub(crate) fn prepare(
        &mut self,
        shared: &RendererShared,
        gpu: &dyn GpuBackend,
    ) -> Option<TextureId> {
        if !self.warned_off_thread && !global::on_gl_thread() {
            self.warned_off_thread = true;
            log::warn!(
                "renderer {} presented from {:?}, not the GL thread",
                shared.id,
                std::thread::current().id()
            );
        }

        let (index, via_uploader) = {
            let mut state = shared.state();
            (state.ring.select_for_present()?, state.uploader.is_some())
        };

        let mut slot = match shared.slots()[index].try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };

        if via_uploader && slot.texture().is_none() {
            return None;
        }
        if let Err(err) = slot.allocate_gpu_resources(gpu, shared.strategy()) {
            log::warn!("renderer {}: cannot allocate surface {index}: {err}", shared.id);
            return None;
        }
        if !via_uploader && slot.is_dirty() {
            slot.stage_transfer(gpu, shared.strategy());
            slot.clear_dirty();
        }
        slot.apply_transfer(gpu, false);
        slot.texture()
    }

    /// ### English
    /// Draws `texture` with `geometry`, re-uploading vertices only when the geometry changed.
    ///
    /// ### 中文
    /// 用 `geometry` 绘制 `texture`；仅在几何变化时重新上传顶点。
    pub(crate) fn draw(
        &mut self,
        gpu: &dyn GpuBackend,
        texture: TextureId,
        geometry: QuadGeometry,
        pvm: &[f32; 16],
    ) {
        let quad = match self.quad {
            Some(quad) => quad,
            None => match gpu.create_quad() {
                Ok(quad) => {
                    self.last = None;
                    *self.quad.insert(quad)
                }
                Err(err) => {
                    log::warn!("cannot create quad geometry: {err}");
                    return;
                }
            },
        };

        if self.last != Some(geometry) {
            gpu.update_quad(quad, &geometry.vertices());
            self.last = Some(geometry);
        }

        gpu.draw_quad(
            quad,
            texture,
            &QuadDraw {
                pvm: *pvm,
                tint: self.tint,
                filter: self.filter,
                program: self.program,
            },
        );
    }

    pub(crate) fn release(&mut self, gpu: &dyn GpuBackend) {
        if let Some(quad) = self.quad.take() {
            gpu.delete_quad(quad);
        }
        self.last = None;
    }
}

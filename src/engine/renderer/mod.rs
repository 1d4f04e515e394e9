//! ### English
//! Multi-buffered off-screen renderer: owns the surface ring, the render thread and the
//! presenter state.
//!
//! ### 中文
//! 多缓冲离屏渲染器：持有表面环、渲染线程与呈现状态。

mod present;
mod shared;
mod worker;

pub use present::ortho;
pub(crate) use shared::RendererShared;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use dpi::PhysicalSize;

use super::canvas::CanvasFormat;
use super::config::RendererConfig;
use super::error::RenderError;
use super::global;
use super::gpu::{GpuBackend, ProgramId, TextureFilter, TextureId};
use super::renderable::Renderable;
use super::surface::{RenderSurface, select_strategy};
use super::uploader::Uploader;
use present::{Presenter, QuadGeometry};

/// ### English
/// Handle to one renderer instance.
///
/// `draw`/`texture` are the presenter: call them from the thread whose context `gpu` is bound to.
/// Dropping the handle stops the render thread, waits for any in-flight upload of this instance,
/// runs `fini` on every surface and releases all GPU objects (on the dropping thread).
///
/// ### 中文
/// 单个渲染器实例的句柄。
///
/// `draw`/`texture` 即呈现器：请在 `gpu` 所绑定上下文的线程上调用。
/// 丢弃句柄会停止渲染线程、等待本实例正在进行的上传、对每个表面执行 `fini`，
/// 并（在执行 drop 的线程上）释放全部 GPU 对象。
pub struct Renderer {
    shared: Arc<RendererShared>,
    gpu: Arc<dyn GpuBackend>,
    worker: Option<thread::JoinHandle<()>>,
    foreground: bool,
    presenter: Mutex<Presenter>,
}

impl Renderer {
    /// ### English
    /// Builds every surface (running `init` on each), starts the render thread unless
    /// `config.foreground`, and produces a first frame before returning when `config.fps > 0`.
    ///
    /// #### Parameters
    /// - `config`: Size, rate, mode and transfer strategy.
    /// - `renderable`: Drawing callback.
    /// - `gpu`: Backend bound to the presenting context.
    ///
    /// ### 中文
    /// 构建全部表面（对每个表面执行 `init`），除非 `config.foreground` 否则启动渲染线程，
    /// 并在 `config.fps > 0` 时于返回前产出第一帧。
    ///
    /// #### 参数
    /// - `config`：尺寸、帧率、模式与传输策略。
    /// - `renderable`：绘制回调。
    /// - `gpu`：绑定到呈现上下文的后端。
    pub fn new(
        config: RendererConfig,
        renderable: impl Renderable + 'static,
        gpu: Arc<dyn GpuBackend>,
    ) -> Result<Self, RenderError> {
        assert!(
            config.size.width != 0 && config.size.height != 0,
            "renderer size must be non-zero"
        );
        assert!(
            config.fps.is_finite() && config.fps >= 0.0,
            "invalid fps {}",
            config.fps
        );
        global::ensure_initialized();

        let strategy = select_strategy(config.transfer, &*gpu);
        let format = Self::format_for(config.monochrome);
        let mut renderable: Box<dyn Renderable> = Box::new(renderable);

        let mut surfaces: Vec<RenderSurface> = Vec::with_capacity(strategy.ring_size());
        for index in 0..strategy.ring_size() {
            let mut surface = RenderSurface::new(format, config.size);
            if !renderable.init(surface.canvas_mut()) {
                log::warn!("init callback rejected surface {index}");
                for built in surfaces.iter_mut().rev() {
                    renderable.fini(built.canvas_mut());
                }
                return Err(RenderError::InitRejected { surface: index });
            }
            surfaces.push(surface);
        }

        let shared = Arc::new(RendererShared::new(
            config.size,
            config.fps,
            strategy,
            surfaces,
            renderable,
        ));
        log::debug!(
            "renderer {} created: {}x{} {:?}, {} surfaces, fps {}",
            shared.id,
            config.size.width,
            config.size.height,
            format,
            shared.slots().len(),
            config.fps
        );

        let mut renderer = Self {
            shared,
            gpu,
            worker: None,
            foreground: config.foreground,
            presenter: Mutex::new(Presenter::new(config.monochrome)),
        };
        renderer.resume()?;
        Ok(renderer)
    }

    pub fn width(&self) -> u32 {
        self.shared.size.width
    }

    pub fn height(&self) -> u32 {
        self.shared.size.height
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.shared.size
    }

    pub fn fps(&self) -> f64 {
        self.shared.state().fps
    }

    /// ### English
    /// Changes the periodic rate; the render thread picks it up immediately.
    ///
    /// ### 中文
    /// 修改周期帧率；渲染线程会立即生效。
    pub fn set_fps(&self, fps: f64) {
        assert!(fps.is_finite() && fps >= 0.0, "invalid fps {fps}");
        let mut state = self.shared.state();
        if state.fps != fps {
            state.fps = fps;
            drop(state);
            self.shared.wake.notify_all();
        }
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn monochrome(&self) -> Option<[f32; 3]> {
        self.presenter().tint
    }

    /// ### English
    /// Sampling filter used when drawing. Takes effect on the next draw.
    ///
    /// ### 中文
    /// 绘制时使用的采样过滤方式。下一次绘制即生效。
    pub fn set_texture_filter(&self, filter: TextureFilter) {
        self.presenter().filter = filter;
    }

    pub fn texture_filter(&self) -> TextureFilter {
        self.presenter().filter
    }

    /// ### English
    /// Replaces the built-in quad program with a caller-owned one (`None` restores the built-in).
    /// The renderer never deletes it; keep it alive while it is set.
    ///
    /// ### 中文
    /// 用调用方持有的程序替换内置四边形程序（`None` 恢复内置程序）。
    /// 渲染器从不删除它；设置期间请保持其有效。
    pub fn set_shader(&self, program: Option<ProgramId>) {
        self.presenter().program = program;
    }

    pub fn shader(&self) -> Option<ProgramId> {
        self.presenter().program
    }

    /// ### English
    /// Requests one frame without waiting. In foreground mode the frame is rendered now.
    ///
    /// ### 中文
    /// 请求一帧但不等待。前台模式下立即渲染该帧。
    pub fn once(&self) {
        if self.foreground {
            self.shared.produce_frame();
            return;
        }
        self.shared.state().requested = true;
        self.shared.wake.notify_all();
    }

    /// ### English
    /// Renders one frame that starts after this call and returns once it is published (including
    /// its upload when an uploader is attached). Periodic pacing is suspended meanwhile.
    ///
    /// ### 中文
    /// 渲染一帧（在本调用之后开始），并在其发布后返回（挂接上传器时包括上传）。期间暂停周期节拍。
    pub fn once_wait(&self) {
        if self.foreground {
            self.shared.produce_frame();
            return;
        }

        let mut state = self.shared.state();
        let target = state.passes_started + 1;
        let epoch = state.epoch;
        state.demand_through = state.demand_through.max(target);
        self.shared.wake.notify_all();

        while state.passes_completed < target && state.epoch == epoch {
            state = self
                .shared
                .render_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// ### English
    /// Texture of the most recent frame, bringing it up to date first. `None` until a frame has
    /// been produced (and, with an uploader, transferred).
    ///
    /// ### 中文
    /// 最新一帧的纹理（先将其更新到位）。在产出第一帧（挂接上传器时还需完成传输）之前返回 `None`。
    pub fn texture(&self) -> Option<TextureId> {
        self.presenter().prepare(&self.shared, &*self.gpu)
    }

    /// ### English
    /// Draws the whole canvas into the rectangle `pos`/`size` under `pvm`. Draws nothing if no
    /// frame is ready.
    ///
    /// ### 中文
    /// 在 `pvm` 变换下将整个画布绘制到矩形 `pos`/`size`。若没有就绪帧则不绘制。
    pub fn draw(&self, pos: [f32; 2], size: [f32; 2], pvm: &[f32; 16]) {
        let full = [self.width() as f32, self.height() as f32];
        self.draw_subrect([0.0, 0.0], full, pos, size, pvm);
    }

    /// ### English
    /// Draws the canvas pixels `src_pos`/`src_size` into the rectangle `pos`/`size` under `pvm`.
    ///
    /// ### 中文
    /// 在 `pvm` 变换下将画布像素区域 `src_pos`/`src_size` 绘制到矩形 `pos`/`size`。
    pub fn draw_subrect(
        &self,
        src_pos: [f32; 2],
        src_size: [f32; 2],
        pos: [f32; 2],
        size: [f32; 2],
        pvm: &[f32; 16],
    ) {
        let geometry = QuadGeometry::new(self.width(), self.height(), src_pos, src_size, pos, size);
        let mut presenter = self.presenter();
        let Some(texture) = presenter.prepare(&self.shared, &*self.gpu) else {
            return;
        };
        presenter.draw(&*self.gpu, texture, geometry, pvm);
    }

    /// ### English
    /// `None` selects full color; `Some(rgb)` an alpha-only canvas tinted with `rgb`. Changing only
    /// the color is immediate; changing the mode rebuilds every surface.
    ///
    /// ### 中文
    /// `None` 表示全彩；`Some(rgb)` 表示以 `rgb` 着色的仅 alpha 画布。只改颜色立即生效；
    /// 改变模式会重建所有表面。
    pub fn set_monochrome(&mut self, monochrome: Option<[f32; 3]>) -> Result<(), RenderError> {
        let mode_changed = self.presenter().tint.is_some() != monochrome.is_some();
        self.presenter().tint = monochrome;
        if mode_changed {
            self.rebuild_surfaces(Self::format_for(monochrome))?;
        }
        Ok(())
    }

    /// ### English
    /// Switches between a background render thread and rendering on the caller. Rebuilds every
    /// surface.
    ///
    /// ### 中文
    /// 在后台渲染线程与调用线程渲染之间切换。会重建所有表面。
    pub fn set_foreground(&mut self, foreground: bool) -> Result<(), RenderError> {
        if self.foreground == foreground {
            return Ok(());
        }
        self.stop_worker();
        self.foreground = foreground;
        self.rebuild_surfaces(Self::format_for(self.monochrome()))
    }

    /// ### English
    /// Attaches, replaces or detaches the shared uploader. Surfaces keep their pixels but their GPU
    /// objects are released through the backend that created them.
    ///
    /// Attaching an uploader to an on-demand renderer that has shown a frame renders one more
    /// frame, so the texture returned by `texture` does not disappear until the next `once`.
    /// On detach the presenter re-uploads the kept pixels itself.
    ///
    /// ### 中文
    /// 挂接、替换或解除共享上传器。表面保留像素，但其 GPU 对象会通过创建它们的后端释放。
    ///
    /// 向已显示过帧的按需渲染器挂接上传器时，会再渲染一帧，使 `texture` 返回的纹理
    /// 不会消失到下一次 `once` 为止。解除挂接时由呈现器自行重新上传保留的像素。
    pub fn set_uploader(&mut self, uploader: Option<Uploader>) -> Result<(), RenderError> {
        let unchanged = match (&self.shared.state().uploader, &uploader) {
            (Some(current), Some(next)) => current.ptr_eq(next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        self.stop_worker();
        let (previous, shown) = {
            let mut state = self.shared.state();
            let shown = state.ring.ready().is_some() || state.ring.presenting().is_some();
            (state.uploader.take(), shown)
        };
        if let Some(previous) = &previous {
            previous.detach(self.shared.id);
        }
        let owner = self.surface_gpu(previous.as_ref());
        for index in 0..self.shared.slots().len() {
            self.shared
                .slot(index)
                .release_gpu_resources(&*owner, self.shared.strategy());
        }
        log::debug!(
            "renderer {}: uploader {}",
            self.shared.id,
            if uploader.is_some() { "attached" } else { "detached" }
        );
        let attached = uploader.is_some();
        self.shared.state().uploader = uploader;
        drop(previous);

        self.resume()?;
        if attached && shown && self.fps() == 0.0 {
            self.once_wait();
        }
        Ok(())
    }

    /// ### English
    /// Attached uploader, if any.
    ///
    /// ### 中文
    /// 当前挂接的上传器（若有）。
    pub fn uploader(&self) -> Option<Uploader> {
        self.shared.state().uploader.clone()
    }

    fn format_for(monochrome: Option<[f32; 3]>) -> CanvasFormat {
        if monochrome.is_some() {
            CanvasFormat::A8
        } else {
            CanvasFormat::Argb32
        }
    }

    /// ### English
    /// Backend owning the surfaces' GPU objects: the uploader's when one created them.
    ///
    /// ### 中文
    /// 持有表面 GPU 对象的后端：若由上传器创建则为上传器的后端。
    fn surface_gpu(&self, uploader: Option<&Uploader>) -> Arc<dyn GpuBackend> {
        match uploader {
            Some(uploader) => uploader.gpu().clone(),
            None => self.gpu.clone(),
        }
    }

    fn presenter(&self) -> MutexGuard<'_, Presenter> {
        self.presenter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Starts the render thread (unless foreground) and produces a frame when rendering
    /// periodically.
    ///
    /// ### 中文
    /// 启动渲染线程（前台模式除外），并在周期渲染时产出一帧。
    fn resume(&mut self) -> Result<(), RenderError> {
        if !self.foreground && self.worker.is_none() {
            self.worker = Some(worker::spawn(&self.shared)?);
        }
        if self.fps() > 0.0 {
            self.once_wait();
        }
        Ok(())
    }

    /// ### English
    /// Cooperative shutdown of the render thread. A pass in progress (including its upload) is
    /// finished first.
    ///
    /// ### 中文
    /// 协作式关闭渲染线程。正在进行的出帧（包括其上传）会先完成。
    fn stop_worker(&mut self) {
        let Some(join) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.shared.state();
            state.shutdown = true;
            state.epoch += 1;
        }
        self.shared.wake.notify_all();
        self.shared.render_done.notify_all();
        if thread::current().id() != join.thread().id() {
            let _ = join.join();
        }

        let mut state = self.shared.state();
        state.shutdown = false;
        state.requested = false;
        state.demand_through = state.passes_started;
    }

    /// ### English
    /// Format switch: stop production, drain this instance's uploads, then `fini` + release +
    /// rebuild + `init` every surface. `init` may not reject here; a rejection is logged and the
    /// surface is kept.
    ///
    /// ### 中文
    /// 格式切换：停止出帧、排空本实例的上传，然后对每个表面执行 `fini` + 释放 + 重建 + `init`。
    /// 此处 `init` 不允许拒绝；若拒绝则记录日志并保留该表面。
    fn rebuild_surfaces(&mut self, format: CanvasFormat) -> Result<(), RenderError> {
        self.stop_worker();
        let uploader = self.uploader();
        if let Some(uploader) = &uploader {
            uploader.detach(self.shared.id);
        }
        let owner = self.surface_gpu(uploader.as_ref());
        drop(uploader);

        {
            let mut renderable = self.shared.renderable();
            for index in 0..self.shared.slots().len() {
                let mut slot = self.shared.slot(index);
                renderable.fini(slot.canvas_mut());
                slot.release_gpu_resources(&*owner, self.shared.strategy());
                *slot = RenderSurface::new(format, self.shared.size);
                if !renderable.init(slot.canvas_mut()) {
                    log::error!(
                        "renderer {}: init callback rejected surface {index} during a format switch; ignoring",
                        self.shared.id
                    );
                }
            }
        }
        self.shared.state().ring.reset();
        log::debug!("renderer {} rebuilt surfaces as {format:?}", self.shared.id);

        self.resume()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop_worker();

        let uploader = self.shared.state().uploader.take();
        if let Some(uploader) = &uploader {
            uploader.detach(self.shared.id);
        }
        let owner = self.surface_gpu(uploader.as_ref());

        {
            let mut renderable = self.shared.renderable();
            for index in 0..self.shared.slots().len() {
                let mut slot = self.shared.slot(index);
                renderable.fini(slot.canvas_mut());
                slot.release_gpu_resources(&*owner, self.shared.strategy());
            }
        }
        self.presenter().release(&*self.gpu);
        log::debug!("renderer {} destroyed", self.shared.id);
        drop(uploader);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::engine::canvas::Canvas;
    use crate::engine::gpu::HeadlessGpu;

    struct Counting {
        frames: Arc<AtomicUsize>,
    }

    impl Renderable for Counting {
        fn render(&mut self, canvas: &mut Canvas, _width: u32, _height: u32) {
            let frame = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
            canvas.data_mut().fill(frame as u8);
        }
    }

    fn counting() -> (Counting, Arc<AtomicUsize>) {
        let frames = Arc::new(AtomicUsize::new(0));
        (Counting { frames: frames.clone() }, frames)
    }

    #[test]
    fn foreground_renders_on_caller() {
        let gpu = HeadlessGpu::new();
        let (renderable, frames) = counting();
        let mut config = RendererConfig::new(4, 4);
        config.foreground = true;
        let renderer = Renderer::new(config, renderable, Arc::new(gpu.clone())).unwrap();

        assert!(renderer.worker.is_none());
        assert_eq!(renderer.texture(), None);

        renderer.once();
        assert_eq!(frames.load(Ordering::SeqCst), 1);
        let texture = renderer.texture().unwrap();
        assert_eq!(gpu.texture_pixels(texture), Some(vec![1; 64]));
    }

    #[test]
    fn once_wait_counts_one_pass_per_call() {
        let (renderable, frames) = counting();
        let renderer =
            Renderer::new(RendererConfig::new(2, 2), renderable, Arc::new(HeadlessGpu::new()))
                .unwrap();

        for expected in 1..=5 {
            renderer.once_wait();
            assert_eq!(frames.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn set_fps_wakes_idle_worker() {
        let (renderable, frames) = counting();
        let renderer =
            Renderer::new(RendererConfig::new(2, 2), renderable, Arc::new(HeadlessGpu::new()))
                .unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 0);

        renderer.set_fps(200.0);
        assert_eq!(renderer.fps(), 200.0);
        thread::sleep(Duration::from_millis(100));
        assert!(frames.load(Ordering::SeqCst) >= 2);

        renderer.set_fps(0.0);
    }

    #[test]
    fn color_only_change_keeps_surfaces() {
        let gpu = HeadlessGpu::new();
        let mut config = RendererConfig::new(2, 2);
        config.monochrome = Some([1.0, 0.0, 0.0]);
        let mut renderer =
            Renderer::new(config, |_: &mut Canvas, _: u32, _: u32| {}, Arc::new(gpu.clone()))
                .unwrap();
        renderer.once_wait();
        let texture = renderer.texture();
        assert!(texture.is_some());

        renderer.set_monochrome(Some([0.0, 1.0, 0.0])).unwrap();
        assert_eq!(renderer.monochrome(), Some([0.0, 1.0, 0.0]));
        assert_eq!(renderer.texture(), texture);
    }

    #[test]
    fn draw_settings_apply_to_next_draw() {
        let gpu = HeadlessGpu::new();
        let renderer = Renderer::new(
            RendererConfig::new(2, 2),
            |_: &mut Canvas, _: u32, _: u32| {},
            Arc::new(gpu.clone()),
        )
        .unwrap();
        renderer.once_wait();
        let pvm = ortho([0.0, 0.0, 2.0, 2.0]);
        let program = ProgramId(std::num::NonZeroU32::new(3).unwrap());

        assert_eq!(renderer.texture_filter(), TextureFilter::Linear);
        renderer.set_texture_filter(TextureFilter::Nearest);
        renderer.set_shader(Some(program));
        assert_eq!(renderer.shader(), Some(program));
        renderer.draw([0.0; 2], [2.0; 2], &pvm);
        let (_, draw) = gpu.last_draw().unwrap();
        assert_eq!(draw.filter, TextureFilter::Nearest);
        assert_eq!(draw.program, Some(program));

        renderer.set_shader(None);
        renderer.draw([0.0; 2], [2.0; 2], &pvm);
        assert_eq!(gpu.last_draw().unwrap().1.program, None);
    }

    #[test]
    fn uploader_objects_are_released_through_the_uploader_backend() {
        let presenter_gpu = HeadlessGpu::new();
        let upload_gpu = HeadlessGpu::new();
        let uploader = Uploader::new(Arc::new(upload_gpu.clone())).unwrap();
        let (renderable, frames) = counting();
        let mut renderer =
            Renderer::new(RendererConfig::new(4, 4), renderable, Arc::new(presenter_gpu.clone()))
                .unwrap();

        renderer.set_uploader(Some(uploader.clone())).unwrap();
        assert!(renderer.uploader().is_some_and(|current| current.ptr_eq(&uploader)));
        assert_eq!(frames.load(Ordering::SeqCst), 0);
        renderer.once_wait();
        assert!(renderer.texture().is_some());
        assert_eq!(upload_gpu.stats().live_textures, 1);
        assert_eq!(presenter_gpu.stats().live_textures, 0);

        renderer.set_uploader(None).unwrap();
        assert!(renderer.uploader().is_none());
        assert_eq!(upload_gpu.stats().live_textures, 0);
        assert_eq!(upload_gpu.stats().live_buffers, 0);
        assert!(renderer.texture().is_some());
        assert_eq!(presenter_gpu.stats().live_textures, 1);

        drop(renderer);
        assert_eq!(presenter_gpu.stats().live_textures, 0);
        assert_eq!(presenter_gpu.stats().live_buffers, 0);
    }

    #[test]
    fn attaching_an_uploader_keeps_the_shown_frame() {
        let gpu = HeadlessGpu::new();
        let (renderable, frames) = counting();
        let mut renderer =
            Renderer::new(RendererConfig::new(4, 4), renderable, Arc::new(gpu.clone())).unwrap();
        renderer.once_wait();
        assert!(renderer.texture().is_some());

        let uploader = Uploader::new(Arc::new(gpu.clone())).unwrap();
        renderer.set_uploader(Some(uploader)).unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 2);
        let texture = renderer.texture().unwrap();
        assert_eq!(gpu.texture_pixels(texture), Some(vec![2; 64]));

        drop(renderer);
        assert_eq!(gpu.stats().live_textures, 0);
        assert_eq!(gpu.stats().live_buffers, 0);
    }

    #[test]
    fn drop_releases_everything() {
        let gpu = HeadlessGpu::new();
        {
            let renderer = Renderer::new(
                RendererConfig::new(8, 8),
                |_: &mut Canvas, _: u32, _: u32| {},
                Arc::new(gpu.clone()),
            )
            .unwrap();
            renderer.once_wait();
            renderer.draw([0.0, 0.0], [8.0, 8.0], &ortho([0.0, 0.0, 8.0, 8.0]));
            assert_eq!(gpu.stats().draws, 1);
        }
        let stats = gpu.stats();
        assert_eq!(stats.live_textures, 0);
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_quads, 0);
    }
}

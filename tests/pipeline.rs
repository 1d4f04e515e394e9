use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mt_canvas_render::{
    Canvas, CanvasFormat, HeadlessGpu, PixelRect, PreviousFrame, RenderError, Renderable,
    Renderer, RendererConfig, TextureId, TransferMode, Uploader, ortho,
};
use pretty_assertions::assert_eq;

/// Fills every row with `frame + x + y` so misplaced rows or stale frames show up.
fn paint(canvas: &mut Canvas, frame: usize) {
    let bpp = canvas.format().bytes_per_pixel();
    for y in 0..canvas.height() {
        let row = canvas.row_mut(y);
        for (i, byte) in row.iter_mut().enumerate() {
            *byte = (frame + i / bpp + y as usize) as u8;
        }
    }
}

fn expected(format: CanvasFormat, width: u32, height: u32, frame: usize) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let mut out = Vec::new();
    for y in 0..height as usize {
        for i in 0..width as usize * bpp {
            out.push((frame + i / bpp + y) as u8);
        }
    }
    out
}

struct Gradient {
    frames: Arc<AtomicUsize>,
}

impl Renderable for Gradient {
    fn render(&mut self, canvas: &mut Canvas, _width: u32, _height: u32) {
        let frame = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        paint(canvas, frame);
    }
}

fn gradient() -> (Gradient, Arc<AtomicUsize>) {
    let frames = Arc::new(AtomicUsize::new(0));
    (
        Gradient {
            frames: frames.clone(),
        },
        frames,
    )
}

#[derive(Default)]
struct Lifecycle {
    inits: Vec<CanvasFormat>,
    finis: Vec<CanvasFormat>,
}

struct Recording {
    log: Arc<Mutex<Lifecycle>>,
    reject_at: Option<usize>,
}

impl Renderable for Recording {
    fn render(&mut self, canvas: &mut Canvas, _width: u32, _height: u32) {
        canvas.data_mut().fill(0x80);
    }

    fn init(&mut self, canvas: &mut Canvas) -> bool {
        let mut log = self.log.lock().unwrap();
        if self.reject_at == Some(log.inits.len()) {
            return false;
        }
        log.inits.push(canvas.format());
        true
    }

    fn fini(&mut self, canvas: &mut Canvas) {
        self.log.lock().unwrap().finis.push(canvas.format());
    }
}

/// The presenter never blocks, so a busy periodic worker can make a single query come back empty.
fn wait_texture(renderer: &Renderer) -> TextureId {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(texture) = renderer.texture() {
            return texture;
        }
        assert!(Instant::now() < deadline, "no frame became ready");
        thread::sleep(Duration::from_millis(1));
    }
}

fn count(formats: &[CanvasFormat], format: CanvasFormat) -> usize {
    formats.iter().filter(|&&f| f == format).count()
}

#[test]
fn once_wait_produces_a_texture() {
    let gpu = HeadlessGpu::new();
    let (renderable, _) = gradient();
    let renderer =
        Renderer::new(RendererConfig::new(64, 64), renderable, Arc::new(gpu.clone())).unwrap();

    renderer.once_wait();
    let texture = renderer.texture().expect("frame ready after once_wait");
    assert_eq!(
        gpu.texture_pixels(texture),
        Some(expected(CanvasFormat::Argb32, 64, 64, 1))
    );
}

#[test]
fn periodic_renderer_rotates_without_caller() {
    let (renderable, frames) = gradient();
    let renderer = Renderer::new(
        RendererConfig::new(16, 16).with_fps(30.0),
        renderable,
        Arc::new(HeadlessGpu::new()),
    )
    .unwrap();

    // The constructor publishes the first frame before returning.
    wait_texture(&renderer);
    thread::sleep(Duration::from_millis(200));
    assert!(frames.load(Ordering::SeqCst) >= 2);
}

#[test]
fn on_demand_renderer_presents_nothing_until_asked() {
    let gpu = HeadlessGpu::new();
    let (renderable, frames) = gradient();
    let renderer =
        Renderer::new(RendererConfig::new(8, 8), renderable, Arc::new(gpu.clone())).unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(frames.load(Ordering::SeqCst), 0);
    assert_eq!(renderer.texture(), None);

    renderer.draw([0.0; 2], [8.0; 2], &ortho([0.0, 0.0, 8.0, 8.0]));
    assert_eq!(gpu.stats().draws, 0);

    renderer.once();
    wait_texture(&renderer);
}

#[test]
fn repeated_present_applies_once_per_frame() {
    let gpu = HeadlessGpu::new();
    let (renderable, _) = gradient();
    let renderer =
        Renderer::new(RendererConfig::new(8, 8), renderable, Arc::new(gpu.clone())).unwrap();

    renderer.once_wait();
    let first = renderer.texture();
    let second = renderer.texture();
    assert_eq!(first, second);
    assert_eq!(gpu.stats().buffer_applies, 1);

    renderer.once_wait();
    renderer.texture();
    renderer.texture();
    assert_eq!(gpu.stats().buffer_applies, 2);
}

#[test]
fn presenter_sees_the_latest_frame() {
    let gpu = HeadlessGpu::new();
    let (renderable, _) = gradient();
    let renderer =
        Renderer::new(RendererConfig::new(4, 4), renderable, Arc::new(gpu.clone())).unwrap();

    for frame in 1..=4 {
        renderer.once_wait();
        let texture = renderer.texture().unwrap();
        assert_eq!(
            gpu.texture_pixels(texture),
            Some(expected(CanvasFormat::Argb32, 4, 4, frame))
        );
    }
}

fn rendered_through(
    gpu: &HeadlessGpu,
    uploader: Option<Uploader>,
    config: RendererConfig,
) -> Vec<u8> {
    let (renderable, _) = gradient();
    let mut renderer = Renderer::new(config, renderable, Arc::new(gpu.clone())).unwrap();
    renderer.set_uploader(uploader).unwrap();
    renderer.once_wait();
    let texture = renderer.texture().unwrap();
    gpu.texture_pixels(texture).unwrap()
}

#[test]
fn uploader_and_synchronous_transfer_agree() {
    for coherent in [false, true] {
        for monochrome in [None, Some([1.0, 1.0, 1.0])] {
            let gpu = HeadlessGpu::new().with_coherent_mapping(coherent);
            let mut config = RendererConfig::new(5, 3);
            config.monochrome = monochrome;

            let synchronous = rendered_through(&gpu, None, config.clone());
            let uploader = Uploader::new(Arc::new(gpu.clone())).unwrap();
            let uploaded = rendered_through(&gpu, Some(uploader), config);

            let format = if monochrome.is_some() {
                CanvasFormat::A8
            } else {
                CanvasFormat::Argb32
            };
            assert_eq!(synchronous, expected(format, 5, 3, 1));
            assert_eq!(uploaded, synchronous);
        }
    }
}

#[test]
fn mapping_failure_still_delivers_pixels() {
    let gpu = HeadlessGpu::new();
    gpu.set_fail_mapping(true);
    let mut config = RendererConfig::new(4, 2);
    config.transfer = TransferMode::Orphaned;
    let (renderable, _) = gradient();
    let renderer = Renderer::new(config, renderable, Arc::new(gpu.clone())).unwrap();

    renderer.once_wait();
    let texture = renderer.texture().unwrap();
    assert_eq!(
        gpu.texture_pixels(texture),
        Some(expected(CanvasFormat::Argb32, 4, 2, 1))
    );
    assert_eq!(gpu.stats().direct_uploads, 1);
    assert_eq!(gpu.stats().buffer_applies, 0);
}

#[test]
fn coherent_backend_gets_three_surfaces() {
    let log = Arc::new(Mutex::new(Lifecycle::default()));
    let gpu = HeadlessGpu::new().with_coherent_mapping(true);
    let renderer = Renderer::new(
        RendererConfig::new(4, 4),
        Recording {
            log: log.clone(),
            reject_at: None,
        },
        Arc::new(gpu),
    )
    .unwrap();
    assert_eq!(log.lock().unwrap().inits.len(), 3);

    drop(renderer);
    assert_eq!(log.lock().unwrap().finis.len(), 3);
}

#[test]
fn rejected_init_unwinds_built_surfaces() {
    let log = Arc::new(Mutex::new(Lifecycle::default()));
    let result = Renderer::new(
        RendererConfig::new(4, 4),
        Recording {
            log: log.clone(),
            reject_at: Some(1),
        },
        Arc::new(HeadlessGpu::new()),
    );

    assert!(matches!(result, Err(RenderError::InitRejected { surface: 1 })));
    let log = log.lock().unwrap();
    assert_eq!(log.inits.len(), 1);
    assert_eq!(log.finis.len(), 1);
}

#[test]
fn destroying_one_instance_does_not_wait_for_the_other() {
    let latency = Duration::from_millis(300);
    let gpu = HeadlessGpu::new().with_fence_latency(latency);
    let uploader = Uploader::new(Arc::new(gpu.clone())).unwrap();

    let (renderable, _) = gradient();
    let mut busy =
        Renderer::new(RendererConfig::new(8, 8), renderable, Arc::new(gpu.clone())).unwrap();
    busy.set_uploader(Some(uploader.clone())).unwrap();

    let (renderable, victim_frames) = gradient();
    let mut victim =
        Renderer::new(RendererConfig::new(8, 8), renderable, Arc::new(gpu.clone())).unwrap();
    victim.set_uploader(Some(uploader.clone())).unwrap();

    thread::scope(|scope| {
        let busy = &busy;
        let worker = scope.spawn(move || {
            for _ in 0..6 {
                busy.once_wait();
            }
        });

        victim.once();
        let deadline = Instant::now() + Duration::from_secs(5);
        while victim_frames.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "victim never rendered");
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        drop(victim);
        let elapsed = started.elapsed();

        assert!(
            elapsed < latency * 3,
            "destruction waited {elapsed:?}, longer than its own transfer needs"
        );
        assert!(!worker.is_finished(), "other instance finished first");
        worker.join().unwrap();
    });

    assert!(busy.texture().is_some());
    drop(busy);
    assert_eq!(uploader.outstanding(), 0);
    assert_eq!(gpu.stats().live_textures, 0);
    assert_eq!(gpu.stats().live_fences, 0);
}

#[test]
fn switching_to_monochrome_rebuilds_every_surface() {
    let gpu = HeadlessGpu::new();
    let baseline = gpu.stats();
    let log = Arc::new(Mutex::new(Lifecycle::default()));
    let mut renderer = Renderer::new(
        RendererConfig::new(6, 6).with_fps(30.0),
        Recording {
            log: log.clone(),
            reject_at: None,
        },
        Arc::new(gpu.clone()),
    )
    .unwrap();
    wait_texture(&renderer);
    assert_eq!(gpu.stats().live_textures, 1);
    renderer.draw([0.0; 2], [6.0; 2], &ortho([0.0, 0.0, 6.0, 6.0]));

    renderer.set_monochrome(Some([0.2, 0.4, 0.6])).unwrap();
    {
        let log = log.lock().unwrap();
        assert_eq!(count(&log.inits, CanvasFormat::Argb32), 2);
        assert_eq!(count(&log.finis, CanvasFormat::Argb32), 2);
        assert_eq!(count(&log.inits, CanvasFormat::A8), 2);
        assert_eq!(count(&log.finis, CanvasFormat::A8), 0);
    }
    let stats = gpu.stats();
    assert_eq!(stats.live_textures, baseline.live_textures);
    assert_eq!(stats.live_buffers, baseline.live_buffers);
    assert_eq!(stats.live_fences, baseline.live_fences);

    let texture = wait_texture(&renderer);
    assert_eq!(gpu.texture_pixels(texture), Some(vec![0x80; 36]));
    assert_eq!(renderer.monochrome(), Some([0.2, 0.4, 0.6]));

    drop(renderer);
    let log = log.lock().unwrap();
    assert_eq!(count(&log.finis, CanvasFormat::A8), 2);
    let stats = gpu.stats();
    assert_eq!(stats.live_textures, baseline.live_textures);
    assert_eq!(stats.live_quads, baseline.live_quads);
}

#[test]
fn foreground_toggle_keeps_rendering() {
    let (renderable, frames) = gradient();
    let gpu = HeadlessGpu::new();
    let mut renderer =
        Renderer::new(RendererConfig::new(4, 4), renderable, Arc::new(gpu.clone())).unwrap();

    renderer.set_foreground(true).unwrap();
    assert!(renderer.is_foreground());
    renderer.once();
    assert_eq!(frames.load(Ordering::SeqCst), 1);

    renderer.set_foreground(false).unwrap();
    renderer.once_wait();
    assert_eq!(frames.load(Ordering::SeqCst), 2);
    assert!(renderer.texture().is_some());
}

#[test]
fn unmappable_coherent_buffers_fall_back_to_direct_uploads() {
    for via_uploader in [false, true] {
        let gpu = HeadlessGpu::new().with_coherent_mapping(true);
        gpu.set_fail_coherent_mapping(true);
        let (renderable, _) = gradient();
        let mut renderer =
            Renderer::new(RendererConfig::new(4, 2), renderable, Arc::new(gpu.clone())).unwrap();
        if via_uploader {
            let uploader = Uploader::new(Arc::new(gpu.clone())).unwrap();
            renderer.set_uploader(Some(uploader)).unwrap();
        }

        renderer.once_wait();
        let texture = renderer.texture().expect("direct upload still yields a frame");
        assert_eq!(
            gpu.texture_pixels(texture),
            Some(expected(CanvasFormat::Argb32, 4, 2, 1))
        );
        let stats = gpu.stats();
        assert_eq!(stats.direct_uploads, 1, "via_uploader={via_uploader}");
        assert_eq!(stats.buffer_applies, 0);
        assert_eq!(stats.live_buffers, 0);

        renderer.once_wait();
        let texture = renderer.texture().unwrap();
        assert_eq!(
            gpu.texture_pixels(texture),
            Some(expected(CanvasFormat::Argb32, 4, 2, 2))
        );

        drop(renderer);
        assert_eq!(gpu.stats().live_textures, 0);
    }
}

#[test]
fn format_switch_with_an_uploader_attached() {
    let gpu = HeadlessGpu::new().with_fence_latency(Duration::from_millis(5));
    let uploader = Uploader::new(Arc::new(gpu.clone())).unwrap();
    let log = Arc::new(Mutex::new(Lifecycle::default()));
    let mut renderer = Renderer::new(
        RendererConfig::new(6, 6).with_fps(60.0),
        Recording {
            log: log.clone(),
            reject_at: None,
        },
        Arc::new(gpu.clone()),
    )
    .unwrap();
    renderer.set_uploader(Some(uploader.clone())).unwrap();
    wait_texture(&renderer);

    renderer.set_monochrome(Some([1.0, 1.0, 1.0])).unwrap();
    let texture = wait_texture(&renderer);
    assert_eq!(gpu.texture_pixels(texture), Some(vec![0x80; 36]));

    renderer.set_foreground(true).unwrap();
    renderer.once();
    let texture = wait_texture(&renderer);
    assert_eq!(gpu.texture_pixels(texture), Some(vec![0x80; 36]));
    {
        let log = log.lock().unwrap();
        assert_eq!(count(&log.finis, CanvasFormat::Argb32), 2);
        assert_eq!(count(&log.inits, CanvasFormat::A8), 4);
        assert_eq!(count(&log.finis, CanvasFormat::A8), 2);
    }

    drop(renderer);
    assert_eq!(uploader.outstanding(), 0);
    let stats = gpu.stats();
    assert_eq!(stats.live_textures, 0);
    assert_eq!(stats.live_buffers, 0);
    assert_eq!(stats.live_fences, 0);
    assert_eq!(count(&log.lock().unwrap().finis, CanvasFormat::A8), 4);
}

#[test]
fn once_wait_takes_the_place_of_the_periodic_frame() {
    let (renderable, frames) = gradient();
    let renderer = Renderer::new(
        RendererConfig::new(4, 4).with_fps(1.0),
        renderable,
        Arc::new(HeadlessGpu::new()),
    )
    .unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 1);

    thread::sleep(Duration::from_millis(500));
    let started = Instant::now();
    renderer.once_wait();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(frames.load(Ordering::SeqCst), 2);

    // The next periodic frame is due a full period after the on-demand one.
    thread::sleep(Duration::from_millis(750));
    assert_eq!(frames.load(Ordering::SeqCst), 2);
    thread::sleep(Duration::from_millis(500));
    assert_eq!(frames.load(Ordering::SeqCst), 3);
}

#[test]
fn unchanged_regions_can_be_carried_over() {
    struct Partial {
        frames: usize,
        carried: Arc<AtomicUsize>,
    }

    impl Renderable for Partial {
        fn render(&mut self, canvas: &mut Canvas, _width: u32, _height: u32) {
            self.frames += 1;
            paint(canvas, self.frames);
        }

        fn render_with_previous(
            &mut self,
            canvas: &mut Canvas,
            previous: &PreviousFrame,
            width: u32,
            height: u32,
        ) {
            if !previous.is_available() {
                return self.render(canvas, width, height);
            }
            self.frames += 1;
            let top = PixelRect { x: 0, y: 0, w: width, h: height / 2 };
            assert!(previous.blit_into(canvas, &[top]));
            self.carried.fetch_add(1, Ordering::SeqCst);
            for y in height / 2..height {
                canvas.row_mut(y).fill(0xEE);
            }
        }
    }

    let gpu = HeadlessGpu::new().with_coherent_mapping(true);
    let carried = Arc::new(AtomicUsize::new(0));
    let renderable = Partial {
        frames: 0,
        carried: carried.clone(),
    };
    let renderer =
        Renderer::new(RendererConfig::new(4, 4), renderable, Arc::new(gpu.clone())).unwrap();

    for _ in 0..4 {
        renderer.once_wait();
    }
    assert_eq!(carried.load(Ordering::SeqCst), 3);

    let texture = renderer.texture().unwrap();
    let mut want = expected(CanvasFormat::Argb32, 4, 4, 1);
    want[32..].fill(0xEE);
    assert_eq!(gpu.texture_pixels(texture), Some(want));
}

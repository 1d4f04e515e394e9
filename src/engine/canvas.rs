//! ### English
//! CPU-side raster canvas written by the render callback.
//!
//! ### 中文
//! 由渲染回调写入的 CPU 侧光栅画布。

use dpi::PhysicalSize;

/// ### English
/// Pixel layout of a canvas.
///
/// ### 中文
/// 画布的像素布局。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanvasFormat {
    /// ### English
    /// 32-bit premultiplied ARGB, stored as native-endian `u32` (BGRA bytes on little-endian).
    ///
    /// ### 中文
    /// 32 位预乘 ARGB，按本机字节序 `u32` 存储（小端机器上为 BGRA 字节序）。
    Argb32,
    /// ### English
    /// 8-bit alpha only (composited with a tint color at draw time).
    ///
    /// ### 中文
    /// 仅 8 位 alpha（绘制时与着色颜色合成）。
    A8,
}

impl CanvasFormat {
    /// ### English
    /// Bytes per pixel.
    ///
    /// ### 中文
    /// 每像素字节数。
    #[inline]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Argb32 => 4,
            Self::A8 => 1,
        }
    }

    /// ### English
    /// Row stride for `width` pixels, rounded up to a 4-byte boundary.
    ///
    /// ### 中文
    /// `width` 像素对应的行跨度，向上对齐到 4 字节。
    #[inline]
    pub const fn stride_for_width(self, width: u32) -> usize {
        (width as usize * self.bytes_per_pixel() + 3) & !3
    }
}

/// ### English
/// Axis-aligned pixel rectangle inside a canvas.
///
/// ### 中文
/// 画布内的轴对齐像素矩形。
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    /// ### English
    /// Whether the rectangle starts inside `size` and does not extend past it.
    ///
    /// ### 中文
    /// 矩形起点是否位于 `size` 内且不超出其范围。
    pub fn lies_within(&self, size: PhysicalSize<u32>) -> bool {
        self.x < size.width
            && self.y < size.height
            && self.x.checked_add(self.w).is_some_and(|right| right <= size.width)
            && self.y.checked_add(self.h).is_some_and(|bottom| bottom <= size.height)
    }
}

/// ### English
/// Fixed-size raster owned by exactly one ring role at a time.
///
/// ### 中文
/// 固定尺寸的光栅画布；任意时刻只属于环中的一个角色。
pub struct Canvas {
    format: CanvasFormat,
    size: PhysicalSize<u32>,
    stride: usize,
    data: Vec<u8>,
}

impl Canvas {
    /// ### English
    /// Creates a cleared (fully transparent) canvas.
    ///
    /// ### 中文
    /// 创建一个已清空（全透明）的画布。
    pub fn new(format: CanvasFormat, size: PhysicalSize<u32>) -> Self {
        assert!(size.width != 0 && size.height != 0, "canvas size must be non-zero");
        let stride = format.stride_for_width(size.width);
        Self {
            format,
            size,
            stride,
            data: vec![0; stride * size.height as usize],
        }
    }

    pub fn format(&self) -> CanvasFormat {
        self.format
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    /// ### English
    /// Row stride in bytes (may exceed `width * bytes_per_pixel`).
    ///
    /// ### 中文
    /// 行跨度（字节），可能大于 `width * bytes_per_pixel`。
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// ### English
    /// Raw pixel bytes, `stride * height` long.
    ///
    /// ### 中文
    /// 原始像素字节，长度为 `stride * height`。
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// ### English
    /// One pixel row (without the stride padding).
    ///
    /// ### 中文
    /// 单行像素（不含跨度填充）。
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let len = self.row_bytes();
        &mut self.data[start..start + len]
    }

    /// ### English
    /// Resets every byte to zero.
    ///
    /// ### 中文
    /// 将所有字节清零。
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// ### English
    /// Copies `rects` from `src` into the same positions of this canvas.
    ///
    /// Both canvases must share format and size, and every rectangle must lie inside them.
    ///
    /// ### 中文
    /// 将 `src` 中的 `rects` 复制到本画布的相同位置。
    ///
    /// 两个画布必须格式与尺寸一致，且每个矩形都必须位于画布内部。
    pub fn copy_rects_from(&mut self, src: &Canvas, rects: &[PixelRect]) {
        assert_eq!(self.format, src.format);
        assert_eq!(self.size, src.size);

        let bpp = self.format.bytes_per_pixel();
        for rect in rects {
            assert!(rect.lies_within(self.size), "{rect:?} outside {:?}", self.size);

            let offset = rect.x as usize * bpp;
            let len = rect.w as usize * bpp;
            for row in rect.y..rect.y + rect.h {
                let start = row as usize * self.stride + offset;
                self.data[start..start + len].copy_from_slice(&src.data[start..start + len]);
            }
        }
    }

    #[inline]
    fn row_bytes(&self) -> usize {
        self.size.width as usize * self.format.bytes_per_pixel()
    }
}

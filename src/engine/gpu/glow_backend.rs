//! ### English
//! OpenGL 3.3 core backend built on `glow`.
//!
//! ### 中文
//! 基于 `glow` 的 OpenGL 3.3 core 后端。

use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::num::NonZeroU64;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use glow::HasContext as _;

use super::{
    BufferId, BufferMode, FenceId, FenceStatus, GpuBackend, GpuError, PixelLayout, ProgramId,
    QuadDraw, QuadId, QuadVertex, TextureFilter, TextureId,
};
use crate::engine::canvas::CanvasFormat;

const QUAD_VERTEX_SHADER: &str = r#"#version 330 core
uniform mat4 pvm;
layout(location = 0) in vec3 vtx_pos;
layout(location = 1) in vec2 vtx_tex0;
out vec2 tex_coord;
void main() {
    tex_coord = vtx_tex0;
    gl_Position = pvm * vec4(vtx_pos, 1.0);
}
"#;

const QUAD_FRAGMENT_SHADER: &str = r#"#version 330 core
uniform sampler2D tex;
uniform int monochrome;
uniform vec3 color;
in vec2 tex_coord;
out vec4 frag_color;
void main() {
    if (monochrome != 0) {
        float alpha = texture(tex, tex_coord).r;
        frag_color = vec4(color * alpha, alpha);
    } else {
        frag_color = texture(tex, tex_coord);
    }
}
"#;

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// ### English
/// Parses the leading `major.minor` out of a `GL_VERSION` string.
/// Expected forms: `"4.6.0 ..."` or `"OpenGL ES 3.2 ..."`.
///
/// ### 中文
/// 从 `GL_VERSION` 字符串中解析开头的 `major.minor`。
/// 期望形式：`"4.6.0 ..."` 或 `"OpenGL ES 3.2 ..."`。
fn parse_gl_version(version: &str) -> (u32, u32) {
    let Some(token) = version
        .split_whitespace()
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))
    else {
        return (0, 0);
    };
    let mut parts = token.split('.');
    let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (major, minor)
}

struct QuadProgram {
    program: glow::NativeProgram,
    pvm: Option<glow::NativeUniformLocation>,
    texture: Option<glow::NativeUniformLocation>,
    monochrome: Option<glow::NativeUniformLocation>,
    color: Option<glow::NativeUniformLocation>,
}

struct QuadObjects {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
    ibo: glow::NativeBuffer,
}

/// ### English
/// `GpuBackend` over a loaded GL context.
///
/// The context is created and shared by the host; this type only issues calls on whichever
/// thread currently has it bound. One instance per context: the presenter's context and the
/// uploader's shared context each get their own `GlowGpu`.
///
/// ### 中文
/// 基于已加载 GL 上下文的 `GpuBackend`。
///
/// 上下文由宿主创建并共享；本类型只在当前绑定了该上下文的线程上发出调用。
/// 每个上下文一个实例：呈现上下文与上传器的共享上下文各自拥有一个 `GlowGpu`。
pub struct GlowGpu {
    gl: glow::Context,
    make_current: Option<Box<dyn Fn() + Send + Sync>>,
    coherent: bool,
    /// ### English
    /// Persistently mapped pointers of coherent transfer buffers, keyed by buffer name.
    ///
    /// ### 中文
    /// 一致映射传输缓冲的持久映射指针，以缓冲名为键。
    mapped: Mutex<HashMap<u32, (*mut u8, usize)>>,
    quads: Mutex<HashMap<u32, QuadObjects>>,
    program: Mutex<Option<QuadProgram>>,
}

// GL objects and mapped pointers are only touched on the thread that has the context current.
unsafe impl Send for GlowGpu {}
unsafe impl Sync for GlowGpu {}

impl GlowGpu {
    /// ### English
    /// Wraps an already loaded context. Coherent mapping is detected from `GL_VERSION` (4.4+)
    /// or `GL_ARB_buffer_storage`.
    ///
    /// ### 中文
    /// 包装一个已加载的上下文。一致映射能力由 `GL_VERSION`（4.4+）或
    /// `GL_ARB_buffer_storage` 检测。
    pub fn new(gl: glow::Context) -> Self {
        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        let is_gles = version.starts_with("OpenGL ES");
        let (major, minor) = parse_gl_version(&version);
        let coherent = (!is_gles && (major, minor) >= (4, 4))
            || gl.supported_extensions().contains("GL_ARB_buffer_storage");
        log::debug!("GL context {version:?}: coherent transfer buffers = {coherent}");

        Self {
            gl,
            make_current: None,
            coherent,
            mapped: Mutex::new(HashMap::new()),
            quads: Mutex::new(HashMap::new()),
            program: Mutex::new(None),
        }
    }

    /// ### English
    /// Loads GL entry points through `get_proc_address`.
    ///
    /// #### Safety
    /// The context the loader resolves against must be current on the calling thread.
    ///
    /// ### 中文
    /// 通过 `get_proc_address` 加载 GL 函数入口。
    ///
    /// #### 安全性
    /// 加载器所对应的上下文必须在调用线程上为 current。
    pub unsafe fn from_loader_function(
        mut get_proc_address: impl FnMut(&std::ffi::CStr) -> *const c_void,
    ) -> Self {
        let gl = unsafe {
            glow::Context::from_loader_function(|name| match CString::new(name) {
                Ok(cstr) => get_proc_address(cstr.as_c_str()),
                Err(_) => std::ptr::null(),
            })
        };
        Self::new(gl)
    }

    /// ### English
    /// Installs a hook that binds this backend's context on the calling thread.
    ///
    /// ### 中文
    /// 安装一个在调用线程上绑定本后端上下文的钩子。
    pub fn with_make_current(mut self, make_current: impl Fn() + Send + Sync + 'static) -> Self {
        self.make_current = Some(Box::new(make_current));
        self
    }

    fn unpack_formats(format: CanvasFormat) -> (i32, u32) {
        match format {
            CanvasFormat::Argb32 => (glow::RGBA8 as i32, glow::BGRA),
            CanvasFormat::A8 => (glow::R8 as i32, glow::RED),
        }
    }

    /// ### English
    /// Sets unpack state for `layout`, runs `upload`, then restores defaults.
    ///
    /// ### 中文
    /// 按 `layout` 设置解包状态，执行 `upload`，然后恢复默认值。
    fn with_unpack_state(&self, texture: TextureId, layout: &PixelLayout, upload: impl FnOnce()) {
        let bpp = layout.format.bytes_per_pixel();
        unsafe {
            self.gl
                .bind_texture(glow::TEXTURE_2D, Some(glow::NativeTexture(texture.0)));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            self.gl
                .pixel_store_i32(glow::UNPACK_ROW_LENGTH, (layout.stride / bpp) as i32);
        }
        upload();
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, 0);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    fn compile_program(&self) -> Result<QuadProgram, GpuError> {
        let gl = &self.gl;
        unsafe {
            let program = gl.create_program().map_err(GpuError::Shader)?;
            let mut shaders = Vec::with_capacity(2);
            for (kind, source) in [
                (glow::VERTEX_SHADER, QUAD_VERTEX_SHADER),
                (glow::FRAGMENT_SHADER, QUAD_FRAGMENT_SHADER),
            ] {
                let shader = gl.create_shader(kind).map_err(GpuError::Shader)?;
                gl.shader_source(shader, source);
                gl.compile_shader(shader);
                if !gl.get_shader_compile_status(shader) {
                    let info = gl.get_shader_info_log(shader);
                    gl.delete_shader(shader);
                    gl.delete_program(program);
                    return Err(GpuError::Shader(info));
                }
                gl.attach_shader(program, shader);
                shaders.push(shader);
            }

            gl.link_program(program);
            for shader in shaders {
                gl.detach_shader(program, shader);
                gl.delete_shader(shader);
            }
            if !gl.get_program_link_status(program) {
                let info = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(GpuError::Shader(info));
            }

            Ok(QuadProgram {
                program,
                pvm: gl.get_uniform_location(program, "pvm"),
                texture: gl.get_uniform_location(program, "tex"),
                monochrome: gl.get_uniform_location(program, "monochrome"),
                color: gl.get_uniform_location(program, "color"),
            })
        }
    }

    /// ### English
    /// Uniform locations of a caller-provided program, looked up on every draw since the caller
    /// may relink it.
    ///
    /// ### 中文
    /// 调用方提供的程序的 uniform 位置；调用方可能重新链接该程序，因此每次绘制都重新查询。
    fn caller_program(&self, program: ProgramId) -> QuadProgram {
        let program = glow::NativeProgram(program.0);
        unsafe {
            QuadProgram {
                program,
                pvm: self.gl.get_uniform_location(program, "pvm"),
                texture: self
                    .gl
                    .get_uniform_location(program, "tex")
                    .or_else(|| self.gl.get_uniform_location(program, "texture")),
                monochrome: self.gl.get_uniform_location(program, "monochrome"),
                color: self.gl.get_uniform_location(program, "color"),
            }
        }
    }
}

impl GpuBackend for GlowGpu {
    fn make_current(&self) {
        if let Some(make_current) = &self.make_current {
            make_current();
        }
    }

    fn supports_coherent_mapping(&self) -> bool {
        self.coherent
    }

    fn create_texture(&self, layout: &PixelLayout) -> Result<TextureId, GpuError> {
        let (internal, format) = Self::unpack_formats(layout.format);
        unsafe {
            let texture = self
                .gl
                .create_texture()
                .map_err(|_| GpuError::Allocation("texture"))?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                layout.size.width as i32,
                layout.size.height as i32,
                0,
                format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            Ok(TextureId(texture.0))
        }
    }

    fn delete_texture(&self, texture: TextureId) {
        unsafe {
            self.gl.delete_texture(glow::NativeTexture(texture.0));
        }
    }

    fn create_transfer_buffer(&self, len: usize, mode: BufferMode) -> Result<BufferId, GpuError> {
        unsafe {
            let buffer = self
                .gl
                .create_buffer()
                .map_err(|_| GpuError::Allocation("transfer buffer"))?;
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(buffer));
            match mode {
                BufferMode::Stream => {
                    self.gl
                        .buffer_data_size(glow::PIXEL_UNPACK_BUFFER, len as i32, glow::STREAM_DRAW);
                }
                BufferMode::Coherent => {
                    let flags =
                        glow::MAP_WRITE_BIT | glow::MAP_PERSISTENT_BIT | glow::MAP_COHERENT_BIT;
                    self.gl
                        .buffer_storage(glow::PIXEL_UNPACK_BUFFER, len as i32, None, flags);
                    let ptr =
                        self.gl
                            .map_buffer_range(glow::PIXEL_UNPACK_BUFFER, 0, len as i32, flags);
                    if ptr.is_null() {
                        self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
                        self.gl.delete_buffer(buffer);
                        return Err(GpuError::MapFailed);
                    }
                    self.mapped
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(buffer.0.get(), (ptr, len));
                }
            }
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            Ok(BufferId(buffer.0))
        }
    }

    fn delete_transfer_buffer(&self, buffer: BufferId, mode: BufferMode) {
        let native = glow::NativeBuffer(buffer.0);
        unsafe {
            if mode == BufferMode::Coherent
                && self
                    .mapped
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&buffer.0.get())
                    .is_some()
            {
                self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(native));
                self.gl.unmap_buffer(glow::PIXEL_UNPACK_BUFFER);
                self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            }
            self.gl.delete_buffer(native);
        }
    }

    fn write_transfer_buffer(
        &self,
        buffer: BufferId,
        mode: BufferMode,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        match mode {
            BufferMode::Coherent => {
                let mapped = self.mapped.lock().unwrap_or_else(PoisonError::into_inner);
                let &(ptr, len) = mapped.get(&buffer.0.get()).ok_or(GpuError::MapFailed)?;
                assert!(bytes.len() <= len);
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
                }
                Ok(())
            }
            BufferMode::Stream => unsafe {
                let len = bytes.len() as i32;
                self.gl
                    .bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(glow::NativeBuffer(buffer.0)));
                // Orphan the previous storage so the driver never stalls on a pending read.
                self.gl
                    .buffer_data_size(glow::PIXEL_UNPACK_BUFFER, len, glow::STREAM_DRAW);
                let ptr = self.gl.map_buffer_range(
                    glow::PIXEL_UNPACK_BUFFER,
                    0,
                    len,
                    glow::MAP_WRITE_BIT | glow::MAP_INVALIDATE_BUFFER_BIT,
                );
                if ptr.is_null() {
                    self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
                    return Err(GpuError::MapFailed);
                }
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
                self.gl.unmap_buffer(glow::PIXEL_UNPACK_BUFFER);
                self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
                Ok(())
            },
        }
    }

    fn texture_from_buffer(&self, texture: TextureId, buffer: BufferId, layout: &PixelLayout) {
        let (internal, format) = Self::unpack_formats(layout.format);
        self.with_unpack_state(texture, layout, || unsafe {
            self.gl
                .bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(glow::NativeBuffer(buffer.0)));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                layout.size.width as i32,
                layout.size.height as i32,
                0,
                format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::BufferOffset(0),
            );
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
        });
    }

    fn texture_from_bytes(&self, texture: TextureId, layout: &PixelLayout, bytes: &[u8]) {
        let (internal, format) = Self::unpack_formats(layout.format);
        self.with_unpack_state(texture, layout, || unsafe {
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                layout.size.width as i32,
                layout.size.height as i32,
                0,
                format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(bytes)),
            );
        });
    }

    fn insert_fence(&self) -> Result<FenceId, GpuError> {
        let sync = unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(|_| GpuError::FenceUnavailable)?;
        NonZeroU64::new(sync.0 as usize as u64)
            .map(FenceId)
            .ok_or(GpuError::FenceUnavailable)
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> FenceStatus {
        let sync = glow::NativeFence(fence.0.get() as usize as *mut _);
        let timeout_ns = timeout.as_nanos().min(i32::MAX as u128) as i32;
        let status = unsafe {
            self.gl
                .client_wait_sync(sync, glow::SYNC_FLUSH_COMMANDS_BIT, timeout_ns)
        };
        match status {
            glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => FenceStatus::Signaled,
            glow::TIMEOUT_EXPIRED => FenceStatus::TimedOut,
            _ => {
                /*
                ### English
                `GL_WAIT_FAILED`: the sync object is unusable; waiting again cannot help.

                ### 中文
                `GL_WAIT_FAILED`：同步对象不可用，继续等待没有意义。
                */
                log::warn!("glClientWaitSync failed (status {status:#x}); treating fence as signaled");
                FenceStatus::Signaled
            }
        }
    }

    fn delete_fence(&self, fence: FenceId) {
        let sync = glow::NativeFence(fence.0.get() as usize as *mut _);
        unsafe {
            self.gl.delete_sync(sync);
        }
    }

    fn flush(&self) {
        unsafe {
            self.gl.flush();
        }
    }

    fn create_quad(&self) -> Result<QuadId, GpuError> {
        let gl = &self.gl;
        unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|_| GpuError::Allocation("vertex array"))?;
            let vbo = gl
                .create_buffer()
                .map_err(|_| GpuError::Allocation("vertex buffer"))?;
            let ibo = gl
                .create_buffer()
                .map_err(|_| GpuError::Allocation("index buffer"))?;

            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_size(
                glow::ARRAY_BUFFER,
                (4 * size_of::<QuadVertex>()) as i32,
                glow::DYNAMIC_DRAW,
            );
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ibo));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&QUAD_INDICES),
                glow::STATIC_DRAW,
            );

            let stride = size_of::<QuadVertex>() as i32;
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 3, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 12);

            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            self.quads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(vao.0.get(), QuadObjects { vao, vbo, ibo });
            Ok(QuadId(vao.0))
        }
    }

    fn update_quad(&self, quad: QuadId, vertices: &[QuadVertex; 4]) {
        let quads = self.quads.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(objects) = quads.get(&quad.0.get()) else {
            return;
        };
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(objects.vbo));
            self.gl.buffer_sub_data_u8_slice(
                glow::ARRAY_BUFFER,
                0,
                bytemuck::cast_slice(vertices.as_slice()),
            );
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
    }

    fn delete_quad(&self, quad: QuadId) {
        let removed = self
            .quads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&quad.0.get());
        if let Some(objects) = removed {
            unsafe {
                self.gl.delete_vertex_array(objects.vao);
                self.gl.delete_buffer(objects.vbo);
                self.gl.delete_buffer(objects.ibo);
            }
        }
    }

    fn draw_quad(&self, quad: QuadId, texture: TextureId, draw: &QuadDraw) {
        let mut builtin = self.program.lock().unwrap_or_else(PoisonError::into_inner);
        let caller;
        let program = match draw.program {
            Some(id) => {
                caller = self.caller_program(id);
                &caller
            }
            None => {
                if builtin.is_none() {
                    match self.compile_program() {
                        Ok(compiled) => *builtin = Some(compiled),
                        Err(err) => {
                            log::error!("quad program unavailable: {err}");
                            return;
                        }
                    }
                }
                let Some(program) = builtin.as_ref() else {
                    return;
                };
                program
            }
        };
        let filter = match draw.filter {
            TextureFilter::Linear => glow::LINEAR,
            TextureFilter::Nearest => glow::NEAREST,
        } as i32;
        unsafe {
            self.gl.use_program(Some(program.program));
            self.gl
                .uniform_matrix_4_f32_slice(program.pvm.as_ref(), false, &draw.pvm);
            self.gl.uniform_1_i32(program.texture.as_ref(), 0);
            match draw.tint {
                Some([r, g, b]) => {
                    self.gl.uniform_1_i32(program.monochrome.as_ref(), 1);
                    self.gl.uniform_3_f32(program.color.as_ref(), r, g, b);
                }
                None => self.gl.uniform_1_i32(program.monochrome.as_ref(), 0),
            }

            self.gl.active_texture(glow::TEXTURE0);
            self.gl
                .bind_texture(glow::TEXTURE_2D, Some(glow::NativeTexture(texture.0)));
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.bind_vertex_array(Some(glow::NativeVertexArray(quad.0)));
            self.gl
                .draw_elements(glow::TRIANGLES, QUAD_INDICES.len() as i32, glow::UNSIGNED_INT, 0);

            self.gl.bind_vertex_array(None);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            self.gl.use_program(None);
        }
    }
}

impl Drop for GlowGpu {
    fn drop(&mut self) {
        let program = self
            .program
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(program) = program {
            unsafe {
                self.gl.delete_program(program.program);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_gl_version;

    #[test]
    fn parses_desktop_and_es_version_strings() {
        assert_eq!(parse_gl_version("4.6.0 NVIDIA 550.54"), (4, 6));
        assert_eq!(parse_gl_version("OpenGL ES 3.2 Mesa 24.0"), (3, 2));
        assert_eq!(parse_gl_version("3.3 (Core Profile) Mesa"), (3, 3));
        assert_eq!(parse_gl_version("garbage"), (0, 0));
    }
}

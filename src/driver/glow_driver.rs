//! [`GlDriver`] backend over a live OpenGL context through [glow].
//!
//! [glow]: https://docs.rs/glow

use std::{num::NonZeroU32, sync::Arc};

use glow::{HasContext, PixelPackData, PixelUnpackData};
use rustc_hash::FxHashMap;

use super::{parse_gl_version, ActiveUniform, GlDriver, GlVersion};
use crate::{error::DriverError, types::Vertex};

/// Vertices the streaming buffer holds before it has to grow.
const INITIAL_STREAM_VERTICES: usize = 4096;

/// Attribute slot of the vertex position.
const POSITION_SLOT: u32 = 0;
/// Attribute slot of the first texture coordinate.
const TEXCOORD_SLOT: u32 = 2;
/// Attribute slot of the per-vertex color.
const COLOR_SLOT: u32 = 6;

/// Convert a `u32` to `i32` for GL API calls, saturating.
fn gl_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn gl_enum(value: u32) -> i32 {
    gl_size(value)
}

fn alloc_error(object: &'static str) -> impl FnOnce(String) -> DriverError {
    move |reason| DriverError::Allocation { object, reason }
}

fn texture(name: u32) -> Option<glow::Texture> {
    NonZeroU32::new(name).map(glow::NativeTexture)
}

fn program(name: u32) -> Option<glow::Program> {
    NonZeroU32::new(name).map(glow::NativeProgram)
}

fn location(location: i32) -> Option<glow::UniformLocation> {
    u32::try_from(location).ok().map(glow::NativeUniformLocation)
}

/// Binding point a texture image target belongs to.
fn binding_target(target: u32) -> u32 {
    if (glow::TEXTURE_CUBE_MAP_POSITIVE_X..=glow::TEXTURE_CUBE_MAP_NEGATIVE_Z).contains(&target) {
        glow::TEXTURE_CUBE_MAP
    } else {
        target
    }
}

/// What was uploaded to one level of one image target.
#[derive(Debug, Clone, Copy)]
struct LevelInfo {
    width: u32,
    height: u32,
    internal_format: u32,
    /// Byte size of compressed storage, `None` for uncompressed levels.
    compressed_size: Option<usize>,
}

/// Level metadata of every texture uploaded through the driver.
///
/// glow has no `glGetTexLevelParameter`, so level queries are answered
/// from what was uploaded instead of asking the context.
#[derive(Debug, Default)]
struct TextureLevels {
    active_unit: u32,
    bindings: FxHashMap<(u32, u32), u32>,
    levels: FxHashMap<(u32, u32, i32), LevelInfo>,
}

impl TextureLevels {
    fn bound(&self, target: u32) -> Option<u32> {
        self.bindings
            .get(&(self.active_unit, binding_target(target)))
            .copied()
            .filter(|&name| name != 0)
    }

    fn record(&mut self, target: u32, level: i32, info: LevelInfo) {
        if let Some(name) = self.bound(target) {
            self.levels.insert((name, target, level), info);
        }
    }

    /// Fill in the chain below level 0, as `glGenerateMipmap` does.
    fn generate(&mut self, target: u32) {
        let Some(name) = self.bound(target) else {
            return;
        };
        let Some(base) = self.levels.get(&(name, target, 0)).copied() else {
            return;
        };
        let (mut width, mut height, mut level) = (base.width, base.height, 0);
        while width > 1 || height > 1 {
            width = (width / 2).max(1);
            height = (height / 2).max(1);
            level += 1;
            self.levels.insert(
                (name, target, level),
                LevelInfo {
                    width,
                    height,
                    ..base
                },
            );
        }
    }

    fn forget(&mut self, name: u32) {
        self.levels.retain(|&(texture, _, _), _| texture != name);
        self.bindings.retain(|_, texture| *texture != name);
    }

    fn query(&self, target: u32, level: i32, pname: u32) -> i32 {
        let Some(info) = self
            .bound(target)
            .and_then(|name| self.levels.get(&(name, target, level)))
        else {
            return 0;
        };
        match pname {
            glow::TEXTURE_WIDTH => gl_size(info.width),
            glow::TEXTURE_HEIGHT => gl_size(info.height),
            glow::TEXTURE_INTERNAL_FORMAT => gl_enum(info.internal_format),
            glow::TEXTURE_COMPRESSED => i32::from(info.compressed_size.is_some()),
            glow::TEXTURE_COMPRESSED_IMAGE_SIZE => info
                .compressed_size
                .map_or(0, |size| i32::try_from(size).unwrap_or(i32::MAX)),
            _ => 0,
        }
    }
}

/// Issues render-core calls against an OpenGL 3.1+ context.
///
/// Owns the vertex array and streaming buffer used by immediate-mode
/// batches. Call [`destroy`](Self::destroy) before the context goes away.
pub struct GlowDriver {
    gl: Arc<glow::Context>,
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    /// Current size of [`vbo`](Self::vbo) in vertices.
    vbo_capacity: usize,
    textures: TextureLevels,
}

impl GlowDriver {
    /// Wrap a GL context and create the streaming vertex state.
    ///
    /// # Safety
    ///
    /// The `gl` context must be current and valid, and must stay current on
    /// this thread for every call made through the driver. The caller must
    /// call [`destroy`](Self::destroy) before the context is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Allocation`] if the vertex array or buffer
    /// cannot be created.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Result<Self, DriverError> {
        let (vao, vbo) = unsafe {
            let vao = gl.create_vertex_array().map_err(alloc_error("vertex array"))?;
            let vbo = gl.create_buffer().map_err(alloc_error("vertex buffer"))?;

            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_size(
                glow::ARRAY_BUFFER,
                gl_size(u32::try_from(INITIAL_STREAM_VERTICES).unwrap_or(u32::MAX))
                    * Vertex::STRIDE,
                glow::STREAM_DRAW,
            );
            gl.enable_vertex_attrib_array(POSITION_SLOT);
            gl.vertex_attrib_pointer_f32(POSITION_SLOT, 3, glow::FLOAT, false, Vertex::STRIDE, 0);
            gl.enable_vertex_attrib_array(COLOR_SLOT);
            gl.vertex_attrib_pointer_f32(
                COLOR_SLOT,
                4,
                glow::UNSIGNED_BYTE,
                true,
                Vertex::STRIDE,
                Vertex::COLOR_OFFSET,
            );
            gl.enable_vertex_attrib_array(TEXCOORD_SLOT);
            gl.vertex_attrib_pointer_f32(
                TEXCOORD_SLOT,
                2,
                glow::FLOAT,
                false,
                Vertex::STRIDE,
                Vertex::TEXCOORD_OFFSET,
            );
            gl.bind_vertex_array(None);

            // Row data handed to the core is tightly packed.
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            (vao, vbo)
        };

        Ok(Self {
            gl,
            vao,
            vbo,
            vbo_capacity: INITIAL_STREAM_VERTICES,
            textures: TextureLevels::default(),
        })
    }

    /// The context's `GL_VERSION`, parsed.
    #[must_use]
    pub fn version(&self) -> Option<GlVersion> {
        let version = unsafe { self.gl.get_parameter_string(glow::VERSION) };
        parse_gl_version(&version)
    }

    /// Delete the driver-owned GL objects.
    ///
    /// # Safety
    ///
    /// Requires the same current GL context as [`new`](Self::new).
    pub unsafe fn destroy(&self) {
        unsafe {
            self.gl.delete_vertex_array(self.vao);
            self.gl.delete_buffer(self.vbo);
        }
    }
}

/// Compile a single shader stage from source.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_shader(
    gl: &glow::Context,
    shader_type: u32,
    source: &str,
) -> Result<glow::Shader, DriverError> {
    unsafe {
        let shader = gl
            .create_shader(shader_type)
            .map_err(alloc_error("shader"))?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(DriverError::Compile(log));
        }

        Ok(shader)
    }
}

impl GlDriver for GlowDriver {
    type Fence = glow::Fence;

    fn get_error(&mut self) -> u32 {
        unsafe { self.gl.get_error() }
    }

    fn enable(&mut self, cap: u32) {
        unsafe { self.gl.enable(cap) };
    }

    fn disable(&mut self, cap: u32) {
        unsafe { self.gl.disable(cap) };
    }

    fn is_enabled(&mut self, cap: u32) -> bool {
        unsafe { self.gl.is_enabled(cap) }
    }

    fn get_parameter_i32(&mut self, pname: u32) -> i32 {
        unsafe { self.gl.get_parameter_i32(pname) }
    }

    fn active_texture(&mut self, unit: u32) {
        self.textures.active_unit = unit;
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn create_texture(&mut self) -> Result<u32, DriverError> {
        let texture = unsafe { self.gl.create_texture() }.map_err(alloc_error("texture"))?;
        Ok(texture.0.get())
    }

    fn delete_texture(&mut self, name: u32) {
        if let Some(texture) = texture(name) {
            unsafe { self.gl.delete_texture(texture) };
            self.textures.forget(name);
        }
    }

    fn bind_texture(&mut self, target: u32, name: u32) {
        let unit = self.textures.active_unit;
        self.textures.bindings.insert((unit, target), name);
        unsafe { self.gl.bind_texture(target, texture(name)) };
    }

    fn tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        unsafe {
            self.gl.tex_image_2d(
                target,
                level,
                gl_enum(internal_format),
                gl_size(width),
                gl_size(height),
                0,
                format,
                ty,
                PixelUnpackData::Slice(pixels),
            );
        }
        self.textures.record(
            target,
            level,
            LevelInfo {
                width,
                height,
                internal_format,
                compressed_size: None,
            },
        );
    }

    fn compressed_tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        unsafe {
            self.gl.compressed_tex_image_2d(
                target,
                level,
                gl_enum(internal_format),
                gl_size(width),
                gl_size(height),
                0,
                i32::try_from(data.len()).unwrap_or(i32::MAX),
                data,
            );
        }
        self.textures.record(
            target,
            level,
            LevelInfo {
                width,
                height,
                internal_format,
                compressed_size: Some(data.len()),
            },
        );
    }

    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: i32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    ) {
        unsafe {
            self.gl.tex_sub_image_2d(
                target,
                level,
                gl_size(x),
                gl_size(y),
                gl_size(width),
                gl_size(height),
                format,
                ty,
                PixelUnpackData::Slice(Some(pixels)),
            );
        }
    }

    fn tex_parameter_i32(&mut self, target: u32, pname: u32, value: i32) {
        unsafe { self.gl.tex_parameter_i32(target, pname, value) };
    }

    fn tex_parameter_i32_slice(&mut self, target: u32, pname: u32, values: &[i32]) {
        unsafe { self.gl.tex_parameter_i32_slice(target, pname, values) };
    }

    fn tex_parameter_f32(&mut self, target: u32, pname: u32, value: f32) {
        unsafe { self.gl.tex_parameter_f32(target, pname, value) };
    }

    fn generate_mipmap(&mut self, target: u32) {
        unsafe { self.gl.generate_mipmap(target) };
        self.textures.generate(target);
    }

    fn get_tex_level_parameter_i32(&mut self, target: u32, level: i32, pname: u32) -> i32 {
        self.textures.query(target, level, pname)
    }

    fn get_tex_image(&mut self, target: u32, level: i32, format: u32, ty: u32, out: &mut [u8]) {
        unsafe {
            self.gl
                .get_tex_image(target, level, format, ty, PixelPackData::Slice(Some(out)));
        }
    }

    fn get_compressed_tex_image(
        &mut self,
        _target: u32,
        _level: i32,
        _out: &mut [u8],
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("compressed texture readback"))
    }

    // Core profiles have no texture environment.
    fn tex_env_i32(&mut self, _target: u32, _pname: u32, _value: i32) {}

    fn create_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
        attributes: &[(u32, &str)],
    ) -> Result<u32, DriverError> {
        let gl = &*self.gl;
        unsafe {
            let program = gl
                .create_program()
                .map_err(alloc_error("program"))?;
            let vs = match compile_shader(gl, glow::VERTEX_SHADER, vertex_src) {
                Ok(vs) => vs,
                Err(err) => {
                    gl.delete_program(program);
                    return Err(err);
                }
            };
            let fs = match compile_shader(gl, glow::FRAGMENT_SHADER, fragment_src) {
                Ok(fs) => fs,
                Err(err) => {
                    gl.delete_shader(vs);
                    gl.delete_program(program);
                    return Err(err);
                }
            };

            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            for (slot, name) in attributes {
                gl.bind_attrib_location(program, *slot, name);
            }
            gl.link_program(program);

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                gl.delete_shader(vs);
                gl.delete_shader(fs);
                return Err(DriverError::Link(log));
            }

            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            Ok(program.0.get())
        }
    }

    fn delete_program(&mut self, name: u32) {
        if let Some(program) = program(name) {
            unsafe { self.gl.delete_program(program) };
        }
    }

    fn use_program(&mut self, name: u32) {
        unsafe { self.gl.use_program(program(name)) };
    }

    fn get_active_uniforms(&mut self, name: u32) -> Vec<ActiveUniform> {
        let Some(program) = program(name) else {
            return Vec::new();
        };
        unsafe {
            let count = self.gl.get_active_uniforms(program);
            (0..count)
                .filter_map(|index| self.gl.get_active_uniform(program, index))
                .map(|u| ActiveUniform {
                    name: u.name,
                    size: u.size,
                    utype: u.utype,
                })
                .collect()
        }
    }

    fn get_uniform_location(&mut self, name: u32, uniform: &str) -> i32 {
        program(name)
            .and_then(|program| unsafe { self.gl.get_uniform_location(program, uniform) })
            .and_then(|location| i32::try_from(location.0).ok())
            .unwrap_or(-1)
    }

    fn get_attrib_location(&mut self, name: u32, attribute: &str) -> i32 {
        program(name)
            .and_then(|program| unsafe { self.gl.get_attrib_location(program, attribute) })
            .and_then(|slot| i32::try_from(slot).ok())
            .unwrap_or(-1)
    }

    fn uniform_i32_slice(&mut self, loc: i32, values: &[i32]) {
        unsafe { self.gl.uniform_1_i32_slice(location(loc).as_ref(), values) };
    }

    fn uniform_f32_slice(&mut self, loc: i32, components: usize, values: &[f32]) {
        let loc = location(loc);
        unsafe {
            match components {
                1 => self.gl.uniform_1_f32_slice(loc.as_ref(), values),
                2 => self.gl.uniform_2_f32_slice(loc.as_ref(), values),
                3 => self.gl.uniform_3_f32_slice(loc.as_ref(), values),
                _ => self.gl.uniform_4_f32_slice(loc.as_ref(), values),
            }
        }
    }

    fn uniform_matrix_f32_slice(&mut self, loc: i32, dim: usize, transpose: bool, values: &[f32]) {
        let loc = location(loc);
        unsafe {
            if dim == 3 {
                self.gl
                    .uniform_matrix_3_f32_slice(loc.as_ref(), transpose, values);
            } else {
                self.gl
                    .uniform_matrix_4_f32_slice(loc.as_ref(), transpose, values);
            }
        }
    }

    fn blend_func(&mut self, src: u32, dst: u32) {
        unsafe { self.gl.blend_func(src, dst) };
    }

    fn blend_func_separate(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        unsafe {
            self.gl
                .blend_func_separate(src_rgb, dst_rgb, src_alpha, dst_alpha);
        }
    }

    fn color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        unsafe { self.gl.color_mask(red, green, blue, alpha) };
    }

    // Alpha rejection is done by the shaders' `minimum_alpha` uniform.
    fn alpha_func(&mut self, _func: u32, _reference: f32) {}

    fn line_width(&mut self, width: f32) {
        unsafe { self.gl.line_width(width) };
    }

    // Point size is written by the vertex shader.
    fn point_size(&mut self, _size: f32) {}

    fn polygon_mode(&mut self, face: u32, mode: u32) {
        unsafe { self.gl.polygon_mode(face, mode) };
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        unsafe { self.gl.polygon_offset(factor, units) };
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) };
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.scissor(x, y, width, height) };
    }

    fn upload_vertices(&mut self, vertices: &[Vertex]) {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            if vertices.len() > self.vbo_capacity {
                self.gl
                    .buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);
                self.vbo_capacity = vertices.len();
            } else {
                self.gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, bytes);
            }
        }
    }

    fn draw_arrays(&mut self, mode: u32, first: i32, count: i32) {
        unsafe {
            self.gl.bind_vertex_array(Some(self.vao));
            self.gl.draw_arrays(mode, first, count);
            self.gl.bind_vertex_array(None);
        }
    }

    fn fence_sync(&mut self) -> Result<glow::Fence, DriverError> {
        unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }.map_err(alloc_error("fence"))
    }

    fn client_wait_sync(&mut self, fence: glow::Fence, flags: u32, timeout_ns: i32) -> u32 {
        unsafe { self.gl.client_wait_sync(fence, flags, timeout_ns) }
    }

    fn delete_sync(&mut self, fence: glow::Fence) {
        unsafe { self.gl.delete_sync(fence) };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rgba(width: u32, height: u32) -> LevelInfo {
        LevelInfo {
            width,
            height,
            internal_format: glow::RGBA8,
            compressed_size: None,
        }
    }

    #[test]
    fn level_queries_follow_the_bound_texture() {
        let mut levels = TextureLevels::default();
        levels.bindings.insert((0, glow::TEXTURE_2D), 7);
        levels.record(glow::TEXTURE_2D, 0, rgba(16, 8));
        assert_eq!(levels.query(glow::TEXTURE_2D, 0, glow::TEXTURE_WIDTH), 16);
        assert_eq!(levels.query(glow::TEXTURE_2D, 0, glow::TEXTURE_HEIGHT), 8);
        assert_eq!(levels.query(glow::TEXTURE_2D, 1, glow::TEXTURE_WIDTH), 0);

        levels.active_unit = 1;
        assert_eq!(levels.query(glow::TEXTURE_2D, 0, glow::TEXTURE_WIDTH), 0);
        levels.bindings.insert((1, glow::TEXTURE_2D), 7);
        assert_eq!(
            levels.query(glow::TEXTURE_2D, 0, glow::TEXTURE_INTERNAL_FORMAT),
            gl_enum(glow::RGBA8)
        );
    }

    #[test]
    fn generated_chains_halve_down_to_one_texel() {
        let mut levels = TextureLevels::default();
        levels.bindings.insert((0, glow::TEXTURE_2D), 3);
        levels.record(glow::TEXTURE_2D, 0, rgba(8, 2));
        levels.generate(glow::TEXTURE_2D);
        let widths: Vec<i32> = (0..5)
            .map(|level| levels.query(glow::TEXTURE_2D, level, glow::TEXTURE_WIDTH))
            .collect();
        assert_eq!(widths, [8, 4, 2, 1, 0]);
        assert_eq!(levels.query(glow::TEXTURE_2D, 3, glow::TEXTURE_HEIGHT), 1);
    }

    #[test]
    fn compressed_sizes_and_deletion() {
        let mut levels = TextureLevels::default();
        levels.bindings.insert((0, glow::TEXTURE_CUBE_MAP), 5);
        levels.record(
            glow::TEXTURE_CUBE_MAP_POSITIVE_Y,
            0,
            LevelInfo {
                compressed_size: Some(32),
                ..rgba(8, 8)
            },
        );
        let face = glow::TEXTURE_CUBE_MAP_POSITIVE_Y;
        assert_eq!(levels.query(face, 0, glow::TEXTURE_COMPRESSED), 1);
        assert_eq!(levels.query(face, 0, glow::TEXTURE_COMPRESSED_IMAGE_SIZE), 32);
        assert_eq!(levels.query(glow::TEXTURE_CUBE_MAP_NEGATIVE_X, 0, glow::TEXTURE_WIDTH), 0);

        levels.forget(5);
        assert_eq!(levels.query(face, 0, glow::TEXTURE_WIDTH), 0);
        assert!(levels.bindings.is_empty());
    }
}

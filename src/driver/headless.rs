//! An in-memory driver that records GL traffic.
//!
//! [`HeadlessDriver`] behaves like a small, strict GL implementation: it keeps
//! enabled capabilities, texture bindings per unit, texture level storage,
//! linked programs and fences, and raises `INVALID_OPERATION` for the misuse
//! cases the render core is supposed to avoid. Every state-changing entry
//! point bumps a counter in [`CallCounts`], so callers can assert exactly how
//! many driver calls a sequence of cache operations produced.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use super::{gl, ActiveUniform, GlDriver};
use crate::{error::DriverError, types::Vertex};

/// Number of calls issued per entry point since the last reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub enable: usize,
    pub disable: usize,
    pub active_texture: usize,
    pub bind_texture: usize,
    pub tex_image: usize,
    pub tex_parameter: usize,
    pub generate_mipmap: usize,
    pub tex_env: usize,
    pub use_program: usize,
    pub uniform_uploads: usize,
    pub blend_func: usize,
    pub color_mask: usize,
    pub alpha_func: usize,
    pub line_width: usize,
    pub point_size: usize,
    pub polygon_mode: usize,
    pub polygon_offset: usize,
    pub viewport: usize,
    pub scissor: usize,
    pub vertex_uploads: usize,
    pub draw_calls: usize,
    pub fence_sync: usize,
    pub client_wait: usize,
}

/// One recorded `draw_arrays` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Primitive topology.
    pub mode: u32,
    /// The vertices that were drawn.
    pub vertices: Vec<Vertex>,
    /// Program in use at draw time.
    pub program: u32,
    /// 2D texture bound on unit 0 at draw time.
    pub texture: u32,
}

#[derive(Debug, Clone)]
struct Level {
    width: u32,
    height: u32,
    internal_format: u32,
    format: u32,
    ty: u32,
    compressed: bool,
    data: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
struct Texture {
    levels: BTreeMap<i32, Level>,
    params: FxHashMap<u32, i32>,
    float_params: FxHashMap<u32, f32>,
    swizzle: Option<[i32; 4]>,
}

#[derive(Debug, Default, Clone)]
struct Program {
    uniforms: Vec<ActiveUniform>,
    locations: FxHashMap<String, i32>,
    attributes: FxHashMap<String, i32>,
}

/// An in-memory [`GlDriver`] for tests and offscreen tooling.
#[derive(Debug)]
pub struct HeadlessDriver {
    counts: CallCounts,
    errors: VecDeque<u32>,
    enabled: FxHashSet<u32>,
    active_unit: u32,
    bindings: FxHashMap<(u32, u32), u32>,
    next_name: u32,
    textures: FxHashMap<u32, Texture>,
    programs: FxHashMap<u32, Program>,
    current_program: u32,
    uniform_values: FxHashMap<(u32, i32), Vec<f32>>,
    tex_env: FxHashMap<(u32, u32), i32>,
    blend: [u32; 4],
    color_mask: [bool; 4],
    alpha_func: (u32, f32),
    line_width: f32,
    point_size: f32,
    polygon_mode: [u32; 2],
    polygon_offset: [f32; 2],
    viewport: [i32; 4],
    scissor: [i32; 4],
    stream: Vec<Vertex>,
    draws: Vec<DrawRecord>,
    next_fence: u64,
    fence_latency: u32,
    fences: FxHashMap<u64, u32>,
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDriver {
    /// A driver in the GL default state.
    #[must_use]
    pub fn new() -> Self {
        let mut enabled = FxHashSet::default();
        enabled.insert(gl::DITHER);
        enabled.insert(gl::MULTISAMPLE);
        Self {
            counts: CallCounts::default(),
            errors: VecDeque::new(),
            enabled,
            active_unit: 0,
            bindings: FxHashMap::default(),
            next_name: 1,
            textures: FxHashMap::default(),
            programs: FxHashMap::default(),
            current_program: 0,
            uniform_values: FxHashMap::default(),
            tex_env: FxHashMap::default(),
            blend: [gl::ONE, gl::ZERO, gl::ONE, gl::ZERO],
            color_mask: [true; 4],
            alpha_func: (gl::ALWAYS, 0.0),
            line_width: 1.0,
            point_size: 1.0,
            polygon_mode: [gl::FILL, gl::FILL],
            polygon_offset: [0.0, 0.0],
            viewport: [0; 4],
            scissor: [0; 4],
            stream: Vec::new(),
            draws: Vec::new(),
            next_fence: 1,
            fence_latency: 0,
            fences: FxHashMap::default(),
        }
    }

    /// Calls issued since construction or the last [`reset_counts`](Self::reset_counts).
    #[must_use]
    pub fn counts(&self) -> CallCounts {
        self.counts
    }

    pub fn reset_counts(&mut self) {
        self.counts = CallCounts::default();
    }

    /// Draw calls recorded so far.
    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Drain the recorded draw calls.
    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    /// Queue an error code to be returned by `get_error`.
    pub fn push_error(&mut self, code: u32) {
        self.errors.push_back(code);
    }

    /// Number of `client_wait_sync` polls a new fence needs before it signals.
    pub fn set_fence_latency(&mut self, polls: u32) {
        self.fence_latency = polls;
    }

    /// Whether `cap` is enabled in driver state.
    #[must_use]
    pub fn cap_enabled(&self, cap: u32) -> bool {
        self.enabled.contains(&cap)
    }

    /// Name bound to `target` on `unit`.
    #[must_use]
    pub fn bound_texture(&self, unit: u32, target: u32) -> u32 {
        self.bindings.get(&(unit, target)).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn active_unit(&self) -> u32 {
        self.active_unit
    }

    /// Whether `name` is a live texture.
    #[must_use]
    pub fn texture_exists(&self, name: u32) -> bool {
        self.textures.contains_key(&name)
    }

    /// Number of live textures.
    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Width, height and bytes of one stored level.
    #[must_use]
    pub fn texture_level(&self, name: u32, level: i32) -> Option<(u32, u32, &[u8])> {
        let level = self.textures.get(&name)?.levels.get(&level)?;
        Some((level.width, level.height, &level.data))
    }

    /// Number of levels stored for `name`.
    #[must_use]
    pub fn texture_level_count(&self, name: u32) -> usize {
        self.textures.get(&name).map_or(0, |t| t.levels.len())
    }

    /// Integer parameter last set on `name`.
    #[must_use]
    pub fn texture_parameter(&self, name: u32, pname: u32) -> Option<i32> {
        self.textures.get(&name)?.params.get(&pname).copied()
    }

    /// Float parameter last set on `name`.
    #[must_use]
    pub fn texture_parameter_f32(&self, name: u32, pname: u32) -> Option<f32> {
        self.textures.get(&name)?.float_params.get(&pname).copied()
    }

    /// Swizzle mask applied to `name`, if any.
    #[must_use]
    pub fn texture_swizzle(&self, name: u32) -> Option<[i32; 4]> {
        self.textures.get(&name)?.swizzle
    }

    #[must_use]
    pub fn current_program(&self) -> u32 {
        self.current_program
    }

    /// Last value uploaded to `location` of `program`.
    #[must_use]
    pub fn uniform_value(&self, program: u32, location: i32) -> Option<&[f32]> {
        self.uniform_values
            .get(&(program, location))
            .map(Vec::as_slice)
    }

    /// Move a uniform to a different location behind the cache's back, as a
    /// relink without cache invalidation would.
    pub fn relocate_uniform(&mut self, program: u32, name: &str, location: i32) {
        if let Some(program) = self.programs.get_mut(&program) {
            program.locations.insert(name.to_owned(), location);
        }
    }

    /// Blend factors as `[src_rgb, dst_rgb, src_alpha, dst_alpha]`.
    #[must_use]
    pub fn blend_factors(&self) -> [u32; 4] {
        self.blend
    }

    #[must_use]
    pub fn color_mask_state(&self) -> [bool; 4] {
        self.color_mask
    }

    #[must_use]
    pub fn alpha_func_state(&self) -> (u32, f32) {
        self.alpha_func
    }

    #[must_use]
    pub fn line_width_state(&self) -> f32 {
        self.line_width
    }

    #[must_use]
    pub fn point_size_state(&self) -> f32 {
        self.point_size
    }

    /// Front and back polygon modes.
    #[must_use]
    pub fn polygon_mode_state(&self) -> [u32; 2] {
        self.polygon_mode
    }

    #[must_use]
    pub fn polygon_offset_state(&self) -> [f32; 2] {
        self.polygon_offset
    }

    /// Viewport as `[x, y, width, height]`.
    #[must_use]
    pub fn viewport_state(&self) -> [i32; 4] {
        self.viewport
    }

    /// Scissor box as `[x, y, width, height]`.
    #[must_use]
    pub fn scissor_state(&self) -> [i32; 4] {
        self.scissor
    }

    /// Fixed-function texture environment value on `unit`.
    #[must_use]
    pub fn tex_env_state(&self, unit: u32, pname: u32) -> Option<i32> {
        self.tex_env.get(&(unit, pname)).copied()
    }

    fn bound_mut(&mut self, target: u32) -> Option<&mut Texture> {
        let name = self.bound_texture(self.active_unit, target);
        if name == 0 {
            self.errors.push_back(gl::INVALID_OPERATION);
            return None;
        }
        self.textures.get_mut(&name)
    }

    fn bound(&mut self, target: u32) -> Option<&Texture> {
        let name = self.bound_texture(self.active_unit, target);
        if name == 0 {
            self.errors.push_back(gl::INVALID_OPERATION);
            return None;
        }
        self.textures.get(&name)
    }
}

fn format_components(format: u32) -> usize {
    match format {
        gl::RG | gl::LUMINANCE_ALPHA => 2,
        gl::RGB => 3,
        gl::RGBA | gl::BGRA => 4,
        _ => 1,
    }
}

fn pixel_bytes(format: u32, ty: u32) -> usize {
    match ty {
        gl::UNSIGNED_INT_8_8_8_8 | gl::UNSIGNED_INT_8_8_8_8_REV => 4,
        gl::FLOAT | gl::INT => 4 * format_components(format),
        _ => format_components(format),
    }
}

fn level_size(width: u32, height: u32, format: u32, ty: u32) -> usize {
    width as usize * height as usize * pixel_bytes(format, ty)
}

/// Average 2×2 blocks of `src` into a level half the size (edges clamp).
fn box_filter(src: &[u8], width: u32, height: u32, bpp: usize) -> (u32, u32, Vec<u8>) {
    let (w, h) = (width as usize, height as usize);
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    let mut out = vec![0u8; nw * nh * bpp];
    for y in 0..nh {
        for x in 0..nw {
            let (x0, y0) = ((x * 2).min(w - 1), (y * 2).min(h - 1));
            let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
            for c in 0..bpp {
                let at = |xx: usize, yy: usize| u32::from(src[(yy * w + xx) * bpp + c]);
                let sum = at(x0, y0) + at(x1, y0) + at(x0, y1) + at(x1, y1);
                out[(y * nw + x) * bpp + c] = u8::try_from(sum / 4).unwrap_or(u8::MAX);
            }
        }
    }
    let dim = |v: usize| u32::try_from(v).unwrap_or(u32::MAX);
    (dim(nw), dim(nh), out)
}

fn uniform_type(glsl: &str) -> Option<u32> {
    Some(match glsl {
        "float" => gl::FLOAT,
        "vec2" => gl::FLOAT_VEC2,
        "vec3" => gl::FLOAT_VEC3,
        "vec4" => gl::FLOAT_VEC4,
        "int" => gl::INT,
        "ivec2" => gl::INT_VEC2,
        "ivec3" => gl::INT_VEC3,
        "ivec4" => gl::INT_VEC4,
        "bool" => gl::BOOL,
        "mat2" => gl::FLOAT_MAT2,
        "mat3" => gl::FLOAT_MAT3,
        "mat4" => gl::FLOAT_MAT4,
        "sampler1D" => gl::SAMPLER_1D,
        "sampler2D" => gl::SAMPLER_2D,
        "sampler3D" => gl::SAMPLER_3D,
        "samplerCube" => gl::SAMPLER_CUBE,
        "sampler2DShadow" => gl::SAMPLER_2D_SHADOW,
        "sampler2DRect" => gl::SAMPLER_2D_RECT,
        _ => return None,
    })
}

/// Pull `uniform <type> <name>[N], ...;` declarations out of GLSL source.
fn scan_uniforms(source: &str, out: &mut Vec<ActiveUniform>) {
    for line in source.lines() {
        let Some(rest) = line.trim().strip_prefix("uniform ") else {
            continue;
        };
        let rest = rest.split("//").next().unwrap_or_default();
        let mut words = rest
            .trim_end()
            .trim_end_matches(';')
            .split_whitespace()
            .filter(|w| !matches!(*w, "highp" | "mediump" | "lowp"));
        let Some(utype) = words.next().and_then(uniform_type) else {
            continue;
        };
        let names: String = words.collect::<Vec<_>>().join("");
        for decl in names.split(',').filter(|d| !d.is_empty()) {
            let (name, size) = match decl.split_once('[') {
                Some((base, len)) => {
                    let size = len.trim_end_matches(']').parse().unwrap_or(1);
                    (format!("{base}[0]"), size)
                }
                None => (decl.to_owned(), 1),
            };
            if !out.iter().any(|u| u.name == name) {
                out.push(ActiveUniform { name, size, utype });
            }
        }
    }
}

/// Names of `in`/`attribute` declarations in a vertex shader.
fn scan_attributes(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("in ")
                .or_else(|| line.strip_prefix("attribute "))?;
            let name = rest.trim_end_matches(';').split_whitespace().last()?;
            Some(name.to_owned())
        })
        .collect()
}

impl GlDriver for HeadlessDriver {
    type Fence = u64;

    fn get_error(&mut self) -> u32 {
        self.errors.pop_front().unwrap_or(gl::NO_ERROR)
    }

    fn enable(&mut self, cap: u32) {
        self.counts.enable += 1;
        self.enabled.insert(cap);
    }

    fn disable(&mut self, cap: u32) {
        self.counts.disable += 1;
        self.enabled.remove(&cap);
    }

    fn is_enabled(&mut self, cap: u32) -> bool {
        self.enabled.contains(&cap)
    }

    #[expect(clippy::cast_possible_wrap)]
    fn get_parameter_i32(&mut self, pname: u32) -> i32 {
        match pname {
            gl::BLEND_SRC_RGB => self.blend[0] as i32,
            gl::BLEND_DST_RGB => self.blend[1] as i32,
            gl::ACTIVE_TEXTURE => (gl::TEXTURE0 + self.active_unit) as i32,
            gl::CURRENT_PROGRAM => self.current_program as i32,
            _ => {
                self.errors.push_back(gl::INVALID_ENUM);
                0
            }
        }
    }

    fn active_texture(&mut self, unit: u32) {
        self.counts.active_texture += 1;
        self.active_unit = unit;
    }

    fn create_texture(&mut self) -> Result<u32, DriverError> {
        let name = self.next_name;
        self.next_name += 1;
        self.textures.insert(name, Texture::default());
        Ok(name)
    }

    fn delete_texture(&mut self, name: u32) {
        self.textures.remove(&name);
        self.bindings.retain(|_, bound| *bound != name);
    }

    fn bind_texture(&mut self, target: u32, name: u32) {
        self.counts.bind_texture += 1;
        if name != 0 && !self.textures.contains_key(&name) {
            self.errors.push_back(gl::INVALID_OPERATION);
            return;
        }
        self.bindings.insert((self.active_unit, target), name);
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
        self.counts.tex_image += 1;
        let size = level_size(width, height, format, ty);
        let data = match pixels {
            Some(p) if p.len() < size => {
                self.errors.push_back(gl::INVALID_OPERATION);
                return;
            }
            Some(p) => p[..size].to_vec(),
            None => vec![0; size],
        };
        if let Some(texture) = self.bound_mut(target) {
            texture.levels.insert(
                level,
                Level {
                    width,
                    height,
                    internal_format,
                    format,
                    ty,
                    compressed: false,
                    data,
                },
            );
        }
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
        self.counts.tex_image += 1;
        if let Some(texture) = self.bound_mut(target) {
            texture.levels.insert(
                level,
                Level {
                    width,
                    height,
                    internal_format,
                    format: internal_format,
                    ty: gl::UNSIGNED_BYTE,
                    compressed: true,
                    data: data.to_vec(),
                },
            );
        }
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
        self.counts.tex_image += 1;
        let bpp = pixel_bytes(format, ty);
        let mut failed = false;
        if let Some(texture) = self.bound_mut(target) {
            match texture.levels.get_mut(&level) {
                Some(dst)
                    if dst.format == format
                        && x + width <= dst.width
                        && y + height <= dst.height
                        && pixels.len() >= level_size(width, height, format, ty) =>
                {
                    let row = width as usize * bpp;
                    for r in 0..height as usize {
                        let src_at = r * row;
                        let dst_at = ((y as usize + r) * dst.width as usize + x as usize) * bpp;
                        dst.data[dst_at..dst_at + row].copy_from_slice(&pixels[src_at..src_at + row]);
                    }
                }
                _ => failed = true,
            }
        }
        if failed {
            self.errors.push_back(gl::INVALID_VALUE);
        }
    }

    fn tex_parameter_i32(&mut self, target: u32, pname: u32, value: i32) {
        self.counts.tex_parameter += 1;
        if let Some(texture) = self.bound_mut(target) {
            texture.params.insert(pname, value);
        }
    }

    fn tex_parameter_i32_slice(&mut self, target: u32, pname: u32, values: &[i32]) {
        self.counts.tex_parameter += 1;
        if let Some(texture) = self.bound_mut(target) {
            if pname == gl::TEXTURE_SWIZZLE_RGBA && values.len() == 4 {
                texture.swizzle = Some([values[0], values[1], values[2], values[3]]);
            }
        }
    }

    fn tex_parameter_f32(&mut self, target: u32, pname: u32, value: f32) {
        self.counts.tex_parameter += 1;
        if let Some(texture) = self.bound_mut(target) {
            texture.float_params.insert(pname, value);
        }
    }

    fn generate_mipmap(&mut self, target: u32) {
        self.counts.generate_mipmap += 1;
        let Some(texture) = self.bound_mut(target) else {
            return;
        };
        let Some(base) = texture.levels.get(&0).cloned() else {
            return;
        };
        let bpp = pixel_bytes(base.format, base.ty);
        let (mut w, mut h, mut data) = (base.width, base.height, base.data.clone());
        let mut level = 0;
        while w > 1 || h > 1 {
            (w, h, data) = box_filter(&data, w, h, bpp);
            level += 1;
            texture.levels.insert(
                level,
                Level {
                    width: w,
                    height: h,
                    data: data.clone(),
                    ..base.clone()
                },
            );
        }
    }

    #[expect(clippy::cast_possible_wrap)]
    fn get_tex_level_parameter_i32(&mut self, target: u32, level: i32, pname: u32) -> i32 {
        let Some(texture) = self.bound(target) else {
            return 0;
        };
        let Some(level) = texture.levels.get(&level) else {
            return 0;
        };
        match pname {
            gl::TEXTURE_WIDTH => level.width as i32,
            gl::TEXTURE_HEIGHT => level.height as i32,
            gl::TEXTURE_COMPRESSED => i32::from(level.compressed),
            gl::TEXTURE_COMPRESSED_IMAGE_SIZE if level.compressed => level.data.len() as i32,
            gl::TEXTURE_INTERNAL_FORMAT => level.internal_format as i32,
            _ => 0,
        }
    }

    fn get_tex_image(&mut self, target: u32, level: i32, format: u32, ty: u32, out: &mut [u8]) {
        let stored = self
            .bound(target)
            .and_then(|t| t.levels.get(&level))
            .filter(|l| !l.compressed && l.format == format && l.ty == ty)
            .map(|l| l.data.clone());
        match stored {
            Some(data) if out.len() >= data.len() => out[..data.len()].copy_from_slice(&data),
            _ => self.errors.push_back(gl::INVALID_OPERATION),
        }
    }

    fn get_compressed_tex_image(
        &mut self,
        target: u32,
        level: i32,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        let stored = self
            .bound(target)
            .and_then(|t| t.levels.get(&level))
            .filter(|l| l.compressed)
            .map(|l| l.data.clone());
        match stored {
            Some(data) if out.len() >= data.len() => out[..data.len()].copy_from_slice(&data),
            _ => self.errors.push_back(gl::INVALID_OPERATION),
        }
        Ok(())
    }

    fn tex_env_i32(&mut self, _target: u32, pname: u32, value: i32) {
        self.counts.tex_env += 1;
        self.tex_env.insert((self.active_unit, pname), value);
    }

    fn create_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
        attributes: &[(u32, &str)],
    ) -> Result<u32, DriverError> {
        for (stage, src) in [("vertex", vertex_src), ("fragment", fragment_src)] {
            if !src.contains("void main") {
                return Err(DriverError::Compile(format!(
                    "{stage} shader has no entry point"
                )));
            }
        }
        let mut program = Program::default();
        scan_uniforms(vertex_src, &mut program.uniforms);
        scan_uniforms(fragment_src, &mut program.uniforms);
        let mut next_location = 0;
        for uniform in &program.uniforms {
            program.locations.insert(uniform.name.clone(), next_location);
            next_location += uniform.size;
        }
        let declared = scan_attributes(vertex_src);
        let mut next_attrib = attributes
            .iter()
            .map(|(slot, _)| *slot)
            .max()
            .map_or(0, |slot| slot + 1);
        for name in declared {
            #[expect(clippy::cast_possible_wrap)]
            let slot = match attributes.iter().find(|(_, n)| *n == name) {
                Some((slot, _)) => *slot as i32,
                None => {
                    next_attrib += 1;
                    (next_attrib - 1) as i32
                }
            };
            program.attributes.insert(name, slot);
        }
        let name = self.next_name;
        self.next_name += 1;
        self.programs.insert(name, program);
        Ok(name)
    }

    fn delete_program(&mut self, program: u32) {
        self.programs.remove(&program);
        if self.current_program == program {
            self.current_program = 0;
        }
    }

    fn use_program(&mut self, program: u32) {
        self.counts.use_program += 1;
        if program != 0 && !self.programs.contains_key(&program) {
            self.errors.push_back(gl::INVALID_OPERATION);
            return;
        }
        self.current_program = program;
    }

    fn get_active_uniforms(&mut self, program: u32) -> Vec<ActiveUniform> {
        self.programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn get_uniform_location(&mut self, program: u32, name: &str) -> i32 {
        let Some(program) = self.programs.get(&program) else {
            return -1;
        };
        if let Some(location) = program.locations.get(name) {
            return *location;
        }
        // `name` or `name[i]` for an array declared as `name[0]`.
        let (base, index) = match name.split_once('[') {
            Some((base, idx)) => (base, idx.trim_end_matches(']').parse().unwrap_or(0)),
            None => (name, 0),
        };
        program
            .uniforms
            .iter()
            .find(|u| u.name.strip_suffix("[0]") == Some(base) && index < u.size)
            .and_then(|u| program.locations.get(&u.name))
            .map_or(-1, |location| location + index)
    }

    fn get_attrib_location(&mut self, program: u32, name: &str) -> i32 {
        self.programs
            .get(&program)
            .and_then(|p| p.attributes.get(name))
            .copied()
            .unwrap_or(-1)
    }

    fn uniform_i32_slice(&mut self, location: i32, values: &[i32]) {
        self.counts.uniform_uploads += 1;
        #[expect(clippy::cast_precision_loss)]
        let stored = values.iter().map(|v| *v as f32).collect();
        self.uniform_values
            .insert((self.current_program, location), stored);
    }

    fn uniform_f32_slice(&mut self, location: i32, _components: usize, values: &[f32]) {
        self.counts.uniform_uploads += 1;
        self.uniform_values
            .insert((self.current_program, location), values.to_vec());
    }

    fn uniform_matrix_f32_slice(&mut self, location: i32, _dim: usize, _transpose: bool, values: &[f32]) {
        self.counts.uniform_uploads += 1;
        self.uniform_values
            .insert((self.current_program, location), values.to_vec());
    }

    fn blend_func(&mut self, src: u32, dst: u32) {
        self.counts.blend_func += 1;
        self.blend = [src, dst, src, dst];
    }

    fn blend_func_separate(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        self.counts.blend_func += 1;
        self.blend = [src_rgb, dst_rgb, src_alpha, dst_alpha];
    }

    fn color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        self.counts.color_mask += 1;
        self.color_mask = [red, green, blue, alpha];
    }

    fn alpha_func(&mut self, func: u32, reference: f32) {
        self.counts.alpha_func += 1;
        self.alpha_func = (func, reference);
    }

    fn line_width(&mut self, width: f32) {
        self.counts.line_width += 1;
        self.line_width = width;
    }

    fn point_size(&mut self, size: f32) {
        self.counts.point_size += 1;
        self.point_size = size;
    }

    fn polygon_mode(&mut self, face: u32, mode: u32) {
        self.counts.polygon_mode += 1;
        match face {
            gl::FRONT => self.polygon_mode[0] = mode,
            gl::BACK => self.polygon_mode[1] = mode,
            _ => self.polygon_mode = [mode, mode],
        }
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        self.counts.polygon_offset += 1;
        self.polygon_offset = [factor, units];
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.counts.viewport += 1;
        self.viewport = [x, y, width, height];
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.counts.scissor += 1;
        self.scissor = [x, y, width, height];
    }

    fn upload_vertices(&mut self, vertices: &[Vertex]) {
        self.counts.vertex_uploads += 1;
        if self.stream.len() < vertices.len() {
            self.stream.resize(vertices.len(), Vertex::default());
        }
        self.stream[..vertices.len()].copy_from_slice(vertices);
    }

    fn draw_arrays(&mut self, mode: u32, first: i32, count: i32) {
        self.counts.draw_calls += 1;
        let (Ok(first), Ok(count)) = (usize::try_from(first), usize::try_from(count)) else {
            self.errors.push_back(gl::INVALID_VALUE);
            return;
        };
        let Some(vertices) = self.stream.get(first..first + count) else {
            self.errors.push_back(gl::INVALID_OPERATION);
            return;
        };
        let record = DrawRecord {
            mode,
            vertices: vertices.to_vec(),
            program: self.current_program,
            texture: self.bound_texture(0, gl::TEXTURE_2D),
        };
        self.draws.push(record);
    }

    fn fence_sync(&mut self) -> Result<u64, DriverError> {
        self.counts.fence_sync += 1;
        let fence = self.next_fence;
        self.next_fence += 1;
        self.fences.insert(fence, self.fence_latency);
        Ok(fence)
    }

    fn client_wait_sync(&mut self, fence: u64, _flags: u32, timeout_ns: i32) -> u32 {
        self.counts.client_wait += 1;
        let Some(remaining) = self.fences.get_mut(&fence) else {
            return gl::WAIT_FAILED;
        };
        if *remaining == 0 {
            return gl::ALREADY_SIGNALED;
        }
        *remaining -= 1;
        if *remaining == 0 && timeout_ns > 0 {
            gl::CONDITION_SATISFIED
        } else {
            gl::TIMEOUT_EXPIRED
        }
    }

    fn delete_sync(&mut self, fence: u64) {
        self.fences.remove(&fence);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scans_uniform_declarations() {
        let mut uniforms = Vec::new();
        scan_uniforms(
            "uniform mat4 modelview_matrix;\nuniform highp vec4 light[8];\nuniform float a, b; // two\n",
            &mut uniforms,
        );
        let names: Vec<_> = uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["modelview_matrix", "light[0]", "a", "b"]);
        assert_eq!(uniforms[1].size, 8);
        assert_eq!(uniforms[1].utype, gl::FLOAT_VEC4);
    }

    #[test]
    fn array_elements_resolve_by_offset() {
        let mut driver = HeadlessDriver::new();
        let program = driver
            .create_program(
                "uniform vec4 light[4];\nvoid main() {}",
                "uniform float alpha;\nvoid main() {}",
                &[],
            )
            .unwrap();
        let base = driver.get_uniform_location(program, "light");
        assert_eq!(driver.get_uniform_location(program, "light[0]"), base);
        assert_eq!(driver.get_uniform_location(program, "light[3]"), base + 3);
        assert_eq!(driver.get_uniform_location(program, "light[4]"), -1);
        assert_eq!(driver.get_uniform_location(program, "alpha"), 4);
    }

    #[test]
    fn texture_storage_round_trips() {
        let mut driver = HeadlessDriver::new();
        let name = driver.create_texture().unwrap();
        driver.bind_texture(gl::TEXTURE_2D, name);
        let pixels: Vec<u8> = (0..16).collect();
        driver.tex_image_2d(gl::TEXTURE_2D, 0, gl::RGBA8, 2, 2, gl::RGBA, gl::UNSIGNED_BYTE, Some(&pixels));
        let mut out = [0u8; 16];
        driver.get_tex_image(gl::TEXTURE_2D, 0, gl::RGBA, gl::UNSIGNED_BYTE, &mut out);
        assert_eq!(driver.get_error(), gl::NO_ERROR);
        assert_eq!(&out[..], &pixels[..]);

        driver.get_tex_image(gl::TEXTURE_2D, 0, gl::RGB, gl::UNSIGNED_BYTE, &mut out);
        assert_eq!(driver.get_error(), gl::INVALID_OPERATION);
    }

    #[test]
    fn generated_mips_reach_one_by_one() {
        let mut driver = HeadlessDriver::new();
        let name = driver.create_texture().unwrap();
        driver.bind_texture(gl::TEXTURE_2D, name);
        driver.tex_image_2d(gl::TEXTURE_2D, 0, gl::R8, 8, 2, gl::RED, gl::UNSIGNED_BYTE, Some(&[200; 16]));
        driver.generate_mipmap(gl::TEXTURE_2D);
        assert_eq!(driver.texture_level_count(name), 4);
        let (w, h, data) = driver.texture_level(name, 3).unwrap();
        assert_eq!((w, h), (1, 1));
        assert_eq!(data, &[200]);
    }

    #[test]
    fn fence_latency_counts_polls() {
        let mut driver = HeadlessDriver::new();
        driver.set_fence_latency(2);
        let fence = driver.fence_sync().unwrap();
        assert_eq!(driver.client_wait_sync(fence, 0, 0), gl::TIMEOUT_EXPIRED);
        assert_eq!(driver.client_wait_sync(fence, 0, 1000), gl::CONDITION_SATISFIED);
        assert_eq!(driver.client_wait_sync(fence, 0, 0), gl::ALREADY_SIGNALED);
        driver.delete_sync(fence);
        assert_eq!(driver.client_wait_sync(fence, 0, 0), gl::WAIT_FAILED);
    }
}

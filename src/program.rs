//! Linked shader programs and the uniform value cache.
//!
//! Programs live in a registry inside the [`RenderContext`] and are named by
//! a [`ShaderId`]. Uniforms are addressed either by a dense index (the
//! reserved table in [`shaders::uniform`](crate::shaders::uniform) followed
//! by the custom names given to [`RenderContext::load_shader`]) or by name:
//!
//! ```
//! # use llrender_core::{driver::HeadlessDriver, shaders::uniform, RenderConfig, RenderContext};
//! let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
//! let id = ctx.load_immediate_shader().unwrap();
//! let mut shader = ctx.shader(id).unwrap();
//! shader.bind();
//! assert!(shader.uniform1f(uniform::MINIMUM_ALPHA, 0.5));
//! assert!(!shader.uniform1f("minimum_alpha", 0.5));
//! ```
//!
//! Every setter compares the new value with the last one sent to that
//! location and skips the upload when nothing changed. Array uploads
//! (`count > 1`) always go through.

use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::{
    driver::{gl, GlDriver},
    error::{ShaderError, TextureError},
    image::ImageObject,
    render::NUM_MATRIX_MODES,
    shaders::{self, uniform, AttributeMask, RESERVED_ATTRIBUTES, RESERVED_UNIFORMS},
    tex_unit::TextureType,
    RenderContext,
};

/// Handle to a program in a context's shader registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(usize);

/// How a uniform setter addresses its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uniform<'n> {
    /// Dense index: reserved uniforms first, then the custom list.
    Index(usize),
    /// Name as declared, without any `[0]` suffix.
    Name(&'n str),
}

impl From<usize> for Uniform<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl<'n> From<&'n str> for Uniform<'n> {
    fn from(name: &'n str) -> Self {
        Self::Name(name)
    }
}

/// Last value sent to each location, compared bitwise.
#[derive(Debug, Clone, Default)]
struct ValueCache<const N: usize> {
    entries: Vec<(i32, [u32; N])>,
}

impl<const N: usize> ValueCache<N> {
    /// Record `value` for `location`; returns whether it differs from the
    /// cached value (or nothing was cached).
    fn update(&mut self, location: i32, value: &[f32]) -> bool {
        let mut bits = [0u32; N];
        for (slot, v) in bits.iter_mut().zip(value) {
            *slot = v.to_bits();
        }
        match self.entries.iter_mut().find(|(l, _)| *l == location) {
            None => {
                self.entries.push((location, bits));
                true
            }
            Some((_, cached)) if *cached != bits => {
                *cached = bits;
                true
            }
            Some(_) => false,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A linked program and everything cached about it.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    name: String,
    vertex_src: String,
    fragment_src: String,
    custom_attributes: Vec<String>,
    custom_uniforms: Vec<String>,
    program: u32,
    attributes: Vec<i32>,
    attribute_mask: AttributeMask,
    uniforms: Vec<i32>,
    texture: Vec<i32>,
    uniform_map: FxHashMap<String, i32>,
    active_texture_channels: i32,
    vec4_cache: ValueCache<4>,
    mat3_cache: ValueCache<9>,
    mat4_cache: ValueCache<16>,
    pub(crate) mat_hash: [u32; NUM_MATRIX_MODES],
}

impl ShaderProgram {
    fn new(name: &str, vertex_src: &str, fragment_src: &str, attributes: &[&str], uniforms: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            vertex_src: vertex_src.to_owned(),
            fragment_src: fragment_src.to_owned(),
            custom_attributes: attributes.iter().map(|&a| a.to_owned()).collect(),
            custom_uniforms: uniforms.iter().map(|&u| u.to_owned()).collect(),
            program: 0,
            attributes: Vec::new(),
            attribute_mask: AttributeMask::empty(),
            uniforms: Vec::new(),
            texture: Vec::new(),
            uniform_map: FxHashMap::default(),
            active_texture_channels: 0,
            vec4_cache: ValueCache::default(),
            mat3_cache: ValueCache::default(),
            mat4_cache: ValueCache::default(),
            mat_hash: [u32::MAX; NUM_MATRIX_MODES],
        }
    }

    fn clear_caches(&mut self) {
        self.active_texture_channels = 0;
        self.uniforms.clear();
        self.texture.clear();
        self.uniform_map.clear();
        self.vec4_cache.clear();
        self.mat3_cache.clear();
        self.mat4_cache.clear();
        self.mat_hash = [u32::MAX; NUM_MATRIX_MODES];
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// GL program name, 0 while unloaded.
    #[must_use]
    pub fn program(&self) -> u32 {
        self.program
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.program != 0
    }

    /// Reserved attributes the program reads.
    #[must_use]
    pub fn attribute_mask(&self) -> AttributeMask {
        self.attribute_mask
    }

    /// Location of the attribute with dense index `index`, -1 if absent.
    #[must_use]
    pub fn attribute_location(&self, index: usize) -> i32 {
        self.attributes.get(index).copied().unwrap_or(-1)
    }

    /// Location of the uniform with dense index `index`, -1 if absent.
    #[must_use]
    pub fn uniform_location(&self, index: usize) -> i32 {
        self.uniforms.get(index).copied().unwrap_or(-1)
    }

    /// Texture channel assigned to the sampler with dense index `index`,
    /// -1 if it is not a sampler.
    #[must_use]
    pub fn texture_channel(&self, index: usize) -> i32 {
        self.texture.get(index).copied().unwrap_or(-1)
    }

    /// Number of texture channels handed out to samplers.
    #[must_use]
    pub fn active_texture_channels(&self) -> i32 {
        self.active_texture_channels
    }

    fn dense_index(&self, name: &str) -> Option<usize> {
        RESERVED_UNIFORMS.iter().position(|&r| r == name).or_else(|| {
            self.custom_uniforms
                .iter()
                .position(|c| c == name)
                .map(|i| RESERVED_UNIFORMS.len() + i)
        })
    }
}

/// All programs of a context plus the bound/current program names.
#[derive(Debug, Default)]
pub(crate) struct ShaderRegistry {
    programs: Vec<ShaderProgram>,
    pub(crate) bound: Option<ShaderId>,
    pub(crate) cur_program: u32,
    pub(crate) next_program: u32,
}

impl ShaderRegistry {
    pub(crate) fn get(&self, id: ShaderId) -> Option<&ShaderProgram> {
        self.programs.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: ShaderId) -> Option<&mut ShaderProgram> {
        self.programs.get_mut(id.0)
    }

    /// The bound program, if any.
    pub(crate) fn bound_program(&self) -> Option<&ShaderProgram> {
        self.bound.and_then(|id| self.get(id))
    }

    /// Make every program re-receive its matrices on the next sync.
    pub(crate) fn invalidate_matrices(&mut self) {
        for program in &mut self.programs {
            program.mat_hash = [u32::MAX; NUM_MATRIX_MODES];
        }
    }
}

/// Texture channel priority: reserved samplers first in reserved order,
/// then `texN` in `N` order, then everything else as declared.
fn channel_priority(name: &str) -> (u8, usize) {
    if let Some(index) = RESERVED_UNIFORMS.iter().position(|&r| r == name) {
        return (0, index);
    }
    if let Some(n) = name.strip_prefix("tex").and_then(|n| n.parse().ok()) {
        return (1, n);
    }
    (2, 0)
}

fn is_sampler(utype: u32) -> bool {
    (gl::SAMPLER_1D..=gl::SAMPLER_2D_RECT_SHADOW).contains(&utype)
}

impl<D: GlDriver> RenderContext<D> {
    /// Compile and link a program, mapping the reserved attributes and
    /// uniforms plus `attributes` and `uniforms`.
    ///
    /// # Errors
    ///
    /// [`ShaderError::Build`] with the driver log if compilation or linking
    /// fails; nothing is registered in that case.
    pub fn load_shader(
        &mut self,
        name: &str,
        vertex_src: &str,
        fragment_src: &str,
        attributes: &[&str],
        uniforms: &[&str],
    ) -> Result<ShaderId, ShaderError> {
        if self.shaders.programs.iter().any(|p| p.name == name) {
            warn!(target: "Shader", "duplicate shader name {name}");
        }
        let id = ShaderId(self.shaders.programs.len());
        self.shaders
            .programs
            .push(ShaderProgram::new(name, vertex_src, fragment_src, attributes, uniforms));
        if let Err(err) = self.link_shader(id) {
            self.shaders.programs.pop();
            return Err(err);
        }
        Ok(id)
    }

    /// Load the built-in immediate-mode program.
    ///
    /// # Errors
    ///
    /// See [`load_shader`](Self::load_shader).
    pub fn load_immediate_shader(&mut self) -> Result<ShaderId, ShaderError> {
        self.load_shader(
            "immediate",
            shaders::IMMEDIATE_VERTEX_SRC,
            shaders::IMMEDIATE_FRAGMENT_SRC,
            &[],
            &[],
        )
    }

    /// Mutable access to program `id`.
    ///
    /// # Errors
    ///
    /// [`ShaderError::UnknownShader`] if `id` is not registered here.
    pub fn shader(&mut self, id: ShaderId) -> Result<ShaderRef<'_, D>, ShaderError> {
        if self.shaders.get(id).is_none() {
            return Err(ShaderError::UnknownShader(id.0));
        }
        Ok(ShaderRef { ctx: self, id })
    }

    /// Read-only view of program `id`.
    #[must_use]
    pub fn shader_state(&self, id: ShaderId) -> Option<&ShaderProgram> {
        self.shaders.get(id)
    }

    /// The program geometry will be drawn with, if any.
    #[must_use]
    pub fn bound_shader(&self) -> Option<ShaderId> {
        self.shaders.bound
    }

    /// Issue the pending program switch, if the requested program differs
    /// from the one the driver has.
    pub fn sync_shaders(&mut self) {
        if self.shaders.cur_program != self.shaders.next_program {
            self.driver.use_program(self.shaders.next_program);
            self.shaders.cur_program = self.shaders.next_program;
        }
    }

    /// Draw without a program from now on.
    pub fn unbind_shader(&mut self) {
        self.flush();
        self.shaders.next_program = 0;
        self.shaders.bound = None;
    }

    /// Relink every registered program, e.g. after the context was
    /// recreated. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// The first [`ShaderError::Build`] encountered.
    pub fn relink_shaders(&mut self) -> Result<(), ShaderError> {
        for index in 0..self.shaders.programs.len() {
            self.shader_handle(ShaderId(index)).relink()?;
        }
        Ok(())
    }

    /// Forget every program name without deleting it, for context loss.
    pub(crate) fn forget_shaders(&mut self) {
        for program in &mut self.shaders.programs {
            program.program = 0;
            program.clear_caches();
        }
        self.shaders.cur_program = 0;
        self.shaders.next_program = 0;
        self.shaders.bound = None;
    }

    pub(crate) fn shader_handle(&mut self, id: ShaderId) -> ShaderRef<'_, D> {
        ShaderRef { ctx: self, id }
    }

    fn link_shader(&mut self, id: ShaderId) -> Result<(), ShaderError> {
        let Some(shader) = self.shaders.programs.get(id.0) else {
            return Err(ShaderError::UnknownShader(id.0));
        };
        let reserved: Vec<(u32, &str)> = (0u32..).zip(RESERVED_ATTRIBUTES.iter().copied()).collect();
        let program = match self
            .driver
            .create_program(&shader.vertex_src, &shader.fragment_src, &reserved)
        {
            Ok(program) => program,
            Err(source) => {
                warn!(target: "Shader", "failed to link shader {}: {source}", shader.name);
                return Err(ShaderError::Build {
                    name: shader.name.clone(),
                    source,
                });
            }
        };
        if let Some(shader) = self.shaders.programs.get_mut(id.0) {
            shader.program = program;
            shader.clear_caches();
        }
        self.map_attributes(id, program);
        self.map_uniforms(id, program);
        debug!(target: "Shader", "linked shader {id:?} as program {program}");
        Ok(())
    }

    fn map_attributes(&mut self, id: ShaderId, program: u32) {
        let Some(shader) = self.shaders.programs.get(id.0) else {
            return;
        };
        let mut locations = Vec::with_capacity(RESERVED_ATTRIBUTES.len() + shader.custom_attributes.len());
        let mut mask = AttributeMask::empty();
        for (i, name) in RESERVED_ATTRIBUTES.iter().enumerate() {
            let location = self.driver.get_attrib_location(program, name);
            if location != -1 {
                mask |= AttributeMask::from_bits_retain(1 << i);
            }
            locations.push(location);
        }
        for name in &shader.custom_attributes {
            let location = self.driver.get_attrib_location(program, name);
            if location == -1 {
                debug!(target: "Shader", "attribute {name} not found in {}", shader.name);
            }
            locations.push(location);
        }
        if let Some(shader) = self.shaders.programs.get_mut(id.0) {
            shader.attributes = locations;
            shader.attribute_mask = mask;
        }
    }

    fn map_uniforms(&mut self, id: ShaderId, program: u32) {
        let Some(shader) = self.shaders.programs.get(id.0) else {
            return;
        };
        let total = RESERVED_UNIFORMS.len() + shader.custom_uniforms.len();
        let mut active = self.driver.get_active_uniforms(program);
        active.sort_by_key(|u| channel_priority(u.name.strip_suffix("[0]").unwrap_or(&u.name)));

        // samplers are assigned while the program is current
        self.flush();
        let previous = self.shaders.next_program;
        self.shaders.next_program = program;
        self.sync_shaders();

        let mut uniforms = vec![-1; total];
        let mut texture = vec![-1; total];
        let mut map = FxHashMap::default();
        let mut channels = 0;
        for active_uniform in &active {
            let location = self.driver.get_uniform_location(program, &active_uniform.name);
            let name = active_uniform
                .name
                .strip_suffix("[0]")
                .unwrap_or(&active_uniform.name);
            map.insert(name.to_owned(), location);

            let Some(index) = self.shaders.programs.get(id.0).and_then(|s| s.dense_index(name)) else {
                continue;
            };
            uniforms[index] = location;
            if is_sampler(active_uniform.utype) {
                let size = active_uniform.size.max(1);
                let assigned: Vec<i32> = (channels..channels + size).collect();
                self.driver.uniform_i32_slice(location, &assigned);
                texture[index] = channels;
                channels += size;
            }
        }

        self.shaders.next_program = previous;
        self.sync_shaders();
        if let Some(shader) = self.shaders.programs.get_mut(id.0) {
            shader.uniforms = uniforms;
            shader.texture = texture;
            shader.uniform_map = map;
            shader.active_texture_channels = channels;
        }
    }
}

/// Mutable access to one program of a [`RenderContext`].
pub struct ShaderRef<'a, D: GlDriver> {
    ctx: &'a mut RenderContext<D>,
    id: ShaderId,
}

impl<D: GlDriver> ShaderRef<'_, D> {
    fn state(&self) -> Option<&ShaderProgram> {
        self.ctx.shaders.get(self.id)
    }

    fn state_mut(&mut self) -> Option<&mut ShaderProgram> {
        self.ctx.shaders.get_mut(self.id)
    }

    #[must_use]
    pub fn id(&self) -> ShaderId {
        self.id
    }

    /// GL program name, 0 while unloaded.
    #[must_use]
    pub fn program(&self) -> u32 {
        self.state().map_or(0, ShaderProgram::program)
    }

    /// Make this the program for subsequent geometry. The driver switch is
    /// deferred until the next flush or uniform upload.
    pub fn bind(&mut self) {
        let program = self.program();
        if program == 0 {
            warn!(target: "Shader", "binding unloaded shader {:?}", self.id);
            return;
        }
        self.ctx.flush();
        self.ctx.shaders.next_program = program;
        self.ctx.shaders.bound = Some(self.id);
    }

    /// Stop using this program. Does nothing if another one is bound.
    pub fn unbind(&mut self) {
        if self.ctx.shaders.bound == Some(self.id) {
            self.ctx.unbind_shader();
        }
    }

    /// Delete the GL program and clear every cache. Sources are kept so
    /// [`relink`](Self::relink) can bring it back.
    pub fn unload(&mut self) {
        self.unbind();
        let program = self.program();
        if program != 0 {
            if self.ctx.shaders.cur_program == program {
                self.ctx.sync_shaders();
            }
            self.ctx.driver.delete_program(program);
        }
        if let Some(shader) = self.state_mut() {
            shader.program = 0;
            shader.clear_caches();
            shader.attributes.clear();
            shader.attribute_mask = AttributeMask::empty();
        }
    }

    /// Relink from the stored sources; every cache starts empty.
    ///
    /// # Errors
    ///
    /// [`ShaderError::Build`] if the driver rejects the program.
    pub fn relink(&mut self) -> Result<(), ShaderError> {
        let was_bound = self.ctx.shaders.bound == Some(self.id);
        self.unload();
        self.ctx.link_shader(self.id)?;
        if was_bound {
            self.bind();
        }
        Ok(())
    }

    /// Location of `name`, -1 if the program has no such uniform.
    ///
    /// With `debug_gl` the driver is asked again and a different answer is
    /// a fatal consistency failure.
    pub fn get_uniform_location(&mut self, name: &str) -> i32 {
        let Some(shader) = self.state() else {
            return -1;
        };
        let Some(&location) = shader.uniform_map.get(name) else {
            return -1;
        };
        if self.ctx.config.debug_gl {
            let program = shader.program;
            let actual = self.ctx.driver.get_uniform_location(program, name);
            if actual != location {
                self.ctx.gl_fatal(&format!(
                    "Uniform does not match: {name} cached at {location}, driver reports {actual}"
                ));
            }
        }
        location
    }

    fn location(&mut self, uniform: Uniform<'_>) -> i32 {
        match uniform {
            Uniform::Index(index) => {
                let location = self.state().map_or(-1, |s| s.uniform_location(index));
                if location == -1 && self.state().is_some_and(|s| index >= s.uniforms.len()) {
                    debug!(target: "Shader", "uniform index {index} out of range");
                }
                location
            }
            Uniform::Name(name) => self.get_uniform_location(name),
        }
    }

    /// Resolve `uniform` and check this program is the one uploads target.
    fn target(&mut self, uniform: Uniform<'_>) -> Option<i32> {
        let location = self.location(uniform);
        if location < 0 {
            return None;
        }
        if self.ctx.shaders.next_program != self.program() {
            warn!(target: "Shader", "uniform upload to shader {:?} while it is not bound", self.id);
            return None;
        }
        Some(location)
    }

    fn upload_floats(&mut self, uniform: Uniform<'_>, components: usize, values: &[f32]) -> bool {
        if values.len() < components {
            return false;
        }
        let Some(location) = self.target(uniform) else {
            return false;
        };
        let count = values.len() / components;
        let updated = self
            .state_mut()
            .is_some_and(|s| s.vec4_cache.update(location, &values[..components]));
        if updated || count > 1 {
            self.ctx.sync_shaders();
            self.ctx
                .driver
                .uniform_f32_slice(location, components, &values[..count * components]);
            return true;
        }
        false
    }

    fn upload_ints(&mut self, uniform: Uniform<'_>, components: usize, values: &[i32]) -> bool {
        if values.len() < components {
            return false;
        }
        let Some(location) = self.target(uniform) else {
            return false;
        };
        let count = values.len() / components;
        let as_bits: Vec<f32> = values[..components]
            .iter()
            .map(|&v| f32::from_bits(v.cast_unsigned()))
            .collect();
        let updated = self
            .state_mut()
            .is_some_and(|s| s.vec4_cache.update(location, &as_bits));
        if updated || count > 1 {
            self.ctx.sync_shaders();
            self.ctx
                .driver
                .uniform_i32_slice(location, &values[..count * components]);
            return true;
        }
        false
    }

    fn upload_matrices(&mut self, uniform: Uniform<'_>, dim: usize, transpose: bool, values: &[f32]) -> bool {
        let size = dim * dim;
        if values.len() < size {
            return false;
        }
        let Some(location) = self.target(uniform) else {
            return false;
        };
        let count = values.len() / size;
        let updated = self.state_mut().is_some_and(|s| match dim {
            3 => s.mat3_cache.update(location, &values[..size]),
            _ => s.mat4_cache.update(location, &values[..size]),
        });
        if updated || count > 1 {
            self.ctx.sync_shaders();
            self.ctx
                .driver
                .uniform_matrix_f32_slice(location, dim, transpose, &values[..count * size]);
            return true;
        }
        false
    }

    /// Set an `int` or sampler uniform. Returns whether an upload happened.
    pub fn uniform1i<'n>(&mut self, uniform: impl Into<Uniform<'n>>, x: i32) -> bool {
        self.upload_ints(uniform.into(), 1, &[x])
    }

    pub fn uniform2i<'n>(&mut self, uniform: impl Into<Uniform<'n>>, x: i32, y: i32) -> bool {
        self.upload_ints(uniform.into(), 2, &[x, y])
    }

    /// Set an `int` array; always uploads for more than one element.
    pub fn uniform1iv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, values: &[i32]) -> bool {
        self.upload_ints(uniform.into(), 1, values)
    }

    pub fn uniform1f<'n>(&mut self, uniform: impl Into<Uniform<'n>>, x: f32) -> bool {
        self.upload_floats(uniform.into(), 1, &[x])
    }

    pub fn uniform2f<'n>(&mut self, uniform: impl Into<Uniform<'n>>, x: f32, y: f32) -> bool {
        self.upload_floats(uniform.into(), 2, &[x, y])
    }

    pub fn uniform3f<'n>(&mut self, uniform: impl Into<Uniform<'n>>, x: f32, y: f32, z: f32) -> bool {
        self.upload_floats(uniform.into(), 3, &[x, y, z])
    }

    pub fn uniform4f<'n>(&mut self, uniform: impl Into<Uniform<'n>>, x: f32, y: f32, z: f32, w: f32) -> bool {
        self.upload_floats(uniform.into(), 4, &[x, y, z, w])
    }

    /// Set a `float` array; always uploads for more than one element.
    pub fn uniform1fv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, values: &[f32]) -> bool {
        self.upload_floats(uniform.into(), 1, values)
    }

    pub fn uniform2fv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, values: &[f32]) -> bool {
        self.upload_floats(uniform.into(), 2, values)
    }

    pub fn uniform3fv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, values: &[f32]) -> bool {
        self.upload_floats(uniform.into(), 3, values)
    }

    /// Set a `vec4` or `vec4` array; always uploads for more than one
    /// element.
    pub fn uniform4fv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, values: &[f32]) -> bool {
        self.upload_floats(uniform.into(), 4, values)
    }

    /// Set one or more column-major 3×3 matrices.
    pub fn uniform_matrix3fv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, transpose: bool, values: &[f32]) -> bool {
        self.upload_matrices(uniform.into(), 3, transpose, values)
    }

    /// Set one or more column-major 4×4 matrices.
    pub fn uniform_matrix4fv<'n>(&mut self, uniform: impl Into<Uniform<'n>>, transpose: bool, values: &[f32]) -> bool {
        self.upload_matrices(uniform.into(), 4, transpose, values)
    }

    /// Fragments with alpha below `minimum_alpha` are discarded.
    pub fn set_minimum_alpha(&mut self, minimum_alpha: f32) -> bool {
        self.uniform1f(uniform::MINIMUM_ALPHA, minimum_alpha)
    }

    fn channel(&self, uniform: Uniform<'_>) -> Option<usize> {
        let shader = self.state()?;
        let index = match uniform {
            Uniform::Index(index) => index,
            Uniform::Name(name) => shader.dense_index(name)?,
        };
        if index >= shader.texture.len() {
            warn!(target: "Shader", "uniform index out of bounds: {index}");
            return None;
        }
        usize::try_from(shader.texture_channel(index)).ok()
    }

    /// Bind `image` on the texture channel of sampler `uniform`. Returns
    /// the channel, `None` if `uniform` is not a sampler.
    ///
    /// # Errors
    ///
    /// Whatever [`TexUnitRef::bind`](crate::TexUnitRef::bind) reports.
    pub fn bind_texture<'n>(
        &mut self,
        uniform: impl Into<Uniform<'n>>,
        image: &mut ImageObject,
    ) -> Result<Option<usize>, TextureError> {
        let Some(channel) = self.channel(uniform.into()) else {
            return Ok(None);
        };
        self.ctx.tex_unit(channel).bind(image, false)?;
        Ok(Some(channel))
    }

    /// Unbind type `ty` from the channel of sampler `uniform`.
    pub fn unbind_texture<'n>(&mut self, uniform: impl Into<Uniform<'n>>, ty: TextureType) -> Option<usize> {
        let channel = self.channel(uniform.into())?;
        self.ctx.tex_unit(channel).unbind(ty);
        Some(channel)
    }

    /// Select and enable the channel of sampler `uniform` for type `ty`.
    pub fn enable_texture<'n>(&mut self, uniform: impl Into<Uniform<'n>>, ty: TextureType) -> Option<usize> {
        let channel = self.channel(uniform.into())?;
        let mut unit = self.ctx.tex_unit(channel);
        unit.activate();
        unit.enable(ty);
        Some(channel)
    }

    /// Disable the channel of sampler `uniform`, which must have type `ty`
    /// enabled.
    pub fn disable_texture<'n>(&mut self, uniform: impl Into<Uniform<'n>>, ty: TextureType) -> Option<usize> {
        let channel = self.channel(uniform.into())?;
        let current = self.ctx.tex_unit(channel).current_type();
        if let Some(current) = current {
            if self.ctx.config.debug_gl && current != ty {
                self.ctx
                    .gl_fatal(&format!("Texture channel {channel} texture type corrupted"));
            }
            self.ctx.tex_unit(channel).disable();
        }
        Some(channel)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, ImageRaw, RenderConfig};

    const LIGHT_VS: &str = "uniform mat4 modelview_matrix;\nuniform vec4 light[4];\nin vec3 position;\nin vec4 weight;\nin float custom_attr;\nvoid main() {}";
    const LIGHT_FS: &str = "uniform sampler2D tex1;\nuniform sampler2D bumpMap;\nuniform sampler2D diffuseMap;\nuniform float glow_strength;\nvoid main() {}";

    fn context(config: RenderConfig) -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        RenderContext::new(HeadlessDriver::new(), config)
    }

    fn light_shader(ctx: &mut RenderContext<HeadlessDriver>) -> ShaderId {
        ctx.load_shader("light", LIGHT_VS, LIGHT_FS, &["custom_attr"], &["light", "glow_strength", "tex1"])
            .unwrap()
    }

    #[test]
    fn repeated_values_upload_once() {
        let mut ctx = context(RenderConfig::default());
        let id = ctx.load_immediate_shader().unwrap();
        let mut shader = ctx.shader(id).unwrap();
        shader.bind();
        shader.ctx.driver_mut().reset_counts();
        assert!(shader.uniform1f(uniform::MINIMUM_ALPHA, 0.5));
        assert!(!shader.uniform1f(uniform::MINIMUM_ALPHA, 0.5));
        assert_eq!(shader.ctx.driver().counts().uniform_uploads, 1);
        assert!(shader.uniform1f("minimum_alpha", 0.25));
        assert_eq!(shader.ctx.driver().counts().uniform_uploads, 2);

        let program = shader.program();
        let location = shader.get_uniform_location("minimum_alpha");
        assert_eq!(ctx.driver().uniform_value(program, location), Some(&[0.25][..]));
        // the switch happened lazily, once
        assert_eq!(ctx.driver().counts().use_program, 1);
    }

    #[test]
    fn arrays_always_upload() {
        let mut ctx = context(RenderConfig::default());
        let id = light_shader(&mut ctx);
        let mut shader = ctx.shader(id).unwrap();
        shader.bind();
        shader.ctx.driver_mut().reset_counts();
        let lights = [1.0; 8];
        assert!(shader.uniform4fv("light", &lights));
        assert!(shader.uniform4fv("light", &lights));
        assert_eq!(shader.ctx.driver().counts().uniform_uploads, 2);
        let index = RESERVED_UNIFORMS.len();
        assert!(!shader.uniform4fv(index, &lights[..4]));
        assert!(shader.uniform4fv(index, &[2.0; 4]));
    }

    #[test]
    fn arrays_are_reachable_without_suffix() {
        let mut ctx = context(RenderConfig::default());
        let id = light_shader(&mut ctx);
        let state = ctx.shader_state(id).unwrap();
        let light = state.uniform_location(RESERVED_UNIFORMS.len());
        assert!(light >= 0);
        let mut shader = ctx.shader(id).unwrap();
        assert_eq!(shader.get_uniform_location("light"), light);
        assert_eq!(shader.get_uniform_location("light[0]"), -1);
        assert_eq!(shader.get_uniform_location("missing"), -1);
    }

    #[test]
    fn samplers_get_channels_by_priority() {
        let mut ctx = context(RenderConfig::default());
        let id = light_shader(&mut ctx);
        let state = ctx.shader_state(id).unwrap();
        assert_eq!(state.texture_channel(uniform::DIFFUSE_MAP), 0);
        assert_eq!(state.texture_channel(uniform::BUMP_MAP), 1);
        assert_eq!(state.texture_channel(RESERVED_UNIFORMS.len() + 2), 2);
        assert_eq!(state.texture_channel(RESERVED_UNIFORMS.len() + 1), -1);
        assert_eq!(state.active_texture_channels(), 3);

        let program = state.program();
        let bump = state.uniform_location(uniform::BUMP_MAP);
        assert_eq!(ctx.driver().uniform_value(program, bump), Some(&[1.0][..]));
    }

    #[test]
    fn attributes_are_mapped() {
        let mut ctx = context(RenderConfig::default());
        let id = ctx.load_immediate_shader().unwrap();
        let mask = ctx.shader_state(id).unwrap().attribute_mask();
        assert_eq!(mask, AttributeMask::POSITION | AttributeMask::TEXCOORD0 | AttributeMask::COLOR);

        let id = light_shader(&mut ctx);
        let state = ctx.shader_state(id).unwrap();
        assert!(state.attribute_mask().contains(AttributeMask::WEIGHT));
        assert!(!state.attribute_mask().contains(AttributeMask::COLOR));
        assert!(state.attribute_location(RESERVED_ATTRIBUTES.len()) >= 0);
        assert_eq!(state.attribute_location(1), -1);
    }

    #[test]
    fn binding_is_deferred_and_memoized() {
        let mut ctx = context(RenderConfig::default());
        let id = ctx.load_immediate_shader().unwrap();
        ctx.driver_mut().reset_counts();
        ctx.shader(id).unwrap().bind();
        ctx.shader(id).unwrap().bind();
        assert_eq!(ctx.driver().counts().use_program, 0);
        ctx.sync_shaders();
        ctx.sync_shaders();
        assert_eq!(ctx.driver().counts().use_program, 1);
        assert_eq!(ctx.bound_shader(), Some(id));
        ctx.unbind_shader();
        ctx.sync_shaders();
        assert_eq!(ctx.driver().current_program(), 0);
        assert_eq!(ctx.bound_shader(), None);
    }

    #[test]
    fn uploads_to_an_unbound_shader_are_refused() {
        let mut ctx = context(RenderConfig::default());
        let id = ctx.load_immediate_shader().unwrap();
        ctx.driver_mut().reset_counts();
        assert!(!ctx.shader(id).unwrap().set_minimum_alpha(0.5));
        assert_eq!(ctx.driver().counts().uniform_uploads, 0);
    }

    #[test]
    fn build_failures_register_nothing() {
        let mut ctx = context(RenderConfig::default());
        let err = ctx
            .load_shader("broken", "uniform float x;", shaders::IMMEDIATE_FRAGMENT_SRC, &[], &[])
            .unwrap_err();
        assert!(matches!(err, ShaderError::Build { ref name, .. } if name == "broken"));
        let id = ctx.load_immediate_shader().unwrap();
        assert_eq!(id, ShaderId(0));
        assert_eq!(
            ctx.shader(ShaderId(7)).err(),
            Some(ShaderError::UnknownShader(7))
        );
    }

    #[test]
    fn relink_clears_caches() {
        let mut ctx = context(RenderConfig::default());
        let id = ctx.load_immediate_shader().unwrap();
        let mut shader = ctx.shader(id).unwrap();
        shader.bind();
        assert!(shader.set_minimum_alpha(0.5));
        let old = shader.program();
        shader.relink().unwrap();
        assert_ne!(shader.program(), old);
        assert_eq!(shader.ctx.bound_shader(), Some(id));
        assert!(shader.set_minimum_alpha(0.5));

        shader.unload();
        assert_eq!(shader.program(), 0);
        assert_eq!(shader.ctx.bound_shader(), None);
        assert!(!shader.set_minimum_alpha(0.75));
        shader.relink().unwrap();
        assert!(ctx.shader_state(id).unwrap().is_loaded());
    }

    #[test]
    #[should_panic(expected = "Uniform does not match")]
    fn location_drift_is_fatal() {
        let mut ctx = context(RenderConfig::default().with_debug_gl(true));
        let id = ctx.load_immediate_shader().unwrap();
        let program = ctx.shader_state(id).unwrap().program();
        ctx.driver_mut().relocate_uniform(program, "minimum_alpha", 40);
        ctx.shader(id).unwrap().get_uniform_location("minimum_alpha");
    }

    #[test]
    fn textures_bind_through_sampler_channels() {
        let mut ctx = context(RenderConfig::default());
        let id = light_shader(&mut ctx);
        let raw = ImageRaw::from_data(2, 2, 4, vec![255; 16]).unwrap();
        let mut image = ImageObject::from_raw(&mut ctx, &raw, false).unwrap();
        let mut shader = ctx.shader(id).unwrap();
        assert_eq!(shader.bind_texture(uniform::BUMP_MAP, &mut image), Ok(Some(1)));
        assert_eq!(shader.bind_texture("glow_strength", &mut image), Ok(None));
        assert_eq!(shader.bind_texture(999, &mut image), Ok(None));
        assert_eq!(ctx.tex_unit_state(1).unwrap().current_texture(), image.tex_name());

        let mut shader = ctx.shader(id).unwrap();
        assert_eq!(shader.unbind_texture("bumpMap", TextureType::Texture), Some(1));
        assert_eq!(shader.disable_texture(uniform::BUMP_MAP, TextureType::Texture), Some(1));
        assert_eq!(ctx.tex_unit_state(1).unwrap().current_type(), None);
        image.destroy_gl_texture(&mut ctx);
    }

    #[test]
    fn enable_texture_selects_the_channel() {
        let mut ctx = context(RenderConfig::default());
        let id = light_shader(&mut ctx);
        let mut shader = ctx.shader(id).unwrap();
        assert_eq!(shader.enable_texture("tex1", TextureType::CubeMap), Some(2));
        assert_eq!(ctx.current_tex_unit_index(), 2);
        assert_eq!(ctx.tex_unit_state(2).unwrap().current_type(), Some(TextureType::CubeMap));
    }

    #[test]
    #[should_panic(expected = "texture type corrupted")]
    fn disabling_the_wrong_type_is_fatal_when_debugging() {
        let mut ctx = context(RenderConfig::default().with_debug_gl(true));
        let id = light_shader(&mut ctx);
        let mut shader = ctx.shader(id).unwrap();
        shader.enable_texture(uniform::DIFFUSE_MAP, TextureType::CubeMap);
        shader.disable_texture(uniform::DIFFUSE_MAP, TextureType::Texture);
    }
}

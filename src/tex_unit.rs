//! Per-sampler texture unit state.
//!
//! Each unit remembers the texture type and name bound to it, so a bind of
//! the texture that is already there costs nothing. Units are reached
//! through [`RenderContext::tex_unit`], which hands out a short-lived
//! [`TexUnitRef`] borrowing the whole context (binding can flush geometry
//! and select other units).

use log::{info, warn};

use crate::{
    driver::{gl, gl_int, GlDriver},
    error::TextureError,
    image::ImageObject,
    RenderContext,
};

/// Unit number for `glActiveTexture`.
fn unit_number(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

/// What a unit has bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    /// A 2D texture.
    Texture,
    /// A cube map.
    CubeMap,
}

impl TextureType {
    /// GL target for this type.
    #[must_use]
    pub fn gl_target(self) -> u32 {
        match self {
            Self::Texture => gl::TEXTURE_2D,
            Self::CubeMap => gl::TEXTURE_CUBE_MAP,
        }
    }
}

/// Texture coordinate wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
}

impl AddressMode {
    fn gl_value(self) -> u32 {
        match self {
            Self::Wrap => gl::REPEAT,
            Self::Mirror => gl::MIRRORED_REPEAT,
            Self::Clamp => gl::CLAMP_TO_EDGE,
        }
    }
}

/// Sampling quality, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FilterOption {
    /// Nearest texel, no interpolation.
    Point,
    /// Linear within a level.
    Bilinear,
    /// Linear within and between levels.
    Trilinear,
    /// Trilinear plus anisotropic filtering.
    #[default]
    Anisotropic,
}

/// Fixed-function combine mode of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureBlendType {
    /// Texture times incoming color.
    #[default]
    Mult,
    /// Texture times incoming color, doubled.
    MultX2,
    Add,
    Replace,
    /// Decal: blend texture over incoming color by texture alpha.
    AlphaBlend,
}

/// Cached state of one texture unit.
#[derive(Debug, Clone)]
pub struct TexUnit {
    index: usize,
    curr_type: Option<TextureType>,
    curr_texture: u32,
    has_mipmaps: bool,
    blend_type: TextureBlendType,
    color_scale: i32,
    alpha_scale: i32,
}

impl TexUnit {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            curr_type: None,
            curr_texture: 0,
            has_mipmaps: false,
            blend_type: TextureBlendType::Mult,
            color_scale: 1,
            alpha_scale: 1,
        }
    }

    /// Texture name currently bound, 0 if none.
    #[must_use]
    pub fn current_texture(&self) -> u32 {
        self.curr_texture
    }

    /// Type currently enabled, if any.
    #[must_use]
    pub fn current_type(&self) -> Option<TextureType> {
        self.curr_type
    }

    #[must_use]
    pub fn has_mipmaps(&self) -> bool {
        self.has_mipmaps
    }

    #[must_use]
    pub fn blend_type(&self) -> TextureBlendType {
        self.blend_type
    }

    pub(crate) fn forget_texture(&mut self, name: u32) {
        if self.curr_texture == name {
            self.curr_texture = 0;
        }
    }
}

/// Mutable access to one texture unit of a [`RenderContext`].
///
/// A reference to a unit index past the configured count is a dummy: every
/// operation on it does nothing and binds report failure.
pub struct TexUnitRef<'a, D: GlDriver> {
    ctx: &'a mut RenderContext<D>,
    index: Option<usize>,
}

impl<D: GlDriver> RenderContext<D> {
    /// The texture unit `index`.
    pub fn tex_unit(&mut self, index: usize) -> TexUnitRef<'_, D> {
        let index = if index < self.units.len() {
            Some(index)
        } else {
            warn!(target: "TexUnit", "non-existing texture unit layer {index} requested");
            None
        };
        TexUnitRef { ctx: self, index }
    }

    /// Read-only view of texture unit `index`.
    #[must_use]
    pub fn tex_unit_state(&self, index: usize) -> Option<&TexUnit> {
        self.units.get(index)
    }

    /// Index of the unit the driver has selected.
    #[must_use]
    pub fn current_tex_unit_index(&self) -> usize {
        self.current_unit
    }

    /// Name of the 1×1 white texture 2D units fall back to when unbound.
    #[must_use]
    pub fn white_texture(&self) -> u32 {
        self.white_texture
    }

    /// Texture bound in place of an image that has no GL texture yet.
    pub fn set_default_texture(&mut self, image: Option<&ImageObject>) {
        self.default_texture = image
            .filter(|image| image.tex_name() != 0)
            .map(|image| (image.bind_target(), image.tex_name(), image.has_mipmaps()));
    }

    /// Warn if the driver's active unit differs from the cached one.
    pub fn verify_active_unit(&mut self) -> bool {
        let active = self.driver.get_parameter_i32(gl::ACTIVE_TEXTURE);
        let expected = i64::from(gl::TEXTURE0) + i64::try_from(self.current_unit).unwrap_or(i64::MAX);
        if i64::from(active) == expected {
            return true;
        }
        warn!(
            target: "TexUnit",
            "incorrect texture unit: expected {} actual {}",
            self.current_unit,
            i64::from(active) - i64::from(gl::TEXTURE0)
        );
        false
    }
}

impl<D: GlDriver> TexUnitRef<'_, D> {
    fn unit(&self) -> Option<&TexUnit> {
        self.index.and_then(|i| self.ctx.units.get(i))
    }

    fn unit_mut(&mut self) -> Option<&mut TexUnit> {
        self.index.and_then(|i| self.ctx.units.get_mut(i))
    }

    fn uses_fixed_function(&self) -> bool {
        !self.ctx.config.no_fixed_function
    }

    /// Unit index, `None` for the dummy unit.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Texture name currently bound, 0 if none.
    #[must_use]
    pub fn current_texture(&self) -> u32 {
        self.unit().map_or(0, TexUnit::current_texture)
    }

    #[must_use]
    pub fn current_type(&self) -> Option<TextureType> {
        self.unit().and_then(TexUnit::current_type)
    }

    /// Override the mipmap flag used by filter selection.
    pub fn set_has_mipmaps(&mut self, has_mipmaps: bool) {
        if let Some(unit) = self.unit_mut() {
            unit.has_mipmaps = has_mipmaps;
        }
    }

    /// Re-issue this unit's whole state, ignoring the cache.
    pub fn refresh_state(&mut self) {
        let Some(index) = self.index else {
            return;
        };
        self.ctx.flush();
        self.ctx.driver.active_texture(unit_number(index));

        let fixed = self.uses_fixed_function();
        let (curr_type, curr_texture, blend_type) = {
            let unit = &self.ctx.units[index];
            (unit.curr_type, unit.curr_texture, unit.blend_type)
        };
        if let Some(ty) = curr_type {
            if fixed {
                self.ctx.driver.enable(ty.gl_target());
            }
            self.ctx.driver.bind_texture(ty.gl_target(), curr_texture);
        } else {
            if fixed {
                self.ctx.driver.disable(gl::TEXTURE_2D);
            }
            self.ctx.driver.bind_texture(gl::TEXTURE_2D, 0);
        }
        self.set_texture_blend_type(blend_type);
    }

    /// Select this unit for subsequent texture calls.
    pub fn activate(&mut self) {
        let Some(index) = self.index else {
            return;
        };
        if self.ctx.current_unit != index || self.ctx.render.dirty {
            self.ctx.driver.active_texture(unit_number(index));
            self.ctx.current_unit = index;
        }
    }

    /// Enable texturing of type `ty`, disabling any other type first.
    pub fn enable(&mut self, ty: TextureType) {
        let Some(index) = self.index else {
            return;
        };
        let dirty = self.ctx.render.dirty;
        let curr_type = self.ctx.units[index].curr_type;
        if curr_type == Some(ty) && !dirty {
            return;
        }
        self.activate();
        if curr_type.is_some() && !dirty {
            self.disable();
        }
        self.ctx.units[index].curr_type = Some(ty);
        self.ctx.flush();
        if self.uses_fixed_function() {
            self.ctx.driver.enable(ty.gl_target());
        }
    }

    /// Unbind and disable whatever type is enabled.
    pub fn disable(&mut self) {
        let Some(index) = self.index else {
            return;
        };
        let Some(ty) = self.ctx.units[index].curr_type else {
            return;
        };
        self.activate();
        self.unbind(ty);
        self.ctx.flush();
        if self.uses_fixed_function() {
            self.ctx.driver.disable(ty.gl_target());
        }
        self.ctx.units[index].curr_type = None;
    }

    /// Bind `image`, applying its pending address and filter options.
    ///
    /// An image without a GL texture binds the context's default texture
    /// instead, if one is set.
    ///
    /// # Errors
    ///
    /// [`TextureError::NoSuchUnit`] for the dummy unit and
    /// [`TextureError::NoTexture`] when neither the image nor a default
    /// texture can be bound.
    pub fn bind(&mut self, image: &mut ImageObject, force: bool) -> Result<(), TextureError> {
        let Some(index) = self.index else {
            return Err(TextureError::NoSuchUnit(self.ctx.units.len()));
        };
        let name = image.tex_name();
        if name == 0 {
            return match self.ctx.default_texture {
                Some((ty, default, has_mips)) => {
                    self.bind_manual(ty, default, has_mips);
                    Ok(())
                }
                None => {
                    warn!(target: "TexUnit", "bind of image without a GL texture");
                    Err(TextureError::NoTexture)
                }
            };
        }
        if self.ctx.units[index].curr_texture == name && !force {
            return Ok(());
        }

        self.ctx.flush();
        self.activate();
        let ty = image.bind_target();
        self.enable(ty);
        self.ctx.units[index].curr_texture = name;
        self.ctx.driver.bind_texture(ty.gl_target(), name);
        image.record_bind(&mut self.ctx.memory);
        self.ctx.units[index].has_mipmaps = image.has_mipmaps();
        if image.take_dirty_options() {
            self.set_texture_address_mode(image.address_mode());
            self.set_texture_filtering_option(image.filtering_option());
        }
        Ok(())
    }

    /// Bind a raw texture name. Returns `false` for the dummy unit.
    pub fn bind_manual(&mut self, ty: TextureType, texture: u32, has_mipmaps: bool) -> bool {
        let Some(index) = self.index else {
            return false;
        };
        if self.ctx.units[index].curr_texture != texture {
            self.ctx.flush();
            self.activate();
            self.enable(ty);
            self.ctx.units[index].curr_texture = texture;
            self.ctx.driver.bind_texture(ty.gl_target(), texture);
            self.ctx.units[index].has_mipmaps = has_mipmaps;
        }
        true
    }

    /// Unbind type `ty`, leaving the white texture bound for 2D.
    ///
    /// Always leaves this unit selected, so callers can rely on it as a
    /// synchronization point.
    pub fn unbind(&mut self, ty: TextureType) {
        let Some(index) = self.index else {
            return;
        };
        if self.ctx.current_unit != index || self.ctx.render.dirty {
            self.ctx.flush();
            self.activate();
        }
        let unit = &self.ctx.units[index];
        if unit.curr_type == Some(ty) && unit.curr_texture != 0 {
            self.ctx.flush();
            self.ctx.units[index].curr_texture = 0;
            let fallback = match ty {
                TextureType::Texture => self.ctx.white_texture,
                TextureType::CubeMap => 0,
            };
            self.ctx.driver.bind_texture(ty.gl_target(), fallback);
        }
    }

    /// Set wrap modes of the bound texture.
    pub fn set_texture_address_mode(&mut self, mode: AddressMode) {
        let Some((ty, _)) = self.bound() else {
            return;
        };
        self.ctx.flush();
        self.activate();
        let target = ty.gl_target();
        let value = gl_int(mode.gl_value());
        self.ctx.driver.tex_parameter_i32(target, gl::TEXTURE_WRAP_S, value);
        self.ctx.driver.tex_parameter_i32(target, gl::TEXTURE_WRAP_T, value);
        if ty == TextureType::CubeMap {
            self.ctx.driver.tex_parameter_i32(target, gl::TEXTURE_WRAP_R, value);
        }
    }

    /// Set min/mag filters and anisotropy of the bound texture.
    pub fn set_texture_filtering_option(&mut self, option: FilterOption) {
        let Some((ty, has_mips)) = self.bound() else {
            return;
        };
        self.ctx.flush();
        let target = ty.gl_target();

        let mag = if option == FilterOption::Point {
            gl::NEAREST
        } else {
            gl::LINEAR
        };
        let min = match (option >= FilterOption::Trilinear, option >= FilterOption::Bilinear, has_mips) {
            (true, _, true) => gl::LINEAR_MIPMAP_LINEAR,
            (_, true, true) => gl::LINEAR_MIPMAP_NEAREST,
            (_, true, false) => gl::LINEAR,
            (_, false, true) => gl::NEAREST_MIPMAP_NEAREST,
            (_, false, false) => gl::NEAREST,
        };
        self.ctx.driver.tex_parameter_i32(target, gl::TEXTURE_MAG_FILTER, gl_int(mag));
        self.ctx.driver.tex_parameter_i32(target, gl::TEXTURE_MIN_FILTER, gl_int(min));

        let anisotropy = if option == FilterOption::Anisotropic {
            self.ctx.config.max_anisotropy.max(1.0)
        } else {
            1.0
        };
        self.ctx
            .driver
            .tex_parameter_f32(target, gl::TEXTURE_MAX_ANISOTROPY, anisotropy);
    }

    fn bound(&self) -> Option<(TextureType, bool)> {
        let unit = self.unit()?;
        if unit.curr_texture == 0 {
            return None;
        }
        Some((unit.curr_type.unwrap_or(TextureType::Texture), unit.has_mipmaps))
    }

    /// Set the fixed-function combine mode. Inert without fixed function.
    pub fn set_texture_blend_type(&mut self, ty: TextureBlendType) {
        if !self.uses_fixed_function() {
            return;
        }
        let Some(index) = self.index else {
            return;
        };
        if self.ctx.units[index].blend_type == ty && !self.ctx.render.dirty {
            return;
        }
        self.ctx.flush();
        self.activate();
        self.ctx.units[index].blend_type = ty;
        let (mode, scale) = match ty {
            TextureBlendType::Replace => (gl::REPLACE, 1),
            TextureBlendType::Add => (gl::ADD, 1),
            TextureBlendType::Mult => (gl::MODULATE, 1),
            TextureBlendType::MultX2 => (gl::MODULATE, 2),
            TextureBlendType::AlphaBlend => (gl::DECAL, 1),
        };
        self.ctx
            .driver
            .tex_env_i32(gl::TEXTURE_ENV, gl::TEXTURE_ENV_MODE, gl_int(mode));
        self.set_color_scale(scale);
        self.set_alpha_scale(1);
    }

    fn set_color_scale(&mut self, scale: i32) {
        let Some(index) = self.index else {
            return;
        };
        if self.ctx.units[index].color_scale != scale || self.ctx.render.dirty {
            self.ctx.flush();
            self.ctx.units[index].color_scale = scale;
            self.ctx.driver.tex_env_i32(gl::TEXTURE_ENV, gl::RGB_SCALE, scale);
        }
    }

    fn set_alpha_scale(&mut self, scale: i32) {
        let Some(index) = self.index else {
            return;
        };
        if self.ctx.units[index].alpha_scale != scale || self.ctx.render.dirty {
            self.ctx.flush();
            self.ctx.units[index].alpha_scale = scale;
            self.ctx.driver.tex_env_i32(gl::TEXTURE_ENV, gl::ALPHA_SCALE, scale);
        }
    }

    /// Log this unit's cached state.
    pub fn dump(&self) {
        if let Some(unit) = self.unit() {
            info!(
                target: "TexUnit",
                "unit {}: type {:?} texture {} mips {} blend {:?}",
                unit.index, unit.curr_type, unit.curr_texture, unit.has_mipmaps, unit.blend_type
            );
        }
    }
}

//! The render context: one object owning every cache that mirrors driver
//! state.

use log::{info, warn};

use crate::{
    driver::{gl, GlDriver},
    error::{DriverError, ShaderError},
    image::TextureMemory,
    program::ShaderRegistry,
    render::{BlendFactor, Renderer},
    state::StateRegistry,
    tex_unit::{TexUnit, TextureType},
    RenderConfig,
};

/// All render state of one GL context.
///
/// Owns the driver together with the capability cache, the texture units,
/// the shader registry, the immediate-mode renderer and texture memory
/// accounting. There is exactly one per driver context; components that
/// need it borrow it.
pub struct RenderContext<D: GlDriver> {
    pub(crate) driver: D,
    pub(crate) config: RenderConfig,
    pub(crate) states: StateRegistry,
    pub(crate) units: Vec<TexUnit>,
    pub(crate) current_unit: usize,
    pub(crate) white_texture: u32,
    pub(crate) default_texture: Option<(TextureType, u32, bool)>,
    pub(crate) shaders: ShaderRegistry,
    pub(crate) render: Renderer,
    pub(crate) memory: TextureMemory,
    /// The driver context is gone; creation and drawing are skipped.
    pub(crate) gl_disabled: bool,
    pub(crate) next_scope_id: u64,
    pub(crate) failures: usize,
}

impl<D: GlDriver> RenderContext<D> {
    /// Take over `driver` and bring it to the default state: registered
    /// capabilities applied, alpha blending selected and the white fallback
    /// texture created.
    pub fn new(driver: D, config: RenderConfig) -> Self {
        let units = (0..config.texture_units).map(TexUnit::new).collect();
        let mut ctx = Self {
            driver,
            config,
            states: StateRegistry::default(),
            units,
            current_unit: 0,
            white_texture: 0,
            default_texture: None,
            shaders: ShaderRegistry::default(),
            render: Renderer::new(),
            memory: TextureMemory::default(),
            gl_disabled: false,
            next_scope_id: 0,
            failures: 0,
        };
        ctx.init_states();
        ctx.init_gl();
        ctx.check_states("RenderContext::new");
        ctx
    }

    /// Driver-side half of initialization, shared with
    /// [`restore_gl`](Self::restore_gl).
    fn init_gl(&mut self) {
        self.apply_all_states();
        self.driver.blend_func(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
        self.render
            .assume_blend(BlendFactor::SourceAlpha, BlendFactor::OneMinusSourceAlpha);
        self.white_texture = match self.create_white_texture() {
            Ok(name) => name,
            Err(err) => {
                warn!(target: "RenderState", "failed to create the white texture: {err}");
                0
            }
        };
    }

    fn create_white_texture(&mut self) -> Result<u32, DriverError> {
        let name = self.driver.create_texture()?;
        self.driver.bind_texture(gl::TEXTURE_2D, name);
        self.driver.tex_image_2d(
            gl::TEXTURE_2D,
            0,
            gl::RGBA8,
            1,
            1,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            Some(&[255; 4]),
        );
        self.driver.bind_texture(gl::TEXTURE_2D, 0);
        Ok(name)
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Direct driver access. Calls made here bypass every cache; follow
    /// them with [`refresh_state`](Self::refresh_state) or
    /// [`reset_sync_hashes`](Self::reset_sync_hashes) as needed.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Texture memory counters.
    #[must_use]
    pub fn texture_memory(&self) -> &TextureMemory {
        &self.memory
    }

    /// Close the current frame of texture bind statistics.
    pub fn update_texture_stats(&mut self) {
        self.memory.update_stats();
    }

    /// Whether the driver context is currently lost.
    #[must_use]
    pub fn is_gl_disabled(&self) -> bool {
        self.gl_disabled
    }

    /// The driver context is about to go away.
    ///
    /// Pending geometry is drawn, the white texture is released, programs
    /// are forgotten (their sources are kept for
    /// [`restore_gl`](Self::restore_gl)) and every cache is reset so nothing
    /// believes the driver still holds state. Images must have been saved
    /// or destroyed by their owners beforehand.
    pub fn destroy_gl(&mut self) {
        if self.gl_disabled {
            return;
        }
        info!(target: "RenderState", "destroying GL state");
        self.flush();
        self.unbind_shader();
        self.forget_shaders();
        self.render.reset_context();
        self.reset_sync_hashes();
        for index in 0..self.units.len() {
            self.units[index] = TexUnit::new(index);
        }
        self.current_unit = 0;
        self.default_texture = None;
        if self.white_texture != 0 {
            self.driver.delete_texture(self.white_texture);
            self.white_texture = 0;
        }
        self.gl_disabled = true;
    }

    /// A new driver context is current: re-apply the cached capability
    /// values, recreate the white texture and relink every program.
    ///
    /// # Errors
    ///
    /// The first program that fails to relink. The context itself is
    /// usable again either way.
    pub fn restore_gl(&mut self) -> Result<(), ShaderError> {
        if !self.gl_disabled {
            return Ok(());
        }
        info!(target: "RenderState", "restoring GL state");
        self.gl_disabled = false;
        self.init_gl();
        self.refresh_state();
        let relinked = self.relink_shaders();
        self.check_states("RenderContext::restore_gl");
        relinked
    }

    /// Swap in a different driver for the same logical context, after
    /// [`destroy_gl`](Self::destroy_gl). Returns the previous driver.
    pub fn replace_driver(&mut self, driver: D) -> D {
        if !self.gl_disabled {
            self.usage_error("driver replaced while GL is live");
        }
        std::mem::replace(&mut self.driver, driver)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, CapabilityId, Topology};

    fn context() -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        RenderContext::new(HeadlessDriver::new(), RenderConfig::default())
    }

    #[test]
    fn starts_with_alpha_blending_and_a_white_texture() {
        let ctx = context();
        assert_eq!(
            ctx.driver().blend_factors(),
            [gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA, gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA]
        );
        let white = ctx.white_texture();
        assert!(ctx.driver().texture_exists(white));
        let (width, height, texels) = ctx.driver().texture_level(white, 0).unwrap();
        assert_eq!((width, height, texels), (1, 1, &[255u8; 4][..]));
        assert!(ctx.is_enabled(CapabilityId::DITHER));
        assert_eq!(ctx.texture_memory().texture_count(), 0);
        assert_eq!(ctx.failure_count(), 0);
    }

    #[test]
    fn unit_count_follows_the_config() {
        let ctx = RenderContext::new(
            HeadlessDriver::new(),
            RenderConfig {
                texture_units: 4,
                ..RenderConfig::default()
            },
        );
        assert!(ctx.tex_unit_state(3).is_some());
        assert!(ctx.tex_unit_state(4).is_none());
    }

    #[test]
    fn context_loss_round_trip() {
        let mut ctx = context();
        let id = ctx.load_immediate_shader().unwrap();
        ctx.shader(id).unwrap().bind();
        ctx.begin(Topology::Triangles);
        ctx.vertex2f(0.0, 0.0);
        ctx.vertex2f(1.0, 0.0);
        ctx.vertex2f(0.0, 1.0);
        ctx.destroy_gl();
        assert_eq!(ctx.driver().draws().len(), 1);
        assert!(ctx.is_gl_disabled());
        assert_eq!(ctx.white_texture(), 0);
        assert!(!ctx.shader_state(id).unwrap().is_loaded());
        assert_eq!(ctx.bound_shader(), None);

        ctx.restore_gl().unwrap();
        assert!(!ctx.is_gl_disabled());
        assert_ne!(ctx.white_texture(), 0);
        assert!(ctx.shader_state(id).unwrap().is_loaded());
        assert!(ctx.driver().cap_enabled(gl::DITHER));
    }

    #[test]
    fn restore_without_loss_is_a_no_op() {
        let mut ctx = context();
        let white = ctx.white_texture();
        ctx.restore_gl().unwrap();
        assert_eq!(ctx.white_texture(), white);
    }

    #[test]
    fn drivers_can_be_swapped_while_lost() {
        let mut ctx = context();
        ctx.destroy_gl();
        let old = ctx.replace_driver(HeadlessDriver::new());
        assert_eq!(old.live_textures(), 0);
        ctx.restore_gl().unwrap();
        assert!(ctx.driver().texture_exists(ctx.white_texture()));
        assert!(ctx.driver().cap_enabled(gl::DITHER));
    }
}

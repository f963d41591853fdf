//! Deferred blend/raster state.
//!
//! Setters only record the requested value in the pending snapshot
//! (flushing first when the change would affect geometry already batched).
//! [`RenderContext::sync_context_state`] runs at every flush and issues one
//! driver call per field that differs from the last value sent.

use bitflags::bitflags;
use log::info;

use super::{BlendFactor, BlendType, CompareFunc, PolygonFace, PolygonMode, Topology};
use crate::{
    driver::{gl, GlDriver},
    types::Rect,
    CapabilityId, RenderContext,
};

bitflags! {
    /// Color channels written by draws.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const RGB = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
    }
}

impl Default for ColorMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Global raster state, once as sent and once as requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextSnapshot {
    /// Current color for programs without a color attribute.
    pub color: [f32; 4],
    pub color_mask: ColorMask,
    pub alpha_func: CompareFunc,
    pub alpha_value: f32,
    pub blend_color_sfactor: BlendFactor,
    pub blend_color_dfactor: BlendFactor,
    pub blend_alpha_sfactor: BlendFactor,
    pub blend_alpha_dfactor: BlendFactor,
    pub line_width: f32,
    pub point_size: f32,
    /// Front and back modes.
    pub polygon_mode: [PolygonMode; 2],
    /// Factor and units.
    pub polygon_offset: [f32; 2],
    pub viewport: Rect,
    pub scissor: Rect,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self {
            color: [1.0; 4],
            color_mask: ColorMask::all(),
            alpha_func: CompareFunc::Always,
            alpha_value: 0.0,
            blend_color_sfactor: BlendFactor::One,
            blend_color_dfactor: BlendFactor::Zero,
            blend_alpha_sfactor: BlendFactor::One,
            blend_alpha_dfactor: BlendFactor::Zero,
            line_width: 1.0,
            point_size: 1.0,
            polygon_mode: [PolygonMode::Fill; 2],
            polygon_offset: [0.0; 2],
            viewport: Rect::NULL,
            scissor: Rect::NULL,
        }
    }
}

impl ContextSnapshot {
    /// Log every field of `self`, marking those that differ from `other`.
    pub fn log_diff(&self, other: &Self) {
        if self == other {
            return;
        }
        macro_rules! field {
            ($($name:ident),*) => {$(
                if self.$name == other.$name {
                    info!(target: "Render", "{}: {:?}", stringify!($name), other.$name);
                } else {
                    info!(
                        target: "Render",
                        "{}: {:?} -> {:?}",
                        stringify!($name), other.$name, self.$name
                    );
                }
            )*};
        }
        field!(
            color,
            color_mask,
            alpha_func,
            alpha_value,
            blend_color_sfactor,
            blend_color_dfactor,
            blend_alpha_sfactor,
            blend_alpha_dfactor,
            line_width,
            point_size,
            polygon_mode,
            polygon_offset,
            viewport,
            scissor
        );
    }

    fn same_blend(&self, other: &Self) -> bool {
        self.blend_color_sfactor == other.blend_color_sfactor
            && self.blend_color_dfactor == other.blend_color_dfactor
            && self.blend_alpha_sfactor == other.blend_alpha_sfactor
            && self.blend_alpha_dfactor == other.blend_alpha_dfactor
    }
}

impl<D: GlDriver> RenderContext<D> {
    /// State last sent to the driver.
    #[must_use]
    pub fn context_state(&self) -> &ContextSnapshot {
        &self.render.current
    }

    /// State requested for the next flush.
    #[must_use]
    pub fn pending_context_state(&self) -> &ContextSnapshot {
        &self.render.pending
    }

    /// Log the difference between requested and sent state.
    pub fn dump_context_state(&self) {
        self.render.pending.log_diff(&self.render.current);
    }

    pub fn set_color_mask(&mut self, mask: ColorMask) {
        if self.render.pending.color_mask != mask || self.render.dirty {
            self.flush();
            self.render.pending.color_mask = mask;
        }
    }

    /// Enable or disable the color channels and the alpha channel together.
    pub fn set_color_write(&mut self, color: bool, alpha: bool) {
        let mut mask = ColorMask::empty();
        mask.set(ColorMask::RGB, color);
        mask.set(ColorMask::ALPHA, alpha);
        self.set_color_mask(mask);
    }

    /// Request a blend function for both color and alpha.
    pub fn blend_func(&mut self, sfactor: BlendFactor, dfactor: BlendFactor) {
        self.blend_func_separate(sfactor, dfactor, sfactor, dfactor);
    }

    /// Request separate color and alpha blend functions.
    pub fn blend_func_separate(
        &mut self,
        color_sfactor: BlendFactor,
        color_dfactor: BlendFactor,
        alpha_sfactor: BlendFactor,
        alpha_dfactor: BlendFactor,
    ) {
        let pending = &self.render.pending;
        if pending.blend_color_sfactor == color_sfactor
            && pending.blend_color_dfactor == color_dfactor
            && pending.blend_alpha_sfactor == alpha_sfactor
            && pending.blend_alpha_dfactor == alpha_dfactor
            && !self.render.dirty
        {
            return;
        }
        if self.is_enabled(CapabilityId::BLEND) {
            self.flush();
        }
        let pending = &mut self.render.pending;
        pending.blend_color_sfactor = color_sfactor;
        pending.blend_color_dfactor = color_dfactor;
        pending.blend_alpha_sfactor = alpha_sfactor;
        pending.blend_alpha_dfactor = alpha_dfactor;
    }

    pub fn set_scene_blend_type(&mut self, ty: BlendType) {
        let (sfactor, dfactor) = ty.factors();
        self.blend_func(sfactor, dfactor);
    }

    /// Request the alpha rejection test.
    ///
    /// Without fixed function the test is carried by the bound program's
    /// `minimum_alpha` uniform, which only models "greater than" tests;
    /// other functions disable rejection there.
    pub fn set_alpha_reject_settings(&mut self, func: CompareFunc, value: f32) {
        if self.config.no_fixed_function {
            let minimum = match func {
                CompareFunc::Default => 0.01,
                CompareFunc::Greater | CompareFunc::GreaterEqual => value,
                _ => 0.0,
            };
            if let Some(id) = self.shaders.bound {
                self.shader_handle(id).set_minimum_alpha(minimum);
            }
            return;
        }
        let pending = &self.render.pending;
        if pending.alpha_func != func || pending.alpha_value != value || self.render.dirty {
            self.flush();
            self.render.pending.alpha_func = func;
            self.render.pending.alpha_value = value;
        }
    }

    pub fn set_viewport(&mut self, rect: Rect) {
        if self.render.pending.viewport != rect || self.render.dirty {
            self.flush();
            self.render.pending.viewport = rect;
        }
    }

    /// Request a scissor box. Only sent while the scissor test is enabled.
    pub fn set_scissor(&mut self, rect: Rect) {
        if self.render.pending.scissor != rect || self.render.dirty {
            if self.is_enabled(CapabilityId::SCISSOR_TEST) {
                self.flush();
            }
            self.render.pending.scissor = rect;
        }
    }

    /// Request a line width; core profiles only support 1.
    pub fn set_line_width(&mut self, width: f32) {
        let width = if self.config.core_profile { 1.0 } else { width };
        if self.render.pending.line_width != width || self.render.dirty {
            if matches!(self.render.mode, Topology::Lines | Topology::LineStrip) {
                self.flush();
            }
            self.render.pending.line_width = width;
        }
    }

    pub fn set_point_size(&mut self, size: f32) {
        if self.render.pending.point_size != size || self.render.dirty {
            if self.render.mode == Topology::Points {
                self.flush();
            }
            self.render.pending.point_size = size;
        }
    }

    pub fn set_polygon_mode(&mut self, face: PolygonFace, mode: PolygonMode) {
        let [front, back] = self.render.pending.polygon_mode;
        let requested = match face {
            PolygonFace::Front => [mode, back],
            PolygonFace::Back => [front, mode],
            PolygonFace::FrontAndBack => [mode, mode],
        };
        if requested != [front, back] || self.render.dirty {
            self.flush();
            self.render.pending.polygon_mode = requested;
        }
    }

    pub fn set_polygon_offset(&mut self, factor: f32, units: f32) {
        if self.render.pending.polygon_offset != [factor, units] || self.render.dirty {
            if self.is_enabled(CapabilityId::POLYGON_OFFSET_FILL)
                || self.is_enabled(CapabilityId::POLYGON_OFFSET_LINE)
            {
                self.flush();
            }
            self.render.pending.polygon_offset = [factor, units];
        }
    }

    /// Send every pending field that differs from what the driver has.
    pub(crate) fn sync_context_state(&mut self) {
        let next = self.render.pending;
        let mut cur = self.render.current;

        // no fixed-function color entry point; recorded for parity
        cur.color = next.color;

        if cur.color_mask != next.color_mask {
            cur.color_mask = next.color_mask;
            let mask = cur.color_mask;
            self.driver.color_mask(
                mask.contains(ColorMask::RED),
                mask.contains(ColorMask::GREEN),
                mask.contains(ColorMask::BLUE),
                mask.contains(ColorMask::ALPHA),
            );
        }
        if cur.alpha_func != next.alpha_func || cur.alpha_value != next.alpha_value {
            cur.alpha_func = next.alpha_func;
            cur.alpha_value = next.alpha_value;
            if !self.config.no_fixed_function {
                let (func, reference) = cur.alpha_func.gl_func(cur.alpha_value);
                self.driver.alpha_func(func, reference);
            }
        }
        if self.is_enabled(CapabilityId::BLEND) && !cur.same_blend(&next) {
            cur.blend_color_sfactor = next.blend_color_sfactor;
            cur.blend_color_dfactor = next.blend_color_dfactor;
            cur.blend_alpha_sfactor = next.blend_alpha_sfactor;
            cur.blend_alpha_dfactor = next.blend_alpha_dfactor;
            if cur.blend_color_sfactor == cur.blend_alpha_sfactor
                && cur.blend_color_dfactor == cur.blend_alpha_dfactor
            {
                self.driver.blend_func(
                    cur.blend_color_sfactor.gl_factor(),
                    cur.blend_color_dfactor.gl_factor(),
                );
            } else {
                self.driver.blend_func_separate(
                    cur.blend_color_sfactor.gl_factor(),
                    cur.blend_color_dfactor.gl_factor(),
                    cur.blend_alpha_sfactor.gl_factor(),
                    cur.blend_alpha_dfactor.gl_factor(),
                );
            }
        }
        if cur.line_width != next.line_width {
            cur.line_width = next.line_width;
            self.driver.line_width(cur.line_width);
        }
        if cur.point_size != next.point_size {
            cur.point_size = next.point_size;
            self.driver.point_size(cur.point_size);
        }
        if cur.polygon_mode != next.polygon_mode {
            let [front, back] = next.polygon_mode;
            if front == back {
                self.driver.polygon_mode(gl::FRONT_AND_BACK, front.gl_mode());
            } else {
                if cur.polygon_mode[0] != front {
                    self.driver.polygon_mode(gl::FRONT, front.gl_mode());
                }
                if cur.polygon_mode[1] != back {
                    self.driver.polygon_mode(gl::BACK, back.gl_mode());
                }
            }
            cur.polygon_mode = next.polygon_mode;
        }
        if cur.polygon_offset != next.polygon_offset {
            cur.polygon_offset = next.polygon_offset;
            let [factor, units] = cur.polygon_offset;
            self.driver.polygon_offset(factor, units);
        }
        if cur.viewport != next.viewport {
            cur.viewport = next.viewport;
            let v = cur.viewport;
            self.driver.viewport(v.left, v.bottom, v.width(), v.height());
        }
        if self.is_enabled(CapabilityId::SCISSOR_TEST) && cur.scissor != next.scissor {
            cur.scissor = next.scissor;
            let s = cur.scissor;
            self.driver.scissor(s.left, s.bottom, s.width(), s.height());
        }

        self.render.current = cur;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, RenderConfig};

    fn context(config: RenderConfig) -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = RenderContext::new(HeadlessDriver::new(), config);
        ctx.driver_mut().reset_counts();
        ctx
    }

    fn draw_point(ctx: &mut RenderContext<HeadlessDriver>) {
        ctx.begin(Topology::Points);
        ctx.vertex2f(0.0, 0.0);
        ctx.end();
        ctx.flush();
    }

    #[test]
    fn only_changed_fields_are_sent() {
        let mut ctx = context(RenderConfig::default());
        ctx.set_viewport(Rect::from_xywh(0, 0, 640, 480));
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().counts().viewport, 1);
        assert_eq!(ctx.driver().viewport_state(), [0, 0, 640, 480]);

        ctx.set_point_size(4.0);
        draw_point(&mut ctx);
        let counts = ctx.driver().counts();
        assert_eq!(counts.viewport, 1);
        assert_eq!(counts.point_size, 1);
        assert_eq!(counts.blend_func, 0);
        assert_eq!(counts.line_width, 0);

        draw_point(&mut ctx);
        assert_eq!(ctx.driver().counts().point_size, 1);
        assert_eq!(ctx.context_state(), ctx.pending_context_state());
    }

    #[test]
    fn blend_waits_for_the_capability() {
        let mut ctx = context(RenderConfig::default());
        ctx.set_scene_blend_type(BlendType::Add);
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().counts().blend_func, 0);

        let mut blend = ctx.enter_scope(CapabilityId::BLEND, true);
        draw_point(&mut blend);
        assert_eq!(blend.driver().blend_factors(), [gl::ONE, gl::ONE, gl::ONE, gl::ONE]);

        blend.blend_func_separate(
            BlendFactor::SourceAlpha,
            BlendFactor::OneMinusSourceAlpha,
            BlendFactor::One,
            BlendFactor::OneMinusSourceAlpha,
        );
        draw_point(&mut blend);
        assert_eq!(
            blend.driver().blend_factors(),
            [gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA, gl::ONE, gl::ONE_MINUS_SRC_ALPHA]
        );
    }

    #[test]
    fn scissor_waits_for_the_capability() {
        let mut ctx = context(RenderConfig::default());
        ctx.set_scissor(Rect::from_xywh(10, 20, 30, 40));
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().counts().scissor, 0);
        let mut scissor = ctx.enter_scope(CapabilityId::SCISSOR_TEST, true);
        draw_point(&mut scissor);
        assert_eq!(scissor.driver().scissor_state(), [10, 20, 30, 40]);
    }

    #[test]
    fn polygon_modes_collapse_when_equal() {
        let mut ctx = context(RenderConfig::default());
        ctx.set_polygon_mode(PolygonFace::Front, PolygonMode::Line);
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().polygon_mode_state(), [gl::LINE, gl::FILL]);
        assert_eq!(ctx.driver().counts().polygon_mode, 1);

        ctx.set_polygon_mode(PolygonFace::FrontAndBack, PolygonMode::Point);
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().polygon_mode_state(), [gl::POINT, gl::POINT]);
        assert_eq!(ctx.driver().counts().polygon_mode, 2);
    }

    #[test]
    fn color_mask_and_line_width() {
        let mut ctx = context(RenderConfig::default().with_core_profile(true));
        ctx.set_color_write(true, false);
        ctx.set_line_width(3.0);
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().color_mask_state(), [true, true, true, false]);
        assert_eq!(ctx.driver().counts().line_width, 0);
        assert_eq!(ctx.pending_context_state().line_width, 1.0);
    }

    #[test]
    fn alpha_test_follows_fixed_function() {
        let mut ctx = context(RenderConfig::default().with_fixed_function(true));
        ctx.set_alpha_reject_settings(CompareFunc::Default, 0.5);
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().alpha_func_state(), (gl::GREATER, 0.01));

        let mut ctx = context(RenderConfig::default());
        let id = ctx.load_immediate_shader().unwrap();
        ctx.shader(id).unwrap().bind();
        ctx.set_alpha_reject_settings(CompareFunc::Greater, 0.5);
        draw_point(&mut ctx);
        assert_eq!(ctx.driver().counts().alpha_func, 0);
        let program = ctx.shader_state(id).unwrap().program();
        let location = ctx.shader_state(id).unwrap().uniform_location(crate::shaders::uniform::MINIMUM_ALPHA);
        assert_eq!(ctx.driver().uniform_value(program, location), Some(&[0.5][..]));
    }

    #[test]
    fn setters_flush_affected_geometry() {
        let mut ctx = context(RenderConfig::default());
        ctx.begin(Topology::Points);
        ctx.vertex2f(0.0, 0.0);
        ctx.set_line_width(2.0);
        assert_eq!(ctx.pending_vertex_count(), 1);
        ctx.set_point_size(2.0);
        assert_eq!(ctx.pending_vertex_count(), 0);
        assert_eq!(ctx.driver().counts().draw_calls, 1);
    }
}

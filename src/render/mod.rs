//! The immediate-mode façade: vertex batching, matrix stacks and the
//! deferred context state.
//!
//! Call sites submit geometry one vertex at a time between
//! [`begin`](RenderContext::begin) and [`end`](RenderContext::end). Vertices
//! accumulate in a fixed scratch buffer and reach the driver in one
//! `draw_arrays` call per [`flush`](RenderContext::flush). A flush first
//! issues any pending program switch, uploads the matrices the bound shader
//! has not seen yet and diffs the requested context state against what the
//! driver last received.
//!
//! ```
//! # use llrender_core::{driver::HeadlessDriver, RenderConfig, RenderContext, Topology};
//! let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
//! ctx.begin(Topology::Triangles);
//! ctx.vertex2f(0.0, 0.0);
//! ctx.vertex2f(1.0, 0.0);
//! ctx.vertex2f(0.0, 1.0);
//! ctx.end();
//! ctx.flush();
//! assert_eq!(ctx.driver().draws().len(), 1);
//! ```

mod batch;
mod clip;
mod context_state;
mod matrix;

use glam::{Mat3, Mat4};
use log::warn;

use crate::{
    driver::{gl, GlDriver},
    types::{Rect, Vertex},
    RenderContext,
};

pub use batch::GlyphQuad;
pub use clip::ClipScope;
pub use clip::ClipToken;
pub use context_state::{ColorMask, ContextSnapshot};
pub use matrix::{
    gen_look, gen_ndc_to_wc, gen_ortho, gen_persp, gen_rot, normal_matrix, project, unproject,
    MATRIX_STACK_DEPTH,
};

pub(crate) use batch::UiStack;
pub(crate) use clip::ClipStack;
pub(crate) use matrix::MatrixStack;

/// Number of matrix stacks: modelview, projection and four texture stacks.
pub const NUM_MATRIX_MODES: usize = 6;

/// Above this many pending vertices, submission flushes at the next safe
/// primitive boundary.
pub const SOFT_VERTEX_LIMIT: usize = 2048;

/// Vertices past this count are dropped.
pub const HARD_VERTEX_LIMIT: usize = 4094;

/// Room for the hard limit plus the trailing copy and a degenerate pair.
const SCRATCH_LEN: usize = HARD_VERTEX_LIMIT + 6;

/// Primitive topology of the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
    Points,
    Lines,
    LineStrip,
    LineLoop,
}

impl Topology {
    /// GL primitive mode.
    #[must_use]
    pub fn gl_mode(self) -> u32 {
        match self {
            Self::Triangles => gl::TRIANGLES,
            Self::TriangleStrip => gl::TRIANGLE_STRIP,
            Self::TriangleFan => gl::TRIANGLE_FAN,
            Self::Points => gl::POINTS,
            Self::Lines => gl::LINES,
            Self::LineStrip => gl::LINE_STRIP,
            Self::LineLoop => gl::LINE_LOOP,
        }
    }

    /// Topologies whose batches can be continued across `begin`/`end`
    /// pairs and cut at a primitive boundary.
    fn is_batchable(self) -> bool {
        matches!(
            self,
            Self::Lines | Self::Triangles | Self::Points | Self::TriangleStrip
        )
    }
}

/// Blend equation factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    One,
    Zero,
    DestColor,
    SourceColor,
    OneMinusDestColor,
    OneMinusSourceColor,
    DestAlpha,
    SourceAlpha,
    OneMinusDestAlpha,
    OneMinusSourceAlpha,
}

impl BlendFactor {
    #[must_use]
    pub fn gl_factor(self) -> u32 {
        match self {
            Self::One => gl::ONE,
            Self::Zero => gl::ZERO,
            Self::DestColor => gl::DST_COLOR,
            Self::SourceColor => gl::SRC_COLOR,
            Self::OneMinusDestColor => gl::ONE_MINUS_DST_COLOR,
            Self::OneMinusSourceColor => gl::ONE_MINUS_SRC_COLOR,
            Self::DestAlpha => gl::DST_ALPHA,
            Self::SourceAlpha => gl::SRC_ALPHA,
            Self::OneMinusDestAlpha => gl::ONE_MINUS_DST_ALPHA,
            Self::OneMinusSourceAlpha => gl::ONE_MINUS_SRC_ALPHA,
        }
    }
}

/// Named blend presets for [`RenderContext::set_scene_blend_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendType {
    /// Standard alpha blending.
    Alpha,
    /// Additive.
    Add,
    /// Additive, weighted by source alpha.
    AddWithAlpha,
    /// Multiply by the destination color.
    Mult,
    /// Multiply by the destination alpha.
    MultAlpha,
    /// Multiply by the destination color, doubled.
    MultX2,
    /// Overwrite.
    Replace,
}

impl BlendType {
    /// Source and destination factors of the preset.
    #[must_use]
    pub fn factors(self) -> (BlendFactor, BlendFactor) {
        match self {
            Self::Alpha => (BlendFactor::SourceAlpha, BlendFactor::OneMinusSourceAlpha),
            Self::Add => (BlendFactor::One, BlendFactor::One),
            Self::AddWithAlpha => (BlendFactor::SourceAlpha, BlendFactor::One),
            Self::Mult => (BlendFactor::DestColor, BlendFactor::Zero),
            Self::MultAlpha => (BlendFactor::DestAlpha, BlendFactor::Zero),
            Self::MultX2 => (BlendFactor::DestColor, BlendFactor::SourceColor),
            Self::Replace => (BlendFactor::One, BlendFactor::Zero),
        }
    }
}

/// Comparison function for the alpha test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Always,
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
    /// `Greater` against 0.01, ignoring the reference value.
    Default,
}

impl CompareFunc {
    /// GL function and reference value to send for `reference`.
    #[must_use]
    pub fn gl_func(self, reference: f32) -> (u32, f32) {
        match self {
            Self::Never => (gl::NEVER, reference),
            Self::Always => (gl::ALWAYS, reference),
            Self::Less => (gl::LESS, reference),
            Self::LessEqual => (gl::LEQUAL, reference),
            Self::Equal => (gl::EQUAL, reference),
            Self::NotEqual => (gl::NOTEQUAL, reference),
            Self::GreaterEqual => (gl::GEQUAL, reference),
            Self::Greater => (gl::GREATER, reference),
            Self::Default => (gl::GREATER, 0.01),
        }
    }
}

/// Matrix stack selected by [`RenderContext::matrix_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixMode {
    Modelview,
    Projection,
    Texture0,
    Texture1,
    Texture2,
    Texture3,
    /// The texture stack of the active texture unit.
    Texture,
}

impl MatrixMode {
    const STACKS: [Self; NUM_MATRIX_MODES] = [
        Self::Modelview,
        Self::Projection,
        Self::Texture0,
        Self::Texture1,
        Self::Texture2,
        Self::Texture3,
    ];

    fn index(self) -> Option<usize> {
        match self {
            Self::Modelview => Some(0),
            Self::Projection => Some(1),
            Self::Texture0 => Some(2),
            Self::Texture1 => Some(3),
            Self::Texture2 => Some(4),
            Self::Texture3 => Some(5),
            Self::Texture => None,
        }
    }
}

/// Polygon faces addressed by [`RenderContext::set_polygon_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonFace {
    Front,
    Back,
    FrontAndBack,
}

/// Polygon rasterization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    Point,
    Line,
    #[default]
    Fill,
}

impl PolygonMode {
    #[must_use]
    pub fn gl_mode(self) -> u32 {
        match self {
            Self::Point => gl::POINT,
            Self::Line => gl::LINE,
            Self::Fill => gl::FILL,
        }
    }
}

/// Counters accumulated by [`RenderContext::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    /// Draw calls issued.
    pub draw_calls: u64,
    /// Vertices submitted to the driver.
    pub vertices: u64,
    /// Draw calls issued while a UI transform frame was pushed.
    pub ui_draw_calls: u64,
    /// Vertices drawn while a UI transform frame was pushed.
    pub ui_vertices: u64,
}

/// Batching and matrix state of a context.
pub(crate) struct Renderer {
    /// Forces setters to re-record values that look unchanged, while the
    /// context state is being refreshed.
    pub(crate) dirty: bool,
    mode: Topology,
    /// Pending vertex count; `vertices[count]` holds the look-ahead copy.
    count: usize,
    /// A strip ended and the next vertex must start a new one.
    primitive_reset: bool,
    vertices: Box<[Vertex]>,
    matrix_mode: usize,
    stacks: [MatrixStack; NUM_MATRIX_MODES],
    ui: UiStack,
    clip: ClipStack,
    /// Last state sent to the driver.
    current: ContextSnapshot,
    /// State requested by setters.
    pending: ContextSnapshot,
    stats: RenderStats,
    mvp_cache: Option<(u32, u32, Mat4)>,
    normal_cache: Option<(u32, Mat3)>,
}

impl Renderer {
    pub(crate) fn new() -> Self {
        Self {
            dirty: false,
            mode: Topology::Triangles,
            count: 0,
            primitive_reset: false,
            vertices: vec![Vertex::default(); SCRATCH_LEN].into_boxed_slice(),
            matrix_mode: 0,
            stacks: Default::default(),
            ui: UiStack::default(),
            clip: ClipStack::default(),
            current: ContextSnapshot::default(),
            pending: ContextSnapshot::default(),
            stats: RenderStats::default(),
            mvp_cache: None,
            normal_cache: None,
        }
    }

    /// Forget what the driver and the shaders were last sent.
    pub(crate) fn reset_sync_hashes(&mut self) {
        for stack in &mut self.stacks {
            stack.hash = 0;
        }
        self.mvp_cache = None;
        self.normal_cache = None;
    }

    /// The driver lost everything; the next sync re-sends every field.
    pub(crate) fn reset_context(&mut self) {
        self.current = ContextSnapshot::default();
    }

    /// Record `blend` as both sent and requested.
    pub(crate) fn assume_blend(&mut self, src: BlendFactor, dst: BlendFactor) {
        for snapshot in [&mut self.current, &mut self.pending] {
            snapshot.blend_color_sfactor = src;
            snapshot.blend_color_dfactor = dst;
            snapshot.blend_alpha_sfactor = src;
            snapshot.blend_alpha_dfactor = dst;
        }
    }
}

impl<D: GlDriver> RenderContext<D> {
    /// Start a primitive of `mode`.
    ///
    /// Switching topology flushes a batchable pending batch. Beginning the
    /// same topology again keeps accumulating into the in-flight batch.
    pub fn begin(&mut self, mode: Topology) {
        if mode == self.render.mode {
            return;
        }
        if self.render.mode.is_batchable() {
            self.flush();
        } else if self.render.count != 0 {
            self.usage_error("begin() called redundantly");
        }
        self.render.mode = mode;
    }

    /// Finish the current primitive.
    ///
    /// Batchable topologies stay pending until a flush is forced or the
    /// batch grows past the soft limit; strips are restarted on the next
    /// vertex with a degenerate pair.
    pub fn end(&mut self) {
        if self.render.count == 0 {
            return;
        }
        if !self.render.mode.is_batchable() || self.render.count > SOFT_VERTEX_LIMIT {
            self.flush();
        } else if self.render.mode == Topology::TriangleStrip {
            self.render.primitive_reset = true;
        }
    }

    /// Draw every pending vertex in one call.
    pub fn flush(&mut self) {
        let count = self.render.count;
        if count == 0 {
            return;
        }
        if !self.render.ui.is_empty() {
            self.render.stats.ui_draw_calls += 1;
            self.render.stats.ui_vertices += count as u64;
        }
        if self.config.debug_gl {
            match self.render.mode {
                Topology::Triangles if count % 3 != 0 => {
                    self.usage_error("Incomplete triangle rendered");
                }
                Topology::Lines if count % 2 != 0 => self.usage_error("Incomplete line rendered"),
                _ => {}
            }
        }

        self.render.count = 0;
        if !self.gl_disabled {
            self.sync_matrices();
            self.driver.upload_vertices(&self.render.vertices[..count]);
            self.driver.draw_arrays(
                self.render.mode.gl_mode(),
                0,
                i32::try_from(count).unwrap_or(i32::MAX),
            );
        }
        self.render.stats.draw_calls += 1;
        self.render.stats.vertices += count as u64;

        self.render.vertices[0] = self.render.vertices[count];
        self.render.primitive_reset = false;
    }

    /// Topology of the current batch.
    #[must_use]
    pub fn mode(&self) -> Topology {
        self.render.mode
    }

    /// Vertices waiting for the next flush.
    #[must_use]
    pub fn pending_vertex_count(&self) -> usize {
        self.render.count
    }

    #[must_use]
    pub fn render_stats(&self) -> RenderStats {
        self.render.stats
    }

    pub fn reset_render_stats(&mut self) {
        self.render.stats = RenderStats::default();
    }

    /// Make every matrix upload and cached product stale, so the next sync
    /// re-sends them.
    pub fn reset_sync_hashes(&mut self) {
        self.render.reset_sync_hashes();
        self.shaders.invalidate_matrices();
    }

    /// Push the cached texture unit state back to the driver, e.g. after
    /// foreign code touched the context.
    pub fn refresh_state(&mut self) {
        self.render.dirty = true;
        let active = self.current_unit;
        for index in 0..self.units.len() {
            self.tex_unit(index).refresh_state();
        }
        self.tex_unit(active).activate();
        self.render.dirty = false;
    }

    /// Debug-build assertion, warning otherwise.
    pub(crate) fn usage_error(&mut self, msg: &str) {
        if self.config.debug_gl {
            self.gl_fatal(msg);
        } else {
            warn!(target: "Render", "{msg}");
        }
    }

    /// Viewport currently requested.
    #[must_use]
    pub fn viewport(&self) -> Rect {
        self.render.pending.viewport
    }

    /// Scissor box currently requested.
    #[must_use]
    pub fn scissor(&self) -> Rect {
        self.render.pending.scissor
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, RenderConfig};

    fn context() -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
        let shader = ctx.load_immediate_shader().unwrap();
        ctx.shader(shader).unwrap().bind();
        ctx.driver_mut().reset_counts();
        ctx
    }

    fn triangle(ctx: &mut RenderContext<HeadlessDriver>, x: f32) {
        ctx.vertex2f(x, 0.0);
        ctx.vertex2f(x + 1.0, 0.0);
        ctx.vertex2f(x, 1.0);
    }

    #[test]
    fn straddled_batches_draw_together() {
        let mut ctx = context();
        ctx.begin(Topology::Triangles);
        triangle(&mut ctx, 0.0);
        ctx.end();
        ctx.begin(Topology::Triangles);
        triangle(&mut ctx, 5.0);
        ctx.end();
        assert_eq!(ctx.driver().counts().draw_calls, 0);
        ctx.flush();

        let draws = ctx.driver_mut().take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].mode, gl::TRIANGLES);
        assert_eq!(draws[0].vertices.len(), 6);
        assert_eq!(draws[0].vertices[3].position, [5.0, 0.0, 0.0]);
        assert_eq!(ctx.render_stats().vertices, 6);
    }

    #[test]
    fn flush_without_vertices_is_free() {
        let mut ctx = context();
        ctx.flush();
        ctx.begin(Topology::Lines);
        ctx.end();
        assert_eq!(ctx.driver().counts().draw_calls, 0);
        assert_eq!(ctx.driver().counts().use_program, 0);
    }

    #[test]
    fn topology_change_flushes() {
        let mut ctx = context();
        ctx.begin(Topology::Triangles);
        triangle(&mut ctx, 0.0);
        ctx.end();
        ctx.begin(Topology::Lines);
        assert_eq!(ctx.driver().counts().draw_calls, 1);
        ctx.vertex2f(0.0, 0.0);
        ctx.vertex2f(1.0, 1.0);
        ctx.end();
        ctx.flush();
        let draws = ctx.driver().draws();
        assert_eq!(draws[1].mode, gl::LINES);
        assert_eq!(draws[1].vertices.len(), 2);
    }

    #[test]
    fn unbatchable_topologies_flush_on_end() {
        let mut ctx = context();
        ctx.begin(Topology::LineLoop);
        ctx.vertex2f(0.0, 0.0);
        ctx.vertex2f(1.0, 0.0);
        ctx.vertex2f(1.0, 1.0);
        ctx.end();
        assert_eq!(ctx.driver().counts().draw_calls, 1);
        assert_eq!(ctx.pending_vertex_count(), 0);
    }

    #[test]
    fn first_flush_syncs_program_and_matrices() {
        let mut ctx = context();
        ctx.begin(Topology::Triangles);
        triangle(&mut ctx, 0.0);
        ctx.flush();
        assert_eq!(ctx.driver().counts().use_program, 1);
        let program = ctx.driver().current_program();
        assert_eq!(ctx.driver().draws()[0].program, program);
        // identity MVP and texture matrix
        assert_eq!(
            ctx.driver().uniform_value(program, 0),
            Some(&Mat4::IDENTITY.to_cols_array()[..])
        );

        ctx.driver_mut().reset_counts();
        triangle(&mut ctx, 1.0);
        ctx.flush();
        assert_eq!(ctx.driver().counts().uniform_uploads, 0);
        assert_eq!(ctx.driver().counts().use_program, 0);
    }

    #[test]
    #[should_panic(expected = "Incomplete triangle")]
    fn partial_triangles_are_fatal_when_debugging() {
        let mut ctx = RenderContext::new(
            HeadlessDriver::new(),
            RenderConfig::default().with_debug_gl(true),
        );
        ctx.begin(Topology::Triangles);
        ctx.vertex2f(0.0, 0.0);
        ctx.vertex2f(1.0, 0.0);
        ctx.flush();
    }

    #[test]
    fn gl_disabled_drops_draws() {
        let mut ctx = context();
        ctx.destroy_gl();
        ctx.begin(Topology::Triangles);
        triangle(&mut ctx, 0.0);
        ctx.flush();
        assert!(ctx.driver().draws().is_empty());
        assert_eq!(ctx.pending_vertex_count(), 0);
    }

    #[test]
    fn blend_presets() {
        assert_eq!(
            BlendType::Alpha.factors(),
            (BlendFactor::SourceAlpha, BlendFactor::OneMinusSourceAlpha)
        );
        assert_eq!(BlendType::MultX2.factors(), (BlendFactor::DestColor, BlendFactor::SourceColor));
        assert_eq!(CompareFunc::Default.gl_func(0.5), (gl::GREATER, 0.01));
        assert_eq!(CompareFunc::LessEqual.gl_func(0.5), (gl::LEQUAL, 0.5));
    }
}

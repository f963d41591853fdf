//! Vertex submission into the scratch buffer and the UI transform overlay.

use glam::{Quat, Vec2, Vec3};

use super::{Topology, HARD_VERTEX_LIMIT, SOFT_VERTEX_LIMIT};
use crate::{driver::GlDriver, shaders::uniform, shaders::AttributeMask, RenderContext};

/// Glyphs per pre-transformed batch in [`RenderContext::draw_glyph_quads`].
const GLYPH_BATCH_SIZE: usize = 30;

/// Offset, scale and rotation frames applied to immediate vertices.
///
/// Offset and scale are pushed together; the rotation stack only exists
/// once something was rotated.
#[derive(Debug, Clone, Default)]
pub(crate) struct UiStack {
    offsets: Vec<Vec3>,
    scales: Vec<Vec3>,
    rotations: Vec<Quat>,
}

impl UiStack {
    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn transform(&self, v: Vec3) -> Vec3 {
        let rotated = match self.rotations.last() {
            Some(rotation) if *rotation != Quat::IDENTITY => *rotation * v,
            _ => v,
        };
        match (self.offsets.last(), self.scales.last()) {
            (Some(offset), Some(scale)) => (rotated + *offset) * *scale,
            _ => rotated,
        }
    }
}

/// A pre-positioned glyph from the font layer, in UI coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    /// Screen rectangle as `[left, top, right, bottom]`.
    pub screen: [f32; 4],
    /// Texture rectangle as `[left, top, right, bottom]`.
    pub uv: [f32; 4],
    pub color: [u8; 4],
}

impl GlyphQuad {
    /// Two triangles covering the quad, counter-clockwise.
    fn triangles(&self, offset: Vec3, scale: Vec3) -> ([Vec3; 6], [Vec2; 6]) {
        let [left, top, right, bottom] = self.screen;
        let [u0, v0, u1, v1] = self.uv;
        let corner = |x: f32, y: f32| (Vec3::new(x, y, 0.0) + offset) * scale;
        let (tl, tr, bl, br) = (
            corner(left, top),
            corner(right, top),
            corner(left, bottom),
            corner(right, bottom),
        );
        let (uv_tl, uv_tr, uv_bl, uv_br) = (
            Vec2::new(u0, v0),
            Vec2::new(u1, v0),
            Vec2::new(u0, v1),
            Vec2::new(u1, v1),
        );
        (
            [tr, tl, bl, tr, bl, br],
            [uv_tr, uv_tl, uv_bl, uv_tr, uv_bl, uv_br],
        )
    }
}

impl<D: GlDriver> RenderContext<D> {
    /// Add a vertex to the current primitive, through the UI overlay.
    pub fn vertex3f(&mut self, x: f32, y: f32, z: f32) {
        if self.render.count > SOFT_VERTEX_LIMIT {
            self.flush_at_boundary();
        }
        let count = self.render.count;
        if count > HARD_VERTEX_LIMIT {
            return;
        }
        if self.render.primitive_reset && count > 0 {
            self.insert_degenerate();
        }

        let count = self.render.count;
        let position = self.render.ui.transform(Vec3::new(x, y, z));
        let vertices = &mut self.render.vertices;
        vertices[count].position = position.to_array();
        vertices[count + 1] = vertices[count];
        self.render.count += 1;

        if self.render.primitive_reset {
            let count = self.render.count;
            vertices[count + 1] = vertices[count];
            self.render.count += 1;
        }
        self.render.primitive_reset = false;
    }

    pub fn vertex2f(&mut self, x: f32, y: f32) {
        self.vertex3f(x, y, 0.0);
    }

    #[expect(clippy::cast_precision_loss)]
    pub fn vertex2i(&mut self, x: i32, y: i32) {
        self.vertex3f(x as f32, y as f32, 0.0);
    }

    pub fn vertex3fv(&mut self, v: [f32; 3]) {
        self.vertex3f(v[0], v[1], v[2]);
    }

    /// Past the soft limit, draw what is pending if the topology can be cut
    /// here. Strips carry their last two vertices into the next batch.
    fn flush_at_boundary(&mut self) {
        let count = self.render.count;
        match self.render.mode {
            Topology::Points => self.flush(),
            Topology::Triangles if count % 3 == 0 => self.flush(),
            Topology::Lines if count % 2 == 0 => self.flush(),
            Topology::TriangleStrip => {
                let carry = [
                    self.render.vertices[count - 2],
                    self.render.vertices[count - 1],
                    self.render.vertices[count],
                ];
                self.flush();
                self.render.vertices[..3].copy_from_slice(&carry);
                self.render.count = 2;
            }
            _ => {}
        }
    }

    /// Repeat the last vertex so the next one opens a new strip.
    fn insert_degenerate(&mut self) {
        self.render.count += 1;
        let count = self.render.count;
        let vertices = &mut self.render.vertices;
        vertices[count] = vertices[count - 1];
        vertices[count - 1] = vertices[count - 2];
    }

    /// Same as [`insert_degenerate`](Self::insert_degenerate) for the batch
    /// entry points: the repeated pair is the last old vertex and `first`.
    fn insert_batch_degenerate(&mut self, first: Vec3) {
        self.render.count += 1;
        let count = self.render.count;
        let vertices = &mut self.render.vertices;
        vertices[count] = vertices[count - 1];
        vertices[count].position = first.to_array();
        vertices[count - 1] = vertices[count - 2];
        self.render.count += 1;
        let count = self.render.count;
        vertices[count] = vertices[count - 1];
    }

    /// Whether a batch of `n` fits; otherwise it is dropped whole.
    fn batch_fits(&self, n: usize) -> bool {
        self.render.count + n <= HARD_VERTEX_LIMIT
    }

    /// Append positions that are already in their final space, skipping the
    /// UI overlay. Color and texcoord carry over from the previous vertex.
    pub fn vertex_batch_pre_transformed(&mut self, positions: &[Vec3]) {
        let Some(&first) = positions.first() else {
            return;
        };
        if !self.batch_fits(positions.len()) {
            return;
        }
        if self.render.primitive_reset && self.render.count > 0 {
            self.insert_batch_degenerate(first);
        }
        for position in positions {
            let count = self.render.count;
            let vertices = &mut self.render.vertices;
            vertices[count].position = position.to_array();
            vertices[count + 1] = vertices[count];
            self.render.count += 1;
        }
        self.render.primitive_reset = false;
    }

    /// Like [`vertex_batch_pre_transformed`](Self::vertex_batch_pre_transformed)
    /// with per-vertex texcoords. Extra texcoords are ignored; too few drop
    /// the batch.
    pub fn vertex_batch_pre_transformed_uv(&mut self, positions: &[Vec3], uvs: &[Vec2]) {
        let Some(&first) = positions.first() else {
            return;
        };
        if uvs.len() < positions.len() || !self.batch_fits(positions.len()) {
            return;
        }
        if self.render.primitive_reset && self.render.count > 0 {
            self.insert_batch_degenerate(first);
            let count = self.render.count;
            self.render.vertices[count - 1].texcoord = uvs[0].to_array();
        }
        for (position, uv) in positions.iter().zip(uvs) {
            let count = self.render.count;
            let vertices = &mut self.render.vertices;
            vertices[count].position = position.to_array();
            vertices[count].texcoord = uv.to_array();
            vertices[count + 1] = vertices[count];
            self.render.count += 1;
        }
        self.render.primitive_reset = false;
    }

    /// Like [`vertex_batch_pre_transformed_uv`](Self::vertex_batch_pre_transformed_uv)
    /// with per-vertex colors.
    pub fn vertex_batch_pre_transformed_uv_color(
        &mut self,
        positions: &[Vec3],
        uvs: &[Vec2],
        colors: &[[u8; 4]],
    ) {
        let Some(&first) = positions.first() else {
            return;
        };
        let n = positions.len();
        if uvs.len() < n || colors.len() < n || !self.batch_fits(n) {
            return;
        }
        if self.render.primitive_reset && self.render.count > 0 {
            self.insert_batch_degenerate(first);
            let count = self.render.count;
            self.render.vertices[count - 1].texcoord = uvs[0].to_array();
        }
        for ((position, uv), color) in positions.iter().zip(uvs).zip(colors) {
            let count = self.render.count;
            let vertices = &mut self.render.vertices;
            vertices[count].position = position.to_array();
            vertices[count].texcoord = uv.to_array();
            vertices[count].color = *color;
            vertices[count + 1] = vertices[count];
            self.render.count += 1;
        }
        self.render.primitive_reset = false;
    }

    /// Draw pre-positioned glyph quads as textured triangles.
    ///
    /// Glyph rectangles are in UI coordinates: the current UI offset and
    /// scale apply, rotation does not.
    pub fn draw_glyph_quads(&mut self, glyphs: &[GlyphQuad]) {
        if glyphs.is_empty() {
            return;
        }
        let offset = self.ui_translation();
        let scale = self.ui_scale();
        self.begin(Topology::Triangles);
        for chunk in glyphs.chunks(GLYPH_BATCH_SIZE) {
            if !self.batch_fits(chunk.len() * 6) || self.render.count > SOFT_VERTEX_LIMIT {
                self.flush();
            }
            let mut positions = Vec::with_capacity(chunk.len() * 6);
            let mut uvs = Vec::with_capacity(chunk.len() * 6);
            let mut colors = Vec::with_capacity(chunk.len() * 6);
            for glyph in chunk {
                let (p, t) = glyph.triangles(offset, scale);
                positions.extend_from_slice(&p);
                uvs.extend_from_slice(&t);
                colors.extend_from_slice(&[glyph.color; 6]);
            }
            self.vertex_batch_pre_transformed_uv_color(&positions, &uvs, &colors);
        }
        self.end();
    }

    /// Texcoord of the next vertex.
    pub fn tex_coord2f(&mut self, u: f32, v: f32) {
        let count = self.render.count;
        self.render.vertices[count].texcoord = [u, v];
    }

    #[expect(clippy::cast_precision_loss)]
    pub fn tex_coord2i(&mut self, u: i32, v: i32) {
        self.tex_coord2f(u as f32, v as f32);
    }

    /// Color of the next vertex. Programs without a color attribute get it
    /// as their diffuse color uniform instead.
    pub fn color4ub(&mut self, r: u8, g: u8, b: u8, a: u8) {
        let per_vertex = self
            .shaders
            .bound_program()
            .is_none_or(|shader| shader.attribute_mask().contains(AttributeMask::COLOR));
        if per_vertex {
            let count = self.render.count;
            self.render.vertices[count].color = [r, g, b, a];
        } else {
            self.diffuse_color4ub(r, g, b, a);
        }
    }

    pub fn color4ubv(&mut self, c: [u8; 4]) {
        self.color4ub(c[0], c[1], c[2], c[3]);
    }

    /// Color of the next vertex from components clamped to `0..=1`.
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn color4f(&mut self, r: f32, g: f32, b: f32, a: f32) {
        let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0) as u8;
        self.color4ub(to_byte(r), to_byte(g), to_byte(b), to_byte(a));
    }

    pub fn color4fv(&mut self, c: [f32; 4]) {
        self.color4f(c[0], c[1], c[2], c[3]);
    }

    pub fn color3f(&mut self, r: f32, g: f32, b: f32) {
        self.color4f(r, g, b, 1.0);
    }

    pub fn color3fv(&mut self, c: [f32; 3]) {
        self.color4f(c[0], c[1], c[2], 1.0);
    }

    /// Set the diffuse color of the bound program, or the context color
    /// without one.
    pub fn diffuse_color4f(&mut self, r: f32, g: f32, b: f32, a: f32) {
        if let Some(id) = self.shaders.bound {
            self.shader_handle(id).uniform4f(uniform::DIFFUSE_COLOR, r, g, b, a);
        } else if self.render.pending.color != [r, g, b, a] || self.render.dirty {
            self.flush();
            self.render.pending.color = [r, g, b, a];
        }
    }

    pub fn diffuse_color4fv(&mut self, c: [f32; 4]) {
        self.diffuse_color4f(c[0], c[1], c[2], c[3]);
    }

    pub fn diffuse_color3f(&mut self, r: f32, g: f32, b: f32) {
        self.diffuse_color4f(r, g, b, 1.0);
    }

    pub fn diffuse_color4ub(&mut self, r: u8, g: u8, b: u8, a: u8) {
        let to_float = |c: u8| f32::from(c) / 255.0;
        self.diffuse_color4f(to_float(r), to_float(g), to_float(b), to_float(a));
    }

    /// Add `(x, y, z)` to the top UI offset.
    pub fn translate_ui(&mut self, x: f32, y: f32, z: f32) {
        let Some(offset) = self.render.ui.offsets.last_mut() else {
            self.usage_error("Need to push a UI translation frame before offsetting");
            return;
        };
        *offset += Vec3::new(x, y, z);
    }

    /// Multiply the top UI scale by `(x, y, z)`.
    pub fn scale_ui(&mut self, x: f32, y: f32, z: f32) {
        let Some(scale) = self.render.ui.scales.last_mut() else {
            self.usage_error("Need to push a UI transformation frame before scaling");
            return;
        };
        *scale *= Vec3::new(x, y, z);
    }

    /// Compose `rotation` onto the UI rotation, as a new frame.
    pub fn rotate_ui(&mut self, rotation: Quat) {
        let rotations = &mut self.render.ui.rotations;
        let next = rotations.last().map_or(rotation, |top| *top * rotation);
        rotations.push(next);
    }

    /// Duplicate the top UI frame, or start one at the identity.
    pub fn push_ui_matrix(&mut self) {
        let ui = &mut self.render.ui;
        ui.offsets.push(ui.offsets.last().copied().unwrap_or(Vec3::ZERO));
        ui.scales.push(ui.scales.last().copied().unwrap_or(Vec3::ONE));
        if let Some(&rotation) = ui.rotations.last() {
            ui.rotations.push(rotation);
        }
    }

    pub fn pop_ui_matrix(&mut self) {
        let ui = &mut self.render.ui;
        if ui.offsets.is_empty() || ui.scales.is_empty() {
            self.usage_error("UI offset or scale stack blown");
            return;
        }
        ui.offsets.pop();
        ui.scales.pop();
        ui.rotations.pop();
    }

    /// Reset the top UI frame to the identity.
    pub fn load_ui_identity(&mut self) {
        let ui = &mut self.render.ui;
        let (Some(offset), Some(scale)) = (ui.offsets.last_mut(), ui.scales.last_mut()) else {
            self.usage_error("Need to push a UI translation frame before clearing offset");
            return;
        };
        *offset = Vec3::ZERO;
        *scale = Vec3::ONE;
        if let Some(rotation) = ui.rotations.last_mut() {
            *rotation = Quat::IDENTITY;
        }
    }

    #[must_use]
    pub fn ui_translation(&self) -> Vec3 {
        self.render.ui.offsets.last().copied().unwrap_or(Vec3::ZERO)
    }

    #[must_use]
    pub fn ui_scale(&self) -> Vec3 {
        self.render.ui.scales.last().copied().unwrap_or(Vec3::ONE)
    }

    /// Number of pushed UI frames.
    #[must_use]
    pub fn ui_depth(&self) -> usize {
        self.render.ui.offsets.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, RenderConfig};

    fn context() -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        RenderContext::new(HeadlessDriver::new(), RenderConfig::default().with_debug_gl(false))
    }

    fn positions(ctx: &mut RenderContext<HeadlessDriver>) -> Vec<[f32; 3]> {
        ctx.flush();
        let draws = ctx.driver_mut().take_draws();
        draws
            .iter()
            .flat_map(|d| d.vertices.iter().map(|v| v.position))
            .collect()
    }

    #[test]
    fn trailing_attributes_land_on_the_next_vertex() {
        let mut ctx = context();
        ctx.begin(Topology::Lines);
        ctx.color4ub(255, 0, 0, 255);
        ctx.tex_coord2f(0.5, 0.5);
        ctx.vertex2f(0.0, 0.0);
        ctx.vertex2f(1.0, 0.0);
        ctx.color4ub(0, 255, 0, 255);
        ctx.vertex2f(2.0, 0.0);
        ctx.vertex2f(3.0, 0.0);
        ctx.end();
        ctx.flush();
        let draw = &ctx.driver().draws()[0];
        assert_eq!(draw.vertices[1].color, [255, 0, 0, 255]);
        assert_eq!(draw.vertices[1].texcoord, [0.5, 0.5]);
        assert_eq!(draw.vertices[2].color, [0, 255, 0, 255]);
    }

    #[test]
    fn strips_restart_with_degenerates() {
        let mut ctx = context();
        ctx.begin(Topology::TriangleStrip);
        for x in 0..4 {
            ctx.vertex2f(x as f32, 0.0);
        }
        ctx.end();
        ctx.begin(Topology::TriangleStrip);
        ctx.vertex2f(10.0, 0.0);
        ctx.vertex2f(11.0, 0.0);
        ctx.end();
        let xs: Vec<f32> = positions(&mut ctx).iter().map(|p| p[0]).collect();
        assert_eq!(xs, [0.0, 1.0, 2.0, 3.0, 3.0, 10.0, 10.0, 11.0]);
    }

    #[test]
    fn long_strips_carry_their_tail() {
        let mut ctx = context();
        ctx.begin(Topology::TriangleStrip);
        for i in 0..SOFT_VERTEX_LIMIT + 2 {
            ctx.vertex2f(i as f32, 0.0);
        }
        assert_eq!(ctx.driver().counts().draw_calls, 1);
        assert_eq!(ctx.pending_vertex_count(), 3);
        ctx.flush();
        let draws = ctx.driver().draws();
        let first = draws[0].vertices.len();
        assert_eq!(first, SOFT_VERTEX_LIMIT + 1);
        let second: Vec<f32> = draws[1].vertices.iter().map(|v| v.position[0]).collect();
        let tail = (SOFT_VERTEX_LIMIT - 1) as f32;
        assert_eq!(second, [tail, tail + 1.0, tail + 2.0]);
    }

    #[test]
    fn triangles_split_on_a_boundary() {
        let mut ctx = context();
        ctx.begin(Topology::Triangles);
        for i in 0..2100 {
            ctx.vertex2f(i as f32, 0.0);
        }
        ctx.flush();
        let sizes: Vec<usize> = ctx.driver().draws().iter().map(|d| d.vertices.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 2100);
        assert!(sizes.iter().all(|s| s % 3 == 0));
    }

    #[test]
    fn line_strips_drop_past_the_hard_limit() {
        let mut ctx = context();
        ctx.begin(Topology::LineStrip);
        for i in 0..HARD_VERTEX_LIMIT + 10 {
            ctx.vertex2f(i as f32, 0.0);
        }
        assert_eq!(ctx.pending_vertex_count(), HARD_VERTEX_LIMIT + 1);
        ctx.end();
        assert_eq!(ctx.driver().draws()[0].vertices.len(), HARD_VERTEX_LIMIT + 1);
    }

    #[test]
    fn ui_frames_offset_then_scale() {
        let mut ctx = context();
        ctx.push_ui_matrix();
        ctx.translate_ui(10.0, 20.0, 0.0);
        ctx.scale_ui(2.0, 2.0, 1.0);
        ctx.push_ui_matrix();
        ctx.translate_ui(1.0, 1.0, 0.0);
        assert_eq!(ctx.ui_translation(), Vec3::new(11.0, 21.0, 0.0));
        ctx.begin(Topology::Points);
        ctx.vertex2f(1.0, 1.0);
        ctx.end();
        ctx.pop_ui_matrix();
        assert_eq!(ctx.ui_translation(), Vec3::new(10.0, 20.0, 0.0));
        ctx.pop_ui_matrix();
        assert_eq!(ctx.ui_scale(), Vec3::ONE);
        assert_eq!(ctx.ui_depth(), 0);
        assert_eq!(positions(&mut ctx), [[24.0, 44.0, 0.0]]);
        assert_eq!(ctx.render_stats().ui_draw_calls, 0);
    }

    #[test]
    fn ui_rotation_applies_before_offset() {
        let mut ctx = context();
        ctx.push_ui_matrix();
        ctx.translate_ui(5.0, 0.0, 0.0);
        ctx.rotate_ui(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        ctx.begin(Topology::Points);
        ctx.vertex2f(1.0, 0.0);
        ctx.flush();
        assert_eq!(ctx.render_stats().ui_draw_calls, 1);
        let p = ctx.driver().draws()[0].vertices[0].position;
        assert!((p[0] - 5.0).abs() < 1e-6 && (p[1] - 1.0).abs() < 1e-6);
        ctx.load_ui_identity();
        assert_eq!(ctx.ui_translation(), Vec3::ZERO);
    }

    #[test]
    fn ui_misuse_is_survivable() {
        let mut ctx = context();
        ctx.translate_ui(1.0, 0.0, 0.0);
        ctx.scale_ui(2.0, 2.0, 2.0);
        ctx.pop_ui_matrix();
        ctx.load_ui_identity();
        assert_eq!(ctx.ui_translation(), Vec3::ZERO);
        assert_eq!(ctx.ui_scale(), Vec3::ONE);
    }

    #[test]
    #[should_panic(expected = "push a UI translation frame")]
    fn ui_misuse_is_fatal_when_debugging() {
        let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default().with_debug_gl(true));
        ctx.translate_ui(1.0, 0.0, 0.0);
    }

    #[test]
    fn batches_skip_the_overlay() {
        let mut ctx = context();
        ctx.push_ui_matrix();
        ctx.translate_ui(100.0, 0.0, 0.0);
        ctx.begin(Topology::Triangles);
        ctx.color4ub(1, 2, 3, 4);
        ctx.vertex_batch_pre_transformed(&[Vec3::ZERO, Vec3::X, Vec3::Y]);
        ctx.vertex_batch_pre_transformed_uv_color(
            &[Vec3::ZERO, Vec3::X, Vec3::Y],
            &[Vec2::ZERO, Vec2::X, Vec2::Y],
            &[[9; 4]; 3],
        );
        ctx.flush();
        let vertices = &ctx.driver().draws()[0].vertices;
        assert_eq!(vertices.len(), 6);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[2].color, [1, 2, 3, 4]);
        assert_eq!(vertices[4].texcoord, [1.0, 0.0]);
        assert_eq!(vertices[5].color, [9; 4]);
    }

    #[test]
    fn oversized_batches_are_dropped() {
        let mut ctx = context();
        ctx.begin(Topology::Points);
        let big = vec![Vec3::ZERO; HARD_VERTEX_LIMIT + 1];
        ctx.vertex_batch_pre_transformed(&big);
        assert_eq!(ctx.pending_vertex_count(), 0);
        ctx.vertex_batch_pre_transformed_uv(&[Vec3::ZERO, Vec3::ONE], &[Vec2::ZERO]);
        assert_eq!(ctx.pending_vertex_count(), 0);
    }

    #[test]
    fn colors_go_to_the_uniform_without_an_attribute() {
        let mut ctx = context();
        let vs = "uniform mat4 modelview_projection_matrix;\nin vec3 position;\nvoid main() {}";
        let fs = "uniform vec4 color;\nvoid main() {}";
        let id = ctx.load_shader("flat", vs, fs, &[], &[]).unwrap();
        ctx.shader(id).unwrap().bind();
        ctx.color4f(1.0, 0.5, 2.0, -1.0);
        let state = ctx.shader_state(id).unwrap();
        let (program, location) = (state.program(), state.uniform_location(uniform::DIFFUSE_COLOR));
        let expected = [1.0, 127.0 / 255.0, 1.0, 0.0];
        assert_eq!(ctx.driver().uniform_value(program, location), Some(&expected[..]));

        ctx.unbind_shader();
        ctx.diffuse_color3f(0.25, 0.25, 0.25);
        assert_eq!(ctx.pending_context_state().color, [0.25, 0.25, 0.25, 1.0]);
    }

    #[test]
    fn glyphs_become_textured_triangles() {
        let mut ctx = context();
        ctx.push_ui_matrix();
        ctx.translate_ui(10.0, 0.0, 0.0);
        let glyph = GlyphQuad {
            screen: [0.0, 8.0, 4.0, 0.0],
            uv: [0.0, 0.0, 0.5, 1.0],
            color: [255; 4],
        };
        ctx.draw_glyph_quads(&[glyph; 40]);
        ctx.flush();
        let draws = ctx.driver().draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].vertices.len(), 240);
        assert_eq!(draws[0].vertices[0].position, [14.0, 8.0, 0.0]);
        assert_eq!(draws[0].vertices[5].texcoord, [0.5, 1.0]);
    }
}

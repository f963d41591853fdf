//! Matrix stacks and the helpers that build and apply transforms.

use glam::{Mat3, Mat4, Vec3, Vec4};
use log::warn;

use super::{MatrixMode, NUM_MATRIX_MODES};
use crate::{
    driver::GlDriver,
    shaders::uniform,
    types::Rect,
    RenderContext,
};

/// Entries per matrix stack.
pub const MATRIX_STACK_DEPTH: usize = 32;

/// Inputs closer than this to a no-op transform are skipped.
const APPROXIMATELY_ZERO: f32 = 0.000_01;

const MATRIX_UNIFORMS: [usize; NUM_MATRIX_MODES] = [
    uniform::MODELVIEW_MATRIX,
    uniform::PROJECTION_MATRIX,
    uniform::TEXTURE_MATRIX0,
    uniform::TEXTURE_MATRIX1,
    uniform::TEXTURE_MATRIX2,
    uniform::TEXTURE_MATRIX3,
];

/// One fixed-depth stack plus the counter bumped on every change.
#[derive(Debug, Clone)]
pub(crate) struct MatrixStack {
    entries: [Mat4; MATRIX_STACK_DEPTH],
    top: usize,
    pub(super) hash: u32,
    overflow_warned: bool,
    underflow_warned: bool,
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self {
            entries: [Mat4::IDENTITY; MATRIX_STACK_DEPTH],
            top: 0,
            hash: 0,
            overflow_warned: false,
            underflow_warned: false,
        }
    }
}

/// Log `msg` the first time `warned` is clear. Returns whether it logged.
fn warn_once(warned: &mut bool, msg: &str) -> bool {
    if *warned {
        return false;
    }
    *warned = true;
    warn!(target: "Render", "{msg}");
    true
}

impl MatrixStack {
    fn top(&self) -> &Mat4 {
        &self.entries[self.top]
    }

    fn top_mut(&mut self) -> &mut Mat4 {
        &mut self.entries[self.top]
    }
}

/// Rotation of `degrees` around `axis`, the way `glRotatef` builds it.
#[must_use]
pub fn gen_rot(degrees: f32, axis: Vec3) -> Mat4 {
    let axis = axis.normalize_or_zero();
    if axis == Vec3::ZERO {
        return Mat4::IDENTITY;
    }
    Mat4::from_axis_angle(axis, degrees.to_radians())
}

/// Orthographic projection, as `glOrtho`.
#[must_use]
pub fn gen_ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    Mat4::orthographic_rh_gl(left, right, bottom, top, near, far)
}

/// Perspective projection with a vertical field of view in degrees, as
/// `gluPerspective`.
#[must_use]
pub fn gen_persp(fovy: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh_gl(fovy.to_radians(), aspect, near, far)
}

/// View matrix for an eye at `pos` looking along `dir`.
#[must_use]
pub fn gen_look(pos: Vec3, dir: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_to_rh(pos, dir.normalize_or_zero(), up)
}

/// Maps normalized device coordinates (`-1..1`) to texture space (`0..1`).
#[must_use]
pub fn gen_ndc_to_wc() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.5, 0.5, 0.5, 1.0),
    )
}

/// Upper 3×3 of the inverse transpose of `modelview`.
#[must_use]
pub fn normal_matrix(modelview: &Mat4) -> Mat3 {
    Mat3::from_mat4(modelview.inverse().transpose())
}

/// Window coordinates of `object`, as `gluProject`. `None` if the point
/// projects to `w == 0`.
#[must_use]
pub fn project(object: Vec3, modelview: &Mat4, projection: &Mat4, viewport: Rect) -> Option<Vec3> {
    let clip = *projection * modelview.transform_point3(object).extend(1.0);
    if clip.w == 0.0 {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    let unit = ndc * 0.5 + 0.5;
    #[expect(clippy::cast_precision_loss)]
    let window = Vec3::new(
        unit.x * viewport.width() as f32 + viewport.left as f32,
        unit.y * viewport.height() as f32 + viewport.bottom as f32,
        unit.z,
    );
    Some(window)
}

/// Object coordinates of the window point `window`, as `gluUnProject`.
/// `None` if the combined matrix is singular or the point maps to
/// `w == 0`.
#[must_use]
pub fn unproject(window: Vec3, modelview: &Mat4, projection: &Mat4, viewport: Rect) -> Option<Vec3> {
    let combined = *projection * *modelview;
    if combined.determinant() == 0.0 {
        return None;
    }
    #[expect(clippy::cast_precision_loss)]
    let unit = Vec4::new(
        (window.x - viewport.left as f32) / viewport.width() as f32,
        (window.y - viewport.bottom as f32) / viewport.height() as f32,
        window.z,
        1.0,
    );
    let ndc = unit * 2.0 - Vec4::ONE;
    let object = combined.inverse() * ndc;
    if object.w == 0.0 {
        return None;
    }
    Some(object.truncate() / object.w)
}

impl<D: GlDriver> RenderContext<D> {
    /// Select the stack later matrix calls operate on.
    ///
    /// [`MatrixMode::Texture`] resolves to the texture stack of the active
    /// unit; units past the fourth have no stack and leave the mode as is.
    pub fn matrix_mode(&mut self, mode: MatrixMode) {
        let index = mode.index().unwrap_or(2 + self.current_unit);
        if index >= NUM_MATRIX_MODES {
            warn!(
                target: "Render",
                "no texture matrix for texture unit {}", self.current_unit
            );
            return;
        }
        self.render.matrix_mode = index;
    }

    /// The selected stack, always a concrete one.
    #[must_use]
    pub fn get_matrix_mode(&self) -> MatrixMode {
        MatrixMode::STACKS[self.render.matrix_mode]
    }

    fn current_stack(&mut self) -> &mut super::MatrixStack {
        &mut self.render.stacks[self.render.matrix_mode]
    }

    /// Top of the stack for `mode`. [`MatrixMode::Texture`] reads the
    /// active unit's stack.
    #[must_use]
    pub fn matrix(&self, mode: MatrixMode) -> Mat4 {
        let index = mode.index().unwrap_or(2 + self.current_unit);
        self.render
            .stacks
            .get(index)
            .map_or(Mat4::IDENTITY, |stack| *stack.top())
    }

    #[must_use]
    pub fn modelview(&self) -> Mat4 {
        self.matrix(MatrixMode::Modelview)
    }

    #[must_use]
    pub fn projection(&self) -> Mat4 {
        self.matrix(MatrixMode::Projection)
    }

    /// Index of the top entry of the stack for `mode`.
    #[must_use]
    pub fn matrix_depth(&self, mode: MatrixMode) -> usize {
        let index = mode.index().unwrap_or(2 + self.current_unit);
        self.render.stacks.get(index).map_or(0, |stack| stack.top)
    }

    /// Change counter of the stack for `mode`.
    #[must_use]
    pub fn matrix_hash(&self, mode: MatrixMode) -> u32 {
        let index = mode.index().unwrap_or(2 + self.current_unit);
        self.render.stacks.get(index).map_or(0, |stack| stack.hash)
    }

    fn modify_top(&mut self, f: impl FnOnce(&mut Mat4)) {
        self.flush();
        let stack = self.current_stack();
        f(stack.top_mut());
        stack.hash = stack.hash.wrapping_add(1);
    }

    pub fn load_identity(&mut self) {
        self.modify_top(|top| *top = Mat4::IDENTITY);
    }

    pub fn load_matrix(&mut self, matrix: &Mat4) {
        self.modify_top(|top| *top = *matrix);
    }

    /// Post-multiply the top by `matrix`, as `glMultMatrix`.
    pub fn mult_matrix(&mut self, matrix: &Mat4) {
        self.modify_top(|top| *top *= *matrix);
    }

    pub fn translatef(&mut self, x: f32, y: f32, z: f32) {
        if x.abs() < APPROXIMATELY_ZERO && y.abs() < APPROXIMATELY_ZERO && z.abs() < APPROXIMATELY_ZERO {
            return;
        }
        self.modify_top(|top| *top *= Mat4::from_translation(Vec3::new(x, y, z)));
    }

    pub fn scalef(&mut self, x: f32, y: f32, z: f32) {
        if (x - 1.0).abs() < APPROXIMATELY_ZERO
            && (y - 1.0).abs() < APPROXIMATELY_ZERO
            && (z - 1.0).abs() < APPROXIMATELY_ZERO
        {
            return;
        }
        self.modify_top(|top| *top *= Mat4::from_scale(Vec3::new(x, y, z)));
    }

    /// Rotate by `degrees` around `(x, y, z)`. Whole turns are skipped.
    pub fn rotatef(&mut self, degrees: f32, x: f32, y: f32, z: f32) {
        if degrees.abs() < APPROXIMATELY_ZERO || (degrees - 360.0).abs() < APPROXIMATELY_ZERO {
            return;
        }
        let rotation = gen_rot(degrees, Vec3::new(x, y, z));
        self.modify_top(|top| *top *= rotation);
    }

    pub fn ortho(&mut self, left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) {
        let ortho = gen_ortho(left, right, bottom, top, near, far);
        self.modify_top(|m| *m *= ortho);
    }

    /// Duplicate the top entry. A full stack is left unchanged.
    pub fn push_matrix(&mut self) {
        let stack = self.current_stack();
        if stack.top < MATRIX_STACK_DEPTH - 1 {
            stack.entries[stack.top + 1] = stack.entries[stack.top];
            stack.top += 1;
        } else {
            warn_once(&mut stack.overflow_warned, "Matrix stack overflow");
        }
    }

    /// Drop the top entry. Popping the last entry only warns.
    pub fn pop_matrix(&mut self) {
        let index = self.render.matrix_mode;
        let stack = &self.render.stacks[index];
        if stack.top == 0 {
            self.flush();
            let stack = &mut self.render.stacks[index];
            warn_once(&mut stack.underflow_warned, "Matrix stack underflow");
            return;
        }
        if stack.entries[stack.top] != stack.entries[stack.top - 1] {
            self.flush();
        }
        let stack = &mut self.render.stacks[index];
        stack.top -= 1;
        stack.hash = stack.hash.wrapping_add(1);
    }

    /// Issue the pending program switch, upload the matrices the bound
    /// shader has not seen, then the pending context state.
    pub fn sync_matrices(&mut self) {
        self.sync_shaders();
        if let Some(id) = self.shaders.bound {
            self.sync_shader_matrices(id);
        }
        self.sync_context_state();
    }

    fn sync_shader_matrices(&mut self, id: crate::ShaderId) {
        let Some(shader) = self.shaders.get(id) else {
            return;
        };
        let seen = shader.mat_hash;
        let has_normal = shader.uniform_location(uniform::NORMAL_MATRIX) >= 0;
        let has_mvp = shader.uniform_location(uniform::MODELVIEW_PROJECTION_MATRIX) >= 0;
        let hashes: [u32; NUM_MATRIX_MODES] = std::array::from_fn(|i| self.render.stacks[i].hash);
        let (mv_hash, proj_hash) = (hashes[0], hashes[1]);
        let modelview = *self.render.stacks[0].top();
        let projection = *self.render.stacks[1].top();

        let mut upload_mvp = false;
        let mut normal = None;
        if mv_hash != seen[0] {
            if has_normal {
                normal = Some(match self.render.normal_cache {
                    Some((hash, cached)) if hash == mv_hash => cached,
                    _ => {
                        let computed = normal_matrix(&modelview);
                        self.render.normal_cache = Some((mv_hash, computed));
                        computed
                    }
                });
            }
            upload_mvp = has_mvp;
        } else if proj_hash != seen[1] {
            upload_mvp = has_mvp;
        }
        let mvp = upload_mvp.then(|| match self.render.mvp_cache {
            Some((mv, proj, cached)) if mv == mv_hash && proj == proj_hash => cached,
            _ => {
                let computed = projection * modelview;
                self.render.mvp_cache = Some((mv_hash, proj_hash, computed));
                computed
            }
        });
        let stale: Vec<(usize, Mat4)> = (0..NUM_MATRIX_MODES)
            .filter(|&i| hashes[i] != seen[i])
            .map(|i| (i, *self.render.stacks[i].top()))
            .collect();

        let mut handle = self.shader_handle(id);
        for &(i, matrix) in &stale {
            handle.uniform_matrix4fv(MATRIX_UNIFORMS[i], false, &matrix.to_cols_array());
        }
        if let Some(normal) = normal {
            handle.uniform_matrix3fv(uniform::NORMAL_MATRIX, false, &normal.to_cols_array());
        }
        if let Some(mvp) = mvp {
            handle.uniform_matrix4fv(uniform::MODELVIEW_PROJECTION_MATRIX, false, &mvp.to_cols_array());
        }
        if let Some(shader) = self.shaders.get_mut(id) {
            shader.mat_hash = hashes;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, RenderConfig, Topology};

    fn context() -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        RenderContext::new(HeadlessDriver::new(), RenderConfig::default())
    }

    #[test]
    fn overflowing_push_keeps_the_top() {
        let mut ctx = context();
        ctx.translatef(1.0, 2.0, 3.0);
        let top = ctx.modelview();
        for _ in 0..MATRIX_STACK_DEPTH + 1 {
            ctx.push_matrix();
        }
        assert_eq!(ctx.matrix_depth(MatrixMode::Modelview), MATRIX_STACK_DEPTH - 1);
        assert_eq!(ctx.modelview(), top);
    }

    #[test]
    fn underflowing_pop_is_harmless() {
        let mut ctx = context();
        let hash = ctx.matrix_hash(MatrixMode::Modelview);
        ctx.pop_matrix();
        assert_eq!(ctx.matrix_depth(MatrixMode::Modelview), 0);
        assert_eq!(ctx.matrix_hash(MatrixMode::Modelview), hash);
        assert_eq!(ctx.modelview(), Mat4::IDENTITY);
    }

    #[test]
    fn stack_misuse_warns_once_per_stack() {
        let mut ctx = context();
        for _ in 0..MATRIX_STACK_DEPTH + 3 {
            ctx.push_matrix();
        }
        ctx.matrix_mode(MatrixMode::Projection);
        ctx.pop_matrix();
        ctx.pop_matrix();

        let modelview = &mut ctx.render.stacks[MatrixMode::Modelview.index().unwrap()];
        assert!(modelview.overflow_warned);
        assert!(!modelview.underflow_warned);
        assert!(!warn_once(&mut modelview.overflow_warned, "Matrix stack overflow"));
        let projection = &mut ctx.render.stacks[MatrixMode::Projection.index().unwrap()];
        assert!(projection.underflow_warned);
        assert!(!warn_once(&mut projection.underflow_warned, "Matrix stack underflow"));

        let mut fresh = false;
        assert!(warn_once(&mut fresh, "first"));
        assert!(!warn_once(&mut fresh, "second"));
        assert_eq!(ctx.matrix_depth(MatrixMode::Modelview), MATRIX_STACK_DEPTH - 1);
    }

    #[test]
    fn push_pop_restores() {
        let mut ctx = context();
        ctx.matrix_mode(MatrixMode::Projection);
        ctx.ortho(0.0, 100.0, 0.0, 50.0, -1.0, 1.0);
        let ortho = ctx.projection();
        ctx.push_matrix();
        ctx.scalef(2.0, 2.0, 1.0);
        assert_ne!(ctx.projection(), ortho);
        ctx.pop_matrix();
        assert_eq!(ctx.projection(), ortho);
        assert_eq!(ctx.modelview(), Mat4::IDENTITY);
    }

    #[test]
    fn near_identity_transforms_are_skipped() {
        let mut ctx = context();
        let hash = ctx.matrix_hash(MatrixMode::Modelview);
        ctx.translatef(0.0, 0.000_001, 0.0);
        ctx.scalef(1.0, 1.0, 1.000_001);
        ctx.rotatef(360.0, 0.0, 0.0, 1.0);
        ctx.rotatef(0.0, 0.0, 0.0, 1.0);
        assert_eq!(ctx.matrix_hash(MatrixMode::Modelview), hash);
        ctx.rotatef(90.0, 0.0, 0.0, 1.0);
        assert_eq!(ctx.matrix_hash(MatrixMode::Modelview), hash + 1);
        let x = ctx.modelview().transform_point3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn texture_mode_follows_the_active_unit() {
        let mut ctx = context();
        ctx.tex_unit(2).activate();
        ctx.matrix_mode(MatrixMode::Texture);
        assert_eq!(ctx.get_matrix_mode(), MatrixMode::Texture2);
        ctx.tex_unit(7).activate();
        ctx.matrix_mode(MatrixMode::Texture);
        assert_eq!(ctx.get_matrix_mode(), MatrixMode::Texture2);
    }

    #[test]
    fn matrix_changes_flush_pending_geometry() {
        let mut ctx = context();
        ctx.begin(Topology::Triangles);
        ctx.vertex2f(0.0, 0.0);
        ctx.vertex2f(1.0, 0.0);
        ctx.vertex2f(0.0, 1.0);
        ctx.translatef(1.0, 0.0, 0.0);
        assert_eq!(ctx.driver().counts().draw_calls, 1);
        assert_eq!(ctx.pending_vertex_count(), 0);
    }

    #[test]
    fn only_stale_matrices_are_uploaded() {
        let mut ctx = context();
        let id = ctx.load_immediate_shader().unwrap();
        ctx.shader(id).unwrap().bind();
        ctx.sync_matrices();
        ctx.driver_mut().reset_counts();

        ctx.sync_matrices();
        assert_eq!(ctx.driver().counts().uniform_uploads, 0);

        ctx.matrix_mode(MatrixMode::Projection);
        ctx.ortho(0.0, 10.0, 0.0, 10.0, -1.0, 1.0);
        ctx.sync_matrices();
        // the immediate shader only reads the MVP
        assert_eq!(ctx.driver().counts().uniform_uploads, 1);
        let program = ctx.shader_state(id).unwrap().program();
        let expected = gen_ortho(0.0, 10.0, 0.0, 10.0, -1.0, 1.0).to_cols_array();
        assert_eq!(ctx.driver().uniform_value(program, 0), Some(&expected[..]));
    }

    #[test]
    fn reset_hashes_forces_reupload() {
        let mut ctx = context();
        let id = ctx.load_immediate_shader().unwrap();
        ctx.shader(id).unwrap().bind();
        ctx.translatef(1.0, 0.0, 0.0);
        ctx.sync_matrices();
        ctx.reset_sync_hashes();
        ctx.driver_mut().reset_counts();
        ctx.sync_matrices();
        // values are unchanged, so the uniform cache still absorbs them
        assert_eq!(ctx.driver().counts().uniform_uploads, 0);
        assert_eq!(ctx.matrix_hash(MatrixMode::Modelview), 0);
    }

    #[test]
    fn project_round_trips() {
        let viewport = Rect::from_xywh(0, 0, 200, 100);
        let projection = gen_persp(60.0, 2.0, 0.1, 100.0);
        let modelview = gen_look(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, Vec3::Y);
        let point = Vec3::new(0.5, -0.25, 1.0);
        let window = project(point, &modelview, &projection, viewport).unwrap();
        assert!(window.x > 100.0 && window.y < 50.0);
        let back = unproject(window, &modelview, &projection, viewport).unwrap();
        assert!((back - point).length() < 1e-3);
        assert_eq!(unproject(window, &Mat4::ZERO, &projection, viewport), None);
    }

    #[test]
    fn helpers_match_gl() {
        let ndc = gen_ndc_to_wc();
        assert_eq!(ndc.transform_point3(Vec3::splat(-1.0)), Vec3::ZERO);
        assert_eq!(ndc.transform_point3(Vec3::ONE), Vec3::ONE);
        assert_eq!(gen_rot(45.0, Vec3::ZERO), Mat4::IDENTITY);
        let scale = Mat4::from_scale(Vec3::new(2.0, 4.0, 1.0));
        let normal = normal_matrix(&scale);
        assert_eq!(normal.x_axis.x, 0.5);
        assert_eq!(normal.y_axis.y, 0.25);
    }
}

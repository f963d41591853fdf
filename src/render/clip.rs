//! Nested screen-space clip rectangles on top of the scissor test.

use std::ops::{Deref, DerefMut};

use glam::Vec2;

use crate::{driver::GlDriver, state::ScopeToken, types::Rect, CapabilityId, RenderContext};

/// Stack of intersected clip rectangles in UI coordinates.
#[derive(Debug)]
pub(crate) struct ClipStack {
    entries: Vec<(Rect, ScopeToken)>,
    /// Scissor box requested before the first clip rect was pushed.
    root: Rect,
    /// UI to window scale applied when a rect becomes a scissor box.
    scale: Vec2,
}

impl Default for ClipStack {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            root: Rect::NULL,
            scale: Vec2::ONE,
        }
    }
}

impl ClipStack {
    fn top(&self) -> Option<Rect> {
        self.entries.last().map(|(rect, _)| *rect)
    }

    /// Window-space scissor box for a UI rect. One pixel of slack on each
    /// extent keeps the right and top edges inside the box.
    #[expect(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn scissor_for(&self, rect: Rect) -> Rect {
        let scaled = |v: i32, s: f32| v as f32 * s;
        let x = scaled(rect.left, self.scale.x).floor() as i32;
        let y = scaled(rect.bottom, self.scale.y).floor() as i32;
        let width = scaled(rect.width(), self.scale.x).ceil().max(0.0) as i32 + 1;
        let height = scaled(rect.height(), self.scale.y).ceil().max(0.0) as i32 + 1;
        Rect::from_xywh(x, y, width, height)
    }
}

/// Proof of a pushed clip rect, consumed by
/// [`RenderContext::pop_clip_rect`].
#[derive(Debug)]
#[must_use = "a clip token must be handed back to pop_clip_rect"]
pub struct ClipToken {
    depth: usize,
}

/// A clip rect that is popped when dropped.
///
/// Derefs to the [`RenderContext`] so drawing continues through the guard.
pub struct ClipScope<'a, D: GlDriver> {
    ctx: &'a mut RenderContext<D>,
    token: Option<ClipToken>,
}

impl<D: GlDriver> Deref for ClipScope<'_, D> {
    type Target = RenderContext<D>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<D: GlDriver> DerefMut for ClipScope<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<D: GlDriver> Drop for ClipScope<'_, D> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ctx.pop_clip_rect(token);
        }
    }
}

impl<D: GlDriver> RenderContext<D> {
    /// Restrict drawing to `rect` intersected with the current clip rect.
    ///
    /// Enables the scissor test until the matching pop.
    pub fn push_clip_rect(&mut self, rect: Rect) -> ClipToken {
        let clipped = match self.render.clip.top() {
            Some(top) => rect.intersect(&top),
            None => {
                self.render.clip.root = self.render.pending.scissor;
                rect
            }
        };
        let clipped = if clipped.is_empty() { Rect::NULL } else { clipped };

        let scope = self.push_scope(CapabilityId::SCISSOR_TEST, true);
        self.render.clip.entries.push((clipped, scope));
        let depth = self.render.clip.entries.len();
        self.set_scissor(self.render.clip.scissor_for(clipped));
        ClipToken { depth }
    }

    /// Leave the clip rect described by `token`.
    ///
    /// Clip rects must be popped in reverse order of pushing.
    pub fn pop_clip_rect(&mut self, token: ClipToken) {
        if token.depth != self.render.clip.entries.len() {
            self.usage_error("clip rect popped out of order");
            return;
        }
        let Some((_, scope)) = self.render.clip.entries.pop() else {
            return;
        };
        self.flush();
        match self.render.clip.top() {
            Some(top) => self.set_scissor(self.render.clip.scissor_for(top)),
            None => self.set_scissor(self.render.clip.root),
        }
        self.pop_scope(scope);
    }

    /// Push a clip rect for the lifetime of the returned guard.
    pub fn enter_clip_rect(&mut self, rect: Rect) -> ClipScope<'_, D> {
        let token = self.push_clip_rect(rect);
        ClipScope {
            ctx: self,
            token: Some(token),
        }
    }

    /// Innermost clip rect, in UI coordinates.
    #[must_use]
    pub fn clip_rect(&self) -> Option<Rect> {
        self.render.clip.top()
    }

    /// Set the UI to window scale used for clip rects pushed from now on.
    pub fn set_ui_scale_factor(&mut self, scale: Vec2) {
        self.render.clip.scale = scale;
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
    fn nested_rects_intersect() {
        let mut ctx = context();
        let outer = ctx.push_clip_rect(Rect::from_xywh(0, 0, 100, 100));
        assert!(ctx.is_enabled(CapabilityId::SCISSOR_TEST));
        assert_eq!(ctx.scissor(), Rect::from_xywh(0, 0, 101, 101));

        let inner = ctx.push_clip_rect(Rect::from_xywh(50, 60, 100, 100));
        assert_eq!(ctx.clip_rect(), Some(Rect::new(50, 100, 100, 60)));
        assert_eq!(ctx.scissor(), Rect::from_xywh(50, 60, 51, 41));

        ctx.pop_clip_rect(inner);
        assert_eq!(ctx.scissor(), Rect::from_xywh(0, 0, 101, 101));
        ctx.pop_clip_rect(outer);
        assert!(!ctx.is_enabled(CapabilityId::SCISSOR_TEST));
        assert_eq!(ctx.clip_rect(), None);
    }

    #[test]
    fn disjoint_rects_clip_everything() {
        let mut ctx = context();
        let mut outer = ctx.enter_clip_rect(Rect::from_xywh(0, 0, 10, 10));
        let inner = outer.push_clip_rect(Rect::from_xywh(20, 20, 10, 10));
        assert_eq!(outer.clip_rect(), Some(Rect::NULL));
        assert_eq!(outer.scissor(), Rect::from_xywh(0, 0, 1, 1));
        outer.pop_clip_rect(inner);
    }

    #[test]
    fn root_scissor_is_restored() {
        let mut ctx = context();
        ctx.set_scissor(Rect::from_xywh(5, 5, 20, 20));
        {
            let clipped = ctx.enter_clip_rect(Rect::from_xywh(0, 0, 8, 8));
            assert_eq!(clipped.scissor(), Rect::from_xywh(0, 0, 9, 9));
        }
        assert_eq!(ctx.scissor(), Rect::from_xywh(5, 5, 20, 20));
        assert!(!ctx.is_enabled(CapabilityId::SCISSOR_TEST));
    }

    #[test]
    fn ui_scale_applies_to_the_scissor() {
        let mut ctx = context();
        ctx.set_ui_scale_factor(Vec2::new(1.5, 2.0));
        let token = ctx.push_clip_rect(Rect::from_xywh(3, 3, 11, 10));
        assert_eq!(ctx.scissor(), Rect::from_xywh(4, 6, 18, 21));
        ctx.pop_clip_rect(token);
    }

    #[test]
    fn clipped_geometry_reaches_the_driver_with_the_box() {
        let mut ctx = context();
        {
            let mut clipped = ctx.enter_clip_rect(Rect::from_xywh(10, 10, 30, 30));
            clipped.begin(Topology::Points);
            clipped.vertex2f(15.0, 15.0);
            clipped.flush();
            assert_eq!(clipped.driver().scissor_state(), [10, 10, 31, 31]);
            assert_eq!(clipped.driver().draws().len(), 1);
        }
        assert!(!ctx.driver().cap_enabled(crate::driver::gl::SCISSOR_TEST));
    }

    #[test]
    fn out_of_order_pops_are_refused() {
        let mut ctx = RenderContext::new(
            HeadlessDriver::new(),
            RenderConfig::default().with_debug_gl(false),
        );
        let outer = ctx.push_clip_rect(Rect::from_xywh(0, 0, 10, 10));
        let inner = ctx.push_clip_rect(Rect::from_xywh(0, 0, 5, 5));
        ctx.pop_clip_rect(outer);
        assert_eq!(ctx.clip_rect(), Some(Rect::from_xywh(0, 0, 5, 5)));
        ctx.pop_clip_rect(inner);
        assert_eq!(ctx.clip_rect(), Some(Rect::from_xywh(0, 0, 10, 10)));
    }
}

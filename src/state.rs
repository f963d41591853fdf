//! The GL capability cache.
//!
//! Every tracked capability (blend, scissor, cull face, ...) has a record in
//! a [`StateRegistry`] holding its cached value, the depth of nested scopes
//! controlling it and the identity of the innermost scope. Scopes are entered
//! with [`RenderContext::enter_scope`], which returns a [`StateScope`] guard
//! that restores the prior value when dropped:
//!
//! ```
//! # use llrender_core::{driver::HeadlessDriver, CapabilityId, RenderConfig, RenderContext};
//! let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
//! {
//!     let mut blend = ctx.enter_scope(CapabilityId::BLEND, true);
//!     assert!(blend.is_enabled(CapabilityId::BLEND));
//!     {
//!         let inner = blend.enter_scope(CapabilityId::BLEND, false);
//!         assert!(!inner.is_enabled(CapabilityId::BLEND));
//!     }
//!     assert!(blend.is_enabled(CapabilityId::BLEND));
//! }
//! assert!(!ctx.is_enabled(CapabilityId::BLEND));
//! ```
//!
//! A redundant request (the capability is already in the desired state)
//! issues no driver call at all.

use std::ops::{Deref, DerefMut};

use log::{error, info};

use crate::{
    driver::{gl, GlDriver},
    RenderContext,
};

/// Stable handle to a registered capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityId(u16);

impl CapabilityId {
    pub const BLEND: Self = Self(0);
    pub const CLIP_PLANE0: Self = Self(1);
    pub const CULL_FACE: Self = Self(2);
    pub const DEPTH_CLAMP: Self = Self(3);
    pub const DITHER: Self = Self(4);
    pub const LINE_SMOOTH: Self = Self(5);
    pub const MULTISAMPLE: Self = Self(6);
    pub const POLYGON_OFFSET_FILL: Self = Self(7);
    pub const POLYGON_OFFSET_LINE: Self = Self(8);
    pub const POLYGON_SMOOTH: Self = Self(9);
    pub const SCISSOR_TEST: Self = Self(10);
    pub const STENCIL_TEST: Self = Self(11);
    pub const ALPHA_TEST: Self = Self(12);
    pub const COLOR_MATERIAL: Self = Self(13);
    pub const FOG: Self = Self(14);
    pub const LINE_STIPPLE: Self = Self(15);
    pub const LIGHTING: Self = Self(16);
    pub const NORMALIZE: Self = Self(17);
    pub const POLYGON_STIPPLE: Self = Self(18);
    pub const TEXTURE_GEN_Q: Self = Self(19);
    pub const TEXTURE_GEN_R: Self = Self(20);
    pub const TEXTURE_GEN_S: Self = Self(21);
    pub const TEXTURE_GEN_T: Self = Self(22);

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// External condition that makes a capability inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disabler {
    /// Inert while the fixed-function pipeline is off.
    NoFixedFunction,
}

/// Built-in registrations, in [`CapabilityId`] order.
const DEFAULT_CAPABILITIES: &[(&str, u32, bool, Option<Disabler>)] = &[
    ("GL_BLEND", gl::BLEND, false, None),
    ("GL_CLIP_PLANE0", gl::CLIP_PLANE0, false, None),
    ("GL_CULL_FACE", gl::CULL_FACE, false, None),
    ("GL_DEPTH_CLAMP", gl::DEPTH_CLAMP, false, None),
    ("GL_DITHER", gl::DITHER, true, None),
    ("GL_LINE_SMOOTH", gl::LINE_SMOOTH, false, None),
    ("GL_MULTISAMPLE", gl::MULTISAMPLE, false, None),
    ("GL_POLYGON_OFFSET_FILL", gl::POLYGON_OFFSET_FILL, false, None),
    ("GL_POLYGON_OFFSET_LINE", gl::POLYGON_OFFSET_LINE, false, None),
    ("GL_POLYGON_SMOOTH", gl::POLYGON_SMOOTH, false, None),
    ("GL_SCISSOR_TEST", gl::SCISSOR_TEST, false, None),
    ("GL_STENCIL_TEST", gl::STENCIL_TEST, false, None),
    ("GL_ALPHA_TEST", gl::ALPHA_TEST, false, Some(Disabler::NoFixedFunction)),
    ("GL_COLOR_MATERIAL", gl::COLOR_MATERIAL, false, Some(Disabler::NoFixedFunction)),
    ("GL_FOG", gl::FOG, false, Some(Disabler::NoFixedFunction)),
    ("GL_LINE_STIPPLE", gl::LINE_STIPPLE, false, Some(Disabler::NoFixedFunction)),
    ("GL_LIGHTING", gl::LIGHTING, false, Some(Disabler::NoFixedFunction)),
    ("GL_NORMALIZE", gl::NORMALIZE, false, Some(Disabler::NoFixedFunction)),
    ("GL_POLYGON_STIPPLE", gl::POLYGON_STIPPLE, false, Some(Disabler::NoFixedFunction)),
    ("GL_TEXTURE_GEN_Q", gl::TEXTURE_GEN_Q, false, Some(Disabler::NoFixedFunction)),
    ("GL_TEXTURE_GEN_R", gl::TEXTURE_GEN_R, false, Some(Disabler::NoFixedFunction)),
    ("GL_TEXTURE_GEN_S", gl::TEXTURE_GEN_S, false, Some(Disabler::NoFixedFunction)),
    ("GL_TEXTURE_GEN_T", gl::TEXTURE_GEN_T, false, Some(Disabler::NoFixedFunction)),
];

#[derive(Debug, Clone)]
struct Capability {
    name: &'static str,
    cap: u32,
    current: bool,
    depth: u32,
    active: Option<u64>,
    disabler: Option<Disabler>,
}

/// Cached enabled/disabled value of every registered capability.
#[derive(Debug, Default)]
pub struct StateRegistry {
    caps: Vec<Capability>,
}

impl StateRegistry {
    fn register_defaults(&mut self) {
        for &(name, cap, initial, disabler) in DEFAULT_CAPABILITIES {
            self.register(name, cap, initial, disabler);
        }
    }

    fn register(
        &mut self,
        name: &'static str,
        cap: u32,
        initial: bool,
        disabler: Option<Disabler>,
    ) -> CapabilityId {
        let id = CapabilityId(u16::try_from(self.caps.len()).unwrap_or(u16::MAX));
        self.caps.push(Capability {
            name,
            cap,
            current: initial,
            depth: 0,
            active: None,
            disabler,
        });
        id
    }

    fn get(&self, id: CapabilityId) -> Option<&Capability> {
        self.caps.get(id.index())
    }
}

/// Proof of an entered scope, consumed by [`RenderContext::pop_scope`].
#[derive(Debug)]
#[must_use = "a scope token must be handed back to pop_scope"]
pub struct ScopeToken {
    cap: CapabilityId,
    id: u64,
    prior_instance: Option<u64>,
    prior_state: bool,
}

impl ScopeToken {
    /// Capability this scope controls.
    #[must_use]
    pub fn capability(&self) -> CapabilityId {
        self.cap
    }
}

/// A scoped capability override, restored on drop.
///
/// Derefs to the [`RenderContext`] so rendering (and further nesting) can
/// continue through the guard.
pub struct StateScope<'a, D: GlDriver> {
    ctx: &'a mut RenderContext<D>,
    token: Option<ScopeToken>,
}

impl<D: GlDriver> StateScope<'_, D> {
    /// Change the value requested by this scope.
    pub fn set_enabled(&mut self, enabled: bool) {
        if let Some(token) = &self.token {
            let (cap, id) = (token.cap, token.id);
            self.ctx.set_scope_state(cap, id, enabled);
        }
    }
}

impl<D: GlDriver> Deref for StateScope<'_, D> {
    type Target = RenderContext<D>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<D: GlDriver> DerefMut for StateScope<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<D: GlDriver> Drop for StateScope<'_, D> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ctx.pop_scope(token);
        }
    }
}

impl<D: GlDriver> RenderContext<D> {
    pub(crate) fn init_states(&mut self) {
        self.states.register_defaults();
    }

    /// Register a capability beyond the built-in list.
    ///
    /// The driver is brought in line with `initial` immediately.
    pub fn register_capability(
        &mut self,
        name: &'static str,
        cap: u32,
        initial: bool,
        disabler: Option<Disabler>,
    ) -> CapabilityId {
        let id = self.states.register(name, cap, initial, disabler);
        if !self.is_disabled_by(disabler) {
            self.apply_cap(cap, initial);
        }
        id
    }

    fn is_disabled_by(&self, disabler: Option<Disabler>) -> bool {
        match disabler {
            Some(Disabler::NoFixedFunction) => self.config.no_fixed_function,
            None => false,
        }
    }

    fn apply_cap(&mut self, cap: u32, enabled: bool) {
        if enabled {
            self.driver.enable(cap);
        } else {
            self.driver.disable(cap);
        }
    }

    /// Whether the capability is on (inert capabilities read as off).
    #[must_use]
    pub fn is_enabled(&self, cap: CapabilityId) -> bool {
        self.states
            .get(cap)
            .is_some_and(|c| c.current && !self.is_disabled_by(c.disabler))
    }

    /// For assertions: true if the capability is on or inert.
    #[must_use]
    pub fn check_enabled(&self, cap: CapabilityId) -> bool {
        self.states
            .get(cap)
            .is_none_or(|c| self.is_disabled_by(c.disabler) || c.current)
    }

    /// For assertions: true if the capability is off or inert.
    #[must_use]
    pub fn check_disabled(&self, cap: CapabilityId) -> bool {
        self.states
            .get(cap)
            .is_none_or(|c| self.is_disabled_by(c.disabler) || !c.current)
    }

    /// Nesting depth of scopes controlling `cap`.
    #[must_use]
    pub fn scope_depth(&self, cap: CapabilityId) -> u32 {
        self.states.get(cap).map_or(0, |c| c.depth)
    }

    fn set_state(&mut self, cap: CapabilityId, enabled: bool) {
        let Some(record) = self.states.get(cap) else {
            return;
        };
        if record.current == enabled || self.is_disabled_by(record.disabler) {
            return;
        }
        let gl_cap = record.cap;
        self.flush();
        if let Some(record) = self.states.caps.get_mut(cap.index()) {
            record.current = enabled;
        }
        self.apply_cap(gl_cap, enabled);
    }

    fn set_scope_state(&mut self, cap: CapabilityId, id: u64, enabled: bool) {
        let active = self.states.get(cap).and_then(|c| c.active);
        if active != Some(id) {
            self.gl_fatal(&format!(
                "scope {id} changed {} while not the innermost scope",
                self.capability_name(cap)
            ));
        }
        self.set_state(cap, enabled);
    }

    fn capability_name(&self, cap: CapabilityId) -> &'static str {
        self.states.get(cap).map_or("<unregistered>", |c| c.name)
    }

    /// Enter a scope requesting `enabled` for `cap`.
    ///
    /// Prefer [`enter_scope`](Self::enter_scope); this form exists for
    /// callers that cannot hold a borrow across the scope.
    pub fn push_scope(&mut self, cap: CapabilityId, enabled: bool) -> ScopeToken {
        self.next_scope_id += 1;
        let id = self.next_scope_id;
        let (prior_instance, prior_state) = match self.states.caps.get_mut(cap.index()) {
            Some(record) => {
                record.depth += 1;
                (record.active.replace(id), record.current)
            }
            None => (None, false),
        };
        self.set_state(cap, enabled);
        ScopeToken {
            cap,
            id,
            prior_instance,
            prior_state,
        }
    }

    /// Leave the scope described by `token`, restoring the prior value.
    ///
    /// Scopes must be left in reverse order of entry.
    pub fn pop_scope(&mut self, token: ScopeToken) {
        let cap = token.cap;
        let Some(record) = self.states.get(cap) else {
            return;
        };
        if record.active != Some(token.id) {
            let message = format!(
                "scope exit out of order for {}: expected {:?}, got {}",
                record.name, record.active, token.id
            );
            self.gl_fatal(&message);
            return;
        }
        if record.depth == 0 {
            if token.prior_instance.is_some() {
                self.gl_fatal("scope exit with a prior instance at depth 0");
            }
            return;
        }
        if let Some(record) = self.states.caps.get_mut(cap.index()) {
            record.active = token.prior_instance;
            record.depth -= 1;
        }
        if self.config.debug_gl {
            self.check_state(cap);
        }
        self.set_state(cap, token.prior_state);
    }

    /// Enter a scope requesting `enabled` for `cap`; the returned guard
    /// restores the prior value on drop.
    pub fn enter_scope(&mut self, cap: CapabilityId, enabled: bool) -> StateScope<'_, D> {
        let token = self.push_scope(cap, enabled);
        StateScope {
            ctx: self,
            token: Some(token),
        }
    }

    /// Cross-check one capability against the driver.
    pub fn check_state(&mut self, cap: CapabilityId) {
        let Some(record) = self.states.get(cap) else {
            return;
        };
        if self.is_disabled_by(record.disabler) {
            return;
        }
        let (name, gl_cap, expected) = (record.name, record.cap, record.current);
        if self.driver.is_enabled(gl_cap) != expected {
            self.gl_fatal(&format!(
                "GL enabled state for {name} does not match expected state of {}",
                if expected { "TRUE" } else { "FALSE" }
            ));
        }
    }

    /// Cross-check every capability and the default blend function against
    /// the driver. Only active with `debug_gl`.
    pub fn check_states(&mut self, msg: &str) {
        if !self.config.debug_gl || self.gl_disabled {
            return;
        }
        self.clear_gl_errors();
        let src = self.driver.get_parameter_i32(gl::BLEND_SRC_RGB);
        let dst = self.driver.get_parameter_i32(gl::BLEND_DST_RGB);
        let mut failures = Vec::new();
        if u32::try_from(src).ok() != Some(gl::SRC_ALPHA)
            || u32::try_from(dst).ok() != Some(gl::ONE_MINUS_SRC_ALPHA)
        {
            failures.push(format!("Blend function corrupted: {src:#x} {dst:#x}  {msg}"));
        }
        for index in 0..self.states.caps.len() {
            let record = &self.states.caps[index];
            if self.is_disabled_by(record.disabler) {
                continue;
            }
            let (name, gl_cap, expected) = (record.name, record.cap, record.current);
            if self.driver.is_enabled(gl_cap) != expected {
                failures.push(format!(
                    "GL state error. State: {name} {gl_cap:#06x}. Expected {}",
                    if expected { "TRUE" } else { "FALSE" }
                ));
            }
        }
        if failures.is_empty() {
            return;
        }
        self.dump_states();
        for failure in &failures {
            error!(target: "RenderState", "{failure}");
        }
        self.gl_fatal(&format!("check_states failed: {}", failures.join("; ")));
    }

    /// Log every cached capability value.
    pub fn dump_states(&self) {
        info!(target: "RenderState", "GL States:");
        for record in &self.states.caps {
            info!(
                target: "RenderState",
                "{} : {}",
                record.name,
                if record.current { "TRUE" } else { "FALSE" }
            );
        }
    }

    /// Push every cached capability value to the driver, for use after the
    /// context has been recreated.
    pub(crate) fn apply_all_states(&mut self) {
        for index in 0..self.states.caps.len() {
            let record = &self.states.caps[index];
            debug_assert_eq!(record.depth, 0, "{} restored inside a scope", record.name);
            if self.is_disabled_by(record.disabler) {
                continue;
            }
            let (cap, current) = (record.cap, record.current);
            self.apply_cap(cap, current);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{driver::HeadlessDriver, RenderConfig};

    fn context() -> RenderContext<HeadlessDriver> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default().with_debug_gl(true));
        ctx.driver_mut().reset_counts();
        ctx
    }

    #[test]
    fn redundant_scope_issues_no_driver_calls() {
        let mut ctx = context();
        for cap in [CapabilityId::BLEND, CapabilityId::DITHER, CapabilityId::SCISSOR_TEST] {
            let current = ctx.is_enabled(cap);
            drop(ctx.enter_scope(cap, current));
        }
        let counts = ctx.driver().counts();
        assert_eq!(counts.enable, 0);
        assert_eq!(counts.disable, 0);
    }

    #[test]
    fn nested_alternating_scopes_restore_outer_value() {
        let mut ctx = context();
        let before = ctx.is_enabled(CapabilityId::CULL_FACE);
        let mut tokens = Vec::new();
        for depth in 0..7 {
            tokens.push(ctx.push_scope(CapabilityId::CULL_FACE, depth % 2 == 0));
            assert_eq!(ctx.is_enabled(CapabilityId::CULL_FACE), depth % 2 == 0);
        }
        assert_eq!(ctx.scope_depth(CapabilityId::CULL_FACE), 7);
        while let Some(token) = tokens.pop() {
            ctx.pop_scope(token);
        }
        assert_eq!(ctx.is_enabled(CapabilityId::CULL_FACE), before);
        assert_eq!(ctx.scope_depth(CapabilityId::CULL_FACE), 0);
        assert!(!ctx.driver().cap_enabled(gl::CULL_FACE));
    }

    #[test]
    fn guard_nesting_through_deref() {
        let mut ctx = context();
        {
            let mut outer = ctx.enter_scope(CapabilityId::STENCIL_TEST, true);
            {
                let mut inner = outer.enter_scope(CapabilityId::STENCIL_TEST, false);
                inner.set_enabled(true);
                assert!(inner.driver().cap_enabled(gl::STENCIL_TEST));
            }
            assert!(outer.is_enabled(CapabilityId::STENCIL_TEST));
        }
        assert!(!ctx.driver().cap_enabled(gl::STENCIL_TEST));
        // enable once, inner disable, inner re-enable, final disable
        assert_eq!(ctx.driver().counts().enable, 2);
        assert_eq!(ctx.driver().counts().disable, 2);
    }

    #[test]
    fn fixed_function_capabilities_are_inert_without_fixed_function() {
        let mut ctx = context();
        drop(ctx.enter_scope(CapabilityId::LIGHTING, true));
        assert_eq!(ctx.driver().counts().enable, 0);
        assert!(!ctx.is_enabled(CapabilityId::LIGHTING));
        assert!(ctx.check_enabled(CapabilityId::LIGHTING));
        assert!(ctx.check_disabled(CapabilityId::LIGHTING));
    }

    #[test]
    fn fixed_function_capabilities_toggle_with_fixed_function() {
        let mut ctx = RenderContext::new(
            HeadlessDriver::new(),
            RenderConfig::default().with_fixed_function(true),
        );
        {
            let scope = ctx.enter_scope(CapabilityId::FOG, true);
            assert!(scope.driver().cap_enabled(gl::FOG));
        }
        assert!(!ctx.driver().cap_enabled(gl::FOG));
    }

    #[test]
    fn defaults_are_pushed_to_driver() {
        let ctx = context();
        assert!(ctx.driver().cap_enabled(gl::DITHER));
        assert!(!ctx.driver().cap_enabled(gl::MULTISAMPLE));
        assert!(ctx.is_enabled(CapabilityId::DITHER));
    }

    #[test]
    fn custom_capability_registration() {
        let mut ctx = context();
        let depth_test = ctx.register_capability("GL_DEPTH_TEST", gl::DEPTH_TEST, false, None);
        drop(ctx.enter_scope(depth_test, true));
        assert_eq!(ctx.driver().counts().enable, 1);
        assert!(!ctx.is_enabled(depth_test));
    }

    #[test]
    fn check_states_passes_when_consistent() {
        let mut ctx = context();
        ctx.check_states("consistent");
    }

    #[test]
    #[should_panic(expected = "GL_CULL_FACE")]
    fn check_states_detects_driver_drift() {
        let mut ctx = context();
        ctx.driver_mut().enable(gl::CULL_FACE);
        ctx.check_states("drift");
    }

    #[test]
    fn debug_session_logs_instead_of_panicking() {
        let path = std::env::temp_dir().join(format!("llrender-state-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut ctx = RenderContext::new(
            HeadlessDriver::new(),
            RenderConfig::default().with_debug_gl(true).with_debug_session(&path),
        );
        ctx.driver_mut().enable(gl::CULL_FACE);
        ctx.check_states("session");
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("GL_CULL_FACE"));
        assert_eq!(ctx.failure_count(), 1);
        let _ = std::fs::remove_file(&path);
    }
}

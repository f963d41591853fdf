//! An immediate-mode compatibility core for OpenGL renderers.
//!
//! This crate provides [`RenderContext`], which sits between a legacy-style
//! rendering front end and a programmable-pipeline GL driver. It mirrors the
//! driver's state in caches so redundant calls are never issued, and turns
//! vertex-at-a-time submission into batched draws.
//!
//! # Features
//!
//! - **Capability cache** with scoped, nestable enable/disable guards that
//!   restore the previous value on drop.
//! - **Texture objects** with mip chain construction, discard levels,
//!   readback, alpha-mask classification and pick masks for hit-testing.
//! - **Texture units** that skip rebinding what is already bound and fall
//!   back to a 1×1 white texture when unbound.
//! - **Shader programs** with reserved attribute and uniform tables,
//!   sampler channel assignment and memoized uniform uploads.
//! - **Immediate renderer**: `begin`/`vertex`/`end` batching into one draw
//!   per flush, fixed-function style matrix stacks, a UI transform overlay,
//!   clip rectangles and deferred context state.
//!
//! # Drivers
//!
//! Every GL call goes through the [`driver::GlDriver`] trait. The `glow`
//! feature (on by default) provides `GlowDriver` for a live context;
//! [`driver::HeadlessDriver`] records state in memory and counts calls,
//! which makes it suitable for tests and offscreen tooling.
//!
//! # Threading
//!
//! A [`RenderContext`] belongs to the thread its driver context is current
//! on. It is neither `Sync` nor meant to be shared.

mod config;
mod context;
mod diagnostics;
pub mod driver;
mod error;
mod fence;
pub mod image;
mod program;
mod render;
pub mod shaders;
mod state;
mod tex_unit;
mod types;

pub use config::{AlphaMaskTuning, RenderConfig, DEFAULT_TEXTURE_UNITS};
pub use context::RenderContext;
pub use diagnostics::gl_error_name;
pub use error::{DriverError, ShaderError, TextureError};
pub use fence::SyncFence;
pub use image::{ImageObject, ImageRaw};
pub use program::{ShaderId, ShaderProgram, ShaderRef, Uniform};
pub use render::{
    gen_look, gen_ndc_to_wc, gen_ortho, gen_persp, gen_rot, normal_matrix, project, unproject,
    BlendFactor, BlendType, ClipScope, ClipToken, ColorMask, CompareFunc, ContextSnapshot,
    GlyphQuad, MatrixMode, PolygonFace, PolygonMode, RenderStats, Topology, HARD_VERTEX_LIMIT,
    MATRIX_STACK_DEPTH, NUM_MATRIX_MODES, SOFT_VERTEX_LIMIT,
};
pub use state::{CapabilityId, Disabler, ScopeToken, StateRegistry, StateScope};
pub use tex_unit::{AddressMode, FilterOption, TexUnit, TexUnitRef, TextureBlendType, TextureType};
pub use types::{Rect, Vertex};

//! The driver seam.
//!
//! Every GL entry point the render core uses is a method on [`GlDriver`].
//! The caches above it decide *whether* a call is needed; a driver only
//! decides *how* to issue it. Two backends ship with the crate:
//!
//! - [`GlowDriver`] (feature `glow`): forwards to a live OpenGL context.
//! - [`HeadlessDriver`]: keeps GL state in memory and counts every call,
//!   which is what the test suite uses to prove that redundant calls are
//!   elided.
//!
//! Enumerant arguments are raw GL values, see [`gl`].

use std::fmt;

use crate::{error::DriverError, types::Vertex};

pub mod gl;
#[cfg(feature = "glow")]
mod glow_driver;
mod headless;

#[cfg(feature = "glow")]
pub use glow_driver::GlowDriver;
pub use headless::{CallCounts, DrawRecord, HeadlessDriver};

/// A uniform reported by the driver after linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Name as reported, including any `[0]` array suffix.
    pub name: String,
    /// Number of array elements (1 for non-arrays).
    pub size: i32,
    /// GL type enum (`FLOAT_VEC4`, `SAMPLER_2D`, ...).
    pub utype: u32,
}

/// The GL operations the render core issues.
///
/// Texture and program names are raw `u32` GL names where `0` means "none".
/// Uniform locations are `i32` with `-1` meaning "not present", matching GL.
pub trait GlDriver {
    /// Handle to a GPU sync object.
    type Fence: Copy + fmt::Debug;

    // Errors and capabilities.

    /// Pop one error code, [`gl::NO_ERROR`] when the queue is empty.
    fn get_error(&mut self) -> u32;
    fn enable(&mut self, cap: u32);
    fn disable(&mut self, cap: u32);
    fn is_enabled(&mut self, cap: u32) -> bool;
    fn get_parameter_i32(&mut self, pname: u32) -> i32;

    // Textures.

    /// Select texture unit `unit` (zero based, not `TEXTURE0 + n`).
    fn active_texture(&mut self, unit: u32);
    /// Allocate a new texture name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Allocation`] when the driver cannot provide a
    /// name.
    fn create_texture(&mut self) -> Result<u32, DriverError>;
    fn delete_texture(&mut self, name: u32);
    fn bind_texture(&mut self, target: u32, name: u32);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    );
    fn compressed_tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: u32,
        height: u32,
        data: &[u8],
    );
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: i32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    );
    fn tex_parameter_i32(&mut self, target: u32, pname: u32, value: i32);
    fn tex_parameter_i32_slice(&mut self, target: u32, pname: u32, values: &[i32]);
    fn tex_parameter_f32(&mut self, target: u32, pname: u32, value: f32);
    fn generate_mipmap(&mut self, target: u32);
    fn get_tex_level_parameter_i32(&mut self, target: u32, level: i32, pname: u32) -> i32;
    /// Read level `level` of the texture bound to `target` into `out`.
    fn get_tex_image(&mut self, target: u32, level: i32, format: u32, ty: u32, out: &mut [u8]);
    /// Read compressed level storage.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Unsupported`] if the backend cannot read back
    /// compressed data.
    fn get_compressed_tex_image(
        &mut self,
        target: u32,
        level: i32,
        out: &mut [u8],
    ) -> Result<(), DriverError>;
    /// Fixed-function texture environment. Backends without a fixed-function
    /// pipeline ignore it.
    fn tex_env_i32(&mut self, target: u32, pname: u32, value: i32);

    // Programs.

    /// Compile both stages, bind the reserved attribute slots and link.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Compile`] or [`DriverError::Link`] with the
    /// driver log.
    fn create_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
        attributes: &[(u32, &str)],
    ) -> Result<u32, DriverError>;
    fn delete_program(&mut self, program: u32);
    fn use_program(&mut self, program: u32);
    fn get_active_uniforms(&mut self, program: u32) -> Vec<ActiveUniform>;
    fn get_uniform_location(&mut self, program: u32, name: &str) -> i32;
    fn get_attrib_location(&mut self, program: u32, name: &str) -> i32;
    fn uniform_i32_slice(&mut self, location: i32, values: &[i32]);
    /// Upload `values` as `components`-wide float vectors (1 to 4).
    fn uniform_f32_slice(&mut self, location: i32, components: usize, values: &[f32]);
    /// Upload `values` as `dim`×`dim` matrices (3 or 4).
    fn uniform_matrix_f32_slice(&mut self, location: i32, dim: usize, transpose: bool, values: &[f32]);

    // Context state.

    fn blend_func(&mut self, src: u32, dst: u32);
    fn blend_func_separate(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32);
    fn color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool);
    /// Fixed-function alpha test. Ignored by shader-only backends.
    fn alpha_func(&mut self, func: u32, reference: f32);
    fn line_width(&mut self, width: f32);
    fn point_size(&mut self, size: f32);
    fn polygon_mode(&mut self, face: u32, mode: u32);
    fn polygon_offset(&mut self, factor: f32, units: f32);
    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32);

    // Streaming geometry.

    /// Replace the start of the streaming vertex buffer with `vertices`.
    fn upload_vertices(&mut self, vertices: &[Vertex]);
    /// Draw `count` vertices of the streaming buffer starting at `first`.
    fn draw_arrays(&mut self, mode: u32, first: i32, count: i32);

    // Sync objects.

    /// Insert a fence after all commands issued so far.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Allocation`] if the sync object cannot be
    /// created.
    fn fence_sync(&mut self) -> Result<Self::Fence, DriverError>;
    /// Wait up to `timeout_ns` for `fence`; returns one of
    /// [`gl::ALREADY_SIGNALED`], [`gl::CONDITION_SATISFIED`],
    /// [`gl::TIMEOUT_EXPIRED`] or [`gl::WAIT_FAILED`].
    fn client_wait_sync(&mut self, fence: Self::Fence, flags: u32, timeout_ns: i32) -> u32;
    fn delete_sync(&mut self, fence: Self::Fence);
}

/// A parsed `GL_VERSION` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlVersion {
    pub major: u32,
    pub minor: u32,
    pub release: u32,
    /// Whatever follows the numeric version, trimmed.
    pub vendor_specific: String,
}

/// An enum, level or unit number as the `GLint` some entry points take.
pub(crate) fn gl_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Parse a version string of the form `major.minor[.release] vendor text`.
///
/// Returns `None` if the string does not start with `major.minor`.
#[must_use]
pub fn parse_gl_version(version: &str) -> Option<GlVersion> {
    let version = version.trim_start();
    let numeric_len = version
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(version.len());
    let (numeric, rest) = version.split_at(numeric_len);
    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let release = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(GlVersion {
        major,
        minor,
        release,
        vendor_specific: rest.trim().to_owned(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_vendor_suffix() {
        let v = parse_gl_version("4.6.0 NVIDIA 535.104.05").unwrap();
        assert_eq!((v.major, v.minor, v.release), (4, 6, 0));
        assert_eq!(v.vendor_specific, "NVIDIA 535.104.05");
    }

    #[test]
    fn release_is_optional() {
        let v = parse_gl_version("3.3 (Core Profile) Mesa 23.1").unwrap();
        assert_eq!((v.major, v.minor, v.release), (3, 3, 0));
        assert_eq!(v.vendor_specific, "(Core Profile) Mesa 23.1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_gl_version("OpenGL ES").is_none());
        assert!(parse_gl_version("4").is_none());
    }
}

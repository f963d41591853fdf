//! Error types for the render core.
//!
//! Nothing here is fatal on its own. Callers that receive one of these are
//! expected to log, fall back to a placeholder resource and keep rendering.
//! Genuinely fatal conditions (cached state diverging from the driver) never
//! surface as a value; they go through
//! [`RenderContext::gl_fatal`](crate::RenderContext::gl_fatal).

use thiserror::Error;

/// Failures reported by a [`GlDriver`](crate::driver::GlDriver) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The driver could not allocate an object (texture, program, fence...).
    #[error("failed to allocate {object}: {reason}")]
    Allocation {
        /// Kind of object that was requested.
        object: &'static str,
        /// Driver-provided reason.
        reason: String,
    },
    /// A shader stage failed to compile.
    #[error("shader compile error: {0}")]
    Compile(String),
    /// A program failed to link.
    #[error("program link error: {0}")]
    Link(String),
    /// The backend cannot perform this operation.
    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
}

/// Failures from the texture object manager and texture units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextureError {
    /// GL is globally disabled (context lost or not yet created).
    #[error("cannot create a texture while GL is disabled")]
    GlDisabled,
    /// Width, height or component count cannot describe a texture.
    #[error("degenerate texture size {width}x{height}x{components}")]
    DegenerateSize {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Requested component count.
        components: u8,
    },
    /// The supplied pixel buffer is smaller than the image it should hold.
    #[error("pixel buffer holds {actual} bytes, {expected} required")]
    ShortBuffer {
        /// Bytes required for the upload.
        expected: usize,
        /// Bytes actually supplied.
        actual: usize,
    },
    /// The object has no GPU texture name.
    #[error("image has no GL texture")]
    NoTexture,
    /// A discard level outside the stored mip range was requested.
    #[error("discard level {requested} outside stored range {current}..={max}")]
    DiscardOutOfRange {
        /// Level asked for.
        requested: u32,
        /// Highest-resolution level stored on the GPU.
        current: u32,
        /// Lowest-resolution level the image supports.
        max: u32,
    },
    /// The driver reports a level width that disagrees with the tracked size.
    #[error("driver reports level width {driver}, expected {tracked}")]
    SizeMismatch {
        /// Width tracked by the image object.
        tracked: u32,
        /// Width returned by the driver.
        driver: u32,
    },
    /// Compressed storage cannot be read back without explicit consent.
    #[error("compressed texture readback not allowed")]
    CompressedReadback,
    /// A sub-image update falls outside the target or source image.
    #[error("sub-image {width}x{height} at ({x}, {y}) out of bounds")]
    SubImageBounds {
        /// Left edge.
        x: u32,
        /// Bottom edge.
        y: u32,
        /// Region width.
        width: u32,
        /// Region height.
        height: u32,
    },
    /// Compressed data cannot have its mip chain generated here.
    #[error("compressed image wants mipmaps but the data has none")]
    CompressedWithoutMips,
    /// Sub-image updates are not supported on mipmapped images.
    #[error("sub-image update on a mipmapped image")]
    SubImageMipmapped,
    /// The texture unit index does not exist.
    #[error("texture unit {0} out of range")]
    NoSuchUnit(usize),
    /// The driver raised an error code during the operation.
    #[error("GL error 0x{0:04x}")]
    Gl(u32),
    /// The backend failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Failures from the shader/uniform cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    /// Compilation or linking failed in the driver.
    #[error("shader `{name}`: {source}")]
    Build {
        /// Program name.
        name: String,
        /// Underlying driver failure.
        #[source]
        source: DriverError,
    },
    /// The shader handle does not refer to a loaded program.
    #[error("unknown shader handle {0}")]
    UnknownShader(usize),
}

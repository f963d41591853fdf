//! Pixel format tables.

use crate::driver::gl;

/// Internal format, pixel format and pixel type of a texture upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormat {
    /// Storage format requested from the driver (`RGBA8`, `LUMINANCE8`...).
    pub internal: u32,
    /// Client pixel format (`RGBA`, `LUMINANCE`, a compressed format...).
    pub primary: u32,
    /// Client component type, normally `UNSIGNED_BYTE`.
    pub ty: u32,
}

impl TextureFormat {
    /// Default format for `components` channels of unsigned bytes.
    ///
    /// One and two channel images use the luminance formats (fonts and
    /// masks); they are translated for core profiles at upload time.
    #[must_use]
    pub fn for_components(components: u8) -> Option<Self> {
        let (internal, primary) = match components {
            1 => (gl::LUMINANCE8, gl::LUMINANCE),
            2 => (gl::LUMINANCE8_ALPHA8, gl::LUMINANCE_ALPHA),
            3 => (gl::RGB8, gl::RGB),
            4 => (gl::RGBA8, gl::RGBA),
            _ => return None,
        };
        Some(Self {
            internal,
            primary,
            ty: gl::UNSIGNED_BYTE,
        })
    }

    /// Whether the primary format is block compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        is_compressed_format(self.primary)
    }
}

/// Whether `format` is one of the S3TC block formats.
#[must_use]
pub fn is_compressed_format(format: u32) -> bool {
    (gl::COMPRESSED_RGB_S3TC_DXT1..=gl::COMPRESSED_RGBA_S3TC_DXT5).contains(&format)
}

/// Bits per pixel of a client format, `None` for unknown formats.
#[must_use]
pub fn data_format_bits(format: u32) -> Option<u32> {
    Some(match format {
        gl::COMPRESSED_RGB_S3TC_DXT1 | gl::COMPRESSED_RGBA_S3TC_DXT1 => 4,
        gl::COMPRESSED_RGBA_S3TC_DXT3 | gl::COMPRESSED_RGBA_S3TC_DXT5 => 8,
        gl::LUMINANCE | gl::ALPHA | gl::RED => 8,
        gl::LUMINANCE_ALPHA | gl::RG => 16,
        gl::RGB | gl::RGB8 => 24,
        gl::RGBA | gl::BGRA => 32,
        _ => return None,
    })
}

/// Components per pixel of a client format, `None` for unknown formats.
#[must_use]
pub fn data_format_components(format: u32) -> Option<u8> {
    Some(match format {
        gl::COMPRESSED_RGB_S3TC_DXT1 | gl::COMPRESSED_RGBA_S3TC_DXT1 => 3,
        gl::COMPRESSED_RGBA_S3TC_DXT3 | gl::COMPRESSED_RGBA_S3TC_DXT5 => 4,
        gl::LUMINANCE | gl::ALPHA | gl::RED => 1,
        gl::LUMINANCE_ALPHA | gl::RG => 2,
        gl::RGB => 3,
        gl::RGBA | gl::BGRA => 4,
        _ => return None,
    })
}

/// Bytes needed for a `width`×`height` level, rounded up to 4 bytes.
///
/// Compressed formats pad each side to a full 4×4 block. Unknown formats
/// size to zero.
#[must_use]
pub fn data_format_bytes(format: u32, width: u32, height: u32) -> usize {
    let (width, height) = if is_compressed_format(format) {
        (width.max(4), height.max(4))
    } else {
        (width, height)
    };
    let bits = u64::from(data_format_bits(format).unwrap_or(0));
    let bytes = (u64::from(width) * u64::from(height) * bits).div_ceil(8);
    usize::try_from((bytes + 3) & !3).unwrap_or(usize::MAX)
}

/// Whether both sides are powers of two (zero counts as one).
#[must_use]
pub fn is_power_of_two_size(width: u32, height: u32) -> bool {
    let pot = |dim: u32| dim == 0 || dim.is_power_of_two();
    pot(width) && pot(height)
}

/// Byte offset of the alpha channel and pixel stride for `format`, or `None`
/// when the format has no analysable alpha.
#[must_use]
pub fn alpha_offset_and_stride(format: &TextureFormat) -> Option<(usize, usize)> {
    let stride = match format.primary {
        gl::LUMINANCE | gl::ALPHA => 1,
        gl::LUMINANCE_ALPHA => 2,
        gl::RGBA | gl::BGRA => 4,
        _ => return None,
    };
    let offset = match format.ty {
        gl::UNSIGNED_BYTE => stride - 1,
        _ if format.primary == gl::BGRA => return None,
        gl::UNSIGNED_INT_8_8_8_8 if cfg!(target_endian = "little") => 0,
        gl::UNSIGNED_INT_8_8_8_8 => 3,
        gl::UNSIGNED_INT_8_8_8_8_REV if cfg!(target_endian = "little") => 3,
        gl::UNSIGNED_INT_8_8_8_8_REV => 0,
        _ => return None,
    };
    Some((offset, stride))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_are_word_aligned() {
        assert_eq!(data_format_bytes(gl::RGBA, 4, 4), 64);
        assert_eq!(data_format_bytes(gl::RGB, 3, 1), 12);
        assert_eq!(data_format_bytes(gl::LUMINANCE, 1, 1), 4);
        assert_eq!(data_format_bytes(gl::LUMINANCE_ALPHA, 3, 3), 20);
    }

    #[test]
    fn compressed_sizes_pad_to_blocks() {
        assert_eq!(data_format_bytes(gl::COMPRESSED_RGBA_S3TC_DXT1, 1, 1), 8);
        assert_eq!(data_format_bytes(gl::COMPRESSED_RGBA_S3TC_DXT5, 2, 8), 32);
        assert!(is_compressed_format(gl::COMPRESSED_RGBA_S3TC_DXT3));
        assert!(!is_compressed_format(gl::RGBA));
    }

    #[test]
    fn component_defaults() {
        let one = TextureFormat::for_components(1).unwrap();
        assert_eq!(one.primary, gl::LUMINANCE);
        assert_eq!(
            TextureFormat::for_components(4).map(|f| f.internal),
            Some(gl::RGBA8)
        );
        assert!(TextureFormat::for_components(5).is_none());
        assert_eq!(data_format_components(gl::LUMINANCE_ALPHA), Some(2));
    }

    #[test]
    fn alpha_channel_location() {
        let rgba = TextureFormat::for_components(4);
        assert_eq!(rgba.as_ref().and_then(alpha_offset_and_stride), Some((3, 4)));
        let rgb = TextureFormat::for_components(3);
        assert_eq!(rgb.as_ref().and_then(alpha_offset_and_stride), None);
        let packed = TextureFormat {
            internal: gl::RGBA8,
            primary: gl::BGRA,
            ty: gl::UNSIGNED_INT_8_8_8_8_REV,
        };
        assert_eq!(alpha_offset_and_stride(&packed), None);
    }

    #[test]
    fn power_of_two_check() {
        assert!(is_power_of_two_size(256, 64));
        assert!(is_power_of_two_size(0, 1));
        assert!(!is_power_of_two_size(100, 64));
    }
}

//! Built-in GLSL sources and the reserved attribute and uniform tables.
//!
//! Shaders target GLSL 1.40 (OpenGL 3.1). Any program loaded through
//! [`RenderContext::load_shader`](crate::RenderContext::load_shader) gets
//! the reserved names below bound to fixed slots, so the renderer can feed
//! matrices and vertex streams without knowing which shader is current.

use bitflags::bitflags;

/// Vertex shader used for immediate-mode geometry.
///
/// # Attributes
///
/// | Name            | Type   | Slot |
/// |-----------------|--------|------|
/// | `position`      | `vec3` | 0    |
/// | `texcoord0`     | `vec2` | 2    |
/// | `diffuse_color` | `vec4` | 6    |
pub const IMMEDIATE_VERTEX_SRC: &str = r"#version 140

in vec3 position;
in vec4 diffuse_color;
in vec2 texcoord0;

uniform mat4 modelview_projection_matrix;
uniform mat4 texture_matrix0;

out vec4 vertex_color;
out vec2 vary_texcoord0;

void main() {
    gl_Position = modelview_projection_matrix * vec4(position, 1.0);
    vary_texcoord0 = (texture_matrix0 * vec4(texcoord0, 0.0, 1.0)).xy;
    vertex_color = diffuse_color;
}
";

/// Fragment shader used for immediate-mode geometry.
///
/// Modulates `diffuseMap` by the vertex color and discards fragments whose
/// alpha is below `minimum_alpha`, which stands in for the fixed-function
/// alpha test.
pub const IMMEDIATE_FRAGMENT_SRC: &str = r"#version 140

uniform sampler2D diffuseMap;
uniform float minimum_alpha;

in vec4 vertex_color;
in vec2 vary_texcoord0;

out vec4 frag_color;

void main() {
    vec4 color = texture(diffuseMap, vary_texcoord0) * vertex_color;
    if (color.a < minimum_alpha) {
        discard;
    }
    frag_color = color;
}
";

/// Attribute names bound to fixed slots, slot `i` holding entry `i`.
pub const RESERVED_ATTRIBUTES: &[&str] = &[
    "position",
    "normal",
    "texcoord0",
    "texcoord1",
    "texcoord2",
    "texcoord3",
    "diffuse_color",
    "emissive",
    "tangent",
    "weight",
    "weight4",
    "clothing",
    "texture_index",
];

bitflags! {
    /// Reserved attributes a linked program actually reads.
    ///
    /// Bit `i` corresponds to [`RESERVED_ATTRIBUTES`]`[i]`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttributeMask: u32 {
        const POSITION = 1 << 0;
        const NORMAL = 1 << 1;
        const TEXCOORD0 = 1 << 2;
        const TEXCOORD1 = 1 << 3;
        const TEXCOORD2 = 1 << 4;
        const TEXCOORD3 = 1 << 5;
        const COLOR = 1 << 6;
        const EMISSIVE = 1 << 7;
        const TANGENT = 1 << 8;
        const WEIGHT = 1 << 9;
        const WEIGHT4 = 1 << 10;
        const CLOTHING = 1 << 11;
        const TEXTURE_INDEX = 1 << 12;
    }
}

/// Dense indices of the reserved uniforms.
///
/// Custom uniforms passed to `load_shader` follow at
/// `RESERVED_UNIFORMS.len() + i`.
pub mod uniform {
    pub const MODELVIEW_MATRIX: usize = 0;
    pub const PROJECTION_MATRIX: usize = 1;
    pub const INVERSE_PROJECTION: usize = 2;
    pub const MODELVIEW_PROJECTION_MATRIX: usize = 3;
    pub const NORMAL_MATRIX: usize = 4;
    pub const TEXTURE_MATRIX0: usize = 5;
    pub const TEXTURE_MATRIX1: usize = 6;
    pub const TEXTURE_MATRIX2: usize = 7;
    pub const TEXTURE_MATRIX3: usize = 8;
    pub const OBJECT_PLANE_S: usize = 9;
    pub const OBJECT_PLANE_T: usize = 10;
    pub const DIFFUSE_COLOR: usize = 11;
    pub const MINIMUM_ALPHA: usize = 12;
    pub const DIFFUSE_MAP: usize = 13;
    pub const SPECULAR_MAP: usize = 14;
    pub const BUMP_MAP: usize = 15;
    pub const ENVIRONMENT_MAP: usize = 16;
}

/// Uniform names in [`uniform`] index order.
pub const RESERVED_UNIFORMS: &[&str] = &[
    "modelview_matrix",
    "projection_matrix",
    "inv_proj",
    "modelview_projection_matrix",
    "normal_matrix",
    "texture_matrix0",
    "texture_matrix1",
    "texture_matrix2",
    "texture_matrix3",
    "object_plane_s",
    "object_plane_t",
    "color",
    "minimum_alpha",
    "diffuseMap",
    "specularMap",
    "bumpMap",
    "environmentMap",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_line_up() {
        assert_eq!(RESERVED_UNIFORMS[uniform::MINIMUM_ALPHA], "minimum_alpha");
        assert_eq!(RESERVED_UNIFORMS[uniform::TEXTURE_MATRIX3], "texture_matrix3");
        assert_eq!(RESERVED_UNIFORMS.len(), uniform::ENVIRONMENT_MAP + 1);
        let color = RESERVED_ATTRIBUTES
            .iter()
            .position(|name| *name == "diffuse_color")
            .unwrap_or_default();
        assert_eq!(AttributeMask::from_bits_retain(1 << color), AttributeMask::COLOR);
    }
}

#![allow(clippy::unwrap_used)]

use llrender_core::{
    driver::{gl, HeadlessDriver},
    shaders::uniform,
    BlendType, CapabilityId, ImageObject, ImageRaw, Rect, RenderConfig, RenderContext, TextureType,
    Topology,
};

fn context() -> RenderContext<HeadlessDriver> {
    let _ = env_logger::builder().is_test(true).try_init();
    RenderContext::new(HeadlessDriver::new(), RenderConfig::default())
}

fn red_square(size: u32) -> ImageRaw {
    let texels = (size * size) as usize;
    ImageRaw::from_data(size, size, 4, [255, 0, 0, 255].repeat(texels)).unwrap()
}

#[test]
fn unbound_units_fall_back_to_white() {
    let mut ctx = context();
    let mut image = ImageObject::new(false);
    image.set_size(&mut ctx, 4, 4, 4, None);
    image
        .create_from_raw(&mut ctx, Some(0), &red_square(4), None, None)
        .unwrap();
    assert_eq!(image.get_bytes(Some(0)), 64);
    assert_eq!(image.get_width(Some(0)), 4);
    assert_eq!(image.get_height(Some(0)), 4);

    let name = image.tex_name();
    ctx.tex_unit(0).bind(&mut image, false).unwrap();
    assert_eq!(ctx.tex_unit_state(0).unwrap().current_texture(), name);
    assert_eq!(ctx.driver().bound_texture(0, gl::TEXTURE_2D), name);

    ctx.tex_unit(0).unbind(TextureType::Texture);
    let white = ctx.white_texture();
    assert_ne!(white, 0);
    assert_eq!(ctx.driver().bound_texture(0, gl::TEXTURE_2D), white);

    image.destroy_gl_texture(&mut ctx);
    assert_eq!(ctx.texture_memory().allocated_bytes(), 0);
}

#[test]
fn textured_quad_through_the_immediate_shader() {
    let mut ctx = context();
    let shader = ctx.load_immediate_shader().unwrap();
    let mut image = ImageObject::from_raw(&mut ctx, &red_square(8), false).unwrap();

    let mut immediate = ctx.shader(shader).unwrap();
    immediate.bind();
    assert_eq!(immediate.bind_texture(uniform::DIFFUSE_MAP, &mut image).unwrap(), Some(0));

    ctx.set_scene_blend_type(BlendType::Add);
    {
        let mut blend = ctx.enter_scope(CapabilityId::BLEND, true);
        blend.begin(Topology::TriangleStrip);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
            blend.tex_coord2f(x, y);
            blend.vertex2f(x, y);
        }
        blend.end();
        blend.flush();
        assert_eq!(blend.driver().blend_factors(), [gl::ONE, gl::ONE, gl::ONE, gl::ONE]);
    }

    let draws = ctx.driver().draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].mode, gl::TRIANGLE_STRIP);
    assert_eq!(draws[0].texture, image.tex_name());
    assert_eq!(draws[0].program, ctx.shader_state(shader).unwrap().program());
    assert_eq!(draws[0].vertices[3].texcoord, [1.0, 1.0]);
    assert!(!ctx.driver().cap_enabled(gl::BLEND));

    image.destroy_gl_texture(&mut ctx);
}

#[test]
fn clipped_ui_text_after_context_loss() {
    let mut ctx = context();
    let shader = ctx.load_immediate_shader().unwrap();
    ctx.destroy_gl();
    ctx.restore_gl().unwrap();
    ctx.shader(shader).unwrap().bind();

    ctx.push_ui_matrix();
    ctx.translate_ui(2.0, 2.0, 0.0);
    {
        let mut clipped = ctx.enter_clip_rect(Rect::from_xywh(0, 0, 64, 16));
        clipped.draw_glyph_quads(&[llrender_core::GlyphQuad {
            screen: [0.0, 8.0, 8.0, 0.0],
            uv: [0.0, 0.0, 1.0, 1.0],
            color: [0, 0, 0, 255],
        }]);
        clipped.flush();
        assert_eq!(clipped.driver().scissor_state(), [0, 0, 65, 17]);
    }
    ctx.pop_ui_matrix();

    let stats = ctx.render_stats();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.ui_vertices, 6);
    assert_eq!(ctx.driver().draws()[0].vertices[1].position, [2.0, 10.0, 0.0]);
    assert!(!ctx.is_enabled(CapabilityId::SCISSOR_TEST));
}

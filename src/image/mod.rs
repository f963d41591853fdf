//! Texture objects: CPU-side images and their GPU textures.
//!
//! [`ImageObject`] owns at most one GL texture name plus everything needed
//! to recreate it: logical size, format, mip policy, sampler options and the
//! pick mask. The texture itself can be destroyed and recreated any number
//! of times while the object lives.
//!
//! Objects do not hold a reference to the [`RenderContext`]; every operation
//! that touches the GPU borrows it. To survive a context loss, call
//! [`ImageObject::save_for_restore`] before
//! [`RenderContext::destroy_gl`] and [`ImageObject::restore_gl`] after
//! [`RenderContext::restore_gl`].
//!
//! ```
//! # use llrender_core::{driver::HeadlessDriver, ImageObject, ImageRaw, RenderConfig, RenderContext};
//! let mut ctx = RenderContext::new(HeadlessDriver::new(), RenderConfig::default());
//! let raw = ImageRaw::from_data(2, 2, 4, vec![255; 16]).unwrap();
//! let mut image = ImageObject::new(false);
//! image.create_from_raw(&mut ctx, Some(0), &raw, None, None).unwrap();
//! assert_eq!(image.get_bytes(Some(0)), 16);
//! image.destroy_gl_texture(&mut ctx);
//! ```

use log::{debug, error, info, warn};
use smallvec::SmallVec;

use crate::{
    config::AlphaMaskTuning,
    driver::{gl, gl_int, GlDriver},
    error::TextureError,
    tex_unit::{AddressMode, FilterOption, TextureType},
    types::Rect,
    RenderContext,
};

mod format;
mod mask;
mod memory;

pub use format::{
    alpha_offset_and_stride, data_format_bits, data_format_bytes, data_format_components,
    is_compressed_format, is_power_of_two_size, TextureFormat,
};
pub use mask::{analyze_alpha, AlphaAnalysis, PickMask};
pub use memory::{texture_counter_index, TextureMemory, MAX_TEXTURE_LOG_SIZE};

/// Deepest discard level tracked for an image.
pub const MAX_DISCARD_LEVEL: u32 = 5;

/// Decoded pixels in client memory, rows bottom to top, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRaw {
    width: u32,
    height: u32,
    components: u8,
    data: Vec<u8>,
}

impl ImageRaw {
    /// A zero-filled image.
    #[must_use]
    pub fn new(width: u32, height: u32, components: u8) -> Self {
        let len = width as usize * height as usize * usize::from(components);
        Self {
            width,
            height,
            components,
            data: vec![0; len],
        }
    }

    /// Wrap existing pixels.
    ///
    /// # Errors
    ///
    /// [`TextureError::DegenerateSize`] for zero sides or a component count
    /// outside 1..=4, [`TextureError::ShortBuffer`] if `data` is too small.
    pub fn from_data(
        width: u32,
        height: u32,
        components: u8,
        mut data: Vec<u8>,
    ) -> Result<Self, TextureError> {
        if width == 0 || height == 0 || !(1..=4).contains(&components) {
            return Err(TextureError::DegenerateSize {
                width,
                height,
                components,
            });
        }
        let expected = width as usize * height as usize * usize::from(components);
        if data.len() < expected {
            return Err(TextureError::ShortBuffer {
                expected,
                actual: data.len(),
            });
        }
        data.truncate(expected);
        Ok(Self {
            width,
            height,
            components,
            data,
        })
    }

    /// Convert a decoded image, keeping luminance and luminance-alpha
    /// images at one and two components.
    #[must_use]
    pub fn from_dynamic(image: &image::DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (components, data) = match image.color() {
            image::ColorType::L8 => (1, image.to_luma8().into_raw()),
            image::ColorType::La8 => (2, image.to_luma_alpha8().into_raw()),
            image::ColorType::Rgb8 => (3, image.to_rgb8().into_raw()),
            _ => (4, image.to_rgba8().into_raw()),
        };
        Self {
            width,
            height,
            components,
            data,
        }
    }

    /// Decode an encoded image (PNG, JPEG).
    #[must_use]
    pub fn load_from_memory(bytes: &[u8]) -> Option<Self> {
        let image = image::load_from_memory(bytes).ok()?;
        Some(Self::from_dynamic(&image))
    }

    /// Expand to RGBA for export.
    #[must_use]
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for pixel in self.data.chunks_exact(usize::from(self.components)) {
            let expanded = match *pixel {
                [l] => [l, l, l, 255],
                [l, a] => [l, l, l, a],
                [r, g, b] => [r, g, b, 255],
                [r, g, b, a] => [r, g, b, a],
                _ => return None,
            };
            rgba.extend_from_slice(&expanded);
        }
        image::RgbaImage::from_raw(self.width, self.height, rgba)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn components(&self) -> u8 {
        self.components
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Average 2×2 blocks of a `2*width`×`2*height` level into a
/// `width`×`height` one.
fn generate_mip(src: &[u8], width: u32, height: u32, components: usize) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let src_w = w * 2;
    let mut out = vec![0u8; w * h * components];
    let at = |x: usize, y: usize, c: usize| {
        src.get((y * src_w + x) * components + c)
            .copied()
            .map_or(0, u32::from)
    };
    for y in 0..h {
        for x in 0..w {
            for c in 0..components {
                let sum = at(2 * x, 2 * y, c)
                    + at(2 * x + 1, 2 * y, c)
                    + at(2 * x, 2 * y + 1, c)
                    + at(2 * x + 1, 2 * y + 1, c);
                out[(y * w + x) * components + c] = u8::try_from(sum >> 2).unwrap_or(u8::MAX);
            }
        }
    }
    out
}

/// A texture in client and GPU memory.
#[derive(Debug)]
pub struct ImageObject {
    tex_name: u32,
    width: u32,
    height: u32,
    components: u8,
    current_discard: Option<u32>,
    max_discard: u32,

    use_mipmaps: bool,
    has_mipmaps: bool,
    auto_gen_mips: bool,
    mip_levels: Option<u32>,
    format: TextureFormat,
    has_explicit_format: bool,
    upload_format: u32,
    is_compressed: bool,
    gl_texture_created: bool,
    bind_target: TextureType,

    address_mode: AddressMode,
    filter_option: FilterOption,
    tex_options_dirty: bool,

    needs_alpha_and_pick_mask: bool,
    alpha_channel: Option<(usize, usize)>,
    alpha: AlphaAnalysis,
    pick_mask: Option<PickMask>,

    texture_memory: u64,
    category: Option<usize>,
    allocation: Option<(u64, Option<usize>)>,
    last_bind_frame: u64,
    save_data: Option<(ImageRaw, u32)>,
}

impl ImageObject {
    /// An empty object; nothing is allocated until the first upload.
    #[must_use]
    pub fn new(use_mipmaps: bool) -> Self {
        Self {
            tex_name: 0,
            width: 0,
            height: 0,
            components: 0,
            current_discard: None,
            max_discard: MAX_DISCARD_LEVEL,
            use_mipmaps,
            has_mipmaps: false,
            auto_gen_mips: false,
            mip_levels: None,
            format: TextureFormat {
                internal: 0,
                primary: 0,
                ty: gl::UNSIGNED_BYTE,
            },
            has_explicit_format: false,
            upload_format: 0,
            is_compressed: false,
            gl_texture_created: false,
            bind_target: TextureType::Texture,
            address_mode: AddressMode::Wrap,
            filter_option: FilterOption::Anisotropic,
            tex_options_dirty: true,
            needs_alpha_and_pick_mask: false,
            alpha_channel: None,
            alpha: AlphaAnalysis::default(),
            pick_mask: None,
            texture_memory: 0,
            category: None,
            allocation: None,
            last_bind_frame: 0,
            save_data: None,
        }
    }

    /// An empty object with a logical size.
    #[must_use]
    pub fn with_size(width: u32, height: u32, components: u8, use_mipmaps: bool) -> Self {
        let mut image = Self::new(use_mipmaps);
        image.resize(width, height, components, None);
        image
    }

    /// Create an object and upload `raw` at discard level 0.
    ///
    /// # Errors
    ///
    /// See [`create_from_raw`](Self::create_from_raw).
    pub fn from_raw<D: GlDriver>(
        ctx: &mut RenderContext<D>,
        raw: &ImageRaw,
        use_mipmaps: bool,
    ) -> Result<Self, TextureError> {
        let mut image = Self::new(use_mipmaps);
        image.create_from_raw(ctx, Some(0), raw, None, None)?;
        Ok(image)
    }

    fn size_differs(&self, width: u32, height: u32, components: u8) -> bool {
        width != self.width || height != self.height || components != self.components
    }

    fn resize(&mut self, width: u32, height: u32, components: u8, discard_level: Option<u32>) {
        if !self.size_differs(width, height, components) {
            return;
        }
        if !is_power_of_two_size(width, height) {
            warn!(target: "ImageGL", "texture has non power of two dimension: {width}x{height}");
        }
        self.pick_mask = None;
        self.width = width;
        self.height = height;
        self.components = components;
        if components > 0 {
            let (mut w, mut h) = (width, height);
            self.max_discard = 0;
            while w > 1 && h > 1 && self.max_discard < MAX_DISCARD_LEVEL {
                self.max_discard += 1;
                w >>= 1;
                h >>= 1;
            }
            if let Some(discard) = discard_level.filter(|&d| d > 0) {
                self.max_discard = self.max_discard.max(discard);
            }
        } else {
            self.max_discard = MAX_DISCARD_LEVEL;
        }
    }

    /// Redefine the logical size. A different size or component count
    /// destroys the GPU texture, since its storage shape is fixed.
    pub fn set_size<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        width: u32,
        height: u32,
        components: u8,
        discard_level: Option<u32>,
    ) {
        if self.size_differs(width, height, components) && self.tex_name != 0 {
            self.destroy_gl_texture(ctx);
        }
        self.resize(width, height, components, discard_level);
    }

    /// Use a specific format instead of the one implied by the component
    /// count. Must be called before the texture is created.
    pub fn set_explicit_format(&mut self, internal: u32, primary: u32, ty: Option<u32>) {
        self.has_explicit_format = true;
        self.format = TextureFormat {
            internal,
            primary,
            ty: ty.unwrap_or(gl::UNSIGNED_BYTE),
        };
        self.calc_alpha_channel_offset_and_stride();
    }

    /// Request alpha classification and a pick mask on upload.
    pub fn set_needs_alpha_and_pick_mask(&mut self, needs: bool) {
        if self.needs_alpha_and_pick_mask == needs {
            return;
        }
        self.needs_alpha_and_pick_mask = needs;
        if needs {
            self.calc_alpha_channel_offset_and_stride();
        } else {
            self.alpha_channel = None;
        }
    }

    fn calc_alpha_channel_offset_and_stride(&mut self) {
        if !self.needs_alpha_and_pick_mask {
            return;
        }
        self.alpha_channel = alpha_offset_and_stride(&self.format);
        if self.alpha_channel.is_none() {
            if self.format.primary != gl::RGB && self.format.primary != 0 {
                warn!(
                    target: "ImageGL",
                    "cannot analyze alpha for image with format {:#x} type {:#x}",
                    self.format.primary,
                    self.format.ty
                );
            }
            if self.format.primary != 0 {
                self.needs_alpha_and_pick_mask = false;
            }
        }
    }

    /// Allocate a bare texture name with no storage. Its contents are
    /// supplied by the caller through the driver.
    ///
    /// # Errors
    ///
    /// [`TextureError::GlDisabled`] while GL is disabled, or the driver's
    /// allocation failure.
    pub fn create_gl_texture<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
    ) -> Result<(), TextureError> {
        if ctx.gl_disabled {
            warn!(target: "ImageGL", "trying to create a texture while GL is disabled");
            return Err(TextureError::GlDisabled);
        }
        self.gl_texture_created = false;
        if self.tex_name != 0 {
            self.destroy_gl_texture(ctx);
        }
        self.tex_name = ctx.driver.create_texture().inspect_err(|err| {
            warn!(target: "ImageGL", "failed to make an empty texture: {err}");
        })?;
        Ok(())
    }

    /// Upload `raw` as discard level `discard_level` (or the current one).
    ///
    /// The logical size becomes `raw`'s size scaled up by the discard
    /// level. `reuse_name` adopts an existing texture name instead of
    /// allocating one.
    ///
    /// # Errors
    ///
    /// [`TextureError::GlDisabled`], [`TextureError::DegenerateSize`] for an
    /// unsupported component count, or any upload failure.
    pub fn create_from_raw<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        discard_level: Option<u32>,
        raw: &ImageRaw,
        reuse_name: Option<u32>,
        category: Option<usize>,
    ) -> Result<(), TextureError> {
        if ctx.gl_disabled {
            warn!(target: "ImageGL", "trying to create a texture while GL is disabled");
            return Err(TextureError::GlDisabled);
        }
        self.gl_texture_created = false;

        let discard = discard_level
            .or(self.current_discard)
            .unwrap_or(0)
            .min(self.max_discard);
        let width = raw.width() << discard;
        let height = raw.height() << discard;
        self.set_size(ctx, width, height, raw.components(), Some(discard));

        if !self.has_explicit_format {
            let Some(format) = TextureFormat::for_components(self.components) else {
                debug!(target: "ImageGL", "bad number of components for texture: {}", self.components);
                self.destroy_gl_texture(ctx);
                return Err(TextureError::DegenerateSize {
                    width,
                    height,
                    components: self.components,
                });
            };
            self.format = format;
            self.calc_alpha_channel_offset_and_stride();
        }

        self.set_category(ctx, category);
        self.create_from_data(ctx, Some(discard), raw.data(), false, reuse_name)
    }

    /// Upload client data as discard level `discard_level`.
    ///
    /// With `data_has_mips`, `data` holds the whole chain from the smallest
    /// level up to `discard_level`, each level padded to
    /// [`data_format_bytes`], the largest level last.
    ///
    /// # Errors
    ///
    /// [`TextureError::DegenerateSize`] before a size is set,
    /// [`TextureError::ShortBuffer`] if `data` cannot hold the levels, or a
    /// driver failure.
    pub fn create_from_data<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        discard_level: Option<u32>,
        data: &[u8],
        data_has_mips: bool,
        reuse_name: Option<u32>,
    ) -> Result<(), TextureError> {
        if self.width == 0 || self.height == 0 || self.components == 0 {
            return Err(TextureError::DegenerateSize {
                width: self.width,
                height: self.height,
                components: self.components,
            });
        }
        let discard = discard_level
            .or(self.current_discard)
            .unwrap_or(0)
            .min(self.max_discard);

        if self.tex_name != 0 && self.current_discard == Some(discard) {
            return self.set_image(ctx, data, data_has_mips);
        }
        self.check_data_len(discard, data.len(), data_has_mips)?;
        if self.tex_name != 0 {
            self.destroy_gl_texture(ctx);
        }

        let target = self.bind_target.gl_target();
        let max_level = gl_int(self.max_discard - discard);
        if let Some(name) = reuse_name.filter(|&name| name != 0) {
            self.tex_name = name;
        } else {
            self.tex_name = ctx.driver.create_texture().inspect_err(|err| {
                warn!(target: "ImageGL", "failed to make texture: {err}");
            })?;
            ctx.tex_unit(0).bind(self, false)?;
            ctx.driver.tex_parameter_i32(target, gl::TEXTURE_BASE_LEVEL, 0);
            ctx.driver.tex_parameter_i32(target, gl::TEXTURE_MAX_LEVEL, max_level);
        }

        if self.use_mipmaps {
            let blacklisted = ctx.config.mipmap_blacklisted
                && self.format.internal == gl::ALPHA8
                && self.format.primary == gl::ALPHA;
            self.auto_gen_mips = ctx.config.auto_mipmap && !blacklisted;
        }
        self.current_discard = Some(discard);

        if let Err(err) = self.set_image(ctx, data, data_has_mips) {
            self.destroy_gl_texture(ctx);
            return Err(err);
        }
        ctx.driver.tex_parameter_i32(target, gl::TEXTURE_MAX_LEVEL, max_level);

        {
            let mut unit = ctx.tex_unit(0);
            unit.set_has_mipmaps(self.has_mipmaps);
            unit.set_texture_address_mode(self.address_mode);
            unit.set_texture_filtering_option(self.filter_option);
            unit.unbind(self.bind_target);
        }

        self.texture_memory = self.get_mip_bytes(Some(discard)) as u64;
        ctx.memory.allocate(self.texture_memory, self.category);
        self.allocation = Some((self.texture_memory, self.category));
        self.last_bind_frame = ctx.memory.frame();
        Ok(())
    }

    fn level_upload_bytes(&self, width: u32, height: u32) -> usize {
        if self.format.is_compressed() {
            data_format_bytes(self.format.primary, width, height)
        } else {
            let bits = u64::from(data_format_bits(self.format.primary).unwrap_or(0));
            let bytes = (u64::from(width) * u64::from(height) * bits).div_ceil(8);
            usize::try_from(bytes).unwrap_or(usize::MAX)
        }
    }

    /// Bytes of a packed chain from `discard` down to the smallest level.
    fn chain_bytes(&self, discard: u32) -> usize {
        (discard..=self.max_discard)
            .map(|d| data_format_bytes(self.format.primary, self.get_width(Some(d)), self.get_height(Some(d))))
            .sum()
    }

    fn check_data_len(&self, discard: u32, len: usize, has_mips: bool) -> Result<(), TextureError> {
        let expected = if has_mips && self.use_mipmaps {
            self.chain_bytes(discard)
        } else {
            self.level_upload_bytes(self.get_width(Some(discard)), self.get_height(Some(discard)))
        };
        if len < expected {
            warn!(target: "ImageGL", "pixel buffer holds {len} bytes, {expected} required");
            return Err(TextureError::ShortBuffer {
                expected,
                actual: len,
            });
        }
        Ok(())
    }

    fn upload_level<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        level: i32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) {
        let target = self.bind_target.gl_target();
        if self.format.is_compressed() {
            ctx.driver
                .compressed_tex_image_2d(target, level, self.format.primary, width, height, pixels);
            self.is_compressed = true;
            return;
        }
        let mut internal = self.format.internal;
        let mut format = self.format.primary;
        if ctx.config.core_profile {
            let (red, green) = (gl_int(gl::RED), gl_int(gl::GREEN));
            let (zero, one) = (gl_int(gl::ZERO), gl_int(gl::ONE));
            let swizzle = match format {
                gl::ALPHA => Some(([zero, zero, zero, red], gl::RED, gl::R8)),
                gl::LUMINANCE => Some(([red, red, red, one], gl::RED, gl::R8)),
                gl::LUMINANCE_ALPHA => Some(([red, red, red, green], gl::RG, gl::RG8)),
                _ => None,
            };
            if let Some((mask, core_format, core_internal)) = swizzle {
                ctx.driver
                    .tex_parameter_i32_slice(target, gl::TEXTURE_SWIZZLE_RGBA, &mask);
                format = core_format;
                internal = core_internal;
            }
        }
        self.upload_format = format;
        self.is_compressed = false;
        ctx.driver.tex_image_2d(
            target,
            level,
            internal,
            width,
            height,
            format,
            self.format.ty,
            Some(pixels),
        );
    }

    /// Replace the texture contents at the current discard level.
    ///
    /// # Errors
    ///
    /// [`TextureError::ShortBuffer`] if `data` is too small,
    /// [`TextureError::CompressedWithoutMips`] when a mipmapped compressed
    /// image is given a single level, or a bind failure.
    pub fn set_image<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        data: &[u8],
        data_has_mips: bool,
    ) -> Result<(), TextureError> {
        let current = self.current_discard.unwrap_or(0);
        self.check_data_len(current, data.len(), data_has_mips)?;
        let compressed = self.format.is_compressed();
        if self.use_mipmaps && !data_has_mips && compressed {
            error!(target: "ImageGL", "compressed image has mipmaps but data does not");
            return Err(TextureError::CompressedWithoutMips);
        }

        if self.use_mipmaps {
            // mipmap state must be set before the bind applies sampler options
            ctx.tex_unit(0).unbind(self.bind_target);
            self.has_mipmaps = true;
            self.tex_options_dirty = true;
            self.set_filtering_option(ctx, FilterOption::Anisotropic);
        } else {
            self.has_mipmaps = false;
        }
        ctx.tex_unit(0).bind(self, false)?;
        self.is_compressed = false;

        let tuning = ctx.config.alpha_tuning;
        if !self.use_mipmaps {
            self.mip_levels = Some(0);
            let (w, h) = (self.get_width(None), self.get_height(None));
            self.upload_level(ctx, 0, w, h, data);
            if !compressed {
                self.analyze_alpha(data, w, h, &tuning);
                self.update_pick_mask(w, h, data, &tuning);
            }
        } else if data_has_mips {
            // trailing bytes past the chain are ignored
            let mut start = self.chain_bytes(current);
            for d in current..=self.max_discard {
                let (w, h) = (self.get_width(Some(d)), self.get_height(Some(d)));
                let gl_level = d - current;
                self.mip_levels = Some(self.mip_levels.map_or(gl_level, |l| l.max(gl_level)));
                let size = data_format_bytes(self.format.primary, w, h);
                start -= size;
                let level_data = &data[start..start + size];
                self.upload_level(ctx, gl_int(gl_level), w, h, level_data);
                if !compressed {
                    if gl_level == 0 {
                        self.analyze_alpha(level_data, w, h, &tuning);
                    }
                    self.update_pick_mask(w, h, level_data, &tuning);
                }
            }
        } else if self.auto_gen_mips {
            let (w, h) = (self.get_width(None), self.get_height(None));
            self.mip_levels = Some(w.max(h).max(1).ilog2());
            let target = self.bind_target.gl_target();
            if !ctx.config.core_profile {
                ctx.driver.tex_parameter_i32(target, gl::GENERATE_MIPMAP, 1);
            }
            self.upload_level(ctx, 0, w, h, data);
            self.analyze_alpha(data, w, h, &tuning);
            self.update_pick_mask(w, h, data, &tuning);
            if ctx.config.core_profile {
                ctx.driver.generate_mipmap(target);
            }
        } else {
            let (w, h) = (self.get_width(None), self.get_height(None));
            let levels = self.max_discard - current + 1;
            self.mip_levels = Some(levels - 1);
            let components = usize::from(self.components);

            let mut chain: SmallVec<[(u32, u32, Vec<u8>); MAX_DISCARD_LEVEL as usize]> = SmallVec::new();
            let (mut mw, mut mh) = (w, h);
            for _ in 1..levels {
                let previous = chain.last().map_or(data, |(_, _, pixels)| pixels.as_slice());
                mw = (mw >> 1).max(1);
                mh = (mh >> 1).max(1);
                let next = generate_mip(previous, mw, mh, components);
                chain.push((mw, mh, next));
            }

            self.upload_level(ctx, 0, w, h, data);
            self.analyze_alpha(data, w, h, &tuning);
            self.update_pick_mask(w, h, data, &tuning);
            for (level, (mw, mh, pixels)) in chain.iter().enumerate() {
                let gl_level = i32::try_from(level + 1).unwrap_or(i32::MAX);
                self.upload_level(ctx, gl_level, *mw, *mh, pixels);
            }
        }

        self.gl_texture_created = true;
        Ok(())
    }

    /// Overwrite a region of level 0 with the same region of `src`.
    ///
    /// A full-size update without `force_fast_update` goes through
    /// [`set_image`](Self::set_image) instead.
    ///
    /// # Errors
    ///
    /// [`TextureError::NoTexture`] without a texture,
    /// [`TextureError::SubImageMipmapped`] on mipmapped images and
    /// [`TextureError::SubImageBounds`] when the region is outside either
    /// image.
    pub fn set_sub_image<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        src: &ImageRaw,
        region: Rect,
        force_fast_update: bool,
    ) -> Result<(), TextureError> {
        let bounds_error = TextureError::SubImageBounds {
            x: region.left.max(0).unsigned_abs(),
            y: region.bottom.max(0).unsigned_abs(),
            width: region.width().max(0).unsigned_abs(),
            height: region.height().max(0).unsigned_abs(),
        };
        if region.width() <= 0 || region.height() <= 0 {
            return Ok(());
        }
        if self.tex_name == 0 {
            return Err(TextureError::NoTexture);
        }
        let (Ok(x), Ok(y)) = (u32::try_from(region.left), u32::try_from(region.bottom)) else {
            return Err(bounds_error);
        };
        let (width, height) = (region.width().unsigned_abs(), region.height().unsigned_abs());

        if !force_fast_update
            && x == 0
            && y == 0
            && width == self.get_width(None)
            && height == self.get_height(None)
            && src.width() == width
            && src.height() == height
        {
            return self.set_image(ctx, src.data(), false);
        }

        if self.use_mipmaps {
            self.dump();
            warn!(target: "ImageGL", "set_sub_image called on a mipmapped image");
            return Err(TextureError::SubImageMipmapped);
        }
        if self.current_discard != Some(0) {
            return Err(TextureError::DiscardOutOfRange {
                requested: 0,
                current: self.current_discard.unwrap_or(0),
                max: self.max_discard,
            });
        }
        if x + width > self.get_width(None) || y + height > self.get_height(None) {
            warn!(target: "ImageGL", "sub-image not wholly in target image");
            return Err(bounds_error);
        }
        if x + width > src.width() || y + height > src.height() {
            warn!(target: "ImageGL", "sub-image not wholly in source image");
            return Err(bounds_error);
        }

        let components = usize::from(src.components());
        let row_len = width as usize * components;
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in y..y + height {
            let start = (row as usize * src.width() as usize + x as usize) * components;
            pixels.extend_from_slice(&src.data()[start..start + row_len]);
        }

        let target = self.bind_target.gl_target();
        ctx.tex_unit(0)
            .bind_manual(self.bind_target, self.tex_name, self.has_mipmaps);
        let format = if self.upload_format == 0 {
            self.format.primary
        } else {
            self.upload_format
        };
        ctx.driver
            .tex_sub_image_2d(target, 0, x, y, width, height, format, self.format.ty, &pixels);
        ctx.tex_unit(0).disable();
        self.gl_texture_created = true;
        Ok(())
    }

    /// Copy a level of the GPU texture back into client memory.
    ///
    /// # Errors
    ///
    /// [`TextureError::NoTexture`], [`TextureError::DiscardOutOfRange`] if
    /// the level isn't stored, [`TextureError::SizeMismatch`] if the driver
    /// disagrees with the tracked size, [`TextureError::CompressedReadback`]
    /// for compressed storage without `compressed_ok`, or
    /// [`TextureError::Gl`] if the driver raised an error.
    pub fn read_back_raw<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        discard_level: Option<u32>,
        compressed_ok: bool,
    ) -> Result<ImageRaw, TextureError> {
        let Some(current) = self.current_discard else {
            return Err(TextureError::NoTexture);
        };
        if self.tex_name == 0 {
            return Err(TextureError::NoTexture);
        }
        let discard = discard_level.unwrap_or(current);
        let out_of_range = TextureError::DiscardOutOfRange {
            requested: discard,
            current,
            max: self.max_discard,
        };
        if discard < current || discard > self.max_discard {
            return Err(out_of_range);
        }
        let gl_discard = gl_int(discard - current);

        ctx.tex_unit(0).unbind(self.bind_target);
        ctx.tex_unit(0)
            .bind_manual(self.bind_target, self.tex_name, self.has_mipmaps);
        let target = self.bind_target.gl_target();

        let gl_width = ctx
            .driver
            .get_tex_level_parameter_i32(target, gl_discard, gl::TEXTURE_WIDTH);
        if gl_width == 0 {
            // no mip data at this level
            return Err(out_of_range);
        }
        let width = self.get_width(Some(discard));
        let height = self.get_height(Some(discard));
        if self.components == 0 {
            return Err(TextureError::DegenerateSize {
                width,
                height,
                components: 0,
            });
        }
        let gl_width = u32::try_from(gl_width).unwrap_or(0);
        if width < gl_width {
            warn!(
                target: "ImageGL",
                "texture size is smaller than it should be: width {width} gl width {gl_width} discard {discard}"
            );
            return Err(TextureError::SizeMismatch {
                tracked: width,
                driver: gl_width,
            });
        }

        loop {
            let code = ctx.driver.get_error();
            if code == gl::NO_ERROR {
                break;
            }
            warn!(target: "ImageGL", "GL error before reading back texture: {code:#06x}");
        }

        let data = if self.is_compressed {
            if !compressed_ok {
                return Err(TextureError::CompressedReadback);
            }
            let size = ctx.driver.get_tex_level_parameter_i32(
                target,
                gl_discard,
                gl::TEXTURE_COMPRESSED_IMAGE_SIZE,
            );
            let mut data = vec![0u8; usize::try_from(size).unwrap_or(0)];
            ctx.driver
                .get_compressed_tex_image(target, gl_discard, &mut data)?;
            data
        } else {
            let format = if self.upload_format == 0 {
                self.format.primary
            } else {
                self.upload_format
            };
            let mut data = vec![0u8; self.level_upload_bytes(width, height)];
            ctx.driver
                .get_tex_image(target, gl_discard, format, self.format.ty, &mut data);
            data
        };

        let code = ctx.driver.get_error();
        if code != gl::NO_ERROR {
            warn!(target: "ImageGL", "GL error after reading back texture: {code:#06x}");
            ctx.clear_gl_errors();
            return Err(TextureError::Gl(code));
        }

        Ok(ImageRaw {
            width,
            height,
            components: self.components,
            data,
        })
    }

    /// Delete the GPU texture and release its memory accounting.
    pub fn destroy_gl_texture<D: GlDriver>(&mut self, ctx: &mut RenderContext<D>) {
        if self.tex_name == 0 {
            return;
        }
        if let Some((bytes, category)) = self.allocation.take() {
            ctx.memory.release(bytes, category);
        }
        // deleting a bound texture reverts those bindings to zero
        for unit in &mut ctx.units {
            unit.forget_texture(self.tex_name);
        }
        ctx.driver.delete_texture(self.tex_name);
        self.tex_name = 0;
        self.current_discard = None;
        self.gl_texture_created = false;
    }

    /// Destroy the texture if there is one, and forget the discard level
    /// either way.
    pub fn force_to_invalidate_gl_texture<D: GlDriver>(&mut self, ctx: &mut RenderContext<D>) {
        if self.tex_name != 0 {
            self.destroy_gl_texture(ctx);
        } else {
            self.current_discard = None;
        }
    }

    /// Read the texture back and destroy it, keeping the pixels for
    /// [`restore_gl`](Self::restore_gl). Returns whether data was saved.
    pub fn save_for_restore<D: GlDriver>(&mut self, ctx: &mut RenderContext<D>) -> bool {
        self.save_data = None;
        if self.tex_name != 0 && self.gl_texture_created && self.components != 0 {
            if let Some(current) = self.current_discard {
                match self.read_back_raw(ctx, None, false) {
                    Ok(raw) => {
                        self.save_data = Some((raw, current));
                        self.destroy_gl_texture(ctx);
                        return true;
                    }
                    Err(err) => debug!(target: "ImageGL", "not saving texture {}: {err}", self.tex_name),
                }
            }
        }
        self.force_to_invalidate_gl_texture(ctx);
        false
    }

    /// Recreate the texture from data saved by
    /// [`save_for_restore`](Self::save_for_restore). Returns whether a
    /// texture was recreated.
    pub fn restore_gl<D: GlDriver>(&mut self, ctx: &mut RenderContext<D>) -> bool {
        if self.tex_name != 0 {
            error!(target: "ImageGL", "restoring image that still has texture {}", self.tex_name);
            self.destroy_gl_texture(ctx);
        }
        if let Some((data, discard)) = self.save_data.take() {
            let category = self.category;
            if self.components != 0
                && data.components() != 0
                && self
                    .create_from_raw(ctx, Some(discard), &data, None, category)
                    .is_ok()
            {
                return true;
            }
        }
        self.force_to_invalidate_gl_texture(ctx);
        false
    }

    /// Mark address and filter options for re-application on next bind.
    pub fn dirty_tex_options(&mut self) {
        self.tex_options_dirty = true;
    }

    pub(crate) fn take_dirty_options(&mut self) -> bool {
        std::mem::take(&mut self.tex_options_dirty)
    }

    pub(crate) fn record_bind(&mut self, memory: &mut TextureMemory) -> bool {
        memory.record_bind(&mut self.last_bind_frame, self.texture_memory)
    }

    fn bound_on_current_unit<D: GlDriver>(&self, ctx: &RenderContext<D>) -> bool {
        self.tex_name != 0
            && ctx
                .tex_unit_state(ctx.current_tex_unit_index())
                .is_some_and(|unit| unit.current_texture() == self.tex_name)
    }

    /// Set the wrap mode, applying it now if the texture is bound to the
    /// active unit and deferring it to the next bind otherwise.
    pub fn set_address_mode<D: GlDriver>(&mut self, ctx: &mut RenderContext<D>, mode: AddressMode) {
        if self.address_mode != mode {
            self.tex_options_dirty = true;
            self.address_mode = mode;
        }
        if self.bound_on_current_unit(ctx) {
            let unit = ctx.current_tex_unit_index();
            ctx.tex_unit(unit).set_texture_address_mode(mode);
            self.tex_options_dirty = false;
        }
    }

    /// Set the filter option, applied now or on next bind like
    /// [`set_address_mode`](Self::set_address_mode).
    pub fn set_filtering_option<D: GlDriver>(
        &mut self,
        ctx: &mut RenderContext<D>,
        option: FilterOption,
    ) {
        if self.filter_option != option {
            self.tex_options_dirty = true;
            self.filter_option = option;
        }
        if self.bound_on_current_unit(ctx) {
            let unit = ctx.current_tex_unit_index();
            ctx.tex_unit(unit).set_texture_filtering_option(option);
            self.tex_options_dirty = false;
        }
    }

    /// Move this texture's memory to another accounting category.
    pub fn set_category<D: GlDriver>(&mut self, ctx: &mut RenderContext<D>, category: Option<usize>) {
        if self.category == category {
            return;
        }
        if let Some((bytes, old)) = self.allocation {
            ctx.memory.move_category(bytes, old, category);
            self.allocation = Some((bytes, category));
        }
        self.category = category;
    }

    fn analyze_alpha(&mut self, data: &[u8], width: u32, height: u32, tuning: &AlphaMaskTuning) {
        if !self.needs_alpha_and_pick_mask {
            return;
        }
        if let Some((offset, stride)) = self.alpha_channel {
            self.alpha = analyze_alpha(data, width, height, offset, stride, tuning);
        }
    }

    fn update_pick_mask(&mut self, width: u32, height: u32, data: &[u8], tuning: &AlphaMaskTuning) {
        if !self.needs_alpha_and_pick_mask {
            return;
        }
        self.pick_mask = None;
        if self.format.ty != gl::UNSIGNED_BYTE || self.format.primary != gl::RGBA {
            return;
        }
        self.pick_mask = Some(PickMask::build(width, height, data, tuning.pick_alpha_threshold));
    }

    /// Hit test texture coordinate `(u, v)` against the pick mask. Without
    /// a mask every point hits.
    #[must_use]
    pub fn get_mask(&self, u: f32, v: f32) -> bool {
        self.pick_mask.as_ref().is_none_or(|mask| mask.contains(u, v))
    }

    /// Width at `discard_level` (default: the current level), at least 1.
    #[must_use]
    pub fn get_width(&self, discard_level: Option<u32>) -> u32 {
        let discard = discard_level.or(self.current_discard).unwrap_or(0);
        self.width.checked_shr(discard).unwrap_or(0).max(1)
    }

    /// Height at `discard_level` (default: the current level), at least 1.
    #[must_use]
    pub fn get_height(&self, discard_level: Option<u32>) -> u32 {
        let discard = discard_level.or(self.current_discard).unwrap_or(0);
        self.height.checked_shr(discard).unwrap_or(0).max(1)
    }

    /// Storage of one level.
    #[must_use]
    pub fn get_bytes(&self, discard_level: Option<u32>) -> usize {
        data_format_bytes(
            self.format.primary,
            self.get_width(discard_level),
            self.get_height(discard_level),
        )
    }

    /// Storage of a level and, with mipmaps, every smaller level.
    #[must_use]
    pub fn get_mip_bytes(&self, discard_level: Option<u32>) -> usize {
        let discard = discard_level.or(self.current_discard).unwrap_or(0);
        let mut w = self.width.checked_shr(discard).unwrap_or(0);
        let mut h = self.height.checked_shr(discard).unwrap_or(0);
        let mut bytes = data_format_bytes(self.format.primary, w, h);
        if self.use_mipmaps {
            while w > 1 && h > 1 {
                w = (w >> 1).max(1);
                h = (h >> 1).max(1);
                bytes += data_format_bytes(self.format.primary, w, h);
            }
        }
        bytes
    }

    /// Log the object's state.
    pub fn dump(&self) {
        info!(
            target: "ImageGL",
            "max discard {} bind target {:?} use mips {} has mips {} current discard {:?} format {:?} explicit {}",
            self.max_discard,
            self.bind_target,
            self.use_mipmaps,
            self.has_mipmaps,
            self.current_discard,
            self.format,
            self.has_explicit_format
        );
        info!(
            target: "ImageGL",
            "texture memory {} tex name {}",
            self.texture_memory,
            self.tex_name
        );
    }

    /// GL texture name, 0 when there is no texture.
    #[must_use]
    pub fn tex_name(&self) -> u32 {
        self.tex_name
    }

    #[must_use]
    pub fn has_gl_texture(&self) -> bool {
        self.tex_name != 0
    }

    /// Whether pixel data has been uploaded to the current texture.
    #[must_use]
    pub fn is_gl_texture_created(&self) -> bool {
        self.gl_texture_created
    }

    #[must_use]
    pub fn components(&self) -> u8 {
        self.components
    }

    #[must_use]
    pub fn current_discard_level(&self) -> Option<u32> {
        self.current_discard
    }

    #[must_use]
    pub fn max_discard_level(&self) -> u32 {
        self.max_discard
    }

    #[must_use]
    pub fn has_mipmaps(&self) -> bool {
        self.has_mipmaps
    }

    /// Index of the smallest mip level of the last upload.
    #[must_use]
    pub fn mip_levels(&self) -> Option<u32> {
        self.mip_levels
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }

    #[must_use]
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    #[must_use]
    pub fn bind_target(&self) -> TextureType {
        self.bind_target
    }

    /// Change the texture type this object binds as. Takes effect on the
    /// next texture creation.
    pub fn set_bind_target(&mut self, target: TextureType) {
        self.bind_target = target;
    }

    #[must_use]
    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    #[must_use]
    pub fn filtering_option(&self) -> FilterOption {
        self.filter_option
    }

    /// Result of the last alpha classification.
    #[must_use]
    pub fn alpha_analysis(&self) -> AlphaAnalysis {
        self.alpha
    }

    #[must_use]
    pub fn is_mask(&self) -> bool {
        self.alpha.is_mask
    }

    #[must_use]
    pub fn pick_mask(&self) -> Option<&PickMask> {
        self.pick_mask.as_ref()
    }

    /// Bytes accounted for the live texture.
    #[must_use]
    pub fn texture_memory(&self) -> u64 {
        self.texture_memory
    }

    #[must_use]
    pub fn category(&self) -> Option<usize> {
        self.category
    }
}

impl Drop for ImageObject {
    fn drop(&mut self) {
        if self.tex_name != 0 {
            warn!(
                target: "ImageGL",
                "image dropped with live texture {}; call destroy_gl_texture first",
                self.tex_name
            );
        }
    }
}

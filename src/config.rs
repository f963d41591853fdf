//! Runtime configuration for a [`RenderContext`](crate::RenderContext).

use std::{env, path::PathBuf};

/// Number of texture layers tracked by default.
pub const DEFAULT_TEXTURE_UNITS: usize = 32;

/// Tuning constants for alpha-mask classification and pick-mask generation.
///
/// These are empirically chosen values; they are exposed so that callers can
/// adjust the heuristics without touching the classification code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaMaskTuning {
    /// Denominator of the fraction of mid-range samples above which an image
    /// is considered to have continuous alpha.
    pub midrange_divisor: u32,
    /// First and one-past-last histogram bucket counted as mid-range.
    pub midrange_buckets: (usize, usize),
    /// Alpha values strictly above this mark a pick-mask texel as opaque.
    pub pick_alpha_threshold: u8,
    /// Alpha values strictly between `mid_low` and `mid_high` count towards
    /// the mid-percentile statistic.
    pub mid_low: u8,
    /// Upper bound for the mid-percentile statistic.
    pub mid_high: u8,
}

impl Default for AlphaMaskTuning {
    fn default() -> Self {
        Self {
            midrange_divisor: 48,
            midrange_buckets: (3, 13),
            pick_alpha_threshold: 32,
            mid_low: 2,
            mid_high: 253,
        }
    }
}

/// Configuration for a render context.
///
/// Construct with [`RenderConfig::default`] and adjust with the `with_*`
/// builders, or start from [`RenderConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Cross-check cached state against the driver after scope exits and on
    /// uniform lookups.
    pub debug_gl: bool,
    /// Route consistency failures to the fail log instead of panicking.
    pub debug_session: bool,
    /// File that receives fail-log records in debug-session mode.
    pub fail_log_path: Option<PathBuf>,
    /// Fixed-function state is meaningless (shaders do everything). Makes
    /// legacy capabilities, alpha test and texture env state inert.
    pub no_fixed_function: bool,
    /// Running on a core profile context (no luminance formats, no legacy
    /// mipmap generation hint, line width clamped to 1).
    pub core_profile: bool,
    /// The driver can generate mipmaps.
    pub auto_mipmap: bool,
    /// Disable automatic mipmap generation for alpha-only textures.
    pub mipmap_blacklisted: bool,
    /// Maximum anisotropy used by the anisotropic filter option.
    pub max_anisotropy: f32,
    /// Number of texture layers to track.
    pub texture_units: usize,
    /// Alpha-mask heuristic tuning.
    pub alpha_tuning: AlphaMaskTuning,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            debug_gl: cfg!(debug_assertions),
            debug_session: false,
            fail_log_path: None,
            no_fixed_function: true,
            core_profile: true,
            auto_mipmap: true,
            mipmap_blacklisted: false,
            max_anisotropy: 16.0,
            texture_units: DEFAULT_TEXTURE_UNITS,
            alpha_tuning: AlphaMaskTuning::default(),
        }
    }
}

impl RenderConfig {
    /// Default configuration overlaid with `LLRENDER_DEBUG_GL`,
    /// `LLRENDER_DEBUG_SESSION` and `LLRENDER_FAIL_LOG`.
    ///
    /// Boolean variables accept `1`/`true`/`yes`/`on` (case-insensitive);
    /// anything else reads as false.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_flag("LLRENDER_DEBUG_GL") {
            config.debug_gl = value;
        }
        if let Some(value) = env_flag("LLRENDER_DEBUG_SESSION") {
            config.debug_session = value;
        }
        if let Some(path) = env::var_os("LLRENDER_FAIL_LOG") {
            config.fail_log_path = Some(PathBuf::from(path));
        }
        config
    }

    /// Enable or disable debug GL cross-checks.
    #[must_use]
    pub fn with_debug_gl(mut self, debug_gl: bool) -> Self {
        self.debug_gl = debug_gl;
        self
    }

    /// Enable debug-session mode, logging failures to `path`.
    #[must_use]
    pub fn with_debug_session(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_session = true;
        self.fail_log_path = Some(path.into());
        self
    }

    /// Select the fixed-function or shader-only pipeline.
    #[must_use]
    pub fn with_fixed_function(mut self, fixed_function: bool) -> Self {
        self.no_fixed_function = !fixed_function;
        self
    }

    /// Select a core or compatibility profile context.
    #[must_use]
    pub fn with_core_profile(mut self, core_profile: bool) -> Self {
        self.core_profile = core_profile;
        self
    }

    /// Toggle driver mipmap generation.
    #[must_use]
    pub fn with_auto_mipmap(mut self, auto_mipmap: bool) -> Self {
        self.auto_mipmap = auto_mipmap;
        self
    }

    /// Override the alpha heuristic thresholds.
    #[must_use]
    pub fn with_alpha_tuning(mut self, tuning: AlphaMaskTuning) -> Self {
        self.alpha_tuning = tuning;
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    Some(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let config = RenderConfig::default()
            .with_fixed_function(true)
            .with_core_profile(false)
            .with_debug_session("fail.log");
        assert!(!config.no_fixed_function);
        assert!(!config.core_profile);
        assert!(config.debug_session);
        assert_eq!(config.fail_log_path.unwrap(), PathBuf::from("fail.log"));
    }

    #[test]
    fn default_tuning_matches_histogram_layout() {
        let tuning = AlphaMaskTuning::default();
        assert_eq!(tuning.midrange_divisor, 48);
        assert!(tuning.midrange_buckets.1 <= 16);
        assert_eq!(tuning.pick_alpha_threshold, 32);
    }
}

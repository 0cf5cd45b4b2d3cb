use facefolio_core::RenderOptions;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Output canvas width before supersampling.
    pub canvas_width: u32,
    /// Output canvas height before supersampling.
    pub canvas_height: u32,
    /// Supersampling factor.
    pub scale: u32,
    /// Frame and gutter width when the collage has a border.
    pub border_px: u32,
    /// Leave the background transparent instead of white.
    pub transparent_background: bool,
    /// RGB distance under which pixels match the backdrop colour.
    pub key_tolerance: f32,
    /// Appended to an image path to find its landmark sidecar.
    pub sidecar_suffix: String,
}

impl Config {
    /// Load configuration from `FACEFOLIO_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = RenderOptions::default();
        Self {
            canvas_width: env_u32("FACEFOLIO_CANVAS_WIDTH", defaults.canvas_width),
            canvas_height: env_u32("FACEFOLIO_CANVAS_HEIGHT", defaults.canvas_height),
            scale: env_u32("FACEFOLIO_SCALE", defaults.scale).max(1),
            border_px: env_u32("FACEFOLIO_BORDER_PX", defaults.border_px),
            transparent_background: std::env::var("FACEFOLIO_TRANSPARENT")
                .map(|v| v != "0")
                .unwrap_or(defaults.transparent_background),
            key_tolerance: env_f32("FACEFOLIO_KEY_TOLERANCE", 40.0),
            sidecar_suffix: std::env::var("FACEFOLIO_SIDECAR_SUFFIX")
                .unwrap_or_else(|_| ".landmarks.json".to_string()),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
            scale: self.scale,
            transparent_background: self.transparent_background,
            border_px: self.border_px,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parsing_falls_back() {
        assert_eq!(env_u32("FACEFOLIO_TEST_UNSET_U32", 7), 7);
        assert_eq!(env_f32("FACEFOLIO_TEST_UNSET_F32", 1.5), 1.5);
    }

    #[test]
    fn test_render_options_mirror_config() {
        let config = Config {
            canvas_width: 300,
            canvas_height: 200,
            scale: 3,
            border_px: 4,
            transparent_background: false,
            key_tolerance: 10.0,
            sidecar_suffix: ".json".into(),
        };
        let opts = config.render_options();
        assert_eq!((opts.canvas_width, opts.canvas_height, opts.scale), (300, 200, 3));
        assert_eq!(opts.border_px, 4);
        assert!(!opts.transparent_background);
    }
}

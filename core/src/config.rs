//! Layer configuration.

/// Runtime switches of the interception layer.
///
/// # Example
///
/// ```ignore
/// let config = LayerConfig::default()
///     .with_verbose_log(true)
///     .with_track_render_passes(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// Log every failed native call, not just the ones the layer initiated.
    pub verbose_log: bool,
    /// Reconstruct render passes from bind calls and fire begin/finish events.
    pub track_render_passes: bool,
    /// Register one surface record per mip level of D3D9 render-target and
    /// depth-stencil textures.
    pub register_surface_levels: bool,
    /// Number of command buffers cycled by the immediate command list used
    /// for staged uploads.
    pub immediate_command_frames: u32,
    /// `env_logger` filter installed by the logging bootstrap.
    pub log_filter: String,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            verbose_log: false,
            track_render_passes: true,
            register_surface_levels: true,
            immediate_command_frames: 4,
            log_filter: "warn".to_owned(),
        }
    }
}

impl LayerConfig {
    /// Read overrides from `LUMEN_VERBOSE_LOG`, `LUMEN_TRACK_RENDER_PASSES` and `LUMEN_LOG`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup("LUMEN_VERBOSE_LOG").and_then(|v| parse_bool(&v)) {
            config.verbose_log = value;
        }
        if let Some(value) = lookup("LUMEN_TRACK_RENDER_PASSES").and_then(|v| parse_bool(&v)) {
            config.track_render_passes = value;
        }
        if let Some(filter) = lookup("LUMEN_LOG").filter(|v| !v.is_empty()) {
            config.log_filter = filter;
        }
        config
    }

    pub fn with_verbose_log(mut self, enabled: bool) -> Self {
        self.verbose_log = enabled;
        self
    }

    pub fn with_track_render_passes(mut self, enabled: bool) -> Self {
        self.track_render_passes = enabled;
        self
    }

    pub fn with_register_surface_levels(mut self, enabled: bool) -> Self {
        self.register_surface_levels = enabled;
        self
    }

    pub fn with_immediate_command_frames(mut self, frames: u32) -> Self {
        self.immediate_command_frames = frames.max(1);
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LayerConfig::default();
        assert!(config.track_render_passes);
        assert!(!config.verbose_log);
        assert_eq!(config.immediate_command_frames, 4);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = LayerConfig::from_lookup(|key| match key {
            "LUMEN_VERBOSE_LOG" => Some("yes".into()),
            "LUMEN_TRACK_RENDER_PASSES" => Some("0".into()),
            "LUMEN_LOG" => Some("lumen=trace".into()),
            _ => None,
        });
        assert!(config.verbose_log);
        assert!(!config.track_render_passes);
        assert_eq!(config.log_filter, "lumen=trace");
    }

    #[test]
    fn test_unparsable_values_ignored() {
        let config = LayerConfig::from_lookup(|_| Some("maybe".into()));
        assert!(!config.verbose_log);
        assert!(config.track_render_passes);
        assert_eq!(config.log_filter, "maybe");
    }

    #[test]
    fn test_frames_clamped() {
        assert_eq!(
            LayerConfig::default()
                .with_immediate_command_frames(0)
                .immediate_command_frames,
            1
        );
    }
}

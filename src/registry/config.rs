//! Registry configuration

/// Configuration for the stream registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Keep the current GOP per path for late joiners
    pub gop_cache: bool,

    /// Give up on a GOP once it holds more payload bytes than this
    /// (None = unbounded)
    pub gop_max_bytes: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            gop_cache: true,
            gop_max_bytes: None,
        }
    }
}

impl RegistryConfig {
    /// Enable or disable GOP caching
    pub fn gop_cache(mut self, enabled: bool) -> Self {
        self.gop_cache = enabled;
        self
    }

    /// Cap the GOP cache size in bytes
    pub fn gop_max_bytes(mut self, max: Option<usize>) -> Self {
        self.gop_max_bytes = max;
        self
    }
}

//! Runtime Configuration
//!
//! Options recognized by the driver loop. The default configuration renders
//! after every applied action, which is always correct; the other options
//! trade intermediate renderings for throughput.
//!
//! Configurations can be built in code or parsed from JSON:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{
//!     "mode": { "frame_timeout": { "frame": { "secs": 0, "nanos": 16000000 } } },
//!     "render_only_when_state_changes": true
//! }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// When the driver loop renders after applying actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Render after every applied action.
    #[default]
    RenderPerAction,

    /// Keep applying actions that arrive within `frame` of the first one,
    /// then render once.
    FrameTimeout { frame: Duration },
}

/// Configuration of one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mode: RenderMode,

    /// Skip the render pass (but still deliver output) when an action left
    /// every state untouched.
    pub render_only_when_state_changes: bool,

    /// Before rendering, keep applying actions that are already waiting,
    /// so renderings that would be superseded immediately are never published.
    pub conflate_stale_renderings: bool,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_frame_timeout(self, frame: Duration) -> Self {
        self.with_mode(RenderMode::FrameTimeout { frame })
    }

    pub fn render_only_when_state_changes(mut self, enabled: bool) -> Self {
        self.render_only_when_state_changes = enabled;
        self
    }

    pub fn conflate_stale_renderings(mut self, enabled: bool) -> Self {
        self.conflate_stale_renderings = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_renders_per_action() {
        let config = RuntimeConfig::default();
        assert_eq!(config.mode, RenderMode::RenderPerAction);
        assert!(!config.render_only_when_state_changes);
        assert!(!config.conflate_stale_renderings);
    }

    #[test]
    fn parses_partial_json() {
        let config = RuntimeConfig::from_json(r#"{ "conflate_stale_renderings": true }"#).unwrap();
        assert_eq!(
            config,
            RuntimeConfig::default().conflate_stale_renderings(true)
        );
    }

    #[test]
    fn parses_frame_timeout() {
        let config = RuntimeConfig::from_json(
            r#"{ "mode": { "frame_timeout": { "frame": { "secs": 0, "nanos": 5000000 } } } }"#,
        )
        .unwrap();
        assert_eq!(
            config.mode,
            RenderMode::FrameTimeout {
                frame: Duration::from_millis(5)
            }
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = RuntimeConfig::from_json(r#"{ "mode": "sometimes" }"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}

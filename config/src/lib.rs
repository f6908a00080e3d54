// SPDX-License-Identifier: MPL-2.0-only

use cosmic_config::{Config, CosmicConfigEntry, cosmic_config_derive::CosmicConfigEntry};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

pub const NAME: &str = "com.github.LiveBackground";

/// How a video frame is laid out on a surface whose aspect ratio differs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AspectMode {
    /// Preserve the aspect ratio and letterbox the remaining area
    Fit,
    /// Preserve the aspect ratio and crop whatever overflows the surface
    #[default]
    Fill,
    /// Stretch the frame to the surface, ignoring its aspect ratio
    Original,
}

impl std::str::FromStr for AspectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fit" => Ok(AspectMode::Fit),
            "fill" => Ok(AspectMode::Fill),
            "original" => Ok(AspectMode::Original),
            other => Err(format!("unknown aspect mode: {other}")),
        }
    }
}

/// User-facing preferences of the background service.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Setters, CosmicConfigEntry)]
#[serde(deny_unknown_fields)]
#[must_use]
pub struct Preferences {
    /// whether the client window should hide once a wallpaper is applied
    pub hide_after_apply: bool,
    /// whether the service is started with the session
    pub launch_at_login: bool,
    /// aspect mode restored at startup
    pub default_aspect: AspectMode,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            hide_after_apply: true,
            launch_at_login: false,
            default_aspect: AspectMode::default(),
        }
    }
}

impl Preferences {
    pub fn version() -> u64 {
        1
    }

    /// Convenience function for cosmic-config
    ///
    /// # Errors
    ///
    /// Fails if cosmic-config paths are missing or cannot be created.
    pub fn helper() -> Result<Config, cosmic_config::Error> {
        Config::new(NAME, Self::version())
    }

    /// Reads the preferences, falling back to defaults for anything unreadable.
    pub fn load(context: &Config) -> Self {
        match Self::get_entry(context) {
            Ok(prefs) => prefs,
            Err((errors, prefs)) => {
                for why in errors {
                    tracing::warn!(?why, "invalid preference entry, using default");
                }
                prefs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_launch() {
        let prefs = Preferences::default();
        assert!(prefs.hide_after_apply);
        assert!(!prefs.launch_at_login);
        assert_eq!(prefs.default_aspect, AspectMode::Fill);
    }

    #[test]
    fn aspect_mode_parses_case_insensitively() {
        assert_eq!("fit".parse::<AspectMode>(), Ok(AspectMode::Fit));
        assert_eq!("FILL".parse::<AspectMode>(), Ok(AspectMode::Fill));
        assert_eq!("Original".parse::<AspectMode>(), Ok(AspectMode::Original));
        assert!("zoom".parse::<AspectMode>().is_err());
    }

    #[test]
    fn setters_chain() {
        let prefs = Preferences::default()
            .hide_after_apply(false)
            .default_aspect(AspectMode::Fit);
        assert!(!prefs.hide_after_apply);
        assert_eq!(prefs.default_aspect, AspectMode::Fit);
    }
}

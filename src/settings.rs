use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::viewer::{ScaleBucket, SchedulerConfig, Zoom};

pub const CURRENT_VERSION: u32 = 1;
pub const MAX_PREFETCH_RADIUS: usize = 16;
pub const MAX_CACHE_SIZE: usize = 1024;
pub const MAX_WORKERS: usize = 64;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "folio";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to write settings file {path:?}: {detail}")]
    Write { path: PathBuf, detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Pages kept rendered on each side of the current page
    #[serde(default = "default_prefetch_radius")]
    pub prefetch_radius: usize,

    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    #[serde(default = "default_min_scale")]
    pub min_scale: f32,

    #[serde(default = "default_max_scale")]
    pub max_scale: f32,

    #[serde(default = "default_initial_scale")]
    pub initial_scale: f32,

    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,

    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Render threads; defaults to one per window page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_prefetch_radius() -> usize {
    2
}

fn default_max_cache_size() -> usize {
    5
}

fn default_min_scale() -> f32 {
    Zoom::MIN_SCALE
}

fn default_max_scale() -> f32 {
    Zoom::MAX_SCALE
}

fn default_initial_scale() -> f32 {
    1.0
}

fn default_zoom_step() -> f32 {
    Zoom::STEP
}

fn default_render_timeout_ms() -> u64 {
    10_000
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            prefetch_radius: default_prefetch_radius(),
            max_cache_size: default_max_cache_size(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            initial_scale: default_initial_scale(),
            zoom_step: default_zoom_step(),
            render_timeout_ms: default_render_timeout_ms(),
            workers: None,
        }
    }
}

impl ViewerSettings {
    /// Replace values that would make the viewer misbehave
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.max_cache_size == 0 {
            warn!("max_cache_size must be at least 1, using 1");
            self.max_cache_size = 1;
        }
        if self.max_cache_size > MAX_CACHE_SIZE {
            warn!(
                "max_cache_size {} is too large, using {MAX_CACHE_SIZE}",
                self.max_cache_size
            );
            self.max_cache_size = MAX_CACHE_SIZE;
        }
        if self.prefetch_radius > MAX_PREFETCH_RADIUS {
            warn!(
                "prefetch_radius {} is too large, using {MAX_PREFETCH_RADIUS}",
                self.prefetch_radius
            );
            self.prefetch_radius = MAX_PREFETCH_RADIUS;
        }

        let finite_positive = |v: f32| v.is_finite() && v > 0.0;
        if !finite_positive(self.min_scale) {
            self.min_scale = default_min_scale();
        }
        if !finite_positive(self.max_scale) {
            self.max_scale = default_max_scale();
        }
        if self.min_scale > self.max_scale {
            warn!(
                "min_scale {} is above max_scale {}, swapping",
                self.min_scale, self.max_scale
            );
            std::mem::swap(&mut self.min_scale, &mut self.max_scale);
        }

        // Smallest scale a bucket can represent
        let smallest = ScaleBucket::from_tenths(1).scale();
        if self.min_scale < smallest {
            warn!(
                "min_scale {} is below {smallest}, using {smallest}",
                self.min_scale
            );
            self.min_scale = smallest;
        }
        self.max_scale = self.max_scale.max(self.min_scale);
        if !self.initial_scale.is_finite() {
            self.initial_scale = default_initial_scale();
        }
        self.initial_scale = self.initial_scale.clamp(self.min_scale, self.max_scale);
        if !finite_positive(self.zoom_step) {
            self.zoom_step = default_zoom_step();
        }
        if self.render_timeout_ms == 0 {
            self.render_timeout_ms = default_render_timeout_ms();
        }
        match self.workers {
            Some(0) => self.workers = None,
            Some(n) if n > MAX_WORKERS => {
                warn!("workers {n} is too many, using {MAX_WORKERS}");
                self.workers = Some(MAX_WORKERS);
            }
            _ => {}
        }
        self
    }

    #[must_use]
    pub fn zoom(&self) -> Zoom {
        Zoom::new(self.min_scale, self.max_scale, self.zoom_step)
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            prefetch_radius: self.prefetch_radius,
            max_cache_size: self.max_cache_size,
            render_timeout: Duration::from_millis(self.render_timeout_ms),
            workers: self.workers.unwrap_or_else(|| {
                self.prefetch_radius.saturating_mul(2).saturating_add(1)
            }),
        }
    }

    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, SettingsError> {
        let mut settings: Self =
            serde_yaml::from_str(content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
        }
        Ok(settings.validated())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&content, path)?;
        debug!("Loaded settings from {path:?}");
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        let write_error = |detail: String| SettingsError::Write {
            path: path.to_path_buf(),
            detail,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
            }
        }

        let content = serde_yaml::to_string(self).map_err(|e| write_error(e.to_string()))?;
        fs::write(path, content).map_err(|e| write_error(e.to_string()))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }
}

fn migrate_settings(settings: &mut ViewerSettings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `explicit` if given (errors are fatal), otherwise
/// from the default location (errors fall back to defaults).
pub fn load_settings(explicit: Option<&Path>) -> Result<ViewerSettings, SettingsError> {
    if let Some(path) = explicit {
        return ViewerSettings::load_from_path(path);
    }

    let Some(path) = default_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Ok(ViewerSettings::default());
    };

    if !path.exists() {
        info!("Settings file not found at {path:?}, using defaults");
        return Ok(ViewerSettings::default());
    }

    match ViewerSettings::load_from_path(&path) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            error!("{e}");
            Ok(ViewerSettings::default())
        }
    }
}

//! Engine configuration
//!
//! One explicit [`EngineConfig`] is passed to the engine at construction.
//! It can be built programmatically, read from a JSON file (missing keys take
//! their defaults) or overridden from environment variables.

use crate::error::{GridError, GridResult};
use clipgrid_scheduler::{LifecycleConfig, RetryPolicy, ViewportState};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Configuration for [`GridEngine`](crate::GridEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum simultaneously live decode units
    pub max_live: usize,

    /// Row height in pixels
    pub row_height: f64,

    /// Rows loaded beyond the visible ones
    pub load_buffer_rows: usize,

    /// Rows kept alive beyond the visible ones; must exceed `load_buffer_rows`
    pub unload_buffer_rows: usize,

    /// Initial column count
    pub column_count: usize,

    /// Initial viewport height in pixels
    pub viewport_extent: f64,

    /// Minimum interval between viewport recomputes while scrolling
    pub scroll_throttle_ms: u64,

    pub retry_base_ms: u64,
    pub retry_jitter_ms: u64,
    pub retry_max_attempts: u32,

    /// Log loads outstanding longer than this; off when `None`
    pub stall_threshold_ms: Option<u64>,

    /// Fixed seed for shuffle permutations
    pub shuffle_seed: Option<u64>,

    /// Fixed seed for retry jitter
    pub jitter_seed: Option<u64>,

    /// On-disk thumbnail cache to index at startup
    pub thumbnail_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_live: 30,
            row_height: 240.0,
            load_buffer_rows: 3,
            unload_buffer_rows: 25,
            column_count: 4,
            viewport_extent: 720.0,
            scroll_throttle_ms: 16,
            retry_base_ms: 500,
            retry_jitter_ms: 250,
            retry_max_attempts: 3,
            stall_threshold_ms: None,
            shuffle_seed: None,
            jitter_seed: None,
            thumbnail_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_live(mut self, max_live: usize) -> Self {
        self.max_live = max_live;
        self
    }

    pub fn with_row_height(mut self, row_height: f64) -> Self {
        self.row_height = row_height;
        self
    }

    /// Set the load and keep-alive buffers (the hysteresis margin)
    pub fn with_buffers(mut self, load_buffer_rows: usize, unload_buffer_rows: usize) -> Self {
        self.load_buffer_rows = load_buffer_rows;
        self.unload_buffer_rows = unload_buffer_rows;
        self
    }

    pub fn with_geometry(mut self, viewport_extent: f64, column_count: usize) -> Self {
        self.viewport_extent = viewport_extent;
        self.column_count = column_count;
        self
    }

    pub fn with_scroll_throttle_ms(mut self, ms: u64) -> Self {
        self.scroll_throttle_ms = ms;
        self
    }

    pub fn with_retry(mut self, base_ms: u64, jitter_ms: u64, max_attempts: u32) -> Self {
        self.retry_base_ms = base_ms;
        self.retry_jitter_ms = jitter_ms;
        self.retry_max_attempts = max_attempts;
        self
    }

    pub fn with_stall_threshold_ms(mut self, ms: u64) -> Self {
        self.stall_threshold_ms = Some(ms);
        self
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    pub fn with_thumbnail_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.thumbnail_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Check every value, including the viewport geometry
    pub fn validate(&self) -> GridResult<()> {
        if self.max_live == 0 {
            return Err(GridError::Config("max_live must be at least 1".to_string()));
        }
        if self.retry_max_attempts == 0 {
            return Err(GridError::Config(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        self.viewport().validate()?;
        Ok(())
    }

    /// Initial viewport described by this configuration
    pub fn viewport(&self) -> ViewportState {
        ViewportState::new(self.viewport_extent, self.column_count, self.row_height)
            .with_buffers(self.load_buffer_rows, self.unload_buffer_rows)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_jitter_ms),
            self.retry_max_attempts,
        )
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            max_live: self.max_live,
            retry: self.retry_policy(),
            jitter_seed: self.jitter_seed,
        }
    }

    pub fn scroll_cadence(&self) -> Duration {
        Duration::from_millis(self.scroll_throttle_ms)
    }

    pub fn stall_threshold(&self) -> Option<Duration> {
        self.stall_threshold_ms.map(Duration::from_millis)
    }

    /// Defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `CLIPGRID_MAX_LIVE`
    /// - `CLIPGRID_ROW_HEIGHT`
    /// - `CLIPGRID_LOAD_BUFFER_ROWS`
    /// - `CLIPGRID_UNLOAD_BUFFER_ROWS`
    /// - `CLIPGRID_SCROLL_THROTTLE_MS`
    /// - `CLIPGRID_RETRY_BASE_MS`
    /// - `CLIPGRID_RETRY_JITTER_MS`
    /// - `CLIPGRID_RETRY_MAX_ATTEMPTS`
    /// - `CLIPGRID_THUMBNAIL_DIR`
    ///
    /// # Errors
    /// Returns `GridError::Config` naming the variable that failed to parse.
    pub fn from_env() -> GridResult<Self> {
        Self::default().merge_env()
    }

    /// Apply environment overrides on top of `self`
    pub fn merge_env(mut self) -> GridResult<Self> {
        env_override("CLIPGRID_MAX_LIVE", &mut self.max_live)?;
        env_override("CLIPGRID_ROW_HEIGHT", &mut self.row_height)?;
        env_override("CLIPGRID_LOAD_BUFFER_ROWS", &mut self.load_buffer_rows)?;
        env_override("CLIPGRID_UNLOAD_BUFFER_ROWS", &mut self.unload_buffer_rows)?;
        env_override("CLIPGRID_SCROLL_THROTTLE_MS", &mut self.scroll_throttle_ms)?;
        env_override("CLIPGRID_RETRY_BASE_MS", &mut self.retry_base_ms)?;
        env_override("CLIPGRID_RETRY_JITTER_MS", &mut self.retry_jitter_ms)?;
        env_override("CLIPGRID_RETRY_MAX_ATTEMPTS", &mut self.retry_max_attempts)?;

        if let Some(dir) = std::env::var_os("CLIPGRID_THUMBNAIL_DIR") {
            self.thumbnail_dir = Some(PathBuf::from(dir));
        }

        Ok(self)
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> GridResult<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&contents)?;
        info!(path = %path.as_ref().display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_json(json: &str) -> GridResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write configuration as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> GridResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) -> GridResult<()> {
    if let Ok(value) = std::env::var(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| GridError::Config(format!("invalid value for {name}: {value:?}")))?;
    }
    Ok(())
}

use dirs::config_dir;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::display::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};

const CONFIG_FILE_NAME: &str = "virtual-display-bridge/config.toml";

/// Overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "VIRTUAL_DISPLAY_BRIDGE_CONFIG";

const MILLIMETERS_PER_INCH: f64 = 25.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Vendor ID reported by displays the bridge synthesises.
    pub vendor_id: u32,
    pub product_id: u32,
    /// First serial number handed out.
    pub serial_base: u32,
    /// Density used to derive the physical size from the logical size.
    pub pixels_per_inch: f64,
    /// Pixel budget multiplier, so a display can switch to HiDPI later.
    pub max_scale_factor: u32,
    /// HiDPI flag for displays created through the plain create call.
    pub default_hi_dpi: bool,
    /// Label of the queue termination callbacks run on.
    pub queue_label: String,
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            serial_base: 1,
            pixels_per_inch: 110.0,
            max_scale_factor: 2,
            default_hi_dpi: false,
            queue_label: "virtual-display-bridge.termination".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Get the configuration file path
    fn get_config_path() -> anyhow::Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let config_dir =
            config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Read configuration from the default location, or defaults if there is none
    pub fn read_config() -> anyhow::Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            info!("Bridge config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::read_from(&config_path)
    }

    /// Read configuration from a specific file
    pub fn read_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded bridge config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`read_config`](Self::read_config), but never fails.
    pub fn load_or_default() -> Self {
        match Self::read_config() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to read bridge config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.pixels_per_inch.is_finite() && self.pixels_per_inch > 0.0) {
            anyhow::bail!("pixels_per_inch must be positive, got {}", self.pixels_per_inch);
        }
        if self.max_scale_factor == 0 {
            anyhow::bail!("max_scale_factor must be at least 1");
        }
        if self.queue_label.is_empty() {
            anyhow::bail!("queue_label must not be empty");
        }
        Ok(())
    }

    /// Physical size of a panel showing `width`x`height` points at 1x.
    pub fn millimeters_for(&self, width: u32, height: u32) -> (f64, f64) {
        let to_mm = |points: u32| points as f64 / self.pixels_per_inch * MILLIMETERS_PER_INCH;
        (to_mm(width), to_mm(height))
    }
}

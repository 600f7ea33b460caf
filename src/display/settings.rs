use serde::{Deserialize, Serialize};

use super::DisplayMode;
use crate::service::{DisplayError, DisplayResult};

/// Mode list and HiDPI flag applied to a live display.
///
/// The order of `modes` is the preference order: the first mode becomes the
/// display's default mode once the settings are applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    pub modes: Vec<DisplayMode>,
    pub hi_dpi: bool,
}

impl DisplaySettings {
    pub fn new(modes: Vec<DisplayMode>, hi_dpi: bool) -> Self {
        Self { modes, hi_dpi }
    }

    pub fn single(mode: DisplayMode, hi_dpi: bool) -> Self {
        Self::new(vec![mode], hi_dpi)
    }

    pub fn preferred_mode(&self) -> Option<&DisplayMode> {
        self.modes.first()
    }

    /// The flag in the form the window server expects.
    pub fn hi_dpi_flag(&self) -> u32 {
        u32::from(self.hi_dpi)
    }

    /// Backing scale factor the modes are presented at.
    pub fn scale_factor(&self) -> u32 {
        if self.hi_dpi {
            2
        } else {
            1
        }
    }

    pub fn validate(&self) -> DisplayResult<()> {
        if self.modes.is_empty() {
            return Err(DisplayError::invalid("settings need at least one mode"));
        }
        self.modes.iter().try_for_each(DisplayMode::validate)
    }

    /// Checks every mode fits the pixel budget a display was created with.
    pub fn validate_for(&self, max_pixels_wide: u32, max_pixels_high: u32) -> DisplayResult<()> {
        self.validate()?;
        let scale = self.scale_factor();
        for mode in &self.modes {
            let (pixel_width, pixel_height) = mode.pixel_size(scale);
            if pixel_width > max_pixels_wide || pixel_height > max_pixels_high {
                return Err(DisplayError::invalid(format!(
                    "mode {}x{}@{} needs {}x{} pixels, display allows {}x{}",
                    mode.width,
                    mode.height,
                    scale,
                    pixel_width,
                    pixel_height,
                    max_pixels_wide,
                    max_pixels_high
                )));
            }
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::service::{DisplayError, DisplayResult};

/// One resolution / refresh-rate combination a display can present.
///
/// `width` and `height` are logical points. `#[repr(C)]` because the same
/// layout is accepted over the C ABI.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f64,
}

impl DisplayMode {
    pub const fn new(width: u32, height: u32, refresh_rate: f64) -> Self {
        Self {
            width,
            height,
            refresh_rate,
        }
    }

    pub fn validate(&self) -> DisplayResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DisplayError::invalid(format!(
                "mode {}x{} has a zero dimension",
                self.width, self.height
            )));
        }
        if !self.refresh_rate.is_finite() || self.refresh_rate <= 0.0 {
            return Err(DisplayError::invalid(format!(
                "refresh rate {} must be a positive number",
                self.refresh_rate
            )));
        }
        Ok(())
    }

    /// Backing pixel dimensions at an integer scale factor.
    pub fn pixel_size(&self, scale: u32) -> (u32, u32) {
        (
            self.width.saturating_mul(scale),
            self.height.saturating_mul(scale),
        )
    }
}

/// A display mode as reported by the window server.
///
/// Logical (`width`/`height`) and backing pixel (`pixel_width`/`pixel_height`)
/// dimensions are kept apart; on HiDPI modes they differ by the scale factor.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub width: usize,
    pub height: usize,
    pub pixel_width: usize,
    pub pixel_height: usize,
    pub refresh_rate: f64,
    pub is_hidpi: bool,
}

impl ModeInfo {
    pub fn new(
        width: usize,
        height: usize,
        pixel_width: usize,
        pixel_height: usize,
        refresh_rate: f64,
    ) -> Self {
        Self {
            width,
            height,
            pixel_width,
            pixel_height,
            refresh_rate,
            is_hidpi: pixel_width > width,
        }
    }

    pub fn from_mode(mode: &DisplayMode, scale: u32) -> Self {
        let (pixel_width, pixel_height) = mode.pixel_size(scale.max(1));
        Self::new(
            mode.width as usize,
            mode.height as usize,
            pixel_width as usize,
            pixel_height as usize,
            mode.refresh_rate,
        )
    }

    /// Whether this reported mode presents `mode` (logical size and refresh rate).
    pub fn presents(&self, mode: &DisplayMode) -> bool {
        self.width == mode.width as usize
            && self.height == mode.height as usize
            && (self.refresh_rate - mode.refresh_rate).abs() < 0.01
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_validation() {
        assert!(DisplayMode::new(1920, 1080, 60.0).validate().is_ok());
        assert!(DisplayMode::new(0, 1080, 60.0).validate().is_err());
        assert!(DisplayMode::new(1920, 0, 60.0).validate().is_err());
        assert!(DisplayMode::new(1920, 1080, 0.0).validate().is_err());
        assert!(DisplayMode::new(1920, 1080, -30.0).validate().is_err());
        assert!(DisplayMode::new(1920, 1080, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_modes_compare_by_value() {
        let a = DisplayMode::new(2560, 1440, 60.0);
        let b = DisplayMode::new(2560, 1440, 60.0);
        assert_eq!(a, b);
        assert_ne!(a, DisplayMode::new(2560, 1440, 120.0));
    }

    #[test]
    fn test_mode_info_keeps_logical_and_pixel_sizes_apart() {
        let mode = DisplayMode::new(1920, 1080, 60.0);

        let hidpi = ModeInfo::from_mode(&mode, 2);
        assert_eq!((hidpi.width, hidpi.height), (1920, 1080));
        assert_eq!((hidpi.pixel_width, hidpi.pixel_height), (3840, 2160));
        assert!(hidpi.is_hidpi);
        assert!(hidpi.presents(&mode));

        let flat = ModeInfo::from_mode(&mode, 1);
        assert_eq!((flat.pixel_width, flat.pixel_height), (1920, 1080));
        assert!(!flat.is_hidpi);
    }
}

//! The window-server seam.
//!
//! Everything the bridge needs from the operating system goes through
//! [`DisplayService`]. The macOS implementation talks to CoreGraphics and the
//! private `CGVirtualDisplay` classes; [`simulated::SimulatedDisplayService`]
//! models the same behaviour in memory for other targets and for tests.

#[cfg(target_os = "macos")]
pub mod macos;
pub mod simulated;

use std::sync::Arc;

use thiserror::Error;

use crate::display::{DisplayDescriptor, DisplaySettings, ModeInfo};

/// Opaque 32-bit display identifier assigned by the window server.
pub type DisplayId = u32;

/// Never assigned to a live display (`kCGNullDirectDisplay`).
pub const INVALID_DISPLAY_ID: DisplayId = 0;

/// `CGError` values reported across the C boundary.
pub mod cg_error {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1000;
    pub const ILLEGAL_ARGUMENT: i32 = 1001;
    pub const NOT_IMPLEMENTED: i32 = 1006;
    pub const RANGE_CHECK: i32 = 1007;
    pub const INVALID_OPERATION: i32 = 1010;
    pub const NONE_AVAILABLE: i32 = 1011;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DisplayError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("display {0} is not known to the window server")]
    UnknownDisplay(DisplayId),
    #[error("display {0} has no data for this query")]
    NoData(DisplayId),
    #[error("{context} was rejected by the window server (CGError {code})")]
    Rejected { code: i32, context: String },
    #[error("display id {0} is live or was already retired")]
    DuplicateIdentifier(DisplayId),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl DisplayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn rejected(context: impl Into<String>) -> Self {
        Self::Rejected {
            code: cg_error::FAILURE,
            context: context.into(),
        }
    }

    pub fn rejected_with(code: i32, context: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            context: context.into(),
        }
    }

    /// The `CGError` code reported for this error over the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => cg_error::ILLEGAL_ARGUMENT,
            Self::UnknownDisplay(_) => cg_error::RANGE_CHECK,
            Self::NoData(_) => cg_error::NONE_AVAILABLE,
            Self::Rejected { code, .. } if *code != cg_error::SUCCESS => *code,
            Self::Rejected { .. } => cg_error::FAILURE,
            Self::DuplicateIdentifier(_) => cg_error::INVALID_OPERATION,
            Self::Unsupported(_) => cg_error::NOT_IMPLEMENTED,
        }
    }
}

pub type DisplayResult<T> = Result<T, DisplayError>;

/// Operations the bridge consumes from the window server.
///
/// Implementations must be callable from any thread. Introspection methods
/// accept any display identifier, virtual or physical.
pub trait DisplayService: Send + Sync {
    /// Creates a virtual display from `descriptor` and returns its identifier.
    ///
    /// The service keeps the descriptor's termination handler and fires it on
    /// the descriptor's queue if the display is torn down by the system.
    fn create_virtual_display(&self, descriptor: &DisplayDescriptor) -> DisplayResult<DisplayId>;

    /// Replaces the mode list and HiDPI flag of a virtual display.
    fn apply_settings(&self, display_id: DisplayId, settings: &DisplaySettings)
        -> DisplayResult<()>;

    /// Releases a virtual display created by this service.
    fn release_virtual_display(&self, display_id: DisplayId) -> DisplayResult<()>;

    /// Displays that can currently be drawn to.
    fn active_displays(&self) -> DisplayResult<Vec<DisplayId>>;

    /// Every connected display, including hardware mirror destinations.
    fn online_displays(&self) -> DisplayResult<Vec<DisplayId>>;

    fn current_mode(&self, display_id: DisplayId) -> DisplayResult<ModeInfo>;

    /// Physical size in millimetres; `(0.0, 0.0)` when unknown.
    fn physical_size(&self, display_id: DisplayId) -> (f64, f64);

    fn is_built_in(&self, display_id: DisplayId) -> bool;

    fn main_display(&self) -> DisplayId;

    fn display_modes(&self, display_id: DisplayId) -> DisplayResult<Vec<ModeInfo>>;

    /// Makes `destination` mirror `source`.
    fn configure_mirroring(&self, source: DisplayId, destination: DisplayId) -> DisplayResult<()>;

    /// Removes `display_id` from any mirror set it belongs to.
    fn stop_mirroring(&self, display_id: DisplayId) -> DisplayResult<()>;
}

/// The service backing the process-wide bridge on this platform.
pub fn platform_service() -> Arc<dyn DisplayService> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::MacDisplayService::new())
    }

    #[cfg(not(target_os = "macos"))]
    {
        log::warn!("CGVirtualDisplay is only available on macOS, using the simulated window server");
        Arc::new(simulated::SimulatedDisplayService::new())
    }
}

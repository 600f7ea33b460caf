//! Create, configure, mirror and inspect macOS virtual displays.
//!
//! Rust callers use [`DisplayBridge`] directly; everything else goes through
//! the C ABI in [`ffi`].

pub mod config;
pub mod display;
pub mod ffi;
pub mod logging;
pub mod queue;
pub mod service;
pub mod termination;

pub use config::BridgeConfig;
pub use display::{
    DisplayBridge, DisplayDescriptor, DisplayIdentity, DisplayMode, DisplaySettings, ModeInfo,
    VirtualDisplay,
};
pub use queue::ExecutionQueue;
pub use service::{DisplayError, DisplayId, DisplayResult, DisplayService};
pub use termination::TerminationHandler;

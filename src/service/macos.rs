//! CoreGraphics backed window server.
//!
//! Public display queries go through the `core-graphics` crate. Virtual
//! displays use the private `CGVirtualDisplay` classes through a small
//! Objective-C shim compiled by `build.rs` (`native/virtual_display_shim.m`).

#![allow(non_upper_case_globals)]

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::CFString;
use core_graphics::base::CGError;
use core_graphics::display::{CGDirectDisplayID, CGDisplay, CGDisplayMode};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::{
    cg_error, DisplayError, DisplayId, DisplayResult, DisplayService, INVALID_DISPLAY_ID,
};
use crate::display::{DisplayDescriptor, DisplaySettings, ModeInfo};
use crate::queue::ExecutionQueue;
use crate::termination::TerminationHandler;

const MAX_ONLINE_DISPLAYS: u32 = 64;
const kCGConfigureForSession: u32 = 1;
const kCGNullDirectDisplay: CGDirectDisplayID = 0;

type CGDisplayConfigRef = *mut c_void;

#[repr(C)]
struct ShimMode {
    width: u32,
    height: u32,
    refresh_rate: f64,
}

#[repr(C)]
struct ShimDescriptor {
    max_pixels_wide: u32,
    max_pixels_high: u32,
    width_mm: f64,
    height_mm: f64,
    vendor_id: u32,
    product_id: u32,
    serial_num: u32,
    name: *const std::os::raw::c_char,
    red_x: f64,
    red_y: f64,
    green_x: f64,
    green_y: f64,
    blue_x: f64,
    blue_y: f64,
    white_x: f64,
    white_y: f64,
}

type ShimTerminated = extern "C" fn(token: u64);

extern "C" {
    fn vdb_shim_display_create(
        descriptor: *const ShimDescriptor,
        token: u64,
        on_terminated: ShimTerminated,
        out_display_id: *mut u32,
    ) -> *mut c_void;
    fn vdb_shim_display_apply(
        display: *mut c_void,
        modes: *const ShimMode,
        count: u32,
        hi_dpi: u32,
    ) -> bool;
    fn vdb_shim_display_release(display: *mut c_void);
}

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGGetOnlineDisplayList(
        max_displays: u32,
        online_displays: *mut CGDirectDisplayID,
        display_count: *mut u32,
    ) -> CGError;
    fn CGBeginDisplayConfiguration(config: *mut CGDisplayConfigRef) -> CGError;
    fn CGConfigureDisplayMirrorOfDisplay(
        config: CGDisplayConfigRef,
        display: CGDirectDisplayID,
        master: CGDirectDisplayID,
    ) -> CGError;
    fn CGCompleteDisplayConfiguration(config: CGDisplayConfigRef, option: u32) -> CGError;
    fn CGCancelDisplayConfiguration(config: CGDisplayConfigRef) -> CGError;
}

/// Retained `CGVirtualDisplay` object.
struct ShimHandle(*mut c_void);

// The object is only touched under `MacDisplayService::displays`.
unsafe impl Send for ShimHandle {}

struct LiveDisplay {
    handle: ShimHandle,
    token: u64,
}

/// Termination handlers waiting for the window server, keyed by shim token.
type PendingTerminations = Mutex<HashMap<u64, (TerminationHandler, ExecutionQueue)>>;

fn pending_terminations() -> &'static PendingTerminations {
    static PENDING: OnceLock<PendingTerminations> = OnceLock::new();
    PENDING.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_token() -> u64 {
    static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// Called by the shim on the window server's private queue.
extern "C" fn on_display_terminated(token: u64) {
    let pending = pending_terminations().lock().remove(&token);
    if let Some((handler, queue)) = pending {
        info!("window server terminated virtual display (token {})", token);
        handler.fire_on(&queue);
    }
}

fn check(code: CGError, context: &str) -> DisplayResult<()> {
    if code == cg_error::SUCCESS {
        Ok(())
    } else {
        Err(DisplayError::rejected_with(code, context))
    }
}

pub struct MacDisplayService {
    displays: Mutex<HashMap<DisplayId, LiveDisplay>>,
}

impl MacDisplayService {
    pub fn new() -> Self {
        Self {
            displays: Mutex::new(HashMap::new()),
        }
    }

    fn is_online(&self, display_id: DisplayId) -> bool {
        self.online_displays()
            .map(|displays| displays.contains(&display_id))
            .unwrap_or(false)
    }

    fn configure(
        &self,
        context: &str,
        apply: impl FnOnce(CGDisplayConfigRef) -> CGError,
    ) -> DisplayResult<()> {
        let mut config: CGDisplayConfigRef = std::ptr::null_mut();
        check(unsafe { CGBeginDisplayConfiguration(&mut config) }, context)?;

        let code = apply(config);
        if code != cg_error::SUCCESS {
            unsafe { CGCancelDisplayConfiguration(config) };
            return check(code, context);
        }
        check(
            unsafe { CGCompleteDisplayConfiguration(config, kCGConfigureForSession) },
            context,
        )
    }
}

impl Default for MacDisplayService {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayService for MacDisplayService {
    fn create_virtual_display(&self, descriptor: &DisplayDescriptor) -> DisplayResult<DisplayId> {
        let name = CString::new(descriptor.name())
            .map_err(|_| DisplayError::invalid("display name must not contain NUL"))?;
        let (width_mm, height_mm) = descriptor.size_in_millimeters();
        let shim_descriptor = ShimDescriptor {
            max_pixels_wide: descriptor.max_pixels_wide(),
            max_pixels_high: descriptor.max_pixels_high(),
            width_mm,
            height_mm,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            serial_num: descriptor.serial_num(),
            name: name.as_ptr(),
            red_x: descriptor.red_primary().0,
            red_y: descriptor.red_primary().1,
            green_x: descriptor.green_primary().0,
            green_y: descriptor.green_primary().1,
            blue_x: descriptor.blue_primary().0,
            blue_y: descriptor.blue_primary().1,
            white_x: descriptor.white_point().0,
            white_y: descriptor.white_point().1,
        };

        let token = next_token();
        pending_terminations().lock().insert(
            token,
            (
                descriptor.termination_handler().clone(),
                descriptor.queue().clone(),
            ),
        );

        let mut display_id: u32 = INVALID_DISPLAY_ID;
        let handle = unsafe {
            vdb_shim_display_create(&shim_descriptor, token, on_display_terminated, &mut display_id)
        };
        if handle.is_null() || display_id == INVALID_DISPLAY_ID {
            pending_terminations().lock().remove(&token);
            if !handle.is_null() {
                unsafe { vdb_shim_display_release(handle) };
            }
            error!("CGVirtualDisplay refused descriptor '{}'", descriptor.name());
            return Err(DisplayError::rejected("create virtual display"));
        }

        self.displays.lock().insert(
            display_id,
            LiveDisplay {
                handle: ShimHandle(handle),
                token,
            },
        );
        debug!("CGVirtualDisplay {} created (token {})", display_id, token);
        Ok(display_id)
    }

    fn apply_settings(
        &self,
        display_id: DisplayId,
        settings: &DisplaySettings,
    ) -> DisplayResult<()> {
        let scale = settings.scale_factor();
        let modes: Vec<ShimMode> = settings
            .modes
            .iter()
            .map(|mode| {
                let (width, height) = mode.pixel_size(scale);
                ShimMode {
                    width,
                    height,
                    refresh_rate: mode.refresh_rate,
                }
            })
            .collect();
        if modes.is_empty() {
            return Err(DisplayError::invalid("settings need at least one mode"));
        }

        let displays = self.displays.lock();
        let live = displays
            .get(&display_id)
            .ok_or(DisplayError::UnknownDisplay(display_id))?;

        let accepted = unsafe {
            vdb_shim_display_apply(
                live.handle.0,
                modes.as_ptr(),
                modes.len() as u32,
                settings.hi_dpi_flag(),
            )
        };
        if accepted {
            Ok(())
        } else {
            Err(DisplayError::rejected("apply settings"))
        }
    }

    fn release_virtual_display(&self, display_id: DisplayId) -> DisplayResult<()> {
        let live = self
            .displays
            .lock()
            .remove(&display_id)
            .ok_or(DisplayError::UnknownDisplay(display_id))?;

        unsafe { vdb_shim_display_release(live.handle.0) };

        // The window server may or may not call back after a release, so the
        // handler is fired here and a later callback finds nothing pending.
        let pending = pending_terminations().lock().remove(&live.token);
        if let Some((handler, queue)) = pending {
            handler.fire_on(&queue);
        }
        Ok(())
    }

    fn active_displays(&self) -> DisplayResult<Vec<DisplayId>> {
        CGDisplay::active_displays()
            .map_err(|code| DisplayError::rejected_with(code, "CGGetActiveDisplayList"))
    }

    fn online_displays(&self) -> DisplayResult<Vec<DisplayId>> {
        let mut displays = vec![0 as CGDirectDisplayID; MAX_ONLINE_DISPLAYS as usize];
        let mut count: u32 = 0;
        check(
            unsafe {
                CGGetOnlineDisplayList(MAX_ONLINE_DISPLAYS, displays.as_mut_ptr(), &mut count)
            },
            "CGGetOnlineDisplayList",
        )?;
        displays.truncate(count as usize);
        Ok(displays)
    }

    fn current_mode(&self, display_id: DisplayId) -> DisplayResult<ModeInfo> {
        if !self.is_online(display_id) {
            return Err(DisplayError::UnknownDisplay(display_id));
        }
        let mode = CGDisplay::new(display_id)
            .display_mode()
            .ok_or(DisplayError::NoData(display_id))?;
        Ok(mode_info(&mode))
    }

    fn physical_size(&self, display_id: DisplayId) -> (f64, f64) {
        if !self.is_online(display_id) {
            return (0.0, 0.0);
        }
        let size = CGDisplay::new(display_id).screen_size();
        (size.width, size.height)
    }

    fn is_built_in(&self, display_id: DisplayId) -> bool {
        self.is_online(display_id) && CGDisplay::new(display_id).is_builtin()
    }

    fn main_display(&self) -> DisplayId {
        CGDisplay::main().id
    }

    fn display_modes(&self, display_id: DisplayId) -> DisplayResult<Vec<ModeInfo>> {
        if !self.is_online(display_id) {
            return Err(DisplayError::UnknownDisplay(display_id));
        }

        let options = CFDictionary::from_CFType_pairs(&[(
            CFString::from_static_string("kCGDisplayShowDuplicateLowResolutionModes").as_CFType(),
            CFBoolean::true_value().as_CFType(),
        )]);
        let modes = CGDisplayMode::all_display_modes(display_id, options.as_concrete_TypeRef())
            .ok_or(DisplayError::NoData(display_id))?;
        Ok(modes.iter().map(mode_info).collect())
    }

    fn configure_mirroring(&self, source: DisplayId, destination: DisplayId) -> DisplayResult<()> {
        if source == destination {
            return Err(DisplayError::invalid("a display can not mirror itself"));
        }
        self.configure("configure mirroring", |config| unsafe {
            CGConfigureDisplayMirrorOfDisplay(config, destination, source)
        })?;
        info!("display {} now mirrors {}", destination, source);
        Ok(())
    }

    fn stop_mirroring(&self, display_id: DisplayId) -> DisplayResult<()> {
        self.configure("stop mirroring", |config| unsafe {
            CGConfigureDisplayMirrorOfDisplay(config, display_id, kCGNullDirectDisplay)
        })
    }
}

impl Drop for MacDisplayService {
    fn drop(&mut self) {
        let leftover: Vec<_> = self.displays.lock().keys().copied().collect();
        for display_id in leftover {
            warn!("releasing virtual display {} still held at shutdown", display_id);
            let _ = self.release_virtual_display(display_id);
        }
    }
}

fn mode_info(mode: &CGDisplayMode) -> ModeInfo {
    ModeInfo::new(
        mode.width() as usize,
        mode.height() as usize,
        mode.pixel_width() as usize,
        mode.pixel_height() as usize,
        mode.refresh_rate(),
    )
}

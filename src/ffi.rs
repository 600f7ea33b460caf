//! C ABI.
//!
//! Every entry point works on one process-wide [`DisplayBridge`], created by
//! [`vdb_initialize`] or lazily by the first call, and dropped by
//! [`vdb_shutdown`]. Failures are reported through sentinels (`0`, `false`)
//! or `CGError` codes (`0` means success); panics never unwind into the
//! caller.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::config::BridgeConfig;
use crate::display::{DisplayBridge, DisplayMode, DisplaySettings, ModeInfo};
use crate::logging;
use crate::service::{self, cg_error, DisplayError, DisplayId, DisplayResult, INVALID_DISPLAY_ID};

static BRIDGE: Mutex<Option<Arc<DisplayBridge>>> = parking_lot::const_mutex(None);

fn create_bridge() -> anyhow::Result<DisplayBridge> {
    let config = BridgeConfig::load_or_default();
    logging::init(&config.log_filter);
    DisplayBridge::new(service::platform_service(), config)
}

/// The process-wide bridge, created on first use.
///
/// The lock is released before the caller works with the bridge, so
/// termination callbacks may call back into this module.
fn bridge() -> Option<Arc<DisplayBridge>> {
    let mut slot = BRIDGE.lock();
    if slot.is_none() {
        match create_bridge() {
            Ok(bridge) => *slot = Some(Arc::new(bridge)),
            Err(e) => {
                error!("❌ 初始化虚拟显示器桥接器失败: {}", e);
                return None;
            }
        }
    }
    slot.clone()
}

/// Replaces the process-wide bridge and returns the previous one.
#[cfg(test)]
pub(crate) fn install(bridge: Option<DisplayBridge>) -> Option<Arc<DisplayBridge>> {
    std::mem::replace(&mut *BRIDGE.lock(), bridge.map(Arc::new))
}

fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!("❌ panic caught at the C boundary");
            fallback
        }
    }
}

fn with_bridge<T>(fallback: T, f: impl FnOnce(&DisplayBridge) -> T) -> T {
    match guard(None, bridge) {
        Some(bridge) => guard(fallback, move || f(&bridge)),
        None => fallback,
    }
}

fn status(result: DisplayResult<()>) -> i32 {
    match result {
        Ok(()) => cg_error::SUCCESS,
        Err(e) => e.code(),
    }
}

/// # Safety
/// `name` must be null or a valid NUL-terminated string.
unsafe fn read_name<'a>(name: *const c_char) -> DisplayResult<&'a str> {
    if name.is_null() {
        return Err(DisplayError::invalid("display name is null"));
    }
    CStr::from_ptr(name)
        .to_str()
        .map_err(|_| DisplayError::invalid("display name is not valid UTF-8"))
}

/// Copies into `out` with the truncate-but-report-true-count contract.
///
/// # Safety
/// `out` must be null or valid for `max` writes; `count` must be null or
/// valid for one write.
unsafe fn write_list<T: Copy>(
    out: *mut T,
    max: u32,
    count: *mut u32,
    list: impl FnOnce(&mut [T]) -> DisplayResult<usize>,
) -> i32 {
    if count.is_null() {
        return cg_error::ILLEGAL_ARGUMENT;
    }
    if out.is_null() && max > 0 {
        return cg_error::ILLEGAL_ARGUMENT;
    }

    let buffer: &mut [T] = if max == 0 {
        &mut []
    } else {
        slice::from_raw_parts_mut(out, max as usize)
    };
    match list(buffer) {
        Ok(total) => {
            *count = u32::try_from(total).unwrap_or(u32::MAX);
            cg_error::SUCCESS
        }
        Err(e) => e.code(),
    }
}

unsafe fn store<T>(ptr: *mut T, value: T) {
    if !ptr.is_null() {
        *ptr = value;
    }
}

/// Creates the process-wide bridge. Later calls are no-ops.
#[no_mangle]
pub extern "C" fn vdb_initialize() -> bool {
    guard(false, || bridge().is_some())
}

/// Destroys every live virtual display and drops the bridge.
#[no_mangle]
pub extern "C" fn vdb_shutdown() {
    guard((), || {
        let previous = BRIDGE.lock().take();
        if let Some(bridge) = previous {
            bridge.shutdown();
            info!("🔌 虚拟显示器桥接器已关闭");
        }
    })
}

/// Returns the new display ID, or 0 on failure.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vdb_create_virtual_display(
    width: u32,
    height: u32,
    refresh_rate: f64,
    name: *const c_char,
) -> u32 {
    with_bridge(INVALID_DISPLAY_ID, |bridge| {
        let hi_dpi = bridge.config().default_hi_dpi;
        create(bridge, width, height, refresh_rate, name, hi_dpi)
    })
}

/// Same as [`vdb_create_virtual_display`] with an explicit HiDPI flag.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vdb_create_virtual_display_hidpi(
    width: u32,
    height: u32,
    refresh_rate: f64,
    name: *const c_char,
    hi_dpi: bool,
) -> u32 {
    with_bridge(INVALID_DISPLAY_ID, |bridge| {
        create(bridge, width, height, refresh_rate, name, hi_dpi)
    })
}

unsafe fn create(
    bridge: &DisplayBridge,
    width: u32,
    height: u32,
    refresh_rate: f64,
    name: *const c_char,
    hi_dpi: bool,
) -> DisplayId {
    let result = read_name(name).and_then(|name| {
        bridge.create_virtual_display_with_hi_dpi(width, height, refresh_rate, name, hi_dpi)
    });
    match result {
        Ok(display_id) => display_id,
        Err(e) => {
            warn!("⚠️ vdb_create_virtual_display failed: {}", e);
            INVALID_DISPLAY_ID
        }
    }
}

/// Applies `count` modes (first one preferred) and the HiDPI flag.
///
/// # Safety
/// `modes` must be null or valid for `count` reads.
#[no_mangle]
pub unsafe extern "C" fn vdb_apply_display_modes(
    display_id: u32,
    modes: *const DisplayMode,
    count: u32,
    hi_dpi: bool,
) -> i32 {
    with_bridge(cg_error::FAILURE, |bridge| {
        if modes.is_null() || count == 0 {
            return cg_error::ILLEGAL_ARGUMENT;
        }
        let modes = slice::from_raw_parts(modes, count as usize).to_vec();
        status(bridge.apply_settings(display_id, DisplaySettings::new(modes, hi_dpi)))
    })
}

/// Returns `true` if this call destroyed the display. When it returns, the
/// display's termination handler has finished.
#[no_mangle]
pub extern "C" fn vdb_destroy_virtual_display(display_id: u32) -> bool {
    with_bridge(false, |bridge| bridge.destroy_virtual_display(display_id))
}

#[no_mangle]
pub extern "C" fn vdb_destroy_all_virtual_displays() {
    with_bridge((), |bridge| {
        bridge.destroy_all_virtual_displays();
    })
}

#[no_mangle]
pub extern "C" fn vdb_get_virtual_display_count() -> i32 {
    with_bridge(0, |bridge| {
        i32::try_from(bridge.virtual_display_count()).unwrap_or(i32::MAX)
    })
}

/// Makes `destination` mirror `source`. Returns a `CGError` code.
#[no_mangle]
pub extern "C" fn vdb_configure_mirroring(source: u32, destination: u32) -> i32 {
    with_bridge(cg_error::FAILURE, |bridge| {
        status(bridge.configure_mirroring(source, destination))
    })
}

#[no_mangle]
pub extern "C" fn vdb_stop_mirroring(display_id: u32) -> i32 {
    with_bridge(cg_error::FAILURE, |bridge| {
        status(bridge.stop_mirroring(display_id))
    })
}

/// Writes at most `max` IDs to `out` and the total number of active displays
/// to `count`.
///
/// # Safety
/// `out` must be null or valid for `max` writes; `count` must be null or
/// valid for one write.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_active_displays(
    out: *mut u32,
    max: u32,
    count: *mut u32,
) -> i32 {
    with_bridge(cg_error::FAILURE, |bridge| {
        write_list(out, max, count, |buffer| bridge.active_displays_into(buffer))
    })
}

/// Any output pointer may be null.
///
/// # Safety
/// Non-null pointers must be valid for one write.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_current_display_mode(
    display_id: u32,
    width: *mut usize,
    height: *mut usize,
    pixel_width: *mut usize,
    pixel_height: *mut usize,
    refresh_rate: *mut f64,
) -> i32 {
    with_bridge(cg_error::FAILURE, |bridge| {
        match bridge.current_display_mode(display_id) {
            Ok(mode) => {
                store(width, mode.width);
                store(height, mode.height);
                store(pixel_width, mode.pixel_width);
                store(pixel_height, mode.pixel_height);
                store(refresh_rate, mode.refresh_rate);
                cg_error::SUCCESS
            }
            Err(e) => e.code(),
        }
    })
}

/// Writes `0.0` for unknown displays.
///
/// # Safety
/// Non-null pointers must be valid for one write.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_display_physical_size(
    display_id: u32,
    width_mm: *mut f64,
    height_mm: *mut f64,
) {
    let (width, height) = with_bridge((0.0, 0.0), |bridge| {
        bridge.display_physical_size(display_id)
    });
    store(width_mm, width);
    store(height_mm, height);
}

#[no_mangle]
pub extern "C" fn vdb_is_built_in_display(display_id: u32) -> bool {
    with_bridge(false, |bridge| bridge.is_built_in_display(display_id))
}

#[no_mangle]
pub extern "C" fn vdb_get_main_display_id() -> u32 {
    with_bridge(INVALID_DISPLAY_ID, |bridge| bridge.main_display_id())
}

/// Writes at most `max` modes to `out` and the total number of modes to
/// `count`.
///
/// # Safety
/// `out` must be null or valid for `max` writes; `count` must be null or
/// valid for one write.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_display_modes(
    display_id: u32,
    out: *mut ModeInfo,
    max: u32,
    count: *mut u32,
) -> i32 {
    with_bridge(cg_error::FAILURE, |bridge| {
        write_list(out, max, count, |buffer| {
            bridge.display_modes_into(display_id, buffer)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::simulated::{PhysicalPanel, SimulatedDisplayService};
    use std::ffi::CString;

    static TEST_LOCK: Mutex<()> = parking_lot::const_mutex(());

    /// Installs a bridge over a simulated window server for one test.
    fn with_simulated_bridge(test: impl FnOnce(&SimulatedDisplayService)) {
        let _serial = TEST_LOCK.lock();
        let service = Arc::new(SimulatedDisplayService::with_panels(vec![
            PhysicalPanel::built_in_retina(1),
            PhysicalPanel::external_monitor(2),
        ]));
        let bridge = DisplayBridge::new(service.clone(), BridgeConfig::default()).unwrap();
        install(Some(bridge));

        test(&service);

        vdb_shutdown();
    }

    fn create(width: u32, height: u32, name: &str) -> u32 {
        let name = CString::new(name).unwrap();
        unsafe { vdb_create_virtual_display(width, height, 60.0, name.as_ptr()) }
    }

    #[test]
    fn test_create_and_destroy() {
        with_simulated_bridge(|service| {
            let id = create(1920, 1080, "Virtual");
            assert_ne!(id, 0);
            assert_eq!(vdb_get_virtual_display_count(), 1);
            assert_eq!(service.virtual_display_count(), 1);

            assert!(vdb_destroy_virtual_display(id));
            assert!(!vdb_destroy_virtual_display(id));
            assert_eq!(vdb_get_virtual_display_count(), 0);
        });
    }

    #[test]
    fn test_invalid_create_returns_zero() {
        with_simulated_bridge(|_| {
            assert_eq!(create(0x600, 0, "Virtual"), 0);
            assert_eq!(create(0, 0x600, "Virtual"), 0);
            assert_eq!(
                unsafe { vdb_create_virtual_display(1920, 1080, 60.0, std::ptr::null()) },
                0
            );
            assert_eq!(vdb_get_virtual_display_count(), 0);
        });
    }

    #[test]
    fn test_destroy_all() {
        with_simulated_bridge(|service| {
            for _ in 0..3 {
                assert_ne!(create(1280, 720, "Virtual"), 0);
            }
            vdb_destroy_all_virtual_displays();
            assert_eq!(vdb_get_virtual_display_count(), 0);
            assert_eq!(service.virtual_display_count(), 0);
        });
    }

    #[test]
    fn test_apply_display_modes() {
        with_simulated_bridge(|_| {
            let id = unsafe {
                let name = CString::new("Retina").unwrap();
                vdb_create_virtual_display_hidpi(1920, 1080, 60.0, name.as_ptr(), true)
            };
            assert_ne!(id, 0);

            let modes = [
                DisplayMode::new(1600, 900, 60.0),
                DisplayMode::new(1280, 720, 60.0),
            ];
            let code = unsafe { vdb_apply_display_modes(id, modes.as_ptr(), 2, true) };
            assert_eq!(code, cg_error::SUCCESS);

            let (mut w, mut h, mut pw, mut ph) = (0usize, 0usize, 0usize, 0usize);
            let mut rate = 0.0f64;
            let code = unsafe {
                vdb_get_current_display_mode(id, &mut w, &mut h, &mut pw, &mut ph, &mut rate)
            };
            assert_eq!(code, cg_error::SUCCESS);
            assert_eq!((w, h, pw, ph), (1600, 900, 3200, 1800));
            assert_eq!(rate, 60.0);

            let code = unsafe { vdb_apply_display_modes(id, std::ptr::null(), 0, false) };
            assert_eq!(code, cg_error::ILLEGAL_ARGUMENT);
            let code = unsafe { vdb_apply_display_modes(999, modes.as_ptr(), 2, false) };
            assert_eq!(code, cg_error::RANGE_CHECK);
        });
    }

    #[test]
    fn test_active_displays_truncation() {
        with_simulated_bridge(|_| {
            create(1920, 1080, "Virtual");

            let mut count = 0u32;
            let code = unsafe { vdb_get_active_displays(std::ptr::null_mut(), 0, &mut count) };
            assert_eq!(code, cg_error::SUCCESS);
            assert_eq!(count, 3);

            let mut out = [0u32; 2];
            let code = unsafe { vdb_get_active_displays(out.as_mut_ptr(), 2, &mut count) };
            assert_eq!(code, cg_error::SUCCESS);
            assert_eq!(count, 3);
            assert_eq!(out, [1, 2]);

            let code =
                unsafe { vdb_get_active_displays(out.as_mut_ptr(), 2, std::ptr::null_mut()) };
            assert_eq!(code, cg_error::ILLEGAL_ARGUMENT);
        });
    }

    #[test]
    fn test_display_modes_truncation() {
        with_simulated_bridge(|_| {
            let mut count = 0u32;
            let mut out = [ModeInfo::default(); 1];
            let code = unsafe { vdb_get_display_modes(1, out.as_mut_ptr(), 1, &mut count) };
            assert_eq!(code, cg_error::SUCCESS);
            assert_eq!(count, 3);
            assert!(out[0].is_hidpi);

            let code = unsafe { vdb_get_display_modes(42, out.as_mut_ptr(), 1, &mut count) };
            assert_eq!(code, cg_error::RANGE_CHECK);
        });
    }

    #[test]
    fn test_mirroring_codes() {
        with_simulated_bridge(|service| {
            let id = create(1920, 1080, "Virtual");

            assert_eq!(vdb_configure_mirroring(id, id), cg_error::ILLEGAL_ARGUMENT);
            assert_eq!(vdb_configure_mirroring(1, 999), cg_error::RANGE_CHECK);
            assert_eq!(vdb_configure_mirroring(1, id), cg_error::SUCCESS);
            assert_eq!(service.mirror_source_of(id), Some(1));
            assert_eq!(vdb_stop_mirroring(id), cg_error::SUCCESS);
            assert_eq!(service.mirror_source_of(id), None);
        });
    }

    #[test]
    fn test_physical_queries() {
        with_simulated_bridge(|_| {
            assert_eq!(vdb_get_main_display_id(), 1);
            assert!(vdb_is_built_in_display(1));
            assert!(!vdb_is_built_in_display(2));

            let (mut width_mm, mut height_mm) = (-1.0f64, -1.0f64);
            unsafe { vdb_get_display_physical_size(2, &mut width_mm, &mut height_mm) };
            assert_eq!((width_mm, height_mm), (597.0, 336.0));

            unsafe { vdb_get_display_physical_size(77, &mut width_mm, &mut height_mm) };
            assert_eq!((width_mm, height_mm), (0.0, 0.0));

            let code = unsafe {
                vdb_get_current_display_mode(
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            assert_eq!(code, cg_error::RANGE_CHECK);
        });
    }

    #[test]
    fn test_shutdown_destroys_live_displays() {
        let _serial = TEST_LOCK.lock();
        let service = Arc::new(SimulatedDisplayService::new());
        install(Some(
            DisplayBridge::new(service.clone(), BridgeConfig::default()).unwrap(),
        ));

        create(1920, 1080, "Virtual");
        create(1280, 720, "Virtual");
        assert_eq!(service.virtual_display_count(), 2);

        vdb_shutdown();
        assert_eq!(service.virtual_display_count(), 0);
        // 重复关闭无副作用
        vdb_shutdown();
    }
}

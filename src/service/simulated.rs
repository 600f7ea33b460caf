//! In-memory window server.
//!
//! Behaves like the macOS display subsystem as far as the bridge can observe:
//! identifiers are handed out monotonically and never reused, a virtual
//! display has no current mode until settings are applied, mirror
//! destinations drop out of the active list, and tearing a display down fires
//! its termination handler on the descriptor's queue.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use parking_lot::Mutex;

use super::{cg_error, DisplayError, DisplayId, DisplayResult, DisplayService};
use crate::display::{DisplayDescriptor, DisplaySettings, ModeInfo};
use crate::queue::ExecutionQueue;
use crate::termination::TerminationHandler;

const FIRST_VIRTUAL_ID: DisplayId = 0x10;

/// A physical panel known to the simulated window server.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalPanel {
    pub display_id: DisplayId,
    pub built_in: bool,
    pub size_in_millimeters: (f64, f64),
    /// Supported modes; the first one is current.
    pub modes: Vec<ModeInfo>,
}

impl PhysicalPanel {
    /// A 14" Retina laptop panel.
    pub fn built_in_retina(display_id: DisplayId) -> Self {
        Self {
            display_id,
            built_in: true,
            size_in_millimeters: (302.0, 196.0),
            modes: vec![
                ModeInfo::new(1512, 982, 3024, 1964, 120.0),
                ModeInfo::new(1352, 878, 2704, 1756, 120.0),
                ModeInfo::new(3024, 1964, 3024, 1964, 120.0),
            ],
        }
    }

    /// A 27" 1440p external monitor.
    pub fn external_monitor(display_id: DisplayId) -> Self {
        Self {
            display_id,
            built_in: false,
            size_in_millimeters: (597.0, 336.0),
            modes: vec![
                ModeInfo::new(2560, 1440, 2560, 1440, 60.0),
                ModeInfo::new(1920, 1080, 1920, 1080, 60.0),
            ],
        }
    }
}

enum SimulatedKind {
    Physical { built_in: bool },
    Virtual {
        termination: TerminationHandler,
        queue: ExecutionQueue,
    },
}

struct SimulatedDisplay {
    kind: SimulatedKind,
    size_in_millimeters: (f64, f64),
    modes: Vec<ModeInfo>,
    current: Option<usize>,
}

struct SimulatedState {
    next_id: DisplayId,
    displays: BTreeMap<DisplayId, SimulatedDisplay>,
    main_display: DisplayId,
    /// destination -> source
    mirrors: HashMap<DisplayId, DisplayId>,
    virtual_limit: usize,
    reject_next_create: Option<i32>,
    reject_next_settings: Option<i32>,
}

impl SimulatedState {
    fn virtual_count(&self) -> usize {
        self.displays
            .values()
            .filter(|display| matches!(display.kind, SimulatedKind::Virtual { .. }))
            .count()
    }

    fn forget_virtual(&mut self, display_id: DisplayId) -> Option<SimulatedDisplay> {
        let is_virtual = matches!(
            self.displays.get(&display_id).map(|display| &display.kind),
            Some(SimulatedKind::Virtual { .. })
        );
        if is_virtual {
            self.forget(display_id)
        } else {
            None
        }
    }

    fn forget(&mut self, display_id: DisplayId) -> Option<SimulatedDisplay> {
        let display = self.displays.remove(&display_id)?;
        self.mirrors
            .retain(|destination, source| *destination != display_id && *source != display_id);
        Some(display)
    }
}

pub struct SimulatedDisplayService {
    state: Mutex<SimulatedState>,
}

impl SimulatedDisplayService {
    /// One built-in Retina panel, which is also the main display.
    pub fn new() -> Self {
        Self::with_panels(vec![PhysicalPanel::built_in_retina(1)])
    }

    /// The first panel becomes the main display.
    pub fn with_panels(panels: Vec<PhysicalPanel>) -> Self {
        let main_display = panels.first().map(|panel| panel.display_id).unwrap_or(0);
        let next_id = panels
            .iter()
            .map(|panel| panel.display_id + 1)
            .max()
            .unwrap_or(FIRST_VIRTUAL_ID)
            .max(FIRST_VIRTUAL_ID);

        let displays = panels
            .into_iter()
            .map(|panel| {
                let current = (!panel.modes.is_empty()).then_some(0);
                (
                    panel.display_id,
                    SimulatedDisplay {
                        kind: SimulatedKind::Physical {
                            built_in: panel.built_in,
                        },
                        size_in_millimeters: panel.size_in_millimeters,
                        modes: panel.modes,
                        current,
                    },
                )
            })
            .collect();

        Self {
            state: Mutex::new(SimulatedState {
                next_id,
                displays,
                main_display,
                mirrors: HashMap::new(),
                virtual_limit: usize::MAX,
                reject_next_create: None,
                reject_next_settings: None,
            }),
        }
    }

    /// Caps how many virtual displays can exist at once.
    pub fn set_virtual_limit(&self, limit: usize) {
        self.state.lock().virtual_limit = limit;
    }

    /// The next create call fails with `code`.
    pub fn reject_next_create(&self, code: i32) {
        self.state.lock().reject_next_create = Some(code);
    }

    /// The next settings application fails with `code`.
    pub fn reject_next_settings(&self, code: i32) {
        self.state.lock().reject_next_settings = Some(code);
    }

    /// Tears a virtual display down the way the window server does on its
    /// own, e.g. when it restarts. The termination handler is scheduled on
    /// the descriptor's queue; this call does not wait for it.
    pub fn terminate_display(&self, display_id: DisplayId) -> bool {
        let removed = self.state.lock().forget_virtual(display_id);

        match removed {
            Some(SimulatedDisplay {
                kind: SimulatedKind::Virtual { termination, queue },
                ..
            }) => {
                info!("simulated window server terminated display {}", display_id);
                termination.fire_on(&queue);
                true
            }
            _ => false,
        }
    }

    /// The display `destination` currently mirrors, if any.
    pub fn mirror_source_of(&self, destination: DisplayId) -> Option<DisplayId> {
        self.state.lock().mirrors.get(&destination).copied()
    }

    pub fn virtual_display_count(&self) -> usize {
        self.state.lock().virtual_count()
    }
}

impl Default for SimulatedDisplayService {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayService for SimulatedDisplayService {
    fn create_virtual_display(&self, descriptor: &DisplayDescriptor) -> DisplayResult<DisplayId> {
        let mut state = self.state.lock();

        if let Some(code) = state.reject_next_create.take() {
            return Err(DisplayError::rejected_with(code, "create virtual display"));
        }
        if state.virtual_count() >= state.virtual_limit {
            return Err(DisplayError::rejected_with(
                cg_error::NONE_AVAILABLE,
                "create virtual display",
            ));
        }

        let display_id = state.next_id;
        state.next_id += 1;
        state.displays.insert(
            display_id,
            SimulatedDisplay {
                kind: SimulatedKind::Virtual {
                    termination: descriptor.termination_handler().clone(),
                    queue: descriptor.queue().clone(),
                },
                size_in_millimeters: descriptor.size_in_millimeters(),
                modes: Vec::new(),
                current: None,
            },
        );

        debug!(
            "simulated window server created display {} ('{}')",
            display_id,
            descriptor.name()
        );
        Ok(display_id)
    }

    fn apply_settings(
        &self,
        display_id: DisplayId,
        settings: &DisplaySettings,
    ) -> DisplayResult<()> {
        let mut state = self.state.lock();

        if let Some(code) = state.reject_next_settings.take() {
            return Err(DisplayError::rejected_with(code, "apply settings"));
        }
        if settings.modes.is_empty() {
            return Err(DisplayError::rejected_with(
                cg_error::ILLEGAL_ARGUMENT,
                "apply settings",
            ));
        }

        let display = state
            .displays
            .get_mut(&display_id)
            .filter(|display| matches!(display.kind, SimulatedKind::Virtual { .. }))
            .ok_or(DisplayError::UnknownDisplay(display_id))?;

        let scale = settings.scale_factor();
        display.modes = settings
            .modes
            .iter()
            .map(|mode| ModeInfo::from_mode(mode, scale))
            .collect();
        display.current = Some(0);
        Ok(())
    }

    fn release_virtual_display(&self, display_id: DisplayId) -> DisplayResult<()> {
        let removed = self.state.lock().forget_virtual(display_id);

        match removed {
            // Releasing the last reference terminates the display, which the
            // window server reports through the termination handler as well.
            Some(SimulatedDisplay {
                kind: SimulatedKind::Virtual { termination, queue },
                ..
            }) => {
                termination.fire_on(&queue);
                Ok(())
            }
            _ => Err(DisplayError::UnknownDisplay(display_id)),
        }
    }

    fn active_displays(&self) -> DisplayResult<Vec<DisplayId>> {
        let state = self.state.lock();
        Ok(state
            .displays
            .keys()
            .filter(|display_id| !state.mirrors.contains_key(*display_id))
            .copied()
            .collect())
    }

    fn online_displays(&self) -> DisplayResult<Vec<DisplayId>> {
        Ok(self.state.lock().displays.keys().copied().collect())
    }

    fn current_mode(&self, display_id: DisplayId) -> DisplayResult<ModeInfo> {
        let state = self.state.lock();
        let display = state
            .displays
            .get(&display_id)
            .ok_or(DisplayError::UnknownDisplay(display_id))?;
        display
            .current
            .and_then(|index| display.modes.get(index))
            .copied()
            .ok_or(DisplayError::NoData(display_id))
    }

    fn physical_size(&self, display_id: DisplayId) -> (f64, f64) {
        self.state
            .lock()
            .displays
            .get(&display_id)
            .map(|display| display.size_in_millimeters)
            .unwrap_or((0.0, 0.0))
    }

    fn is_built_in(&self, display_id: DisplayId) -> bool {
        matches!(
            self.state.lock().displays.get(&display_id).map(|d| &d.kind),
            Some(SimulatedKind::Physical { built_in: true })
        )
    }

    fn main_display(&self) -> DisplayId {
        self.state.lock().main_display
    }

    fn display_modes(&self, display_id: DisplayId) -> DisplayResult<Vec<ModeInfo>> {
        self.state
            .lock()
            .displays
            .get(&display_id)
            .map(|display| display.modes.clone())
            .ok_or(DisplayError::UnknownDisplay(display_id))
    }

    fn configure_mirroring(&self, source: DisplayId, destination: DisplayId) -> DisplayResult<()> {
        let mut state = self.state.lock();

        for display_id in [source, destination] {
            if !state.displays.contains_key(&display_id) {
                return Err(DisplayError::UnknownDisplay(display_id));
            }
        }
        if source == destination || state.mirrors.get(&source) == Some(&destination) {
            return Err(DisplayError::rejected_with(
                cg_error::ILLEGAL_ARGUMENT,
                "configure mirroring",
            ));
        }

        state.mirrors.insert(destination, source);
        Ok(())
    }

    fn stop_mirroring(&self, display_id: DisplayId) -> DisplayResult<()> {
        let mut state = self.state.lock();
        if !state.displays.contains_key(&display_id) {
            return Err(DisplayError::UnknownDisplay(display_id));
        }
        state.mirrors.remove(&display_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayMode, DisplaySettings};

    fn descriptor(name: &str) -> DisplayDescriptor {
        DisplayDescriptor::builder(name)
            .max_pixels(3840, 2160)
            .size_in_millimeters(443.0, 249.0)
            .queue(ExecutionQueue::new("test.simulated").unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_ids_are_monotonic() {
        let service = SimulatedDisplayService::new();
        let a = service.create_virtual_display(&descriptor("a")).unwrap();
        service.release_virtual_display(a).unwrap();
        let b = service.create_virtual_display(&descriptor("b")).unwrap();

        assert!(b > a);
        assert_eq!(service.virtual_display_count(), 1);
    }

    #[test]
    fn test_new_virtual_display_has_no_current_mode() {
        let service = SimulatedDisplayService::new();
        let id = service.create_virtual_display(&descriptor("a")).unwrap();

        assert_eq!(service.current_mode(id), Err(DisplayError::NoData(id)));
        assert_eq!(service.current_mode(999), Err(DisplayError::UnknownDisplay(999)));

        let settings = DisplaySettings::single(DisplayMode::new(1280, 720, 60.0), true);
        service.apply_settings(id, &settings).unwrap();

        let mode = service.current_mode(id).unwrap();
        assert_eq!((mode.width, mode.pixel_width), (1280, 2560));
    }

    #[test]
    fn test_physical_panels() {
        let service = SimulatedDisplayService::with_panels(vec![
            PhysicalPanel::built_in_retina(1),
            PhysicalPanel::external_monitor(2),
        ]);

        assert_eq!(service.main_display(), 1);
        assert!(service.is_built_in(1));
        assert!(!service.is_built_in(2));
        assert_eq!(service.physical_size(2), (597.0, 336.0));
        assert_eq!(service.physical_size(42), (0.0, 0.0));
        assert_eq!(service.active_displays().unwrap(), vec![1, 2]);
        assert!(service.release_virtual_display(1).is_err());
    }

    #[test]
    fn test_mirror_destination_leaves_active_list() {
        let service = SimulatedDisplayService::new();
        let id = service.create_virtual_display(&descriptor("a")).unwrap();

        service.configure_mirroring(1, id).unwrap();
        assert_eq!(service.mirror_source_of(id), Some(1));
        assert_eq!(service.active_displays().unwrap(), vec![1]);
        assert_eq!(service.online_displays().unwrap(), vec![1, id]);

        service.stop_mirroring(id).unwrap();
        assert_eq!(service.active_displays().unwrap(), vec![1, id]);
    }

    #[test]
    fn test_virtual_limit() {
        let service = SimulatedDisplayService::new();
        service.set_virtual_limit(1);

        service.create_virtual_display(&descriptor("a")).unwrap();
        let err = service.create_virtual_display(&descriptor("b")).unwrap_err();
        assert_eq!(err.code(), cg_error::NONE_AVAILABLE);
    }
}

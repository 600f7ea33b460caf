use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::VirtualDisplay;
use crate::service::{DisplayError, DisplayId, DisplayResult, INVALID_DISPLAY_ID};

/// 虚拟显示器注册表
/// 负责记录本进程创建的所有虚拟显示器，所有插入与移除操作互斥执行
#[derive(Default)]
pub struct DisplayRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// 存活的显示器
    displays: HashMap<DisplayId, Arc<VirtualDisplay>>,
    /// 已销毁的显示器ID，永不复用
    retired: HashSet<DisplayId>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新创建的显示器
    /// ID 正在使用或曾经被使用过时拒绝注册
    pub fn insert(&self, display: Arc<VirtualDisplay>) -> DisplayResult<()> {
        let display_id = display.display_id();
        if display_id == INVALID_DISPLAY_ID {
            return Err(DisplayError::DuplicateIdentifier(display_id));
        }

        let mut state = self.state.lock();
        if state.displays.contains_key(&display_id) || state.retired.contains(&display_id) {
            return Err(DisplayError::DuplicateIdentifier(display_id));
        }
        state.displays.insert(display_id, display);
        Ok(())
    }

    /// 移除显示器
    /// 并发移除同一ID时只有一个调用者能拿到句柄
    pub fn remove(&self, display_id: DisplayId) -> Option<Arc<VirtualDisplay>> {
        let mut state = self.state.lock();
        let display = state.displays.remove(&display_id)?;
        state.retired.insert(display_id);
        Some(display)
    }

    /// 一次性移除全部显示器
    pub fn drain(&self) -> Vec<Arc<VirtualDisplay>> {
        let mut state = self.state.lock();
        let drained: Vec<_> = state.displays.drain().map(|(_, display)| display).collect();
        state
            .retired
            .extend(drained.iter().map(|display| display.display_id()));
        drained
    }

    pub fn get(&self, display_id: DisplayId) -> Option<Arc<VirtualDisplay>> {
        self.state.lock().displays.get(&display_id).cloned()
    }

    pub fn contains(&self, display_id: DisplayId) -> bool {
        self.state.lock().displays.contains_key(&display_id)
    }

    pub fn was_retired(&self, display_id: DisplayId) -> bool {
        self.state.lock().retired.contains(&display_id)
    }

    pub fn count(&self) -> usize {
        self.state.lock().displays.len()
    }

    /// 按ID升序返回所有存活显示器
    pub fn ids(&self) -> Vec<DisplayId> {
        let mut ids: Vec<_> = self.state.lock().displays.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn all(&self) -> Vec<Arc<VirtualDisplay>> {
        let mut displays: Vec<_> = self.state.lock().displays.values().cloned().collect();
        displays.sort_unstable_by_key(|display| display.display_id());
        displays
    }

    /// 获取注册表统计信息
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            live_displays: state.displays.len(),
            hi_dpi_displays: state
                .displays
                .values()
                .filter(|display| display.hi_dpi() == 1)
                .count(),
            retired_displays: state.retired.len(),
        }
    }
}

/// 注册表统计信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// 存活显示器数量
    pub live_displays: usize,
    /// 启用 HiDPI 的显示器数量
    pub hi_dpi_displays: usize,
    /// 已销毁显示器数量
    pub retired_displays: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayDescriptor, DisplayMode, DisplaySettings};
    use crate::queue::ExecutionQueue;

    fn make_display(display_id: DisplayId, hi_dpi: bool) -> Arc<VirtualDisplay> {
        let descriptor = DisplayDescriptor::builder(format!("Display {}", display_id))
            .max_pixels(3840, 2160)
            .size_in_millimeters(443.0, 249.0)
            .queue(ExecutionQueue::new("test.registry").unwrap())
            .build()
            .unwrap();
        let settings = DisplaySettings::single(DisplayMode::new(1920, 1080, 60.0), hi_dpi);
        Arc::new(VirtualDisplay::new(display_id, &descriptor, settings))
    }

    #[test]
    fn test_display_registry_creation() {
        let registry = DisplayRegistry::new();

        let stats = registry.stats();
        assert_eq!(stats.live_displays, 0);
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn test_insert_and_remove_display() {
        let registry = DisplayRegistry::new();
        registry.insert(make_display(7, true)).unwrap();
        registry.insert(make_display(3, false)).unwrap();

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.ids(), vec![3, 7]);
        assert_eq!(registry.stats().hi_dpi_displays, 1);

        let removed = registry.remove(7);
        assert_eq!(removed.map(|d| d.display_id()), Some(7));
        assert!(registry.remove(7).is_none());
        assert!(registry.was_retired(7));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_retired_ids_are_never_reused() {
        let registry = DisplayRegistry::new();
        registry.insert(make_display(5, false)).unwrap();

        assert_eq!(
            registry.insert(make_display(5, false)),
            Err(DisplayError::DuplicateIdentifier(5))
        );

        registry.remove(5);
        assert_eq!(
            registry.insert(make_display(5, false)),
            Err(DisplayError::DuplicateIdentifier(5))
        );
        assert!(registry.insert(make_display(INVALID_DISPLAY_ID, false)).is_err());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = DisplayRegistry::new();
        assert!(registry.drain().is_empty());

        registry.insert(make_display(1, false)).unwrap();
        registry.insert(make_display(2, false)).unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.stats().retired_displays, 2);
    }
}

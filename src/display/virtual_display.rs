use std::time::SystemTime;

use parking_lot::{RwLock, RwLockWriteGuard};

use super::{DisplayDescriptor, DisplayMode, DisplaySettings};
use crate::queue::ExecutionQueue;
use crate::service::DisplayId;
use crate::termination::TerminationHandler;

/// 已创建的虚拟显示器句柄
///
/// 身份与几何信息是创建时从描述符复制的只读副本，
/// 当前应用的模式列表与 HiDPI 标志随 `apply_settings` 更新。
#[derive(Debug)]
pub struct VirtualDisplay {
    display_id: DisplayId,
    vendor_id: u32,
    product_id: u32,
    serial_num: u32,
    name: String,
    size_in_millimeters: (f64, f64),
    max_pixels_wide: u32,
    max_pixels_high: u32,
    settings: RwLock<DisplaySettings>,
    termination: TerminationHandler,
    queue: ExecutionQueue,
    created_at: SystemTime,
}

impl VirtualDisplay {
    pub(crate) fn new(
        display_id: DisplayId,
        descriptor: &DisplayDescriptor,
        settings: DisplaySettings,
    ) -> Self {
        Self {
            display_id,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            serial_num: descriptor.serial_num(),
            name: descriptor.name().to_string(),
            size_in_millimeters: descriptor.size_in_millimeters(),
            max_pixels_wide: descriptor.max_pixels_wide(),
            max_pixels_high: descriptor.max_pixels_high(),
            settings: RwLock::new(settings),
            termination: descriptor.termination_handler().clone(),
            queue: descriptor.queue().clone(),
            created_at: SystemTime::now(),
        }
    }

    pub fn display_id(&self) -> DisplayId {
        self.display_id
    }

    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u32 {
        self.product_id
    }

    pub fn serial_num(&self) -> u32 {
        self.serial_num
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_in_millimeters(&self) -> (f64, f64) {
        self.size_in_millimeters
    }

    pub fn max_pixels_wide(&self) -> u32 {
        self.max_pixels_wide
    }

    pub fn max_pixels_high(&self) -> u32 {
        self.max_pixels_high
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// 当前 HiDPI 标志（0 或 1）
    pub fn hi_dpi(&self) -> u32 {
        self.settings.read().hi_dpi_flag()
    }

    pub fn modes(&self) -> Vec<DisplayMode> {
        self.settings.read().modes.clone()
    }

    pub fn preferred_mode(&self) -> Option<DisplayMode> {
        self.settings.read().preferred_mode().copied()
    }

    pub fn settings(&self) -> DisplaySettings {
        self.settings.read().clone()
    }

    /// 持有写锁直到新设置被接受，同一显示器上的设置应用因此串行执行
    pub(crate) fn settings_mut(&self) -> RwLockWriteGuard<'_, DisplaySettings> {
        self.settings.write()
    }

    pub(crate) fn termination(&self) -> &TerminationHandler {
        &self.termination
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// 终止回调是否已执行完毕
    pub fn is_terminated(&self) -> bool {
        self.termination.has_fired()
    }

    /// 等待终止回调执行完毕
    pub async fn terminated(&self) {
        self.termination.wait().await
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::descriptor::validate_name;
use super::{
    DisplayDescriptor, DisplayMode, DisplayRegistry, DisplaySettings, IdentityAllocator,
    ModeInfo, RegistryStats, VirtualDisplay,
};
use crate::config::BridgeConfig;
use crate::queue::ExecutionQueue;
use crate::service::{
    DisplayError, DisplayId, DisplayResult, DisplayService, INVALID_DISPLAY_ID,
};
use crate::termination::TerminationHandler;

/// 虚拟显示器桥接器
/// 负责虚拟显示器的创建、设置应用、销毁、镜像配置与查询
///
/// 桥接器拥有显式的生命周期：`shutdown`（或 drop）时销毁所有存活的显示器。
pub struct DisplayBridge {
    service: Arc<dyn DisplayService>,
    registry: Arc<DisplayRegistry>,
    identities: Arc<Mutex<IdentityAllocator>>,
    queue: ExecutionQueue,
    config: BridgeConfig,
}

/// 写入调用方缓冲区，返回真实总数
/// 缓冲区不足时静默截断，调用方通过比较返回值与容量发现截断
pub fn fill_truncated<T: Copy>(source: &[T], out: &mut [T]) -> usize {
    let written = source.len().min(out.len());
    out[..written].copy_from_slice(&source[..written]);
    source.len()
}

impl DisplayBridge {
    /// 创建新的桥接器
    pub fn new(service: Arc<dyn DisplayService>, config: BridgeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let queue = ExecutionQueue::new(config.queue_label.clone())?;
        let identities =
            IdentityAllocator::new(config.vendor_id, config.product_id, config.serial_base);

        Ok(Self {
            service,
            registry: Arc::new(DisplayRegistry::new()),
            identities: Arc::new(Mutex::new(identities)),
            queue,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// 默认的终止回调队列
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// 以给定逻辑尺寸和刷新率创建虚拟显示器
    pub fn create_virtual_display(
        &self,
        width: u32,
        height: u32,
        refresh_rate: f64,
        name: &str,
    ) -> DisplayResult<DisplayId> {
        self.create_virtual_display_with_hi_dpi(
            width,
            height,
            refresh_rate,
            name,
            self.config.default_hi_dpi,
        )
    }

    pub fn create_virtual_display_with_hi_dpi(
        &self,
        width: u32,
        height: u32,
        refresh_rate: f64,
        name: &str,
        hi_dpi: bool,
    ) -> DisplayResult<DisplayId> {
        let mode = DisplayMode::new(width, height, refresh_rate);
        if let Err(e) = mode.validate().and_then(|_| validate_name(name)) {
            warn!("⚠️ 拒绝创建虚拟显示器 '{}': {}", name, e);
            return Err(e);
        }

        let identity = self.identities.lock().allocate();
        let scale = self.config.max_scale_factor;
        let (width_mm, height_mm) = self.config.millimeters_for(width, height);

        let descriptor = DisplayDescriptor::builder(name)
            .max_pixels(width.saturating_mul(scale), height.saturating_mul(scale))
            .size_in_millimeters(width_mm, height_mm)
            .identity(identity)
            .queue(self.queue.clone())
            .build();
        let descriptor = match descriptor {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.identities.lock().release(identity.serial_num);
                return Err(e);
            }
        };

        self.register(descriptor, DisplaySettings::single(mode, hi_dpi), true)
    }

    /// 使用调用方构建的描述符和设置创建虚拟显示器
    /// 描述符中的终止回调会在注册表移除之后执行
    pub fn create_virtual_display_with(
        &self,
        descriptor: DisplayDescriptor,
        settings: DisplaySettings,
    ) -> DisplayResult<DisplayId> {
        let owns_serial = self.identities.lock().reserve(descriptor.serial_num());
        if !owns_serial {
            warn!(
                "⚠️ 序列号 {} 已被存活的虚拟显示器使用，可能产生身份冲突",
                descriptor.serial_num()
            );
        }
        self.register(descriptor, settings, owns_serial)
    }

    fn register(
        &self,
        descriptor: DisplayDescriptor,
        settings: DisplaySettings,
        owns_serial: bool,
    ) -> DisplayResult<DisplayId> {
        let serial_num = descriptor.serial_num();
        let release_serial = || {
            if owns_serial {
                self.identities.lock().release(serial_num);
            }
        };

        if let Err(e) = descriptor.validate().and_then(|_| {
            settings.validate_for(descriptor.max_pixels_wide(), descriptor.max_pixels_high())
        }) {
            warn!("⚠️ 拒绝创建虚拟显示器 '{}': {}", descriptor.name(), e);
            release_serial();
            return Err(e);
        }

        let display_id_cell = Arc::new(AtomicU32::new(INVALID_DISPLAY_ID));
        let termination = self.chain_termination(
            display_id_cell.clone(),
            descriptor.termination_handler().clone(),
            owns_serial.then_some(serial_num),
        );
        let descriptor = descriptor.with_termination_handler(termination.clone());

        let display_id = match self.service.create_virtual_display(&descriptor) {
            Ok(INVALID_DISPLAY_ID) => {
                termination.cancel();
                release_serial();
                return Err(DisplayError::rejected("create virtual display"));
            }
            Ok(display_id) => display_id,
            Err(e) => {
                error!("❌ 窗口服务器拒绝创建虚拟显示器 '{}': {}", descriptor.name(), e);
                termination.cancel();
                release_serial();
                return Err(e);
            }
        };
        display_id_cell.store(display_id, Ordering::SeqCst);

        if let Err(e) = self.service.apply_settings(display_id, &settings) {
            error!("❌ 虚拟显示器 {} 初始设置应用失败: {}", display_id, e);
            termination.cancel();
            if let Err(e) = self.service.release_virtual_display(display_id) {
                warn!("⚠️ 释放虚拟显示器 {} 失败: {}", display_id, e);
            }
            release_serial();
            return Err(e);
        }

        let display = Arc::new(VirtualDisplay::new(display_id, &descriptor, settings));
        if let Err(e) = self.registry.insert(display) {
            error!("❌ 虚拟显示器 {} 注册失败: {}", display_id, e);
            termination.cancel();
            if !self.registry.contains(display_id) {
                if let Err(e) = self.service.release_virtual_display(display_id) {
                    warn!("⚠️ 释放虚拟显示器 {} 失败: {}", display_id, e);
                }
            }
            release_serial();
            return Err(e);
        }

        // 注册前窗口服务器已经终止了该显示器
        if termination.is_claimed() && self.registry.remove(display_id).is_some() {
            warn!("⚠️ 虚拟显示器 {} 在注册过程中被系统终止", display_id);
            if let Err(e) = self.service.release_virtual_display(display_id) {
                warn!("⚠️ 释放虚拟显示器 {} 失败: {}", display_id, e);
            }
            release_serial();
            return Err(DisplayError::rejected(
                "virtual display was terminated while being created",
            ));
        }

        info!(
            "🆕 创建虚拟显示器 {}: '{}' ({}x{}, 序列号 {})",
            display_id,
            descriptor.name(),
            descriptor.max_pixels_wide(),
            descriptor.max_pixels_high(),
            serial_num
        );
        Ok(display_id)
    }

    /// 构建终止回调：先从注册表移除并释放系统对象，再执行调用方的回调
    fn chain_termination(
        &self,
        display_id_cell: Arc<AtomicU32>,
        caller: TerminationHandler,
        serial_num: Option<u32>,
    ) -> TerminationHandler {
        let registry: Weak<DisplayRegistry> = Arc::downgrade(&self.registry);
        let service: Weak<dyn DisplayService> = Arc::downgrade(&self.service);
        let identities = Arc::downgrade(&self.identities);

        TerminationHandler::new(move || {
            let display_id = display_id_cell.load(Ordering::SeqCst);
            let removed = registry
                .upgrade()
                .and_then(|registry| registry.remove(display_id))
                .is_some();

            // 系统主动终止时由这里完成清理；显式销毁时注册表已提前移除
            if removed {
                info!("🔌 虚拟显示器 {} 已被系统终止", display_id);
                if let Some(service) = service.upgrade() {
                    if let Err(e) = service.release_virtual_display(display_id) {
                        warn!("⚠️ 释放虚拟显示器 {} 失败: {}", display_id, e);
                    }
                }
                if let (Some(identities), Some(serial_num)) = (identities.upgrade(), serial_num) {
                    identities.lock().release(serial_num);
                }
            }

            caller.fire();
        })
    }

    /// 应用新的模式列表与 HiDPI 设置
    /// 失败时保留之前的设置
    pub fn apply_settings(
        &self,
        display_id: DisplayId,
        settings: DisplaySettings,
    ) -> DisplayResult<()> {
        let display = self
            .registry
            .get(display_id)
            .ok_or(DisplayError::UnknownDisplay(display_id))?;
        settings.validate_for(display.max_pixels_wide(), display.max_pixels_high())?;

        let mut current = display.settings_mut();
        if let Err(e) = self.service.apply_settings(display_id, &settings) {
            warn!("⚠️ 虚拟显示器 {} 设置应用失败: {}", display_id, e);
            return Err(e);
        }

        info!(
            "✅ 虚拟显示器 {} 已应用 {} 个模式 (HiDPI={})",
            display_id,
            settings.modes.len(),
            settings.hi_dpi_flag()
        );
        *current = settings;
        Ok(())
    }

    /// 销毁虚拟显示器
    /// 返回时终止回调已经执行完毕；未知或已销毁的ID返回 false
    pub fn destroy_virtual_display(&self, display_id: DisplayId) -> bool {
        match self.registry.remove(display_id) {
            Some(display) => {
                self.retire(&display);
                info!("🗑️ 销毁虚拟显示器 {}", display_id);
                true
            }
            None => {
                warn!("⚠️ 虚拟显示器 {} 不存在或已销毁", display_id);
                false
            }
        }
    }

    /// 销毁所有虚拟显示器
    pub fn destroy_all_virtual_displays(&self) -> usize {
        let displays = self.registry.drain();
        for display in &displays {
            self.retire(display);
        }
        if !displays.is_empty() {
            info!("🗑️ 已销毁全部 {} 个虚拟显示器", displays.len());
        }
        displays.len()
    }

    fn retire(&self, display: &VirtualDisplay) {
        let display_id = display.display_id();
        if let Err(e) = self.service.release_virtual_display(display_id) {
            warn!("⚠️ 释放虚拟显示器 {} 失败: {}", display_id, e);
        }
        display.termination().fire_on_and_wait(display.queue());
        self.identities.lock().release(display.serial_num());
    }

    /// 桥接器关闭：销毁所有存活的显示器
    pub fn shutdown(&self) {
        let destroyed = self.destroy_all_virtual_displays();
        debug!("bridge shut down, {} displays destroyed", destroyed);
    }

    pub fn virtual_display_count(&self) -> usize {
        self.registry.count()
    }

    pub fn virtual_display_ids(&self) -> Vec<DisplayId> {
        self.registry.ids()
    }

    pub fn virtual_display(&self, display_id: DisplayId) -> Option<Arc<VirtualDisplay>> {
        self.registry.get(display_id)
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn active_displays(&self) -> DisplayResult<Vec<DisplayId>> {
        self.service.active_displays()
    }

    /// 写入至多 `out.len()` 个显示器ID，返回真实总数
    pub fn active_displays_into(&self, out: &mut [DisplayId]) -> DisplayResult<usize> {
        let displays = self.active_displays()?;
        Ok(fill_truncated(&displays, out))
    }

    pub fn current_display_mode(&self, display_id: DisplayId) -> DisplayResult<ModeInfo> {
        if display_id == INVALID_DISPLAY_ID {
            return Err(DisplayError::UnknownDisplay(display_id));
        }
        self.service.current_mode(display_id)
    }

    /// 物理尺寸（毫米），未知显示器返回 (0, 0)
    pub fn display_physical_size(&self, display_id: DisplayId) -> (f64, f64) {
        if display_id == INVALID_DISPLAY_ID {
            return (0.0, 0.0);
        }
        self.service.physical_size(display_id)
    }

    pub fn is_built_in_display(&self, display_id: DisplayId) -> bool {
        display_id != INVALID_DISPLAY_ID && self.service.is_built_in(display_id)
    }

    pub fn main_display_id(&self) -> DisplayId {
        self.service.main_display()
    }

    pub fn display_modes(&self, display_id: DisplayId) -> DisplayResult<Vec<ModeInfo>> {
        if display_id == INVALID_DISPLAY_ID {
            return Err(DisplayError::UnknownDisplay(display_id));
        }
        self.service.display_modes(display_id)
    }

    /// 写入至多 `out.len()` 个模式，返回真实总数
    pub fn display_modes_into(
        &self,
        display_id: DisplayId,
        out: &mut [ModeInfo],
    ) -> DisplayResult<usize> {
        let modes = self.display_modes(display_id)?;
        Ok(fill_truncated(&modes, out))
    }

    fn ensure_online(&self, display_id: DisplayId) -> DisplayResult<()> {
        if display_id == INVALID_DISPLAY_ID || !self.service.online_displays()?.contains(&display_id)
        {
            return Err(DisplayError::UnknownDisplay(display_id));
        }
        Ok(())
    }

    /// 配置镜像：`destination` 镜像 `source` 的内容
    /// 镜像状态由系统持有，桥接器不做记录
    pub fn configure_mirroring(
        &self,
        source: DisplayId,
        destination: DisplayId,
    ) -> DisplayResult<()> {
        if source == destination {
            warn!("⚠️ 拒绝将显示器 {} 镜像到自身", source);
            return Err(DisplayError::invalid(format!(
                "display {} can not mirror itself",
                source
            )));
        }
        self.ensure_online(source)?;
        self.ensure_online(destination)?;

        self.service.configure_mirroring(source, destination)?;
        info!("🪞 显示器 {} 开始镜像显示器 {}", destination, source);
        Ok(())
    }

    /// 取消显示器的镜像关系
    pub fn stop_mirroring(&self, display_id: DisplayId) -> DisplayResult<()> {
        self.ensure_online(display_id)?;
        self.service.stop_mirroring(display_id)?;
        info!("🪞 显示器 {} 已停止镜像", display_id);
        Ok(())
    }
}

impl Drop for DisplayBridge {
    fn drop(&mut self) {
        self.shutdown();
        self.queue.shutdown();
    }
}

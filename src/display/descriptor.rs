use super::{DisplayIdentity, DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
use crate::queue::ExecutionQueue;
use crate::service::{DisplayError, DisplayResult};
use crate::termination::TerminationHandler;

/// CIE 1931 xy chromaticity coordinate.
pub type Chromaticity = (f64, f64);

/// sRGB primaries with a D65 white point.
pub const SRGB_RED: Chromaticity = (0.64, 0.33);
pub const SRGB_GREEN: Chromaticity = (0.30, 0.60);
pub const SRGB_BLUE: Chromaticity = (0.15, 0.06);
pub const D65_WHITE: Chromaticity = (0.3127, 0.3290);

/// Identity, geometry and colour description of a display to be created.
///
/// A descriptor is immutable once built. The window server copies what it
/// needs at creation time, so nothing done to a descriptor afterwards affects
/// the display it created.
///
/// Precondition: `serial_num` together with `vendor_id`/`product_id` should
/// be unique among live virtual displays of the process.
#[derive(Clone, Debug)]
pub struct DisplayDescriptor {
    max_pixels_wide: u32,
    max_pixels_high: u32,
    size_in_millimeters: (f64, f64),
    vendor_id: u32,
    product_id: u32,
    serial_num: u32,
    name: String,
    red_primary: Chromaticity,
    green_primary: Chromaticity,
    blue_primary: Chromaticity,
    white_point: Chromaticity,
    queue: ExecutionQueue,
    termination_handler: TerminationHandler,
}

impl DisplayDescriptor {
    pub fn builder(name: impl Into<String>) -> DisplayDescriptorBuilder {
        DisplayDescriptorBuilder::new(name)
    }

    pub fn max_pixels_wide(&self) -> u32 {
        self.max_pixels_wide
    }

    pub fn max_pixels_high(&self) -> u32 {
        self.max_pixels_high
    }

    pub fn size_in_millimeters(&self) -> (f64, f64) {
        self.size_in_millimeters
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

    pub fn identity(&self) -> DisplayIdentity {
        DisplayIdentity {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_num: self.serial_num,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn red_primary(&self) -> Chromaticity {
        self.red_primary
    }

    pub fn green_primary(&self) -> Chromaticity {
        self.green_primary
    }

    pub fn blue_primary(&self) -> Chromaticity {
        self.blue_primary
    }

    pub fn white_point(&self) -> Chromaticity {
        self.white_point
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn termination_handler(&self) -> &TerminationHandler {
        &self.termination_handler
    }

    /// Same descriptor with a different termination handler.
    pub(crate) fn with_termination_handler(mut self, handler: TerminationHandler) -> Self {
        self.termination_handler = handler;
        self
    }

    pub fn validate(&self) -> DisplayResult<()> {
        validate_name(&self.name)?;
        if self.max_pixels_wide == 0 || self.max_pixels_high == 0 {
            return Err(DisplayError::invalid(format!(
                "maximum pixel size {}x{} has a zero dimension",
                self.max_pixels_wide, self.max_pixels_high
            )));
        }
        let (width_mm, height_mm) = self.size_in_millimeters;
        if !(width_mm.is_finite() && height_mm.is_finite() && width_mm > 0.0 && height_mm > 0.0)
        {
            return Err(DisplayError::invalid(format!(
                "physical size {}x{}mm must be positive",
                width_mm, height_mm
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_name(name: &str) -> DisplayResult<()> {
    if name.trim().is_empty() {
        return Err(DisplayError::invalid("display name must not be empty"));
    }
    if name.contains('\0') {
        return Err(DisplayError::invalid("display name must not contain NUL"));
    }
    Ok(())
}

pub struct DisplayDescriptorBuilder {
    name: String,
    max_pixels: (u32, u32),
    size_in_millimeters: (f64, f64),
    identity: DisplayIdentity,
    primaries: [Chromaticity; 4],
    queue: Option<ExecutionQueue>,
    termination_handler: TerminationHandler,
}

impl DisplayDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_pixels: (0, 0),
            size_in_millimeters: (0.0, 0.0),
            identity: DisplayIdentity {
                vendor_id: DEFAULT_VENDOR_ID,
                product_id: DEFAULT_PRODUCT_ID,
                serial_num: 1,
            },
            primaries: [SRGB_RED, SRGB_GREEN, SRGB_BLUE, D65_WHITE],
            queue: None,
            termination_handler: TerminationHandler::noop(),
        }
    }

    pub fn max_pixels(mut self, wide: u32, high: u32) -> Self {
        self.max_pixels = (wide, high);
        self
    }

    pub fn size_in_millimeters(mut self, width: f64, height: f64) -> Self {
        self.size_in_millimeters = (width, height);
        self
    }

    pub fn identity(mut self, identity: DisplayIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn serial_num(mut self, serial_num: u32) -> Self {
        self.identity.serial_num = serial_num;
        self
    }

    pub fn primaries(
        mut self,
        red: Chromaticity,
        green: Chromaticity,
        blue: Chromaticity,
        white: Chromaticity,
    ) -> Self {
        self.primaries = [red, green, blue, white];
        self
    }

    pub fn queue(mut self, queue: ExecutionQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn termination_handler(mut self, handler: TerminationHandler) -> Self {
        self.termination_handler = handler;
        self
    }

    pub fn on_terminate(self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.termination_handler(TerminationHandler::new(callback))
    }

    pub fn build(self) -> DisplayResult<DisplayDescriptor> {
        let queue = self
            .queue
            .ok_or_else(|| DisplayError::invalid("descriptor needs an execution queue"))?;
        let [red, green, blue, white] = self.primaries;

        let descriptor = DisplayDescriptor {
            max_pixels_wide: self.max_pixels.0,
            max_pixels_high: self.max_pixels.1,
            size_in_millimeters: self.size_in_millimeters,
            vendor_id: self.identity.vendor_id,
            product_id: self.identity.product_id,
            serial_num: self.identity.serial_num,
            name: self.name,
            red_primary: red,
            green_primary: green,
            blue_primary: blue,
            white_point: white,
            queue,
            termination_handler: self.termination_handler,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> ExecutionQueue {
        ExecutionQueue::new("test.descriptor").unwrap()
    }

    #[test]
    fn test_builder_defaults_to_srgb() {
        let descriptor = DisplayDescriptor::builder("Virtual 1")
            .max_pixels(3840, 2160)
            .size_in_millimeters(443.4, 249.4)
            .queue(queue())
            .build()
            .unwrap();

        assert_eq!(descriptor.name(), "Virtual 1");
        assert_eq!(descriptor.red_primary(), SRGB_RED);
        assert_eq!(descriptor.white_point(), D65_WHITE);
        assert_eq!(descriptor.vendor_id(), DEFAULT_VENDOR_ID);
        assert_eq!(descriptor.max_pixels_wide(), 3840);
        assert!(!descriptor.termination_handler().is_claimed());
    }

    #[test]
    fn test_builder_rejects_invalid_descriptors() {
        let empty_name = DisplayDescriptor::builder("  ")
            .max_pixels(1920, 1080)
            .size_in_millimeters(400.0, 225.0)
            .queue(queue())
            .build();
        assert!(matches!(empty_name, Err(DisplayError::InvalidArgument(_))));

        let no_pixels = DisplayDescriptor::builder("x")
            .size_in_millimeters(400.0, 225.0)
            .queue(queue())
            .build();
        assert!(no_pixels.is_err());

        let no_size = DisplayDescriptor::builder("x")
            .max_pixels(1920, 1080)
            .queue(queue())
            .build();
        assert!(no_size.is_err());

        let no_queue = DisplayDescriptor::builder("x")
            .max_pixels(1920, 1080)
            .size_in_millimeters(400.0, 225.0)
            .build();
        assert!(no_queue.is_err());
    }

    #[test]
    fn test_identity_round_trips_through_builder() {
        let identity = DisplayIdentity {
            vendor_id: 0x1234,
            product_id: 0x5678,
            serial_num: 42,
        };
        let descriptor = DisplayDescriptor::builder("x")
            .max_pixels(100, 100)
            .size_in_millimeters(10.0, 10.0)
            .identity(identity)
            .queue(queue())
            .build()
            .unwrap();

        assert_eq!(descriptor.identity(), identity);
    }
}

use std::collections::HashSet;

/// Vendor ID reported by synthesised displays. Not assigned to any EDID PNP
/// manufacturer shipping Mac-compatible panels.
pub const DEFAULT_VENDOR_ID: u32 = 0xF0F0;
pub const DEFAULT_PRODUCT_ID: u32 = 0x1D51;

/// Identity triple reported to the window server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayIdentity {
    pub vendor_id: u32,
    pub product_id: u32,
    pub serial_num: u32,
}

/// Hands out serial numbers that are unique among live displays.
#[derive(Debug)]
pub struct IdentityAllocator {
    vendor_id: u32,
    product_id: u32,
    next_serial: u32,
    live_serials: HashSet<u32>,
}

impl IdentityAllocator {
    pub fn new(vendor_id: u32, product_id: u32, serial_base: u32) -> Self {
        Self {
            vendor_id,
            product_id,
            next_serial: serial_base.max(1),
            live_serials: HashSet::new(),
        }
    }

    /// Reserves the next free serial.
    pub fn allocate(&mut self) -> DisplayIdentity {
        loop {
            let serial = self.next_serial;
            self.next_serial = match self.next_serial.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if self.live_serials.insert(serial) {
                return DisplayIdentity {
                    vendor_id: self.vendor_id,
                    product_id: self.product_id,
                    serial_num: serial,
                };
            }
        }
    }

    /// Marks a caller-chosen serial as live. Returns `false` if it already was.
    pub fn reserve(&mut self, serial: u32) -> bool {
        self.live_serials.insert(serial)
    }

    pub fn release(&mut self, serial: u32) {
        self.live_serials.remove(&serial);
    }

    pub fn is_live(&self, serial: u32) -> bool {
        self.live_serials.contains(&serial)
    }

    pub fn live_count(&self) -> usize {
        self.live_serials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_are_unique_and_monotonic() {
        let mut allocator = IdentityAllocator::new(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID, 1);

        let a = allocator.allocate();
        let b = allocator.allocate();
        assert_eq!(a.serial_num, 1);
        assert_eq!(b.serial_num, 2);
        assert_eq!(a.vendor_id, DEFAULT_VENDOR_ID);
        assert_eq!(b.product_id, DEFAULT_PRODUCT_ID);

        // Released serials are not handed out again until the counter wraps.
        allocator.release(a.serial_num);
        assert_eq!(allocator.allocate().serial_num, 3);
    }

    #[test]
    fn test_reserved_serials_are_skipped() {
        let mut allocator = IdentityAllocator::new(1, 2, 10);
        assert!(allocator.reserve(10));
        assert!(!allocator.reserve(10));

        assert_eq!(allocator.allocate().serial_num, 11);
        assert_eq!(allocator.live_count(), 2);
    }

    #[test]
    fn test_counter_wraps_without_zero() {
        let mut allocator = IdentityAllocator::new(1, 2, u32::MAX);
        assert_eq!(allocator.allocate().serial_num, u32::MAX);
        assert_eq!(allocator.allocate().serial_num, 1);
    }
}

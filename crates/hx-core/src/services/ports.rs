use std::collections::HashSet;

use crate::error::{HaxigonError, Result};

/// Exclusive upper bound of the allocatable range.
pub const PORT_END: u16 = 65535;

/// Lowest-free-port policy over `[base, PORT_END)`.
///
/// Stateless: the caller passes the ports currently held, so the scan is
/// O(held) per candidate and O(range) in the worst case.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base: u16,
    end: u16,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            end: PORT_END,
        }
    }

    #[cfg(test)]
    fn with_range(base: u16, end: u16) -> Self {
        Self { base, end }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn allocate(&self, held: &HashSet<u16>) -> Result<u16> {
        (self.base..self.end)
            .find(|port| !held.contains(port))
            .ok_or_else(|| {
                HaxigonError::PortAllocation(format!(
                    "no free port in {}..{}",
                    self.base, self.end
                ))
            })
    }
}

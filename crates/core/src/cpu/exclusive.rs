// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Owner id of every reservation; the model has a single core.
pub const LOCAL_CORE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    start: u32,
    /// Last byte covered, so a mark ending at the top of memory does not wrap.
    last: u32,
    core: u32,
}

impl Reservation {
    fn overlaps(&self, start: u32, last: u32) -> bool {
        self.start <= last && start <= self.last
    }
}

fn last_byte(addr: u32, size: u32) -> u32 {
    addr.saturating_add(size.max(1) - 1)
}

/// Outstanding LDREX reservations backing the STREX success check.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveMonitor {
    reservations: Vec<Reservation>,
}

impl ExclusiveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `[addr, addr + size)` exclusive. A core holds one reservation at a time.
    pub fn set_exclusive_monitors(&mut self, addr: u32, size: u32) {
        self.reservations.retain(|r| r.core != LOCAL_CORE);
        self.reservations.push(Reservation {
            start: addr,
            last: last_byte(addr, size),
            core: LOCAL_CORE,
        });
    }

    /// Consume a matching reservation. Overlapping reservations of any core are
    /// invalidated on success.
    pub fn exclusive_monitors_pass(&mut self, addr: u32, size: u32) -> bool {
        let last = last_byte(addr, size);
        let matched = self
            .reservations
            .iter()
            .any(|r| r.core == LOCAL_CORE && r.start <= addr && last <= r.last);
        if matched {
            self.reservations.retain(|r| !r.overlaps(addr, last));
        }
        matched
    }

    pub fn clear_exclusive_local(&mut self) {
        self.reservations.retain(|r| r.core != LOCAL_CORE);
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_succeeds_once() {
        let mut mon = ExclusiveMonitor::new();
        mon.set_exclusive_monitors(0x2000_0000, 4);
        assert!(mon.exclusive_monitors_pass(0x2000_0000, 4));
        assert!(!mon.exclusive_monitors_pass(0x2000_0000, 4));
    }

    #[test]
    fn test_mismatched_address_fails_and_keeps_mark() {
        let mut mon = ExclusiveMonitor::new();
        mon.set_exclusive_monitors(0x2000_0000, 4);
        assert!(!mon.exclusive_monitors_pass(0x2000_0010, 4));
        assert!(mon.exclusive_monitors_pass(0x2000_0000, 4));
    }

    #[test]
    fn test_clear_drops_reservation() {
        let mut mon = ExclusiveMonitor::new();
        mon.set_exclusive_monitors(0x2000_0000, 1);
        mon.clear_exclusive_local();
        assert!(mon.is_empty());
        assert!(!mon.exclusive_monitors_pass(0x2000_0000, 1));
    }

    #[test]
    fn test_mark_at_top_of_memory() {
        let mut mon = ExclusiveMonitor::new();
        mon.set_exclusive_monitors(0xFFFF_FFFC, 4);
        assert!(!mon.exclusive_monitors_pass(0x0000_0000, 4));
        assert!(mon.exclusive_monitors_pass(0xFFFF_FFFC, 4));
        assert!(mon.is_empty());
        assert!(!mon.exclusive_monitors_pass(0xFFFF_FFFC, 4));
    }

    #[test]
    fn test_new_mark_replaces_old() {
        let mut mon = ExclusiveMonitor::new();
        mon.set_exclusive_monitors(0x2000_0000, 4);
        mon.set_exclusive_monitors(0x2000_0100, 4);
        assert!(!mon.exclusive_monitors_pass(0x2000_0000, 4));
        assert!(mon.exclusive_monitors_pass(0x2000_0100, 4));
    }
}

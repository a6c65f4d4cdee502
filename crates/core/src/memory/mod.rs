// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramImage {
    pub entry_point: u32,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry_point: u32) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
        }
    }

    pub fn add_segment(&mut self, start_addr: u32, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }
}

/// A simple flat memory storage
pub struct LinearMemory {
    pub data: Vec<u8>,
    pub base_addr: u32,
    /// Rejects writes coming from the CPU; loading an image still works.
    pub read_only: bool,
}

impl LinearMemory {
    pub fn new(size: usize, base_addr: u32) -> Self {
        Self {
            data: vec![0; size],
            base_addr,
            read_only: false,
        }
    }

    pub fn rom(size: usize, base_addr: u32) -> Self {
        Self {
            read_only: true,
            ..Self::new(size, base_addr)
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base_addr && ((addr - self.base_addr) as usize) < self.data.len()
    }

    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        if self.contains(addr) {
            Some(self.data[(addr - self.base_addr) as usize])
        } else {
            None
        }
    }

    /// Writes regardless of `read_only`; the bus enforces the CPU view.
    pub fn write_u8(&mut self, addr: u32, value: u8) -> bool {
        if self.contains(addr) {
            self.data[(addr - self.base_addr) as usize] = value;
            true
        } else {
            false
        }
    }

    pub fn load_from_segment(&mut self, segment: &Segment) -> bool {
        let start = segment.start_addr as u64;
        let end_addr = start + segment.data.len() as u64;
        let mem_end = self.base_addr as u64 + self.data.len() as u64;

        if start >= self.base_addr as u64 && end_addr <= mem_end {
            let offset = (segment.start_addr - self.base_addr) as usize;
            self.data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = LinearMemory::new(1024, 0x1000);

        assert!(mem.write_u8(0x1000, 42));
        assert!(mem.write_u8(0x13FF, 99)); // Last byte

        assert!(!mem.write_u8(0x0FFF, 1));
        assert!(!mem.write_u8(0x1400, 1));

        assert_eq!(mem.read_u8(0x1000), Some(42));
        assert_eq!(mem.read_u8(0x13FF), Some(99));
        assert_eq!(mem.read_u8(0x0FFF), None);
        assert_eq!(mem.read_u8(0x1400), None);
    }

    #[test]
    fn test_region_at_top_of_address_space() {
        let mut mem = LinearMemory::new(0x10, 0xFFFF_FFF0);
        assert!(mem.write_u8(0xFFFF_FFFF, 7));
        assert_eq!(mem.read_u8(0xFFFF_FFFF), Some(7));
    }

    #[test]
    fn test_load_from_segment() {
        let mut mem = LinearMemory::rom(1024, 0x1000);

        let seg1 = Segment {
            start_addr: 0x1000,
            data: vec![1, 2, 3],
        };
        assert!(mem.load_from_segment(&seg1));
        assert_eq!(mem.read_u8(0x1000), Some(1));

        // Overlaps the end boundary
        let seg2 = Segment {
            start_addr: 0x13FE,
            data: vec![10, 20, 30],
        };
        assert!(!mem.load_from_segment(&seg2));
        assert_eq!(mem.read_u8(0x13FF), Some(0));

        let seg3 = Segment {
            start_addr: 0x13FE,
            data: vec![0xAA, 0xBB],
        };
        assert!(mem.load_from_segment(&seg3));
        assert_eq!(mem.read_u8(0x13FE), Some(0xAA));
        assert_eq!(mem.read_u8(0x13FF), Some(0xBB));
    }
}

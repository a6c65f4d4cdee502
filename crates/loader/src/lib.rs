// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{anyhow, bail, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thumbsim_core::memory::ProgramImage;
use tracing::{debug, info, warn};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

pub fn load_elf(path: &Path) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    load_elf_bytes(&buffer)
}

pub fn load_elf_bytes(buffer: &[u8]) -> Result<ProgramImage> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    info!("ELF Entry Point: {:#x}", elf.entry);

    if elf.header.e_machine != goblin::elf::header::EM_ARM {
        bail!(
            "Unsupported ELF machine type {} (expected ARM)",
            elf.header.e_machine
        );
    }
    if elf.is_64 {
        bail!("64-bit ELF images cannot target a Cortex-M core");
    }

    let entry = u32::try_from(elf.entry).context("ELF entry point outside 32-bit space")?;
    let mut program_image = ProgramImage::new(entry);

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }
        // Physical address (LMA): initialised data lives in flash until startup copies it
        let start_addr = u32::try_from(ph.p_paddr).context("Segment address outside 32-bit space")?;
        let size = ph.p_filesz as usize;
        let offset = ph.p_offset as usize;

        if size == 0 {
            continue;
        }

        debug!(
            "Found Loadable Segment: Addr={:#x}, Size={} bytes, Offset={:#x}",
            start_addr, size, offset
        );

        let end = offset
            .checked_add(size)
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| anyhow!("Segment out of bounds in ELF file"))?;
        program_image.add_segment(start_addr, buffer[offset..end].to_vec());
    }

    if program_image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    Ok(program_image)
}

/// Flat image placed at `base`. The entry point comes from the reset
/// vector when the image starts with a vector table.
pub fn load_binary_bytes(buffer: &[u8], base: u32) -> ProgramImage {
    let entry = buffer
        .get(4..8)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) & !1)
        .unwrap_or(base);
    info!(
        "Raw image: {} bytes at {:#x}, entry {:#x}",
        buffer.len(),
        base,
        entry
    );
    let mut image = ProgramImage::new(entry);
    if !buffer.is_empty() {
        image.add_segment(base, buffer.to_vec());
    }
    image
}

/// ELF or raw binary, chosen by the file's magic bytes.
pub fn load_image(path: &Path, raw_base: u32) -> Result<ProgramImage> {
    let buffer =
        fs::read(path).with_context(|| format!("Failed to read firmware image: {:?}", path))?;
    if buffer.starts_with(ELF_MAGIC) {
        load_elf_bytes(&buffer)
    } else {
        Ok(load_binary_bytes(&buffer, raw_base))
    }
}

/// Function and object symbols by name, Thumb bit cleared.
pub fn symbol_table(buffer: &[u8]) -> Result<HashMap<String, u32>> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;
    let mut symbols = HashMap::new();
    for sym in elf.syms.iter() {
        if sym.st_value == 0 || !(sym.is_function() || sym.st_type() == goblin::elf::sym::STT_OBJECT)
        {
            continue;
        }
        let Some(name) = elf.strtab.get_at(sym.st_name) else {
            continue;
        };
        if let Ok(addr) = u32::try_from(sym.st_value) {
            symbols.insert(name.to_string(), addr & !1);
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal ELF32 little-endian ARM executable with one PT_LOAD segment.
    fn tiny_elf(machine: u16, payload: &[u8], paddr: u32) -> Vec<u8> {
        const EHSIZE: usize = 52;
        const PHENTSIZE: usize = 32;
        let mut out = Vec::new();
        out.extend_from_slice(ELF_MAGIC);
        out.extend_from_slice(&[1, 1, 1, 0]); // ELFCLASS32, LSB, version, SYSV
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&machine.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(paddr | 1).to_le_bytes()); // e_entry
        out.extend_from_slice(&(EHSIZE as u32).to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0x0500_0000u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHENTSIZE as u16).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len(), EHSIZE);

        let offset = (EHSIZE + PHENTSIZE) as u32;
        for word in [
            PT_LOAD,
            offset,
            paddr,
            paddr,
            payload.len() as u32,
            payload.len() as u32,
            5, // R+X
            4,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_elf_segments_and_entry() {
        let payload = [0x00, 0xBF, 0xFE, 0xE7];
        let image = load_elf_bytes(&tiny_elf(goblin::elf::header::EM_ARM, &payload, 0x100)).unwrap();
        assert_eq!(image.entry_point, 0x101);
        assert_eq!(image.segments.len(), 1);
        assert_eq!(image.segments[0].start_addr, 0x100);
        assert_eq!(image.segments[0].data, payload);
    }

    #[test]
    fn test_rejects_foreign_machine() {
        // EM_RISCV
        let elf = tiny_elf(243, &[0; 4], 0x100);
        assert!(load_elf_bytes(&elf).is_err());
    }

    #[test]
    fn test_truncated_segment_is_an_error() {
        let mut elf = tiny_elf(goblin::elf::header::EM_ARM, &[0; 16], 0x100);
        elf.truncate(elf.len() - 8);
        assert!(load_elf_bytes(&elf).is_err());
    }

    #[test]
    fn test_raw_binary_takes_reset_vector() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0x2000_8000u32.to_le_bytes());
        raw.extend_from_slice(&0x0000_0141u32.to_le_bytes());
        let image = load_binary_bytes(&raw, 0);
        assert_eq!(image.entry_point, 0x140);
        assert_eq!(image.segments[0].data.len(), 8);

        let short = load_binary_bytes(&[0x00, 0xBF], 0x2000_0000);
        assert_eq!(short.entry_point, 0x2000_0000);
    }
}

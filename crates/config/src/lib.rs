// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemoryRange {
    pub base: u32,
    pub size: String, // e.g. "128KiB"
}

impl MemoryRange {
    pub fn size_bytes(&self) -> Result<u32> {
        let size = parse_size(&self.size)?;
        u32::try_from(size).with_context(|| format!("Region size {} exceeds 4 GiB", self.size))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeripheralType {
    Uart,
    Systick,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: PeripheralType,
    pub base_address: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub irq: Option<u32>,
    /// Index used to address the device on the peripheral monitor.
    #[serde(default)]
    pub index: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NvicConfig {
    /// Initial AIRCR.PRIGROUP.
    #[serde(default)]
    pub prigroup: u32,
    /// External interrupt lines behind the 16 system vectors.
    #[serde(default = "default_irq_count")]
    pub irq_count: u32,
}

fn default_irq_count() -> u32 {
    64
}

impl Default for NvicConfig {
    fn default() -> Self {
        Self {
            prigroup: 0,
            irq_count: default_irq_count(),
        }
    }
}

/// Memory map and interrupt controller shape of a simulated Cortex-M3 part.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MachineDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub rom: MemoryRange,
    pub ram: MemoryRange,
    #[serde(default)]
    pub nvic: NvicConfig,
    #[serde(default)]
    pub peripherals: Vec<PeripheralConfig>,
}

impl Default for MachineDescriptor {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: "cortex-m3".to_string(),
            rom: MemoryRange {
                base: 0x0000_0000,
                size: "256KiB".to_string(),
            },
            ram: MemoryRange {
                base: 0x2000_0000,
                size: "64KiB".to_string(),
            },
            nvic: NvicConfig::default(),
            peripherals: vec![
                PeripheralConfig {
                    id: "systick".to_string(),
                    r#type: PeripheralType::Systick,
                    base_address: 0xE000_E010,
                    size: Some("16B".to_string()),
                    irq: Some(15),
                    index: 0,
                },
                PeripheralConfig {
                    id: "uart0".to_string(),
                    r#type: PeripheralType::Uart,
                    base_address: 0x4000_C000,
                    size: Some("4KiB".to_string()),
                    irq: Some(16 + 5),
                    index: 0,
                },
            ],
        }
    }
}

impl MachineDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read machine descriptor {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("In {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let desc: Self =
            serde_yaml::from_str(content).context("Failed to parse Machine Descriptor YAML")?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<()> {
        let rom = self.rom.size_bytes()?;
        let ram = self.ram.size_bytes()?;
        let overlaps = |a: u32, a_len: u32, b: u32, b_len: u32| {
            (a as u64) < b as u64 + b_len as u64 && (b as u64) < a as u64 + a_len as u64
        };
        if overlaps(self.rom.base, rom, self.ram.base, ram) {
            anyhow::bail!("ROM and RAM regions overlap");
        }
        if self.nvic.prigroup > 7 {
            anyhow::bail!("PRIGROUP must be 0..=7, got {}", self.nvic.prigroup);
        }
        if self.nvic.irq_count > 240 {
            anyhow::bail!("At most 240 external interrupts, got {}", self.nvic.irq_count);
        }
        for p in &self.peripherals {
            if let Some(size) = &p.size {
                parse_size(size).with_context(|| format!("Peripheral '{}'", p.id))?;
            }
        }
        Ok(())
    }

    pub fn vector_count(&self) -> u32 {
        16 + self.nvic.irq_count
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod memory;
pub mod monitor;
pub mod nvic;
pub mod peripherals;
pub mod snapshot;
pub mod system;

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use config::SimulationConfig;


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u32),
    #[error("Write to read-only memory at {0:#x}")]
    ReadOnly(u32),
    #[error("Unaligned {size}-byte access at {addr:#x}")]
    UnalignedAccess { addr: u32, size: u32 },
    #[error("Unpredictable instruction {opcode:#x} at {addr:#x}")]
    Unpredictable { opcode: u32, addr: u32 },
    #[error("No instruction to fetch at {0:#x}")]
    EndOfProgram(u32),
}

pub type SimResult<T> = Result<T, SimulationError>;

#[derive(Debug, Clone, Default)]
pub struct PeripheralTickResult {
    pub irq: bool,
    pub cycles: u32,
}

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_step_start(&self, _pc: u32, _opcode: u32) {}
    fn on_step_end(&self, _cycles: u32) {}
    fn on_exception_entry(&self, _vector: u32) {}
    fn on_exception_return(&self, _vector: u32) {}
    fn on_peripheral_tick(&self, _name: &str, _cycles: u32) {}
}

/// Trait representing a CPU architecture
pub trait Cpu: Send {
    fn reset(&mut self, bus: &mut dyn Bus) -> SimResult<()>;
    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()>;
    /// Raw program counter write, no interworking or exception-return handling.
    fn set_pc(&mut self, val: u32);
    fn get_pc(&self) -> u32;
    fn set_sp(&mut self, val: u32);
    fn set_exception_pending(&mut self, exception_num: u32);
    /// Address of a BKPT executed during the last step, if any.
    fn take_halt_request(&mut self) -> Option<u32> {
        None
    }

    // Debug Access
    fn get_register(&self, id: u8) -> u32;
    fn set_register(&mut self, id: u8, val: u32);
    fn snapshot(&self) -> snapshot::CpuSnapshot;
    fn apply_snapshot(&mut self, snapshot: &snapshot::CpuSnapshot);
    fn get_register_names(&self) -> Vec<String>;
}

/// Trait representing a memory-mapped peripheral
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u32) -> SimResult<u8>;
    fn write(&mut self, offset: u32, value: u8) -> SimResult<()>;
    fn tick(&mut self) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
    fn restore(&mut self, _state: serde_json::Value) -> SimResult<()> {
        Ok(())
    }
}

/// Trait representing the system bus
pub trait Bus {
    fn read_u8(&self, addr: u32) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u32, value: u8) -> SimResult<()>;
    /// Tick devices; returns core exception numbers (< 16) they raised.
    fn tick_peripherals(&mut self) -> Vec<u32>;

    fn read_u16(&self, addr: u32) -> SimResult<u16> {
        let b0 = self.read_u8(addr)? as u16;
        let b1 = self.read_u8(addr.wrapping_add(1))? as u16;
        // Little Endian
        Ok(b0 | (b1 << 8))
    }

    fn read_u32(&self, addr: u32) -> SimResult<u32> {
        let b0 = self.read_u8(addr)? as u32;
        let b1 = self.read_u8(addr.wrapping_add(1))? as u32;
        let b2 = self.read_u8(addr.wrapping_add(2))? as u32;
        let b3 = self.read_u8(addr.wrapping_add(3))? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr.wrapping_add(1), ((value >> 8) & 0xFF) as u8)?;
        self.write_u8(addr.wrapping_add(2), ((value >> 16) & 0xFF) as u8)?;
        self.write_u8(addr.wrapping_add(3), ((value >> 24) & 0xFF) as u8)?;
        Ok(())
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr.wrapping_add(1), ((value >> 8) & 0xFF) as u8)?;
        Ok(())
    }

    /// Sized read of 1, 2 or 4 bytes, zero-extended.
    fn read(&self, addr: u32, size: u32) -> SimResult<u32> {
        match size {
            1 => Ok(self.read_u8(addr)? as u32),
            2 => Ok(self.read_u16(addr)? as u32),
            _ => self.read_u32(addr),
        }
    }

    fn write(&mut self, addr: u32, value: u32, size: u32) -> SimResult<()> {
        match size {
            1 => self.write_u8(addr, value as u8),
            2 => self.write_u16(addr, value as u16),
            _ => self.write_u32(addr, value),
        }
    }
}

/// Trait for controlling the machine in debug mode
pub trait DebugControl {
    fn add_breakpoint(&mut self, addr: u32);
    fn remove_breakpoint(&mut self, addr: u32);
    fn clear_breakpoints(&mut self);
    fn is_breakpoint(&self, addr: u32) -> bool;

    /// Run until breakpoint, halt request or steps limit
    fn run(&mut self, max_steps: Option<u32>) -> SimResult<StopReason>;

    /// Step a single instruction
    fn step_single(&mut self) -> SimResult<StopReason>;

    /// Flag checked before every fetch; setting it stops `run`.
    fn halt_handle(&self) -> Arc<AtomicBool>;

    fn read_core_reg(&self, id: u8) -> u32;
    fn write_core_reg(&mut self, id: u8, val: u32);

    fn read_memory(&self, addr: u32, len: usize) -> SimResult<Vec<u8>>;
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()>;

    fn get_pc(&self) -> u32;
    fn set_raw_pc(&mut self, addr: u32);
    fn get_register_names(&self) -> Vec<String>;
    fn get_cycle_count(&self) -> u64;
    fn reset(&mut self) -> SimResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Breakpoint(u32),
    StepDone,
    MaxStepsReached,
    ManualStop,
    EndOfProgram(u32),
}

/// BKPT #imm8
fn is_bkpt_opcode(halfword: u16) -> bool {
    halfword & 0xFF00 == 0xBE00
}

pub struct Machine<C: Cpu> {
    pub cpu: C,
    pub bus: bus::SystemBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
    pub config: SimulationConfig,

    // Debug state
    pub breakpoints: HashSet<u32>,
    /// Breakpoint the last `run` stopped on; the next resume steps over it.
    pub last_breakpoint: Option<u32>,
    pub halting: Arc<AtomicBool>,
    pub total_cycles: u64,
    steps_since_tick: u32,
}

impl<C: Cpu> Machine<C> {
    pub fn new(cpu: C, bus: bus::SystemBus) -> Self {
        Self::with_config(cpu, bus, SimulationConfig::default())
    }

    pub fn with_config(cpu: C, bus: bus::SystemBus, config: SimulationConfig) -> Self {
        Self {
            cpu,
            bus,
            observers: Vec::new(),
            config,
            breakpoints: HashSet::new(),
            last_breakpoint: None,
            halting: Arc::new(AtomicBool::new(false)),
            total_cycles: 0,
            steps_since_tick: 0,
        }
    }

    pub fn load_firmware(&mut self, image: &memory::ProgramImage) -> SimResult<()> {
        for segment in &image.segments {
            if !self.bus.load_segment(segment) {
                tracing::warn!(
                    "Failed to load segment at {:#x} - outside of memory map",
                    segment.start_addr
                );
            }
        }

        for observer in &self.observers {
            observer.on_simulation_start();
        }
        self.reset()?;

        // Fallback if vector table is missing/zero
        if self.cpu.get_pc() == 0 {
            self.cpu.set_pc(image.entry_point);
        }

        Ok(())
    }

    pub fn reset(&mut self) -> SimResult<()> {
        self.last_breakpoint = None;
        self.cpu.reset(&mut self.bus)
    }

    pub fn step(&mut self) -> SimResult<()> {
        self.total_cycles += 1; // Base instruction cycle
        let res = self.cpu.step(&mut self.bus, &self.observers);

        self.steps_since_tick += 1;
        if self.steps_since_tick >= self.config.peripheral_tick_interval.max(1) {
            self.steps_since_tick = 0;
            for irq in self.bus.tick_peripherals() {
                tracing::debug!("Exception {} Pend", irq);
                self.cpu.set_exception_pending(irq);
            }
        }

        res
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            cpu: self.cpu.snapshot(),
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot()))
                .collect(),
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: snapshot::MachineSnapshot) -> SimResult<()> {
        self.cpu.apply_snapshot(&snapshot.cpu);
        for p in &mut self.bus.peripherals {
            if let Some(state) = snapshot.peripherals.get(&p.name) {
                p.dev.restore(state.clone())?;
            }
        }
        Ok(())
    }

    pub fn peek_peripheral(&self, name: &str) -> Option<serde_json::Value> {
        self.bus
            .peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.dev.snapshot())
    }

    /// One step that turns a fetch miss and a BKPT into stop reasons.
    fn step_checked(&mut self) -> SimResult<Option<StopReason>> {
        match self.step() {
            Ok(()) => {}
            Err(SimulationError::EndOfProgram(addr)) => {
                for observer in &self.observers {
                    observer.on_simulation_stop();
                }
                return Ok(Some(StopReason::EndOfProgram(addr)));
            }
            Err(e) => return Err(e),
        }
        if let Some(addr) = self.cpu.take_halt_request() {
            self.last_breakpoint = Some(addr);
            return Ok(Some(StopReason::Breakpoint(addr)));
        }
        Ok(None)
    }
}

impl<C: Cpu> DebugControl for Machine<C> {
    fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr & !1);
    }

    fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&(addr & !1));
    }

    fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    fn is_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.contains(&(addr & !1))
    }

    fn run(&mut self, max_steps: Option<u32>) -> SimResult<StopReason> {
        let mut steps = 0;
        loop {
            if self.halting.swap(false, Ordering::SeqCst) {
                return Ok(StopReason::ManualStop);
            }

            // Breakpoints are checked before the instruction executes
            let pc = self.cpu.get_pc();
            if self.last_breakpoint == Some(pc) {
                self.last_breakpoint = None;
                let trap = self.bus.read_u16(pc).map(is_bkpt_opcode).unwrap_or(false);
                if trap && !self.is_breakpoint(pc) {
                    // Resuming from a BKPT: the trap itself is not re-executed
                    self.cpu.set_pc(pc.wrapping_add(2));
                } else if let Some(reason) = self.step_checked()? {
                    return Ok(reason);
                }
            } else if self.is_breakpoint(pc) {
                self.last_breakpoint = Some(pc);
                return Ok(StopReason::Breakpoint(pc));
            } else if let Some(reason) = self.step_checked()? {
                return Ok(reason);
            }

            steps += 1;
            if let Some(max) = max_steps {
                if steps >= max {
                    return Ok(StopReason::MaxStepsReached);
                }
            }
        }
    }

    fn step_single(&mut self) -> SimResult<StopReason> {
        self.last_breakpoint = None;
        Ok(self.step_checked()?.unwrap_or(StopReason::StepDone))
    }

    fn halt_handle(&self) -> Arc<AtomicBool> {
        self.halting.clone()
    }

    fn read_core_reg(&self, id: u8) -> u32 {
        self.cpu.get_register(id)
    }

    fn write_core_reg(&mut self, id: u8, val: u32) {
        self.cpu.set_register(id, val);
    }

    fn read_memory(&self, addr: u32, len: usize) -> SimResult<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            let byte = self.bus.read_u8(addr.wrapping_add(i as u32))?;
            data.push(byte);
        }
        Ok(data)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()> {
        for (i, byte) in data.iter().enumerate() {
            self.bus.poke_u8(addr.wrapping_add(i as u32), *byte)?;
        }
        Ok(())
    }

    fn get_pc(&self) -> u32 {
        self.cpu.get_pc()
    }

    fn set_raw_pc(&mut self, addr: u32) {
        self.last_breakpoint = None;
        self.cpu.set_pc(addr);
    }

    fn get_register_names(&self) -> Vec<String> {
        self.cpu.get_register_names()
    }

    fn get_cycle_count(&self) -> u64 {
        self.total_cycles
    }

    fn reset(&mut self) -> SimResult<()> {
        Machine::reset(self)
    }
}

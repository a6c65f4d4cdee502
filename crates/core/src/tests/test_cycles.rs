// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::cpu::registers::Mode;
use crate::snapshot::CpuSnapshot;
use crate::{Bus, Cpu, DebugControl, Machine, SimResult, SimulationObserver, StopReason};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockCpu {
    pc: u32,
    pended: Vec<u32>,
}

impl Cpu for MockCpu {
    fn reset(&mut self, _bus: &mut dyn Bus) -> SimResult<()> {
        Ok(())
    }
    fn step(
        &mut self,
        _bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        for observer in observers {
            observer.on_step_start(self.pc, 0xBF00);
        }
        self.pc += 2;
        Ok(())
    }
    fn set_pc(&mut self, val: u32) {
        self.pc = val;
    }
    fn get_pc(&self) -> u32 {
        self.pc
    }
    fn set_sp(&mut self, _val: u32) {}
    fn set_exception_pending(&mut self, exception_num: u32) {
        self.pended.push(exception_num);
    }
    fn get_register(&self, _id: u8) -> u32 {
        0
    }
    fn set_register(&mut self, _id: u8, _val: u32) {}
    fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            registers: vec![0; 16],
            xpsr: 0,
            msp: 0,
            psp: 0,
            primask: false,
            faultmask: false,
            basepri: 0,
            control: 0,
            mode: Mode::Thread,
            active: Vec::new(),
            vtor: 0,
        }
    } // Dummy
    fn apply_snapshot(&mut self, _snapshot: &CpuSnapshot) {}
    fn get_register_names(&self) -> Vec<String> {
        vec![]
    }
}

#[derive(Debug, Default)]
struct PcRecorder {
    seen: Mutex<Vec<u32>>,
}

impl SimulationObserver for PcRecorder {
    fn on_step_start(&self, pc: u32, _opcode: u32) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(pc);
        }
    }
}

#[test]
fn test_machine_run_cycles() {
    let cpu = MockCpu::default();
    let bus = crate::bus::SystemBus::new();
    let mut machine = Machine::new(cpu, bus);

    assert_eq!(machine.total_cycles, 0);

    // Run 100 steps
    let reason = machine.run(Some(100)).unwrap();
    assert_eq!(reason, StopReason::MaxStepsReached);
    assert_eq!(machine.total_cycles, 100);

    // Run 50 steps
    let reason = machine.run(Some(50)).unwrap();
    assert_eq!(reason, StopReason::MaxStepsReached);
    assert_eq!(machine.total_cycles, 150);
}

#[test]
fn test_observers_see_every_fetch() {
    let recorder = Arc::new(PcRecorder::default());
    let mut machine = Machine::new(MockCpu::default(), crate::bus::SystemBus::new());
    machine.observers.push(recorder.clone());

    machine.run(Some(3)).unwrap();
    assert_eq!(*recorder.seen.lock().unwrap(), vec![0, 2, 4]);
}

#[test]
fn test_core_exceptions_from_peripherals_reach_cpu() {
    let mut machine = Machine::new(MockCpu::default(), crate::bus::SystemBus::new());
    // SysTick: RVR = 1, CSR = ENABLE | TICKINT
    machine.bus.write_u32(0xE000_E014, 1).unwrap();
    machine.bus.write_u32(0xE000_E010, 3).unwrap();

    machine.run(Some(4)).unwrap();
    assert!(machine.cpu.pended.contains(&15));
}

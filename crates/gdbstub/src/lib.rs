// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use core::convert::Infallible;
use gdbstub::common::Signal;
use gdbstub::conn::{Connection, ConnectionExt};
use gdbstub::stub::run_blocking::{BlockingEventLoop, Event, WaitForStopReasonError};
use gdbstub::stub::{BaseStopReason, GdbStub};
use gdbstub::target::ext::base::single_register_access::{
    SingleRegisterAccess, SingleRegisterAccessOps,
};
use gdbstub::target::ext::base::singlethread::{
    SingleThreadBase, SingleThreadResume, SingleThreadResumeOps, SingleThreadSingleStep,
    SingleThreadSingleStepOps,
};
use gdbstub::target::ext::base::BaseOps;
use gdbstub::target::ext::breakpoints::{
    Breakpoints, BreakpointsOps, SwBreakpoint, SwBreakpointOps,
};
use gdbstub::target::{Target, TargetError, TargetResult};
use gdbstub_arch::arm::reg::id::ArmCoreRegId;
use gdbstub_arch::arm::reg::ArmCoreRegs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use thumbsim_core::cpu::CortexM;
use thumbsim_core::{DebugControl, Machine, SimResult, StopReason};

/// Instructions run between checks for incoming GDB data.
const RUN_CHUNK: u32 = 1000;

/// Debugger register number of xPSR.
const XPSR_ID: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecMode {
    Step,
    Continue,
}

pub struct ThumbsimTarget {
    pub machine: Machine<CortexM>,
    exec_mode: ExecMode,
}

enum RunEvent {
    IncomingData,
    Stopped(BaseStopReason<(), u32>),
}

impl ThumbsimTarget {
    pub fn new(machine: Machine<CortexM>) -> Self {
        Self {
            machine,
            exec_mode: ExecMode::Continue,
        }
    }

    fn run(&mut self, mut poll_incoming_data: impl FnMut() -> bool) -> RunEvent {
        match self.exec_mode {
            ExecMode::Step => RunEvent::Stopped(stop_reason(self.machine.step_single())),
            ExecMode::Continue => loop {
                if poll_incoming_data() {
                    return RunEvent::IncomingData;
                }
                match self.machine.run(Some(RUN_CHUNK)) {
                    Ok(StopReason::MaxStepsReached) => continue,
                    other => return RunEvent::Stopped(stop_reason(other)),
                }
            },
        }
    }
}

fn stop_reason(result: SimResult<StopReason>) -> BaseStopReason<(), u32> {
    match result {
        Ok(StopReason::Breakpoint(_)) => BaseStopReason::SwBreak(()),
        Ok(StopReason::StepDone) | Ok(StopReason::MaxStepsReached) => BaseStopReason::DoneStep,
        Ok(StopReason::ManualStop) => BaseStopReason::Signal(Signal::SIGINT),
        Ok(StopReason::EndOfProgram(addr)) => {
            tracing::info!("No instruction at {:#x}; reporting SIGSEGV", addr);
            BaseStopReason::Signal(Signal::SIGSEGV)
        }
        Err(e) => {
            tracing::error!("GDB Simulation Error: {}", e);
            BaseStopReason::Signal(Signal::SIGSEGV)
        }
    }
}

fn core_reg_index(reg_id: ArmCoreRegId) -> Option<u8> {
    match reg_id {
        ArmCoreRegId::Gpr(n) if n < 13 => Some(n),
        ArmCoreRegId::Sp => Some(13),
        ArmCoreRegId::Lr => Some(14),
        ArmCoreRegId::Pc => Some(15),
        ArmCoreRegId::Cpsr => Some(XPSR_ID),
        _ => None,
    }
}

impl Target for ThumbsimTarget {
    type Arch = gdbstub_arch::arm::Armv4t;
    type Error = Infallible;

    fn base_ops(&mut self) -> BaseOps<'_, Self::Arch, Self::Error> {
        BaseOps::SingleThread(self)
    }

    fn support_breakpoints(&mut self) -> Option<BreakpointsOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadBase for ThumbsimTarget {
    fn read_registers(&mut self, regs: &mut ArmCoreRegs) -> TargetResult<(), Self> {
        for i in 0..13 {
            regs.r[i] = self.machine.read_core_reg(i as u8);
        }
        regs.sp = self.machine.read_core_reg(13);
        regs.lr = self.machine.read_core_reg(14);
        regs.pc = self.machine.read_core_reg(15);
        regs.cpsr = self.machine.read_core_reg(XPSR_ID);
        Ok(())
    }

    fn write_registers(&mut self, regs: &ArmCoreRegs) -> TargetResult<(), Self> {
        for i in 0..13 {
            self.machine.write_core_reg(i as u8, regs.r[i]);
        }
        self.machine.write_core_reg(13, regs.sp);
        self.machine.write_core_reg(14, regs.lr);
        self.machine.set_raw_pc(regs.pc);
        self.machine.write_core_reg(XPSR_ID, regs.cpsr);
        Ok(())
    }

    fn read_addrs(&mut self, start_addr: u32, data: &mut [u8]) -> TargetResult<usize, Self> {
        let mem = self
            .machine
            .read_memory(start_addr, data.len())
            .map_err(|_| TargetError::NonFatal)?;
        let len = mem.len().min(data.len());
        data[..len].copy_from_slice(&mem[..len]);
        Ok(len)
    }

    fn write_addrs(&mut self, start_addr: u32, data: &[u8]) -> TargetResult<(), Self> {
        self.machine
            .write_memory(start_addr, data)
            .map_err(|_| TargetError::NonFatal)?;
        Ok(())
    }

    fn support_single_register_access(&mut self) -> Option<SingleRegisterAccessOps<'_, (), Self>> {
        Some(self)
    }

    fn support_resume(&mut self) -> Option<SingleThreadResumeOps<'_, Self>> {
        Some(self)
    }
}

impl SingleRegisterAccess<()> for ThumbsimTarget {
    fn read_register(
        &mut self,
        _tid: (),
        reg_id: ArmCoreRegId,
        buf: &mut [u8],
    ) -> TargetResult<usize, Self> {
        let Some(id) = core_reg_index(reg_id) else {
            // FPA registers do not exist on this core
            return Ok(0);
        };
        let bytes = self.machine.read_core_reg(id).to_le_bytes();
        let len = buf.len().min(bytes.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(len)
    }

    fn write_register(
        &mut self,
        _tid: (),
        reg_id: ArmCoreRegId,
        val: &[u8],
    ) -> TargetResult<(), Self> {
        let id = core_reg_index(reg_id).ok_or(TargetError::NonFatal)?;
        let bytes: [u8; 4] = val.try_into().map_err(|_| TargetError::NonFatal)?;
        let value = u32::from_le_bytes(bytes);
        if id == 15 {
            self.machine.set_raw_pc(value);
        } else {
            self.machine.write_core_reg(id, value);
        }
        Ok(())
    }
}

impl SingleThreadResume for ThumbsimTarget {
    fn resume(&mut self, _signal: Option<Signal>) -> Result<(), Self::Error> {
        self.exec_mode = ExecMode::Continue;
        Ok(())
    }

    fn support_single_step(&mut self) -> Option<SingleThreadSingleStepOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadSingleStep for ThumbsimTarget {
    fn step(&mut self, _signal: Option<Signal>) -> Result<(), Self::Error> {
        self.exec_mode = ExecMode::Step;
        Ok(())
    }
}

impl Breakpoints for ThumbsimTarget {
    fn support_sw_breakpoint(&mut self) -> Option<SwBreakpointOps<'_, Self>> {
        Some(self)
    }
}

impl SwBreakpoint for ThumbsimTarget {
    fn add_sw_breakpoint(
        &mut self,
        addr: u32,
        _kind: <Self::Arch as gdbstub::arch::Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        self.machine.add_breakpoint(addr);
        Ok(true)
    }

    fn remove_sw_breakpoint(
        &mut self,
        addr: u32,
        _kind: <Self::Arch as gdbstub::arch::Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        self.machine.remove_breakpoint(addr);
        Ok(true)
    }
}

pub struct GdbServer {
    listener: TcpListener,
}

impl GdbServer {
    /// Binds `0.0.0.0:port`. Port 0 picks a free port.
    pub fn bind(port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("Failed to bind GDB server on port {}", port))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve one debugger session, then hand the machine back.
    pub fn run(self, machine: Machine<CortexM>) -> anyhow::Result<Machine<CortexM>> {
        tracing::info!("GDB server listening on {}", self.local_addr()?);

        let (stream, addr) = self.listener.accept()?;
        tracing::info!("GDB client connected from {}", addr);

        let mut target = ThumbsimTarget::new(machine);
        let gdb = GdbStub::new(stream);

        match gdb.run_blocking::<GdbEventLoop>(&mut target) {
            Ok(reason) => tracing::info!("GDB session ended: {:?}", reason),
            Err(e) => tracing::error!("GDB session error: {:?}", e),
        }

        Ok(target.machine)
    }
}

pub enum GdbEventLoop {}

impl BlockingEventLoop for GdbEventLoop {
    type Target = ThumbsimTarget;
    type Connection = TcpStream;
    type StopReason = BaseStopReason<(), u32>;

    fn wait_for_stop_reason(
        target: &mut Self::Target,
        conn: &mut Self::Connection,
    ) -> Result<
        Event<Self::StopReason>,
        WaitForStopReasonError<
            <Self::Target as Target>::Error,
            <Self::Connection as Connection>::Error,
        >,
    > {
        let poll_incoming_data = || {
            // Treat a broken connection as data so the stub sees the error
            ConnectionExt::peek(&mut *conn).map(|b| b.is_some()).unwrap_or(true)
        };

        match target.run(poll_incoming_data) {
            RunEvent::IncomingData => {
                let byte = ConnectionExt::read(&mut *conn)
                    .map_err(WaitForStopReasonError::Connection)?;
                Ok(Event::IncomingData(byte))
            }
            RunEvent::Stopped(reason) => Ok(Event::TargetStopped(reason)),
        }
    }

    fn on_interrupt(
        _target: &mut Self::Target,
    ) -> Result<Option<Self::StopReason>, <Self::Target as Target>::Error> {
        Ok(Some(BaseStopReason::Signal(Signal::SIGINT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbsim_core::bus::SystemBus;
    use thumbsim_core::system::cortex_m::configure_cortex_m;
    use thumbsim_core::SimulationConfig;

    fn target() -> ThumbsimTarget {
        let mut bus = SystemBus::new();
        let (cpu, _nvic) = configure_cortex_m(&mut bus, &SimulationConfig::default());
        ThumbsimTarget::new(Machine::new(cpu, bus))
    }

    #[test]
    fn test_target_register_access() {
        let mut target = target();

        target.machine.write_core_reg(0, 0x12345678);
        target.machine.write_core_reg(15, 0x08000100);
        target.machine.write_core_reg(XPSR_ID, 0x6100_0000);

        let mut regs = ArmCoreRegs::default();
        target
            .read_registers(&mut regs)
            .unwrap_or_else(|_| panic!("Failed to read registers"));

        assert_eq!(regs.r[0], 0x12345678);
        assert_eq!(regs.pc, 0x08000100);
        assert_eq!(regs.cpsr & 0xF000_0000, 0x6000_0000);

        regs.r[1] = 0xdeadbeef;
        target
            .write_registers(&regs)
            .unwrap_or_else(|_| panic!("Failed to write registers"));
        assert_eq!(target.machine.read_core_reg(1), 0xdeadbeef);
    }

    #[test]
    fn test_single_register_access() {
        let mut target = target();
        target
            .write_register((), ArmCoreRegId::Gpr(4), &0xCAFEu32.to_le_bytes())
            .unwrap_or_else(|_| panic!("Failed to write R4"));
        let mut buf = [0u8; 4];
        let len = target
            .read_register((), ArmCoreRegId::Gpr(4), &mut buf)
            .unwrap_or_else(|_| panic!("Failed to read R4"));
        assert_eq!(len, 4);
        assert_eq!(u32::from_le_bytes(buf), 0xCAFE);

        // No FPA on a Cortex-M
        let len = target
            .read_register((), ArmCoreRegId::Fps, &mut buf)
            .unwrap_or_else(|_| panic!("Failed to read FPS"));
        assert_eq!(len, 0);
    }

    #[test]
    fn test_target_memory_access() {
        let mut target = target();
        let data = [0xAA, 0xBB, 0xCC, 0xDD];
        assert!(target.write_addrs(0x2000_0000, &data).is_ok());
        let mut back = [0u8; 4];
        assert!(matches!(target.read_addrs(0x2000_0000, &mut back), Ok(4)));
        assert_eq!(back, data);
        // Unmapped
        assert!(target.read_addrs(0x7000_0000, &mut back).is_err());
    }

    #[test]
    fn test_step_mode_reports_done_step() {
        let mut target = target();
        // MOVS R0, #1
        target.write_addrs(0x2000_0000, &[0x01, 0x20]).unwrap_or_else(|_| panic!());
        target.machine.set_raw_pc(0x2000_0000);
        target.step(None).unwrap();
        assert!(matches!(
            target.run(|| false),
            RunEvent::Stopped(BaseStopReason::DoneStep)
        ));
        assert_eq!(target.machine.read_core_reg(0), 1);
    }
}

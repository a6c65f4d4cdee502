// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Exception controller: pending store, priority resolution, and the
//! core's exception entry and return sequences.

use crate::cpu::registers::{Control, Mode, XPSR_FRAME_ALIGN};
use crate::cpu::CortexM;
use crate::peripherals::nvic::{
    NvicState, CCR_STKALIGN, ICSR_NMIPENDSET, ICSR_PENDSTCLR, ICSR_PENDSTSET, ICSR_PENDSVCLR,
    ICSR_PENDSVSET,
};
use crate::{Bus, SimResult};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub const RESET: u32 = 1;
pub const NMI: u32 = 2;
pub const HARD_FAULT: u32 = 3;
pub const MEM_MANAGE: u32 = 4;
pub const BUS_FAULT: u32 = 5;
pub const USAGE_FAULT: u32 = 6;
pub const SVCALL: u32 = 11;
pub const PENDSV: u32 = 14;
pub const SYSTICK: u32 = 15;

/// Execution priority of Thread mode with nothing active and no masks.
pub const THREAD_PRIORITY: i32 = 256;

/// Low bits of a pending key that hold the vector number.
const KEY_VECTOR_BITS: u32 = 9;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NvicError {
    #[error("pending exception store full ({0} entries)")]
    PendingFull(usize),
    #[error("vector {0} outside the vector table")]
    InvalidVector(u32),
}

#[derive(Debug)]
pub struct Nvic {
    pub state: Arc<NvicState>,
    /// Min-heap of `group_priority << 9 | vector`.
    pending: BinaryHeap<Reverse<i32>>,
    queued: Vec<bool>,
    active: Vec<bool>,
    pub nested: u32,
    vector_count: u32,
}

impl Nvic {
    pub fn new(state: Arc<NvicState>, vector_count: u32) -> Self {
        let vector_count = vector_count.clamp(16, 16 + 240);
        Self {
            state,
            pending: BinaryHeap::with_capacity(vector_count as usize),
            queued: vec![false; vector_count as usize],
            active: vec![false; vector_count as usize],
            nested: 0,
            vector_count,
        }
    }

    pub fn vector_count(&self) -> u32 {
        self.vector_count
    }

    /// Drop every pending and active exception.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.queued.fill(false);
        for vector in 0..self.vector_count {
            if self.active[vector as usize] {
                self.state.set_active(vector, false);
            }
        }
        self.active.fill(false);
        self.nested = 0;
        self.state.vect_active.store(0, Ordering::SeqCst);
    }

    /// Reset, NMI and HardFault are fixed; everything else is programmable.
    pub fn priority(&self, vector: u32) -> i32 {
        match vector {
            RESET => -3,
            NMI => -2,
            HARD_FAULT => -1,
            _ => self.state.priority(vector) as i32,
        }
    }

    pub fn group_priority(&self, raw: i32) -> i32 {
        if raw < 0 {
            return raw;
        }
        let group_value = 1 << (self.state.prigroup() + 1);
        raw - raw % group_value
    }

    pub fn is_active(&self, vector: u32) -> bool {
        self.active.get(vector as usize).copied().unwrap_or(false)
    }

    pub fn is_queued(&self, vector: u32) -> bool {
        self.queued.get(vector as usize).copied().unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn throw_exception(&mut self, vector: u32) -> Result<(), NvicError> {
        if vector == 0 || vector >= self.vector_count {
            return Err(NvicError::InvalidVector(vector));
        }

        let mut vector = vector;
        if (MEM_MANAGE..=USAGE_FAULT).contains(&vector) && !self.state.fault_enabled(vector) {
            tracing::warn!("Fault {} disabled in SHCSR, escalating to HardFault", vector);
            vector = HARD_FAULT;
        }

        if vector >= 16 {
            self.state.set_pending(vector);
            if !self.state.is_enabled(vector) {
                return Ok(());
            }
        }

        if self.queued[vector as usize] {
            return Ok(());
        }
        if self.pending.len() >= self.vector_count as usize {
            return Err(NvicError::PendingFull(self.pending.len()));
        }

        let key = (self.group_priority(self.priority(vector)) << KEY_VECTOR_BITS) | vector as i32;
        self.pending.push(Reverse(key));
        self.queued[vector as usize] = true;
        tracing::debug!("Exception {} pending", vector);
        Ok(())
    }

    /// Remove a pending exception without taking it.
    pub fn clear_pending(&mut self, vector: u32) {
        if !self.is_queued(vector) {
            return;
        }
        self.pending
            .retain(|Reverse(key)| key & ((1 << KEY_VECTOR_BITS) - 1) != vector as i32);
        self.queued[vector as usize] = false;
    }

    /// Fold software-visible pend requests from the SCS registers into the
    /// pending store: ICSR set/clear bits and ISPR & ISER. IRQs cleared or
    /// disabled behind our back are dropped.
    pub fn sync_scs_requests(&mut self) {
        let requests = self.state.take_icsr_requests();
        for (bit, vector) in [
            (ICSR_NMIPENDSET, NMI),
            (ICSR_PENDSVSET, PENDSV),
            (ICSR_PENDSTSET, SYSTICK),
        ] {
            if requests & bit != 0 {
                self.throw_logged(vector);
            }
        }
        if requests & ICSR_PENDSVCLR != 0 {
            self.clear_pending(PENDSV);
        }
        if requests & ICSR_PENDSTCLR != 0 {
            self.clear_pending(SYSTICK);
        }

        for vector in self.state.enabled_pending() {
            if vector < self.vector_count && !self.queued[vector as usize] {
                self.throw_logged(vector);
            }
        }

        let stale: Vec<u32> = (16..self.vector_count)
            .filter(|&v| {
                self.queued[v as usize] && !(self.state.is_pending(v) && self.state.is_enabled(v))
            })
            .collect();
        for vector in stale {
            self.clear_pending(vector);
        }
    }

    fn throw_logged(&mut self, vector: u32) {
        if let Err(e) = self.throw_exception(vector) {
            tracing::warn!("Exception {} dropped: {}", vector, e);
        }
    }

    /// Pop the best pending exception if it preempts `execution_priority`,
    /// returning its vector or 0.
    pub fn check_exception(&mut self, execution_priority: i32) -> u32 {
        let Some(&Reverse(key)) = self.pending.peek() else {
            return 0;
        };
        if key >> KEY_VECTOR_BITS >= execution_priority {
            return 0;
        }
        self.pending.pop();
        let vector = (key & ((1 << KEY_VECTOR_BITS) - 1)) as u32;
        self.queued[vector as usize] = false;
        vector
    }

    fn activate(&mut self, vector: u32) {
        self.active[vector as usize] = true;
        self.nested += 1;
        self.state.set_active(vector, true);
        self.state.clear_pending(vector);
        self.state.vect_active.store(vector, Ordering::SeqCst);
    }

    fn deactivate(&mut self, vector: u32) {
        self.active[vector as usize] = false;
        self.nested = self.nested.saturating_sub(1);
        self.state.set_active(vector, false);
    }

    /// Re-mark the given exceptions active, innermost last.
    pub fn restore_active(&mut self, active: &[u32]) {
        self.reset();
        for &vector in active {
            if vector < self.vector_count {
                self.activate(vector);
            }
        }
    }
}

impl CortexM {
    /// Priority an exception has to beat to preempt the running code.
    pub fn execution_priority(&self) -> i32 {
        let mut priority = match self.exec.current_exception() {
            Some(vector) => self.nvic.group_priority(self.nvic.priority(vector)),
            None => THREAD_PRIORITY,
        };
        if self.regs.basepri != 0 {
            priority = priority.min(self.nvic.group_priority(self.regs.basepri as i32));
        }
        if self.regs.primask {
            priority = priority.min(0);
        }
        if self.regs.faultmask {
            priority = priority.min(-1);
        }
        priority
    }

    /// Exception entry: stack the caller-saved frame and branch to the handler.
    /// If the frame cannot be stacked the exception stays pending and a
    /// HardFault is raised; a failing HardFault entry leaves the core where
    /// it is with HardFault pending.
    pub fn handle_exception(&mut self, bus: &mut dyn Bus, vector: u32) -> SimResult<()> {
        let return_addr = match self.fault_return.take() {
            Some(addr) if (HARD_FAULT..=USAGE_FAULT).contains(&vector) => addr,
            _ => self.regs.pc,
        };
        let result = self.enter_exception(bus, vector, return_addr);
        if result.is_err() {
            if let Err(e) = self.nvic.throw_exception(vector) {
                tracing::warn!("Exception {} dropped: {}", vector, e);
            }
            if vector != HARD_FAULT {
                if let Err(e) = self.nvic.throw_exception(HARD_FAULT) {
                    tracing::warn!("HardFault dropped: {}", e);
                }
            }
        }
        result
    }

    fn enter_exception(
        &mut self,
        bus: &mut dyn Bus,
        vector: u32,
        return_addr: u32,
    ) -> SimResult<()> {
        let vtor = self.nvic.state.vtor();
        let handler = self.read_mem_a(bus, vtor.wrapping_add(vector * 4), 4)?;

        let mut frame = self.regs.sp().wrapping_sub(32);
        let mut xpsr = self.regs.xpsr();
        if frame & 4 != 0 && self.nvic.state.ccr() & CCR_STKALIGN != 0 {
            frame &= !7;
            xpsr |= XPSR_FRAME_ALIGN;
        }

        let words = [
            self.regs.r0,
            self.regs.r1,
            self.regs.r2,
            self.regs.r3,
            self.regs.r12,
            self.regs.lr,
            return_addr,
            xpsr,
        ];
        for (i, word) in words.iter().enumerate() {
            self.write_mem_a(bus, frame.wrapping_add(i as u32 * 4), *word, 4)?;
        }
        *self.regs.active_sp() = frame;

        self.regs.lr = if self.exec.mode == Mode::Handler {
            0xFFFF_FFF1
        } else {
            0xFFFF_FFF9 | ((self.regs.control.contains(Control::SPSEL) as u32) << 2)
        };

        self.regs.pc = handler & !1;
        self.regs.thumb = handler & 1 == 1;
        self.exec.mode = Mode::Handler;
        self.regs.ipsr = vector;
        self.regs.it_state = 0;
        self.regs.control.remove(Control::SPSEL);
        self.regs.select_stack(Mode::Handler);

        self.nvic.activate(vector);
        self.exec.active.push_back(vector);
        self.exclusive.clear_exclusive_local();

        tracing::info!(
            "Exception {} entry, handler {:#x} (VTOR={:#x})",
            vector,
            self.regs.pc,
            vtor
        );
        Ok(())
    }

    /// Exception return through an EXC_RETURN value. Nothing is committed
    /// until the whole frame has been read.
    pub fn exception_return(&mut self, bus: &mut dyn Bus, exc_return: u32) -> SimResult<()> {
        let returning = self.regs.ipsr;
        let (mode, process_stack) = match exc_return & 0x0FFF_FFFF {
            0x0FFF_FFF1 => (Mode::Handler, false),
            0x0FFF_FFF9 => (Mode::Thread, false),
            0x0FFF_FFFD => (Mode::Thread, true),
            _ => {
                self.return_fault(exc_return, "unknown EXC_RETURN");
                return Ok(());
            }
        };

        if self.exec.current_exception() != Some(returning) || !self.nvic.is_active(returning) {
            self.return_fault(exc_return, "returning exception not active");
            return Ok(());
        }
        let depth_ok = match mode {
            Mode::Handler => self.nvic.nested > 1,
            Mode::Thread => self.nvic.nested == 1,
        };
        if !depth_ok {
            self.return_fault(exc_return, "nesting depth mismatch");
            return Ok(());
        }

        let frame = if process_stack {
            self.regs.psp
        } else {
            self.regs.msp
        };
        let mut words = [0u32; 8];
        for (i, word) in words.iter_mut().enumerate() {
            match self.read_mem_a(bus, frame.wrapping_add(i as u32 * 4), 4) {
                Ok(value) => *word = value,
                Err(e) => {
                    tracing::warn!("Exception {} frame unreadable: {}", returning, e);
                    self.return_fault(exc_return, "frame unreadable");
                    return Ok(());
                }
            }
        }

        self.nvic.deactivate(returning);
        self.exec.active.pop_back();
        self.exec.mode = mode;
        self.regs.control.set(Control::SPSEL, process_stack);
        self.regs.select_stack(mode);

        let [r0, r1, r2, r3, r12, lr, ret, xpsr] = words;
        self.regs.r0 = r0;
        self.regs.r1 = r1;
        self.regs.r2 = r2;
        self.regs.r3 = r3;
        self.regs.r12 = r12;
        self.regs.lr = lr;
        self.regs.pc = ret & !1;

        let mut sp = frame.wrapping_add(32);
        if xpsr & XPSR_FRAME_ALIGN != 0 {
            sp = sp.wrapping_add(4);
        }
        *self.regs.active_sp() = sp;
        self.regs.set_xpsr(xpsr & !XPSR_FRAME_ALIGN);

        // The popped IT state belongs to the interrupted code
        self.exec.it_defined = true;
        self.exclusive.clear_exclusive_local();
        self.nvic.state.vect_active.store(
            self.exec.current_exception().unwrap_or(0),
            Ordering::SeqCst,
        );
        self.note_exception_return(returning);
        tracing::info!("Exception {} return to {:#x}", returning, self.regs.pc);

        if (mode == Mode::Thread) != (self.regs.ipsr == 0) {
            self.return_fault(exc_return, "IPSR inconsistent with return mode");
        }
        Ok(())
    }

    /// INVPC: raise a UsageFault instead of performing the return.
    fn return_fault(&mut self, exc_return: u32, reason: &str) {
        tracing::warn!("Illegal exception return {:#x}: {}", exc_return, reason);
        self.throw(USAGE_FAULT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nvic() -> Nvic {
        Nvic::new(Arc::new(NvicState::default()), 80)
    }

    #[test]
    fn test_fixed_priorities_win() {
        let mut nvic = nvic();
        nvic.throw_exception(SYSTICK).unwrap();
        nvic.throw_exception(HARD_FAULT).unwrap();
        nvic.throw_exception(NMI).unwrap();
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), NMI);
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), HARD_FAULT);
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), SYSTICK);
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), 0);
    }

    #[test]
    fn test_equal_group_orders_by_vector() {
        let mut nvic = nvic();
        nvic.state.set_priority(PENDSV, 0x40);
        nvic.state.set_priority(SVCALL, 0x40);
        nvic.throw_exception(PENDSV).unwrap();
        nvic.throw_exception(SVCALL).unwrap();
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), SVCALL);
        // Same group as the running handler: no preemption
        assert_eq!(nvic.check_exception(0x40), 0);
        assert!(nvic.is_queued(PENDSV));
    }

    #[test]
    fn test_duplicate_throw_is_ignored() {
        let mut nvic = nvic();
        nvic.throw_exception(PENDSV).unwrap();
        nvic.throw_exception(PENDSV).unwrap();
        assert_eq!(nvic.pending_count(), 1);
    }

    #[test]
    fn test_prigroup_merges_sub_priorities() {
        let nvic = nvic();
        nvic.state.set_prigroup(5); // group value 64
        assert_eq!(nvic.group_priority(0x7F), 0x40);
        assert_eq!(nvic.group_priority(0x3F), 0);
        assert_eq!(nvic.group_priority(-2), -2);
    }

    #[test]
    fn test_disabled_fault_escalates() {
        let mut nvic = nvic();
        nvic.throw_exception(USAGE_FAULT).unwrap();
        assert!(nvic.is_queued(HARD_FAULT));
        assert!(!nvic.is_queued(USAGE_FAULT));

        nvic.state
            .shcsr
            .store(crate::peripherals::nvic::SHCSR_USGFAULTENA, Ordering::SeqCst);
        nvic.throw_exception(USAGE_FAULT).unwrap();
        assert!(nvic.is_queued(USAGE_FAULT));
    }

    #[test]
    fn test_irq_waits_for_enable() {
        let mut nvic = nvic();
        nvic.throw_exception(16 + 3).unwrap();
        assert!(nvic.state.is_pending(19));
        assert_eq!(nvic.pending_count(), 0);

        nvic.state.enable(19);
        nvic.sync_scs_requests();
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), 19);
    }

    #[test]
    fn test_cleared_irq_leaves_pending_store() {
        let mut nvic = nvic();
        nvic.state.enable(20);
        nvic.throw_exception(20).unwrap();
        assert!(nvic.is_queued(20));
        nvic.state.clear_pending(20);
        nvic.sync_scs_requests();
        assert_eq!(nvic.pending_count(), 0);
    }

    #[test]
    fn test_invalid_vectors_rejected() {
        let mut nvic = nvic();
        assert_eq!(nvic.throw_exception(0), Err(NvicError::InvalidVector(0)));
        assert_eq!(nvic.throw_exception(80), Err(NvicError::InvalidVector(80)));
    }

    #[test]
    fn test_icsr_requests_drained() {
        let mut nvic = nvic();
        nvic.state
            .icsr_requests
            .store(ICSR_PENDSVSET | ICSR_NMIPENDSET, Ordering::SeqCst);
        nvic.sync_scs_requests();
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), NMI);
        assert_eq!(nvic.check_exception(THREAD_PRIORITY), PENDSV);
        assert_eq!(nvic.state.icsr_requests.load(Ordering::SeqCst), 0);
    }
}

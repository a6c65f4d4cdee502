// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::monitor::{DataCallback, MonitorPacket, MonitorRegistry, PeripheralKind, UART_RX, UART_TX};
use crate::SimResult;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const SR: u32 = 0x00;
const DR: u32 = 0x04;
const CR1: u32 = 0x0C;

const SR_RXNE: u8 = 0x20;
const SR_TC: u8 = 0x40;
const SR_TXE: u8 = 0x80;
const CR1_RXNEIE: u32 = 1 << 5;

pub type RxQueue = Arc<Mutex<VecDeque<u8>>>;

/// Minimal USART: status, data and control registers, RX fed from the
/// peripheral monitor, TX captured into a sink and optionally echoed.
#[derive(Debug, Default, serde::Serialize)]
pub struct Uart {
    index: u8,
    cr1: u32,
    #[serde(skip)]
    rx: RxQueue,
    #[serde(skip)]
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
}

impl Uart {
    pub fn new() -> Self {
        Self::with_index(0)
    }

    pub fn with_index(index: u8) -> Self {
        Self {
            index,
            cr1: 0,
            rx: Arc::new(Mutex::new(VecDeque::new())),
            sink: None,
            echo_stdout: true,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    fn rx_pending(&self) -> bool {
        self.rx.lock().map(|q| !q.is_empty()).unwrap_or(false)
    }

    fn push_tx(&mut self, value: u8) {
        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.push(value);
            }
        }

        if self.echo_stdout {
            #[allow(unused_must_use)]
            {
                print!("{}", value as char);
                io::stdout().flush();
            }
        }
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    /// Shared receive queue; bytes pushed here show up in DR.
    pub fn rx_queue(&self) -> RxQueue {
        self.rx.clone()
    }

    /// Route monitor data addressed to this UART into its receive queue.
    pub fn attach_monitor(&self, registry: &mut MonitorRegistry) {
        let rx = self.rx.clone();
        let callback: DataCallback = Box::new(move |header, payload| {
            if header.data_kind != UART_RX {
                return;
            }
            if let Ok(mut queue) = rx.lock() {
                queue.extend(payload.iter().copied());
            }
        });
        registry.register(PeripheralKind::Uart, self.index, callback);
    }

    /// Frame captured TX bytes for the monitor.
    pub fn tx_packet(&self, bytes: Vec<u8>) -> MonitorPacket {
        MonitorPacket::data(PeripheralKind::Uart, self.index, UART_TX, bytes)
    }
}

impl crate::Peripheral for Uart {
    fn read(&self, offset: u32) -> SimResult<u8> {
        match offset {
            SR => {
                let mut status = SR_TXE | SR_TC;
                if self.rx_pending() {
                    status |= SR_RXNE;
                }
                Ok(status)
            }
            DR => Ok(self
                .rx
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or(0)),
            o if (CR1..CR1 + 4).contains(&o) => Ok((self.cr1 >> ((o - CR1) * 8)) as u8),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u32, value: u8) -> SimResult<()> {
        match offset {
            DR => self.push_tx(value),
            o if (CR1..CR1 + 4).contains(&o) => {
                let shift = (o - CR1) * 8;
                self.cr1 = (self.cr1 & !(0xFF << shift)) | ((value as u32) << shift);
            }
            _ => {}
        }
        Ok(())
    }

    fn tick(&mut self) -> crate::PeripheralTickResult {
        crate::PeripheralTickResult {
            irq: self.cr1 & CR1_RXNEIE != 0 && self.rx_pending(),
            cycles: 0,
        }
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

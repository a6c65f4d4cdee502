// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Peripheral-monitor framing and dispatch.
//!
//! A frame is a packet header `{kind: u8, length: u16 LE}` followed by
//! `length` bytes: a data header `{peripheral: u8, index: u8, data_kind: u8}`
//! and the payload. The transport (pipe, socket) is whatever `Read`/`Write`
//! the caller hands in.

use std::collections::HashMap;
use std::io::{Read, Write};

pub const PACKET_HEADER_LEN: usize = 3;
pub const DATA_HEADER_LEN: usize = 3;
pub const MAX_PAYLOAD: usize = u16::MAX as usize - DATA_HEADER_LEN;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor stream error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown packet kind {0:#x}")]
    UnknownPacketKind(u8),
    #[error("unknown peripheral kind {0:#x}")]
    UnknownPeripheral(u8),
    #[error("packet length {0} shorter than the data header")]
    Truncated(u16),
    #[error("payload of {0} bytes does not fit in one frame")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Data = 0x01,
    Control = 0x02,
}

impl TryFrom<u8> for PacketKind {
    type Error = MonitorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Data),
            0x02 => Ok(PacketKind::Control),
            other => Err(MonitorError::UnknownPacketKind(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PeripheralKind {
    Uart = 0x01,
    Gpio = 0x02,
    Timer = 0x03,
}

impl TryFrom<u8> for PeripheralKind {
    type Error = MonitorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PeripheralKind::Uart),
            0x02 => Ok(PeripheralKind::Gpio),
            0x03 => Ok(PeripheralKind::Timer),
            other => Err(MonitorError::UnknownPeripheral(other)),
        }
    }
}

/// `data_kind` values used by the UART model.
pub const UART_RX: u8 = 0x00;
pub const UART_TX: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub peripheral: PeripheralKind,
    pub index: u8,
    pub data_kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPacket {
    pub kind: PacketKind,
    pub data: DataHeader,
    pub payload: Vec<u8>,
}

impl MonitorPacket {
    pub fn data(peripheral: PeripheralKind, index: u8, data_kind: u8, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketKind::Data,
            data: DataHeader {
                peripheral,
                index,
                data_kind,
            },
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MonitorError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(MonitorError::PayloadTooLarge(self.payload.len()));
        }
        let length = (DATA_HEADER_LEN + self.payload.len()) as u16;
        let mut out = Vec::with_capacity(PACKET_HEADER_LEN + length as usize);
        out.push(self.kind as u8);
        out.extend_from_slice(&length.to_le_bytes());
        out.push(self.data.peripheral as u8);
        out.push(self.data.index);
        out.push(self.data.data_kind);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), MonitorError> {
        writer.write_all(&self.encode()?)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, MonitorError> {
        let mut head = [0u8; PACKET_HEADER_LEN];
        reader.read_exact(&mut head)?;
        let header = PacketHeader {
            kind: PacketKind::try_from(head[0])?,
            length: u16::from_le_bytes([head[1], head[2]]),
        };
        if (header.length as usize) < DATA_HEADER_LEN {
            return Err(MonitorError::Truncated(header.length));
        }

        let mut body = vec![0u8; header.length as usize];
        reader.read_exact(&mut body)?;
        Ok(Self {
            kind: header.kind,
            data: DataHeader {
                peripheral: PeripheralKind::try_from(body[0])?,
                index: body[1],
                data_kind: body[2],
            },
            payload: body[DATA_HEADER_LEN..].to_vec(),
        })
    }
}

pub type DataCallback = Box<dyn FnMut(&DataHeader, &[u8]) + Send>;

/// Maps `(peripheral kind, index)` to the handler for data arriving from the monitor.
#[derive(Default)]
pub struct MonitorRegistry {
    handlers: HashMap<(PeripheralKind, u8), DataCallback>,
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered for the same peripheral.
    pub fn register(&mut self, peripheral: PeripheralKind, index: u8, callback: DataCallback) {
        if self.handlers.insert((peripheral, index), callback).is_some() {
            tracing::debug!("Monitor handler for {:?}#{} replaced", peripheral, index);
        }
    }

    pub fn unregister(&mut self, peripheral: PeripheralKind, index: u8) -> bool {
        self.handlers.remove(&(peripheral, index)).is_some()
    }

    /// Deliver a data packet. Returns false when nobody is registered for it.
    pub fn dispatch(&mut self, packet: &MonitorPacket) -> bool {
        if packet.kind != PacketKind::Data {
            return false;
        }
        match self
            .handlers
            .get_mut(&(packet.data.peripheral, packet.data.index))
        {
            Some(handler) => {
                handler(&packet.data, &packet.payload);
                true
            }
            None => {
                tracing::warn!(
                    "No monitor handler for {:?}#{}",
                    packet.data.peripheral,
                    packet.data.index
                );
                false
            }
        }
    }

    /// Read one frame from `reader` and dispatch it.
    pub fn pump<R: Read>(&mut self, reader: &mut R) -> Result<bool, MonitorError> {
        let packet = MonitorPacket::read_from(reader)?;
        Ok(self.dispatch(&packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_frame_layout() {
        let packet = MonitorPacket::data(PeripheralKind::Uart, 2, UART_TX, b"hi".to_vec());
        assert_eq!(
            packet.encode().unwrap(),
            vec![0x01, 0x05, 0x00, 0x01, 0x02, UART_TX, b'h', b'i']
        );
    }

    #[test]
    fn test_read_back_from_stream() {
        let first = MonitorPacket::data(PeripheralKind::Uart, 0, UART_RX, b"abc".to_vec());
        let second = MonitorPacket::data(PeripheralKind::Gpio, 1, 0, vec![]);
        let mut wire = Vec::new();
        first.write_to(&mut wire).unwrap();
        second.write_to(&mut wire).unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(MonitorPacket::read_from(&mut cursor).unwrap(), first);
        assert_eq!(MonitorPacket::read_from(&mut cursor).unwrap(), second);
        assert!(matches!(
            MonitorPacket::read_from(&mut cursor),
            Err(MonitorError::Io(_))
        ));
    }

    #[test]
    fn test_rejects_bad_headers() {
        let mut cursor = Cursor::new(vec![0x7F, 0x03, 0x00, 0x01, 0x00, 0x00]);
        assert!(matches!(
            MonitorPacket::read_from(&mut cursor),
            Err(MonitorError::UnknownPacketKind(0x7F))
        ));

        let mut cursor = Cursor::new(vec![0x01, 0x02, 0x00, 0x01, 0x00]);
        assert!(matches!(
            MonitorPacket::read_from(&mut cursor),
            Err(MonitorError::Truncated(2))
        ));
    }

    #[test]
    fn test_registry_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut registry = MonitorRegistry::new();
        registry.register(
            PeripheralKind::Uart,
            1,
            Box::new(move |_, payload| sink.lock().unwrap().extend_from_slice(payload)),
        );

        let hit = MonitorPacket::data(PeripheralKind::Uart, 1, UART_RX, b"ok".to_vec());
        let miss = MonitorPacket::data(PeripheralKind::Uart, 0, UART_RX, b"no".to_vec());
        assert!(registry.dispatch(&hit));
        assert!(!registry.dispatch(&miss));
        assert_eq!(seen.lock().unwrap().as_slice(), b"ok");

        assert!(registry.unregister(PeripheralKind::Uart, 1));
        assert!(!registry.dispatch(&hit));
    }
}

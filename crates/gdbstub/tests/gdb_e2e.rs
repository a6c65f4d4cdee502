// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;
use thumbsim_core::bus::SystemBus;
use thumbsim_core::system::cortex_m::configure_cortex_m;
use thumbsim_core::{Bus, Machine, SimulationConfig};
use thumbsim_gdbstub::GdbServer;

fn compute_checksum(data: &str) -> String {
    let sum: u8 = data.as_bytes().iter().fold(0, |acc, &x| acc.wrapping_add(x));
    format!("{:02x}", sum)
}

fn send_packet(stream: &mut TcpStream, data: &str) {
    let packet = format!("${}#{}", data, compute_checksum(data));
    stream.write_all(packet.as_bytes()).unwrap();
    stream.flush().unwrap();
}

/// Body of the next `$...#xx` packet, acks stripped.
fn read_packet(stream: &mut TcpStream) -> String {
    let mut buffer = [0; 2048];
    let mut response = String::new();
    let start = std::time::Instant::now();
    loop {
        if start.elapsed() > Duration::from_secs(5) {
            panic!("Timed out reading GDB packet. Data so far: {:?}", response);
        }
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => response.push_str(&String::from_utf8_lossy(&buffer[..n])),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => panic!("Error reading GDB packet: {:?}", e),
        }

        if let (Some(dollar), Some(hash)) = (response.find('$'), response.rfind('#')) {
            if hash > dollar && response.len() >= hash + 3 {
                break;
            }
        }
    }
    // The stub may already have hung up after a detach
    let _ = stream.write_all(b"+");
    let body = response.trim_start_matches('+');
    body.trim_start_matches('$')
        .split('#')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn machine() -> Machine<thumbsim_core::cpu::CortexM> {
    let mut bus = SystemBus::new();
    let (cpu, _nvic) = configure_cortex_m(&mut bus, &SimulationConfig::default());
    let mut machine = Machine::new(cpu, bus);
    // MOVS R0, #1 ; MOVS R1, #2 ; B .
    for (i, hw) in [0x2001u16, 0x2102, 0xE7FE].iter().enumerate() {
        machine.bus.write_u16(0x2000_0000 + i as u32 * 2, *hw).unwrap();
    }
    machine.cpu.regs.pc = 0x2000_0000;
    machine.cpu.regs.msp = 0x2000_8000;
    machine
}

#[test]
fn test_gdb_rsp_session() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let server = GdbServer::bind(0).unwrap();
    let port = server.local_addr().unwrap().port();
    let handle = thread::spawn(move || server.run(machine()).unwrap());

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();

    // R0 before anything ran
    send_packet(&mut stream, "p0");
    assert_eq!(read_packet(&mut stream), "00000000");

    send_packet(&mut stream, "s");
    let resp = read_packet(&mut stream);
    assert!(resp.contains("05"), "No SIGTRAP after step. Got: {}", resp);

    send_packet(&mut stream, "p0");
    assert_eq!(read_packet(&mut stream), "01000000");
    send_packet(&mut stream, "pf");
    assert_eq!(read_packet(&mut stream), "02000020");

    // Breakpoint on the branch
    send_packet(&mut stream, "Z0,20000004,2");
    assert_eq!(read_packet(&mut stream), "OK");
    send_packet(&mut stream, "c");
    let resp = read_packet(&mut stream);
    assert!(resp.contains("05"), "No SIGTRAP at breakpoint. Got: {}", resp);
    send_packet(&mut stream, "p1");
    assert_eq!(read_packet(&mut stream), "02000000");

    send_packet(&mut stream, "m20000000,4");
    assert_eq!(read_packet(&mut stream), "01200221");

    // Spin on `B .` until interrupted
    send_packet(&mut stream, "z0,20000004,2");
    assert_eq!(read_packet(&mut stream), "OK");
    send_packet(&mut stream, "c");
    thread::sleep(Duration::from_millis(100));
    stream.write_all(&[0x03]).unwrap();
    stream.flush().unwrap();
    let resp = read_packet(&mut stream);
    assert!(resp.contains("02"), "No SIGINT after interrupt. Got: {}", resp);

    send_packet(&mut stream, "D");
    let _ = read_packet(&mut stream);
    let machine = handle.join().unwrap();
    assert_eq!(machine.cpu.regs.pc, 0x2000_0004);
}

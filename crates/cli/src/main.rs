// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use thumbsim_core::cpu::CortexM;
use thumbsim_core::snapshot::MachineSnapshot;
use thumbsim_core::system::builder::{build_machine, load_descriptor};
use thumbsim_core::{DebugControl, Machine, SimulationError, StopReason};

const EXIT_PASS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

/// Steps between progress reports in untraced runs.
const PROGRESS_CHUNK: u32 = 10_000;

const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

fn parse_u32_addr(s: &str) -> Result<u32, String> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex address '{}': {}", s, e))
    } else {
        u32::from_str(trimmed).map_err(|e| format!("Invalid address '{}': {}", s, e))
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Thumb-2 microcontroller simulator",
    long_about = None,
    subcommand_negates_reqs = true
)]
struct Cli {
    /// Path to the firmware image (ELF or raw binary)
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Path to the machine descriptor (YAML)
    #[arg(short, long)]
    system: Option<PathBuf>,

    /// Load address for raw binary images
    #[arg(long, value_parser = parse_u32_addr, default_value = "0")]
    raw_base: u32,

    /// Write a state snapshot (JSON) when the run stops.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Breakpoint PC address (repeatable). Stops simulation when PC matches.
    #[arg(long, value_parser = parse_u32_addr)]
    breakpoint: Vec<u32>,

    /// Enable instruction-level execution tracing
    #[arg(short, long, global = true)]
    trace: bool,

    /// Maximum number of steps to execute (default: 20000)
    #[arg(long, default_value = "20000")]
    max_steps: u32,

    /// Start a GDB server on the specified port
    #[arg(long)]
    gdb: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Machine control operations (load, etc.)
    Machine(MachineArgs),
}

#[derive(Parser, Debug)]
struct MachineArgs {
    #[command(subcommand)]
    command: MachineCommands,
}

#[derive(Subcommand, Debug)]
enum MachineCommands {
    /// Rebuild a machine from a snapshot and resume simulation.
    Load(LoadArgs),
}

#[derive(Parser, Debug)]
struct LoadArgs {
    /// Path to the snapshot JSON file
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Override maximum number of steps to execute
    #[arg(long)]
    max_steps: Option<u32>,

    /// Write the resumed run's final state here
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Everything needed to rebuild a stopped run: the machine state plus the
/// inputs the memory contents came from.
#[derive(Serialize, Deserialize, Debug)]
struct RunSnapshot {
    schema_version: String,
    firmware: PathBuf,
    system: Option<PathBuf>,
    raw_base: u32,
    max_steps: u32,
    stop_reason: String,
    total_cycles: u64,
    uart_tx: String,
    machine: MachineSnapshot,
}

struct RunInputs<'a> {
    firmware: &'a Path,
    system: Option<&'a Path>,
    raw_base: u32,
    breakpoints: &'a [u32],
}

struct LoopResult {
    stop: Result<StopReason, SimulationError>,
    cycles: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match &cli.command {
        Some(Commands::Machine(MachineArgs {
            command: MachineCommands::Load(args),
        })) => run_machine_load(args, cli.trace),
        None => run_interactive(&cli),
    }
}

/// Machine from the descriptor, with the firmware loaded and reset applied.
fn prepare_machine(inputs: &RunInputs<'_>, trace: bool) -> anyhow::Result<Machine<CortexM>> {
    let desc = load_descriptor(inputs.system)?;
    let mut machine = build_machine(&desc, trace)?;

    info!("Loading firmware: {:?}", inputs.firmware);
    let program = thumbsim_loader::load_image(inputs.firmware, inputs.raw_base)?;
    info!("Entry Point: {:#x}", program.entry_point);

    machine
        .load_firmware(&program)
        .context("Failed to load firmware into memory")?;
    for &addr in inputs.breakpoints {
        machine.add_breakpoint(addr);
    }
    Ok(machine)
}

fn run_interactive(cli: &Cli) -> ExitCode {
    info!("Starting thumbsim");

    let Some(firmware) = &cli.firmware else {
        error!("Missing required --firmware argument");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };

    let inputs = RunInputs {
        firmware,
        system: cli.system.as_deref(),
        raw_base: cli.raw_base,
        breakpoints: &cli.breakpoint,
    };
    let mut machine = match prepare_machine(&inputs, cli.trace) {
        Ok(machine) => machine,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    info!(
        "Initial PC: {:#x}, MSP: {:#x}",
        machine.cpu.regs.pc, machine.cpu.regs.msp
    );

    // Check if GDB server is requested
    if let Some(port) = cli.gdb {
        let result =
            thumbsim_gdbstub::GdbServer::bind(port).and_then(|server| server.run(machine));
        return match result {
            Ok(machine) => {
                info!("GDB session ended at PC={:#x}", machine.cpu.regs.pc);
                ExitCode::from(EXIT_PASS)
            }
            Err(e) => {
                error!("GDB server failed: {:#}", e);
                ExitCode::from(EXIT_RUNTIME_ERROR)
            }
        };
    }

    let uart_tx = Arc::new(Mutex::new(Vec::new()));
    machine.bus.attach_uart_tx_sink(uart_tx.clone(), true);

    let result = run_simulation_loop(&mut machine, cli.max_steps, cli.trace);
    report(&machine, &result, &uart_tx);

    if let Some(path) = &cli.snapshot {
        let snapshot = run_snapshot(&inputs, cli.max_steps, &machine, &result, &uart_tx);
        if let Err(e) = write_snapshot(path, &snapshot) {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }

    exit_code(&result)
}

fn run_machine_load(args: &LoadArgs, trace: bool) -> ExitCode {
    info!("Loading machine from snapshot: {:?}", args.snapshot);

    let saved = match read_snapshot(&args.snapshot) {
        Ok(saved) => saved,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if saved.schema_version != SNAPSHOT_SCHEMA_VERSION {
        warn!(
            "Snapshot schema {} differs from {}",
            saved.schema_version, SNAPSHOT_SCHEMA_VERSION
        );
    }

    // Snapshots carry no memory image, so the firmware is loaded first
    let inputs = RunInputs {
        firmware: &saved.firmware,
        system: saved.system.as_deref(),
        raw_base: saved.raw_base,
        breakpoints: &[],
    };
    let mut machine = match prepare_machine(&inputs, trace) {
        Ok(machine) => machine,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Err(e) = machine.apply_snapshot(saved.machine) {
        error!("Failed to restore snapshot: {}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }
    machine.total_cycles = saved.total_cycles;

    let uart_tx = Arc::new(Mutex::new(saved.uart_tx.into_bytes()));
    machine.bus.attach_uart_tx_sink(uart_tx.clone(), true);

    info!("Resuming simulation at PC={:#x}", machine.cpu.regs.pc);
    let max_steps = args.max_steps.unwrap_or(saved.max_steps);
    let result = run_simulation_loop(&mut machine, max_steps, trace);
    report(&machine, &result, &uart_tx);

    if let Some(path) = &args.output {
        let snapshot = run_snapshot(&inputs, max_steps, &machine, &result, &uart_tx);
        if let Err(e) = write_snapshot(path, &snapshot) {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }

    exit_code(&result)
}

fn run_simulation_loop(machine: &mut Machine<CortexM>, max_steps: u32, trace: bool) -> LoopResult {
    let start_cycles = machine.get_cycle_count();
    let mut remaining = max_steps;

    info!("Running for {} steps...", max_steps);
    let stop = loop {
        if remaining == 0 {
            break Ok(StopReason::MaxStepsReached);
        }
        let chunk = remaining.min(PROGRESS_CHUNK);
        match machine.run(Some(chunk)) {
            Ok(StopReason::MaxStepsReached) => {
                remaining -= chunk;
                if !trace && remaining > 0 {
                    info!(
                        "Progress: {} steps, PC={:#x}",
                        max_steps - remaining,
                        machine.cpu.regs.pc
                    );
                }
            }
            other => break other,
        }
    };

    LoopResult {
        stop,
        cycles: machine.get_cycle_count() - start_cycles,
    }
}

fn report(machine: &Machine<CortexM>, result: &LoopResult, uart_tx: &Arc<Mutex<Vec<u8>>>) {
    match &result.stop {
        Ok(StopReason::Breakpoint(addr)) => info!("Breakpoint hit at PC={:#x}", addr),
        Ok(StopReason::EndOfProgram(addr)) => info!("No code at PC={:#x}, stopping", addr),
        Ok(StopReason::MaxStepsReached) => info!("Step limit reached"),
        Ok(reason) => info!("Stopped: {:?}", reason),
        Err(e) => error!("Simulation Error: {}", e),
    }
    info!("Simulation loop finished.");
    info!("Final PC: {:#x}", machine.cpu.regs.pc);
    info!("Cycles this run: {}", result.cycles);
    if let Ok(bytes) = uart_tx.lock() {
        if !bytes.is_empty() {
            info!("UART output: {} bytes", bytes.len());
        }
    }
}

fn exit_code(result: &LoopResult) -> ExitCode {
    match result.stop {
        Ok(_) => ExitCode::from(EXIT_PASS),
        Err(_) => ExitCode::from(EXIT_RUNTIME_ERROR),
    }
}

fn stop_label(stop: &Result<StopReason, SimulationError>) -> String {
    match stop {
        Ok(StopReason::Breakpoint(addr)) => format!("breakpoint@{:#x}", addr),
        Ok(StopReason::EndOfProgram(addr)) => format!("end_of_program@{:#x}", addr),
        Ok(StopReason::MaxStepsReached) => "max_steps".to_string(),
        Ok(StopReason::ManualStop) => "halt".to_string(),
        Ok(StopReason::StepDone) => "step".to_string(),
        Err(e) => format!("error: {}", e),
    }
}

fn run_snapshot(
    inputs: &RunInputs<'_>,
    max_steps: u32,
    machine: &Machine<CortexM>,
    result: &LoopResult,
    uart_tx: &Arc<Mutex<Vec<u8>>>,
) -> RunSnapshot {
    let uart_tx = uart_tx
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    RunSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
        firmware: inputs.firmware.to_path_buf(),
        system: inputs.system.map(Path::to_path_buf),
        raw_base: inputs.raw_base,
        max_steps,
        stop_reason: stop_label(&result.stop),
        total_cycles: machine.get_cycle_count(),
        uart_tx,
        machine: machine.snapshot(),
    }
}

fn write_snapshot(path: &Path, snapshot: &RunSnapshot) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create snapshot {:?}", path))?;
    serde_json::to_writer_pretty(file, snapshot)
        .with_context(|| format!("Failed to write snapshot {:?}", path))?;
    info!("Snapshot written to {:?}", path);
    Ok(())
}

fn read_snapshot(path: &Path) -> anyhow::Result<RunSnapshot> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open snapshot {:?}", path))?;
    serde_json::from_reader(file).with_context(|| format!("Failed to parse snapshot {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u32_addr() {
        assert_eq!(parse_u32_addr("0x20000000"), Ok(0x2000_0000));
        assert_eq!(parse_u32_addr(" 0X1F "), Ok(0x1F));
        assert_eq!(parse_u32_addr("4096"), Ok(4096));
        assert!(parse_u32_addr("0xZZ").is_err());
        assert!(parse_u32_addr("0x100000000").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_breakpoints() {
        let cli = Cli::try_parse_from([
            "thumbsim",
            "--firmware",
            "fw.bin",
            "--breakpoint",
            "0x100",
            "--breakpoint",
            "0x200",
            "--max-steps",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.breakpoint, vec![0x100, 0x200]);
        assert_eq!(cli.max_steps, 50);
        assert_eq!(cli.raw_base, 0);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_machine_load_needs_no_firmware() {
        let cli = Cli::try_parse_from(["thumbsim", "machine", "load", "--snapshot", "s.json"])
            .unwrap();
        let Some(Commands::Machine(MachineArgs {
            command: MachineCommands::Load(args),
        })) = cli.command
        else {
            panic!("expected machine load");
        };
        assert_eq!(args.snapshot, PathBuf::from("s.json"));
        assert!(args.max_steps.is_none());
    }

    #[test]
    fn test_stop_labels() {
        assert_eq!(stop_label(&Ok(StopReason::Breakpoint(0x10))), "breakpoint@0x10");
        assert_eq!(stop_label(&Ok(StopReason::MaxStepsReached)), "max_steps");
        assert_eq!(
            stop_label(&Ok(StopReason::EndOfProgram(0x4_0000))),
            "end_of_program@0x40000"
        );
    }
}

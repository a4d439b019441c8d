// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! ecfan-probe: one-shot embedded controller diagnostics. Reads, writes
//! and dumps EC registers, restores firmware fan control after a crashed
//! daemon, and prints the fan curves.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ec_fan_control::config;
use ec_fan_control::curve::{Zone, CPU_TEMP_MAX};
use ec_fan_control::ec::{self, EcController, WaitPolicy};
use ec_fan_control::port::DevPort;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "ecfan-probe", about = "Embedded controller diagnostics")]
struct Cli {
    /// Port access device.
    #[arg(short, long, default_value = config::DEFAULT_PORT_DEVICE)]
    port_device: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one EC register.
    Read {
        /// Register offset, hex (0xB1) or decimal.
        #[arg(value_parser = ec::parse_byte)]
        offset: u8,
    },

    /// Write one EC register.
    Write {
        #[arg(value_parser = ec::parse_byte)]
        offset: u8,
        #[arg(value_parser = ec::parse_byte)]
        value: u8,
    },

    /// Hex-dump a range of EC registers.
    Dump {
        #[arg(long, default_value = "0x00", value_parser = ec::parse_byte)]
        start: u8,
        #[arg(long, default_value_t = 256)]
        len: usize,
    },

    /// Show the current fan temperatures, duties and status flags.
    Status,

    /// Hand the fans back to the EC firmware.
    Restore,

    /// Print the CPU and GPU fan curves. Does not touch hardware.
    Curve {
        #[arg(long, default_value_t = 40)]
        from: u32,
        #[arg(long, default_value_t = 100)]
        to: u32,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Curve { from, to } => print_curves(from, to),
        Command::Read { offset } => {
            let mut ec = open_ec(&cli.port_device)?;
            let value = ec.read_byte(offset)?;
            println!("{offset:#04x} = {value:#04x} ({value})");
            warn_on_timeouts(&ec);
        }
        Command::Write { offset, value } => {
            let mut ec = open_ec(&cli.port_device)?;
            log::warn!("Writing {value:#04x} to EC register {offset:#04x}");
            ec.write_byte(offset, value)?;
        }
        Command::Dump { start, len } => {
            let mut ec = open_ec(&cli.port_device)?;
            let bytes = ec.dump(start, len)?;
            print_dump(start, &bytes);
            warn_on_timeouts(&ec);
        }
        Command::Status => {
            let mut ec = open_ec(&cli.port_device)?;
            print_status(&mut ec)?;
            warn_on_timeouts(&ec);
        }
        Command::Restore => {
            let mut ec = open_ec(&cli.port_device)?;
            ec.write_all(&ec::AUTOMATIC_MODE)
                .context("failed to restore automatic fan control")?;
            log::info!("EC returned to automatic fan control");
        }
    }
    Ok(())
}

fn open_ec(path: &Path) -> anyhow::Result<EcController<DevPort>> {
    let port = DevPort::open(path).context("cannot acquire port access")?;
    EcController::new(port, WaitPolicy::default()).context("EC driver unavailable")
}

fn warn_on_timeouts(ec: &EcController<DevPort>) {
    let stats = ec.stats();
    if stats.obf_timeouts > 0 {
        log::warn!("{} read(s) timed out, values may be stale", stats.obf_timeouts);
    }
}

fn print_status(ec: &mut EcController<DevPort>) -> anyhow::Result<()> {
    let status = ec.status()?;
    println!(
        "status {:#04x} (IBF {}, OBF {})",
        status.0,
        u8::from(status.input_full()),
        u8::from(status.output_full())
    );
    let cpu_temp = ec.read_byte(ec::CPU_TEMP_OFFSET)?;
    let cpu_fan = ec.read_byte(ec::CPU_FAN_OFFSET)?;
    let gpu_fan = ec.read_byte(ec::GPU_FAN_OFFSET)?;
    let mode_a = ec.read_byte(ec::FAN_MODE_OFFSET_A)?;
    let mode_b = ec.read_byte(ec::FAN_MODE_OFFSET_B)?;
    println!("CPU temp {cpu_temp} C");
    println!("CPU fan  {cpu_fan}");
    println!("GPU fan  {gpu_fan}");
    println!(
        "mode     {:#04x}={mode_a} {:#04x}={mode_b}",
        ec::FAN_MODE_OFFSET_A,
        ec::FAN_MODE_OFFSET_B
    );
    Ok(())
}

fn print_dump(start: u8, bytes: &[u8]) {
    println!("     00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f");
    let start = usize::from(start);
    let first_row = start & !0xF;
    for row in (first_row..start + bytes.len()).step_by(16) {
        let mut line = format!("{row:02x}: ");
        for offset in row..row + 16 {
            match offset.checked_sub(start).and_then(|i| bytes.get(i)) {
                Some(b) => line.push_str(&format!("{b:02x} ")),
                None => line.push_str("   "),
            }
        }
        println!("{}", line.trim_end());
    }
}

fn print_curves(from: u32, to: u32) {
    println!("temp  {:>14}  {:>14}", Zone::Cpu, Zone::Gpu);
    for temp in from..=to {
        let mut line = format!("{temp:>3} C");
        for zone in Zone::ALL {
            let out = zone.curve().evaluate(temp);
            let cell = if zone == Zone::Cpu && temp > CPU_TEMP_MAX {
                "rejected".to_string()
            } else {
                format!("{:>3} {}", out.duty, out.regime)
            };
            line.push_str(&format!("  {cell:>14}"));
        }
        println!("{line}");
    }
}

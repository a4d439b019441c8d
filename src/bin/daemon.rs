// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! ecfan-daemon: switches the embedded controller to host fan control,
//! drives the CPU and GPU fans from their temperature curves once per
//! interval, and hands the fans back to the firmware on SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use ec_fan_control::config::{self, Settings};
use ec_fan_control::control::ControlLoop;
use ec_fan_control::curve::FilterMode;
use ec_fan_control::ec::{self, EcController};
use ec_fan_control::gpu::{self, GpuBackend, GpuTelemetry};
use ec_fan_control::port::{DevPort, PortIo};
use ec_fan_control::report::{self, CycleReport};
use ec_fan_control::sim::{FixedGpu, SimulatedEc};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "ecfan-daemon", about = "Embedded controller fan control daemon")]
struct Cli {
    /// Control loop interval in milliseconds.
    #[arg(short, long, default_value_t = config::DEFAULT_POLL_INTERVAL_MS)]
    interval_ms: u64,

    /// Port access device.
    #[arg(short, long, default_value = config::DEFAULT_PORT_DEVICE)]
    port_device: PathBuf,

    /// Where GPU temperatures come from.
    #[arg(long, value_enum, default_value_t = GpuBackend::Hwmon)]
    gpu_backend: GpuBackend,

    /// Index of the GPU whose temperature drives the GPU fan.
    #[arg(long, default_value_t = config::DEFAULT_GPU_INDEX)]
    gpu_index: u32,

    /// Skip samples that rose more than 30 C or fell more than 20 C since
    /// the previous one.
    #[arg(long)]
    band_filter: bool,

    /// Read fan registers back after boost-regime writes.
    #[arg(long)]
    verify_writes: bool,

    /// Print status as JSON lines instead of text.
    #[arg(long)]
    json: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Run against a simulated EC and GPU instead of hardware.
    #[arg(long)]
    simulate: bool,

    /// CPU temperature reported by the simulated EC.
    #[arg(long, default_value_t = 25, requires = "simulate")]
    sim_cpu_temp: u8,

    /// Temperature reported by the simulated GPU.
    #[arg(long, default_value_t = 25, requires = "simulate")]
    sim_gpu_temp: u32,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            port_device: self.port_device.clone(),
            interval: Duration::from_millis(self.interval_ms),
            gpu_backend: self.gpu_backend,
            gpu_index: self.gpu_index,
            filter_mode: if self.band_filter {
                FilterMode::Band
            } else {
                FilterMode::Permissive
            },
            verify_writes: self.verify_writes,
            ..Settings::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = cli.settings();

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }

    let mut controller = match start(&cli, &settings) {
        Ok(controller) => controller,
        Err(e) => {
            log::error!("{e:#}");
            std::process::exit(1);
        }
    };

    log::info!(
        "Controlling fans every {} ms (filter: {:?})",
        settings.interval.as_millis(),
        settings.filter_mode
    );

    controller.run(&shutdown, |report| print_report(report, cli.json));

    let stats = controller.ec().stats();
    if stats.ibf_timeouts > 0 || stats.obf_timeouts > 0 {
        log::warn!(
            "EC wait timeouts during this run: IBF {}, OBF {}",
            stats.ibf_timeouts,
            stats.obf_timeouts
        );
    }

    controller
        .shutdown()
        .context("failed to restore automatic fan control")?;
    Ok(())
}

type Controller = ControlLoop<Box<dyn PortIo>, Box<dyn GpuTelemetry>>;

/// Acquire the port, the EC driver and telemetry, then switch the EC to
/// host fan control.
fn start(cli: &Cli, settings: &Settings) -> anyhow::Result<Controller> {
    let (port, telemetry): (Box<dyn PortIo>, Box<dyn GpuTelemetry>) = if cli.simulate {
        log::info!("Simulation mode: no hardware will be touched");
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, cli.sim_cpu_temp);
        (Box::new(sim), Box::new(FixedGpu::new(cli.sim_gpu_temp)))
    } else {
        let port = DevPort::open(&settings.port_device).context("cannot acquire port access")?;
        (Box::new(port), gpu::open_backend(settings.gpu_backend))
    };

    let ec = EcController::new(port, settings.wait).context("EC driver unavailable")?;
    ControlLoop::start(ec, telemetry, settings).context("fan controller failed to start")
}

fn print_report(report: &CycleReport, json: bool) {
    if !json {
        println!("{report}");
        return;
    }
    match report::encode(report) {
        Ok(line) => print!("{line}"),
        Err(e) => log::error!("Failed to encode status report: {e}"),
    }
}

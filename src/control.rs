// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The sense -> decide -> actuate loop.
//!
//! [`ControlLoop::start`] brings up GPU telemetry and switches the EC into
//! host-controlled fan mode; [`ControlLoop::run`] then repeats one cycle
//! per interval until the shutdown flag is raised, and
//! [`ControlLoop::shutdown`] hands the fans back to the EC firmware.

use crate::config::Settings;
use crate::curve::{self, SanityFilter, Zone, ZoneState};
use crate::ec::{self, EcController};
use crate::error::{EcError, StartupError};
use crate::gpu::{GpuDevice, GpuTelemetry};
use crate::port::PortIo;
use crate::report::{CycleReport, ZoneOutcome, ZoneReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

/// EC register driven by a zone's fan.
pub fn actuator_offset(zone: Zone) -> u8 {
    match zone {
        Zone::Cpu => ec::CPU_FAN_OFFSET,
        Zone::Gpu => ec::GPU_FAN_OFFSET,
    }
}

/// Owns the EC, the telemetry backend and the per-zone sample history.
pub struct ControlLoop<P: PortIo, G: GpuTelemetry> {
    ec: EcController<P>,
    telemetry: G,
    device: GpuDevice,
    filter: SanityFilter,
    interval: Duration,
    verify_writes: bool,
    cpu: ZoneState,
    gpu: ZoneState,
    cycle: u64,
    state: LoopState,
}

impl<P: PortIo, G: GpuTelemetry> ControlLoop<P, G> {
    /// Bring the controller from `Initializing` to `Running`.
    ///
    /// Telemetry is initialized and the GPU resolved before the EC is
    /// touched, so a telemetry failure leaves the EC untouched.
    pub fn start(
        mut ec: EcController<P>,
        mut telemetry: G,
        settings: &Settings,
    ) -> Result<Self, StartupError> {
        telemetry.init()?;

        let device = match telemetry.device_by_index(settings.gpu_index) {
            Ok(device) => device,
            Err(e) => {
                telemetry.shutdown();
                return Err(e.into());
            }
        };
        log::info!("GPU zone follows GPU {}: {}", device.index, device.name);

        if let Err(e) = ec.write_all(&ec::CUSTOM_MODE) {
            telemetry.shutdown();
            return Err(e.into());
        }
        log::info!("EC switched to host fan control");

        Ok(Self {
            ec,
            telemetry,
            device,
            filter: settings.filter(),
            interval: settings.interval,
            verify_writes: settings.verify_writes,
            cpu: ZoneState::default(),
            gpu: ZoneState::default(),
            cycle: 0,
            state: LoopState::Running,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Previous accepted sample of a zone.
    pub fn zone_state(&self, zone: Zone) -> ZoneState {
        match zone {
            Zone::Cpu => self.cpu,
            Zone::Gpu => self.gpu,
        }
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn ec(&self) -> &EcController<P> {
        &self.ec
    }

    /// Run cycles until `shutdown` is set. The flag is checked once per
    /// cycle, before any sensor is touched; a cycle or sleep in progress
    /// is never cut short.
    pub fn run(&mut self, shutdown: &AtomicBool, mut on_report: impl FnMut(&CycleReport)) {
        while !shutdown.load(Ordering::SeqCst) {
            let report = self.run_cycle();
            on_report(&report);
            thread::sleep(self.interval);
        }
        log::info!("Shutdown requested after {} cycle(s)", self.cycle);
    }

    /// One sense -> decide -> actuate pass over both zones.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;

        let gpu_reading = self.telemetry.temperature(&self.device);
        let cpu_reading = self.ec.read_byte(ec::CPU_TEMP_OFFSET);

        let cpu = match cpu_reading {
            Ok(raw) => self.apply(Zone::Cpu, u32::from(raw)),
            Err(e) => {
                log::warn!("CPU temperature read failed: {e}");
                unavailable(Zone::Cpu, e.to_string())
            }
        };

        let gpu = match gpu_reading {
            Ok(temp_c) => self.apply(Zone::Gpu, temp_c),
            Err(e) => {
                log::warn!("GPU query failed: {e}");
                unavailable(Zone::Gpu, e.to_string())
            }
        };

        CycleReport {
            cycle: self.cycle,
            cpu,
            gpu,
        }
    }

    /// Hand the fans back to the EC firmware and release telemetry.
    ///
    /// Both mode registers are written even if the first write fails; the
    /// first error is returned.
    pub fn shutdown(&mut self) -> Result<(), EcError> {
        if self.state == LoopState::Terminated {
            return Ok(());
        }
        self.state = LoopState::ShuttingDown;

        let mut result = Ok(());
        for &(offset, value) in &ec::AUTOMATIC_MODE {
            if let Err(e) = self.ec.write_byte(offset, value) {
                log::error!("Failed to restore EC register {offset:#04x}: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if result.is_ok() {
            log::info!("EC returned to automatic fan control");
        }

        self.telemetry.shutdown();
        self.state = LoopState::Terminated;
        result
    }

    fn apply(&mut self, zone: Zone, reading_c: u32) -> ZoneReport {
        let state = match zone {
            Zone::Cpu => &mut self.cpu,
            Zone::Gpu => &mut self.gpu,
        };

        let outcome = match curve::decide(zone, state, reading_c, &self.filter) {
            Ok(output) => {
                log::debug!(
                    "{zone} {reading_c} C -> duty {} ({})",
                    output.duty,
                    output.regime
                );
                match self.write_duty(zone, output.duty, output.regime) {
                    Ok(()) => ZoneOutcome::Applied {
                        duty: output.duty,
                        regime: output.regime,
                    },
                    Err(e) => {
                        log::error!("Failed to write {zone} fan duty: {e}");
                        ZoneOutcome::WriteFailed {
                            duty: output.duty,
                            error: e.to_string(),
                        }
                    }
                }
            }
            Err(rejection) => {
                log::warn!("{zone} sample skipped: {rejection}");
                rejection.into()
            }
        };

        ZoneReport {
            zone,
            temp_c: Some(reading_c),
            outcome,
        }
    }

    fn write_duty(&mut self, zone: Zone, duty: u8, regime: curve::Regime) -> Result<(), EcError> {
        let offset = actuator_offset(zone);
        self.ec.write_byte(offset, duty)?;

        if self.verify_writes && regime == curve::Regime::Boost {
            let readback = self.ec.read_byte(offset)?;
            log::debug!("{zone} fan register {offset:#04x} reads back {readback}");
            if readback != duty {
                log::warn!("{zone} fan register {offset:#04x} holds {readback}, wrote {duty}");
            }
        }
        Ok(())
    }
}

impl<P: PortIo, G: GpuTelemetry> Drop for ControlLoop<P, G> {
    fn drop(&mut self) {
        if self.state != LoopState::Terminated {
            log::warn!("Controller dropped while running, restoring automatic fan control");
            let _ = self.shutdown();
        }
    }
}

fn unavailable(zone: Zone, error: String) -> ZoneReport {
    ZoneReport {
        zone,
        temp_c: None,
        outcome: ZoneOutcome::Unavailable { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::FilterMode;
    use crate::ec::WaitPolicy;
    use crate::error::TelemetryError;
    use crate::sim::{EcAccess, FixedGpu, SimulatedEc};

    fn settings() -> Settings {
        Settings {
            interval: Duration::ZERO,
            wait: WaitPolicy {
                retries: 8,
                delay: Duration::ZERO,
            },
            ..Settings::default()
        }
    }

    fn start<'a>(
        sim: &'a mut SimulatedEc,
        gpu: &'a mut FixedGpu,
        settings: &Settings,
    ) -> ControlLoop<&'a mut SimulatedEc, &'a mut FixedGpu> {
        let ec = EcController::new(sim, settings.wait).unwrap();
        ControlLoop::start(ec, gpu, settings).unwrap()
    }

    #[test]
    fn test_startup_writes_custom_mode_before_first_read() {
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, 25);
        let mut gpu = FixedGpu::new(25);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            assert_eq!(ctl.state(), LoopState::Running);
            ctl.run_cycle();
            ctl.shutdown().unwrap();
        }

        let accesses = sim.accesses();
        assert_eq!(
            accesses[..3],
            [
                EcAccess::Write {
                    offset: 0x22,
                    value: 12
                },
                EcAccess::Write {
                    offset: 0x21,
                    value: 48
                },
                EcAccess::Read {
                    offset: 0xB1,
                    value: 25
                },
            ]
        );
    }

    #[test]
    fn test_shutdown_restores_automatic_mode() {
        let mut sim = SimulatedEc::new();
        let mut gpu = FixedGpu::new(40);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            ctl.shutdown().unwrap();
            assert_eq!(ctl.state(), LoopState::Terminated);
            // Second call is a no-op.
            ctl.shutdown().unwrap();
        }

        assert_eq!(sim.writes(), vec![(0x22, 12), (0x21, 48), (0x22, 4), (0x21, 16)]);
        assert_eq!(gpu.shutdowns(), 1);
    }

    #[test]
    fn test_drop_while_running_restores_automatic_mode() {
        let mut sim = SimulatedEc::new();
        let mut gpu = FixedGpu::new(40);
        drop(start(&mut sim, &mut gpu, &settings()));

        assert_eq!(sim.writes()[2..], [(0x22, 4), (0x21, 16)]);
    }

    #[test]
    fn test_telemetry_init_failure_is_fatal_before_any_ec_write() {
        let mut sim = SimulatedEc::new();
        let mut gpu = FixedGpu::failing();
        let settings = settings();
        let ec = EcController::new(&mut sim, settings.wait).unwrap();

        let err = ControlLoop::start(ec, &mut gpu, &settings).err().unwrap();
        assert!(matches!(
            err,
            StartupError::Telemetry(TelemetryError::Init(_))
        ));
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_missing_gpu_is_fatal_and_shuts_telemetry_down() {
        let mut sim = SimulatedEc::new();
        let mut gpu = FixedGpu::new(40);
        let settings = Settings {
            gpu_index: 3,
            ..settings()
        };
        let ec = EcController::new(&mut sim, settings.wait).unwrap();

        let err = ControlLoop::start(ec, &mut gpu, &settings).err().unwrap();
        assert!(matches!(
            err,
            StartupError::Telemetry(TelemetryError::NoDevice { index: 3, .. })
        ));
        assert_eq!(gpu.shutdowns(), 1);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_closed_port_never_reaches_running() {
        let err = EcController::new(SimulatedEc::closed(), WaitPolicy::default()).unwrap_err();
        assert!(matches!(err, EcError::Unauthorized(_)));
    }

    #[test]
    fn test_cold_start_stalls_under_band_filter() {
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, 55);
        let mut gpu = FixedGpu::new(20);
        let settings = Settings {
            filter_mode: FilterMode::Band,
            ..settings()
        };
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings);
            for _ in 0..2 {
                let report = ctl.run_cycle();
                assert_eq!(report.cpu.outcome, ZoneOutcome::Filtered { previous_c: 0 });
                assert_eq!(ctl.zone_state(Zone::Cpu).previous_c, 0);
            }
            ctl.shutdown().unwrap();
        }
        assert!(sim.writes_to(ec::CPU_FAN_OFFSET).is_empty());
    }

    #[test]
    fn test_default_filter_applies_warm_start_sample() {
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, 55);
        let mut gpu = FixedGpu::new(20);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            let report = ctl.run_cycle();
            assert_eq!(report.cpu.applied(), Some(60));
            ctl.shutdown().unwrap();
        }
        assert_eq!(sim.writes_to(ec::CPU_FAN_OFFSET), vec![60]);
    }

    #[test]
    fn test_gradual_warm_up_walks_the_cpu_curve() {
        let mut sim = SimulatedEc::new();
        sim.script_reads(ec::CPU_TEMP_OFFSET, [25, 50, 58, 75]);
        let mut gpu = FixedGpu::new(20);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            let duties: Vec<_> = (0..4).map(|_| ctl.run_cycle().cpu.applied()).collect();
            assert_eq!(duties, vec![Some(0), Some(0), Some(66), Some(78)]);
            // Boost stores the offset-adjusted temperature.
            assert_eq!(ctl.zone_state(Zone::Cpu).previous_c, 40);
            ctl.shutdown().unwrap();
        }
        assert_eq!(sim.writes_to(ec::CPU_FAN_OFFSET), vec![0, 0, 66, 78]);
    }

    #[test]
    fn test_default_filter_tracks_warm_boot_into_boost() {
        let mut sim = SimulatedEc::new();
        sim.script_reads(ec::CPU_TEMP_OFFSET, [40, 58, 75, 80, 90, 100, 110]);
        let mut gpu = FixedGpu::new(90);
        gpu.script([Some(60), Some(75)]);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            for _ in 0..7 {
                let report = ctl.run_cycle();
                assert!(report.cpu.applied().is_some(), "{report}");
                assert!(report.gpu.applied().is_some(), "{report}");
            }
            assert_eq!(ctl.zone_state(Zone::Cpu).previous_c, 75);
            ctl.shutdown().unwrap();
        }
        assert_eq!(
            sim.writes_to(ec::CPU_FAN_OFFSET),
            vec![0, 66, 78, 83, 92, 100, 107]
        );
        assert_eq!(
            sim.writes_to(ec::GPU_FAN_OFFSET),
            vec![58, 95, 109, 109, 109, 109, 109]
        );
    }

    #[test]
    fn test_implausible_cpu_reading_leaves_fan_untouched() {
        let mut sim = SimulatedEc::new();
        sim.script_reads(ec::CPU_TEMP_OFFSET, [20, 0, 200]);
        let mut gpu = FixedGpu::new(20);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            assert_eq!(ctl.run_cycle().cpu.applied(), Some(0));
            assert_eq!(ctl.run_cycle().cpu.outcome, ZoneOutcome::OutOfRange);
            assert_eq!(ctl.run_cycle().cpu.outcome, ZoneOutcome::OutOfRange);
            assert_eq!(ctl.zone_state(Zone::Cpu).previous_c, 20);
            ctl.shutdown().unwrap();
        }
        assert_eq!(sim.writes_to(ec::CPU_FAN_OFFSET), vec![0]);
    }

    #[test]
    fn test_gpu_query_failure_skips_only_gpu_zone() {
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, 20);
        let mut gpu = FixedGpu::new(20);
        gpu.script([None]);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            let report = ctl.run_cycle();
            assert_eq!(report.cpu.applied(), Some(0));
            assert!(matches!(
                report.gpu.outcome,
                ZoneOutcome::Unavailable { .. }
            ));
            assert_eq!(report.gpu.temp_c, None);

            let report = ctl.run_cycle();
            assert_eq!(report.gpu.applied(), Some(0));
            ctl.shutdown().unwrap();
        }
        assert_eq!(sim.writes_to(ec::GPU_FAN_OFFSET), vec![0]);
        assert_eq!(sim.writes_to(ec::CPU_FAN_OFFSET), vec![0, 0]);
    }

    #[test]
    fn test_gpu_boost_write() {
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, 20);
        let mut gpu = FixedGpu::new(20);
        gpu.script([Some(30), Some(55), Some(71)]);
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings());
            let duties: Vec<_> = (0..3).map(|_| ctl.run_cycle().gpu.applied()).collect();
            assert_eq!(duties, vec![Some(0), Some(44), Some(91)]);
            assert_eq!(ctl.zone_state(Zone::Gpu).previous_c, 46);
            ctl.shutdown().unwrap();
        }
        assert_eq!(sim.writes_to(ec::GPU_FAN_OFFSET), vec![0, 44, 91]);
    }

    #[test]
    fn test_verify_writes_reads_back_boost_duty() {
        let mut sim = SimulatedEc::new();
        sim.script_reads(ec::CPU_TEMP_OFFSET, [30, 58, 75]);
        let mut gpu = FixedGpu::new(20);
        let settings = Settings {
            verify_writes: true,
            ..settings()
        };
        {
            let mut ctl = start(&mut sim, &mut gpu, &settings);
            for _ in 0..3 {
                ctl.run_cycle();
            }
            ctl.shutdown().unwrap();
        }
        let readbacks: Vec<_> = sim
            .accesses()
            .iter()
            .filter(|a| matches!(a, EcAccess::Read { offset, .. } if *offset == ec::CPU_FAN_OFFSET))
            .collect();
        assert_eq!(
            readbacks,
            vec![&EcAccess::Read {
                offset: ec::CPU_FAN_OFFSET,
                value: 78
            }]
        );
    }

    #[test]
    fn test_run_checks_flag_before_each_cycle() {
        let mut sim = SimulatedEc::new();
        sim.set_register(ec::CPU_TEMP_OFFSET, 20);
        let mut gpu = FixedGpu::new(20);
        let mut ctl = start(&mut sim, &mut gpu, &settings());

        let stop = AtomicBool::new(true);
        ctl.run(&stop, |_| panic!("no cycle expected"));
        assert_eq!(ctl.cycles(), 0);

        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        ctl.run(&stop, |report| {
            seen.push(report.cycle);
            if report.cycle == 3 {
                stop.store(true, Ordering::SeqCst);
            }
        });
        assert_eq!(seen, vec![1, 2, 3]);
        ctl.shutdown().unwrap();
    }
}

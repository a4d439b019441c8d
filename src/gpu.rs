// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! GPU temperature telemetry.
//!
//! [`GpuTelemetry`] follows the usual vendor-library lifecycle: initialize,
//! resolve a device handle by index, query temperatures, shut down. Two
//! Linux backends are provided: hwmon sysfs (AMD, Intel, nouveau) and the
//! `nvidia-smi` tool for the proprietary NVIDIA driver.

use crate::error::TelemetryError;
use crate::hwmon::{self, TempSensor};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Handle to one GPU resolved by [`GpuTelemetry::device_by_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
}

/// Vendor GPU telemetry.
pub trait GpuTelemetry {
    /// Prepare the backend. Must succeed before any other call.
    fn init(&mut self) -> Result<(), TelemetryError>;

    /// Resolve the GPU at `index`.
    fn device_by_index(&mut self, index: u32) -> Result<GpuDevice, TelemetryError>;

    /// Current core temperature in whole degrees C.
    fn temperature(&mut self, device: &GpuDevice) -> Result<u32, TelemetryError>;

    /// Release backend resources. Safe to call more than once.
    fn shutdown(&mut self);
}

impl<T: GpuTelemetry + ?Sized> GpuTelemetry for Box<T> {
    fn init(&mut self) -> Result<(), TelemetryError> {
        (**self).init()
    }

    fn device_by_index(&mut self, index: u32) -> Result<GpuDevice, TelemetryError> {
        (**self).device_by_index(index)
    }

    fn temperature(&mut self, device: &GpuDevice) -> Result<u32, TelemetryError> {
        (**self).temperature(device)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

impl<T: GpuTelemetry + ?Sized> GpuTelemetry for &mut T {
    fn init(&mut self) -> Result<(), TelemetryError> {
        (**self).init()
    }

    fn device_by_index(&mut self, index: u32) -> Result<GpuDevice, TelemetryError> {
        (**self).device_by_index(index)
    }

    fn temperature(&mut self, device: &GpuDevice) -> Result<u32, TelemetryError> {
        (**self).temperature(device)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Selectable telemetry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GpuBackend {
    /// hwmon sysfs (amdgpu, radeon, nouveau, i915, xe)
    Hwmon,
    /// The `nvidia-smi` command-line tool
    NvidiaSmi,
}

/// Build the telemetry backend selected on the command line.
pub fn open_backend(backend: GpuBackend) -> Box<dyn GpuTelemetry> {
    match backend {
        GpuBackend::Hwmon => Box::new(HwmonGpu::new(Path::new(hwmon::HWMON_ROOT))),
        GpuBackend::NvidiaSmi => Box::new(NvidiaSmi::new()),
    }
}

// ---------------------------------------------------------------------------
// hwmon backend
// ---------------------------------------------------------------------------

/// GPU temperatures from hwmon sysfs.
#[derive(Debug)]
pub struct HwmonGpu {
    root: PathBuf,
    sensors: Option<Vec<TempSensor>>,
}

impl HwmonGpu {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sensors: None,
        }
    }

    fn sensors(&self) -> Result<&[TempSensor], TelemetryError> {
        self.sensors
            .as_deref()
            .ok_or(TelemetryError::NotInitialized)
    }
}

impl GpuTelemetry for HwmonGpu {
    fn init(&mut self) -> Result<(), TelemetryError> {
        let sensors = hwmon::discover_gpu_sensors(&self.root).map_err(|e| {
            TelemetryError::Init(format!("cannot scan {}: {e}", self.root.display()))
        })?;
        if sensors.is_empty() {
            return Err(TelemetryError::Init(format!(
                "no GPU hwmon sensors under {}",
                self.root.display()
            )));
        }
        log::info!("Found {} GPU hwmon sensor(s)", sensors.len());
        self.sensors = Some(sensors);
        Ok(())
    }

    fn device_by_index(&mut self, index: u32) -> Result<GpuDevice, TelemetryError> {
        let sensors = self.sensors()?;
        let sensor = sensors
            .get(index as usize)
            .ok_or(TelemetryError::NoDevice {
                index,
                available: sensors.len(),
            })?;
        Ok(GpuDevice {
            index,
            name: format!("{} ({})", sensor.hwmon_name, sensor.id),
        })
    }

    fn temperature(&mut self, device: &GpuDevice) -> Result<u32, TelemetryError> {
        let sensors = self.sensors()?;
        let sensor = sensors
            .get(device.index as usize)
            .ok_or(TelemetryError::NoDevice {
                index: device.index,
                available: sensors.len(),
            })?;
        hwmon::read_temp_c(sensor).map_err(|e| TelemetryError::Query(e.to_string()))
    }

    fn shutdown(&mut self) {
        self.sensors = None;
    }
}

// ---------------------------------------------------------------------------
// nvidia-smi backend
// ---------------------------------------------------------------------------

/// GPU temperatures from `nvidia-smi`.
#[derive(Debug)]
pub struct NvidiaSmi {
    program: PathBuf,
    names: Option<Vec<String>>,
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new()
    }
}

impl NvidiaSmi {
    pub fn new() -> Self {
        Self::with_program(Path::new("nvidia-smi"))
    }

    /// Use a specific `nvidia-smi` executable.
    pub fn with_program(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            names: None,
        }
    }

    fn query(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| format!("cannot run {}: {e}", self.program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl GpuTelemetry for NvidiaSmi {
    fn init(&mut self) -> Result<(), TelemetryError> {
        let out = self
            .query(&["--query-gpu=name", "--format=csv,noheader"])
            .map_err(TelemetryError::Init)?;
        let names: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if names.is_empty() {
            return Err(TelemetryError::Init("nvidia-smi reported no GPUs".to_string()));
        }
        log::info!("nvidia-smi reports {} GPU(s)", names.len());
        self.names = Some(names);
        Ok(())
    }

    fn device_by_index(&mut self, index: u32) -> Result<GpuDevice, TelemetryError> {
        let names = self.names.as_ref().ok_or(TelemetryError::NotInitialized)?;
        let name = names.get(index as usize).ok_or(TelemetryError::NoDevice {
            index,
            available: names.len(),
        })?;
        Ok(GpuDevice {
            index,
            name: name.clone(),
        })
    }

    fn temperature(&mut self, device: &GpuDevice) -> Result<u32, TelemetryError> {
        if self.names.is_none() {
            return Err(TelemetryError::NotInitialized);
        }
        let index = device.index.to_string();
        let out = self
            .query(&[
                "--query-gpu=temperature.gpu",
                "--format=csv,noheader,nounits",
                "-i",
                &index,
            ])
            .map_err(TelemetryError::Query)?;
        parse_temperature(&out)
    }

    fn shutdown(&mut self) {
        self.names = None;
    }
}

fn parse_temperature(out: &str) -> Result<u32, TelemetryError> {
    let line = out.lines().next().unwrap_or("").trim();
    line.parse::<u32>()
        .map_err(|e| TelemetryError::Query(format!("unexpected temperature {line:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_hwmon() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let chip = root.path().join("hwmon1");
        fs::create_dir_all(&chip).unwrap();
        fs::write(chip.join("name"), "amdgpu\n").unwrap();
        fs::write(chip.join("temp1_input"), "67000\n").unwrap();
        root
    }

    #[test]
    fn test_hwmon_lifecycle() {
        let root = fake_hwmon();
        let mut gpu = HwmonGpu::new(root.path());

        assert!(matches!(
            gpu.device_by_index(0),
            Err(TelemetryError::NotInitialized)
        ));
        gpu.init().unwrap();
        let device = gpu.device_by_index(0).unwrap();
        assert_eq!(gpu.temperature(&device).unwrap(), 67);

        gpu.shutdown();
        assert!(gpu.temperature(&device).is_err());
    }

    #[test]
    fn test_hwmon_missing_index() {
        let root = fake_hwmon();
        let mut gpu = HwmonGpu::new(root.path());
        gpu.init().unwrap();
        assert!(matches!(
            gpu.device_by_index(1),
            Err(TelemetryError::NoDevice {
                index: 1,
                available: 1
            })
        ));
    }

    #[test]
    fn test_hwmon_init_without_gpu_fails() {
        let root = tempfile::tempdir().unwrap();
        let mut gpu = HwmonGpu::new(root.path());
        assert!(matches!(gpu.init(), Err(TelemetryError::Init(_))));
    }

    #[test]
    fn test_nvidia_smi_missing_binary() {
        let mut gpu = NvidiaSmi::with_program(Path::new("/nonexistent/nvidia-smi"));
        assert!(matches!(gpu.init(), Err(TelemetryError::Init(_))));
    }

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("64\n").unwrap(), 64);
        assert!(parse_temperature("[N/A]\n").is_err());
        assert!(parse_temperature("").is_err());
    }
}

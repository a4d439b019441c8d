// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Runtime settings.
//!
//! There is no config file: the binaries fill [`Settings`] from their
//! command-line arguments, and everything not given falls back to the
//! constants below.

use crate::curve::{FilterMode, SanityFilter};
use crate::ec::{self, WaitPolicy};
use crate::gpu::GpuBackend;
use crate::port;
use std::path::PathBuf;
use std::time::Duration;

/// Default port access device.
pub const DEFAULT_PORT_DEVICE: &str = port::DEFAULT_PORT_DEVICE;

/// Default control loop interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default GPU index handed to the telemetry backend.
pub const DEFAULT_GPU_INDEX: u32 = 0;

/// Default status polls per EC wait.
pub const DEFAULT_WAIT_RETRIES: u32 = ec::DEFAULT_WAIT_RETRIES;

/// Default delay between EC status polls, in microseconds.
pub const DEFAULT_WAIT_DELAY_US: u64 = 10;

/// Everything the controller needs to know at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Port access device node.
    pub port_device: PathBuf,

    /// Time between control cycles.
    pub interval: Duration,

    /// GPU telemetry backend.
    pub gpu_backend: GpuBackend,

    /// Index of the GPU driving the GPU fan zone.
    pub gpu_index: u32,

    /// Sample delta filter behaviour.
    pub filter_mode: FilterMode,

    /// Read actuator registers back after boost-regime writes.
    pub verify_writes: bool,

    /// Spin-wait budget for EC handshakes.
    pub wait: WaitPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port_device: PathBuf::from(DEFAULT_PORT_DEVICE),
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            gpu_backend: GpuBackend::Hwmon,
            gpu_index: DEFAULT_GPU_INDEX,
            filter_mode: FilterMode::Permissive,
            verify_writes: false,
            wait: WaitPolicy {
                retries: DEFAULT_WAIT_RETRIES,
                delay: Duration::from_micros(DEFAULT_WAIT_DELAY_US),
            },
        }
    }
}

impl Settings {
    pub fn filter(&self) -> SanityFilter {
        SanityFilter::new(self.filter_mode)
    }
}

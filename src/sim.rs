// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! In-memory stand-ins for the hardware capabilities.
//!
//! [`SimulatedEc`] answers the same command/data port handshake as a real
//! embedded controller, backed by a 256-byte register file. [`FixedGpu`]
//! reports a constant temperature. Both back the daemon's `--simulate`
//! mode and the controller tests.

use crate::ec::{EC_CMD_PORT, EC_CMD_READ, EC_CMD_WRITE, EC_DATA_PORT, EC_STATUS_OBF};
use crate::error::TelemetryError;
use crate::gpu::{GpuDevice, GpuTelemetry};
use crate::port::PortIo;
use std::collections::VecDeque;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ReadAddress,
    WriteAddress,
    WriteValue(u8),
}

/// One completed EC-level transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcAccess {
    Read { offset: u8, value: u8 },
    Write { offset: u8, value: u8 },
}

/// Software embedded controller.
#[derive(Debug, Clone)]
pub struct SimulatedEc {
    ram: [u8; 256],
    phase: Phase,
    output: Option<u8>,
    log: Vec<EcAccess>,
    /// Values served for successive reads of specific offsets before
    /// falling back to the register file.
    scripted: Vec<(u8, VecDeque<u8>)>,
    open: bool,
}

impl Default for SimulatedEc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEc {
    pub fn new() -> Self {
        Self {
            ram: [0; 256],
            phase: Phase::Idle,
            output: None,
            log: Vec::new(),
            scripted: Vec::new(),
            open: true,
        }
    }

    /// A controller whose capability reports itself unauthorized.
    pub fn closed() -> Self {
        Self {
            open: false,
            ..Self::new()
        }
    }

    pub fn set_register(&mut self, offset: u8, value: u8) {
        self.ram[usize::from(offset)] = value;
    }

    /// Queue values returned by the next reads of `offset`, in order.
    pub fn script_reads(&mut self, offset: u8, values: impl IntoIterator<Item = u8>) {
        match self.scripted.iter_mut().find(|(o, _)| *o == offset) {
            Some((_, queue)) => queue.extend(values),
            None => self.scripted.push((offset, values.into_iter().collect())),
        }
    }

    /// Every completed transaction, oldest first.
    pub fn accesses(&self) -> &[EcAccess] {
        &self.log
    }

    /// Completed writes as `(offset, value)` pairs, oldest first.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.log
            .iter()
            .filter_map(|a| match *a {
                EcAccess::Write { offset, value } => Some((offset, value)),
                EcAccess::Read { .. } => None,
            })
            .collect()
    }

    /// Completed writes to a single offset.
    pub fn writes_to(&self, offset: u8) -> Vec<u8> {
        self.writes()
            .into_iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| v)
            .collect()
    }

    fn load(&mut self, offset: u8) -> u8 {
        if let Some((_, queue)) = self.scripted.iter_mut().find(|(o, _)| *o == offset) {
            if let Some(value) = queue.pop_front() {
                return value;
            }
        }
        self.ram[usize::from(offset)]
    }
}

impl PortIo for SimulatedEc {
    fn read_byte(&mut self, port: u16) -> io::Result<u8> {
        match port {
            // Input is consumed instantly, so IBF never shows.
            EC_CMD_PORT => Ok(if self.output.is_some() { EC_STATUS_OBF } else { 0 }),
            EC_DATA_PORT => Ok(self.output.take().unwrap_or(0)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("simulated EC has no port {port:#x}"),
            )),
        }
    }

    fn write_byte(&mut self, port: u16, value: u8) -> io::Result<()> {
        match (port, self.phase) {
            (EC_CMD_PORT, _) => {
                self.output = None;
                self.phase = match value {
                    EC_CMD_READ => Phase::ReadAddress,
                    EC_CMD_WRITE => Phase::WriteAddress,
                    _ => Phase::Idle,
                };
            }
            (EC_DATA_PORT, Phase::ReadAddress) => {
                let data = self.load(value);
                self.output = Some(data);
                self.log.push(EcAccess::Read {
                    offset: value,
                    value: data,
                });
                self.phase = Phase::Idle;
            }
            (EC_DATA_PORT, Phase::WriteAddress) => self.phase = Phase::WriteValue(value),
            (EC_DATA_PORT, Phase::WriteValue(offset)) => {
                self.ram[usize::from(offset)] = value;
                self.log.push(EcAccess::Write { offset, value });
                self.phase = Phase::Idle;
            }
            (EC_DATA_PORT, Phase::Idle) => {
                log::debug!("Simulated EC ignored stray data byte {value:#04x}");
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("simulated EC has no port {port:#x}"),
                ));
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Telemetry that reports a scripted sequence of results, then a constant.
#[derive(Debug, Clone)]
pub struct FixedGpu {
    temp_c: u32,
    queued: VecDeque<Option<u32>>,
    initialized: bool,
    fail_init: bool,
    shutdowns: u32,
}

impl FixedGpu {
    pub fn new(temp_c: u32) -> Self {
        Self {
            temp_c,
            queued: VecDeque::new(),
            initialized: false,
            fail_init: false,
            shutdowns: 0,
        }
    }

    /// A backend whose initialization always fails.
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::new(0)
        }
    }

    /// Queue per-query results; `None` makes that query fail.
    pub fn script(&mut self, results: impl IntoIterator<Item = Option<u32>>) {
        self.queued.extend(results);
    }

    /// How many times `shutdown` was called.
    pub fn shutdowns(&self) -> u32 {
        self.shutdowns
    }
}

impl GpuTelemetry for FixedGpu {
    fn init(&mut self) -> Result<(), TelemetryError> {
        if self.fail_init {
            return Err(TelemetryError::Init("simulated init failure".to_string()));
        }
        self.initialized = true;
        Ok(())
    }

    fn device_by_index(&mut self, index: u32) -> Result<GpuDevice, TelemetryError> {
        if !self.initialized {
            return Err(TelemetryError::NotInitialized);
        }
        if index != 0 {
            return Err(TelemetryError::NoDevice {
                index,
                available: 1,
            });
        }
        Ok(GpuDevice {
            index,
            name: "simulated GPU".to_string(),
        })
    }

    fn temperature(&mut self, _device: &GpuDevice) -> Result<u32, TelemetryError> {
        if !self.initialized {
            return Err(TelemetryError::NotInitialized);
        }
        match self.queued.pop_front() {
            Some(Some(t)) => Ok(t),
            Some(None) => Err(TelemetryError::Query("simulated query failure".to_string())),
            None => Ok(self.temp_c),
        }
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        self.shutdowns += 1;
    }
}

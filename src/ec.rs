// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! ACPI embedded controller protocol.
//!
//! The EC exposes a 256-byte register space behind two shared ports: a
//! command/status port and a data port. Every access is a short handshake
//! gated on two status bits, IBF (EC still busy with our last byte) and
//! OBF (EC has a byte waiting for us).

use crate::error::EcError;
use crate::port::PortIo;
use std::thread;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Register map
// ---------------------------------------------------------------------------

/// Command (write) / status (read) port.
pub const EC_CMD_PORT: u16 = 0x66;
/// Data port.
pub const EC_DATA_PORT: u16 = 0x62;

pub const EC_CMD_READ: u8 = 0x80;
pub const EC_CMD_WRITE: u8 = 0x81;

/// Input buffer full: the EC has not consumed the last byte yet.
pub const EC_STATUS_IBF: u8 = 0x02;
/// Output buffer full: a response byte is waiting on the data port.
pub const EC_STATUS_OBF: u8 = 0x01;

/// CPU package temperature in whole degrees C.
pub const CPU_TEMP_OFFSET: u8 = 0xB1;
/// CPU fan duty register.
pub const CPU_FAN_OFFSET: u8 = 0x37;
/// GPU fan duty register.
pub const GPU_FAN_OFFSET: u8 = 0x3A;

/// First fan mode-select register.
pub const FAN_MODE_OFFSET_A: u8 = 0x22;
/// Second fan mode-select register.
pub const FAN_MODE_OFFSET_B: u8 = 0x21;

/// Mode register values that hand the fans to the host.
pub const CUSTOM_MODE: [(u8, u8); 2] = [(FAN_MODE_OFFSET_A, 12), (FAN_MODE_OFFSET_B, 48)];
/// Mode register values that give the fans back to the EC firmware.
pub const AUTOMATIC_MODE: [(u8, u8); 2] = [(FAN_MODE_OFFSET_A, 4), (FAN_MODE_OFFSET_B, 16)];

/// Default number of status polls per wait.
pub const DEFAULT_WAIT_RETRIES: u32 = 10_000;
/// Default delay between status polls.
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_micros(10);

// ---------------------------------------------------------------------------
// Status / policy types
// ---------------------------------------------------------------------------

/// A single sample of the EC status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcStatus(pub u8);

impl EcStatus {
    pub fn input_full(self) -> bool {
        self.0 & EC_STATUS_IBF != 0
    }

    pub fn output_full(self) -> bool {
        self.0 & EC_STATUS_OBF != 0
    }
}

/// Spin-wait budget applied to every IBF/OBF wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Maximum number of status reads per wait.
    pub retries: u32,
    /// Sleep between two status reads.
    pub delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_WAIT_RETRIES,
            delay: DEFAULT_WAIT_DELAY,
        }
    }
}

/// Running counters of exhausted wait budgets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EcStats {
    pub ibf_timeouts: u64,
    pub obf_timeouts: u64,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Byte-level EC access over a [`PortIo`] capability.
///
/// Every method takes `&mut self`, so two transactions can never be in
/// flight at once. Shared use across threads needs a single `Mutex` around
/// the whole controller.
#[derive(Debug)]
pub struct EcController<P: PortIo> {
    port: P,
    wait: WaitPolicy,
    stats: EcStats,
}

impl<P: PortIo> EcController<P> {
    /// Wrap an acquired port capability. Fails if the capability reports
    /// itself closed or unauthorized.
    pub fn new(port: P, wait: WaitPolicy) -> Result<Self, EcError> {
        if !port.is_open() {
            return Err(EcError::Unauthorized(
                "port access driver is not open. Run as root.".to_string(),
            ));
        }
        Ok(Self {
            port,
            wait,
            stats: EcStats::default(),
        })
    }

    /// Read the byte at `offset` in EC RAM.
    pub fn read_byte(&mut self, offset: u8) -> Result<u8, EcError> {
        self.wait_input_empty()?;
        self.port.write_byte(EC_CMD_PORT, EC_CMD_READ)?;

        self.wait_input_empty()?;
        self.port.write_byte(EC_DATA_PORT, offset)?;

        self.wait_output_full()?;
        Ok(self.port.read_byte(EC_DATA_PORT)?)
    }

    /// Write `value` to `offset` in EC RAM. The EC gives no completion
    /// signal for writes.
    pub fn write_byte(&mut self, offset: u8, value: u8) -> Result<(), EcError> {
        self.wait_input_empty()?;
        self.port.write_byte(EC_CMD_PORT, EC_CMD_WRITE)?;

        self.wait_input_empty()?;
        self.port.write_byte(EC_DATA_PORT, offset)?;

        self.wait_input_empty()?;
        self.port.write_byte(EC_DATA_PORT, value)?;
        Ok(())
    }

    /// Read `len` consecutive registers starting at `start`, one
    /// transaction per byte. Stops at the end of the register space.
    pub fn dump(&mut self, start: u8, len: usize) -> Result<Vec<u8>, EcError> {
        let end = usize::from(start).saturating_add(len).min(0x100);
        (usize::from(start)..end)
            .map(|offset| self.read_byte(offset as u8))
            .collect()
    }

    /// Apply a list of `(offset, value)` writes in order.
    pub fn write_all(&mut self, writes: &[(u8, u8)]) -> Result<(), EcError> {
        for &(offset, value) in writes {
            self.write_byte(offset, value)?;
        }
        Ok(())
    }

    /// Sample the status register.
    pub fn status(&mut self) -> Result<EcStatus, EcError> {
        Ok(EcStatus(self.port.read_byte(EC_CMD_PORT)?))
    }

    pub fn stats(&self) -> EcStats {
        self.stats
    }

    /// Access the underlying port capability.
    pub fn port(&self) -> &P {
        &self.port
    }

    // An exhausted IBF budget is not reported: the transaction carries on
    // and the EC may drop the byte.
    fn wait_input_empty(&mut self) -> Result<(), EcError> {
        if !self.poll_until(|s| !s.input_full())? {
            self.stats.ibf_timeouts += 1;
        }
        Ok(())
    }

    fn wait_output_full(&mut self) -> Result<(), EcError> {
        if !self.poll_until(EcStatus::output_full)? {
            self.stats.obf_timeouts += 1;
            log::warn!("EC read timeout (OBF never set), data port may be stale");
        }
        Ok(())
    }

    /// Poll the status register until `ready` holds or the budget runs out.
    /// The first check happens before any sleep.
    fn poll_until(&mut self, ready: impl Fn(EcStatus) -> bool) -> Result<bool, EcError> {
        for attempt in 0..self.wait.retries {
            if ready(self.status()?) {
                return Ok(true);
            }
            if attempt + 1 < self.wait.retries && !self.wait.delay.is_zero() {
                thread::sleep(self.wait.delay);
            }
        }
        Ok(false)
    }
}

/// Parse a register offset or value given as hex (`0xB1`) or decimal (`177`).
pub fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid byte {s:?}: {e}"))
}

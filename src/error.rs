// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types for the EC path, GPU telemetry and controller startup.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the port-access capability or an EC transaction.
#[derive(Debug, Error)]
pub enum EcError {
    /// The privileged I/O channel does not exist on this system.
    #[error("port access device {} not found (is this an x86 machine with /dev/port?)", .path.display())]
    PortUnavailable { path: PathBuf },

    /// The channel exists but this process may not use it.
    #[error("port access not authorized: {0}")]
    Unauthorized(String),

    /// A single port read or write failed.
    #[error("port I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Failures reported by a GPU telemetry backend.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry backend failed to initialize: {0}")]
    Init(String),

    #[error("telemetry backend used before initialization")]
    NotInitialized,

    #[error("no GPU at index {index} ({available} available)")]
    NoDevice { index: u32, available: usize },

    #[error("temperature query failed: {0}")]
    Query(String),

    #[error("telemetry I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Anything that keeps the controller from reaching the running state.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("EC unavailable: {0}")]
    Ec(#[from] EcError),

    #[error("GPU telemetry unavailable: {0}")]
    Telemetry(#[from] TelemetryError),
}

// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Closed-loop laptop fan control through the ACPI embedded controller.
//!
//! The CPU temperature is read from the EC, the GPU temperature from a
//! telemetry backend, and both fans are driven by writing duty values
//! into EC registers over the raw command/data port handshake.

pub mod config;
pub mod control;
pub mod curve;
pub mod ec;
pub mod error;
pub mod gpu;
pub mod hwmon;
pub mod port;
pub mod report;
pub mod sim;

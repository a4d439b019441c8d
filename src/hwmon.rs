// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! hwmon sysfs discovery of GPU temperature sensors.
//!
//! Scans `/sys/class/hwmon/` for chips registered by GPU drivers and reads
//! their `tempN_input` files (millidegrees C).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

/// hwmon `name` values registered by GPU drivers.
pub const GPU_HWMON_NAMES: &[&str] = &["amdgpu", "radeon", "nouveau", "i915", "xe"];

/// A discovered GPU temperature sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempSensor {
    /// Unique identifier, e.g. "hwmon3/temp1"
    pub id: String,
    /// Human-readable label if available, e.g. "edge"
    pub label: Option<String>,
    /// Absolute path to the `tempN_input` file
    pub input_path: PathBuf,
    /// Name of the parent hwmon device
    pub hwmon_name: String,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Return the primary temperature sensor of every GPU hwmon chip under
/// `root`, sorted by hwmon id.
///
/// The primary sensor is the one labelled "edge" if present, otherwise the
/// first `tempN_input`.
pub fn discover_gpu_sensors(root: &Path) -> io::Result<Vec<TempSensor>> {
    let mut sensors = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        if !GPU_HWMON_NAMES.contains(&hwmon_name.as_str()) {
            continue;
        }
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        let mut chip_sensors = Vec::new();
        for n in 1..=32 {
            let input_path = hwmon_dir.join(format!("temp{n}_input"));
            if !input_path.exists() {
                break;
            }
            chip_sensors.push(TempSensor {
                id: format!("{hwmon_basename}/temp{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("temp{n}_label"))),
                input_path,
                hwmon_name: hwmon_name.clone(),
            });
        }

        let primary = chip_sensors
            .iter()
            .position(|s| s.label.as_deref() == Some("edge"))
            .unwrap_or(0);
        if primary < chip_sensors.len() {
            sensors.push(chip_sensors.swap_remove(primary));
        } else {
            log::debug!("GPU hwmon {hwmon_basename} ({hwmon_name}) has no temperature inputs");
        }
    }

    sensors.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sensors)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read a sensor in whole degrees C, truncating the millidegree value.
/// Negative readings clamp to 0; values too large for a `u32` are
/// `InvalidData`.
pub fn read_temp_c(sensor: &TempSensor) -> io::Result<u32> {
    let raw = fs::read_to_string(&sensor.input_path)?;
    let raw = raw.trim();
    let millic = raw.parse::<i64>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: bad temperature {raw:?}: {e}", sensor.id),
        )
    })?;
    u32::try_from((millic / 1000).max(0)).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: temperature {raw:?} out of range", sensor.id),
        )
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(root: &Path, dir: &str, name: &str, temps: &[(&str, Option<&str>)]) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("name"), format!("{name}\n")).unwrap();
        for (i, (value, label)) in temps.iter().enumerate() {
            fs::write(path.join(format!("temp{}_input", i + 1)), value).unwrap();
            if let Some(label) = label {
                fs::write(path.join(format!("temp{}_label", i + 1)), label).unwrap();
            }
        }
    }

    #[test]
    fn test_discovers_only_gpu_chips() {
        let root = tempfile::tempdir().unwrap();
        chip(root.path(), "hwmon0", "coretemp", &[("45000\n", None)]);
        chip(root.path(), "hwmon2", "amdgpu", &[("61000\n", None)]);
        chip(root.path(), "hwmon1", "nouveau", &[("52000\n", None)]);

        let sensors = discover_gpu_sensors(root.path()).unwrap();
        let ids: Vec<_> = sensors.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["hwmon1/temp1", "hwmon2/temp1"]);
        assert_eq!(sensors[1].hwmon_name, "amdgpu");
    }

    #[test]
    fn test_prefers_edge_sensor() {
        let root = tempfile::tempdir().unwrap();
        chip(
            root.path(),
            "hwmon4",
            "amdgpu",
            &[("70000", Some("junction")), ("58000", Some("edge"))],
        );

        let sensors = discover_gpu_sensors(root.path()).unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].id, "hwmon4/temp2");
        assert_eq!(read_temp_c(&sensors[0]).unwrap(), 58);
    }

    #[test]
    fn test_read_truncates_and_rejects_garbage() {
        let root = tempfile::tempdir().unwrap();
        chip(root.path(), "hwmon0", "amdgpu", &[("64999\n", None)]);
        let sensor = discover_gpu_sensors(root.path()).unwrap().remove(0);
        assert_eq!(read_temp_c(&sensor).unwrap(), 64);

        fs::write(&sensor.input_path, "n/a").unwrap();
        assert_eq!(
            read_temp_c(&sensor).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_read_clamps_negative_and_rejects_overflow() {
        let root = tempfile::tempdir().unwrap();
        chip(root.path(), "hwmon0", "amdgpu", &[("-5000\n", None)]);
        let sensor = discover_gpu_sensors(root.path()).unwrap().remove(0);
        assert_eq!(read_temp_c(&sensor).unwrap(), 0);

        fs::write(&sensor.input_path, "9223372036854775807\n").unwrap();
        assert_eq!(
            read_temp_c(&sensor).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}

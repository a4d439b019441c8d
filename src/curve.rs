// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and sample filtering.
//!
//! Each zone maps temperature to an 8-bit EC duty value through three
//! regimes: off, a linear ramp, and a square-root "boost" ramp that climbs
//! quickly past the threshold. Samples are screened before use: the CPU
//! sensor has a plausibility gate and every zone has a delta filter
//! against its previous accepted sample.

use serde::Serialize;
use std::fmt;

/// Highest CPU reading treated as a real temperature.
pub const CPU_TEMP_MAX: u32 = 150;

/// Largest accepted rise between two samples.
pub const MAX_RISE_C: i64 = 30;
/// Largest accepted fall between two samples.
pub const MAX_FALL_C: i64 = 20;

// ---------------------------------------------------------------------------
// Zones and regimes
// ---------------------------------------------------------------------------

/// An independently controlled temperature/fan pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Cpu,
    Gpu,
}

impl Zone {
    pub const ALL: [Zone; 2] = [Zone::Cpu, Zone::Gpu];

    /// The curve driving this zone's fan.
    pub fn curve(self) -> &'static ZoneCurve {
        match self {
            Zone::Cpu => &CPU_CURVE,
            Zone::Gpu => &GPU_CURVE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Zone::Cpu => "CPU",
            Zone::Gpu => "GPU",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Which piece of the curve produced a duty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    /// Fan stopped.
    Off,
    /// Linear ramp.
    Standard,
    /// Square-root ramp above the linear range.
    Boost,
}

impl Regime {
    pub fn label(self) -> &'static str {
        match self {
            Regime::Off => "off",
            Regime::Standard => "standard",
            Regime::Boost => "boost",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

// ---------------------------------------------------------------------------
// Curves
// ---------------------------------------------------------------------------

/// Three-regime curve over whole-degree temperatures.
///
/// - `t <= off_max_c`: duty 0
/// - `off_max_c < t <= linear_max_c`: `slope * t + intercept`
/// - `t > linear_max_c`: `sqrt((t - boost_offset_c) / boost_divisor)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneCurve {
    pub off_max_c: u32,
    pub linear_max_c: u32,
    pub slope: f64,
    pub intercept: f64,
    pub boost_offset_c: u32,
    pub boost_divisor: f64,
}

pub const CPU_CURVE: ZoneCurve = ZoneCurve {
    off_max_c: 50,
    linear_max_c: 60,
    slope: 2.0,
    intercept: -50.0,
    boost_offset_c: 35,
    boost_divisor: 0.0065,
};

pub const GPU_CURVE: ZoneCurve = ZoneCurve {
    off_max_c: 50,
    linear_max_c: 70,
    slope: 2.8,
    intercept: -110.0,
    boost_offset_c: 25,
    boost_divisor: 0.0055,
};

/// Result of evaluating a curve at one temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveOutput {
    pub duty: u8,
    pub regime: Regime,
    /// The temperature the regime formula actually consumed. In the boost
    /// regime this is the offset-adjusted value, and it is what the zone
    /// remembers as its previous sample.
    pub effective_temp_c: u32,
}

impl ZoneCurve {
    /// Evaluate the curve at `temp_c`.
    pub fn evaluate(&self, temp_c: u32) -> CurveOutput {
        if temp_c <= self.off_max_c {
            return CurveOutput {
                duty: 0,
                regime: Regime::Off,
                effective_temp_c: temp_c,
            };
        }

        if temp_c <= self.linear_max_c {
            let duty = self.slope * f64::from(temp_c) + self.intercept;
            return CurveOutput {
                duty: saturate_duty(duty),
                regime: Regime::Standard,
                effective_temp_c: temp_c,
            };
        }

        let adjusted = temp_c - self.boost_offset_c;
        let duty = (f64::from(adjusted) / self.boost_divisor).sqrt();
        CurveOutput {
            duty: saturate_duty(duty),
            regime: Regime::Boost,
            effective_temp_c: adjusted,
        }
    }

    /// Duty value alone.
    pub fn duty(&self, temp_c: u32) -> u8 {
        self.evaluate(temp_c).duty
    }
}

/// CPU fan duty for a temperature.
pub fn cpu_duty(temp_c: u32) -> u8 {
    CPU_CURVE.duty(temp_c)
}

/// GPU fan duty for a temperature.
pub fn gpu_duty(temp_c: u32) -> u8 {
    GPU_CURVE.duty(temp_c)
}

/// Round to the nearest integer and clamp into the register range.
/// NaN maps to 0.
pub fn saturate_duty(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

// ---------------------------------------------------------------------------
// Sample screening
// ---------------------------------------------------------------------------

/// How the delta filter treats a new sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    /// Accept only `-MAX_FALL_C <= delta <= MAX_RISE_C`. A zone whose
    /// first reading is above `MAX_RISE_C` never updates, and a boost
    /// regime sample (stored offset-adjusted) blocks further rises.
    Band,
    /// Accept when `delta <= MAX_RISE_C || delta >= -MAX_FALL_C`, which
    /// holds for every delta.
    #[default]
    Permissive,
}

/// Per-zone delta filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanityFilter {
    pub mode: FilterMode,
    pub max_rise_c: i64,
    pub max_fall_c: i64,
}

impl Default for SanityFilter {
    fn default() -> Self {
        Self::new(FilterMode::default())
    }
}

impl SanityFilter {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            max_rise_c: MAX_RISE_C,
            max_fall_c: MAX_FALL_C,
        }
    }

    /// Whether `current` is plausible given the zone's previous sample.
    pub fn accepts(&self, previous_c: u32, current_c: u32) -> bool {
        let delta = i64::from(current_c) - i64::from(previous_c);
        match self.mode {
            FilterMode::Band => delta <= self.max_rise_c && delta >= -self.max_fall_c,
            FilterMode::Permissive => delta <= self.max_rise_c || delta >= -self.max_fall_c,
        }
    }
}

/// The CPU sensor reports 0 (or garbage above `CPU_TEMP_MAX`) when the EC
/// has no fresh value.
pub fn cpu_reading_plausible(raw_c: u32) -> bool {
    raw_c != 0 && raw_c <= CPU_TEMP_MAX
}

/// Why a sample was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Raw reading outside the sensor's plausible range.
    OutOfRange { reading_c: u32 },
    /// Jump from the previous sample outside the filter band.
    Delta { previous_c: u32, reading_c: u32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::OutOfRange { reading_c } => {
                write!(f, "implausible reading {reading_c} C")
            }
            Rejection::Delta {
                previous_c,
                reading_c,
            } => write!(
                f,
                "jump {previous_c} -> {reading_c} C outside filter band"
            ),
        }
    }
}

/// Previous accepted sample for one zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneState {
    pub previous_c: u32,
}

/// Screen a sample for `zone` and, if it passes, evaluate the zone curve
/// and record the effective temperature as the new previous sample.
pub fn decide(
    zone: Zone,
    state: &mut ZoneState,
    reading_c: u32,
    filter: &SanityFilter,
) -> Result<CurveOutput, Rejection> {
    if zone == Zone::Cpu && !cpu_reading_plausible(reading_c) {
        return Err(Rejection::OutOfRange { reading_c });
    }
    if !filter.accepts(state.previous_c, reading_c) {
        return Err(Rejection::Delta {
            previous_c: state.previous_c,
            reading_c,
        });
    }

    let output = zone.curve().evaluate(reading_c);
    state.previous_c = output.effective_temp_c;
    Ok(output)
}

//! Simulated analog channels for each logical unit.
//!
//! Converted values are engineering units; raw values are the same readings
//! in fixed-point milli-units, saturated into a `u16`.

use core::ops::Range;

use heapless::Vec;
use rand::Rng;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::lines::{LogicalUnit, UnitLineStates, LOGICAL_UNIT_COUNT, MAX_CHANNELS};

/// Raw reading of a channel that is not measured.
pub const SENTINEL_RAW: u16 = 0xFFFF;
pub const SENTINEL_CONVERTED: f64 = 65535.0;

const JITTER: f64 = 0.01;
const RAW_SCALE: f64 = 1000.0;

const HIGH_PW_HEATER_AMPS: f64 = 3.7;
const LOW_PW_HEATER_AMPS: f64 = 1.9;
const REACTION_WHEEL_AMPS: f64 = 5.0;
const PROP_AMPS: f64 = 40.0;
const AVIONIC_LOAD_AMPS: f64 = 0.2;
const HDRM_VOLTS: f64 = 28.0;
const HDRM_GROUP_AMPS: f64 = 4.0;
const THERM_FLYBACK_VOLTS: f64 = 5.0;

pub type Channels<T> = Vec<T, MAX_CHANNELS>;

fn sentinel_channels(unit: LogicalUnit) -> Range<usize> {
    match unit {
        LogicalUnit::IsolatedLdo | LogicalUnit::IsolatedPw => 0..1,
        LogicalUnit::ThermAndFlyback => 5..7,
        _ => 0..0,
    }
}

fn default_channels<T: Copy>(unit: LogicalUnit, zero: T, sentinel: T) -> Channels<T> {
    let sentinels = sentinel_channels(unit);
    (0..unit.channel_count())
        .map(|ch| if sentinels.contains(&ch) { sentinel } else { zero })
        .collect()
}

/// Fixed-point conversion; sentinel readings stay sentinels.
#[must_use]
pub fn to_raw(value: f64) -> u16 {
    if value >= SENTINEL_CONVERTED {
        return SENTINEL_RAW;
    }
    (value * RAW_SCALE).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurements {
    groups: [Channels<u16>; LOGICAL_UNIT_COUNT],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedMeasurements {
    groups: [Channels<f64>; LOGICAL_UNIT_COUNT],
}

impl Default for RawMeasurements {
    fn default() -> Self {
        Self {
            groups: core::array::from_fn(|i| default_channels(LogicalUnit::ALL[i], 0, SENTINEL_RAW)),
        }
    }
}

impl Default for ConvertedMeasurements {
    fn default() -> Self {
        Self {
            groups: core::array::from_fn(|i| {
                default_channels(LogicalUnit::ALL[i], 0.0, SENTINEL_CONVERTED)
            }),
        }
    }
}

impl RawMeasurements {
    #[must_use]
    pub fn channels(&self, unit: LogicalUnit) -> &[u16] {
        &self.groups[unit.index()]
    }
}

impl ConvertedMeasurements {
    #[must_use]
    pub fn channels(&self, unit: LogicalUnit) -> &[f64] {
        &self.groups[unit.index()]
    }

    /// Only the groups with at least one enabled line, keyed by line-state name.
    #[must_use]
    pub fn enabled<'a>(&'a self, lines: &'a UnitLineStates) -> EnabledMeasurements<'a> {
        EnabledMeasurements { measurements: self, lines }
    }
}

impl Serialize for RawMeasurements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(LOGICAL_UNIT_COUNT))?;
        for unit in LogicalUnit::ALL {
            map.serialize_entry(unit.measurement_name(), self.channels(unit))?;
        }
        map.end()
    }
}

impl Serialize for ConvertedMeasurements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(LOGICAL_UNIT_COUNT))?;
        for unit in LogicalUnit::ALL {
            map.serialize_entry(unit.measurement_name(), self.channels(unit))?;
        }
        map.end()
    }
}

pub struct EnabledMeasurements<'a> {
    measurements: &'a ConvertedMeasurements,
    lines: &'a UnitLineStates,
}

impl Serialize for EnabledMeasurements<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for unit in LogicalUnit::ALL.into_iter().filter(|&u| self.lines.is_enabled(u)) {
            map.serialize_entry(unit.line_name(), self.measurements.channels(unit))?;
        }
        map.end()
    }
}

/// Both measurement records of a unit, kept in step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub raw: RawMeasurements,
    pub converted: ConvertedMeasurements,
}

impl Measurements {
    /// Recomputes one group from its enable mask. Unmeasured groups keep
    /// their previous readings.
    pub fn recompute<R: Rng>(&mut self, unit: LogicalUnit, mask: u32, rng: &mut R) {
        let Some(values) = simulate(unit, mask, rng) else {
            return;
        };
        debug_assert_eq!(values.len(), unit.channel_count());

        let sentinels = sentinel_channels(unit);
        let converted = &mut self.converted.groups[unit.index()];
        let raw = &mut self.raw.groups[unit.index()];
        for (ch, value) in values.into_iter().enumerate() {
            if sentinels.contains(&ch) {
                continue;
            }
            converted[ch] = value;
            raw[ch] = to_raw(value);
        }
    }
}

fn jitter<R: Rng>(rng: &mut R) -> f64 {
    rng.gen_range(-JITTER..JITTER)
}

fn reading<R: Rng>(rng: &mut R, nominal: f64) -> f64 {
    rng.gen_range(nominal - JITTER..nominal + JITTER)
}

/// Jitter plus one nominal reading per enabled line in `lines`.
fn line_sum<R: Rng>(rng: &mut R, mask: u32, lines: Range<u32>, per_line: f64) -> f64 {
    let mut value = jitter(rng);
    for line in lines {
        if mask & (1 << line) != 0 {
            value += reading(rng, per_line);
        }
    }
    value
}

/// Channel readings for a group, or `None` if the group is not simulated.
pub fn simulate<R: Rng>(unit: LogicalUnit, mask: u32, rng: &mut R) -> Option<Channels<f64>> {
    let channels: Channels<f64> = match unit {
        LogicalUnit::HighPwHeater => (0..9)
            .map(|ch| line_sum(rng, mask, 2 * ch..2 * ch + 2, HIGH_PW_HEATER_AMPS))
            .collect(),
        LogicalUnit::LowPwHeater => (0..4)
            .map(|ch| {
                if ch < 3 {
                    line_sum(rng, mask, 6 * ch..6 * ch + 6, LOW_PW_HEATER_AMPS / 6.0)
                } else {
                    line_sum(rng, mask, 18..22, LOW_PW_HEATER_AMPS / 4.0)
                }
            })
            .collect(),
        LogicalUnit::ReactionWheel => (0..4)
            .map(|ch| line_sum(rng, mask, ch..ch + 1, REACTION_WHEEL_AMPS))
            .collect(),
        LogicalUnit::Prop => (0..2).map(|ch| line_sum(rng, mask, ch..ch + 1, PROP_AMPS)).collect(),
        LogicalUnit::AvionicLoad => (0..2)
            .map(|ch| line_sum(rng, mask, ch..ch + 1, AVIONIC_LOAD_AMPS))
            .collect(),
        LogicalUnit::Hdrm => (0..16)
            .map(|ch| match ch {
                0 | 1 => jitter(rng),
                // Release actuator voltages follow their enable lines.
                2..=11 if mask & (1 << ch) != 0 => reading(rng, HDRM_VOLTS),
                2..=11 => jitter(rng),
                // Arm voltages, both arm statuses enabled.
                12 | 13 => reading(rng, HDRM_VOLTS),
                14 => line_sum(rng, mask, 1..7, HDRM_GROUP_AMPS / 6.0),
                _ => line_sum(rng, mask, 8..12, HDRM_GROUP_AMPS / 6.0),
            })
            .collect(),
        LogicalUnit::ThermAndFlyback => (0..7)
            .map(|ch| if ch < 5 { reading(rng, THERM_FLYBACK_VOLTS) } else { SENTINEL_CONVERTED })
            .collect(),
        LogicalUnit::IsolatedLdo | LogicalUnit::IsolatedPw => return None,
    };
    Some(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_raw_conversion() {
        assert_eq!(to_raw(5.0), 5000);
        assert_eq!(to_raw(-0.004), 0);
        assert_eq!(to_raw(SENTINEL_CONVERTED), SENTINEL_RAW);
        assert_eq!(to_raw(80.0), 65535);
    }

    #[test]
    fn test_channel_counts_fixed() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut m = Measurements::default();
        for unit in LogicalUnit::ALL {
            m.recompute(unit, unit.width_mask(), &mut rng);
            assert_eq!(m.converted.channels(unit).len(), unit.channel_count());
            assert_eq!(m.raw.channels(unit).len(), unit.channel_count());
        }
        assert_eq!(m.raw.channels(LogicalUnit::IsolatedLdo), &[SENTINEL_RAW]);
        assert_eq!(m.raw.channels(LogicalUnit::ThermAndFlyback)[6], SENTINEL_RAW);
    }

    #[test]
    fn test_hdrm_set_lines_stay_in_band() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut m = Measurements::default();
            m.recompute(LogicalUnit::Hdrm, 0xFFC, &mut rng);
            let channels = m.converted.channels(LogicalUnit::Hdrm);
            for &value in &channels[2..=11] {
                assert!((27.99..=28.01).contains(&value), "seed {seed}: {value}");
            }
        }
    }
}

use serde::ser::{Serialize, SerializeMap, Serializer};
use static_assertions::const_assert;

use crate::error::{PduError, PduResult};

pub const LOGICAL_UNIT_COUNT: usize = 9;
pub const MAX_CHANNELS: usize = 16;

/// Switchable load groups of a PDU unit, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalUnit {
    HighPwHeater = 0,
    LowPwHeater = 1,
    ReactionWheel = 2,
    Prop = 3,
    AvionicLoad = 4,
    Hdrm = 5,
    IsolatedLdo = 6,
    IsolatedPw = 7,
    ThermAndFlyback = 8,
}

struct GroupSpec {
    line_name: &'static str,
    measurement_name: &'static str,
    width: u32,
    channels: usize,
    default_mask: u32,
}

const GROUPS: [GroupSpec; LOGICAL_UNIT_COUNT] = [
    GroupSpec { line_name: "HighPwHeaterEnSel", measurement_name: "HighPwHeaterAdcSel", width: 18, channels: 9, default_mask: 0 },
    GroupSpec { line_name: "LowPwHeaterEnSel", measurement_name: "LowPwHeaterAdcSel", width: 22, channels: 4, default_mask: 0 },
    GroupSpec { line_name: "ReactionWheelEnSel", measurement_name: "ReactionWheelAdcSel", width: 4, channels: 4, default_mask: 0 },
    GroupSpec { line_name: "PropEnSel", measurement_name: "PropAdcSel", width: 2, channels: 2, default_mask: 0 },
    GroupSpec { line_name: "AvionicLoadEnSel", measurement_name: "AvionicLoadAdcSel", width: 2, channels: 2, default_mask: 0 },
    GroupSpec { line_name: "HdrmEnSel", measurement_name: "HdrmAdcSel", width: 12, channels: 16, default_mask: 0 },
    GroupSpec { line_name: "IsolatedLdoEnSel", measurement_name: "IsolatedLdoAdcSel", width: 6, channels: 1, default_mask: 0 },
    GroupSpec { line_name: "IsolatedPwEnSel", measurement_name: "IsolatedPwAdcSel", width: 3, channels: 1, default_mask: 0 },
    GroupSpec { line_name: "ThermAndFlybackEnSel", measurement_name: "ThermAndFlybackAdcSel", width: 8, channels: 7, default_mask: 0xFF },
];

// Masks are stored in a u32 and channel lists in fixed-capacity vectors.
const_assert!(GROUPS[LogicalUnit::LowPwHeater as usize].width <= u32::BITS);
const_assert!(GROUPS[LogicalUnit::Hdrm as usize].channels <= MAX_CHANNELS);
const_assert!(GROUPS[LogicalUnit::ThermAndFlyback as usize].default_mask < (1 << GROUPS[8].width));

impl LogicalUnit {
    pub const ALL: [LogicalUnit; LOGICAL_UNIT_COUNT] = [
        LogicalUnit::HighPwHeater,
        LogicalUnit::LowPwHeater,
        LogicalUnit::ReactionWheel,
        LogicalUnit::Prop,
        LogicalUnit::AvionicLoad,
        LogicalUnit::Hdrm,
        LogicalUnit::IsolatedLdo,
        LogicalUnit::IsolatedPw,
        LogicalUnit::ThermAndFlyback,
    ];

    fn group(self) -> &'static GroupSpec {
        &GROUPS[self as usize]
    }

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Key of this group in line-state records, e.g. `PropEnSel`.
    #[must_use]
    pub fn line_name(self) -> &'static str {
        self.group().line_name
    }

    /// Key of this group in measurement records, e.g. `PropAdcSel`.
    #[must_use]
    pub fn measurement_name(self) -> &'static str {
        self.group().measurement_name
    }

    #[must_use]
    pub fn width(self) -> u32 {
        self.group().width
    }

    #[must_use]
    pub fn channel_count(self) -> usize {
        self.group().channels
    }

    #[must_use]
    pub fn default_mask(self) -> u32 {
        self.group().default_mask
    }

    #[must_use]
    pub fn width_mask(self) -> u32 {
        if self.width() >= 32 {
            u32::MAX
        } else {
            (1 << self.width()) - 1
        }
    }

    /// Rejects masks with bits beyond the group width.
    pub fn check_mask(self, mask: u32) -> PduResult<u32> {
        if mask & !self.width_mask() != 0 {
            return Err(PduError::Validation(format!(
                "parameters {mask:#x} exceed the {}-line width of {}",
                self.width(),
                self.line_name()
            )));
        }
        Ok(mask)
    }

    /// Command `Parameters` as a mask for this group. Negative values and
    /// values wider than 32 bits are rejected like any over-wide mask.
    pub fn parameters_mask(self, parameters: i64) -> PduResult<u32> {
        let mask = u32::try_from(parameters).map_err(|_| {
            PduError::Validation(format!(
                "parameters {parameters} out of range for {}",
                self.line_name()
            ))
        })?;
        self.check_mask(mask)
    }
}

impl TryFrom<i64> for LogicalUnit {
    type Error = PduError;

    fn try_from(id: i64) -> PduResult<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|index| LogicalUnit::ALL.get(index).copied())
            .ok_or_else(|| PduError::Validation(format!("logical unit id {id} out of range")))
    }
}

/// Enable bitmasks for every group of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitLineStates {
    masks: [u32; LOGICAL_UNIT_COUNT],
}

impl Default for UnitLineStates {
    fn default() -> Self {
        let mut masks = [0; LOGICAL_UNIT_COUNT];
        for unit in LogicalUnit::ALL {
            masks[unit.index()] = unit.default_mask();
        }
        Self { masks }
    }
}

impl UnitLineStates {
    #[must_use]
    pub fn get(&self, unit: LogicalUnit) -> u32 {
        self.masks[unit.index()]
    }

    pub fn set(&mut self, unit: LogicalUnit, mask: u32) -> PduResult<()> {
        self.masks[unit.index()] = unit.check_mask(mask)?;
        Ok(())
    }

    /// Clears the given lines, leaving the others untouched.
    pub fn clear(&mut self, unit: LogicalUnit, lines: u32) -> PduResult<()> {
        let lines = unit.check_mask(lines)?;
        self.masks[unit.index()] &= !lines;
        Ok(())
    }

    #[must_use]
    pub fn is_enabled(&self, unit: LogicalUnit) -> bool {
        self.get(unit) != 0
    }
}

impl Serialize for UnitLineStates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(LOGICAL_UNIT_COUNT))?;
        for unit in LogicalUnit::ALL {
            map.serialize_entry(unit.line_name(), &self.get(unit))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let lines = UnitLineStates::default();
        assert_eq!(lines.get(LogicalUnit::ThermAndFlyback), 0xFF);
        assert_eq!(lines.get(LogicalUnit::HighPwHeater), 0);
    }

    #[test]
    fn test_width_enforced() {
        let mut lines = UnitLineStates::default();
        assert!(lines.set(LogicalUnit::Prop, 0b11).is_ok());
        assert!(lines.set(LogicalUnit::Prop, 0b100).is_err());
        assert_eq!(lines.get(LogicalUnit::Prop), 0b11);
        assert!(lines.set(LogicalUnit::LowPwHeater, 0x3F_FFFF).is_ok());
    }

    #[test]
    fn test_id_and_parameter_ranges() {
        assert_eq!(LogicalUnit::try_from(8_i64).unwrap(), LogicalUnit::ThermAndFlyback);
        assert!(matches!(LogicalUnit::try_from(-1_i64), Err(PduError::Validation(_))));
        assert!(matches!(LogicalUnit::try_from(9_i64), Err(PduError::Validation(_))));
        assert!(matches!(LogicalUnit::try_from(i64::MAX), Err(PduError::Validation(_))));

        assert_eq!(LogicalUnit::Prop.parameters_mask(3).unwrap(), 3);
        assert!(matches!(LogicalUnit::Prop.parameters_mask(-1), Err(PduError::Validation(_))));
        assert!(matches!(
            LogicalUnit::LowPwHeater.parameters_mask(1 << 40),
            Err(PduError::Validation(_))
        ));
    }
}

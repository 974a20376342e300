//! PDU lifecycle states and the transitions the OBC may command.

use serde::{Serialize, Serializer};

use crate::error::{PduError, PduResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduState {
    Boot = 0,
    Load = 1,
    Operate = 2,
    Safe = 3,
    Maintenance = 4,
}

impl PduState {
    pub const INITIAL: PduState = PduState::Load;

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PduState::Boot => "Boot",
            PduState::Load => "Load",
            PduState::Operate => "Operate",
            PduState::Safe => "Safe",
            PduState::Maintenance => "Maintenance",
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether a unit in this state drives its switch lines.
    #[must_use]
    pub fn drives_lines(self) -> bool {
        !matches!(self, PduState::Boot | PduState::Load)
    }

    /// Target state of `transition` from `self`, or `ProtocolState` if it is
    /// not allowed here.
    pub fn apply(self, transition: Transition) -> PduResult<PduState> {
        if transition.is_allowed_from(self) {
            Ok(transition.target())
        } else {
            Err(PduError::ProtocolState {
                command: transition.command_name(),
                state: self.name(),
            })
        }
    }
}

impl TryFrom<u8> for PduState {
    type Error = PduError;

    fn try_from(code: u8) -> PduResult<Self> {
        match code {
            0 => Ok(PduState::Boot),
            1 => Ok(PduState::Load),
            2 => Ok(PduState::Operate),
            3 => Ok(PduState::Safe),
            4 => Ok(PduState::Maintenance),
            other => Err(PduError::Validation(format!("unknown PDU state {other}"))),
        }
    }
}

impl Serialize for PduState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl core::fmt::Display for PduState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    GoLoad,
    GoSafe,
    GoOperate,
    GoMaintenance,
}

impl Transition {
    pub const ALL: [Transition; 4] = [
        Transition::GoLoad,
        Transition::GoSafe,
        Transition::GoOperate,
        Transition::GoMaintenance,
    ];

    #[must_use]
    pub fn target(self) -> PduState {
        match self {
            Transition::GoLoad => PduState::Load,
            Transition::GoSafe => PduState::Safe,
            Transition::GoOperate => PduState::Operate,
            Transition::GoMaintenance => PduState::Maintenance,
        }
    }

    #[must_use]
    pub fn is_allowed_from(self, current: PduState) -> bool {
        match self {
            Transition::GoLoad => true,
            Transition::GoOperate => matches!(current, PduState::Load | PduState::Maintenance),
            Transition::GoSafe => current == PduState::Operate,
            Transition::GoMaintenance => matches!(current, PduState::Operate | PduState::Safe),
        }
    }

    #[must_use]
    pub fn command_name(self) -> &'static str {
        match self {
            Transition::GoLoad => "PduGoLoad",
            Transition::GoSafe => "PduGoSafe",
            Transition::GoOperate => "PduGoOperate",
            Transition::GoMaintenance => "PduGoMaintenance",
        }
    }
}

use arrayvec::ArrayString;
use serde::Serialize;

use super::lines::UnitLineStates;
use super::measurements::Measurements;
use crate::state_machine::PduState;

pub const MAX_MSG_ID_LEN: usize = 32;

pub type MsgId = ArrayString<MAX_MSG_ID_LEN>;

pub const RETURN_CODE_ACCEPTED: u8 = 0;
pub const RETURN_CODE_REJECTED: u8 = 1;

/// Builds a message id, truncating names longer than the record allows.
#[must_use]
pub fn msg_id(name: &str) -> MsgId {
    let mut id = MsgId::new();
    for c in name.chars() {
        if id.try_push(c).is_err() {
            break;
        }
    }
    id
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HeartBeatState {
    #[serde(rename = "HeartBeat")]
    pub heartbeat: u32,
    #[serde(rename = "PduState")]
    pub pdu_state: PduState,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StatusState {
    pub pdu_state: PduState,
    pub protection_status: u32,
    pub comm_hw_status: u32,
    pub comm_sw_status: u32,
    pub uload_error: u32,
    pub dload_error: u32,
    pub cmd_error: u32,
    pub oper_status: u32,
    pub config_status: u32,
    pub request_accepted_count: u32,
    pub request_rejected_count: u32,
    #[serde(rename = "BootType_ResetCode")]
    pub boot_type_reset_code: u32,
}

impl Default for StatusState {
    fn default() -> Self {
        Self {
            pdu_state: PduState::INITIAL,
            protection_status: 0,
            comm_hw_status: 0,
            comm_sw_status: 0,
            uload_error: 0,
            dload_error: 0,
            cmd_error: 0,
            oper_status: 0,
            config_status: 0,
            request_accepted_count: 0,
            request_rejected_count: 0,
            boot_type_reset_code: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MsgAcknowledgement {
    #[serde(rename = "RequestedMsgId")]
    pub requested_msg_id: MsgId,
    #[serde(rename = "PduReturnCode")]
    pub return_code: u8,
}

impl Default for MsgAcknowledgement {
    fn default() -> Self {
        Self { requested_msg_id: MsgId::new(), return_code: RETURN_CODE_ACCEPTED }
    }
}

impl MsgAcknowledgement {
    #[must_use]
    pub fn new(command: &str, accepted: bool) -> Self {
        Self {
            requested_msg_id: msg_id(command),
            return_code: if accepted { RETURN_CODE_ACCEPTED } else { RETURN_CODE_REJECTED },
        }
    }

    #[must_use]
    pub fn accepted(&self) -> bool {
        self.return_code == RETURN_CODE_ACCEPTED
    }
}

/// Everything one PDU unit remembers. Lives only in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitState {
    pub heartbeat: HeartBeatState,
    pub status: StatusState,
    pub lines: UnitLineStates,
    pub measurements: Measurements,
    pub acknowledgement: MsgAcknowledgement,
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            heartbeat: HeartBeatState { heartbeat: 0, pdu_state: PduState::INITIAL },
            status: StatusState::default(),
            lines: UnitLineStates::default(),
            measurements: Measurements::default(),
            acknowledgement: MsgAcknowledgement::default(),
        }
    }
}

impl UnitState {
    #[must_use]
    pub fn pdu_state(&self) -> PduState {
        self.status.pdu_state
    }

    /// Stores an acknowledgement and bumps the matching request counter.
    pub fn record_acknowledgement(&mut self, ack: MsgAcknowledgement) {
        if ack.accepted() {
            self.status.request_accepted_count = self.status.request_accepted_count.wrapping_add(1);
        } else {
            self.status.request_rejected_count = self.status.request_rejected_count.wrapping_add(1);
        }
        self.acknowledgement = ack;
    }
}

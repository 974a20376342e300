//! OBC command catalogue and PDU reply bodies.
//!
//! Commands travel as single-key JSON objects, e.g.
//! `{"SetUnitPwLines": {"LogicUnitId": 0, "Parameters": 3}}`. The serial link
//! additionally identifies commands by a 4-bit message id and accepts a
//! compact binary parameter encoding.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{PduError, PduResult};
use crate::state_machine::Transition;
use crate::unit::lines::UnitLineStates;
use crate::unit::measurements::{ConvertedMeasurements, RawMeasurements};
use crate::unit::state::{HeartBeatState, MsgAcknowledgement, StatusState};

pub mod message_id {
    pub const OBC_HEART_BEAT: u8 = 1;
    pub const GET_PDU_STATUS: u8 = 2;
    pub const PDU_GO_LOAD: u8 = 8;
    pub const PDU_GO_SAFE: u8 = 9;
    pub const PDU_GO_OPERATE: u8 = 10;
    pub const SET_UNIT_PW_LINES: u8 = 11;
    pub const RESET_UNIT_PW_LINES: u8 = 12;
    pub const OVERWRITE_UNIT_PW_LINES: u8 = 13;
    pub const GET_UNIT_LINE_STATES: u8 = 14;
    pub const GET_RAW_MEASUREMENTS: u8 = 15;
    pub const GET_CONVERTED_MEASUREMENTS: u8 = 16;
}

/// Line command arguments as sent. Range checks against the addressed
/// group happen at dispatch so bad values are rejected, not dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRequest {
    pub logical_unit: i64,
    pub parameters: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ObcHeartBeat { heartbeat: u32 },
    GetPduStatus,
    Transition(Transition),
    SetUnitPwLines(LineRequest),
    ResetUnitPwLines(LineRequest),
    OverwriteUnitPwLines(LineRequest),
    GetUnitLineStates,
    GetRawMeasurements { logical_unit: i64 },
    GetConvertedMeasurements { logical_unit: i64 },
}

#[derive(Deserialize)]
struct HeartBeatParams {
    #[serde(rename = "HeartBeat")]
    heartbeat: u32,
}

#[derive(Deserialize)]
struct LineParams {
    #[serde(rename = "LogicUnitId", alias = "LogicalUnitId")]
    logical_unit: i64,
    #[serde(rename = "Parameters")]
    parameters: i64,
}

#[derive(Deserialize)]
struct UnitParams {
    #[serde(rename = "LogicUnitId", alias = "LogicalUnitId")]
    logical_unit: i64,
}

fn params<T: for<'de> Deserialize<'de>>(name: &str, value: Value) -> PduResult<T> {
    serde_json::from_value(value)
        .map_err(|e| PduError::Format(format!("bad parameters for {name}: {e}")))
}

impl Command {
    /// Wire name, also used as `RequestedMsgId` in acknowledgements.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::ObcHeartBeat { .. } => "ObcHeartBeat",
            Command::GetPduStatus => "GetPduStatus",
            Command::Transition(t) => t.command_name(),
            Command::SetUnitPwLines(_) => "SetUnitPwLines",
            Command::ResetUnitPwLines(_) => "ResetUnitPwLines",
            Command::OverwriteUnitPwLines(_) => "OverwriteUnitPwLines",
            Command::GetUnitLineStates => "GetUnitLineStates",
            Command::GetRawMeasurements { .. } => "GetRawMeasurements",
            Command::GetConvertedMeasurements { .. } => "GetConvertedMeasurements",
        }
    }

    /// Serial message id; `PduGoMaintenance` has none.
    #[must_use]
    pub fn message_id(&self) -> Option<u8> {
        use message_id::*;
        Some(match self {
            Command::ObcHeartBeat { .. } => OBC_HEART_BEAT,
            Command::GetPduStatus => GET_PDU_STATUS,
            Command::Transition(Transition::GoLoad) => PDU_GO_LOAD,
            Command::Transition(Transition::GoSafe) => PDU_GO_SAFE,
            Command::Transition(Transition::GoOperate) => PDU_GO_OPERATE,
            Command::Transition(Transition::GoMaintenance) => return None,
            Command::SetUnitPwLines(_) => SET_UNIT_PW_LINES,
            Command::ResetUnitPwLines(_) => RESET_UNIT_PW_LINES,
            Command::OverwriteUnitPwLines(_) => OVERWRITE_UNIT_PW_LINES,
            Command::GetUnitLineStates => GET_UNIT_LINE_STATES,
            Command::GetRawMeasurements { .. } => GET_RAW_MEASUREMENTS,
            Command::GetConvertedMeasurements { .. } => GET_CONVERTED_MEASUREMENTS,
        })
    }

    /// Queries answered only with their response get no acknowledgement.
    #[must_use]
    pub fn requires_ack(&self) -> bool {
        !matches!(
            self,
            Command::ObcHeartBeat { .. }
                | Command::GetPduStatus
                | Command::GetUnitLineStates
                | Command::GetRawMeasurements { .. }
        )
    }

    pub fn from_json(bytes: &[u8]) -> PduResult<Self> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    /// Decodes a serial body. Bodies that parse as JSON are decoded as JSON
    /// commands and keep their JSON errors; only non-JSON bodies use the
    /// compact binary form.
    pub fn from_serial(id: u8, logical_unit_id: u8, body: &[u8]) -> PduResult<Self> {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::from_binary(id, logical_unit_id, body),
        }
    }

    fn from_value(value: Value) -> PduResult<Self> {
        let Value::Object(object) = value else {
            return Err(PduError::Format("command must be a JSON object".to_string()));
        };
        let mut entries = object.into_iter();
        let (name, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(PduError::Format(
                    "command object must have exactly one key".to_string(),
                ))
            }
        };
        Self::from_name(&name, value)
    }

    fn from_name(name: &str, value: Value) -> PduResult<Self> {
        let command = match name {
            "ObcHeartBeat" => {
                let p: HeartBeatParams = params(name, value)?;
                Command::ObcHeartBeat { heartbeat: p.heartbeat }
            }
            "GetPduStatus" => Command::GetPduStatus,
            "PduGoLoad" => Command::Transition(Transition::GoLoad),
            "PduGoSafe" => Command::Transition(Transition::GoSafe),
            "PduGoOperate" => Command::Transition(Transition::GoOperate),
            "PduGoMaintenance" => Command::Transition(Transition::GoMaintenance),
            "SetUnitPwLines" | "ResetUnitPwLines" | "OverwriteUnitPwLines" => {
                let p: LineParams = params(name, value)?;
                let request = LineRequest { logical_unit: p.logical_unit, parameters: p.parameters };
                match name {
                    "SetUnitPwLines" => Command::SetUnitPwLines(request),
                    "ResetUnitPwLines" => Command::ResetUnitPwLines(request),
                    _ => Command::OverwriteUnitPwLines(request),
                }
            }
            "GetUnitLineStates" => Command::GetUnitLineStates,
            "GetRawMeasurements" => {
                let p: UnitParams = params(name, value)?;
                Command::GetRawMeasurements { logical_unit: p.logical_unit }
            }
            "GetConvertedMeasurements" => {
                let p: UnitParams = params(name, value)?;
                Command::GetConvertedMeasurements { logical_unit: p.logical_unit }
            }
            other => return Err(PduError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    /// Decodes the compact serial form: parameters are little-endian bytes
    /// and the logical unit comes from the header nibble.
    pub fn from_binary(id: u8, logical_unit_id: u8, payload: &[u8]) -> PduResult<Self> {
        use message_id::*;

        let mut le = [0u8; 4];
        let n = payload.len().min(4);
        le[..n].copy_from_slice(&payload[..n]);
        let value = u32::from_le_bytes(le);

        let line = LineRequest { logical_unit: i64::from(logical_unit_id), parameters: i64::from(value) };
        let command = match id {
            OBC_HEART_BEAT => Command::ObcHeartBeat { heartbeat: u32::from(le[0]) },
            GET_PDU_STATUS => Command::GetPduStatus,
            PDU_GO_LOAD => Command::Transition(Transition::GoLoad),
            PDU_GO_SAFE => Command::Transition(Transition::GoSafe),
            PDU_GO_OPERATE => Command::Transition(Transition::GoOperate),
            SET_UNIT_PW_LINES => Command::SetUnitPwLines(line),
            RESET_UNIT_PW_LINES => Command::ResetUnitPwLines(line),
            OVERWRITE_UNIT_PW_LINES => Command::OverwriteUnitPwLines(line),
            GET_UNIT_LINE_STATES => Command::GetUnitLineStates,
            GET_RAW_MEASUREMENTS => Command::GetRawMeasurements { logical_unit: line.logical_unit },
            other => return Err(PduError::Unsupported(other)),
        };
        Ok(command)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let params = match self {
            Command::ObcHeartBeat { heartbeat } => json!({ "HeartBeat": heartbeat }),
            Command::SetUnitPwLines(r)
            | Command::ResetUnitPwLines(r)
            | Command::OverwriteUnitPwLines(r) => {
                json!({ "LogicUnitId": r.logical_unit, "Parameters": r.parameters })
            }
            Command::GetRawMeasurements { logical_unit }
            | Command::GetConvertedMeasurements { logical_unit } => {
                json!({ "LogicUnitId": logical_unit })
            }
            Command::GetPduStatus | Command::Transition(_) | Command::GetUnitLineStates => json!({}),
        };
        let mut object = Map::new();
        object.insert(self.name().to_string(), params);
        Value::Object(object)
    }
}

/// Reply bodies, serialized as `{"<Key>": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub enum Response {
    #[serde(rename = "PduHeartBeat")]
    HeartBeat(HeartBeatState),
    #[serde(rename = "PduStatus")]
    Status(StatusState),
    #[serde(rename = "PduUnitLineStates")]
    UnitLineStates(UnitLineStates),
    #[serde(rename = "PduRawMeasurements")]
    RawMeasurements(RawMeasurements),
    #[serde(rename = "PduConvertedMeasurements")]
    ConvertedMeasurements(ConvertedMeasurements),
}

impl Response {
    pub fn to_bytes(&self) -> PduResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Serialize)]
struct AckEnvelope<'a> {
    #[serde(rename = "MsgAcknowledgement")]
    ack: &'a MsgAcknowledgement,
}

impl MsgAcknowledgement {
    pub fn to_bytes(&self) -> PduResult<Vec<u8>> {
        Ok(serde_json::to_vec(&AckEnvelope { ack: self })?)
    }
}

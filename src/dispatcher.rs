use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::error::{PduError, PduResult};
use crate::protocol::{Command, LineRequest, Response};
use crate::state_machine::PduState;
use crate::unit::lines::LogicalUnit;
use crate::unit::measurements::Measurements;
use crate::unit::state::{MsgAcknowledgement, UnitState};

/// Result of one dispatched command: the acknowledgement (if the command
/// is acknowledged) and the response body (if it has one).
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub acknowledgement: Option<MsgAcknowledgement>,
    pub response: Option<Response>,
    pub transition: Option<(PduState, PduState)>,
}

impl Dispatch {
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.acknowledgement.map_or(true, |ack| ack.accepted())
    }
}

/// Executes commands against one unit's state. Owns the noise source used by
/// the measurement simulation.
#[derive(Debug)]
pub struct CommandDispatcher {
    rng: StdRng,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Runs `command` and records its acknowledgement in `state`.
    pub fn dispatch(&mut self, state: &mut UnitState, command: &Command) -> Dispatch {
        let before = state.pdu_state();
        let result = self.execute(state, command);
        let after = state.pdu_state();

        let accepted = match &result {
            Ok(_) => true,
            Err(e) => {
                warn!("Rejected {}: {}", command.name(), e);
                if matches!(e, PduError::Validation(_)) {
                    state.status.cmd_error = state.status.cmd_error.wrapping_add(1);
                }
                false
            }
        };

        let acknowledgement = if command.requires_ack() || !accepted {
            let ack = MsgAcknowledgement::new(command.name(), accepted);
            state.record_acknowledgement(ack);
            Some(ack)
        } else {
            None
        };

        Dispatch {
            acknowledgement,
            response: result.ok().flatten(),
            transition: (before != after).then_some((before, after)),
        }
    }

    /// Rejection for a command whose name is not in the catalogue.
    pub fn reject_unknown(&mut self, state: &mut UnitState, name: &str) -> MsgAcknowledgement {
        let ack = MsgAcknowledgement::new(name, false);
        state.status.cmd_error = state.status.cmd_error.wrapping_add(1);
        state.record_acknowledgement(ack);
        ack
    }

    /// Applies `command` without touching the acknowledgement record.
    /// On error the state is left unchanged.
    pub fn execute(&mut self, state: &mut UnitState, command: &Command) -> PduResult<Option<Response>> {
        match *command {
            Command::ObcHeartBeat { heartbeat } => {
                state.heartbeat.heartbeat = heartbeat;
                state.heartbeat.pdu_state = state.pdu_state();
                Ok(Some(Response::HeartBeat(state.heartbeat)))
            }
            Command::GetPduStatus => Ok(Some(Response::Status(state.status))),
            Command::Transition(transition) => {
                let from = state.pdu_state();
                let to = from.apply(transition)?;
                state.status.pdu_state = to;
                state.heartbeat.pdu_state = to;
                debug!("PDU state {} -> {}", from, to);
                Ok(None)
            }
            Command::SetUnitPwLines(request) => {
                let unit = LogicalUnit::try_from(request.logical_unit)?;
                let mask = unit.parameters_mask(request.parameters)?;
                state.lines.set(unit, mask)?;
                state.measurements.recompute(unit, mask, &mut self.rng);
                Ok(None)
            }
            Command::ResetUnitPwLines(LineRequest { logical_unit, parameters }) => {
                let unit = LogicalUnit::try_from(logical_unit)?;
                state.lines.clear(unit, unit.parameters_mask(parameters)?)?;
                Ok(None)
            }
            Command::OverwriteUnitPwLines(LineRequest { logical_unit, parameters }) => {
                let unit = LogicalUnit::try_from(logical_unit)?;
                state.lines.set(unit, unit.parameters_mask(parameters)?)?;
                Ok(None)
            }
            Command::GetUnitLineStates => Ok(Some(Response::UnitLineStates(state.lines))),
            Command::GetRawMeasurements { logical_unit } => {
                let unit = LogicalUnit::try_from(logical_unit)?;
                let raw = if state.lines.is_enabled(unit) {
                    state.measurements.raw.clone()
                } else {
                    Measurements::default().raw
                };
                Ok(Some(Response::RawMeasurements(raw)))
            }
            Command::GetConvertedMeasurements { logical_unit } => {
                let unit = LogicalUnit::try_from(logical_unit)?;
                let converted = if state.lines.is_enabled(unit) {
                    state.measurements.converted.clone()
                } else {
                    Measurements::default().converted
                };
                Ok(Some(Response::ConvertedMeasurements(converted)))
            }
        }
    }
}

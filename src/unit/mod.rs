pub mod lines;
pub mod measurements;
pub mod state;

pub use lines::{LogicalUnit, UnitLineStates};
pub use measurements::{ConvertedMeasurements, Measurements, RawMeasurements};
pub use state::{MsgAcknowledgement, UnitState};

use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::dispatcher::CommandDispatcher;
use crate::packet::MAX_SEQUENCE_COUNT;
use crate::state_machine::PduState;
use crate::telemetry::TelemetryStream;

pub const NOMINAL_APID: u16 = 0x65;
pub const REDUNDANT_APID: u16 = 0x66;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    Nominal,
    Redundant,
}

impl UnitId {
    pub const ALL: [UnitId; 2] = [UnitId::Nominal, UnitId::Redundant];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            UnitId::Nominal => "nominal",
            UnitId::Redundant => "redundant",
        }
    }
}

impl core::fmt::Display for UnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only view of a unit published after every command.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    pub pdu_state: PduState,
    pub lines: UnitLineStates,
    pub converted: ConvertedMeasurements,
}

impl From<&UnitState> for UnitSnapshot {
    fn from(state: &UnitState) -> Self {
        Self {
            pdu_state: state.pdu_state(),
            lines: state.lines,
            converted: state.measurements.converted.clone(),
        }
    }
}

/// Mutable side of a unit. Held for the whole of one command so commands
/// against the same unit never interleave.
#[derive(Debug, Default)]
pub struct UnitContext {
    pub state: UnitState,
    pub dispatcher: CommandDispatcher,
    pub telemetry: Option<TelemetryStream>,
    sequence: u16,
}

impl UnitContext {
    /// Next 14-bit packet sequence count for this unit.
    pub fn next_sequence(&mut self) -> u16 {
        let current = self.sequence;
        self.sequence = (self.sequence + 1) & MAX_SEQUENCE_COUNT;
        current
    }
}

#[derive(Debug)]
pub struct UnitHandle {
    id: UnitId,
    apid: u16,
    context: Mutex<UnitContext>,
    snapshot: watch::Sender<UnitSnapshot>,
}

impl UnitHandle {
    #[must_use]
    pub fn new(id: UnitId, apid: u16) -> Self {
        Self::with_dispatcher(id, apid, CommandDispatcher::new())
    }

    #[must_use]
    pub fn with_dispatcher(id: UnitId, apid: u16, dispatcher: CommandDispatcher) -> Self {
        let context = UnitContext { dispatcher, ..UnitContext::default() };
        let (snapshot, _) = watch::channel(UnitSnapshot::from(&context.state));
        Self { id, apid, context: Mutex::new(context), snapshot }
    }

    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[must_use]
    pub fn apid(&self) -> u16 {
        self.apid
    }

    pub async fn lock(&self) -> MutexGuard<'_, UnitContext> {
        self.context.lock().await
    }

    /// Publishes the current state to snapshot readers.
    pub fn publish(&self, state: &UnitState) {
        self.snapshot.send_replace(UnitSnapshot::from(state));
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UnitSnapshot> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> UnitSnapshot {
        self.snapshot.borrow().clone()
    }
}

/// The two PDU units, addressed by id or by APID.
#[derive(Debug)]
pub struct UnitRegistry {
    nominal: Arc<UnitHandle>,
    redundant: Arc<UnitHandle>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new(NOMINAL_APID, REDUNDANT_APID)
    }
}

impl UnitRegistry {
    #[must_use]
    pub fn new(nominal_apid: u16, redundant_apid: u16) -> Self {
        Self {
            nominal: Arc::new(UnitHandle::new(UnitId::Nominal, nominal_apid)),
            redundant: Arc::new(UnitHandle::new(UnitId::Redundant, redundant_apid)),
        }
    }

    #[must_use]
    pub fn from_handles(nominal: UnitHandle, redundant: UnitHandle) -> Self {
        debug_assert_eq!(nominal.id(), UnitId::Nominal);
        debug_assert_eq!(redundant.id(), UnitId::Redundant);
        Self { nominal: Arc::new(nominal), redundant: Arc::new(redundant) }
    }

    #[must_use]
    pub fn get(&self, id: UnitId) -> &Arc<UnitHandle> {
        match id {
            UnitId::Nominal => &self.nominal,
            UnitId::Redundant => &self.redundant,
        }
    }

    #[must_use]
    pub fn by_apid(&self, apid: u16) -> Option<&Arc<UnitHandle>> {
        self.iter().find(|unit| unit.apid() == apid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UnitHandle>> {
        [&self.nominal, &self.redundant].into_iter()
    }
}

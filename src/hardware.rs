//! Mirrors unit line states onto physical switch positions.
//!
//! The poller reads published unit snapshots, ORs the switch map of every unit
//! that is allowed to drive lines, and writes only positions whose state
//! changed since the last poll. A second poller latches the EPC on/off
//! input pulses that say whether either unit is powered.

use std::time::Duration;

use static_assertions::const_assert;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{PduError, PduResult};
use crate::orchestrator::{PowerGate, ShutdownFlag};
use crate::unit::{LogicalUnit, UnitLineStates, UnitSnapshot};

pub const LINE_POSITIONS: usize = 71;

/// Switched groups and their first position, in position order.
const POSITION_MAP: [(LogicalUnit, usize); 8] = [
    (LogicalUnit::HighPwHeater, 0),
    (LogicalUnit::LowPwHeater, 18),
    (LogicalUnit::AvionicLoad, 40),
    (LogicalUnit::Hdrm, 42),
    (LogicalUnit::ReactionWheel, 54),
    (LogicalUnit::Prop, 58),
    (LogicalUnit::IsolatedLdo, 60),
    (LogicalUnit::IsolatedPw, 66),
];

// IsolatedPw (3 lines) ends at 69; the last two positions are spare.
const_assert!(66 + 3 <= LINE_POSITIONS);

pub type LineMap = [bool; LINE_POSITIONS];

/// GPIO expander access, one boolean per switch position.
pub trait LineDriver: Send {
    fn read_line(&mut self, position: usize) -> PduResult<bool>;
    fn write_line(&mut self, position: usize, on: bool) -> PduResult<()>;
}

/// Line driver backed by memory, used when no expander is attached.
#[derive(Debug, Clone)]
pub struct MemoryLineDriver {
    lines: LineMap,
    writes: u64,
}

impl Default for MemoryLineDriver {
    fn default() -> Self {
        Self { lines: [false; LINE_POSITIONS], writes: 0 }
    }
}

impl MemoryLineDriver {
    #[must_use]
    pub fn lines(&self) -> &LineMap {
        &self.lines
    }

    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

fn check_position(position: usize) -> PduResult<()> {
    if position >= LINE_POSITIONS {
        return Err(PduError::Hardware(format!("line position {position} out of range")));
    }
    Ok(())
}

impl LineDriver for MemoryLineDriver {
    fn read_line(&mut self, position: usize) -> PduResult<bool> {
        check_position(position)?;
        Ok(self.lines[position])
    }

    fn write_line(&mut self, position: usize, on: bool) -> PduResult<()> {
        check_position(position)?;
        self.lines[position] = on;
        self.writes += 1;
        Ok(())
    }
}

/// Positions switched on by one unit's line states.
#[must_use]
pub fn switch_positions(lines: &UnitLineStates) -> LineMap {
    let mut map = [false; LINE_POSITIONS];
    for (unit, base) in POSITION_MAP {
        let mask = lines.get(unit);
        for line in 0..unit.width() as usize {
            map[base + line] = mask & (1 << line) != 0;
        }
    }
    map
}

/// Union over the units that currently drive lines.
#[must_use]
pub fn desired_positions<'a, I>(snapshots: I) -> LineMap
where
    I: IntoIterator<Item = &'a UnitSnapshot>,
{
    let mut desired = [false; LINE_POSITIONS];
    for snapshot in snapshots.into_iter().filter(|s| s.pdu_state.drives_lines()) {
        for (slot, on) in desired.iter_mut().zip(switch_positions(&snapshot.lines)) {
            *slot |= on;
        }
    }
    desired
}

pub struct HardwareSync<D: LineDriver> {
    driver: D,
    units: Vec<watch::Receiver<UnitSnapshot>>,
    applied: LineMap,
    interval: Duration,
}

impl<D: LineDriver> HardwareSync<D> {
    #[must_use]
    pub fn new(driver: D, units: Vec<watch::Receiver<UnitSnapshot>>, interval: Duration) -> Self {
        Self { driver, units, applied: [false; LINE_POSITIONS], interval }
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[must_use]
    pub fn applied(&self) -> &LineMap {
        &self.applied
    }

    /// Forces every position to `on`. Positions that fail keep their
    /// previous recorded state and are retried on the next poll.
    pub fn force_all(&mut self, on: bool) -> usize {
        let mut failures = 0;
        for position in 0..LINE_POSITIONS {
            match self.driver.write_line(position, on) {
                Ok(()) => self.applied[position] = on,
                Err(e) => {
                    failures += 1;
                    error!("Line {} write failed: {}", position, e);
                }
            }
        }
        failures
    }

    /// One poll: writes the positions that differ from the last applied map.
    /// Returns the number of successful writes.
    pub fn poll_once(&mut self) -> usize {
        let snapshots: Vec<UnitSnapshot> = self.units.iter().map(|rx| rx.borrow().clone()).collect();
        let desired = desired_positions(&snapshots);

        let mut written = 0;
        for position in 0..LINE_POSITIONS {
            if desired[position] == self.applied[position] {
                continue;
            }
            match self.driver.write_line(position, desired[position]) {
                Ok(()) => {
                    self.applied[position] = desired[position];
                    written += 1;
                }
                Err(e) => warn!("Line {} write failed, retrying next poll: {}", position, e),
            }
        }
        if written > 0 {
            debug!("Hardware sync applied {} line changes", written);
        }
        written
    }

    /// Polls until shutdown, then switches every line off.
    pub async fn run(mut self, shutdown: ShutdownFlag) -> D {
        info!("Hardware sync started, polling every {:?}", self.interval);
        if self.force_all(false) > 0 {
            warn!("Some lines could not be switched off at startup");
        }

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while !shutdown.is_set() {
            ticker.tick().await;
            self.poll_once();
        }

        if self.force_all(false) > 0 {
            error!("Some lines could not be switched off at shutdown");
        }
        info!("Hardware sync stopped, all lines off");
        self.driver
    }
}

/// EPC input pins on the status expander. Inputs idle high and a unit's
/// on or off pulse pulls its pin low.
pub const EPC_NOMINAL_ON: usize = 0;
pub const EPC_NOMINAL_OFF: usize = 1;
pub const EPC_REDUNDANT_ON: usize = 2;
pub const EPC_REDUNDANT_OFF: usize = 3;

/// Latches EPC pulses into per-unit power status and keeps `gate` open while
/// either unit is powered. Both units start unpowered.
pub struct EpcMonitor<D: LineDriver> {
    driver: D,
    gate: PowerGate,
    nominal: bool,
    redundant: bool,
    interval: Duration,
}

impl<D: LineDriver> EpcMonitor<D> {
    #[must_use]
    pub fn new(driver: D, gate: PowerGate, interval: Duration) -> Self {
        gate.set(false);
        Self { driver, gate, nominal: false, redundant: false, interval }
    }

    #[must_use]
    pub fn status(&self) -> (bool, bool) {
        (self.nominal, self.redundant)
    }

    #[must_use]
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn pulsed(&mut self, position: usize) -> bool {
        match self.driver.read_line(position) {
            Ok(level) => !level,
            Err(e) => {
                warn!("EPC input {} read failed: {}", position, e);
                false
            }
        }
    }

    /// Reads all four inputs once. An off pulse wins over an on pulse seen
    /// in the same poll. Returns whether the gate is open.
    pub fn poll_once(&mut self) -> bool {
        let before = self.status();
        if self.pulsed(EPC_NOMINAL_ON) {
            self.nominal = true;
        }
        if self.pulsed(EPC_NOMINAL_OFF) {
            self.nominal = false;
        }
        if self.pulsed(EPC_REDUNDANT_ON) {
            self.redundant = true;
        }
        if self.pulsed(EPC_REDUNDANT_OFF) {
            self.redundant = false;
        }

        if self.status() != before {
            info!("EPC status: nominal {} redundant {}", self.nominal, self.redundant);
        }
        let powered = self.nominal || self.redundant;
        self.gate.set(powered);
        powered
    }

    pub async fn run(mut self, shutdown: ShutdownFlag) -> D {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while !shutdown.is_set() {
            ticker.tick().await;
            self.poll_once();
        }
        debug!("EPC monitor stopped");
        self.driver
    }
}

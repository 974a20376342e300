//! # PDU Simulator
//!
//! Emulates the power distribution unit of a small satellite: two redundant
//! units that accept OBC commands, track their lifecycle and switch lines,
//! simulate load telemetry and optionally drive GPIO switch hardware.
//!
//! ## Transports
//!
//! - **Space packets** over UDP: 6-byte primary header, 12-byte secondary
//!   header with message type/subtype, JSON payload ([`packet`]).
//! - **Serial frames** over RS-422: delimited, byte-stuffed, CRC-16 protected
//!   frames carrying the same JSON bodies ([`serial_frame`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use pdusim::dispatcher::CommandDispatcher;
//! use pdusim::protocol::Command;
//! use pdusim::unit::UnitState;
//!
//! let mut state = UnitState::default();
//! let mut dispatcher = CommandDispatcher::new();
//!
//! let command = Command::from_json(br#"{"PduGoOperate": {}}"#).unwrap();
//! let outcome = dispatcher.dispatch(&mut state, &command);
//! assert!(outcome.accepted());
//! ```
//!
//! ## Architecture
//!
//! - [`orchestrator`] - Transport loops and per-command sequencing
//! - [`dispatcher`] - Command execution against unit state
//! - [`state_machine`] - Lifecycle states and allowed transitions
//! - [`unit`] - Per-unit data model and registry
//! - [`telemetry`] - Periodic measurement stream while operating
//! - [`hardware`] - Switch line synchronization

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hardware;
pub mod orchestrator;
pub mod packet;
pub mod protocol;
pub mod serial_frame;
pub mod state_machine;
pub mod telemetry;
pub mod unit;

// Re-export main public types for convenience
pub use config::{load_config, RunMode, SimulatorConfig};
pub use dispatcher::CommandDispatcher;
pub use error::{PduError, PduResult};
pub use orchestrator::{PowerGate, ShutdownFlag, TmtcOrchestrator};
pub use packet::SpacePacket;
pub use protocol::{Command, Response};
pub use serial_frame::{FrameDeserializer, FrameSerializer, SerialFrame};
pub use state_machine::{PduState, Transition};
pub use unit::{UnitId, UnitRegistry, UnitState};

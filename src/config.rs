//! Simulator configuration, loaded from a JSON file.
//!
//! Every field has a default, so an empty object `{}` is a valid file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PduError, PduResult};
use crate::telemetry::TelemetrySettings;
use crate::unit::{UnitId, NOMINAL_APID, REDUNDANT_APID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Space packet transport only, no hardware.
    Simulator,
    /// Adds the serial link and drives switch lines.
    Emulator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub unit: SerialUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialUnit {
    Nominal,
    Redundant,
}

impl From<SerialUnit> for UnitId {
    fn from(unit: SerialUnit) -> Self {
        match unit {
            SerialUnit::Nominal => UnitId::Nominal,
            SerialUnit::Redundant => UnitId::Redundant,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB1".to_string(),
            baud_rate: 115_200,
            unit: SerialUnit::Nominal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub mode: RunMode,
    pub bind_address: String,
    pub tc_port: u16,
    pub telemetry_endpoint: String,
    pub nominal_apid: u16,
    pub redundant_apid: u16,
    pub telemetry_interval_ms: u64,
    pub receive_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub hardware_poll_interval_ms: u64,
    pub serial: Option<SerialConfig>,
    pub log_level: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Simulator,
            bind_address: "0.0.0.0".to_string(),
            tc_port: 5004,
            telemetry_endpoint: "127.0.0.1:5005".to_string(),
            nominal_apid: NOMINAL_APID,
            redundant_apid: REDUNDANT_APID,
            telemetry_interval_ms: 1000,
            receive_timeout_ms: 1000,
            join_timeout_ms: 2000,
            hardware_poll_interval_ms: 100,
            serial: None,
            log_level: "info".to_string(),
        }
    }
}

impl SimulatorConfig {
    #[must_use]
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    #[must_use]
    pub fn hardware_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hardware_poll_interval_ms)
    }

    /// Stream settings for a unit whose `PduGoOperate` arrived with the
    /// given reply type and subtype.
    #[must_use]
    pub fn telemetry_settings(&self, apid: u16, message_type: u8, message_subtype: u8) -> TelemetrySettings {
        TelemetrySettings {
            endpoint: self.telemetry_endpoint.clone(),
            interval: self.telemetry_interval(),
            connect_timeout: self.receive_timeout(),
            apid,
            message_type,
            message_subtype,
        }
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.tc_port)
    }

    pub fn validate(&self) -> PduResult<()> {
        if self.nominal_apid == self.redundant_apid {
            return Err(PduError::Config(format!(
                "nominal and redundant units share APID {:#x}",
                self.nominal_apid
            )));
        }
        if self.nominal_apid > crate::packet::MAX_APID || self.redundant_apid > crate::packet::MAX_APID {
            return Err(PduError::Config("APIDs are limited to 11 bits".to_string()));
        }
        // Loops poll the shutdown flag between receives.
        if self.receive_timeout_ms == 0 || self.receive_timeout_ms > 1000 {
            return Err(PduError::Config(format!(
                "receive timeout must be 1..=1000 ms, got {}",
                self.receive_timeout_ms
            )));
        }
        if self.telemetry_interval_ms == 0 || self.hardware_poll_interval_ms == 0 {
            return Err(PduError::Config("intervals must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Loads and validates a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> PduResult<SimulatorConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: SimulatorConfig =
        serde_json::from_reader(reader).map_err(|e| PduError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

//! Error taxonomy shared by the codecs, dispatcher and transports.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PduError {
    /// Frame too short, bad header fields or undecodable payload.
    #[error("Format error: {0}")]
    Format(String),

    #[error("Checksum mismatch: expected {expected:#06x}, received {received:#06x}")]
    Checksum { expected: u16, received: u16 },

    /// Command parameters out of range for the addressed logical unit.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command {command} not allowed in state {state}")]
    ProtocolState { command: &'static str, state: &'static str },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Unsupported message id: {0}")]
    Unsupported(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hardware error: {0}")]
    Hardware(String),
}

impl PduError {
    /// Errors answered with a rejection acknowledgement rather than dropped.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PduError::Validation(_) | PduError::UnknownCommand(_) | PduError::ProtocolState { .. }
        )
    }
}

impl From<serde_json::Error> for PduError {
    fn from(err: serde_json::Error) -> Self {
        PduError::Format(err.to_string())
    }
}

pub type PduResult<T> = Result<T, PduError>;

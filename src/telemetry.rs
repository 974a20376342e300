//! Periodic converted-measurement stream of one unit while it is operating.
//!
//! The stream is an owned task handle stored in the unit context. It reads
//! only published snapshots, so it never contends with command processing.

use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::PduResult;
use crate::packet::{SpacePacket, MAX_SEQUENCE_COUNT};
use crate::unit::measurements::EnabledMeasurements;
use crate::unit::{UnitId, UnitSnapshot};

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub endpoint: String,
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub apid: u16,
    pub message_type: u8,
    pub message_subtype: u8,
}

#[derive(Serialize)]
struct TelemetryBody<'a> {
    #[serde(rename = "PduConvertedMeasurements")]
    measurements: EnabledMeasurements<'a>,
}

/// JSON body of one telemetry packet: converted channels of every group
/// with at least one enabled line.
pub fn telemetry_body(snapshot: &UnitSnapshot) -> PduResult<Vec<u8>> {
    let body = TelemetryBody { measurements: snapshot.converted.enabled(&snapshot.lines) };
    Ok(serde_json::to_vec(&body)?)
}

#[derive(Debug)]
pub struct TelemetryStream {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TelemetryStream {
    #[must_use]
    pub fn start(
        unit: UnitId,
        settings: TelemetrySettings,
        snapshots: watch::Receiver<UnitSnapshot>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        info!("Starting {} telemetry stream to {}", unit, settings.endpoint);
        let handle = tokio::spawn(run_stream(unit, settings, snapshots, stop_rx));
        Self { stop, handle }
    }

    /// True once the task has ended on its own (endpoint gone, write error).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the task and waits up to `join_timeout` for it to end.
    /// Returns false if it had to be aborted.
    pub async fn stop(self, join_timeout: Duration) -> bool {
        let _ = self.stop.send(true);
        let mut handle = self.handle;
        match time::timeout(join_timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Telemetry task ended abnormally: {}", e);
                true
            }
            Err(_) => {
                warn!("Telemetry task did not stop within {:?}, aborting", join_timeout);
                handle.abort();
                false
            }
        }
    }
}

async fn run_stream(
    unit: UnitId,
    settings: TelemetrySettings,
    snapshots: watch::Receiver<UnitSnapshot>,
    mut stop: watch::Receiver<bool>,
) {
    let connect = time::timeout(settings.connect_timeout, TcpStream::connect(&settings.endpoint));
    let mut stream = tokio::select! {
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("{} telemetry: cannot connect to {}: {}", unit, settings.endpoint, e);
                return;
            }
            Err(_) => {
                warn!("{} telemetry: connect to {} timed out", unit, settings.endpoint);
                return;
            }
        },
        _ = stop.changed() => return,
    };

    let mut interval = time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u16 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let snapshot = snapshots.borrow().clone();
        let bytes = match telemetry_body(&snapshot).and_then(|body| {
            SpacePacket::telemetry(
                settings.apid,
                sequence,
                settings.message_type,
                settings.message_subtype,
                body,
            )
            .encode()
        }) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{} telemetry: cannot encode packet: {}", unit, e);
                continue;
            }
        };
        if let Err(e) = stream.write_all(&bytes).await {
            warn!("{} telemetry: send failed, stream ends: {}", unit, e);
            return;
        }
        debug!("{} telemetry packet {} sent ({} bytes)", unit, sequence, bytes.len());
        sequence = (sequence + 1) & MAX_SEQUENCE_COUNT;
    }
    info!("{} telemetry stream stopped", unit);
}

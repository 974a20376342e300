//! Transport loops and per-command sequencing.
//!
//! For every command the orchestrator, holding the addressed unit's lock:
//! stops the telemetry stream if the command leaves Operate, dispatches,
//! publishes the new snapshot, builds the acknowledgement then the response,
//! and starts telemetry after an accepted `PduGoOperate`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::SimulatorConfig;
use crate::error::{PduError, PduResult};
use crate::packet::{SpacePacket, ACK_ACCEPTED_SUBTYPE, ACK_MESSAGE_TYPE, ACK_REJECTED_SUBTYPE};
use crate::protocol::Command;
use crate::serial_frame::{split_payload, DeserializeStatus, FrameDeserializer, PayloadAssembler};
use crate::state_machine::{PduState, Transition};
use crate::telemetry::TelemetryStream;
use crate::unit::{MsgAcknowledgement, UnitContext, UnitHandle, UnitId, UnitRegistry};

/// Process-wide stop request, polled by every loop between bounded waits.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether either unit's EPC reports it powered. Receive loops leave
/// commands queued in the transport while the gate is closed.
#[derive(Debug, Clone)]
pub struct PowerGate(Arc<AtomicBool>);

impl Default for PowerGate {
    fn default() -> Self {
        Self::open()
    }
}

impl PowerGate {
    #[must_use]
    pub fn open() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    #[must_use]
    pub fn closed() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self, powered: bool) {
        self.0.store(powered, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One outgoing message, before transport framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_type: u8,
    pub message_subtype: u8,
    pub sequence_count: u16,
    pub body: Vec<u8>,
}

pub struct TmtcOrchestrator {
    registry: Arc<UnitRegistry>,
    config: SimulatorConfig,
    shutdown: ShutdownFlag,
    power: PowerGate,
}

fn reply(ctx: &mut UnitContext, message_type: u8, message_subtype: u8, body: Vec<u8>) -> Reply {
    Reply { message_type, message_subtype, sequence_count: ctx.next_sequence(), body }
}

fn ack_reply(ctx: &mut UnitContext, ack: MsgAcknowledgement) -> Option<Reply> {
    let subtype = if ack.accepted() { ACK_ACCEPTED_SUBTYPE } else { ACK_REJECTED_SUBTYPE };
    match ack.to_bytes() {
        Ok(body) => Some(reply(ctx, ACK_MESSAGE_TYPE, subtype, body)),
        Err(e) => {
            error!("Cannot encode acknowledgement: {}", e);
            None
        }
    }
}

impl TmtcOrchestrator {
    #[must_use]
    pub fn new(registry: Arc<UnitRegistry>, config: SimulatorConfig, shutdown: ShutdownFlag) -> Self {
        Self { registry, config, shutdown, power: PowerGate::open() }
    }

    /// Gates both receive loops on `power`.
    #[must_use]
    pub fn with_power_gate(mut self, power: PowerGate) -> Self {
        self.power = power;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Runs one decoded (or failed) command against `unit` and returns the
    /// replies in send order.
    pub async fn process(
        &self,
        unit: &UnitHandle,
        command: PduResult<Command>,
        request_type: u8,
        request_subtype: u8,
    ) -> Vec<Reply> {
        let mut guard = unit.lock().await;
        let ctx = &mut *guard;

        let command = match command {
            Ok(command) => command,
            Err(PduError::UnknownCommand(name)) => {
                warn!("{} unit: unknown command {}", unit.id(), name);
                let ack = ctx.dispatcher.reject_unknown(&mut ctx.state, &name);
                unit.publish(&ctx.state);
                return ack_reply(ctx, ack).into_iter().collect();
            }
            Err(e) => {
                warn!("{} unit: dropping command: {}", unit.id(), e);
                return Vec::new();
            }
        };
        info!("{} unit: {}", unit.id(), command.name());

        if let Command::Transition(transition) = command {
            let current = ctx.state.pdu_state();
            if current == PduState::Operate && transition.is_allowed_from(current) {
                if let Some(stream) = ctx.telemetry.take() {
                    stream.stop(self.config.join_timeout()).await;
                }
            }
        }

        let dispatch = ctx.dispatcher.dispatch(&mut ctx.state, &command);
        unit.publish(&ctx.state);
        if let Some((from, to)) = dispatch.transition {
            info!("{} unit: {} -> {}", unit.id(), from, to);
        }

        let mut replies = Vec::with_capacity(2);
        if let Some(ack) = dispatch.acknowledgement {
            replies.extend(ack_reply(ctx, ack));
        }
        if let Some(response) = &dispatch.response {
            match response.to_bytes() {
                Ok(body) => replies.push(reply(ctx, request_type, request_subtype.wrapping_add(1), body)),
                Err(e) => error!("Cannot encode {} response: {}", command.name(), e),
            }
        }

        if command == Command::Transition(Transition::GoOperate) && dispatch.accepted() {
            let running = ctx.telemetry.as_ref().is_some_and(|s| !s.is_finished());
            if !running {
                let settings = self.config.telemetry_settings(
                    unit.apid(),
                    request_type,
                    request_subtype.wrapping_add(1),
                );
                ctx.telemetry = Some(TelemetryStream::start(unit.id(), settings, unit.subscribe()));
            }
        }

        replies
    }

    /// Handles one decoded space packet; replies carry the unit's APID.
    pub async fn handle_packet(&self, packet: &SpacePacket) -> Vec<SpacePacket> {
        let Some(unit) = self.registry.by_apid(packet.apid) else {
            warn!("Dropping packet for unknown APID {:#x}", packet.apid);
            return Vec::new();
        };

        let command = Command::from_json(&packet.payload);
        self.process(unit, command, packet.message_type, packet.message_subtype)
            .await
            .into_iter()
            .map(|r| {
                SpacePacket::telemetry(unit.apid(), r.sequence_count, r.message_type, r.message_subtype, r.body)
            })
            .collect()
    }

    /// Handles one reassembled serial body; returns reply bodies in send order.
    /// Serial commands are treated as message type 1 with their message id
    /// as subtype.
    pub async fn handle_serial_body(&self, unit: UnitId, header: u8, body: &[u8]) -> Vec<Vec<u8>> {
        let message_id = header >> 4;
        let command = Command::from_serial(message_id, header & 0x0F, body);
        self.process(self.registry.get(unit), command, ACK_MESSAGE_TYPE, message_id)
            .await
            .into_iter()
            .map(|r| r.body)
            .collect()
    }

    /// Receives space packets until shutdown. Replies go back to the sender.
    pub async fn run_udp(&self, socket: UdpSocket) -> PduResult<()> {
        let timeout = self.config.receive_timeout();
        let mut buf = vec![0u8; u16::MAX as usize];
        info!("Listening for space packets on {}", socket.local_addr()?);

        while !self.shutdown.is_set() {
            if !self.power.is_open() {
                time::sleep(timeout).await;
                continue;
            }
            let (len, peer) = match time::timeout(timeout, socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!("UDP receive failed: {}", e);
                    continue;
                }
            };

            let packet = match SpacePacket::decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Dropping frame from {}: {}", peer, e);
                    continue;
                }
            };
            debug!("Packet from {}: apid {:#x} seq {}", peer, packet.apid, packet.sequence_count);

            for out in self.handle_packet(&packet).await {
                match out.encode() {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, peer).await {
                            warn!("Send to {} failed: {}", peer, e);
                        }
                    }
                    Err(e) => error!("Cannot encode reply: {}", e),
                }
            }
        }
        info!("Space packet loop stopped");
        Ok(())
    }

    /// Runs the serial protocol over any byte stream until shutdown or EOF.
    pub async fn run_serial<S>(&self, mut stream: S, unit: UnitId) -> PduResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeout = self.config.receive_timeout();
        let mut deserializer = FrameDeserializer::new();
        let mut assembler = PayloadAssembler::new();
        let mut buf = [0u8; 256];
        info!("Serial link bound to {} unit", unit);

        while !self.shutdown.is_set() {
            if !self.power.is_open() {
                time::sleep(timeout).await;
                continue;
            }
            let len = match time::timeout(timeout, stream.read(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    info!("Serial link closed");
                    return Ok(());
                }
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    warn!("Serial read failed: {}", e);
                    time::sleep(timeout).await;
                    continue;
                }
            };

            for &byte in &buf[..len] {
                let frame = match deserializer.apply(byte) {
                    DeserializeStatus::AwaitingMore => continue,
                    DeserializeStatus::Complete(frame) => frame,
                    DeserializeStatus::ChecksumError { expected, received } => {
                        warn!("Serial frame discarded: checksum {:#06x} != {:#06x}", received, expected);
                        continue;
                    }
                    DeserializeStatus::Overflow => {
                        warn!("Serial frame discarded: overflow");
                        continue;
                    }
                };
                let Some((header, body)) = assembler.push(&frame) else {
                    continue;
                };

                for reply_body in self.handle_serial_body(unit, header, &body).await {
                    let frames = match split_payload(header, &reply_body) {
                        Ok(frames) => frames,
                        Err(e) => {
                            error!("Cannot frame serial reply: {}", e);
                            continue;
                        }
                    };
                    for out in frames {
                        if let Err(e) = stream.write_all(&out.encode()).await {
                            warn!("Serial write failed: {}", e);
                            break;
                        }
                    }
                }
                if let Err(e) = stream.flush().await {
                    warn!("Serial flush failed: {}", e);
                }
            }
        }
        info!("Serial loop stopped");
        Ok(())
    }

    /// Stops and joins every unit's telemetry stream.
    pub async fn stop_telemetry(&self) {
        for unit in self.registry.iter() {
            let stream = unit.lock().await.telemetry.take();
            if let Some(stream) = stream {
                stream.stop(self.config.join_timeout()).await;
            }
        }
    }
}

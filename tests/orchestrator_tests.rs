use std::sync::Arc;
use std::time::Duration;

use pdusim::packet::{ACK_ACCEPTED_SUBTYPE, ACK_MESSAGE_TYPE, ACK_REJECTED_SUBTYPE};
use pdusim::serial_frame::*;
use pdusim::unit::LogicalUnit;
use pdusim::*;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const NOMINAL: u16 = 0x65;
const REDUNDANT: u16 = 0x66;

fn test_config() -> SimulatorConfig {
    SimulatorConfig {
        receive_timeout_ms: 100,
        join_timeout_ms: 500,
        telemetry_interval_ms: 50,
        // Nothing listens here; streams end right after starting.
        telemetry_endpoint: "127.0.0.1:9".to_string(),
        ..SimulatorConfig::default()
    }
}

fn orchestrator() -> TmtcOrchestrator {
    TmtcOrchestrator::new(Arc::new(UnitRegistry::default()), test_config(), ShutdownFlag::new())
}

fn command(apid: u16, body: Value) -> SpacePacket {
    SpacePacket::telecommand(apid, 0, 3, 25, serde_json::to_vec(&body).unwrap())
}

fn body(packet: &SpacePacket) -> Value {
    serde_json::from_slice(&packet.payload).unwrap()
}

#[tokio::test]
async fn test_go_operate_accepted_then_rejected() {
    let orchestrator = orchestrator();

    let replies = orchestrator.handle_packet(&command(NOMINAL, json!({"PduGoOperate": {}}))).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].apid, NOMINAL);
    assert_eq!(replies[0].message_type, ACK_MESSAGE_TYPE);
    assert_eq!(replies[0].message_subtype, ACK_ACCEPTED_SUBTYPE);
    assert_eq!(
        body(&replies[0]),
        json!({"MsgAcknowledgement": {"RequestedMsgId": "PduGoOperate", "PduReturnCode": 0}})
    );

    let replies = orchestrator.handle_packet(&command(NOMINAL, json!({"PduGoOperate": {}}))).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].message_subtype, ACK_REJECTED_SUBTYPE);
    assert_eq!(body(&replies[0])["MsgAcknowledgement"]["PduReturnCode"], 1);

    orchestrator.stop_telemetry().await;
}

#[tokio::test]
async fn test_heartbeat_response_uses_request_type() {
    let orchestrator = orchestrator();
    let replies = orchestrator
        .handle_packet(&command(REDUNDANT, json!({"ObcHeartBeat": {"HeartBeat": 7}})))
        .await;

    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.apid, REDUNDANT);
    assert_eq!(reply.message_type, 3);
    assert_eq!(reply.message_subtype, 26);
    assert_eq!(body(reply), json!({"PduHeartBeat": {"HeartBeat": 7, "PduState": 1}}));

    // Only the redundant unit saw the heartbeat.
    let registry = orchestrator.registry();
    assert_eq!(registry.get(UnitId::Redundant).lock().await.state.heartbeat.heartbeat, 7);
    assert_eq!(registry.get(UnitId::Nominal).lock().await.state.heartbeat.heartbeat, 0);
}

#[tokio::test]
async fn test_converted_query_ack_precedes_response() {
    let orchestrator = orchestrator();
    orchestrator
        .handle_packet(&command(NOMINAL, json!({"SetUnitPwLines": {"LogicUnitId": 2, "Parameters": 15}})))
        .await;

    let replies = orchestrator
        .handle_packet(&command(NOMINAL, json!({"GetConvertedMeasurements": {"LogicUnitId": 2}})))
        .await;
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].message_type, ACK_MESSAGE_TYPE);
    assert_eq!(replies[0].message_subtype, ACK_ACCEPTED_SUBTYPE);
    assert_eq!(replies[1].message_subtype, 26);

    let response = body(&replies[1]);
    let wheels = response["PduConvertedMeasurements"]["ReactionWheelAdcSel"].as_array().unwrap();
    for value in wheels {
        assert!((value.as_f64().unwrap() - 5.0).abs() <= 0.02);
    }

    // Sequence counts advance per unit across replies.
    assert_eq!(replies[1].sequence_count, replies[0].sequence_count + 1);
}

#[tokio::test]
async fn test_unknown_apid_dropped() {
    let orchestrator = orchestrator();
    let replies = orchestrator.handle_packet(&command(0x100, json!({"PduGoOperate": {}}))).await;
    assert!(replies.is_empty());

    for unit in orchestrator.registry().iter() {
        assert_eq!(unit.snapshot().pdu_state, PduState::Load);
    }
}

#[tokio::test]
async fn test_unknown_command_rejected() {
    let orchestrator = orchestrator();
    let replies = orchestrator.handle_packet(&command(NOMINAL, json!({"AddrDloadStart": {}}))).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].message_subtype, ACK_REJECTED_SUBTYPE);
    assert_eq!(
        body(&replies[0]),
        json!({"MsgAcknowledgement": {"RequestedMsgId": "AddrDloadStart", "PduReturnCode": 1}})
    );
}

#[tokio::test]
async fn test_malformed_payload_dropped() {
    let orchestrator = orchestrator();
    let packet = SpacePacket::telecommand(NOMINAL, 0, 3, 25, b"{not json".to_vec());
    assert!(orchestrator.handle_packet(&packet).await.is_empty());

    let ctx = orchestrator.registry().get(UnitId::Nominal).lock().await;
    assert_eq!(ctx.state.status.request_rejected_count, 0);
    assert_eq!(ctx.state.status.request_accepted_count, 0);
}

#[tokio::test]
async fn test_out_of_range_unit_rejected_without_mutation() {
    let orchestrator = orchestrator();
    let before = orchestrator.registry().get(UnitId::Nominal).snapshot();

    let replies = orchestrator
        .handle_packet(&command(NOMINAL, json!({"SetUnitPwLines": {"LogicUnitId": 99, "Parameters": 1}})))
        .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].message_subtype, ACK_REJECTED_SUBTYPE);
    assert_eq!(orchestrator.registry().get(UnitId::Nominal).snapshot().lines, before.lines);
}

#[tokio::test]
async fn test_negative_arguments_rejected_with_ack() {
    let orchestrator = orchestrator();
    let before = orchestrator.registry().get(UnitId::Nominal).snapshot();

    for request in [
        json!({"SetUnitPwLines": {"LogicUnitId": -1, "Parameters": 1}}),
        json!({"SetUnitPwLines": {"LogicUnitId": 2, "Parameters": -1}}),
        json!({"ResetUnitPwLines": {"LogicUnitId": 2, "Parameters": 4294967296u64}}),
        json!({"GetRawMeasurements": {"LogicUnitId": -1}}),
    ] {
        let name = request.as_object().unwrap().keys().next().unwrap().clone();
        let replies = orchestrator.handle_packet(&command(NOMINAL, request)).await;
        assert_eq!(replies.len(), 1, "{name}");
        assert_eq!(replies[0].message_subtype, ACK_REJECTED_SUBTYPE);
        assert_eq!(
            body(&replies[0]),
            json!({"MsgAcknowledgement": {"RequestedMsgId": name, "PduReturnCode": 1}})
        );
    }

    let ctx = orchestrator.registry().get(UnitId::Nominal).lock().await;
    assert_eq!(ctx.state.lines, before.lines);
    assert_eq!(ctx.state.status.request_rejected_count, 4);
}

#[tokio::test]
async fn test_serial_json_never_falls_back_to_binary() {
    let orchestrator = orchestrator();

    // Valid JSON with a bad argument is dropped, not read as raw bytes.
    let replies = orchestrator
        .handle_serial_body(UnitId::Nominal, 0x10, br#"{"ObcHeartBeat":{"HeartBeat":"x"}}"#)
        .await;
    assert!(replies.is_empty());

    let replies = orchestrator
        .handle_serial_body(UnitId::Nominal, 0xB2, br#"{"SetUnitPwLines":{"LogicUnitId":2},"ObcHeartBeat":{}}"#)
        .await;
    assert!(replies.is_empty());

    {
        let ctx = orchestrator.registry().get(UnitId::Nominal).lock().await;
        assert_eq!(ctx.state.heartbeat.heartbeat, 0);
        assert_eq!(ctx.state.lines.get(LogicalUnit::ReactionWheel), 0);
        assert_eq!(ctx.state.status.request_accepted_count, 0);
    }

    // Unknown names in JSON still get a rejection.
    let replies = orchestrator.handle_serial_body(UnitId::Nominal, 0x10, br#"{"AddrDloadStart":{}}"#).await;
    assert_eq!(replies.len(), 1);
    let ack: Value = serde_json::from_slice(&replies[0]).unwrap();
    assert_eq!(ack["MsgAcknowledgement"]["PduReturnCode"], 1);

    // Non-JSON bodies still take the binary path.
    let replies = orchestrator.handle_serial_body(UnitId::Nominal, 0x10, &[0xFE]).await;
    let reply: Value = serde_json::from_slice(&replies[0]).unwrap();
    assert_eq!(reply["PduHeartBeat"]["HeartBeat"], 0xFE);
}

#[tokio::test]
async fn test_closed_power_gate_holds_commands() {
    let gate = PowerGate::closed();
    let orchestrator = Arc::new(orchestrator().with_power_gate(gate.clone()));
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();

    let loop_orchestrator = Arc::clone(&orchestrator);
    let task = tokio::spawn(async move { loop_orchestrator.run_udp(server).await });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(server_addr).await.unwrap();
    let request = command(NOMINAL, json!({"ObcHeartBeat": {"HeartBeat": 5}}));
    client.send(&request.encode().unwrap()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    assert!(timeout(Duration::from_millis(300), client.recv(&mut buf)).await.is_err());
    assert_eq!(orchestrator.registry().get(UnitId::Nominal).lock().await.state.heartbeat.heartbeat, 0);

    // Powering up releases the queued datagram.
    gate.set(true);
    let len = timeout(Duration::from_secs(2), client.recv(&mut buf)).await.unwrap().unwrap();
    let reply = SpacePacket::decode(&buf[..len]).unwrap();
    assert_eq!(body(&reply)["PduHeartBeat"]["HeartBeat"], 5);

    orchestrator.shutdown_flag().trigger();
    let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_udp_loop_end_to_end() {
    let orchestrator = Arc::new(orchestrator());
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();

    let loop_orchestrator = Arc::clone(&orchestrator);
    let task = tokio::spawn(async move { loop_orchestrator.run_udp(server).await });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(server_addr).await.unwrap();

    // Garbage first; the loop must survive it.
    client.send(&[0x01, 0x02, 0x03]).await.unwrap();

    let request = command(NOMINAL, json!({"ObcHeartBeat": {"HeartBeat": 99}}));
    client.send(&request.encode().unwrap()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let len = timeout(Duration::from_secs(2), client.recv(&mut buf)).await.unwrap().unwrap();
    let reply = SpacePacket::decode(&buf[..len]).unwrap();
    assert_eq!(body(&reply)["PduHeartBeat"]["HeartBeat"], 99);

    orchestrator.shutdown_flag().trigger();
    let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

async fn read_body(stream: &mut DuplexStream) -> (u8, Vec<u8>) {
    let mut deserializer = FrameDeserializer::new();
    let mut assembler = PayloadAssembler::new();
    let mut byte = [0u8; 1];
    loop {
        timeout(Duration::from_secs(2), stream.read_exact(&mut byte)).await.unwrap().unwrap();
        if let DeserializeStatus::Complete(frame) = deserializer.apply(byte[0]) {
            if let Some(body) = assembler.push(&frame) {
                return body;
            }
        }
    }
}

async fn send_body(stream: &mut DuplexStream, header: u8, body: &[u8]) {
    for frame in split_payload(header, body).unwrap() {
        stream.write_all(&frame.encode()).await.unwrap();
    }
}

#[tokio::test]
async fn test_serial_loop() {
    let orchestrator = Arc::new(orchestrator());
    let (mut client, server) = tokio::io::duplex(4096);

    let loop_orchestrator = Arc::clone(&orchestrator);
    let task = tokio::spawn(async move { loop_orchestrator.run_serial(server, UnitId::Nominal).await });

    // Binary heartbeat: message id 1, counter in the first payload byte.
    send_body(&mut client, 0x10, &[42]).await;
    let (header, reply) = read_body(&mut client).await;
    assert_eq!(header, 0x10);
    let reply: Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply["PduHeartBeat"]["HeartBeat"], 42);

    // JSON command: acknowledged, no response body.
    send_body(&mut client, 0xB2, br#"{"SetUnitPwLines":{"LogicUnitId":2,"Parameters":3}}"#).await;
    let (header, ack) = read_body(&mut client).await;
    assert_eq!(header, 0xB2);
    let ack: Value = serde_json::from_slice(&ack).unwrap();
    assert_eq!(ack["MsgAcknowledgement"]["PduReturnCode"], 0);

    // Corrupted frame: no reply and no mutation.
    let frame = SerialFrame::new(11, 3, br#"{"SetUnitPwLines":{"LogicUnitId":3,"Parameters":3}}"#).unwrap();
    let mut wire = frame.encode();
    wire[5] ^= 0x01;
    client.write_all(&wire).await.unwrap();

    // Only the intact SetUnitPwLines was counted.
    send_body(&mut client, 0x20, &[]).await;
    let (_, status) = read_body(&mut client).await;
    let status: Value = serde_json::from_slice(&status).unwrap();
    assert_eq!(status["PduStatus"]["RequestAcceptedCount"], 1);

    let snapshot = orchestrator.registry().get(UnitId::Nominal).snapshot();
    assert_eq!(snapshot.lines.get(LogicalUnit::ReactionWheel), 3);
    assert_eq!(snapshot.lines.get(LogicalUnit::Prop), 0);

    // Unsupported message id: ignored, loop continues.
    send_body(&mut client, 0x30, &[]).await;
    send_body(&mut client, 0x10, &[1]).await;
    let (header, _) = read_body(&mut client).await;
    assert_eq!(header, 0x10);

    drop(client);
    let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

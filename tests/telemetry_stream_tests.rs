use std::sync::Arc;
use std::time::Duration;

use pdusim::packet::PRIMARY_HEADER_LEN;
use pdusim::telemetry::{telemetry_body, TelemetrySettings, TelemetryStream};
use pdusim::unit::{LogicalUnit, UnitHandle, UnitSnapshot};
use pdusim::*;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn read_packet(stream: &mut TcpStream) -> SpacePacket {
    let mut header = [0u8; PRIMARY_HEADER_LEN];
    timeout(Duration::from_secs(2), stream.read_exact(&mut header)).await.unwrap().unwrap();
    let data_len = u16::from_be_bytes([header[4], header[5]]) as usize + 1;

    let mut bytes = header.to_vec();
    bytes.resize(PRIMARY_HEADER_LEN + data_len, 0);
    timeout(Duration::from_secs(2), stream.read_exact(&mut bytes[PRIMARY_HEADER_LEN..]))
        .await
        .unwrap()
        .unwrap();
    SpacePacket::decode(&bytes).unwrap()
}

async fn wait_for_eof(stream: &mut TcpStream) {
    let mut sink = [0u8; 1024];
    loop {
        let n = timeout(Duration::from_secs(2), stream.read(&mut sink)).await.unwrap().unwrap();
        if n == 0 {
            return;
        }
    }
}

fn command(body: Value) -> SpacePacket {
    SpacePacket::telecommand(0x65, 0, 3, 1, serde_json::to_vec(&body).unwrap())
}

#[test]
fn test_body_lists_enabled_groups_only() {
    let mut state = UnitState::default();
    state.lines.set(LogicalUnit::Prop, 0b10).unwrap();
    let body: Value = serde_json::from_slice(&telemetry_body(&UnitSnapshot::from(&state)).unwrap()).unwrap();

    let groups = body["PduConvertedMeasurements"].as_object().unwrap();
    let mut keys: Vec<&str> = groups.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["PropEnSel", "ThermAndFlybackEnSel"]);
    assert_eq!(groups["PropEnSel"].as_array().unwrap().len(), 2);
    assert_eq!(groups["ThermAndFlybackEnSel"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn test_stream_follows_operate_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = SimulatorConfig {
        telemetry_endpoint: listener.local_addr().unwrap().to_string(),
        telemetry_interval_ms: 20,
        receive_timeout_ms: 500,
        join_timeout_ms: 500,
        ..SimulatorConfig::default()
    };
    let orchestrator = TmtcOrchestrator::new(Arc::new(UnitRegistry::default()), config, ShutdownFlag::new());

    orchestrator
        .handle_packet(&command(json!({"SetUnitPwLines": {"LogicUnitId": 2, "Parameters": 15}})))
        .await;
    orchestrator.handle_packet(&command(json!({"PduGoOperate": {}}))).await;

    let (mut conn, _) = timeout(Duration::from_secs(2), listener.accept()).await.unwrap().unwrap();
    let first = read_packet(&mut conn).await;
    let second = read_packet(&mut conn).await;

    assert_eq!(first.apid, 0x65);
    assert_eq!(first.message_type, 3);
    assert_eq!(first.message_subtype, 2);
    assert_eq!(second.sequence_count, first.sequence_count + 1);

    let body: Value = serde_json::from_slice(&first.payload).unwrap();
    let groups = &body["PduConvertedMeasurements"];
    assert!(groups.get("HighPwHeaterEnSel").is_none());
    for value in groups["ReactionWheelEnSel"].as_array().unwrap() {
        assert!((value.as_f64().unwrap() - 5.0).abs() <= 0.02);
    }

    let replies = orchestrator.handle_packet(&command(json!({"PduGoSafe": {}}))).await;
    assert_eq!(serde_json::from_slice::<Value>(&replies[0].payload).unwrap()["MsgAcknowledgement"]["PduReturnCode"], 0);

    // The stream was joined before the acknowledgement went out.
    assert!(orchestrator.registry().get(UnitId::Nominal).lock().await.telemetry.is_none());
    wait_for_eof(&mut conn).await;
}

#[tokio::test]
async fn test_stream_ends_when_endpoint_unreachable() {
    // Grab a free port, then close it so the connect is refused.
    let endpoint = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let unit = UnitHandle::new(UnitId::Redundant, 0x66);
    let settings = TelemetrySettings {
        endpoint,
        interval: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(200),
        apid: 0x66,
        message_type: 3,
        message_subtype: 2,
    };

    let stream = TelemetryStream::start(UnitId::Redundant, settings, unit.subscribe());
    timeout(Duration::from_secs(2), async {
        while !stream.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(stream.stop(Duration::from_millis(100)).await);
}

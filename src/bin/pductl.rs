use std::time::Duration;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use pdusim::packet::{SpacePacket, ACK_ACCEPTED_SUBTYPE, ACK_MESSAGE_TYPE, ACK_REJECTED_SUBTYPE};
use pdusim::protocol::{Command, LineRequest};
use pdusim::state_machine::Transition;
use pdusim::unit::{NOMINAL_APID, REDUNDANT_APID};
use tokio::net::UdpSocket;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "5004";

// OBC telecommand type/subtype used for every request.
const REQUEST_TYPE: u8 = 2;
const REQUEST_SUBTYPE: u8 = 1;

fn number_validator(v: String) -> Result<(), String> {
    parse_number(&v).map(|_| ()).ok_or_else(|| format!("'{}' is not a number", v))
}

/// Accepts decimal or 0x-prefixed hexadecimal.
fn parse_number(v: &str) -> Option<u32> {
    match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => v.parse().ok(),
    }
}

fn line_subcommand(name: &'static str, about: &'static str) -> App<'static, 'static> {
    SubCommand::with_name(name)
        .about(about)
        .arg(Arg::with_name("unit").help("Logical unit id (0-8)").required(true).validator(number_validator))
        .arg(Arg::with_name("mask").help("Line bitmask").required(true).validator(number_validator))
}

fn unit_subcommand(name: &'static str, about: &'static str) -> App<'static, 'static> {
    SubCommand::with_name(name)
        .about(about)
        .arg(Arg::with_name("unit").help("Logical unit id (0-8)").required(true).validator(number_validator))
}

fn arg_number(matches: &ArgMatches, name: &str) -> u32 {
    matches.value_of(name).and_then(parse_number).unwrap_or(0)
}

fn build_command(matches: &ArgMatches) -> Option<Command> {
    let unit = |m: &ArgMatches| i64::from(arg_number(m, "unit"));
    let line = |m: &ArgMatches| LineRequest {
        logical_unit: unit(m),
        parameters: i64::from(arg_number(m, "mask")),
    };
    let command = match matches.subcommand() {
        ("heartbeat", Some(m)) => Command::ObcHeartBeat { heartbeat: arg_number(m, "counter") },
        ("status", _) => Command::GetPduStatus,
        ("load", _) => Command::Transition(Transition::GoLoad),
        ("safe", _) => Command::Transition(Transition::GoSafe),
        ("operate", _) => Command::Transition(Transition::GoOperate),
        ("maintenance", _) => Command::Transition(Transition::GoMaintenance),
        ("set", Some(m)) => Command::SetUnitPwLines(line(m)),
        ("reset", Some(m)) => Command::ResetUnitPwLines(line(m)),
        ("overwrite", Some(m)) => Command::OverwriteUnitPwLines(line(m)),
        ("lines", _) => Command::GetUnitLineStates,
        ("raw", Some(m)) => Command::GetRawMeasurements { logical_unit: unit(m) },
        ("converted", Some(m)) => Command::GetConvertedMeasurements { logical_unit: unit(m) },
        _ => return None,
    };
    Some(command)
}

fn print_packet(packet: &SpacePacket, verbose: bool) {
    let body: serde_json::Value = match serde_json::from_slice(&packet.payload) {
        Ok(body) => body,
        Err(_) => {
            println!("{} {}", "⚠️  Undecodable payload:".yellow(), String::from_utf8_lossy(&packet.payload));
            return;
        }
    };

    if verbose {
        println!(
            "{}",
            format!(
                "apid {:#x} seq {} type {} subtype {}",
                packet.apid, packet.sequence_count, packet.message_type, packet.message_subtype
            )
            .dimmed()
        );
    }

    if packet.message_type == ACK_MESSAGE_TYPE && body.get("MsgAcknowledgement").is_some() {
        let ack = &body["MsgAcknowledgement"];
        let name = ack["RequestedMsgId"].as_str().unwrap_or("?");
        match packet.message_subtype {
            ACK_ACCEPTED_SUBTYPE => println!("{} {}", "✅ ACCEPTED".green().bold(), name),
            ACK_REJECTED_SUBTYPE => println!("{} {}", "❌ REJECTED".red().bold(), name),
            other => println!("{} {} (subtype {})", "❓ ACK".yellow(), name, other),
        }
        return;
    }

    let pretty = serde_json::to_string_pretty(&body).unwrap_or_default();
    println!("{}", "📨 Response:".cyan().bold());
    println!("{}", pretty);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pductl")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  PDU command client - sends OBC telecommands to the PDU simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator space packet port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("redundant")
                .short("r")
                .long("redundant")
                .help("Address the redundant unit instead of the nominal one")
                .global(true),
        )
        .arg(
            Arg::with_name("wait")
                .short("w")
                .long("wait")
                .value_name("MS")
                .help("How long to wait for replies")
                .takes_value(true)
                .default_value("1000")
                .validator(number_validator)
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Show packet headers")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("heartbeat")
                .about("💓 Send an OBC heartbeat")
                .arg(Arg::with_name("counter").help("Heartbeat counter").required(true).validator(number_validator)),
        )
        .subcommand(SubCommand::with_name("status").about("📊 Get PDU status"))
        .subcommand(SubCommand::with_name("load").about("Command the Load state"))
        .subcommand(SubCommand::with_name("safe").about("🛡️  Command the Safe state"))
        .subcommand(SubCommand::with_name("operate").about("🚀 Command the Operate state"))
        .subcommand(SubCommand::with_name("maintenance").about("🛠️  Command the Maintenance state"))
        .subcommand(line_subcommand("set", "Set a unit's enable lines and simulate loads"))
        .subcommand(line_subcommand("reset", "Clear the given lines of a unit"))
        .subcommand(line_subcommand("overwrite", "Overwrite a unit's enable lines"))
        .subcommand(SubCommand::with_name("lines").about("🔌 Get all unit line states"))
        .subcommand(unit_subcommand("raw", "Get raw measurements"))
        .subcommand(unit_subcommand("converted", "Get converted measurements"))
        .get_matches();

    let Some(command) = build_command(&matches) else {
        eprintln!("{}", "Unknown command".red());
        std::process::exit(2);
    };

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT);
    let apid = if matches.is_present("redundant") { REDUNDANT_APID } else { NOMINAL_APID };
    let wait = Duration::from_millis(u64::from(arg_number(&matches, "wait")));
    let verbose = matches.is_present("verbose");

    let payload = serde_json::to_vec(&command.to_json())?;
    let packet = SpacePacket::telecommand(apid, 0, REQUEST_TYPE, REQUEST_SUBTYPE, payload);

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(format!("{}:{}", host, port)).await?;
    socket.send(&packet.encode()?).await?;
    println!("{} {}", "📤 Sent".blue().bold(), command.to_json());

    let mut buf = vec![0u8; u16::MAX as usize];
    let mut received = 0;
    while let Ok(result) = tokio::time::timeout(wait, socket.recv(&mut buf)).await {
        let len = result?;
        match SpacePacket::decode(&buf[..len]) {
            Ok(reply) => print_packet(&reply, verbose),
            Err(e) => println!("{} {}", "⚠️  Bad packet:".yellow(), e),
        }
        received += 1;
    }

    if received == 0 {
        println!("{}", "⏱️  No reply".yellow());
    }
    Ok(())
}

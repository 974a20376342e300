use std::str::FromStr;
use std::sync::Arc;

use clap::{App, Arg};
use pdusim::config::{load_config, RunMode, SerialConfig, SimulatorConfig};
use pdusim::hardware::{
    EpcMonitor, HardwareSync, LineDriver, MemoryLineDriver, EPC_NOMINAL_OFF, EPC_REDUNDANT_OFF,
};
use pdusim::orchestrator::{PowerGate, ShutdownFlag, TmtcOrchestrator};
use pdusim::unit::UnitRegistry;
use tokio::net::UdpSocket;
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pdusim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  PDU Simulator - power distribution unit emulation for OBC testing")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("mode")
                .short("m")
                .long("mode")
                .value_name("MODE")
                .help("Run mode")
                .takes_value(true)
                .possible_values(&["simulator", "emulator"]),
        )
        .arg(
            Arg::with_name("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Address to bind the space packet socket to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Space packet port")
                .takes_value(true)
                .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|_| "Port must be 0-65535".into())),
        )
        .arg(
            Arg::with_name("telemetry")
                .short("t")
                .long("telemetry")
                .value_name("HOST:PORT")
                .help("Endpoint receiving periodic telemetry")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("rs422-port")
                .long("rs422-port")
                .value_name("PATH")
                .help("Serial device for the RS-422 link")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("rs422-baud")
                .long("rs422-baud")
                .value_name("BAUD")
                .help("Serial baud rate")
                .takes_value(true)
                .validator(|v| v.parse::<u32>().map(|_| ()).map_err(|_| "Baud rate must be a number".into())),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => load_config(path)?,
        None => SimulatorConfig::default(),
    };
    if let Some(mode) = matches.value_of("mode") {
        config.mode = if mode == "emulator" { RunMode::Emulator } else { RunMode::Simulator };
    }
    if let Some(bind) = matches.value_of("bind") {
        config.bind_address = bind.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        config.tc_port = port.parse()?;
    }
    if let Some(endpoint) = matches.value_of("telemetry") {
        config.telemetry_endpoint = endpoint.to_string();
    }
    if let Some(port) = matches.value_of("rs422-port") {
        config.serial.get_or_insert_with(SerialConfig::default).port = port.to_string();
    }
    if let Some(baud) = matches.value_of("rs422-baud") {
        config.serial.get_or_insert_with(SerialConfig::default).baud_rate = baud.parse()?;
    }
    config.validate()?;

    let level = Level::from_str(&config.log_level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    println!("🛰️  PDU Simulator");
    println!("=================");

    let shutdown = ShutdownFlag::new();
    let registry = Arc::new(UnitRegistry::new(config.nominal_apid, config.redundant_apid));
    let power = PowerGate::open();
    let orchestrator = Arc::new(
        TmtcOrchestrator::new(Arc::clone(&registry), config.clone(), shutdown.clone())
            .with_power_gate(power.clone()),
    );

    let mut tasks = Vec::new();
    if config.mode == RunMode::Emulator {
        // No status expander attached: both on inputs held asserted.
        let mut inputs = MemoryLineDriver::default();
        inputs.write_line(EPC_NOMINAL_OFF, true)?;
        inputs.write_line(EPC_REDUNDANT_OFF, true)?;
        let mut monitor = EpcMonitor::new(inputs, power, config.hardware_poll_interval());
        monitor.poll_once();
        let monitor_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        }));
    }

    let socket = UdpSocket::bind(config.bind_addr()).await?;
    let udp_orchestrator = Arc::clone(&orchestrator);
    let udp_task = tokio::spawn(async move {
        if let Err(e) = udp_orchestrator.run_udp(socket).await {
            error!("Space packet loop error: {}", e);
        }
    });

    tasks.push(udp_task);

    if config.mode == RunMode::Emulator {
        let serial = config.serial.clone().unwrap_or_default();
        match tokio_serial::new(&serial.port, serial.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()
        {
            Ok(stream) => {
                info!("📡 Serial link open on {} at {} baud", serial.port, serial.baud_rate);
                let serial_orchestrator = Arc::clone(&orchestrator);
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = serial_orchestrator.run_serial(stream, serial.unit.into()).await {
                        error!("Serial loop error: {}", e);
                    }
                }));
            }
            Err(e) => warn!("Serial link unavailable on {}: {}", serial.port, e),
        }

        let receivers = registry.iter().map(|unit| unit.subscribe()).collect();
        let sync = HardwareSync::new(
            MemoryLineDriver::default(),
            receivers,
            config.hardware_poll_interval(),
        );
        let sync_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let driver = sync.run(sync_shutdown).await;
            info!("Line driver performed {} writes", driver.write_count());
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.trigger();

    orchestrator.stop_telemetry().await;
    for task in tasks {
        if tokio::time::timeout(config.join_timeout(), task).await.is_err() {
            warn!("Task did not stop within {:?}", config.join_timeout());
        }
    }

    println!("🚀 PDU Simulator stopped");
    Ok(())
}

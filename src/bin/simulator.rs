use beamgrid::protocol::{parse_command, ControlResponse};
use beamgrid::{Scenario, Simulation, TelemetryFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const TELEMETRY_BROADCAST_BUFFER_SIZE: usize = 256;

type SharedSimulation = Arc<Mutex<Simulation>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("📡 Beamed Power Network Simulator");
    println!("=================================");

    let scenario = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading scenario");
            Scenario::load(&path)?
        }
        None => {
            info!("no scenario given, using the built-in demo");
            Scenario::demo()
        }
    };
    let port = scenario.config.telemetry_port;
    let period = Duration::from_millis(scenario.config.tick_period_ms.max(1));
    let sim: SharedSimulation = Arc::new(Mutex::new(Simulation::from_scenario(&scenario)?));

    let (telemetry_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_BUFFER_SIZE);

    let tcp_sim = Arc::clone(&sim);
    let tcp_telemetry_tx = telemetry_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_sim, tcp_telemetry_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let (summary, frame) = {
            let mut guard = sim.lock().await;
            let summary = guard.tick();
            let frame = TelemetryFrame::collect(&guard);
            guard.drain_events();
            (summary, frame)
        };

        match frame.to_json() {
            Ok(json) => {
                // No subscribers is not an error worth reporting.
                let _ = telemetry_tx.send(json);
            }
            Err(e) => warn!("Failed to encode telemetry: {}", e),
        }
        info!(
            tick = summary.tick,
            active = summary.active_receivers,
            failed = summary.failed_receivers,
            delivered_mw = summary.delivered_power,
            waste_mw = summary.waste_heat,
            "⚡ tick"
        );
    }

    tcp_server.abort();
    println!("🛑 Beamed Power Network Simulator stopped");
    Ok(())
}

async fn start_tcp_server(
    port: u16,
    sim: SharedSimulation,
    telemetry_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    info!("🌐 TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 New client connected: {}", addr);
                let client_sim = Arc::clone(&sim);
                let client_telemetry_rx = telemetry_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_sim, client_telemetry_rx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    sim: SharedSimulation,
    mut telemetry_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let telemetry_writer = Arc::clone(&writer);
    let telemetry_task = tokio::spawn(async move {
        loop {
            let frame = match telemetry_rx.recv().await {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Telemetry subscriber lagged by {} frames", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let mut guard = telemetry_writer.lock().await;
            if let Err(e) = guard.write_all(frame.as_bytes()).await {
                warn!("Failed to send telemetry: {}", e);
                break;
            }
            if let Err(e) = guard.write_all(b"\n").await {
                warn!("Failed to send telemetry newline: {}", e);
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response = match parse_command(&line) {
                    Ok(command) => {
                        info!("📨 Received command: {:?}", command);
                        sim.lock().await.apply_command(&command)
                    }
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                        ControlResponse::from(e)
                    }
                };

                let response_json = response.to_json()?;
                {
                    let mut guard = writer.lock().await;
                    guard.write_all(response_json.as_bytes()).await?;
                    guard.write_all(b"\n").await?;
                }
                info!("📤 Sent response: {:?}", response.status);
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    telemetry_task.abort();
    Ok(())
}

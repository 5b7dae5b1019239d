use beamgrid::protocol::{ControlCommand, ControlResponse};
use beamgrid::telemetry::{format_power, ReceiverSnapshot, TelemetryFrame};
use beamgrid::{ReceiverId, Scenario, Simulation, TickSummary};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const DEFAULT_TICKS: &str = "10";
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn receiver_arg() -> Arg<'static, 'static> {
    Arg::with_name("id")
        .help("Receiver id")
        .required(true)
        .validator(|v| v.parse::<u32>().map(|_| ()).map_err(|_| "Receiver id must be a number".into()))
}

#[tokio::main]
async fn main() -> CliResult {
    let matches = App::new("beamgrid")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("📡 Beamgrid - beamed-power network simulation and control")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("h")
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
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("🧮 Run a scenario offline")
                .long_about("Builds a simulation from a scenario file (or the built-in demo) and prints each tick")
                .arg(
                    Arg::with_name("scenario")
                        .short("s")
                        .long("scenario")
                        .value_name("PATH")
                        .help("Scenario JSON file")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("ticks")
                        .short("n")
                        .long("ticks")
                        .value_name("N")
                        .help("Number of ticks to run")
                        .takes_value(true)
                        .default_value(DEFAULT_TICKS)
                        .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "Tick count must be a number".into())),
                ),
        )
        .subcommand(SubCommand::with_name("demo").about("📄 Print the built-in demo scenario as JSON"))
        .subcommand(SubCommand::with_name("snapshot").about("📊 Fetch one telemetry frame from the simulator"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Monitor the live telemetry stream")
                .arg(
                    Arg::with_name("frames")
                        .short("n")
                        .long("frames")
                        .value_name("N")
                        .help("Stop after N frames (default: infinite)")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("receiver")
                .about("🛰️  Receiver control")
                .subcommand(SubCommand::with_name("enable").about("Enable a receiver").arg(receiver_arg()))
                .subcommand(SubCommand::with_name("disable").about("Disable and ramp down a receiver").arg(receiver_arg()))
                .subcommand(
                    SubCommand::with_name("band")
                        .about("Select a bandwidth configuration by index or wavelength")
                        .arg(receiver_arg())
                        .arg(Arg::with_name("index").long("index").takes_value(true).help("Band index"))
                        .arg(
                            Arg::with_name("wavelength")
                                .long("wavelength")
                                .takes_value(true)
                                .conflicts_with("index")
                                .help("Wavelength in metres"),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("mode")
                        .about("Switch between thermal and electric output")
                        .arg(receiver_arg())
                        .arg(
                            Arg::with_name("mode")
                                .help("Output mode")
                                .required(true)
                                .possible_values(&["thermal", "electric", "solar-only", "beamed", "radiator", "receiver"]),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("consumption")
                        .about("Set consumption percentage bounds")
                        .arg(receiver_arg())
                        .arg(Arg::with_name("min").required(true).help("Minimum percentage"))
                        .arg(Arg::with_name("max").required(true).help("Maximum percentage")),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "📡 Beamgrid".bright_blue().bold());
    }

    match matches.subcommand() {
        ("run", Some(sub)) => handle_run(sub, format, verbose)?,
        ("demo", _) => println!("{}", Scenario::demo().to_json_pretty()?),
        ("snapshot", _) => {
            let response = send_command(host, port, &ControlCommand::Snapshot).await?;
            match response.frame {
                Some(frame) => print_frame(&frame, format)?,
                None => print_response("Snapshot", &response, format)?,
            }
        }
        ("monitor", Some(sub)) => handle_monitor(sub, host, port, format).await?,
        ("receiver", Some(sub)) => handle_receiver(sub, host, port, format).await?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Run the demo offline", "beamgrid run".bright_cyan());
            println!("  {} Start the simulator", "beamgrid-simulator [scenario.json]".bright_cyan());
            println!("  {} Monitor telemetry", "beamgrid monitor".bright_cyan());
        }
    }
    Ok(())
}

fn handle_run(matches: &ArgMatches<'_>, format: &str, verbose: bool) -> CliResult {
    if verbose {
        tracing_subscriber::fmt::init();
    }
    let scenario = match matches.value_of("scenario") {
        Some(path) => Scenario::load(path)?,
        None => Scenario::demo(),
    };
    let ticks = matches.value_of("ticks").unwrap_or(DEFAULT_TICKS).parse::<u64>()?;
    let mut sim = Simulation::from_scenario(&scenario)?;

    for _ in 0..ticks {
        let summary = sim.tick();
        match format {
            "json" => println!("{}", serde_json::to_string(&summary)?),
            "compact" => print_summary_compact(&summary),
            _ => {
                print_summary_compact(&summary);
                let frame = TelemetryFrame::collect(&sim);
                print_receiver_table(&frame.receivers);
            }
        }
        for event in sim.drain_events() {
            if format != "json" {
                println!("  {} {}", "•".yellow(), serde_json::to_string(&event)?.dimmed());
            }
        }
    }
    Ok(())
}

async fn handle_monitor(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult {
    let limit = matches.value_of("frames").map(str::parse::<u64>).transpose()?;
    println!("{}", "📡 Monitoring beamgrid telemetry (Press Ctrl+C to stop)...".bright_blue().bold());

    let stream = connect(host, port).await?;
    let mut lines = BufReader::new(stream).lines();
    let mut seen = 0u64;
    while let Some(line) = lines.next_line().await? {
        let Ok(frame) = serde_json::from_str::<TelemetryFrame>(&line) else {
            continue;
        };
        if format == "json" {
            println!("{line}");
        } else {
            print_frame(&frame, format)?;
        }
        seen += 1;
        if limit.is_some_and(|n| seen >= n) {
            break;
        }
    }
    Ok(())
}

async fn handle_receiver(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult {
    let (name, sub) = matches.subcommand();
    let Some(sub) = sub else {
        println!("{}", "Receiver subcommand required. Use 'beamgrid receiver --help' for options.".yellow());
        return Ok(());
    };
    let receiver = ReceiverId(sub.value_of("id").unwrap_or("0").parse()?);

    let command = match name {
        "enable" => ControlCommand::Enable { receiver },
        "disable" => ControlCommand::Disable { receiver },
        "band" => match (sub.value_of("index"), sub.value_of("wavelength")) {
            (Some(index), _) => ControlCommand::SetBand { receiver, index: index.parse()? },
            (None, Some(wavelength)) => ControlCommand::SetBandByWavelength {
                receiver,
                wavelength: wavelength.parse()?,
            },
            (None, None) => {
                println!("{}", "Give --index or --wavelength.".yellow());
                return Ok(());
            }
        },
        "mode" => match sub.value_of("mode").unwrap_or("electric") {
            "thermal" => ControlCommand::SetThermalMode { receiver, enabled: true },
            "solar-only" => ControlCommand::SetSolarOnly { receiver, enabled: true },
            "beamed" => ControlCommand::SetSolarOnly { receiver, enabled: false },
            "radiator" => ControlCommand::SetRadiatorMode { receiver, enabled: true },
            "receiver" => ControlCommand::SetRadiatorMode { receiver, enabled: false },
            _ => ControlCommand::SetThermalMode { receiver, enabled: false },
        },
        "consumption" => ControlCommand::SetConsumption {
            receiver,
            minimum: sub.value_of("min").unwrap_or("0").parse()?,
            maximum: sub.value_of("max").unwrap_or("100").parse()?,
        },
        _ => return Ok(()),
    };

    let response = send_command(host, port, &command).await?;
    print_response(&format!("{receiver} {name}"), &response, format)
}

async fn connect(host: &str, port: u16) -> CliResult<TcpStream> {
    let addr = format!("{host}:{port}");
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin beamgrid-simulator".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            Err(e.into())
        }
    }
}

/// Sends one command and waits for its response, skipping telemetry lines.
async fn send_command(host: &str, port: u16, command: &ControlCommand) -> CliResult<ControlResponse> {
    let mut stream = connect(host, port).await?;
    let request = serde_json::to_string(command)?;

    let exchange = async {
        stream.write_all(request.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        let mut lines = BufReader::new(&mut stream).lines();
        while let Some(line) = lines.next_line().await? {
            if let Ok(response) = serde_json::from_str::<ControlResponse>(&line) {
                return Ok(response);
            }
        }
        Err::<ControlResponse, Box<dyn std::error::Error>>("connection closed before a response arrived".into())
    };

    match tokio::time::timeout(RESPONSE_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} Command timed out after {}s", "⏱️".yellow(), RESPONSE_TIMEOUT.as_secs());
            Err("Command timeout".into())
        }
    }
}

fn print_response(action: &str, response: &ControlResponse, format: &str) -> CliResult {
    match format {
        "json" => println!("{}", response.to_json()?),
        "compact" => println!("{}", if response.is_success() { "OK".bright_green() } else { "FAIL".bright_red() }),
        _ => {
            let message = response.message.as_deref().unwrap_or("");
            if response.is_success() {
                println!("{} {} {}", "✅".green(), action.bright_white(), message.bright_cyan());
            } else {
                println!("{} {} failed: {}", "❌".red(), action.bright_white(), message.bright_red());
            }
        }
    }
    Ok(())
}

fn print_summary_compact(summary: &TickSummary) {
    println!(
        "{} {:>5}  active {:>3}  claimed {:>10}  delivered {:>10}  waste {:>10}{}",
        "tick".bright_blue(),
        summary.tick,
        summary.active_receivers,
        format_power(summary.claimed_power).as_str(),
        format_power(summary.delivered_power).as_str().bright_green(),
        format_power(summary.waste_heat).as_str().yellow(),
        if summary.failed_receivers > 0 {
            format!("  failed {}", summary.failed_receivers).bright_red().to_string()
        } else {
            String::new()
        }
    );
}

fn print_frame(frame: &TelemetryFrame, format: &str) -> CliResult {
    match format {
        "json" => println!("{}", frame.to_json()?),
        "compact" => {
            let delivered: f64 = frame.receivers.iter().map(|r| r.output.supplied_power).sum();
            println!(
                "{} {:>5}  receivers {:>3}  delivered {}",
                "tick".bright_blue(),
                frame.tick,
                frame.receivers.len(),
                format_power(delivered).as_str().bright_green()
            );
        }
        _ => {
            println!("{} {}", "📊 Tick".bright_blue().bold(), frame.tick.to_string().bright_white());
            print_receiver_table(&frame.receivers);
            for platform in &frame.platforms {
                let levels: Vec<String> = platform
                    .levels
                    .iter()
                    .filter(|l| l.capacity > 0.0)
                    .map(|l| format!("{} {:.0}%", l.kind.name(), l.fill_ratio * 100.0))
                    .collect();
                println!("  {} {}", platform.name.bright_white(), levels.join("  ").dimmed());
            }
        }
    }
    Ok(())
}

fn print_receiver_table(receivers: &[ReceiverSnapshot]) {
    println!(
        "  {:<4} {:<28} {:<8} {:>10} {:>10} {:>10} {:>3}",
        "id".dimmed(),
        "receiver".dimmed(),
        "state".dimmed(),
        "claimed".dimmed(),
        "supplied".dimmed(),
        "waste".dimmed(),
        "tx".dimmed()
    );
    for r in receivers {
        let state = match (r.enabled, r.thermal_mode) {
            (false, _) => "off".red(),
            (true, true) => "thermal".bright_yellow(),
            (true, false) => "electric".bright_green(),
        };
        println!(
            "  {:<4} {:<28} {:<8} {:>10} {:>10} {:>10} {:>3}",
            r.id.0,
            r.name,
            state,
            format_power(r.totals.claimed_power).as_str(),
            r.delivered_label,
            format_power(r.totals.waste_heat).as_str(),
            r.records.len()
        );
    }
}

use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use deskctl::config::DEFAULT_PORT;
use deskctl::protocol::{parse_preset, DeskButton};
use deskctl::state::DeskState;
use deskctl::{Desk, DeskConfig, DeskHandle, DeskService, DeskSnapshot, SerialTransport};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

const DEFAULT_SAVE_TIMEOUT_SECS: &str = "15";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let defaults = DeskConfig::default();
    let default_baud = defaults.baud_rate.to_string();

    let matches = App::new("deskctl")
        .version("0.1.0")
        .author("Desk Control Team")
        .about("Control a motorized height-adjustable desk over its serial link")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PATH")
                .help("Serial device of the desk bridge")
                .takes_value(true)
                .default_value(&defaults.port)
                .global(true),
        )
        .arg(
            Arg::with_name("baud")
                .short("b")
                .long("baud")
                .value_name("RATE")
                .help("Baud rate")
                .takes_value(true)
                .default_value(&default_baud)
                .global(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Baud rate must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every frame and command")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Stream desk state changes")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Monitor duration in seconds (default: until Ctrl+C)")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("press")
                .about("Toggle a button and keep it held until the desk stops or Ctrl+C")
                .arg(
                    Arg::with_name("button")
                        .help("Button to press")
                        .required(true)
                        .possible_values(&["p1", "p2", "p3", "up", "down", "m"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("save")
                .about("Store the current height as a preset")
                .arg(
                    Arg::with_name("preset")
                        .help("Preset slot")
                        .required(true)
                        .possible_values(&["p1", "p2", "p3"]),
                )
                .arg(
                    Arg::with_name("timeout")
                        .short("t")
                        .long("timeout")
                        .value_name("SECONDS")
                        .help("Give up waiting for confirmation after this long")
                        .takes_value(true)
                        .default_value(DEFAULT_SAVE_TIMEOUT_SECS),
                ),
        )
        .subcommand(SubCommand::with_name("console").about("Interactive console reading commands from stdin"))
        .subcommand(SubCommand::with_name("config").about("Print the effective configuration"))
        .get_matches();

    let verbose = matches.is_present("verbose");
    let format = matches.value_of("format").unwrap_or("table").to_string();
    init_tracing(verbose);

    let mut config = DeskConfig::default().with_port(matches.value_of("port").unwrap_or(DEFAULT_PORT));
    config.baud_rate = matches.value_of("baud").unwrap_or_default().parse()?;

    if let ("config", _) = matches.subcommand() {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
    let transport = SerialTransport::new(&config.port, config.baud_rate, events_tx);
    let desk = Desk::new(transport, &config);
    let (service, handle) = DeskService::new(desk, events_rx, &config);
    let service_task = tokio::spawn(service.run());

    let snapshots = handle.subscribe();
    handle.connect().await?;

    let result = match matches.subcommand() {
        ("monitor", Some(sub_matches)) => handle_monitor(sub_matches, snapshots, &format).await,
        ("press", Some(sub_matches)) => handle_press(sub_matches, &handle, snapshots, &format).await,
        ("save", Some(sub_matches)) => handle_save(sub_matches, &handle, snapshots, &format).await,
        ("console", _) => handle_console(&handle, snapshots, &format).await,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Watch the desk", "deskctl monitor".bright_cyan());
            println!("  {} Drive up until released", "deskctl press up".bright_cyan());
            println!("  {} Store the current height", "deskctl save p1".bright_cyan());
            Ok(())
        }
    };

    handle.shutdown().await?;
    service_task.await?;
    result
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "deskctl=debug" } else { "deskctl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_monitor(
    matches: &ArgMatches<'_>,
    mut snapshots: broadcast::Receiver<DeskSnapshot>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let duration = match matches.value_of("duration") {
        Some(secs) => Some(Duration::from_secs(secs.parse()?)),
        None => None,
    };
    println!("{}", "Monitoring desk (Press Ctrl+C to stop)...".bright_blue().bold());

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => print_snapshot(&snapshot, format)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("{}", format!("(skipped {} updates)", skipped).dimmed());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn handle_press(
    matches: &ArgMatches<'_>,
    handle: &DeskHandle,
    mut snapshots: broadcast::Receiver<DeskSnapshot>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let button: DeskButton = matches.value_of("button").unwrap_or_default().parse()?;
    wait_until_ready(&mut snapshots, format).await?;

    handle.toggle_button(button).await?;
    println!("{} {}", "Holding".bright_green(), button.to_string().bright_cyan());

    let mut moved = false;
    loop {
        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => {
                    print_snapshot(&snapshot, format)?;
                    moved |= snapshot.state == DeskState::Busy;
                    if moved && snapshot.state == DeskState::Ready && snapshot.active_button == DeskButton::None {
                        break;
                    }
                    if snapshot.state == DeskState::Error {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                // Release before leaving so the desk stops
                let current = handle.snapshot().await?;
                if current.active_button == button {
                    handle.toggle_button(button).await?;
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_save(
    matches: &ArgMatches<'_>,
    handle: &DeskHandle,
    mut snapshots: broadcast::Receiver<DeskSnapshot>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let preset = parse_preset(matches.value_of("preset").unwrap_or_default())?;
    let timeout = Duration::from_secs(matches.value_of("timeout").unwrap_or(DEFAULT_SAVE_TIMEOUT_SECS).parse()?);
    wait_until_ready(&mut snapshots, format).await?;

    handle.save_height(preset).await?;
    println!("{} {}", "Saving current height as".bright_green(), preset.to_string().bright_cyan());

    let confirmed = tokio::time::timeout(timeout, async {
        while let Ok(snapshot) = snapshots.recv().await {
            let _ = print_snapshot(&snapshot, format);
            if snapshot.desired_preset == DeskButton::None && snapshot.active_preset == preset {
                return true;
            }
            if snapshot.state == DeskState::Error {
                return false;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if confirmed {
        println!("{} {}", "✅".green(), "Preset stored".bright_green());
    } else {
        println!("{} {}", "❌".red(), "Controller did not confirm the preset".bright_red());
    }
    Ok(())
}

async fn handle_console(
    handle: &DeskHandle,
    mut snapshots: broadcast::Receiver<DeskSnapshot>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "Commands: up, down, p1, p2, p3, m, save <p1|p2|p3>, connect, disconnect, status, quit".dimmed());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (None, _) => {}
                    (Some("quit" | "exit"), _) => break,
                    (Some("connect"), _) => handle.connect().await?,
                    (Some("disconnect"), _) => handle.disconnect().await?,
                    (Some("status"), _) => print_snapshot(&handle.snapshot().await?, format)?,
                    (Some("save"), Some(name)) => match parse_preset(name) {
                        Ok(preset) => handle.save_height(preset).await?,
                        Err(e) => println!("{}", e.to_string().yellow()),
                    },
                    (Some(name), _) => match name.parse::<DeskButton>() {
                        Ok(DeskButton::None) | Err(_) => println!("{}", format!("Unknown command: {}", line.trim()).yellow()),
                        Ok(button) => handle.toggle_button(button).await?,
                    },
                }
            }
            snapshot = snapshots.recv() => {
                if let Ok(snapshot) = snapshot {
                    print_snapshot(&snapshot, format)?;
                }
            }
        }
    }
    Ok(())
}

async fn wait_until_ready(
    snapshots: &mut broadcast::Receiver<DeskSnapshot>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let snapshot = match snapshots.recv().await {
            Ok(snapshot) => snapshot,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        print_snapshot(&snapshot, format)?;
        match snapshot.state {
            DeskState::Ready | DeskState::Sleep => return Ok(()),
            DeskState::Error => return Err(format!("desk reported fault {}", snapshot.error_code).into()),
            DeskState::Invalid if snapshot.error_message.is_some() => {
                return Err(snapshot.error_message.unwrap_or_default().into());
            }
            _ => {}
        }
    }
}

fn print_snapshot(snapshot: &DeskSnapshot, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    let state = match snapshot.state {
        DeskState::Ready => snapshot.state.label().bright_green(),
        DeskState::Busy | DeskState::Config => snapshot.state.label().bright_yellow(),
        DeskState::Sleep | DeskState::Invalid => snapshot.state.label().dimmed(),
        DeskState::Error => snapshot.state.label().bright_red().bold(),
    };
    print!(
        "{:<8} {} {:>8}  {} {:<5} {} {:<4}",
        state,
        "height".bright_white(),
        snapshot.height_label(),
        "button".bright_white(),
        snapshot.active_button.to_string(),
        "preset".bright_white(),
        snapshot.active_preset.to_string()
    );
    if snapshot.desired_preset != DeskButton::None {
        print!(" {} {}", "saving".bright_white(), snapshot.desired_preset.to_string().bright_cyan());
    }
    if let Some(fault) = snapshot.fault() {
        print!(" {}", format!("fault {} ({})", snapshot.error_code, fault.description()).red());
    }
    if let Some(message) = &snapshot.error_message {
        print!(" {}", message.red());
    }
    println!();
    Ok(())
}

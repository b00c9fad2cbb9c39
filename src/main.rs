use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs;
use std::io::{self, BufRead};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

mod animation;
mod config;
mod connection;
mod controller;
mod protocol;

use config::Config;
use connection::DdpConnection;
use controller::{ControllerEvent, PixelController, UpdateRequest};

#[derive(Parser)]
#[command(name = "ddp_lights")]
#[command(about = "Drives a string of DDP pixels.\n\nReads update events as JSON lines on stdin and streams the rendered\nbuffer to the controller on a fixed cadence.", long_about = None)]
struct Cli {
    /// Path to configuration file (JSON)
    config: String,

    /// Log every outgoing DDP packet
    #[arg(long)]
    verbose: bool,
}

fn spawn_ticker(
    name: &str,
    period: Duration,
    events: Sender<ControllerEvent>,
    tick: fn() -> ControllerEvent,
) -> Result<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            thread::sleep(period);
            if events.send(tick()).is_err() {
                break;
            }
        })
        .with_context(|| format!("failed to spawn {name} thread"))?;
    Ok(())
}

/// The update boundary: one JSON update request per stdin line. Malformed
/// lines are dropped here, so the controller only ever sees parsed events.
/// EOF stops the run.
fn read_updates(events: Sender<ControllerEvent>) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("failed to read stdin: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<UpdateRequest>(&line) {
            Ok(update) => {
                if events.send(ControllerEvent::Update(update)).is_err() {
                    return;
                }
            }
            Err(err) => warn!("ignoring malformed update: {err}"),
        }
    }

    let _ = events.send(ControllerEvent::Stop);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config_data = fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config))?;
    let config: Config = serde_json::from_str(&config_data)
        .with_context(|| format!("failed to parse {}", cli.config))?;
    config.validate()?;

    let dst = connection::resolve_destination(&config.ddp)?;
    let conn = DdpConnection::new(config.max_chans_per_packet, cli.verbose)?;

    let (sender, receiver) = mpsc::channel();
    let mut pixel_controller = PixelController::new(conn, dst, &config, receiver);

    let controller_handle = thread::Builder::new()
        .name("controller".to_string())
        .spawn(move || pixel_controller.run())
        .context("failed to spawn controller thread")?;

    spawn_ticker(
        "anim-tick",
        Duration::from_millis(config.anim_interval_ms),
        sender.clone(),
        || ControllerEvent::AnimTick,
    )?;
    spawn_ticker(
        "output-tick",
        Duration::from_millis(config.output_interval_ms),
        sender.clone(),
        || ControllerEvent::OutputTick,
    )?;

    let ctrlc_sender = sender.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_sender.send(ControllerEvent::Stop);
    })
    .context("failed to set ctrl-c handler")?;

    let stdin_sender = sender.clone();
    thread::Builder::new()
        .name("updates".to_string())
        .spawn(move || read_updates(stdin_sender))
        .context("failed to spawn update reader thread")?;
    drop(sender);

    info!(
        "sending to {dst}, pixels {}..={}",
        config.min_pixel, config.max_pixel
    );

    if controller_handle.join().is_err() {
        bail!("controller thread panicked");
    }
    Ok(())
}

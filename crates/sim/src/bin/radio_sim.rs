//! radio link test simulation for LinkProbe

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use linkprobe_sim::scenarios::{self, LinkTestOutcome, ReportMode};
use linkprobe_sim::{SimFile, SimulationPresets};

/// Runs a transmitter and a receiver over a simulated link and reports
/// throughput and signal strength.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Medium preset: good, average, poor, extreme or all
    #[arg(short, long, default_value = "all")]
    preset: String,

    /// Seconds to run each preset
    #[arg(short, long, default_value_t = 15)]
    duration: u64,

    /// TOML file with [link] and [medium] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Both boards transmit
    #[arg(long)]
    duplex: bool,

    /// Print every report as a JSON line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => SimFile::load(path)?,
        None => SimFile::default(),
    };

    let runs: Vec<(String, _)> = match (&file.medium, cli.preset.as_str()) {
        (Some(medium), _) => vec![("custom".to_string(), medium.clone())],
        (None, "all") => SimulationPresets::names()
            .iter()
            .filter_map(|name| SimulationPresets::by_name(name).map(|m| (name.to_string(), m)))
            .collect(),
        (None, name) => match SimulationPresets::by_name(name) {
            Some(medium) => vec![(name.to_string(), medium)],
            None => bail!("unknown preset {:?}, expected one of {:?} or \"all\"", name, SimulationPresets::names()),
        },
    };

    let mode = if cli.json { ReportMode::Json } else { ReportMode::Progress };
    if !cli.json {
        println!("{}", "LinkProbe Link Simulation".bright_blue().bold());
        println!("{}", "=========================".bright_blue());
        println!("Payload: {:?} ({} bytes)", file.link.payload, file.link.payload.len());
        println!("Boards: {} <-> {}", file.link.allowlist.0, file.link.allowlist.1);
    }

    for (name, medium) in runs {
        if !cli.json {
            println!("{}", format!("\n>>> Testing: {} conditions", name).bright_green().bold());
            println!("Bandwidth: {} bps", medium.bandwidth_bps);
            println!("Packet Loss: {}%", (medium.packet_loss * 100.0) as u32);
            println!("Signal: {} dBm (sd {})", medium.rssi_mean, medium.rssi_std_dev);
        }

        let outcome = scenarios::run_link_test(
            &name,
            &file.link,
            medium,
            Duration::from_secs(cli.duration),
            cli.duplex,
            mode,
        )
        .await?;

        if cli.json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            print_summary(&outcome);
        }
    }

    if !cli.json {
        println!("\n{}", "All simulations complete!".bright_green().bold());
    }
    Ok(())
}

fn print_summary(outcome: &LinkTestOutcome) {
    let sender = &outcome.sender;
    let attempts = sender.successes + sender.failures;
    let delivery = if attempts > 0 {
        sender.successes as f64 * 100.0 / attempts as f64
    } else {
        0.0
    };
    println!("  - sends: {} ok, {} failed, {} refused ({:.1}% delivered)", sender.successes, sender.failures, sender.rejected, delivery);
    println!("  - bytes sent: {}", sender.total_bytes);
    println!("  - last rate: {:.2} KB/s", sender.rate_kbps);
    match outcome.receiver.signal {
        Some(signal) => println!("  - receiver signal: {} dBm over {} samples", signal, outcome.receiver.samples),
        None => println!("  - receiver signal: {}", "no frames heard".red()),
    }
    if let Some(signal) = sender.signal {
        println!("  - sender signal: {} dBm", signal);
    }
    println!(
        "  - receiver got {} payloads ({} bytes), last rate {:.2} KB/s",
        outcome.receiver.packets_received, outcome.receiver.bytes_received, outcome.receiver.rx_rate_kbps
    );
    println!("  - air: {} delivered, {} dropped", outcome.air.frames_delivered, outcome.air.frames_dropped);
    println!("{}", "-".repeat(50));
}

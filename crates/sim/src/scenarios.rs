//! Link test scenarios over the simulated medium

use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use linkprobe_radio::{
    AirStats, LinkConfig, LinkNode, MediumConfig, Role, SimulatedAir, StatsReport, StatsSnapshot,
};
use serde::Serialize;

/// How periodic reports reach the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Latest report as the progress bar message.
    Progress,
    /// One JSON object per report on stdout.
    Json,
    /// Log output only.
    Quiet,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkTestOutcome {
    pub preset: String,
    pub elapsed_ms: u64,
    pub sender: StatsSnapshot,
    pub receiver: StatsSnapshot,
    pub air: AirStats,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    preset: &'a str,
    node: &'static str,
    #[serde(flatten)]
    report: &'a StatsReport,
}

fn report_sink(
    mode: ReportMode,
    preset: String,
    node: &'static str,
    progress: ProgressBar,
) -> impl FnMut(&StatsReport) + Send + 'static {
    move |report: &StatsReport| match mode {
        ReportMode::Progress => progress.set_message(format!("{node}: {report}")),
        ReportMode::Json => {
            let line = JsonReport { preset: &preset, node, report };
            match serde_json::to_string(&line) {
                Ok(text) => println!("{text}"),
                Err(e) => log::warn!("could not encode report: {}", e),
            }
        }
        ReportMode::Quiet => {}
    }
}

/// Runs one transmitter (the first allowlist entry) against one receiver
/// (the second) for `duration`. With `duplex` both sides transmit.
pub async fn run_link_test(
    preset: &str,
    link: &LinkConfig,
    medium: MediumConfig,
    duration: Duration,
    duplex: bool,
    mode: ReportMode,
) -> Result<LinkTestOutcome> {
    let air = SimulatedAir::new(medium);
    let left = Arc::new(air.join(link.allowlist.0).await);
    let right = Arc::new(air.join(link.allowlist.1).await);

    let progress = match mode {
        ReportMode::Progress => {
            let bar = ProgressBar::new(duration.as_secs().max(1));
            bar.set_style(
                ProgressStyle::with_template("[{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len}s {msg}")
                    .context("building progress style")?
                    .progress_chars("=> "),
            );
            bar
        }
        _ => ProgressBar::hidden(),
    };

    let sender = LinkNode::new(left, link.clone())?.start(
        Role::Transmitter,
        report_sink(mode, preset.to_string(), "sender", progress.clone()),
    )?;
    let receiver_role = if duplex { Role::Transmitter } else { Role::Receiver };
    let receiver = match LinkNode::new(right, link.clone())?.start(
        receiver_role,
        report_sink(mode, preset.to_string(), "receiver", ProgressBar::hidden()),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            sender.shutdown();
            return Err(e.into());
        }
    };

    let started = tokio::time::Instant::now();
    let mut sender = sender;
    let mut receiver = receiver;
    let countdown = async {
        for _ in 0..duration.as_secs() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            progress.inc(1);
        }
        tokio::time::sleep(Duration::from_millis(duration.subsec_millis() as u64)).await;
    };

    let stopped = tokio::select! {
        _ = countdown => None,
        result = sender.wait() => Some(("sender", result)),
        result = receiver.wait() => Some(("receiver", result)),
    };
    progress.finish_and_clear();

    let elapsed = started.elapsed();
    let sender_stats = sender.shutdown();
    let receiver_stats = receiver.shutdown();

    if let Some((node, result)) = stopped {
        result.with_context(|| format!("{node} transmit loop stopped"))?;
    }

    Ok(LinkTestOutcome {
        preset: preset.to_string(),
        elapsed_ms: elapsed.as_millis() as u64,
        sender: sender_stats,
        receiver: receiver_stats,
        air: air.get_stats(),
    })
}

//! simulation tools for LinkProbe

pub mod scenarios;

use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use linkprobe_radio::{LinkConfig, MediumConfig};
use serde::{Deserialize, Serialize};

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn good_conditions() -> MediumConfig {
        MediumConfig {
            bandwidth_bps: 1_000_000,
            packet_loss: 0.01,
            latency: Duration::from_millis(1),
            latency_jitter: Duration::from_millis(1),
            rssi_mean: -45.0,
            rssi_std_dev: 2.0,
            ..Default::default()
        }
    }

    pub fn average_conditions() -> MediumConfig {
        MediumConfig {
            bandwidth_bps: 1_000_000,
            packet_loss: 0.10,
            latency: Duration::from_millis(2),
            latency_jitter: Duration::from_millis(1),
            rssi_mean: -70.0,
            rssi_std_dev: 4.0,
            ..Default::default()
        }
    }

    pub fn poor_conditions() -> MediumConfig {
        MediumConfig {
            bandwidth_bps: 250_000,
            packet_loss: 0.35,
            latency: Duration::from_millis(5),
            latency_jitter: Duration::from_millis(3),
            rssi_mean: -88.0,
            rssi_std_dev: 6.0,
            ..Default::default()
        }
    }

    pub fn extreme_conditions() -> MediumConfig {
        MediumConfig {
            bandwidth_bps: 50_000,
            packet_loss: 0.70,
            latency: Duration::from_millis(20),
            latency_jitter: Duration::from_millis(10),
            rssi_mean: -97.0,
            rssi_std_dev: 8.0,
            ..Default::default()
        }
    }

    pub fn by_name(name: &str) -> Option<MediumConfig> {
        match name {
            "good" => Some(Self::good_conditions()),
            "average" => Some(Self::average_conditions()),
            "poor" => Some(Self::poor_conditions()),
            "extreme" => Some(Self::extreme_conditions()),
            _ => None,
        }
    }

    pub fn names() -> [&'static str; 4] {
        ["good", "average", "poor", "extreme"]
    }
}

/// Simulator settings file: a `[link]` table for both nodes and an optional
/// `[medium]` table overriding the preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimFile {
    pub link: LinkConfig,
    pub medium: Option<MediumConfig>,
}

impl SimFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: SimFile = toml::from_str(text)?;
        file.link.validate()?;
        Ok(file)
    }
}

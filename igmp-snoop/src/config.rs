//! YAML configuration parsing and validation.
//!
//! Defines the configuration model for igmp-snoop and validates it at load time.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aya::programs::XdpFlags;
use serde::Deserialize;

use igmp_snoop_common::MAX_SUBSCRIBERS;

// ---------------------------------------------------------------------------
// Top-Level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Interface facing the multicast source (e.g., "eth0").
    pub upstream: String,

    /// Subscriber-facing interfaces (e.g., veth pairs into containers).
    pub downstream: Vec<String>,

    /// How the XDP programs are attached.
    #[serde(default)]
    pub xdp_mode: XdpMode,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum XdpMode {
    /// Let the kernel pick (native if the driver supports it).
    Default,
    /// Generic XDP. Works on every interface, including veth.
    #[default]
    Skb,
    /// Native driver mode.
    Drv,
    /// Hardware offload.
    Hw,
}

impl XdpMode {
    pub fn flags(self) -> XdpFlags {
        match self {
            XdpMode::Default => XdpFlags::empty(),
            XdpMode::Skb => XdpFlags::SKB_MODE,
            XdpMode::Drv => XdpFlags::DRV_MODE,
            XdpMode::Hw => XdpFlags::HW_MODE,
        }
    }
}

// ---------------------------------------------------------------------------
// Control Loop Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    /// Upper bound on one event-channel poll; also bounds shutdown latency.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Keep the kernel forwarding table in sync with observed memberships.
    /// When disabled events are only logged.
    #[serde(default = "default_true")]
    pub manage_forwarding: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            manage_forwarding: true,
        }
    }
}

impl ControlConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Metrics Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}

// ---------------------------------------------------------------------------
// Loading & Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load config from a YAML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

        Self::parse(&contents)
    }

    /// Parse and validate a YAML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(contents).with_context(|| "parsing YAML config")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<()> {
        if self.upstream.trim().is_empty() {
            bail!("'upstream' interface must not be empty");
        }

        if self.downstream.is_empty() {
            bail!("at least one downstream interface is required");
        }

        if self.downstream.len() > MAX_SUBSCRIBERS as usize {
            bail!(
                "{} downstream interfaces exceeds forwarding table capacity ({})",
                self.downstream.len(),
                MAX_SUBSCRIBERS
            );
        }

        let mut seen = HashSet::new();
        for (i, iface) in self.downstream.iter().enumerate() {
            if iface.trim().is_empty() {
                bail!("downstream[{}]: interface name must not be empty", i);
            }
            if !seen.insert(iface.as_str()) {
                bail!("downstream[{}]: '{}' listed more than once", i, iface);
            }
            if *iface == self.upstream {
                bail!(
                    "downstream[{}]: '{}' is also the upstream interface",
                    i,
                    iface
                );
            }
        }

        if self.control.poll_timeout_ms == 0 || self.control.poll_timeout_ms > 10_000 {
            bail!(
                "control.poll_timeout_ms must be 1..10000, got {}",
                self.control.poll_timeout_ms
            );
        }

        if !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/', got '{}'", self.metrics.path);
        }

        Ok(())
    }
}

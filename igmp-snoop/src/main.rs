//! igmp-snoop: XDP-based IGMP snooping for multicast fan-out.
//!
//! Two XDP programs share a pair of maps:
//!   - xdp_downstream: consumes IGMP membership reports on subscriber-facing
//!     links and publishes Join/Leave events on a ring buffer
//!   - xdp_upstream:   broadcasts multicast data from the upstream link to
//!     every interface in the forwarding table
//!
//! This daemon loads and attaches both programs, then runs the control loop
//! that turns membership events into forwarding table updates.

mod channel;
mod config;
mod control;
mod ebpf_manager;
#[cfg(test)]
mod event_ring;
mod fwd_table;
mod membership;
mod metrics;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use channel::RingBufSource;
use config::Config;
use control::{ControlLoop, ControlStats};
use ebpf_manager::EbpfManager;
use fwd_table::ForwardingTable;
use membership::MembershipSnapshot;
use metrics::MetricsState;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "igmp-snoop",
    about = "IGMP snooping and multicast fan-out with XDP",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to the compiled eBPF program ELF binary.
    #[arg(long, default_value = "igmp-snoop-ebpf")]
    ebpf_program: PathBuf,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "igmp-snoop failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "starting igmp-snoop"
    );

    // Load and validate config
    let config = Config::load(&cli.config).context("loading configuration")?;
    info!(
        upstream = %config.upstream,
        downstream = config.downstream.len(),
        mode = ?config.xdp_mode,
        "configuration loaded"
    );

    // --- Load and attach eBPF programs ---
    ebpf_manager::bump_memlock_rlimit()?;

    let ebpf_bytes = std::fs::read(&cli.ebpf_program).with_context(|| {
        format!(
            "reading eBPF program from {}. Build it with: cargo xtask build-ebpf",
            cli.ebpf_program.display()
        )
    })?;

    let mut mgr = EbpfManager::load(&ebpf_bytes)?;
    mgr.attach(&config).context("attaching XDP programs")?;

    let stats = Arc::new(ControlStats::default());
    let snapshot = Arc::new(ArcSwap::from_pointee(MembershipSnapshot::default()));

    let mut source = RingBufSource::new(mgr.take_events()?, stats.clone());
    let table = if config.control.manage_forwarding {
        Some(ForwardingTable::new(mgr.take_forwarding()?))
    } else {
        warn!("forwarding management disabled, membership events are only logged");
        None
    };

    // --- Start control loop ---
    let shutdown = Arc::new(AtomicBool::new(false));
    let poll_timeout = config.control.poll_timeout();

    let control_handle = {
        let shutdown = shutdown.clone();
        let mut control = ControlLoop::new(table, stats.clone(), snapshot.clone());
        std::thread::Builder::new()
            .name("igmp-control".to_string())
            .spawn(move || control.run(&mut source, poll_timeout, &shutdown))
            .context("spawning control loop thread")?
    };

    // --- Start metrics server ---
    let metrics_handle = if config.metrics.enabled {
        let state = MetricsState {
            stats: stats.clone(),
            snapshot: snapshot.clone(),
        };

        let metrics_config = config.metrics;
        Some(tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(&metrics_config, state).await {
                error!(error = %e, "metrics server error");
            }
        }))
    } else {
        None
    };

    // --- Wait for shutdown signal ---
    info!("igmp-snoop is running. Press Ctrl+C to stop.");

    let stopped_early = tokio::select! {
        _ = shutdown_signal() => false,
        _ = wait_for_exit(&control_handle) => true,
    };

    if stopped_early {
        warn!("control loop exited before shutdown was requested");
    } else {
        info!("shutdown signal received, cleaning up...");
    }

    // --- Graceful shutdown ---
    shutdown.store(true, Ordering::Relaxed);

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    let control_result = tokio::task::spawn_blocking(move || control_handle.join())
        .await
        .context("joining control loop")?
        .map_err(|_| anyhow!("control loop thread panicked"))?;

    if let Err(e) = mgr.detach() {
        warn!(error = %e, "error detaching eBPF programs");
    }

    control_result?;
    info!("igmp-snoop stopped");
    Ok(())
}

/// Resolves once the control thread has finished.
async fn wait_for_exit(handle: &std::thread::JoinHandle<Result<()>>) {
    while !handle.is_finished() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

// ---------------------------------------------------------------------------
// Signal Handling
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

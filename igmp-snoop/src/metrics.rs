//! Prometheus metrics endpoint.
//!
//! Exposes control-loop counters and the current membership view in
//! Prometheus exposition format via a lightweight HTTP server.

use std::fmt::Write as _;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use tracing::info;

use crate::config::MetricsConfig;
use crate::control::ControlStats;
use crate::membership::MembershipSnapshot;

// ---------------------------------------------------------------------------
// Metrics State
// ---------------------------------------------------------------------------

/// Shared state for the metrics endpoint.
#[derive(Clone)]
pub struct MetricsState {
    /// Counters updated by the control loop.
    pub stats: Arc<ControlStats>,
    /// Latest membership view published by the control loop.
    pub snapshot: Arc<ArcSwap<MembershipSnapshot>>,
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start the Prometheus metrics HTTP server.
pub async fn serve_metrics(config: &MetricsConfig, state: MetricsState) -> Result<()> {
    let app = Router::new()
        .route(&config.path, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding metrics server to {}", config.bind))?;

    info!(bind = %config.bind, path = %config.path, "metrics server started");

    axum::serve(listener, app)
        .await
        .context("metrics server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Metrics Handler
// ---------------------------------------------------------------------------

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        render(&state),
    )
}

fn render(state: &MetricsState) -> String {
    let mut output = String::with_capacity(1024);
    let stats = &state.stats;
    let snapshot = state.snapshot.load();

    write_header(&mut output, "igmp_snoop_events_total", "Membership events received", "counter");
    write_metric(&mut output, "igmp_snoop_events_total", Some(("kind", "join")), stats.joins.load(Relaxed));
    write_metric(&mut output, "igmp_snoop_events_total", Some(("kind", "leave")), stats.leaves.load(Relaxed));

    write_header(
        &mut output,
        "igmp_snoop_events_malformed_total",
        "Event records skipped as malformed",
        "counter",
    );
    write_metric(&mut output, "igmp_snoop_events_malformed_total", None, stats.malformed.load(Relaxed));

    write_header(
        &mut output,
        "igmp_snoop_forwarding_errors_total",
        "Failed forwarding table updates",
        "counter",
    );
    write_metric(&mut output, "igmp_snoop_forwarding_errors_total", None, stats.table_errors.load(Relaxed));

    write_header(
        &mut output,
        "igmp_snoop_forwarding_interfaces",
        "Interfaces in the kernel forwarding table",
        "gauge",
    );
    write_metric(
        &mut output,
        "igmp_snoop_forwarding_interfaces",
        None,
        stats.forwarding_interfaces.load(Relaxed),
    );

    write_header(
        &mut output,
        "igmp_snoop_subscribed_interfaces",
        "Interfaces with at least one joined group",
        "gauge",
    );
    write_metric(
        &mut output,
        "igmp_snoop_subscribed_interfaces",
        None,
        snapshot.interfaces.len() as u64,
    );

    write_header(&mut output, "igmp_snoop_groups", "Distinct groups with members", "gauge");
    write_metric(&mut output, "igmp_snoop_groups", None, snapshot.groups.len() as u64);

    write_header(&mut output, "igmp_snoop_group_members", "Interfaces joined to each group", "gauge");
    for (group, members) in &snapshot.groups {
        let group = group.to_string();
        write_metric(
            &mut output,
            "igmp_snoop_group_members",
            Some(("group", &group)),
            members.len() as u64,
        );
    }

    output
}

fn write_header(output: &mut String, metric: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP {} {}", metric, help);
    let _ = writeln!(output, "# TYPE {} {}", metric, kind);
}

fn write_metric(output: &mut String, metric: &str, label: Option<(&str, &str)>, value: u64) {
    let _ = match label {
        Some((key, val)) => writeln!(output, "{}{{{}=\"{}\"}} {}", metric, key, val, value),
        None => writeln!(output, "{} {}", metric, value),
    };
}

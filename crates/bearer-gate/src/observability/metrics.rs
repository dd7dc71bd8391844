//! Prometheus metrics for bearer-gate

use std::sync::OnceLock;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Result;
use crate::error::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

const METRIC_UPTIME: &str = "bearer_gate_uptime_seconds";
const METRIC_INFO: &str = "bearer_gate_info";
const METRIC_AUTHENTICATIONS: &str = "bearer_gate_authentications_total";
const METRIC_JWKS_REFRESHES: &str = "bearer_gate_jwks_refreshes_total";
const METRIC_JWKS_KEYS: &str = "bearer_gate_jwks_keys";

/// Initialize Prometheus metrics recorder.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install metrics recorder: {e}")))?;

    PROMETHEUS_HANDLE.set(handle).ok();
    START_TIME.set(Instant::now()).ok();

    register_metrics();
    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

fn register_metrics() {
    describe_gauge!(METRIC_UPTIME, "Gate uptime in seconds");
    describe_gauge!(METRIC_INFO, "Gate information (always 1)");
    describe_counter!(
        METRIC_AUTHENTICATIONS,
        "Authentication outcomes by result kind"
    );
    describe_counter!(METRIC_JWKS_REFRESHES, "Signing key set refresh attempts");
    describe_gauge!(METRIC_JWKS_KEYS, "Signing keys in the current snapshot");

    gauge!(
        METRIC_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
    )
    .set(1.0);
}

/// Render metrics in Prometheus text format.
#[must_use]
pub fn render_metrics() -> String {
    if let Some(start) = START_TIME.get() {
        gauge!(METRIC_UPTIME).set(start.elapsed().as_secs_f64());
    }

    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record an authentication outcome (`success` or an error kind).
pub fn record_authentication(outcome: &'static str) {
    counter!(METRIC_AUTHENTICATIONS, "outcome" => outcome).increment(1);
}

/// Record a key set refresh attempt.
pub fn record_jwks_refresh(success: bool, keys: usize) {
    let status = if success { "success" } else { "error" };
    counter!(METRIC_JWKS_REFRESHES, "status" => status).increment(1);
    if success {
        gauge!(METRIC_JWKS_KEYS).set(keys as f64);
    }
}

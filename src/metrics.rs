//! Metrics wiring for the interception core.
//!
//! The engine emits `arp.*` counters at every send and receive site;
//! this module describes those families and, when enabled, exposes them
//! through a Prometheus scrape endpoint for the layer above to watch
//! poisoning throughput and capture health.

use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::Result;

/// Initialize the metrics system based on configuration.
///
/// Starts the scrape endpoint and registers descriptions for the core's
/// counter families. When metrics are disabled this is a no-op: the
/// `metrics` crate turns unregistered counters into no-ops, so the
/// engine's instrumentation costs nothing.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new().with_http_listener(config.listen);
    builder.install().map_err(crate::error::Error::Metrics)?;

    describe_families();
    Ok(())
}

/// Attach help text to the counter families the engine increments, so
/// they scrape with descriptions even before the first frame moves.
fn describe_families() {
    describe_counter!(
        "arp.frames_sent",
        Unit::Count,
        "ARP frames transmitted, labeled by operation (request/reply/spoof)"
    );
    describe_counter!(
        "arp.send_errors",
        Unit::Count,
        "ARP transmissions rejected by or attempted without a capture handle"
    );
    describe_counter!(
        "arp.frames_received",
        Unit::Count,
        "frames drained from the capture handle"
    );
    describe_counter!(
        "arp.receive_errors",
        Unit::Count,
        "capture reads that failed"
    );
}

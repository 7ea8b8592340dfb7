//! Prometheus metrics for the router.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Counter of requests handled, per group and action.
pub const REQUESTS_TOTAL: &str = "ruledforward_requests_total";
/// Counter of requests that matched no group and were passed through.
pub const NO_MATCH_TOTAL: &str = "ruledforward_no_match_total";
/// Counter of forward requests for which all upstreams failed, per group.
pub const FORWARD_UPSTREAM_FAIL_TOTAL: &str = "ruledforward_forward_upstream_fail_total";

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {e}"))?;

    Ok(())
}

/// Record a request handled by a group.
#[inline]
pub fn record_request(group: &str, action: &'static str) {
    counter!(REQUESTS_TOTAL, "group" => group.to_owned(), "action" => action).increment(1);
}

/// Record a request that matched no group.
#[inline]
pub fn record_no_match() {
    counter!(NO_MATCH_TOTAL).increment(1);
}

/// Record a forward request for which every upstream failed.
#[inline]
pub fn record_upstream_fail(group: &str) {
    counter!(FORWARD_UPSTREAM_FAIL_TOTAL, "group" => group.to_owned()).increment(1);
}

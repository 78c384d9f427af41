// Prometheus metrics definitions for the skirmish backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Rooms currently in the registry.
    pub static ref ACTIVE_ROOMS: IntGauge =
        IntGauge::new("skirmish_active_rooms", "Rooms currently registered").unwrap();

    /// Rooms currently simulating (status playing).
    pub static ref RUNNING_MATCHES: IntGauge =
        IntGauge::new("skirmish_running_matches", "Rooms currently simulating").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("skirmish_connected_websockets", "Live WebSocket connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total engine ticks processed across all rooms.
    pub static ref TICKS_TOTAL: IntCounter =
        IntCounter::new("skirmish_ticks_total", "Engine ticks processed").unwrap();

    /// Actions accepted into engines.
    pub static ref ACTIONS_ACCEPTED_TOTAL: IntCounter = IntCounter::new(
        "skirmish_actions_accepted_total",
        "Actions accepted into engines",
    )
    .unwrap();

    /// Actions rejected by the validator, by gate.
    pub static ref ACTIONS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_actions_rejected_total", "Actions rejected"),
        &["gate"],
    )
    .unwrap();

    /// Anti-cheat observations, by severity.
    pub static ref CHEAT_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_cheat_events_total", "Anti-cheat observations"),
        &["severity"],
    )
    .unwrap();

    /// Matches decided, by outcome (win, draw, forfeit).
    pub static ref MATCHES_DECIDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_matches_decided_total", "Matches decided"),
        &["outcome"],
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Engine tick duration in milliseconds.
    pub static ref TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("skirmish_tick_duration_ms", "Engine tick duration (ms)")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 16.0]),
    )
    .unwrap();

    /// Snapshot build+serialize duration in milliseconds.
    pub static ref SNAPSHOT_BUILD_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("skirmish_snapshot_build_ms", "Snapshot build duration (ms)")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("skirmish_api_request_duration_seconds", "API request duration"),
        &["endpoint"],
    )
    .unwrap();
}

/// Register every metric with the shared registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_ROOMS.clone()),
        Box::new(RUNNING_MATCHES.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(TICKS_TOTAL.clone()),
        Box::new(ACTIONS_ACCEPTED_TOTAL.clone()),
        Box::new(ACTIONS_REJECTED_TOTAL.clone()),
        Box::new(CHEAT_EVENTS_TOTAL.clone()),
        Box::new(MATCHES_DECIDED_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(TICK_DURATION_MS.clone()),
        Box::new(SNAPSHOT_BUILD_MS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];
    for collector in collectors {
        // Ignore AlreadyReg when tests re-register.
        let _ = REGISTRY.register(collector);
    }
}

/// Encode the registry in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Collapse path parameters so metric cardinality stays bounded:
/// `/rooms/3f2a.../join` becomes `/rooms/{id}/join`.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 && parts.last().map(|s| s == "rooms").unwrap_or(false) && !segment.is_empty() {
            parts.push("{id}".to_string());
        } else {
            parts.push(segment.to_string());
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        register_metrics();
        TICKS_TOTAL.inc();
        let body = gather_metrics();
        assert!(body.contains("skirmish_ticks_total"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/rooms"), "/rooms");
        assert_eq!(normalize_path("/rooms/abc-123/join"), "/rooms/{id}/join");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_register_twice_is_safe() {
        register_metrics();
        register_metrics();
    }
}

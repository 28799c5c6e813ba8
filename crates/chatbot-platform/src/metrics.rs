use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();
static SUMMARIZATIONS: OnceLock<IntCounterVec> = OnceLock::new();
static PERSISTENCE_FAILURES: OnceLock<IntCounter> = OnceLock::new();

/// Registers every collector. Until this runs the recording helpers are no-ops.
pub fn init_metrics() -> anyhow::Result<()> {
    let req_counter = match REQ_COUNTER.get() {
        Some(counter) => counter,
        None => {
            let counter = IntCounterVec::new(
                prometheus::opts!("requests_total", "Total requests per route"),
                &["route", "status"],
            )?;
            REQ_COUNTER.get_or_init(|| counter)
        }
    };

    let active_sessions = match ACTIVE_SESSIONS.get() {
        Some(gauge) => gauge,
        None => {
            let gauge = IntGauge::new("active_sessions", "Chat engines held in the session cache")?;
            ACTIVE_SESSIONS.get_or_init(|| gauge)
        }
    };

    let summarizations = match SUMMARIZATIONS.get() {
        Some(counter) => counter,
        None => {
            let counter = IntCounterVec::new(
                prometheus::opts!("summarization_passes_total", "Summarization passes by outcome"),
                &["outcome"],
            )?;
            SUMMARIZATIONS.get_or_init(|| counter)
        }
    };

    let persistence_failures = match PERSISTENCE_FAILURES.get() {
        Some(counter) => counter,
        None => {
            let counter = IntCounter::new(
                "persistence_failures_total",
                "Background message writes that failed",
            )?;
            PERSISTENCE_FAILURES.get_or_init(|| counter)
        }
    };

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(active_sessions.clone())).ok();
    REGISTRY.register(Box::new(summarizations.clone())).ok();
    REGISTRY.register(Box::new(persistence_failures.clone())).ok();
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_sessions() {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.inc();
    }
}

pub fn dec_sessions() {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.dec();
    }
}

/// `outcome` is one of `success`, `failure`, `timeout` or `discarded`.
pub fn inc_summarization(outcome: &str) {
    if let Some(counter) = SUMMARIZATIONS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_persistence_failures() {
    if let Some(counter) = PERSISTENCE_FAILURES.get() {
        counter.inc();
    }
}

/// Text exposition of the registry.
pub fn gather() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(feature = "cli")]
pub async fn get_metrics() -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;

    match gather() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            e.to_string().into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_metrics_are_exported() {
        init_metrics().unwrap();
        init_metrics().unwrap();

        inc_request("/api/v1/sessions", "200");
        inc_summarization("success");
        inc_persistence_failures();

        let text = String::from_utf8(gather().unwrap()).unwrap();
        assert!(text.contains("requests_total"));
        assert!(text.contains("summarization_passes_total{outcome=\"success\"}"));
        assert!(text.contains("persistence_failures_total"));
    }
}

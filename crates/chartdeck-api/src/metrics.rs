//! Prometheus text exposition for the portal's internal counters.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use chartdeck_insight::{CacheStats, canonicalize_failures};

use crate::ApiState;

/// Point-in-time view of the process counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessMetrics {
    pub completions_processed: u64,
    pub completions_failed: u64,
    pub canonicalize_failures: u64,
    pub decrypt_failures: u64,
    pub image_cache: CacheStats,
    pub tag_date_cache: CacheStats,
}

impl ProcessMetrics {
    pub fn collect(state: &ApiState) -> Self {
        let (image_cache, tag_date_cache) = state.detector.cache_stats();
        Self {
            completions_processed: state.tracker.processed(),
            completions_failed: state.tracker.failed(),
            canonicalize_failures: canonicalize_failures(),
            decrypt_failures: chartdeck_vars::resolver::decrypt_failures(),
            image_cache,
            tag_date_cache,
        }
    }
}

fn push_metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} {kind}\n"));
    out.push_str(&format!("{name} {value}\n"));
}

fn push_cache(out: &mut String, caches: &[(&str, &CacheStats)]) {
    let families: [(&str, &str, &str, fn(&CacheStats) -> u64); 4] = [
        ("chartdeck_cache_entries", "gauge", "Entries currently cached.", |s: &CacheStats| s.entries as u64),
        ("chartdeck_cache_hits_total", "counter", "Cache lookups served from memory.", |s: &CacheStats| s.hits),
        ("chartdeck_cache_misses_total", "counter", "Cache lookups that went to the source.", |s: &CacheStats| s.misses),
        ("chartdeck_cache_evictions_total", "counter", "Entries evicted by expiry or capacity.", |s: &CacheStats| s.evictions),
    ];
    for (name, kind, help, value) in families {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} {kind}\n"));
        for (cache, stats) in caches {
            out.push_str(&format!("{name}{{cache=\"{cache}\"}} {}\n", value(stats)));
        }
    }
}

/// Render a snapshot into Prometheus text format.
pub fn render_prometheus(metrics: &ProcessMetrics) -> String {
    let mut out = String::new();

    push_metric(
        &mut out,
        "chartdeck_completions_processed_total",
        "counter",
        "Completion messages handled by the tracker.",
        metrics.completions_processed,
    );
    push_metric(
        &mut out,
        "chartdeck_completions_failed_total",
        "counter",
        "Completion messages the tracker could not apply.",
        metrics.completions_failed,
    );
    push_metric(
        &mut out,
        "chartdeck_canonicalize_failures_total",
        "counter",
        "Image tags that did not canonicalize to a number.",
        metrics.canonicalize_failures,
    );
    push_metric(
        &mut out,
        "chartdeck_decrypt_failures_total",
        "counter",
        "Secret variables that could not be decrypted.",
        metrics.decrypt_failures,
    );
    push_cache(
        &mut out,
        &[("image", &metrics.image_cache), ("tag_date", &metrics.tag_date_cache)],
    );

    out
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = render_prometheus(&ProcessMetrics::collect(&state));
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ProcessMetrics {
        ProcessMetrics {
            completions_processed: 12,
            completions_failed: 1,
            canonicalize_failures: 3,
            decrypt_failures: 0,
            image_cache: CacheStats {
                entries: 2,
                hits: 7,
                misses: 2,
                evictions: 0,
            },
            tag_date_cache: CacheStats {
                entries: 40,
                hits: 100,
                misses: 40,
                evictions: 5,
            },
        }
    }

    #[test]
    fn render_counters() {
        let output = render_prometheus(&snapshot());
        assert!(output.contains("# TYPE chartdeck_completions_processed_total counter"));
        assert!(output.contains("chartdeck_completions_processed_total 12\n"));
        assert!(output.contains("chartdeck_completions_failed_total 1\n"));
        assert!(output.contains("chartdeck_canonicalize_failures_total 3\n"));
        assert!(output.contains("chartdeck_decrypt_failures_total 0\n"));
    }

    #[test]
    fn render_cache_families_with_labels() {
        let output = render_prometheus(&snapshot());
        assert!(output.contains("# TYPE chartdeck_cache_entries gauge"));
        assert!(output.contains("chartdeck_cache_entries{cache=\"image\"} 2"));
        assert!(output.contains("chartdeck_cache_hits_total{cache=\"tag_date\"} 100"));
        assert!(output.contains("chartdeck_cache_evictions_total{cache=\"tag_date\"} 5"));
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let harness = crate::testing::test_harness();
        let resp = prometheus_metrics(State(harness.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[test]
    fn every_sample_has_help_and_type() {
        let output = render_prometheus(&ProcessMetrics::default());
        for line in output.lines().filter(|l| !l.starts_with('#')) {
            let name = line.split(['{', ' ']).next().unwrap();
            assert!(output.contains(&format!("# HELP {name} ")), "missing HELP for {name}");
            assert!(output.contains(&format!("# TYPE {name} ")), "missing TYPE for {name}");
        }
    }
}

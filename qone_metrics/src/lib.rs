//! Process-wide Prometheus metrics for the Q1 engine.
//!
//! Counters are bumped once per query, morsel or worker merge, never per row.
use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, TextEncoder};

pub static QUERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("qone_queries_total", "Total queries completed").unwrap()
});
pub static MORSELS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("qone_morsels_total", "Morsels processed by path", &["path"]).unwrap()
});
pub static ROWS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("qone_rows_total", "Rows scanned by path", &["path"]).unwrap()
});
pub static MERGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("qone_merges_total", "Worker shards merged into the global table").unwrap()
});
pub static QUERY_LATENCY_SECS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("qone_query_latency_seconds", "Query latency in seconds")
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]);
    prometheus::register_histogram!(opts).unwrap()
});
pub static STAGE_TUPLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("qone_stage_tuples_total", "Tuples seen by a profiled kernel stage", &["stage"]).unwrap()
});
pub static STAGE_CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("qone_stage_cycles_total", "Cycles spent in a profiled kernel stage", &["stage"]).unwrap()
});

/// Morsel path label: processed by the full kernel.
pub const PATH_KERNEL: &str = "kernel";
/// Morsel path label: routed through the filter push-down.
pub const PATH_PUSHDOWN: &str = "pushdown";

/// Count one processed morsel of `rows` rows on `path`.
pub fn record_morsel(path: &str, rows: usize) {
    MORSELS_TOTAL.with_label_values(&[path]).inc();
    ROWS_TOTAL.with_label_values(&[path]).inc_by(rows as u64);
}

/// Add profiled stage totals.
pub fn record_stage(stage: &str, tuples: u64, cycles: u64) {
    STAGE_TUPLES_TOTAL.with_label_values(&[stage]).inc_by(tuples);
    STAGE_CYCLES_TOTAL.with_label_values(&[stage]).inc_by(cycles);
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_recorded_series() {
        record_morsel(PATH_KERNEL, 128);
        record_stage("select", 10, 40);
        QUERIES_TOTAL.inc();
        let text = render().unwrap();
        assert!(text.contains("qone_morsels_total{path=\"kernel\"}"));
        assert!(text.contains("qone_stage_cycles_total{stage=\"select\"}"));
        assert!(text.contains("qone_queries_total"));
    }
}

//! Human-readable and JSON rendering of run reports.

use qone_exec::profile::StageReport;

use crate::driver::{RunReport, VerifyOutcome};

/// Plain-text summary: settings, timings, batch counters, result table.
pub fn render(report: &RunReport) -> String {
    let k = &report.kernel;
    let s = &report.stats;
    let mut out = format!(
        "rows={} workers={} flavour={:?} layout={:?} simd={:?} vector_size={}\n",
        report.rows, report.workers, k.flavour, k.layout, k.simd, k.vector_size
    );
    out.push_str(&format!(
        "repetitions={} best={:.3}ms mean={:.3}ms\n",
        report.timings_ms.len(),
        report.best_ms(),
        report.mean_ms()
    ));
    out.push_str(&format!(
        "batches={} empty={} sparse={} dense={} full={} selected={} pushdown_rows={}\n",
        s.batches, s.empty, s.sparse, s.dense, s.full, s.selected, report.pushdown_rows
    ));
    out.push('\n');
    out.push_str(&report.result.to_string());
    out
}

/// Per-stage table.
pub fn render_stages(stages: &[StageReport]) -> String {
    let mut out = format!("{:<16} {:>14} {:>16} {:>10}\n", "stage", "tuples", "cycles", "cyc/tuple");
    for s in stages {
        out.push_str(&format!("{:<16} {:>14} {:>16} {:>10.3}\n", s.stage, s.tuples, s.cycles, s.cycles_per_tuple));
    }
    out
}

/// One line per verified variant.
pub fn render_verify(outcomes: &[VerifyOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| {
            let verdict = if o.matches { "ok" } else { "MISMATCH" };
            format!(
                "{:<16} {:<4} {:<18} {}\n",
                format!("{:?}", o.flavour),
                format!("{:?}", o.layout),
                format!("{:?}", o.simd),
                verdict
            )
        })
        .collect()
}

/// Pretty JSON.
pub fn to_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qone_exec::{AggrFlavour, AggrRow, KernelConfig, KernelStats, Layout, QueryResult, ResultRow, SimdFlavour};

    fn report() -> RunReport {
        RunReport {
            rows: 10,
            workers: 2,
            kernel: KernelConfig::default(),
            timings_ms: vec![2.0, 4.0],
            pushdown_rows: 0,
            stats: KernelStats { batches: 1, selected: 3, ..KernelStats::default() },
            stages: Vec::new(),
            result: QueryResult::new(vec![ResultRow::new(
                b'A',
                b'F',
                &AggrRow { sum_quantity: 6, sum_base_price: 300, sum_disc_price: 1i128 << 70, count: 3, ..AggrRow::default() },
            )]),
        }
    }

    #[test]
    fn text_report() {
        let text = render(&report());
        assert!(text.contains("best=2.000ms mean=3.000ms"));
        assert!(text.contains("selected=3"));
        assert!(text.contains("A  F"));
    }

    #[test]
    fn json_keeps_wide_sums_exact() {
        let json = to_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["result"]["rows"][0]["count"], 3);
        assert!(json.contains(&(1i128 << 70).to_string()));
        assert_eq!(value["kernel"]["flavour"], "one-step");
    }

    #[test]
    fn verify_lines() {
        let outcomes = [
            VerifyOutcome { flavour: AggrFlavour::Shuffle, layout: Layout::Dsm, simd: SimdFlavour::Compare, matches: true },
            VerifyOutcome { flavour: AggrFlavour::OneStep, layout: Layout::Nsm, simd: SimdFlavour::Scalar, matches: false },
        ];
        let text = render_verify(&outcomes);
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().ends_with("ok"));
        assert!(text.contains("MISMATCH"));
    }

    #[test]
    fn stage_table_has_header() {
        let stages = vec![StageReport { stage: "select", tuples: 10, cycles: 25, cycles_per_tuple: 2.5 }];
        let text = render_stages(&stages);
        assert!(text.starts_with("stage"));
        assert!(text.contains("2.500"));
    }
}

//! Load a table, run the configured query repeatedly, cross-check variants.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use qone_exec::profile::StageReport;
use qone_exec::{
    naive_q1, AggrFlavour, KernelConfig, KernelStats, Layout, MorselScheduler, QueryResult, SimdFlavour,
};
use qone_storage::{gen, tbl, Lineitem};

use crate::config::{Config, DataConfig};

/// Outcome of [`run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Table rows.
    pub rows: usize,
    /// Pool size.
    pub workers: usize,
    /// Kernel settings used.
    pub kernel: KernelConfig,
    /// Wall time of every repetition, milliseconds.
    pub timings_ms: Vec<f64>,
    /// Push-down rows consumed in the last repetition.
    pub pushdown_rows: usize,
    /// Batch counters of the last repetition.
    pub stats: KernelStats,
    /// Stage counters of the last repetition; empty without the `profile` feature.
    pub stages: Vec<StageReport>,
    /// Result of the last repetition.
    pub result: QueryResult,
}

impl RunReport {
    /// Fastest repetition.
    pub fn best_ms(&self) -> f64 {
        self.timings_ms.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Mean repetition time.
    pub fn mean_ms(&self) -> f64 {
        self.timings_ms.iter().sum::<f64>() / self.timings_ms.len().max(1) as f64
    }
}

/// Generate or load the lineitem table.
pub fn load_table(data: &DataConfig) -> Result<Lineitem> {
    let started = Instant::now();
    let table = match &data.tbl {
        Some(path) => tbl::load_path(path)?,
        None => gen::generate(data.rows, data.seed),
    };
    info!(
        rows = table.cardinality(),
        source = %data.tbl.as_ref().map_or("generated".into(), |p| p.display().to_string()),
        elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
        "table ready"
    );
    Ok(table)
}

/// Run the configured query `run.repetitions` times on a fresh pool.
pub fn run(config: &Config, table: Arc<Lineitem>) -> Result<RunReport> {
    let rows = table.cardinality();
    let mut boundary = config.run.pushdown_boundary;
    if boundary > rows {
        warn!(boundary, rows, "push-down boundary beyond table, clamped");
        boundary = rows;
    }

    let mut scheduler = MorselScheduler::new(table, config.kernel, config.scheduler)?;
    let mut timings_ms = Vec::with_capacity(config.run.repetitions);
    let mut pushdown_rows = 0;
    for rep in 0..config.run.repetitions.max(1) {
        scheduler.clear()?;
        let started = Instant::now();
        scheduler.spawn(0, rows, boundary)?;
        scheduler.wait(config.run.active_wait);
        pushdown_rows = scheduler.consume_pushdown();
        let ms = started.elapsed().as_secs_f64() * 1e3;
        debug!(rep, ms, "repetition finished");
        timings_ms.push(ms);
    }

    let profile = scheduler.profile();
    profile.export();
    Ok(RunReport {
        rows,
        workers: scheduler.num_workers(),
        kernel: config.kernel,
        timings_ms,
        pushdown_rows,
        stats: scheduler.stats(),
        stages: profile.report(),
        result: scheduler.result(),
    })
}

/// One cross-checked kernel variant.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    /// Aggregation flavour.
    pub flavour: AggrFlavour,
    /// Shard layout.
    pub layout: Layout,
    /// Selection and partitioning variant.
    pub simd: SimdFlavour,
    /// `true` when the result equals the reference exactly.
    pub matches: bool,
}

/// Run every aggregating variant through the scheduler and compare each
/// with [`naive_q1`].
pub fn verify(config: &Config, table: &Arc<Lineitem>) -> Result<Vec<VerifyOutcome>> {
    let threshold = config.kernel.shipdate_threshold;
    let expected = naive_q1(table, threshold, config.scheduler.worker_count());
    let mut outcomes = Vec::new();
    for flavour in AggrFlavour::ALL.into_iter().filter(|f| *f != AggrFlavour::NoAggr) {
        for layout in [Layout::Nsm, Layout::Dsm] {
            for simd in SimdFlavour::ALL {
                let kernel = KernelConfig { flavour, layout, simd, ..config.kernel };
                let mut scheduler = MorselScheduler::new(Arc::clone(table), kernel, config.scheduler)?;
                scheduler.run()?;
                let matches = scheduler.result() == expected;
                if !matches {
                    warn!(?flavour, ?layout, ?simd, "result differs from reference");
                }
                outcomes.push(VerifyOutcome { flavour, layout, simd, matches });
            }
        }
    }
    Ok(outcomes)
}

//! Per-stage tuple and cycle counters.
//!
//! Compiled in with the `profile` feature. Without it [`KernelProfile::measure`]
//! is a direct call and every report is empty; results never depend on it.

use serde::Serialize;

/// A labelled kernel stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Shipdate predicate.
    Select,
    /// Group id encoding.
    MapGid,
    /// `1 - discount`.
    MapDisc1,
    /// `tax + 1`.
    MapTax1,
    /// `disc_1 * extendedprice`.
    MapDiscPrice,
    /// `disc_price * tax_1`.
    MapCharge,
    /// Contiguous-run partitioning.
    Partition,
    /// Quantity sum.
    AggrQuantity,
    /// Extended price sum.
    AggrBasePrice,
    /// Discounted price sum.
    AggrDiscPrice,
    /// Charge sum.
    AggrCharge,
    /// Discount sum.
    AggrDisc,
    /// Row count.
    AggrCount,
}

const STAGES: usize = 13;

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; STAGES] = [
        Stage::Select,
        Stage::MapGid,
        Stage::MapDisc1,
        Stage::MapTax1,
        Stage::MapDiscPrice,
        Stage::MapCharge,
        Stage::Partition,
        Stage::AggrQuantity,
        Stage::AggrBasePrice,
        Stage::AggrDiscPrice,
        Stage::AggrCharge,
        Stage::AggrDisc,
        Stage::AggrCount,
    ];

    /// Metric label.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Select => "select",
            Stage::MapGid => "map_gid",
            Stage::MapDisc1 => "map_disc_1",
            Stage::MapTax1 => "map_tax_1",
            Stage::MapDiscPrice => "map_disc_price",
            Stage::MapCharge => "map_charge",
            Stage::Partition => "partition",
            Stage::AggrQuantity => "aggr_quantity",
            Stage::AggrBasePrice => "aggr_base_price",
            Stage::AggrDiscPrice => "aggr_disc_price",
            Stage::AggrCharge => "aggr_charge",
            Stage::AggrDisc => "aggr_disc",
            Stage::AggrCount => "aggr_count",
        }
    }
}

/// Totals of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// Tuples passed to the stage.
    pub tuples: u64,
    /// Cycles spent.
    pub cycles: u64,
}

/// One line of [`KernelProfile::report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Stage label.
    pub stage: &'static str,
    /// Tuples passed to the stage.
    pub tuples: u64,
    /// Cycles spent.
    pub cycles: u64,
    /// `cycles / tuples`.
    pub cycles_per_tuple: f64,
}

/// Stage counters of one kernel, or the sum over several.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KernelProfile {
    stages: [StageStats; STAGES],
    /// Batches aggregated without a selection list (nothing filtered).
    pub full_aggr: u64,
    /// Batches aggregated.
    pub strides: u64,
}

/// Cycle counter: `rdtsc` on x86_64, monotonic nanoseconds elsewhere.
#[inline(always)]
pub fn cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: rdtsc has no preconditions on x86_64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        use once_cell::sync::Lazy;
        use std::time::Instant;
        static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
        EPOCH.elapsed().as_nanos() as u64
    }
}

impl KernelProfile {
    /// `true` when built with the `profile` feature.
    pub const fn enabled() -> bool {
        cfg!(feature = "profile")
    }

    /// Run `f`, charging its time to `stage`.
    #[inline(always)]
    pub fn measure<R>(&mut self, stage: Stage, tuples: usize, f: impl FnOnce() -> R) -> R {
        #[cfg(feature = "profile")]
        {
            let begin = cycles();
            let result = f();
            let s = &mut self.stages[stage as usize];
            s.tuples += tuples as u64;
            s.cycles += cycles().wrapping_sub(begin);
            result
        }
        #[cfg(not(feature = "profile"))]
        {
            let _ = (stage, tuples);
            f()
        }
    }

    /// Count one aggregated batch.
    #[inline(always)]
    pub fn count_stride(&mut self, full: bool) {
        if Self::enabled() {
            self.full_aggr += full as u64;
            self.strides += 1;
        }
    }

    /// Totals of one stage.
    pub fn stage(&self, stage: Stage) -> StageStats {
        self.stages[stage as usize]
    }

    /// Add another profile into this one.
    pub fn absorb(&mut self, other: &KernelProfile) {
        for (mine, theirs) in self.stages.iter_mut().zip(other.stages.iter()) {
            mine.tuples += theirs.tuples;
            mine.cycles += theirs.cycles;
        }
        self.full_aggr += other.full_aggr;
        self.strides += other.strides;
    }

    /// Stages that saw tuples, in pipeline order.
    pub fn report(&self) -> Vec<StageReport> {
        Stage::ALL
            .iter()
            .map(|&stage| (stage, self.stage(stage)))
            .filter(|(_, s)| s.tuples > 0)
            .map(|(stage, s)| StageReport {
                stage: stage.name(),
                tuples: s.tuples,
                cycles: s.cycles,
                cycles_per_tuple: s.cycles as f64 / s.tuples as f64,
            })
            .collect()
    }

    /// Push the totals into the process metrics.
    pub fn export(&self) {
        for line in self.report() {
            qone_metrics::record_stage(line.stage, line.tuples, line.cycles);
        }
    }
}

//! Aggregation strategies.
//!
//! A strategy folds one filtered, mapped batch into a worker's shard. The
//! kernel picks the strategy once at construction; [`Aggregator`] dispatches
//! it together with the shard layout once per batch, so the per-row loops are
//! monomorphised for every `(strategy, layout)` pair.

use crate::aggr::{AggrRow, AggrTable, Shard};
use crate::kernel::{AggrFlavour, KernelConfig};
use crate::primitives::ordaggr::{
    ordaggr_all_in_one, ordaggr_charge, ordaggr_count, ordaggr_disc, ordaggr_disc_price, ordaggr_extended_price,
    ordaggr_quantity,
};
use crate::primitives::partition::{PartitionScratch, Partitioner, Runs};
use crate::primitives::{for_each, Gid, Sel};
use crate::profile::{KernelProfile, Stage};

/// Inputs of one aggregation call. Every slice is indexed by row offset in
/// the batch; `sel` picks the `num` qualifying rows (`None` means `0..num`).
#[derive(Debug, Clone, Copy)]
pub struct BatchView<'a> {
    /// Qualifying rows.
    pub sel: Option<&'a [Sel]>,
    /// Number of qualifying rows.
    pub num: usize,
    /// Group ids.
    pub gids: &'a [Gid],
    /// Quantity column slice.
    pub quantity: &'a [i16],
    /// Extended price column slice.
    pub extendedprice: &'a [i32],
    /// Discount column slice.
    pub discount: &'a [i8],
    /// `disc_1 * extendedprice`.
    pub disc_price: &'a [i32],
    /// `disc_price * tax_1`.
    pub charge: &'a [i64],
}

/// Folds a batch into a table.
pub trait AggregationStrategy {
    /// Add every qualifying row of `batch` to `table`.
    fn aggregate<T: AggrTable>(&mut self, batch: &BatchView<'_>, table: &mut T, profile: &mut KernelProfile);
}

/// Row at a time: all measures of a row in one update.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneStep;

impl AggregationStrategy for OneStep {
    fn aggregate<T: AggrTable>(&mut self, batch: &BatchView<'_>, table: &mut T, _profile: &mut KernelProfile) {
        for_each(batch.sel, batch.num, |i| {
            table.add(
                batch.gids[i] as usize,
                &AggrRow {
                    sum_quantity: batch.quantity[i] as i64,
                    sum_base_price: batch.extendedprice[i] as i64,
                    sum_disc: batch.discount[i] as i64,
                    sum_disc_price: batch.disc_price[i] as i128,
                    sum_charge: batch.charge[i] as i128,
                    count: 1,
                },
            );
        });
    }
}

/// One pass per measure.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiplePrims;

impl AggregationStrategy for MultiplePrims {
    fn aggregate<T: AggrTable>(&mut self, batch: &BatchView<'_>, table: &mut T, profile: &mut KernelProfile) {
        let BatchView { sel, num, gids, .. } = *batch;
        let g = |i: usize| gids[i] as usize;
        profile.measure(Stage::AggrQuantity, num, || {
            for_each(sel, num, |i| table.add_quantity(g(i), batch.quantity[i] as i64))
        });
        profile.measure(Stage::AggrBasePrice, num, || {
            for_each(sel, num, |i| table.add_base_price(g(i), batch.extendedprice[i] as i64))
        });
        profile.measure(Stage::AggrDiscPrice, num, || {
            for_each(sel, num, |i| table.add_disc_price(g(i), batch.disc_price[i] as i128))
        });
        profile.measure(Stage::AggrCharge, num, || {
            for_each(sel, num, |i| table.add_charge(g(i), batch.charge[i] as i128))
        });
        profile.measure(Stage::AggrDisc, num, || {
            for_each(sel, num, |i| table.add_disc(g(i), batch.discount[i] as i64))
        });
        profile.measure(Stage::AggrCount, num, || for_each(sel, num, |i| table.add_count(g(i), 1)));
    }
}

/// Partition rows into per-group runs, then reduce each run.
#[derive(Debug, Clone)]
pub struct Shuffle {
    partitioner: Partitioner,
    fused: bool,
    par: bool,
    runs: Runs,
    scratch: PartitionScratch,
}

impl Shuffle {
    /// Shuffle with buffers for `vector_size`-row batches.
    ///
    /// `fused` reduces all measures in one sweep; `par` splits each run sum
    /// over independent accumulators.
    pub fn new(partitioner: Partitioner, fused: bool, par: bool, vector_size: usize) -> Self {
        Self {
            partitioner,
            fused,
            par,
            runs: Runs::new(vector_size),
            scratch: PartitionScratch::new(vector_size),
        }
    }
}

impl AggregationStrategy for Shuffle {
    fn aggregate<T: AggrTable>(&mut self, batch: &BatchView<'_>, table: &mut T, profile: &mut KernelProfile) {
        let num = batch.num;
        let Self { partitioner, fused, par, runs, scratch } = self;
        profile.measure(Stage::Partition, num, || partitioner.partition(batch.gids, batch.sel, num, runs, scratch));
        let (runs, par) = (&*runs, *par);

        if *fused {
            ordaggr_all_in_one(
                table,
                runs,
                batch.quantity,
                batch.extendedprice,
                batch.disc_price,
                batch.charge,
                batch.discount,
            );
            return;
        }
        profile.measure(Stage::AggrQuantity, num, || ordaggr_quantity(table, runs, batch.quantity, par));
        profile.measure(Stage::AggrBasePrice, num, || ordaggr_extended_price(table, runs, batch.extendedprice, par));
        profile.measure(Stage::AggrDiscPrice, num, || ordaggr_disc_price(table, runs, batch.disc_price, par));
        profile.measure(Stage::AggrCharge, num, || ordaggr_charge(table, runs, batch.charge, par));
        profile.measure(Stage::AggrDisc, num, || ordaggr_disc(table, runs, batch.discount, par));
        profile.measure(Stage::AggrCount, num, || ordaggr_count(table, runs));
    }
}

/// Drops every batch. Isolates scan and map cost.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAggr;

impl AggregationStrategy for NoAggr {
    fn aggregate<T: AggrTable>(&mut self, _batch: &BatchView<'_>, _table: &mut T, _profile: &mut KernelProfile) {}
}

/// The strategy a kernel was configured with.
#[derive(Debug, Clone)]
pub enum Aggregator {
    /// See [`OneStep`].
    OneStep(OneStep),
    /// See [`MultiplePrims`].
    MultiplePrims(MultiplePrims),
    /// See [`Shuffle`].
    Shuffle(Shuffle),
    /// See [`NoAggr`].
    NoAggr(NoAggr),
}

impl Aggregator {
    /// Strategy for a validated kernel configuration.
    pub fn new(config: &KernelConfig) -> Self {
        let shuffle = |fused| {
            Self::Shuffle(Shuffle::new(config.simd.partitioner(), fused, config.simd.is_lanes(), config.vector_size))
        };
        match config.flavour {
            AggrFlavour::OneStep => Self::OneStep(OneStep),
            AggrFlavour::MultiplePrims => Self::MultiplePrims(MultiplePrims),
            AggrFlavour::Shuffle => shuffle(false),
            AggrFlavour::ShuffleFused => shuffle(true),
            AggrFlavour::NoAggr => Self::NoAggr(NoAggr),
        }
    }

    /// Fold `batch` into `shard`.
    #[inline]
    pub fn aggregate(&mut self, batch: &BatchView<'_>, shard: &mut Shard, profile: &mut KernelProfile) {
        match shard {
            Shard::Nsm(table) => self.dispatch(batch, table, profile),
            Shard::Dsm(table) => self.dispatch(batch, table, profile),
        }
    }

    #[inline(always)]
    fn dispatch<T: AggrTable>(&mut self, batch: &BatchView<'_>, table: &mut T, profile: &mut KernelProfile) {
        match self {
            Self::OneStep(s) => s.aggregate(batch, table, profile),
            Self::MultiplePrims(s) => s.aggregate(batch, table, profile),
            Self::Shuffle(s) => s.aggregate(batch, table, profile),
            Self::NoAggr(s) => s.aggregate(batch, table, profile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggr::{DsmTable, Layout, NsmTable};

    struct Batch {
        gids: Vec<Gid>,
        quantity: Vec<i16>,
        price: Vec<i32>,
        discount: Vec<i8>,
        disc_price: Vec<i32>,
        charge: Vec<i64>,
        sel: Vec<Sel>,
    }

    impl Batch {
        fn new(n: usize) -> Self {
            let discount: Vec<i8> = (0..n).map(|i| (i % 11) as i8).collect();
            let price: Vec<i32> = (0..n).map(|i| 90_000 + 13 * i as i32).collect();
            let disc_price: Vec<i32> = (0..n).map(|i| (100 - discount[i] as i32) * price[i]).collect();
            Self {
                gids: (0..n).map(|i| (i * 5 % 7) as Gid).collect(),
                quantity: (0..n).map(|i| (1 + i % 50) as i16).collect(),
                charge: (0..n).map(|i| disc_price[i] as i64 * (100 + (i % 9) as i64)).collect(),
                sel: (0..n).filter(|i| i % 3 != 1).map(|i| i as Sel).collect(),
                price,
                discount,
                disc_price,
            }
        }

        fn view(&self, sparse: bool) -> BatchView<'_> {
            BatchView {
                sel: sparse.then_some(self.sel.as_slice()),
                num: if sparse { self.sel.len() } else { self.gids.len() },
                gids: &self.gids,
                quantity: &self.quantity,
                extendedprice: &self.price,
                discount: &self.discount,
                disc_price: &self.disc_price,
                charge: &self.charge,
            }
        }
    }

    fn flavour_config(flavour: AggrFlavour, simd: crate::kernel::SimdFlavour) -> KernelConfig {
        KernelConfig { flavour, simd, vector_size: 512, ..KernelConfig::default() }
    }

    #[test]
    fn strategies_agree() {
        use crate::kernel::SimdFlavour;
        let batch = Batch::new(500);
        for sparse in [false, true] {
            let mut expected = NsmTable::new(8);
            OneStep.aggregate(&batch.view(sparse), &mut expected, &mut KernelProfile::default());
            for flavour in [AggrFlavour::MultiplePrims, AggrFlavour::Shuffle, AggrFlavour::ShuffleFused] {
                for simd in [SimdFlavour::Scalar, SimdFlavour::Compare, SimdFlavour::PopulationCount] {
                    for layout in [Layout::Nsm, Layout::Dsm] {
                        let mut aggregator = Aggregator::new(&flavour_config(flavour, simd));
                        let mut shard = Shard::new(layout);
                        aggregator.aggregate(&batch.view(sparse), &mut shard, &mut KernelProfile::default());
                        for g in 0..8 {
                            assert_eq!(shard.table().row(g), expected.row(g), "{flavour:?} {simd:?} {layout:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn counts_follow_selection() {
        let batch = Batch::new(30);
        let mut table = DsmTable::new(8);
        MultiplePrims.aggregate(&batch.view(true), &mut table, &mut KernelProfile::default());
        let total: u64 = (0..8).map(|g| table.row(g).count).sum();
        assert_eq!(total, batch.sel.len() as u64);
    }

    #[test]
    fn no_aggr_leaves_table_untouched() {
        let batch = Batch::new(64);
        let mut shard = Shard::new(Layout::Nsm);
        let mut aggregator = Aggregator::new(&flavour_config(AggrFlavour::NoAggr, Default::default()));
        aggregator.aggregate(&batch.view(false), &mut shard, &mut KernelProfile::default());
        assert!((0..8).all(|g| shard.table().row(g) == AggrRow::default()));
    }
}

//! The per-worker Q1 kernel.
//!
//! A kernel scans a row range of a shared [`Lineitem`] in batches of
//! `vector_size` rows: select on shipdate, compute group ids and the derived
//! decimal expressions for the qualifying rows, then hand the batch to the
//! configured aggregation strategy. Every buffer is allocated once at
//! construction and reused for every batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use qone_storage::date::Q1_SHIPDATE_THRESHOLD;
use qone_storage::Lineitem;

use crate::aggr::{GlobalTable, Layout, Shard};
use crate::decimal::ONE;
use crate::error::{ExecError, Result};
use crate::primitives::partition::Partitioner;
use crate::primitives::{
    map_charge, map_disc_1, map_disc_price, map_gid, map_tax_1, select_bitmap, select_le_i16, select_le_i16_lanes,
    Gid, GroupDomain, Sel,
};
use crate::profile::{KernelProfile, Stage};
use crate::pushdown::PushdownFilter;
use crate::result::QueryResult;
use crate::strategy::{Aggregator, BatchView};

/// Default rows per batch.
pub const DEFAULT_VECTOR_SIZE: usize = 1024;
/// Largest supported batch. Row offsets must fit [`Sel`].
pub const MAX_VECTOR_SIZE: usize = 8192;

/// How a kernel folds batches into its shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggrFlavour {
    /// Row at a time.
    #[default]
    OneStep,
    /// One pass per measure.
    MultiplePrims,
    /// Partition into runs, one reduction per measure.
    Shuffle,
    /// Partition into runs, one fused reduction.
    ShuffleFused,
    /// Scan and map only.
    NoAggr,
}

impl AggrFlavour {
    /// Every flavour.
    pub const ALL: [AggrFlavour; 5] = [
        AggrFlavour::OneStep,
        AggrFlavour::MultiplePrims,
        AggrFlavour::Shuffle,
        AggrFlavour::ShuffleFused,
        AggrFlavour::NoAggr,
    ];
}

impl std::str::FromStr for AggrFlavour {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one-step" => Ok(Self::OneStep),
            "multiple-prims" => Ok(Self::MultiplePrims),
            "shuffle" => Ok(Self::Shuffle),
            "shuffle-fused" => Ok(Self::ShuffleFused),
            "no-aggr" => Ok(Self::NoAggr),
            _ => Err(ExecError::UnknownVariant { kind: "aggregation flavour", value: s.to_string() }),
        }
    }
}

/// Scalar loops or emulated lane blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimdFlavour {
    /// Plain loops everywhere.
    #[default]
    Scalar,
    /// Lane-mask selection, compare-based partitioning.
    Compare,
    /// Lane-mask selection, population-count partitioning.
    PopulationCount,
}

impl SimdFlavour {
    /// Every flavour.
    pub const ALL: [SimdFlavour; 3] = [SimdFlavour::Scalar, SimdFlavour::Compare, SimdFlavour::PopulationCount];

    /// Partitioner used by the shuffle strategies.
    pub fn partitioner(self) -> Partitioner {
        match self {
            Self::Scalar => Partitioner::Scalar,
            Self::Compare => Partitioner::Compare,
            Self::PopulationCount => Partitioner::PopulationCount,
        }
    }

    /// `true` for the lane-block variants.
    pub fn is_lanes(self) -> bool {
        self != Self::Scalar
    }
}

impl std::str::FromStr for SimdFlavour {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scalar" => Ok(Self::Scalar),
            "compare" => Ok(Self::Compare),
            "population-count" | "popcount" => Ok(Self::PopulationCount),
            _ => Err(ExecError::UnknownVariant { kind: "simd flavour", value: s.to_string() }),
        }
    }
}

/// Construction parameters of a [`Kernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KernelConfig {
    /// Aggregation strategy.
    pub flavour: AggrFlavour,
    /// Shard layout.
    pub layout: Layout,
    /// Selection and partitioning variant.
    pub simd: SimdFlavour,
    /// Rows per batch.
    pub vector_size: usize,
    /// Inclusive shipdate bound, days since 1992-01-01.
    pub shipdate_threshold: i16,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            flavour: AggrFlavour::default(),
            layout: Layout::default(),
            simd: SimdFlavour::default(),
            vector_size: DEFAULT_VECTOR_SIZE,
            shipdate_threshold: Q1_SHIPDATE_THRESHOLD,
        }
    }
}

impl KernelConfig {
    /// Reject batch widths the buffers and the push-down bitmap cannot serve.
    pub fn validate(&self) -> Result<()> {
        let vs = self.vector_size;
        if vs < 32 || vs > MAX_VECTOR_SIZE || vs % 32 != 0 {
            return Err(ExecError::VectorSize(vs));
        }
        Ok(())
    }
}

/// Batch counters, always collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KernelStats {
    /// Batches scanned.
    pub batches: u64,
    /// Batches with no qualifying row.
    pub empty: u64,
    /// Batches mapped through the selection list.
    pub sparse: u64,
    /// Batches mapped densely over a prefix.
    pub dense: u64,
    /// Batches where every row qualified.
    pub full: u64,
    /// Qualifying rows.
    pub selected: u64,
}

impl KernelStats {
    /// Add another kernel's counters.
    pub fn absorb(&mut self, other: &KernelStats) {
        self.batches += other.batches;
        self.empty += other.empty;
        self.sparse += other.sparse;
        self.dense += other.dense;
        self.full += other.full;
        self.selected += other.selected;
    }
}

#[derive(Debug)]
struct Buffers {
    sel: Box<[Sel]>,
    gids: Box<[Gid]>,
    disc_1: Box<[i8]>,
    tax_1: Box<[i8]>,
    disc_price: Box<[i32]>,
    charge: Box<[i64]>,
    words: Box<[u32]>,
}

impl Buffers {
    fn new(vector_size: usize) -> Self {
        Self {
            sel: vec![0; vector_size].into_boxed_slice(),
            gids: vec![0; vector_size].into_boxed_slice(),
            disc_1: vec![0; vector_size].into_boxed_slice(),
            tax_1: vec![0; vector_size].into_boxed_slice(),
            disc_price: vec![0; vector_size].into_boxed_slice(),
            charge: vec![0; vector_size].into_boxed_slice(),
            words: vec![0; vector_size / 32].into_boxed_slice(),
        }
    }
}

/// Q1 over a shared table into a private shard.
#[derive(Debug)]
pub struct Kernel {
    table: Arc<Lineitem>,
    config: KernelConfig,
    domain: GroupDomain,
    buffers: Buffers,
    aggregator: Aggregator,
    shard: Shard,
    stats: KernelStats,
    profile: KernelProfile,
}

impl Kernel {
    /// Kernel over `table`; the group domain is taken from its column bounds.
    pub fn new(table: Arc<Lineitem>, config: KernelConfig) -> Result<Self> {
        let domain = GroupDomain::from_table(&table)?;
        Self::with_domain(table, config, domain)
    }

    /// Kernel with an explicit group domain, shared with sibling kernels.
    pub fn with_domain(table: Arc<Lineitem>, config: KernelConfig, domain: GroupDomain) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(table, config, domain))
    }

    pub(crate) fn build(table: Arc<Lineitem>, config: KernelConfig, domain: GroupDomain) -> Self {
        debug!(
            flavour = ?config.flavour,
            layout = ?config.layout,
            simd = ?config.simd,
            vector_size = config.vector_size,
            groups = domain.size(),
            "kernel constructed"
        );
        Self {
            aggregator: Aggregator::new(&config),
            buffers: Buffers::new(config.vector_size),
            shard: Shard::new(config.layout),
            stats: KernelStats::default(),
            profile: KernelProfile::default(),
            table,
            config,
            domain,
        }
    }

    /// The group domain.
    pub fn domain(&self) -> &GroupDomain {
        &self.domain
    }

    /// Batch counters since construction or the last [`Kernel::take_stats`].
    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    /// Stage counters since construction or the last [`Kernel::take_profile`].
    pub fn profile(&self) -> &KernelProfile {
        &self.profile
    }

    /// Return and clear the batch counters.
    pub fn take_stats(&mut self) -> KernelStats {
        std::mem::take(&mut self.stats)
    }

    /// Return and clear the stage counters.
    pub fn take_profile(&mut self) -> KernelProfile {
        std::mem::take(&mut self.profile)
    }

    /// Zero the shard.
    pub fn reset(&mut self) {
        self.shard.reset();
    }

    /// Aggregate the whole table.
    pub fn run(&mut self) {
        self.task(0, self.table.cardinality());
    }

    /// Aggregate rows `offset..offset + num`.
    ///
    /// # Panics
    ///
    /// If the range is not inside the table.
    pub fn task(&mut self, offset: usize, num: usize) {
        let table = Arc::clone(&self.table);
        check_range(&table, offset, num);
        let threshold = self.config.shipdate_threshold;
        let lanes = self.config.simd.is_lanes();
        let shipdate = table.shipdate.values();

        let mut done = 0;
        while done < num {
            let chunk = self.config.vector_size.min(num - done);
            let base = offset + done;
            let values = &shipdate[base..base + chunk];
            let sel = &mut self.buffers.sel;
            let hits = self.profile.measure(Stage::Select, chunk, || {
                if lanes {
                    select_le_i16_lanes(sel, values, threshold)
                } else {
                    select_le_i16(sel, values, threshold)
                }
            });
            self.batch(&table, base, chunk, hits);
            done += chunk;
        }
    }

    /// Aggregate rows `offset..offset + num` using a predicate bitmap already
    /// computed by `filter`.
    ///
    /// # Panics
    ///
    /// If the range is not inside the table or `offset` is not 32-aligned.
    pub fn task_precomputed(&mut self, offset: usize, num: usize, filter: &PushdownFilter) {
        let table = Arc::clone(&self.table);
        check_range(&table, offset, num);
        assert!(offset % 32 == 0, "precomputed range must start on a bitmap word");

        let mut done = 0;
        while done < num {
            let chunk = self.config.vector_size.min(num - done);
            let base = offset + done;
            let words = &mut self.buffers.words[..chunk.div_ceil(32)];
            filter.load_words(base / 32, words);
            let sel = &mut self.buffers.sel;
            let hits = self.profile.measure(Stage::Select, chunk, || select_bitmap(sel, words, chunk));
            self.batch(&table, base, chunk, hits);
            done += chunk;
        }
    }

    /// Aggregate every range the push-down path has published so far.
    /// Returns the number of rows consumed.
    pub fn consume_pushdown(&mut self, filter: &PushdownFilter) -> usize {
        let mut rows = 0;
        while let Some(chunk) = filter.pop() {
            self.task_precomputed(chunk.offset, chunk.num, filter);
            rows += chunk.num;
        }
        rows
    }

    /// Fold observed groups into `global`.
    pub fn merge_into(&self, global: &GlobalTable) {
        self.shard.table().merge_into(global);
    }

    /// This kernel's result so far.
    pub fn result(&self) -> QueryResult {
        QueryResult::from_table(self.shard.table(), &self.domain)
    }

    fn batch(&mut self, table: &Lineitem, base: usize, chunk: usize, hits: usize) {
        let Self { config, domain, buffers, aggregator, shard, stats, profile, .. } = self;
        stats.batches += 1;
        if hits == 0 {
            stats.empty += 1;
            return;
        }
        stats.selected += hits as u64;

        let Buffers { sel: sel_buf, gids, disc_1, tax_1, disc_price, charge, .. } = buffers;
        let range = base..base + chunk;
        let returnflag = &table.returnflag.values()[range.clone()];
        let linestatus = &table.linestatus.values()[range.clone()];
        let discount = &table.discount.values()[range.clone()];
        let tax = &table.tax.values()[range.clone()];
        let extendedprice = &table.extendedprice.values()[range.clone()];
        let quantity = &table.quantity.values()[range];

        // Above half selectivity, mapping a dense prefix beats the
        // indirection through the selection list.
        let (sel, n) = if 2 * hits >= config.vector_size {
            stats.dense += 1;
            let n = if hits == chunk { chunk } else { sel_buf[hits - 1] as usize + 1 };
            (None, n)
        } else {
            stats.sparse += 1;
            (Some(&sel_buf[..hits]), hits)
        };

        let one = ONE as i8;
        profile.measure(Stage::MapGid, n, || map_gid(&mut gids[..], sel, n, domain, returnflag, linestatus));
        profile.measure(Stage::MapDisc1, n, || map_disc_1(&mut disc_1[..], sel, n, one, discount));
        profile.measure(Stage::MapTax1, n, || map_tax_1(&mut tax_1[..], sel, n, tax, one));
        profile.measure(Stage::MapDiscPrice, n, || {
            map_disc_price(&mut disc_price[..], sel, n, disc_1, extendedprice)
        });
        profile.measure(Stage::MapCharge, n, || map_charge(&mut charge[..], disc_price, tax_1, sel, n));

        let full = hits == chunk;
        if full {
            stats.full += 1;
        }
        profile.count_stride(full);
        let batch = BatchView {
            sel: if full { None } else { Some(&sel_buf[..hits]) },
            num: hits,
            gids,
            quantity,
            extendedprice,
            discount,
            disc_price,
            charge,
        };
        aggregator.aggregate(&batch, shard, profile);
    }
}

fn check_range(table: &Lineitem, offset: usize, num: usize) {
    let cardinality = table.cardinality();
    assert!(
        offset.checked_add(num).is_some_and(|end| end <= cardinality),
        "row range {offset}+{num} exceeds table cardinality {cardinality}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use qone_storage::gen::generate;
    use qone_storage::LineitemRow;

    fn row(shipdate: i64, rf: u8, ls: u8, quantity: i64) -> LineitemRow {
        LineitemRow {
            shipdate,
            returnflag: rf,
            linestatus: ls,
            discount: 5,
            tax: 2,
            extendedprice: 100_000,
            quantity,
        }
    }

    #[test]
    fn config_validation() {
        assert!(KernelConfig::default().validate().is_ok());
        for vs in [0, 16, 33, 8224] {
            let c = KernelConfig { vector_size: vs, ..KernelConfig::default() };
            assert!(matches!(c.validate(), Err(ExecError::VectorSize(v)) if v == vs));
        }
    }

    #[test]
    fn flavour_names_parse() {
        assert_eq!("shuffle-fused".parse::<AggrFlavour>().unwrap(), AggrFlavour::ShuffleFused);
        assert_eq!("popcount".parse::<SimdFlavour>().unwrap(), SimdFlavour::PopulationCount);
        assert!("fast".parse::<AggrFlavour>().is_err());
    }

    #[test]
    fn threshold_is_inclusive() {
        let table = Arc::new(
            Lineitem::from_rows([row(10, b'A', b'F', 1), row(11, b'A', b'F', 2), row(12, b'A', b'F', 4)]).unwrap(),
        );
        let config = KernelConfig { shipdate_threshold: 11, vector_size: 32, ..KernelConfig::default() };
        let mut kernel = Kernel::new(table, config).unwrap();
        kernel.run();
        let result = kernel.result();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].count, 2);
        assert_eq!(result.rows[0].sum_qty, 3);
    }

    #[test]
    fn empty_range_and_empty_batches() {
        let table = Arc::new(Lineitem::from_rows((0..100).map(|_| row(500, b'N', b'O', 1))).unwrap());
        let config = KernelConfig { shipdate_threshold: 10, vector_size: 32, ..KernelConfig::default() };
        let mut kernel = Kernel::new(table, config).unwrap();
        kernel.task(0, 0);
        assert_eq!(kernel.stats().batches, 0);
        kernel.run();
        let stats = kernel.stats();
        assert_eq!((stats.batches, stats.empty, stats.selected), (4, 4, 0));
        assert!(kernel.result().rows.is_empty());
    }

    #[test]
    fn split_ranges_match_whole_table() {
        let table = Arc::new(generate(5_000, 7));
        let config = KernelConfig { flavour: AggrFlavour::Shuffle, vector_size: 256, ..KernelConfig::default() };
        let mut whole = Kernel::new(Arc::clone(&table), config).unwrap();
        whole.run();
        let mut split = Kernel::new(Arc::clone(&table), config).unwrap();
        split.task(0, 1_234);
        split.task(1_234, 5_000 - 1_234);
        assert_eq!(whole.result(), split.result());
        split.reset();
        assert!(split.result().rows.is_empty());
    }

    #[test]
    #[should_panic(expected = "exceeds table cardinality")]
    fn out_of_range_task_panics() {
        let table = Arc::new(generate(10, 1));
        let mut kernel = Kernel::new(table, KernelConfig::default()).unwrap();
        kernel.task(5, 6);
    }
}

//! Per-group aggregation state.
//!
//! Each worker owns a private shard ([`NsmTable`] or [`DsmTable`]) that it
//! mutates freely. Shards are folded into the shared [`GlobalTable`] once per
//! query; that fold is the only concurrent write and uses atomics only.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::primitives::MAX_GROUPS;

/// Sums and count of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggrRow {
    /// Sum of quantity.
    pub sum_quantity: i64,
    /// Sum of extended price, scale 2.
    pub sum_base_price: i64,
    /// Sum of discount, scale 2.
    pub sum_disc: i64,
    /// Sum of `disc_1 * extendedprice`, scale 4.
    pub sum_disc_price: i128,
    /// Sum of `disc_price * tax_1`, scale 6.
    pub sum_charge: i128,
    /// Qualifying rows. Zero means the group was never observed.
    pub count: u64,
}

impl AggrRow {
    /// Field-wise add.
    #[inline(always)]
    pub fn add(&mut self, other: &AggrRow) {
        self.sum_quantity += other.sum_quantity;
        self.sum_base_price += other.sum_base_price;
        self.sum_disc += other.sum_disc;
        self.sum_disc_price += other.sum_disc_price;
        self.sum_charge += other.sum_charge;
        self.count += other.count;
    }
}

/// A writable per-group table. Group ids must be `< groups()`.
pub trait AggrTable {
    /// Number of group slots.
    fn groups(&self) -> usize;
    /// Add to `sum_quantity`.
    fn add_quantity(&mut self, group: usize, v: i64);
    /// Add to `sum_base_price`.
    fn add_base_price(&mut self, group: usize, v: i64);
    /// Add to `sum_disc`.
    fn add_disc(&mut self, group: usize, v: i64);
    /// Add to `sum_disc_price`.
    fn add_disc_price(&mut self, group: usize, v: i128);
    /// Add to `sum_charge`.
    fn add_charge(&mut self, group: usize, v: i128);
    /// Add to `count`.
    fn add_count(&mut self, group: usize, n: u64);
    /// Add all measures at once.
    fn add(&mut self, group: usize, row: &AggrRow);
    /// Current state of one group.
    fn row(&self, group: usize) -> AggrRow;
    /// Zero every group.
    fn reset(&mut self);

    /// Fold observed groups into `global`.
    fn merge_into(&self, global: &GlobalTable) {
        for group in 0..self.groups() {
            let row = self.row(group);
            if row.count > 0 {
                global.add(group, &row);
            }
        }
    }
}

/// Array-of-structs table: one [`AggrRow`] per group.
#[derive(Debug, Clone)]
pub struct NsmTable {
    rows: Box<[AggrRow]>,
}

impl NsmTable {
    /// Table with `groups` zeroed slots.
    pub fn new(groups: usize) -> Self {
        Self { rows: vec![AggrRow::default(); groups].into_boxed_slice() }
    }
}

impl AggrTable for NsmTable {
    fn groups(&self) -> usize {
        self.rows.len()
    }
    #[inline(always)]
    fn add_quantity(&mut self, group: usize, v: i64) {
        self.rows[group].sum_quantity += v;
    }
    #[inline(always)]
    fn add_base_price(&mut self, group: usize, v: i64) {
        self.rows[group].sum_base_price += v;
    }
    #[inline(always)]
    fn add_disc(&mut self, group: usize, v: i64) {
        self.rows[group].sum_disc += v;
    }
    #[inline(always)]
    fn add_disc_price(&mut self, group: usize, v: i128) {
        self.rows[group].sum_disc_price += v;
    }
    #[inline(always)]
    fn add_charge(&mut self, group: usize, v: i128) {
        self.rows[group].sum_charge += v;
    }
    #[inline(always)]
    fn add_count(&mut self, group: usize, n: u64) {
        self.rows[group].count += n;
    }
    #[inline(always)]
    fn add(&mut self, group: usize, row: &AggrRow) {
        self.rows[group].add(row);
    }
    fn row(&self, group: usize) -> AggrRow {
        self.rows[group]
    }
    fn reset(&mut self) {
        self.rows.fill(AggrRow::default());
    }
}

/// Struct-of-arrays table: one array per measure.
#[derive(Debug, Clone)]
pub struct DsmTable {
    sum_quantity: Box<[i64]>,
    sum_base_price: Box<[i64]>,
    sum_disc: Box<[i64]>,
    sum_disc_price: Box<[i128]>,
    sum_charge: Box<[i128]>,
    count: Box<[u64]>,
}

impl DsmTable {
    /// Table with `groups` zeroed slots.
    pub fn new(groups: usize) -> Self {
        Self {
            sum_quantity: vec![0; groups].into_boxed_slice(),
            sum_base_price: vec![0; groups].into_boxed_slice(),
            sum_disc: vec![0; groups].into_boxed_slice(),
            sum_disc_price: vec![0; groups].into_boxed_slice(),
            sum_charge: vec![0; groups].into_boxed_slice(),
            count: vec![0; groups].into_boxed_slice(),
        }
    }
}

impl AggrTable for DsmTable {
    fn groups(&self) -> usize {
        self.count.len()
    }
    #[inline(always)]
    fn add_quantity(&mut self, group: usize, v: i64) {
        self.sum_quantity[group] += v;
    }
    #[inline(always)]
    fn add_base_price(&mut self, group: usize, v: i64) {
        self.sum_base_price[group] += v;
    }
    #[inline(always)]
    fn add_disc(&mut self, group: usize, v: i64) {
        self.sum_disc[group] += v;
    }
    #[inline(always)]
    fn add_disc_price(&mut self, group: usize, v: i128) {
        self.sum_disc_price[group] += v;
    }
    #[inline(always)]
    fn add_charge(&mut self, group: usize, v: i128) {
        self.sum_charge[group] += v;
    }
    #[inline(always)]
    fn add_count(&mut self, group: usize, n: u64) {
        self.count[group] += n;
    }
    #[inline(always)]
    fn add(&mut self, group: usize, row: &AggrRow) {
        self.sum_quantity[group] += row.sum_quantity;
        self.sum_base_price[group] += row.sum_base_price;
        self.sum_disc[group] += row.sum_disc;
        self.sum_disc_price[group] += row.sum_disc_price;
        self.sum_charge[group] += row.sum_charge;
        self.count[group] += row.count;
    }
    fn row(&self, group: usize) -> AggrRow {
        AggrRow {
            sum_quantity: self.sum_quantity[group],
            sum_base_price: self.sum_base_price[group],
            sum_disc: self.sum_disc[group],
            sum_disc_price: self.sum_disc_price[group],
            sum_charge: self.sum_charge[group],
            count: self.count[group],
        }
    }
    fn reset(&mut self) {
        self.sum_quantity.fill(0);
        self.sum_base_price.fill(0);
        self.sum_disc.fill(0);
        self.sum_disc_price.fill(0);
        self.sum_charge.fill(0);
        self.count.fill(0);
    }
}

/// Memory layout of a worker's shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Array of structs.
    #[default]
    Nsm,
    /// Struct of arrays.
    Dsm,
}

impl std::str::FromStr for Layout {
    type Err = crate::ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nsm" => Ok(Self::Nsm),
            "dsm" => Ok(Self::Dsm),
            _ => Err(crate::ExecError::UnknownVariant { kind: "layout", value: s.to_string() }),
        }
    }
}

/// A worker's private table in the layout picked at construction.
#[derive(Debug, Clone)]
pub enum Shard {
    /// Array-of-structs shard.
    Nsm(NsmTable),
    /// Struct-of-arrays shard.
    Dsm(DsmTable),
}

impl Shard {
    /// Zeroed shard with [`MAX_GROUPS`] slots.
    pub fn new(layout: Layout) -> Self {
        match layout {
            Layout::Nsm => Self::Nsm(NsmTable::new(MAX_GROUPS)),
            Layout::Dsm => Self::Dsm(DsmTable::new(MAX_GROUPS)),
        }
    }

    /// Read-only view.
    pub fn table(&self) -> &dyn AggrTable {
        match self {
            Self::Nsm(t) => t,
            Self::Dsm(t) => t,
        }
    }

    /// Zero every group.
    pub fn reset(&mut self) {
        match self {
            Self::Nsm(t) => t.reset(),
            Self::Dsm(t) => t.reset(),
        }
    }
}

/// 128-bit sum built from two 64-bit atomics.
///
/// The low word wraps; every wrap observed by a `fetch_add` carries one into
/// the high word. The pair is exact once all adds happen-before the read.
#[derive(Debug, Default)]
pub struct AtomicSum128 {
    lo: AtomicU64,
    hi: AtomicI64,
}

impl AtomicSum128 {
    /// Add `v`.
    pub fn fetch_add(&self, v: i128) {
        let lo = v as u64;
        let mut hi = (v >> 64) as i64;
        let old = self.lo.fetch_add(lo, Ordering::Relaxed);
        if old.overflowing_add(lo).1 {
            hi = hi.wrapping_add(1);
        }
        if hi != 0 {
            self.hi.fetch_add(hi, Ordering::Relaxed);
        }
    }

    /// Current value.
    pub fn load(&self) -> i128 {
        let lo = self.lo.load(Ordering::Relaxed) as u128;
        let hi = self.hi.load(Ordering::Relaxed) as i128;
        (hi << 64) | lo as i128
    }

    /// Set to zero.
    pub fn reset(&self) {
        self.lo.store(0, Ordering::Relaxed);
        self.hi.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct AtomicRow {
    sum_quantity: AtomicI64,
    sum_base_price: AtomicI64,
    sum_disc: AtomicI64,
    sum_disc_price: AtomicSum128,
    sum_charge: AtomicSum128,
    count: AtomicU64,
}

/// The shared result table. Written only through atomic adds, read only
/// after every writer has been joined or waited for.
#[derive(Debug)]
pub struct GlobalTable {
    rows: Box<[AtomicRow]>,
}

impl GlobalTable {
    /// Table with `groups` zeroed slots.
    pub fn new(groups: usize) -> Self {
        Self { rows: (0..groups).map(|_| AtomicRow::default()).collect() }
    }

    /// Number of group slots.
    pub fn groups(&self) -> usize {
        self.rows.len()
    }

    /// Atomically add `row` into `group`.
    pub fn add(&self, group: usize, row: &AggrRow) {
        let slot = &self.rows[group];
        slot.sum_quantity.fetch_add(row.sum_quantity, Ordering::Relaxed);
        slot.sum_base_price.fetch_add(row.sum_base_price, Ordering::Relaxed);
        slot.sum_disc.fetch_add(row.sum_disc, Ordering::Relaxed);
        slot.sum_disc_price.fetch_add(row.sum_disc_price);
        slot.sum_charge.fetch_add(row.sum_charge);
        slot.count.fetch_add(row.count, Ordering::Relaxed);
    }

    /// State of one group.
    pub fn row(&self, group: usize) -> AggrRow {
        let slot = &self.rows[group];
        AggrRow {
            sum_quantity: slot.sum_quantity.load(Ordering::Relaxed),
            sum_base_price: slot.sum_base_price.load(Ordering::Relaxed),
            sum_disc: slot.sum_disc.load(Ordering::Relaxed),
            sum_disc_price: slot.sum_disc_price.load(),
            sum_charge: slot.sum_charge.load(),
            count: slot.count.load(Ordering::Relaxed),
        }
    }

    /// Zero every group.
    pub fn reset(&self) {
        for slot in self.rows.iter() {
            slot.sum_quantity.store(0, Ordering::Relaxed);
            slot.sum_base_price.store(0, Ordering::Relaxed);
            slot.sum_disc.store(0, Ordering::Relaxed);
            slot.sum_disc_price.reset();
            slot.sum_charge.reset();
            slot.count.store(0, Ordering::Relaxed);
        }
    }

    /// Sum of `count` over all groups.
    pub fn total_count(&self) -> u64 {
        (0..self.groups()).map(|g| self.row(g).count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: i64) -> AggrRow {
        AggrRow {
            sum_quantity: i,
            sum_base_price: 10 * i,
            sum_disc: i % 7,
            sum_disc_price: (i as i128) << 40,
            sum_charge: -(i as i128) * 3,
            count: 1,
        }
    }

    #[test]
    fn layouts_agree() {
        let mut nsm = NsmTable::new(8);
        let mut dsm = DsmTable::new(8);
        for i in 0..100 {
            let g = (i % 5) as usize;
            nsm.add(g, &sample(i));
            dsm.add_quantity(g, i);
            dsm.add_base_price(g, 10 * i);
            dsm.add_disc(g, i % 7);
            dsm.add_disc_price(g, (i as i128) << 40);
            dsm.add_charge(g, -(i as i128) * 3);
            dsm.add_count(g, 1);
        }
        for g in 0..8 {
            assert_eq!(nsm.row(g), dsm.row(g));
        }
        assert_eq!(nsm.row(7).count, 0);
        nsm.reset();
        assert_eq!(nsm.row(0), AggrRow::default());
    }

    #[test]
    fn wide_sum_carries() {
        let s = AtomicSum128::default();
        s.fetch_add(u64::MAX as i128);
        s.fetch_add(1);
        assert_eq!(s.load(), 1i128 << 64);
        s.fetch_add(-(1i128 << 64) - 5);
        assert_eq!(s.load(), -5);
        s.fetch_add(i64::MAX as i128 * 4);
        assert_eq!(s.load(), i64::MAX as i128 * 4 - 5);
    }

    #[test]
    fn merge_skips_unobserved_groups() {
        let global = GlobalTable::new(4);
        let mut shard = NsmTable::new(4);
        shard.add(2, &sample(3));
        // count == 0 but non-zero sums: never observed, never merged.
        shard.add_quantity(1, 99);
        shard.merge_into(&global);
        shard.merge_into(&global);
        assert_eq!(global.row(2).sum_quantity, 6);
        assert_eq!(global.row(2).count, 2);
        assert_eq!(global.row(1), AggrRow::default());
        assert_eq!(global.total_count(), 2);
        global.reset();
        assert_eq!(global.total_count(), 0);
    }

    #[test]
    fn concurrent_merges_are_exact() {
        let global = GlobalTable::new(2);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let global = &global;
                scope.spawn(move || {
                    let mut shard = DsmTable::new(2);
                    for i in 0..1000 {
                        shard.add(i % 2, &sample((t * 1000 + i) as i64));
                    }
                    shard.merge_into(global);
                });
            }
        });
        let mut expected = NsmTable::new(2);
        for t in 0..8 {
            for i in 0..1000 {
                expected.add(i % 2, &sample((t * 1000 + i) as i64));
            }
        }
        assert_eq!(global.row(0), expected.row(0));
        assert_eq!(global.row(1), expected.row(1));
    }
}

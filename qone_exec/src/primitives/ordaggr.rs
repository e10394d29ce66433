//! Ordered-run reductions over partitioned batches.
//!
//! Each run is summed in a local register and added to its group once. Run
//! sums fit `i64`: a run holds at most one batch of range-checked values.

use super::partition::Runs;
use super::Sel;
use crate::aggr::{AggrRow, AggrTable};

#[inline(always)]
fn run_sum<V: Copy + Into<i64>>(rows: &[Sel], values: &[V]) -> i64 {
    rows.iter().map(|&p| values[p as usize].into()).sum()
}

/// Four independent accumulators, so adds of neighbouring rows do not
/// serialise on one register.
#[inline(always)]
fn run_sum_par<V: Copy + Into<i64>>(rows: &[Sel], values: &[V]) -> i64 {
    let mut acc = [0i64; 4];
    let mut chunks = rows.chunks_exact(4);
    for c in &mut chunks {
        for k in 0..4 {
            acc[k] += values[c[k] as usize].into();
        }
    }
    let tail: i64 = chunks.remainder().iter().map(|&p| values[p as usize].into()).sum();
    acc.iter().sum::<i64>() + tail
}

#[inline(always)]
fn reduce<V: Copy + Into<i64>>(runs: &Runs, values: &[V], par: bool, mut sink: impl FnMut(usize, i64)) {
    for (group, rows) in runs.iter() {
        let sum = if par { run_sum_par(rows, values) } else { run_sum(rows, values) };
        sink(group as usize, sum);
    }
}

/// Sum quantity per run.
pub fn ordaggr_quantity<T: AggrTable>(table: &mut T, runs: &Runs, quantity: &[i16], par: bool) {
    reduce(runs, quantity, par, |g, s| table.add_quantity(g, s));
}

/// Sum extended price per run.
pub fn ordaggr_extended_price<T: AggrTable>(table: &mut T, runs: &Runs, price: &[i32], par: bool) {
    reduce(runs, price, par, |g, s| table.add_base_price(g, s));
}

/// Sum `disc_price` per run.
pub fn ordaggr_disc_price<T: AggrTable>(table: &mut T, runs: &Runs, disc_price: &[i32], par: bool) {
    reduce(runs, disc_price, par, |g, s| table.add_disc_price(g, s as i128));
}

/// Sum `charge` per run.
pub fn ordaggr_charge<T: AggrTable>(table: &mut T, runs: &Runs, charge: &[i64], par: bool) {
    reduce(runs, charge, par, |g, s| table.add_charge(g, s as i128));
}

/// Sum discount per run.
pub fn ordaggr_disc<T: AggrTable>(table: &mut T, runs: &Runs, discount: &[i8], par: bool) {
    reduce(runs, discount, par, |g, s| table.add_disc(g, s));
}

/// Count rows per run.
pub fn ordaggr_count<T: AggrTable>(table: &mut T, runs: &Runs) {
    for (group, rows) in runs.iter() {
        table.add_count(group as usize, rows.len() as u64);
    }
}

/// All measures in one sweep over the runs.
pub fn ordaggr_all_in_one<T: AggrTable>(
    table: &mut T,
    runs: &Runs,
    quantity: &[i16],
    price: &[i32],
    disc_price: &[i32],
    charge: &[i64],
    discount: &[i8],
) {
    for (group, rows) in runs.iter() {
        let mut row = AggrRow { count: rows.len() as u64, ..AggrRow::default() };
        let (mut dp, mut ch) = (0i64, 0i64);
        for &p in rows {
            let p = p as usize;
            row.sum_quantity += quantity[p] as i64;
            row.sum_base_price += price[p] as i64;
            row.sum_disc += discount[p] as i64;
            dp += disc_price[p] as i64;
            ch += charge[p];
        }
        row.sum_disc_price = dp as i128;
        row.sum_charge = ch as i128;
        table.add(group as usize, &row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggr::{DsmTable, NsmTable};
    use crate::primitives::partition::{PartitionScratch, Partitioner};
    use crate::primitives::Gid;

    #[test]
    fn per_measure_and_fused_agree() {
        let n = 203;
        let gids: Vec<Gid> = (0..n).map(|i| (i * 7 % 5) as Gid).collect();
        let quantity: Vec<i16> = (0..n).map(|i| (i % 50) as i16).collect();
        let price: Vec<i32> = (0..n).map(|i| 1000 + i as i32).collect();
        let disc_price: Vec<i32> = (0..n).map(|i| 90 * (1000 + i as i32)).collect();
        let charge: Vec<i64> = (0..n).map(|i| 104 * 90 * (1000 + i as i64)).collect();
        let discount: Vec<i8> = (0..n).map(|i| (i % 11) as i8).collect();

        let mut runs = Runs::new(256);
        let mut scratch = PartitionScratch::new(256);
        Partitioner::Scalar.partition(&gids, None, n, &mut runs, &mut scratch);

        for par in [false, true] {
            let mut split = NsmTable::new(8);
            ordaggr_quantity(&mut split, &runs, &quantity, par);
            ordaggr_extended_price(&mut split, &runs, &price, par);
            ordaggr_disc_price(&mut split, &runs, &disc_price, par);
            ordaggr_charge(&mut split, &runs, &charge, par);
            ordaggr_disc(&mut split, &runs, &discount, par);
            ordaggr_count(&mut split, &runs);

            let mut fused = DsmTable::new(8);
            ordaggr_all_in_one(&mut fused, &runs, &quantity, &price, &disc_price, &charge, &discount);

            let mut naive = NsmTable::new(8);
            for i in 0..n {
                naive.add(
                    gids[i] as usize,
                    &AggrRow {
                        sum_quantity: quantity[i] as i64,
                        sum_base_price: price[i] as i64,
                        sum_disc: discount[i] as i64,
                        sum_disc_price: disc_price[i] as i128,
                        sum_charge: charge[i] as i128,
                        count: 1,
                    },
                );
            }
            for g in 0..8 {
                assert_eq!(split.row(g), naive.row(g), "par={par} group {g}");
                assert_eq!(fused.row(g), naive.row(g), "group {g}");
            }
        }
    }
}

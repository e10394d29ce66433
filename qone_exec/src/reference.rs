//! Row-at-a-time Q1 used as the ground truth for every kernel variant.
//!
//! No batching, no group domain, no selection lists: each row is tested and
//! its measures are added atomically into a table keyed by the raw
//! `(returnflag, linestatus)` byte pair.

use std::thread;

use qone_storage::Lineitem;

use crate::aggr::{AggrRow, GlobalTable};
use crate::decimal::{int128_add64, ONE};
use crate::result::{QueryResult, ResultRow};

const RAW_KEYS: usize = 1 << 16;

/// Q1 over `table` on `threads` scoped threads.
pub fn naive_q1(table: &Lineitem, shipdate_threshold: i16, threads: usize) -> QueryResult {
    let global = GlobalTable::new(RAW_KEYS);
    let n = table.cardinality();
    let per_thread = n.div_ceil(threads.max(1)).max(1);

    thread::scope(|scope| {
        for start in (0..n).step_by(per_thread) {
            let global = &global;
            scope.spawn(move || {
                for i in start..(start + per_thread).min(n) {
                    naive_row(table, shipdate_threshold, i, global);
                }
            });
        }
    });

    let rows = (0..RAW_KEYS)
        .filter_map(|key| {
            let row = global.row(key);
            (row.count > 0).then(|| ResultRow::new((key >> 8) as u8, key as u8, &row))
        })
        .collect();
    QueryResult::new(rows)
}

fn naive_row(table: &Lineitem, threshold: i16, i: usize, global: &GlobalTable) {
    if table.shipdate.values()[i] > threshold {
        return;
    }
    let discount = table.discount.values()[i] as i64;
    let price = table.extendedprice.values()[i] as i64;
    let tax = table.tax.values()[i] as i64;
    let disc_price = (ONE - discount) * price;
    let charge = int128_add64(0, disc_price) * (tax + ONE) as i128;

    let key = (table.returnflag.values()[i] as u8 as usize) << 8 | table.linestatus.values()[i] as u8 as usize;
    global.add(
        key,
        &AggrRow {
            sum_quantity: table.quantity.values()[i] as i64,
            sum_base_price: price,
            sum_disc: discount,
            sum_disc_price: disc_price as i128,
            sum_charge: charge,
            count: 1,
        },
    );
}

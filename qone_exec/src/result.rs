//! Q1 result rows.

use std::fmt;

use serde::Serialize;

use crate::aggr::{AggrRow, AggrTable, GlobalTable};
use crate::decimal::{format_scaled, CHARGE_SCALE, DISC_PRICE_SCALE, SCALE};
use crate::primitives::{Gid, GroupDomain};

/// One output group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    /// `l_returnflag`.
    pub returnflag: char,
    /// `l_linestatus`.
    pub linestatus: char,
    /// Sum of quantity.
    pub sum_qty: i64,
    /// Sum of extended price, scale 2.
    pub sum_base_price: i64,
    /// Sum of discounted price, scale 4.
    pub sum_disc_price: i128,
    /// Sum of charge, scale 6.
    pub sum_charge: i128,
    /// Sum of discount, scale 2.
    pub sum_disc: i64,
    /// Qualifying rows.
    pub count: u64,
}

impl ResultRow {
    /// Row for a group key and its sums.
    pub fn new(returnflag: u8, linestatus: u8, aggr: &AggrRow) -> Self {
        Self {
            returnflag: returnflag as char,
            linestatus: linestatus as char,
            sum_qty: aggr.sum_quantity,
            sum_base_price: aggr.sum_base_price,
            sum_disc_price: aggr.sum_disc_price,
            sum_charge: aggr.sum_charge,
            sum_disc: aggr.sum_disc,
            count: aggr.count,
        }
    }

    fn avg(&self, sum: i64, scale: u32) -> f64 {
        sum as f64 / 10f64.powi(scale as i32) / self.count as f64
    }

    /// `avg(l_quantity)`.
    pub fn avg_qty(&self) -> f64 {
        self.avg(self.sum_qty, 0)
    }

    /// `avg(l_extendedprice)`.
    pub fn avg_price(&self) -> f64 {
        self.avg(self.sum_base_price, SCALE)
    }

    /// `avg(l_discount)`.
    pub fn avg_disc(&self) -> f64 {
        self.avg(self.sum_disc, SCALE)
    }
}

/// All non-empty groups ordered by `(returnflag, linestatus)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    /// Output rows.
    pub rows: Vec<ResultRow>,
}

impl QueryResult {
    /// Sort `rows` into output order.
    pub fn new(mut rows: Vec<ResultRow>) -> Self {
        rows.sort_by_key(|r| (r.returnflag, r.linestatus));
        Self { rows }
    }

    /// Observed groups of a per-worker table.
    pub fn from_table(table: &dyn AggrTable, domain: &GroupDomain) -> Self {
        Self::collect(domain, |g| table.row(g))
    }

    /// Observed groups of the shared table.
    pub fn from_global(table: &GlobalTable, domain: &GroupDomain) -> Self {
        Self::collect(domain, |g| table.row(g))
    }

    fn collect(domain: &GroupDomain, row: impl Fn(usize) -> AggrRow) -> Self {
        let rows = (0..domain.size())
            .filter_map(|g| {
                let aggr = row(g);
                (aggr.count > 0).then(|| {
                    let (rf, ls) = domain.decode(g as Gid);
                    ResultRow::new(rf, ls, &aggr)
                })
            })
            .collect();
        Self::new(rows)
    }

    /// Row of one group, if observed.
    pub fn get(&self, returnflag: char, linestatus: char) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.returnflag == returnflag && r.linestatus == linestatus)
    }

    /// Qualifying rows over all groups.
    pub fn total_count(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<2} {:<2} {:>12} {:>20} {:>24} {:>26} {:>10} {:>14} {:>6} {:>12}",
            "rf", "ls", "sum_qty", "sum_base_price", "sum_disc_price", "sum_charge", "avg_qty", "avg_price", "avg_disc",
            "count_order"
        )?;
        for r in &self.rows {
            writeln!(
                f,
                "{:<2} {:<2} {:>12} {:>20} {:>24} {:>26} {:>10.2} {:>14.2} {:>6.2} {:>12}",
                r.returnflag,
                r.linestatus,
                r.sum_qty,
                format_scaled(r.sum_base_price as i128, SCALE),
                format_scaled(r.sum_disc_price, DISC_PRICE_SCALE),
                format_scaled(r.sum_charge, CHARGE_SCALE),
                r.avg_qty(),
                r.avg_price(),
                r.avg_disc(),
                r.count
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggr::NsmTable;
    use qone_storage::MinMax;

    #[test]
    fn skips_unobserved_and_sorts() {
        let domain = GroupDomain::new(
            MinMax { min: b'A' as i8, max: b'R' as i8 },
            MinMax { min: b'F' as i8, max: b'O' as i8 },
        )
        .unwrap();
        let mut table = NsmTable::new(256);
        let row = AggrRow { sum_quantity: 10, sum_base_price: 2_000, sum_disc: 10, count: 4, ..AggrRow::default() };
        table.add(domain.gid(b'R' as i8, b'F' as i8) as usize, &row);
        table.add(domain.gid(b'A' as i8, b'F' as i8) as usize, &row);

        let result = QueryResult::from_table(&table, &domain);
        assert_eq!(result.rows.len(), 2);
        assert_eq!((result.rows[0].returnflag, result.rows[1].returnflag), ('A', 'R'));
        assert_eq!(result.total_count(), 8);
        let r = result.get('R', 'F').unwrap();
        assert_eq!(r.avg_qty(), 2.5);
        assert_eq!(r.avg_price(), 5.0);
        assert_eq!(r.avg_disc(), 0.025);
        assert!(result.get('N', 'O').is_none());
    }

    #[test]
    fn display_renders_scaled_sums() {
        let result = QueryResult::new(vec![ResultRow::new(
            b'N',
            b'O',
            &AggrRow { sum_quantity: 3, sum_base_price: 12_345, sum_disc_price: 1_000_000, sum_charge: 1, count: 1, sum_disc: 0 },
        )]);
        let text = result.to_string();
        assert!(text.contains("123.45"));
        assert!(text.contains("100.0000"));
        assert!(text.contains("0.000001"));
    }
}

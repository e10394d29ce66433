//! Deterministic synthetic lineitem data following the dbgen value rules
//! that matter to Q1.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::macros::date;

use crate::{date as dates, Lineitem, LineitemBuilder, NarrowRow};

/// Orders are placed up to 151 days before 1998-12-31.
const LAST_ORDER: time::Date = date!(1998 - 08 - 02);
/// dbgen's "current date": decides return flag and line status.
const CURRENT: time::Date = date!(1995 - 06 - 17);

fn days(d: time::Date) -> i16 {
    // Both dates lie a few thousand days after the epoch.
    (d.to_julian_day() - dates::EPOCH.to_julian_day()) as i16
}

/// Generate `rows` rows from `seed`. The same seed always yields the same table.
///
/// Every drawn value is inside the column ranges [`LineitemBuilder::push`]
/// enforces: shipdate stays below 2600, the largest price is
/// `50 * 1999.99`, discount and tax stay at or below 0.10.
pub fn generate(rows: usize, seed: u64) -> Lineitem {
    let mut rng = StdRng::seed_from_u64(seed);
    let last_order = days(LAST_ORDER);
    let current = days(CURRENT);

    let mut builder = LineitemBuilder::with_capacity(rows);
    for _ in 0..rows {
        let orderdate: i16 = rng.gen_range(0..=last_order);
        let shipdate = orderdate + rng.gen_range(1..=121i16);
        let receiptdate = shipdate + rng.gen_range(1..=30i16);
        let quantity: i16 = rng.gen_range(1..=50);
        let part_price: i32 = rng.gen_range(90_000..=199_999);

        let returnflag = if receiptdate <= current {
            if rng.gen_bool(0.5) {
                b'R'
            } else {
                b'A'
            }
        } else {
            b'N'
        };
        let linestatus = if shipdate > current { b'O' } else { b'F' };

        builder.push_narrow(NarrowRow {
            shipdate,
            returnflag: returnflag as i8,
            linestatus: linestatus as i8,
            discount: rng.gen_range(0..=10),
            tax: rng.gen_range(0..=8),
            extendedprice: i32::from(quantity) * part_price,
            quantity,
        });
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_DISCOUNT, MAX_EXTENDEDPRICE, MAX_TAX};
    use std::collections::BTreeSet;

    #[test]
    fn deterministic_and_four_groups() {
        let a = generate(5_000, 7);
        let b = generate(5_000, 7);
        assert_eq!(a.quantity.values(), b.quantity.values());
        assert_eq!(a.shipdate.values(), b.shipdate.values());

        let groups: BTreeSet<(u8, u8)> = a
            .returnflag
            .values()
            .iter()
            .zip(a.linestatus.values())
            .map(|(&r, &l)| (r as u8, l as u8))
            .collect();
        let expected: BTreeSet<(u8, u8)> =
            [(b'A', b'F'), (b'N', b'F'), (b'N', b'O'), (b'R', b'F')].into_iter().collect();
        assert_eq!(groups, expected);
    }

    #[test]
    fn values_stay_in_checked_ranges() {
        let t = generate(20_000, 99);
        assert!(t.shipdate.values().iter().all(|&d| d >= 0));
        assert!(t.discount.values().iter().all(|&d| (0..=MAX_DISCOUNT as i8).contains(&d)));
        assert!(t.tax.values().iter().all(|&x| (0..=MAX_TAX as i8).contains(&x)));
        assert!(t.extendedprice.values().iter().all(|&p| p > 0 && i64::from(p) <= MAX_EXTENDEDPRICE));
        assert!(t.quantity.values().iter().all(|&q| (1..=50).contains(&q)));
    }
}

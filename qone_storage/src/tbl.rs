//! Loader for dbgen `lineitem.tbl` files.
//!
//! Lines are `|`-separated; Q1 reads fields 4 (quantity) through 10
//! (shipdate). Decimals are parsed exactly into scaled integers, never
//! through floating point.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::{date, Lineitem, LineitemBuilder, LineitemRow, Result, StorageError};

const QUANTITY: usize = 4;
const EXTENDEDPRICE: usize = 5;
const DISCOUNT: usize = 6;
const TAX: usize = 7;
const RETURNFLAG: usize = 8;
const LINESTATUS: usize = 9;
const SHIPDATE: usize = 10;

/// Parse a decimal literal into an integer with `scale` fractional digits.
///
/// Extra fractional digits are rejected rather than rounded.
pub fn parse_decimal(s: &str, scale: u32) -> Option<i64> {
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if int.is_empty() || frac.len() > scale as usize {
        return None;
    }
    if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut value: i64 = int.parse().ok()?;
    for i in 0..scale as usize {
        let d = frac.as_bytes().get(i).map_or(0, |b| (b - b'0') as i64);
        value = value.checked_mul(10)?.checked_add(d)?;
    }
    Some(if neg { -value } else { value })
}

fn single_byte(field: &str) -> Option<u8> {
    match field.as_bytes() {
        [b] => Some(*b),
        _ => None,
    }
}

fn parse_line(line: &str, lineno: usize) -> Result<LineitemRow> {
    let err = |reason: String| StorageError::Parse { line: lineno, reason };
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() <= SHIPDATE {
        return Err(err(format!("expected at least {} fields, got {}", SHIPDATE + 1, fields.len())));
    }
    let decimal = |idx: usize, name: &str| {
        parse_decimal(fields[idx], 2).ok_or_else(|| err(format!("bad {name}: {:?}", fields[idx])))
    };

    // Quantity is integral in dbgen output ("17.00"); keep whole units.
    let quantity = decimal(QUANTITY, "quantity")?;
    if quantity % 100 != 0 {
        return Err(err(format!("fractional quantity: {:?}", fields[QUANTITY])));
    }

    Ok(LineitemRow {
        quantity: quantity / 100,
        extendedprice: decimal(EXTENDEDPRICE, "extendedprice")?,
        discount: decimal(DISCOUNT, "discount")?,
        tax: decimal(TAX, "tax")?,
        returnflag: single_byte(fields[RETURNFLAG])
            .ok_or_else(|| err(format!("bad returnflag: {:?}", fields[RETURNFLAG])))?,
        linestatus: single_byte(fields[LINESTATUS])
            .ok_or_else(|| err(format!("bad linestatus: {:?}", fields[LINESTATUS])))?,
        shipdate: date::parse(fields[SHIPDATE])? as i64,
    })
}

/// Load a table from any buffered reader. Blank lines are skipped.
pub fn load<R: BufRead>(reader: R) -> Result<Lineitem> {
    let mut builder = LineitemBuilder::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        builder.push(parse_line(&line, idx + 1)?)?;
    }
    Ok(builder.finish())
}

/// Load a table from a file path.
pub fn load_path(path: impl AsRef<Path>) -> Result<Lineitem> {
    load(BufReader::new(File::open(path)?))
}

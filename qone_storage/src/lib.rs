//! Column-major lineitem storage for the Q1 engine.
//!
//! Columns are stored in the narrow widths the execution kernel scans
//! (`i8`/`i16`/`i32`), so every value is range-checked on the way in. The
//! kernel never mutates a column; it only reads slices and the min/max bounds
//! computed by [`LineitemBuilder::finish`].
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};

pub mod column;
pub mod date;
pub mod gen;
pub mod tbl;

pub use column::{Column, MinMax};

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A value does not fit the compact column width or the kernel's arithmetic.
    #[error("value {value} out of range for column {column}")]
    OutOfRange {
        /// Column name.
        column: &'static str,
        /// Offending value (wide form).
        value: i64,
    },
    /// Malformed input line in a `.tbl` file.
    #[error("line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },
    /// Date outside the encodable range or not parseable.
    #[error("invalid date: {0}")]
    InvalidDate(String),
    /// IO or other underlying error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Largest discount (hundredths) the kernel accepts: `1.00 - discount` must stay non-negative.
pub const MAX_DISCOUNT: i64 = 100;
/// Largest tax (hundredths) the kernel accepts: `tax + 1.00` must fit an `i8`.
pub const MAX_TAX: i64 = i8::MAX as i64 - 100;
/// Largest extended price (cents) the kernel accepts: `1.00 * price` at scale 4 must fit an `i32`.
pub const MAX_EXTENDEDPRICE: i64 = i32::MAX as i64 / 100;

/// One lineitem row in wide integer form, as produced by loaders and generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineitemRow {
    /// Days since 1992-01-01, see [`date`].
    pub shipdate: i64,
    /// ASCII return flag (`A`, `N`, `R`).
    pub returnflag: u8,
    /// ASCII line status (`F`, `O`).
    pub linestatus: u8,
    /// Discount in hundredths.
    pub discount: i64,
    /// Tax in hundredths.
    pub tax: i64,
    /// Extended price in cents.
    pub extendedprice: i64,
    /// Quantity in whole units.
    pub quantity: i64,
}

/// The seven lineitem columns Q1 reads, plus the compressed shipdate used by
/// the filter push-down path.
#[derive(Debug, Clone)]
pub struct Lineitem {
    /// Shipdate, days since 1992-01-01.
    pub shipdate: Column<i16>,
    /// Return flag ASCII codes.
    pub returnflag: Column<i8>,
    /// Line status ASCII codes.
    pub linestatus: Column<i8>,
    /// Discount, hundredths.
    pub discount: Column<i8>,
    /// Tax, hundredths.
    pub tax: Column<i8>,
    /// Extended price, cents.
    pub extendedprice: Column<i32>,
    /// Quantity, whole units.
    pub quantity: Column<i16>,
    compressed_shipdate: Box<[u16]>,
}

impl Lineitem {
    /// Number of rows.
    pub fn cardinality(&self) -> usize {
        self.extendedprice.len()
    }

    /// Shipdate re-encoded as unsigned 16-bit values for the push-down filter.
    pub fn compressed_shipdate(&self) -> &[u16] {
        &self.compressed_shipdate
    }

    /// Build a table from rows, validating each one.
    pub fn from_rows<I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = LineitemRow>,
    {
        let mut builder = LineitemBuilder::default();
        for row in rows {
            builder.push(row)?;
        }
        Ok(builder.finish())
    }
}

/// A row already in the kernel's column widths.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NarrowRow {
    pub shipdate: i16,
    pub returnflag: i8,
    pub linestatus: i8,
    pub discount: i8,
    pub tax: i8,
    pub extendedprice: i32,
    pub quantity: i16,
}

/// Row-at-a-time construction of a [`Lineitem`].
#[derive(Debug, Default)]
pub struct LineitemBuilder {
    shipdate: Vec<i16>,
    returnflag: Vec<i8>,
    linestatus: Vec<i8>,
    discount: Vec<i8>,
    tax: Vec<i8>,
    extendedprice: Vec<i32>,
    quantity: Vec<i16>,
}

fn narrow<T: TryFrom<i64>>(column: &'static str, value: i64, max: i64) -> Result<T> {
    if value < 0 || value > max {
        return Err(StorageError::OutOfRange { column, value });
    }
    T::try_from(value).map_err(|_| StorageError::OutOfRange { column, value })
}

fn flag(column: &'static str, value: u8) -> Result<i8> {
    if !value.is_ascii() {
        return Err(StorageError::OutOfRange { column, value: value as i64 });
    }
    Ok(value as i8)
}

impl LineitemBuilder {
    /// Builder with room for `rows` rows.
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            shipdate: Vec::with_capacity(rows),
            returnflag: Vec::with_capacity(rows),
            linestatus: Vec::with_capacity(rows),
            discount: Vec::with_capacity(rows),
            tax: Vec::with_capacity(rows),
            extendedprice: Vec::with_capacity(rows),
            quantity: Vec::with_capacity(rows),
        }
    }

    /// Append a row. Nothing is appended when validation fails.
    pub fn push(&mut self, row: LineitemRow) -> Result<()> {
        let row = NarrowRow {
            shipdate: narrow("shipdate", row.shipdate, i16::MAX as i64)?,
            returnflag: flag("returnflag", row.returnflag)?,
            linestatus: flag("linestatus", row.linestatus)?,
            discount: narrow("discount", row.discount, MAX_DISCOUNT)?,
            tax: narrow("tax", row.tax, MAX_TAX)?,
            extendedprice: narrow("extendedprice", row.extendedprice, MAX_EXTENDEDPRICE)?,
            quantity: narrow("quantity", row.quantity, i16::MAX as i64)?,
        };
        self.push_narrow(row);
        Ok(())
    }

    /// Append a row whose values are in range by construction.
    pub(crate) fn push_narrow(&mut self, row: NarrowRow) {
        debug_assert!(row.shipdate >= 0 && row.discount >= 0 && row.tax >= 0 && row.extendedprice >= 0);
        self.shipdate.push(row.shipdate);
        self.returnflag.push(row.returnflag);
        self.linestatus.push(row.linestatus);
        self.discount.push(row.discount);
        self.tax.push(row.tax);
        self.extendedprice.push(row.extendedprice);
        self.quantity.push(row.quantity);
    }

    /// Number of rows pushed so far.
    pub fn len(&self) -> usize {
        self.quantity.len()
    }

    /// `true` if no rows were pushed.
    pub fn is_empty(&self) -> bool {
        self.quantity.is_empty()
    }

    /// Freeze the columns and compute their bounds.
    pub fn finish(self) -> Lineitem {
        // shipdate was validated non-negative, so the cast is lossless.
        let compressed_shipdate = self.shipdate.iter().map(|&d| d as u16).collect();
        Lineitem {
            shipdate: Column::new(self.shipdate),
            returnflag: Column::new(self.returnflag),
            linestatus: Column::new(self.linestatus),
            discount: Column::new(self.discount),
            tax: Column::new(self.tax),
            extendedprice: Column::new(self.extendedprice),
            quantity: Column::new(self.quantity),
            compressed_shipdate,
        }
    }
}

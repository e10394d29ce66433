//! Fixed-point helpers.
//!
//! Stored decimals carry two fractional digits. Products are never rescaled:
//! `disc_price` is scale 4 and `charge` is scale 6, so sums stay exact.

/// Fractional digits of stored decimal columns.
pub const SCALE: u32 = 2;
/// Scale of `disc_1 * extendedprice`.
pub const DISC_PRICE_SCALE: u32 = 2 * SCALE;
/// Scale of `disc_price * tax_1`.
pub const CHARGE_SCALE: u32 = 3 * SCALE;
/// `1.00` at [`SCALE`].
pub const ONE: i64 = to_value(1, 0);

/// Build the scaled integer for `int + frac / 10^SCALE`.
pub const fn to_value(int: i64, frac: i64) -> i64 {
    int * 10i64.pow(SCALE) + frac
}

/// Accumulate a 64-bit value into a 128-bit sum.
#[inline(always)]
pub fn int128_add64(acc: i128, v: i64) -> i128 {
    acc + v as i128
}

/// Render a scaled integer with `scale` fractional digits.
pub fn format_scaled(value: i128, scale: u32) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let div = 10i128.pow(scale);
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let div = div as u128;
    format!("{sign}{}.{:0width$}", abs / div, abs % div, width = scale as usize)
}

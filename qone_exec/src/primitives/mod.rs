//! Vectorized primitives: one tight loop per operation over a batch.
//!
//! Every primitive takes an optional selection list. `Some(sel)` visits
//! `sel[..n]`; `None` visits `0..n`. Outputs are indexed by row offset within
//! the batch, never compacted, so later primitives can reuse the same
//! selection.

pub mod ordaggr;
pub mod partition;

use qone_storage::{Lineitem, MinMax};

use crate::error::{ExecError, Result};

/// Row offset inside a batch.
pub type Sel = u16;
/// Dense group id.
pub type Gid = u16;

/// Upper bound on dense group ids.
pub const MAX_GROUPS: usize = 256;
/// Emulated SIMD register width in rows.
pub const LANES: usize = 16;

/// Visit every selected row offset.
#[inline(always)]
pub fn for_each(sel: Option<&[Sel]>, n: usize, mut f: impl FnMut(usize)) {
    match sel {
        Some(sel) => {
            for &i in &sel[..n] {
                f(i as usize);
            }
        }
        None => {
            for i in 0..n {
                f(i);
            }
        }
    }
}

/// Branch-free `values[i] <= threshold` selection. Returns the hit count.
///
/// `out` must be at least as long as `values`.
pub fn select_le_i16(out: &mut [Sel], values: &[i16], threshold: i16) -> usize {
    let mut k = 0;
    for (i, &v) in values.iter().enumerate() {
        out[k] = i as Sel;
        k += (v <= threshold) as usize;
    }
    k
}

/// Lane-mask variant of [`select_le_i16`]: compare [`LANES`] rows into a
/// bitmask, then compact the set bits.
pub fn select_le_i16_lanes(out: &mut [Sel], values: &[i16], threshold: i16) -> usize {
    let mut k = 0;
    let mut base = 0;
    let mut chunks = values.chunks_exact(LANES);
    for chunk in &mut chunks {
        let mut mask = 0u32;
        for (l, &v) in chunk.iter().enumerate() {
            mask |= ((v <= threshold) as u32) << l;
        }
        while mask != 0 {
            out[k] = (base + mask.trailing_zeros() as usize) as Sel;
            k += 1;
            mask &= mask - 1;
        }
        base += LANES;
    }
    for (l, &v) in chunks.remainder().iter().enumerate() {
        out[k] = (base + l) as Sel;
        k += (v <= threshold) as usize;
    }
    k
}

/// Selection from a packed predicate bitmap covering `n` rows.
pub fn select_bitmap(out: &mut [Sel], words: &[u32], n: usize) -> usize {
    let mut k = 0;
    for (w, &word) in words.iter().enumerate() {
        let base = w * 32;
        if base >= n {
            break;
        }
        let mut mask = if n - base < 32 { word & ((1u32 << (n - base)) - 1) } else { word };
        while mask != 0 {
            out[k] = (base + mask.trailing_zeros() as usize) as Sel;
            k += 1;
            mask &= mask - 1;
        }
    }
    k
}

/// Pack `compressed[i] <= threshold` into 32-row words.
pub fn precompute_filter(compressed: &[u16], out: &mut [u32], threshold: u16) {
    for (word, chunk) in out.iter_mut().zip(compressed.chunks(32)) {
        let mut mask = 0u32;
        for (j, &v) in chunk.iter().enumerate() {
            mask |= ((v <= threshold) as u32) << j;
        }
        *word = mask;
    }
}

/// `disc_1 = 1.00 - discount`.
pub fn map_disc_1(out: &mut [i8], sel: Option<&[Sel]>, n: usize, one: i8, discount: &[i8]) {
    for_each(sel, n, |i| out[i] = one - discount[i]);
}

/// `tax_1 = tax + 1.00`.
pub fn map_tax_1(out: &mut [i8], sel: Option<&[Sel]>, n: usize, tax: &[i8], one: i8) {
    for_each(sel, n, |i| out[i] = tax[i] + one);
}

/// `disc_price = disc_1 * extendedprice` at scale 4.
pub fn map_disc_price(out: &mut [i32], sel: Option<&[Sel]>, n: usize, disc_1: &[i8], price: &[i32]) {
    for_each(sel, n, |i| out[i] = disc_1[i] as i32 * price[i]);
}

/// `charge = disc_price * tax_1` at scale 6.
pub fn map_charge(out: &mut [i64], disc_price: &[i32], tax_1: &[i8], sel: Option<&[Sel]>, n: usize) {
    for_each(sel, n, |i| out[i] = disc_price[i] as i64 * tax_1[i] as i64);
}

/// Dense group ids with domain restriction.
pub fn map_gid(
    out: &mut [Gid],
    sel: Option<&[Sel]>,
    n: usize,
    domain: &GroupDomain,
    returnflag: &[i8],
    linestatus: &[i8],
) {
    for_each(sel, n, |i| out[i] = domain.gid(returnflag[i], linestatus[i]));
}

/// Dense `(returnflag, linestatus)` encoding restricted to the observed value
/// ranges of both columns.
///
/// Derived once per table; the same pair always maps to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDomain {
    rf_min: i8,
    ls_min: i8,
    rf_width: u16,
    ls_width: u16,
}

impl GroupDomain {
    /// Domain spanning both inclusive ranges.
    pub fn new(returnflag: MinMax<i8>, linestatus: MinMax<i8>) -> Result<Self> {
        let rf_width = (returnflag.max as i16 - returnflag.min as i16 + 1).max(1) as usize;
        let ls_width = (linestatus.max as i16 - linestatus.min as i16 + 1).max(1) as usize;
        let size = rf_width * ls_width;
        if size > MAX_GROUPS {
            return Err(ExecError::DomainTooLarge { size, max: MAX_GROUPS });
        }
        Ok(Self {
            rf_min: returnflag.min,
            ls_min: linestatus.min,
            rf_width: rf_width as u16,
            ls_width: ls_width as u16,
        })
    }

    /// Domain from a table's column bounds. An empty table gets a one-key domain.
    pub fn from_table(table: &Lineitem) -> Result<Self> {
        let single = MinMax { min: 0, max: 0 };
        Self::new(
            table.returnflag.minmax().unwrap_or(single),
            table.linestatus.minmax().unwrap_or(single),
        )
    }

    /// Number of distinct ids.
    pub fn size(&self) -> usize {
        self.rf_width as usize * self.ls_width as usize
    }

    /// Encode a pair. Values outside the domain are a caller bug.
    #[inline(always)]
    pub fn gid(&self, returnflag: i8, linestatus: i8) -> Gid {
        let rf = (returnflag as i16 - self.rf_min as i16) as u16;
        let ls = (linestatus as i16 - self.ls_min as i16) as u16;
        debug_assert!(rf < self.rf_width && ls < self.ls_width, "group key outside domain");
        rf * self.ls_width + ls
    }

    /// Recover the `(returnflag, linestatus)` pair of an id.
    pub fn decode(&self, gid: Gid) -> (u8, u8) {
        let rf = (gid / self.ls_width) as i16 + self.rf_min as i16;
        let ls = (gid % self.ls_width) as i16 + self.ls_min as i16;
        (rf as u8, ls as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_variants_agree() {
        let values: Vec<i16> = (0..1000).map(|i| ((i * 37) % 101) as i16).collect();
        let mut a = vec![0; values.len()];
        let mut b = vec![0; values.len()];
        for threshold in [-1, 0, 50, 100] {
            let na = select_le_i16(&mut a, &values, threshold);
            let nb = select_le_i16_lanes(&mut b, &values, threshold);
            assert_eq!(na, nb);
            assert_eq!(&a[..na], &b[..nb]);
            assert!(a[..na].iter().all(|&i| values[i as usize] <= threshold));
        }
    }

    #[test]
    fn select_is_inclusive() {
        let mut out = [0; 3];
        assert_eq!(select_le_i16(&mut out, &[5, 6, 7], 6), 2);
        assert_eq!(&out[..2], &[0, 1]);
    }

    #[test]
    fn bitmap_roundtrips_selection() {
        let compressed: Vec<u16> = (0..100).map(|i| (i * 7 % 13) as u16).collect();
        let mut words = [0u32; 4];
        precompute_filter(&compressed, &mut words, 6);

        let mut from_bits = [0; 100];
        let n = select_bitmap(&mut from_bits, &words, 100);
        let expected: Vec<Sel> = (0..100).filter(|&i| compressed[i] <= 6).map(|i| i as Sel).collect();
        assert_eq!(&from_bits[..n], expected.as_slice());

        // Only the first 40 rows requested.
        let n = select_bitmap(&mut from_bits, &words, 40);
        assert!(from_bits[..n].iter().all(|&i| i < 40));
    }

    #[test]
    fn domain_encoding() {
        let d = GroupDomain::new(MinMax { min: b'A' as i8, max: b'R' as i8 }, MinMax { min: b'F' as i8, max: b'O' as i8 })
            .unwrap();
        assert_eq!(d.size(), 18 * 10);
        let g = d.gid(b'N' as i8, b'O' as i8);
        assert!((g as usize) < d.size());
        assert_eq!(d.decode(g), (b'N', b'O'));
        assert_eq!(d.gid(b'A' as i8, b'F' as i8), 0);

        let wide = GroupDomain::new(MinMax { min: 0, max: 127 }, MinMax { min: 0, max: 3 });
        assert!(matches!(wide, Err(ExecError::DomainTooLarge { size: 512, .. })));
    }

    #[test]
    fn maps_follow_selection() {
        let discount = [4i8, 9, 10];
        let tax = [2i8, 6, 0];
        let price = [2_116_823i32, 4_598_316, 4_679_647];
        let sel = [0 as Sel, 2];
        let mut disc_1 = [0i8; 3];
        let mut tax_1 = [0i8; 3];
        let mut disc_price = [0i32; 3];
        let mut charge = [0i64; 3];

        map_disc_1(&mut disc_1, Some(&sel), 2, 100, &discount);
        map_tax_1(&mut tax_1, Some(&sel), 2, &tax, 100);
        map_disc_price(&mut disc_price, Some(&sel), 2, &disc_1, &price);
        map_charge(&mut charge, &disc_price, &tax_1, Some(&sel), 2);

        assert_eq!(disc_1, [96, 0, 90]);
        assert_eq!(disc_price[0], 96 * 2_116_823);
        assert_eq!(charge[2], 90 * 4_679_647 * 100);
        // Row 1 not selected, untouched.
        assert_eq!(charge[1], 0);
    }
}

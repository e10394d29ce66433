//! Immutable typed columns with precomputed bounds.

use serde::{Deserialize, Serialize};

/// Inclusive value bounds of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinMax<T> {
    /// Smallest value.
    pub min: T,
    /// Largest value.
    pub max: T,
}

/// Column values plus their [`MinMax`] bounds (`None` when empty).
#[derive(Debug, Clone)]
pub struct Column<T> {
    values: Box<[T]>,
    minmax: Option<MinMax<T>>,
}

impl<T: Copy + Ord> Column<T> {
    /// Take ownership of `values` and compute bounds in one pass.
    pub fn new(values: Vec<T>) -> Self {
        let minmax = values.iter().fold(None, |acc: Option<MinMax<T>>, &v| {
            Some(match acc {
                None => MinMax { min: v, max: v },
                Some(mm) => MinMax { min: mm.min.min(v), max: mm.max.max(v) },
            })
        });
        Self { values: values.into_boxed_slice(), minmax }
    }

    /// All values.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Bounds, `None` for an empty column.
    pub fn minmax(&self) -> Option<MinMax<T>> {
        self.minmax
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let c = Column::new(vec![3i8, -2, 7, 0]);
        assert_eq!(c.minmax(), Some(MinMax { min: -2, max: 7 }));
        assert_eq!(c.len(), 4);
        assert!(Column::<i16>::new(Vec::new()).minmax().is_none());
    }
}

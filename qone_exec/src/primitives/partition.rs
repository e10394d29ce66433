//! Contiguous-run partitioning ("shuffle") of a batch's selected rows by
//! group id.
//!
//! After partitioning, rows of one group sit next to each other in
//! [`Runs`], so each measure can be reduced per run instead of scattered per
//! row. All three partitioners produce identical runs: groups in order of
//! first appearance, rows inside a run in batch order.

use super::{Gid, Sel, LANES, MAX_GROUPS};

const NO_SLOT: u16 = u16::MAX;

/// Partitioned row positions of one batch.
#[derive(Debug, Clone)]
pub struct Runs {
    pos: Box<[Sel]>,
    lim: Box<[u32]>,
    grp: Box<[Gid]>,
    len: usize,
}

impl Runs {
    /// Room for a batch of `vector_size` rows.
    pub fn new(vector_size: usize) -> Self {
        Self {
            pos: vec![0; vector_size].into_boxed_slice(),
            lim: vec![0; vector_size].into_boxed_slice(),
            grp: vec![0; vector_size].into_boxed_slice(),
            len: 0,
        }
    }

    /// Number of runs in the last partitioned batch.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the last batch had no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `(group, row offsets)` for every run.
    pub fn iter(&self) -> impl Iterator<Item = (Gid, &[Sel])> + '_ {
        let mut start = 0usize;
        (0..self.len).map(move |k| {
            let end = self.lim[k] as usize;
            let rows = &self.pos[start..end];
            start = end;
            (self.grp[k], rows)
        })
    }
}

/// Scratch owned by one kernel: a group-to-slot table, per-slot write
/// cursors, and one arena split into two half-size regions (gathered row
/// offsets and their keys).
#[derive(Debug, Clone)]
pub struct PartitionScratch {
    slot_of: Box<[u16]>,
    cursor: Box<[u32]>,
    arena: Box<[u16]>,
}

impl PartitionScratch {
    /// Scratch for batches of up to `vector_size` rows.
    pub fn new(vector_size: usize) -> Self {
        Self {
            slot_of: vec![NO_SLOT; MAX_GROUPS].into_boxed_slice(),
            cursor: vec![0; vector_size].into_boxed_slice(),
            arena: vec![0; 2 * vector_size].into_boxed_slice(),
        }
    }
}

/// Partitioning algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Partitioner {
    /// Per-row histogram and scatter.
    #[default]
    Scalar,
    /// Per-lane-block: take the lowest pending lane as leader, compare all
    /// lanes against it, retire the matching mask.
    Compare,
    /// Per-lane-block conflict masks: a row's slot inside its run is the
    /// population count of lower lanes with the same key.
    PopulationCount,
}

#[inline(always)]
fn eq_mask(lanes: &[Gid], key: Gid) -> u32 {
    lanes
        .iter()
        .enumerate()
        .fold(0u32, |m, (l, &v)| m | (((v == key) as u32) << l))
}

#[inline(always)]
fn low_mask(len: usize) -> u32 {
    if len >= 32 {
        u32::MAX
    } else {
        (1u32 << len) - 1
    }
}

struct Slots<'a> {
    slot_of: &'a mut [u16],
    cursor: &'a mut [u32],
    grp: &'a mut [Gid],
    len: usize,
}

impl Slots<'_> {
    #[inline(always)]
    fn get_or_insert(&mut self, key: Gid) -> usize {
        let s = self.slot_of[key as usize];
        if s != NO_SLOT {
            return s as usize;
        }
        let s = self.len;
        self.slot_of[key as usize] = s as u16;
        self.grp[s] = key;
        self.cursor[s] = 0;
        self.len += 1;
        s
    }

    #[inline(always)]
    fn get(&self, key: Gid) -> usize {
        self.slot_of[key as usize] as usize
    }
}

impl Partitioner {
    /// Partition the `num` selected rows of a batch. Returns the run count.
    pub fn partition(
        self,
        gids: &[Gid],
        sel: Option<&[Sel]>,
        num: usize,
        runs: &mut Runs,
        scratch: &mut PartitionScratch,
    ) -> usize {
        let PartitionScratch { slot_of, cursor, arena } = scratch;
        let (rows, keys) = arena.split_at_mut(arena.len() / 2);
        let (rows, keys) = (&mut rows[..num], &mut keys[..num]);
        match sel {
            Some(sel) => {
                for (j, &i) in sel[..num].iter().enumerate() {
                    rows[j] = i;
                    keys[j] = gids[i as usize];
                }
            }
            None => {
                for j in 0..num {
                    rows[j] = j as Sel;
                    keys[j] = gids[j];
                }
            }
        }

        let Runs { pos, lim, grp, len } = runs;
        let mut slots = Slots { slot_of, cursor, grp, len: 0 };

        match self {
            Self::Scalar => {
                for &k in keys.iter() {
                    let s = slots.get_or_insert(k);
                    slots.cursor[s] += 1;
                }
            }
            Self::Compare => {
                for chunk in keys.chunks(LANES) {
                    let mut pending = low_mask(chunk.len());
                    while pending != 0 {
                        let key = chunk[pending.trailing_zeros() as usize];
                        let eq = eq_mask(chunk, key) & pending;
                        let s = slots.get_or_insert(key);
                        slots.cursor[s] += eq.count_ones();
                        pending &= !eq;
                    }
                }
            }
            Self::PopulationCount => {
                for chunk in keys.chunks(LANES) {
                    for (l, &key) in chunk.iter().enumerate() {
                        if eq_mask(&chunk[..l], key) == 0 {
                            let s = slots.get_or_insert(key);
                            slots.cursor[s] += eq_mask(chunk, key).count_ones();
                        }
                    }
                }
            }
        }

        // Exclusive prefix sum: counts become run starts, `lim` run ends.
        let mut acc = 0u32;
        for s in 0..slots.len {
            let c = slots.cursor[s];
            slots.cursor[s] = acc;
            acc += c;
            lim[s] = acc;
        }
        debug_assert_eq!(acc as usize, num);

        match self {
            Self::Scalar => {
                for (j, &k) in keys.iter().enumerate() {
                    let s = slots.get(k);
                    pos[slots.cursor[s] as usize] = rows[j];
                    slots.cursor[s] += 1;
                }
            }
            Self::Compare => {
                for (c, chunk) in keys.chunks(LANES).enumerate() {
                    let base = c * LANES;
                    let mut pending = low_mask(chunk.len());
                    while pending != 0 {
                        let key = chunk[pending.trailing_zeros() as usize];
                        let eq = eq_mask(chunk, key) & pending;
                        let s = slots.get(key);
                        let mut bits = eq;
                        while bits != 0 {
                            pos[slots.cursor[s] as usize] = rows[base + bits.trailing_zeros() as usize];
                            slots.cursor[s] += 1;
                            bits &= bits - 1;
                        }
                        pending &= !eq;
                    }
                }
            }
            Self::PopulationCount => {
                let mut conflict = [0u32; LANES];
                for (c, chunk) in keys.chunks(LANES).enumerate() {
                    let base = c * LANES;
                    for (l, &key) in chunk.iter().enumerate() {
                        conflict[l] = eq_mask(&chunk[..l], key);
                    }
                    for (l, &key) in chunk.iter().enumerate() {
                        let s = slots.get(key);
                        pos[(slots.cursor[s] + conflict[l].count_ones()) as usize] = rows[base + l];
                    }
                    for (l, &key) in chunk.iter().enumerate() {
                        if conflict[l] == 0 {
                            let s = slots.get(key);
                            slots.cursor[s] += eq_mask(chunk, key).count_ones();
                        }
                    }
                }
            }
        }

        for &key in &slots.grp[..slots.len] {
            slots.slot_of[key as usize] = NO_SLOT;
        }
        *len = slots.len;
        slots.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Partitioner; 3] = [Partitioner::Scalar, Partitioner::Compare, Partitioner::PopulationCount];

    fn collect(runs: &Runs) -> Vec<(Gid, Vec<Sel>)> {
        runs.iter().map(|(g, rows)| (g, rows.to_vec())).collect()
    }

    #[test]
    fn groups_rows_contiguously_in_first_seen_order() {
        let gids: Vec<Gid> = vec![3, 3, 1, 0, 1, 3, 2];
        let mut runs = Runs::new(64);
        let mut scratch = PartitionScratch::new(64);
        for p in ALL {
            let n = p.partition(&gids, None, gids.len(), &mut runs, &mut scratch);
            assert_eq!(n, 4);
            assert_eq!(
                collect(&runs),
                vec![(3, vec![0, 1, 5]), (1, vec![2, 4]), (0, vec![3]), (2, vec![6])],
                "{p:?}"
            );
        }
    }

    #[test]
    fn honours_selection() {
        let gids: Vec<Gid> = (0..40).map(|i| (i % 3) as Gid).collect();
        let sel: Vec<Sel> = (0..40).filter(|i| i % 4 == 0).map(|i| i as Sel).collect();
        let mut runs = Runs::new(64);
        let mut scratch = PartitionScratch::new(64);
        for p in ALL {
            p.partition(&gids, Some(&sel), sel.len(), &mut runs, &mut scratch);
            let total: usize = runs.iter().map(|(_, rows)| rows.len()).sum();
            assert_eq!(total, sel.len());
            for (g, rows) in runs.iter() {
                assert!(rows.iter().all(|&r| gids[r as usize] == g && r % 4 == 0));
            }
        }
    }

    #[test]
    fn partitioners_agree_on_pseudo_random_batches() {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let mut runs = Runs::new(1024);
        let mut scratch = PartitionScratch::new(1024);
        for round in 0..20 {
            let groups = 1 + round % 9;
            let gids: Vec<Gid> = (0..1000).map(|_| (next() % groups) as Gid).collect();
            let sel: Vec<Sel> = (0..1000).filter(|_| next() % 3 != 0).map(|i| i as Sel).collect();
            let mut expected = None;
            for p in ALL {
                p.partition(&gids, Some(&sel), sel.len(), &mut runs, &mut scratch);
                let got = collect(&runs);
                match &expected {
                    None => expected = Some(got),
                    Some(e) => assert_eq!(&got, e, "{p:?} round {round}"),
                }
            }
        }
    }

    #[test]
    fn empty_batch_has_no_runs() {
        let mut runs = Runs::new(32);
        let mut scratch = PartitionScratch::new(32);
        for p in ALL {
            assert_eq!(p.partition(&[], None, 0, &mut runs, &mut scratch), 0);
            assert!(runs.is_empty());
        }
    }
}

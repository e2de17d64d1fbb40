//! In-memory sequence store.
//!
//! The store owns the dense table of records loaded from one input file and
//! provides index-based lookups and the two sort orders consumed by the
//! clustering driver and the sort commands. Record indices are positions in
//! the (possibly sorted) table and are stable once a pipeline starts.

use std::path::Path;

use crate::error::MetamerError;
use crate::reader::{read_all, ReadPolicy, ReadStats};
use crate::record::SeqRecord;

/// Dense table of loaded sequence records.
#[derive(Debug, Default)]
pub struct SeqStore {
    records: Vec<SeqRecord>,
    stats: ReadStats,
}

impl SeqStore {
    /// Loads all records from `path` under the given policy.
    pub fn load(path: &Path, policy: &ReadPolicy) -> Result<Self, MetamerError> {
        let (records, stats) = read_all(path, policy.clone())?;
        Ok(Self { records, stats })
    }

    /// Builds a store from records already in memory.
    pub fn from_records(records: Vec<SeqRecord>) -> Self {
        let mut stats = ReadStats {
            shortest: u32::MAX,
            ..ReadStats::default()
        };
        for rec in &records {
            let len = rec.seq.len() as u32;
            stats.sequences += 1;
            stats.nucleotides += u64::from(len);
            stats.shortest = stats.shortest.min(len);
            stats.longest = stats.longest.max(len);
        }
        Self { records, stats }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `index`; panics on out-of-range (indices come from the
    /// store itself).
    pub fn get(&self, index: usize) -> &SeqRecord {
        &self.records[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut SeqRecord {
        &mut self.records[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeqRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SeqRecord> {
        self.records.iter_mut()
    }

    /// Parallel mutable iteration over the records (used by the masker).
    pub fn par_iter_mut_records(
        &mut self,
    ) -> rayon::slice::IterMut<'_, SeqRecord> {
        use rayon::prelude::*;
        self.records.par_iter_mut()
    }

    /// Length of the longest record (0 for an empty store).
    pub fn longest(&self) -> u32 {
        if self.records.is_empty() {
            0
        } else {
            self.stats.longest
        }
    }

    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    /// Prints the classic load summary line to stderr.
    pub fn log_summary(&self) {
        if self.stats.sequences > 0 {
            eprintln!(
                "{} nt in {} seqs, min {}, max {}, avg {:.0}",
                self.stats.nucleotides,
                self.stats.sequences,
                self.stats.shortest,
                self.stats.longest,
                self.stats.nucleotides as f64 / self.stats.sequences as f64
            );
        } else {
            eprintln!("{} nt in {} seqs", self.stats.nucleotides, self.stats.sequences);
        }
    }

    /// Sorts by (length desc, abundance desc, header asc); ties keep the
    /// previous order.
    pub fn sort_by_length(&mut self) {
        self.records.sort_by(|x, y| {
            y.seq
                .len()
                .cmp(&x.seq.len())
                .then_with(|| y.abundance.cmp(&x.abundance))
                .then_with(|| x.header.cmp(&y.header))
        });
    }

    /// Sorts by (abundance desc, header asc); ties keep the previous order.
    pub fn sort_by_abundance(&mut self) {
        self.records.sort_by(|x, y| {
            y.abundance
                .cmp(&x.abundance)
                .then_with(|| x.header.cmp(&y.header))
        });
    }

    /// Shuffles the records with the given RNG.
    pub fn shuffle<R: rand::Rng>(&mut self, rng: &mut R) {
        use rand::seq::SliceRandom;
        self.records.shuffle(rng);
    }

    /// Keeps only the first `n` records (used by `--topn`).
    pub fn truncate(&mut self, n: usize) {
        self.records.truncate(n);
    }

    /// Drops records whose abundance falls outside `[minsize, maxsize]`.
    pub fn retain_abundance(&mut self, minsize: u64, maxsize: u64) {
        self.records
            .retain(|r| r.abundance >= minsize && r.abundance <= maxsize);
    }

    pub fn into_records(self) -> Vec<SeqRecord> {
        self.records
    }
}

//! Sorting and shuffling commands.
//!
//! `sortbysize` and `sortbylength` reorder a loaded store and rewrite it;
//! `shuffle` permutes it with a seedable RNG. All three honor `--topn` and
//! optional abundance re-annotation.

use std::path::Path;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::error::MetamerError;
use crate::output::FastaWriter;
use crate::record::header_with_size;
use crate::store::SeqStore;

/// Options shared by the sorting commands.
#[derive(Debug, Clone)]
pub struct SortParams {
    /// Keep only the first N records after sorting.
    pub topn: usize,
    pub sizeout: bool,
    /// For `sortbysize`: drop clusters below this abundance.
    pub minsize: u64,
    /// For `sortbysize`: drop clusters above this abundance.
    pub maxsize: u64,
}

impl Default for SortParams {
    fn default() -> Self {
        Self {
            topn: usize::MAX,
            sizeout: false,
            minsize: 0,
            maxsize: u64::MAX,
        }
    }
}

fn write_store(store: &SeqStore, params: &SortParams, output: &Path) -> Result<(), MetamerError> {
    let mut out = FastaWriter::create(output)?;
    for rec in store.iter().take(params.topn) {
        if params.sizeout {
            out.write(&header_with_size(&rec.header, rec.abundance), &rec.seq)?;
        } else {
            out.write(&rec.header, &rec.seq)?;
        }
    }
    out.finish()
}

/// Sorts by abundance (descending) and writes the result.
pub fn sortbysize(
    store: &mut SeqStore,
    params: &SortParams,
    output: &Path,
) -> Result<(), MetamerError> {
    store.retain_abundance(params.minsize, params.maxsize);
    store.sort_by_abundance();
    write_store(store, params, output)
}

/// Sorts by length (descending) and writes the result.
pub fn sortbylength(
    store: &mut SeqStore,
    params: &SortParams,
    output: &Path,
) -> Result<(), MetamerError> {
    store.sort_by_length();
    write_store(store, params, output)
}

/// Shuffles the records and writes the result. A seed of 0 draws one from
/// the system.
pub fn shuffle(
    store: &mut SeqStore,
    params: &SortParams,
    seed: u64,
    output: &Path,
) -> Result<(), MetamerError> {
    let mut rng = if seed == 0 {
        SmallRng::from_entropy()
    } else {
        SmallRng::seed_from_u64(seed)
    };
    store.shuffle(&mut rng);
    write_store(store, params, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SeqRecord;
    use tempfile::NamedTempFile;

    fn rec(header: &str, seq: &[u8], abundance: u64) -> SeqRecord {
        SeqRecord {
            header: header.to_string(),
            seq: seq.to_vec(),
            qual: None,
            abundance,
        }
    }

    #[test]
    fn sortbysize_orders_and_annotates() {
        let mut store = SeqStore::from_records(vec![
            rec("low", b"ACGT", 2),
            rec("high", b"GGCC", 9),
        ]);
        let out = NamedTempFile::new().unwrap();
        let params = SortParams {
            sizeout: true,
            ..SortParams::default()
        };
        sortbysize(&mut store, &params, out.path()).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(text, ">high;size=9;\nGGCC\n>low;size=2;\nACGT\n");
    }

    #[test]
    fn sortbysize_applies_size_window() {
        let mut store = SeqStore::from_records(vec![
            rec("a", b"ACGT", 1),
            rec("b", b"GGCC", 5),
            rec("c", b"TTAA", 50),
        ]);
        let out = NamedTempFile::new().unwrap();
        let params = SortParams {
            minsize: 2,
            maxsize: 10,
            ..SortParams::default()
        };
        sortbysize(&mut store, &params, out.path()).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(text, ">b\nGGCC\n");
    }

    #[test]
    fn sortbylength_with_topn() {
        let mut store = SeqStore::from_records(vec![
            rec("short", b"AC", 1),
            rec("long", b"ACGTACGT", 1),
            rec("mid", b"ACGT", 1),
        ]);
        let out = NamedTempFile::new().unwrap();
        let params = SortParams {
            topn: 2,
            ..SortParams::default()
        };
        sortbylength(&mut store, &params, out.path()).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(text, ">long\nACGTACGT\n>mid\nACGT\n");
    }

    #[test]
    fn shuffle_is_deterministic_with_seed() {
        let records = vec![
            rec("a", b"ACGT", 1),
            rec("b", b"GGCC", 1),
            rec("c", b"TTAA", 1),
            rec("d", b"CCGG", 1),
        ];
        let out1 = NamedTempFile::new().unwrap();
        let out2 = NamedTempFile::new().unwrap();
        let params = SortParams::default();

        let mut store = SeqStore::from_records(records.clone());
        shuffle(&mut store, &params, 42, out1.path()).unwrap();
        let mut store = SeqStore::from_records(records);
        shuffle(&mut store, &params, 42, out2.path()).unwrap();

        let a = std::fs::read_to_string(out1.path()).unwrap();
        let b = std::fs::read_to_string(out2.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.lines().count(), 8);
    }
}

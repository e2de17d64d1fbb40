//! Dereplication: collapsing identical full-length sequences.
//!
//! `derep_smallmem` never holds sequences: it streams the input twice,
//! aggregating abundances by 128-bit fingerprint in the first pass and
//! emitting the first occurrence of each surviving cluster in the second.
//! Equal fingerprints are treated as equal sequences. `derep_fulllength`
//! keeps records in memory, which additionally allows UC output and
//! abundance-sorted emission.
//!
//! With `strand=both`, a sequence joins the cluster of its reverse
//! complement when one exists; a palindromic sequence matches itself on
//! the plus probe and never reaches the minus probe.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::alphabet::{normalize, reverse_complement};
use crate::error::MetamerError;
use crate::fingerprint::{fingerprint_normalized, DerepTable};
use crate::output::{FastaWriter, UcWriter};
use crate::reader::{FastxStream, ReadPolicy};
use crate::record::header_with_size;
use crate::store::SeqStore;

/// Dereplication options.
#[derive(Debug, Clone)]
pub struct DerepParams {
    pub strand_both: bool,
    /// Take input abundances from `size=` annotations.
    pub sizein: bool,
    /// Write `size=` annotations on output.
    pub sizeout: bool,
    pub minuniquesize: i64,
    pub maxuniquesize: i64,
}

impl Default for DerepParams {
    fn default() -> Self {
        Self {
            strand_both: false,
            sizein: false,
            sizeout: false,
            minuniquesize: 1,
            maxuniquesize: i64::MAX,
        }
    }
}

/// Totals reported after dereplication.
#[derive(Debug, Default, Clone, Copy)]
pub struct DerepSummary {
    pub sequences: u64,
    pub clusters: u64,
    pub selected: u64,
    pub sumsize: i64,
    pub maxsize: i64,
    pub median: f64,
}

impl DerepSummary {
    pub fn log_summary(&self) {
        if self.clusters == 0 {
            eprintln!("0 unique sequences");
            return;
        }
        eprintln!(
            "{} unique sequences, avg cluster {:.1}, median {:.0}, max {}",
            self.clusters,
            self.sumsize as f64 / self.clusters as f64,
            self.median,
            self.maxsize
        );
        if self.selected < self.clusters {
            eprintln!(
                "{} uniques written, {} clusters discarded ({:.1}%)",
                self.selected,
                self.clusters - self.selected,
                100.0 * (self.clusters - self.selected) as f64 / self.clusters as f64
            );
        }
    }
}

/// Locates the bucket for a sequence, probing the reverse complement when
/// the plus strand finds no existing cluster.
fn locate_bucket(table: &DerepTable, normalized: &[u8], strand_both: bool) -> usize {
    let hash = fingerprint_normalized(normalized);
    let slot = table.find(hash);
    if strand_both && table.bucket(slot).size == 0 {
        let rc = reverse_complement(normalized);
        let rc_slot = table.find(fingerprint_normalized(&rc));
        if table.bucket(rc_slot).size != 0 {
            return rc_slot;
        }
    }
    slot
}

/// Two-pass small-memory dereplication.
pub fn derep_smallmem(
    input: &Path,
    policy: &ReadPolicy,
    params: &DerepParams,
    fastaout: &Path,
) -> Result<DerepSummary, MetamerError> {
    let mut table = DerepTable::new();
    let mut summary = DerepSummary::default();

    // first pass: aggregate abundances by fingerprint
    let mut stream = FastxStream::open(input, policy.clone())?;
    while let Some(rec) = stream.next_record()? {
        summary.sequences += 1;

        table.reserve_for_insert();
        let normalized = normalize(&rec.seq);
        let slot = locate_bucket(&table, &normalized, params.strand_both);

        let ab = if params.sizein {
            rec.abundance as i64
        } else {
            1
        };
        summary.sumsize += ab;

        let hash = fingerprint_normalized(&normalized);
        let bucket = table.bucket_mut(slot);
        if bucket.size != 0 {
            bucket.size += ab;
        } else {
            bucket.size = ab;
            bucket.hash = hash;
            table.note_new_cluster();
        }
        summary.maxsize = summary.maxsize.max(table.bucket(slot).size);
    }
    stream.stats().log_warnings(policy);

    summary.clusters = table.clusters();
    summary.median = table.median();

    // second pass: emit the first occurrence of each surviving cluster
    let mut stream = FastxStream::open(input, policy.clone())?;
    let mut out = FastaWriter::create(fastaout)?;
    while let Some(rec) = stream.next_record()? {
        let normalized = normalize(&rec.seq);
        let slot = locate_bucket(&table, &normalized, params.strand_both);
        let size = table.bucket(slot).size;

        if size > 0 {
            if size >= params.minuniquesize && size <= params.maxuniquesize {
                summary.selected += 1;
                if params.sizeout {
                    out.write(&header_with_size(&rec.header, size as u64), &rec.seq)?;
                } else {
                    out.write(&rec.header, &rec.seq)?;
                }
            }
            // mark emitted so duplicates are not re-emitted
            table.bucket_mut(slot).size = -1;
        }
    }
    out.finish()?;

    Ok(summary)
}

/// Output destinations for `derep_fulllength`.
#[derive(Debug, Default, Clone)]
pub struct DerepIo {
    pub output: Option<PathBuf>,
    pub uc: Option<PathBuf>,
}

struct FullCluster {
    representative: usize,
    members: Vec<usize>,
    size: i64,
}

/// In-memory dereplication over a loaded store, emitting clusters in
/// decreasing abundance order.
pub fn derep_fulllength(
    store: &SeqStore,
    params: &DerepParams,
    io: &DerepIo,
) -> Result<DerepSummary, MetamerError> {
    let mut clusters: Vec<FullCluster> = Vec::new();
    let mut by_hash: FxHashMap<u128, usize> = FxHashMap::default();
    let mut summary = DerepSummary::default();

    for (seqno, rec) in store.iter().enumerate() {
        summary.sequences += 1;
        let ab = if params.sizein {
            rec.abundance as i64
        } else {
            1
        };
        summary.sumsize += ab;

        let normalized = normalize(&rec.seq);
        let hash = fingerprint_normalized(&normalized);

        let mut slot = by_hash.get(&hash).copied();
        if slot.is_none() && params.strand_both {
            let rc = reverse_complement(&normalized);
            slot = by_hash.get(&fingerprint_normalized(&rc)).copied();
        }

        match slot {
            Some(c) => {
                clusters[c].size += ab;
                clusters[c].members.push(seqno);
            }
            None => {
                by_hash.insert(hash, clusters.len());
                clusters.push(FullCluster {
                    representative: seqno,
                    members: vec![seqno],
                    size: ab,
                });
            }
        }
    }

    summary.clusters = clusters.len() as u64;
    summary.maxsize = clusters.iter().map(|c| c.size).max().unwrap_or(0);
    summary.median = median_of(&mut clusters.iter().map(|c| c.size).collect::<Vec<_>>());

    // most abundant first; ties keep discovery order
    let mut order: Vec<usize> = (0..clusters.len()).collect();
    order.sort_by_key(|&c| std::cmp::Reverse(clusters[c].size));

    let mut out = io.output.as_deref().map(FastaWriter::create).transpose()?;
    let mut uc = io.uc.as_deref().map(UcWriter::create).transpose()?;

    for (cluster_id, &c) in order.iter().enumerate() {
        let cluster = &clusters[c];
        let rep = store.get(cluster.representative);

        if cluster.size >= params.minuniquesize && cluster.size <= params.maxuniquesize {
            summary.selected += 1;
            if let Some(out) = out.as_mut() {
                if params.sizeout {
                    out.write(&header_with_size(&rep.header, cluster.size as u64), &rep.seq)?;
                } else {
                    out.write(&rep.header, &rep.seq)?;
                }
            }
        }

        if let Some(uc) = uc.as_mut() {
            uc.seed(cluster_id, rep.seq.len(), &rep.header)?;
            for &member in cluster.members.iter().skip(1) {
                let rec = store.get(member);
                uc.hit(
                    cluster_id,
                    rec.seq.len(),
                    100.0,
                    0,
                    "=",
                    &rec.header,
                    &rep.header,
                )?;
            }
            uc.cluster(cluster_id, cluster.size as u64, &rep.header)?;
        }
    }

    if let Some(out) = out.take() {
        out.finish()?;
    }
    if let Some(uc) = uc.take() {
        uc.finish()?;
    }

    Ok(summary)
}

/// Median of a small list of cluster sizes.
fn median_of(sizes: &mut [i64]) -> f64 {
    if sizes.is_empty() {
        return 0.0;
    }
    sizes.sort_unstable();
    let n = sizes.len();
    if n % 2 == 1 {
        sizes[n / 2] as f64
    } else {
        (sizes[n / 2 - 1] + sizes[n / 2]) as f64 / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn policy() -> ReadPolicy {
        ReadPolicy::default()
    }

    fn run_smallmem(input: &str, params: &DerepParams) -> (DerepSummary, String) {
        let f = write_temp(input);
        let out = NamedTempFile::new().unwrap();
        let summary = derep_smallmem(f.path(), &policy(), params, out.path()).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        (summary, text)
    }

    #[test]
    fn exact_duplicates_collapse() {
        let params = DerepParams {
            sizeout: true,
            ..DerepParams::default()
        };
        let (summary, text) = run_smallmem(">a\nACGT\n>b\nACGT\n>c\nACGA\n", &params);
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.selected, 2);
        assert_eq!(text, ">a;size=2;\nACGT\n>c;size=1;\nACGA\n");
    }

    #[test]
    fn abundance_is_conserved() {
        let params = DerepParams {
            sizein: true,
            sizeout: true,
            ..DerepParams::default()
        };
        let (summary, text) = run_smallmem(
            ">a;size=3;\nACGT\n>b;size=5;\nACGT\n>c;size=2;\nTTGG\n",
            &params,
        );
        assert_eq!(summary.sumsize, 10);
        assert!(text.contains(">a;size=8;"));
        assert!(text.contains(">c;size=2;"));
    }

    #[test]
    fn strand_both_collapses_reverse_complements() {
        let params = DerepParams {
            strand_both: true,
            sizeout: true,
            ..DerepParams::default()
        };
        // GGGA and TCCC are mutual reverse complements
        let (summary, text) = run_smallmem(">a\nGGGA\n>b\nTCCC\n", &params);
        assert_eq!(summary.clusters, 1);
        assert_eq!(text, ">a;size=2;\nGGGA\n");
    }

    #[test]
    fn palindrome_clusters_with_itself() {
        let params = DerepParams {
            strand_both: true,
            sizeout: true,
            ..DerepParams::default()
        };
        // ACGT is its own reverse complement
        let (summary, text) = run_smallmem(">a\nACGT\n>b\nACGT\n>c\nACGT\n>d\nACGT\n", &params);
        assert_eq!(summary.clusters, 1);
        assert_eq!(text, ">a;size=4;\nACGT\n");
    }

    #[test]
    fn minuniquesize_filters_output_but_not_clusters() {
        let params = DerepParams {
            sizeout: true,
            minuniquesize: 2,
            ..DerepParams::default()
        };
        let (summary, text) = run_smallmem(">a\nACGT\n>b\nACGT\n>c\nACGA\n", &params);
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.selected, 1);
        assert_eq!(text, ">a;size=2;\nACGT\n");
    }

    #[test]
    fn case_and_u_are_normalized() {
        let params = DerepParams {
            sizeout: true,
            ..DerepParams::default()
        };
        let (summary, _) = run_smallmem(">a\nACGT\n>b\nacgu\n", &params);
        assert_eq!(summary.clusters, 1);
    }

    #[test]
    fn fulllength_emits_most_abundant_first() {
        use crate::record::SeqRecord;
        let store = SeqStore::from_records(vec![
            SeqRecord {
                header: "a".into(),
                seq: b"ACGT".to_vec(),
                qual: None,
                abundance: 1,
            },
            SeqRecord {
                header: "b".into(),
                seq: b"GGCC".to_vec(),
                qual: None,
                abundance: 1,
            },
            SeqRecord {
                header: "c".into(),
                seq: b"GGCC".to_vec(),
                qual: None,
                abundance: 1,
            },
        ]);
        let out = NamedTempFile::new().unwrap();
        let io = DerepIo {
            output: Some(out.path().to_path_buf()),
            uc: None,
        };
        let params = DerepParams {
            sizeout: true,
            ..DerepParams::default()
        };
        let summary = derep_fulllength(&store, &params, &io).unwrap();
        assert_eq!(summary.clusters, 2);
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(text, ">b;size=2;\nGGCC\n>a;size=1;\nACGT\n");
    }

    #[test]
    fn median_of_sizes() {
        assert_eq!(median_of(&mut [1, 5, 9]), 5.0);
        assert_eq!(median_of(&mut [1, 3, 5, 9]), 4.0);
        assert_eq!(median_of(&mut []), 0.0);
    }
}

//! Greedy centroid clustering.
//!
//! Records are visited in a defined order (length-sorted, abundance-sorted
//! or caller order) and searched against the live index of centroids. A
//! record with an accepted hit joins the best hit's cluster; otherwise it
//! becomes a new centroid and enters the index. The sequence store is
//! immutable during each search; the driver alone appends to the index
//! between queries.

use std::path::PathBuf;

use crate::error::MetamerError;
use crate::hits::Hit;
use crate::kmerindex::KmerIndex;
use crate::output::{FastaWriter, UcWriter};
use crate::search::{PreparedQuery, SearchParams, SearchWorker};
use crate::store::SeqStore;

/// Input ordering for the clustering driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    /// Sort by length (descending) before clustering.
    Fast,
    /// Sort by abundance (descending) before clustering.
    Size,
    /// Trust the caller's order; refuse records out of length order unless
    /// `usersort` is set.
    SmallMem { usersort: bool },
}

/// Output destinations for clustering.
#[derive(Debug, Default, Clone)]
pub struct ClusterIo {
    pub uc: Option<PathBuf>,
    pub centroids: Option<PathBuf>,
    /// Prefix for one FASTA file per cluster.
    pub clusters: Option<PathBuf>,
}

/// Final cluster statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterSummary {
    pub clusters: usize,
    pub singletons: usize,
    pub size_min: usize,
    pub size_max: usize,
    pub sequences: usize,
}

impl ClusterSummary {
    pub fn log_summary(&self) {
        if self.clusters == 0 {
            eprintln!("Clusters: 0");
            return;
        }
        eprintln!(
            "Clusters: {} Size min {}, max {}, avg {:.1}",
            self.clusters,
            self.size_min,
            self.size_max,
            self.sequences as f64 / self.clusters as f64
        );
        eprintln!(
            "Singletons: {}, {:.1}% of seqs, {:.1}% of clusters",
            self.singletons,
            100.0 * self.singletons as f64 / self.sequences as f64,
            100.0 * self.singletons as f64 / self.clusters as f64
        );
    }
}

/// Clusters the store in the given order and writes the outputs.
pub fn cluster(
    store: &mut SeqStore,
    mode: ClusterMode,
    params: &SearchParams,
    io: &ClusterIo,
) -> Result<ClusterSummary, MetamerError> {
    match mode {
        ClusterMode::Fast => store.sort_by_length(),
        ClusterMode::Size => store.sort_by_abundance(),
        ClusterMode::SmallMem { .. } => {}
    }

    let seqcount = store.len();
    let mut index = KmerIndex::new(params.wordlength)?;
    let mut worker = SearchWorker::new(store, params);

    let mut uc = io.uc.as_deref().map(UcWriter::create).transpose()?;
    let mut centroids = io.centroids.as_deref().map(FastaWriter::create).transpose()?;

    // cluster number per record
    let mut clusterno = vec![0usize; seqcount];
    let mut clusters = 0usize;
    let mut last_length = u32::MAX;

    for seqno in 0..seqcount {
        let rec = store.get(seqno);
        let length = rec.seq.len() as u32;

        if let ClusterMode::SmallMem { usersort: false } = mode {
            if length > last_length {
                return Err(MetamerError::OptionConflict(
                    "sequences are not sorted by length; use --usersort to cluster anyway"
                        .into(),
                ));
            }
        }
        last_length = length;

        let query = PreparedQuery::prepare(rec, params);
        let hits: Vec<Hit> = worker.search_onequery(&index, &query)?;

        if let Some(best) = hits.first() {
            clusterno[seqno] = clusterno[best.target];
            if let Some(uc) = uc.as_mut() {
                uc.hit(
                    clusterno[best.target],
                    rec.seq.len(),
                    100.0 * best.id,
                    best.strand,
                    &best.cigar,
                    &rec.header,
                    &store.get(best.target).header,
                )?;
            }
        } else {
            clusterno[seqno] = clusters;
            index.add_sequence(seqno as u32, &store.get(seqno).seq);
            if let Some(uc) = uc.as_mut() {
                uc.seed(clusters, store.get(seqno).seq.len(), &store.get(seqno).header)?;
            }
            if let Some(w) = centroids.as_mut() {
                let rec = store.get(seqno);
                w.write(&rec.header, &rec.seq)?;
            }
            clusters += 1;
        }
    }

    // group members per cluster, in (cluster, record) order
    let mut members: Vec<(usize, usize)> = clusterno
        .iter()
        .enumerate()
        .map(|(seqno, &c)| (c, seqno))
        .collect();
    members.sort_unstable();

    let mut summary = ClusterSummary {
        clusters,
        sequences: seqcount,
        size_min: usize::MAX,
        ..ClusterSummary::default()
    };

    let mut i = 0;
    while i < members.len() {
        let cluster_id = members[i].0;
        let centroid = members[i].1;
        let mut size = 0;

        let mut cluster_file = match &io.clusters {
            Some(prefix) => {
                let path = PathBuf::from(format!("{}{}", prefix.display(), cluster_id));
                Some(FastaWriter::create(&path)?)
            }
            None => None,
        };

        while i < members.len() && members[i].0 == cluster_id {
            let rec = store.get(members[i].1);
            if let Some(w) = cluster_file.as_mut() {
                w.write(&rec.header, &rec.seq)?;
            }
            size += 1;
            i += 1;
        }

        if let Some(w) = cluster_file.take() {
            w.finish()?;
        }
        if let Some(uc) = uc.as_mut() {
            uc.cluster(cluster_id, size as u64, &store.get(centroid).header)?;
        }
        summary.size_min = summary.size_min.min(size);
        summary.size_max = summary.size_max.max(size);
        if size == 1 {
            summary.singletons += 1;
        }
    }
    if summary.size_min == usize::MAX {
        summary.size_min = 0;
    }

    if let Some(w) = uc.take() {
        w.finish()?;
    }
    if let Some(w) = centroids.take() {
        w.finish()?;
    }

    Ok(summary)
}

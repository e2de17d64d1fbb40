//! Similarity search pipeline.
//!
//! Per query and strand: mask, sample the distinct k-mers, score shared
//! k-mer counts into the dense counter array, keep the top candidates in
//! the bounded min-heap, prefilter them unaligned, align survivors in
//! batches of eight, then apply the acceptance policy. Plus strand is
//! processed before minus; accepted hits from both strands are merged,
//! sorted by identity and truncated to `maxhits`.
//!
//! Workers pull queries from a shared input stream under one mutex and
//! emit results under another, so output order follows mutex acquisition
//! order, not input order, when more than one thread runs.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::align16::{LaneResult, ScoringParams, Search16, CHANNELS};
use crate::alphabet::{normalize, reverse_complement};
use crate::error::MetamerError;
use crate::hits::{Hit, IdDef};
use crate::kmerindex::{unique_kmers, Count, KmerIndex};
use crate::mask::{mask_sequence, MaskMode};
use crate::minheap::{Candidate, CandidateHeap};
use crate::nw;
use crate::otutab::OtuTable;
use crate::output::{Blast6Writer, FastaWriter, UcWriter};
use crate::reader::{FastxStream, ReadPolicy};
use crate::record::SeqRecord;
use crate::store::SeqStore;

/// Options controlling candidate selection, alignment and acceptance.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Minimum identity (fraction) for acceptance.
    pub id: f64,
    /// Hits at or above this identity but below `id` are flagged weak.
    pub weak_id: f64,
    pub iddef: IdDef,
    pub wordlength: usize,
    /// 0 disables the limit.
    pub maxaccepts: usize,
    /// 0 disables the limit.
    pub maxrejects: usize,
    pub maxhits: usize,
    pub strand_both: bool,
    pub qmask: MaskMode,
    pub hardmask: bool,
    pub scoring: ScoringParams,
    pub sizein: bool,
    pub output_no_hits: bool,

    // unaligned prefilters
    pub self_exclude: bool,
    pub selfid_exclude: bool,
    pub idprefix: usize,
    pub idsuffix: usize,
    pub minqt: f64,
    pub maxqt: f64,
    pub minsl: f64,
    pub maxsl: f64,
    pub minsizeratio: f64,
    pub maxsizeratio: f64,
    pub maxqsize: u64,
    pub mintsize: u64,
    pub maxid: f64,

    // aligned filters
    pub maxsubs: usize,
    pub maxgaps: usize,
    pub maxdiffs: usize,
    pub mincols: usize,

    pub threads: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            id: 0.0,
            weak_id: 0.0,
            iddef: IdDef::Id2,
            wordlength: crate::kmerindex::DEFAULT_WORD_LENGTH,
            maxaccepts: 1,
            maxrejects: 32,
            maxhits: usize::MAX,
            strand_both: false,
            qmask: MaskMode::Dust,
            hardmask: false,
            scoring: ScoringParams::default(),
            sizein: false,
            output_no_hits: false,
            self_exclude: false,
            selfid_exclude: false,
            idprefix: 0,
            idsuffix: 0,
            minqt: 0.0,
            maxqt: f64::MAX,
            minsl: 0.0,
            maxsl: f64::MAX,
            minsizeratio: 0.0,
            maxsizeratio: f64::MAX,
            maxqsize: u64::MAX,
            mintsize: 0,
            maxid: 1.0,
            maxsubs: usize::MAX,
            maxgaps: usize::MAX,
            maxdiffs: usize::MAX,
            mincols: 0,
            threads: 1,
        }
    }
}

/// A query prepared for searching: masked sequence plus, when both strands
/// are searched, its reverse complement.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub header: String,
    pub seq: Vec<u8>,
    pub rc: Option<Vec<u8>>,
    pub size: u64,
}

impl PreparedQuery {
    /// Masks a record per the query masking options and precomputes the
    /// minus strand when needed.
    pub fn prepare(rec: &SeqRecord, params: &SearchParams) -> Self {
        let mut seq = rec.seq.clone();
        mask_sequence(&mut seq, params.qmask, params.hardmask);
        let rc = params.strand_both.then(|| reverse_complement(&seq));
        Self {
            header: rec.header.clone(),
            seq,
            rc,
            size: rec.abundance,
        }
    }
}

/// Per-thread search scratch: counter array, heap, aligner. The k-mer
/// index is passed per query so the clustering driver can grow it between
/// queries.
pub struct SearchWorker<'a> {
    db: &'a SeqStore,
    params: &'a SearchParams,
    counters: Vec<Count>,
    aligner: Search16,
    tophits: usize,
    maxaccepts: usize,
    maxrejects: usize,
}

impl<'a> SearchWorker<'a> {
    pub fn new(db: &'a SeqStore, params: &'a SearchParams) -> Self {
        let seqcount = db.len();
        let maxaccepts = match params.maxaccepts {
            0 => seqcount,
            n => n.min(seqcount.max(1)),
        };
        let maxrejects = match params.maxrejects {
            0 => seqcount,
            n => n.min(seqcount.max(1)),
        };
        let tophits = (maxaccepts + maxrejects + 8).min(seqcount.max(1));
        Self {
            db,
            params,
            counters: vec![0; seqcount],
            aligner: Search16::new(params.scoring),
            tophits,
            maxaccepts,
            maxrejects,
        }
    }

    /// Runs the full pipeline for one query, returning accepted hits
    /// sorted by descending identity and truncated to `maxhits`.
    pub fn search_onequery(
        &mut self,
        index: &KmerIndex,
        query: &PreparedQuery,
    ) -> Result<Vec<Hit>, MetamerError> {
        let mut hits = Vec::new();
        self.search_strand(index, query, 0, &mut hits)?;
        if let Some(rc) = &query.rc {
            let minus = PreparedQuery {
                header: query.header.clone(),
                seq: rc.clone(),
                rc: None,
                size: query.size,
            };
            self.search_strand(index, &minus, 1, &mut hits)?;
        }

        hits.retain(|h| h.accepted);
        hits.sort_by(|a, b| {
            b.id
                .partial_cmp(&a.id)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target.cmp(&b.target))
        });
        hits.truncate(self.params.maxhits);
        Ok(hits)
    }

    fn search_strand(
        &mut self,
        index: &KmerIndex,
        query: &PreparedQuery,
        strand: u8,
        hits: &mut Vec<Hit>,
    ) -> Result<(), MetamerError> {
        if self.db.is_empty() {
            return Ok(());
        }

        let sample = unique_kmers(&query.seq, self.params.wordlength);
        index.accumulate(&sample, &mut self.counters);

        let mut heap = CandidateHeap::new(self.tophits);
        for (seqno, &count) in self.counters.iter().enumerate() {
            if count > 0 {
                heap.add(Candidate {
                    seqno: seqno as u32,
                    count: u32::from(count),
                    length: self.db.get(seqno).seq.len() as u32,
                });
            }
        }
        index.reset(&sample, &mut self.counters);

        self.aligner.set_query(&query.seq);

        let mut accepts = 0usize;
        let mut rejects = 0usize;
        let mut pending: Vec<Candidate> = Vec::with_capacity(CHANNELS);

        for cand in heap.into_sorted() {
            if accepts >= self.maxaccepts || rejects >= self.maxrejects {
                break;
            }
            if !self.acceptable_unaligned(query, cand.seqno as usize) {
                continue;
            }
            pending.push(cand);
            if pending.len() == CHANNELS {
                self.align_pending(query, strand, &mut pending, hits, &mut accepts, &mut rejects)?;
            }
        }
        if !pending.is_empty() && accepts < self.maxaccepts && rejects < self.maxrejects {
            self.align_pending(query, strand, &mut pending, hits, &mut accepts, &mut rejects)?;
        }
        Ok(())
    }

    /// Aligns the queued candidates in one batch and applies the
    /// acceptance policy to each result.
    fn align_pending(
        &mut self,
        query: &PreparedQuery,
        strand: u8,
        pending: &mut Vec<Candidate>,
        hits: &mut Vec<Hit>,
        accepts: &mut usize,
        rejects: &mut usize,
    ) -> Result<(), MetamerError> {
        let targets: Vec<&[u8]> = pending
            .iter()
            .map(|c| self.db.get(c.seqno as usize).seq.as_slice())
            .collect();
        let results = self.aligner.align_batch(&targets);

        for (cand, lane) in pending.iter().zip(results) {
            if *accepts >= self.maxaccepts || *rejects >= self.maxrejects {
                break;
            }
            let target_seq = &self.db.get(cand.seqno as usize).seq;
            // a saturated lane falls back to the scalar aligner
            let lane: LaneResult = if lane.aligned {
                lane
            } else {
                nw::align(&query.seq, target_seq, &self.params.scoring)
            };
            if !lane.aligned {
                *rejects += 1;
                continue;
            }

            let mut hit = Hit::from_alignment(
                cand.seqno as usize,
                strand,
                cand.count,
                lane.score,
                lane.cigar,
                &query.seq,
                target_seq,
                self.params.iddef,
            )?;
            self.classify(&mut hit);
            if hit.accepted {
                *accepts += 1;
            } else {
                *rejects += 1;
            }
            hits.push(hit);
        }
        pending.clear();
        Ok(())
    }

    fn acceptable_unaligned(&self, query: &PreparedQuery, target: usize) -> bool {
        acceptable_unaligned(self.params, self.db, query, target)
    }

    fn classify(&self, hit: &mut Hit) {
        classify(self.params, hit);
    }
}

/// Filters a candidate before alignment.
pub(crate) fn acceptable_unaligned(
    p: &SearchParams,
    db: &SeqStore,
    query: &PreparedQuery,
    target: usize,
) -> bool {
    let rec = db.get(target);
    let qlen = query.seq.len() as f64;
    let tlen = rec.seq.len() as f64;

    if p.self_exclude && query.header == rec.header {
        return false;
    }
    if p.selfid_exclude && normalize(&query.seq) == normalize(&rec.seq) {
        return false;
    }
    if p.idprefix > 0 {
        if query.seq.len() < p.idprefix || rec.seq.len() < p.idprefix {
            return false;
        }
        if normalize(&query.seq[..p.idprefix]) != normalize(&rec.seq[..p.idprefix]) {
            return false;
        }
    }
    if p.idsuffix > 0 {
        if query.seq.len() < p.idsuffix || rec.seq.len() < p.idsuffix {
            return false;
        }
        let qtail = &query.seq[query.seq.len() - p.idsuffix..];
        let ttail = &rec.seq[rec.seq.len() - p.idsuffix..];
        if normalize(qtail) != normalize(ttail) {
            return false;
        }
    }

    let qt = qlen / tlen;
    if qt < p.minqt || qt > p.maxqt {
        return false;
    }
    let sl = qlen.min(tlen) / qlen.max(tlen);
    if sl < p.minsl || sl > p.maxsl {
        return false;
    }

    let qsize = query.size as f64;
    let tsize = rec.abundance as f64;
    let sizeratio = qsize / tsize;
    if sizeratio < p.minsizeratio || sizeratio > p.maxsizeratio {
        return false;
    }
    if query.size > p.maxqsize {
        return false;
    }
    if rec.abundance < p.mintsize {
        return false;
    }
    // the only identity computable before alignment is 100%
    if p.maxid < 1.0 && normalize(&query.seq) == normalize(&rec.seq) {
        return false;
    }
    true
}

/// Marks a hit accepted, weak or rejected.
pub(crate) fn classify(p: &SearchParams, hit: &mut Hit) {
    let bounds_ok = hit.mismatches <= p.maxsubs
        && hit.internal_gaps <= p.maxgaps
        && hit.mismatches + hit.internal_indels <= p.maxdiffs
        && hit.internal_alignment_length >= p.mincols;

    if hit.id >= p.id && bounds_ok {
        hit.accepted = true;
    } else if hit.id >= p.weak_id {
        hit.weak = true;
        hit.rejected = true;
    } else {
        hit.rejected = true;
    }
}

/// Output destinations for `usearch_global` and `search_exact`.
#[derive(Debug, Default, Clone)]
pub struct SearchIo {
    pub uc: Option<PathBuf>,
    pub blast6out: Option<PathBuf>,
    pub matched: Option<PathBuf>,
    pub notmatched: Option<PathBuf>,
    pub dbmatched: Option<PathBuf>,
    pub dbnotmatched: Option<PathBuf>,
    pub otutabout: Option<PathBuf>,
    pub mothur_shared_out: Option<PathBuf>,
    pub biomout: Option<PathBuf>,
}

/// Totals reported after a search run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchSummary {
    pub queries: u64,
    pub qmatches: u64,
}

impl SearchSummary {
    pub fn log_summary(&self) {
        let pct = if self.queries > 0 {
            100.0 * self.qmatches as f64 / self.queries as f64
        } else {
            0.0
        };
        eprintln!(
            "Matching query sequences: {} of {} ({:.2}%)",
            self.qmatches, self.queries, pct
        );
    }
}

pub(crate) struct SearchOutput {
    pub uc: Option<UcWriter<std::io::BufWriter<std::fs::File>>>,
    pub blast6: Option<Blast6Writer<std::io::BufWriter<std::fs::File>>>,
    pub matched: Option<FastaWriter<std::io::BufWriter<std::fs::File>>>,
    pub notmatched: Option<FastaWriter<std::io::BufWriter<std::fs::File>>>,
    pub otutab: Option<OtuTable>,
    pub dbmatched_counts: Vec<u64>,
    pub summary: SearchSummary,
}

impl SearchOutput {
    pub fn open(io: &SearchIo, db_len: usize) -> Result<Self, MetamerError> {
        let wants_otutab =
            io.otutabout.is_some() || io.mothur_shared_out.is_some() || io.biomout.is_some();
        Ok(Self {
            uc: io.uc.as_deref().map(UcWriter::create).transpose()?,
            blast6: io.blast6out.as_deref().map(Blast6Writer::create).transpose()?,
            matched: io.matched.as_deref().map(FastaWriter::create).transpose()?,
            notmatched: io.notmatched.as_deref().map(FastaWriter::create).transpose()?,
            otutab: wants_otutab.then(OtuTable::new),
            dbmatched_counts: vec![0; db_len],
            summary: SearchSummary::default(),
        })
    }

    /// Serialized emission of one query's results.
    pub fn emit(
        &mut self,
        db: &SeqStore,
        params: &SearchParams,
        rec: &SeqRecord,
        hits: &[Hit],
    ) -> Result<(), MetamerError> {
        self.summary.queries += 1;

        if hits.is_empty() {
            if let Some(uc) = self.uc.as_mut() {
                uc.no_hit(&rec.header)?;
            }
            if params.output_no_hits {
                if let Some(b6) = self.blast6.as_mut() {
                    b6.no_hit(&rec.header)?;
                }
            }
            if let Some(w) = self.notmatched.as_mut() {
                w.write(&rec.header, &rec.seq)?;
            }
            return Ok(());
        }

        self.summary.qmatches += 1;
        let abundance = if params.sizein { rec.abundance } else { 1 };

        for hit in hits {
            let target = db.get(hit.target);
            if let Some(uc) = self.uc.as_mut() {
                uc.hit(
                    hit.target,
                    rec.seq.len(),
                    100.0 * hit.id,
                    hit.strand,
                    &hit.cigar,
                    &rec.header,
                    &target.header,
                )?;
            }
            if let Some(b6) = self.blast6.as_mut() {
                b6.hit(&rec.header, &target.header, hit, rec.seq.len(), target.seq.len())?;
            }
            self.dbmatched_counts[hit.target] += abundance;
        }

        // the OTU table counts the best hit only
        if let Some(otutab) = self.otutab.as_mut() {
            let best = db.get(hits[0].target);
            otutab.add(&rec.header, &best.header, abundance);
        }
        if let Some(w) = self.matched.as_mut() {
            w.write(&rec.header, &rec.seq)?;
        }
        Ok(())
    }

    /// Writes the post-run outputs: db match partitions and OTU tables.
    pub fn finish(mut self, io: &SearchIo, db: &SeqStore) -> Result<SearchSummary, MetamerError> {
        if let Some(path) = &io.dbmatched {
            let mut w = FastaWriter::create(path)?;
            for (seqno, rec) in db.iter().enumerate() {
                if self.dbmatched_counts[seqno] > 0 {
                    w.write(&rec.header, &rec.seq)?;
                }
            }
            w.finish()?;
        }
        if let Some(path) = &io.dbnotmatched {
            let mut w = FastaWriter::create(path)?;
            for (seqno, rec) in db.iter().enumerate() {
                if self.dbmatched_counts[seqno] == 0 {
                    w.write(&rec.header, &rec.seq)?;
                }
            }
            w.finish()?;
        }

        if let Some(otutab) = self.otutab.take() {
            if let Some(path) = &io.otutabout {
                let file = std::fs::File::create(path).map_err(|source| MetamerError::Create {
                    source,
                    path: path.clone(),
                })?;
                otutab.write_classic(std::io::BufWriter::new(file))?;
            }
            if let Some(path) = &io.mothur_shared_out {
                let file = std::fs::File::create(path).map_err(|source| MetamerError::Create {
                    source,
                    path: path.clone(),
                })?;
                otutab.write_mothur_shared(std::io::BufWriter::new(file))?;
            }
            if let Some(path) = &io.biomout {
                let file = std::fs::File::create(path).map_err(|source| MetamerError::Create {
                    source,
                    path: path.clone(),
                })?;
                let name = path.file_name().map_or_else(
                    || path.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                );
                otutab.write_biom(std::io::BufWriter::new(file), &name)?;
            }
        }

        if let Some(w) = self.uc.take() {
            w.finish()?;
        }
        if let Some(w) = self.blast6.take() {
            w.finish()?;
        }
        if let Some(w) = self.matched.take() {
            w.finish()?;
        }
        if let Some(w) = self.notmatched.take() {
            w.finish()?;
        }
        Ok(self.summary)
    }
}

/// Searches every query in `query_path` against the database.
pub fn usearch_global(
    query_path: &std::path::Path,
    db: &SeqStore,
    params: &SearchParams,
    policy: &ReadPolicy,
    io: &SearchIo,
) -> Result<SearchSummary, MetamerError> {
    let mut index = KmerIndex::new(params.wordlength)?;
    for seqno in 0..db.len() {
        index.add_sequence(seqno as u32, &db.get(seqno).seq);
    }

    let input = Mutex::new(FastxStream::open(query_path, policy.clone())?);
    let output = Mutex::new(SearchOutput::open(io, db.len())?);

    let worker_count = params.threads.max(1);
    std::thread::scope(|scope| -> Result<(), MetamerError> {
        let mut handles = Vec::new();
        for _ in 0..worker_count {
            let input = &input;
            let output = &output;
            let index = &index;
            handles.push(scope.spawn(move || -> Result<(), MetamerError> {
                let mut worker = SearchWorker::new(db, params);
                loop {
                    let rec = {
                        let mut stream = input
                            .lock()
                            .map_err(|_| MetamerError::Internal("input mutex poisoned".into()))?;
                        stream.next_record()?
                    };
                    let Some(rec) = rec else { break };

                    let query = PreparedQuery::prepare(&rec, params);
                    let hits = worker.search_onequery(index, &query)?;

                    let mut out = output
                        .lock()
                        .map_err(|_| MetamerError::Internal("output mutex poisoned".into()))?;
                    out.emit(db, params, &rec, &hits)?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle
                .join()
                .map_err(|_| MetamerError::Internal("search worker panicked".into()))??;
        }
        Ok(())
    })?;

    let output = output
        .into_inner()
        .map_err(|_| MetamerError::Internal("output mutex poisoned".into()))?;
    output.finish(io, db)
}

//! Paired-end read merging.
//!
//! Pairs flow through chunks of [`CHUNK_SIZE`] reads carried over bounded
//! channels: one reader, one writer, and the remaining threads processing.
//! Per pair: quality truncation, N accounting, k-mer diagonal discovery of
//! the overlap offset, information-theoretic overlap scoring, posterior
//! quality recomputation from precomputed tables, and an expected-error
//! filter. Chunks are written in completion order; run with one thread for
//! strict input order.

use std::hash::Hasher;
use std::path::PathBuf;

use crossbeam_channel::bounded;
use rustc_hash::FxHasher;

use crate::alphabet::{ambig_mask, code2, complement};
use crate::error::MetamerError;
use crate::output::{FastaWriter, FastqWriter};
use crate::reader::{FastxStream, ReadPolicy};
use crate::record::header_with_ee;

/// Read pairs per chunk.
pub const CHUNK_SIZE: usize = 500;
/// Chunks allocated per thread.
pub const CHUNK_FACTOR: usize = 2;

/// Word length for overlap diagonal discovery.
const MERGE_K: usize = 5;
/// Minimum score (bits) for an acceptable overlap.
const MERGE_MINSCORE: f64 = 16.0;
/// Maximum allowed drop below the score high-water mark within an overlap.
const MERGE_DROPMAX: f64 = 16.0;
/// Floor for the per-position mismatch score (bits).
const MERGE_MISMATCHMAX: f64 = -4.0;
/// Diagonals with fewer shared k-mers are not evaluated.
const MERGE_MINDIAGCOUNT: i64 = 4;

/// Why a pair was not merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reason {
    #[default]
    Undefined,
    Ok,
    MinLen,
    MaxLen,
    MaxNs,
    MinOvLen,
    MaxDiffs,
    MaxDiffPct,
    Staggered,
    Indel,
    Repeat,
    MinMergeLen,
    MaxMergeLen,
    MaxEe,
    MinScore,
    NoKmers,
}

impl Reason {
    pub const COUNT: usize = 16;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn describe(self) -> &'static str {
        match self {
            Reason::Undefined => "undefined reason",
            Reason::Ok => "ok",
            Reason::MinLen => "reads too short (after truncation)",
            Reason::MaxLen => "reads too long",
            Reason::MaxNs => "too many N's",
            Reason::MinOvLen => "overlap too short",
            Reason::MaxDiffs => "too many differences",
            Reason::MaxDiffPct => "too high percentage of differences",
            Reason::Staggered => "staggered read pairs",
            Reason::Indel => "indels in overlap region",
            Reason::Repeat => "multiple potential alignments",
            Reason::MinMergeLen => "merged sequence too short",
            Reason::MaxMergeLen => "merged sequence too long",
            Reason::MaxEe => "expected error too high",
            Reason::MinScore => "alignment score too low, or score drop too high",
            Reason::NoKmers => "too few kmers found on same diagonal",
        }
    }
}

/// Merger options.
#[derive(Debug, Clone)]
pub struct MergeParams {
    pub fastq_ascii: u8,
    pub fastq_qmin: i64,
    pub fastq_qmax: i64,
    pub fastq_qminout: i64,
    pub fastq_qmaxout: i64,
    pub minlen: i64,
    pub maxlen: i64,
    pub maxns: i64,
    /// Truncate reads at the first position with quality at or below this;
    /// `i64::MIN` disables truncation.
    pub truncqual: i64,
    pub minovlen: i64,
    pub maxdiffs: i64,
    pub maxdiffpct: f64,
    pub minmergelen: i64,
    pub maxmergelen: i64,
    pub maxee: f64,
    pub allowmergestagger: bool,
    pub eeout: bool,
    pub threads: usize,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            fastq_ascii: 33,
            fastq_qmin: 0,
            fastq_qmax: 41,
            fastq_qminout: 0,
            fastq_qmaxout: 41,
            minlen: 64,
            maxlen: i64::MAX,
            maxns: i64::MAX,
            truncqual: i64::MIN,
            minovlen: 10,
            maxdiffs: 10,
            maxdiffpct: 100.0,
            minmergelen: 1,
            maxmergelen: 1_000_000,
            maxee: f64::MAX,
            allowmergestagger: false,
            eeout: false,
            threads: 1,
        }
    }
}

/// Precomputed per-quality-pair tables (Edgar & Flyvbjerg 2015).
///
/// Indexed by quality symbols 33..=126: posterior quality symbols for
/// agreeing and disagreeing bases, overlap match/mismatch scores in bits,
/// and the plain symbol → error probability map.
pub struct QualTables {
    qual_same: Vec<u8>,
    qual_diff: Vec<u8>,
    match_score: Vec<f64>,
    mism_score: Vec<f64>,
    q2p: [f64; 128],
}

const QSYM: usize = 128;

impl QualTables {
    pub fn new(params: &MergeParams) -> Self {
        let mut tables = Self {
            qual_same: vec![0; QSYM * QSYM],
            qual_diff: vec![0; QSYM * QSYM],
            match_score: vec![0.0; QSYM * QSYM],
            mism_score: vec![0.0; QSYM * QSYM],
            q2p: [0.75; 128],
        };
        let ascii = f64::from(params.fastq_ascii);
        let qmaxout = params.fastq_qmaxout as f64;
        let qminout = params.fastq_qminout as f64;

        let q_to_p = |symbol: usize| -> f64 {
            let q = symbol as f64 - ascii;
            if q < 2.0 {
                0.75
            } else {
                10f64.powf(-q / 10.0)
            }
        };

        for x in 33..=126usize {
            let px = q_to_p(x);
            tables.q2p[x] = px;

            for y in 33..=126usize {
                let py = q_to_p(y);

                // agreement: both bases report the same symbol
                let p = px * py / 3.0 / (1.0 - px - py + 4.0 * px * py / 3.0);
                let q = (-10.0 * p.log10()).round().min(qmaxout).max(qminout);
                tables.qual_same[x * QSYM + y] = (ascii + q) as u8;

                // disagreement, x is the higher quality
                let p = px * (1.0 - py / 3.0) / (px + py - 4.0 * px * py / 3.0);
                let q = (-10.0 * p.log10()).round().min(qmaxout).max(qminout);
                tables.qual_diff[x * QSYM + y] = (ascii + q) as u8;

                // probability of observing a match given both error rates
                let p = 1.0 - px - py + px * py * 4.0 / 3.0;
                tables.match_score[x * QSYM + y] = (p / 0.25).log2();
                tables.mism_score[x * QSYM + y] =
                    (((1.0 - p) / 0.75).log2()).max(MERGE_MISMATCHMAX);
            }
        }
        tables
    }

    #[inline]
    fn same(&self, x: u8, y: u8) -> u8 {
        self.qual_same[x as usize * QSYM + y as usize]
    }

    #[inline]
    fn diff(&self, x: u8, y: u8) -> u8 {
        self.qual_diff[x as usize * QSYM + y as usize]
    }

    #[inline]
    fn score_match(&self, x: u8, y: u8) -> f64 {
        self.match_score[x as usize * QSYM + y as usize]
    }

    #[inline]
    fn score_mism(&self, x: u8, y: u8) -> f64 {
        self.mism_score[x as usize * QSYM + y as usize]
    }

    #[inline]
    pub fn error_prob(&self, symbol: u8) -> f64 {
        self.q2p[symbol as usize]
    }
}

/// One read pair and its merge state.
#[derive(Debug, Default, Clone)]
pub struct MergePair {
    pub fwd_header: String,
    pub rev_header: String,
    pub fwd_seq: Vec<u8>,
    pub rev_seq: Vec<u8>,
    pub fwd_qual: Vec<u8>,
    pub rev_qual: Vec<u8>,
    pub fwd_trunc: usize,
    pub rev_trunc: usize,
    pub offset: i64,
    pub merged_seq: Vec<u8>,
    pub merged_qual: Vec<u8>,
    pub ee_merged: f64,
    pub ee_fwd: f64,
    pub ee_rev: f64,
    pub fwd_errors: u64,
    pub rev_errors: u64,
    pub merged: bool,
    pub reason: Reason,
}

/// Open-addressed hash of the forward read's k-mers, probed with the
/// reverse-complemented reverse read to count matches per diagonal.
pub struct KmerDiagHash {
    buckets: Vec<(u32, u32)>,
    mask: usize,
    maxpos: usize,
}

fn kmer_hash(kmer: u32) -> u64 {
    let mut h = FxHasher::default();
    h.write_u32(kmer);
    h.finish()
}

impl Default for KmerDiagHash {
    fn default() -> Self {
        Self::new()
    }
}

impl KmerDiagHash {
    pub fn new() -> Self {
        Self {
            buckets: vec![(0, 0); 256],
            mask: 255,
            maxpos: 0,
        }
    }

    /// Re-fills the hash with the k-mers of (a prefix of) `seq`.
    /// Positions are stored 1-based; 0 marks an empty bucket.
    pub fn insert_kmers(&mut self, seq: &[u8], len: usize) {
        let mut size = 256usize;
        while size < 2 * len {
            size *= 2;
        }
        if size != self.buckets.len() {
            self.buckets = vec![(0, 0); size];
        } else {
            self.buckets.fill((0, 0));
        }
        self.mask = size - 1;
        self.maxpos = len;

        let kmer_mask = (1u32 << (2 * MERGE_K)) - 1;
        let mut bad = kmer_mask;
        let mut kmer = 0u32;

        for (pos, &c) in seq[..len].iter().enumerate() {
            bad = ((bad << 2) | ambig_mask(c)) & kmer_mask;
            kmer = ((kmer << 2) | code2(c)) & kmer_mask;
            if bad == 0 {
                let mut j = kmer_hash(kmer) as usize & self.mask;
                while self.buckets[j].1 != 0 {
                    j = (j + 1) & self.mask;
                }
                self.buckets[j] = (kmer, (pos + 2 - MERGE_K) as u32);
            }
        }
    }

    /// Scans the reverse read back-to-front, complementing on the fly (the
    /// k-mers of its reverse complement), and counts matches per diagonal
    /// `d = rev_len + fwd_pos − rc_pos`.
    pub fn find_diagonals(&self, seq: &[u8], len: usize, diags: &mut Vec<i64>) {
        diags.clear();
        diags.resize(self.maxpos + len, 0);

        let kmer_mask = (1u32 << (2 * MERGE_K)) - 1;
        let mut bad = kmer_mask;
        let mut kmer = 0u32;

        for pos in 0..len {
            let c = seq[len - 1 - pos];
            bad = ((bad << 2) | ambig_mask(c)) & kmer_mask;
            kmer = ((kmer << 2) | code2(complement(c))) & kmer_mask;

            if bad == 0 {
                let mut j = kmer_hash(kmer) as usize & self.mask;
                while self.buckets[j].1 != 0 {
                    if self.buckets[j].0 == kmer {
                        let fpos = self.buckets[j].1 as i64 - 1;
                        let diag = len as i64 + fpos - (pos as i64 + 1 - MERGE_K as i64);
                        if diag >= 0 && (diag as usize) < diags.len() {
                            diags[diag as usize] += 1;
                        }
                    }
                    j = (j + 1) & self.mask;
                }
            }
        }
    }
}

/// Finds the best overlap offset for a pair, or 0 with the reason set.
fn optimize(
    pair: &mut MergePair,
    kmerhash: &mut KmerDiagHash,
    diags: &mut Vec<i64>,
    tables: &QualTables,
    params: &MergeParams,
) -> i64 {
    let fwd_trunc = pair.fwd_trunc as i64;
    let rev_trunc = pair.rev_trunc as i64;

    // every offset in the window holds at least minovlen overlapping bases;
    // merged-length bounds are checked on the winning offset afterwards
    let i1 = params.minovlen;
    let i2 = fwd_trunc + rev_trunc - params.minovlen;

    if i1 > i2 {
        pair.reason = Reason::MinOvLen;
        return 0;
    }

    // an overlap shorter than k + 3 cannot hold four k-mers
    let mindiagcount = MERGE_MINDIAGCOUNT.min((params.minovlen - MERGE_K as i64 + 1).max(1));

    kmerhash.insert_kmers(&pair.fwd_seq, pair.fwd_trunc);
    kmerhash.find_diagonals(&pair.rev_seq, pair.rev_trunc, diags);

    let mut best_score = 0.0f64;
    let mut best_i = 0i64;
    let mut best_diffs = 0i64;
    let mut hits = 0u32;
    let mut kmers_found = false;

    for i in i1..=i2 {
        let diag = rev_trunc + fwd_trunc - i;
        if diag < 0 || diag as usize >= diags.len() || diags[diag as usize] < mindiagcount {
            continue;
        }
        kmers_found = true;

        let fwd_overhang = (i - rev_trunc).max(0);
        let rev_overhang = (i - fwd_trunc).max(0);
        let overlap = i - fwd_overhang - rev_overhang;
        let mut fwd_pos = fwd_trunc - fwd_overhang - 1;
        let mut rev_pos = rev_trunc - rev_overhang - overlap;

        let mut score = 0.0f64;
        let mut diffs = 0i64;
        let mut score_high = 0.0f64;
        let mut dropmax = 0.0f64;

        for _ in 0..overlap {
            let fwd_sym = pair.fwd_seq[fwd_pos as usize];
            let rev_sym = complement(pair.rev_seq[rev_pos as usize]);
            let fwd_qual = pair.fwd_qual[fwd_pos as usize];
            let rev_qual = pair.rev_qual[rev_pos as usize];
            fwd_pos -= 1;
            rev_pos += 1;

            if fwd_sym == rev_sym {
                score += tables.score_match(fwd_qual, rev_qual);
                score_high = score_high.max(score);
            } else {
                score += tables.score_mism(fwd_qual, rev_qual);
                diffs += 1;
                if score < score_high - dropmax {
                    dropmax = score_high - score;
                }
            }
        }

        if dropmax >= MERGE_DROPMAX {
            score = 0.0;
        }
        if score >= MERGE_MINSCORE {
            hits += 1;
        }
        if score > best_score {
            best_score = score;
            best_i = i;
            best_diffs = diffs;
        }
    }

    if hits > 1 {
        pair.reason = Reason::Repeat;
        return 0;
    }
    if !params.allowmergestagger && best_i > fwd_trunc {
        pair.reason = Reason::Staggered;
        return 0;
    }
    if best_diffs > params.maxdiffs {
        pair.reason = Reason::MaxDiffs;
        return 0;
    }
    if best_i > 0 && 100.0 * best_diffs as f64 / best_i as f64 > params.maxdiffpct {
        pair.reason = Reason::MaxDiffPct;
        return 0;
    }
    if !kmers_found {
        pair.reason = Reason::NoKmers;
        return 0;
    }
    if best_score < MERGE_MINSCORE {
        pair.reason = Reason::MinScore;
        return 0;
    }

    let mergelen = fwd_trunc + rev_trunc - best_i;
    if mergelen < params.minmergelen {
        pair.reason = Reason::MinMergeLen;
        return 0;
    }
    if mergelen > params.maxmergelen {
        pair.reason = Reason::MaxMergeLen;
        return 0;
    }

    best_i
}

fn merge_sym(tables: &QualTables, fwd_sym: u8, rev_sym: u8, fwd_qual: u8, rev_qual: u8) -> (u8, u8) {
    if rev_sym == b'N' {
        (fwd_sym, fwd_qual)
    } else if fwd_sym == b'N' {
        (rev_sym, rev_qual)
    } else if fwd_sym == rev_sym {
        (fwd_sym, tables.same(fwd_qual, rev_qual))
    } else if fwd_qual > rev_qual {
        (fwd_sym, tables.diff(fwd_qual, rev_qual))
    } else {
        (rev_sym, tables.diff(rev_qual, fwd_qual))
    }
}

/// Builds the merged sequence and posterior qualities for the chosen
/// offset, accumulating expected errors, then applies the maxee filter.
fn merge(pair: &mut MergePair, tables: &QualTables, params: &MergeParams) {
    let fwd_trunc = pair.fwd_trunc as i64;
    let rev_trunc = pair.rev_trunc as i64;
    let fwd_5prime_overhang = (fwd_trunc - pair.offset).max(0);
    let rev_3prime_overhang = (pair.offset - fwd_trunc).max(0);

    pair.ee_merged = 0.0;
    pair.ee_fwd = 0.0;
    pair.ee_rev = 0.0;
    pair.fwd_errors = 0;
    pair.rev_errors = 0;
    pair.merged_seq.clear();
    pair.merged_qual.clear();

    // forward 5' overhang
    let mut fwd_pos = 0i64;
    while fwd_pos < fwd_5prime_overhang {
        let sym = pair.fwd_seq[fwd_pos as usize];
        let qual = pair.fwd_qual[fwd_pos as usize];
        pair.merged_seq.push(sym);
        pair.merged_qual.push(qual);
        let ee = tables.error_prob(qual);
        pair.ee_merged += ee;
        pair.ee_fwd += ee;
        fwd_pos += 1;
    }

    // overlap region
    let mut rev_pos = rev_trunc - 1 - rev_3prime_overhang;
    while fwd_pos < fwd_trunc && rev_pos >= 0 {
        let fwd_sym = pair.fwd_seq[fwd_pos as usize];
        let rev_sym = complement(pair.rev_seq[rev_pos as usize]);
        let fwd_qual = pair.fwd_qual[fwd_pos as usize];
        let rev_qual = pair.rev_qual[rev_pos as usize];

        let (sym, qual) = merge_sym(tables, fwd_sym, rev_sym, fwd_qual, rev_qual);
        if sym != fwd_sym {
            pair.fwd_errors += 1;
        }
        if sym != rev_sym {
            pair.rev_errors += 1;
        }

        pair.merged_seq.push(sym);
        pair.merged_qual.push(qual);
        pair.ee_merged += tables.error_prob(qual);
        pair.ee_fwd += tables.error_prob(fwd_qual);
        pair.ee_rev += tables.error_prob(rev_qual);

        fwd_pos += 1;
        rev_pos -= 1;
    }

    // reverse 5' overhang
    while rev_pos >= 0 {
        let sym = complement(pair.rev_seq[rev_pos as usize]);
        let qual = pair.rev_qual[rev_pos as usize];
        pair.merged_seq.push(sym);
        pair.merged_qual.push(qual);
        let ee = tables.error_prob(qual);
        pair.ee_merged += ee;
        pair.ee_rev += ee;
        rev_pos -= 1;
    }

    if pair.ee_merged <= params.maxee {
        pair.reason = Reason::Ok;
        pair.merged = true;
    } else {
        pair.reason = Reason::MaxEe;
    }
}

/// Runs the full per-pair pipeline.
pub fn process_pair(
    pair: &mut MergePair,
    kmerhash: &mut KmerDiagHash,
    diags: &mut Vec<i64>,
    tables: &QualTables,
    params: &MergeParams,
) {
    pair.merged = false;
    pair.reason = Reason::Undefined;
    let fwd_length = pair.fwd_seq.len() as i64;
    let rev_length = pair.rev_seq.len() as i64;
    let mut skip = false;

    if fwd_length < params.minlen || rev_length < params.minlen {
        pair.reason = Reason::MinLen;
        skip = true;
    }
    if fwd_length > params.maxlen || rev_length > params.maxlen {
        pair.reason = Reason::MaxLen;
        skip = true;
    }

    // truncate by quality
    pair.fwd_trunc = pair.fwd_seq.len();
    if !skip && params.truncqual > i64::MIN {
        for (i, &q) in pair.fwd_qual.iter().enumerate() {
            if i64::from(q) - i64::from(params.fastq_ascii) <= params.truncqual {
                pair.fwd_trunc = i;
                break;
            }
        }
        if (pair.fwd_trunc as i64) < params.minlen {
            pair.reason = Reason::MinLen;
            skip = true;
        }
    }

    pair.rev_trunc = pair.rev_seq.len();
    if !skip && params.truncqual > i64::MIN {
        for (i, &q) in pair.rev_qual.iter().enumerate() {
            if i64::from(q) - i64::from(params.fastq_ascii) <= params.truncqual {
                pair.rev_trunc = i;
                break;
            }
        }
        if (pair.rev_trunc as i64) < params.minlen {
            pair.reason = Reason::MinLen;
            skip = true;
        }
    }

    // count N's; their quality must not dominate the scoring
    if !skip {
        let mut ncount = 0i64;
        for i in 0..pair.fwd_trunc {
            if pair.fwd_seq[i] == b'N' {
                pair.fwd_qual[i] = params.fastq_ascii;
                ncount += 1;
            }
        }
        if ncount > params.maxns {
            pair.reason = Reason::MaxNs;
            skip = true;
        }
    }
    if !skip {
        let mut ncount = 0i64;
        for i in 0..pair.rev_trunc {
            if pair.rev_seq[i] == b'N' {
                pair.rev_qual[i] = params.fastq_ascii;
                ncount += 1;
            }
        }
        if ncount > params.maxns {
            pair.reason = Reason::MaxNs;
            skip = true;
        }
    }

    pair.offset = 0;
    if !skip {
        pair.offset = optimize(pair, kmerhash, diags, tables, params);
    }
    if pair.offset > 0 {
        merge(pair, tables, params);
    }
}

/// Output destinations for the merger.
#[derive(Debug, Default, Clone)]
pub struct MergeIo {
    pub fastqout: Option<PathBuf>,
    pub fastaout: Option<PathBuf>,
    pub fastqout_notmerged_fwd: Option<PathBuf>,
    pub fastqout_notmerged_rev: Option<PathBuf>,
    pub fastaout_notmerged_fwd: Option<PathBuf>,
    pub fastaout_notmerged_rev: Option<PathBuf>,
    pub eetabbedout: Option<PathBuf>,
}

/// Counters reported at the end of a merge run.
#[derive(Debug, Default, Clone)]
pub struct MergeStats {
    pub total: u64,
    pub merged: u64,
    pub notmerged: u64,
    pub failed: [u64; Reason::COUNT],
    pub sum_fragment_length: f64,
    pub sum_squared_fragment_length: f64,
    pub sum_ee_fwd: f64,
    pub sum_ee_rev: f64,
    pub sum_ee_merged: f64,
    pub sum_errors_fwd: u64,
    pub sum_errors_rev: u64,
}

impl MergeStats {
    /// Prints the merge summary, mirroring the classic layout.
    pub fn log_summary(&self) {
        eprintln!("{:>10}  Pairs", self.total);
        if self.total > 0 {
            eprintln!(
                "{:>10}  Merged ({:.1}%)",
                self.merged,
                100.0 * self.merged as f64 / self.total as f64
            );
            eprintln!(
                "{:>10}  Not merged ({:.1}%)",
                self.notmerged,
                100.0 * self.notmerged as f64 / self.total as f64
            );
        }
        if self.notmerged > 0 {
            eprintln!("\nPairs that failed merging due to various reasons:");
            for reason in [
                Reason::Undefined,
                Reason::MinLen,
                Reason::MaxLen,
                Reason::MaxNs,
                Reason::MinOvLen,
                Reason::MaxDiffs,
                Reason::MaxDiffPct,
                Reason::Staggered,
                Reason::Indel,
                Reason::Repeat,
                Reason::MinMergeLen,
                Reason::MaxMergeLen,
                Reason::MaxEe,
                Reason::MinScore,
                Reason::NoKmers,
            ] {
                let n = self.failed[reason.index()];
                if n > 0 {
                    eprintln!("{:>10}  {}", n, reason.describe());
                }
            }
        }
        if self.merged > 0 {
            let n = self.merged as f64;
            let mean = self.sum_fragment_length / n;
            let variance = (self.sum_squared_fragment_length - mean * mean * n) / n;
            eprintln!(
                "\nStatistics of merged reads:\n\
                 {:>10.2}  Mean fragment length\n\
                 {:>10.2}  Standard deviation of fragment length\n\
                 {:>10.2}  Mean expected error in forward sequences\n\
                 {:>10.2}  Mean expected error in reverse sequences\n\
                 {:>10.2}  Mean expected error in merged sequences",
                mean,
                variance.max(0.0).sqrt(),
                self.sum_ee_fwd / n,
                self.sum_ee_rev / n,
                self.sum_ee_merged / n,
            );
        }
    }

    fn account(&mut self, pair: &MergePair) {
        if pair.merged {
            self.merged += 1;
            let len = pair.merged_seq.len() as f64;
            self.sum_fragment_length += len;
            self.sum_squared_fragment_length += len * len;
            self.sum_ee_merged += pair.ee_merged;
            self.sum_ee_fwd += pair.ee_fwd;
            self.sum_ee_rev += pair.ee_rev;
            self.sum_errors_fwd += pair.fwd_errors;
            self.sum_errors_rev += pair.rev_errors;
        } else {
            self.notmerged += 1;
            self.failed[pair.reason.index()] += 1;
        }
    }
}

struct MergeWriters {
    fastqout: Option<FastqWriter<std::io::BufWriter<std::fs::File>>>,
    fastaout: Option<FastaWriter<std::io::BufWriter<std::fs::File>>>,
    fastqout_nm_fwd: Option<FastqWriter<std::io::BufWriter<std::fs::File>>>,
    fastqout_nm_rev: Option<FastqWriter<std::io::BufWriter<std::fs::File>>>,
    fastaout_nm_fwd: Option<FastaWriter<std::io::BufWriter<std::fs::File>>>,
    fastaout_nm_rev: Option<FastaWriter<std::io::BufWriter<std::fs::File>>>,
    eetabbedout: Option<std::io::BufWriter<std::fs::File>>,
}

impl MergeWriters {
    fn open(io: &MergeIo) -> Result<Self, MetamerError> {
        let fastq = |p: &Option<PathBuf>| p.as_deref().map(FastqWriter::create).transpose();
        let fasta = |p: &Option<PathBuf>| p.as_deref().map(FastaWriter::create).transpose();
        Ok(Self {
            fastqout: fastq(&io.fastqout)?,
            fastaout: fasta(&io.fastaout)?,
            fastqout_nm_fwd: fastq(&io.fastqout_notmerged_fwd)?,
            fastqout_nm_rev: fastq(&io.fastqout_notmerged_rev)?,
            fastaout_nm_fwd: fasta(&io.fastaout_notmerged_fwd)?,
            fastaout_nm_rev: fasta(&io.fastaout_notmerged_rev)?,
            eetabbedout: io
                .eetabbedout
                .as_deref()
                .map(|p| {
                    std::fs::File::create(p)
                        .map(std::io::BufWriter::new)
                        .map_err(|source| MetamerError::Create {
                            source,
                            path: p.to_path_buf(),
                        })
                })
                .transpose()?,
        })
    }

    fn finish(mut self) -> Result<(), MetamerError> {
        use std::io::Write;

        if let Some(w) = self.fastqout.take() {
            w.finish()?;
        }
        if let Some(w) = self.fastaout.take() {
            w.finish()?;
        }
        if let Some(w) = self.fastqout_nm_fwd.take() {
            w.finish()?;
        }
        if let Some(w) = self.fastqout_nm_rev.take() {
            w.finish()?;
        }
        if let Some(w) = self.fastaout_nm_fwd.take() {
            w.finish()?;
        }
        if let Some(w) = self.fastaout_nm_rev.take() {
            w.finish()?;
        }
        if let Some(mut w) = self.eetabbedout.take() {
            w.flush()?;
        }
        Ok(())
    }

    fn write_pair(&mut self, pair: &MergePair, eeout: bool) -> Result<(), MetamerError> {
        use std::io::Write;

        if pair.merged {
            let header = if eeout {
                header_with_ee(&pair.fwd_header, pair.ee_merged)
            } else {
                pair.fwd_header.clone()
            };
            if let Some(w) = self.fastqout.as_mut() {
                w.write(&header, &pair.merged_seq, &pair.merged_qual)?;
            }
            if let Some(w) = self.fastaout.as_mut() {
                w.write(&header, &pair.merged_seq)?;
            }
            if let Some(w) = self.eetabbedout.as_mut() {
                writeln!(
                    w,
                    "{:.2}\t{:.2}\t{}\t{}",
                    pair.ee_fwd, pair.ee_rev, pair.fwd_errors, pair.rev_errors
                )?;
            }
        } else {
            if let Some(w) = self.fastqout_nm_fwd.as_mut() {
                w.write(&pair.fwd_header, &pair.fwd_seq, &pair.fwd_qual)?;
            }
            if let Some(w) = self.fastqout_nm_rev.as_mut() {
                w.write(&pair.rev_header, &pair.rev_seq, &pair.rev_qual)?;
            }
            if let Some(w) = self.fastaout_nm_fwd.as_mut() {
                w.write(&pair.fwd_header, &pair.fwd_seq)?;
            }
            if let Some(w) = self.fastaout_nm_rev.as_mut() {
                w.write(&pair.rev_header, &pair.rev_seq)?;
            }
        }
        Ok(())
    }
}

fn read_policy(params: &MergeParams) -> ReadPolicy {
    ReadPolicy {
        truncate_labels: false,
        upcase: true,
        // the merger applies its own length windows
        min_seq_length: 0,
        max_seq_length: u32::MAX,
        fastq_ascii: params.fastq_ascii,
        fastq_qmin: params.fastq_qmin,
        fastq_qmax: params.fastq_qmax,
    }
}

fn read_chunk(
    fwd: &mut FastxStream,
    rev: &mut FastxStream,
    stats_total: &mut u64,
) -> Result<Vec<MergePair>, MetamerError> {
    let mut chunk = Vec::with_capacity(CHUNK_SIZE);
    while chunk.len() < CHUNK_SIZE {
        let fwd_rec = fwd.next_record()?;
        let rev_rec = rev.next_record()?;
        match (fwd_rec, rev_rec) {
            (None, None) => break,
            (Some(_), None) => {
                return Err(MetamerError::UnpairedReads {
                    longer: "forward",
                    shorter: "reverse",
                })
            }
            (None, Some(_)) => {
                return Err(MetamerError::UnpairedReads {
                    longer: "reverse",
                    shorter: "forward",
                })
            }
            (Some(f), Some(r)) => {
                let (Some(fwd_qual), Some(rev_qual)) = (f.qual, r.qual) else {
                    return Err(MetamerError::OptionConflict(
                        "fastq_mergepairs requires FASTQ input with quality scores".into(),
                    ));
                };
                *stats_total += 1;
                chunk.push(MergePair {
                    fwd_header: f.header,
                    rev_header: r.header,
                    fwd_qual,
                    rev_qual,
                    fwd_seq: f.seq,
                    rev_seq: r.seq,
                    ..MergePair::default()
                });
            }
        }
    }
    Ok(chunk)
}

/// Merges all pairs from `fwd_path`/`rev_path` into the configured outputs.
pub fn fastq_mergepairs(
    fwd_path: &std::path::Path,
    rev_path: &std::path::Path,
    params: &MergeParams,
    io: &MergeIo,
) -> Result<MergeStats, MetamerError> {
    let tables = QualTables::new(params);
    let mut fwd = FastxStream::open(fwd_path, read_policy(params))?;
    let mut rev = FastxStream::open(rev_path, read_policy(params))?;
    let mut writers = MergeWriters::open(io)?;

    let mut stats = MergeStats::default();

    if params.threads <= 1 {
        // one thread rotates through read, process, write
        let mut kmerhash = KmerDiagHash::new();
        let mut diags = Vec::new();
        loop {
            let mut chunk = read_chunk(&mut fwd, &mut rev, &mut stats.total)?;
            if chunk.is_empty() {
                break;
            }
            let last = chunk.len() < CHUNK_SIZE;
            for pair in &mut chunk {
                process_pair(pair, &mut kmerhash, &mut diags, &tables, params);
                stats.account(pair);
                writers.write_pair(pair, params.eeout)?;
            }
            if last {
                break;
            }
        }
        writers.finish()?;
        return Ok(stats);
    }

    let workers = params.threads.saturating_sub(2).max(1);
    let chunk_count = CHUNK_FACTOR * params.threads;
    let (filled_tx, filled_rx) = bounded::<Vec<MergePair>>(chunk_count);
    let (processed_tx, processed_rx) = bounded::<Vec<MergePair>>(chunk_count);

    let result: Result<(), MetamerError> = std::thread::scope(|scope| {
        let reader = scope.spawn(move || -> Result<u64, MetamerError> {
            let mut total = 0u64;
            loop {
                let chunk = read_chunk(&mut fwd, &mut rev, &mut total)?;
                let last = chunk.len() < CHUNK_SIZE;
                if !chunk.is_empty() && filled_tx.send(chunk).is_err() {
                    break;
                }
                if last {
                    break;
                }
            }
            Ok(total)
        });

        let mut workers_handles = Vec::new();
        for _ in 0..workers {
            let rx = filled_rx.clone();
            let tx = processed_tx.clone();
            let tables = &tables;
            workers_handles.push(scope.spawn(move || {
                let mut kmerhash = KmerDiagHash::new();
                let mut diags = Vec::new();
                for mut chunk in rx.iter() {
                    for pair in &mut chunk {
                        process_pair(pair, &mut kmerhash, &mut diags, tables, params);
                    }
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(filled_rx);
        drop(processed_tx);

        let writer = scope.spawn(|| -> Result<MergeStats, MetamerError> {
            let mut stats = MergeStats::default();
            for chunk in processed_rx.iter() {
                for pair in &chunk {
                    stats.account(pair);
                    writers.write_pair(pair, params.eeout)?;
                }
            }
            Ok(stats)
        });

        let total = reader
            .join()
            .map_err(|_| MetamerError::Internal("merge reader thread panicked".into()))??;
        for handle in workers_handles {
            handle
                .join()
                .map_err(|_| MetamerError::Internal("merge worker thread panicked".into()))?;
        }
        let writer_stats = writer
            .join()
            .map_err(|_| MetamerError::Internal("merge writer thread panicked".into()))??;
        stats = writer_stats;
        stats.total = total;
        Ok(())
    });
    result?;
    writers.finish()?;

    Ok(stats)
}

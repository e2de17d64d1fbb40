//! Alignment hit records and identity statistics.
//!
//! A [`Hit`] is produced for every aligned candidate. The CIGAR emitted by
//! the aligner is replayed against the query and target to derive match,
//! mismatch and gap counts, terminal gaps are trimmed off for the internal
//! statistics, and the five identity definitions are computed from those
//! counts.
//!
//! CIGAR conventions: `M` consumes one query and one target symbol, `I`
//! consumes a target symbol only (a gap in the query), `D` consumes a query
//! symbol only (a gap in the target). Run lengths above 1 carry an integer
//! prefix.

use crate::alphabet::code4;
use crate::error::MetamerError;

/// Which identity definition ranks and filters hits.
///
/// * 0: matches / (matches + mismatches + internal indels)
/// * 1: matches / internal alignment length
/// * 2: matches / (matches + mismatches), the default
/// * 3: matches / length of the shorter sequence
/// * 4: matches / full alignment length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdDef {
    Id0,
    Id1,
    #[default]
    Id2,
    Id3,
    Id4,
}

impl IdDef {
    pub fn from_index(iddef: u8) -> Option<Self> {
        match iddef {
            0 => Some(Self::Id0),
            1 => Some(Self::Id1),
            2 => Some(Self::Id2),
            3 => Some(Self::Id3),
            4 => Some(Self::Id4),
            _ => None,
        }
    }
}

/// One alignment of a query against a database record.
#[derive(Debug, Clone, Default)]
pub struct Hit {
    pub target: usize,
    /// 0 = plus, 1 = minus.
    pub strand: u8,
    /// Shared k-mer count from the candidate selection stage.
    pub count: u32,
    pub score: i64,
    pub cigar: String,

    /// Statistics over the full alignment, terminal gaps included.
    pub alignment_length: usize,
    pub matches: usize,
    pub mismatches: usize,
    /// Gap openings.
    pub gaps: usize,
    /// Gap columns.
    pub indels: usize,

    /// Statistics after trimming terminal gaps.
    pub internal_alignment_length: usize,
    pub internal_gaps: usize,
    pub internal_indels: usize,
    pub trim_q_left: usize,
    pub trim_q_right: usize,
    pub trim_t_left: usize,
    pub trim_t_right: usize,
    pub trim_aln_left: usize,
    pub trim_aln_right: usize,

    /// Identity used for ranking, chosen by `iddef`. Fraction in [0, 1].
    pub id: f64,
    pub id0: f64,
    pub id1: f64,
    pub id2: f64,
    pub id3: f64,
    pub id4: f64,

    pub shortest: usize,
    pub longest: usize,

    pub aligned: bool,
    pub accepted: bool,
    pub rejected: bool,
    pub weak: bool,
}

/// Parses a CIGAR string into (run length, op) pairs.
pub fn parse_cigar(cigar: &str) -> Result<Vec<(usize, u8)>, MetamerError> {
    let mut ops = Vec::new();
    let mut run = 0usize;
    for c in cigar.bytes() {
        match c {
            b'0'..=b'9' => {
                run = run * 10 + (c - b'0') as usize;
            }
            b'M' | b'I' | b'D' => {
                ops.push((run.max(1), c));
                run = 0;
            }
            _ => {
                return Err(MetamerError::Internal(format!(
                    "unexpected symbol '{}' in cigar '{cigar}'",
                    c as char
                )))
            }
        }
    }
    if run != 0 {
        return Err(MetamerError::Internal(format!(
            "trailing run length in cigar '{cigar}'"
        )));
    }
    Ok(ops)
}

/// Counts derived by replaying a CIGAR against the aligned sequences.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CigarStats {
    pub alignment_length: usize,
    pub matches: usize,
    pub mismatches: usize,
    pub gaps: usize,
    pub indels: usize,
}

/// Replays `cigar` against `query` and `target`, counting columns.
///
/// Symbols compare equal when their 4-bit IUPAC codes are identical, so
/// case differences do not count as mismatches but distinct ambiguity
/// codes do.
pub fn cigar_stats(cigar: &str, query: &[u8], target: &[u8]) -> Result<CigarStats, MetamerError> {
    let ops = parse_cigar(cigar)?;
    let mut stats = CigarStats::default();
    let mut qpos = 0usize;
    let mut tpos = 0usize;

    for (run, op) in ops {
        stats.alignment_length += run;
        match op {
            b'M' => {
                for _ in 0..run {
                    if qpos >= query.len() || tpos >= target.len() {
                        return Err(MetamerError::Internal(format!(
                            "cigar '{cigar}' overruns sequences"
                        )));
                    }
                    if code4(query[qpos]) == code4(target[tpos]) {
                        stats.matches += 1;
                    } else {
                        stats.mismatches += 1;
                    }
                    qpos += 1;
                    tpos += 1;
                }
            }
            b'I' => {
                stats.gaps += 1;
                stats.indels += run;
                tpos += run;
            }
            b'D' => {
                stats.gaps += 1;
                stats.indels += run;
                qpos += run;
            }
            _ => unreachable!(),
        }
    }

    if qpos != query.len() || tpos != target.len() {
        return Err(MetamerError::Internal(format!(
            "cigar '{cigar}' covers {qpos}x{tpos}, sequences are {}x{}",
            query.len(),
            target.len()
        )));
    }
    Ok(stats)
}

impl Hit {
    /// Builds a hit from an alignment, deriving all counts and identities.
    pub fn from_alignment(
        target: usize,
        strand: u8,
        count: u32,
        score: i64,
        cigar: String,
        query: &[u8],
        target_seq: &[u8],
        iddef: IdDef,
    ) -> Result<Self, MetamerError> {
        let stats = cigar_stats(&cigar, query, target_seq)?;
        let mut hit = Hit {
            target,
            strand,
            count,
            score,
            alignment_length: stats.alignment_length,
            matches: stats.matches,
            mismatches: stats.mismatches,
            gaps: stats.gaps,
            indels: stats.indels,
            shortest: query.len().min(target_seq.len()),
            longest: query.len().max(target_seq.len()),
            aligned: true,
            cigar,
            ..Hit::default()
        };
        hit.trim_terminal_gaps()?;
        hit.compute_identities(iddef);
        Ok(hit)
    }

    /// A synthetic perfect hit used by exact search: `NM` CIGAR, all
    /// identities 1.
    pub fn perfect(target: usize, strand: u8, seqlen: usize, match_score: i64) -> Self {
        Hit {
            target,
            strand,
            count: 0,
            score: seqlen as i64 * match_score,
            cigar: format!("{seqlen}M"),
            alignment_length: seqlen,
            matches: seqlen,
            mismatches: 0,
            gaps: 0,
            indels: 0,
            internal_alignment_length: seqlen,
            internal_gaps: 0,
            internal_indels: 0,
            id: 1.0,
            id0: 1.0,
            id1: 1.0,
            id2: 1.0,
            id3: 1.0,
            id4: 1.0,
            shortest: seqlen,
            longest: seqlen,
            aligned: true,
            ..Hit::default()
        }
    }

    /// Trims terminal gap runs off the CIGAR for the internal statistics.
    /// Only the first and last runs can be terminal gaps.
    fn trim_terminal_gaps(&mut self) -> Result<(), MetamerError> {
        let ops = parse_cigar(&self.cigar)?;

        if let Some(&(run, op)) = ops.first() {
            match op {
                b'D' => {
                    self.trim_q_left = run;
                    self.trim_aln_left = run;
                }
                b'I' => {
                    self.trim_t_left = run;
                    self.trim_aln_left = run;
                }
                _ => {}
            }
        }
        if ops.len() > 1 {
            if let Some(&(run, op)) = ops.last() {
                match op {
                    b'D' => {
                        self.trim_q_right = run;
                        self.trim_aln_right = run;
                    }
                    b'I' => {
                        self.trim_t_right = run;
                        self.trim_aln_right = run;
                    }
                    _ => {}
                }
            }
        }

        self.internal_alignment_length =
            self.alignment_length - self.trim_aln_left - self.trim_aln_right;
        self.internal_gaps = self.gaps
            - usize::from(self.trim_aln_left > 0)
            - usize::from(self.trim_aln_right > 0);
        self.internal_indels = self.indels - self.trim_aln_left - self.trim_aln_right;
        Ok(())
    }

    fn compute_identities(&mut self, iddef: IdDef) {
        fn ratio(num: usize, denom: usize) -> f64 {
            if denom == 0 {
                0.0
            } else {
                num as f64 / denom as f64
            }
        }

        self.id0 = ratio(
            self.matches,
            self.matches + self.mismatches + self.internal_indels,
        );
        self.id1 = ratio(self.matches, self.internal_alignment_length);
        self.id2 = ratio(self.matches, self.matches + self.mismatches);
        self.id3 = ratio(self.matches, self.shortest);
        self.id4 = ratio(self.matches, self.alignment_length);

        self.id = match iddef {
            IdDef::Id0 => self.id0,
            IdDef::Id1 => self.id1,
            IdDef::Id2 => self.id2,
            IdDef::Id3 => self.id3,
            IdDef::Id4 => self.id4,
        };
    }
}

//! Banded global aligner with 16-bit saturating cells.
//!
//! Needleman-Wunsch over 4-bit nucleotide codes with six gap penalty
//! classes: query/target crossed with left edge, interior and right edge.
//! Candidates are aligned in batches of up to [`CHANNELS`] targets against
//! one prepared query. Cells saturate at the i16 limits; a lane whose final
//! score touches either limit is reported unaligned and the caller falls
//! back to the scalar aligner.
//!
//! The kernel here is the portable formulation of the classic 8-lane SIMD
//! recurrence; per cell, in order:
//!
//! ```text
//! H ← Hdiag + V
//! dir(up)      ← F > H;  H ← max(H, F)
//! dir(left)    ← E > H;  H ← max(H, E)
//! F' ← max(F − Rt, H − QRt);  dir(ext-up)   ← F − Rt  > H − QRt
//! E' ← max(E − Rq, H − QRq);  dir(ext-left) ← E − Rq  > H − QRq
//! ```
//!
//! Backtracking reads the four direction bits per cell with tie priority:
//! extend the current gap, then open a gap in the query, then a gap in the
//! target, then the diagonal.

use crate::alphabet::code4;

/// Number of targets aligned per batch.
pub const CHANNELS: usize = 8;

pub(crate) const MASK_UP: u8 = 1;
pub(crate) const MASK_LEFT: u8 = 2;
pub(crate) const MASK_EXT_UP: u8 = 4;
pub(crate) const MASK_EXT_LEFT: u8 = 8;

/// Match/mismatch scores and the six gap open/extension penalty classes.
/// Penalties are positive magnitudes.
///
/// Open penalties here exclude the first gap column: a gap of length L in
/// an interior position costs `open + L * extension`. The CLI layer
/// converts from the conventional "open includes one extension" form by
/// subtracting the extension once. Terminal gaps default to much cheaper
/// penalties than interior ones, which makes the global alignment behave
/// semi-globally.
#[derive(Debug, Clone, Copy)]
pub struct ScoringParams {
    pub match_score: i16,
    pub mismatch_score: i16,
    pub gap_open_query_left: i16,
    pub gap_open_target_left: i16,
    pub gap_open_query_interior: i16,
    pub gap_open_target_interior: i16,
    pub gap_open_query_right: i16,
    pub gap_open_target_right: i16,
    pub gap_extension_query_left: i16,
    pub gap_extension_target_left: i16,
    pub gap_extension_query_interior: i16,
    pub gap_extension_target_interior: i16,
    pub gap_extension_query_right: i16,
    pub gap_extension_target_right: i16,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            match_score: 2,
            mismatch_score: -4,
            gap_open_query_left: 1,
            gap_open_target_left: 1,
            gap_open_query_interior: 18,
            gap_open_target_interior: 18,
            gap_open_query_right: 1,
            gap_open_target_right: 1,
            gap_extension_query_left: 1,
            gap_extension_target_left: 1,
            gap_extension_query_interior: 2,
            gap_extension_target_interior: 2,
            gap_extension_query_right: 1,
            gap_extension_target_right: 1,
        }
    }
}

/// Outcome of aligning one target in a batch.
#[derive(Debug, Clone, Default)]
pub struct LaneResult {
    pub score: i64,
    /// False when the score saturated; counts are zero and the CIGAR empty.
    pub aligned: bool,
    pub cigar: String,
    pub alignment_length: usize,
    pub matches: usize,
    pub mismatches: usize,
    /// Gap openings.
    pub gaps: usize,
}

/// Aligner instance holding the scoring tables and the prepared query.
pub struct Search16 {
    params: ScoringParams,
    /// 16x16 substitution scores over 4-bit codes. Identical codes score
    /// as a match; pairs involving 0 or ambiguity codes score zero.
    matrix: [[i16; 16]; 16],
    query4: Vec<u8>,
}

impl Search16 {
    pub fn new(params: ScoringParams) -> Self {
        let mut matrix = [[0i16; 16]; 16];
        for (i, row) in matrix.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = if i == j {
                    params.match_score
                } else if i == 0 || j == 0 || i > 4 || j > 4 {
                    0
                } else {
                    params.mismatch_score
                };
            }
        }
        Self {
            params,
            matrix,
            query4: Vec::new(),
        }
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// Prepares a query for subsequent batches.
    pub fn set_query(&mut self, seq: &[u8]) {
        self.query4 = seq.iter().map(|&c| code4(c)).collect();
    }

    /// Aligns up to [`CHANNELS`] targets against the prepared query.
    pub fn align_batch(&self, targets: &[&[u8]]) -> Vec<LaneResult> {
        debug_assert!(targets.len() <= CHANNELS);
        targets.iter().map(|t| self.align_one(t)).collect()
    }

    fn align_one(&self, target: &[u8]) -> LaneResult {
        let qlen = self.query4.len();
        let dlen = target.len();
        if qlen == 0 || dlen == 0 {
            return LaneResult::default();
        }

        let target4: Vec<u8> = target.iter().map(|&c| code4(c)).collect();
        let p = &self.params;

        let qr_t_interior = p
            .gap_open_target_interior
            .saturating_add(p.gap_extension_target_interior);
        let qr_t_right = p
            .gap_open_target_right
            .saturating_add(p.gap_extension_target_right);
        let qr_q_interior = p
            .gap_open_query_interior
            .saturating_add(p.gap_extension_query_interior);
        let qr_q_right = p
            .gap_open_query_right
            .saturating_add(p.gap_extension_query_right);

        let mut dir = vec![0u8; qlen * dlen];

        // left edge: query prefix aligned against nothing (gap in target)
        let mut hh = vec![0i16; qlen];
        let mut ee = vec![i16::MIN; qlen];
        let mut boundary = 0i16;
        for (i, h) in hh.iter_mut().enumerate() {
            boundary = if i == 0 {
                boundary
                    .saturating_sub(p.gap_open_target_left)
                    .saturating_sub(p.gap_extension_target_left)
            } else {
                boundary.saturating_sub(p.gap_extension_target_left)
            };
            *h = boundary;
        }

        for j in 0..dlen {
            let (qr_t, r_t) = if j == dlen - 1 {
                (qr_t_right, p.gap_extension_target_right)
            } else {
                (qr_t_interior, p.gap_extension_target_interior)
            };

            // top edge: target prefix aligned against nothing (gap in query)
            let mut hdiag = if j == 0 {
                0
            } else {
                let b = -(i32::from(p.gap_open_query_left)
                    + i32::from(p.gap_extension_query_left) * j as i32);
                b.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
            };
            let mut f = i16::MIN;
            let dcode = target4[j] as usize;

            for i in 0..qlen {
                let (qr_q, r_q) = if i == qlen - 1 {
                    (qr_q_right, p.gap_extension_query_right)
                } else {
                    (qr_q_interior, p.gap_extension_query_interior)
                };

                let v = self.matrix[dcode][self.query4[i] as usize];
                let mut h = hdiag.saturating_add(v);
                let mut d = 0u8;

                if f > h {
                    d |= MASK_UP;
                }
                h = h.max(f);

                let e = ee[i];
                if e > h {
                    d |= MASK_LEFT;
                }
                h = h.max(e);

                let hf = h.saturating_sub(qr_t);
                let fnew = f.saturating_sub(r_t);
                if fnew > hf {
                    d |= MASK_EXT_UP;
                }
                f = fnew.max(hf);

                let he = h.saturating_sub(qr_q);
                let enew = e.saturating_sub(r_q);
                if enew > he {
                    d |= MASK_EXT_LEFT;
                }
                ee[i] = enew.max(he);

                dir[i * dlen + j] = d;
                hdiag = hh[i];
                hh[i] = h;
            }
        }

        let score = hh[qlen - 1];
        if score <= i16::MIN || score >= i16::MAX {
            return LaneResult {
                score: i64::from(score),
                ..LaneResult::default()
            };
        }

        self.backtrack(&target4, &dir, dlen, score)
    }

    /// Walks the direction bits from the lower-right corner back to the
    /// origin, emitting a run-length compressed CIGAR.
    fn backtrack(&self, target4: &[u8], dir: &[u8], dlen: usize, score: i16) -> LaneResult {
        let qlen = self.query4.len();

        let mut aligned = 0usize;
        let mut matches = 0usize;
        let mut mismatches = 0usize;
        let mut gaps = 0usize;

        // runs collected back-to-front
        let mut runs: Vec<(u8, usize)> = Vec::new();
        let mut push_op = |runs: &mut Vec<(u8, usize)>, op: u8| match runs.last_mut() {
            Some((last, count)) if *last == op => *count += 1,
            _ => runs.push((op, 1)),
        };

        let mut i = qlen as isize - 1;
        let mut j = dlen as isize - 1;
        let mut op = 0u8;

        while i >= 0 && j >= 0 {
            aligned += 1;
            let d = dir[i as usize * dlen + j as usize];

            if op == b'I' && d & MASK_EXT_LEFT != 0 {
                j -= 1;
                push_op(&mut runs, b'I');
            } else if op == b'D' && d & MASK_EXT_UP != 0 {
                i -= 1;
                push_op(&mut runs, b'D');
            } else if d & MASK_LEFT != 0 {
                if op != b'I' {
                    gaps += 1;
                }
                j -= 1;
                push_op(&mut runs, b'I');
                op = b'I';
            } else if d & MASK_UP != 0 {
                if op != b'D' {
                    gaps += 1;
                }
                i -= 1;
                push_op(&mut runs, b'D');
                op = b'D';
            } else {
                if self.query4[i as usize] == target4[j as usize] {
                    matches += 1;
                } else {
                    mismatches += 1;
                }
                i -= 1;
                j -= 1;
                push_op(&mut runs, b'M');
                op = b'M';
            }
        }

        while i >= 0 {
            aligned += 1;
            if op != b'D' {
                gaps += 1;
            }
            i -= 1;
            push_op(&mut runs, b'D');
            op = b'D';
        }

        while j >= 0 {
            aligned += 1;
            if op != b'I' {
                gaps += 1;
            }
            j -= 1;
            push_op(&mut runs, b'I');
            op = b'I';
        }

        let mut cigar = String::new();
        for &(op, count) in runs.iter().rev() {
            if count > 1 {
                cigar.push_str(&count.to_string());
            }
            cigar.push(op as char);
        }

        LaneResult {
            score: i64::from(score),
            aligned: true,
            cigar,
            alignment_length: aligned,
            matches,
            mismatches,
            gaps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hits::cigar_stats;

    /// Uniform penalties keep the expected optimum unambiguous in tests.
    fn uniform() -> ScoringParams {
        ScoringParams {
            gap_open_query_left: 20,
            gap_open_target_left: 20,
            gap_open_query_right: 20,
            gap_open_target_right: 20,
            gap_open_query_interior: 20,
            gap_open_target_interior: 20,
            gap_extension_query_left: 2,
            gap_extension_target_left: 2,
            gap_extension_query_right: 2,
            gap_extension_target_right: 2,
            gap_extension_query_interior: 2,
            gap_extension_target_interior: 2,
            ..ScoringParams::default()
        }
    }

    fn align(query: &[u8], target: &[u8]) -> LaneResult {
        let mut s = Search16::new(uniform());
        s.set_query(query);
        s.align_batch(&[target]).remove(0)
    }

    #[test]
    fn identical_sequences_score_match_times_length() {
        let r = align(b"ACGTACGT", b"ACGTACGT");
        assert!(r.aligned);
        assert_eq!(r.score, 16);
        assert_eq!(r.cigar, "8M");
        assert_eq!(r.matches, 8);
        assert_eq!(r.mismatches, 0);
        assert_eq!(r.gaps, 0);
    }

    #[test]
    fn single_mismatch() {
        let r = align(b"ACGTACGT", b"ACGTTCGT");
        assert!(r.aligned);
        assert_eq!(r.cigar, "8M");
        assert_eq!(r.matches, 7);
        assert_eq!(r.mismatches, 1);
        // 7 * 2 - 4
        assert_eq!(r.score, 10);
    }

    #[test]
    fn single_interior_gap() {
        // deleting one symbol from the query: gap open 20 + ext 2
        let r = align(b"ACGTACGT", b"ACGACGT");
        assert!(r.aligned);
        assert_eq!(r.matches, 7);
        assert_eq!(r.mismatches, 0);
        assert_eq!(r.gaps, 1);
        assert_eq!(r.alignment_length, 8);
        assert_eq!(r.score, 7 * 2 - 20 - 2);
    }

    #[test]
    fn terminal_gap_in_target() {
        // query longer than target: trailing D run of two columns
        let r = align(b"ACGTACGTAA", b"ACGTACGT");
        assert!(r.aligned);
        assert_eq!(r.gaps, 1);
        assert_eq!(r.alignment_length, 10);
        assert!(r.cigar.ends_with('D'));
        assert_eq!(r.score, 8 * 2 - 20 - 2 - 2);
    }

    #[test]
    fn default_penalties_favor_terminal_gaps() {
        // the adjusted defaults make terminal gaps cheap, so a contained
        // query aligns without interior surgery
        let mut s = Search16::new(ScoringParams::default());
        s.set_query(b"ACGTACGT");
        let r = s.align_batch(&[b"GGACGTACGTGG".as_slice()]).remove(0);
        assert!(r.aligned);
        assert_eq!(r.matches, 8);
        assert_eq!(r.mismatches, 0);
        // two terminal gaps in the query, each open 1 + 2 extensions of 1
        assert_eq!(r.score, 8 * 2 - 3 - 3);
    }

    #[test]
    fn cigar_replay_matches_reported_counts() {
        let cases: [(&[u8], &[u8]); 4] = [
            (b"ACGTACGT", b"ACGTACGT"),
            (b"ACGTACGT", b"ACGACGT"),
            (b"ACGTAAGGTT", b"ACGTCCGGTT"),
            (b"ACGT", b"TTACGTTT"),
        ];
        for (q, t) in cases {
            let r = align(q, t);
            assert!(r.aligned);
            let stats = cigar_stats(&r.cigar, q, t).unwrap();
            assert_eq!(stats.alignment_length, r.alignment_length, "{:?}", r.cigar);
            assert_eq!(stats.matches, r.matches);
            assert_eq!(stats.mismatches, r.mismatches);
            assert_eq!(stats.gaps, r.gaps);
        }
    }

    #[test]
    fn ambiguity_codes_score_zero() {
        let with_n = align(b"ACNT", b"ACNT");
        let plain = align(b"ACGT", b"ACGT");
        // N vs N scores as a match in the matrix, but N vs A/C/G/T is zero
        let crossed = align(b"ANGT", b"ACGT");
        assert_eq!(plain.score, 8);
        assert_eq!(with_n.score, 8);
        assert_eq!(crossed.score, 6);
    }

    #[test]
    fn batch_aligns_each_target_independently() {
        let mut s = Search16::new(ScoringParams::default());
        s.set_query(b"ACGTACGT");
        let targets: Vec<&[u8]> = vec![b"ACGTACGT", b"ACGTTCGT", b"TTTTTTTT"];
        let results = s.align_batch(&targets);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 16);
        assert_eq!(results[1].score, 10);
        assert!(results[2].score < 0);
    }

    #[test]
    fn empty_target_is_unaligned() {
        let r = align(b"ACGT", b"");
        assert!(!r.aligned);
        assert!(r.cigar.is_empty());
    }

    #[test]
    fn asymmetric_penalties_steer_gap_placement() {
        let params = ScoringParams {
            // cheap terminal target gaps: prefer trailing over interior
            gap_open_target_right: 1,
            gap_extension_target_right: 1,
            ..uniform()
        };
        let mut s = Search16::new(params);
        s.set_query(b"ACGTACGTAA");
        let r = s.align_batch(&[b"ACGTACGT".as_slice()]).remove(0);
        assert!(r.aligned);
        assert!(r.cigar.ends_with('D'), "cigar {}", r.cigar);
        assert_eq!(r.score, 8 * 2 - 1 - 1 * 2);
    }
}

//! Scalar global aligner.
//!
//! The same recurrence and traceback as [`crate::align16`], computed in
//! 64-bit cells. Used as the fallback when a 16-bit lane saturates; on
//! inputs where the 16-bit kernel stays in range both aligners produce
//! identical scores and CIGARs, which the tests assert on shared fixtures.

use crate::align16::{LaneResult, ScoringParams, MASK_EXT_LEFT, MASK_EXT_UP, MASK_LEFT, MASK_UP};
use crate::alphabet::code4;

/// Aligns `query` against `target` globally, maximizing score.
pub fn align(query: &[u8], target: &[u8], p: &ScoringParams) -> LaneResult {
    let qlen = query.len();
    let dlen = target.len();
    if qlen == 0 || dlen == 0 {
        return LaneResult::default();
    }

    let query4: Vec<u8> = query.iter().map(|&c| code4(c)).collect();
    let target4: Vec<u8> = target.iter().map(|&c| code4(c)).collect();

    let score = |a: u8, b: u8| -> i64 {
        let (i, j) = (a as usize, b as usize);
        if i == j {
            i64::from(p.match_score)
        } else if i == 0 || j == 0 || i > 4 || j > 4 {
            0
        } else {
            i64::from(p.mismatch_score)
        }
    };

    let qr_t_interior = i64::from(p.gap_open_target_interior) + i64::from(p.gap_extension_target_interior);
    let qr_t_right = i64::from(p.gap_open_target_right) + i64::from(p.gap_extension_target_right);
    let qr_q_interior = i64::from(p.gap_open_query_interior) + i64::from(p.gap_extension_query_interior);
    let qr_q_right = i64::from(p.gap_open_query_right) + i64::from(p.gap_extension_query_right);

    const NEG_INF: i64 = i64::MIN / 2;

    let mut dir = vec![0u8; qlen * dlen];
    let mut hh = vec![0i64; qlen];
    let mut ee = vec![NEG_INF; qlen];

    for (i, h) in hh.iter_mut().enumerate() {
        *h = -(i64::from(p.gap_open_target_left)
            + i64::from(p.gap_extension_target_left) * (i as i64 + 1));
    }

    for j in 0..dlen {
        let (qr_t, r_t) = if j == dlen - 1 {
            (qr_t_right, i64::from(p.gap_extension_target_right))
        } else {
            (qr_t_interior, i64::from(p.gap_extension_target_interior))
        };

        let mut hdiag = if j == 0 {
            0
        } else {
            -(i64::from(p.gap_open_query_left) + i64::from(p.gap_extension_query_left) * j as i64)
        };
        let mut f = NEG_INF;

        for i in 0..qlen {
            let (qr_q, r_q) = if i == qlen - 1 {
                (qr_q_right, i64::from(p.gap_extension_query_right))
            } else {
                (qr_q_interior, i64::from(p.gap_extension_query_interior))
            };

            let v = score(target4[j], query4[i]);
            let mut h = hdiag + v;
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

            let hf = h - qr_t;
            let fnew = f - r_t;
            if fnew > hf {
                d |= MASK_EXT_UP;
            }
            f = fnew.max(hf);

            let he = h - qr_q;
            let enew = e - r_q;
            if enew > he {
                d |= MASK_EXT_LEFT;
            }
            ee[i] = enew.max(he);

            dir[i * dlen + j] = d;
            hdiag = hh[i];
            hh[i] = h;
        }
    }

    backtrack(&query4, &target4, &dir, hh[qlen - 1])
}

fn backtrack(query4: &[u8], target4: &[u8], dir: &[u8], score: i64) -> LaneResult {
    let qlen = query4.len();
    let dlen = target4.len();

    let mut aligned = 0usize;
    let mut matches = 0usize;
    let mut mismatches = 0usize;
    let mut gaps = 0usize;

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
            if query4[i as usize] == target4[j as usize] {
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
        score,
        aligned: true,
        cigar,
        alignment_length: aligned,
        matches,
        mismatches,
        gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align16::Search16;

    #[test]
    fn agrees_with_the_16bit_kernel_on_fixtures() {
        let params = ScoringParams::default();
        let mut simd = Search16::new(params);

        let cases: [(&[u8], &[u8]); 5] = [
            (b"ACGTACGT", b"ACGTACGT"),
            (b"ACGTACGT", b"ACGTTCGT"),
            (b"ACGTACGT", b"ACGACGT"),
            (b"ACGTACGTAA", b"ACGTACGT"),
            (b"GGGGACGTACGTTTTT", b"ACGTACGT"),
        ];
        for (q, t) in cases {
            simd.set_query(q);
            let a = simd.align_batch(&[t]).remove(0);
            let b = align(q, t, &params);
            assert!(a.aligned && b.aligned);
            assert_eq!(a.score, b.score, "query {q:?} target {t:?}");
            assert_eq!(a.cigar, b.cigar);
            assert_eq!(a.matches, b.matches);
            assert_eq!(a.mismatches, b.mismatches);
            assert_eq!(a.gaps, b.gaps);
        }
    }

    #[test]
    fn handles_scores_beyond_16_bits() {
        // 20k matching symbols score 40k, past i16::MAX
        let seq: Vec<u8> = b"ACGT".iter().copied().cycle().take(20_000).collect();
        let r = align(&seq, &seq, &ScoringParams::default());
        assert!(r.aligned);
        assert_eq!(r.score, 40_000);
        assert_eq!(r.cigar, "20000M");
    }
}

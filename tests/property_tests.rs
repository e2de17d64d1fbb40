//! Property-based tests using proptest.
//!
//! These check the structural invariants of the engine across arbitrary
//! inputs: header abundance round-trips, reverse-complement symmetry,
//! CIGAR/alignment consistency and identity bounds, and abundance
//! conservation under dereplication.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;

use metamer::align16::{ScoringParams, Search16};
use metamer::alphabet::reverse_complement;
use metamer::fingerprint::{fingerprint, DerepTable};
use metamer::hits::{cigar_stats, Hit, IdDef};
use metamer::record::{abundance, header_with_size, strip_size};

fn dna(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        prop_oneof![Just(b'A'), Just(b'C'), Just(b'G'), Just(b'T')],
        min_len..=max_len,
    )
}

fn header() -> impl Strategy<Value = String> {
    // labels with word characters and attribute-ish segments
    "[A-Za-z0-9_.]{1,12}(;[a-z]{1,6}=[0-9]{1,3})?".prop_map(|s| s)
}

proptest! {
    /// Rewriting any header with size=n yields a header that parses back
    /// to abundance n, and the label part survives the rewrite.
    #[test]
    fn header_abundance_round_trip(h in header(), n in 1u64..1_000_000) {
        let rewritten = header_with_size(&h, n);
        prop_assert_eq!(abundance(&rewritten).unwrap(), n);

        // the part before any size= attribute is preserved
        let prefix = strip_size(&h);
        let reparsed_prefix = strip_size(&rewritten);
        prop_assert!(reparsed_prefix.starts_with(prefix.trim_end_matches(';')));
    }

    /// Stripping an absent attribute is the identity.
    #[test]
    fn strip_size_without_annotation_is_identity(h in "[A-Za-z0-9_.]{0,16}") {
        prop_assert_eq!(strip_size(&h), h);
    }

    /// Reverse complement is an involution and preserves length.
    #[test]
    fn revcomp_is_involution(seq in dna(1, 200)) {
        let rc = reverse_complement(&seq);
        prop_assert_eq!(rc.len(), seq.len());
        prop_assert_eq!(reverse_complement(&rc), seq);
    }

    /// A sequence and its reverse complement fingerprint equal iff they
    /// are the same sequence (palindromes).
    #[test]
    fn fingerprint_distinguishes_strands(seq in dna(4, 64)) {
        let rc = reverse_complement(&seq);
        if rc == seq {
            prop_assert_eq!(fingerprint(&seq), fingerprint(&rc));
        } else {
            // equal fingerprints for distinct content would be a collision;
            // astronomically unlikely at 128 bits
            prop_assert_ne!(fingerprint(&seq), fingerprint(&rc));
        }
    }

    /// The aligner's reported counts always replay from its CIGAR, and the
    /// identity definitions stay within bounds.
    #[test]
    fn cigar_is_consistent_with_alignment(q in dna(8, 48), t in dna(8, 48)) {
        let mut aligner = Search16::new(ScoringParams::default());
        aligner.set_query(&q);
        let lane = aligner.align_batch(&[t.as_slice()]).remove(0);
        prop_assert!(lane.aligned);

        let stats = cigar_stats(&lane.cigar, &q, &t).unwrap();
        prop_assert_eq!(stats.alignment_length, lane.alignment_length);
        prop_assert_eq!(stats.matches, lane.matches);
        prop_assert_eq!(stats.mismatches, lane.mismatches);
        prop_assert_eq!(stats.gaps, lane.gaps);

        let hit = Hit::from_alignment(0, 0, 1, lane.score, lane.cigar, &q, &t, IdDef::Id2)
            .unwrap();
        for id in [hit.id0, hit.id1, hit.id2, hit.id3, hit.id4] {
            prop_assert!((0.0..=1.0).contains(&id));
        }
        // full-length identity 1 implies a perfect full-length alignment
        if (hit.id4 - 1.0).abs() < f64::EPSILON {
            prop_assert_eq!(hit.matches, hit.alignment_length);
            prop_assert_eq!(hit.alignment_length, hit.shortest);
            prop_assert_eq!(hit.alignment_length, hit.longest);
        }
    }

    /// Total abundance is conserved by fingerprint aggregation.
    #[test]
    fn derep_table_conserves_abundance(
        seqs in proptest::collection::vec((dna(4, 16), 1i64..100), 1..50)
    ) {
        let mut table = DerepTable::new();
        let mut total = 0i64;
        for (seq, ab) in &seqs {
            table.add(fingerprint(seq), *ab);
            total += ab;
        }
        prop_assert_eq!(table.sum_size(), total);
    }
}

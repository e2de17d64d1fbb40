//! Low-complexity masking.
//!
//! DUST scores triplet repetition inside 64-base windows advanced with 50%
//! overlap; regions scoring above the threshold are soft-masked
//! (lower-cased) or hard-masked (replaced by 'N'). Soft-mask application
//! without DUST converts pre-existing lower-case regions to 'N'.

use rayon::prelude::*;

use crate::alphabet::code2;
use crate::store::SeqStore;

const DUST_WINDOW: usize = 64;
const DUST_WORD: usize = 3;
const DUST_LEVEL: u32 = 20;

/// Masking mode for query or database sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MaskMode {
    /// No masking.
    None,
    /// Mask low-complexity regions with DUST.
    #[default]
    Dust,
    /// Respect existing lower-case (soft) masking.
    Soft,
}

/// Finds the highest-scoring low-complexity interval in a window.
///
/// Scores sub-intervals by `10 * sum / j` where `sum` accumulates the
/// previous occurrence counts of each triplet; returns the best score and
/// stores the interval bounds in `beg`/`end`.
fn best_interval(window: &[u8], beg: &mut usize, end: &mut usize) -> u32 {
    const WORD_COUNT: usize = 1 << (2 * DUST_WORD);
    let len = window.len();

    // smallest possible region is 8
    if len < DUST_WORD + 5 {
        return 0;
    }
    let limit = len - DUST_WORD + 1 - 5;

    let mut bestv = 0u32;
    let mut besti = 0usize;
    let mut bestj = 0usize;

    let mut words = [0usize; DUST_WINDOW];
    let mut word = 0usize;
    for (j, &c) in window.iter().enumerate() {
        word = ((word << 2) | code2(c) as usize) & (WORD_COUNT - 1);
        words[j] = word;
    }

    let mut counts = [0u32; WORD_COUNT];
    for i in 0..limit {
        counts.fill(0);
        let mut sum = 0u32;

        for j in (DUST_WORD - 1)..(len - i) {
            let w = words[i + j];
            let c = counts[w];
            if c != 0 {
                sum += c;
                let v = 10 * sum / j as u32;
                if v > bestv {
                    bestv = v;
                    besti = i;
                    bestj = j;
                }
            }
            counts[w] += 1;
        }
    }

    *beg = besti;
    *end = besti + bestj;
    bestv
}

/// DUST-masks one sequence in place.
///
/// With `hardmask` the masked positions become 'N'; otherwise the whole
/// sequence is upper-cased and masked positions are lower-cased.
pub fn dust(seq: &mut [u8], hardmask: bool) {
    let len = seq.len();
    let original: Vec<u8> = seq.to_vec();

    if !hardmask {
        seq.make_ascii_uppercase();
    }

    let mut beg = 0;
    let mut end = 0;
    let mut i = 0;
    while i < len {
        let l = DUST_WINDOW.min(len - i);
        let v = best_interval(&original[i..i + l], &mut beg, &mut end);

        if v > DUST_LEVEL {
            if hardmask {
                for c in &mut seq[beg + i..=end + i] {
                    *c = b'N';
                }
            } else {
                for (j, c) in seq[beg + i..=end + i].iter_mut().enumerate() {
                    *c = original[beg + i + j].to_ascii_lowercase();
                }
            }

            if end < DUST_WINDOW / 2 {
                i += DUST_WINDOW / 2 - end;
            }
        }
        i += DUST_WINDOW / 2;
    }
}

/// Replaces all lower-case symbols by 'N'.
pub fn hardmask_soft(seq: &mut [u8]) {
    for c in seq.iter_mut() {
        if c.is_ascii_lowercase() {
            *c = b'N';
        }
    }
}

/// Masks one query sequence in place according to mode and hardmask flag.
pub fn mask_sequence(seq: &mut [u8], mode: MaskMode, hardmask: bool) {
    match mode {
        MaskMode::Dust => dust(seq, hardmask),
        MaskMode::Soft if hardmask => hardmask_soft(seq),
        MaskMode::Soft | MaskMode::None => {}
    }
}

/// Masks every record in the store, in parallel.
pub fn mask_store(store: &mut SeqStore, mode: MaskMode, hardmask: bool) {
    match mode {
        MaskMode::Dust => {
            store
                .par_iter_mut_records()
                .for_each(|rec| dust(&mut rec.seq, hardmask));
        }
        MaskMode::Soft if hardmask => {
            store
                .par_iter_mut_records()
                .for_each(|rec| hardmask_soft(&mut rec.seq));
        }
        MaskMode::Soft | MaskMode::None => {}
    }
}

/// Output destinations for the `fastx_mask` command.
#[derive(Debug, Default, Clone)]
pub struct MaskIo {
    pub fastaout: Option<std::path::PathBuf>,
    pub fastqout: Option<std::path::PathBuf>,
}

/// Masks a whole file and rewrites it as FASTA and/or FASTQ.
pub fn fastx_mask(
    store: &mut SeqStore,
    mode: MaskMode,
    hardmask: bool,
    io: &MaskIo,
) -> Result<(), crate::error::MetamerError> {
    use crate::error::MetamerError;
    use crate::output::{FastaWriter, FastqWriter};

    if io.fastaout.is_none() && io.fastqout.is_none() {
        return Err(MetamerError::OptionConflict(
            "specify output files for masking with --fastaout and/or --fastqout".into(),
        ));
    }
    if io.fastqout.is_some() && store.iter().any(|r| r.qual.is_none()) {
        return Err(MetamerError::OptionConflict(
            "cannot write FASTQ output with a FASTA input file, lacking quality scores".into(),
        ));
    }

    mask_store(store, mode, hardmask);

    if let Some(path) = &io.fastaout {
        let mut w = FastaWriter::create(path)?;
        for rec in store.iter() {
            w.write(&rec.header, &rec.seq)?;
        }
        w.finish()?;
    }
    if let Some(path) = &io.fastqout {
        let mut w = FastqWriter::create(path)?;
        for rec in store.iter() {
            if let Some(qual) = &rec.qual {
                w.write(&rec.header, &rec.seq, qual)?;
            }
        }
        w.finish()?;
    }
    Ok(())
}

//! FASTA/FASTQ record streams.
//!
//! Parsing and decompression (gzip/bzip2, autodetected from magic bytes) are
//! delegated to needletail; this layer applies the input character policy,
//! label truncation, abundance parsing, quality-range validation and length
//! filtering, and accumulates the statistics reported at the end of a run.

use std::path::{Path, PathBuf};

use needletail::{parse_fastx_file, FastxReader};

use crate::alphabet::{char_status, CharStatus};
use crate::error::MetamerError;
use crate::record::{abundance, SeqRecord};

/// How records are cleaned and filtered while reading.
#[derive(Debug, Clone)]
pub struct ReadPolicy {
    /// Truncate headers at the first whitespace.
    pub truncate_labels: bool,
    /// Convert sequence symbols to upper case (disabled when soft masking
    /// information must survive the load).
    pub upcase: bool,
    /// Discard (and count) sequences shorter than this.
    pub min_seq_length: u32,
    /// Discard (and count) sequences longer than this.
    pub max_seq_length: u32,
    /// ASCII offset for FASTQ quality symbols (33 or 64).
    pub fastq_ascii: u8,
    /// Smallest acceptable quality value.
    pub fastq_qmin: i64,
    /// Largest acceptable quality value.
    pub fastq_qmax: i64,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            truncate_labels: true,
            upcase: true,
            min_seq_length: 1,
            max_seq_length: 50_000,
            fastq_ascii: 33,
            fastq_qmin: 0,
            fastq_qmax: 41,
        }
    }
}

/// Counters accumulated while reading one input file.
#[derive(Debug, Default, Clone)]
pub struct ReadStats {
    pub sequences: u64,
    pub nucleotides: u64,
    pub shortest: u32,
    pub longest: u32,
    pub discarded_short: u64,
    pub discarded_long: u64,
    /// Per-symbol counts of noisily stripped characters.
    pub stripped: Vec<(u8, u64)>,
}

impl ReadStats {
    fn record_stripped(&mut self, symbol: u8) {
        if let Some(entry) = self.stripped.iter_mut().find(|(s, _)| *s == symbol) {
            entry.1 += 1;
        } else {
            self.stripped.push((symbol, 1));
        }
    }

    /// Total count of noisily stripped characters.
    pub fn stripped_total(&self) -> u64 {
        self.stripped.iter().map(|(_, n)| n).sum()
    }

    /// Prints the end-of-run warnings for stripped characters and
    /// length-discarded sequences, mirroring the classic tool's summary.
    pub fn log_warnings(&self, policy: &ReadPolicy) {
        if self.stripped_total() > 0 {
            let detail: Vec<String> = self
                .stripped
                .iter()
                .map(|(s, n)| format!("{}({})", *s as char, n))
                .collect();
            eprintln!(
                "WARNING: invalid characters stripped from sequence: {}",
                detail.join(" ")
            );
        }
        if self.discarded_short > 0 {
            eprintln!(
                "WARNING: {} sequences shorter than {} nucleotides discarded.",
                self.discarded_short, policy.min_seq_length
            );
        }
        if self.discarded_long > 0 {
            eprintln!(
                "WARNING: {} sequences longer than {} nucleotides discarded.",
                self.discarded_long, policy.max_seq_length
            );
        }
    }
}

/// A stream of cleaned records from one FASTA or FASTQ file.
pub struct FastxStream {
    reader: Box<dyn FastxReader>,
    policy: ReadPolicy,
    path: PathBuf,
    stats: ReadStats,
    saw_quality: bool,
}

impl FastxStream {
    /// Opens `path`, autodetecting format and compression.
    pub fn open(path: &Path, policy: ReadPolicy) -> Result<Self, MetamerError> {
        let reader = parse_fastx_file(path).map_err(|e| MetamerError::Parse {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        Ok(Self {
            reader,
            policy,
            path: path.to_path_buf(),
            stats: ReadStats {
                shortest: u32::MAX,
                ..ReadStats::default()
            },
            saw_quality: false,
        })
    }

    /// Statistics accumulated so far.
    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    /// True when at least one record carried quality scores.
    pub fn saw_quality(&self) -> bool {
        self.saw_quality
    }

    /// Returns the next record passing the policy, or `None` at end of
    /// input. Records outside the length window are counted and skipped.
    pub fn next_record(&mut self) -> Result<Option<SeqRecord>, MetamerError> {
        loop {
            // copy the borrowed record out before touching self again
            let (id, raw_seq, raw_qual) = {
                let Some(item) = self.reader.next() else {
                    return Ok(None);
                };
                let rec = item.map_err(|e| MetamerError::InputFormat {
                    path: self.path.clone(),
                    details: e.to_string(),
                })?;
                (
                    rec.id().to_vec(),
                    rec.seq().into_owned(),
                    rec.qual().map(<[u8]>::to_vec),
                )
            };

            let header = self.clean_header(&id);
            let (seq, qual) = self.clean_sequence(&raw_seq, raw_qual.as_deref())?;

            let len = u32::try_from(seq.len()).map_err(|_| MetamerError::InputFormat {
                path: self.path.clone(),
                details: "sequence length exceeds 32 bits".to_string(),
            })?;

            if len < self.policy.min_seq_length {
                self.stats.discarded_short += 1;
                continue;
            }
            if len > self.policy.max_seq_length {
                self.stats.discarded_long += 1;
                continue;
            }

            let abundance = abundance(&header)?;

            self.stats.sequences += 1;
            self.stats.nucleotides += u64::from(len);
            self.stats.shortest = self.stats.shortest.min(len);
            self.stats.longest = self.stats.longest.max(len);
            if qual.is_some() {
                self.saw_quality = true;
            }

            return Ok(Some(SeqRecord {
                header,
                seq,
                qual,
                abundance,
            }));
        }
    }

    fn clean_header(&self, id: &[u8]) -> String {
        let text = String::from_utf8_lossy(id);
        if self.policy.truncate_labels {
            text.split_whitespace().next().unwrap_or("").to_string()
        } else {
            text.into_owned()
        }
    }

    #[allow(clippy::type_complexity)]
    fn clean_sequence(
        &mut self,
        raw: &[u8],
        raw_qual: Option<&[u8]>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), MetamerError> {
        let mut seq = Vec::with_capacity(raw.len());
        let mut qual = raw_qual.map(|q| Vec::with_capacity(q.len()));

        for (i, &c) in raw.iter().enumerate() {
            match char_status(c) {
                CharStatus::Legal => {
                    seq.push(if self.policy.upcase {
                        c.to_ascii_uppercase()
                    } else {
                        c
                    });
                    if let (Some(buf), Some(q)) = (qual.as_mut(), raw_qual) {
                        let symbol = q[i];
                        self.check_quality(symbol)?;
                        buf.push(symbol);
                    }
                }
                CharStatus::StripSilent => {}
                CharStatus::StripNoisy => self.stats.record_stripped(c),
                CharStatus::Fatal => {
                    let symbol = if c.is_ascii_graphic() {
                        format!("'{}'", c as char)
                    } else {
                        format!("{c:#04x} (hexadecimal)")
                    };
                    return Err(MetamerError::IllegalCharacter {
                        symbol,
                        path: self.path.clone(),
                    });
                }
            }
        }
        Ok((seq, qual))
    }

    fn check_quality(&self, symbol: u8) -> Result<(), MetamerError> {
        let q = i32::from(symbol) - i32::from(self.policy.fastq_ascii);
        if i64::from(q) < self.policy.fastq_qmin || i64::from(q) > self.policy.fastq_qmax {
            return Err(MetamerError::QualityOutOfRange {
                q,
                qmin: self.policy.fastq_qmin,
                qmax: self.policy.fastq_qmax,
            });
        }
        Ok(())
    }
}

/// Reads all records from `path` into memory.
pub fn read_all(path: &Path, policy: ReadPolicy) -> Result<(Vec<SeqRecord>, ReadStats), MetamerError> {
    let mut stream = FastxStream::open(path, policy)?;
    let mut records = Vec::new();
    while let Some(rec) = stream.next_record()? {
        records.push(rec);
    }
    Ok((records, stream.stats.clone()))
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

    #[test]
    fn reads_fasta_records() {
        let f = write_temp(">a\nACGT\n>b;size=5;\nGGCC\n");
        let (records, stats) = read_all(f.path(), ReadPolicy::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header, "a");
        assert_eq!(records[0].seq, b"ACGT");
        assert_eq!(records[0].abundance, 1);
        assert_eq!(records[1].abundance, 5);
        assert_eq!(stats.sequences, 2);
        assert_eq!(stats.nucleotides, 8);
    }

    #[test]
    fn reads_fastq_with_quality() {
        let f = write_temp("@r1\nACGT\n+\nIIII\n");
        let (records, _) = read_all(f.path(), ReadPolicy::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].qual.as_deref(), Some(&b"IIII"[..]));
    }

    #[test]
    fn multiline_fasta_sequence_is_joined() {
        let f = write_temp(">a\nACGT\nACGT\n");
        let (records, _) = read_all(f.path(), ReadPolicy::default()).unwrap();
        assert_eq!(records[0].seq, b"ACGTACGT");
    }

    #[test]
    fn header_truncated_at_whitespace() {
        let f = write_temp(">a description here\nACGT\n");
        let (records, _) = read_all(f.path(), ReadPolicy::default()).unwrap();
        assert_eq!(records[0].header, "a");

        let policy = ReadPolicy {
            truncate_labels: false,
            ..ReadPolicy::default()
        };
        let f = write_temp(">a description here\nACGT\n");
        let (records, _) = read_all(f.path(), policy).unwrap();
        assert_eq!(records[0].header, "a description here");
    }

    #[test]
    fn noisy_characters_are_stripped_and_counted() {
        let f = write_temp(">a\nAC-GT9\n");
        let (records, stats) = read_all(f.path(), ReadPolicy::default()).unwrap();
        assert_eq!(records[0].seq, b"ACGT");
        assert_eq!(stats.stripped_total(), 2);
    }

    #[test]
    fn illegal_letter_is_fatal() {
        let f = write_temp(">a\nACXGT\n");
        let err = read_all(f.path(), ReadPolicy::default()).unwrap_err();
        assert!(matches!(err, MetamerError::IllegalCharacter { .. }));
    }

    #[test]
    fn length_window_discards_are_counted() {
        let policy = ReadPolicy {
            min_seq_length: 4,
            max_seq_length: 6,
            ..ReadPolicy::default()
        };
        let f = write_temp(">a\nAC\n>b\nACGT\n>c\nACGTACGTACGT\n");
        let (records, stats) = read_all(f.path(), policy).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(stats.discarded_short, 1);
        assert_eq!(stats.discarded_long, 1);
    }

    #[test]
    fn zero_abundance_is_fatal() {
        let f = write_temp(">a;size=0;\nACGT\n");
        assert!(matches!(
            read_all(f.path(), ReadPolicy::default()),
            Err(MetamerError::InvalidAbundance { .. })
        ));
    }

    #[test]
    fn quality_out_of_range_is_fatal() {
        let policy = ReadPolicy {
            fastq_qmax: 41,
            ..ReadPolicy::default()
        };
        // 'q' - 33 = 80, far above qmax
        let f = write_temp("@r1\nACGT\n+\nIIIq\n");
        let err = read_all(f.path(), policy).unwrap_err();
        assert!(matches!(err, MetamerError::QualityOutOfRange { q: 80, .. }));
    }

    #[test]
    fn lowercase_kept_when_upcase_disabled() {
        let policy = ReadPolicy {
            upcase: false,
            ..ReadPolicy::default()
        };
        let f = write_temp(">a\nacGT\n");
        let (records, _) = read_all(f.path(), policy).unwrap();
        assert_eq!(records[0].seq, b"acGT");
    }
}

//! Output writers: FASTA, FASTQ, UC and blast6 tabular records.
//!
//! Writers are thin line formatters over buffered streams; callers compose
//! the final header text (relabeling, `size=`/`ee=` annotations) with the
//! helpers in [`crate::record`] before handing records over.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::MetamerError;
use crate::hits::Hit;

/// Default FASTA line width; 0 disables wrapping.
pub const FASTA_WIDTH: usize = 80;

fn create(path: &Path) -> Result<BufWriter<File>, MetamerError> {
    let file = File::create(path).map_err(|source| MetamerError::Create {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(BufWriter::new(file))
}

/// FASTA writer with line wrapping.
pub struct FastaWriter<W: Write> {
    w: W,
    width: usize,
}

impl FastaWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, MetamerError> {
        Ok(Self::new(create(path)?))
    }
}

impl<W: Write> FastaWriter<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            width: FASTA_WIDTH,
        }
    }

    pub fn with_width(w: W, width: usize) -> Self {
        Self { w, width }
    }

    /// Writes one record, wrapping the sequence at the configured width.
    pub fn write(&mut self, header: &str, seq: &[u8]) -> Result<(), MetamerError> {
        writeln!(self.w, ">{header}")?;
        if self.width == 0 || seq.len() <= self.width {
            self.w.write_all(seq)?;
            writeln!(self.w)?;
        } else {
            for chunk in seq.chunks(self.width) {
                self.w.write_all(chunk)?;
                writeln!(self.w)?;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MetamerError> {
        self.w.flush()?;
        Ok(())
    }
}

/// FASTQ writer (single-line sequences, `+` separator).
pub struct FastqWriter<W: Write> {
    w: W,
}

impl FastqWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, MetamerError> {
        Ok(Self::new(create(path)?))
    }
}

impl<W: Write> FastqWriter<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    pub fn write(&mut self, header: &str, seq: &[u8], qual: &[u8]) -> Result<(), MetamerError> {
        writeln!(self.w, "@{header}")?;
        self.w.write_all(seq)?;
        writeln!(self.w, "\n+")?;
        self.w.write_all(qual)?;
        writeln!(self.w)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MetamerError> {
        self.w.flush()?;
        Ok(())
    }
}

/// Writer for the tab-separated UC cluster format.
///
/// Record types: `H` (hit), `S` (new seed/centroid), `N` (no hit), `C`
/// (cluster summary).
pub struct UcWriter<W: Write> {
    w: W,
}

impl UcWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, MetamerError> {
        Ok(Self::new(create(path)?))
    }
}

impl<W: Write> UcWriter<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    pub fn hit(
        &mut self,
        cluster: usize,
        qlen: usize,
        id_pct: f64,
        strand: u8,
        cigar: &str,
        query: &str,
        target: &str,
    ) -> Result<(), MetamerError> {
        writeln!(
            self.w,
            "H\t{}\t{}\t{:.1}\t{}\t0\t0\t{}\t{}\t{}",
            cluster,
            qlen,
            id_pct,
            if strand == 0 { '+' } else { '-' },
            cigar,
            query,
            target
        )?;
        Ok(())
    }

    pub fn seed(&mut self, cluster: usize, len: usize, label: &str) -> Result<(), MetamerError> {
        writeln!(self.w, "S\t{cluster}\t{len}\t*\t*\t*\t*\t*\t{label}\t*")?;
        Ok(())
    }

    pub fn no_hit(&mut self, query: &str) -> Result<(), MetamerError> {
        writeln!(self.w, "N\t*\t*\t*\t*\t*\t*\t*\t{query}\t*")?;
        Ok(())
    }

    pub fn cluster(
        &mut self,
        cluster: usize,
        size: u64,
        centroid: &str,
    ) -> Result<(), MetamerError> {
        writeln!(self.w, "C\t{cluster}\t{size}\t*\t*\t*\t*\t*\t{centroid}\t*")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MetamerError> {
        self.w.flush()?;
        Ok(())
    }
}

/// Writer for blast6-shaped tabular hits.
pub struct Blast6Writer<W: Write> {
    w: W,
}

impl Blast6Writer<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, MetamerError> {
        Ok(Self::new(create(path)?))
    }
}

impl<W: Write> Blast6Writer<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    /// One row per hit: query, target, identity, alignment length,
    /// mismatches, gap opens, coordinates, then the conventional
    /// evalue/bitscore placeholders.
    pub fn hit(
        &mut self,
        query: &str,
        target: &str,
        hit: &Hit,
        qlen: usize,
        tlen: usize,
    ) -> Result<(), MetamerError> {
        let (qstart, qend) = if hit.strand == 0 {
            (1, qlen)
        } else {
            (qlen, 1)
        };
        writeln!(
            self.w,
            "{}\t{}\t{:.1}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            query,
            target,
            100.0 * hit.id,
            hit.internal_alignment_length,
            hit.mismatches,
            hit.internal_gaps,
            qstart,
            qend,
            1,
            tlen,
            -1,
            0
        )?;
        Ok(())
    }

    pub fn no_hit(&mut self, query: &str) -> Result<(), MetamerError> {
        writeln!(self.w, "{query}\t*\t0.0\t0\t0\t0\t0\t0\t0\t0\t-1\t0")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MetamerError> {
        self.w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fasta_wraps_long_sequences() {
        let mut buf = Vec::new();
        {
            let mut w = FastaWriter::with_width(&mut buf, 4);
            w.write("a", b"ACGTACGTAC").unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), ">a\nACGT\nACGT\nAC\n");
    }

    #[test]
    fn fasta_unwrapped_when_width_zero() {
        let mut buf = Vec::new();
        {
            let mut w = FastaWriter::with_width(&mut buf, 0);
            w.write("a", b"ACGTACGTAC").unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), ">a\nACGTACGTAC\n");
    }

    #[test]
    fn fastq_record_shape() {
        let mut buf = Vec::new();
        {
            let mut w = FastqWriter::new(&mut buf);
            w.write("r1", b"ACGT", b"IIII").unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "@r1\nACGT\n+\nIIII\n");
    }

    #[test]
    fn uc_record_shapes() {
        let mut buf = Vec::new();
        {
            let mut w = UcWriter::new(&mut buf);
            w.seed(0, 4, "a").unwrap();
            w.hit(0, 4, 100.0, 0, "4M", "b", "a").unwrap();
            w.cluster(0, 2, "a").unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "S\t0\t4\t*\t*\t*\t*\t*\ta\t*");
        assert_eq!(lines[1], "H\t0\t4\t100.0\t+\t0\t0\t4M\tb\ta");
        assert_eq!(lines[2], "C\t0\t2\t*\t*\t*\t*\t*\ta\t*");
    }
}

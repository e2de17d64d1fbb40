//! Command-line interface definition.
//!
//! Each pipeline is a subcommand, so exactly one command runs per
//! invocation. Long option names keep the classic underscore spelling
//! (`--fastq_minovlen`, `--maxaccepts`, ...). Cross-option validation
//! beyond what clap expresses happens in [`crate::commands`] before any
//! input is opened.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::mask::MaskMode;

/// A fast metagenomics sequence engine: similarity search, clustering,
/// dereplication and paired-end merging for FASTA and FASTQ files.
#[derive(Parser, Debug)]
#[command(name = "metamer")]
#[command(version, author, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Which strands of the query are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Strand {
    #[default]
    Plus,
    Both,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
    /// Number of threads, zero for all cores
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Output just warnings and fatal errors to stderr
    #[arg(long)]
    pub quiet: bool,

    /// Write messages to a log file as well
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Do not truncate labels at the first space
    #[arg(long)]
    pub notrunclabels: bool,

    /// Minimum sequence length; zero selects the per-command default
    #[arg(long, default_value_t = 0)]
    pub minseqlength: u32,

    /// Maximum sequence length
    #[arg(long, default_value_t = 50_000)]
    pub maxseqlength: u32,
}

/// FASTQ quality interpretation options.
#[derive(Args, Debug, Clone)]
pub struct FastqOpts {
    /// ASCII offset of quality symbols (33 or 64)
    #[arg(long = "fastq_ascii", default_value_t = 33)]
    pub fastq_ascii: u8,

    /// Minimum accepted quality value
    #[arg(long = "fastq_qmin", default_value_t = 0)]
    pub fastq_qmin: i64,

    /// Maximum accepted quality value
    #[arg(long = "fastq_qmax", default_value_t = 41)]
    pub fastq_qmax: i64,
}

/// Alignment scoring options.
#[derive(Args, Debug, Clone)]
pub struct ScoreOpts {
    /// Score for a match
    #[arg(long = "match", default_value_t = 2)]
    pub match_score: i16,

    /// Score for a mismatch (negative)
    #[arg(long = "mismatch", default_value_t = -4, allow_hyphen_values = true)]
    pub mismatch_score: i16,

    /// Interior gap open penalty (includes the first extension)
    #[arg(long = "gapopen", default_value_t = 20)]
    pub gapopen: i16,

    /// Interior gap extension penalty
    #[arg(long = "gapext", default_value_t = 2)]
    pub gapext: i16,
}

/// Search tuning and filtering options shared by the search and
/// clustering commands.
#[derive(Args, Debug, Clone)]
pub struct SearchOpts {
    /// Minimum identity for an accepted hit (0.0 to 1.0)
    #[arg(long)]
    pub id: Option<f64>,

    /// Identity definition (0 to 4)
    #[arg(long, default_value_t = 2)]
    pub iddef: u8,

    /// Identity threshold for weak hits
    #[arg(long = "weak_id")]
    pub weak_id: Option<f64>,

    /// Word length for k-mer indexing (3 to 15)
    #[arg(long, default_value_t = 8)]
    pub wordlength: usize,

    /// Number of accepted hits before a query finishes, zero for no limit
    #[arg(long, default_value_t = 1)]
    pub maxaccepts: usize,

    /// Number of rejected hits before a query gives up, zero for no limit
    #[arg(long)]
    pub maxrejects: Option<usize>,

    /// Maximum number of hits to report per query
    #[arg(long)]
    pub maxhits: Option<usize>,

    /// Strand(s) to search
    #[arg(long, value_enum, default_value = "plus")]
    pub strand: Strand,

    /// Query masking method
    #[arg(long, value_enum, default_value = "dust")]
    pub qmask: MaskMode,

    /// Database masking method
    #[arg(long, value_enum, default_value = "dust")]
    pub dbmask: MaskMode,

    /// Replace masked regions by N instead of lower case
    #[arg(long)]
    pub hardmask: bool,

    /// Take abundances from size= annotations
    #[arg(long)]
    pub sizein: bool,

    /// Reject hits with the same header as the query
    #[arg(long = "self")]
    pub self_exclude: bool,

    /// Reject hits with a sequence identical to the query
    #[arg(long = "selfid")]
    pub selfid_exclude: bool,

    /// Require this many identical leading bases
    #[arg(long, default_value_t = 0)]
    pub idprefix: usize,

    /// Require this many identical trailing bases
    #[arg(long, default_value_t = 0)]
    pub idsuffix: usize,

    /// Minimum query/target length ratio
    #[arg(long, default_value_t = 0.0)]
    pub minqt: f64,

    /// Maximum query/target length ratio
    #[arg(long, default_value_t = f64::MAX)]
    pub maxqt: f64,

    /// Minimum shorter/longer length ratio
    #[arg(long, default_value_t = 0.0)]
    pub minsl: f64,

    /// Maximum shorter/longer length ratio
    #[arg(long, default_value_t = f64::MAX)]
    pub maxsl: f64,

    /// Minimum query/target abundance ratio
    #[arg(long, default_value_t = 0.0)]
    pub minsizeratio: f64,

    /// Maximum query/target abundance ratio
    #[arg(long, default_value_t = f64::MAX)]
    pub maxsizeratio: f64,

    /// Maximum query abundance
    #[arg(long, default_value_t = u64::MAX)]
    pub maxqsize: u64,

    /// Minimum target abundance
    #[arg(long, default_value_t = 0)]
    pub mintsize: u64,

    /// Reject hits above this identity
    #[arg(long, default_value_t = 1.0)]
    pub maxid: f64,

    /// Maximum substitutions in an accepted alignment
    #[arg(long, default_value_t = usize::MAX)]
    pub maxsubs: usize,

    /// Maximum internal gap openings in an accepted alignment
    #[arg(long, default_value_t = usize::MAX)]
    pub maxgaps: usize,

    /// Maximum differences (substitutions + internal indels)
    #[arg(long, default_value_t = usize::MAX)]
    pub maxdiffs: usize,

    /// Minimum internal alignment length
    #[arg(long, default_value_t = 0)]
    pub mincols: usize,

    #[command(flatten)]
    pub score: ScoreOpts,
}

/// Output sinks shared by the search commands.
#[derive(Args, Debug, Clone, Default)]
pub struct SearchOutOpts {
    /// Write results in UC format
    #[arg(long)]
    pub uc: Option<PathBuf>,

    /// Write results in blast6-like tabular format
    #[arg(long)]
    pub blast6out: Option<PathBuf>,

    /// Write matching query sequences as FASTA
    #[arg(long)]
    pub matched: Option<PathBuf>,

    /// Write non-matching query sequences as FASTA
    #[arg(long)]
    pub notmatched: Option<PathBuf>,

    /// Write matched database sequences as FASTA
    #[arg(long)]
    pub dbmatched: Option<PathBuf>,

    /// Write unmatched database sequences as FASTA
    #[arg(long)]
    pub dbnotmatched: Option<PathBuf>,

    /// Write an OTU table in classic tab-separated format
    #[arg(long)]
    pub otutabout: Option<PathBuf>,

    /// Write an OTU table in mothur shared format
    #[arg(long = "mothur_shared_out")]
    pub mothur_shared_out: Option<PathBuf>,

    /// Write an OTU table in biom 1.0 format
    #[arg(long)]
    pub biomout: Option<PathBuf>,

    /// Also emit records for queries without hits
    #[arg(long = "output_no_hits")]
    pub output_no_hits: bool,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalSearchArgs {
    /// Query FASTA/FASTQ file
    pub query: PathBuf,

    /// Database FASTA file
    #[arg(long)]
    pub db: PathBuf,

    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub fastq: FastqOpts,

    #[command(flatten)]
    pub search: SearchOpts,

    #[command(flatten)]
    pub out: SearchOutOpts,
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Input FASTA file
    pub input: PathBuf,

    /// Accept records out of length order (cluster_smallmem only)
    #[arg(long)]
    pub usersort: bool,

    /// Write cluster centroids as FASTA
    #[arg(long)]
    pub centroids: Option<PathBuf>,

    /// Write one FASTA file per cluster, using this prefix
    #[arg(long)]
    pub clusters: Option<PathBuf>,

    /// Write clustering results in UC format
    #[arg(long)]
    pub uc: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub fastq: FastqOpts,

    #[command(flatten)]
    pub search: SearchOpts,
}

#[derive(Args, Debug, Clone)]
pub struct DerepArgs {
    /// Input FASTA/FASTQ file
    pub input: PathBuf,

    /// Output FASTA file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Output FASTA file (small-memory variant)
    #[arg(long)]
    pub fastaout: Option<PathBuf>,

    /// Write dereplication results in UC format
    #[arg(long)]
    pub uc: Option<PathBuf>,

    /// Strand(s) to compare
    #[arg(long, value_enum, default_value = "plus")]
    pub strand: Strand,

    /// Take abundances from size= annotations
    #[arg(long)]
    pub sizein: bool,

    /// Write size= annotations on output
    #[arg(long)]
    pub sizeout: bool,

    /// Minimum cluster abundance for output
    #[arg(long, default_value_t = 1)]
    pub minuniquesize: i64,

    /// Maximum cluster abundance for output
    #[arg(long, default_value_t = i64::MAX)]
    pub maxuniquesize: i64,

    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub fastq: FastqOpts,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// Forward reads FASTQ file
    pub forward: PathBuf,

    /// Reverse reads FASTQ file
    #[arg(long)]
    pub reverse: PathBuf,

    /// Write merged reads as FASTQ
    #[arg(long)]
    pub fastqout: Option<PathBuf>,

    /// Write merged reads as FASTA
    #[arg(long)]
    pub fastaout: Option<PathBuf>,

    /// Write unmerged forward reads as FASTQ
    #[arg(long = "fastqout_notmerged_fwd")]
    pub fastqout_notmerged_fwd: Option<PathBuf>,

    /// Write unmerged reverse reads as FASTQ
    #[arg(long = "fastqout_notmerged_rev")]
    pub fastqout_notmerged_rev: Option<PathBuf>,

    /// Write unmerged forward reads as FASTA
    #[arg(long = "fastaout_notmerged_fwd")]
    pub fastaout_notmerged_fwd: Option<PathBuf>,

    /// Write unmerged reverse reads as FASTA
    #[arg(long = "fastaout_notmerged_rev")]
    pub fastaout_notmerged_rev: Option<PathBuf>,

    /// Write expected and observed error counts, tab-separated
    #[arg(long)]
    pub eetabbedout: Option<PathBuf>,

    /// Minimum read length after truncation
    #[arg(long = "fastq_minlen", default_value_t = 64)]
    pub fastq_minlen: i64,

    /// Maximum read length
    #[arg(long = "fastq_maxlen", default_value_t = i64::MAX)]
    pub fastq_maxlen: i64,

    /// Maximum number of N symbols per read
    #[arg(long = "fastq_maxns", default_value_t = i64::MAX)]
    pub fastq_maxns: i64,

    /// Truncate reads at the first quality at or below this value
    #[arg(long = "fastq_truncqual")]
    pub fastq_truncqual: Option<i64>,

    /// Minimum overlap between reads
    #[arg(long = "fastq_minovlen", default_value_t = 10)]
    pub fastq_minovlen: i64,

    /// Maximum mismatches in the overlap
    #[arg(long = "fastq_maxdiffs", default_value_t = 10)]
    pub fastq_maxdiffs: i64,

    /// Maximum percentage of mismatches in the overlap
    #[arg(long = "fastq_maxdiffpct", default_value_t = 100.0)]
    pub fastq_maxdiffpct: f64,

    /// Minimum merged sequence length
    #[arg(long = "fastq_minmergelen", default_value_t = 1)]
    pub fastq_minmergelen: i64,

    /// Maximum merged sequence length
    #[arg(long = "fastq_maxmergelen", default_value_t = 1_000_000)]
    pub fastq_maxmergelen: i64,

    /// Maximum expected error of the merged sequence
    #[arg(long = "fastq_maxee", default_value_t = f64::MAX)]
    pub fastq_maxee: f64,

    /// Allow merging of staggered read pairs
    #[arg(long = "fastq_allowmergestagger")]
    pub fastq_allowmergestagger: bool,

    /// Append ee= annotations to merged headers
    #[arg(long = "fastq_eeout")]
    pub fastq_eeout: bool,

    /// Minimum output quality value
    #[arg(long = "fastq_qminout", default_value_t = 0)]
    pub fastq_qminout: i64,

    /// Maximum output quality value
    #[arg(long = "fastq_qmaxout", default_value_t = 41)]
    pub fastq_qmaxout: i64,

    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub fastq: FastqOpts,
}

#[derive(Args, Debug, Clone)]
pub struct MaskArgs {
    /// Input FASTA/FASTQ file
    pub input: PathBuf,

    /// Write masked sequences as FASTA
    #[arg(long)]
    pub fastaout: Option<PathBuf>,

    /// Write masked sequences as FASTQ
    #[arg(long)]
    pub fastqout: Option<PathBuf>,

    /// Masking method
    #[arg(long, value_enum, default_value = "dust")]
    pub qmask: MaskMode,

    /// Replace masked regions by N instead of lower case
    #[arg(long)]
    pub hardmask: bool,

    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub fastq: FastqOpts,
}

#[derive(Args, Debug, Clone)]
pub struct SortArgs {
    /// Input FASTA file
    pub input: PathBuf,

    /// Output FASTA file
    #[arg(long)]
    pub output: PathBuf,

    /// Keep only the first N records
    #[arg(long, default_value_t = usize::MAX)]
    pub topn: usize,

    /// Write size= annotations on output
    #[arg(long)]
    pub sizeout: bool,

    /// Minimum abundance (sortbysize)
    #[arg(long, default_value_t = 0)]
    pub minsize: u64,

    /// Maximum abundance (sortbysize)
    #[arg(long, default_value_t = u64::MAX)]
    pub maxsize: u64,

    /// Seed for shuffling, zero for a random one
    #[arg(long, default_value_t = 0)]
    pub randseed: u64,

    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub fastq: FastqOpts,
}

/// One pipeline per invocation.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Global similarity search of queries against a database
    #[command(name = "usearch_global")]
    UsearchGlobal(GlobalSearchArgs),

    /// Exact full-length search of queries against a database
    #[command(name = "search_exact")]
    SearchExact(GlobalSearchArgs),

    /// Cluster after sorting by length
    #[command(name = "cluster_fast")]
    ClusterFast(ClusterArgs),

    /// Cluster after sorting by abundance
    #[command(name = "cluster_size")]
    ClusterSize(ClusterArgs),

    /// Cluster in the order given
    #[command(name = "cluster_smallmem")]
    ClusterSmallmem(ClusterArgs),

    /// Dereplicate full-length sequences in memory
    #[command(name = "derep_fulllength")]
    DerepFulllength(DerepArgs),

    /// Dereplicate full-length sequences with minimal memory
    #[command(name = "derep_smallmem")]
    DerepSmallmem(DerepArgs),

    /// Merge paired-end reads
    #[command(name = "fastq_mergepairs")]
    FastqMergepairs(MergeArgs),

    /// Mask low-complexity regions
    #[command(name = "fastx_mask")]
    FastxMask(MaskArgs),

    /// Sort sequences by abundance
    #[command(name = "sortbysize")]
    SortBySize(SortArgs),

    /// Sort sequences by length
    #[command(name = "sortbylength")]
    SortByLength(SortArgs),

    /// Shuffle sequences
    #[command(name = "shuffle")]
    Shuffle(SortArgs),
}

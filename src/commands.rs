//! Command dispatch: option validation, parameter conversion and pipeline
//! invocation.
//!
//! All cross-option validation happens here, before any input file is
//! opened, so conflicting options fail fast with an `OptionConflict`
//! error.

use tracing::info;

use crate::align16::ScoringParams;
use crate::cli::{
    Cli, ClusterArgs, Command, CommonOpts, DerepArgs, FastqOpts, GlobalSearchArgs, MaskArgs,
    MergeArgs, SearchOpts, SortArgs, Strand,
};
use crate::cluster::{cluster, ClusterIo, ClusterMode};
use crate::derep::{derep_fulllength, derep_smallmem, DerepIo, DerepParams};
use crate::error::MetamerError;
use crate::exact::search_exact;
use crate::hits::IdDef;
use crate::kmerindex::{MAX_WORD_LENGTH, MIN_WORD_LENGTH};
use crate::mask::{fastx_mask, mask_store, MaskIo, MaskMode};
use crate::merge::{fastq_mergepairs, MergeIo, MergeParams};
use crate::reader::ReadPolicy;
use crate::search::{usearch_global, SearchIo, SearchParams};
use crate::sortcmds::{shuffle, sortbylength, sortbysize, SortParams};
use crate::store::SeqStore;

/// Runs the selected command.
pub fn run(cli: Cli) -> Result<(), MetamerError> {
    match cli.command {
        Command::UsearchGlobal(args) => run_usearch_global(args),
        Command::SearchExact(args) => run_search_exact(args),
        Command::ClusterFast(args) => run_cluster(args, SortOrder::Length),
        Command::ClusterSize(args) => run_cluster(args, SortOrder::Abundance),
        Command::ClusterSmallmem(args) => run_cluster(args, SortOrder::User),
        Command::DerepFulllength(args) => run_derep_fulllength(args),
        Command::DerepSmallmem(args) => run_derep_smallmem(args),
        Command::FastqMergepairs(args) => run_mergepairs(args),
        Command::FastxMask(args) => run_mask(args),
        Command::SortBySize(args) => run_sort(args, SortKind::Size),
        Command::SortByLength(args) => run_sort(args, SortKind::Length),
        Command::Shuffle(args) => run_sort(args, SortKind::Shuffle),
    }
}

enum SortOrder {
    Length,
    Abundance,
    User,
}

enum SortKind {
    Size,
    Length,
    Shuffle,
}

fn resolve_threads(common: &CommonOpts) -> Result<usize, MetamerError> {
    if common.threads > 1024 {
        return Err(MetamerError::OptionConflict(
            "the argument to --threads must be in the range 0 (default) to 1024".into(),
        ));
    }
    if common.threads == 0 {
        Ok(std::thread::available_parallelism().map_or(1, |n| n.get()))
    } else {
        Ok(common.threads)
    }
}

/// Builds a read policy. `min_default` is the per-command default applied
/// when `--minseqlength` was left at zero.
fn read_policy(
    common: &CommonOpts,
    fastq: &FastqOpts,
    min_default: u32,
    upcase: bool,
) -> Result<ReadPolicy, MetamerError> {
    if fastq.fastq_ascii != 33 && fastq.fastq_ascii != 64 {
        return Err(MetamerError::OptionConflict(
            "the argument to --fastq_ascii must be 33 or 64".into(),
        ));
    }
    Ok(ReadPolicy {
        truncate_labels: !common.notrunclabels,
        upcase,
        min_seq_length: if common.minseqlength == 0 {
            min_default
        } else {
            common.minseqlength
        },
        max_seq_length: common.maxseqlength,
        fastq_ascii: fastq.fastq_ascii,
        fastq_qmin: fastq.fastq_qmin,
        fastq_qmax: fastq.fastq_qmax,
    })
}

fn scoring_params(opts: &SearchOpts) -> Result<ScoringParams, MetamerError> {
    let score = &opts.score;
    if score.match_score <= 0 {
        return Err(MetamerError::OptionConflict(
            "the argument to --match must be positive".into(),
        ));
    }
    if score.mismatch_score >= 0 {
        return Err(MetamerError::OptionConflict(
            "the argument to --mismatch must be negative".into(),
        ));
    }
    if score.gapext <= 0 || score.gapopen < score.gapext {
        return Err(MetamerError::OptionConflict(
            "gap penalties must be positive, with --gapopen at least --gapext".into(),
        ));
    }

    // the specified open penalty includes the first extension
    Ok(ScoringParams {
        match_score: score.match_score,
        mismatch_score: score.mismatch_score,
        gap_open_query_interior: score.gapopen - score.gapext,
        gap_open_target_interior: score.gapopen - score.gapext,
        gap_extension_query_interior: score.gapext,
        gap_extension_target_interior: score.gapext,
        ..ScoringParams::default()
    })
}

/// Converts the CLI search options, enforcing the per-command rules.
fn search_params(
    opts: &SearchOpts,
    common: &CommonOpts,
    id_required: bool,
    cluster_fast: bool,
    output_no_hits: bool,
) -> Result<SearchParams, MetamerError> {
    let id = match opts.id {
        Some(id) if (0.0..=1.0).contains(&id) => id,
        Some(_) => {
            return Err(MetamerError::OptionConflict(
                "the argument to --id must be in the range 0.0 to 1.0".into(),
            ))
        }
        None if id_required => {
            return Err(MetamerError::OptionConflict(
                "the --id option is required for this command".into(),
            ))
        }
        None => 0.0,
    };
    if !(MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&opts.wordlength) {
        return Err(MetamerError::InvalidWordLength {
            w: opts.wordlength,
            min: MIN_WORD_LENGTH,
            max: MAX_WORD_LENGTH,
        });
    }
    let iddef = IdDef::from_index(opts.iddef).ok_or_else(|| {
        MetamerError::OptionConflict("the argument to --iddef must be in the range 0 to 4".into())
    })?;

    let weak_id = opts.weak_id.unwrap_or(10.0).min(id);
    let maxrejects = opts
        .maxrejects
        .unwrap_or(if cluster_fast { 8 } else { 32 });

    Ok(SearchParams {
        id,
        weak_id,
        iddef,
        wordlength: opts.wordlength,
        maxaccepts: opts.maxaccepts,
        maxrejects,
        maxhits: opts.maxhits.unwrap_or(usize::MAX),
        strand_both: opts.strand == Strand::Both,
        qmask: opts.qmask,
        hardmask: opts.hardmask,
        scoring: scoring_params(opts)?,
        sizein: opts.sizein,
        output_no_hits,
        self_exclude: opts.self_exclude,
        selfid_exclude: opts.selfid_exclude,
        idprefix: opts.idprefix,
        idsuffix: opts.idsuffix,
        minqt: opts.minqt,
        maxqt: opts.maxqt,
        minsl: opts.minsl,
        maxsl: opts.maxsl,
        minsizeratio: opts.minsizeratio,
        maxsizeratio: opts.maxsizeratio,
        maxqsize: opts.maxqsize,
        mintsize: opts.mintsize,
        maxid: opts.maxid,
        maxsubs: opts.maxsubs,
        maxgaps: opts.maxgaps,
        maxdiffs: opts.maxdiffs,
        mincols: opts.mincols,
        threads: resolve_threads(common)?,
    })
}

fn search_io(args: &GlobalSearchArgs) -> SearchIo {
    SearchIo {
        uc: args.out.uc.clone(),
        blast6out: args.out.blast6out.clone(),
        matched: args.out.matched.clone(),
        notmatched: args.out.notmatched.clone(),
        dbmatched: args.out.dbmatched.clone(),
        dbnotmatched: args.out.dbnotmatched.clone(),
        otutabout: args.out.otutabout.clone(),
        mothur_shared_out: args.out.mothur_shared_out.clone(),
        biomout: args.out.biomout.clone(),
    }
}

fn run_usearch_global(args: GlobalSearchArgs) -> Result<(), MetamerError> {
    let params = search_params(
        &args.search,
        &args.common,
        true,
        false,
        args.out.output_no_hits,
    )?;

    let db_policy = read_policy(
        &args.common,
        &args.fastq,
        32,
        args.search.dbmask != MaskMode::Soft,
    )?;
    let query_policy = read_policy(
        &args.common,
        &args.fastq,
        32,
        args.search.qmask != MaskMode::Soft,
    )?;

    info!(db = %args.db.display(), "reading database");
    let mut db = SeqStore::load(&args.db, &db_policy)?;
    db.stats().log_warnings(&db_policy);
    if !args.common.quiet {
        db.log_summary();
    }
    mask_store(&mut db, args.search.dbmask, args.search.hardmask);

    let io = search_io(&args);
    let summary = usearch_global(&args.query, &db, &params, &query_policy, &io)?;
    if !args.common.quiet {
        summary.log_summary();
    }
    log_line(
        &args.common,
        &format!(
            "usearch_global: {} of {} queries matched",
            summary.qmatches, summary.queries
        ),
    )?;
    Ok(())
}

fn run_search_exact(args: GlobalSearchArgs) -> Result<(), MetamerError> {
    let params = search_params(
        &args.search,
        &args.common,
        false,
        false,
        args.out.output_no_hits,
    )?;

    let policy = read_policy(&args.common, &args.fastq, 1, true)?;

    info!(db = %args.db.display(), "reading database");
    let db = SeqStore::load(&args.db, &policy)?;
    db.stats().log_warnings(&policy);
    if !args.common.quiet {
        db.log_summary();
    }

    let io = search_io(&args);
    let summary = search_exact(&args.query, &db, &params, &policy, &io)?;
    if !args.common.quiet {
        summary.log_summary();
    }
    log_line(
        &args.common,
        &format!(
            "search_exact: {} of {} queries matched",
            summary.qmatches, summary.queries
        ),
    )?;
    Ok(())
}

fn run_cluster(args: ClusterArgs, order: SortOrder) -> Result<(), MetamerError> {
    let params = search_params(
        &args.search,
        &args.common,
        true,
        matches!(order, SortOrder::Length),
        false,
    )?;

    let policy = read_policy(
        &args.common,
        &args.fastq,
        32,
        args.search.dbmask != MaskMode::Soft,
    )?;

    info!(input = %args.input.display(), "reading sequences");
    let mut store = SeqStore::load(&args.input, &policy)?;
    store.stats().log_warnings(&policy);
    if !args.common.quiet {
        store.log_summary();
    }
    mask_store(&mut store, args.search.dbmask, args.search.hardmask);

    let mode = match order {
        SortOrder::Length => ClusterMode::Fast,
        SortOrder::Abundance => ClusterMode::Size,
        SortOrder::User => ClusterMode::SmallMem {
            usersort: args.usersort,
        },
    };
    let io = ClusterIo {
        uc: args.uc.clone(),
        centroids: args.centroids.clone(),
        clusters: args.clusters.clone(),
    };

    let summary = cluster(&mut store, mode, &params, &io)?;
    if !args.common.quiet {
        summary.log_summary();
    }
    log_line(
        &args.common,
        &format!("clustering: {} clusters", summary.clusters),
    )?;
    Ok(())
}

fn run_derep_fulllength(args: DerepArgs) -> Result<(), MetamerError> {
    if args.output.is_none() && args.uc.is_none() {
        return Err(MetamerError::OptionConflict(
            "output file for dereplication must be specified with --output or --uc".into(),
        ));
    }

    let policy = read_policy(&args.common, &args.fastq, 32, true)?;
    let params = DerepParams {
        strand_both: args.strand == Strand::Both,
        sizein: args.sizein,
        sizeout: args.sizeout,
        minuniquesize: args.minuniquesize,
        maxuniquesize: args.maxuniquesize,
    };

    info!(input = %args.input.display(), "reading sequences");
    let store = SeqStore::load(&args.input, &policy)?;
    store.stats().log_warnings(&policy);
    if !args.common.quiet {
        store.log_summary();
    }

    let io = DerepIo {
        output: args.output.clone(),
        uc: args.uc.clone(),
    };
    let summary = derep_fulllength(&store, &params, &io)?;
    if !args.common.quiet {
        summary.log_summary();
    }
    log_line(
        &args.common,
        &format!("derep_fulllength: {} unique sequences", summary.clusters),
    )?;
    Ok(())
}

fn run_derep_smallmem(args: DerepArgs) -> Result<(), MetamerError> {
    let Some(fastaout) = args.fastaout.clone() else {
        return Err(MetamerError::OptionConflict(
            "output file for dereplication must be specified with --fastaout".into(),
        ));
    };

    let policy = read_policy(&args.common, &args.fastq, 1, true)?;
    let params = DerepParams {
        strand_both: args.strand == Strand::Both,
        sizein: args.sizein,
        sizeout: args.sizeout,
        minuniquesize: args.minuniquesize,
        maxuniquesize: args.maxuniquesize,
    };

    info!(input = %args.input.display(), "dereplicating");
    let summary = derep_smallmem(&args.input, &policy, &params, &fastaout)?;
    if !args.common.quiet {
        summary.log_summary();
    }
    log_line(
        &args.common,
        &format!("derep_smallmem: {} unique sequences", summary.clusters),
    )?;
    Ok(())
}

fn run_mergepairs(args: MergeArgs) -> Result<(), MetamerError> {
    if args.fastq_minovlen < 5 {
        return Err(MetamerError::OptionConflict(
            "the argument to --fastq_minovlen must be at least 5".into(),
        ));
    }
    if args.fastqout.is_none()
        && args.fastaout.is_none()
        && args.fastqout_notmerged_fwd.is_none()
        && args.fastqout_notmerged_rev.is_none()
        && args.fastaout_notmerged_fwd.is_none()
        && args.fastaout_notmerged_rev.is_none()
        && args.eetabbedout.is_none()
    {
        return Err(MetamerError::OptionConflict(
            "no output files specified for fastq_mergepairs".into(),
        ));
    }
    if args.fastq.fastq_ascii != 33 && args.fastq.fastq_ascii != 64 {
        return Err(MetamerError::OptionConflict(
            "the argument to --fastq_ascii must be 33 or 64".into(),
        ));
    }

    let params = MergeParams {
        fastq_ascii: args.fastq.fastq_ascii,
        fastq_qmin: args.fastq.fastq_qmin,
        fastq_qmax: args.fastq.fastq_qmax,
        fastq_qminout: args.fastq_qminout,
        fastq_qmaxout: args.fastq_qmaxout,
        minlen: args.fastq_minlen,
        maxlen: args.fastq_maxlen,
        maxns: args.fastq_maxns,
        truncqual: args.fastq_truncqual.unwrap_or(i64::MIN),
        minovlen: args.fastq_minovlen,
        maxdiffs: args.fastq_maxdiffs,
        maxdiffpct: args.fastq_maxdiffpct,
        minmergelen: args.fastq_minmergelen,
        maxmergelen: args.fastq_maxmergelen,
        maxee: args.fastq_maxee,
        allowmergestagger: args.fastq_allowmergestagger,
        eeout: args.fastq_eeout,
        threads: resolve_threads(&args.common)?,
    };
    let io = MergeIo {
        fastqout: args.fastqout.clone(),
        fastaout: args.fastaout.clone(),
        fastqout_notmerged_fwd: args.fastqout_notmerged_fwd.clone(),
        fastqout_notmerged_rev: args.fastqout_notmerged_rev.clone(),
        fastaout_notmerged_fwd: args.fastaout_notmerged_fwd.clone(),
        fastaout_notmerged_rev: args.fastaout_notmerged_rev.clone(),
        eetabbedout: args.eetabbedout.clone(),
    };

    info!(
        forward = %args.forward.display(),
        reverse = %args.reverse.display(),
        "merging read pairs"
    );
    let stats = fastq_mergepairs(&args.forward, &args.reverse, &params, &io)?;
    if !args.common.quiet {
        stats.log_summary();
    }
    log_line(
        &args.common,
        &format!(
            "fastq_mergepairs: {} of {} pairs merged",
            stats.merged, stats.total
        ),
    )?;
    Ok(())
}

fn run_mask(args: MaskArgs) -> Result<(), MetamerError> {
    if args.fastaout.is_none() && args.fastqout.is_none() {
        return Err(MetamerError::OptionConflict(
            "specify output files for masking with --fastaout and/or --fastqout".into(),
        ));
    }

    // keep the original case so existing soft masking survives
    let policy = read_policy(&args.common, &args.fastq, 1, false)?;

    info!(input = %args.input.display(), "reading sequences");
    let mut store = SeqStore::load(&args.input, &policy)?;
    store.stats().log_warnings(&policy);
    if !args.common.quiet {
        store.log_summary();
    }

    let io = MaskIo {
        fastaout: args.fastaout.clone(),
        fastqout: args.fastqout.clone(),
    };
    fastx_mask(&mut store, args.qmask, args.hardmask, &io)?;
    log_line(&args.common, "fastx_mask: done")?;
    Ok(())
}

fn run_sort(args: SortArgs, kind: SortKind) -> Result<(), MetamerError> {
    let policy = read_policy(&args.common, &args.fastq, 1, true)?;

    info!(input = %args.input.display(), "reading sequences");
    let mut store = SeqStore::load(&args.input, &policy)?;
    store.stats().log_warnings(&policy);
    if !args.common.quiet {
        store.log_summary();
    }

    let params = SortParams {
        topn: args.topn,
        sizeout: args.sizeout,
        minsize: args.minsize,
        maxsize: args.maxsize,
    };
    match kind {
        SortKind::Size => sortbysize(&mut store, &params, &args.output)?,
        SortKind::Length => sortbylength(&mut store, &params, &args.output)?,
        SortKind::Shuffle => shuffle(&mut store, &params, args.randseed, &args.output)?,
    }
    log_line(&args.common, "sorting: done")?;
    Ok(())
}

/// Appends a summary line to the log file when one is configured.
fn log_line(common: &CommonOpts, message: &str) -> Result<(), MetamerError> {
    if let Some(path) = &common.log {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| MetamerError::Create {
                source,
                path: path.clone(),
            })?;
        writeln!(file, "{message}")?;
    }
    Ok(())
}

//! Exact search against a fingerprint-indexed database.
//!
//! A specialization of the search pipeline that skips k-mer scoring and
//! alignment entirely: the normalized query is probed against the database
//! fingerprint index and every matching record yields a synthetic perfect
//! hit (full-length `M` CIGAR, all identities 1). The usual output sinks
//! and OTU table recording apply.

use std::sync::Mutex;

use crate::alphabet::reverse_complement;
use crate::error::MetamerError;
use crate::fingerprint::{fingerprint, ExactIndex};
use crate::hits::Hit;
use crate::reader::{FastxStream, ReadPolicy};
use crate::search::{
    acceptable_unaligned, classify, PreparedQuery, SearchIo, SearchOutput, SearchParams,
    SearchSummary,
};
use crate::store::SeqStore;

/// Builds the fingerprint index over the database records.
pub fn index_database(db: &SeqStore) -> ExactIndex {
    let mut index = ExactIndex::with_capacity(db.len());
    for (seqno, rec) in db.iter().enumerate() {
        index.add(fingerprint(&rec.seq), seqno as u32);
    }
    index
}

/// Collects the exact hits for one query record.
pub fn search_exact_onequery(
    db: &SeqStore,
    index: &ExactIndex,
    params: &SearchParams,
    query: &PreparedQuery,
) -> Vec<Hit> {
    let mut hits = Vec::new();

    for seqno in index.find(fingerprint(&query.seq)) {
        add_exact_hit(db, params, query, seqno as usize, 0, &mut hits);
    }

    if params.strand_both {
        let rc = reverse_complement(&query.seq);
        for seqno in index.find(fingerprint(&rc)) {
            add_exact_hit(db, params, query, seqno as usize, 1, &mut hits);
        }
    }

    hits.retain(|h| h.accepted);
    hits.sort_by(|a, b| a.target.cmp(&b.target));
    hits.truncate(params.maxhits);
    hits
}

fn add_exact_hit(
    db: &SeqStore,
    params: &SearchParams,
    query: &PreparedQuery,
    seqno: usize,
    strand: u8,
    hits: &mut Vec<Hit>,
) {
    if !acceptable_unaligned(params, db, query, seqno) {
        return;
    }
    let mut hit = Hit::perfect(
        seqno,
        strand,
        query.seq.len(),
        i64::from(params.scoring.match_score),
    );
    classify(params, &mut hit);
    hits.push(hit);
}

/// Searches every query for records with identical sequence content.
pub fn search_exact(
    query_path: &std::path::Path,
    db: &SeqStore,
    params: &SearchParams,
    policy: &ReadPolicy,
    io: &SearchIo,
) -> Result<SearchSummary, MetamerError> {
    let index = index_database(db);

    let input = Mutex::new(FastxStream::open(query_path, policy.clone())?);
    let output = Mutex::new(SearchOutput::open(io, db.len())?);

    let worker_count = params.threads.max(1);
    std::thread::scope(|scope| -> Result<(), MetamerError> {
        let mut handles = Vec::new();
        for _ in 0..worker_count {
            let input = &input;
            let output = &output;
            let index = &index;
            handles.push(scope.spawn(move || -> Result<(), MetamerError> {
                loop {
                    let rec = {
                        let mut stream = input
                            .lock()
                            .map_err(|_| MetamerError::Internal("input mutex poisoned".into()))?;
                        stream.next_record()?
                    };
                    let Some(rec) = rec else { break };

                    // no masking for exact matching: content decides
                    let query = PreparedQuery {
                        header: rec.header.clone(),
                        seq: rec.seq.clone(),
                        rc: None,
                        size: rec.abundance,
                    };
                    let hits = search_exact_onequery(db, index, params, &query);

                    let mut out = output
                        .lock()
                        .map_err(|_| MetamerError::Internal("output mutex poisoned".into()))?;
                    out.emit(db, params, &rec, &hits)?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle
                .join()
                .map_err(|_| MetamerError::Internal("exact search worker panicked".into()))??;
        }
        Ok(())
    })?;

    let output = output
        .into_inner()
        .map_err(|_| MetamerError::Internal("output mutex poisoned".into()))?;
    output.finish(io, db)
}

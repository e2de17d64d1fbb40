#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::Path;
use std::process::Command;

use tempfile::{tempdir, NamedTempFile};

fn metamer_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_metamer"))
}

fn write_temp(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

fn derep_smallmem(input: &Path, out: &Path, extra: &[&str]) {
    let output = metamer_cmd()
        .args([
            "derep_smallmem",
            input.to_str().unwrap(),
            "--fastaout",
            out.to_str().unwrap(),
            "--quiet",
        ])
        .args(extra)
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Parses FASTA text into (header, sequence) pairs.
fn parse_fasta(text: &str) -> Vec<(String, String)> {
    let mut records = Vec::new();
    let mut header = String::new();
    let mut seq = String::new();
    for line in text.lines() {
        if let Some(h) = line.strip_prefix('>') {
            if !header.is_empty() {
                records.push((header.clone(), seq.clone()));
            }
            header = h.to_string();
            seq.clear();
        } else {
            seq.push_str(line);
        }
    }
    if !header.is_empty() {
        records.push((header, seq));
    }
    records
}

fn size_of(header: &str) -> u64 {
    header
        .split(';')
        .find_map(|part| part.strip_prefix("size="))
        .map_or(1, |v| v.parse().unwrap())
}

#[test]
fn exact_dereplication() {
    let input = write_temp(">a\nACGT\n>b\nACGT\n>c\nACGA\n");
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.fa");
    derep_smallmem(input.path(), &out, &["--sizeout"]);
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text, ">a;size=2;\nACGT\n>c;size=1;\nACGA\n");
}

#[test]
fn strand_both_palindrome_single_cluster() {
    // ACGT is its own reverse complement; all four records are one cluster
    let input = write_temp(">a\nACGT\n>b\nACGT\n>c\nACGT\n>d\nACGT\n");
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.fa");
    derep_smallmem(input.path(), &out, &["--sizeout", "--strand", "both"]);
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text, ">a;size=4;\nACGT\n");
}

#[test]
fn strand_both_joins_reverse_complements() {
    // AACCGGTA and TACCGGTT are mutual reverse complements
    let input = write_temp(">a\nAACCGGTA\n>b\nTACCGGTT\n>c\nAACCGGTA\n");
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.fa");
    derep_smallmem(input.path(), &out, &["--sizeout", "--strand", "both"]);
    let records = parse_fasta(&std::fs::read_to_string(&out).unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(size_of(&records[0].0), 3);
    assert_eq!(records[0].1, "AACCGGTA");
}

#[test]
fn dereplication_is_idempotent() {
    let input = write_temp(
        ">a;size=2;\nACGTACGT\n>b\nACGTACGT\n>c;size=5;\nTTGGTTGG\n>d\nCCAACCAA\n",
    );
    let dir = tempdir().unwrap();
    let once = dir.path().join("once.fa");
    let twice = dir.path().join("twice.fa");

    derep_smallmem(input.path(), &once, &["--sizein", "--sizeout"]);
    derep_smallmem(&once, &twice, &["--sizein", "--sizeout"]);

    let mut first = parse_fasta(&std::fs::read_to_string(&once).unwrap());
    let mut second = parse_fasta(&std::fs::read_to_string(&twice).unwrap());
    first.sort();
    second.sort();
    assert_eq!(first, second);
}

#[test]
fn abundance_is_conserved() {
    let input = write_temp(
        ">a;size=3;\nACGTACGT\n>b;size=4;\nACGTACGT\n>c;size=2;\nTTGGTTGG\n>d\nCCAACCAA\n",
    );
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.fa");
    derep_smallmem(input.path(), &out, &["--sizein", "--sizeout"]);
    let records = parse_fasta(&std::fs::read_to_string(&out).unwrap());
    let total: u64 = records.iter().map(|(h, _)| size_of(h)).sum();
    assert_eq!(total, 3 + 4 + 2 + 1);
}

#[test]
fn minuniquesize_drops_small_clusters() {
    let input = write_temp(">a\nACGTACGT\n>b\nACGTACGT\n>c\nTTGGTTGG\n");
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.fa");
    derep_smallmem(input.path(), &out, &["--sizeout", "--minuniquesize", "2"]);
    let records = parse_fasta(&std::fs::read_to_string(&out).unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1, "ACGTACGT");
}

#[test]
fn derep_fulllength_sorts_by_abundance() {
    let input = write_temp(">a\nACGTACGTACGTACGTACGTACGTACGTACGTACGT\n>b\nGGTTGGTTGGTTGGTTGGTTGGTTGGTTGGTTGGTT\n>c\nGGTTGGTTGGTTGGTTGGTTGGTTGGTTGGTTGGTT\n");
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.fa");
    let uc = dir.path().join("out.uc");
    let output = metamer_cmd()
        .args([
            "derep_fulllength",
            input.path().to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--uc",
            uc.to_str().unwrap(),
            "--sizeout",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let records = parse_fasta(&std::fs::read_to_string(&out).unwrap());
    assert_eq!(records.len(), 2);
    assert_eq!(size_of(&records[0].0), 2);
    assert!(records[0].0.starts_with("b;"));

    let uc_text = std::fs::read_to_string(&uc).unwrap();
    assert!(uc_text.lines().any(|l| l.starts_with("S\t")));
    assert!(uc_text.lines().any(|l| l.starts_with("H\t")));
    assert!(uc_text.lines().any(|l| l.starts_with("C\t")));
}

#[test]
fn derep_smallmem_requires_fastaout() {
    let input = write_temp(">a\nACGT\n");
    let output = metamer_cmd()
        .args(["derep_smallmem", input.path().to_str().unwrap()])
        .output()
        .expect("failed to execute");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--fastaout"));
}

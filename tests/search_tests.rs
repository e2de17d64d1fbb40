#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
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

const TARGET: &str = "ACGTTGCAACGGTCAACGTTGCAACGGTCAACCATGGCCA";
const DIVERGED: &str = "TGCCTAATGGCGATTACAGGCCTTAAGGCATTTGCCTAAT";

#[test]
fn search_exact_reports_full_identity() {
    // database record and query share their content exactly
    let db = write_temp(">t ACGTACGT\nACGTACGT\n");
    let query = write_temp(">q\nACGTACGT\n");
    let dir = tempdir().unwrap();
    let uc = dir.path().join("out.uc");
    let b6 = dir.path().join("out.b6");

    let output = metamer_cmd()
        .args([
            "search_exact",
            query.path().to_str().unwrap(),
            "--db",
            db.path().to_str().unwrap(),
            "--uc",
            uc.to_str().unwrap(),
            "--blast6out",
            b6.to_str().unwrap(),
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let uc_text = std::fs::read_to_string(&uc).unwrap();
    let hit_line = uc_text
        .lines()
        .find(|l| l.starts_with("H\t"))
        .expect("expected an H record");
    let fields: Vec<&str> = hit_line.split('\t').collect();
    assert_eq!(fields[3], "100.0");
    assert_eq!(fields[7], "8M");
    assert_eq!(fields[8], "q");
    assert_eq!(fields[9], "t");

    let b6_text = std::fs::read_to_string(&b6).unwrap();
    let fields: Vec<&str> = b6_text.lines().next().unwrap().split('\t').collect();
    assert_eq!(fields[0], "q");
    assert_eq!(fields[1], "t");
    assert_eq!(fields[2], "100.0");
    assert_eq!(fields[3], "8");
}

#[test]
fn search_exact_ignores_near_matches() {
    let db = write_temp(">t\nACGTACGT\n");
    let query = write_temp(">q\nACGTACGA\n");
    let dir = tempdir().unwrap();
    let uc = dir.path().join("out.uc");

    let output = metamer_cmd()
        .args([
            "search_exact",
            query.path().to_str().unwrap(),
            "--db",
            db.path().to_str().unwrap(),
            "--uc",
            uc.to_str().unwrap(),
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let uc_text = std::fs::read_to_string(&uc).unwrap();
    assert!(uc_text.lines().all(|l| l.starts_with("N\t")));
}

#[test]
fn usearch_global_finds_similar_sequence() {
    let db = write_temp(&format!(">good\n{TARGET}\n>bad\n{DIVERGED}\n"));
    // one mismatch against "good"
    let mut query_seq = TARGET.to_string();
    query_seq.replace_range(10..11, "T");
    let query = write_temp(&format!(">q\n{query_seq}\n"));

    let dir = tempdir().unwrap();
    let b6 = dir.path().join("out.b6");
    let output = metamer_cmd()
        .args([
            "usearch_global",
            query.path().to_str().unwrap(),
            "--db",
            db.path().to_str().unwrap(),
            "--id",
            "0.9",
            "--blast6out",
            b6.to_str().unwrap(),
            "--wordlength",
            "6",
            "--minseqlength",
            "1",
            "--threads",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let b6_text = std::fs::read_to_string(&b6).unwrap();
    let fields: Vec<&str> = b6_text.lines().next().unwrap().split('\t').collect();
    assert_eq!(fields[0], "q");
    assert_eq!(fields[1], "good");
    // 39 of 40 columns match
    assert_eq!(fields[2], "97.5");
    assert_eq!(fields[4], "1");
}

#[test]
fn usearch_global_matched_and_notmatched_partitions() {
    let db = write_temp(&format!(">t\n{TARGET}\n"));
    let query = write_temp(&format!(">hit\n{TARGET}\n>miss\n{DIVERGED}\n"));

    let dir = tempdir().unwrap();
    let matched = dir.path().join("matched.fa");
    let notmatched = dir.path().join("notmatched.fa");
    let output = metamer_cmd()
        .args([
            "usearch_global",
            query.path().to_str().unwrap(),
            "--db",
            db.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--matched",
            matched.to_str().unwrap(),
            "--notmatched",
            notmatched.to_str().unwrap(),
            "--minseqlength",
            "1",
            "--threads",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let matched_text = std::fs::read_to_string(&matched).unwrap();
    let notmatched_text = std::fs::read_to_string(&notmatched).unwrap();
    assert!(matched_text.contains(">hit"));
    assert!(!matched_text.contains(">miss"));
    assert!(notmatched_text.contains(">miss"));
}

#[test]
fn usearch_global_otu_table_counts_abundances() {
    let db = write_temp(&format!(">otu1\n{TARGET}\n"));
    let query = write_temp(&format!(
        ">q1;sample=gut;size=5;\n{TARGET}\n>q2;sample=skin;size=2;\n{TARGET}\n"
    ));

    let dir = tempdir().unwrap();
    let otutab = dir.path().join("otutab.txt");
    let biom = dir.path().join("table.biom");
    let output = metamer_cmd()
        .args([
            "usearch_global",
            query.path().to_str().unwrap(),
            "--db",
            db.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--otutabout",
            otutab.to_str().unwrap(),
            "--biomout",
            biom.to_str().unwrap(),
            "--sizein",
            "--minseqlength",
            "1",
            "--threads",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let table = std::fs::read_to_string(&otutab).unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], "#OTU ID\tgut\tskin");
    assert_eq!(lines[1], "otu1\t5\t2");

    let biom_value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&biom).unwrap()).unwrap();
    assert_eq!(biom_value["type"], "OTU table");
    assert_eq!(biom_value["shape"], serde_json::json!([1, 2]));
}

#[test]
fn strand_both_matches_reverse_complement_queries() {
    let db = write_temp(&format!(">t\n{TARGET}\n"));
    let rc: String = TARGET
        .bytes()
        .rev()
        .map(|c| match c {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            _ => 'A',
        })
        .collect();
    let query = write_temp(&format!(">q\n{rc}\n"));

    let dir = tempdir().unwrap();
    let uc = dir.path().join("out.uc");
    let output = metamer_cmd()
        .args([
            "usearch_global",
            query.path().to_str().unwrap(),
            "--db",
            db.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--strand",
            "both",
            "--uc",
            uc.to_str().unwrap(),
            "--minseqlength",
            "1",
            "--threads",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let uc_text = std::fs::read_to_string(&uc).unwrap();
    let hit_line = uc_text.lines().find(|l| l.starts_with("H\t")).unwrap();
    let fields: Vec<&str> = hit_line.split('\t').collect();
    assert_eq!(fields[4], "-");
}

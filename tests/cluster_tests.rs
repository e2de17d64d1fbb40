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

const SEQ_A: &str = "ACGTTGCAACGGTCAATTGACCAGTACCATGGACCGTTAC";
const SEQ_B: &str = "TGCCTAATGGCGATTACAGGCCTTAAGGCATTTGCCTAAT";

#[test]
fn identical_sequences_cluster_together() {
    let input = write_temp(&format!(">a\n{SEQ_A}\n>b\n{SEQ_A}\n>c\n{SEQ_B}\n"));
    let dir = tempdir().unwrap();
    let uc = dir.path().join("clusters.uc");
    let centroids = dir.path().join("centroids.fa");

    let output = metamer_cmd()
        .args([
            "cluster_fast",
            input.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--uc",
            uc.to_str().unwrap(),
            "--centroids",
            centroids.to_str().unwrap(),
            "--minseqlength",
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
    let seeds = uc_text.lines().filter(|l| l.starts_with("S\t")).count();
    let hits = uc_text.lines().filter(|l| l.starts_with("H\t")).count();
    let summaries = uc_text.lines().filter(|l| l.starts_with("C\t")).count();
    assert_eq!(seeds, 2);
    assert_eq!(hits, 1);
    assert_eq!(summaries, 2);

    let centroids_text = std::fs::read_to_string(&centroids).unwrap();
    assert_eq!(centroids_text.matches('>').count(), 2);
}

#[test]
fn hit_records_point_to_their_centroid() {
    let input = write_temp(&format!(">a\n{SEQ_A}\n>b\n{SEQ_A}\n"));
    let dir = tempdir().unwrap();
    let uc = dir.path().join("clusters.uc");

    let output = metamer_cmd()
        .args([
            "cluster_fast",
            input.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--uc",
            uc.to_str().unwrap(),
            "--minseqlength",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let uc_text = std::fs::read_to_string(&uc).unwrap();
    let hit = uc_text.lines().find(|l| l.starts_with("H\t")).unwrap();
    let fields: Vec<&str> = hit.split('\t').collect();
    assert_eq!(fields[1], "0");
    assert_eq!(fields[3], "100.0");
    assert_eq!(fields[8], "b");
    assert_eq!(fields[9], "a");
}

#[test]
fn cluster_size_prefers_abundant_centroids() {
    let input = write_temp(&format!(
        ">rare;size=1;\n{SEQ_A}\n>abundant;size=50;\n{SEQ_A}\n"
    ));
    let dir = tempdir().unwrap();
    let centroids = dir.path().join("centroids.fa");

    let output = metamer_cmd()
        .args([
            "cluster_size",
            input.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--centroids",
            centroids.to_str().unwrap(),
            "--minseqlength",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let centroids_text = std::fs::read_to_string(&centroids).unwrap();
    assert!(centroids_text.starts_with(">abundant"));
}

#[test]
fn cluster_smallmem_requires_length_order() {
    // second record is longer than the first
    let input = write_temp(&format!(">short\n{SEQ_A}\n>long\n{SEQ_A}ACGTACGT\n"));
    let dir = tempdir().unwrap();
    let uc = dir.path().join("clusters.uc");

    let output = metamer_cmd()
        .args([
            "cluster_smallmem",
            input.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--uc",
            uc.to_str().unwrap(),
            "--minseqlength",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("usersort"));

    // the same input passes with --usersort
    let output = metamer_cmd()
        .args([
            "cluster_smallmem",
            input.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--uc",
            uc.to_str().unwrap(),
            "--usersort",
            "--minseqlength",
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
}

#[test]
fn clusters_files_partition_the_input() {
    let input = write_temp(&format!(">a\n{SEQ_A}\n>b\n{SEQ_A}\n>c\n{SEQ_B}\n"));
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("cluster_");

    let output = metamer_cmd()
        .args([
            "cluster_fast",
            input.path().to_str().unwrap(),
            "--id",
            "0.97",
            "--clusters",
            prefix.to_str().unwrap(),
            "--minseqlength",
            "1",
            "--quiet",
        ])
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let c0 = std::fs::read_to_string(dir.path().join("cluster_0")).unwrap();
    let c1 = std::fs::read_to_string(dir.path().join("cluster_1")).unwrap();
    assert_eq!(c0.matches('>').count() + c1.matches('>').count(), 3);
}

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crisprtally::aligner::BoundaryMode;
use crisprtally::config::RunConfig;
use crisprtally::merge::Checksum;
use crisprtally::reads::open_maybe_gz;
use crisprtally::stats::Stats;
use crisprtally::{merge, pairing, single, TallyError};

const G1: &str = "ACGTACGTACGTACGTACGT";
const G2: &str = "TTTTGGGGCCCCAAAATTTT";
const G3: &str = "GATTACAGATTACAGATTAC";

fn single_library(dir: &Path) -> PathBuf {
    let path = dir.join("single.tsv");
    let text = format!(
        "##library-type: single\n\
#id\tsgrna_ids\tsgrna_seqs\tgene_pair_id\n\
G1\ts1\t{}\tGENE1\n\
G2\ts2\t{}\tGENE2\n\
G3\ts3\t{}\tGENE3\n",
        G1, G2, G3
    );
    fs::write(&path, text).unwrap();
    path
}

fn write_fastq(path: &Path, seqs: &[&str]) {
    let mut fh = fs::File::create(path).unwrap();
    for (i, seq) in seqs.iter().enumerate() {
        writeln!(fh, "@read{}\n{}\n+\n{}", i, seq, "I".repeat(seq.len())).unwrap();
    }
}

fn config(dir: &Path, lib: &Path, queries: &Path, sample: &str, prefix: &str, command: &str) -> RunConfig {
    RunConfig {
        guidelib: Some(lib.to_path_buf()),
        queries: queries.to_path_buf(),
        sample: Some(sample.to_string()),
        output: dir.join("out").join(prefix),
        cpus: 2,
        boundary_mode: BoundaryMode::All,
        command: command.to_string(),
        ..Default::default()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    open_maybe_gz(path).unwrap().lines().map(|l| l.unwrap()).collect()
}

fn single_run(dir: &Path, sample: &str, prefix: &str) -> PathBuf {
    let lib = single_library(dir);
    let reads = dir.join(format!("{}.fq", prefix));
    write_fastq(&reads, &[G1, G1, G1, G2, "CCCCCCCCCCCCCCCCCCCC", "CCCCCCCCCCCCCCCCCCCC"]);
    let cfg = config(
        dir,
        &lib,
        &reads,
        sample,
        prefix,
        "crisprtally single-guide -q reads.fq",
    );
    single::run(&cfg).unwrap();
    cfg.output_path(".counts.tsv")
}

#[test]
fn test_single_guide_run() {
    let dir = tempfile::tempdir().unwrap();
    let counts = single_run(dir.path(), "bob", "bob_1");

    let lines = read_lines(&counts);
    assert_eq!(lines[0], "##Command: crisprtally single-guide -q reads.fq");
    assert_eq!(lines[2], "#id\tsgrna_ids\tsgrna_seqs\tgene_pair_id\tunique_guide\treads_bob");
    assert_eq!(lines[3], format!("G1\ts1\t{}\tGENE1\t1\t3", G1));
    assert_eq!(lines[4], format!("G2\ts2\t{}\tGENE2\t1\t1", G2));
    assert_eq!(lines[5], format!("G3\ts3\t{}\tGENE3\t1\t0", G3));

    let stats = Stats::read_json(&merge::stats_path(&counts)).unwrap();
    assert_eq!(stats.total_reads, 6);
    assert_eq!(stats.mapped_to_guide_reads, 4);
    assert_eq!(stats.unmapped_reads, 2);
    assert_eq!(stats.multimap_reads, 0);
    assert_eq!(stats.total_guides, 3);
    assert_eq!(stats.zero_count_guides, 1);
    assert_eq!(stats.low_count_guides_lt_15, 3);
    assert_eq!(stats.mean_count_per_guide, 1.33);
}

#[test]
fn test_merge_runs_of_one_sample() {
    let dir = tempfile::tempdir().unwrap();
    let first = single_run(dir.path(), "bob", "bob_1");
    let second = single_run(dir.path(), "bob", "bob_2");
    let output = dir.path().join("merged").join("bob");

    let merged = merge::merge(&[first, second], &output, Some(5), Checksum::Sha1, "crisprtally merge").unwrap();
    assert_eq!(merged.total_reads, 12);
    assert_eq!(merged.mapped_to_guide_reads, 8);
    assert_eq!(merged.total_guides, 3);
    assert_eq!(merged.zero_count_guides, 1);
    assert_eq!(merged.low_count_guides_user.as_ref().unwrap().count, 2);
    assert_eq!(merged.merged_from.as_ref().unwrap().len(), 2);

    let lines = read_lines(&dir.path().join("merged").join("bob.merged-counts.tsv.gz"));
    assert!(lines[0].starts_with("##Count-col-#1: sha1: "));
    assert!(lines[0].ends_with("; crisprtally single-guide -q reads.fq"));
    assert!(lines[1].starts_with("##Count-col-#2: sha1: "));
    assert_eq!(
        lines[2],
        "#id\tsgrna_ids\tsgrna_seqs\tgene_pair_id\tunique_guide\treads_bob\t#1\t#2"
    );
    assert_eq!(lines[3], format!("G1\ts1\t{}\tGENE1\t1\t6\t3\t3", G1));
    assert_eq!(lines.len(), 6);

    let stats = Stats::read_json(&dir.path().join("merged").join("bob.merged-stats.json")).unwrap();
    assert_eq!(stats, merged);
}

#[test]
fn test_merge_rejects_mixed_samples() {
    let dir = tempfile::tempdir().unwrap();
    let first = single_run(dir.path(), "bob", "bob_1");
    let other = single_run(dir.path(), "alice", "alice_1");
    let output = dir.path().join("mixed");

    let err = merge::merge(&[first.clone(), other], &output, None, Checksum::Sha1, "crisprtally merge").unwrap_err();
    let tally = err.downcast_ref::<TallyError>().unwrap();
    assert!(matches!(tally, TallyError::Merge(_)));
    assert_eq!(tally.exit_code(), 2);
    assert!(!dir.path().join("mixed.merged-counts.tsv.gz").exists());
    assert!(!dir.path().join("mixed.merged-stats.json").exists());

    let err = merge::merge(&[first], &output, None, Checksum::Sha1, "crisprtally merge").unwrap_err();
    assert!(err.to_string().contains("At least 2 count files"));
}

#[test]
fn test_merge_rejects_other_commands() {
    let dir = tempfile::tempdir().unwrap();
    let first = single_run(dir.path(), "bob", "bob_1");
    let second = single_run(dir.path(), "bob", "bob_2");
    let text = fs::read_to_string(&second).unwrap();
    fs::write(
        &second,
        text.replace("crisprtally single-guide", "crisprtally dual-guide"),
    )
    .unwrap();

    let err = merge::merge(&[first, second], &dir.path().join("m"), None, Checksum::Sha1, "crisprtally merge").unwrap_err();
    assert!(err.to_string().contains("does not indicate single-guide"));
}

#[test]
fn test_long_read_run() {
    let dir = tempfile::tempdir().unwrap();
    let lib = single_library(dir.path());
    let reads = dir.path().join("long.fq");
    let padded = format!("AA{}CC", G1);
    write_fastq(&reads, &[&padded, &padded, "ACGT"]);
    let cfg = config(
        dir.path(),
        &lib,
        &reads,
        "bob",
        "long",
        "crisprtally long-read -q long.fq",
    );

    single::run_long_read(&cfg, false).unwrap();
    let stats = Stats::read_json(&cfg.output_path(".stats.json")).unwrap();
    assert_eq!(stats.length_excluded_reads, Some(1));
    assert_eq!(stats.mapped_to_guide_reads, 2);
    let lines = read_lines(&cfg.output_path(".counts.tsv"));
    assert_eq!(lines[3], format!("G1\ts1\t{}\tGENE1\t1\t2", G1));
    let queries = read_lines(&cfg.output_path(".query_counts.tsv.gz"));
    assert_eq!(queries.last().unwrap(), &format!("{}\t2", padded));
}

#[test]
fn test_long_read_unique_only() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("long.fq");
    write_fastq(&reads, &[G1, G1, G2]);
    let cfg = RunConfig {
        guidelib: None,
        ..config(dir.path(), Path::new("unused"), &reads, "bob", "uniq", "crisprtally long-read --unique")
    };

    single::run_long_read(&cfg, true).unwrap();
    let queries = read_lines(&cfg.output_path(".query_counts.tsv.gz"));
    assert_eq!(queries[2], "#QUERY\tCOUNT");
    assert_eq!(queries[3], format!("{}\t2", G1));
    assert!(!cfg.output_path(".counts.tsv").exists());
}

#[test]
fn test_dual_guide_run() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("dual.tsv");
    fs::write(
        &lib,
        "##library-type: dual\n\
#id\tsgrna_ids\tsgrna_seqs\tgene_pair_id\n\
P1\tl1|r1\tGGGGCCCCCC|TTTTAAAAAA\tGENE1|GENE2\n\
P2\tl2|r2\tAAAAAAAAAA|GGGGGGGGGG\tGENE3|GENE4\n",
    )
    .unwrap();
    let reads = dir.path().join("pairs.fq");
    {
        let mut fh = fs::File::create(&reads).unwrap();
        let pairs = [
            ("GGGGCCCCCC", "TTTTTTAAAA"),
            ("GGGGCCCCCC", "TTTTTTAAAA"),
            ("GGGGCCCCCC", "TTTTAAAAAA"),
            ("ACACACACAC", "GTGTGTGTGT"),
        ];
        for (i, (l, r)) in pairs.iter().enumerate() {
            writeln!(fh, "@p{}/1\n{}\n+\n{}", i, l, "I".repeat(l.len())).unwrap();
            writeln!(fh, "@p{}/2\n{}\n+\n{}", i, r, "I".repeat(r.len())).unwrap();
        }
    }
    let cfg = RunConfig {
        minscore: 5,
        ..config(dir.path(), &lib, &reads, "bob", "dual", "crisprtally dual-guide")
    };

    pairing::run(&cfg).unwrap();

    let lines = read_lines(&cfg.output_path(".counts.tsv"));
    assert_eq!(lines[3], "P1\tl1|r1\tGGGGCCCCCC|TTTTAAAAAA\tGENE1|GENE2\t1\t2");
    assert_eq!(lines[4], "P2\tl2|r2\tAAAAAAAAAA|GGGGGGGGGG\tGENE3|GENE4\t1\t0");

    let stats = Stats::read_json(&cfg.output_path(".stats.json")).unwrap();
    assert_eq!(stats.total_pairs, 4);
    let classes = stats.pair_classifications.unwrap();
    assert_eq!(classes["match"], 2);
    assert_eq!(classes["aberrant_match"], 1);
    assert_eq!(classes["no_match"], 1);
    assert_eq!(classes.len(), 13);
    assert_eq!(stats.mapped_to_guide_reads, 6);
    assert_eq!(stats.unmapped_reads, 2);

    let class_lines = read_lines(&cfg.output_path(".query_class.tsv.gz"));
    assert!(class_lines.contains(&"#read_seqs\thit_l\thit_r\thit_type\tcount".to_string()));
    assert!(class_lines.contains(&"GGGGCCCCCC|TTTTTTAAAA\tY\tY\tMATCH\t2".to_string()));
    assert!(class_lines.contains(&"ACACACACAC|GTGTGTGTGT\tN\tN\tNO_MATCH\t1".to_string()));
}

#[test]
fn test_merge_with_global_option_and_md5() {
    let dir = tempfile::tempdir().unwrap();
    let first = single_run(dir.path(), "bob", "bob_1");
    let second = single_run(dir.path(), "bob", "bob_2");
    let text = fs::read_to_string(&second).unwrap();
    fs::write(
        &second,
        text.replace("crisprtally single-guide", "crisprtally -l DEBUG single-guide"),
    )
    .unwrap();

    let output = dir.path().join("bob_md5");
    merge::merge(&[first, second], &output, None, Checksum::Md5, "crisprtally merge").unwrap();
    let lines = read_lines(&dir.path().join("bob_md5.merged-counts.tsv.gz"));
    assert!(lines[0].starts_with("##Count-col-#1: md5: "));
    assert!(lines[1].starts_with("##Count-col-#2: md5: "));
    assert!(lines[1].ends_with("; crisprtally -l DEBUG single-guide -q reads.fq"));
}

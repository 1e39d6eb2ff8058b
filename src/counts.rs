use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use log::info;

use crate::library::{Guide, Library};
use crate::pairing::{PairSignature, PairTypeInfo};
use crate::stats::Stats;

/// Identity columns of a count file, followed by the count column.
pub const COUNT_COLS: [&str; 5] = ["id", "sgrna_ids", "sgrna_seqs", "gene_pair_id", "unique_guide"];

const READCLASS_HEADER: [&str; 6] = [
    "## hit_l and hit_r: Y/N/M",
    "## Where:",
    "##   Y = Mapped to target",
    "##   N = Not mapped to target",
    "##   M = Mapped to multiple targets, but resolved via pairing",
    "## hit_type: MATCH, SWAP, AMBIGUOUS, ABERRANT, NO_MATCH",
];

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn create_gz(path: &Path) -> Result<GzEncoder<BufWriter<File>>> {
    Ok(GzEncoder::new(create(path)?, Compression::default()))
}

pub fn write_provenance<W: Write>(out: &mut W, stats: &Stats) -> Result<()> {
    writeln!(out, "##Command: {}", stats.command)?;
    writeln!(out, "##Version: {}", stats.version)?;
    Ok(())
}

pub fn count_header(sample: &str) -> String {
    format!("#{}\treads_{}", COUNT_COLS.join("\t"), sample)
}

pub fn format_guide(guide: &Guide) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        guide.id,
        guide.sgrna_ids.join("|"),
        guide.sgrna_seqs.join("|"),
        guide.gene_pair_id,
        u8::from(guide.unique),
        guide.count
    )
}

/// Write `{prefix}.counts.tsv` from the library's guide counts. Returns the summed count.
pub fn write_guide_counts(path: &Path, library: &Library, stats: &Stats) -> Result<u64> {
    info!("Writing counts file: {}", path.display());
    let mut out = create(path)?;
    write_provenance(&mut out, stats)?;
    writeln!(out, "{}", count_header(stats.sample_name.as_deref().unwrap_or("")))?;
    let mut total = 0;
    for guide in &library.guides {
        writeln!(out, "{}", format_guide(guide))?;
        total += guide.count;
    }
    out.flush()?;
    Ok(total)
}

/// Write the unique query sequences and their read counts, sorted by sequence.
pub fn write_query_counts(path: &Path, reads: &HashMap<String, u64>, stats: &Stats) -> Result<()> {
    info!("Writing query counts file: {}", path.display());
    let mut out = create_gz(path)?;
    write_provenance(&mut out, stats)?;
    writeln!(out, "#QUERY\tCOUNT")?;
    for seq in reads.keys().sorted() {
        writeln!(out, "{}\t{}", seq, reads[seq])?;
    }
    out.finish()?.flush()?;
    Ok(())
}

/// Write the per pair-signature classification summary.
pub fn write_query_classes(path: &Path, pair_info: &HashMap<PairSignature, PairTypeInfo>) -> Result<()> {
    info!("Writing query sequence classifications: {}", path.display());
    let mut out = create_gz(path)?;
    for line in READCLASS_HEADER {
        writeln!(out, "{}", line)?;
    }
    writeln!(out, "#read_seqs\thit_l\thit_r\thit_type\tcount")?;
    for sig in pair_info.keys().sorted() {
        let info = &pair_info[sig];
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            sig, info.hit_l, info.hit_r, info.hit_type, info.count
        )?;
    }
    out.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{LibraryHeader, LibraryType};
    use crate::reads::open_maybe_gz;
    use std::io::BufRead;

    fn library() -> Library {
        let header = LibraryHeader {
            info_items: vec![],
            columns: COUNT_COLS[..4].iter().map(|c| c.to_string()).collect(),
            library_type: LibraryType::Single,
        };
        let guides = vec![
            Guide {
                idx: 0,
                id: "G1".to_string(),
                sgrna_ids: vec!["s1".to_string()],
                sgrna_seqs: vec!["ACGT".to_string()],
                gene_pair_id: "GENE1".to_string(),
                count: 7,
                ..Default::default()
            },
            Guide {
                idx: 1,
                id: "G2".to_string(),
                sgrna_ids: vec!["s2".to_string()],
                sgrna_seqs: vec!["TTTT".to_string()],
                gene_pair_id: "GENE2".to_string(),
                count: 3,
                ..Default::default()
            },
        ];
        Library::new(header, guides)
    }

    #[test]
    fn test_write_guide_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.counts.tsv");
        let stats = Stats::new("crisprtally single-guide -q x", Some("bob".to_string()));
        let total = write_guide_counts(&path, &library(), &stats).unwrap();
        assert_eq!(total, 10);
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "##Command: crisprtally single-guide -q x");
        assert!(lines[1].starts_with("##Version: "));
        assert_eq!(lines[2], "#id\tsgrna_ids\tsgrna_seqs\tgene_pair_id\tunique_guide\treads_bob");
        assert_eq!(lines[3], "G1\ts1\tACGT\tGENE1\t1\t7");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_write_query_counts_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.query_counts.tsv.gz");
        let reads: HashMap<String, u64> = [("TTTT".to_string(), 1), ("AAAA".to_string(), 4)].into_iter().collect();
        write_query_counts(&path, &reads, &Stats::default()).unwrap();
        let lines: Vec<String> = open_maybe_gz(&path).unwrap().lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines[2], "#QUERY\tCOUNT");
        assert_eq!(lines[3], "AAAA\t4");
        assert_eq!(lines[4], "TTTT\t1");
    }
}

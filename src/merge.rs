use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use log::info;
use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::counts::COUNT_COLS;
use crate::error::TallyError;
use crate::reads::open_maybe_gz;
use crate::stats::Stats;

const MERGEABLE_COMMAND: &str = "single-guide";

fn merge_err(detail: impl Into<String>) -> anyhow::Error {
    TallyError::Merge(detail.into()).into()
}

/// Digest recorded for each input in the merged header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Checksum {
    Md5,
    #[default]
    Sha1,
    Sha256,
}

impl Checksum {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checksum::Md5 => "md5",
            Checksum::Sha1 => "sha1",
            Checksum::Sha256 => "sha256",
        }
    }

    /// `<type>: <hex>` of the file at `path`.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        let hex = match self {
            Checksum::Md5 => digest_file::<Md5>(path)?,
            Checksum::Sha1 => digest_file::<Sha1>(path)?,
            Checksum::Sha256 => digest_file::<Sha256>(path)?,
        };
        Ok(format!("{}: {}", self.as_str(), hex))
    }
}

fn digest_file<D: Digest + Write>(path: &Path) -> Result<String> {
    let mut file = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let mut hasher = D::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One data row of a count file: the identity columns and the final count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRow {
    pub identity: Vec<String>,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct CountFile {
    pub path: PathBuf,
    /// `<type>: <hex>` digest of the file as read.
    pub checksum: String,
    pub command: String,
    pub version: String,
    /// Last column of the `#id` line.
    pub sample: String,
    pub rows: Vec<CountRow>,
}

impl CountFile {
    /// `##Count-col-#N` provenance line for the merged header.
    pub fn provenance_line(&self, idx: usize) -> String {
        format!(
            "##Count-col-#{}: {}; {}; {}",
            idx, self.checksum, self.version, self.command
        )
    }
}

/// Stats sit beside the counts: `x.counts.tsv[.gz]` -> `x.stats.json`.
pub fn stats_path(count_path: &Path) -> PathBuf {
    let as_str = count_path.to_string_lossy();
    PathBuf::from(as_str.replace("counts.tsv", "stats.json").replace(".gz", ""))
}

/// True when a recorded command line ran the mergeable subcommand. Global options may come
/// before it, so any argument after the program name is accepted.
fn is_mergeable_command(cmd: &str) -> bool {
    cmd.split_whitespace().skip(1).any(|token| token == MERGEABLE_COMMAND)
}

/// Load one count file. `file_idx` is 1-based and only used in messages.
pub fn load_count_file(path: &Path, file_idx: usize, checksum: Checksum) -> Result<CountFile> {
    let checksum = checksum.hash_file(path)?;
    let (mut command, mut version, mut sample) = (None, String::new(), None);
    let mut rows = Vec::new();

    for line in open_maybe_gz(path)?.lines() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(cmd) = line.strip_prefix("##Command:") {
            let cmd = cmd.trim();
            if !is_mergeable_command(cmd) {
                return Err(merge_err(format!(
                    "Input file {} ({}) command header does not indicate {}: {}",
                    file_idx,
                    path.display(),
                    MERGEABLE_COMMAND,
                    line
                )));
            }
            command = Some(cmd.to_string());
        } else if let Some(ver) = line.strip_prefix("##Version:") {
            version = ver.trim().to_string();
        } else if line.starts_with("#id") {
            sample = line.split('\t').last().map(|s| s.to_string());
        } else if line.starts_with('#') {
            continue;
        } else {
            let items: Vec<&str> = line.split('\t').collect();
            if items.len() <= COUNT_COLS.len() {
                return Err(merge_err(format!(
                    "Input file {} ({}) data row {} has {} columns, expected more than {}",
                    file_idx,
                    path.display(),
                    rows.len() + 1,
                    items.len(),
                    COUNT_COLS.len()
                )));
            }
            let count = items[items.len() - 1].parse::<u64>().map_err(|_| {
                merge_err(format!(
                    "Input file {} ({}) data row {} has a non-integer count '{}'",
                    file_idx,
                    path.display(),
                    rows.len() + 1,
                    items[items.len() - 1]
                ))
            })?;
            rows.push(CountRow {
                identity: items[..COUNT_COLS.len()].iter().map(|s| s.to_string()).collect(),
                count,
            });
        }
    }

    let command = command.ok_or_else(|| {
        merge_err(format!("Input file {} ({}) has no ##Command header", file_idx, path.display()))
    })?;
    let sample = sample.ok_or_else(|| {
        merge_err(format!("Input file {} ({}) has no #id column header", file_idx, path.display()))
    })?;
    Ok(CountFile {
        path: path.to_path_buf(),
        checksum,
        command,
        version,
        sample,
        rows,
    })
}

/// Check sample, row count and identity columns of every file against the first.
pub fn validate(files: &[CountFile]) -> Result<()> {
    let Some(first) = files.first() else {
        return Err(merge_err("At least 2 count files must be provided"));
    };
    for (i, file) in files.iter().enumerate().skip(1) {
        let file_idx = i + 1;
        if file.sample != first.sample {
            return Err(merge_err(format!(
                "Input file {} ({}) is a different sample to previous files ({} vs {})",
                file_idx,
                file.path.display(),
                file.sample,
                first.sample
            )));
        }
        if file.rows.len() != first.rows.len() {
            return Err(merge_err(format!(
                "Input file {} ({}) has a different number of data rows to previous files",
                file_idx,
                file.path.display()
            )));
        }
        for (row_idx, (expected, row)) in first.rows.iter().zip(&file.rows).enumerate() {
            for (col_idx, col_name) in COUNT_COLS.iter().enumerate() {
                if expected.identity[col_idx] != row.identity[col_idx] {
                    return Err(merge_err(format!(
                        "Input file {} ({}) has a different '{}' ({} vs {}) on data row {}",
                        file_idx,
                        file.path.display(),
                        col_name,
                        expected.identity[col_idx],
                        row.identity[col_idx],
                        row_idx + 1
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Summed statistics; low-count fields are recomputed from `summed_counts`.
pub fn merge_stats(inputs: &[Stats], summed_counts: &[u64], low_count: Option<u64>, command: &str) -> Stats {
    let sample = inputs.first().and_then(|s| s.sample_name.clone());
    let mut merged = Stats::new(command, sample);
    for stats in inputs {
        merged.add_summable(stats);
    }
    merged.total_guides = inputs.first().map(|s| s.total_guides).unwrap_or(0);
    merged.tally_guide_counts(summed_counts.iter().copied(), low_count);
    merged.merged_from = Some(inputs.to_vec());
    merged
}

fn write_merged_counts(path: &Path, files: &[CountFile], summed: &[u64]) -> Result<()> {
    info!("Writing merged counts file: {}", path.display());
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());
    for (i, f) in files.iter().enumerate() {
        writeln!(out, "{}", f.provenance_line(i + 1))?;
    }
    let input_cols = (1..=files.len()).map(|i| format!("#{}", i)).join("\t");
    writeln!(
        out,
        "#{}\t{}\t{}",
        COUNT_COLS.join("\t"),
        files[0].sample,
        input_cols
    )?;
    for (row_idx, total) in summed.iter().enumerate() {
        let per_input = files.iter().map(|f| f.rows[row_idx].count).join("\t");
        writeln!(
            out,
            "{}\t{}\t{}",
            files[0].rows[row_idx].identity.join("\t"),
            total,
            per_input
        )?;
    }
    out.finish()?.flush()?;
    Ok(())
}

/// Merge count files from repeated single-guide runs of one sample.
///
/// Every input is validated before any output is written. Returns the merged statistics.
pub fn merge(
    inputs: &[PathBuf],
    output: &Path,
    low_count: Option<u64>,
    checksum: Checksum,
    command: &str,
) -> Result<Stats> {
    if inputs.len() < 2 {
        return Err(merge_err("At least 2 count files must be provided"));
    }
    let files = inputs
        .iter()
        .enumerate()
        .map(|(i, p)| load_count_file(p, i + 1, checksum))
        .collect::<Result<Vec<_>>>()?;
    validate(&files)?;
    let input_stats = inputs
        .iter()
        .map(|p| Stats::read_json(&stats_path(p)))
        .collect::<Result<Vec<_>>>()?;

    let summed: Vec<u64> = (0..files[0].rows.len())
        .map(|row_idx| files.iter().map(|f| f.rows[row_idx].count).sum())
        .collect();
    let mut merged = merge_stats(&input_stats, &summed, low_count, command);
    if merged.sample_name.is_none() {
        merged.sample_name = Some(files[0].sample.clone());
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let counts_out = PathBuf::from(format!("{}.merged-counts.tsv.gz", output.display()));
    write_merged_counts(&counts_out, &files, &summed)?;
    let stats_out = PathBuf::from(format!("{}.merged-stats.json", output.display()));
    info!("Writing merged statistics file: {}", stats_out.display());
    merged.write_json(&stats_out)?;
    Ok(merged)
}

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bio::alphabets::dna::revcomp;
use bio::io::fastq;
use flate2::read::MultiGzDecoder;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use crate::error::TallyError;
use crate::pairing::PairSignature;
use crate::stats::Stats;

lazy_static! {
    static ref ILLUMINA_SINGLE: Regex = Regex::new(r"^([^\s/]+)$").unwrap();
    static ref ILLUMINA_PAIRED: Regex = Regex::new(r"^(\S+)/([12])$").unwrap();
    static ref CASAVA_DESC: Regex = Regex::new(r"^([012]):([YN]):\d+:\S+$").unwrap();
}

const LOAD_INFO_THRESHOLD: u64 = 1_000_000;

/// Open a text file, transparently decompressing gzip by magic bytes.
pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let is_gz = reader.fill_buf()?.starts_with(&[0x1f, 0x8b]);
    if is_gz {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRead {
    pub name: String,
    pub sequence: String,
    pub member: Option<u8>,
    pub qc_fail: bool,
}

/// Filters applied identically on every pass over a read file.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub sample: Option<String>,
    pub exclude_qcfail: bool,
    /// Keep only the first N bases, 0 keeps everything.
    pub trim_len: usize,
    /// Reads shorter than this are excluded (after trimming).
    pub exclude_by_len: Option<usize>,
    pub reverse: bool,
}

/// Split a FASTQ header into (name, pair member, qc_fail).
///
/// Supports Illumina (`@name`, `@name/1`) and CASAVA 1.8+ (`@name 1:Y:0:IDX`).
pub fn parse_fq_header(id: &str, desc: Option<&str>) -> Option<(String, Option<u8>, bool)> {
    if let Some(desc) = desc {
        let caps = CASAVA_DESC.captures(desc.trim())?;
        let member: u8 = caps[1].parse().ok()?;
        let member = if member == 0 { None } else { Some(member) };
        return Some((id.to_string(), member, &caps[2] == "Y"));
    }
    if let Some(caps) = ILLUMINA_SINGLE.captures(id) {
        return Some((caps[1].to_string(), None, false));
    }
    if let Some(caps) = ILLUMINA_PAIRED.captures(id) {
        let member: u8 = caps[2].parse().ok()?;
        return Some((caps[1].to_string(), Some(member), false));
    }
    None
}

/// Reads from a FASTQ file with trimming and reverse complement applied.
///
/// QC and length filters are left to the caller so that single and paired passes can decide
/// what a skipped read means for them.
pub struct ReadIter {
    path: PathBuf,
    records: fastq::Records<Box<dyn BufRead>>,
    trim_len: usize,
    reverse: bool,
}

impl ReadIter {
    pub fn open(path: &Path, opts: &ReadOptions) -> Result<ReadIter> {
        let reader = fastq::Reader::from_bufread(open_maybe_gz(path)?);
        Ok(ReadIter {
            path: path.to_path_buf(),
            records: reader.records(),
            trim_len: opts.trim_len,
            reverse: opts.reverse,
        })
    }
}

impl Iterator for ReadIter {
    type Item = Result<SeqRead>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(TallyError::reads(&self.path, e.to_string()).into())),
        };
        let (name, member, qc_fail) = match parse_fq_header(record.id(), record.desc()) {
            Some(parsed) => parsed,
            None => {
                let header = match record.desc() {
                    Some(desc) => format!("{} {}", record.id(), desc),
                    None => record.id().to_string(),
                };
                return Some(Err(TallyError::reads(
                    &self.path,
                    format!("Unsupported FastQ header format: @{}", header),
                )
                .into()));
            }
        };

        let mut seq = record.seq();
        if !seq.is_ascii() {
            return Some(Err(TallyError::reads(
                &self.path,
                format!("Read {} has non-ASCII bytes in its sequence", name),
            )
            .into()));
        }
        if self.trim_len > 0 && seq.len() > self.trim_len {
            seq = &seq[..self.trim_len];
        }
        let sequence = if self.reverse {
            String::from_utf8_lossy(&revcomp(seq)).into_owned()
        } else {
            String::from_utf8_lossy(seq).into_owned()
        };

        Some(Ok(SeqRead {
            name,
            sequence,
            member,
            qc_fail,
        }))
    }
}

/// Adjacent mate records from an interleaved (collated) FASTQ.
pub struct PairIter {
    path: PathBuf,
    reads: ReadIter,
}

impl PairIter {
    pub fn open(path: &Path, opts: &ReadOptions) -> Result<PairIter> {
        Ok(PairIter {
            path: path.to_path_buf(),
            reads: ReadIter::open(path, opts)?,
        })
    }
}

impl Iterator for PairIter {
    type Item = Result<(SeqRead, SeqRead)>;

    fn next(&mut self) -> Option<Self::Item> {
        let left = match self.reads.next()? {
            Ok(read) => read,
            Err(e) => return Some(Err(e)),
        };
        let right = match self.reads.next() {
            Some(Ok(read)) => read,
            Some(Err(e)) => return Some(Err(e)),
            None => {
                return Some(Err(TallyError::reads(
                    &self.path,
                    "Collated stream exhausted between records",
                )
                .into()))
            }
        };
        if left.name != right.name || left.member == Some(2) || right.member == Some(1) {
            return Some(Err(TallyError::reads(
                &self.path,
                format!(
                    "Paired reads require collation before parsing, got '{}' then '{}'",
                    left.name, right.name
                ),
            )
            .into()));
        }
        Some(Ok((left, right)))
    }
}

/// Unique sequences seen in a read file.
#[derive(Debug)]
pub struct ParsedReads {
    pub stats: Stats,
    /// Unique sequence to number of reads carrying it.
    pub reads: HashMap<String, u64>,
}

fn sample_name(path: &Path, opts: &ReadOptions) -> Result<String> {
    opts.sample.clone().ok_or_else(|| {
        TallyError::reads(path, "--sample must be provided for fastq inputs").into()
    })
}

/// First pass over unpaired reads: collapse to unique sequences.
pub fn parse_reads(path: &Path, opts: &ReadOptions, command: &str) -> Result<ParsedReads> {
    let mut stats = Stats::new(command, Some(sample_name(path, opts)?));
    info!("Parsing reads from {}", path.display());

    let mut reads: HashMap<String, u64> = HashMap::new();
    let (mut total, mut len_ex) = (0u64, 0u64);
    for read in ReadIter::open(path, opts)? {
        let read = read?;
        if read.qc_fail {
            if opts.exclude_qcfail {
                continue;
            }
            stats.vendor_failed_reads += 1;
        }
        if let Some(min_len) = opts.exclude_by_len {
            if read.sequence.len() < min_len {
                len_ex += 1;
                continue;
            }
        }
        *reads.entry(read.sequence).or_insert(0) += 1;
        total += 1;
        if total % LOAD_INFO_THRESHOLD == 0 {
            debug!("Parsed {} reads, {} were unique...", total, reads.len());
        }
    }

    stats.total_reads = total;
    stats.reversed_reads = opts.reverse;
    if opts.exclude_by_len.is_some() {
        stats.length_excluded_reads = Some(len_ex);
    }
    info!("Parsed {} reads, {} were unique...", total, reads.len());
    Ok(ParsedReads { stats, reads })
}

/// Whether a pair is kept under the QC filter.
pub fn keep_pair(left: &SeqRead, right: &SeqRead, opts: &ReadOptions) -> bool {
    !(opts.exclude_qcfail && (left.qc_fail || right.qc_fail))
}

/// First pass over interleaved paired reads: unique end sequences and unique pair signatures.
pub fn parse_read_pairs(path: &Path, opts: &ReadOptions, command: &str) -> Result<ParsedReads> {
    let mut stats = Stats::new(command, Some(sample_name(path, opts)?));
    info!("Parsing read pairs from {}", path.display());

    let mut reads: HashMap<String, u64> = HashMap::new();
    let mut pairs: HashSet<PairSignature> = HashSet::new();
    let (mut total, mut total_pairs) = (0u64, 0u64);
    for pair in PairIter::open(path, opts)? {
        let (left, right) = pair?;
        if !keep_pair(&left, &right, opts) {
            continue;
        }
        for read in [&left, &right] {
            if read.qc_fail {
                stats.vendor_failed_reads += 1;
            }
            *reads.entry(read.sequence.clone()).or_insert(0) += 1;
            total += 1;
        }
        pairs.insert(PairSignature::new(left.sequence, right.sequence));
        total_pairs += 1;
        if total_pairs % LOAD_INFO_THRESHOLD == 0 {
            debug!("Parsed {} pairs, {} were unique...", total_pairs, pairs.len());
        }
    }

    stats.total_reads = total;
    stats.total_pairs = total_pairs;
    stats.reversed_reads = opts.reverse;
    info!("Parsed {} pairs, {} were unique...", total_pairs, pairs.len());
    Ok(ParsedReads { stats, reads })
}

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use bio::io::fasta;
use lazy_static::lazy_static;
use log::info;
use regex::Regex;

use crate::error::TallyError;
use crate::reads::open_maybe_gz;
use crate::targets::TargetIndex;

lazy_static! {
    static ref H_INFO_RE: Regex = Regex::new(r"^##([^:]+): ?(.+)$").unwrap();
    static ref ACGT_ONLY: Regex = Regex::new(r"^[ACGT]+$").unwrap();
}

pub const REQUIRED_COLS: [&str; 4] = ["id", "sgrna_ids", "sgrna_seqs", "gene_pair_id"];
pub const OPTIONAL_COLS: [&str; 7] = [
    "sgrna_strands",
    "sgrna_symbols",
    "gene_pair_symbol",
    "sgrna_libraries",
    "external_ids",
    "sgrna_approaches",
    "sgrna_notes",
];
/// Columns holding one `|`-separated value per guide component.
pub const SPLIT_COLS: [&str; 7] = [
    "sgrna_ids",
    "sgrna_seqs",
    "sgrna_strands",
    "sgrna_symbols",
    "sgrna_libraries",
    "sgrna_approaches",
    "sgrna_notes",
];
const SPLIT_SEP: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryType {
    Single,
    Dual,
    Other,
    Unknown,
}

impl LibraryType {
    fn parse(value: &str) -> Option<LibraryType> {
        match value {
            "single" => Some(LibraryType::Single),
            "dual" => Some(LibraryType::Dual),
            "other" => Some(LibraryType::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::Single => "single",
            LibraryType::Dual => "dual",
            LibraryType::Other => "other",
            LibraryType::Unknown => "UNKNOWN",
        }
    }

    fn strand_count(&self) -> Option<usize> {
        match self {
            LibraryType::Single => Some(1),
            LibraryType::Dual => Some(2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Guide {
    pub idx: usize,
    pub id: String,
    pub sgrna_ids: Vec<String>,
    pub sgrna_seqs: Vec<String>,
    pub gene_pair_id: String,
    pub sgrna_strands: Option<Vec<String>>,
    /// Optional allow-listed columns, in file column order.
    pub other: Vec<(String, String)>,
    pub unique: bool,
    pub count: u64,
}

impl Default for Guide {
    fn default() -> Self {
        Guide {
            idx: 0,
            id: String::new(),
            sgrna_ids: Vec::new(),
            sgrna_seqs: Vec::new(),
            gene_pair_id: String::new(),
            sgrna_strands: None,
            other: Vec::new(),
            unique: true,
            count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LibraryHeader {
    pub info_items: Vec<(String, String)>,
    pub columns: Vec<String>,
    pub library_type: LibraryType,
}

/// A parsed guide library with its target index.
#[derive(Debug, Clone)]
pub struct Library {
    pub header: LibraryHeader,
    pub guides: Vec<Guide>,
    pub index: TargetIndex,
    by_sgrna_set: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl Library {
    pub fn load(path: &Path) -> Result<Library> {
        let reader = open_maybe_gz(path)?;
        let library = Library::from_reader(reader)
            .with_context(|| format!("Failed to load guide library {}", path.display()))?;
        info!(
            "Loaded {} guides ({} library) from {}",
            library.guides.len(),
            library.header.library_type.as_str(),
            path.display()
        );
        Ok(library)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Library> {
        let mut lines = reader.lines();
        let header = parse_header(&mut lines)?;
        let (header, guides) = parse_data_rows(header, lines)?;
        Ok(Library::new(header, guides))
    }

    pub fn new(header: LibraryHeader, mut guides: Vec<Guide>) -> Library {
        let single = header.library_type == LibraryType::Single;
        let index = TargetIndex::build(&mut guides, single);

        let mut by_sgrna_set: HashMap<String, HashMap<String, Vec<usize>>> = HashMap::new();
        for g in &guides {
            if g.sgrna_seqs.len() != 2 {
                continue;
            }
            by_sgrna_set
                .entry(g.sgrna_seqs[0].clone())
                .or_default()
                .entry(g.sgrna_seqs[1].clone())
                .or_default()
                .push(g.idx);
        }

        Library {
            header,
            guides,
            index,
            by_sgrna_set,
        }
    }

    pub fn is_single(&self) -> bool {
        self.header.library_type == LibraryType::Single
    }

    pub fn targets(&self) -> &[String] {
        self.index.targets()
    }

    pub fn min_target_len(&self) -> usize {
        self.index.min_target_len()
    }

    /// Guides whose components are exactly `(left, right)`, in that order.
    pub fn guide_by_sgrna_set(&self, left: &str, right: &str) -> &[usize] {
        self.by_sgrna_set
            .get(left)
            .and_then(|m| m.get(right))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Sorted distinct sgRNA ids carried by the component sequence `seq`.
    pub fn sgrna_ids_by_seq(&self, seq: &str) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for &g_idx in self.index.lookup(seq) {
            let g = &self.guides[g_idx];
            for (s, id) in g.sgrna_seqs.iter().zip(g.sgrna_ids.iter()) {
                if s == seq {
                    ids.insert(id.clone());
                }
            }
        }
        ids.into_iter().collect()
    }

    /// Write each target as a FASTA record named by the sgRNA ids that share it.
    pub fn write_fasta(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = fasta::Writer::new(BufWriter::new(file));
        for target in self.targets() {
            let name = self.sgrna_ids_by_seq(target).join("|");
            writer.write(&name, None, target.as_bytes())?;
        }
        writer.flush()?;
        info!("Wrote {} targets to {}", self.targets().len(), path.display());
        Ok(())
    }
}

fn lib_err(detail: impl Into<String>) -> anyhow::Error {
    TallyError::Library(detail.into()).into()
}

/// Consume `##` info lines and the `#` column line.
fn parse_header<I>(lines: &mut I) -> Result<LibraryHeader>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let mut info_items: Vec<(String, String)> = Vec::new();
    let mut library_type = LibraryType::Unknown;

    let column_line = loop {
        let line = match lines.next() {
            Some(line) => line?,
            None => return Err(lib_err("Failed to find the column headers in the guide library file")),
        };
        let line = line.trim_end().to_string();
        if !line.starts_with("##") {
            break line;
        }
        let caps = H_INFO_RE.captures(&line).ok_or_else(|| {
            lib_err(format!(
                "Header info line is not of expected format '^##([^:]+): ?(.+)$': {}",
                line
            ))
        })?;
        let (tag, value) = (caps[1].to_string(), caps[2].to_string());
        if info_items.iter().any(|(t, _)| *t == tag) {
            return Err(lib_err(format!("Duplicate key '{}' found for '##' header line", tag)));
        }
        if tag == "library-type" {
            library_type = LibraryType::parse(&value).ok_or_else(|| {
                lib_err(format!(
                    "Value for 'library-type' ({}) is not valid, choose from: single, dual, other",
                    value
                ))
            })?;
        }
        info_items.push((tag, value));
    };

    let columns = columns_from_header(&column_line, library_type)?;
    Ok(LibraryHeader {
        info_items,
        columns,
        library_type,
    })
}

pub fn columns_from_header(line: &str, library_type: LibraryType) -> Result<Vec<String>> {
    let line = line.trim_end();
    if !line.starts_with('#') {
        return Err(lib_err("Failed to find the column headers in the guide library file"));
    }
    let cols: Vec<String> = line
        .trim_start_matches('#')
        .trim_start()
        .split('\t')
        .map(|c| c.to_string())
        .collect();

    for required in REQUIRED_COLS {
        if !cols.iter().any(|c| c == required) {
            return Err(lib_err(format!(
                "Required column ({}) missing from column headers",
                required
            )));
        }
    }
    for c in &cols {
        if !REQUIRED_COLS.contains(&c.as_str()) && !OPTIONAL_COLS.contains(&c.as_str()) {
            return Err(lib_err(format!("Column ({}) is not an expected column", c)));
        }
    }
    let has_strands = cols.iter().any(|c| c == "sgrna_strands");
    if !has_strands && library_type.strand_count().is_none() {
        return Err(lib_err(
            "Either column 'sgrna_strands' or info header '##library-type' (single/dual) must be defined",
        ));
    }
    Ok(cols)
}

fn split_values(value: &str) -> Vec<String> {
    value.split(SPLIT_SEP).map(|s| s.to_string()).collect()
}

fn parse_data_rows<I>(mut header: LibraryHeader, lines: I) -> Result<(LibraryHeader, Vec<Guide>)>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let col_no = header.columns.len();
    let mut strand_no = header.library_type.strand_count();
    let mut guides = Vec::new();

    for (line_no, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let elements: Vec<&str> = line.split('\t').collect();
        if elements.len() != col_no {
            return Err(lib_err(format!(
                "Column header indicates {} columns, but record has only {} (all fields require a value, '.' to omit)\n> {}",
                col_no,
                elements.len(),
                line
            )));
        }

        let mut guide = Guide {
            idx: guides.len(),
            ..Default::default()
        };
        let mut split_lens: Vec<(&str, usize)> = Vec::new();
        for (key, value) in header.columns.iter().zip(elements.iter()) {
            if SPLIT_COLS.contains(&key.as_str()) {
                split_lens.push((key.as_str(), value.split(SPLIT_SEP).count()));
            }
            match key.as_str() {
                "id" => guide.id = value.to_string(),
                "sgrna_ids" => guide.sgrna_ids = split_values(value),
                "sgrna_seqs" => guide.sgrna_seqs = split_values(value),
                "gene_pair_id" => guide.gene_pair_id = value.to_string(),
                "sgrna_strands" => guide.sgrna_strands = Some(split_values(value)),
                _ => guide.other.push((key.clone(), value.to_string())),
            }
        }

        if let Some(strands) = &guide.sgrna_strands {
            let this_no = strands.len();
            match strand_no {
                None => strand_no = Some(this_no),
                Some(expected) if expected != this_no => {
                    let detail = if header.library_type != LibraryType::Unknown {
                        format!(
                            "'sgrna_strands' column elements ({}) mismatch vs rule for '##library-type: {}' ({})",
                            this_no,
                            header.library_type.as_str(),
                            expected
                        )
                    } else {
                        format!(
                            "'sgrna_strands' column elements ({}) mismatch against previous rows ({}), line: {}",
                            this_no, expected, line
                        )
                    };
                    return Err(lib_err(detail));
                }
                _ => {}
            }
        }

        if let Some(&(first_col, expect_len)) = split_lens.first() {
            for &(col, split_len) in &split_lens[1..] {
                if split_len != expect_len {
                    return Err(lib_err(format!(
                        "All columns that can be split should have the same number of elements.  Column {} ({}), differs from {} ({})",
                        col, split_len, first_col, expect_len
                    )));
                }
            }
        }

        if let Some(expected) = header.library_type.strand_count() {
            if guide.sgrna_seqs.len() != expected {
                return Err(lib_err(format!(
                    "'sgrna_seqs' column elements ({}) mismatch vs rule for '##library-type: {}' ({}), data row {}",
                    guide.sgrna_seqs.len(),
                    header.library_type.as_str(),
                    expected,
                    line_no + 1
                )));
            }
        }

        for seq in &guide.sgrna_seqs {
            if !ACGT_ONLY.is_match(seq) {
                return Err(lib_err(format!(
                    "'sgrna_seqs' can only contain ACGT and the separator character '|'.  Got '{}' after splitting (data row {})",
                    seq,
                    line_no + 1
                )));
            }
        }

        guides.push(guide);
    }

    if guides.is_empty() {
        return Err(lib_err("No guides found in library"));
    }

    if header.library_type == LibraryType::Unknown {
        match strand_no {
            Some(1) => header.library_type = LibraryType::Single,
            Some(2) => header.library_type = LibraryType::Dual,
            _ => {}
        }
    }

    Ok((header, guides))
}

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use bio::alphabets::dna::revcomp;
use serde::{Deserialize, Serialize};

/// How the aligner treats length differences between query and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryMode {
    /// Query and target must be the same length.
    Exact,
    /// Target contained within the query.
    TargetInQuery,
    /// Query contained within the target.
    QueryInTarget,
    #[default]
    All,
}

impl FromStr for BoundaryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(BoundaryMode::Exact),
            "tinq" => Ok(BoundaryMode::TargetInQuery),
            "qint" => Ok(BoundaryMode::QueryInTarget),
            "all" => Ok(BoundaryMode::All),
            _ => bail!("Unknown boundary mode '{}', choose from: all, exact, TinQ, QinT", s),
        }
    }
}

impl fmt::Display for BoundaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoundaryMode::Exact => "exact",
            BoundaryMode::TargetInQuery => "TinQ",
            BoundaryMode::QueryInTarget => "QinT",
            BoundaryMode::All => "all",
        };
        write!(f, "{}", name)
    }
}

/// One allowed edit profile, e.g. `MDI` allows a mismatch, a deletion and an insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub mismatches: u32,
    pub deletions: u32,
    pub insertions: u32,
}

impl FromStr for Rule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut rule = Rule {
            mismatches: 0,
            deletions: 0,
            insertions: 0,
        };
        for c in s.trim().chars() {
            match c.to_ascii_uppercase() {
                'M' => rule.mismatches += 1,
                'D' => rule.deletions += 1,
                'I' => rule.insertions += 1,
                _ => bail!("Invalid character '{}' in rule '{}', only M, D and I are allowed", c, s),
            }
        }
        if rule.mismatches + rule.deletions + rule.insertions == 0 {
            bail!("Empty rule");
        }
        Ok(rule)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules(Vec<Rule>);

impl Rules {
    pub fn parse<S: AsRef<str>>(rules: &[S]) -> Result<Rules> {
        let parsed = rules
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<Rule>>>()?;
        Ok(Rules(parsed))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.0.iter()
    }
}

/// A candidate placement of one query on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub target: String,
    /// Query aligned as its reverse complement.
    pub reversed: bool,
    pub score: u32,
    pub position: u32,
    pub cigar: String,
    pub edit_distance: u32,
    pub mismatches: u32,
    pub deletions: u32,
    pub insertions: u32,
    pub original_seq: String,
}

impl Hit {
    /// With no rules only edit-free hits pass; otherwise any single rule must cover the edits.
    pub fn pass_rules(&self, rules: &Rules) -> bool {
        if rules.is_empty() {
            return self.mismatches + self.deletions + self.insertions == 0;
        }
        rules.iter().any(|r| {
            self.mismatches <= r.mismatches
                && self.deletions <= r.deletions
                && self.insertions <= r.insertions
        })
    }
}

/// Results for one chunk of queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentBatch {
    pub unmapped: Vec<String>,
    /// One group of hits per mapped query, all sharing `original_seq`.
    pub mapped: Vec<Vec<Hit>>,
}

/// The alignment engine seen by the dispatcher. Shared across worker threads.
pub trait Aligner: Send + Sync {
    fn align(&self, queries: &[String]) -> Result<AlignmentBatch>;
}

/// Exact and substring matching against the target universe.
///
/// Window lookups cover exact and target-in-query placement; query-in-target falls back to a
/// scan of the targets.
pub struct ExactAligner {
    targets: Vec<String>,
    by_seq: HashMap<String, usize>,
    target_lens: Vec<usize>,
    score_min: u32,
    rev_comp: bool,
    mode: BoundaryMode,
}

impl ExactAligner {
    pub fn new(targets: Vec<String>, score_min: u32, rev_comp: bool, mode: BoundaryMode) -> ExactAligner {
        let by_seq = targets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        let mut target_lens: Vec<usize> = targets.iter().map(|t| t.len()).collect();
        target_lens.sort_unstable();
        target_lens.dedup();
        ExactAligner {
            targets,
            by_seq,
            target_lens,
            score_min,
            rev_comp,
            mode,
        }
    }

    fn hit(&self, original: &str, t_idx: usize, reversed: bool, position: usize, cigar: String, score: usize) -> Hit {
        Hit {
            target: self.targets[t_idx].clone(),
            reversed,
            score: score as u32,
            position: position as u32,
            cigar,
            edit_distance: 0,
            mismatches: 0,
            deletions: 0,
            insertions: 0,
            original_seq: original.to_string(),
        }
    }

    fn target_in_query(&self, original: &str, query: &str, reversed: bool, exact_only: bool, hits: &mut Vec<Hit>) {
        let mut seen = HashSet::new();
        for &len in &self.target_lens {
            if len > query.len() || (exact_only && len != query.len()) {
                continue;
            }
            for offset in 0..=(query.len() - len) {
                let Some(window) = query.get(offset..offset + len) else {
                    continue;
                };
                if let Some(&t_idx) = self.by_seq.get(window) {
                    if !seen.insert(t_idx) {
                        continue;
                    }
                    let right = query.len() - offset - len;
                    let mut cigar = String::new();
                    if offset > 0 {
                        cigar.push_str(&format!("{}S", offset));
                    }
                    cigar.push_str(&format!("{}M", len));
                    if right > 0 {
                        cigar.push_str(&format!("{}S", right));
                    }
                    hits.push(self.hit(original, t_idx, reversed, 0, cigar, len));
                }
            }
        }
    }

    fn query_in_target(&self, original: &str, query: &str, reversed: bool, hits: &mut Vec<Hit>) {
        for (t_idx, target) in self.targets.iter().enumerate() {
            if target.len() <= query.len() {
                continue;
            }
            if let Some(pos) = target.find(query) {
                let cigar = format!("{}M", query.len());
                hits.push(self.hit(original, t_idx, reversed, pos, cigar, query.len()));
            }
        }
    }

    fn align_one(&self, query: &str) -> Vec<Hit> {
        let mut hits = Vec::new();
        let mut orientations = vec![(query.to_string(), false)];
        if self.rev_comp {
            let rc = String::from_utf8_lossy(&revcomp(query.as_bytes())).into_owned();
            orientations.push((rc, true));
        }
        for (oriented, reversed) in &orientations {
            match self.mode {
                BoundaryMode::Exact => self.target_in_query(query, oriented, *reversed, true, &mut hits),
                BoundaryMode::TargetInQuery => self.target_in_query(query, oriented, *reversed, false, &mut hits),
                BoundaryMode::QueryInTarget => {
                    self.target_in_query(query, oriented, *reversed, true, &mut hits);
                    self.query_in_target(query, oriented, *reversed, &mut hits);
                }
                BoundaryMode::All => {
                    self.target_in_query(query, oriented, *reversed, false, &mut hits);
                    self.query_in_target(query, oriented, *reversed, &mut hits);
                }
            }
        }
        hits.retain(|h| h.score >= self.score_min);
        hits
    }
}

impl Aligner for ExactAligner {
    fn align(&self, queries: &[String]) -> Result<AlignmentBatch> {
        let mut batch = AlignmentBatch::default();
        for query in queries {
            if !query.is_ascii() {
                bail!("Query contains non-ASCII bases: {}", query.escape_debug());
            }
            let hits = self.align_one(query);
            if hits.is_empty() {
                batch.unmapped.push(query.clone());
            } else {
                batch.mapped.push(hits);
            }
        }
        Ok(batch)
    }
}

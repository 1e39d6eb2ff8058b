use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use log::{debug, info};

use crate::aligner::{AlignmentBatch, Hit, Rules};
use crate::spill;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapStatus {
    Unmapped,
    Unique,
    Multimap,
}

/// Final mapping state of one unique query sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unmapped,
    Unique(Hit),
    /// Two or more hits tied at the best rule-passing score.
    Multimap(Vec<Hit>),
}

impl Verdict {
    pub fn status(&self) -> MapStatus {
        match self {
            Verdict::Unmapped => MapStatus::Unmapped,
            Verdict::Unique(_) => MapStatus::Unique,
            Verdict::Multimap(_) => MapStatus::Multimap,
        }
    }

    pub fn hits(&self) -> &[Hit] {
        match self {
            Verdict::Unmapped => &[],
            Verdict::Unique(hit) => std::slice::from_ref(hit),
            Verdict::Multimap(hits) => hits,
        }
    }

    /// Reduce the hits of one query to its verdict.
    pub fn from_hits(hits: Vec<Hit>, rules: &Rules) -> Verdict {
        let mut best = select_best(hits, rules);
        match best.len() {
            0 => Verdict::Unmapped,
            1 => Verdict::Unique(best.remove(0)),
            _ => Verdict::Multimap(best),
        }
    }
}

/// Keep the rule-passing hits that attain the highest rule-passing score.
pub fn select_best(hits: Vec<Hit>, rules: &Rules) -> Vec<Hit> {
    let mut best: Vec<Hit> = Vec::new();
    let mut best_score = 0;
    for hit in hits {
        if !hit.pass_rules(rules) || hit.score < best_score {
            continue;
        }
        if hit.score > best_score {
            best.clear();
            best_score = hit.score;
        }
        best.push(hit);
    }
    best
}

/// Verdicts for every unique query plus read-weighted totals.
#[derive(Debug, Clone, Default)]
pub struct Collation {
    pub verdicts: HashMap<String, Verdict>,
    pub mapped: u64,
    pub multimap: u64,
    pub unmapped: u64,
}

impl Collation {
    pub fn verdict(&self, seq: &str) -> Option<&Verdict> {
        self.verdicts.get(seq)
    }

    fn record(&mut self, seq: String, verdict: Verdict, reads: &HashMap<String, u64>) {
        if self.verdicts.contains_key(&seq) {
            debug!("Query {} already collated, ignoring repeat", seq);
            return;
        }
        let weight = reads.get(&seq).copied().unwrap_or(0);
        match verdict.status() {
            MapStatus::Unmapped => self.unmapped += weight,
            MapStatus::Unique => self.mapped += weight,
            MapStatus::Multimap => self.multimap += weight,
        }
        self.verdicts.insert(seq, verdict);
    }

    pub fn add_batch(&mut self, batch: AlignmentBatch, reads: &HashMap<String, u64>, rules: &Rules) {
        for seq in batch.unmapped {
            self.record(seq, Verdict::Unmapped, reads);
        }
        for hits in batch.mapped {
            let Some(first) = hits.first() else {
                continue;
            };
            let seq = first.original_seq.clone();
            let verdict = Verdict::from_hits(hits, rules);
            self.record(seq, verdict, reads);
        }
    }
}

/// Reduce in-memory batches. `reads` holds the number of physical reads per unique sequence.
pub fn collate_batches<I>(batches: I, reads: &HashMap<String, u64>, rules: &Rules) -> Collation
where
    I: IntoIterator<Item = AlignmentBatch>,
{
    let mut collation = Collation::default();
    for batch in batches {
        collation.add_batch(batch, reads, rules);
    }
    collation
}

/// Read back spilled batches one file at a time and reduce them.
pub fn collate(handles: &[PathBuf], reads: &HashMap<String, u64>, rules: &Rules) -> Result<Collation> {
    let mut collation = Collation::default();
    for handle in handles {
        info!("Collating data from {}", handle.display());
        for batch in spill::read_batches(handle)? {
            collation.add_batch(batch, reads, rules);
        }
    }
    info!(
        "Unique: {}, Multimap: {}, Unmapped: {}",
        collation.mapped, collation.multimap, collation.unmapped
    );
    Ok(collation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(query: &str, target: &str, score: u32, mismatches: u32) -> Hit {
        Hit {
            target: target.to_string(),
            reversed: false,
            score,
            position: 0,
            cigar: format!("{}M", score),
            edit_distance: mismatches,
            mismatches,
            deletions: 0,
            insertions: 0,
            original_seq: query.to_string(),
        }
    }

    #[test]
    fn test_select_best_unique() {
        let hits = vec![hit("Q", "A", 18, 0), hit("Q", "B", 20, 0), hit("Q", "C", 19, 0)];
        let best = select_best(hits, &Rules::default());
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].target, "B");
    }

    #[test]
    fn test_select_best_tie_is_multimap() {
        let hits = vec![hit("Q", "A", 20, 0), hit("Q", "B", 18, 0), hit("Q", "C", 20, 0)];
        let verdict = Verdict::from_hits(hits, &Rules::default());
        assert_eq!(verdict.status(), MapStatus::Multimap);
        assert_eq!(verdict.hits().len(), 2);
    }

    #[test]
    fn test_rule_failures_never_win() {
        // the higher scoring hit fails the rules, so the lower one is the unique winner
        let hits = vec![hit("Q", "A", 20, 2), hit("Q", "B", 18, 0)];
        let verdict = Verdict::from_hits(hits.clone(), &Rules::default());
        assert_eq!(verdict, Verdict::Unique(hits[1].clone()));

        let rules = Rules::parse(&["MM"]).unwrap();
        let verdict = Verdict::from_hits(hits.clone(), &rules);
        assert_eq!(verdict, Verdict::Unique(hits[0].clone()));

        let verdict = Verdict::from_hits(vec![hit("Q", "A", 20, 1)], &Rules::default());
        assert_eq!(verdict, Verdict::Unmapped);
    }

    #[test]
    fn test_collation_totals_weighted_by_reads() {
        let reads: HashMap<String, u64> = [("U", 3), ("M", 2), ("N", 5), ("F", 1)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let batches = vec![
            AlignmentBatch {
                unmapped: vec!["N".to_string()],
                mapped: vec![vec![hit("U", "A", 10, 0)]],
            },
            AlignmentBatch {
                unmapped: vec![],
                mapped: vec![
                    vec![hit("M", "A", 10, 0), hit("M", "B", 10, 0)],
                    vec![hit("F", "A", 10, 3)],
                ],
            },
        ];
        let collation = collate_batches(batches.clone(), &reads, &Rules::default());
        assert_eq!(collation.mapped, 3);
        assert_eq!(collation.multimap, 2);
        assert_eq!(collation.unmapped, 6);
        assert_eq!(collation.verdicts.len(), 4);
        assert_eq!(collation.verdict("F"), Some(&Verdict::Unmapped));

        // batch order does not change verdicts
        let reversed: Vec<AlignmentBatch> = batches.into_iter().rev().collect();
        let again = collate_batches(reversed, &reads, &Rules::default());
        assert_eq!(again.verdicts, collation.verdicts);
        assert_eq!(again.mapped, collation.mapped);
    }

    #[test]
    fn test_collate_from_spill() {
        let dir = tempfile::tempdir().unwrap();
        let reads: HashMap<String, u64> = [("U".to_string(), 4)].into_iter().collect();
        let batch = AlignmentBatch {
            unmapped: vec![],
            mapped: vec![vec![hit("U", "A", 10, 0)]],
        };
        let path = spill::write_batches(dir.path(), 1, &[batch]).unwrap();
        let first = collate(&[path.clone()], &reads, &Rules::default()).unwrap();
        let second = collate(&[path], &reads, &Rules::default()).unwrap();
        assert_eq!(first.mapped, 4);
        assert_eq!(first.verdicts, second.verdicts);
    }
}

use std::collections::HashMap;

use log::{debug, info};

use crate::library::Guide;

/// Links each distinct guide component sequence back to the library position(s) holding it.
///
/// `targets` is the sorted, de-duplicated sequence list handed to the aligner so that its input
/// order does not depend on library row order.
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    target_to_guides: HashMap<String, Vec<usize>>,
    targets: Vec<String>,
}

impl TargetIndex {
    /// Build the index, flagging colliding guides as non-unique when `single` is set.
    ///
    /// Only single-guide libraries get duplicate detection: there a shared sequence means two
    /// guides can never be told apart, whereas dual-guide libraries legitimately reuse components.
    pub fn build(guides: &mut [Guide], single: bool) -> TargetIndex {
        let mut target_to_guides: HashMap<String, Vec<usize>> = HashMap::new();
        let mut total_dups = 0;

        for g_idx in 0..guides.len() {
            for s_idx in 0..guides[g_idx].sgrna_seqs.len() {
                let seq = guides[g_idx].sgrna_seqs[s_idx].clone();
                match target_to_guides.get_mut(&seq) {
                    Some(existing) => {
                        if single {
                            debug!("Guide duplicate: {}", guides[g_idx].id);
                            total_dups += 1;
                            let first = existing[0];
                            guides[g_idx].unique = false;
                            guides[first].unique = false;
                        }
                        existing.push(g_idx);
                    }
                    None => {
                        target_to_guides.insert(seq, vec![g_idx]);
                    }
                }
            }
        }

        let mut targets: Vec<String> = target_to_guides.keys().cloned().collect();
        targets.sort();

        if single {
            info!("Number of duplicate guides: {}", total_dups);
        }
        info!("Total unique guides: {}", targets.len());

        TargetIndex {
            target_to_guides,
            targets,
        }
    }

    /// Sorted distinct target sequences.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Guide indices containing `seq`, in library order. Empty when `seq` is not a target.
    pub fn lookup(&self, seq: &str) -> &[usize] {
        self.target_to_guides
            .get(seq)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, seq: &str) -> bool {
        self.target_to_guides.contains_key(seq)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn min_target_len(&self) -> usize {
        self.targets.iter().map(|t| t.len()).min().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guide(idx: usize, seqs: &[&str]) -> Guide {
        Guide {
            idx,
            id: format!("g{}", idx),
            sgrna_ids: seqs.iter().enumerate().map(|(i, _)| format!("s{}_{}", idx, i)).collect(),
            sgrna_seqs: seqs.iter().map(|s| s.to_string()).collect(),
            gene_pair_id: format!("gene{}", idx),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_duplicates_flagged() {
        let mut guides = vec![guide(0, &["AAAA"]), guide(1, &["AAAA"]), guide(2, &["CCCC"])];
        let index = TargetIndex::build(&mut guides, true);

        assert_eq!(index.lookup("AAAA"), &[0, 1]);
        assert_eq!(index.lookup("CCCC"), &[2]);
        assert!(!guides[0].unique);
        assert!(!guides[1].unique);
        assert!(guides[2].unique);
        assert_eq!(index.targets(), &["AAAA".to_string(), "CCCC".to_string()]);
    }

    #[test]
    fn test_dual_shared_component_untouched() {
        let mut guides = vec![
            guide(0, &["AAAA", "CCCC"]),
            guide(1, &["CCCC"]),
            guide(2, &["GGGG", "TTTT"]),
        ];
        let index = TargetIndex::build(&mut guides, false);

        assert_eq!(index.lookup("CCCC"), &[0, 1]);
        assert_eq!(index.lookup("AAAA"), &[0]);
        assert_eq!(index.lookup("GGGG"), &[2]);
        assert_eq!(index.lookup("TTTT"), &[2]);
        assert!(guides.iter().all(|g| g.unique));
    }

    #[test]
    fn test_targets_sorted_and_complete() {
        let mut guides = vec![
            guide(0, &["TTTT", "GGGG"]),
            guide(1, &["CCCC", "GGGG"]),
            guide(2, &["AAAA", "TTTT"]),
        ];
        let index = TargetIndex::build(&mut guides, false);

        let mut expected: Vec<String> = guides
            .iter()
            .flat_map(|g| g.sgrna_seqs.iter().cloned())
            .collect();
        expected.sort();
        expected.dedup();
        assert_eq!(index.targets(), expected.as_slice());
        for g in &guides {
            for s in &g.sgrna_seqs {
                assert!(index.lookup(s).contains(&g.idx));
            }
        }
        assert!(index.lookup("ACGT").is_empty());
    }

    #[test]
    fn test_min_target_len() {
        let mut guides = vec![guide(0, &["AAAAAA"]), guide(1, &["CCC"])];
        let index = TargetIndex::build(&mut guides, true);
        assert_eq!(index.min_target_len(), 3);
    }
}

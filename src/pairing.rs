use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use anyhow::Result;
use log::{info, warn};

use crate::aligner::{ExactAligner, Hit};
use crate::collate::{self, Collation, MapStatus, Verdict};
use crate::config::RunConfig;
use crate::counts;
use crate::dispatch::dispatch;
use crate::error::TallyError;
use crate::library::Library;
use crate::reads::{keep_pair, parse_read_pairs, PairIter, ReadOptions};
use crate::stats::Stats;

/// Outcome of pairing the two ends of a dual-guide read.
///
/// `3p` labels mean the right end is open or multimapped, `5p` the left end. The `f`/`r` prefix is
/// the orientation of the end that did map uniquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Classification {
    Match,
    AberrantMatch,
    FMulti3p,
    FMulti5p,
    RMulti3p,
    RMulti5p,
    FOpen3p,
    FOpen5p,
    ROpen3p,
    ROpen5p,
    Swap,
    Ambiguous,
    NoMatch,
}

impl Classification {
    pub const ALL: [Classification; 13] = [
        Classification::Match,
        Classification::AberrantMatch,
        Classification::FMulti3p,
        Classification::FMulti5p,
        Classification::RMulti3p,
        Classification::RMulti5p,
        Classification::FOpen3p,
        Classification::FOpen5p,
        Classification::ROpen3p,
        Classification::ROpen5p,
        Classification::Swap,
        Classification::Ambiguous,
        Classification::NoMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Match => "match",
            Classification::AberrantMatch => "aberrant_match",
            Classification::FMulti3p => "f_multi_3p",
            Classification::FMulti5p => "f_multi_5p",
            Classification::RMulti3p => "r_multi_3p",
            Classification::RMulti5p => "r_multi_5p",
            Classification::FOpen3p => "f_open_3p",
            Classification::FOpen5p => "f_open_5p",
            Classification::ROpen3p => "r_open_3p",
            Classification::ROpen5p => "r_open_5p",
            Classification::Swap => "swap",
            Classification::Ambiguous => "ambiguous",
            Classification::NoMatch => "no_match",
        }
    }

    /// `(hit_l, hit_r, hit_type)` for the query class summary.
    pub fn summary_flags(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Classification::Match => ("Y", "Y", "MATCH"),
            Classification::Swap => ("Y", "Y", "SWAP"),
            Classification::AberrantMatch => ("Y", "Y", "ABERRANT"),
            Classification::Ambiguous => ("Y", "Y", "AMBIGUOUS"),
            Classification::FMulti3p | Classification::RMulti3p => ("Y", "M", "NO_MATCH"),
            Classification::FMulti5p | Classification::RMulti5p => ("M", "Y", "NO_MATCH"),
            Classification::FOpen3p | Classification::ROpen3p => ("Y", "N", "NO_MATCH"),
            Classification::FOpen5p | Classification::ROpen5p => ("N", "Y", "NO_MATCH"),
            Classification::NoMatch => ("N", "N", "NO_MATCH"),
        }
    }

    /// Zeroed counters for every label, so the stats always list the full taxonomy.
    pub fn empty_counts() -> BTreeMap<String, u64> {
        Classification::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), 0))
            .collect()
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two end sequences of a read pair. Many physical pairs share one signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairSignature {
    pub left: String,
    pub right: String,
}

impl PairSignature {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> PairSignature {
        PairSignature {
            left: left.into(),
            right: right.into(),
        }
    }
}

impl fmt::Display for PairSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.left, self.right)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    pub class: Classification,
    /// Resolved guide indices, only set for `Match`.
    pub guides: Option<Vec<usize>>,
    pub hit_l: Option<Hit>,
    pub hit_r: Option<Hit>,
    pub status_l: MapStatus,
    pub status_r: MapStatus,
}

impl PairOutcome {
    fn new(class: Classification, left: &Verdict, right: &Verdict) -> PairOutcome {
        PairOutcome {
            class,
            guides: None,
            hit_l: None,
            hit_r: None,
            status_l: left.status(),
            status_r: right.status(),
        }
    }

    fn with_hits(mut self, hit_l: Option<&Hit>, hit_r: Option<&Hit>) -> PairOutcome {
        self.hit_l = hit_l.cloned();
        self.hit_r = hit_r.cloned();
        self
    }

    fn with_guides(mut self, guides: &[usize]) -> PairOutcome {
        self.guides = Some(guides.to_vec());
        self
    }
}

/// Left end forward, right end reverse complemented.
fn oriented(left: &Hit, right: &Hit) -> bool {
    !left.reversed && right.reversed
}

/// Resolve a single left/right hit combination the way the both-unique branch does.
fn resolve_pair(left: &Verdict, right: &Verdict, hit_l: &Hit, hit_r: &Hit, library: &Library) -> PairOutcome {
    let forward = library.guide_by_sgrna_set(&hit_l.target, &hit_r.target);
    if !forward.is_empty() && oriented(hit_l, hit_r) {
        return PairOutcome::new(Classification::Match, left, right)
            .with_guides(forward)
            .with_hits(Some(hit_l), Some(hit_r));
    }
    if !forward.is_empty() || !library.guide_by_sgrna_set(&hit_r.target, &hit_l.target).is_empty() {
        return PairOutcome::new(Classification::AberrantMatch, left, right).with_hits(Some(hit_l), Some(hit_r));
    }
    PairOutcome::new(Classification::Swap, left, right).with_hits(Some(hit_l), Some(hit_r))
}

/// Hits on the multimapped end that form a library `(left, right)` pair with `unique` in
/// correct orientation.
fn pairing_candidates<'a>(unique: &Hit, others: &'a [Hit], unique_is_left: bool, library: &Library) -> Vec<&'a Hit> {
    others
        .iter()
        .filter(|other| {
            let (l, r) = if unique_is_left {
                (unique, *other)
            } else {
                (*other, unique)
            };
            oriented(l, r) && !library.guide_by_sgrna_set(&l.target, &r.target).is_empty()
        })
        .collect()
}

/// Classify a read pair from the verdicts of its two ends.
pub fn classify(left: &Verdict, right: &Verdict, library: &Library) -> PairOutcome {
    match (left, right) {
        (Verdict::Unique(hit_l), Verdict::Unique(hit_r)) => resolve_pair(left, right, hit_l, hit_r, library),
        (Verdict::Unmapped, Verdict::Unmapped) => PairOutcome::new(Classification::NoMatch, left, right),
        (Verdict::Multimap(hits_l), Verdict::Multimap(hits_r)) => {
            let mut candidates: BTreeMap<usize, (&Hit, &Hit)> = BTreeMap::new();
            for bl in hits_l {
                for br in hits_r {
                    if !oriented(bl, br) {
                        continue;
                    }
                    for &g_idx in library.guide_by_sgrna_set(&bl.target, &br.target) {
                        candidates.entry(g_idx).or_insert((bl, br));
                    }
                }
            }
            if candidates.len() == 1 {
                if let Some((&g_idx, &(bl, br))) = candidates.iter().next() {
                    return PairOutcome::new(Classification::Match, left, right)
                        .with_guides(&[g_idx])
                        .with_hits(Some(bl), Some(br));
                }
            }
            PairOutcome::new(Classification::Ambiguous, left, right)
        }
        (Verdict::Unique(hit_l), Verdict::Unmapped) => {
            let class = if hit_l.reversed {
                Classification::ROpen3p
            } else {
                Classification::FOpen3p
            };
            PairOutcome::new(class, left, right).with_hits(Some(hit_l), None)
        }
        (Verdict::Unmapped, Verdict::Unique(hit_r)) => {
            let class = if hit_r.reversed {
                Classification::ROpen5p
            } else {
                Classification::FOpen5p
            };
            PairOutcome::new(class, left, right).with_hits(None, Some(hit_r))
        }
        (Verdict::Unique(hit_l), Verdict::Multimap(hits_r)) => {
            let candidates = pairing_candidates(hit_l, hits_r, true, library);
            if let [hit_r] = candidates.as_slice() {
                return resolve_pair(left, right, hit_l, hit_r, library);
            }
            let class = if hit_l.reversed {
                Classification::RMulti3p
            } else {
                Classification::FMulti3p
            };
            PairOutcome::new(class, left, right).with_hits(Some(hit_l), None)
        }
        (Verdict::Multimap(hits_l), Verdict::Unique(hit_r)) => {
            let candidates = pairing_candidates(hit_r, hits_l, false, library);
            if let [hit_l] = candidates.as_slice() {
                return resolve_pair(left, right, hit_l, hit_r, library);
            }
            let class = if hit_r.reversed {
                Classification::RMulti5p
            } else {
                Classification::FMulti5p
            };
            PairOutcome::new(class, left, right).with_hits(None, Some(hit_r))
        }
        _ => PairOutcome::new(Classification::NoMatch, left, right),
    }
}

/// Put the canonical hit first, followed by the hits to other targets.
pub fn order_hits(hits: &[Hit], first: Option<&Hit>) -> Vec<Hit> {
    let Some(first) = first else {
        return Vec::new();
    };
    if hits.len() == 1 {
        return hits.to_vec();
    }
    let mut ordered = vec![first.clone()];
    ordered.extend(hits.iter().filter(|h| h.target != first.target).cloned());
    ordered
}

/// A classified signature with its ordered end hits.
#[derive(Debug, Clone)]
pub struct ClassifiedPair {
    pub outcome: PairOutcome,
    pub hits_l: Vec<Hit>,
    pub hits_r: Vec<Hit>,
}

/// Memoizes classification per pair signature for one run.
pub struct PairClassifier<'a> {
    collation: &'a Collation,
    cache: HashMap<PairSignature, ClassifiedPair>,
}

impl<'a> PairClassifier<'a> {
    pub fn new(collation: &'a Collation) -> PairClassifier<'a> {
        PairClassifier {
            collation,
            cache: HashMap::new(),
        }
    }

    /// `None` when either end has no verdict.
    pub fn classify(&mut self, sig: &PairSignature, library: &Library) -> Option<&ClassifiedPair> {
        if !self.cache.contains_key(sig) {
            let left = self.collation.verdict(&sig.left)?;
            let right = self.collation.verdict(&sig.right)?;
            let outcome = classify(left, right, library);
            let hits_l = order_hits(left.hits(), outcome.hit_l.as_ref());
            let hits_r = order_hits(right.hits(), outcome.hit_r.as_ref());
            self.cache.insert(
                sig.clone(),
                ClassifiedPair {
                    outcome,
                    hits_l,
                    hits_r,
                },
            );
        }
        self.cache.get(sig)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Reads missing from the alignment results may only be those removed by length exclusion.
#[derive(Debug, Clone, Copy)]
pub struct LengthTolerance {
    tolerated: u64,
    missing: u64,
}

impl LengthTolerance {
    pub fn new(length_excluded: Option<u64>) -> LengthTolerance {
        LengthTolerance {
            tolerated: length_excluded.unwrap_or(0),
            missing: 0,
        }
    }

    pub fn skip(&mut self, reads: u64) -> Result<(), TallyError> {
        self.missing += reads;
        if self.missing > self.tolerated {
            return Err(TallyError::LengthTolerance {
                missing: self.missing,
                tolerated: self.tolerated,
            });
        }
        Ok(())
    }

    pub fn missing(&self) -> u64 {
        self.missing
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairTypeInfo {
    pub hit_l: &'static str,
    pub hit_r: &'static str,
    pub hit_type: &'static str,
    pub count: u64,
}

impl From<Classification> for PairTypeInfo {
    fn from(class: Classification) -> Self {
        let (hit_l, hit_r, hit_type) = class.summary_flags();
        PairTypeInfo {
            hit_l,
            hit_r,
            hit_type,
            count: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PairTally {
    pub class_counts: BTreeMap<String, u64>,
    pub pair_info: HashMap<PairSignature, PairTypeInfo>,
}

fn tally_end(hits: &[Hit], status: MapStatus, stats: &mut Stats) {
    if !hits.is_empty() {
        stats.mapped_to_guide_reads += 1;
        if hits.len() > 1 {
            stats.multimap_reads += 1;
        }
    } else if status == MapStatus::Multimap {
        stats.multimap_reads += 1;
    } else {
        stats.unmapped_reads += 1;
    }
}

/// Second pass over the interleaved reads: classify every pair and count guides.
pub fn read_pairs_to_guides(
    path: &Path,
    opts: &ReadOptions,
    collation: &Collation,
    library: &mut Library,
    stats: &mut Stats,
) -> Result<PairTally> {
    let mut classifier = PairClassifier::new(collation);
    let mut tolerance = LengthTolerance::new(stats.length_excluded_reads);
    let mut tally = PairTally {
        class_counts: Classification::empty_counts(),
        pair_info: HashMap::new(),
    };

    for pair in PairIter::open(path, opts)? {
        let (left, right) = pair?;
        if !keep_pair(&left, &right, opts) {
            continue;
        }
        let sig = PairSignature::new(left.sequence, right.sequence);
        let Some(classified) = classifier.classify(&sig, library) else {
            let missing = [&sig.left, &sig.right]
                .iter()
                .filter(|s| collation.verdict(s).is_none())
                .count() as u64;
            tolerance.skip(missing)?;
            continue;
        };
        let outcome = &classified.outcome;

        if let Some(guides) = &outcome.guides {
            for &g_idx in guides {
                library.guides[g_idx].count += 1;
            }
        }
        tally_end(&classified.hits_l, outcome.status_l, stats);
        tally_end(&classified.hits_r, outcome.status_r, stats);

        let increment = match (&outcome.class, &outcome.guides) {
            (Classification::Match, Some(guides)) => guides.len() as u64,
            _ => 1,
        };
        *tally.class_counts.entry(outcome.class.as_str().to_string()).or_insert(0) += increment;

        tally
            .pair_info
            .entry(sig)
            .or_insert_with(|| PairTypeInfo::from(outcome.class))
            .count += 1;
    }

    if tolerance.missing() > 0 {
        warn!("{} length excluded reads skipped during pairing", tolerance.missing());
    }
    info!("Classified {} distinct read pairs", classifier.len());
    Ok(tally)
}

/// Count a dual-guide screen from interleaved paired reads.
pub fn run(cfg: &RunConfig) -> Result<()> {
    let mut library = Library::load(cfg.guidelib()?)?;
    if library.is_single() {
        warn!("Library is declared single-guide, dual-guide pairing will not resolve any guides");
    }
    let workspace = cfg.setup()?;
    let opts = cfg.read_options();

    let parsed = parse_read_pairs(&cfg.queries, &opts, &cfg.command)?;
    let mut stats = parsed.stats;
    let reads = parsed.reads;

    // ends may be sequenced from either strand
    let aligner = ExactAligner::new(
        library.targets().to_vec(),
        cfg.minscore,
        true,
        cfg.boundary_mode,
    );
    let queries: Vec<String> = reads.keys().cloned().collect();
    let handles = dispatch(&aligner, queries, cfg.chunks, cfg.usable_cpus(), workspace.path())?;
    let collation = collate::collate(&handles, &reads, &cfg.rules)?;

    let tally = read_pairs_to_guides(&cfg.queries, &opts, &collation, &mut library, &mut stats)?;
    stats.pair_classifications = Some(tally.class_counts);
    stats.total_guides = library.guides.len() as u64;
    stats.tally_guide_counts(library.guides.iter().map(|g| g.count), cfg.low_count);

    counts::write_guide_counts(&cfg.output_path(".counts.tsv"), &library, &stats)?;
    let stats_output = cfg.output_path(".stats.json");
    info!("Writing statistics file: {}", stats_output.display());
    stats.write_json(&stats_output)?;
    counts::write_query_classes(&cfg.output_path(".query_class.tsv.gz"), &tally.pair_info)?;
    Ok(())
}

use std::collections::HashMap;

use anyhow::Result;
use log::{info, warn};

use crate::aligner::ExactAligner;
use crate::collate::{self, Collation, Verdict};
use crate::config::RunConfig;
use crate::counts;
use crate::dispatch::dispatch;
use crate::library::Library;
use crate::reads::{parse_reads, ReadOptions};
use crate::stats::Stats;
use crate::targets::TargetIndex;

/// Sum read counts onto the target of every uniquely mapped sequence.
///
/// Multimapped and unmapped sequences never contribute. A winning target the index does not
/// know is logged and skipped.
pub fn resolve(collation: &Collation, reads: &HashMap<String, u64>, index: &TargetIndex) -> HashMap<String, u64> {
    let mut per_target: HashMap<String, u64> = HashMap::new();
    for (seq, verdict) in &collation.verdicts {
        let Verdict::Unique(hit) = verdict else {
            continue;
        };
        if !index.contains(&hit.target) {
            warn!("Hit target {} is not in the guide library, skipping {}", hit.target, seq);
            continue;
        }
        *per_target.entry(hit.target.clone()).or_insert(0) += reads.get(seq).copied().unwrap_or(0);
    }
    per_target
}

/// Set each guide's count from its (single) component sequence.
pub fn apply_counts(library: &mut Library, per_target: &HashMap<String, u64>) {
    for guide in library.guides.iter_mut() {
        guide.count = guide
            .sgrna_seqs
            .first()
            .and_then(|seq| per_target.get(seq))
            .copied()
            .unwrap_or(0);
    }
}

struct Processed {
    stats: Stats,
    reads: HashMap<String, u64>,
}

/// Parse, align, collate and resolve, leaving the counts on `library`.
fn process_reads(library: &mut Library, cfg: &RunConfig, opts: &ReadOptions, minscore: u32) -> Result<Processed> {
    let workspace = cfg.setup()?;
    let parsed = parse_reads(&cfg.queries, opts, &cfg.command)?;
    let mut stats = parsed.stats;
    let reads = parsed.reads;

    let aligner = ExactAligner::new(
        library.targets().to_vec(),
        minscore,
        opts.reverse,
        cfg.boundary_mode,
    );
    let queries: Vec<String> = reads.keys().cloned().collect();
    let handles = dispatch(&aligner, queries, cfg.chunks, cfg.usable_cpus(), workspace.path())?;
    let collation = collate::collate(&handles, &reads, &cfg.rules)?;

    let per_target = resolve(&collation, &reads, &library.index);
    apply_counts(library, &per_target);

    stats.mapped_to_guide_reads = collation.mapped;
    stats.multimap_reads = collation.multimap;
    stats.unmapped_reads = collation.unmapped;
    stats.total_guides = library.guides.len() as u64;
    Ok(Processed { stats, reads })
}

fn write_guide_outputs(library: &Library, stats: &mut Stats, cfg: &RunConfig) -> Result<()> {
    stats.tally_guide_counts(library.guides.iter().map(|g| g.count), cfg.low_count);
    let total = counts::write_guide_counts(&cfg.output_path(".counts.tsv"), library, stats)?;
    info!("Total reads assigned to guides: {}", total);
    let stats_output = cfg.output_path(".stats.json");
    info!("Writing statistics file: {}", stats_output.display());
    stats.write_json(&stats_output)
}

/// Count a single-guide screen.
pub fn run(cfg: &RunConfig) -> Result<()> {
    let mut library = Library::load(cfg.guidelib()?)?;
    if !library.is_single() {
        warn!(
            "Library type is '{}', counting by the first sgRNA sequence only",
            library.header.library_type.as_str()
        );
    }
    let opts = cfg.read_options();
    let mut processed = process_reads(&mut library, cfg, &opts, cfg.minscore)?;
    write_guide_outputs(&library, &mut processed.stats, cfg)
}

/// Minimum score for long reads, ten below the shortest target.
pub fn long_read_minscore(min_target_len: usize) -> u32 {
    min_target_len.saturating_sub(10).max(1) as u32
}

/// Count long reads, excluding reads shorter than the shortest target.
///
/// With `unique_only` the reads are only collapsed to unique sequence counts.
pub fn run_long_read(cfg: &RunConfig, unique_only: bool) -> Result<()> {
    let query_output = cfg.output_path(".query_counts.tsv.gz");
    if unique_only {
        cfg.setup()?;
        let parsed = parse_reads(&cfg.queries, &cfg.read_options(), &cfg.command)?;
        return counts::write_query_counts(&query_output, &parsed.reads, &parsed.stats);
    }

    let mut library = Library::load(cfg.guidelib()?)?;
    let min_target_len = library.min_target_len();
    let minscore = long_read_minscore(min_target_len);
    info!("Long read minimum score set to {}", minscore);
    let opts = ReadOptions {
        exclude_by_len: Some(min_target_len),
        ..cfg.read_options()
    };
    let mut processed = process_reads(&mut library, cfg, &opts, minscore)?;
    counts::write_query_counts(&query_output, &processed.reads, &processed.stats)?;
    write_guide_outputs(&library, &mut processed.stats, cfg)
}

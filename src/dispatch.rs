use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::aligner::{Aligner, AlignmentBatch};
use crate::spill;

/// Queries per worker chunk.
pub const READ_CHUNK: usize = 20_000;
/// Queries per worker chunk for long reads.
pub const READ_CHUNK_LONG: usize = 1_000;

/// Shrink `chunk_size` so that every worker gets work when the input is small.
pub fn effective_chunk_size(unique: usize, chunk_size: usize, workers: usize) -> usize {
    let workers = workers.max(1);
    let chunk_size = chunk_size.max(1);
    if unique < chunk_size * workers {
        let rescaled = unique.div_ceil(workers).max(1);
        warn!(
            "--chunks value {} rescaled to {} to utilise all CPUs",
            chunk_size, rescaled
        );
        return rescaled;
    }
    chunk_size
}

/// Align `queries` in parallel and spill each group of results to `workspace`.
///
/// The queries are shuffled with a run-local random source first. Order does not affect the
/// collated verdicts, only how evenly expensive queries are spread over workers.
pub fn dispatch<A>(aligner: &A, queries: Vec<String>, chunk_size: usize, workers: usize, workspace: &Path) -> Result<Vec<PathBuf>>
where
    A: Aligner + ?Sized,
{
    let mut rng = SmallRng::from_os_rng();
    dispatch_with_rng(aligner, queries, chunk_size, workers, workspace, &mut rng)
}

pub fn dispatch_with_rng<A, R>(
    aligner: &A,
    mut queries: Vec<String>,
    chunk_size: usize,
    workers: usize,
    workspace: &Path,
    rng: &mut R,
) -> Result<Vec<PathBuf>>
where
    A: Aligner + ?Sized,
    R: Rng + ?Sized,
{
    let workers = workers.max(1);
    if queries.is_empty() {
        return Ok(Vec::new());
    }
    let chunk_size = effective_chunk_size(queries.len(), chunk_size, workers);
    queries.shuffle(rng);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to build worker pool")?;

    let mut spilled = Vec::new();
    let mut was = Instant::now();
    for sub_chunks in partition(&queries, chunk_size, workers) {
        let results: Vec<AlignmentBatch> = if sub_chunks.len() == 1 {
            vec![aligner.align(sub_chunks[0])?]
        } else {
            pool.install(|| {
                sub_chunks
                    .par_iter()
                    .map(|chunk| aligner.align(chunk))
                    .collect::<Result<Vec<_>>>()
            })?
        };
        info!(
            "{} CPUs processed {} reads in {}s (wall)",
            workers,
            sub_chunks.iter().map(|c| c.len()).sum::<usize>(),
            was.elapsed().as_secs()
        );
        was = Instant::now();

        spilled.push(spill::write_batches(workspace, spilled.len() + 1, &results)?);
    }
    Ok(spilled)
}

/// Groups of `workers` sub-chunks, each group aligned in parallel then spilled together.
fn partition(queries: &[String], chunk_size: usize, workers: usize) -> Vec<Vec<&[String]>> {
    let workers = workers.max(1);
    let chunk_size = chunk_size.max(1);
    queries
        .chunks(chunk_size * workers)
        .map(|group| group.chunks(chunk_size).collect())
        .collect()
}

//! Benchmark of the align, spill and collate path on random guides
//! Run with: cargo bench --bench collate_throughput

use std::collections::HashMap;
use std::time::Instant;

use crisprtally::aligner::{BoundaryMode, ExactAligner, Rules};
use crisprtally::collate::collate;
use crisprtally::dispatch::dispatch_with_rng;
use rand::{rngs::SmallRng, RngCore, SeedableRng};

fn random_seq(rng: &mut SmallRng, length: usize) -> String {
    let bases = b"ACGT";
    (0..length)
        .map(|_| bases[rng.next_u32() as usize % 4] as char)
        .collect()
}

fn main() {
    let mut rng = SmallRng::seed_from_u64(42);

    let n_guides = 20_000;
    let n_reads = 200_000;
    let guides: Vec<String> = (0..n_guides).map(|_| random_seq(&mut rng, 20)).collect();

    // 90% of reads carry a guide with a short flank, the rest are noise
    let mut reads: HashMap<String, u64> = HashMap::new();
    for _ in 0..n_reads {
        let seq = if rng.next_u32() % 10 == 0 {
            random_seq(&mut rng, 24)
        } else {
            let guide = &guides[rng.next_u32() as usize % n_guides];
            format!("{}{}", guide, random_seq(&mut rng, 4))
        };
        *reads.entry(seq).or_insert(0) += 1;
    }
    println!("Guides: {}, reads: {}, unique reads: {}", n_guides, n_reads, reads.len());

    let aligner = ExactAligner::new(guides, 15, false, BoundaryMode::TargetInQuery);
    let workspace = std::env::temp_dir().join("crisprtally_bench");
    std::fs::create_dir_all(&workspace).expect("Failed to create bench workspace");

    for workers in [1, 2, 4] {
        let queries: Vec<String> = reads.keys().cloned().collect();
        let start = Instant::now();
        let handles = dispatch_with_rng(&aligner, queries, 20_000, workers, &workspace, &mut rng)
            .expect("dispatch failed");
        let aligned = start.elapsed();
        let collation = collate(&handles, &reads, &Rules::default()).expect("collate failed");
        let total = start.elapsed();
        println!(
            "workers={} align+spill={:.2?} total={:.2?} mapped={} multimap={} unmapped={}",
            workers, aligned, total, collation.mapped, collation.multimap, collation.unmapped
        );
    }

    std::fs::remove_dir_all(&workspace).ok();
}

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const LOW_COUNT_15: u64 = 15;
pub const LOW_COUNT_30: u64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LowCountUser {
    pub lt: u64,
    pub count: u64,
}

/// Read and guide statistics for one run.
///
/// Passed by reference through each stage and serialised once at the end. The merge command
/// reads these back from prior runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub command: String,
    pub version: String,
    pub sample_name: Option<String>,
    pub total_reads: u64,
    pub total_pairs: u64,
    pub vendor_failed_reads: u64,
    pub mapped_to_guide_reads: u64,
    /// Reads that map equally well to multiple guides.
    pub multimap_reads: u64,
    pub unmapped_reads: u64,
    pub length_excluded_reads: Option<u64>,
    pub reversed_reads: bool,
    pub total_guides: u64,
    pub zero_count_guides: u64,
    pub low_count_guides_lt_15: u64,
    pub low_count_guides_lt_30: u64,
    pub low_count_guides_user: Option<LowCountUser>,
    pub mean_count_per_guide: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_classifications: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<Vec<Stats>>,
}

impl Stats {
    pub fn new(command: &str, sample_name: Option<String>) -> Stats {
        Stats {
            command: command.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sample_name,
            ..Default::default()
        }
    }

    /// Add the fields that are meaningful to sum across runs of the same sample.
    pub fn add_summable(&mut self, other: &Stats) {
        self.total_reads += other.total_reads;
        self.total_pairs += other.total_pairs;
        self.vendor_failed_reads += other.vendor_failed_reads;
        self.mapped_to_guide_reads += other.mapped_to_guide_reads;
        self.multimap_reads += other.multimap_reads;
        self.unmapped_reads += other.unmapped_reads;
        if let Some(len_ex) = other.length_excluded_reads {
            *self.length_excluded_reads.get_or_insert(0) += len_ex;
        }
    }

    /// Recompute the low-count guide fields from final per-guide counts.
    pub fn tally_guide_counts<I>(&mut self, counts: I, low_count: Option<u64>)
    where
        I: IntoIterator<Item = u64>,
    {
        self.zero_count_guides = 0;
        self.low_count_guides_lt_15 = 0;
        self.low_count_guides_lt_30 = 0;
        self.low_count_guides_user = low_count.map(|lt| LowCountUser { lt, count: 0 });

        let (mut guides, mut total) = (0u64, 0u64);
        for count in counts {
            if count == 0 {
                self.zero_count_guides += 1;
            }
            if count < LOW_COUNT_15 {
                self.low_count_guides_lt_15 += 1;
            }
            if count < LOW_COUNT_30 {
                self.low_count_guides_lt_30 += 1;
            }
            if let Some(user) = self.low_count_guides_user.as_mut() {
                if count < user.lt {
                    user.count += 1;
                }
            }
            guides += 1;
            total += count;
        }
        if self.total_guides == 0 {
            self.total_guides = guides;
        }
        self.mean_count_per_guide = if self.total_guides > 0 {
            (total as f64 / self.total_guides as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Stats> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open stats file {}", path.display()))?;
        let stats = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse stats file {}", path.display()))?;
        Ok(stats)
    }
}

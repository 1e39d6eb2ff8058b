use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::aligner::AlignmentBatch;
use crate::error::TallyError;

const SPILL_LEVEL: u32 = 6;

pub fn spill_path(workspace: &Path, group: usize) -> PathBuf {
    workspace.join(format!("pre_matrix_{:05}.json.gz", group))
}

/// Persist one group's batches as gzip-compressed JSON.
pub fn write_batches(workspace: &Path, group: usize, batches: &[AlignmentBatch]) -> Result<PathBuf> {
    let path = spill_path(workspace, group);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create spill file {}", path.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::new(SPILL_LEVEL));
    serde_json::to_writer(&mut encoder, batches)?;
    encoder
        .finish()
        .with_context(|| format!("Failed to finish spill file {}", path.display()))?;
    Ok(path)
}

pub fn read_batches(path: &Path) -> Result<Vec<AlignmentBatch>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open spill file {}", path.display()))?;
    let decoder = MultiGzDecoder::new(BufReader::new(file));
    let batches = serde_json::from_reader(BufReader::new(decoder)).map_err(|e| TallyError::Spill {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::Hit;

    #[test]
    fn test_spill_preserves_batches() {
        let dir = tempfile::tempdir().unwrap();
        let batch = AlignmentBatch {
            unmapped: vec!["CCCC".to_string()],
            mapped: vec![vec![Hit {
                target: "ACGT".to_string(),
                reversed: true,
                score: 4,
                position: 0,
                cigar: "4M".to_string(),
                edit_distance: 0,
                mismatches: 0,
                deletions: 0,
                insertions: 0,
                original_seq: "ACGT".to_string(),
            }]],
        };
        let path = write_batches(dir.path(), 1, &[batch.clone()]).unwrap();
        assert!(path.ends_with("pre_matrix_00001.json.gz"));
        assert_eq!(read_batches(&path).unwrap(), vec![batch]);
    }

    #[test]
    fn test_corrupt_spill_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json.gz");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(read_batches(&path).is_err());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use tempfile::TempDir;

use crate::aligner::{BoundaryMode, Rules};
use crate::dispatch::READ_CHUNK;
use crate::reads::ReadOptions;

/// Settings shared by the counting commands.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub guidelib: Option<PathBuf>,
    pub queries: PathBuf,
    pub sample: Option<String>,
    /// Output file prefix.
    pub output: PathBuf,
    pub workspace: Option<PathBuf>,
    pub rules: Rules,
    pub low_count: Option<u64>,
    /// 0 selects all available CPUs.
    pub cpus: usize,
    pub minscore: u32,
    pub exclude_qcfail: bool,
    pub boundary_mode: BoundaryMode,
    pub chunks: usize,
    pub trimseq: usize,
    /// Command line recorded in output headers.
    pub command: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            guidelib: None,
            queries: PathBuf::new(),
            sample: None,
            output: PathBuf::new(),
            workspace: None,
            rules: Rules::default(),
            low_count: None,
            cpus: 1,
            minscore: 15,
            exclude_qcfail: false,
            boundary_mode: BoundaryMode::All,
            chunks: READ_CHUNK,
            trimseq: 0,
            command: String::new(),
        }
    }
}

impl RunConfig {
    pub fn usable_cpus(&self) -> usize {
        if self.cpus > 0 {
            self.cpus
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    /// `{output}{suffix}`, e.g. `sample1.counts.tsv`.
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.output.display(), suffix))
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            sample: self.sample.clone(),
            exclude_qcfail: self.exclude_qcfail,
            trim_len: self.trimseq,
            exclude_by_len: None,
            reverse: false,
        }
    }

    pub fn guidelib(&self) -> Result<&Path> {
        self.guidelib
            .as_deref()
            .context("A guide library (--guidelib) is required")
    }

    /// Create the output folder and the scratch workspace.
    pub fn setup(&self) -> Result<Workspace> {
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create output folder {}", parent.display()))?;
            }
        }
        Workspace::new(self.workspace.as_deref())
    }
}

/// Scratch space for intermediate files, removed on drop unless user supplied.
pub struct Workspace {
    path: PathBuf,
    _tmp: Option<TempDir>,
}

impl Workspace {
    pub fn new(requested: Option<&Path>) -> Result<Workspace> {
        match requested {
            Some(path) => {
                fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create workspace {}", path.display()))?;
                Ok(Workspace {
                    path: path.to_path_buf(),
                    _tmp: None,
                })
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("crisprtally.")
                    .tempdir()
                    .context("Failed to create temporary workspace")?;
                info!("Using temporary workspace {}", tmp.path().display());
                Ok(Workspace {
                    path: tmp.path().to_path_buf(),
                    _tmp: Some(tmp),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

use std::path::PathBuf;

/// Failures that invalidate a run's input. The binary maps these to exit code 2.
#[derive(thiserror::Error, Debug)]
pub enum TallyError {
    /// Structural problem in the guide library file.
    #[error("guide library: {0}")]
    Library(String),

    /// Structural problem in a read file.
    #[error("reads {path}: {detail}")]
    Reads { path: PathBuf, detail: String },

    /// A merge precondition was violated.
    #[error("merge: {0}")]
    Merge(String),

    /// More reads were missing from the alignment results than the parse step excluded.
    #[error("{missing} reads absent from alignment results, only {tolerated} were length excluded")]
    LengthTolerance { missing: u64, tolerated: u64 },

    /// Intermediate alignment batches could not be read back.
    #[error("spill file {path}: {detail}")]
    Spill { path: PathBuf, detail: String },
}

impl TallyError {
    pub fn reads(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        TallyError::Reads {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            TallyError::Spill { .. } => 1,
            _ => 2,
        }
    }
}

use kernel::KernelError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while turning one loaded solid into a feature vector.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("solid has no faces")]
    EmptyGeometry,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to load {}: {source}", path.display())]
    Load { path: PathBuf, source: KernelError },
    #[error("{} has no faces", path.display())]
    EmptyGeometry { path: PathBuf },
    #[error("cannot create destination {}: {source}", path.display())]
    Destination { path: PathBuf, source: io::Error },
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("report {}: {source}", path.display())]
    Report { path: PathBuf, source: csv::Error },
}

impl AnalysisError {
    pub(crate) fn from_feature(path: PathBuf, err: FeatureError) -> Self {
        match err {
            FeatureError::Kernel(source) => AnalysisError::Load { path, source },
            FeatureError::EmptyGeometry => AnalysisError::EmptyGeometry { path },
        }
    }
}

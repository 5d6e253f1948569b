//! Stage-tagged error taxonomy for the import pipeline.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::contract::ClientError;
use crate::pipeline::ImportedImage;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Import,
    Poll,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Upload => "upload",
            Stage::Import => "import",
            Stage::Poll => "poll",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Failure of a single stage, with the context of what was being attempted.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("bucket {bucket:?} does not exist")]
    NotFound { bucket: String },

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to upload {} to {bucket}/{key}: {source}", .path.display())]
    Upload {
        path: PathBuf,
        bucket: String,
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to import image {image_name:?} from {bucket}/{key}: {source}")]
    Import {
        image_name: String,
        bucket: String,
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("image {image_id:?} import failed: provider reports it unavailable")]
    Unavailable { image_id: String },

    #[error("timed out after {waited:?} waiting for image {image_id:?} ({attempts} status checks)")]
    TimedOut {
        image_id: String,
        attempts: u32,
        waited: Duration,
    },

    /// The run was cancelled; `activity` names what was in progress or about to start.
    #[error("cancelled after {waited:?} while {activity}")]
    Cancelled { activity: String, waited: Duration },

    #[error("failed to delete {bucket}/{key}: {source}")]
    Delete {
        bucket: String,
        key: String,
        #[source]
        source: ClientError,
    },
}

/// Error returned by [`crate::pipeline::run_import`].
///
/// `image_id` is set whenever the provider had already assigned one, so operators can
/// find orphaned import jobs or, after a cleanup failure, keep using the image.
#[derive(Debug, Error)]
pub struct PipelineError {
    pub stage: Stage,
    pub image_id: Option<String>,
    /// The finished image with its region and project, set when only cleanup failed.
    pub imported: Option<ImportedImage>,
    #[source]
    pub error: StageError,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed", self.stage)?;
        if let Some(image_id) = &self.image_id {
            write!(f, " for image {image_id:?}")?;
        }
        write!(f, ": {}", self.error)
    }
}

impl PipelineError {
    pub fn new(stage: Stage, image_id: Option<String>, error: StageError) -> Self {
        Self {
            stage,
            image_id,
            imported: None,
            error,
        }
    }

    pub fn with_imported(mut self, image: ImportedImage) -> Self {
        self.image_id = Some(image.image_id.clone());
        self.imported = Some(image);
        self
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    pub fn imported(&self) -> Option<&ImportedImage> {
        self.imported.as_ref()
    }

    pub fn kind(&self) -> &StageError {
        &self.error
    }
}

//! High-level pipeline: upload → import → wait → clean up.
//!
//! This module sequences the stages that turn a local disk image into a registered
//! custom image:
//!   - Resolves the target bucket and uploads the artifact with a segmented transfer
//!   - Submits exactly one import request using the uploaded object's URL
//!   - Polls the resulting image until it is available, unavailable, or the deadline passes
//!   - Deletes the uploaded object unless `skip_clean` is set
//!
//! # Error Handling
//! Upload, import and poll failures abort the run immediately and return a
//! [`PipelineError`] tagged with the stage. Cancellation is reported the same way; once
//! the token fires no new stage is started, so no import is submitted after a cancel. Once the provider has assigned an image id it
//! is carried on every later error. A cleanup failure is still an error, but the image
//! it refers to is valid.
//!
//! # Callable From
//! - The CLI crate, with the concrete UCloud client
//! - Integration tests, with `MockCloudClient`

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifact::ArtifactRef;
use crate::bucket;
use crate::cleanup;
use crate::config::ImportConfig;
use crate::contract::CloudClient;
use crate::error::{PipelineError, Stage, StageError};
use crate::import;
use crate::poll;
use crate::retry::RetryPolicy;
use crate::upload;

pub const BUILDER_ID: &str = "ucloud.post-processor.image-import";

/// A registered image and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedImage {
    pub image_id: String,
    pub project_id: String,
    pub region: String,
}

/// Result of a successful run, with the client handle for chaining further steps.
pub struct ImportArtifact<C: ?Sized> {
    pub images: Vec<ImportedImage>,
    pub builder_id: &'static str,
    pub client: Arc<C>,
}

impl<C: ?Sized> ImportArtifact<C> {
    /// `region:image_id` pairs, comma separated.
    pub fn id(&self) -> String {
        self.images
            .iter()
            .map(|image| format!("{}:{}", image.region, image.image_id))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<C: ?Sized> fmt::Debug for ImportArtifact<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportArtifact")
            .field("images", &self.images)
            .field("builder_id", &self.builder_id)
            .finish_non_exhaustive()
    }
}

impl<C: ?Sized> fmt::Display for ImportArtifact<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "UCloud images were created:")?;
        for image in &self.images {
            writeln!(
                f,
                "{} (project: {}): {}",
                image.region, image.project_id, image.image_id
            )?;
        }
        Ok(())
    }
}

fn cancelled(stage: Stage, activity: String, started: Instant) -> PipelineError {
    warn!(%stage, activity = %activity, "[IMPORT] Cancelled");
    PipelineError::new(
        stage,
        None,
        StageError::Cancelled {
            activity,
            waited: started.elapsed(),
        },
    )
}

/// Run the whole import for one artifact.
///
/// `cancel` is honoured at every stage: before the upload starts, during the upload,
/// before the import is submitted and while waiting for the image.
pub async fn run_import<C>(
    config: &ImportConfig,
    artifact: &ArtifactRef,
    client: Arc<C>,
    cancel: &CancellationToken,
) -> Result<ImportArtifact<C>, PipelineError>
where
    C: CloudClient + ?Sized,
{
    let key = config.object_key.as_str();
    let started = Instant::now();
    info!(
        bucket = %config.bucket,
        key,
        artifact = %artifact.path().display(),
        format = %artifact.format(),
        "[IMPORT] Starting image import pipeline"
    );

    // --- Step 1: Upload ---
    let uploading = format!("uploading {} to {}/{key}", artifact.path().display(), config.bucket);
    if cancel.is_cancelled() {
        return Err(cancelled(Stage::Upload, uploading, started));
    }
    let upload = async {
        let bucket_meta = bucket::resolve(client.as_ref(), &config.bucket).await?;
        let uploaded =
            upload::upload_artifact(client.as_ref(), &bucket_meta, key, artifact.path()).await?;
        Ok::<_, StageError>((bucket_meta, uploaded))
    };
    let (bucket_meta, uploaded) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cancelled(Stage::Upload, uploading, started)),
        res = upload => res.map_err(|e| PipelineError::new(Stage::Upload, None, e))?,
    };
    info!(key = %uploaded.key, visibility = ?uploaded.visibility, "[IMPORT] Upload stage complete");

    // --- Step 2: Import ---
    if cancel.is_cancelled() {
        let importing = format!("submitting import of {}/{key}", config.bucket);
        return Err(cancelled(Stage::Import, importing, started));
    }
    let mut job = import::request_import(
        client.as_ref(),
        &uploaded.url,
        &config.image,
        &bucket_meta,
        &uploaded.key,
    )
    .await
    .map_err(|e| PipelineError::new(Stage::Import, None, e))?;
    let image_id = job.image_id().to_string();

    // --- Step 3: Wait ---
    let policy = RetryPolicy::with_deadline(config.wait_image_ready_timeout);
    if let Err(e) = poll::wait_until_ready(client.as_ref(), &mut job, &policy, cancel).await {
        error!(image_id = %image_id, error = %e, "[IMPORT][ERROR] Image did not become ready");
        return Err(PipelineError::new(Stage::Poll, Some(image_id), e));
    }
    info!(
        image_id = %image_id,
        region = %config.region,
        checks = job.checks(),
        "[IMPORT] Image import complete"
    );
    let image = ImportedImage {
        image_id,
        project_id: config.project_id.clone(),
        region: config.region.clone(),
    };

    // --- Step 4: Clean up ---
    if config.skip_clean {
        info!(bucket = %config.bucket, key, "[IMPORT] Keeping uploaded object (skip_clean)");
    } else if let Err(e) = cleanup::delete_uploaded(client.as_ref(), &bucket_meta, key).await {
        error!(image_id = %image.image_id, error = %e, "[IMPORT][ERROR] Cleanup failed; image is still usable");
        return Err(PipelineError::new(Stage::Cleanup, None, e).with_imported(image));
    }

    Ok(ImportArtifact {
        images: vec![image],
        builder_id: BUILDER_ID,
        client,
    })
}

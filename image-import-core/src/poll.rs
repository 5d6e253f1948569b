//! Readiness polling for an import job.
//!
//! The job starts `Pending` as soon as the provider assigns an image id. Each poll
//! fetches the image status:
//! - `Available` ends the job successfully,
//! - `Unavailable` ends it with a failure, without another poll,
//! - any other status, or a failed status query, keeps it pending until the deadline.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contract::{CloudClient, ImageStatus};
use crate::error::StageError;
use crate::retry::{retry_until, Attempt, RetryError, RetryPolicy};

/// One provider-side import operation. Only the status fields change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    image_id: String,
    status: ImageStatus,
    last_checked: Option<DateTime<Utc>>,
    checks: u32,
}

impl ImportJob {
    pub fn new(image_id: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            status: ImageStatus::Pending,
            last_checked: None,
            checks: 0,
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn status(&self) -> &ImageStatus {
        &self.status
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked
    }

    /// Number of status queries issued so far.
    pub fn checks(&self) -> u32 {
        self.checks
    }

    fn record(&mut self, status: ImageStatus, checks: u32) {
        self.status = status;
        self.checks = checks;
        self.last_checked = Some(Utc::now());
    }
}

/// Poll `job` until the image is available, unavailable, the policy's deadline passes,
/// or `cancel` fires.
pub async fn wait_until_ready<C>(
    client: &C,
    job: &mut ImportJob,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), StageError>
where
    C: CloudClient + ?Sized,
{
    let image_id = job.image_id.clone();
    let id = image_id.as_str();
    info!(
        image_id = id,
        deadline_secs = policy.deadline.as_secs(),
        "Waiting for image import"
    );

    let outcome = retry_until(policy, cancel, move |attempt| async move {
        match client.describe_image(id).await {
            Ok(ImageStatus::Available) => Attempt::Done(ImageStatus::Available),
            Ok(ImageStatus::Unavailable) => Attempt::Fail(ImageStatus::Unavailable),
            Ok(status) => {
                debug!(image_id = id, attempt, ?status, "Image not ready yet");
                Attempt::Retry
            }
            Err(e) => {
                warn!(image_id = id, attempt, error = %e, "Image status query failed, will retry");
                Attempt::Retry
            }
        }
    })
    .await;

    match outcome {
        Ok(done) => {
            job.record(done.value, done.attempts);
            info!(image_id = id, checks = done.attempts, elapsed = ?done.elapsed, "Image is available");
            Ok(())
        }
        Err(RetryError::Failed { error: status, attempts }) => {
            job.record(status, attempts);
            error!(image_id = id, checks = attempts, "Image import ended unavailable");
            Err(StageError::Unavailable { image_id })
        }
        Err(RetryError::TimedOut { attempts, elapsed }) => {
            job.record(ImageStatus::Pending, attempts);
            error!(image_id = id, checks = attempts, ?elapsed, "Timed out waiting for image");
            Err(StageError::TimedOut {
                image_id,
                attempts,
                waited: elapsed,
            })
        }
        Err(RetryError::Cancelled { attempts, elapsed }) => {
            job.record(ImageStatus::Pending, attempts);
            warn!(image_id = id, checks = attempts, ?elapsed, "Waiting for image cancelled");
            Err(StageError::Cancelled {
                activity: format!("waiting for image {image_id:?}"),
                waited: elapsed,
            })
        }
    }
}

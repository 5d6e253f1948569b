use tracing::{error, info};

use crate::contract::{BucketMetadata, CloudClient, Visibility};
use crate::error::StageError;

/// Look up a bucket's source domain and visibility. Read-only, single attempt.
pub async fn resolve<C>(client: &C, bucket_name: &str) -> Result<BucketMetadata, StageError>
where
    C: CloudClient + ?Sized,
{
    let records = client.describe_bucket(bucket_name).await.map_err(|e| {
        error!(bucket = bucket_name, error = %e, "Failed to describe bucket");
        StageError::Transport {
            context: format!("error on reading bucket {bucket_name:?}"),
            source: e,
        }
    })?;

    let Some(record) = records.into_iter().next() else {
        error!(bucket = bucket_name, "Bucket does not exist");
        return Err(StageError::NotFound {
            bucket: bucket_name.to_string(),
        });
    };

    let Some(domain) = record.domains.into_iter().next() else {
        error!(bucket = bucket_name, "Bucket has no source domain");
        return Err(StageError::Transport {
            context: format!("error on reading bucket {bucket_name:?}"),
            source: "bucket has no source domain".into(),
        });
    };

    let visibility = Visibility::from_bucket_type(&record.bucket_type);
    info!(bucket = bucket_name, domain = %domain, ?visibility, "Resolved bucket");

    Ok(BucketMetadata {
        name: bucket_name.to_string(),
        domain,
        visibility,
    })
}

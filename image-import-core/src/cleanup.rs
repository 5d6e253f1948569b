use tracing::{error, info};

use crate::contract::{BucketMetadata, CloudClient};
use crate::error::StageError;

/// Remove the temporary object the import was fed from.
pub async fn delete_uploaded<C>(
    client: &C,
    bucket: &BucketMetadata,
    key: &str,
) -> Result<(), StageError>
where
    C: CloudClient + ?Sized,
{
    info!(bucket = %bucket.name, key, "Deleting import source object");
    match client.delete_object(bucket, key).await {
        Ok(()) => {
            info!(bucket = %bucket.name, key, "Import source object deleted");
            Ok(())
        }
        Err(e) => {
            error!(bucket = %bucket.name, key, error = %e, "Failed to delete import source object");
            Err(StageError::Delete {
                bucket: bucket.name.clone(),
                key: key.to_string(),
                source: e,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockCloudClient, Visibility};

    fn meta() -> BucketMetadata {
        BucketMetadata {
            name: "images".into(),
            domain: "images.cn-bj.ufileos.com".into(),
            visibility: Visibility::Public,
        }
    }

    #[tokio::test]
    async fn delete_failure_names_the_object() {
        let mut client = MockCloudClient::new();
        client
            .expect_delete_object()
            .times(1)
            .returning(|_, _| Err("access denied".into()));

        let err = delete_uploaded(&client, &meta(), "a.raw").await.unwrap_err();
        assert_eq!(err.to_string(), "failed to delete images/a.raw: access denied");
    }

    #[tokio::test]
    async fn delete_success() {
        let mut client = MockCloudClient::new();
        client
            .expect_delete_object()
            .withf(|b, key| b.name == "images" && key == "a.raw")
            .times(1)
            .returning(|_, _| Ok(()));

        delete_uploaded(&client, &meta(), "a.raw")
            .await
            .expect("delete succeeds");
    }
}

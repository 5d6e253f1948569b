//! Artifact upload and retrieval URL resolution.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use crate::bucket;
use crate::contract::{BucketMetadata, CloudClient, Visibility};
use crate::error::StageError;

/// Validity of signed URLs handed to the importer. Must outlast the import itself.
pub const SIGNED_URL_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// The uploaded object and the URL the provider will fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,
    pub url: String,
    pub visibility: Visibility,
}

/// Upload `source` to `key` in `bucket`, then issue a URL for it.
///
/// The bucket's visibility is looked up again after the transfer, so the URL matches the
/// bucket as it is when the import starts: private buckets get a signed URL valid for
/// [`SIGNED_URL_VALIDITY`], public buckets a plain URL.
pub async fn upload_artifact<C>(
    client: &C,
    bucket: &BucketMetadata,
    key: &str,
    source: &Path,
) -> Result<UploadResult, StageError>
where
    C: CloudClient + ?Sized,
{
    info!(
        source = %source.display(),
        bucket = %bucket.name,
        key,
        "Uploading image file"
    );

    if let Err(e) = client.upload_object(bucket, key, source).await {
        error!(source = %source.display(), bucket = %bucket.name, key, error = %e, "Upload failed");
        return Err(StageError::Upload {
            path: source.to_path_buf(),
            bucket: bucket.name.clone(),
            key: key.to_string(),
            source: e,
        });
    }
    info!(bucket = %bucket.name, key, "Image file uploaded");

    let current = bucket::resolve(client, &bucket.name).await?;
    let url = match current.visibility {
        Visibility::Private => client.signed_url(&current, key, SIGNED_URL_VALIDITY),
        Visibility::Public => client.public_url(&current, key),
    };

    Ok(UploadResult {
        key: key.to_string(),
        url,
        visibility: current.visibility,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{BucketRecord, MockCloudClient};
    use mockall::predicate::eq;
    use std::path::PathBuf;

    fn meta(visibility: Visibility) -> BucketMetadata {
        BucketMetadata {
            name: "images".into(),
            domain: "images.cn-bj.ufileos.com".into(),
            visibility,
        }
    }

    fn describe_as(client: &mut MockCloudClient, bucket_type: &'static str) {
        client.expect_describe_bucket().returning(move |name| {
            Ok(vec![BucketRecord {
                bucket_name: name.to_string(),
                domains: vec!["images.cn-bj.ufileos.com".into()],
                bucket_type: bucket_type.into(),
            }])
        });
    }

    #[tokio::test]
    async fn private_bucket_gets_day_long_signed_url() {
        let mut client = MockCloudClient::new();
        client.expect_upload_object().times(1).returning(|_, _, _| Ok(()));
        describe_as(&mut client, "private");
        client
            .expect_signed_url()
            .withf(|_, key, expires_in| key == "a.raw" && *expires_in == Duration::from_secs(86400))
            .times(1)
            .returning(|_, key, _| format!("http://signed/{key}?Expires=1"));
        client.expect_public_url().never();

        let res = upload_artifact(&client, &meta(Visibility::Private), "a.raw", Path::new("/tmp/a.raw"))
            .await
            .expect("upload succeeds");
        assert_eq!(res.visibility, Visibility::Private);
        assert_eq!(res.url, "http://signed/a.raw?Expires=1");
    }

    #[tokio::test]
    async fn public_bucket_gets_plain_url() {
        let mut client = MockCloudClient::new();
        client.expect_upload_object().times(1).returning(|_, _, _| Ok(()));
        describe_as(&mut client, "public");
        client
            .expect_public_url()
            .times(1)
            .returning(|b, key| format!("http://{}/{key}", b.domain));
        client.expect_signed_url().never();

        let res = upload_artifact(&client, &meta(Visibility::Public), "a.vhd", Path::new("/tmp/a.vhd"))
            .await
            .expect("upload succeeds");
        assert_eq!(res.url, "http://images.cn-bj.ufileos.com/a.vhd");
        assert!(!res.url.contains("Expires"));
    }

    #[tokio::test]
    async fn visibility_is_taken_from_the_fresh_lookup() {
        let mut client = MockCloudClient::new();
        client.expect_upload_object().returning(|_, _, _| Ok(()));
        describe_as(&mut client, "private");
        client
            .expect_signed_url()
            .times(1)
            .returning(|_, _, _| "http://signed".into());

        // Resolved as public before the upload, private by the time it finished.
        let res = upload_artifact(&client, &meta(Visibility::Public), "k", Path::new("/tmp/k"))
            .await
            .expect("upload succeeds");
        assert_eq!(res.visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn transfer_failure_is_upload_error_with_diagnostics() {
        let mut client = MockCloudClient::new();
        client
            .expect_upload_object()
            .with(eq(meta(Visibility::Public)), eq("a.raw"), eq(PathBuf::from("/tmp/a.raw")))
            .times(1)
            .returning(|_, _, _| Err("part 3 rejected: RetCode 171, dump: {..}".into()));
        client.expect_describe_bucket().never();

        let err = upload_artifact(&client, &meta(Visibility::Public), "a.raw", Path::new("/tmp/a.raw"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Upload { .. }));
        let msg = err.to_string();
        assert!(msg.contains("images/a.raw"), "{msg}");
        assert!(msg.contains("RetCode 171"), "{msg}");
    }
}

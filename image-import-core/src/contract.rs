//! # contract: the cloud API surface the import pipeline consumes
//!
//! This module defines a single trait ([`CloudClient`]) plus the plain data types that
//! cross it. The pipeline never talks to the network directly; everything it needs from
//! the provider (bucket metadata, segmented object upload, URL issuance, object deletion,
//! image import and image status) goes through this trait.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`, so tests drive the whole pipeline through
//!   `MockCloudClient` without a network.
//! - The mock is exported behind the `test-export-mocks` feature so dependent crates can
//!   use it from their own integration tests.
//!
//! ## Errors
//! Implementors return [`ClientError`], a boxed error. The pipeline wraps it with stage
//! context; implementors should put every diagnostic they have (HTTP status, provider
//! return code, response dump) into the error's `Display` output.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use mockall::automock;

/// Error type returned by [`CloudClient`] implementations.
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// One record of a bucket-describe call, as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRecord {
    pub bucket_name: String,
    /// Source domains of the bucket, e.g. `my-bucket.cn-bj.ufileos.com`.
    pub domains: Vec<String>,
    /// Provider bucket type (`"public"` or `"private"`).
    pub bucket_type: String,
}

/// Whether objects in a bucket are readable without a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Only the literal `private` type is private; anything else is served publicly.
    pub fn from_bucket_type(bucket_type: &str) -> Self {
        if bucket_type == "private" {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

/// Resolved bucket metadata, fetched fresh for every pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMetadata {
    pub name: String,
    pub domain: String,
    pub visibility: Visibility,
}

/// Payload of the provider's "import custom image" call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportImageRequest {
    pub image_name: String,
    pub image_description: String,
    /// URL the provider downloads the uploaded object from.
    pub ufile_url: String,
    pub os_type: String,
    pub os_name: String,
    /// Provider format token, see [`crate::import::ImageFormat::provider_token`].
    pub format: String,
}

/// Status of an imported image as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    Pending,
    Available,
    Unavailable,
    Unknown(String),
}

impl ImageStatus {
    /// Map a provider image state string onto the pipeline's status vocabulary.
    pub fn from_provider_state(state: &str) -> Self {
        match state {
            "Available" => ImageStatus::Available,
            "Unavailable" => ImageStatus::Unavailable,
            "Making" | "Copying" | "Importing" => ImageStatus::Pending,
            other => ImageStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageStatus::Available | ImageStatus::Unavailable)
    }
}

/// Everything the import pipeline needs from the cloud provider.
///
/// All calls are single-attempt: implementors must not retry internally. The only retry
/// logic in the system lives in the readiness poller.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Describe a bucket by name. An empty list means the bucket does not exist.
    async fn describe_bucket(&self, bucket_name: &str) -> Result<Vec<BucketRecord>, ClientError>;

    /// Upload a local file to `key` in `bucket` using a segmented transfer.
    ///
    /// Implementors must stream the file; artifacts can be many gigabytes.
    async fn upload_object(
        &self,
        bucket: &BucketMetadata,
        key: &str,
        source: &Path,
    ) -> Result<(), ClientError>;

    /// Issue a signed URL for a private object, valid for `expires_in` from now.
    fn signed_url(&self, bucket: &BucketMetadata, key: &str, expires_in: Duration) -> String;

    /// Direct URL for an object in a public bucket. Carries no expiry.
    fn public_url(&self, bucket: &BucketMetadata, key: &str) -> String;

    /// Delete `key` from `bucket`.
    async fn delete_object(&self, bucket: &BucketMetadata, key: &str) -> Result<(), ClientError>;

    /// Submit an import request. Returns the provider-assigned image id.
    ///
    /// Not idempotent: every successful call creates a new import job.
    async fn import_custom_image(&self, req: ImportImageRequest) -> Result<String, ClientError>;

    /// Fetch the current status of an image.
    async fn describe_image(&self, image_id: &str) -> Result<ImageStatus, ClientError>;
}

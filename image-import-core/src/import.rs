//! Import request construction and submission.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ImageSettings;
use crate::contract::{BucketMetadata, CloudClient, ImportImageRequest};
use crate::error::StageError;
use crate::poll::ImportJob;

/// Disk image formats accepted for import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Raw,
    Vhd,
    Vmdk,
    Qcow2,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 4] = [
        ImageFormat::Raw,
        ImageFormat::Vhd,
        ImageFormat::Vmdk,
        ImageFormat::Qcow2,
    ];

    /// Lower-case name, also used as the artifact file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Vhd => "vhd",
            ImageFormat::Vmdk => "vmdk",
            ImageFormat::Qcow2 => "qcow2",
        }
    }

    /// Token the provider's import API expects in its `Format` field.
    ///
    /// The provider spells qcow2 in lower case, so it is passed through unchanged.
    pub fn provider_token(self) -> &'static str {
        match self {
            ImageFormat::Raw => "RAW",
            ImageFormat::Vhd => "VHD",
            ImageFormat::Vmdk => "VMDK",
            ImageFormat::Qcow2 => "qcow2",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat(pub String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected one of 'raw', 'vhd', 'vmdk', or 'qcow2', got {:?}",
            self.0
        )
    }
}

impl std::error::Error for UnknownFormat {}

impl FromStr for ImageFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

pub fn build_import_request(url: &str, image: &ImageSettings) -> ImportImageRequest {
    ImportImageRequest {
        image_name: image.name.clone(),
        image_description: image.description.clone(),
        ufile_url: url.to_string(),
        os_type: image.os_type.clone(),
        os_name: image.os_name.clone(),
        format: image.format.provider_token().to_string(),
    }
}

/// Submit the import request exactly once and open the [`ImportJob`] it creates.
///
/// The call is not idempotent, so a rejected submission is returned as-is and never
/// retried here.
pub async fn request_import<C>(
    client: &C,
    url: &str,
    image: &ImageSettings,
    bucket: &BucketMetadata,
    key: &str,
) -> Result<ImportJob, StageError>
where
    C: CloudClient + ?Sized,
{
    let req = build_import_request(url, image);
    info!(
        image_name = %req.image_name,
        format = %req.format,
        bucket = %bucket.name,
        key,
        "Submitting custom image import"
    );

    match client.import_custom_image(req).await {
        Ok(image_id) => {
            info!(image_id = %image_id, "Import accepted");
            Ok(ImportJob::new(image_id))
        }
        Err(e) => {
            error!(error = %e, bucket = %bucket.name, key, "Import request rejected");
            Err(StageError::Import {
                image_name: image.name.clone(),
                bucket: bucket.name.clone(),
                key: key.to_string(),
                source: e,
            })
        }
    }
}

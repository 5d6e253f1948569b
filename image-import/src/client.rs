//! # UCloud client
//!
//! Concrete [`CloudClient`] for the UCloud API and UFile object storage, used by the CLI.
//!
//! - API actions (`DescribeBucket`, `ImportCustomImage`, `DescribeImage`) are signed form
//!   POSTs to `base_url`. A non-zero `RetCode` is an error carrying the full response body.
//! - Object calls go straight to the bucket's source domain and carry a UFile
//!   `Authorization` header. Uploads use the multipart protocol and stream the file in
//!   blocks of the size the service hands out.
//!
//! Every call is made once; retrying is the poller's job.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use image_import_core::contract::{
    BucketMetadata, BucketRecord, ClientError, CloudClient, ImageStatus, ImportImageRequest,
};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use url::Url;

use crate::load_config::AccessConfig;
use crate::signing;

const OCTET_STREAM: &str = "application/octet-stream";
const FINISH_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "RetCode")]
    ret_code: i64,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DescribeBucketResponse {
    #[serde(rename = "DataSet", default)]
    data_set: Vec<BucketSet>,
}

#[derive(Debug, Deserialize)]
struct BucketSet {
    #[serde(rename = "BucketName")]
    bucket_name: String,
    #[serde(rename = "Domain", default)]
    domain: BucketDomain,
    #[serde(rename = "Type", default)]
    bucket_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct BucketDomain {
    #[serde(rename = "Src", default)]
    src: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImportCustomImageResponse {
    #[serde(rename = "ImageId")]
    image_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeImageResponse {
    #[serde(rename = "ImageSet", default)]
    image_set: Vec<ImageSet>,
}

#[derive(Debug, Deserialize)]
struct ImageSet {
    #[serde(rename = "ImageId")]
    image_id: String,
    #[serde(rename = "State")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct InitiateMultipartResponse {
    #[serde(rename = "UploadId")]
    upload_id: String,
    #[serde(rename = "BlkSize")]
    blk_size: usize,
}

pub struct UCloudClient {
    http: reqwest::Client,
    access: AccessConfig,
}

impl UCloudClient {
    pub fn new(access: AccessConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ucloud-image-import/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to build HTTP client");
                e
            })?;
        tracing::info!(
            region = %access.region,
            project_id = %access.project_id,
            base_url = %access.base_url,
            public_key_set = !access.public_key.is_empty(),
            "Initialized UCloud client"
        );
        Ok(UCloudClient { http, access })
    }

    async fn call_api<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let mut form: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        form.insert("Action".to_string(), action.to_string());
        form.insert("PublicKey".to_string(), self.access.public_key.clone());
        if !self.access.project_id.is_empty() {
            form.insert("ProjectId".to_string(), self.access.project_id.clone());
        }
        let signature = signing::api_signature(&form, &self.access.private_key);
        form.insert("Signature".to_string(), signature);

        tracing::debug!(action, "Calling UCloud API");
        let resp = self
            .http
            .post(&self.access.base_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(action, error = ?e, "UCloud API request failed");
                e
            })?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::error!(action, %status, "UCloud API returned HTTP error");
            return Err(format!("{action}: HTTP {status}: {body}").into());
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| format!("{action}: unreadable response ({e}): {body}"))?;
        if envelope.ret_code != 0 {
            tracing::error!(
                action,
                ret_code = envelope.ret_code,
                message = %envelope.message,
                "UCloud API returned an error code"
            );
            return Err(format!(
                "{action}: RetCode {}: {}: {body}",
                envelope.ret_code, envelope.message
            )
            .into());
        }
        serde_json::from_str(&body)
            .map_err(|e| format!("{action}: unexpected response shape ({e}): {body}").into())
    }

    /// Signed URL for `key` that stops working at the unix time `expires`.
    pub fn signed_url_expiring_at(&self, bucket: &BucketMetadata, key: &str, expires: i64) -> String {
        let expires = expires.to_string();
        let sts = signing::ufile_string_to_sign("GET", "", "", &expires, &bucket.name, key);
        let signature = signing::ufile_signature(&self.access.private_key, &sts);
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("UCloudPublicKey", &self.access.public_key)
            .append_pair("Signature", &signature)
            .append_pair("Expires", &expires)
            .finish();
        format!("{}?{query}", self.public_url(bucket, key))
    }

    /// Object URL with every `/`-separated segment of `key` percent-encoded.
    fn object_url(&self, bucket: &BucketMetadata, key: &str) -> Result<Url, ClientError> {
        let origin = format!("{}://{}", self.access.ufile_scheme, bucket.domain);
        let mut url =
            Url::parse(&origin).map_err(|e| format!("invalid bucket domain {origin:?}: {e}"))?;
        url.path_segments_mut()
            .map_err(|()| format!("bucket domain {origin:?} cannot carry a path"))?
            .clear()
            .extend(key.split('/'));
        Ok(url)
    }

    fn ufile_request(
        &self,
        method: Method,
        url: Url,
        bucket: &BucketMetadata,
        key: &str,
        content_type: &str,
    ) -> RequestBuilder {
        let sts =
            signing::ufile_string_to_sign(method.as_str(), "", content_type, "", &bucket.name, key);
        let auth =
            signing::ufile_authorization(&self.access.public_key, &self.access.private_key, &sts);
        let mut req = self
            .http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, auth);
        if !content_type.is_empty() {
            req = req.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        req
    }

    async fn initiate_multipart(
        &self,
        bucket: &BucketMetadata,
        key: &str,
    ) -> Result<InitiateMultipartResponse, ClientError> {
        let mut url = self.object_url(bucket, key)?;
        url.set_query(Some("uploads"));
        let resp = self
            .ufile_request(Method::POST, url, bucket, key, "")
            .send()
            .await?;
        let resp = ensure_success(resp, "initiate multipart upload").await?;
        let init: InitiateMultipartResponse = resp.json().await?;
        if init.blk_size == 0 {
            return Err("initiate multipart upload: service returned BlkSize 0".into());
        }
        Ok(init)
    }

    async fn upload_parts(
        &self,
        bucket: &BucketMetadata,
        key: &str,
        source: &Path,
        upload_id: &str,
        blk_size: usize,
    ) -> Result<Vec<String>, ClientError> {
        let mut file = tokio::fs::File::open(source).await.map_err(|e| {
            tracing::error!(path = %source.display(), error = ?e, "Failed to open artifact");
            format!("open {}: {e}", source.display())
        })?;
        let mut buf = vec![0u8; blk_size];
        let mut etags = Vec::new();

        loop {
            let filled = read_block(&mut file, &mut buf).await?;
            if filled == 0 && !etags.is_empty() {
                break;
            }
            let part_number = etags.len();
            let mut url = self.object_url(bucket, key)?;
            url.query_pairs_mut()
                .append_pair("uploadId", upload_id)
                .append_pair("partNumber", &part_number.to_string());
            let resp = self
                .ufile_request(Method::PUT, url, bucket, key, OCTET_STREAM)
                .body(buf[..filled].to_vec())
                .send()
                .await?;
            let resp = ensure_success(resp, "upload part").await?;
            let etag = resp
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| format!("upload part {part_number}: response has no ETag"))?
                .to_string();
            tracing::debug!(key, part_number, bytes = filled, "Uploaded part");
            etags.push(etag);
            if filled < blk_size {
                break;
            }
        }
        Ok(etags)
    }

    async fn finish_multipart(
        &self,
        bucket: &BucketMetadata,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<(), ClientError> {
        let mut url = self.object_url(bucket, key)?;
        url.query_pairs_mut().append_pair("uploadId", upload_id);
        let resp = self
            .ufile_request(Method::POST, url, bucket, key, FINISH_CONTENT_TYPE)
            .body(etags.join(","))
            .send()
            .await?;
        ensure_success(resp, "finish multipart upload").await?;
        Ok(())
    }

    async fn abort_multipart(
        &self,
        bucket: &BucketMetadata,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError> {
        let mut url = self.object_url(bucket, key)?;
        url.query_pairs_mut().append_pair("uploadId", upload_id);
        let resp = self
            .ufile_request(Method::DELETE, url, bucket, key, "")
            .send()
            .await?;
        ensure_success(resp, "abort multipart upload").await?;
        Ok(())
    }
}

async fn ensure_success(resp: Response, context: &str) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::error!(context, %status, "UFile request failed");
    Err(format!("{context}: HTTP {status}: {body}").into())
}

/// Fill `buf` from `file`, stopping early only at end of file.
async fn read_block(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl CloudClient for UCloudClient {
    async fn describe_bucket(&self, bucket_name: &str) -> Result<Vec<BucketRecord>, ClientError> {
        let resp: DescribeBucketResponse = self
            .call_api("DescribeBucket", &[("BucketName", bucket_name)])
            .await?;
        Ok(resp
            .data_set
            .into_iter()
            .map(|set| BucketRecord {
                bucket_name: set.bucket_name,
                domains: set.domain.src,
                bucket_type: set.bucket_type,
            })
            .collect())
    }

    async fn upload_object(
        &self,
        bucket: &BucketMetadata,
        key: &str,
        source: &Path,
    ) -> Result<(), ClientError> {
        let init = self.initiate_multipart(bucket, key).await?;
        tracing::info!(
            bucket = %bucket.name,
            key,
            upload_id = %init.upload_id,
            blk_size = init.blk_size,
            "Started multipart upload"
        );

        let result = match self
            .upload_parts(bucket, key, source, &init.upload_id, init.blk_size)
            .await
        {
            Ok(etags) => {
                self.finish_multipart(bucket, key, &init.upload_id, &etags)
                    .await
                    .map(|()| etags.len())
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(parts) => {
                tracing::info!(bucket = %bucket.name, key, parts, "Finished multipart upload");
                Ok(())
            }
            Err(e) => {
                tracing::error!(bucket = %bucket.name, key, error = %e, "Multipart upload failed; aborting");
                if let Err(abort_err) = self.abort_multipart(bucket, key, &init.upload_id).await {
                    tracing::warn!(
                        upload_id = %init.upload_id,
                        error = %abort_err,
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    fn signed_url(&self, bucket: &BucketMetadata, key: &str, expires_in: Duration) -> String {
        let ttl = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
        let expires = chrono::Utc::now().timestamp().saturating_add(ttl);
        self.signed_url_expiring_at(bucket, key, expires)
    }

    fn public_url(&self, bucket: &BucketMetadata, key: &str) -> String {
        match self.object_url(bucket, key) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!(bucket = %bucket.name, key, error = %e, "Cannot encode object URL");
                format!("{}://{}/{key}", self.access.ufile_scheme, bucket.domain)
            }
        }
    }

    async fn delete_object(&self, bucket: &BucketMetadata, key: &str) -> Result<(), ClientError> {
        let url = self.object_url(bucket, key)?;
        let resp = self
            .ufile_request(Method::DELETE, url, bucket, key, "")
            .send()
            .await?;
        ensure_success(resp, "delete object").await?;
        Ok(())
    }

    async fn import_custom_image(&self, req: ImportImageRequest) -> Result<String, ClientError> {
        let resp: ImportCustomImageResponse = self
            .call_api(
                "ImportCustomImage",
                &[
                    ("Region", self.access.region.as_str()),
                    ("ImageName", req.image_name.as_str()),
                    ("ImageDescription", req.image_description.as_str()),
                    ("UFileUrl", req.ufile_url.as_str()),
                    ("OsType", req.os_type.as_str()),
                    ("OsName", req.os_name.as_str()),
                    ("Format", req.format.as_str()),
                    ("Auth", "true"),
                ],
            )
            .await?;
        Ok(resp.image_id)
    }

    async fn describe_image(&self, image_id: &str) -> Result<ImageStatus, ClientError> {
        let resp: DescribeImageResponse = self
            .call_api(
                "DescribeImage",
                &[("Region", self.access.region.as_str()), ("ImageId", image_id)],
            )
            .await?;
        resp.image_set
            .into_iter()
            .find(|image| image.image_id == image_id)
            .map(|image| ImageStatus::from_provider_state(&image.state))
            .ok_or_else(|| format!("DescribeImage: image {image_id} not found").into())
    }
}

//! S3-compatible object storage Source/Destination
//!
//! The destination uploads artifacts under `prefix/id` using multipart
//! uploads sized by the configured part size, and enforces the retention
//! policy by listing, selecting and deleting. The source downloads a named
//! key as one sequential stream so bytes arrive in order at the consumer.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::retention::{select_evictions, StoredObjectRecord};
use super::{pipe_to_destination, BackupObject, Destination, Source};
use crate::crd::ObjectStoreSpec;
use crate::error::{Error, Result};

/// SSE-C algorithm used when a key is configured without one
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "AES256";

/// Default and minimal multipart part size (S3 minimum is 5 MiB)
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Region placeholder; S3-compatible endpoints ignore it but the client
/// requires one
const REGION: &str = "us-east-1";

/// Customer-supplied encryption parameters, passed through verbatim
#[derive(Clone)]
struct SseCustomerKey {
    key: String,
    algorithm: String,
}

fn build_client(conf: &ObjectStoreSpec) -> Client {
    let endpoint = if conf.endpoint.contains("://") {
        conf.endpoint.clone()
    } else if conf.use_ssl {
        format!("https://{}", conf.endpoint)
    } else {
        format!("http://{}", conf.endpoint)
    };
    let credentials = Credentials::new(
        conf.access_key.clone(),
        conf.secret_key.clone(),
        None,
        None,
        "backup-plan",
    );
    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(REGION))
        .endpoint_url(endpoint)
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();
    Client::from_conf(config)
}

fn sse_of(conf: &ObjectStoreSpec) -> Option<SseCustomerKey> {
    conf.encryption_key.as_ref().map(|key| SseCustomerKey {
        key: key.clone(),
        algorithm: conf
            .encryption_algorithm
            .clone()
            .unwrap_or_else(|| DEFAULT_ENCRYPTION_ALGORITHM.to_string()),
    })
}

/// Create the bucket if it does not exist. Already-exists answers count as
/// success so the call is idempotent.
async fn ensure_bucket(client: &Client, bucket: &str) -> Result<()> {
    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(()),
        Err(err) => {
            let service_err: CreateBucketError = err.into_service_error();
            if service_err.is_bucket_already_owned_by_you()
                || service_err.is_bucket_already_exists()
            {
                Ok(())
            } else {
                Err(Error::storage(format!(
                    "failed to ensure bucket '{}': {}",
                    bucket, service_err
                )))
            }
        }
    }
}

/// Destination uploading artifacts to a bucket under an optional prefix
pub struct S3Destination {
    client: Client,
    bucket: String,
    prefix: String,
    part_size: usize,
    sse: Option<SseCustomerKey>,
}

impl S3Destination {
    /// Connect and idempotently ensure the bucket exists
    pub async fn connect(conf: &ObjectStoreSpec, prefix: &str) -> Result<Self> {
        let client = build_client(conf);
        ensure_bucket(&client, &conf.bucket).await?;
        let part_size = conf
            .part_size
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_PART_SIZE)
            .max(DEFAULT_PART_SIZE);
        Ok(Self {
            client,
            bucket: conf.bucket.clone(),
            prefix: conf.prefix.clone().unwrap_or_else(|| prefix.to_string()),
            part_size,
            sse: sse_of(conf),
        })
    }

    fn key_for(&self, id: &str) -> String {
        if self.prefix.is_empty() {
            id.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), id)
        }
    }

    /// Prefix used for retention listings, closed with a '/' so a sibling
    /// prefix sharing the same leading text never matches. Without the
    /// separator, `default/db-nightly` would also list (and could evict)
    /// artifacts of `default/db-nightly2`.
    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix.trim_end_matches('/'))
        }
    }

    /// List every object under the prefix across all pages
    async fn list_records(&self) -> Result<Vec<StoredObjectRecord>> {
        let mut records = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.list_prefix())
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|e| Error::storage(format!("listing objects failed: {}", e)))?;
            for object in page.contents() {
                let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                    continue;
                };
                let last_modified = DateTime::<Utc>::from_timestamp(
                    modified.secs(),
                    modified.subsec_nanos(),
                )
                .unwrap_or_default();
                records.push(StoredObjectRecord {
                    key: key.to_string(),
                    last_modified,
                });
            }
        }
        Ok(records)
    }

    /// Keep only the `max` most recently modified artifacts under the
    /// prefix. Deletion is sequential; the first failure aborts the pass and
    /// leaves the set over-retained, which a retry can safely resume.
    pub async fn ensure_retention(&self, max: usize) -> Result<()> {
        if max < 1 {
            return Err(Error::config("retention must be at least 1"));
        }
        let records = self.list_records().await?;
        let evictions = select_evictions(records, max);
        if evictions.is_empty() {
            return Ok(());
        }
        info!(
            bucket = %self.bucket,
            prefix = %self.prefix,
            count = evictions.len(),
            "Evicting stale backups"
        );
        for record in &evictions {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&record.key)
                .send()
                .await
                .map_err(|e| {
                    Error::Retention(format!("failed to delete '{}': {}", record.key, e))
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for S3Destination {
    async fn store(&mut self, mut obj: BackupObject) -> Result<u64> {
        let key = self.key_for(&obj.id);
        info!(bucket = %self.bucket, key = %key, "Upload starting");

        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key);
        if let Some(sse) = &self.sse {
            create = create
                .sse_customer_algorithm(&sse.algorithm)
                .sse_customer_key(&sse.key);
        }
        let upload = create
            .send()
            .await
            .map_err(|e| Error::storage(format!("failed to start upload: {}", e)))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| Error::storage("upload started without an id"))?
            .to_string();

        match self.upload_parts(&mut obj, &key, &upload_id).await {
            Ok(written) => {
                info!(bucket = %self.bucket, key = %key, written, "Upload successful");
                Ok(written)
            }
            Err(e) => {
                // Leave no dangling multipart upload behind; best-effort.
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %abort_err, "Failed to abort upload");
                }
                Err(e)
            }
        }
    }
}

impl S3Destination {
    async fn upload_parts(
        &self,
        obj: &mut BackupObject,
        key: &str,
        upload_id: &str,
    ) -> Result<u64> {
        let mut parts = Vec::new();
        let mut written: u64 = 0;
        let mut part_number: i32 = 1;

        loop {
            let chunk = read_full_chunk(&mut obj.data, self.part_size).await?;
            let last = chunk.len() < self.part_size;
            // S3 rejects zero-byte parts unless it is the only one.
            if !chunk.is_empty() || part_number == 1 {
                written += chunk.len() as u64;
                let mut request = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(chunk));
                if let Some(sse) = &self.sse {
                    request = request
                        .sse_customer_algorithm(&sse.algorithm)
                        .sse_customer_key(&sse.key);
                }
                let response = request.send().await.map_err(|e| {
                    Error::storage(format!("failed to upload part {}: {}", part_number, e))
                })?;
                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(response.e_tag().map(str::to_string))
                        .part_number(part_number)
                        .build(),
                );
                part_number += 1;
            }
            if last {
                break;
            }
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::storage(format!("failed to complete upload: {}", e)))?;

        Ok(written)
    }
}

/// Read until `size` bytes are collected or the stream ends
async fn read_full_chunk(
    reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
    size: usize,
) -> Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size.min(DEFAULT_PART_SIZE));
    let mut buf = vec![0u8; 64 * 1024];
    while chunk.len() < size {
        let want = buf.len().min(size - chunk.len());
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        chunk.extend_from_slice(&buf[..n]);
    }
    Ok(chunk)
}

/// Source downloading one named key as a sequential stream
pub struct S3Source {
    client: Client,
    bucket: String,
    key: String,
    sse: Option<SseCustomerKey>,
}

impl S3Source {
    /// Connect and idempotently ensure the bucket exists
    pub async fn connect(conf: &ObjectStoreSpec, key: &str) -> Result<Self> {
        let client = build_client(conf);
        ensure_bucket(&client, &conf.bucket).await?;
        Ok(Self {
            client,
            bucket: conf.bucket.clone(),
            key: key.to_string(),
            sse: sse_of(conf),
        })
    }
}

#[async_trait]
impl Source for S3Source {
    async fn stream(&mut self, dst: &mut (dyn Destination + Send)) -> Result<u64> {
        let mut request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key);
        if let Some(sse) = &self.sse {
            request = request
                .sse_customer_algorithm(&sse.algorithm)
                .sse_customer_key(&sse.key);
        }
        // A single GetObject stream keeps the transfer sequential, so bytes
        // reach the consumer in strict order.
        let response = request
            .send()
            .await
            .map_err(|e| Error::storage(format!("download of '{}' failed: {}", self.key, e)))?;

        let bucket = self.bucket.clone();
        let key = self.key.clone();
        info!(bucket = %bucket, key = %key, "Download starting");
        let mut body = response.body.into_async_read();
        pipe_to_destination(key, dst, move |mut writer| async move {
            tokio::io::copy(&mut body, &mut writer).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunking_respects_requested_size() {
        let data = vec![1u8; 100];
        let mut reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
            Box::new(std::io::Cursor::new(data));
        let first = read_full_chunk(&mut *reader, 64).await.unwrap();
        assert_eq!(first.len(), 64);
        let second = read_full_chunk(&mut *reader, 64).await.unwrap();
        assert_eq!(second.len(), 36);
        let empty = read_full_chunk(&mut *reader, 64).await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn keys_are_joined_under_the_prefix() {
        let conf = ObjectStoreSpec {
            endpoint: "minio:9000".to_string(),
            bucket: "backups".to_string(),
            prefix: Some("default/db-nightly/".to_string()),
            ..Default::default()
        };
        let dst = S3Destination {
            client: build_client(&conf),
            bucket: conf.bucket.clone(),
            prefix: conf.prefix.clone().unwrap(),
            part_size: DEFAULT_PART_SIZE,
            sse: None,
        };
        assert_eq!(
            dst.key_for("backup-20260829.tgz"),
            "default/db-nightly/backup-20260829.tgz"
        );
    }

    #[test]
    fn listing_prefix_never_matches_sibling_plans() {
        let conf = ObjectStoreSpec {
            endpoint: "minio:9000".to_string(),
            bucket: "backups".to_string(),
            prefix: Some("default/db-nightly".to_string()),
            ..Default::default()
        };
        let dst = S3Destination {
            client: build_client(&conf),
            bucket: conf.bucket.clone(),
            prefix: conf.prefix.clone().unwrap(),
            part_size: DEFAULT_PART_SIZE,
            sse: None,
        };
        let listing = dst.list_prefix();
        assert!(dst.key_for("backup-20260829.tgz").starts_with(&listing));
        // A plan named db-nightly2 in the same bucket shares the leading
        // text but must never fall under this plan's retention.
        assert!(!"default/db-nightly2/backup-20260829.snap".starts_with(&listing));
    }
}

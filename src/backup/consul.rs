//! Consul Source/Destination using the snapshot HTTP API
//!
//! `GET /v1/snapshot` streams a point-in-time snapshot of the cluster and
//! `PUT /v1/snapshot` restores one. Basic auth credentials are optional.

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::{pipe_to_destination, BackupObject, Destination, Source};
use crate::error::{Error, Result};

/// Consul agent address plus optional basic auth
#[derive(Clone)]
pub struct ConsulConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConsulConfig {
    fn snapshot_url(&self) -> String {
        let base = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        };
        format!("{}/v1/snapshot", base.trim_end_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }
}

/// Source streaming a snapshot out of a Consul cluster
pub struct ConsulSource {
    config: ConsulConfig,
    name: String,
    client: reqwest::Client,
}

impl ConsulSource {
    pub fn new(config: ConsulConfig, name: impl Into<String>) -> Self {
        Self {
            config,
            name: name.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Source for ConsulSource {
    async fn stream(&mut self, dst: &mut (dyn Destination + Send)) -> Result<u64> {
        let url = self.config.snapshot_url();
        let request = self.config.authorize(self.client.get(&url));
        let response = request
            .send()
            .await
            .map_err(|e| Error::storage(format!("snapshot request to '{}' failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| Error::storage(format!("snapshot request rejected: {}", e)))?;

        info!(name = %self.name, url = %url, "Snapshot starting");
        let mut body = response.bytes_stream();
        pipe_to_destination(self.name.clone(), dst, move |mut writer| async move {
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| Error::storage(format!("snapshot stream failed: {}", e)))?
            {
                writer.write_all(&chunk).await?;
            }
            writer.shutdown().await?;
            Ok(())
        })
        .await
    }
}

/// Destination restoring a snapshot into a Consul cluster
pub struct ConsulDestination {
    config: ConsulConfig,
    client: reqwest::Client,
}

impl ConsulDestination {
    pub fn new(config: ConsulConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Destination for ConsulDestination {
    async fn store(&mut self, obj: BackupObject) -> Result<u64> {
        let url = self.config.snapshot_url();
        info!(id = %obj.id, url = %url, "Restore starting");

        // Count bytes as they flow through so the caller learns the size
        // without buffering the snapshot.
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let seen = counter.clone();
        let stream = ReaderStream::new(obj.data).inspect_ok(move |chunk| {
            seen.fetch_add(chunk.len() as u64, std::sync::atomic::Ordering::Relaxed);
        });

        let request = self
            .config
            .authorize(self.client.put(&url))
            .body(reqwest::Body::wrap_stream(stream));
        request
            .send()
            .await
            .map_err(|e| Error::storage(format!("restore request to '{}' failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| Error::storage(format!("restore request rejected: {}", e)))?;

        let written = counter.load(std::sync::atomic::Ordering::Relaxed);
        info!(id = %obj.id, written, "Restore successful");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_without_scheme_defaults_to_http() {
        let config = ConsulConfig {
            address: "consul.svc:8500".to_string(),
            username: None,
            password: None,
        };
        assert_eq!(config.snapshot_url(), "http://consul.svc:8500/v1/snapshot");
    }

    #[test]
    fn explicit_scheme_and_trailing_slash_are_respected() {
        let config = ConsulConfig {
            address: "https://consul.example.com/".to_string(),
            username: None,
            password: None,
        };
        assert_eq!(
            config.snapshot_url(),
            "https://consul.example.com/v1/snapshot"
        );
    }
}

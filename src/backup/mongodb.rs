//! MongoDB Source/Destination backed by the mongodump/mongorestore tools
//!
//! Both ends shell out to the official tools in archive mode with gzip, so
//! the artifact on the wire is a compressed archive stream. The tools must
//! be present on the PATH of the worker image.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use super::{pipe_to_destination, BackupObject, Destination, Source};
use crate::error::{Error, Result};

/// Source dumping a MongoDB deployment as a gzipped archive stream
pub struct MongoDbSource {
    uri: String,
    name: String,
}

impl MongoDbSource {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Source for MongoDbSource {
    async fn stream(&mut self, dst: &mut (dyn Destination + Send)) -> Result<u64> {
        let mut child = Command::new("mongodump")
            .arg(format!("--uri={}", self.uri))
            .arg("--archive")
            .arg("--gzip")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::storage(format!("failed to spawn mongodump: {}", e)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::storage("mongodump stdout was not captured"))?;

        info!(name = %self.name, "Dump starting");
        pipe_to_destination(self.name.clone(), dst, move |mut writer| async move {
            tokio::io::copy(&mut stdout, &mut writer).await?;
            let status = child
                .wait()
                .await
                .map_err(|e| Error::storage(format!("waiting for mongodump failed: {}", e)))?;
            if !status.success() {
                return Err(Error::storage(format!(
                    "mongodump exited with {}",
                    status
                )));
            }
            Ok(())
        })
        .await
    }
}

/// Destination restoring a gzipped archive stream into a MongoDB deployment
pub struct MongoDbDestination {
    uri: String,
}

impl MongoDbDestination {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Destination for MongoDbDestination {
    async fn store(&mut self, mut obj: BackupObject) -> Result<u64> {
        let mut child = Command::new("mongorestore")
            .arg(format!("--uri={}", self.uri))
            .arg("--archive")
            .arg("--gzip")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::storage(format!("failed to spawn mongorestore: {}", e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::storage("mongorestore stdin was not captured"))?;

        info!(id = %obj.id, "Restore starting");
        let written = tokio::io::copy(&mut obj.data, &mut stdin).await?;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::storage(format!("waiting for mongorestore failed: {}", e)))?;
        if !status.success() {
            return Err(Error::storage(format!(
                "mongorestore exited with {}",
                status
            )));
        }
        info!(id = %obj.id, written, "Restore successful");
        Ok(written)
    }
}

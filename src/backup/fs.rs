//! Filesystem Source/Destination, used as test doubles

use std::path::PathBuf;

use async_trait::async_trait;

use super::{pipe_to_destination, BackupObject, Destination, Source};
use crate::error::{Error, Result};

/// Source streaming a single file
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn stream(&mut self, dst: &mut (dyn Destination + Send)) -> Result<u64> {
        let path = self.path.clone();
        pipe_to_destination(self.name.clone(), dst, |mut writer| async move {
            let mut file = tokio::fs::File::open(&path).await?;
            tokio::io::copy(&mut file, &mut writer).await?;
            Ok(())
        })
        .await
    }
}

/// Destination writing each artifact as a file into a directory
pub struct DirDestination {
    dir: PathBuf,
}

impl DirDestination {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Destination for DirDestination {
    async fn store(&mut self, mut obj: BackupObject) -> Result<u64> {
        // Keys are used as plain filenames; refuse anything path-like.
        if obj.id.contains('/') || obj.id.contains("..") {
            return Err(Error::storage(format!("invalid artifact id '{}'", obj.id)));
        }
        let path = self.dir.join(&obj.id);
        let mut file = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(&mut obj.data, &mut file).await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::mem::{BufferDestination, BufferSource};

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"temporarycontent".to_vec();

        let mut src = BufferSource::new("artifact.tgz", data.clone());
        let mut dst = DirDestination::new(dir.path());
        let written = src.stream(&mut dst).await.unwrap();
        assert_eq!(written, data.len() as u64);

        let mut file_src = FileSource::new(dir.path().join("artifact.tgz"), "artifact.tgz");
        let mut mem_dst = BufferDestination::new();
        let read_back = file_src.stream(&mut mem_dst).await.unwrap();
        assert_eq!(read_back, data.len() as u64);
        assert_eq!(mem_dst.data.get("artifact.tgz").unwrap(), &data);
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = BufferSource::new("../escape", b"x".to_vec());
        let mut dst = DirDestination::new(dir.path());
        assert!(src.stream(&mut dst).await.is_err());
    }
}

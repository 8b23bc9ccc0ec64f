//! In-memory Source/Destination, used as test doubles

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{pipe_to_destination, BackupObject, Destination, Source};
use crate::error::Result;

/// Source producing a fixed byte buffer
pub struct BufferSource {
    name: String,
    data: Vec<u8>,
}

impl BufferSource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[async_trait]
impl Source for BufferSource {
    async fn stream(&mut self, dst: &mut (dyn Destination + Send)) -> Result<u64> {
        let data = self.data.clone();
        pipe_to_destination(self.name.clone(), dst, |mut writer| async move {
            let mut cursor = Cursor::new(data);
            tokio::io::copy(&mut cursor, &mut writer).await?;
            Ok(())
        })
        .await
    }
}

/// Destination collecting stored artifacts in a map
#[derive(Default)]
pub struct BufferDestination {
    pub data: HashMap<String, Vec<u8>>,
}

impl BufferDestination {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Destination for BufferDestination {
    async fn store(&mut self, mut obj: BackupObject) -> Result<u64> {
        let mut buf = Vec::new();
        obj.data.read_to_end(&mut buf).await?;
        let written = buf.len() as u64;
        self.data.insert(obj.id, buf);
        Ok(written)
    }
}

//! Streaming backup pipeline
//!
//! A [`Source`] produces one backup artifact as a byte stream and pushes it
//! into a [`Destination`]. The two ends are joined by a bounded in-memory
//! conduit, so peak memory is bounded by the conduit (and upload part) size,
//! never by the artifact size.

pub mod consul;
pub mod fs;
pub mod mem;
pub mod mongodb;
pub mod retention;
pub mod s3;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};

/// One backup artifact in flight. Never persisted as a structure; only the
/// id survives as the destination key, discoverable later via listing.
pub struct BackupObject {
    /// Artifact id, used verbatim as the destination key
    pub id: String,
    /// Artifact content
    pub data: Box<dyn AsyncRead + Send + Unpin>,
}

/// Consuming end of the pipeline
#[async_trait]
pub trait Destination: Send {
    /// Persist one artifact, returning the number of bytes written.
    /// Can be invoked multiple times.
    async fn store(&mut self, obj: BackupObject) -> Result<u64>;
}

/// Producing end of the pipeline
#[async_trait]
pub trait Source: Send {
    /// Stream one artifact into the destination, returning the number of
    /// bytes the destination reported written.
    async fn stream(&mut self, dst: &mut (dyn Destination + Send)) -> Result<u64>;
}

/// Conduit buffer size; bounds pipeline memory, not throughput
const CONDUIT_BUFFER: usize = 64 * 1024;

/// How long the join waits for a late producer outcome after the consumer
/// finishes. A producer error past this window is not reported.
const PRODUCER_GRACE: Duration = Duration::from_secs(1);

/// Join one producer task and one consumer call through a bounded conduit.
///
/// The producer writes into the conduit and must finish by dropping (or
/// closing) its end, which the consumer observes as end of input. If the
/// producer fails, the consumer still completes on the truncated stream; the
/// join then combines both outcomes, waiting at most [`PRODUCER_GRACE`] for
/// the producer's verdict. Best-effort: a producer wedged past the window is
/// left behind and only the consumer outcome is reported.
pub async fn pipe_to_destination<F, Fut>(
    id: String,
    dst: &mut (dyn Destination + Send),
    produce: F,
) -> Result<u64>
where
    F: FnOnce(tokio::io::DuplexStream) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (writer, reader) = tokio::io::duplex(CONDUIT_BUFFER);
    let producer = tokio::spawn(produce(writer));

    let stored = dst
        .store(BackupObject {
            id,
            data: Box::new(reader),
        })
        .await;

    let source_err = match tokio::time::timeout(PRODUCER_GRACE, producer).await {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(e))) => Some(e.to_string()),
        Ok(Err(join_err)) => Some(join_err.to_string()),
        Err(_elapsed) => None,
    };

    match (stored, source_err) {
        (Ok(written), None) => Ok(written),
        (Err(e), None) => Err(e),
        (stored, Some(source)) => Err(Error::Stream {
            source,
            destination: match stored {
                Ok(written) => format!("completed ({} bytes)", written),
                Err(e) => e.to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::mem::{BufferDestination, BufferSource};
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn round_trip_through_memory_pair() {
        let data = b"temporarycontent".to_vec();
        let mut src = BufferSource::new("key", data.clone());
        let mut dst = BufferDestination::new();
        let written = src.stream(&mut dst).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(dst.data.get("key").unwrap(), &data);
    }

    #[tokio::test]
    async fn producer_error_is_combined_into_result() {
        let mut dst = BufferDestination::new();
        let err = pipe_to_destination("broken".to_string(), &mut dst, |mut writer| async move {
            writer.write_all(b"partial").await?;
            Err(Error::storage("dump tool crashed"))
        })
        .await
        .unwrap_err();
        match err {
            Error::Stream { source, .. } => assert!(source.contains("dump tool crashed")),
            other => panic!("expected stream error, got {other}"),
        }
        // The consumer saw a truncated but readable stream.
        assert_eq!(dst.data.get("broken").unwrap(), b"partial");
    }

    #[tokio::test]
    async fn large_artifact_passes_through_bounded_conduit() {
        // Much larger than the conduit buffer to force backpressure.
        let data = vec![0x5au8; CONDUIT_BUFFER * 8 + 13];
        let mut src = BufferSource::new("big", data.clone());
        let mut dst = BufferDestination::new();
        let written = src.stream(&mut dst).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(dst.data.get("big").unwrap().len(), data.len());
    }
}

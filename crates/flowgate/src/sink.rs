//! Downstream sink adapter trait and bundled adapters
//!
//! The controller decides *when* and *how much* to forward; a [`Downstream`]
//! implementation decides *where* the bytes go. Chunks are forwarded one at a
//! time and each confirmed chunk releases its bytes from the admission ledger.

use crate::error::{FlowError, FlowResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Destination for admitted byte ranges
///
/// Implementations persist each forwarded chunk and report success or
/// failure. A failure is terminal for the owning sink.
#[async_trait]
pub trait Downstream: Send + 'static {
    /// Persist one admitted chunk
    async fn forward(&mut self, chunk: Vec<u8>) -> FlowResult<()>;
}

/// In-memory adapter that collects forwarded bytes
///
/// The collected buffer is shared, so it stays readable after the sink takes
/// ownership of the adapter. An optional per-chunk delay simulates a slow
/// target for backpressure exercises.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<u8>>>,
    delay: Option<Duration>,
}

impl MemorySink {
    /// Create an adapter that persists instantly
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter that sleeps for `delay` before confirming each chunk
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            delay: Some(delay),
        }
    }

    /// Shared handle to the collected bytes
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    /// Snapshot of everything persisted so far
    pub async fn collected(&self) -> Vec<u8> {
        self.written.lock().await.clone()
    }
}

#[async_trait]
impl Downstream for MemorySink {
    async fn forward(&mut self, chunk: Vec<u8>) -> FlowResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.written.lock().await.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Adapter that appends every forwarded chunk to a single file
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Create (or truncate) the target file
    pub async fn create(path: impl AsRef<Path>) -> FlowResult<Self> {
        let file = File::create(path).await?;
        Ok(Self { file })
    }
}

#[async_trait]
impl Downstream for FileSink {
    async fn forward(&mut self, chunk: Vec<u8>) -> FlowResult<()> {
        self.file.write_all(&chunk).await?;
        Ok(())
    }
}

/// Adapter that distributes forwarded chunks across several files in order
///
/// Chunk `k` lands in file `k % n`, circling back to the first file after the
/// last. Useful for spreading a paced byte stream over multiple targets.
#[derive(Debug)]
pub struct RoundRobinSink {
    files: Vec<File>,
    next: usize,
}

impl RoundRobinSink {
    /// Create (or truncate) every target file
    ///
    /// At least one path is required.
    pub async fn create(paths: &[impl AsRef<Path>]) -> FlowResult<Self> {
        if paths.is_empty() {
            return Err(FlowError::invalid_configuration(
                "round-robin sink needs at least one file",
            ));
        }
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(File::create(path).await?);
        }
        Ok(Self { files, next: 0 })
    }
}

#[async_trait]
impl Downstream for RoundRobinSink {
    async fn forward(&mut self, chunk: Vec<u8>) -> FlowResult<()> {
        let file = &mut self.files[self.next];
        file.write_all(&chunk).await?;
        self.next = (self.next + 1) % self.files.len();
        Ok(())
    }
}

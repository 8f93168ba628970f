//! Rate- and buffer-bounded flow-control sink
//!
//! Flowgate is a byte sink that enforces two ceilings at once:
//!
//! - **Bounded admission buffering**: at most `buffer_capacity` admitted bytes
//!   may await downstream persistence at any instant.
//! - **Windowed rate limiting**: at most `rate_ceiling` bytes may be admitted
//!   per fixed-length window.
//!
//! Writes that don't fit are queued; oversized writes are transparently
//! sliced across window and buffer boundaries. Each write's completion fires
//! exactly once, after its last byte has been admitted, and completions fire
//! strictly in submission order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       FlowController                        │
//! │                                                             │
//! │  ┌────────────┐   ┌─────────────────┐   ┌───────────────┐   │
//! │  │ WriteQueue │──▶│ AdmissionLedger │   │  RateWindow   │   │
//! │  │  (FIFO +   │   │ (buffered bytes │   │ (bytes per    │   │
//! │  │ re-insert) │   │  vs. capacity)  │   │  fixed window)│   │
//! │  └────────────┘   └─────────────────┘   └───────────────┘   │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │ admitted chunks, one at a time
//!                             ▼
//!                   ┌──────────────────┐
//!                   │    Downstream    │  MemorySink / FileSink /
//!                   │     adapter      │  RoundRobinSink / yours
//!                   └──────────────────┘
//! ```
//!
//! The controller runs as a single task owning all bookkeeping, so the drain
//! loop never races itself. Confirmed chunks release their bytes from the
//! ledger; a throttled drain resumes from a timer armed at the window
//! boundary.
//!
//! # Example
//!
//! ```rust,no_run
//! use flowgate::{FlowConfig, FlowSink, MemorySink};
//! use std::time::Duration;
//!
//! # async fn example() -> flowgate::FlowResult<()> {
//! let config = FlowConfig::new(64 * 1024, 16 * 1024, Duration::from_secs(1))?;
//! let sink = FlowSink::new(config, MemorySink::new())?;
//!
//! // Resolves once every byte has been admitted; large payloads are
//! // sliced across successive windows automatically.
//! sink.write(vec![0u8; 48 * 1024]).await?;
//!
//! sink.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod queue;
pub mod sink;
pub mod window;

// Re-export the user-facing surface.
pub use config::FlowConfig;
pub use controller::{CloseHandle, FlowSink, FlowState, FlowStats, WriteHandle};
pub use error::{FlowError, FlowResult};
pub use ledger::AdmissionLedger;
pub use queue::{WriteQueue, WriteRequest};
pub use sink::{Downstream, FileSink, MemorySink, RoundRobinSink};
pub use window::RateWindow;

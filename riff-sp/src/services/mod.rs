//! Service modules for stem separation
//!
//! - Fingerprinter: content identity of an upload
//! - CacheStore: content-addressed stem directories with LRU eviction
//! - JobOrchestrator: per-upload lifecycle and single-flight dispatch
//! - ProgressHub: client id → live WebSocket
//! - Separator / StemWriter: the compute stage and its WAV output

pub mod cache_store;
pub mod fingerprinter;
pub mod job_orchestrator;
pub mod progress_hub;
pub mod separator;
pub mod stem_writer;

pub use cache_store::{CacheError, CacheStats, CacheStore, EntrySummary};
pub use fingerprinter::Fingerprinter;
pub use job_orchestrator::{JobError, JobOrchestrator, Upload};
pub use progress_hub::{subscriber_channel, HubConfig, ProgressHub, SubscriberHandle};
pub use separator::{
    CommandSeparator, ProgressSender, SeparationContext, SeparationError, StemSeparator,
};
pub use stem_writer::{read_stem_wav, StemWriter};

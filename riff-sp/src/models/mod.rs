//! Data models for riff-sp (Stem Processor microservice)
//!
//! - Content fingerprint (cache key)
//! - Stem kinds and separated audio buffers
//! - Job lifecycle state machine

pub mod fingerprint;
pub mod job;
pub mod stems;

pub use fingerprint::Fingerprint;
pub use job::{ClientId, JobSnapshot, JobState, JobTracker, StateTransition};
pub use stems::{StemBuffer, StemKind, StemOutput, StemPaths, STEM_SAMPLE_RATE};

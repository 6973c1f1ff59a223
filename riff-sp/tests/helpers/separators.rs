//! Fake stem separators
//!
//! Deterministic stand-ins for the external tool: instant, gated (blocks until
//! the test releases it) and failing. Each counts its calls.

use riff_sp::models::{StemBuffer, StemKind, StemOutput, STEM_SAMPLE_RATE};
use riff_sp::services::{SeparationContext, SeparationError, StemSeparator};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Four one-frame stereo stems, `value` in every sample
pub fn stem_output(value: f32) -> StemOutput {
    StemKind::ALL
        .iter()
        .map(|kind| {
            (
                kind.as_str().to_string(),
                StemBuffer::new(vec![value, value], 2, STEM_SAMPLE_RATE),
            )
        })
        .collect()
}

/// Returns stems immediately
#[derive(Default)]
pub struct InstantSeparator {
    calls: AtomicUsize,
}

impl InstantSeparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StemSeparator for InstantSeparator {
    fn separate(&self, _input: &Path, ctx: &SeparationContext) -> Result<StemOutput, SeparationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.report(50.0, "Separating (fake)");
        Ok(stem_output(0.25))
    }
}

/// Blocks inside `separate` until [`release`](Self::release) is called
///
/// With `observe_cancel`, returns `Cancelled` as soon as the job's token is set.
pub struct GatedSeparator {
    calls: AtomicUsize,
    released: Mutex<bool>,
    gate: Condvar,
    observe_cancel: bool,
}

impl GatedSeparator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            released: Mutex::new(false),
            gate: Condvar::new(),
            observe_cancel: false,
        }
    }

    pub fn cancel_aware() -> Self {
        Self {
            observe_cancel: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.gate.notify_all();
    }

    /// Wait until `separate` has been entered `n` times
    pub async fn wait_started(&self, n: usize) {
        super::eventually(|| async { self.calls() >= n }).await;
    }
}

impl StemSeparator for GatedSeparator {
    fn separate(&self, _input: &Path, ctx: &SeparationContext) -> Result<StemOutput, SeparationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut released = self.released.lock().unwrap();
        let mut waited = Duration::ZERO;
        while !*released {
            if self.observe_cancel && ctx.is_cancelled() {
                return Err(SeparationError::Cancelled);
            }
            if waited > Duration::from_secs(10) {
                return Err(SeparationError::Failed("gate never released".to_string()));
            }
            let (guard, _) = self
                .gate
                .wait_timeout(released, Duration::from_millis(10))
                .unwrap();
            released = guard;
            waited += Duration::from_millis(10);
        }

        Ok(stem_output(0.5))
    }
}

/// Always fails
#[derive(Default)]
pub struct FailingSeparator {
    calls: AtomicUsize,
}

impl FailingSeparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StemSeparator for FailingSeparator {
    fn separate(&self, _input: &Path, _ctx: &SeparationContext) -> Result<StemOutput, SeparationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SeparationError::Failed("model exploded".to_string()))
    }
}

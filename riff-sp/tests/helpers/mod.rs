//! Test Helper Utilities
//!
//! Shared fixtures for riff-sp integration tests

#![allow(dead_code)]

pub mod separators;

use riff_common::events::ServerMessage;
use riff_sp::models::{ClientId, StemKind};
use riff_sp::services::{
    subscriber_channel, CacheStore, HubConfig, JobOrchestrator, ProgressHub, StemSeparator, Upload,
};
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub use separators::{stem_output, FailingSeparator, GatedSeparator, InstantSeparator};

/// Poll `condition` every 10 ms; panics after 5 s
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Small 16-bit stereo WAV; different `seed`s give different content
pub fn wav_bytes(frames: usize, seed: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / 44_100.0;
            let freq = 220.0 + seed as f32 * 10.0;
            let sample = ((t * freq * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Spool `bytes` like the intake handler does; returns the upload and its path
pub fn make_upload(dir: &Path, filename: &str, bytes: &[u8]) -> (Upload, PathBuf) {
    std::fs::create_dir_all(dir).unwrap();
    let file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".wav")
        .tempfile_in(dir)
        .unwrap();
    std::fs::write(file.path(), bytes).unwrap();
    let path = file.into_temp_path();
    let location = path.to_path_buf();
    (
        Upload {
            filename: filename.to_string(),
            path,
        },
        location,
    )
}

/// Directory holding every stem as `bytes_per_stem` bytes of `fill`
pub fn write_stem_dir(dir: &Path, bytes_per_stem: usize, fill: u8) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    for kind in StemKind::ALL {
        std::fs::write(dir.join(kind.file_name()), vec![fill; bytes_per_stem]).unwrap();
    }
    dir.to_path_buf()
}

/// Orchestrator wired to a fresh cache and hub under a temp dir
pub struct Harness {
    pub temp: TempDir,
    pub cache: CacheStore,
    pub hub: ProgressHub,
    pub orchestrator: JobOrchestrator,
}

impl Harness {
    pub fn new(separator: Arc<dyn StemSeparator>) -> Self {
        let temp = TempDir::new().unwrap();
        let cache = CacheStore::open(temp.path().join("cache"), u64::MAX).unwrap();
        let hub = ProgressHub::new(HubConfig::default());
        let orchestrator = JobOrchestrator::new(
            cache.clone(),
            hub.clone(),
            separator,
            temp.path().join("work"),
        );
        Self {
            temp,
            cache,
            hub,
            orchestrator,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.temp.path().join("uploads")
    }

    /// Subscribe under a new id and submit `bytes` as that client
    pub async fn submit_watched(
        &self,
        bytes: &[u8],
    ) -> (ClientId, mpsc::Receiver<ServerMessage>, PathBuf) {
        let client_id = uuid::Uuid::new_v4();
        let (tx, rx) = subscriber_channel();
        self.hub.register(client_id, tx).await;

        let (upload, path) = make_upload(&self.upload_dir(), "song.wav", bytes);
        self.orchestrator
            .submit_as(client_id, upload)
            .await
            .unwrap();
        (client_id, rx, path)
    }
}

/// Receive until a terminal message (inclusive); panics after 10 s
pub async fn recv_until_terminal(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for terminal event")
            .expect("subscriber queue closed");
        let terminal = message.is_terminal();
        messages.push(message);
        if terminal {
            return messages;
        }
    }
}

/// Percentages of the progress messages, in order
pub fn percents(messages: &[ServerMessage]) -> Vec<f64> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Progress(p) => Some(p.progress),
            _ => None,
        })
        .collect()
}

/// Status labels of the progress messages, in order
pub fn statuses(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Progress(p) => Some(p.status.clone()),
            _ => None,
        })
        .collect()
}

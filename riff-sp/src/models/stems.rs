//! Stem kinds and separated audio buffers

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sample rate every cached stem is written at
pub const STEM_SAMPLE_RATE: u32 = 44_100;

/// The fixed set of stems a separation produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Drums,
    Bass,
    /// Everything that is not drums, bass or vocals (guitar, keys, ...)
    Other,
    Vocals,
}

impl StemKind {
    pub const ALL: [StemKind; 4] = [
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
        StemKind::Vocals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Vocals => "vocals",
        }
    }

    /// Artifact file name inside a cache entry
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.as_str())
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StemKind {
    type Err = riff_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StemKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| riff_common::Error::InvalidInput(format!("unknown stem: {}", s)))
    }
}

/// Raw separated audio for one stem
#[derive(Debug, Clone, PartialEq)]
pub struct StemBuffer {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl StemBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Output of the compute stage: stem name → buffer
pub type StemOutput = HashMap<String, StemBuffer>;

/// Artifact paths of a complete cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemPaths {
    paths: BTreeMap<StemKind, PathBuf>,
}

impl StemPaths {
    /// Paths of every stem inside an entry directory
    pub fn for_dir(dir: &Path) -> Self {
        let paths = StemKind::ALL
            .into_iter()
            .map(|kind| (kind, dir.join(kind.file_name())))
            .collect();
        Self { paths }
    }

    pub fn get(&self, kind: StemKind) -> Option<&Path> {
        self.paths.get(&kind).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StemKind, &Path)> {
        self.paths.iter().map(|(kind, path)| (*kind, path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Stem name → path string, as sent in `complete` messages
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.paths
            .iter()
            .map(|(kind, path)| (kind.as_str().to_string(), path.display().to_string()))
            .collect()
    }
}

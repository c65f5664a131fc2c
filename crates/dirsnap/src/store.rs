//! Snapshot files.
//!
//! A snapshot file is a JSON document holding the stat records of a snapshot
//! plus some context about where and when it was taken. Files may be zstd
//! compressed; reading detects this from the magic bytes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;
use crate::path_serde;
use crate::snapshot::Snapshot;
use crate::source::StatRecord;

/// Current snapshot file format version.
pub const FORMAT_VERSION: u32 = 1;

/// The magic bytes at the start of a zstd compressed file.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default compression level for zstd (1-22, higher = better compression but slower).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 19;

/// The volume a snapshot root lives on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub dev: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub readonly: bool,
}

impl From<fs_info::VolumeInfo> for Volume {
    fn from(info: fs_info::VolumeInfo) -> Self {
        Self {
            dev: info.dev,
            fs_type: info.fs_type,
            readonly: info.readonly,
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// On-disk form of a [`Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    #[serde(with = "path_serde::option")]
    pub root: Option<PathBuf>,
    pub recursive: bool,
    /// When the snapshot was written, in milliseconds since the epoch.
    pub taken: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    #[serde(with = "path_serde::entries")]
    pub entries: BTreeMap<PathBuf, StatRecord>,
}

impl SnapshotFile {
    pub fn new(snapshot: &Snapshot) -> Self {
        Self {
            version: FORMAT_VERSION,
            root: snapshot.root().map(Path::to_path_buf),
            recursive: snapshot.is_recursive(),
            taken: Timestamp::now().as_millisecond(),
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            volume: None,
            entries: snapshot
                .entries()
                .map(|(path, stat)| (path.to_path_buf(), *stat))
                .collect(),
        }
    }

    pub fn with_volume(mut self, volume: impl Into<Volume>) -> Self {
        self.volume = Some(volume.into());
        self
    }

    /// Rebuild the snapshot, including its identity index.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_records(
            self.root.clone(),
            self.recursive,
            self.entries.iter().map(|(path, stat)| (path.clone(), *stat)),
        )
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot::from_records(self.root, self.recursive, self.entries)
    }

    /// Read a snapshot file, compressed or not.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let raw = fs::read(path)?;
        let json = if raw.starts_with(&ZSTD_MAGIC) {
            debug!(?path, "Reading compressed snapshot");
            zstd::decode_all(raw.as_slice())?
        } else {
            debug!(?path, "Reading uncompressed snapshot");
            raw
        };

        let VersionProbe { version } = serde_json::from_slice(&json)?;
        if version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        Ok(serde_json::from_slice(&json)?)
    }

    /// Write atomically to `path`, zstd compressed unless `level` is 0.
    pub fn write(&self, path: &Path, level: i32) -> Result<(), StoreError> {
        debug!(?path, level, entries = self.entries.len(), "Writing snapshot");

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;
        {
            let writer = BufWriter::new(temp.as_file_mut());
            if level > 0 {
                let mut encoder = zstd::stream::Encoder::new(writer, level)?;
                serde_json::to_writer(&mut encoder, self)?;
                encoder.finish()?.flush()?;
            } else {
                let mut writer = writer;
                serde_json::to_writer(&mut writer, self)?;
                writer.flush()?;
            }
        }
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

//! Access to the update package itself
//!
//! Adapters over the narrowly-scoped collaborators the installer relies on:
//! volume mounting, memory mapping, trusted keys, signature checking and the
//! archive container. Each is consumed through a small interface so the
//! orchestrator never touches the underlying crates directly.

pub mod archive;
pub mod keys;
pub mod map;
pub mod mount;
pub mod verify;

use std::path::Path;

pub use archive::{ArchiveError, EntryId, PackageArchive, ZipPackage};
pub use keys::{KeyError, TrustedKeySet};
pub use map::{MappedPackage, MmapMapper, PackageMap, PackageMapper};
pub use mount::{FstabVolumes, VolumeManager};
pub use verify::{VerifyError, verify_package};

/// Marker prefix denoting a path that must be mounted before use.
const DEVICE_MARKER: char = '@';

/// Package location exactly as the caller supplied it.
#[derive(Debug, Clone, Copy)]
pub struct PackagePath<'a> {
    raw: &'a str,
}

impl<'a> PackagePath<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self { raw }
    }

    /// Path as given, forwarded verbatim to the installer.
    pub fn as_given(&self) -> &'a str {
        self.raw
    }

    /// Filesystem path with any device marker stripped.
    pub fn file_path(&self) -> &'a Path {
        Path::new(self.raw.strip_prefix(DEVICE_MARKER).unwrap_or(self.raw))
    }
}

//! Volume mounting for package access
//!
//! The recovery environment knows a fixed table of volumes. Before an install
//! the volumes the installer needs are mounted and the rest are unmounted;
//! the package's own volume is mounted on demand.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use nix::mount::{MsFlags, mount, umount};

use crate::config::VolumeDefinition;

const PROC_MOUNTS: &str = "/proc/mounts";

/// Mount management used by the orchestrator.
pub trait VolumeManager {
    /// Bring the mount table into the state an install expects.
    fn setup_install_mounts(&self) -> io::Result<()>;

    /// Make sure the volume holding `path` is mounted.
    ///
    /// Paths that belong to no known volume need no mounting and succeed.
    fn ensure_path_mounted(&self, path: &Path) -> io::Result<()>;
}

/// Volume table backed by the kernel's mount syscalls.
#[derive(Debug, Clone)]
pub struct FstabVolumes {
    volumes: Vec<VolumeDefinition>,
    mounts_file: PathBuf,
}

impl FstabVolumes {
    pub fn new(volumes: Vec<VolumeDefinition>) -> Self {
        Self {
            volumes,
            mounts_file: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Volume whose mount point is the longest prefix of `path`.
    pub fn volume_for_path(&self, path: &Path) -> Option<&VolumeDefinition> {
        self.volumes
            .iter()
            .filter(|v| path.starts_with(&v.mount_point))
            .max_by_key(|v| v.mount_point.as_os_str().len())
    }

    fn mounted_points(&self) -> io::Result<Vec<PathBuf>> {
        let table = fs::read_to_string(&self.mounts_file)?;
        Ok(parse_mount_points(&table))
    }

    fn ensure_volume_mounted(&self, volume: &VolumeDefinition, mounted: &[PathBuf]) -> io::Result<()> {
        if mounted.contains(&volume.mount_point) {
            debug!("{} already mounted", volume.mount_point.display());
            return Ok(());
        }

        fs::create_dir_all(&volume.mount_point)?;
        info!(
            "Mounting {} ({}) at {}",
            volume.device,
            volume.fs_type,
            volume.mount_point.display()
        );
        mount(
            Some(volume.device.as_str()),
            &volume.mount_point,
            Some(volume.fs_type.as_str()),
            MsFlags::MS_NOATIME | MsFlags::MS_NODEV | MsFlags::MS_NODIRATIME,
            None::<&str>,
        )
        .map_err(io::Error::from)
    }

    fn ensure_volume_unmounted(&self, volume: &VolumeDefinition, mounted: &[PathBuf]) -> io::Result<()> {
        if !mounted.contains(&volume.mount_point) {
            return Ok(());
        }
        info!("Unmounting {}", volume.mount_point.display());
        umount(&volume.mount_point).map_err(io::Error::from)
    }
}

impl VolumeManager for FstabVolumes {
    fn setup_install_mounts(&self) -> io::Result<()> {
        if self.volumes.is_empty() {
            return Ok(());
        }

        let mounted = self.mounted_points()?;
        for volume in &self.volumes {
            if volume.keep_for_install {
                self.ensure_volume_mounted(volume, &mounted)?;
            } else {
                self.ensure_volume_unmounted(volume, &mounted)?;
            }
        }
        Ok(())
    }

    fn ensure_path_mounted(&self, path: &Path) -> io::Result<()> {
        let Some(volume) = self.volume_for_path(path) else {
            warn!("No volume known for {}; assuming it needs no mount", path.display());
            return Ok(());
        };
        let mounted = self.mounted_points()?;
        self.ensure_volume_mounted(volume, &mounted)
    }
}

/// Mount points listed in a `/proc/mounts`-style table.
fn parse_mount_points(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
        .collect()
}

/// Undo the kernel's octal escaping (`\040` for space and friends).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(digits) = bytes.get(i + 1..i + 4)
            && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(value) = u8::try_from(value) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

//! Installer extraction
//!
//! Materialises the installer entry of a verified package as an executable
//! file. The archive is consumed, so it is closed when extraction returns,
//! whatever the outcome.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::error::InstallError;
use crate::package::PackageArchive;

const INSTALLER_MODE: u32 = 0o755;

/// Extracted installer on local storage; the file is removed on drop.
#[derive(Debug)]
pub struct InstallerExecutable {
    path: PathBuf,
}

impl InstallerExecutable {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallerExecutable {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed installer {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove installer {}: {e}", self.path.display()),
        }
    }
}

/// Copy `entry_name` out of `archive` into a fresh executable at `dest`.
///
/// A missing entry is [`InstallError::MissingInstaller`]; failures creating
/// or filling the file are operational errors.
pub fn extract_installer(
    mut archive: Box<dyn PackageArchive + '_>,
    entry_name: &str,
    dest: &Path,
) -> Result<InstallerExecutable, InstallError> {
    let Some(entry) = archive.find_entry(entry_name) else {
        error!("can't find {entry_name}");
        return Err(InstallError::MissingInstaller(entry_name.to_string()));
    };

    // Never reuse whatever a previous attempt left behind.
    match fs::remove_file(dest) {
        Ok(()) => debug!("removed stale {}", dest.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(InstallError::CreateInstaller {
                path: dest.to_path_buf(),
                source: e,
            });
        }
    }

    let create_err = |source: io::Error| InstallError::CreateInstaller {
        path: dest.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(INSTALLER_MODE)
        .open(dest)
        .map_err(create_err)?;
    // From here on the file exists; the guard removes it if anything fails.
    let installer = InstallerExecutable {
        path: dest.to_path_buf(),
    };

    let copied = archive
        .extract_entry(entry, &mut file)
        .map_err(|source| InstallError::ExtractInstaller {
            entry: entry_name.to_string(),
            source,
        })?;
    file.sync_all().map_err(create_err)?;
    drop(file);
    drop(archive);

    // The umask may have narrowed the mode given at creation.
    fs::set_permissions(dest, fs::Permissions::from_mode(INSTALLER_MODE)).map_err(create_err)?;

    info!("extracted {entry_name} to {} ({copied} bytes)", dest.display());
    Ok(installer)
}

//! Install orchestration
//!
//! One attempt runs through
//! `MOUNTING → MAPPING → LOADING_KEYS → VERIFYING → OPENING_ARCHIVE →
//! EXTRACTING_INSTALLER → RUNNING_INSTALLER → FINALIZING`. Every resource
//! acquired along the way (package map, archive, installer file, control
//! pipe, child process) is an owned value, so any early return releases what
//! was acquired so far in reverse order.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use super::extract::extract_installer;
use super::progress::ProgressAccountant;
use super::reader::{ProtocolHandler, run_protocol};
use super::runner::{ForkLauncher, InstallerInvocation, InstallerLauncher, LaunchedInstaller};
use super::ui::{Background, RecoveryUi};
use crate::config::InstallConfig;
use crate::error::{InstallError, InstallResult};
use crate::package::{
    FstabVolumes, MmapMapper, PackageArchive, PackageMapper, PackagePath, TrustedKeySet,
    VolumeManager, ZipPackage, verify_package,
};

/// What to install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Package location; a leading `@` marks a path whose volume must be
    /// mounted first.
    pub package: String,
    /// Overrides the configured install-log location.
    pub install_log: Option<PathBuf>,
    /// Mount the package's volume before mapping it.
    pub needs_mount: bool,
}

impl InstallRequest {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            install_log: None,
            needs_mount: true,
        }
    }
}

/// Everything an attempt reports back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    pub result: InstallResult,
    /// The installer asked for the cache partition to be wiped.
    pub wipe_cache: bool,
    /// The attempt got far enough that target storage may have changed.
    pub modified_storage: bool,
}

/// Drives install attempts against a set of collaborators.
pub struct PackageInstaller<'ui> {
    config: InstallConfig,
    ui: &'ui mut dyn RecoveryUi,
    volumes: Box<dyn VolumeManager>,
    mapper: Box<dyn PackageMapper>,
    launcher: Box<dyn InstallerLauncher>,
}

impl<'ui> PackageInstaller<'ui> {
    /// Installer backed by the real mount table, mmap and fork/exec.
    pub fn new(config: InstallConfig, ui: &'ui mut dyn RecoveryUi) -> Self {
        let volumes = FstabVolumes::new(config.volumes.clone());
        Self {
            config,
            ui,
            volumes: Box::new(volumes),
            mapper: Box::new(MmapMapper),
            launcher: Box::new(ForkLauncher),
        }
    }

    pub fn with_volumes(mut self, volumes: Box<dyn VolumeManager>) -> Self {
        self.volumes = volumes;
        self
    }

    pub fn with_mapper(mut self, mapper: Box<dyn PackageMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_launcher(mut self, launcher: Box<dyn InstallerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Run one complete install attempt.
    ///
    /// The install log gets the package path before anything else happens
    /// and the final status once the attempt concludes.
    pub fn install_package(&mut self, request: &InstallRequest) -> InstallOutcome {
        info!("Install package {}", request.package);
        let log_path = request
            .install_log
            .clone()
            .unwrap_or_else(|| self.config.install_log.clone());
        let record = InstallRecord::begin(&log_path, &request.package);

        let mut wipe_cache = false;
        let result = match self.attempt(request, &mut wipe_cache) {
            Ok(()) => InstallResult::Success,
            Err(e) => {
                error!("{e}");
                self.ui.set_background(Background::Error);
                e.result()
            }
        };

        record.finish(result);
        info!("install of {} finished: {result}", request.package);
        InstallOutcome {
            result,
            wipe_cache,
            modified_storage: true,
        }
    }

    fn attempt(&mut self, request: &InstallRequest, wipe_cache: &mut bool) -> Result<(), InstallError> {
        self.volumes
            .setup_install_mounts()
            .map_err(|e| InstallError::MountSetup(e.to_string()))?;
        self.really_install(request, wipe_cache)
    }

    fn really_install(&mut self, request: &InstallRequest, wipe_cache: &mut bool) -> Result<(), InstallError> {
        let package = PackagePath::new(&request.package);

        self.ui.set_background(Background::InstallingUpdate);
        self.ui.print("Finding update package...\n");
        let mut progress = ProgressAccountant::new(self.config.verification_fraction);
        let segment = progress.begin_verification(self.config.verification_seconds);
        self.ui.show_progress(segment);
        info!("Update location: {}", package.as_given());

        self.ui.print("Opening update package...\n");
        if request.needs_mount
            && let Err(e) = self.volumes.ensure_path_mounted(package.file_path())
        {
            warn!("can't mount volume for {}: {e}", package.file_path().display());
        }

        // MAPPING
        let map = self
            .mapper
            .map(package.file_path())
            .map_err(|source| InstallError::Map {
                path: package.file_path().to_path_buf(),
                source,
            })?;

        // LOADING_KEYS
        let keys = TrustedKeySet::load(&self.config.keys_path)?;
        info!("{} key(s) loaded from {}", keys.len(), self.config.keys_path.display());

        // VERIFYING
        self.ui.print("Verifying update package...\n");
        let verified = verify_package(map.bytes(), &keys);
        drop(keys);
        let key_index = verified?;
        debug!("package accepted by key #{key_index}");

        // OPENING_ARCHIVE
        let archive = ZipPackage::open(map.bytes()).map_err(InstallError::OpenArchive)?;

        self.ui.print("Installing update...\n");
        self.ui.set_enable_reboot(false);
        let ran = self.try_update_binary(package.as_given(), Box::new(archive), &mut progress, wipe_cache);
        self.ui.set_enable_reboot(true);

        drop(map);
        ran
    }

    fn try_update_binary(
        &mut self,
        package: &str,
        archive: Box<dyn PackageArchive + '_>,
        progress: &mut ProgressAccountant,
        wipe_cache: &mut bool,
    ) -> Result<(), InstallError> {
        // EXTRACTING_INSTALLER; the archive is closed inside.
        let installer = extract_installer(archive, &self.config.installer_entry, &self.config.installer_path)?;

        // RUNNING_INSTALLER
        let invocation = InstallerInvocation {
            program: installer.path().to_path_buf(),
            package: package.to_string(),
        };
        let LaunchedInstaller { mut child, source } = self.launcher.launch(&invocation)?;

        let interval = self.config.poll_interval();
        let mut handler = ProtocolHandler::new(&mut *self.ui, progress);
        let exit = run_protocol(source, child.as_mut(), &mut handler, interval)
            .map_err(InstallError::ControlPipe)?;
        *wipe_cache = handler.wipe_cache();

        // FINALIZING: the child is reaped, so its executable can go.
        drop(child);
        drop(installer);

        if !exit.success() {
            return Err(InstallError::InstallerFailed(exit));
        }
        Ok(())
    }
}

/// The persisted one-line record of an attempt.
///
/// Write failures are logged and never affect the attempt.
struct InstallRecord {
    file: Option<File>,
    path: PathBuf,
}

impl InstallRecord {
    fn begin(path: &Path, package: &str) -> Self {
        debug!("Open install log file {}", path.display());
        let file = match Self::create(path, package) {
            Ok(file) => Some(file),
            Err(e) => {
                error!("failed to open {}: {e}", path.display());
                None
            }
        };
        Self {
            file,
            path: path.to_path_buf(),
        }
    }

    fn create(path: &Path, package: &str) -> std::io::Result<File> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        writeln!(file, "{package}")?;
        Ok(file)
    }

    fn finish(self, result: InstallResult) {
        let Some(mut file) = self.file else {
            return;
        };
        let status = if result.is_success() { '1' } else { '0' };
        if let Err(e) = writeln!(file, "{status}") {
            error!("failed to write {}: {e}", self.path.display());
        }
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Interface version handed to the installer as its first argument.
/// Installer payloads branch on this value.
pub const RECOVERY_API_VERSION: u32 = 3;

/// Top‑level installer configuration (mirrors the recovery image defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// PEM bundle of trusted package-signing keys
    pub keys_path: PathBuf,
    /// Archive entry holding the installer executable
    pub installer_entry: String,
    /// Where the installer is extracted before it is run
    pub installer_path: PathBuf,
    /// Default destination of the one-line install record
    pub install_log: PathBuf,
    /// Share of the progress bar reserved for signature verification
    pub verification_fraction: f32,
    /// Seconds over which the verification share is animated
    pub verification_seconds: u32,
    /// How long the protocol reader waits for the pipe per iteration
    pub poll_interval_ms: u64,
    /// Volumes known to the recovery environment
    pub volumes: Vec<VolumeDefinition>,
}

fn default_true() -> bool {
    true
}

/// On‑disk TOML description of a single volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    pub mount_point: PathBuf,
    pub device: String,
    pub fs_type: String,
    /// Stays mounted while a package installs (e.g. /tmp, /cache)
    #[serde(default = "default_true")]
    pub keep_for_install: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            keys_path: PathBuf::from("/res/keys"),
            installer_entry: "META-INF/com/google/android/update-binary".into(),
            installer_path: PathBuf::from("/tmp/update_binary"),
            install_log: PathBuf::from("/cache/recovery/last_install"),
            verification_fraction: 0.25,
            verification_seconds: 60,
            poll_interval_ms: 1000,
            volumes: vec![],
        }
    }
}

impl InstallConfig {
    /// Load config from `path`, or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let cfg_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg: InstallConfig = toml::from_str(&cfg_str)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        cfg.validate()?;

        log::info!("Using config from: {}", path.display());
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.verification_fraction) {
            anyhow::bail!(
                "verification_fraction must be in [0, 1), got {}",
                self.verification_fraction
            );
        }
        if self.installer_entry.is_empty() {
            anyhow::bail!("installer_entry must not be empty");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

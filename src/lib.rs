//! Recovery-side update installer
//!
//! Verifies a signed update package, extracts the installer it carries, runs
//! that installer as a subprocess and follows its line-based control
//! protocol until it exits.

pub mod config;
pub mod error;
pub mod install;
pub mod package;

pub use config::{InstallConfig, RECOVERY_API_VERSION, VolumeDefinition};
pub use error::{InstallError, InstallResult};
pub use install::{InstallOutcome, InstallRequest, PackageInstaller};

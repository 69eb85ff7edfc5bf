//! Installer execution
//!
//! Everything between a verified package and a result code: extracting the
//! installer, running it, reading its control protocol and keeping the
//! progress bar honest.

pub mod extract;
pub mod orchestration;
pub mod progress;
pub mod protocol;
pub mod reader;
pub mod runner;
pub mod ui;

pub use extract::{InstallerExecutable, extract_installer};
pub use orchestration::{InstallOutcome, InstallRequest, PackageInstaller};
pub use progress::{ProgressAccountant, ProgressSegment};
pub use protocol::{InstallerCommand, ProtocolError};
pub use reader::{PipeSource, ProtocolHandler, ProtocolSource, SourceEvent, run_protocol};
pub use runner::{
    ChildExit, ChildHandle, ChildProcess, ForkLauncher, InstallerInvocation, InstallerLauncher,
    LaunchedInstaller, spawn_installer,
};
pub use ui::{Background, ConsoleUi, HeadlessUi, RecoveryUi, UiEvent};

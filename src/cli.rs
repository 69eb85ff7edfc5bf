use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Verify an update package and run its installer")]
pub struct Args {
    /// Package to install; prefix with '@' for a path on a volume that must be mounted
    #[arg(long, short = 'p')]
    pub package: String,

    /// Where to write the install record (defaults to the configured path)
    #[arg(long)]
    pub install_log: Option<PathBuf>,

    /// Don't mount the package's volume before opening it
    #[arg(long)]
    pub no_mount: bool,

    /// Path to configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Log progress instead of drawing a progress bar
    #[arg(long)]
    pub headless: bool,
}

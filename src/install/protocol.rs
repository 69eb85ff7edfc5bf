//! Installer control protocol
//!
//! The installer writes one command per line to the control pipe:
//!
//! ```text
//! progress <frac> <secs>   fill the next <frac> of the bar over <secs> seconds
//!                          (0 seconds: driven by set_progress)
//! set_progress <frac>      position within the current segment, 0.0..=1.0
//! ui_print [text]          display text; no text displays a newline
//! wipe_cache               wipe the cache partition after a successful install
//! clear_display            turn off the background image
//! enable_reboot            let the user reboot while the installer runs
//! ```
//!
//! Tokens are separated by spaces or newlines. Unknown commands are tolerated
//! so older recoveries keep working with newer installers.

use thiserror::Error;

const DELIMITERS: &[char] = &[' ', '\n'];

#[derive(Debug, Clone, PartialEq)]
pub enum InstallerCommand {
    Progress { fraction: f32, seconds: u32 },
    SetProgress { fraction: f32 },
    UiPrint(Option<String>),
    WipeCache,
    ClearDisplay,
    EnableReboot,
    Unknown(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{command}: bad {argument} {value:?}")]
    BadArgument {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
}

type Decoder = fn(&str) -> Result<InstallerCommand, ProtocolError>;

const COMMANDS: &[(&str, Decoder)] = &[
    ("progress", decode_progress),
    ("set_progress", decode_set_progress),
    ("ui_print", decode_ui_print),
    ("wipe_cache", decode_wipe_cache),
    ("clear_display", decode_clear_display),
    ("enable_reboot", decode_enable_reboot),
];

impl InstallerCommand {
    /// Decode one protocol line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Result<Self, ProtocolError>> {
        let line = line.trim_start_matches(DELIMITERS);
        if line.is_empty() {
            return None;
        }

        let (token, rest) = match line.find(DELIMITERS) {
            Some(at) => (&line[..at], &line[at + 1..]),
            None => (line, ""),
        };

        let decoded = COMMANDS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, decode)| decode(rest))
            .unwrap_or_else(|| Ok(InstallerCommand::Unknown(token.to_string())));
        Some(decoded)
    }
}

fn arguments(rest: &str) -> impl Iterator<Item = &str> {
    rest.split(DELIMITERS).filter(|t| !t.is_empty())
}

fn fraction_arg(command: &'static str, token: Option<&str>) -> Result<f32, ProtocolError> {
    let value = token.ok_or(ProtocolError::MissingArgument {
        command,
        argument: "fraction",
    })?;
    value
        .parse::<f32>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.clamp(0.0, 1.0))
        .ok_or_else(|| ProtocolError::BadArgument {
            command,
            argument: "fraction",
            value: value.to_string(),
        })
}

fn decode_progress(rest: &str) -> Result<InstallerCommand, ProtocolError> {
    let mut args = arguments(rest);
    let fraction = fraction_arg("progress", args.next())?;
    let seconds = args.next().ok_or(ProtocolError::MissingArgument {
        command: "progress",
        argument: "seconds",
    })?;
    let seconds = seconds.parse::<u32>().map_err(|_| ProtocolError::BadArgument {
        command: "progress",
        argument: "seconds",
        value: seconds.to_string(),
    })?;
    Ok(InstallerCommand::Progress { fraction, seconds })
}

fn decode_set_progress(rest: &str) -> Result<InstallerCommand, ProtocolError> {
    let fraction = fraction_arg("set_progress", arguments(rest).next())?;
    Ok(InstallerCommand::SetProgress { fraction })
}

fn decode_ui_print(rest: &str) -> Result<InstallerCommand, ProtocolError> {
    let text = rest.trim_matches('\n');
    Ok(InstallerCommand::UiPrint(
        (!text.is_empty()).then(|| text.to_string()),
    ))
}

fn decode_wipe_cache(_: &str) -> Result<InstallerCommand, ProtocolError> {
    Ok(InstallerCommand::WipeCache)
}

fn decode_clear_display(_: &str) -> Result<InstallerCommand, ProtocolError> {
    Ok(InstallerCommand::ClearDisplay)
}

fn decode_enable_reboot(_: &str) -> Result<InstallerCommand, ProtocolError> {
    Ok(InstallerCommand::EnableReboot)
}

//! Control-protocol reader
//!
//! A single cooperative loop with two wake conditions: the child has
//! terminated, or the control pipe has a line ready (waited on with a
//! timeout). Termination is checked on every iteration, so a child that
//! exits without the pipe ever waking the reader is still noticed.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::time::Duration;

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::progress::ProgressAccountant;
use super::protocol::InstallerCommand;
use super::runner::{ChildExit, ChildHandle};
use super::ui::{Background, RecoveryUi};

/// Upper bound on lines consumed after the child has exited.
const MAX_DRAIN_LINES: usize = 1024;
/// Longest command line kept; anything past it up to the newline is dropped.
const MAX_LINE_LEN: usize = 1024;
/// Reads per `next_event` call before control returns to the caller.
const MAX_READS_PER_EVENT: usize = 16;

/// Result of one wait on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Line(String),
    /// Nothing arrived within the timeout.
    Idle,
    /// Bytes arrived but no complete line yet.
    Busy,
    /// Every writer has closed the channel.
    Closed,
}

/// Line-oriented channel from the installer. Dropping it closes it.
pub trait ProtocolSource {
    fn next_event(&mut self, timeout: Duration) -> io::Result<SourceEvent>;
}

/// Read end of the control pipe.
///
/// Bytes are buffered until a full line is available, so a partial write
/// from the installer never blocks the loop. The buffer never holds more
/// than [`MAX_LINE_LEN`] bytes: an overlong line is cut there and the rest
/// of it is discarded.
#[derive(Debug)]
pub struct PipeSource {
    file: File,
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    /// Inside the tail of an overlong line.
    discarding: bool,
    eof: bool,
}

impl PipeSource {
    pub fn new(file: File) -> Self {
        Self {
            file,
            pending: Vec::with_capacity(MAX_LINE_LEN),
            scanned: 0,
            discarding: false,
            eof: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        loop {
            let newline = self.pending[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|at| self.scanned + at);
            self.scanned = self.pending.len();

            if self.discarding {
                match newline {
                    Some(at) => {
                        self.pending.drain(..=at);
                        self.scanned = 0;
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.pending.clear();
                        self.scanned = 0;
                        return None;
                    }
                }
            }

            let end = match newline {
                Some(at) => at + 1,
                None if self.pending.len() >= MAX_LINE_LEN => {
                    warn!("installer line longer than {MAX_LINE_LEN} bytes; dropping the rest of it");
                    self.discarding = true;
                    MAX_LINE_LEN
                }
                None if self.eof && !self.pending.is_empty() => self.pending.len(),
                None => return None,
            };
            let line: Vec<u8> = self.pending.drain(..end).collect();
            self.scanned = 0;
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }

    fn readable(&self, timeout: Duration) -> io::Result<bool> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }
}

impl ProtocolSource for PipeSource {
    fn next_event(&mut self, timeout: Duration) -> io::Result<SourceEvent> {
        let mut reads = 0;
        loop {
            if let Some(line) = self.take_line() {
                return Ok(SourceEvent::Line(line));
            }
            if self.eof {
                return Ok(SourceEvent::Closed);
            }
            if reads == MAX_READS_PER_EVENT {
                return Ok(SourceEvent::Busy);
            }
            // One wait per call; later passes only pick up data already queued.
            let wait = if reads == 0 { timeout } else { Duration::ZERO };
            if !self.readable(wait)? {
                return Ok(if reads == 0 { SourceEvent::Idle } else { SourceEvent::Busy });
            }

            // take_line leaves no newline and fewer than MAX_LINE_LEN bytes behind.
            let room = MAX_LINE_LEN - self.pending.len();
            let mut chunk = [0u8; MAX_LINE_LEN];
            match self.file.read(&mut chunk[..room]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
            reads += 1;
        }
    }
}

impl Drop for PipeSource {
    fn drop(&mut self) {
        debug!("closing control pipe");
    }
}

/// Applies decoded commands to the UI and the attempt's state.
pub struct ProtocolHandler<'a> {
    ui: &'a mut dyn RecoveryUi,
    progress: &'a mut ProgressAccountant,
    wipe_cache: bool,
    activity_shown: bool,
}

impl<'a> ProtocolHandler<'a> {
    pub fn new(ui: &'a mut dyn RecoveryUi, progress: &'a mut ProgressAccountant) -> Self {
        Self {
            ui,
            progress,
            wipe_cache: false,
            activity_shown: false,
        }
    }

    /// Whether the installer asked for a cache wipe.
    pub fn wipe_cache(&self) -> bool {
        self.wipe_cache
    }

    pub fn handle_line(&mut self, line: &str) {
        match InstallerCommand::parse(line) {
            None => {}
            Some(Ok(command)) => self.apply(command),
            Some(Err(e)) => warn!("ignoring malformed command: {e}"),
        }
    }

    pub fn apply(&mut self, command: InstallerCommand) {
        match command {
            InstallerCommand::Progress { fraction, seconds } => {
                let segment = self.progress.begin_segment(fraction, seconds);
                self.ui.show_progress(segment);
            }
            InstallerCommand::SetProgress { fraction } => {
                let position = self.progress.position(fraction);
                self.ui.set_progress(position);
            }
            InstallerCommand::UiPrint(text) => {
                match text {
                    Some(text) => {
                        self.end_activity_line();
                        self.ui.print(&text);
                    }
                    None => self.ui.print("\n"),
                }
                self.activity_shown = false;
            }
            InstallerCommand::WipeCache => self.wipe_cache = true,
            InstallerCommand::ClearDisplay => self.ui.set_background(Background::None),
            InstallerCommand::EnableReboot => self.ui.set_enable_reboot(true),
            InstallerCommand::Unknown(token) => warn!("unknown command [{token}]"),
        }
    }

    /// Nothing arrived this interval: show that the installer is still busy.
    pub fn idle(&mut self) {
        if !self.activity_shown {
            self.ui.print("Updating binary");
            self.activity_shown = true;
        }
        self.ui.print(".");
    }

    /// Let the UI advance a timed segment; called once per loop iteration.
    pub fn tick(&mut self) {
        self.ui.tick();
    }

    /// Terminate a pending row of activity dots.
    pub fn end_activity_line(&mut self) {
        if self.activity_shown {
            self.ui.print("\n");
            self.activity_shown = false;
        }
    }
}

/// Drive the protocol until the child exits; returns its exit status.
///
/// The source is drained of already-buffered lines and closed only after the
/// child's termination has been observed.
pub fn run_protocol(
    mut source: Box<dyn ProtocolSource>,
    child: &mut dyn ChildHandle,
    handler: &mut ProtocolHandler<'_>,
    interval: Duration,
) -> io::Result<ChildExit> {
    let exit = loop {
        if let Some(exit) = child.try_wait()? {
            drain(source.as_mut(), handler)?;
            break exit;
        }

        match source.next_event(interval)? {
            SourceEvent::Line(line) => handler.handle_line(&line),
            SourceEvent::Idle => handler.idle(),
            SourceEvent::Busy => {}
            SourceEvent::Closed => {
                debug!("control pipe closed; waiting for installer to exit");
                break child.wait()?;
            }
        }
        handler.tick();
    };

    handler.end_activity_line();
    drop(source);
    info!("installer {exit}");
    Ok(exit)
}

fn drain(source: &mut dyn ProtocolSource, handler: &mut ProtocolHandler<'_>) -> io::Result<()> {
    for _ in 0..MAX_DRAIN_LINES {
        match source.next_event(Duration::ZERO)? {
            SourceEvent::Line(line) => handler.handle_line(&line),
            SourceEvent::Busy => {}
            SourceEvent::Idle | SourceEvent::Closed => return Ok(()),
        }
    }
    warn!("installer output still pending after {MAX_DRAIN_LINES} lines; discarding");
    Ok(())
}

//! Recovery UI surface
//!
//! The orchestrator and the protocol reader only talk to [`RecoveryUi`].
//! `ConsoleUi` draws on a terminal with indicatif; `HeadlessUi` keeps a
//! transcript and forwards text to the log, for serial consoles and tests.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};

use super::progress::ProgressSegment;

const BAR_RESOLUTION: u64 = 1000;
/// Redraw period of timed segments.
const FRAME: Duration = Duration::from_millis(100);

/// Background image shown behind the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    None,
    InstallingUpdate,
    Error,
}

pub trait RecoveryUi {
    fn set_background(&mut self, background: Background);

    /// Start animating (or waiting in) a new segment of the bar.
    fn show_progress(&mut self, segment: ProgressSegment);

    /// Jump to an absolute position in [0, 1].
    fn set_progress(&mut self, fraction: f32);

    /// Display text verbatim; callers supply their own newlines.
    fn print(&mut self, text: &str);

    fn set_enable_reboot(&mut self, enabled: bool);

    fn reboot_enabled(&self) -> bool;

    /// Called on every pass of the protocol loop, for UIs without a clock of
    /// their own.
    fn tick(&mut self) {}
}

/// Animation state of the segment currently on screen.
#[derive(Debug, Clone, Copy)]
struct ActiveSegment {
    segment: ProgressSegment,
    started: Instant,
}

impl ActiveSegment {
    fn position(&self) -> Option<f32> {
        if self.segment.seconds == 0 {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f32();
        Some(self.segment.position(elapsed / self.segment.seconds as f32))
    }
}

type SharedSegment = Arc<Mutex<Option<ActiveSegment>>>;

/// Move the bar to where the timed segment should be by now. Never moves
/// it backwards past a position set by hand.
fn animate(bar: &ProgressBar, active: &SharedSegment) {
    let current = *active.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(position) = current.and_then(|a| a.position()) {
        let steps = to_steps(position);
        if steps > bar.position() {
            bar.set_position(steps);
        }
    }
}

fn to_steps(fraction: f32) -> u64 {
    (fraction.clamp(0.0, 1.0) * BAR_RESOLUTION as f32) as u64
}

/// Terminal UI with a determinate progress bar.
///
/// Timed segments are swept by a background thread, so the bar keeps moving
/// while the caller is blocked (signature checking, a quiet installer).
pub struct ConsoleUi {
    bar: ProgressBar,
    active: SharedSegment,
    stop: Arc<AtomicBool>,
    animator: Option<JoinHandle<()>>,
    reboot_enabled: bool,
}

impl ConsoleUi {
    pub fn new() -> io::Result<Self> {
        let bar = ProgressBar::with_draw_target(Some(BAR_RESOLUTION), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:50.cyan/blue}] {percent:>3}%  {msg}")
                .map_err(io::Error::other)?
                .progress_chars("█▓░"),
        );

        let active: SharedSegment = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let animator = thread::Builder::new().name("progress".to_string()).spawn({
            let bar = bar.clone();
            let active = Arc::clone(&active);
            let stop = Arc::clone(&stop);
            move || {
                while !stop.load(Ordering::Relaxed) {
                    animate(&bar, &active);
                    thread::park_timeout(FRAME);
                }
            }
        })?;

        Ok(Self {
            bar,
            active,
            stop,
            animator: Some(animator),
            reboot_enabled: true,
        })
    }
}

impl RecoveryUi for ConsoleUi {
    fn set_background(&mut self, background: Background) {
        let msg = match background {
            Background::None => "",
            Background::InstallingUpdate => "Installing update",
            Background::Error => "Error",
        };
        self.bar.set_message(msg);
    }

    fn show_progress(&mut self, segment: ProgressSegment) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveSegment {
            segment,
            started: Instant::now(),
        });
        self.bar.set_position(to_steps(segment.start));
    }

    fn set_progress(&mut self, fraction: f32) {
        self.bar.set_position(to_steps(fraction));
    }

    fn print(&mut self, text: &str) {
        self.bar.suspend(|| {
            let mut stdout = io::stdout();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        });
    }

    fn set_enable_reboot(&mut self, enabled: bool) {
        self.reboot_enabled = enabled;
    }

    fn reboot_enabled(&self) -> bool {
        self.reboot_enabled
    }

    fn tick(&mut self) {
        animate(&self.bar, &self.active);
    }
}

impl Drop for ConsoleUi {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(animator) = self.animator.take() {
            animator.thread().unpark();
            if animator.join().is_err() {
                debug!("progress animator panicked");
            }
        }
        self.bar.finish_and_clear();
    }
}

/// Everything a [`HeadlessUi`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Background(Background),
    ShowProgress(ProgressSegment),
    SetProgress(f32),
    Print(String),
    EnableReboot(bool),
}

/// UI without a display: records a transcript and logs printed text.
#[derive(Debug)]
pub struct HeadlessUi {
    events: Vec<UiEvent>,
    reboot_enabled: bool,
}

impl Default for HeadlessUi {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessUi {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            reboot_enabled: true,
        }
    }

    pub fn events(&self) -> &[UiEvent] {
        &self.events
    }

    /// All printed text concatenated.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                UiEvent::Print(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Last absolute position shown, if any.
    pub fn last_progress(&self) -> Option<f32> {
        self.events.iter().rev().find_map(|e| match e {
            UiEvent::SetProgress(f) => Some(*f),
            UiEvent::ShowProgress(seg) => Some(seg.start),
            _ => None,
        })
    }
}

impl RecoveryUi for HeadlessUi {
    fn set_background(&mut self, background: Background) {
        debug!("background: {background:?}");
        self.events.push(UiEvent::Background(background));
    }

    fn show_progress(&mut self, segment: ProgressSegment) {
        debug!(
            "progress segment {:.3}..{:.3} over {}s",
            segment.start, segment.end, segment.seconds
        );
        self.events.push(UiEvent::ShowProgress(segment));
    }

    fn set_progress(&mut self, fraction: f32) {
        self.events.push(UiEvent::SetProgress(fraction));
    }

    fn print(&mut self, text: &str) {
        let line = text.trim_end_matches('\n');
        if !line.is_empty() && line != "." {
            info!("{line}");
        }
        self.events.push(UiEvent::Print(text.to_string()));
    }

    fn set_enable_reboot(&mut self, enabled: bool) {
        self.reboot_enabled = enabled;
        self.events.push(UiEvent::EnableReboot(enabled));
    }

    fn reboot_enabled(&self) -> bool {
        self.reboot_enabled
    }
}

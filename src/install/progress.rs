//! Progress bar accounting across the verification and install phases
//!
//! The bar is split into consecutive segments. Verification owns the first
//! `verification_fraction` of it; every `progress` command from the installer
//! opens the next segment, sized as a share of what is left after
//! verification. All values handed to the UI are absolute positions in [0, 1].

/// A span of the progress bar, optionally animated over wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSegment {
    pub start: f32,
    pub end: f32,
    /// Seconds to sweep from `start` to `end`; 0 means driven by hand.
    pub seconds: u32,
}

impl ProgressSegment {
    /// Absolute position `local` of the way through this segment.
    pub fn position(&self, local: f32) -> f32 {
        (self.start + (self.end - self.start) * local.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressAccountant {
    verification_fraction: f32,
    scope_start: f32,
    scope_size: f32,
}

impl ProgressAccountant {
    pub fn new(verification_fraction: f32) -> Self {
        Self {
            verification_fraction: verification_fraction.clamp(0.0, 1.0),
            scope_start: 0.0,
            scope_size: 0.0,
        }
    }

    /// Reserve the leading share of the bar for signature checking.
    pub fn begin_verification(&mut self, seconds: u32) -> ProgressSegment {
        self.scope_start = 0.0;
        self.scope_size = self.verification_fraction;
        self.segment(seconds)
    }

    /// Open the next install segment covering `fraction` of the install phase.
    pub fn begin_segment(&mut self, fraction: f32, seconds: u32) -> ProgressSegment {
        self.scope_start = (self.scope_start + self.scope_size).min(1.0);
        self.scope_size = fraction.clamp(0.0, 1.0) * self.install_budget();
        self.segment(seconds)
    }

    /// Absolute position for a local fraction of the current segment.
    pub fn position(&self, fraction: f32) -> f32 {
        self.segment(0).position(fraction)
    }

    /// Share of the bar left for the installer.
    pub fn install_budget(&self) -> f32 {
        1.0 - self.verification_fraction
    }

    fn segment(&self, seconds: u32) -> ProgressSegment {
        ProgressSegment {
            start: self.scope_start,
            end: (self.scope_start + self.scope_size).min(1.0),
            seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn verification_takes_leading_quarter() {
        let mut acct = ProgressAccountant::new(0.25);
        let seg = acct.begin_verification(60);
        assert_eq!(seg, ProgressSegment { start: 0.0, end: 0.25, seconds: 60 });
    }

    #[test]
    fn set_progress_rescales_into_install_budget() {
        let mut acct = ProgressAccountant::new(0.25);
        acct.begin_verification(60);
        let seg = acct.begin_segment(0.5, 0);
        assert!(close(seg.start, 0.25));
        assert!(close(seg.end, 0.625));
        assert!(close(acct.position(0.3), 0.25 + 0.3 * 0.5 * 0.75));
    }

    #[test]
    fn full_install_budget_reaches_end() {
        let mut acct = ProgressAccountant::new(0.25);
        acct.begin_verification(60);
        acct.begin_segment(1.0, 0);
        assert!(close(acct.position(0.0), 0.25));
        assert!(close(acct.position(1.0), 1.0));
    }

    #[test]
    fn segments_accumulate() {
        let mut acct = ProgressAccountant::new(0.25);
        acct.begin_verification(60);
        acct.begin_segment(0.4, 10);
        let second = acct.begin_segment(0.6, 0);
        assert!(close(second.start, 0.25 + 0.4 * 0.75));
        assert!(close(second.end, 1.0));
        assert!(close(acct.position(0.5), 0.55 + 0.5 * 0.45));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut acct = ProgressAccountant::new(0.25);
        acct.begin_verification(60);
        acct.begin_segment(3.0, 0);
        assert!(close(acct.position(2.0), 1.0));
        assert!(close(acct.position(-1.0), 0.25));
        acct.begin_segment(1.0, 0);
        assert!(close(acct.position(1.0), 1.0));
    }
}

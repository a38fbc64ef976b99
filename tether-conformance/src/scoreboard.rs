//! Scenario classification.
//!
//! Each conformance scenario is a zero-argument predicate; the scoreboard
//! owns the ordered list and a verdict per entry. Verdicts only ever move
//! `Unknown -> {Pass, Fail, Exception}` and are terminal: re-running the
//! board re-evaluates nothing that has already resolved, so it is safe to run
//! once per connection-ready notification.

use std::fmt;

use tracing::{debug, error};

use tether::CallError;

/// One conformance check: true passes, false fails, an error classifies as
/// exception.
pub type Predicate = Box<dyn FnMut() -> Result<bool, CallError> + Send>;

/// Classification of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not yet executed.
    Unknown,
    /// The predicate returned true.
    Pass,
    /// The predicate returned false.
    Fail,
    /// The predicate raised; the error is logged, never re-raised.
    Exception,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "UNKNOWN",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Exception => "EXCEPTION",
        })
    }
}

/// An sRGB color for the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Display attributes of one grid cell; pure data for the external renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellStyle {
    /// Cell background.
    pub background: Rgb,
    /// Label color.
    pub foreground: Rgb,
}

const BLACK: Rgb = Rgb(0x00, 0x00, 0x00);
const WHITE: Rgb = Rgb(0xff, 0xff, 0xff);
const GRAY: Rgb = Rgb(0x88, 0x88, 0x88);
const GREEN: Rgb = Rgb(0x00, 0xff, 0x00);
const NAVY: Rgb = Rgb(0x00, 0x00, 0x80);
const RED: Rgb = Rgb(0xff, 0x00, 0x00);

impl Verdict {
    /// Static verdict-to-style lookup; no behavior beyond data.
    pub fn style(self) -> CellStyle {
        let (background, foreground) = match self {
            Self::Unknown => (GRAY, BLACK),
            Self::Pass => (GREEN, BLACK),
            Self::Fail => (NAVY, WHITE),
            Self::Exception => (RED, WHITE),
        };
        CellStyle {
            background,
            foreground,
        }
    }
}

struct Case {
    predicate: Predicate,
    verdict: Verdict,
}

/// The ordered scenario list and its verdicts
#[derive(Default)]
pub struct Scoreboard {
    cases: Vec<Case>,
}

impl Scoreboard {
    /// An empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scenario; it starts `Unknown`.
    pub fn add(&mut self, predicate: impl FnMut() -> Result<bool, CallError> + Send + 'static) {
        self.cases.push(Case {
            predicate: Box::new(predicate),
            verdict: Verdict::Unknown,
        });
    }

    /// Number of registered scenarios.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether no scenarios are registered yet.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Current verdicts, in registration order.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.cases.iter().map(|c| c.verdict).collect()
    }

    /// Display label and style per cell, in registration order.
    pub fn cells(&self) -> impl Iterator<Item = (String, CellStyle)> + '_ {
        self.cases
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("{i}/{}", c.verdict), c.verdict.style()))
    }

    /// Execute every scenario still `Unknown`. One scenario's outcome never
    /// aborts the batch, and resolved entries are never re-executed.
    pub fn run_pending(&mut self) {
        for (index, case) in self.cases.iter_mut().enumerate() {
            if case.verdict != Verdict::Unknown {
                continue;
            }
            case.verdict = match (case.predicate)() {
                Ok(true) => Verdict::Pass,
                Ok(false) => Verdict::Fail,
                Err(err) => {
                    error!(index, %err, "scenario raised");
                    Verdict::Exception
                }
            };
            debug!(index, verdict = %case.verdict, "scenario resolved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_and_idempotence() {
        let mut board = Scoreboard::new();
        board.add(|| Ok(true));
        board.add(|| Ok(false));
        board.add(|| Err(CallError::Disconnected));
        let mut runs = 0;
        board.add(move || {
            runs += 1;
            Ok(runs == 1)
        });

        board.run_pending();
        let first = board.verdicts();
        assert_eq!(
            first,
            vec![
                Verdict::Pass,
                Verdict::Fail,
                Verdict::Exception,
                Verdict::Pass
            ]
        );

        // Resolved entries stay untouched; the counting predicate would turn
        // Fail if it ran again.
        board.run_pending();
        assert_eq!(board.verdicts(), first);
    }

    #[test]
    fn styles_are_static_data() {
        assert_eq!(Verdict::Unknown.style().background, GRAY);
        assert_eq!(Verdict::Pass.style().background, GREEN);
        assert_eq!(Verdict::Fail.style(), CellStyle {
            background: NAVY,
            foreground: WHITE,
        });
        assert_eq!(Verdict::Exception.style().background, RED);
    }

    #[test]
    fn late_registration_runs_on_the_next_pass() {
        let mut board = Scoreboard::new();
        board.add(|| Ok(true));
        board.run_pending();
        board.add(|| Ok(true));
        assert_eq!(board.verdicts()[1], Verdict::Unknown);
        board.run_pending();
        assert_eq!(board.verdicts(), vec![Verdict::Pass, Verdict::Pass]);
    }
}

//! Time-driven progress bar shown while an image is out for detection.
//!
//! The estimate knows nothing about the request it decorates:
//! it eases toward [`TARGET_FRACTION`] over a randomised duration and waits
//! there until [`ProgressIndicator::complete`] is called.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::models::ImageId;
use crate::pipeline::ProgressReporter;

pub const TARGET_FRACTION: f64 = 0.75;
const ESTIMATE_SECS: std::ops::Range<f64> = 2.0..3.0;
const RAMP: Duration = Duration::from_millis(400);
const HOLD: Duration = Duration::from_millis(1500);
const FADE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Hidden,
    Animating,
    ForcedComplete,
    Fading,
}

/// What to draw at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressFrame {
    pub phase: Phase,
    pub fraction: f64,
    pub check_mark: bool,
    pub opacity: f64,
}

impl ProgressFrame {
    const HIDDEN: ProgressFrame = ProgressFrame {
        phase: Phase::Hidden,
        fraction: 0.0,
        check_mark: false,
        opacity: 0.0,
    };
}

#[derive(Debug, Clone, Copy)]
enum State {
    Hidden,
    Animating { started: Instant, duration: Duration },
    Completing { from: f64, at: Instant },
}

#[derive(Debug, Clone)]
pub struct ProgressIndicator {
    state: State,
}

impl Default for ProgressIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressIndicator {
    pub fn new() -> Self {
        Self { state: State::Hidden }
    }

    /// Begin the estimate with a random duration between two and three seconds.
    pub fn start(&mut self, now: Instant) {
        let secs = rand::rng().random_range(ESTIMATE_SECS);
        self.start_with_duration(now, Duration::from_secs_f64(secs));
    }

    pub fn start_with_duration(&mut self, now: Instant, duration: Duration) {
        self.state = State::Animating {
            started: now,
            duration,
        };
    }

    /// Abandon the estimate where it stands and run the finish sequence.
    /// Calling it again while finishing changes nothing.
    pub fn complete(&mut self, now: Instant) {
        let from = match self.state {
            State::Completing { .. } => return,
            State::Hidden => 0.0,
            State::Animating { .. } => self.frame(now).fraction,
        };
        self.state = State::Completing { from, at: now };
    }

    pub fn frame(&self, now: Instant) -> ProgressFrame {
        match self.state {
            State::Hidden => ProgressFrame::HIDDEN,
            State::Animating { started, duration } => {
                let t = ratio(now.saturating_duration_since(started), duration);
                ProgressFrame {
                    phase: Phase::Animating,
                    fraction: ease_in_out_cubic(t) * TARGET_FRACTION,
                    check_mark: false,
                    opacity: 1.0,
                }
            }
            State::Completing { from, at } => {
                let elapsed = now.saturating_duration_since(at);
                if elapsed < RAMP {
                    let t = ease_out_cubic(ratio(elapsed, RAMP));
                    ProgressFrame {
                        phase: Phase::ForcedComplete,
                        fraction: from + (1.0 - from) * t,
                        check_mark: false,
                        opacity: 1.0,
                    }
                } else if elapsed < RAMP + HOLD {
                    ProgressFrame {
                        phase: Phase::ForcedComplete,
                        fraction: 1.0,
                        check_mark: true,
                        opacity: 1.0,
                    }
                } else if elapsed < RAMP + HOLD + FADE {
                    ProgressFrame {
                        phase: Phase::Fading,
                        fraction: 1.0,
                        check_mark: true,
                        opacity: 1.0 - ratio(elapsed - RAMP - HOLD, FADE),
                    }
                } else {
                    ProgressFrame::HIDDEN
                }
            }
        }
    }

    /// True once the finish sequence has fully played out.
    pub fn is_settled(&self, now: Instant) -> bool {
        match self.state {
            State::Hidden => true,
            State::Animating { .. } => false,
            State::Completing { at, .. } => now.saturating_duration_since(at) >= RAMP + HOLD + FADE,
        }
    }
}

fn ratio(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / total.as_secs_f64()).min(1.0)
}

pub fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn ease_out_cubic(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(3)
}

#[derive(Debug, Default)]
struct Indicators {
    by_image: HashMap<ImageId, ProgressIndicator>,
    /// Most recently started image.
    current: Option<ImageId>,
}

/// One indicator per image, fed by the annotation pipeline.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    indicators: Mutex<Indicators>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self, id: ImageId, now: Instant) -> ProgressFrame {
        self.lock()
            .by_image
            .get(&id)
            .map(|indicator| indicator.frame(now))
            .unwrap_or(ProgressFrame::HIDDEN)
    }

    /// The image whose request went out last, with its frame at `now`.
    /// Indicators abandoned by earlier failures never take its place.
    pub fn current(&self, now: Instant) -> Option<(ImageId, ProgressFrame)> {
        let indicators = self.lock();
        let id = indicators.current?;
        let frame = indicators.by_image.get(&id)?.frame(now);
        (frame.phase != Phase::Hidden).then_some((id, frame))
    }

    /// Visible indicators at `now`. Settled ones are forgotten.
    pub fn visible(&self, now: Instant) -> Vec<(ImageId, ProgressFrame)> {
        let mut indicators = self.lock();
        indicators.by_image.retain(|_, indicator| !indicator.is_settled(now));
        indicators
            .by_image
            .iter()
            .map(|(id, indicator)| (*id, indicator.frame(now)))
            .filter(|(_, frame)| frame.phase != Phase::Hidden)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Indicators> {
        self.indicators.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressReporter for ProgressTracker {
    fn started(&self, id: ImageId) {
        let mut indicators = self.lock();
        indicators.by_image.entry(id).or_default().start(Instant::now());
        indicators.current = Some(id);
    }

    fn finished(&self, id: ImageId) {
        if let Some(indicator) = self.lock().by_image.get_mut(&id) {
            indicator.complete(Instant::now());
        }
    }
}

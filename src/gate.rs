//! Detection admission gate.
//!
//! A physical bottle sits in the camera's field of view for many
//! consecutive frames; the cooldown window keeps one bottle from becoming
//! many records. The window is time-based, not identity-based: the line
//! presents one bottle at a time, so no cross-frame tracking is kept.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source. Injected so the gate is testable without
/// sleeping through real cooldown windows.
pub trait Clock: Send {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall clock anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-cranked clock for tests. Clones share the same time, so a test can
/// keep one handle and give the gate the other.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().expect("clock lock poisoned")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Candidate becomes a committed detection event.
    Admit,
    /// Duplicate-suppression window still active.
    RejectCooldown,
    /// Fused confidence not strictly above the threshold.
    RejectLowConfidence,
}

/// Cooldown + confidence state machine. Owns the only mutable gate state
/// (`last_admitted`); mutated exclusively on the pipeline's thread.
pub struct DetectionGate {
    cooldown: Duration,
    confidence_threshold: f32,
    last_admitted: Option<Duration>,
    clock: Box<dyn Clock>,
}

impl DetectionGate {
    pub fn new(cooldown: Duration, confidence_threshold: f32, clock: Box<dyn Clock>) -> Self {
        Self {
            cooldown,
            confidence_threshold,
            last_admitted: None,
            clock,
        }
    }

    /// Evaluate a candidate pass. Cooldown is checked before confidence;
    /// admission requires strictly `confidence > threshold`.
    pub fn evaluate(&self, overall_confidence: f32) -> GateDecision {
        if self.in_cooldown() {
            return GateDecision::RejectCooldown;
        }
        if overall_confidence <= self.confidence_threshold {
            return GateDecision::RejectLowConfidence;
        }
        GateDecision::Admit
    }

    /// True while the duplicate-suppression window is active. Vacuously
    /// false before the first admission.
    pub fn in_cooldown(&self) -> bool {
        match self.last_admitted {
            Some(last) => self.clock.now().saturating_sub(last) <= self.cooldown,
            None => false,
        }
    }

    /// Record a successful admission. Called after the event persisted, so
    /// a storage failure leaves the gate open for the next pass.
    pub fn commit(&mut self) {
        self.last_admitted = Some(self.clock.now());
    }

    /// Operator reset. Reopens the cooldown window only when configured to.
    pub fn reset(&mut self, clear_cooldown: bool) {
        if clear_cooldown {
            self.last_admitted = None;
        }
    }
}

//! Hold-confirmation state machine
//!
//! One authoritative mutable structure for the face stream's provisional
//! check-in decision, advanced only through explicit tick/apply entry
//! points. The async detection loop and the submission coordinator own all
//! mutation; this module itself is pure and synchronous, with time injected
//! so every transition is unit-testable.
//!
//! States: `Idle → Holding(candidate) → Submitting → Idle`, plus the legacy
//! `Idle → Holding → AwaitingConfirmation → Submitting|Idle` path for flows
//! requiring explicit human confirmation before commit.
//!
//! The short hold countdown combined with grace-period miss tolerance is
//! the single UX lever trading false-positive auto-check-ins against
//! responsiveness.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::TuningConfig;

/// A face-match candidate under consideration
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Matched subject
    pub subject_id: Uuid,
    /// Display name for the kiosk screen
    pub display_name: String,
    /// Embedding distance reported by the resolver (lower is closer)
    pub distance: f32,
    /// Enrollment photo reference, when the resolver has one
    pub photo_ref: Option<String>,
    /// When this candidate was observed
    pub observed_at: Instant,
}

/// Current phase of the machine
#[derive(Debug, Clone, PartialEq)]
pub enum HoldPhase {
    /// Nothing held
    Idle,
    /// Candidate held, countdown running
    Holding(Candidate),
    /// Countdown finished in confirmation mode; waiting for staff
    AwaitingConfirmation(Candidate),
    /// Check-in write outstanding; detection processing suppressed
    Submitting(Candidate),
}

/// Why a hold ended without submitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Grace-period miss counter exceeded the threshold
    GraceExhausted,
    /// A different subject matched while this one was held
    SwitchedCandidate,
    /// Confirmation countdown ran out
    ConfirmationTimeout,
    /// Staff pressed cancel
    ConfirmationDeclined,
    /// Camera stop, session teardown, or loop restart
    Reset,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::GraceExhausted => "grace_exhausted",
            CancelReason::SwitchedCandidate => "switched_candidate",
            CancelReason::ConfirmationTimeout => "confirmation_timeout",
            CancelReason::ConfirmationDeclined => "confirmation_declined",
            CancelReason::Reset => "reset",
        }
    }
}

/// Externally visible consequence of one transition
///
/// The caller (detection loop / coordinator) turns these into events and
/// submissions; the machine itself performs no I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldEffect {
    /// Nothing to do
    None,
    /// A new hold began
    HoldStarted { candidate: Candidate, countdown_seconds: u32 },
    /// Countdown advanced by one second
    CountdownTick { subject_id: Uuid, remaining_seconds: u32 },
    /// Countdown reached zero in automatic mode: submit now
    BeginSubmit { candidate: Candidate },
    /// Countdown reached zero in confirmation mode: wait for staff
    AwaitConfirmation { candidate: Candidate, cancel_seconds: u32 },
    /// The hold ended without submitting
    Canceled { subject_id: Uuid, reason: CancelReason },
    /// Presence misses crossed the threshold with nothing held
    SurfaceUnknown,
}

/// The hold-confirmation state machine
///
/// Invariant: a held candidate implies the countdown is actively
/// decrementing unless a submission is in flight. The machine is reset (not
/// recreated) on every submission outcome, camera stop, and detection-loop
/// restart.
#[derive(Debug)]
pub struct HoldState {
    phase: HoldPhase,
    /// Seconds left before automatic submission
    countdown_remaining: u32,
    /// Last whole-second countdown boundary
    last_countdown_tick: Option<Instant>,
    /// Consecutive misses charged against the held candidate
    grace_misses: u32,
    /// Consecutive positive confirmations of the held candidate
    consecutive_confirms: u32,
    /// Consecutive no-presence ticks with nothing held
    presence_misses: u32,
    /// When the unknown signal was armed (surfaced after a delay)
    unknown_armed_at: Option<Instant>,
    /// True once the unknown signal was surfaced for this dry spell
    unknown_surfaced: bool,
    /// Subject of the most recent positive match
    last_matched_subject: Option<Uuid>,
    /// When the most recent positive match (or sticky confirm start) landed
    last_match_at: Option<Instant>,
    /// Deadline for the confirmation flow
    confirm_deadline: Option<Instant>,
}

impl HoldState {
    pub fn new() -> Self {
        Self {
            phase: HoldPhase::Idle,
            countdown_remaining: 0,
            last_countdown_tick: None,
            grace_misses: 0,
            consecutive_confirms: 0,
            presence_misses: 0,
            unknown_armed_at: None,
            unknown_surfaced: false,
            last_matched_subject: None,
            last_match_at: None,
            confirm_deadline: None,
        }
    }

    pub fn phase(&self) -> &HoldPhase {
        &self.phase
    }

    /// Candidate currently held, awaiting confirmation, or submitting
    pub fn held_candidate(&self) -> Option<&Candidate> {
        match &self.phase {
            HoldPhase::Idle => None,
            HoldPhase::Holding(c)
            | HoldPhase::AwaitingConfirmation(c)
            | HoldPhase::Submitting(c) => Some(c),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, HoldPhase::Idle)
    }

    pub fn is_holding(&self) -> bool {
        matches!(self.phase, HoldPhase::Holding(_))
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, HoldPhase::Submitting(_))
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        matches!(self.phase, HoldPhase::AwaitingConfirmation(_))
    }

    /// True when the held candidate was confirmed recently enough that the
    /// remote match call can be skipped (sticky match cache)
    pub fn sticky_fresh(&self, now: Instant, window: Duration) -> bool {
        if !self.is_holding() {
            return false;
        }
        match self.last_match_at {
            Some(at) => now.duration_since(at) < window,
            None => false,
        }
    }

    /// Record a sticky-cache confirmation: the held candidate is treated as
    /// still matching without a remote call. The countdown continues
    /// unmodified; grace misses clear.
    pub fn note_sticky_confirm(&mut self) {
        if self.is_holding() {
            self.consecutive_confirms += 1;
            self.grace_misses = 0;
        }
    }

    /// Apply a positive match result
    ///
    /// - Same subject as held: countdown continues unmodified
    /// - Different subject: the current hold cancels and a fresh hold
    ///   starts with a full countdown; old counters are discarded
    /// - Nothing held: a new hold starts
    pub fn apply_match(
        &mut self,
        candidate: Candidate,
        now: Instant,
        cfg: &TuningConfig,
    ) -> Vec<HoldEffect> {
        // A match clears any pending unknown signal
        self.presence_misses = 0;
        self.unknown_armed_at = None;
        self.unknown_surfaced = false;

        match &self.phase {
            HoldPhase::Submitting(_) => vec![HoldEffect::None],
            HoldPhase::AwaitingConfirmation(_) => {
                // Confirmation is pinned to its candidate; matches are
                // informational until staff decide
                vec![HoldEffect::None]
            }
            HoldPhase::Holding(held) if held.subject_id == candidate.subject_id => {
                self.consecutive_confirms += 1;
                self.grace_misses = 0;
                self.last_matched_subject = Some(candidate.subject_id);
                self.last_match_at = Some(now);
                vec![HoldEffect::None]
            }
            HoldPhase::Holding(held) => {
                let old_subject = held.subject_id;
                let mut effects = vec![HoldEffect::Canceled {
                    subject_id: old_subject,
                    reason: CancelReason::SwitchedCandidate,
                }];
                effects.push(self.start_hold(candidate, now, cfg));
                effects
            }
            HoldPhase::Idle => vec![self.start_hold(candidate, now, cfg)],
        }
    }

    fn start_hold(&mut self, candidate: Candidate, now: Instant, cfg: &TuningConfig) -> HoldEffect {
        self.countdown_remaining = cfg.hold_countdown_seconds;
        self.last_countdown_tick = Some(now);
        self.grace_misses = 0;
        self.consecutive_confirms = 1;
        self.last_matched_subject = Some(candidate.subject_id);
        self.last_match_at = Some(now);
        self.phase = HoldPhase::Holding(candidate.clone());
        HoldEffect::HoldStarted {
            candidate,
            countdown_seconds: cfg.hold_countdown_seconds,
        }
    }

    /// Apply a miss: no presence, a negative match, or a match-resolver
    /// error
    ///
    /// While a candidate is held, misses are absorbed by the grace counter
    /// (tolerating blinks, brief turns, motion blur, crowd noise); the hold
    /// cancels only when the counter exceeds the threshold. With nothing
    /// held, misses accumulate toward the unknown signal.
    pub fn apply_miss(&mut self, now: Instant, cfg: &TuningConfig) -> Vec<HoldEffect> {
        match &self.phase {
            HoldPhase::Submitting(_) | HoldPhase::AwaitingConfirmation(_) => {
                vec![HoldEffect::None]
            }
            HoldPhase::Holding(held) => {
                self.grace_misses += 1;
                if self.grace_misses >= cfg.grace_miss_threshold {
                    let subject_id = held.subject_id;
                    self.clear_to_idle();
                    vec![HoldEffect::Canceled {
                        subject_id,
                        reason: CancelReason::GraceExhausted,
                    }]
                } else {
                    vec![HoldEffect::None]
                }
            }
            HoldPhase::Idle => {
                self.presence_misses += 1;
                if self.presence_misses >= cfg.presence_miss_threshold {
                    match self.unknown_armed_at {
                        None => {
                            self.unknown_armed_at = Some(now);
                            vec![HoldEffect::None]
                        }
                        Some(armed_at) => {
                            let delay = Duration::from_millis(cfg.unknown_surface_delay_ms);
                            if !self.unknown_surfaced && now.duration_since(armed_at) >= delay {
                                self.unknown_surfaced = true;
                                vec![HoldEffect::SurfaceUnknown]
                            } else {
                                vec![HoldEffect::None]
                            }
                        }
                    }
                } else {
                    vec![HoldEffect::None]
                }
            }
        }
    }

    /// Presence without a match attempt this tick (e.g. remote call still
    /// suppressed); clears the dry-spell accounting but touches no hold
    /// counters.
    pub fn note_presence(&mut self) {
        self.presence_misses = 0;
        self.unknown_armed_at = None;
        self.unknown_surfaced = false;
    }

    /// Advance the one-tick-per-second countdown
    ///
    /// Driven from the detection tick via elapsed-time accounting, so tick
    /// cadence does not need to be 1 Hz. Reaching zero yields `BeginSubmit`
    /// (automatic mode) or `AwaitConfirmation` (confirmation mode).
    pub fn tick_countdown(
        &mut self,
        now: Instant,
        require_confirmation: bool,
        cfg: &TuningConfig,
    ) -> Vec<HoldEffect> {
        let HoldPhase::Holding(candidate) = self.phase.clone() else {
            return vec![HoldEffect::None];
        };
        let Some(mut last_tick) = self.last_countdown_tick else {
            return vec![HoldEffect::None];
        };

        let mut effects = Vec::new();
        while self.countdown_remaining > 0 && now.duration_since(last_tick) >= Duration::from_secs(1)
        {
            last_tick += Duration::from_secs(1);
            self.countdown_remaining -= 1;
            effects.push(HoldEffect::CountdownTick {
                subject_id: candidate.subject_id,
                remaining_seconds: self.countdown_remaining,
            });
        }
        self.last_countdown_tick = Some(last_tick);

        if self.countdown_remaining == 0 {
            if require_confirmation {
                self.phase = HoldPhase::AwaitingConfirmation(candidate.clone());
                self.confirm_deadline =
                    Some(now + Duration::from_secs(cfg.confirm_cancel_seconds as u64));
                effects.push(HoldEffect::AwaitConfirmation {
                    candidate,
                    cancel_seconds: cfg.confirm_cancel_seconds,
                });
            } else {
                self.phase = HoldPhase::Submitting(candidate.clone());
                effects.push(HoldEffect::BeginSubmit { candidate });
            }
        }

        if effects.is_empty() {
            effects.push(HoldEffect::None);
        }
        effects
    }

    /// Check the confirmation cancel countdown
    pub fn tick_confirmation(&mut self, now: Instant) -> HoldEffect {
        let HoldPhase::AwaitingConfirmation(candidate) = self.phase.clone() else {
            return HoldEffect::None;
        };
        match self.confirm_deadline {
            Some(deadline) if now >= deadline => {
                let subject_id = candidate.subject_id;
                self.clear_to_idle();
                HoldEffect::Canceled {
                    subject_id,
                    reason: CancelReason::ConfirmationTimeout,
                }
            }
            _ => HoldEffect::None,
        }
    }

    /// Staff confirmed the pending candidate: move to Submitting
    pub fn confirm(&mut self) -> Option<Candidate> {
        let HoldPhase::AwaitingConfirmation(candidate) = self.phase.clone() else {
            return None;
        };
        self.confirm_deadline = None;
        self.phase = HoldPhase::Submitting(candidate.clone());
        Some(candidate)
    }

    /// Staff declined the pending candidate
    pub fn decline(&mut self) -> Option<HoldEffect> {
        let HoldPhase::AwaitingConfirmation(candidate) = self.phase.clone() else {
            return None;
        };
        let subject_id = candidate.subject_id;
        self.clear_to_idle();
        Some(HoldEffect::Canceled {
            subject_id,
            reason: CancelReason::ConfirmationDeclined,
        })
    }

    /// Reset to Idle, clearing the countdown and all per-hold counters
    ///
    /// Called on every submission outcome, camera stop, and detection-loop
    /// restart. Returns a cancel effect when a non-submitting hold was
    /// discarded.
    pub fn reset(&mut self) -> HoldEffect {
        let effect = match &self.phase {
            HoldPhase::Holding(c) | HoldPhase::AwaitingConfirmation(c) => HoldEffect::Canceled {
                subject_id: c.subject_id,
                reason: CancelReason::Reset,
            },
            _ => HoldEffect::None,
        };
        self.clear_to_idle();
        effect
    }

    fn clear_to_idle(&mut self) {
        self.phase = HoldPhase::Idle;
        self.countdown_remaining = 0;
        self.last_countdown_tick = None;
        self.grace_misses = 0;
        self.consecutive_confirms = 0;
        self.presence_misses = 0;
        self.unknown_armed_at = None;
        self.unknown_surfaced = false;
        self.confirm_deadline = None;
        // last_matched_subject / last_match_at survive the reset so the
        // sticky window and duplicate heuristics can look at history
    }

    #[cfg(test)]
    pub fn grace_misses(&self) -> u32 {
        self.grace_misses
    }

    #[cfg(test)]
    pub fn consecutive_confirms(&self) -> u32 {
        self.consecutive_confirms
    }

    #[cfg(test)]
    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining
    }
}

impl Default for HoldState {
    fn default() -> Self {
        Self::new()
    }
}

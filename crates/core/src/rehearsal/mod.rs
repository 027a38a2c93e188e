//! Turn-by-turn scene rehearsal.
//!
//! [`RehearsalEngine`] is a synchronous state machine: every user action and every async
//! completion goes in, and a list of [`Command`]s comes out. [`RehearsalSession`] executes
//! those commands on tokio (speech synthesis, playback, timers, dictation) and feeds the
//! results back in as [`Event`]s, one at a time.

mod engine;
mod observer;
mod session;

use crate::dictation::DictationEvent;
use crate::playback::PlaybackError;
use crate::tts::{QuotaExceeded, SynthesizedAudio, TtsError, VoiceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use engine::RehearsalEngine;
pub use observer::{BannerObserver, RateLimitBanner, RateLimitObserver};
pub use session::RehearsalSession;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Casting,
    Rehearsing,
    Paused,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Setup => "setup",
            Phase::Casting => "casting",
            Phase::Rehearsing => "rehearsing",
            Phase::Paused => "paused",
            Phase::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Stamp carried by every async request. A completion is applied only if its stamp is
/// still the engine's current one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(u64);

impl TurnId {
    pub(crate) fn next(self) -> Self {
        TurnId(self.0.wrapping_add(1))
    }
}

/// Snapshot of where the rehearsal is and what the current cue is waiting on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub current_index: usize,
    pub running: bool,
    pub awaiting_user: bool,
    pub playing_audio: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerReason {
    Direction,
    NoVoice,
    Failure,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    StartDictation,
    StopDictation,
    Synthesize {
        turn: TurnId,
        text: String,
        voice: VoiceId,
    },
    Play {
        turn: TurnId,
        audio: SynthesizedAudio,
    },
    /// Cancel in-flight synthesis or playback and drop the audio.
    ReleaseAudio,
    Schedule {
        turn: TurnId,
        delay: Duration,
        reason: TimerReason,
    },
    Notify(Notice),
}

/// Things the UI should hear about.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    PhaseChanged(Phase),
    CueStarted { index: usize },
    RateLimited(QuotaExceeded),
    SynthesisFailed { index: usize, message: String },
    PlaybackFailed { index: usize, message: String },
    DictationUnavailable,
    DictationFailed(String),
    Transcript { interim: String, committed: String },
}

#[derive(Debug)]
pub enum Event {
    SynthesisFinished {
        turn: TurnId,
        result: Result<SynthesizedAudio, TtsError>,
    },
    PlaybackFinished {
        turn: TurnId,
        result: Result<(), PlaybackError>,
    },
    TimerFired {
        turn: TurnId,
    },
    Dictation(DictationEvent),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RehearsalError {
    #[error("the script has no speaking characters")]
    ParseYieldedNoCharacters,

    #[error("assign a role to: {}", .missing.join(", "))]
    IncompleteCasting { missing: Vec<String> },

    #[error("cannot {action} while {phase}")]
    InvalidTransition { phase: Phase, action: &'static str },
}

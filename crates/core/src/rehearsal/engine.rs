use crate::cast::{CastAssignments, Role};
use crate::config::RehearsalTimings;
use crate::dictation::DictationEvent;
use crate::rehearsal::{
    Command, Cursor, Event, Notice, Phase, RehearsalError, TimerReason, TurnId,
};
use crate::script::{self, Cue, CueKind, ParsedScript};
use crate::tts::{QuotaExceeded, TtsError, VoiceId};
use crate::voices::VoiceCatalogEntry;
use rand::Rng;

const LOG_TARGET: &str = "rehearsal::engine";

/// What the current cue is waiting on before it can advance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    Nothing,
    Timer,
    Synthesis,
    Playback,
    User,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Transcript {
    interim: String,
    committed: String,
}

pub struct RehearsalEngine {
    timings: RehearsalTimings,
    dictation_supported: bool,
    script_text: String,
    script: ParsedScript,
    assignments: CastAssignments,
    phase: Phase,
    index: usize,
    pending: Pending,
    turn: TurnId,
    dictation_active: bool,
    transcript: Transcript,
    rate_limit: Option<QuotaExceeded>,
}

impl RehearsalEngine {
    pub fn new(timings: RehearsalTimings, dictation_supported: bool) -> Self {
        Self {
            timings,
            dictation_supported,
            script_text: String::new(),
            script: ParsedScript::default(),
            assignments: CastAssignments::new(),
            phase: Phase::Setup,
            index: 0,
            pending: Pending::Nothing,
            turn: TurnId::default(),
            dictation_active: false,
            transcript: Transcript::default(),
            rate_limit: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            current_index: self.index,
            running: self.phase == Phase::Rehearsing,
            awaiting_user: self.pending == Pending::User,
            playing_audio: self.pending == Pending::Playback,
        }
    }

    pub fn script_text(&self) -> &str {
        &self.script_text
    }

    pub fn script(&self) -> &ParsedScript {
        &self.script
    }

    pub fn current_cue(&self) -> Option<&Cue> {
        self.script.cues.get(self.index)
    }

    pub fn assignments(&self) -> &CastAssignments {
        &self.assignments
    }

    pub fn current_turn(&self) -> TurnId {
        self.turn
    }

    pub fn is_dictating(&self) -> bool {
        self.dictation_active
    }

    /// Latest interim text and everything finalized so far for the current user line.
    pub fn transcript(&self) -> (&str, &str) {
        (&self.transcript.interim, &self.transcript.committed)
    }

    /// Set after a quota rejection and cleared when the rehearsal resumes.
    pub fn rate_limit(&self) -> Option<&QuotaExceeded> {
        self.rate_limit.as_ref()
    }

    /// Replaces the script text and reparses it. Only allowed while editing.
    pub fn set_script(&mut self, raw: &str) -> Result<&ParsedScript, RehearsalError> {
        self.require(&[Phase::Setup], "edit the script")?;
        self.script_text = raw.to_owned();
        self.script = script::parse(raw);
        Ok(&self.script)
    }

    /// Setup -> Casting.
    pub fn confirm_script(&mut self) -> Result<Vec<Command>, RehearsalError> {
        self.require(&[Phase::Setup], "confirm the script")?;
        if !self.script.has_characters() {
            return Err(RehearsalError::ParseYieldedNoCharacters);
        }
        let mut out = Vec::new();
        self.set_phase(Phase::Casting, &mut out);
        Ok(out)
    }

    /// Casting -> Setup. Assignments are kept.
    pub fn edit_script(&mut self) -> Result<Vec<Command>, RehearsalError> {
        self.require(&[Phase::Casting], "edit the script")?;
        let mut out = Vec::new();
        self.set_phase(Phase::Setup, &mut out);
        Ok(out)
    }

    /// Replaces the cast. Entries for characters the current script does not have are dropped.
    pub fn set_assignments(
        &mut self,
        mut assignments: CastAssignments,
    ) -> Result<(), RehearsalError> {
        self.require_cast_editable()?;
        assignments.retain_characters(&self.script.characters);
        self.assignments = assignments;
        Ok(())
    }

    pub fn assign(
        &mut self,
        character: &str,
        role: Role,
        voice: Option<VoiceId>,
    ) -> Result<(), RehearsalError> {
        self.require_cast_editable()?;
        self.assignments.set_assignment(character, role, voice);
        Ok(())
    }

    /// Fills in roles for every roster character that has none yet.
    pub fn auto_cast<R: Rng + ?Sized>(
        &mut self,
        catalog: &[VoiceCatalogEntry],
        rng: &mut R,
    ) -> Result<(), RehearsalError> {
        self.require_cast_editable()?;
        let fresh = CastAssignments::auto_assign(&self.script.characters, catalog, rng);
        for (name, assignment) in fresh.iter() {
            if self.assignments.get(name).is_none() {
                self.assignments
                    .set_assignment(name, assignment.role, assignment.voice_id.clone());
            }
        }
        Ok(())
    }

    /// Casting -> Rehearsing from the first cue.
    pub fn start(&mut self) -> Result<Vec<Command>, RehearsalError> {
        self.require(&[Phase::Casting], "start rehearsing")?;
        self.begin_from_top()
    }

    /// Back to the first cue from anywhere once a script is confirmed and fully cast.
    pub fn restart(&mut self) -> Result<Vec<Command>, RehearsalError> {
        if self.phase == Phase::Setup {
            return Err(RehearsalError::InvalidTransition {
                phase: self.phase,
                action: "restart",
            });
        }
        self.begin_from_top()
    }

    /// Rehearsing <-> Paused. Pausing drops in-flight audio and dictation; resuming runs the
    /// current cue again from the start of its turn.
    pub fn toggle_pause(&mut self) -> Result<Vec<Command>, RehearsalError> {
        self.require(&[Phase::Rehearsing, Phase::Paused], "pause")?;
        let mut out = Vec::new();
        if self.phase == Phase::Rehearsing {
            self.release(&mut out);
            self.set_phase(Phase::Paused, &mut out);
        } else {
            self.rate_limit = None;
            self.set_phase(Phase::Rehearsing, &mut out);
            self.enter_turn(&mut out);
        }
        Ok(out)
    }

    /// Moves exactly one cue forward, abandoning whatever the current cue was doing.
    pub fn skip(&mut self) -> Result<Vec<Command>, RehearsalError> {
        self.require(&[Phase::Rehearsing, Phase::Paused], "skip")?;
        let mut out = Vec::new();
        self.release(&mut out);
        self.index += 1;
        if self.phase == Phase::Rehearsing {
            self.enter_turn(&mut out);
        } else if self.index >= self.script.len() {
            self.finish(&mut out);
        }
        Ok(out)
    }

    /// The user has finished speaking their line.
    pub fn user_done(&mut self) -> Result<Vec<Command>, RehearsalError> {
        if self.phase != Phase::Rehearsing || self.pending != Pending::User {
            return Err(RehearsalError::InvalidTransition {
                phase: self.phase,
                action: "finish a line that is not the user's",
            });
        }
        let mut out = Vec::new();
        self.stop_dictation(&mut out);
        self.advance(&mut out);
        Ok(out)
    }

    /// Any confirmed phase -> Casting with the cursor reset.
    pub fn stop(&mut self) -> Result<Vec<Command>, RehearsalError> {
        if self.phase == Phase::Setup {
            return Err(RehearsalError::InvalidTransition {
                phase: self.phase,
                action: "stop",
            });
        }
        let mut out = Vec::new();
        self.release(&mut out);
        self.index = 0;
        self.rate_limit = None;
        self.set_phase(Phase::Casting, &mut out);
        Ok(out)
    }

    /// Applies an async completion. Anything stamped with an old turn, or arriving while
    /// the rehearsal is not running, is dropped.
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        let mut out = Vec::new();
        if self.phase != Phase::Rehearsing {
            tracing::debug!(target: LOG_TARGET, phase = %self.phase, "ignoring event while not rehearsing");
            return out;
        }

        match event {
            Event::SynthesisFinished { turn, result } => {
                if !self.is_current(turn, Pending::Synthesis) {
                    return out;
                }
                match result {
                    Ok(audio) => {
                        self.pending = Pending::Playback;
                        out.push(Command::Play { turn, audio });
                    }
                    Err(TtsError::RateLimited(quota)) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            index = self.index,
                            "speech quota exhausted, pausing rehearsal"
                        );
                        self.pending = Pending::Nothing;
                        self.turn = self.turn.next();
                        self.rate_limit = Some(quota.clone());
                        self.set_phase(Phase::Paused, &mut out);
                        out.push(Command::Notify(Notice::RateLimited(quota)));
                    }
                    Err(e) => {
                        tracing::warn!(target: LOG_TARGET, index = self.index, error = %e, "synthesis failed, moving on");
                        out.push(Command::Notify(Notice::SynthesisFailed {
                            index: self.index,
                            message: e.to_string(),
                        }));
                        self.schedule(TimerReason::Failure, &mut out);
                    }
                }
            }
            Event::PlaybackFinished { turn, result } => {
                if !self.is_current(turn, Pending::Playback) {
                    return out;
                }
                match result {
                    Ok(()) => self.advance(&mut out),
                    Err(e) => {
                        tracing::warn!(target: LOG_TARGET, index = self.index, error = %e, "playback failed, moving on");
                        out.push(Command::Notify(Notice::PlaybackFailed {
                            index: self.index,
                            message: e.to_string(),
                        }));
                        self.schedule(TimerReason::Failure, &mut out);
                    }
                }
            }
            Event::TimerFired { turn } => {
                if self.is_current(turn, Pending::Timer) {
                    self.advance(&mut out);
                }
            }
            Event::Dictation(event) => self.on_dictation(event, &mut out),
        }
        out
    }

    fn on_dictation(&mut self, event: DictationEvent, out: &mut Vec<Command>) {
        if self.pending != Pending::User {
            return;
        }
        match event {
            DictationEvent::Interim(text) => self.transcript.interim = text,
            DictationEvent::Final(text) => {
                self.transcript.interim.clear();
                let text = text.trim();
                if !text.is_empty() {
                    if !self.transcript.committed.is_empty() {
                        self.transcript.committed.push(' ');
                    }
                    self.transcript.committed.push_str(text);
                }
            }
            DictationEvent::Error(message) => {
                // The line can still be finished by hand.
                self.dictation_active = false;
                out.push(Command::Notify(Notice::DictationFailed(message)));
                return;
            }
        }
        out.push(Command::Notify(Notice::Transcript {
            interim: self.transcript.interim.clone(),
            committed: self.transcript.committed.clone(),
        }));
    }

    fn is_current(&self, turn: TurnId, expected: Pending) -> bool {
        let current = turn == self.turn && self.pending == expected;
        if !current {
            tracing::debug!(
                target: LOG_TARGET,
                ?turn,
                current_turn = ?self.turn,
                pending = ?self.pending,
                "dropping stale completion"
            );
        }
        current
    }

    fn require(&self, allowed: &[Phase], action: &'static str) -> Result<(), RehearsalError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(RehearsalError::InvalidTransition {
                phase: self.phase,
                action,
            })
        }
    }

    fn require_cast_editable(&self) -> Result<(), RehearsalError> {
        self.require(&[Phase::Setup, Phase::Casting, Phase::Complete], "change the cast")
    }

    fn begin_from_top(&mut self) -> Result<Vec<Command>, RehearsalError> {
        if !self.script.has_characters() {
            return Err(RehearsalError::ParseYieldedNoCharacters);
        }
        let missing = self.assignments.missing(&self.script.characters);
        if !missing.is_empty() {
            return Err(RehearsalError::IncompleteCasting { missing });
        }

        let mut out = Vec::new();
        self.release(&mut out);
        self.index = 0;
        self.rate_limit = None;
        self.set_phase(Phase::Rehearsing, &mut out);
        self.enter_turn(&mut out);
        Ok(out)
    }

    fn set_phase(&mut self, phase: Phase, out: &mut Vec<Command>) {
        if self.phase == phase {
            return;
        }
        tracing::info!(target: LOG_TARGET, from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
        out.push(Command::Notify(Notice::PhaseChanged(phase)));
    }

    /// Abandons the current turn: invalidates outstanding completions and frees audio and
    /// the microphone.
    fn release(&mut self, out: &mut Vec<Command>) {
        if matches!(self.pending, Pending::Synthesis | Pending::Playback) {
            out.push(Command::ReleaseAudio);
        }
        self.stop_dictation(out);
        self.pending = Pending::Nothing;
        self.turn = self.turn.next();
    }

    fn stop_dictation(&mut self, out: &mut Vec<Command>) {
        if self.dictation_active {
            self.dictation_active = false;
            out.push(Command::StopDictation);
        }
    }

    fn advance(&mut self, out: &mut Vec<Command>) {
        self.index += 1;
        self.enter_turn(out);
    }

    fn finish(&mut self, out: &mut Vec<Command>) {
        self.index = self.script.len();
        self.pending = Pending::Nothing;
        self.set_phase(Phase::Complete, out);
    }

    fn schedule(&mut self, reason: TimerReason, out: &mut Vec<Command>) {
        let delay = match reason {
            TimerReason::Direction => self.timings.direction_delay(),
            TimerReason::NoVoice => self.timings.no_voice_delay(),
            TimerReason::Failure => self.timings.failure_delay(),
        };
        self.pending = Pending::Timer;
        out.push(Command::Schedule {
            turn: self.turn,
            delay,
            reason,
        });
    }

    fn enter_turn(&mut self, out: &mut Vec<Command>) {
        self.turn = self.turn.next();
        self.pending = Pending::Nothing;
        self.transcript = Transcript::default();

        let Some(cue) = self.script.cues.get(self.index).cloned() else {
            self.stop_dictation(out);
            self.finish(out);
            return;
        };
        out.push(Command::Notify(Notice::CueStarted { index: self.index }));

        let character = match (cue.kind, cue.character) {
            (CueKind::Dialogue, Some(c)) => c,
            _ => {
                self.stop_dictation(out);
                self.schedule(TimerReason::Direction, out);
                return;
            }
        };

        let assignment = self.assignments.get(&character).cloned();
        match assignment {
            Some(a) if a.role == Role::User => {
                self.pending = Pending::User;
                if !self.dictation_supported {
                    out.push(Command::Notify(Notice::DictationUnavailable));
                } else if !self.dictation_active {
                    self.dictation_active = true;
                    out.push(Command::StartDictation);
                }
            }
            assignment => {
                self.stop_dictation(out);
                match assignment.and_then(|a| a.voice_id) {
                    Some(voice) => {
                        self.pending = Pending::Synthesis;
                        out.push(Command::Synthesize {
                            turn: self.turn,
                            text: cue.text,
                            voice,
                        });
                    }
                    None => {
                        tracing::debug!(target: LOG_TARGET, %character, "no voice assigned, pausing briefly");
                        self.schedule(TimerReason::NoVoice, out);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackError;
    use crate::tts::{SynthesizedAudio, UPGRADE_URL};
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    const TWO_HANDER: &str = "BOT: Good evening.\nME: Hello there.";

    fn audio() -> SynthesizedAudio {
        SynthesizedAudio {
            content_type: "audio/mpeg".into(),
            bytes: Bytes::from_static(b"ID3"),
        }
    }

    fn quota() -> QuotaExceeded {
        QuotaExceeded {
            message: "out of free generations".into(),
            remaining: 0,
            limit: Some(10),
            reset_at: None,
            upgrade_url: UPGRADE_URL.into(),
        }
    }

    /// Engine in Casting with BOT on an AI voice and ME on the user.
    fn cast_engine(script: &str) -> RehearsalEngine {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        engine.set_script(script).unwrap();
        engine.confirm_script().unwrap();
        engine
            .assign("BOT", Role::Ai, Some(VoiceId("v-bot".into())))
            .unwrap();
        engine.assign("ME", Role::User, None).unwrap();
        engine
    }

    fn synth_turn(cmds: &[Command]) -> TurnId {
        cmds.iter()
            .find_map(|c| match c {
                Command::Synthesize { turn, .. } => Some(*turn),
                _ => None,
            })
            .expect("synthesis requested")
    }

    fn scheduled(cmds: &[Command]) -> Option<(TurnId, Duration, TimerReason)> {
        cmds.iter().find_map(|c| match c {
            Command::Schedule { turn, delay, reason } => Some((*turn, *delay, *reason)),
            _ => None,
        })
    }

    #[test]
    fn empty_or_direction_only_script_blocks_casting() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        engine.set_script("").unwrap();
        assert_eq!(
            engine.confirm_script().unwrap_err(),
            RehearsalError::ParseYieldedNoCharacters
        );

        engine.set_script("INT. KITCHEN - NIGHT\nFADE OUT.").unwrap();
        assert_eq!(
            engine.confirm_script().unwrap_err(),
            RehearsalError::ParseYieldedNoCharacters
        );
        assert_eq!(engine.phase(), Phase::Setup);
    }

    #[test]
    fn incomplete_cast_names_the_missing() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        engine.set_script(TWO_HANDER).unwrap();
        engine.confirm_script().unwrap();
        engine.assign("BOT", Role::Ai, None).unwrap();
        assert_eq!(
            engine.start().unwrap_err(),
            RehearsalError::IncompleteCasting {
                missing: vec!["ME".into()]
            }
        );
        assert_eq!(engine.phase(), Phase::Casting);
    }

    #[test]
    fn ai_then_user_turn_taking() {
        let mut engine = cast_engine(TWO_HANDER);
        let cmds = engine.start().unwrap();
        assert_eq!(engine.phase(), Phase::Rehearsing);
        assert!(cmds.iter().any(|c| matches!(
            c,
            Command::Synthesize { text, voice, .. } if text == "Good evening." && voice.as_str() == "v-bot"
        )));
        let turn = synth_turn(&cmds);

        let cmds = engine.handle(Event::SynthesisFinished {
            turn,
            result: Ok(audio()),
        });
        assert!(matches!(cmds.as_slice(), [Command::Play { .. }]));
        assert!(engine.cursor().playing_audio);
        assert_eq!(engine.cursor().current_index, 0);

        let cmds = engine.handle(Event::PlaybackFinished { turn, result: Ok(()) });
        assert!(cmds.contains(&Command::StartDictation));
        let cursor = engine.cursor();
        assert_eq!(cursor.current_index, 1);
        assert!(cursor.awaiting_user);
        assert!(!cursor.playing_audio);
        assert!(engine.is_dictating());

        let cmds = engine.user_done().unwrap();
        assert!(cmds.contains(&Command::StopDictation));
        assert_eq!(engine.phase(), Phase::Complete);
        let cursor = engine.cursor();
        assert_eq!(cursor.current_index, 2);
        assert!(!cursor.running && !cursor.awaiting_user);
    }

    #[test]
    fn rate_limit_pauses_without_advancing() {
        let mut engine = cast_engine(TWO_HANDER);
        let turn = synth_turn(&engine.start().unwrap());

        let cmds = engine.handle(Event::SynthesisFinished {
            turn,
            result: Err(TtsError::RateLimited(quota())),
        });
        assert!(cmds.contains(&Command::Notify(Notice::RateLimited(quota()))));
        assert!(scheduled(&cmds).is_none());
        assert_eq!(engine.phase(), Phase::Paused);
        assert_eq!(engine.cursor(), Cursor::default());
        assert_eq!(engine.rate_limit(), Some(&quota()));

        // Resuming retries the same line and clears the banner.
        let cmds = engine.toggle_pause().unwrap();
        assert!(engine.rate_limit().is_none());
        assert_eq!(engine.cursor().current_index, 0);
        assert!(synth_turn(&cmds) > turn);
    }

    #[test]
    fn generic_synthesis_failure_advances_after_delay() {
        let mut engine = cast_engine(TWO_HANDER);
        let turn = synth_turn(&engine.start().unwrap());
        let cmds = engine.handle(Event::SynthesisFinished {
            turn,
            result: Err(TtsError::Api {
                status: 500,
                message: "boom".into(),
            }),
        });
        let (timer_turn, delay, reason) = scheduled(&cmds).unwrap();
        assert_eq!(reason, TimerReason::Failure);
        assert_eq!(delay, Duration::from_millis(1000));
        assert_eq!(engine.cursor().current_index, 0);

        engine.handle(Event::TimerFired { turn: timer_turn });
        assert_eq!(engine.cursor().current_index, 1);
        assert!(engine.cursor().awaiting_user);
    }

    #[test]
    fn playback_failure_is_treated_like_synthesis_failure() {
        let mut engine = cast_engine(TWO_HANDER);
        let turn = synth_turn(&engine.start().unwrap());
        engine.handle(Event::SynthesisFinished {
            turn,
            result: Ok(audio()),
        });
        let cmds = engine.handle(Event::PlaybackFinished {
            turn,
            result: Err(PlaybackError::Task("device vanished".into())),
        });
        assert_eq!(scheduled(&cmds).map(|s| s.2), Some(TimerReason::Failure));
        assert!(!engine.cursor().playing_audio);
    }

    #[test]
    fn skip_advances_exactly_one_and_releases_audio() {
        let mut engine = cast_engine("BOT: One.\nBOT: Two.\nME: Three.");
        let turn = synth_turn(&engine.start().unwrap());
        engine.handle(Event::SynthesisFinished {
            turn,
            result: Ok(audio()),
        });
        assert!(engine.cursor().playing_audio);

        let cmds = engine.skip().unwrap();
        assert_eq!(cmds.first(), Some(&Command::ReleaseAudio));
        assert_eq!(engine.cursor().current_index, 1);

        // The abandoned clip finishing late must not move the cursor again.
        engine.handle(Event::PlaybackFinished { turn, result: Ok(()) });
        assert_eq!(engine.cursor().current_index, 1);

        engine.skip().unwrap();
        assert_eq!(engine.cursor().current_index, 2);
        assert!(engine.cursor().awaiting_user);

        let cmds = engine.skip().unwrap();
        assert!(cmds.contains(&Command::StopDictation));
        assert_eq!(engine.phase(), Phase::Complete);
        assert!(engine.skip().is_err());
    }

    #[test]
    fn late_synthesis_after_pause_is_ignored() {
        let mut engine = cast_engine(TWO_HANDER);
        let turn = synth_turn(&engine.start().unwrap());
        let cmds = engine.toggle_pause().unwrap();
        assert!(cmds.contains(&Command::ReleaseAudio));
        assert_eq!(engine.phase(), Phase::Paused);

        assert!(engine
            .handle(Event::SynthesisFinished {
                turn,
                result: Ok(audio()),
            })
            .is_empty());

        // Still stale after resuming: the resumed turn has a new stamp.
        let resumed = synth_turn(&engine.toggle_pause().unwrap());
        assert!(engine
            .handle(Event::SynthesisFinished {
                turn,
                result: Ok(audio()),
            })
            .is_empty());
        assert!(resumed > turn);
        assert!(!engine.cursor().playing_audio);
    }

    #[test]
    fn pausing_on_a_user_line_stops_dictation() {
        let mut engine = cast_engine("ME: Hi.\nBOT: Hey.");
        let cmds = engine.start().unwrap();
        assert!(cmds.contains(&Command::StartDictation));

        let cmds = engine.toggle_pause().unwrap();
        assert!(cmds.contains(&Command::StopDictation));
        assert!(!cmds.contains(&Command::ReleaseAudio));
        assert!(!engine.cursor().awaiting_user);
        assert!(engine.user_done().is_err());

        let cmds = engine.toggle_pause().unwrap();
        assert!(cmds.contains(&Command::StartDictation));
        assert!(engine.cursor().awaiting_user);
    }

    #[test]
    fn directions_and_voiceless_lines_wait_on_timers() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        engine.set_script("(Lights up)\nBOT: Line.\nME: Mine.").unwrap();
        engine.confirm_script().unwrap();
        engine.assign("BOT", Role::Ai, None).unwrap();
        engine.assign("ME", Role::User, None).unwrap();

        let (turn, delay, reason) = scheduled(&engine.start().unwrap()).unwrap();
        assert_eq!((delay, reason), (Duration::from_millis(2000), TimerReason::Direction));

        // A timer from an earlier turn is ignored.
        assert!(engine
            .handle(Event::TimerFired {
                turn: TurnId::default()
            })
            .is_empty());

        let (turn, delay, reason) = scheduled(&engine.handle(Event::TimerFired { turn })).unwrap();
        assert_eq!((delay, reason), (Duration::from_millis(1500), TimerReason::NoVoice));
        assert_eq!(engine.cursor().current_index, 1);

        engine.handle(Event::TimerFired { turn });
        assert_eq!(engine.cursor().current_index, 2);
        assert!(engine.cursor().awaiting_user);
    }

    #[test]
    fn stop_resets_to_casting_and_restart_starts_over() {
        let mut engine = cast_engine(TWO_HANDER);
        let turn = synth_turn(&engine.start().unwrap());
        engine.handle(Event::SynthesisFinished {
            turn,
            result: Ok(audio()),
        });
        engine.handle(Event::PlaybackFinished { turn, result: Ok(()) });
        assert_eq!(engine.cursor().current_index, 1);

        let cmds = engine.stop().unwrap();
        assert!(cmds.contains(&Command::StopDictation));
        assert_eq!(engine.phase(), Phase::Casting);
        assert_eq!(engine.cursor(), Cursor::default());

        engine.start().unwrap();
        engine.user_done().unwrap_err();
        let cmds = engine.restart().unwrap();
        assert!(cmds.contains(&Command::ReleaseAudio));
        assert_eq!(engine.cursor().current_index, 0);
        assert!(engine.cursor().running);
    }

    #[test]
    fn restart_from_complete() {
        let mut engine = cast_engine("ME: Only line.");
        engine.start().unwrap();
        engine.user_done().unwrap();
        assert_eq!(engine.phase(), Phase::Complete);

        engine.restart().unwrap();
        assert_eq!(engine.phase(), Phase::Rehearsing);
        assert_eq!(engine.cursor().current_index, 0);
        assert!(engine.cursor().awaiting_user);
    }

    #[test]
    fn stop_and_restart_are_rejected_in_setup() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        assert!(matches!(
            engine.stop(),
            Err(RehearsalError::InvalidTransition { phase: Phase::Setup, .. })
        ));
        assert!(engine.restart().is_err());
    }

    #[test]
    fn edit_script_returns_to_setup_and_keeps_cast() {
        let mut engine = cast_engine(TWO_HANDER);
        engine.edit_script().unwrap();
        assert_eq!(engine.phase(), Phase::Setup);
        engine.set_script("BOT: New line.\nME: Reply.\nNEWBIE: Hi.").unwrap();
        engine.confirm_script().unwrap();
        assert_eq!(
            engine.start().unwrap_err(),
            RehearsalError::IncompleteCasting {
                missing: vec!["NEWBIE".into()]
            }
        );
    }

    #[test]
    fn cast_is_frozen_while_rehearsing() {
        let mut engine = cast_engine(TWO_HANDER);
        engine.start().unwrap();
        assert!(engine.assign("BOT", Role::User, None).is_err());
    }

    #[test]
    fn restored_cast_is_trimmed_to_the_current_roster() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        engine.set_script("A: one\nB: two").unwrap();
        engine.confirm_script().unwrap();

        let mut saved = CastAssignments::new();
        saved.set_assignment("A", Role::Ai, Some(VoiceId("v1".into())));
        saved.set_assignment("GONE", Role::User, None);
        engine.set_assignments(saved).unwrap();

        assert_eq!(engine.assignments().len(), 1);
        assert!(engine.assignments().get("GONE").is_none());
        assert_eq!(engine.assignments().get("A").unwrap().role, Role::Ai);
    }

    #[test]
    fn auto_cast_keeps_existing_choices() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), true);
        engine.set_script("A: one\nB: two\nC: three").unwrap();
        engine.confirm_script().unwrap();
        engine.assign("B", Role::User, None).unwrap();

        let catalog = vec![VoiceCatalogEntry {
            id: "only".into(),
            display_name: "Only".into(),
        }];
        engine
            .auto_cast(&catalog, &mut StdRng::seed_from_u64(3))
            .unwrap();
        let cast = engine.assignments();
        assert_eq!(cast.get("A").unwrap().role, Role::User);
        assert_eq!(cast.get("B").unwrap().role, Role::User);
        assert_eq!(
            cast.get("C").unwrap().voice_id,
            Some(VoiceId("only".into()))
        );
        assert!(engine.start().is_ok());
    }

    #[test]
    fn user_line_without_dictation_still_waits_for_done() {
        let mut engine = RehearsalEngine::new(RehearsalTimings::default(), false);
        engine.set_script("ME: Solo.").unwrap();
        engine.confirm_script().unwrap();
        engine.assign("ME", Role::User, None).unwrap();

        let cmds = engine.start().unwrap();
        assert!(cmds.contains(&Command::Notify(Notice::DictationUnavailable)));
        assert!(!cmds.contains(&Command::StartDictation));
        assert!(engine.cursor().awaiting_user);
        engine.user_done().unwrap();
        assert_eq!(engine.phase(), Phase::Complete);
    }

    #[test]
    fn transcripts_accumulate_for_the_current_line_only() {
        let mut engine = cast_engine("ME: To be or not.\nBOT: Indeed.");
        engine.start().unwrap();
        engine.handle(Event::Dictation(DictationEvent::Interim("to".into())));
        assert_eq!(engine.transcript(), ("to", ""));
        engine.handle(Event::Dictation(DictationEvent::Final("to be".into())));
        engine.handle(Event::Dictation(DictationEvent::Final("or not".into())));
        assert_eq!(engine.transcript(), ("", "to be or not"));

        let cmds = engine.handle(Event::Dictation(DictationEvent::Error("mic lost".into())));
        assert!(cmds.contains(&Command::Notify(Notice::DictationFailed("mic lost".into()))));
        assert!(!engine.is_dictating());

        engine.user_done().unwrap();
        assert_eq!(engine.transcript(), ("", ""));
        assert!(engine
            .handle(Event::Dictation(DictationEvent::Final("late".into())))
            .is_empty());
    }
}

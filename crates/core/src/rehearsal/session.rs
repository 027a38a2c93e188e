use crate::config::ApiKey;
use crate::dictation::{Dictation, DictationEvent};
use crate::playback::PlaybackSink;
use crate::quota::ClientId;
use crate::rehearsal::{
    Command, Event, Notice, Phase, RateLimitObserver, RehearsalEngine, RehearsalError,
};
use crate::tts::{TtsClient, TtsRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "rehearsal::session";

/// Runs a [`RehearsalEngine`] against real collaborators.
///
/// The session is the single owner of the engine. Synthesis, playback and timers run as
/// spawned tasks that only report back through the event channel; [`next_event`] and
/// [`handle`] apply those reports one at a time. At most one audio task (synthesis or
/// playback) is alive, and it is aborted whenever the engine releases audio and when the
/// session is dropped.
///
/// [`next_event`]: RehearsalSession::next_event
/// [`handle`]: RehearsalSession::handle
pub struct RehearsalSession {
    engine: RehearsalEngine,
    tts: Arc<dyn TtsClient>,
    playback: Arc<dyn PlaybackSink>,
    dictation: Box<dyn Dictation>,
    dictation_rx: Option<mpsc::UnboundedReceiver<DictationEvent>>,
    credential: Option<ApiKey>,
    client_id: Option<ClientId>,
    observer: Option<Box<dyn RateLimitObserver>>,
    notices: Option<mpsc::UnboundedSender<Notice>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    audio: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl RehearsalSession {
    pub fn new(
        engine: RehearsalEngine,
        tts: Arc<dyn TtsClient>,
        playback: Arc<dyn PlaybackSink>,
        dictation: Box<dyn Dictation>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            tts,
            playback,
            dictation,
            dictation_rx: None,
            credential: None,
            client_id: None,
            observer: None,
            notices: None,
            events_tx,
            events_rx,
            audio: None,
            timer: None,
        }
    }

    /// Transcripts produced by the dictation backend.
    pub fn with_dictation_events(mut self, rx: mpsc::UnboundedReceiver<DictationEvent>) -> Self {
        self.dictation_rx = Some(rx);
        self
    }

    /// The user's own speech key; requests carrying it skip the shared quota.
    pub fn with_credential(mut self, credential: Option<ApiKey>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn RateLimitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns a stream of everything the engine wants the UI to know. Replaces any
    /// previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Notice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notices = Some(tx);
        rx
    }

    pub fn engine(&self) -> &RehearsalEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RehearsalEngine {
        &mut self.engine
    }

    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    /// Swaps the bring-your-own key, e.g. after a quota banner. Takes effect on the next
    /// synthesis request.
    pub fn set_credential(&mut self, credential: Option<ApiKey>) {
        self.credential = credential;
        if self.credential.is_some() {
            if let Some(observer) = self.observer.as_mut() {
                observer.cleared();
            }
        }
    }

    pub fn start(&mut self) -> Result<(), RehearsalError> {
        let cmds = self.engine.start()?;
        self.execute(cmds);
        Ok(())
    }

    pub fn restart(&mut self) -> Result<(), RehearsalError> {
        let cmds = self.engine.restart()?;
        self.execute(cmds);
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<(), RehearsalError> {
        let cmds = self.engine.toggle_pause()?;
        if self.engine.phase() == Phase::Rehearsing {
            if let Some(observer) = self.observer.as_mut() {
                observer.cleared();
            }
        }
        self.execute(cmds);
        Ok(())
    }

    pub fn skip(&mut self) -> Result<(), RehearsalError> {
        let cmds = self.engine.skip()?;
        self.execute(cmds);
        Ok(())
    }

    pub fn user_done(&mut self) -> Result<(), RehearsalError> {
        let cmds = self.engine.user_done()?;
        self.execute(cmds);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), RehearsalError> {
        let cmds = self.engine.stop()?;
        self.cancel_timer();
        self.execute(cmds);
        Ok(())
    }

    /// Waits for the next completion or transcript.
    pub async fn next_event(&mut self) -> Event {
        let dictation_rx = &mut self.dictation_rx;
        let events_rx = &mut self.events_rx;
        tokio::select! {
            Some(event) = events_rx.recv() => event,
            Some(event) = recv_dictation(dictation_rx) => Event::Dictation(event),
        }
    }

    pub fn handle(&mut self, event: Event) {
        let cmds = self.engine.handle(event);
        self.execute(cmds);
    }

    /// Applies events until the rehearsal leaves the running phase or starts waiting on the
    /// user.
    pub async fn run_until_idle(&mut self) {
        loop {
            let cursor = self.engine.cursor();
            if !cursor.running || cursor.awaiting_user {
                return;
            }
            let event = self.next_event().await;
            self.handle(event);
        }
    }

    fn execute(&mut self, cmds: Vec<Command>) {
        for cmd in cmds {
            match cmd {
                Command::StartDictation => {
                    if let Err(e) = self.dictation.start() {
                        tracing::warn!(target: LOG_TARGET, error = %e, "dictation did not start");
                        self.notify(Notice::DictationUnavailable);
                    }
                }
                Command::StopDictation => self.dictation.stop(),
                Command::Synthesize { turn, text, voice } => {
                    let request = TtsRequest {
                        text,
                        voice,
                        credential: self.credential.clone(),
                        client_id: self.client_id.clone(),
                    };
                    let tts = Arc::clone(&self.tts);
                    let tx = self.events_tx.clone();
                    self.replace_audio(tokio::spawn(async move {
                        let result = tts.synthesize(request).await;
                        let _ = tx.send(Event::SynthesisFinished { turn, result });
                    }));
                }
                Command::Play { turn, audio } => {
                    let playback = Arc::clone(&self.playback);
                    let tx = self.events_tx.clone();
                    self.replace_audio(tokio::spawn(async move {
                        let result = playback.play(audio).await;
                        let _ = tx.send(Event::PlaybackFinished { turn, result });
                    }));
                }
                Command::ReleaseAudio => self.release_audio(),
                Command::Schedule { turn, delay, reason } => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        ?reason,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling advance"
                    );
                    let tx = self.events_tx.clone();
                    self.cancel_timer();
                    self.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Event::TimerFired { turn });
                    }));
                }
                Command::Notify(notice) => {
                    if let Notice::RateLimited(quota) = &notice {
                        if let Some(observer) = self.observer.as_mut() {
                            observer.rate_limited(quota);
                        }
                    }
                    self.notify(notice);
                }
            }
        }
    }

    fn notify(&mut self, notice: Notice) {
        if let Some(tx) = &self.notices {
            if tx.send(notice).is_err() {
                self.notices = None;
            }
        }
    }

    fn replace_audio(&mut self, handle: JoinHandle<()>) {
        self.release_audio();
        self.audio = Some(handle);
    }

    fn release_audio(&mut self) {
        if let Some(handle) = self.audio.take() {
            handle.abort();
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

impl Drop for RehearsalSession {
    fn drop(&mut self) {
        self.release_audio();
        self.cancel_timer();
        if self.dictation.is_listening() {
            self.dictation.stop();
        }
    }
}

async fn recv_dictation(
    rx: &mut Option<mpsc::UnboundedReceiver<DictationEvent>>,
) -> Option<DictationEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

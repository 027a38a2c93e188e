use crate::playback::{PlaybackError, PlaybackSink};
use crate::tts::SynthesizedAudio;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

const LOG_TARGET: &str = "playback::silent";

/// Sink that plays nothing and finishes after a fixed pause.
#[derive(Clone, Debug, Default)]
pub struct SilentPlaybackSink {
    hold: Duration,
}

impl SilentPlaybackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

impl PlaybackSink for SilentPlaybackSink {
    fn play(&self, audio: SynthesizedAudio) -> BoxFuture<'_, Result<(), PlaybackError>> {
        async move {
            tracing::debug!(target: LOG_TARGET, bytes = audio.bytes.len(), "silent playback");
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            Ok(())
        }
        .boxed()
    }
}

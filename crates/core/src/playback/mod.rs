mod audio;
mod silent;

use crate::decode::DecodeError;
use crate::tts::SynthesizedAudio;
use futures::future::BoxFuture;

pub use audio::AudioPlaybackSink;
#[cfg(feature = "playback-device-enum")]
pub use audio::enumerate_output_device_names;
pub use silent::SilentPlaybackSink;

#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    #[error("audio output unavailable: {details}")]
    AudioOutputUnavailable { details: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("playback task failed: {0}")]
    Task(String),
}

/// Plays one synthesized clip.
///
/// The returned future resolves when playback has finished. Dropping it before then
/// must stop the sound and release the clip.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, audio: SynthesizedAudio) -> BoxFuture<'_, Result<(), PlaybackError>>;
}

use crate::decode::{decode_compressed, extension_for_content_type, PcmAudio};
use crate::playback::{PlaybackError, PlaybackSink};
use crate::tts::SynthesizedAudio;
use futures::future::BoxFuture;
use futures::FutureExt;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::source::Source;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOG_TARGET: &str = "playback::audio";
const DRAIN_POLL: Duration = Duration::from_millis(40);

/// Opens a value on first use and keeps it for the lifetime of the cell.
///
/// [`rodio::OutputStream`] must outlive every sink attached to it; reopening it per
/// clip cuts playback short.
struct LazyInit<T> {
    value: Mutex<Option<T>>,
}

impl<T> LazyInit<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    fn with<R, E>(
        &self,
        init: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, E> {
        let mut guard = match self.value.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(target: LOG_TARGET, "output stream lock was poisoned; recovering");
                poisoned.into_inner()
            }
        };
        let value = match guard.take() {
            Some(v) => v,
            None => init()?,
        };
        let out = f(&value);
        *guard = Some(value);
        Ok(out)
    }
}

/// Plays synthesized clips on the local output device.
///
/// Each clip gets its own [`Sink`]. The sink lives inside the returned future, so
/// dropping or aborting the future silences the clip immediately.
#[derive(Clone)]
pub struct AudioPlaybackSink {
    output_device_name: Option<String>,
    disabled: Arc<AtomicBool>,
    output_stream: Arc<LazyInit<OutputStream>>,
}

impl AudioPlaybackSink {
    pub fn new() -> Self {
        Self {
            output_device_name: None,
            disabled: Arc::new(AtomicBool::new(false)),
            output_stream: Arc::new(LazyInit::new()),
        }
    }

    pub fn with_output_device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.output_device_name = Some(name.into());
        self
    }

    fn open_output_stream(&self) -> Result<OutputStream, PlaybackError> {
        if let Some(wanted) = self.output_device_name.as_deref() {
            match open_named_output_stream(wanted) {
                Ok(stream) => return Ok(stream),
                Err(details) => tracing::warn!(
                    target: LOG_TARGET,
                    wanted_device = %wanted,
                    %details,
                    "configured output device unusable; falling back to default"
                ),
            }
        }
        OutputStreamBuilder::open_default_stream().map_err(|e| {
            PlaybackError::AudioOutputUnavailable {
                details: format!("open default output stream: {e}"),
            }
        })
    }

    fn connect_sink(&self) -> Result<Sink, PlaybackError> {
        self.output_stream.with(
            || self.open_output_stream(),
            |stream| Sink::connect_new(stream.mixer()),
        )
    }

    async fn decode(audio: SynthesizedAudio) -> Result<PcmAudio, PlaybackError> {
        let hint = extension_for_content_type(&audio.content_type);
        let bytes = audio.bytes;
        tokio::task::spawn_blocking(move || decode_compressed(bytes, hint))
            .await
            .map_err(|e| PlaybackError::Task(e.to_string()))?
            .map_err(PlaybackError::from)
    }
}

impl Default for AudioPlaybackSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for AudioPlaybackSink {
    fn play(&self, audio: SynthesizedAudio) -> BoxFuture<'_, Result<(), PlaybackError>> {
        async move {
            if self.disabled.load(Ordering::Relaxed) {
                return Ok(());
            }

            let pcm = Self::decode(audio).await?;
            if pcm.is_blank() {
                tracing::warn!(
                    target: LOG_TARGET,
                    sample_rate_hz = pcm.sample_rate_hz,
                    channels = pcm.channels,
                    samples_i16 = pcm.pcm_i16.len(),
                    "skipping playback of empty clip"
                );
                return Ok(());
            }

            let sink = match self.connect_sink() {
                Ok(s) => s,
                Err(e) => {
                    if let PlaybackError::AudioOutputUnavailable { details } = &e {
                        if details.contains("NoDevice") {
                            self.disabled.store(true, Ordering::Relaxed);
                        }
                    }
                    return Err(e);
                }
            };

            tracing::debug!(
                target: LOG_TARGET,
                duration_ms = pcm.duration().as_millis() as u64,
                "playing clip"
            );
            sink.append(PcmSource::new(pcm));
            while !sink.empty() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
            Ok(())
        }
        .boxed()
    }
}

fn normalize_device_name(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn open_named_output_stream(wanted: &str) -> Result<OutputStream, String> {
    let wanted_norm = normalize_device_name(wanted);
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| format!("failed to list output devices: {e}"))?;

    let mut available = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_owned());
        if normalize_device_name(&name) == wanted_norm {
            return OutputStreamBuilder::from_device(device)
                .and_then(|b| b.open_stream_or_fallback())
                .map_err(|e| format!("open failed: {e}"));
        }
        available.push(name);
    }
    Err(format!(
        "not found; available_output_devices={}",
        format_device_list(&available)
    ))
}

fn format_device_list(devices: &[String]) -> String {
    if devices.is_empty() {
        return "<none>".to_owned();
    }
    devices.join(", ")
}

#[cfg(feature = "playback-device-enum")]
pub fn enumerate_output_device_names() -> Result<Vec<String>, PlaybackError> {
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::AudioOutputUnavailable {
            details: format!("failed to list output devices: {e}"),
        })?;
    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".to_owned()))
        .collect())
}

struct PcmSource {
    samples: std::vec::IntoIter<i16>,
    sample_rate: u32,
    channels: u16,
}

impl PcmSource {
    fn new(pcm: PcmAudio) -> Self {
        Self {
            samples: pcm.pcm_i16.into_iter(),
            sample_rate: pcm.sample_rate_hz,
            channels: pcm.channels,
        }
    }
}

impl Iterator for PcmSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        self.samples.next().map(|s| s as f32 / i16::MAX as f32)
    }
}

impl Source for PcmSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

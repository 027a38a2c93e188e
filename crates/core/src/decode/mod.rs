use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PcmAudio {
    pub sample_rate_hz: u32,
    pub channels: u16,
    /// Interleaved samples.
    pub pcm_i16: Vec<i16>,
}

impl PcmAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate_hz == 0 || self.channels == 0 {
            return Duration::from_secs(0);
        }
        let frames = self.pcm_i16.len() as u64 / u64::from(self.channels);
        let micros = (u128::from(frames) * 1_000_000u128) / u128::from(self.sample_rate_hz);
        Duration::from_micros(micros.min(u128::from(u64::MAX)) as u64)
    }

    pub fn is_blank(&self) -> bool {
        self.sample_rate_hz == 0
            || self.channels == 0
            || self.pcm_i16.is_empty()
            || self.pcm_i16.len() % usize::from(self.channels) != 0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unsupported audio container: {0}")]
    Unsupported(String),

    #[error("audio has no playable track")]
    NoTrack,

    #[error("decode failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Decodes compressed speech (MP3 from the synthesis API) into interleaved PCM.
pub fn decode_compressed(bytes: Bytes, extension_hint: Option<&str>) -> Result<PcmAudio> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut out = PcmAudio {
        sample_rate_hz: track.codec_params.sample_rate.unwrap_or(0),
        channels: track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0),
        pcm_i16: Vec::new(),
    };

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Failed(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                out.sample_rate_hz = spec.rate;
                out.channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                out.pcm_i16.extend_from_slice(buf.samples());
            }
            // A corrupt frame is skipped; the rest of the clip still plays.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = %e, "skipping undecodable frame");
            }
            Err(e) => return Err(DecodeError::Failed(e.to_string())),
        }
    }

    Ok(out)
}

/// Maps a MIME type to the extension hint symphonia's probe understands.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        _ => None,
    }
}

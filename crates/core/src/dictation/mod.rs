//! Speech-to-text capture for the user's own lines.
//!
//! Implementations push [`DictationEvent`]s into whatever sink they were built with;
//! the rehearsal session routes them into the engine. A backend that cannot capture
//! audio reports itself unsupported and the user's turn still works, it just shows no
//! transcript.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DictationEvent {
    Interim(String),
    Final(String),
    Error(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DictationError {
    #[error("dictation is not supported on this device")]
    Unsupported,
    #[error("dictation failed to start: {0}")]
    StartFailed(String),
}

pub trait Dictation: Send {
    fn is_supported(&self) -> bool;
    fn start(&mut self) -> Result<(), DictationError>;
    fn stop(&mut self);
    fn is_listening(&self) -> bool;
}

/// Stand-in for devices without speech recognition.
#[derive(Clone, Debug, Default)]
pub struct UnsupportedDictation;

impl Dictation for UnsupportedDictation {
    fn is_supported(&self) -> bool {
        false
    }

    fn start(&mut self) -> Result<(), DictationError> {
        Err(DictationError::Unsupported)
    }

    fn stop(&mut self) {}

    fn is_listening(&self) -> bool {
        false
    }
}

/// Dictation fed by an external recognizer through a channel.
///
/// Transcripts pushed through the [`ChannelDictationFeed`] are only forwarded while
/// listening, mirroring a recognizer that has been stopped.
pub struct ChannelDictation {
    listening: Arc<AtomicBool>,
    starts: usize,
}

#[derive(Clone)]
pub struct ChannelDictationFeed {
    listening: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<DictationEvent>,
}

impl ChannelDictation {
    pub fn new(tx: mpsc::UnboundedSender<DictationEvent>) -> (Self, ChannelDictationFeed) {
        let listening = Arc::new(AtomicBool::new(false));
        (
            Self {
                listening: listening.clone(),
                starts: 0,
            },
            ChannelDictationFeed { listening, tx },
        )
    }

    pub fn start_count(&self) -> usize {
        self.starts
    }
}

impl Dictation for ChannelDictation {
    fn is_supported(&self) -> bool {
        true
    }

    fn start(&mut self) -> Result<(), DictationError> {
        if !self.listening.swap(true, Ordering::SeqCst) {
            self.starts += 1;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

impl ChannelDictationFeed {
    /// Returns false when the transcript was dropped because capture is stopped.
    pub fn push(&self, event: DictationEvent) -> bool {
        if !self.listening.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

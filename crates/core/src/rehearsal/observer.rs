use crate::tts::QuotaExceeded;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistent notice shown after the free speech quota runs out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitBanner {
    pub message: String,
    pub remaining: u32,
    pub limit: Option<u32>,
    pub reset_at: Option<DateTime<Local>>,
    pub upgrade_url: String,
}

impl From<&QuotaExceeded> for RateLimitBanner {
    fn from(q: &QuotaExceeded) -> Self {
        Self {
            message: q.message.clone(),
            remaining: q.remaining,
            limit: q.limit,
            reset_at: q.reset_at.map(DateTime::<Local>::from),
            upgrade_url: q.upgrade_url.clone(),
        }
    }
}

impl fmt::Display for RateLimitBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(limit) = self.limit {
            write!(f, " ({}/{} left)", self.remaining, limit)?;
        }
        if let Some(reset) = self.reset_at {
            write!(f, " Resets {}.", reset.format("%Y-%m-%d %H:%M"))?;
        }
        write!(
            f,
            " Add your own ElevenLabs key for unlimited use: {}",
            self.upgrade_url
        )
    }
}

/// Receives quota signals coming out of the rehearsal.
pub trait RateLimitObserver: Send {
    fn rate_limited(&mut self, quota: &QuotaExceeded);
    fn cleared(&mut self);
}

/// Keeps the banner that should currently be on screen. Clones share state, so one copy can
/// go to the session while the UI reads another.
#[derive(Clone, Debug, Default)]
pub struct BannerObserver {
    banner: Arc<Mutex<Option<RateLimitBanner>>>,
}

impl BannerObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<RateLimitBanner>> {
        match self.banner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn banner(&self) -> Option<RateLimitBanner> {
        self.slot().clone()
    }

    pub fn dismiss(&self) {
        self.slot().take();
    }
}

impl RateLimitObserver for BannerObserver {
    fn rate_limited(&mut self, quota: &QuotaExceeded) {
        *self.slot() = Some(RateLimitBanner::from(quota));
    }

    fn cleared(&mut self) {
        self.dismiss();
    }
}

//! Free-tier quota for speech synthesis.
//!
//! Each client gets a fixed number of requests per window. The window opens on the
//! client's first request and the counter resets once it has expired. Requests that
//! carry the user's own credential are not counted at all.

use crate::config::QuotaLimits;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

mod stored;

pub use stored::StoredQuota;

const LOG_TARGET: &str = "quota";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl ClientId {
    /// `client_` followed by nine random characters and the creation time in millis.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: String = rng
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self(format!("client_{suffix}{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Unlimited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: SystemTime,
}

/// `None` fields mean "no limit" and only occur on the unlimited tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaStatus {
    pub tier: Tier,
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub reset_at: Option<SystemTime>,
    pub character_limit: Option<usize>,
}

pub trait QuotaService: Send + Sync {
    fn check_and_increment(&self, client: &ClientId) -> QuotaDecision;
    fn status(&self, client: &ClientId, has_credential: bool) -> QuotaStatus;
    fn limits(&self) -> QuotaLimits;
}

/// Requests counted for one client in its current window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaUsage {
    pub count: u32,
    pub reset_at: SystemTime,
}

impl QuotaUsage {
    fn fresh(now: SystemTime, limits: &QuotaLimits) -> Self {
        Self {
            count: 0,
            reset_at: now + limits.window,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now > self.reset_at
    }
}

/// Rolls `usage` over if its window closed, then charges one request if any are left.
pub(crate) fn charge(
    usage: &mut QuotaUsage,
    limits: &QuotaLimits,
    client: &ClientId,
    now: SystemTime,
) -> QuotaDecision {
    if usage.is_expired(now) {
        *usage = QuotaUsage::fresh(now, limits);
    }
    if usage.count >= limits.daily_requests {
        tracing::info!(
            target: LOG_TARGET,
            client = %client.as_str(),
            "free tier exhausted"
        );
        return QuotaDecision {
            allowed: false,
            remaining: 0,
            reset_at: usage.reset_at,
        };
    }
    usage.count += 1;
    QuotaDecision {
        allowed: true,
        remaining: limits.daily_requests - usage.count,
        reset_at: usage.reset_at,
    }
}

pub(crate) fn status_of(
    usage: Option<&QuotaUsage>,
    limits: &QuotaLimits,
    has_credential: bool,
    now: SystemTime,
) -> QuotaStatus {
    if has_credential {
        return QuotaStatus {
            tier: Tier::Unlimited,
            remaining: None,
            limit: None,
            reset_at: None,
            character_limit: None,
        };
    }
    let (used, reset_at) = match usage {
        Some(u) if !u.is_expired(now) => (u.count, u.reset_at),
        _ => (0, now + limits.window),
    };
    QuotaStatus {
        tier: Tier::Free,
        remaining: Some(limits.daily_requests.saturating_sub(used)),
        limit: Some(limits.daily_requests),
        reset_at: Some(reset_at),
        character_limit: Some(limits.max_chars_per_request),
    }
}

struct Table {
    entries: HashMap<ClientId, QuotaUsage>,
    next_sweep: Option<SystemTime>,
}

/// Quota kept in process memory. Expired clients are swept out once per window.
pub struct InMemoryQuota {
    limits: QuotaLimits,
    table: Mutex<Table>,
}

impl InMemoryQuota {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            table: Mutex::new(Table {
                entries: HashMap::new(),
                next_sweep: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        match self.table.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(target: LOG_TARGET, "quota lock was poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn check_and_increment_at(&self, client: &ClientId, now: SystemTime) -> QuotaDecision {
        let mut table = self.lock();
        if table.next_sweep.map_or(true, |at| now >= at) {
            let before = table.entries.len();
            table.entries.retain(|_, u| !u.is_expired(now));
            table.next_sweep = Some(now + self.limits.window);
            let swept = before - table.entries.len();
            if swept > 0 {
                tracing::debug!(target: LOG_TARGET, swept, "dropped expired quota entries");
            }
        }
        let usage = table
            .entries
            .entry(client.clone())
            .or_insert_with(|| QuotaUsage::fresh(now, &self.limits));
        charge(usage, &self.limits, client, now)
    }

    pub fn status_at(&self, client: &ClientId, has_credential: bool, now: SystemTime) -> QuotaStatus {
        let table = self.lock();
        status_of(table.entries.get(client), &self.limits, has_credential, now)
    }

    /// Drops entries whose window has closed. Returns how many were removed.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let mut table = self.lock();
        let before = table.entries.len();
        table.entries.retain(|_, u| !u.is_expired(now));
        before - table.entries.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().entries.len()
    }
}

impl Default for InMemoryQuota {
    fn default() -> Self {
        Self::new(QuotaLimits::default())
    }
}

impl QuotaService for InMemoryQuota {
    fn check_and_increment(&self, client: &ClientId) -> QuotaDecision {
        self.check_and_increment_at(client, SystemTime::now())
    }

    fn status(&self, client: &ClientId, has_credential: bool) -> QuotaStatus {
        self.status_at(client, has_credential, SystemTime::now())
    }

    fn limits(&self) -> QuotaLimits {
        self.limits
    }
}

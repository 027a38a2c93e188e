use crate::config::QuotaLimits;
use crate::persist::{KeyValueStore, QUOTA_KEY};
use crate::quota::{
    charge, status_of, ClientId, QuotaDecision, QuotaService, QuotaStatus, QuotaUsage,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

const LOG_TARGET: &str = "quota::stored";

type UsageTable = BTreeMap<String, QuotaUsage>;

/// Quota whose counters are written to a [`KeyValueStore`] after every charge, so the
/// daily allowance carries over between runs.
///
/// The slot is read once, on first use. An unreadable slot starts the table empty; a
/// failed write is logged and the count still holds for this process.
pub struct StoredQuota<S: KeyValueStore> {
    limits: QuotaLimits,
    store: S,
    table: Mutex<Option<UsageTable>>,
}

impl<S: KeyValueStore> StoredQuota<S> {
    pub fn new(limits: QuotaLimits, store: S) -> Self {
        Self {
            limits,
            store,
            table: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<UsageTable>> {
        match self.table.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(target: LOG_TARGET, "quota lock was poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn load(&self) -> UsageTable {
        let raw = match self.store.get(QUOTA_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return UsageTable::new(),
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "could not read quota slot");
                return UsageTable::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(target: LOG_TARGET, error = %e, "ignoring unreadable quota slot");
            UsageTable::new()
        })
    }

    fn save(&self, table: &UsageTable) {
        let encoded = match serde_json::to_string(table) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "could not encode quota table");
                return;
            }
        };
        if let Err(e) = self.store.set(QUOTA_KEY, &encoded) {
            tracing::warn!(target: LOG_TARGET, error = %e, "could not save quota table");
        }
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut UsageTable) -> R) -> R {
        let mut guard = self.lock();
        let table = guard.get_or_insert_with(|| self.load());
        f(table)
    }

    pub fn check_and_increment_at(&self, client: &ClientId, now: SystemTime) -> QuotaDecision {
        self.with_table(|table| {
            table.retain(|_, u| !u.is_expired(now));
            let usage = table
                .entry(client.as_str().to_owned())
                .or_insert_with(|| QuotaUsage {
                    count: 0,
                    reset_at: now + self.limits.window,
                });
            let decision = charge(usage, &self.limits, client, now);
            if decision.allowed {
                self.save(table);
            }
            decision
        })
    }

    pub fn status_at(&self, client: &ClientId, has_credential: bool, now: SystemTime) -> QuotaStatus {
        self.with_table(|table| {
            status_of(table.get(client.as_str()), &self.limits, has_credential, now)
        })
    }
}

impl<S: KeyValueStore> QuotaService for StoredQuota<S> {
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

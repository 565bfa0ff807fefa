//! Stored records and the values derived from them.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{
    ClientId,
    entitlement::{Entitlement, Limit, resolve},
};

/// Per-client state as it is persisted, keyed by client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredClient {
    pub count: u64,
    pub entitlement: Option<Entitlement>,
    pub last_updated: Timestamp,
    /// Part of `count` already carried over to a replacement id.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub migrated_count: u64,
}

impl StoredClient {
    /// The zero-value record written on first access.
    pub fn new(now: Timestamp) -> Self {
        Self {
            count: 0,
            entitlement: None,
            last_updated: now,
            migrated_count: 0,
        }
    }

    /// Calls not yet carried over to a replacement id.
    pub fn pending_migration(&self) -> u64 {
        self.count.saturating_sub(self.migrated_count)
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Per-client state returned by the storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub count: u64,
    pub entitlement: Option<Entitlement>,
    pub last_updated: Timestamp,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub migrated_count: u64,
}

impl ClientRecord {
    pub fn from_stored(client_id: ClientId, stored: &StoredClient) -> Self {
        Self {
            client_id,
            count: stored.count,
            entitlement: stored.entitlement.clone(),
            last_updated: stored.last_updated,
            migrated_count: stored.migrated_count,
        }
    }
}

/// The usage of one client as seen by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub count: u64,
    pub limit: Limit,
    pub remaining: Limit,
    pub is_limit_reached: bool,
    pub is_premium: bool,
    /// The entitlement in effect. Expired entitlements are not reported.
    pub entitlement: Option<Entitlement>,
}

impl UsageSnapshot {
    pub fn compose(record: &ClientRecord, now: Timestamp, free_limit: u64) -> Self {
        let resolution = resolve(record.entitlement.as_ref(), now, free_limit);
        let limit = resolution.effective_limit;

        Self {
            count: record.count,
            limit,
            remaining: limit.remaining(record.count),
            is_limit_reached: limit.is_reached(record.count),
            is_premium: resolution.is_premium,
            entitlement: if resolution.expired {
                None
            } else {
                record.entitlement.clone()
            },
        }
    }

    /// The conservative snapshot reported when storage cannot be read.
    pub fn free_tier(free_limit: u64) -> Self {
        let limit = Limit::Bounded(free_limit);

        Self {
            count: 0,
            limit,
            remaining: limit.remaining(0),
            is_limit_reached: limit.is_reached(0),
            is_premium: false,
            entitlement: None,
        }
    }
}

/// Site-wide usage of one calendar month, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSite {
    pub total_count: u64,
    pub max_limit: u64,
}

impl StoredSite {
    pub fn new(max_limit: u64) -> Self {
        Self {
            total_count: 0,
            max_limit,
        }
    }
}

/// Site-wide usage of one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteAggregate {
    pub period: String,
    pub total_count: u64,
    pub max_limit: u64,
}

impl SiteAggregate {
    pub fn from_stored(period: &str, stored: StoredSite) -> Self {
        Self {
            period: period.to_owned(),
            total_count: stored.total_count,
            max_limit: stored.max_limit,
        }
    }

    pub fn is_limit_reached(&self) -> bool {
        self.total_count >= self.max_limit
    }
}

/// The calendar month (`YYYY-MM`, UTC) `now` belongs to.
pub fn period_of(now: Timestamp) -> String {
    now.strftime("%Y-%m").to_string()
}

/// Aggregate figures over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_clients: u64,
    pub total_usage: u64,
    /// Clients whose entitlement is in effect.
    pub total_premium_clients: u64,
}

impl StorageStats {
    /// Folds one client into the figures.
    pub fn add(&mut self, stored: &StoredClient, now: Timestamp) {
        self.total_clients += 1;
        self.total_usage = self.total_usage.saturating_add(stored.count);

        if stored.entitlement.as_ref().is_some_and(|e| !e.is_expired_at(now)) {
            self.total_premium_clients += 1;
        }
    }
}

/// Full content of a store, used for backup/restore and as the layout of the
/// JSON file backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub clients: BTreeMap<ClientId, StoredClient>,
    #[serde(default)]
    pub site_usage: BTreeMap<String, StoredSite>,
}

impl StoreSnapshot {
    pub fn stats(&self, now: Timestamp) -> StorageStats {
        self.clients.values().fold(StorageStats::default(), |mut stats, stored| {
            stats.add(stored, now);
            stats
        })
    }
}

//! Entitlements and the pure resolution of an entitlement into a quota limit.

use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An upgrade granted to a client after a confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Entitlement {
    /// Time-boxed subscription.
    Subscription {
        expires_at: Timestamp,
        #[serde(default = "unlimited_by_default")]
        unlimited: bool,
    },
    /// Purchased credits raising the ceiling above the free tier.
    Credits { credits_remaining: u64 },
}

fn unlimited_by_default() -> bool {
    true
}

impl Entitlement {
    /// An unlimited subscription ending at `expires_at`.
    pub fn subscription(expires_at: Timestamp) -> Self {
        Self::Subscription {
            expires_at,
            unlimited: true,
        }
    }

    pub fn credits(credits_remaining: u64) -> Self {
        Self::Credits { credits_remaining }
    }

    /// Whether the entitlement no longer applies at `now`.
    ///
    /// A subscription is expired from its expiry instant on. Credits never
    /// expire.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        match self {
            Self::Subscription { expires_at, .. } => *expires_at <= now,
            Self::Credits { .. } => false,
        }
    }

    /// Whether the background cleanup may remove the entitlement.
    pub fn is_purgeable_at(&self, now: Timestamp) -> bool {
        match self {
            Self::Subscription { expires_at, .. } => *expires_at < now,
            Self::Credits { .. } => false,
        }
    }
}

/// A quota ceiling. Unlimited subscriptions have no ceiling at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(u64),
    Unbounded,
}

impl Limit {
    /// What is left of the limit after `count` calls, never below zero.
    pub fn remaining(self, count: u64) -> Limit {
        match self {
            Self::Bounded(limit) => Self::Bounded(limit.saturating_sub(count)),
            Self::Unbounded => Self::Unbounded,
        }
    }

    /// Whether `count` calls have reached the limit.
    pub fn is_reached(self, count: u64) -> bool {
        match self {
            Self::Bounded(limit) => count >= limit,
            Self::Unbounded => false,
        }
    }

    pub fn as_bounded(self) -> Option<u64> {
        match self {
            Self::Bounded(limit) => Some(limit),
            Self::Unbounded => None,
        }
    }
}

// Unbounded limits are written as `null`.
impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_bounded().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<u64>::deserialize(deserializer)? {
            Some(limit) => Self::Bounded(limit),
            None => Self::Unbounded,
        })
    }
}

/// The effect of an entitlement at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub is_premium: bool,
    pub effective_limit: Limit,
    /// The entitlement exists but has run out. It is still stored until the
    /// cleanup removes it.
    pub expired: bool,
}

/// Computes the effective limit of a client holding `entitlement` at `now`.
///
/// Credits only raise the ceiling: they are not spent per call, the shared
/// usage count is the single counter for free and paid calls.
pub fn resolve(entitlement: Option<&Entitlement>, now: Timestamp, free_limit: u64) -> Resolution {
    let free_tier = Resolution {
        is_premium: false,
        effective_limit: Limit::Bounded(free_limit),
        expired: false,
    };

    let Some(entitlement) = entitlement else {
        return free_tier;
    };

    if entitlement.is_expired_at(now) {
        return Resolution {
            expired: true,
            ..free_tier
        };
    }

    let effective_limit = match entitlement {
        Entitlement::Subscription { unlimited: true, .. } => Limit::Unbounded,
        Entitlement::Subscription { unlimited: false, .. } => Limit::Bounded(free_limit),
        Entitlement::Credits { credits_remaining } => Limit::Bounded(free_limit.saturating_add(*credits_remaining)),
    };

    Resolution {
        is_premium: true,
        effective_limit,
        expired: false,
    }
}

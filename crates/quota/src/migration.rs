//! Moving usage and entitlements from one client id to another.

use std::{sync::Arc, time::Duration};

use jiff::Timestamp;
use serde::Serialize;

use crate::{
    ClientId, QuotaError,
    entitlement::Entitlement,
    storage::{Storage, UsageStorage, with_timeout},
};

/// Result of a migration. A failed verification is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MigrationOutcome {
    /// The old id had neither usage nor an entitlement, or both ids are the
    /// same.
    NothingToMigrate,
    /// The new id now carries the merged state.
    Migrated {
        count: u64,
        entitlement: Option<Entitlement>,
    },
    /// The new id does not show the merged state after the writes. The old
    /// id was left untouched.
    VerificationFailed {
        expected_count: u64,
        actual_count: u64,
        expected_entitlement: Option<Entitlement>,
        actual_entitlement: Option<Entitlement>,
    },
}

impl MigrationOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::VerificationFailed { .. })
    }
}

/// Merges the state of a previous client id into its replacement.
pub struct MigrationManager<S = Storage> {
    storage: Arc<S>,
    operation_timeout: Duration,
}

impl<S> Clone for MigrationManager<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            operation_timeout: self.operation_timeout,
        }
    }
}

impl<S: UsageStorage> MigrationManager<S> {
    pub fn new(storage: Arc<S>, operation_timeout: Duration) -> Self {
        Self {
            storage,
            operation_timeout,
        }
    }

    /// Adds the count of `old` to `new` and moves its entitlement over.
    ///
    /// Calls already carried over by an earlier attempt are not added again,
    /// so a failed migration can be retried. An expired entitlement stays
    /// with `old` and never replaces the one of `new`. The entitlement of
    /// `old` is only removed once `new` was read back with the expected
    /// state. Its count stays as it was.
    pub async fn migrate(&self, old: &ClientId, new: &ClientId) -> Result<MigrationOutcome, QuotaError> {
        if old == new {
            log::warn!("Ignoring migration of client {} onto itself", old.hashed());
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        let timeout = self.operation_timeout;
        let now = Timestamp::now();

        let source = with_timeout(timeout, self.storage.get_record(old)).await?;

        let pending = source.count.saturating_sub(source.migrated_count);
        let entitlement = source.entitlement.filter(|entitlement| !entitlement.is_expired_at(now));

        if pending == 0 && entitlement.is_none() {
            log::debug!("Client {} has nothing to migrate", old.hashed());
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        let target = with_timeout(timeout, self.storage.get_record(new)).await?;

        let moved = if pending > 0 {
            with_timeout(timeout, self.storage.carry_over(old, new)).await?
        } else {
            0
        };

        let expected_count = target.count.saturating_add(moved);
        let expected_entitlement = entitlement.clone().or(target.entitlement);

        if let Some(entitlement) = entitlement.clone() {
            with_timeout(timeout, self.storage.set_entitlement(new, entitlement)).await?;
        }

        let merged = with_timeout(timeout, self.storage.get_record(new)).await?;

        // Concurrent calls of the new id may only raise the count.
        if merged.count < expected_count || merged.entitlement != expected_entitlement {
            log::error!(
                "Migration from {} to {} failed verification: expected count {expected_count}, found {}",
                old.hashed(),
                new.hashed(),
                merged.count
            );

            return Ok(MigrationOutcome::VerificationFailed {
                expected_count,
                actual_count: merged.count,
                expected_entitlement,
                actual_entitlement: merged.entitlement,
            });
        }

        if entitlement.is_some() {
            with_timeout(timeout, self.storage.clear_entitlement(old)).await?;
        }

        log::info!(
            "Migrated {moved} calls from client {} to {}",
            old.hashed(),
            new.hashed()
        );

        Ok(MigrationOutcome::Migrated {
            count: merged.count,
            entitlement: merged.entitlement,
        })
    }
}

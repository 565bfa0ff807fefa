use std::future::Future;

use fastrace::{Span, future::FutureExt, prelude::LocalSpan};
use jiff::Timestamp;

use super::super::UsageStorage;
use super::RedisStorage;
use crate::{
    ClientId, ClientRecord, SiteAggregate, StorageResult, StorageStats, StoreSnapshot, entitlement::Entitlement,
};

/// Wrapper that adds tracing to Redis storage operations
pub struct TracedRedisStorage {
    inner: RedisStorage,
}

impl TracedRedisStorage {
    pub fn new(inner: RedisStorage) -> Self {
        Self { inner }
    }

    fn span(&self, name: &'static str, operation: &'static str) -> Span {
        let span = Span::enter_with_local_parent(name);

        span.add_property(|| ("redis.operation", operation));

        let pool_status = self.inner.pool_status();
        span.add_property(|| ("redis.pool.size", pool_status.size.to_string()));
        span.add_property(|| ("redis.pool.available", pool_status.available.to_string()));
        span.add_property(|| {
            (
                "redis.pool.in_use",
                pool_status.size.saturating_sub(pool_status.available).to_string(),
            )
        });

        span
    }

    fn client_span(&self, name: &'static str, operation: &'static str, id: &ClientId) -> Span {
        let span = self.span(name, operation);

        // Ids are bearer-like, only their hash goes to the collector.
        span.add_property(|| ("client.id_hash", id.hashed()));

        span
    }

    async fn traced<T>(
        span: Span,
        call: impl Future<Output = StorageResult<T>>,
        on_success: impl FnOnce(&T),
    ) -> StorageResult<T> {
        let fut = async move {
            let result = call.await;

            match &result {
                Ok(value) => on_success(value),
                Err(e) => {
                    LocalSpan::add_property(|| ("error", "true"));
                    LocalSpan::add_property(|| ("error.type", e.kind()));
                }
            }

            result
        };

        fut.in_span(span).await
    }
}

fn record_count(record: &ClientRecord) {
    LocalSpan::add_property(|| ("quota.count", record.count.to_string()));
    LocalSpan::add_property(|| ("quota.has_entitlement", record.entitlement.is_some().to_string()));
}

fn record_site(site: &SiteAggregate) {
    LocalSpan::add_property(|| ("site.total_count", site.total_count.to_string()));
    LocalSpan::add_property(|| ("site.max_limit", site.max_limit.to_string()));
}

impl UsageStorage for TracedRedisStorage {
    async fn get_record(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        let span = self.client_span("redis:get_record", "get_record", id);
        Self::traced(span, self.inner.get_record(id), record_count).await
    }

    async fn increment(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        let span = self.client_span("redis:increment", "increment", id);
        Self::traced(span, self.inner.increment(id), record_count).await
    }

    async fn increment_by(&self, id: &ClientId, amount: u64) -> StorageResult<ClientRecord> {
        let span = self.client_span("redis:increment_by", "increment_by", id);
        span.add_property(|| ("quota.amount", amount.to_string()));

        Self::traced(span, self.inner.increment_by(id, amount), record_count).await
    }

    async fn carry_over(&self, from: &ClientId, to: &ClientId) -> StorageResult<u64> {
        let span = self.client_span("redis:carry_over", "carry_over", from);
        span.add_property(|| ("client.target_id_hash", to.hashed()));

        Self::traced(span, self.inner.carry_over(from, to), |moved| {
            LocalSpan::add_property(|| ("quota.amount", moved.to_string()));
        })
        .await
    }

    async fn set_entitlement(&self, id: &ClientId, entitlement: Entitlement) -> StorageResult<ClientRecord> {
        let span = self.client_span("redis:set_entitlement", "set_entitlement", id);

        let kind = match &entitlement {
            Entitlement::Subscription { .. } => "subscription",
            Entitlement::Credits { .. } => "credits",
        };
        span.add_property(|| ("entitlement.type", kind));

        Self::traced(span, self.inner.set_entitlement(id, entitlement), record_count).await
    }

    async fn clear_entitlement(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        let span = self.client_span("redis:clear_entitlement", "clear_entitlement", id);
        Self::traced(span, self.inner.clear_entitlement(id), record_count).await
    }

    async fn export(&self) -> StorageResult<StoreSnapshot> {
        let span = self.span("redis:export", "export");

        Self::traced(span, self.inner.export(), |snapshot| {
            LocalSpan::add_property(|| ("store.clients", snapshot.clients.len().to_string()));
        })
        .await
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StorageResult<()> {
        let span = self.span("redis:import", "import");
        span.add_property(|| ("store.clients", snapshot.clients.len().to_string()));

        Self::traced(span, self.inner.import(snapshot), |_| {}).await
    }

    async fn purge_expired(&self, now: Timestamp) -> StorageResult<usize> {
        let span = self.span("redis:purge_expired", "purge_expired");

        Self::traced(span, self.inner.purge_expired(now), |purged| {
            LocalSpan::add_property(|| ("store.purged", purged.to_string()));
        })
        .await
    }

    async fn stats(&self, now: Timestamp) -> StorageResult<StorageStats> {
        let span = self.span("redis:stats", "stats");

        Self::traced(span, self.inner.stats(now), |stats| {
            LocalSpan::add_property(|| ("store.clients", stats.total_clients.to_string()));
        })
        .await
    }

    async fn site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        let span = self.span("redis:site_usage", "site_usage");
        span.add_property(|| ("site.period", period.to_string()));

        Self::traced(span, self.inner.site_usage(period, default_max), record_site).await
    }

    async fn increment_site(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        let span = self.span("redis:increment_site", "increment_site");
        span.add_property(|| ("site.period", period.to_string()));

        Self::traced(span, self.inner.increment_site(period, default_max), record_site).await
    }

    async fn set_site_limit(&self, period: &str, max_limit: u64) -> StorageResult<SiteAggregate> {
        let span = self.span("redis:set_site_limit", "set_site_limit");
        span.add_property(|| ("site.period", period.to_string()));

        Self::traced(span, self.inner.set_site_limit(period, max_limit), record_site).await
    }

    async fn reset_site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        let span = self.span("redis:reset_site_usage", "reset_site_usage");
        span.add_property(|| ("site.period", period.to_string()));

        Self::traced(span, self.inner.reset_site_usage(period, default_max), record_site).await
    }

    async fn ping(&self) -> StorageResult<()> {
        let span = self.span("redis:ping", "ping");
        Self::traced(span, self.inner.ping(), |_| {}).await
    }
}

//! Scored strategy cache and success patterns
//!
//! Mutable aggregates derived from the experience ledger. Updates are
//! incremental (exact running mean, never a full recount) and every entry
//! can be reconstructed from the ledger, so eviction only ever prunes the
//! fast-path index.

use crate::config::CacheConfig;
use crate::core::memory::MemoryLedger;
use chrono::{DateTime, Utc};
use shared::{Channel, Scope, StrategyCacheEntry, StrategyKey, SuccessPattern};
use std::collections::HashMap;

/// Keyed aggregate store biasing future strategy selection
pub struct StrategyCache {
    entries: HashMap<StrategyKey, StrategyCacheEntry>,
    patterns: HashMap<(Channel, String), SuccessPattern>,
}

impl StrategyCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            patterns: HashMap::new(),
        }
    }

    /// Record one settled outcome under a cache key
    ///
    /// Lazily creates the entry on first use. `average_profit` follows the
    /// exact running mean `new = old + (x - old) / (n + 1)` over every
    /// outcome recorded under the key (failures contribute zero revenue).
    pub fn record_outcome(
        &mut self,
        key: StrategyKey,
        success: bool,
        revenue: f64,
        now: DateTime<Utc>,
    ) -> &StrategyCacheEntry {
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| StrategyCacheEntry {
                key,
                average_profit: 0.0,
                usage_count: 0,
                success_count: 0,
                success_rate: 0.0,
                last_used: now,
                version: 0,
            });

        entry.average_profit += (revenue - entry.average_profit) / (entry.usage_count + 1) as f64;
        entry.usage_count += 1;
        entry.success_count += success as u64;
        entry.success_rate = entry.success_count as f64 / entry.usage_count as f64;
        entry.last_used = now;
        entry.version += 1;
        entry
    }

    /// Record one settled outcome into the (channel, niche) success pattern
    pub fn record_pattern(
        &mut self,
        channel: Channel,
        niche: &str,
        success: bool,
        revenue: f64,
        now: DateTime<Utc>,
    ) -> &SuccessPattern {
        let pattern = self
            .patterns
            .entry((channel, niche.to_string()))
            .or_insert_with(|| SuccessPattern {
                pattern_type: channel,
                niche: niche.to_string(),
                usage_count: 0,
                success_count: 0,
                success_rate: 0.0,
                avg_revenue: 0.0,
                last_used: now,
            });

        pattern.avg_revenue += (revenue - pattern.avg_revenue) / (pattern.usage_count + 1) as f64;
        pattern.usage_count += 1;
        pattern.success_count += success as u64;
        pattern.success_rate = pattern.success_count as f64 / pattern.usage_count as f64;
        pattern.last_used = now;
        pattern
    }

    /// O(1) lookup of one entry
    pub fn get(&self, key: &StrategyKey) -> Option<&StrategyCacheEntry> {
        self.entries.get(key)
    }

    /// All live entries matching (scope, niche, channel)
    pub fn lookup(
        &self,
        scope: Scope,
        niche: &str,
        channel: Channel,
    ) -> Vec<&StrategyCacheEntry> {
        self.entries
            .values()
            .filter(|e| e.key.scope == scope && e.key.niche == niche && e.key.channel == channel)
            .collect()
    }

    pub fn pattern(&self, channel: Channel, niche: &str) -> Option<&SuccessPattern> {
        self.patterns.get(&(channel, niche.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logically evict stale, low-scoring entries from the fast-path index
    ///
    /// An entry goes when it has been unused past the retention horizon AND
    /// its success rate sits below the score threshold. The ledger keeps the
    /// full history, so nothing is lost. Returns the evicted keys.
    pub fn evict_stale(&mut self, config: &CacheConfig, now: DateTime<Utc>) -> Vec<StrategyKey> {
        let retention =
            chrono::Duration::from_std(config.retention).unwrap_or(chrono::Duration::MAX);
        let mut evicted = Vec::new();
        self.entries.retain(|key, entry| {
            let stale = now.signed_duration_since(entry.last_used) > retention;
            let low = entry.success_rate < config.min_score;
            if stale && low {
                evicted.push(key.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Reconstruct one entry exactly by replaying the experience ledger
    ///
    /// Used to restore an evicted entry and to verify the running-mean
    /// invariant against the raw records.
    pub fn rebuild_entry(ledger: &MemoryLedger, key: &StrategyKey) -> Option<StrategyCacheEntry> {
        let mut rebuilt: Option<StrategyCacheEntry> = None;

        for exp in ledger.experiences() {
            if exp.action != key.channel || exp.strategy != key.strategy {
                continue;
            }
            match key.scope {
                Scope::Tenant(tenant_id) if exp.tenant_id != tenant_id => continue,
                _ => {}
            }
            let niche = exp.context.get("niche").and_then(|n| n.as_str());
            if niche != Some(key.niche.as_str()) {
                continue;
            }

            let entry = rebuilt.get_or_insert_with(|| StrategyCacheEntry {
                key: key.clone(),
                average_profit: 0.0,
                usage_count: 0,
                success_count: 0,
                success_rate: 0.0,
                last_used: exp.recorded_at,
                version: 0,
            });
            entry.average_profit +=
                (exp.revenue_generated - entry.average_profit) / (entry.usage_count + 1) as f64;
            entry.usage_count += 1;
            entry.success_count += exp.success as u64;
            entry.success_rate = entry.success_count as f64 / entry.usage_count as f64;
            entry.last_used = entry.last_used.max(exp.recorded_at);
            entry.version += 1;
        }

        rebuilt
    }

    /// Restore an evicted entry into the fast-path index from the ledger
    pub fn restore_from_ledger(&mut self, ledger: &MemoryLedger, key: &StrategyKey) -> bool {
        match Self::rebuild_entry(ledger, key) {
            Some(entry) => {
                self.entries.insert(key.clone(), entry);
                true
            }
            None => false,
        }
    }
}

impl Default for StrategyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::{CycleId, TenantId};
    use std::time::Duration;

    fn key_for(tenant: TenantId) -> StrategyKey {
        StrategyKey {
            scope: Scope::Tenant(tenant),
            niche: "fitness".into(),
            channel: Channel::Content,
            strategy: "digital-product-basics".into(),
        }
    }

    #[test]
    fn running_mean_matches_arithmetic_mean() {
        let mut cache = StrategyCache::new();
        let key = key_for(TenantId::new());
        let now = Utc::now();

        let outcomes = [(true, 10.0), (true, 30.0), (false, 0.0), (true, 20.0)];
        for (success, revenue) in outcomes {
            cache.record_outcome(key.clone(), success, revenue, now);
        }

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.usage_count, 4);
        assert_eq!(entry.success_count, 3);
        assert!((entry.average_profit - 15.0).abs() < 1e-9);
        assert!((entry.success_rate - 0.75).abs() < 1e-9);
        assert_eq!(entry.version, 4);
    }

    #[test]
    fn success_rate_stays_in_unit_interval() {
        let mut cache = StrategyCache::new();
        let key = key_for(TenantId::new());
        let now = Utc::now();

        for i in 0..100 {
            cache.record_outcome(key.clone(), i % 3 == 0, (i % 7) as f64, now);
            let entry = cache.get(&key).unwrap();
            assert!((0.0..=1.0).contains(&entry.success_rate));
        }
    }

    #[test]
    fn lookup_never_crosses_tenant_scopes() {
        let mut cache = StrategyCache::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let now = Utc::now();

        cache.record_outcome(key_for(tenant_a), true, 10.0, now);
        cache.record_outcome(key_for(tenant_b), true, 99.0, now);

        let a_entries = cache.lookup(Scope::Tenant(tenant_a), "fitness", Channel::Content);
        assert_eq!(a_entries.len(), 1);
        assert!((a_entries[0].average_profit - 10.0).abs() < 1e-9);

        assert!(cache
            .lookup(Scope::Global, "fitness", Channel::Content)
            .is_empty());
    }

    #[test]
    fn eviction_requires_both_stale_and_low_score() {
        let mut cache = StrategyCache::new();
        let now = Utc::now();
        let old = now - chrono::Duration::days(90);
        let config = CacheConfig {
            retention: Duration::from_secs(30 * 24 * 3600),
            min_score: 0.5,
        };

        // stale and low-scoring: goes
        let stale_low = key_for(TenantId::new());
        cache.record_outcome(stale_low.clone(), false, 0.0, old);

        // stale but high-scoring: stays
        let stale_high = key_for(TenantId::new());
        cache.record_outcome(stale_high.clone(), true, 10.0, old);

        // fresh and low-scoring: stays
        let fresh_low = key_for(TenantId::new());
        cache.record_outcome(fresh_low.clone(), false, 0.0, now);

        let evicted = cache.evict_stale(&config, now);
        assert_eq!(evicted, vec![stale_low.clone()]);
        assert!(cache.get(&stale_low).is_none());
        assert!(cache.get(&stale_high).is_some());
        assert!(cache.get(&fresh_low).is_some());
    }

    #[test]
    fn evicted_entry_is_reconstructable_from_ledger() {
        let mut cache = StrategyCache::new();
        let mut ledger = MemoryLedger::new();
        let tenant = TenantId::new();
        let cycle = CycleId::new();
        let key = key_for(tenant);
        let old = Utc::now() - chrono::Duration::days(90);

        for (success, revenue) in [(false, 0.0), (true, 12.0)] {
            ledger.record_experience(
                tenant,
                cycle,
                Channel::Content,
                "digital-product-basics",
                json!({"niche": "fitness"}),
                "r",
                success,
                revenue,
                false,
                old,
            );
            cache.record_outcome(key.clone(), success, revenue, old);
        }
        let before = cache.get(&key).unwrap().clone();

        let config = CacheConfig {
            retention: Duration::from_secs(30 * 24 * 3600),
            min_score: 0.8,
        };
        cache.evict_stale(&config, Utc::now());
        assert!(cache.get(&key).is_none());

        assert!(cache.restore_from_ledger(&ledger, &key));
        let after = cache.get(&key).unwrap();
        assert_eq!(after.usage_count, before.usage_count);
        assert_eq!(after.success_count, before.success_count);
        assert!((after.average_profit - before.average_profit).abs() < 1e-9);
    }

    #[test]
    fn patterns_track_channel_niche_aggregates() {
        let mut cache = StrategyCache::new();
        let now = Utc::now();

        cache.record_pattern(Channel::Social, "fitness", true, 0.0, now);
        cache.record_pattern(Channel::Social, "fitness", false, 0.0, now);

        let pattern = cache.pattern(Channel::Social, "fitness").unwrap();
        assert_eq!(pattern.usage_count, 2);
        assert!((pattern.success_rate - 0.5).abs() < 1e-9);
        assert!(cache.pattern(Channel::Social, "cooking").is_none());
    }
}

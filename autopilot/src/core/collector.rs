//! Settlement recording for dispatched task outcomes
//!
//! For every settled task the collector writes one immutable experience and
//! one audit event, posts at most one profit entry, and feeds the strategy
//! cache. The outcome id claim makes the whole write idempotent: an
//! at-least-once redelivery changes nothing.

use crate::core::memory::MemoryLedger;
use crate::core::strategy_cache::StrategyCache;
use crate::error::AutopilotResult;
use chrono::{DateTime, Utc};
use shared::{
    AiEventKind, Channel, CycleId, ProfitCategory, Scope, StrategyKey, TaskOutcome, TaskStatus,
    TenantId,
};

/// Records settled outcomes into the ledger and derived aggregates
pub struct OutcomeCollector;

impl OutcomeCollector {
    /// Record one settled task outcome
    ///
    /// Returns `Ok(false)` when the outcome id was already settled; the
    /// ledger, profit totals, and cache counts are untouched in that case.
    #[allow(clippy::too_many_arguments)]
    pub fn record_settlement(
        ledger: &mut MemoryLedger,
        cache: &mut StrategyCache,
        tenant_id: TenantId,
        cycle_id: CycleId,
        niche: &str,
        outcome: &TaskOutcome,
        exploration: bool,
        now: DateTime<Utc>,
    ) -> AutopilotResult<bool> {
        if !ledger.try_claim_outcome(&outcome.outcome_id) {
            return Ok(false);
        }

        let success = outcome.status.is_success();
        let revenue = outcome.revenue();
        let (result, detail_success) = match &outcome.status {
            TaskStatus::Succeeded { .. } => ("succeeded".to_string(), true),
            TaskStatus::Failed { error } => (format!("failed: {error}"), false),
            TaskStatus::Degraded { reason } => (format!("degraded: {reason}"), false),
        };

        let mut context = serde_json::json!({
            "niche": niche,
            "strategy": outcome.strategy,
            "attempts": outcome.attempts,
        });
        if let Some(price) = outcome.payload.get("price") {
            context["price"] = price.clone();
        }

        ledger.record_experience(
            tenant_id,
            cycle_id,
            outcome.channel,
            &outcome.strategy,
            context,
            &result,
            success,
            revenue,
            exploration,
            now,
        );

        ledger.record_event(
            tenant_id,
            cycle_id,
            AiEventKind::TaskSettled,
            serde_json::json!({
                "outcome_id": outcome.outcome_id.as_str(),
                "channel": outcome.channel.to_string(),
                "result": result,
            }),
            detail_success,
            revenue,
            now,
        );

        if success && revenue > 0.0 {
            let category = match outcome.channel {
                Channel::Advertising(_) => ProfitCategory::AdReturn,
                _ => ProfitCategory::Sale,
            };
            ledger.record_profit(
                tenant_id,
                &format!("{}:{}", outcome.channel, outcome.strategy),
                revenue,
                category,
                Some(outcome.outcome_id.clone()),
                now,
            )?;
        }

        // Tenant-scoped entry plus the explicitly-global aggregate row
        for scope in [Scope::Tenant(tenant_id), Scope::Global] {
            cache.record_outcome(
                StrategyKey {
                    scope,
                    niche: niche.to_string(),
                    channel: outcome.channel,
                    strategy: outcome.strategy.clone(),
                },
                success,
                revenue,
                now,
            );
        }
        cache.record_pattern(outcome.channel, niche, success, revenue, now);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::OutcomeId;

    fn outcome(cycle: CycleId, status: TaskStatus) -> TaskOutcome {
        TaskOutcome {
            outcome_id: OutcomeId::new(cycle, Channel::Commerce, 0),
            channel: Channel::Commerce,
            strategy: "starter-storefront".into(),
            status,
            attempts: 1,
            payload: serde_json::json!({"price": 19.0}),
        }
    }

    #[test]
    fn settlement_writes_experience_event_and_profit_once() {
        let mut ledger = MemoryLedger::new();
        let mut cache = StrategyCache::new();
        let tenant = TenantId::new();
        let cycle = CycleId::new();
        let now = Utc::now();
        let outcome = outcome(cycle, TaskStatus::Succeeded { revenue: 19.0 });

        let recorded = OutcomeCollector::record_settlement(
            &mut ledger, &mut cache, tenant, cycle, "fitness", &outcome, false, now,
        )
        .unwrap();

        assert!(recorded);
        assert_eq!(ledger.experiences().len(), 1);
        assert_eq!(ledger.events().len(), 1);
        assert_eq!(ledger.profits().len(), 1);
        assert_eq!(ledger.total_realized_profit(tenant), 19.0);

        let key = StrategyKey {
            scope: Scope::Tenant(tenant),
            niche: "fitness".into(),
            channel: Channel::Commerce,
            strategy: "starter-storefront".into(),
        };
        assert_eq!(cache.get(&key).unwrap().usage_count, 1);
    }

    #[test]
    fn replaying_an_outcome_id_is_a_no_op() {
        let mut ledger = MemoryLedger::new();
        let mut cache = StrategyCache::new();
        let tenant = TenantId::new();
        let cycle = CycleId::new();
        let now = Utc::now();
        let outcome = outcome(cycle, TaskStatus::Succeeded { revenue: 19.0 });

        for _ in 0..3 {
            OutcomeCollector::record_settlement(
                &mut ledger, &mut cache, tenant, cycle, "fitness", &outcome, false, now,
            )
            .unwrap();
        }

        // Totals and counts identical to a single delivery
        assert_eq!(ledger.total_realized_profit(tenant), 19.0);
        assert_eq!(ledger.experiences().len(), 1);
        let key = StrategyKey {
            scope: Scope::Tenant(tenant),
            niche: "fitness".into(),
            channel: Channel::Commerce,
            strategy: "starter-storefront".into(),
        };
        assert_eq!(cache.get(&key).unwrap().usage_count, 1);
        assert_eq!(cache.pattern(Channel::Commerce, "fitness").unwrap().usage_count, 1);
    }

    #[test]
    fn failed_and_degraded_outcomes_post_no_profit() {
        let mut ledger = MemoryLedger::new();
        let mut cache = StrategyCache::new();
        let tenant = TenantId::new();
        let cycle = CycleId::new();
        let now = Utc::now();

        let failed = TaskOutcome {
            outcome_id: OutcomeId::new(cycle, Channel::Commerce, 0),
            channel: Channel::Commerce,
            strategy: "s".into(),
            status: TaskStatus::Failed {
                error: "bad credentials".into(),
            },
            attempts: 1,
            payload: serde_json::Value::Null,
        };
        let degraded = TaskOutcome {
            outcome_id: OutcomeId::new(cycle, Channel::Social, 1),
            channel: Channel::Social,
            strategy: "s".into(),
            status: TaskStatus::Degraded {
                reason: "retries exhausted".into(),
            },
            attempts: 3,
            payload: serde_json::Value::Null,
        };

        for o in [&failed, &degraded] {
            OutcomeCollector::record_settlement(
                &mut ledger, &mut cache, tenant, cycle, "fitness", o, false, now,
            )
            .unwrap();
        }

        assert!(ledger.profits().is_empty());
        assert_eq!(ledger.experiences().len(), 2);
        assert!(ledger.experiences().iter().all(|e| !e.success));
    }

    #[test]
    fn global_aggregate_row_collects_across_tenants() {
        let mut ledger = MemoryLedger::new();
        let mut cache = StrategyCache::new();
        let now = Utc::now();

        for tenant in [TenantId::new(), TenantId::new()] {
            let cycle = CycleId::new();
            let o = outcome(cycle, TaskStatus::Succeeded { revenue: 10.0 });
            OutcomeCollector::record_settlement(
                &mut ledger, &mut cache, tenant, cycle, "fitness", &o, false, now,
            )
            .unwrap();
        }

        let global = StrategyKey {
            scope: Scope::Global,
            niche: "fitness".into(),
            channel: Channel::Commerce,
            strategy: "starter-storefront".into(),
        };
        assert_eq!(cache.get(&global).unwrap().usage_count, 2);
    }
}

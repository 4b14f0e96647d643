//! Profit-driven reinvestment policy
//!
//! After a cycle's tasks settle, trailing realized profit is compared to the
//! tenant's threshold. Crossing it emits exactly one directive for that
//! window; evaluating the same window again without new profit entries
//! emits nothing.

use crate::config::ReinvestConfig;
use crate::core::memory::MemoryLedger;
use crate::core::strategy_cache::StrategyCache;
use chrono::{DateTime, Utc};
use shared::{
    AdPlatform, Channel, DirectiveAction, ReinvestmentDirective, Tenant, TenantId,
};
use std::collections::HashMap;

/// Evaluates trailing profit and emits budget/scale directives
pub struct ReinvestmentPolicy {
    config: ReinvestConfig,
    /// Newest profit seq already covered by a directive, per tenant
    issued: HashMap<TenantId, u64>,
}

impl ReinvestmentPolicy {
    pub fn new(config: ReinvestConfig) -> Self {
        Self {
            config,
            issued: HashMap::new(),
        }
    }

    /// Evaluate the trailing profit window for one tenant
    ///
    /// Returns a directive when realized profit in the window meets the
    /// tenant's threshold AND the window contains profit entries newer than
    /// the last directive.
    pub fn evaluate(
        &mut self,
        tenant: &Tenant,
        ledger: &MemoryLedger,
        cache: &StrategyCache,
        now: DateTime<Utc>,
    ) -> Option<ReinvestmentDirective> {
        let latest_seq = ledger.latest_profit_seq(tenant.id)?;
        if self.issued.get(&tenant.id) == Some(&latest_seq) {
            // Same window as the last directive; nothing new to act on
            return None;
        }

        let cutoff = now
            - chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::MAX);
        let total_profit = ledger.realized_profit_since(tenant.id, cutoff);
        if total_profit < tenant.reinvestment_threshold {
            return None;
        }

        let policy = &tenant.budget_policy;
        let allocated_budget =
            (total_profit * policy.reinvest_rate).min(policy.max_cycle_budget);

        let action = match best_scaling_channel(cache, &tenant.niche) {
            Some(channel) => DirectiveAction::IncreaseChannelBudget {
                channel,
                fraction: policy.reinvest_rate,
            },
            None => DirectiveAction::LaunchAdditionalProduct,
        };

        self.issued.insert(tenant.id, latest_seq);
        Some(ReinvestmentDirective {
            tenant_id: tenant.id,
            window_end_seq: latest_seq,
            action,
            total_profit,
            allocated_budget,
            issued_at: now,
        })
    }
}

/// The channel most worth scaling for a niche, if any has earned it
///
/// Picks the pattern with the highest average revenue among those with a
/// majority success rate; a niche with no such pattern scales by adding a
/// product line instead.
fn best_scaling_channel(cache: &StrategyCache, niche: &str) -> Option<Channel> {
    let candidates = [
        Channel::Content,
        Channel::Commerce,
        Channel::Advertising(AdPlatform::Meta),
        Channel::Advertising(AdPlatform::Google),
        Channel::Advertising(AdPlatform::Tiktok),
        Channel::Social,
    ];

    candidates
        .into_iter()
        .filter_map(|channel| cache.pattern(channel, niche).map(|p| (channel, p)))
        .filter(|(_, p)| p.success_rate >= 0.5 && p.usage_count > 0)
        .max_by(|(_, a), (_, b)| {
            a.avg_revenue
                .partial_cmp(&b.avg_revenue)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(channel, _)| channel)
}

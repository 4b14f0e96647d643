//! Strategy ranking and selection
//!
//! Ranks candidate strategies for a tenant+niche from the strategy cache,
//! shrinking noisy low-sample entries toward a global prior, and falls back
//! to the configured exploration book when the cache has nothing to say.

use crate::config::{DecisionConfig, StrategyBook};
use crate::core::strategy_cache::StrategyCache;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{Channel, Scope, StrategyCacheEntry, TenantId};

/// One candidate strategy with its expected-value score
#[derive(Debug, Clone, Serialize)]
pub struct RankedStrategy {
    pub channel: Channel,
    pub strategy: String,
    pub params: serde_json::Value,
    pub score: f64,
    /// True when this came from the exploration book, not a cache hit
    pub exploration: bool,
    last_used: Option<DateTime<Utc>>,
}

/// Where the decision came from, recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionSource {
    CacheRanked,
    Exploration,
    ManualOverride,
}

/// Operator-supplied strategy choice that bypasses the cache
#[derive(Debug, Clone)]
pub struct ManualOverride {
    pub choices: Vec<(Channel, String, serde_json::Value)>,
}

/// Ranked output handed to the dispatcher
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub ranked: Vec<RankedStrategy>,
    pub source: DecisionSource,
}

impl Decision {
    /// The single best candidate for one channel, if any
    pub fn top_for_channel(&self, channel: Channel) -> Option<&RankedStrategy> {
        self.ranked.iter().find(|r| r.channel == channel)
    }
}

/// Ranks candidate strategies using the scored cache
pub struct DecisionEngine {
    config: DecisionConfig,
    book: StrategyBook,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, book: StrategyBook) -> Self {
        Self { config, book }
    }

    /// Rank candidate strategies for a tenant's niche across channels
    ///
    /// A manual override bypasses cache lookup entirely. Otherwise each
    /// channel contributes its cached candidates; a channel with no cached
    /// entry falls back to the exploration book and its attempts are tagged
    /// as exploration.
    pub fn decide(
        &self,
        tenant_id: TenantId,
        niche: &str,
        channels: &[Channel],
        cache: &StrategyCache,
        manual: Option<&ManualOverride>,
        now: DateTime<Utc>,
    ) -> Decision {
        if let Some(manual) = manual {
            let ranked = manual
                .choices
                .iter()
                .map(|(channel, strategy, params)| RankedStrategy {
                    channel: *channel,
                    strategy: strategy.clone(),
                    params: params.clone(),
                    score: 1.0,
                    exploration: false,
                    last_used: None,
                })
                .collect();
            return Decision {
                ranked,
                source: DecisionSource::ManualOverride,
            };
        }

        let mut ranked = Vec::new();
        let mut any_cache_hit = false;

        for &channel in channels {
            let entries = cache.lookup(Scope::Tenant(tenant_id), niche, channel);
            if entries.is_empty() {
                for strategy in self.book.for_channel(channel) {
                    ranked.push(RankedStrategy {
                        channel,
                        strategy: strategy.name.to_string(),
                        params: strategy.params.clone(),
                        score: self.exploration_score(),
                        exploration: true,
                        last_used: None,
                    });
                }
            } else {
                any_cache_hit = true;
                for entry in entries {
                    ranked.push(RankedStrategy {
                        channel,
                        strategy: entry.key.strategy.clone(),
                        params: serde_json::json!({}),
                        score: self.score_entry(entry, now),
                        exploration: false,
                        last_used: Some(entry.last_used),
                    });
                }
            }
        }

        // Highest score first; equal scores break toward the more recently
        // used entry
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_used.cmp(&a.last_used))
        });

        Decision {
            ranked,
            source: if any_cache_hit {
                DecisionSource::CacheRanked
            } else {
                DecisionSource::Exploration
            },
        }
    }

    /// Expected-value score for one cache entry
    ///
    /// Success rate and average profit are shrunk toward the global prior in
    /// proportion to how far the sample count sits below `min_samples`;
    /// recency decays exponentially with the configured half-life.
    fn score_entry(&self, entry: &StrategyCacheEntry, now: DateTime<Utc>) -> f64 {
        let cfg = &self.config;
        let n = entry.usage_count as f64;
        let k = cfg.min_samples as f64;

        let shrunk_rate = (entry.success_count as f64 + cfg.prior_success_rate * k) / (n + k);
        let shrunk_profit = (entry.average_profit * n + cfg.prior_profit * k) / (n + k);
        let profit_norm = (shrunk_profit / cfg.profit_scale).clamp(0.0, 1.0);

        let age = now
            .signed_duration_since(entry.last_used)
            .to_std()
            .unwrap_or_default();
        let half_life = cfg.recency_half_life.as_secs_f64().max(1.0);
        let recency = 0.5_f64.powf(age.as_secs_f64() / half_life);

        cfg.success_weight * shrunk_rate
            + cfg.profit_weight * profit_norm
            + cfg.recency_weight * recency
    }

    /// Score assigned to exploration candidates: the prior with full recency
    fn exploration_score(&self) -> f64 {
        let cfg = &self.config;
        cfg.success_weight * cfg.prior_success_rate
            + cfg.profit_weight * (cfg.prior_profit / cfg.profit_scale).clamp(0.0, 1.0)
            + cfg.recency_weight
    }
}

//! Immutable configuration records loaded once at startup
//!
//! Tuning knobs that the source material treated as mutable nested
//! dictionaries live here as plain records. The library never reads the
//! environment; the binary builds these and hands them in.

use shared::{AdPlatform, Channel};
use std::time::Duration;

/// Decision engine tuning
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Entries with fewer samples than this are shrunk toward the prior
    pub min_samples: u64,
    /// Global prior success rate used for shrinkage
    pub prior_success_rate: f64,
    /// Global prior average profit used for shrinkage, USD
    pub prior_profit: f64,
    /// Profit at which the normalized profit term saturates, USD
    pub profit_scale: f64,
    /// Weight of the (shrunk) success rate in the expected-value score
    pub success_weight: f64,
    /// Weight of the (shrunk) normalized average profit
    pub profit_weight: f64,
    /// Weight of the recency term
    pub recency_weight: f64,
    /// Half-life of the exponential recency decay
    pub recency_half_life: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            prior_success_rate: 0.5,
            prior_profit: 0.0,
            profit_scale: 50.0,
            success_weight: 0.5,
            profit_weight: 0.35,
            recency_weight: 0.15,
            recency_half_life: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Retry policy applied independently to every dispatched task
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per task, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_delay: Duration,
    /// Cap on any single backoff delay
    pub max_delay: Duration,
    /// Fraction of the delay randomized as jitter (0.0..=1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}

/// Dispatcher limits
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Bound on concurrent channel calls across all tenants
    pub max_concurrent_calls: usize,
    /// Timeout for a single collaborator call
    pub task_timeout: Duration,
    /// Deadline for all tasks of one cycle; stragglers settle as degraded
    pub cycle_deadline: Duration,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 3,
            task_timeout: Duration::from_secs(30),
            cycle_deadline: Duration::from_secs(240),
            retry: RetryPolicy::default(),
        }
    }
}

/// Strategy cache retention
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries unused longer than this are candidates for eviction
    pub retention: Duration,
    /// Entries scoring below this stay eviction candidates even when idle
    pub min_score: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 3600),
            min_score: 0.2,
        }
    }
}

/// Reinvestment policy knobs
#[derive(Debug, Clone)]
pub struct ReinvestConfig {
    /// Trailing window over which realized profit is summed
    pub window: Duration,
}

impl Default for ReinvestConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Orchestrator scheduling knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the control loop scans for eligible tenants
    pub tick_interval: Duration,
    /// First backoff step after a failed cycle; doubles per consecutive failure
    pub failure_backoff_base: Duration,
    /// Cap on the failure backoff
    pub failure_backoff_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            failure_backoff_base: Duration::from_secs(60),
            failure_backoff_max: Duration::from_secs(3600),
        }
    }
}

/// One exploratory strategy tried when the cache has nothing for a niche
#[derive(Debug, Clone)]
pub struct ExplorationStrategy {
    pub name: &'static str,
    pub channel: Channel,
    /// Strategy parameters passed through to the collaborator
    pub params: serde_json::Value,
}

/// The configured set of default/exploratory strategies
#[derive(Debug, Clone)]
pub struct StrategyBook {
    pub strategies: Vec<ExplorationStrategy>,
}

impl StrategyBook {
    /// Default exploration set: one starter strategy per channel role,
    /// with the ad starter available on every platform
    pub fn standard() -> Self {
        let mut strategies = vec![
            ExplorationStrategy {
                name: "digital-product-basics",
                channel: Channel::Content,
                params: serde_json::json!({ "price_point": 19.0, "format": "digital" }),
            },
            ExplorationStrategy {
                name: "starter-storefront",
                channel: Channel::Commerce,
                params: serde_json::json!({ "template": "minimal" }),
            },
            ExplorationStrategy {
                name: "daily-tips-posts",
                channel: Channel::Social,
                params: serde_json::json!({ "cadence": "daily", "tone": "educational" }),
            },
        ];
        for platform in [AdPlatform::Meta, AdPlatform::Google, AdPlatform::Tiktok] {
            strategies.push(ExplorationStrategy {
                name: "broad-interest-ads",
                channel: Channel::Advertising(platform),
                params: serde_json::json!({ "audience": "broad", "objective": "conversions" }),
            });
        }
        Self { strategies }
    }

    /// Exploratory strategies for one channel
    pub fn for_channel(&self, channel: Channel) -> impl Iterator<Item = &ExplorationStrategy> {
        self.strategies.iter().filter(move |s| s.channel == channel)
    }
}

/// Top-level configuration assembled by the binary
#[derive(Debug, Clone, Default)]
pub struct AutopilotConfig {
    pub decision: DecisionConfig,
    pub dispatch: DispatchConfig,
    pub cache: CacheConfig,
    pub reinvest: ReinvestConfig,
    pub scheduler: SchedulerConfig,
}

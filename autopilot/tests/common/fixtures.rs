//! Test fixtures and data for orchestrator tests
//!
//! Consistent test data used across the unit and integration suites.

use autopilot::config::{
    AutopilotConfig, CacheConfig, DispatchConfig, ReinvestConfig, RetryPolicy, SchedulerConfig,
};
use autopilot::traits::ProductDraft;
use shared::Tenant;
use std::time::Duration;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Standard niche used across scenarios
    pub const NICHE: &'static str = "fitness";

    /// List price used by the default successful commerce mock
    pub const LIST_PRICE: f64 = 19.0;

    /// A tenant ready for fast test cycles
    pub fn tenant() -> Tenant {
        let mut tenant = Tenant::new("fitness venture", Self::NICHE);
        tenant.cycle_interval = Duration::from_millis(10);
        tenant
    }

    /// A tenant with a specific reinvestment threshold
    pub fn tenant_with_threshold(threshold: f64) -> Tenant {
        let mut tenant = Self::tenant();
        tenant.reinvestment_threshold = threshold;
        tenant
    }

    /// The draft returned by the default successful content mock
    pub fn draft() -> ProductDraft {
        ProductDraft {
            title: "30-Day Fitness Plan".into(),
            description: "A structured program".into(),
            price: Self::LIST_PRICE,
            kind: "digital".into(),
        }
    }

    /// Configuration tuned for fast, deterministic tests
    pub fn fast_config() -> AutopilotConfig {
        AutopilotConfig {
            dispatch: DispatchConfig {
                max_concurrent_calls: 4,
                task_timeout: Duration::from_millis(250),
                cycle_deadline: Duration::from_secs(5),
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    jitter: 0.0,
                },
            },
            scheduler: SchedulerConfig {
                tick_interval: Duration::from_millis(10),
                failure_backoff_base: Duration::from_secs(60),
                failure_backoff_max: Duration::from_secs(3600),
            },
            cache: CacheConfig::default(),
            reinvest: ReinvestConfig::default(),
            ..AutopilotConfig::default()
        }
    }
}

//! Core shared types and identifiers
//!
//! Domain records are split into two families: append-only ledger records
//! (`Experience`, `AiEvent`, `ProfitEntry`) which are immutable once
//! recorded, and mutable aggregates (`SuccessPattern`, `StrategyCacheEntry`)
//! derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a tenant (one independently orchestrated business)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one pass of a tenant's cycle state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Uuid);

impl CycleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a settled task outcome
///
/// Built from (cycle, channel, task index) so a redelivered settlement from
/// an at-least-once collaborator maps to the same id and can be deduplicated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutcomeId(String);

impl OutcomeId {
    pub fn new(cycle_id: CycleId, channel: Channel, task_index: u32) -> Self {
        Self(format!("{cycle_id}:{channel}:{task_index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutcomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Advertising platforms the dispatcher can launch campaigns on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdPlatform {
    Meta,
    Google,
    Tiktok,
}

impl fmt::Display for AdPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdPlatform::Meta => write!(f, "meta"),
            AdPlatform::Google => write!(f, "google"),
            AdPlatform::Tiktok => write!(f, "tiktok"),
        }
    }
}

/// The closed set of channels a strategy can fan out to
///
/// Replaces string-keyed channel lookup so a typo is a compile error and
/// match statements stay exhaustive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Product/content generation
    Content,
    /// Storefront listing and deployment
    Commerce,
    /// Paid campaign launch on a specific platform
    Advertising(AdPlatform),
    /// Organic social posting
    Social,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Content => write!(f, "content"),
            Channel::Commerce => write!(f, "commerce"),
            Channel::Advertising(platform) => write!(f, "ads-{platform}"),
            Channel::Social => write!(f, "social"),
        }
    }
}

/// Budget allocation policy for a tenant's reinvestment cycles
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Fraction of trailing profit to reinvest (0.0..=1.0)
    pub reinvest_rate: f64,
    /// Hard cap on budget allocated to a single cycle, in USD
    pub max_cycle_budget: f64,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            reinvest_rate: 0.5,
            max_cycle_budget: 25.0,
        }
    }
}

/// One independently orchestrated business unit
///
/// Created at business launch and mutated only through the control surface.
/// Tenants are never deleted; `autopilot_enabled = false` soft-disables
/// scheduling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub niche: String,
    pub autopilot_enabled: bool,
    /// Trailing profit required before a reinvestment directive fires, USD
    pub reinvestment_threshold: f64,
    pub budget_policy: BudgetPolicy,
    /// How often the scheduler considers this tenant for a new cycle
    #[serde(with = "duration_secs")]
    pub cycle_interval: Duration,
}

impl Tenant {
    pub fn new(name: impl Into<String>, niche: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            niche: niche.into(),
            autopilot_enabled: true,
            reinvestment_threshold: 1.0,
            budget_policy: BudgetPolicy::default(),
            cycle_interval: Duration::from_secs(1800),
        }
    }
}

/// One immutable record of an attempted action and its outcome
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Experience {
    pub tenant_id: TenantId,
    pub cycle_id: CycleId,
    /// Monotonic position in the ledger, assigned at append time
    pub seq: u64,
    pub action: Channel,
    pub strategy: String,
    pub context: serde_json::Value,
    pub result: String,
    pub success: bool,
    pub revenue_generated: f64,
    pub lessons_learned: String,
    /// True when the attempt came from the exploration fallback rather than
    /// a cache hit, so aggregation can separate exploitation from exploration
    pub exploration: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Audit-log record kinds for decisions and dispatched actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiEventKind {
    PhaseTransition,
    DecisionMade,
    TaskDispatched,
    TaskSettled,
    OrchestrationConflict,
    DirectiveIssued,
    CycleFailed,
    CycleCancelled,
}

/// Append-only audit record of a decision or dispatched action
///
/// Source of truth for debugging and for rebuilding the derived aggregates
/// if they are ever corrupted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiEvent {
    pub tenant_id: TenantId,
    pub cycle_id: CycleId,
    pub seq: u64,
    pub kind: AiEventKind,
    pub payload: serde_json::Value,
    pub success: bool,
    pub revenue_impact: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Category of a realized (or projected) profit entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfitCategory {
    /// Direct product sale revenue
    Sale,
    /// Return attributed to an ad campaign
    AdReturn,
    /// Projected ROI, excluded from realized-profit sums
    Projection,
}

impl ProfitCategory {
    /// Whether entries of this category count toward realized profit
    pub fn is_realized(self) -> bool {
        !matches!(self, ProfitCategory::Projection)
    }
}

/// Append-only ledger entry for realized revenue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfitEntry {
    pub tenant_id: TenantId,
    pub seq: u64,
    pub source: String,
    pub amount: f64,
    pub category: ProfitCategory,
    /// Settled task outcome this entry is attributed to, when applicable.
    /// No outcome id is ever attributed twice.
    pub outcome_id: Option<OutcomeId>,
    pub recorded_at: DateTime<Utc>,
}

/// Scope of a strategy cache key
///
/// Tenant-scoped rows never leak across tenants; `Global` rows are shared
/// aggregates and always labeled as such.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Tenant(TenantId),
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Tenant(id) => write!(f, "tenant:{id}"),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Lookup key for a strategy cache entry
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyKey {
    pub scope: Scope,
    pub niche: String,
    pub channel: Channel,
    pub strategy: String,
}

/// Cached, scored summary used to bias strategy selection
///
/// Lazily created on first use and updated incrementally on every settled
/// outcome recorded under its key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyCacheEntry {
    pub key: StrategyKey,
    /// Exact running mean of all profit-bearing outcomes under this key
    pub average_profit: f64,
    pub usage_count: u64,
    pub success_count: u64,
    /// Always `success_count / usage_count`, in [0, 1]
    pub success_rate: f64,
    pub last_used: DateTime<Utc>,
    /// Bumped on every update; concurrent writers must observe a matching
    /// version before applying theirs
    pub version: u64,
}

/// Aggregate statistics for experiences sharing a (channel, niche) pattern
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub pattern_type: Channel,
    pub niche: String,
    pub usage_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub avg_revenue: f64,
    pub last_used: DateTime<Utc>,
}

/// How a dispatched channel task settled
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Collaborator call succeeded; revenue is the realized amount (may be 0)
    Succeeded { revenue: f64 },
    /// Permanent failure, not retried further
    Failed { error: String },
    /// Retries exhausted or deadline passed while still pending
    Degraded { reason: String },
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. })
    }
}

/// Complete settlement record for one dispatched channel task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub outcome_id: OutcomeId,
    pub channel: Channel,
    pub strategy: String,
    pub status: TaskStatus,
    /// Attempts actually made (1 = no retries)
    pub attempts: u32,
    /// Collaborator response payload, when one was produced
    pub payload: serde_json::Value,
}

impl TaskOutcome {
    /// Revenue realized by this outcome, zero unless it succeeded
    pub fn revenue(&self) -> f64 {
        match &self.status {
            TaskStatus::Succeeded { revenue } => *revenue,
            _ => 0.0,
        }
    }
}

/// Action emitted by the reinvestment policy for the next cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DirectiveAction {
    /// Increase the named channel's budget by the given fraction
    IncreaseChannelBudget { channel: Channel, fraction: f64 },
    /// Attempt an additional product line next cycle
    LaunchAdditionalProduct,
}

/// Output of the reinvestment policy, consumed by the next cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReinvestmentDirective {
    pub tenant_id: TenantId,
    /// Ledger sequence of the newest profit entry in the evaluated window;
    /// re-evaluating the same window (no newer entries) emits nothing
    pub window_end_seq: u64,
    pub action: DirectiveAction,
    /// Realized profit summed over the evaluated window, USD
    pub total_profit: f64,
    /// Budget allocated to the next cycle under the tenant's policy, USD
    pub allocated_budget: f64,
    pub issued_at: DateTime<Utc>,
}

/// Serde helper: store `Duration` as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

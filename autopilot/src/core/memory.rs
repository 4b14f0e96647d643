//! Append-only memory ledger
//!
//! Every attempted action, decision, and realized profit lands here exactly
//! once and is never edited afterward. Corrections are modeled as new
//! compensating entries. The derived aggregates (strategy cache, success
//! patterns) can always be rebuilt from these records.

use crate::error::{AutopilotError, AutopilotResult};
use crate::traits::FileSystem;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    AiEvent, AiEventKind, Channel, CycleId, Experience, OutcomeId, ProfitCategory, ProfitEntry,
    TenantId,
};
use std::collections::{HashMap, HashSet};

/// Append-only store of experiences, audit events, and profit entries
///
/// One monotonic sequence spans all three stores so "newer than" comparisons
/// work across record families.
pub struct MemoryLedger {
    experiences: Vec<Experience>,
    events: Vec<AiEvent>,
    profits: Vec<ProfitEntry>,

    /// Outcome ids that have been settled through the collector
    settled_outcomes: HashSet<OutcomeId>,
    /// Outcome ids that already produced a profit entry
    profit_attributed: HashSet<OutcomeId>,

    next_seq: u64,
}

/// Per-channel rollup derived from the experience store
#[derive(Debug, Clone, Serialize)]
pub struct ActionPerformance {
    pub channel: Channel,
    pub total_attempts: u64,
    pub success_rate: f64,
    pub avg_revenue: f64,
}

/// Niche rollup derived from the experience store
#[derive(Debug, Clone, Serialize)]
pub struct NichePerformance {
    pub niche: String,
    pub total_attempts: u64,
    pub success_rate: f64,
    pub avg_revenue: f64,
}

/// Intelligence rollup for the KPI surface
#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceInsights {
    pub action_performance: Vec<ActionPerformance>,
    pub top_niches: Vec<NichePerformance>,
    pub total_experiences: u64,
}

/// Snapshot layout written by `export_snapshot`
#[derive(Serialize)]
struct LedgerSnapshot<'a> {
    experiences: &'a [Experience],
    events: &'a [AiEvent],
    profits: &'a [ProfitEntry],
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            experiences: Vec::new(),
            events: Vec::new(),
            profits: Vec::new(),
            settled_outcomes: HashSet::new(),
            profit_attributed: HashSet::new(),
            next_seq: 0,
        }
    }

    fn take_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Record one immutable experience; lessons are derived at append time
    #[allow(clippy::too_many_arguments)]
    pub fn record_experience(
        &mut self,
        tenant_id: TenantId,
        cycle_id: CycleId,
        action: Channel,
        strategy: &str,
        context: serde_json::Value,
        result: &str,
        success: bool,
        revenue_generated: f64,
        exploration: bool,
        now: DateTime<Utc>,
    ) -> &Experience {
        let lessons_learned = derive_lessons(action, &context, success, revenue_generated);
        let seq = self.take_seq();
        self.experiences.push(Experience {
            tenant_id,
            cycle_id,
            seq,
            action,
            strategy: strategy.to_string(),
            context,
            result: result.to_string(),
            success,
            revenue_generated,
            lessons_learned,
            exploration,
            recorded_at: now,
        });
        self.experiences.last().expect("just pushed")
    }

    /// Record one audit event
    pub fn record_event(
        &mut self,
        tenant_id: TenantId,
        cycle_id: CycleId,
        kind: AiEventKind,
        payload: serde_json::Value,
        success: bool,
        revenue_impact: f64,
        now: DateTime<Utc>,
    ) -> &AiEvent {
        let seq = self.take_seq();
        self.events.push(AiEvent {
            tenant_id,
            cycle_id,
            seq,
            kind,
            payload,
            success,
            revenue_impact,
            recorded_at: now,
        });
        self.events.last().expect("just pushed")
    }

    /// Record one profit entry
    ///
    /// Attributing two entries to the same outcome id is a data-integrity
    /// violation and is rejected without touching the ledger.
    pub fn record_profit(
        &mut self,
        tenant_id: TenantId,
        source: &str,
        amount: f64,
        category: ProfitCategory,
        outcome_id: Option<OutcomeId>,
        now: DateTime<Utc>,
    ) -> AutopilotResult<&ProfitEntry> {
        if let Some(id) = &outcome_id {
            if !self.profit_attributed.insert(id.clone()) {
                return Err(AutopilotError::integrity(format!(
                    "profit already attributed to outcome {id}"
                )));
            }
        }
        let seq = self.take_seq();
        self.profits.push(ProfitEntry {
            tenant_id,
            seq,
            source: source.to_string(),
            amount,
            category,
            outcome_id,
            recorded_at: now,
        });
        Ok(self.profits.last().expect("just pushed"))
    }

    /// Claim an outcome id for settlement recording
    ///
    /// Returns false when the outcome was already settled; at-least-once
    /// redelivery from a collaborator hits this and becomes a no-op.
    pub fn try_claim_outcome(&mut self, outcome_id: &OutcomeId) -> bool {
        self.settled_outcomes.insert(outcome_id.clone())
    }

    pub fn has_outcome(&self, outcome_id: &OutcomeId) -> bool {
        self.settled_outcomes.contains(outcome_id)
    }

    // ---- queries -----------------------------------------------------------

    pub fn experiences(&self) -> &[Experience] {
        &self.experiences
    }

    pub fn events(&self) -> &[AiEvent] {
        &self.events
    }

    pub fn profits(&self) -> &[ProfitEntry] {
        &self.profits
    }

    pub fn events_for_cycle(&self, cycle_id: CycleId) -> impl Iterator<Item = &AiEvent> {
        self.events.iter().filter(move |e| e.cycle_id == cycle_id)
    }

    pub fn events_for_tenant(&self, tenant_id: TenantId) -> impl Iterator<Item = &AiEvent> {
        self.events.iter().filter(move |e| e.tenant_id == tenant_id)
    }

    pub fn profits_for_tenant(&self, tenant_id: TenantId) -> impl Iterator<Item = &ProfitEntry> {
        self.profits.iter().filter(move |p| p.tenant_id == tenant_id)
    }

    /// Realized profit for a tenant recorded at or after `cutoff`
    ///
    /// Projection entries never count toward realized profit.
    pub fn realized_profit_since(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> f64 {
        self.profits_for_tenant(tenant_id)
            .filter(|p| p.category.is_realized() && p.recorded_at >= cutoff)
            .map(|p| p.amount)
            .sum()
    }

    /// Total realized profit for a tenant over the whole ledger
    pub fn total_realized_profit(&self, tenant_id: TenantId) -> f64 {
        self.profits_for_tenant(tenant_id)
            .filter(|p| p.category.is_realized())
            .map(|p| p.amount)
            .sum()
    }

    /// Sequence of the newest realized profit entry for a tenant
    pub fn latest_profit_seq(&self, tenant_id: TenantId) -> Option<u64> {
        self.profits_for_tenant(tenant_id)
            .filter(|p| p.category.is_realized())
            .map(|p| p.seq)
            .max()
    }

    /// Per-channel and per-niche rollups for the KPI surface
    pub fn intelligence_insights(&self) -> IntelligenceInsights {
        let mut by_channel: HashMap<Channel, (u64, u64, f64)> = HashMap::new();
        let mut by_niche: HashMap<String, (u64, u64, f64)> = HashMap::new();

        for exp in &self.experiences {
            let entry = by_channel.entry(exp.action).or_default();
            entry.0 += 1;
            entry.1 += exp.success as u64;
            entry.2 += exp.revenue_generated;

            if let Some(niche) = exp.context.get("niche").and_then(|n| n.as_str()) {
                let entry = by_niche.entry(niche.to_string()).or_default();
                entry.0 += 1;
                entry.1 += exp.success as u64;
                entry.2 += exp.revenue_generated;
            }
        }

        let mut action_performance: Vec<ActionPerformance> = by_channel
            .into_iter()
            .map(|(channel, (total, ok, revenue))| ActionPerformance {
                channel,
                total_attempts: total,
                success_rate: ok as f64 / total as f64,
                avg_revenue: revenue / total as f64,
            })
            .collect();
        action_performance.sort_by(|a, b| b.total_attempts.cmp(&a.total_attempts));

        let mut top_niches: Vec<NichePerformance> = by_niche
            .into_iter()
            .map(|(niche, (total, ok, revenue))| NichePerformance {
                niche,
                total_attempts: total,
                success_rate: ok as f64 / total as f64,
                avg_revenue: revenue / total as f64,
            })
            .collect();
        top_niches.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.avg_revenue
                        .partial_cmp(&a.avg_revenue)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        top_niches.truncate(10);

        IntelligenceInsights {
            action_performance,
            top_niches,
            total_experiences: self.experiences.len() as u64,
        }
    }

    /// Export the full ledger as a JSON snapshot
    pub async fn export_snapshot(&self, file_system: &dyn FileSystem) -> AutopilotResult<()> {
        let snapshot = LedgerSnapshot {
            experiences: &self.experiences,
            events: &self.events,
            profits: &self.profits,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        file_system.write_file("ledger.json", json.as_bytes()).await
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the lessons string stored on an experience
///
/// Keyed off the action so the same shapes of lesson accumulate for the
/// same kinds of attempts.
fn derive_lessons(
    action: Channel,
    context: &serde_json::Value,
    success: bool,
    revenue: f64,
) -> String {
    let niche = context
        .get("niche")
        .and_then(|n| n.as_str())
        .unwrap_or("unknown");
    let mut lessons = Vec::new();

    match action {
        Channel::Content | Channel::Commerce => {
            if success {
                lessons.push(format!("Successful product in {niche} niche"));
                if let Some(price) = context.get("price").and_then(|p| p.as_f64()) {
                    lessons.push(format!("Price point ${price} worked well"));
                }
            } else {
                lessons.push(format!("Product failed in {niche} niche"));
            }
        }
        Channel::Advertising(platform) => {
            if success {
                lessons.push(format!("Effective campaign on {platform} for {niche}"));
                if revenue > 0.0 {
                    lessons.push(format!("Returned ${revenue:.2}"));
                }
            } else {
                lessons.push(format!("Campaign on {platform} did not convert"));
            }
        }
        Channel::Social => {
            if success {
                lessons.push(format!("Post landed for {niche} audience"));
            } else {
                lessons.push(format!("Post missed for {niche} audience"));
            }
        }
    }

    lessons.join("; ")
}

//! Main orchestrator implementation
//!
//! Owns the per-tenant state machines and the scheduling cadence. Each
//! eligible tenant's cycle runs as its own task against the shared ledger
//! and cache; a per-tenant lease keeps cycles single-flight, and one
//! tenant's failure or slow channel never stalls the others.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::interval;

use chrono::Utc;
use serde::Serialize;
use shared::{
    tenant_debug, tenant_error, tenant_info, AiEventKind, BudgetPolicy, Channel, CycleId,
    DirectiveAction, ProfitCategory, TaskOutcome, TaskStatus, Tenant, TenantId,
};

use crate::config::AutopilotConfig;
use crate::core::memory::IntelligenceInsights;
use crate::core::state::summarize_end;
use crate::core::{
    ChannelResult, CycleEnd, CycleHandle, CyclePhase, CycleReport, CycleStatus, Decision,
    DecisionEngine, FailureBackoff, ManualOverride, MemoryLedger, OutcomeCollector,
    ReinvestmentPolicy, StrategyCache, TenantRuntime,
};
use crate::dispatcher::{ChannelTask, Dispatcher, TaskCall};
use crate::error::{AutopilotError, AutopilotResult};
use crate::traits::{
    AdTargeting, AdvertisingChannel, CommerceChannel, ContentChannel, FileSystem, ProductDraft,
    SocialChannel,
};

/// Mutable state shared by the control loop and every cycle task
pub struct SharedState {
    pub tenants: HashMap<TenantId, TenantRuntime>,
    pub ledger: MemoryLedger,
    pub cache: StrategyCache,
    pub policy: ReinvestmentPolicy,
}

/// User-visible view of one tenant's cycle state
#[derive(Debug, Clone, Serialize)]
pub struct TenantStatusView {
    pub tenant_id: TenantId,
    pub status: CycleStatus,
    /// Phase of the in-flight cycle, when one is running
    pub phase: Option<CyclePhase>,
    pub last_report: Option<CycleReport>,
    pub autopilot_enabled: bool,
    pub reinvestment_threshold: f64,
    pub budget_policy: BudgetPolicy,
}

/// Aggregated KPIs computed from the ledger
#[derive(Debug, Clone, Serialize)]
pub struct KpiReport {
    pub tenant_id: TenantId,
    pub total_revenue: f64,
    pub window_revenue: f64,
    pub active_campaigns: u64,
    pub insights: IntelligenceInsights,
}

/// Requests accepted by the control surface
enum ControlRequest {
    TriggerCycle {
        tenant_id: TenantId,
        manual: Option<ManualOverride>,
    },
    CancelCycle {
        tenant_id: TenantId,
    },
    SetAutopilot {
        tenant_id: TenantId,
        enabled: bool,
    },
    SetReinvestment {
        tenant_id: TenantId,
        threshold: f64,
        budget_policy: BudgetPolicy,
    },
    QueryStatus {
        tenant_id: TenantId,
        resp: oneshot::Sender<AutopilotResult<TenantStatusView>>,
    },
    QueryKpis {
        tenant_id: TenantId,
        resp: oneshot::Sender<AutopilotResult<KpiReport>>,
    },
}

/// Cloneable handle exposing the control surface to the surrounding system
#[derive(Clone)]
pub struct AutopilotHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl AutopilotHandle {
    async fn send(&self, request: ControlRequest) -> AutopilotResult<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| AutopilotError::ControlChannelClosed {
                message: "orchestrator stopped".into(),
            })
    }

    /// Start a cycle for a tenant now, regardless of its schedule
    pub async fn trigger_cycle(&self, tenant_id: TenantId) -> AutopilotResult<()> {
        self.send(ControlRequest::TriggerCycle {
            tenant_id,
            manual: None,
        })
        .await
    }

    /// Start a cycle with an operator-chosen strategy, bypassing the cache
    pub async fn trigger_manual_cycle(
        &self,
        tenant_id: TenantId,
        manual: ManualOverride,
    ) -> AutopilotResult<()> {
        self.send(ControlRequest::TriggerCycle {
            tenant_id,
            manual: Some(manual),
        })
        .await
    }

    /// Cooperatively cancel the tenant's in-flight cycle, if any
    pub async fn cancel_cycle(&self, tenant_id: TenantId) -> AutopilotResult<()> {
        self.send(ControlRequest::CancelCycle { tenant_id }).await
    }

    pub async fn set_autopilot(&self, tenant_id: TenantId, enabled: bool) -> AutopilotResult<()> {
        self.send(ControlRequest::SetAutopilot { tenant_id, enabled })
            .await
    }

    pub async fn set_reinvestment(
        &self,
        tenant_id: TenantId,
        threshold: f64,
        budget_policy: BudgetPolicy,
    ) -> AutopilotResult<()> {
        self.send(ControlRequest::SetReinvestment {
            tenant_id,
            threshold,
            budget_policy,
        })
        .await
    }

    /// Current cycle state plus the last cycle's channel breakdown
    pub async fn cycle_status(&self, tenant_id: TenantId) -> AutopilotResult<TenantStatusView> {
        let (resp, rx) = oneshot::channel();
        self.send(ControlRequest::QueryStatus { tenant_id, resp })
            .await?;
        rx.await.map_err(|_| AutopilotError::ControlChannelClosed {
            message: "status query dropped".into(),
        })?
    }

    /// Revenue and campaign KPIs computed from the ledger
    pub async fn kpis(&self, tenant_id: TenantId) -> AutopilotResult<KpiReport> {
        let (resp, rx) = oneshot::channel();
        self.send(ControlRequest::QueryKpis { tenant_id, resp })
            .await?;
        rx.await.map_err(|_| AutopilotError::ControlChannelClosed {
            message: "kpi query dropped".into(),
        })?
    }
}

/// Everything a spawned cycle task needs, cloneable by Arc
struct CycleContext<C, M, A, S>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    shared: Arc<Mutex<SharedState>>,
    dispatcher: Arc<Dispatcher<C, M, A, S>>,
    engine: Arc<DecisionEngine>,
    channels: Vec<Channel>,
    backoff: FailureBackoff,
    cache_config: crate::config::CacheConfig,
    /// Snapshot exporter; ledger snapshots are skipped when unset
    snapshots: Option<Arc<dyn FileSystem>>,
}

impl<C, M, A, S> Clone for CycleContext<C, M, A, S>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            dispatcher: Arc::clone(&self.dispatcher),
            engine: Arc::clone(&self.engine),
            channels: self.channels.clone(),
            backoff: self.backoff,
            cache_config: self.cache_config.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

/// Main orchestrator coordinating all tenant cycles
pub struct Orchestrator<C, M, A, S>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    context: CycleContext<C, M, A, S>,
    config: AutopilotConfig,

    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,

    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<C, M, A, S> Orchestrator<C, M, A, S>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    /// Create an orchestrator with injected collaborators
    ///
    /// `enabled_channels` is the fan-out set offered to the decision engine.
    /// An empty set means no usable collaborators at all, the one systemic
    /// failure escalated to the operator instead of being absorbed.
    pub fn new(
        content: Arc<C>,
        commerce: Arc<M>,
        advertising: Arc<A>,
        social: Arc<S>,
        engine: DecisionEngine,
        config: AutopilotConfig,
        enabled_channels: Vec<Channel>,
    ) -> AutopilotResult<Self> {
        if enabled_channels.is_empty() {
            return Err(AutopilotError::NoChannelsConfigured);
        }

        let dispatcher = Arc::new(Dispatcher::new(
            content,
            commerce,
            advertising,
            social,
            config.dispatch.clone(),
        ));
        let shared = Arc::new(Mutex::new(SharedState {
            tenants: HashMap::new(),
            ledger: MemoryLedger::new(),
            cache: StrategyCache::new(),
            policy: ReinvestmentPolicy::new(config.reinvest.clone()),
        }));
        let (control_tx, control_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            context: CycleContext {
                shared,
                dispatcher,
                engine: Arc::new(engine),
                channels: enabled_channels,
                backoff: FailureBackoff {
                    base: config.scheduler.failure_backoff_base,
                    max: config.scheduler.failure_backoff_max,
                },
                cache_config: config.cache.clone(),
                snapshots: None,
            },
            config,
            control_tx,
            control_rx,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Export a ledger snapshot after every finished cycle
    pub fn with_snapshot_exporter(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.context.snapshots = Some(file_system);
        self
    }

    /// Register a tenant for scheduling
    pub async fn register_tenant(&self, tenant: Tenant) {
        let mut state = self.context.shared.lock().await;
        tenant_info!(
            tenant.id,
            "📋 Registered tenant '{}' ({})",
            tenant.name,
            tenant.niche
        );
        state.tenants.insert(tenant.id, TenantRuntime::new(tenant));
    }

    /// Control surface handle for the surrounding system
    pub fn handle(&self) -> AutopilotHandle {
        AutopilotHandle {
            tx: self.control_tx.clone(),
        }
    }

    /// Sender used to stop the scheduling loop
    pub fn shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Shared state accessor for inspection and tests
    pub fn shared_state(&self) -> Arc<Mutex<SharedState>> {
        Arc::clone(&self.context.shared)
    }

    /// Run one cycle for a tenant and wait for it to finish
    ///
    /// Used by manual triggers and tests; scheduled cycles go through
    /// `run()` instead and never block each other.
    pub async fn run_cycle_now(
        &self,
        tenant_id: TenantId,
        manual: Option<ManualOverride>,
    ) -> AutopilotResult<()> {
        drive_cycle(self.context.clone(), tenant_id, manual).await
    }

    /// Main scheduling loop
    ///
    /// Ticks on the configured interval, starting cycles for every eligible
    /// tenant as independent tasks, and serves control requests between
    /// ticks. Cycle failures never terminate this loop.
    pub async fn run(&mut self) -> AutopilotResult<()> {
        let mut tick = interval(self.config.scheduler.tick_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.start_eligible_cycles().await;
                }
                Some(request) = self.control_rx.recv() => {
                    self.handle_control(request).await;
                }
                _ = self.shutdown_rx.recv() => {
                    shared::logging::log_shutdown("control loop stopping");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawn a cycle task for every tenant whose schedule is due
    async fn start_eligible_cycles(&self) {
        let now = Utc::now();
        let due: Vec<TenantId> = {
            let state = self.context.shared.lock().await;
            state
                .tenants
                .values()
                .filter(|rt| rt.is_eligible(now))
                .map(|rt| rt.tenant.id)
                .collect()
        };

        for tenant_id in due {
            self.spawn_cycle(tenant_id, None);
        }
    }

    fn spawn_cycle(&self, tenant_id: TenantId, manual: Option<ManualOverride>) {
        let context = self.context.clone();
        tokio::spawn(async move {
            // Cycle-local failures are absorbed inside drive_cycle; anything
            // surfacing here is logged and dropped so the scheduler keeps
            // running.
            if let Err(e) = drive_cycle(context, tenant_id, manual).await {
                tenant_error!(tenant_id, "❌ Cycle task error: {}", e);
            }
        });
    }

    async fn handle_control(&self, request: ControlRequest) {
        match request {
            ControlRequest::TriggerCycle { tenant_id, manual } => {
                tenant_debug!(tenant_id, "🔄 Manual cycle trigger received");
                self.spawn_cycle(tenant_id, manual);
            }
            ControlRequest::CancelCycle { tenant_id } => {
                let mut state = self.context.shared.lock().await;
                if let Some(rt) = state.tenants.get_mut(&tenant_id) {
                    if rt.request_cancel() {
                        tenant_info!(tenant_id, "🚫 Cancellation requested");
                    } else {
                        tenant_debug!(tenant_id, "No active cycle to cancel");
                    }
                }
            }
            ControlRequest::SetAutopilot { tenant_id, enabled } => {
                let mut state = self.context.shared.lock().await;
                if let Some(rt) = state.tenants.get_mut(&tenant_id) {
                    rt.tenant.autopilot_enabled = enabled;
                    tenant_info!(tenant_id, "⚙️ Autopilot enabled = {}", enabled);
                }
            }
            ControlRequest::SetReinvestment {
                tenant_id,
                threshold,
                budget_policy,
            } => {
                let mut state = self.context.shared.lock().await;
                if let Some(rt) = state.tenants.get_mut(&tenant_id) {
                    rt.tenant.reinvestment_threshold = threshold;
                    rt.tenant.budget_policy = budget_policy;
                    tenant_info!(tenant_id, "⚙️ Reinvestment threshold = ${:.2}", threshold);
                }
            }
            ControlRequest::QueryStatus { tenant_id, resp } => {
                let state = self.context.shared.lock().await;
                let _ = resp.send(status_view(&state, tenant_id));
            }
            ControlRequest::QueryKpis { tenant_id, resp } => {
                let state = self.context.shared.lock().await;
                let _ = resp.send(kpi_report(&state, tenant_id, &self.config));
            }
        }
    }
}

fn status_view(state: &SharedState, tenant_id: TenantId) -> AutopilotResult<TenantStatusView> {
    let rt = state
        .tenants
        .get(&tenant_id)
        .ok_or(AutopilotError::UnknownTenant { tenant_id })?;
    Ok(TenantStatusView {
        tenant_id,
        status: rt.status(),
        phase: rt.active.as_ref().map(|a| a.phase),
        last_report: rt.last_report.clone(),
        autopilot_enabled: rt.tenant.autopilot_enabled,
        reinvestment_threshold: rt.tenant.reinvestment_threshold,
        budget_policy: rt.tenant.budget_policy.clone(),
    })
}

fn kpi_report(
    state: &SharedState,
    tenant_id: TenantId,
    config: &AutopilotConfig,
) -> AutopilotResult<KpiReport> {
    if !state.tenants.contains_key(&tenant_id) {
        return Err(AutopilotError::UnknownTenant { tenant_id });
    }
    let cutoff = Utc::now()
        - chrono::Duration::from_std(config.reinvest.window).unwrap_or(chrono::Duration::MAX);
    let active_campaigns = state
        .ledger
        .events_for_tenant(tenant_id)
        .filter(|e| {
            e.kind == AiEventKind::TaskSettled
                && e.success
                && e.payload
                    .get("channel")
                    .and_then(|c| c.as_str())
                    .is_some_and(|c| c.starts_with("ads-"))
        })
        .count() as u64;

    Ok(KpiReport {
        tenant_id,
        total_revenue: state.ledger.total_realized_profit(tenant_id),
        window_revenue: state.ledger.realized_profit_since(tenant_id, cutoff),
        active_campaigns,
        insights: state.ledger.intelligence_insights(),
    })
}

/// Strategy chosen for one channel this cycle
#[derive(Clone)]
struct ChannelPlan {
    strategy: String,
    params: serde_json::Value,
    exploration: bool,
}

fn plan_for(decision: &Decision, channel: Channel) -> Option<ChannelPlan> {
    decision.top_for_channel(channel).map(|r| ChannelPlan {
        strategy: r.strategy.clone(),
        params: r.params.clone(),
        exploration: r.exploration,
    })
}

struct PhaseResult {
    end: CycleEnd,
    channels: Vec<ChannelResult>,
    revenue: f64,
}

/// Drive one complete cycle for a tenant
///
/// All failures inside are absorbed into the cycle's own terminal state;
/// the only error this returns is an unknown tenant.
async fn drive_cycle<C, M, A, S>(
    context: CycleContext<C, M, A, S>,
    tenant_id: TenantId,
    manual: Option<ManualOverride>,
) -> AutopilotResult<()>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    // Acquire the lease and snapshot tenant config
    let (handle, tenant, directive) = {
        let mut guard = context.shared.lock().await;
        let state = &mut *guard;
        let rt = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or(AutopilotError::UnknownTenant { tenant_id })?;

        match rt.try_begin_cycle(Utc::now()) {
            Ok(handle) => {
                let tenant = rt.tenant.clone();
                let directive = rt.pending_directive.take();
                state.ledger.record_event(
                    tenant_id,
                    handle.cycle_id,
                    AiEventKind::PhaseTransition,
                    serde_json::json!({ "from": "idle", "to": "analyzing" }),
                    true,
                    0.0,
                    Utc::now(),
                );
                (handle, tenant, directive)
            }
            Err(AutopilotError::OrchestrationConflict { .. }) => {
                // A tick fired while a cycle is live. Log it, record it,
                // and skip; this is not an error to anyone upstream.
                tenant_debug!(tenant_id, "⏭️ Tick skipped, cycle lease held");
                let active_cycle = rt
                    .active
                    .as_ref()
                    .map(|a| a.cycle_id)
                    .unwrap_or_default();
                state.ledger.record_event(
                    tenant_id,
                    active_cycle,
                    AiEventKind::OrchestrationConflict,
                    serde_json::json!({ "reason": "lease held" }),
                    true,
                    0.0,
                    Utc::now(),
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    };

    let cycle_id = handle.cycle_id;
    tenant_info!(tenant_id, "🤖 Cycle {} started for '{}'", cycle_id, tenant.name);

    let result = match run_phases(&context, &tenant, &handle, manual, directive).await {
        Ok(result) => result,
        Err(e) => {
            tenant_error!(tenant_id, "❌ Cycle {} failed: {}", cycle_id, e);
            let mut guard = context.shared.lock().await;
            let state = &mut *guard;
            if let Some(rt) = state.tenants.get_mut(&tenant_id) {
                let _ = rt.advance_phase(CyclePhase::Failed);
            }
            state.ledger.record_event(
                tenant_id,
                cycle_id,
                AiEventKind::CycleFailed,
                serde_json::json!({ "error": e.to_string() }),
                false,
                0.0,
                Utc::now(),
            );
            PhaseResult {
                end: CycleEnd::Failed,
                channels: Vec::new(),
                revenue: 0.0,
            }
        }
    };

    // Release the lease and record the report
    {
        let mut state = context.shared.lock().await;
        if let Some(rt) = state.tenants.get_mut(&tenant_id) {
            let report = CycleReport {
                cycle_id,
                end: result.end,
                channels: result.channels,
                revenue: result.revenue,
                started_at: handle.started_at,
                finished_at: Utc::now(),
            };
            rt.finish_cycle(report, context.backoff, Utc::now());
        }
    }
    tenant_info!(tenant_id, "🏁 Cycle {} finished: {:?}", cycle_id, result.end);

    if let Some(fs) = &context.snapshots {
        let state = context.shared.lock().await;
        if let Err(e) = state.ledger.export_snapshot(fs.as_ref()).await {
            tenant_error!(tenant_id, "❌ Ledger snapshot export failed: {}", e);
        }
    }

    Ok(())
}

/// The cycle body: Analyzing through Reinvesting
///
/// Cancellation is checked before every dispatch group; a cancelled cycle
/// keeps everything already recorded and dispatches nothing further.
async fn run_phases<C, M, A, S>(
    context: &CycleContext<C, M, A, S>,
    tenant: &Tenant,
    handle: &CycleHandle,
    manual: Option<ManualOverride>,
    directive: Option<shared::ReinvestmentDirective>,
) -> AutopilotResult<PhaseResult>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    let tenant_id = tenant.id;
    let cycle_id = handle.cycle_id;
    let deadline = context.dispatcher.cycle_deadline();
    let mut results: Vec<ChannelResult> = Vec::new();
    let mut revenue = 0.0;
    let mut next_task_index: u32 = 0;

    // ---- ANALYZING ---------------------------------------------------------
    let decision = {
        let mut guard = context.shared.lock().await;
        let state = &mut *guard;
        let decision = context.engine.decide(
            tenant_id,
            &tenant.niche,
            &context.channels,
            &state.cache,
            manual.as_ref(),
            Utc::now(),
        );
        state.ledger.record_event(
            tenant_id,
            cycle_id,
            AiEventKind::DecisionMade,
            serde_json::json!({
                "source": format!("{:?}", decision.source),
                "candidates": decision.ranked.len(),
                "top": decision.ranked.first().map(|r| r.strategy.clone()),
            }),
            true,
            0.0,
            Utc::now(),
        );
        decision
    };

    // Budget for this cycle: the pending directive's allocation, or the
    // tenant's cap as a starting budget
    let mut ad_budget = directive
        .as_ref()
        .map(|d| d.allocated_budget)
        .unwrap_or_else(|| tenant.budget_policy.max_cycle_budget.min(10.0));
    let mut extra_product = false;
    if let Some(d) = &directive {
        match &d.action {
            DirectiveAction::IncreaseChannelBudget { channel, fraction } => {
                if matches!(channel, Channel::Advertising(_)) {
                    ad_budget *= 1.0 + fraction;
                }
            }
            DirectiveAction::LaunchAdditionalProduct => extra_product = true,
        }
    }

    // ---- CREATING ----------------------------------------------------------
    advance(context, tenant_id, cycle_id, CyclePhase::Creating).await?;
    let content_plan = plan_for(&decision, Channel::Content);
    let mut creating_tasks = Vec::new();
    if let Some(plan) = &content_plan {
        let count = if extra_product { 2 } else { 1 };
        for _ in 0..count {
            creating_tasks.push(ChannelTask {
                index: next_index(&mut next_task_index),
                channel: Channel::Content,
                strategy: plan.strategy.clone(),
                call: TaskCall::Generate {
                    niche: tenant.niche.clone(),
                    params: plan.params.clone(),
                },
            });
        }
    }
    let creating_outcomes = context
        .dispatcher
        .dispatch_group(
            tenant_id,
            cycle_id,
            creating_tasks,
            handle.cancel_rx.clone(),
            deadline,
        )
        .await;
    let drafts = collect_group(
        context,
        tenant,
        cycle_id,
        &creating_outcomes,
        content_plan.as_ref().map(|p| p.exploration).unwrap_or(false),
        &mut results,
        &mut revenue,
    )
    .await?;

    if cancelled(context, tenant_id, cycle_id, handle).await {
        return Ok(PhaseResult {
            end: CycleEnd::Cancelled,
            channels: results,
            revenue,
        });
    }

    // ---- DEPLOYING ---------------------------------------------------------
    advance(context, tenant_id, cycle_id, CyclePhase::Deploying).await?;
    let commerce_plan = plan_for(&decision, Channel::Commerce);
    let mut deploy_tasks = Vec::new();
    if let Some(plan) = &commerce_plan {
        for draft in &drafts {
            deploy_tasks.push(ChannelTask {
                index: next_index(&mut next_task_index),
                channel: Channel::Commerce,
                strategy: plan.strategy.clone(),
                call: TaskCall::Publish {
                    draft: draft.clone(),
                },
            });
        }
    }
    let deploy_outcomes = context
        .dispatcher
        .dispatch_group(
            tenant_id,
            cycle_id,
            deploy_tasks,
            handle.cancel_rx.clone(),
            deadline,
        )
        .await;
    collect_group(
        context,
        tenant,
        cycle_id,
        &deploy_outcomes,
        commerce_plan.as_ref().map(|p| p.exploration).unwrap_or(false),
        &mut results,
        &mut revenue,
    )
    .await?;

    if cancelled(context, tenant_id, cycle_id, handle).await {
        return Ok(PhaseResult {
            end: CycleEnd::Cancelled,
            channels: results,
            revenue,
        });
    }

    // ---- MARKETING ---------------------------------------------------------
    advance(context, tenant_id, cycle_id, CyclePhase::Marketing).await?;
    let ad_channel = Channel::Advertising(context.dispatcher.ad_platform());
    let ad_plan = plan_for(&decision, ad_channel);
    let social_plan = plan_for(&decision, Channel::Social);
    let mut marketing_tasks = Vec::new();
    if let Some(plan) = &ad_plan {
        let audience = plan
            .params
            .get("audience")
            .and_then(|a| a.as_str())
            .unwrap_or("broad")
            .to_string();
        marketing_tasks.push(ChannelTask {
            index: next_index(&mut next_task_index),
            channel: ad_channel,
            strategy: plan.strategy.clone(),
            call: TaskCall::Launch {
                budget: ad_budget,
                targeting: AdTargeting {
                    audience,
                    niche: tenant.niche.clone(),
                },
                creative: format!("Discover {} essentials", tenant.niche),
            },
        });
    }
    if let Some(plan) = &social_plan {
        marketing_tasks.push(ChannelTask {
            index: next_index(&mut next_task_index),
            channel: Channel::Social,
            strategy: plan.strategy.clone(),
            call: TaskCall::Schedule {
                content: format!("Daily {} tip from {}", tenant.niche, tenant.name),
                publish_at: Utc::now() + chrono::Duration::hours(1),
            },
        });
    }
    let marketing_exploration = ad_plan
        .as_ref()
        .or(social_plan.as_ref())
        .map(|p| p.exploration)
        .unwrap_or(false);
    let marketing_outcomes = context
        .dispatcher
        .dispatch_group(
            tenant_id,
            cycle_id,
            marketing_tasks,
            handle.cancel_rx.clone(),
            deadline,
        )
        .await;
    collect_group(
        context,
        tenant,
        cycle_id,
        &marketing_outcomes,
        marketing_exploration,
        &mut results,
        &mut revenue,
    )
    .await?;

    if cancelled(context, tenant_id, cycle_id, handle).await {
        return Ok(PhaseResult {
            end: CycleEnd::Cancelled,
            channels: results,
            revenue,
        });
    }

    // ---- MONITORING --------------------------------------------------------
    // All task groups have settled by now; verify nothing is left unsettled
    // and let the collector's records stand as the monitoring output.
    advance(context, tenant_id, cycle_id, CyclePhase::Monitoring).await?;
    let dispatched = next_task_index as usize;
    if results.len() != dispatched {
        return Err(AutopilotError::integrity(format!(
            "cycle {cycle_id} dispatched {dispatched} tasks but settled {}",
            results.len()
        )));
    }

    // ---- OPTIMIZING --------------------------------------------------------
    advance(context, tenant_id, cycle_id, CyclePhase::Optimizing).await?;
    {
        let mut state = context.shared.lock().await;
        let evicted = state.cache.evict_stale(&context.cache_config, Utc::now());
        if !evicted.is_empty() {
            tenant_debug!(tenant_id, "🧹 Evicted {} stale cache entries", evicted.len());
        }
    }

    // ---- REINVESTING -------------------------------------------------------
    advance(context, tenant_id, cycle_id, CyclePhase::Reinvesting).await?;
    {
        let mut guard = context.shared.lock().await;
        let state = &mut *guard;
        if let Some(rt) = state.tenants.get_mut(&tenant_id) {
            if let Some(directive) =
                state
                    .policy
                    .evaluate(&rt.tenant, &state.ledger, &state.cache, Utc::now())
            {
                tenant_info!(
                    tenant_id,
                    "💰 Reinvestment directive: {:?} (${:.2} profit)",
                    directive.action,
                    directive.total_profit
                );
                state.ledger.record_event(
                    tenant_id,
                    cycle_id,
                    AiEventKind::DirectiveIssued,
                    serde_json::to_value(&directive)?,
                    true,
                    directive.total_profit,
                    Utc::now(),
                );
                // Projected return on the allocated budget, kept out of the
                // realized-profit sums
                state.ledger.record_profit(
                    tenant_id,
                    "reinvestment roi projection",
                    directive.allocated_budget * 2.0,
                    ProfitCategory::Projection,
                    None,
                    Utc::now(),
                )?;
                rt.pending_directive = Some(directive);
            }
        }
    }

    advance(context, tenant_id, cycle_id, CyclePhase::Idle).await?;

    Ok(PhaseResult {
        end: summarize_end(&results, false),
        channels: results,
        revenue,
    })
}

fn next_index(counter: &mut u32) -> u32 {
    let index = *counter;
    *counter += 1;
    index
}

/// Advance the active cycle's phase and record the transition
async fn advance<C, M, A, S>(
    context: &CycleContext<C, M, A, S>,
    tenant_id: TenantId,
    cycle_id: CycleId,
    to: CyclePhase,
) -> AutopilotResult<()>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    let mut guard = context.shared.lock().await;
    let state = &mut *guard;
    let rt = state
        .tenants
        .get_mut(&tenant_id)
        .ok_or(AutopilotError::UnknownTenant { tenant_id })?;
    let from = rt.advance_phase(to)?;
    state.ledger.record_event(
        tenant_id,
        cycle_id,
        AiEventKind::PhaseTransition,
        serde_json::json!({ "from": from.to_string(), "to": to.to_string() }),
        true,
        0.0,
        Utc::now(),
    );
    Ok(())
}

/// Check the cancel signal; on cancellation move the cycle to Cancelled and
/// record the event, keeping everything already written intact
async fn cancelled<C, M, A, S>(
    context: &CycleContext<C, M, A, S>,
    tenant_id: TenantId,
    cycle_id: CycleId,
    handle: &CycleHandle,
) -> bool
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    if !*handle.cancel_rx.borrow() {
        return false;
    }
    let mut guard = context.shared.lock().await;
    let state = &mut *guard;
    if let Some(rt) = state.tenants.get_mut(&tenant_id) {
        let _ = rt.advance_phase(CyclePhase::Cancelled);
    }
    state.ledger.record_event(
        tenant_id,
        cycle_id,
        AiEventKind::CycleCancelled,
        serde_json::json!({ "reason": "operator cancellation" }),
        true,
        0.0,
        Utc::now(),
    );
    tenant_info!(tenant_id, "🚫 Cycle {} cancelled", cycle_id);
    true
}

/// Record a settled group through the collector and accumulate the report
///
/// Returns any product drafts produced by successful content tasks so the
/// deploy group can publish them.
#[allow(clippy::too_many_arguments)]
async fn collect_group<C, M, A, S>(
    context: &CycleContext<C, M, A, S>,
    tenant: &Tenant,
    cycle_id: CycleId,
    outcomes: &[TaskOutcome],
    exploration: bool,
    results: &mut Vec<ChannelResult>,
    revenue: &mut f64,
) -> AutopilotResult<Vec<ProductDraft>>
where
    C: ContentChannel + 'static,
    M: CommerceChannel + 'static,
    A: AdvertisingChannel + 'static,
    S: SocialChannel + 'static,
{
    let mut drafts = Vec::new();
    let mut guard = context.shared.lock().await;
    let state = &mut *guard;

    for outcome in outcomes {
        OutcomeCollector::record_settlement(
            &mut state.ledger,
            &mut state.cache,
            tenant.id,
            cycle_id,
            &tenant.niche,
            outcome,
            exploration,
            Utc::now(),
        )?;
        *revenue += outcome.revenue();

        results.push(ChannelResult {
            channel: outcome.channel,
            strategy: outcome.strategy.clone(),
            success: outcome.status.is_success(),
            detail: match &outcome.status {
                TaskStatus::Succeeded { revenue } => format!("ok (${revenue:.2})"),
                TaskStatus::Failed { error } => error.clone(),
                TaskStatus::Degraded { reason } => reason.clone(),
            },
        });

        if outcome.channel == Channel::Content && outcome.status.is_success() {
            if let Ok(draft) = serde_json::from_value::<ProductDraft>(outcome.payload.clone()) {
                drafts.push(draft);
            }
        }
    }

    Ok(drafts)
}
